// Card Reconciliation - Core Library
// Folds card offers scraped from untrusted sources into one canonical record
// per card, resolves the duplicates that remain, and verifies the survivors
// against a curated reference table.

pub mod error;
pub mod config;
pub mod logging;
pub mod entities;       // EntityRecord, RawCandidate and their value types
pub mod identity;       // Identity Normalizer: matching key, storage key, grouping key
pub mod classify;       // Ordered pattern tables (issuer, program, currency, category)
pub mod extract;        // Fee / rate / reward / bonus text extraction
pub mod store;          // Sharded aggregate store keyed by identity
pub mod merge;          // Candidate Merger
pub mod scoring;        // Completeness Scorer
pub mod deduplication;  // Duplicate Resolver
pub mod reference;      // Reference table + enrichment
pub mod verification;   // Reference Verifier
pub mod db;             // Repository trait + SQLite implementation
pub mod sources;        // Source Adapters + concurrent ingestion
pub mod pipeline;       // End-to-end run

// Re-export commonly used types
pub use error::{ReconError, Result};
pub use config::{RunConfig, SourceFormat, SourceSpec};
pub use entities::{
    AnnualFee, CategoryReward, EntityRecord, LimitPeriod, RawCandidate, RewardCurrency,
    RewardRate, RewardUnit, SignupBonus, SpendCategory, SpendLimit,
};
pub use identity::{group_key, normalize, storage_key};
pub use store::AggregateStore;
pub use merge::{CandidateMerger, MergeOutcome, MergeStats};
pub use scoring::{score, OwnRewards, RewardLookup, ScoreBreakdown};
pub use deduplication::{DuplicateGroup, DuplicateResolver, RemovalDirective, RemovalStep, Resolution};
pub use reference::{ReferenceEntry, ReferenceTable};
pub use verification::{
    IssueKind, ReferenceVerifier, Severity, VerificationIssue, VerificationReport,
    VerificationSummary,
};
pub use db::{Event, Repository, RepositoryRewards, SqliteRepository};
pub use sources::{
    ingest, CsvFileAdapter, IngestOptions, IngestOutcome, JsonFileAdapter, SourceAdapter,
    SourceReport, StaticAdapter,
};
pub use pipeline::{dedupe_repository, MaintenanceReport, PersistOutcome, Pipeline, PipelineReport, Reconciled};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
