// 🔄 Pipeline - Ingest → merge → resolve → enrich → verify → persist
//
// Stages after ingestion run on a closed snapshot of the aggregate store.
// Configuration and reference data are checked before the repository is
// opened, so a configuration failure never leaves partial writes behind.

use crate::config::RunConfig;
use crate::db::{Repository, RepositoryRewards, SqliteRepository};
use crate::deduplication::{DuplicateGroup, DuplicateResolver, RemovalDirective};
use crate::entities::EntityRecord;
use crate::error::Result;
use crate::merge::{carry_forward, MergeStats};
use crate::reference::ReferenceTable;
use crate::scoring::OwnRewards;
use crate::sources::{ingest, IngestOptions, SourceReport};
use crate::store::AggregateStore;
use crate::verification::{ReferenceVerifier, VerificationReport, VerificationSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info};

/// Default floor for persisting a record
pub const DEFAULT_MIN_PERSIST_CONFIDENCE: f64 = 0.3;

// ============================================================================
// RECONCILED SNAPSHOT
// ============================================================================

/// Survivors of one run, verified and ready to persist
#[derive(Debug, Clone, Default)]
pub struct Reconciled {
    /// In discovery order
    pub survivors: Vec<EntityRecord>,
    pub directives: Vec<RemovalDirective>,
    pub groups: Vec<DuplicateGroup>,
    /// Parallel to `survivors`
    pub verification: Vec<VerificationReport>,
    pub enriched: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistOutcome {
    pub persisted: usize,
    /// Storage keys below the confidence floor
    pub skipped_low_confidence: Vec<String>,
    pub removals_applied: usize,
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline<'a> {
    reference: &'a ReferenceTable,
    resolver: DuplicateResolver,
    verifier: ReferenceVerifier,
    min_persist_confidence: f64,
}

impl<'a> Pipeline<'a> {
    pub fn new(reference: &'a ReferenceTable) -> Self {
        Pipeline {
            reference,
            resolver: DuplicateResolver::new(),
            verifier: ReferenceVerifier::new(),
            min_persist_confidence: DEFAULT_MIN_PERSIST_CONFIDENCE,
        }
    }

    pub fn with_resolver(mut self, resolver: DuplicateResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_verifier(mut self, verifier: ReferenceVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_min_persist_confidence(mut self, threshold: f64) -> Self {
        self.min_persist_confidence = threshold;
        self
    }

    pub fn verifier(&self) -> &ReferenceVerifier {
        &self.verifier
    }

    /// Resolve, enrich and verify a closed store
    pub fn reconcile(&self, store: AggregateStore) -> Reconciled {
        self.reconcile_records(store.into_snapshot(), Utc::now())
    }

    pub fn reconcile_records(&self, records: Vec<EntityRecord>, now: DateTime<Utc>) -> Reconciled {
        let resolution = self.resolver.resolve(records, &OwnRewards);
        info!(target: "pipeline", "{}", resolution.summary());

        let mut survivors = resolution.survivors;
        let mut enriched = 0;
        let mut verification = Vec::with_capacity(survivors.len());
        for record in survivors.iter_mut() {
            if self.reference.enrich(record) {
                enriched += 1;
            }
            verification.push(self.verifier.verify_record(record, self.reference, now));
        }

        Reconciled {
            survivors,
            directives: resolution.directives,
            groups: resolution.groups,
            verification,
            enriched,
        }
    }

    /// Remove persisted losers superseded by a kept survivor, then write
    /// survivors at or above the confidence floor. Each write folds in the
    /// stored row and any removed losers, so a partial run never drops
    /// previously stored rewards, bonuses or sources.
    pub fn persist<R: Repository + ?Sized>(&self, reconciled: &Reconciled, repo: &mut R) -> Result<PersistOutcome> {
        let mut outcome = PersistOutcome::default();

        let (kept, skipped): (Vec<&EntityRecord>, Vec<&EntityRecord>) = reconciled
            .survivors
            .iter()
            .partition(|r| r.confidence >= self.min_persist_confidence);

        let kept_identities: HashSet<&str> = kept.iter().map(|r| r.identity_key.as_str()).collect();
        let survivor_keys: HashSet<&str> = reconciled
            .survivors
            .iter()
            .map(|r| r.storage_key.as_str())
            .collect();

        let mut inherited: HashMap<&str, Vec<EntityRecord>> = HashMap::new();

        // Removals first: an absorbed survivor may take over a loser's slug
        for directive in &reconciled.directives {
            if survivor_keys.contains(directive.storage_key.as_str()) {
                continue;
            }
            if !kept_identities.contains(directive.survivor_identity_key.as_str()) {
                debug!(target: "persist", storage_key = %directive.storage_key, "survivor not persisted, removal held back");
                continue;
            }
            // The loser's stored history moves to its survivor
            if let Some(mut loser) = repo.find_by_storage_key(&directive.storage_key)? {
                loser.entity_id = None;
                inherited
                    .entry(directive.survivor_identity_key.as_str())
                    .or_default()
                    .push(loser);
            }
            if repo.apply_removal(directive)? {
                outcome.removals_applied += 1;
                info!(target: "persist", "removed {}", directive.reason());
            }
        }

        for record in kept {
            let mut merged = record.clone();
            if let Some(stored) = repo.find_by_storage_key(&record.storage_key)? {
                carry_forward(&mut merged, &stored);
            }
            for loser in inherited.get(record.identity_key.as_str()).into_iter().flatten() {
                carry_forward(&mut merged, loser);
            }
            repo.upsert(&merged)?;
            outcome.persisted += 1;
        }
        for record in skipped {
            debug!(target: "persist", storage_key = %record.storage_key, confidence = record.confidence, "below confidence floor, not persisted");
            outcome.skipped_low_confidence.push(record.storage_key.clone());
        }

        info!(
            target: "persist",
            persisted = outcome.persisted,
            skipped = outcome.skipped_low_confidence.len(),
            removals = outcome.removals_applied,
            "persist complete"
        );
        Ok(outcome)
    }
}

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
    pub merge: MergeStats,
    /// Aggregates in the store before duplicate resolution
    pub aggregates: usize,
    pub survivors: Vec<EntityRecord>,
    pub groups: Vec<DuplicateGroup>,
    pub directives: Vec<RemovalDirective>,
    pub enriched: usize,
    pub verification: VerificationSummary,
    pub verification_reports: Vec<VerificationReport>,
    pub persisted: usize,
    pub skipped_low_confidence: Vec<String>,
    pub removals_applied: usize,
}

impl PipelineReport {
    pub fn summary(&self) -> String {
        let failed = self.sources.iter().filter(|s| s.is_failure()).count();
        format!(
            "{} sources ({} failed) | {} | {} aggregates → {} survivors, {} removals | {} | {} persisted, {} below confidence floor",
            self.sources.len(),
            failed,
            self.merge.summary(),
            self.aggregates,
            self.survivors.len(),
            self.directives.len(),
            self.verification.summary(),
            self.persisted,
            self.skipped_low_confidence.len()
        )
    }
}

/// One full run from a validated configuration
pub async fn run(config: &RunConfig) -> Result<PipelineReport> {
    config.validate()?;
    let reference = ReferenceTable::from_file(&config.reference_path)?;
    info!(target: "pipeline", entries = reference.len(), "reference table loaded");

    let run_at = Utc::now();
    let options = IngestOptions {
        timeout: Duration::from_secs(config.source_timeout_secs),
        shard_count: config.shard_count,
    };
    let outcome = ingest(config.build_adapters(), options).await;
    let aggregates = outcome.store.len();

    let pipeline = Pipeline::new(&reference).with_min_persist_confidence(config.min_persist_confidence);
    let reconciled = pipeline.reconcile_records(outcome.store.into_snapshot(), run_at);

    let mut repo = SqliteRepository::open(&config.database_path)?;
    let persisted = pipeline.persist(&reconciled, &mut repo)?;

    let verification = pipeline.verifier().summarize(&reconciled.verification);
    info!(target: "pipeline", "{}", verification.summary());

    Ok(PipelineReport {
        run_at,
        sources: outcome.sources,
        merge: outcome.merge_stats,
        aggregates,
        survivors: reconciled.survivors,
        groups: reconciled.groups,
        directives: reconciled.directives,
        enriched: reconciled.enriched,
        verification,
        verification_reports: reconciled.verification,
        persisted: persisted.persisted,
        skipped_low_confidence: persisted.skipped_low_confidence,
        removals_applied: persisted.removals_applied,
    })
}

// ============================================================================
// REPOSITORY MAINTENANCE
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub loaded: usize,
    pub groups: Vec<DuplicateGroup>,
    pub directives: Vec<RemovalDirective>,
    pub removals_applied: usize,
    pub survivors_updated: usize,
}

impl MaintenanceReport {
    pub fn summary(&self) -> String {
        format!(
            "{} persisted records: {} duplicate groups, {} removed, {} survivors updated",
            self.loaded,
            self.groups.len(),
            self.removals_applied,
            self.survivors_updated
        )
    }
}

/// Resolve duplicates among already-persisted records, scoring them by the
/// rewards stored in the repository
pub fn dedupe_repository<R: Repository + ?Sized>(repo: &mut R) -> Result<MaintenanceReport> {
    let records = repo.all_entities()?;
    let loaded = records.len();

    let resolution = {
        let lookup = RepositoryRewards(&*repo);
        DuplicateResolver::new().resolve(records, &lookup)
    };
    info!(target: "dedupe", "{}", resolution.summary());

    let mut report = MaintenanceReport {
        loaded,
        ..MaintenanceReport::default()
    };

    for directive in &resolution.directives {
        if repo.apply_removal(directive)? {
            report.removals_applied += 1;
        }
    }

    let absorbed: HashSet<&str> = resolution
        .directives
        .iter()
        .map(|d| d.survivor_identity_key.as_str())
        .collect();
    for survivor in resolution
        .survivors
        .iter()
        .filter(|r| absorbed.contains(r.identity_key.as_str()))
    {
        repo.upsert(survivor)?;
        report.survivors_updated += 1;
    }

    report.groups = resolution.groups;
    report.directives = resolution.directives;
    info!(target: "dedupe", "{}", report.summary());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{AnnualFee, CategoryReward, RewardRate, RewardUnit, SpendCategory};
    use chrono::TimeZone;

    const REFERENCE: &str = r#"{
        "td-aeroplan-visa-infinite": {
            "issuer": "TD",
            "program": "Aeroplan",
            "fee_range": [120, 160],
            "category_rewards": [{"category": "travel", "multiplier": 1.5, "unit": "multiplier"}]
        }
    }"#;

    fn create_test_record(name: &str, issuer: &str, seq: u64) -> EntityRecord {
        let mut record = EntityRecord::new(crate::identity::normalize(name, issuer), name, issuer);
        record.discovery_seq = seq;
        record.confidence = 0.5;
        record.sources.insert(format!("source-{}", seq));
        record
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_reconcile_enriches_and_verifies() {
        let reference = ReferenceTable::from_json_str(REFERENCE).unwrap();
        let pipeline = Pipeline::new(&reference);

        let mut record = create_test_record("TD Aeroplan Visa Infinite", "TD", 0);
        record.annual_fee = AnnualFee::Known(139.0);

        let reconciled = pipeline.reconcile_records(vec![record], fixed_now());
        assert_eq!(reconciled.survivors.len(), 1);
        assert_eq!(reconciled.enriched, 1);

        let survivor = &reconciled.survivors[0];
        assert!(survivor.category_rewards.contains_key(&SpendCategory::Travel));
        // 0.5 + 0.3 enrichment + 0.2 reference match
        assert!((survivor.confidence - 1.0).abs() < 1e-9);
        assert_eq!(survivor.last_verified_at, Some(fixed_now()));
        assert!(reconciled.verification[0].is_clean());
    }

    #[test]
    fn test_persist_skips_low_confidence() {
        let reference = ReferenceTable::from_json_str(REFERENCE).unwrap();
        let pipeline = Pipeline::new(&reference);
        let mut repo = SqliteRepository::open_in_memory().unwrap();

        let mut weak = create_test_record("Mystery Rewards Card", "Nowhere Bank", 1);
        weak.confidence = 0.1;
        let strong = create_test_record("RBC Avion Visa Infinite", "RBC", 0);

        let reconciled = Reconciled {
            survivors: vec![strong, weak],
            ..Reconciled::default()
        };
        let outcome = pipeline.persist(&reconciled, &mut repo).unwrap();
        assert_eq!(outcome.persisted, 1);
        assert_eq!(outcome.skipped_low_confidence.len(), 1);
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn test_persist_removes_superseded_rows() {
        let reference = ReferenceTable::from_json_str(REFERENCE).unwrap();
        let pipeline = Pipeline::new(&reference);
        let mut repo = SqliteRepository::open_in_memory().unwrap();

        // A low-quality slug from an earlier run
        let stale = create_test_record("Best TD Aeroplan Card", "TD", 0);
        repo.upsert(&stale).unwrap();

        let mut good = create_test_record("TD Aeroplan Visa Infinite", "TD", 0);
        good.annual_fee = AnnualFee::Known(139.0);
        good.add_category_reward(CategoryReward::new(SpendCategory::Travel, 1.5, RewardUnit::Multiplier).unwrap());
        let mut fresh_stale = stale.clone();
        fresh_stale.discovery_seq = 1;

        let reconciled = pipeline.reconcile_records(vec![good, fresh_stale], fixed_now());
        assert_eq!(reconciled.directives.len(), 1);

        let outcome = pipeline.persist(&reconciled, &mut repo).unwrap();
        assert_eq!(outcome.removals_applied, 1);
        assert_eq!(repo.count().unwrap(), 1);
        assert!(repo.find_by_storage_key(&stale.storage_key).unwrap().is_none());
        assert!(repo.find_by_storage_key("td-aeroplan-visa-infinite").unwrap().is_some());
    }

    #[test]
    fn test_dedupe_repository_keeps_best_row() {
        let mut repo = SqliteRepository::open_in_memory().unwrap();

        let mut rich = create_test_record("TD Aeroplan Visa Infinite", "TD", 0);
        rich.annual_fee = AnnualFee::Known(139.0);
        rich.base_reward = Some(RewardRate::new(1.0, RewardUnit::Multiplier));
        rich.add_category_reward(CategoryReward::new(SpendCategory::Travel, 1.5, RewardUnit::Multiplier).unwrap());
        let mut poor = create_test_record("Best TD Aeroplan Card", "TD", 1);
        poor.add_category_reward(CategoryReward::new(SpendCategory::Dining, 1.5, RewardUnit::Multiplier).unwrap());

        repo.upsert(&poor).unwrap();
        repo.upsert(&rich).unwrap();

        let report = dedupe_repository(&mut repo).unwrap();
        assert_eq!(report.loaded, 2);
        assert_eq!(report.removals_applied, 1);
        assert_eq!(report.survivors_updated, 1);
        assert_eq!(repo.count().unwrap(), 1);

        let survivor = repo.find_by_storage_key("td-aeroplan-visa-infinite").unwrap().unwrap();
        assert_eq!(survivor.category_rewards.len(), 2);
        assert!(survivor.sources.contains("source-1"));
    }

    #[test]
    fn test_dedupe_repository_without_duplicates_is_noop() {
        let mut repo = SqliteRepository::open_in_memory().unwrap();
        repo.upsert(&create_test_record("RBC Avion Visa Infinite", "RBC", 0)).unwrap();
        repo.upsert(&create_test_record("Scotiabank Gold American Express", "Scotiabank", 1)).unwrap();

        let report = dedupe_repository(&mut repo).unwrap();
        assert_eq!(report.removals_applied, 0);
        assert_eq!(report.survivors_updated, 0);
        assert_eq!(repo.count().unwrap(), 2);
    }
}
