// ✅ Reference Verifier - Plausibility and reference checks for survivors
//
// Checks:
// 1. issuer is known
// 2. annual fee below the implausibility ceiling
// 3. reward currency is one of the permitted values
// 4. reference entry (by storage key): fee in range, issuer matches exactly
// 5. every category multiplier below the ceiling
//
// Issues are annotations. Verification never blocks persistence.

use crate::entities::{EntityRecord, RewardCurrency, UNKNOWN_ISSUER};
use crate::reference::ReferenceTable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ============================================================================
// ISSUES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    UnknownIssuer,
    ImplausibleFee,
    InvalidCurrency,
    FeeOutOfRange,
    IssuerMismatch,
    ImplausibleMultiplier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationIssue {
    pub kind: IssueKind,
    pub field: String,
    pub message: String,
}

impl VerificationIssue {
    fn new(kind: IssueKind, field: &str, message: String) -> Self {
        VerificationIssue {
            kind,
            field: field.to_string(),
            message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Warning, // A few fields look off
    Error,   // Enough fields look off that the record is doubtful
}

// ============================================================================
// VERIFICATION REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub storage_key: String,
    pub issues: Vec<VerificationIssue>,
    /// None when there are no issues
    pub severity: Option<Severity>,
    pub reference_matched: bool,
    pub confidence_before: f64,
    pub confidence_after: f64,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn summary(&self) -> String {
        let status = match self.severity {
            None => "VERIFIED",
            Some(Severity::Warning) => "WARNING",
            Some(Severity::Error) => "ERROR",
        };
        format!(
            "{} {}: {} issues, confidence {:.2} → {:.2}",
            status,
            self.storage_key,
            self.issues.len(),
            self.confidence_before,
            self.confidence_after
        )
    }
}

// ============================================================================
// REFERENCE VERIFIER
// ============================================================================

pub struct ReferenceVerifier {
    /// Fees above this are implausible (default: 1000)
    pub fee_ceiling: f64,

    /// Category multipliers above this are implausible (default: 10)
    pub multiplier_ceiling: f64,

    /// Confidence added on a reference match (default: 0.2)
    pub reference_bonus: f64,

    /// Issue count at which a record is classified ERROR (default: 3)
    pub error_threshold: usize,
}

impl ReferenceVerifier {
    pub fn new() -> Self {
        ReferenceVerifier {
            fee_ceiling: 1000.0,
            multiplier_ceiling: 10.0,
            reference_bonus: 0.2,
            error_threshold: 3,
        }
    }

    /// Run every check. Returns the issues and the confidence the record
    /// should have afterwards; the record itself is not modified.
    pub fn verify(&self, record: &EntityRecord, table: &ReferenceTable) -> (Vec<VerificationIssue>, f64) {
        let mut issues = Vec::new();
        let mut confidence = record.confidence;

        if !record.has_known_issuer() {
            issues.push(VerificationIssue::new(
                IssueKind::UnknownIssuer,
                "issuer",
                format!("issuer is '{}'", UNKNOWN_ISSUER),
            ));
        }

        if let Some(fee) = record.annual_fee.amount() {
            if fee > self.fee_ceiling {
                issues.push(VerificationIssue::new(
                    IssueKind::ImplausibleFee,
                    "annual_fee",
                    format!("annual fee ${:.2} exceeds ${:.2}", fee, self.fee_ceiling),
                ));
            }
        }

        if !RewardCurrency::ALL.contains(&record.reward_currency) {
            issues.push(VerificationIssue::new(
                IssueKind::InvalidCurrency,
                "reward_currency",
                format!("unsupported reward currency '{}'", record.reward_currency.as_str()),
            ));
        }

        if let Some(entry) = table.get(&record.storage_key) {
            let (min, max) = entry.fee_range;
            match record.annual_fee.amount() {
                Some(fee) if entry.fee_in_range(fee) => {}
                Some(fee) => issues.push(VerificationIssue::new(
                    IssueKind::FeeOutOfRange,
                    "annual_fee",
                    format!("annual fee ${:.2} outside expected ${:.2}-${:.2}", fee, min, max),
                )),
                None => issues.push(VerificationIssue::new(
                    IssueKind::FeeOutOfRange,
                    "annual_fee",
                    format!("annual fee unknown, expected ${:.2}-${:.2}", min, max),
                )),
            }

            if record.issuer != entry.issuer {
                issues.push(VerificationIssue::new(
                    IssueKind::IssuerMismatch,
                    "issuer",
                    format!("issuer '{}' but reference says '{}'", record.issuer, entry.issuer),
                ));
            }

            // The match itself is evidence, whatever the range checks said
            confidence = (confidence + self.reference_bonus).min(1.0);
        }

        for reward in record.category_rewards.values() {
            if reward.multiplier > self.multiplier_ceiling {
                issues.push(VerificationIssue::new(
                    IssueKind::ImplausibleMultiplier,
                    "category_rewards",
                    format!(
                        "{} multiplier {} exceeds {}",
                        reward.category.as_str(),
                        reward.multiplier,
                        self.multiplier_ceiling
                    ),
                ));
            }
        }

        (issues, confidence.max(record.confidence))
    }

    /// WARNING below the error threshold, ERROR at or above it
    pub fn classify(&self, issue_count: usize) -> Option<Severity> {
        match issue_count {
            0 => None,
            n if n < self.error_threshold => Some(Severity::Warning),
            _ => Some(Severity::Error),
        }
    }

    /// Verify and annotate: apply the new confidence, stamp a clean record
    /// as verified at `now`.
    pub fn verify_record(
        &self,
        record: &mut EntityRecord,
        table: &ReferenceTable,
        now: DateTime<Utc>,
    ) -> VerificationReport {
        let confidence_before = record.confidence;
        let reference_matched = table.get(&record.storage_key).is_some();
        let (issues, confidence) = self.verify(record, table);
        record.raise_confidence(confidence);

        let severity = self.classify(issues.len());
        if issues.is_empty() {
            record.last_verified_at = Some(now);
        }

        let report = VerificationReport {
            storage_key: record.storage_key.clone(),
            issues,
            severity,
            reference_matched,
            confidence_before,
            confidence_after: record.confidence,
        };

        match severity {
            Some(Severity::Error) => warn!(target: "verify", "{}", report.summary()),
            Some(Severity::Warning) => info!(target: "verify", "{}", report.summary()),
            None => {}
        }
        report
    }

    pub fn summarize(&self, reports: &[VerificationReport]) -> VerificationSummary {
        let total = reports.len();
        let confidence_sum: f64 = reports.iter().map(|r| r.confidence_after).sum();
        VerificationSummary {
            total,
            verified: reports.iter().filter(|r| r.severity.is_none()).count(),
            warnings: reports.iter().filter(|r| r.severity == Some(Severity::Warning)).count(),
            errors: reports.iter().filter(|r| r.severity == Some(Severity::Error)).count(),
            reference_matches: reports.iter().filter(|r| r.reference_matched).count(),
            average_confidence: if total > 0 { confidence_sum / total as f64 } else { 0.0 },
        }
    }
}

impl Default for ReferenceVerifier {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// BATCH SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub total: usize,
    pub verified: usize,
    pub warnings: usize,
    pub errors: usize,
    pub reference_matches: usize,
    pub average_confidence: f64,
}

impl VerificationSummary {
    pub fn summary(&self) -> String {
        format!(
            "{} records: {} verified, {} warnings, {} errors | {} reference matches, {:.1}% avg confidence",
            self.total,
            self.verified,
            self.warnings,
            self.errors,
            self.reference_matches,
            self.average_confidence * 100.0
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
