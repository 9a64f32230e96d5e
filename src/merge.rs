// 🔀 Candidate Merger - Fold raw candidates into one aggregate per identity
//
// Field policy, applied field by field:
// - a present, non-zero value is never replaced by an empty / zero / unknown one
// - two present values that disagree: first writer wins
// - category rewards: union by category, first reward per category wins
// - sources: union; every second-or-later distinct source adds +0.2 confidence
//
// The same policy folds a duplicate loser into its survivor (see absorb()).

use crate::classify::{classify_currency, classify_issuer, classify_program, point_valuation};
use crate::entities::{AnnualFee, EntityRecord, RawCandidate, UNKNOWN_ISSUER};
use crate::extract::{extract_category_rewards, parse_fee, parse_rate, parse_signup_bonus};
use crate::identity::normalize;
use crate::store::AggregateStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Confidence of a record created from a single candidate that carries none
pub const INITIAL_CONFIDENCE: f64 = 0.5;

/// Added for each corroborating distinct source
pub const CORROBORATION_STEP: f64 = 0.2;

// ============================================================================
// MERGE RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// New aggregate under this identity key
    Created(String),
    /// Folded into the existing aggregate under this identity key
    Merged(String),
    /// Same fingerprint already merged this run
    Replay,
    /// Nothing to key on: blank name, or a name of noise words only
    Rejected,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeStats {
    pub candidates_seen: usize,
    pub records_created: usize,
    pub merges_applied: usize,
    pub replays_skipped: usize,
    pub rejected: usize,
    /// Text fields that were present but could not be parsed
    pub degraded_fields: usize,
}

impl MergeStats {
    pub fn summary(&self) -> String {
        format!(
            "Merged {} candidates: {} created, {} merged, {} replays, {} rejected, {} degraded fields",
            self.candidates_seen,
            self.records_created,
            self.merges_applied,
            self.replays_skipped,
            self.rejected,
            self.degraded_fields
        )
    }
}

// ============================================================================
// CANDIDATE MERGER
// ============================================================================

pub struct CandidateMerger {
    seen_fingerprints: HashSet<String>,
    next_seq: u64,
    stats: MergeStats,
}

impl CandidateMerger {
    pub fn new() -> Self {
        CandidateMerger {
            seen_fingerprints: HashSet::new(),
            next_seq: 0,
            stats: MergeStats::default(),
        }
    }

    pub fn stats(&self) -> &MergeStats {
        &self.stats
    }

    pub fn into_stats(self) -> MergeStats {
        self.stats
    }

    /// Merge one candidate into the store. Never fails: unparseable fields
    /// degrade to unknown and are counted.
    pub fn merge(&mut self, store: &mut AggregateStore, candidate: &RawCandidate) -> MergeOutcome {
        self.stats.candidates_seen += 1;

        if !self.seen_fingerprints.insert(candidate.fingerprint()) {
            self.stats.replays_skipped += 1;
            debug!(target: "merge", source = %candidate.source_id, name = %candidate.name, "replayed candidate skipped");
            return MergeOutcome::Replay;
        }

        let Some((observed, degraded)) = observe(candidate) else {
            self.stats.rejected += 1;
            debug!(target: "merge", source = %candidate.source_id, name = %candidate.name, "candidate without an identity rejected");
            return MergeOutcome::Rejected;
        };
        self.stats.degraded_fields += degraded;

        let key = observed.identity_key.clone();
        match store.get_mut(&key) {
            Some(existing) => {
                let added = absorb(existing, &observed);
                self.stats.merges_applied += 1;
                debug!(
                    target: "merge",
                    identity_key = %key,
                    source = %candidate.source_id,
                    new_sources = added,
                    confidence = existing.confidence,
                    "candidate merged"
                );
                MergeOutcome::Merged(key)
            }
            None => {
                let mut record = observed;
                record.discovery_seq = self.next_seq;
                self.next_seq += 1;
                debug!(target: "merge", identity_key = %key, storage_key = %record.storage_key, "aggregate created");
                store.insert(record);
                self.stats.records_created += 1;
                MergeOutcome::Created(key)
            }
        }
    }

    /// Merge a batch in order
    pub fn merge_all<'a, I>(&mut self, store: &mut AggregateStore, candidates: I)
    where
        I: IntoIterator<Item = &'a RawCandidate>,
    {
        for candidate in candidates {
            self.merge(store, candidate);
        }
    }
}

impl Default for CandidateMerger {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// OBSERVATION
// ============================================================================

/// Candidate issuer guess → canonical issuer, falling back to the name
fn resolve_issuer(candidate: &RawCandidate) -> String {
    let guess = candidate.issuer.trim();
    if let Some(issuer) = classify_issuer(guess) {
        return issuer.to_string();
    }
    if !guess.is_empty() {
        return guess.to_string();
    }
    classify_issuer(&candidate.name)
        .unwrap_or(UNKNOWN_ISSUER)
        .to_string()
}

/// Interpret a candidate as a standalone record plus a count of text
/// fields that were present but unparseable
fn observe(candidate: &RawCandidate) -> Option<(EntityRecord, usize)> {
    let name = candidate.name.trim();
    if name.is_empty() {
        return None;
    }

    let issuer = resolve_issuer(candidate);
    let identity_key = normalize(name, &issuer);
    if identity_key.is_empty() {
        return None;
    }
    let mut record = EntityRecord::new(identity_key, name, issuer);
    let mut degraded = 0;

    let program_hint = format!("{} {}", candidate.program_text.as_deref().unwrap_or(""), name);
    let program = classify_program(&program_hint);
    record.reward_currency = classify_currency(program, name);
    record.point_valuation = point_valuation(program);
    record.program_name = program.to_string();

    if let Some(text) = &candidate.fee_text {
        record.annual_fee = AnnualFee::from_amount(parse_fee(text));
        if !record.annual_fee.is_known() {
            degraded += 1;
            debug!(target: "merge", field = "annual_fee", text = %text, "unparseable, left unknown");
        }
    }

    if let Some(text) = &candidate.rate_text {
        record.base_reward = parse_rate(text);
        if record.base_reward.is_none() {
            degraded += 1;
            debug!(target: "merge", field = "base_reward", text = %text, "unparseable, left unknown");
        }
    }

    for fragment in &candidate.reward_fragments {
        let rewards = extract_category_rewards(fragment);
        if rewards.is_empty() {
            degraded += 1;
            debug!(target: "merge", field = "category_rewards", text = %fragment, "no reward recognised");
        }
        for reward in rewards {
            record.add_category_reward(reward);
        }
    }

    if let Some(text) = &candidate.bonus_text {
        record.signup_bonus = parse_signup_bonus(text);
        if record.signup_bonus.is_none() {
            degraded += 1;
            debug!(target: "merge", field = "signup_bonus", text = %text, "unparseable, left empty");
        }
    }

    let source = candidate.source_id.trim();
    if source.is_empty() {
        degraded += 1;
        debug!(target: "merge", field = "source_id", name = %name, "no provenance, data merged without a source");
    } else {
        record.sources.insert(source.to_string());
    }

    let confidence = candidate
        .confidence
        .filter(|c| c.is_finite())
        .unwrap_or(INITIAL_CONFIDENCE);
    record.confidence = confidence.clamp(0.0, 1.0);

    Some((record, degraded))
}

// ============================================================================
// FIELD POLICY
// ============================================================================

/// Fold `other` into `target` under the merge policy.
/// Returns how many distinct sources were new to `target`.
pub fn absorb(target: &mut EntityRecord, other: &EntityRecord) -> usize {
    fold(target, other, true)
}

/// Fold a previously stored row into a fresh survivor. Field policy matches
/// [`absorb`], but stored sources are history rather than new evidence, so
/// they are unioned without raising confidence.
pub fn carry_forward(target: &mut EntityRecord, stored: &EntityRecord) -> usize {
    fold(target, stored, false)
}

fn fold(target: &mut EntityRecord, other: &EntityRecord, corroborate: bool) -> usize {
    let mut rekey = false;
    if target.display_name.trim().is_empty() && !other.display_name.trim().is_empty() {
        target.display_name = other.display_name.clone();
        rekey = true;
    }
    if !target.has_known_issuer() && other.has_known_issuer() {
        target.issuer = other.issuer.clone();
        rekey = true;
    }
    if rekey {
        target.refresh_storage_key();
    }

    // Program, currency and valuation travel together
    if !target.has_specific_program() && other.has_specific_program() {
        target.program_name = other.program_name.clone();
        target.reward_currency = other.reward_currency;
        target.point_valuation = other.point_valuation;
    }

    target.annual_fee = match (target.annual_fee, other.annual_fee) {
        (AnnualFee::Unknown, incoming) => incoming,
        (AnnualFee::Known(current), AnnualFee::Known(incoming)) if current == 0.0 && incoming > 0.0 => {
            AnnualFee::Known(incoming)
        }
        (current, _) => current,
    };

    target.base_reward = match (target.base_reward, other.base_reward) {
        (None, incoming) => incoming,
        (Some(current), Some(incoming)) if current.rate == 0.0 && incoming.rate > 0.0 => Some(incoming),
        (current, _) => current,
    };

    for reward in other.category_rewards.values() {
        target.add_category_reward(reward.clone());
    }

    if target.signup_bonus.is_none() {
        target.signup_bonus = other.signup_bonus.clone();
    }
    if target.entity_id.is_none() {
        target.entity_id = other.entity_id.clone();
    }
    if target.last_verified_at.is_none() {
        target.last_verified_at = other.last_verified_at;
    }

    target.raise_confidence(other.confidence);

    let mut added = 0;
    for source in &other.sources {
        if target.sources.contains(source) {
            continue;
        }
        let corroborates = corroborate && !target.sources.is_empty();
        target.sources.insert(source.clone());
        added += 1;
        if corroborates {
            let bumped = target.confidence + CORROBORATION_STEP;
            target.raise_confidence(bumped);
        }
    }
    added
}

// ============================================================================
// TESTS
// ============================================================================
