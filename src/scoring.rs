// 📊 Completeness Scorer - How much of a card record is actually filled in
//
// A pure heuristic: reward rows dominate, a short storage key is taken as a
// sign of a clean canonical name, marketing-page keys are penalised.
// Ties are left to the caller.

use crate::entities::EntityRecord;
use serde::{Deserialize, Serialize};

pub const REWARD_WEIGHT: i64 = 100;
pub const SHORT_KEY_BONUS: i64 = 50;
pub const SHORT_KEY_THRESHOLD: usize = 50;
pub const KNOWN_FEE_BONUS: i64 = 20;
pub const POSITIVE_RATE_BONUS: i64 = 10;
pub const LOW_QUALITY_PENALTY: i64 = -50;
pub const LOW_QUALITY_MARKERS: [&str; 2] = ["best-", "perks-"];

/// Where the scorer gets the number of category rewards attached to a record
pub trait RewardLookup {
    fn reward_count(&self, record: &EntityRecord) -> usize;
}

/// Count the rewards carried on the record itself
pub struct OwnRewards;

impl RewardLookup for OwnRewards {
    fn reward_count(&self, record: &EntityRecord) -> usize {
        record.category_rewards.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub rewards: i64,
    pub short_key: i64,
    pub known_fee: i64,
    pub positive_rate: i64,
    pub low_quality: i64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> i64 {
        self.rewards + self.short_key + self.known_fee + self.positive_rate + self.low_quality
    }
}

pub fn breakdown(record: &EntityRecord, lookup: &dyn RewardLookup) -> ScoreBreakdown {
    let key = record.storage_key.as_str();
    ScoreBreakdown {
        rewards: REWARD_WEIGHT * lookup.reward_count(record) as i64,
        short_key: if key.len() < SHORT_KEY_THRESHOLD { SHORT_KEY_BONUS } else { 0 },
        known_fee: if record.annual_fee.is_known() { KNOWN_FEE_BONUS } else { 0 },
        positive_rate: if record.has_positive_base_rate() { POSITIVE_RATE_BONUS } else { 0 },
        low_quality: if LOW_QUALITY_MARKERS.iter().any(|m| key.contains(m)) {
            LOW_QUALITY_PENALTY
        } else {
            0
        },
    }
}

pub fn score(record: &EntityRecord, lookup: &dyn RewardLookup) -> i64 {
    breakdown(record, lookup).total()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{AnnualFee, CategoryReward, RewardRate, RewardUnit, SpendCategory};

    fn create_test_record(name: &str) -> EntityRecord {
        EntityRecord::new(name.to_lowercase(), name, "TD")
    }

    struct FixedRewards(usize);

    impl RewardLookup for FixedRewards {
        fn reward_count(&self, _record: &EntityRecord) -> usize {
            self.0
        }
    }

    #[test]
    fn test_complete_record_score() {
        let mut record = create_test_record("TD Aeroplan Visa Infinite");
        record.annual_fee = AnnualFee::Known(139.0);
        record.base_reward = Some(RewardRate::new(1.0, RewardUnit::Multiplier));
        record.add_category_reward(CategoryReward::new(SpendCategory::Travel, 1.5, RewardUnit::Multiplier).unwrap());

        // 100 + 50 + 20 + 10
        assert_eq!(score(&record, &OwnRewards), 180);
    }

    #[test]
    fn test_marketing_key_penalised() {
        let mut record = create_test_record("Best TD Aeroplan Card");
        record.annual_fee = AnnualFee::Known(0.0);
        assert_eq!(record.storage_key, "td-best-td-aeroplan-card");

        let parts = breakdown(&record, &OwnRewards);
        assert_eq!(parts.low_quality, LOW_QUALITY_PENALTY);
        assert_eq!(parts.known_fee, KNOWN_FEE_BONUS);
        assert_eq!(parts.total(), 20);
    }

    #[test]
    fn test_unknown_fee_and_zero_rate() {
        let mut record = create_test_record("TD Aeroplan Visa Infinite");
        record.base_reward = Some(RewardRate::new(0.0, RewardUnit::Percent));
        assert_eq!(score(&record, &OwnRewards), 50);
    }

    #[test]
    fn test_unobserved_rate_earns_nothing() {
        let record = create_test_record("TD Aeroplan Visa Infinite");
        assert!(record.base_reward.is_none());

        let parts = breakdown(&record, &OwnRewards);
        assert_eq!(parts.positive_rate, 0);
        assert_eq!(parts.total(), SHORT_KEY_BONUS);
    }

    #[test]
    fn test_long_key_gets_no_bonus() {
        let record = create_test_record("TD Aeroplan Visa Infinite Privilege Card With Extra Long Marketing Name");
        assert!(record.storage_key.len() >= SHORT_KEY_THRESHOLD);
        assert_eq!(breakdown(&record, &OwnRewards).short_key, 0);
    }

    #[test]
    fn test_lookup_drives_reward_weight() {
        let record = create_test_record("TD Aeroplan Visa Infinite");
        assert_eq!(score(&record, &FixedRewards(3)), 300 + 50);
    }

    #[test]
    fn test_score_is_pure() {
        let record = create_test_record("TD Aeroplan Visa Infinite");
        let before = record.clone();
        assert_eq!(score(&record, &OwnRewards), score(&record, &OwnRewards));
        assert_eq!(record, before);
    }
}
