// 💳 Entity Record - The canonical card aggregate
//
// One EntityRecord per real-world card. The identity key never changes once
// the record exists; every other field is a value that later observations
// may fill in under the merge policy (see merge.rs).
//
// Unknown is a real value here: issuer uses the UNKNOWN_ISSUER sentinel,
// annual fee is AnnualFee::Unknown, an unobserved base rate is None.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Issuer sentinel when neither the candidate nor its name reveals one
pub const UNKNOWN_ISSUER: &str = "unknown";

/// Program name used when no known program pattern matches
pub const GENERIC_PROGRAM: &str = "Points";

// ============================================================================
// VALUE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardCurrency {
    Cashback,
    Points,
    AirlineMiles,
    HotelPoints,
}

impl RewardCurrency {
    pub const ALL: [RewardCurrency; 4] = [
        RewardCurrency::Cashback,
        RewardCurrency::Points,
        RewardCurrency::AirlineMiles,
        RewardCurrency::HotelPoints,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RewardCurrency::Cashback => "cashback",
            RewardCurrency::Points => "points",
            RewardCurrency::AirlineMiles => "airline_miles",
            RewardCurrency::HotelPoints => "hotel_points",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardUnit {
    Percent,
    Multiplier,
}

impl RewardUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardUnit::Percent => "percent",
            RewardUnit::Multiplier => "multiplier",
        }
    }

    /// Suffix used in human-readable descriptions ("5%", "1.5x")
    pub fn symbol(&self) -> &'static str {
        match self {
            RewardUnit::Percent => "%",
            RewardUnit::Multiplier => "x",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "percent" | "%" => Some(RewardUnit::Percent),
            "multiplier" | "x" => Some(RewardUnit::Multiplier),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendCategory {
    Groceries,
    Dining,
    Gas,
    Travel,
    OnlineShopping,
    Entertainment,
    Drugstores,
    HomeImprovement,
    Other,
}

impl SpendCategory {
    pub const ALL: [SpendCategory; 9] = [
        SpendCategory::Groceries,
        SpendCategory::Dining,
        SpendCategory::Gas,
        SpendCategory::Travel,
        SpendCategory::OnlineShopping,
        SpendCategory::Entertainment,
        SpendCategory::Drugstores,
        SpendCategory::HomeImprovement,
        SpendCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpendCategory::Groceries => "groceries",
            SpendCategory::Dining => "dining",
            SpendCategory::Gas => "gas",
            SpendCategory::Travel => "travel",
            SpendCategory::OnlineShopping => "online_shopping",
            SpendCategory::Entertainment => "entertainment",
            SpendCategory::Drugstores => "drugstores",
            SpendCategory::HomeImprovement => "home_improvement",
            SpendCategory::Other => "other",
        }
    }

    /// Exact match on the stored name only. Free text goes through
    /// `classify::classify_category`.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitPeriod {
    Monthly,
    Quarterly,
    Annual,
}

impl LimitPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitPeriod::Monthly => "monthly",
            LimitPeriod::Quarterly => "quarterly",
            LimitPeriod::Annual => "annual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "monthly" | "month" => Some(LimitPeriod::Monthly),
            "quarterly" | "quarter" => Some(LimitPeriod::Quarterly),
            "annual" | "annually" | "year" | "annum" => Some(LimitPeriod::Annual),
            _ => None,
        }
    }
}

/// Annual fee: either a known non-negative amount or explicitly unknown.
/// Known(0.0) means "no annual fee" and is NOT the same as Unknown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnnualFee {
    Known(f64),
    #[default]
    Unknown,
}

impl AnnualFee {
    /// Build from a parsed amount; negative or non-finite amounts are unknown
    pub fn from_amount(amount: Option<f64>) -> Self {
        match amount {
            Some(v) if v.is_finite() && v >= 0.0 => AnnualFee::Known(v),
            _ => AnnualFee::Unknown,
        }
    }

    pub fn amount(&self) -> Option<f64> {
        match self {
            AnnualFee::Known(v) => Some(*v),
            AnnualFee::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, AnnualFee::Known(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardRate {
    pub rate: f64,
    pub unit: RewardUnit,
}

impl RewardRate {
    pub fn new(rate: f64, unit: RewardUnit) -> Self {
        Self { rate, unit }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpendLimit {
    pub amount: f64,
    pub period: LimitPeriod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryReward {
    pub category: SpendCategory,
    /// Always > 0
    pub multiplier: f64,
    pub unit: RewardUnit,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spend_limit: Option<SpendLimit>,
}

impl CategoryReward {
    /// None when the multiplier is not a positive number
    pub fn new(category: SpendCategory, multiplier: f64, unit: RewardUnit) -> Option<Self> {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return None;
        }
        Some(Self {
            category,
            multiplier,
            unit,
            description: format!("{}{} on {}", multiplier, unit.symbol(), category.as_str()),
            spend_limit: None,
        })
    }

    pub fn with_spend_limit(mut self, amount: f64, period: LimitPeriod) -> Self {
        self.spend_limit = Some(SpendLimit { amount, period });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignupBonus {
    pub amount: f64,
    pub currency: RewardCurrency,
    pub spend_requirement: f64,
    pub timeframe_days: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_on: Option<NaiveDate>,
}

// ============================================================================
// ENTITY RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Repository id, present once the record has been persisted or loaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    // ========================================================================
    // IDENTITY
    // ========================================================================
    pub identity_key: String,
    pub storage_key: String,

    // ========================================================================
    // VALUES
    // ========================================================================
    pub display_name: String,
    pub issuer: String,
    pub program_name: String,
    pub reward_currency: RewardCurrency,
    pub point_valuation: f64,
    pub annual_fee: AnnualFee,
    /// None until a source reports a parseable base rate
    #[serde(default)]
    pub base_reward: Option<RewardRate>,
    /// At most one reward per category
    #[serde(default)]
    pub category_rewards: BTreeMap<SpendCategory, CategoryReward>,
    #[serde(default)]
    pub signup_bonus: Option<SignupBonus>,

    // ========================================================================
    // PROVENANCE
    // ========================================================================
    /// Distinct source identifiers; grows only
    pub sources: BTreeSet<String>,
    /// In [0.0, 1.0]; never decreases through merging
    pub confidence: f64,
    #[serde(default)]
    pub last_verified_at: Option<DateTime<Utc>>,

    /// Order in which the run first saw this aggregate. Tie-breaker only.
    #[serde(default)]
    pub discovery_seq: u64,
}

impl EntityRecord {
    pub fn new(identity_key: impl Into<String>, display_name: impl Into<String>, issuer: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let issuer = issuer.into();
        let storage_key = crate::identity::storage_key(&display_name, &issuer);
        Self {
            entity_id: None,
            identity_key: identity_key.into(),
            storage_key,
            display_name,
            issuer,
            program_name: GENERIC_PROGRAM.to_string(),
            reward_currency: RewardCurrency::Points,
            point_valuation: 1.0,
            annual_fee: AnnualFee::Unknown,
            base_reward: None,
            category_rewards: BTreeMap::new(),
            signup_bonus: None,
            sources: BTreeSet::new(),
            confidence: 0.0,
            last_verified_at: None,
            discovery_seq: 0,
        }
    }

    pub fn has_known_issuer(&self) -> bool {
        !self.issuer.is_empty() && self.issuer != UNKNOWN_ISSUER
    }

    pub fn has_specific_program(&self) -> bool {
        !self.program_name.is_empty() && self.program_name != GENERIC_PROGRAM
    }

    /// True only for an observed base rate above zero
    pub fn has_positive_base_rate(&self) -> bool {
        self.base_reward.map_or(false, |r| r.rate > 0.0)
    }

    /// Insert unless a reward for that category already exists.
    /// Returns true when inserted.
    pub fn add_category_reward(&mut self, reward: CategoryReward) -> bool {
        if self.category_rewards.contains_key(&reward.category) {
            return false;
        }
        self.category_rewards.insert(reward.category, reward);
        true
    }

    /// Recompute the storage key after the display name or issuer changed
    pub fn refresh_storage_key(&mut self) {
        self.storage_key = crate::identity::storage_key(&self.display_name, &self.issuer);
    }

    /// Raise confidence to `value`, clamped to [0, 1]; never lowers it
    pub fn raise_confidence(&mut self, value: f64) {
        let clamped = value.clamp(0.0, 1.0);
        if clamped > self.confidence {
            self.confidence = clamped;
        }
    }

    pub fn summary(&self) -> String {
        let fee = match self.annual_fee {
            AnnualFee::Known(v) => format!("${:.2}", v),
            AnnualFee::Unknown => "unknown".to_string(),
        };
        format!(
            "{} [{}] issuer={} fee={} rewards={} sources={} confidence={:.2}",
            self.display_name,
            self.storage_key,
            self.issuer,
            fee,
            self.category_rewards.len(),
            self.sources.len(),
            self.confidence
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
