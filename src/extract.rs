// 🔎 Field Extraction - Free text → typed values
//
// Every function here is total: garbage in gives None (or an empty list),
// never an error. The merger turns None into the field's unknown value.

use crate::classify::classify_category;
use crate::entities::{
    CategoryReward, LimitPeriod, RewardCurrency, RewardRate, RewardUnit, SignupBonus, SpendCategory,
};
use once_cell::sync::Lazy;
use regex::Regex;

/// Timeframe assumed when a bonus names no deadline
pub const DEFAULT_BONUS_TIMEFRAME_DAYS: u32 = 90;

static DOLLAR_AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\s*([\d,]+(?:\.\d+)?)").expect("valid regex"));
static BARE_AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\d,]*\d(?:\.\d+)?)").expect("valid regex"));
static MULTIPLIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*x\b").expect("valid regex"));
static PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("valid regex"));
static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("valid regex"));

/// "travel/1.5x", "groceries: 5%", "dining = 3"
static STRUCTURED_FRAGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([a-z][a-z _&-]*?)\s*[/:=]\s*(\d+(?:\.\d+)?)\s*([x%])?\s*$").expect("valid regex")
});

/// "5% on groceries", "3x points at restaurants"
static PROSE_REWARD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(\d+(?:\.\d+)?)\s*([x%])\s*(?:(?:points|pts|miles|cash\s*back|back)\s+)?(?:on\s+)?(?:at\s+)?(?:eligible\s+)?(groceries|grocery|dining|restaurants?|gas|fuel|travel|drugstores?|pharmacy|pharmacies|entertainment|movies?|online|amazon|home improvement)",
    )
    .expect("valid regex")
});

static SPEND_LIMIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"up to \$\s*([\d,]+(?:\.\d+)?)\s*(?:in\s+\w+\s+)?(?:per|a|/|each)\s*(month|quarter|year|annum)")
        .expect("valid regex")
});

static BONUS_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(\$)?\s*([\d,]*\d(?:\.\d+)?)\s*(?:bonus\s+)?((?:[a-z+]+\s+)?(?:points|pts|miles)|cash\s*back)?",
    )
    .expect("valid regex")
});
static BONUS_SPEND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"spend(?:ing)?\s+(?:of\s+)?\$\s*([\d,]+(?:\.\d+)?)").expect("valid regex"));
static BONUS_TIMEFRAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:within|in|first)\s+(?:the\s+)?(?:first\s+)?(\d+)\s*(days?|months?)").expect("valid regex")
});

fn parse_number(s: &str) -> Option<f64> {
    s.replace(',', "").parse::<f64>().ok().filter(|v| v.is_finite())
}

// ============================================================================
// FEE
// ============================================================================

/// Annual fee in dollars.
///
/// A dollar amount wins over everything, then a bare number; "no annual
/// fee" / "free" / "waived" count as 0 only when the text has no amount.
pub fn parse_fee(text: &str) -> Option<f64> {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }

    if let Some(caps) = DOLLAR_AMOUNT.captures(&lower) {
        return parse_number(&caps[1]).filter(|v| *v >= 0.0);
    }

    if let Some(amount) = BARE_AMOUNT
        .captures(&lower)
        .and_then(|caps| parse_number(&caps[1]))
        .filter(|v| *v >= 0.0)
    {
        return Some(amount);
    }

    if ["no annual", "no fee", "free", "waived"].iter().any(|p| lower.contains(p)) {
        return Some(0.0);
    }
    None
}

// ============================================================================
// RATES
// ============================================================================

/// Base earn rate. "2x" is a multiplier, "1.5%" and a bare "1.5" are percent.
pub fn parse_rate(text: &str) -> Option<RewardRate> {
    let lower = text.trim().to_lowercase();

    if let Some(caps) = MULTIPLIER.captures(&lower) {
        return parse_number(&caps[1]).map(|v| RewardRate::new(v, RewardUnit::Multiplier));
    }
    if let Some(caps) = PERCENT.captures(&lower) {
        return parse_number(&caps[1]).map(|v| RewardRate::new(v, RewardUnit::Percent));
    }
    NUMBER
        .captures(&lower)
        .and_then(|caps| parse_number(&caps[1]))
        .map(|v| RewardRate::new(v, RewardUnit::Percent))
}

fn unit_from_symbol(symbol: Option<&str>) -> RewardUnit {
    match symbol {
        Some("x") => RewardUnit::Multiplier,
        _ => RewardUnit::Percent,
    }
}

/// Category rewards named in one fragment of text.
///
/// Accepts the structured "category/rate" form and prose such as
/// "5% cash back on groceries, 2% on gas". At most one reward per category;
/// the first mention wins. Non-positive rates are dropped.
pub fn extract_category_rewards(text: &str) -> Vec<CategoryReward> {
    let lower = text.trim().to_lowercase();
    let mut rewards: Vec<CategoryReward> = Vec::new();

    if let Some(caps) = STRUCTURED_FRAGMENT.captures(&lower) {
        let category = classify_category(&caps[1]);
        if let Some(rate) = parse_number(&caps[2]) {
            let unit = unit_from_symbol(caps.get(3).map(|m| m.as_str()));
            push_unique(&mut rewards, CategoryReward::new(category, rate, unit));
        }
    } else {
        for caps in PROSE_REWARD.captures_iter(&lower) {
            let Some(rate) = parse_number(&caps[1]) else { continue };
            let unit = unit_from_symbol(Some(&caps[2]));
            let category = classify_category(&caps[3]);
            if category == SpendCategory::Other {
                continue;
            }
            push_unique(&mut rewards, CategoryReward::new(category, rate, unit));
        }
    }

    // A spend cap only makes sense when the fragment names a single reward
    if rewards.len() == 1 {
        if let Some((amount, period)) = parse_spend_limit(&lower) {
            let reward = rewards.remove(0).with_spend_limit(amount, period);
            rewards.push(reward);
        }
    }

    rewards
}

fn push_unique(rewards: &mut Vec<CategoryReward>, reward: Option<CategoryReward>) {
    if let Some(reward) = reward {
        if !rewards.iter().any(|r| r.category == reward.category) {
            rewards.push(reward);
        }
    }
}

/// "up to $500 per month" → (500.0, Monthly)
pub fn parse_spend_limit(text: &str) -> Option<(f64, LimitPeriod)> {
    let lower = text.to_lowercase();
    let caps = SPEND_LIMIT.captures(&lower)?;
    let amount = parse_number(&caps[1])?;
    let period = LimitPeriod::parse(&caps[2])?;
    Some((amount, period))
}

// ============================================================================
// SIGNUP BONUS
// ============================================================================

/// Welcome bonus: amount + currency are required, spend requirement and
/// timeframe fall back to 0 and 90 days.
pub fn parse_signup_bonus(text: &str) -> Option<SignupBonus> {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }

    let (amount, currency) = BONUS_AMOUNT.captures_iter(&lower).find_map(|caps| {
        let amount = parse_number(&caps[2])?;
        let dollar = caps.get(1).is_some();
        let unit = caps.get(3).map(|m| m.as_str());

        let currency = match unit {
            Some(u) if u.contains("miles") => RewardCurrency::AirlineMiles,
            Some(u) if u.contains("aeroplan") => RewardCurrency::AirlineMiles,
            Some(u) if u.contains("cash") => RewardCurrency::Cashback,
            Some(_) => RewardCurrency::Points,
            None if dollar => RewardCurrency::Cashback,
            None => return None,
        };
        (amount > 0.0).then_some((amount, currency))
    })?;

    let spend_requirement = BONUS_SPEND
        .captures(&lower)
        .and_then(|caps| parse_number(&caps[1]))
        .unwrap_or(0.0);

    let timeframe_days = BONUS_TIMEFRAME
        .captures(&lower)
        .and_then(|caps| {
            let n: u32 = caps[1].parse().ok()?;
            let days = if caps[2].starts_with("month") { n.saturating_mul(30) } else { n };
            Some(days)
        })
        .unwrap_or(DEFAULT_BONUS_TIMEFRAME_DAYS);

    Some(SignupBonus {
        amount,
        currency,
        spend_requirement,
        timeframe_days,
        expires_on: None,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fee() {
        assert_eq!(parse_fee("$139"), Some(139.0));
        assert_eq!(parse_fee("Annual fee: $1,200.00"), Some(1200.0));
        assert_eq!(parse_fee("No annual fee"), Some(0.0));
        assert_eq!(parse_fee("$0"), Some(0.0));
        assert_eq!(parse_fee("$139 (first year free)"), Some(139.0));
        assert_eq!(parse_fee("120"), Some(120.0));
        assert_eq!(parse_fee("139 annual fee, waived first year"), Some(139.0));
        assert_eq!(parse_fee("Fee waived"), Some(0.0));
        assert_eq!(parse_fee("call for details"), None);
        assert_eq!(parse_fee("   "), None);
    }

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("2x points"), Some(RewardRate::new(2.0, RewardUnit::Multiplier)));
        assert_eq!(parse_rate("1.5% back"), Some(RewardRate::new(1.5, RewardUnit::Percent)));
        assert_eq!(parse_rate("1"), Some(RewardRate::new(1.0, RewardUnit::Percent)));
        assert_eq!(parse_rate("unlimited"), None);
        // A lone dot is not a number
        assert_eq!(parse_rate(". x"), None);
    }

    #[test]
    fn test_structured_fragment() {
        let rewards = extract_category_rewards("travel/1.5x");
        assert_eq!(rewards.len(), 1);
        assert_eq!(rewards[0].category, SpendCategory::Travel);
        assert_eq!(rewards[0].multiplier, 1.5);
        assert_eq!(rewards[0].unit, RewardUnit::Multiplier);

        let rewards = extract_category_rewards("groceries: 5%");
        assert_eq!(rewards[0].category, SpendCategory::Groceries);
        assert_eq!(rewards[0].unit, RewardUnit::Percent);
    }

    #[test]
    fn test_prose_rewards() {
        let rewards = extract_category_rewards("5% cash back on groceries, 2% on gas and 1.5x at restaurants");
        let categories: Vec<SpendCategory> = rewards.iter().map(|r| r.category).collect();
        assert_eq!(
            categories,
            vec![SpendCategory::Groceries, SpendCategory::Gas, SpendCategory::Dining]
        );
        assert_eq!(rewards[2].unit, RewardUnit::Multiplier);
    }

    #[test]
    fn test_rewards_drop_zero_and_duplicates() {
        assert!(extract_category_rewards("travel/0x").is_empty());
        let rewards = extract_category_rewards("5% on groceries, 3% on grocery delivery");
        assert_eq!(rewards.len(), 1);
        assert_eq!(rewards[0].multiplier, 5.0);
    }

    #[test]
    fn test_spend_limit_attached_to_single_reward() {
        let rewards = extract_category_rewards("5% on groceries up to $500 per month");
        assert_eq!(rewards.len(), 1);
        let limit = rewards[0].spend_limit.unwrap();
        assert_eq!(limit.amount, 500.0);
        assert_eq!(limit.period, LimitPeriod::Monthly);
    }

    #[test]
    fn test_signup_bonus() {
        let bonus = parse_signup_bonus("Earn up to 20,000 Aeroplan points when you spend $1,000 within 90 days").unwrap();
        assert_eq!(bonus.amount, 20000.0);
        assert_eq!(bonus.currency, RewardCurrency::AirlineMiles);
        assert_eq!(bonus.spend_requirement, 1000.0);
        assert_eq!(bonus.timeframe_days, 90);

        let bonus = parse_signup_bonus("$200 cash back after spending $500 in the first 3 months").unwrap();
        assert_eq!(bonus.amount, 200.0);
        assert_eq!(bonus.currency, RewardCurrency::Cashback);
        assert_eq!(bonus.spend_requirement, 500.0);
        assert_eq!(bonus.timeframe_days, 90);

        assert!(parse_signup_bonus("no welcome offer right now").is_none());
    }
}
