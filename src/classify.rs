// 🏷️ Classification Tables - Rules as Data
// Ordered pattern tables for issuer, loyalty program, reward currency,
// point valuation and spend category. First matching rule wins.

use crate::entities::{RewardCurrency, SpendCategory, GENERIC_PROGRAM};
use once_cell::sync::Lazy;

// ============================================================================
// PATTERN RULE
// ============================================================================

#[derive(Debug, Clone)]
pub struct PatternRule<T> {
    pub value: T,
    /// Lowercase patterns; `*` matches any run of characters
    pub patterns: Vec<&'static str>,
}

impl<T> PatternRule<T> {
    pub fn new(value: T, patterns: &[&'static str]) -> Self {
        PatternRule {
            value,
            patterns: patterns.to_vec(),
        }
    }

    /// True when any pattern occurs in `text` (already prepared)
    pub fn matches(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| pattern_matches(p, text))
    }
}

/// Substring match; with wildcards, the parts must appear in order
fn pattern_matches(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return text.contains(pattern);
    }

    let mut current_pos = 0;
    for part in pattern.split('*').filter(|p| !p.is_empty()) {
        match text[current_pos..].find(part) {
            Some(pos) => current_pos += pos + part.len(),
            None => return false,
        }
    }
    true
}

// ============================================================================
// PATTERN TABLE
// ============================================================================

pub struct PatternTable<T> {
    rules: Vec<PatternRule<T>>,
}

impl<T> PatternTable<T> {
    pub fn new(rules: Vec<PatternRule<T>>) -> Self {
        PatternTable { rules }
    }

    /// First rule (in table order) whose pattern matches
    pub fn classify(&self, text: &str) -> Option<&T> {
        let prepared = prepare(text);
        self.rules
            .iter()
            .find(|rule| rule.matches(&prepared))
            .map(|rule| &rule.value)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Lowercase, punctuation to spaces (keeping `+`), padded with one space
/// on each side so " td " style patterns match at word edges
fn prepare(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    for c in text.to_lowercase().chars() {
        if c.is_alphanumeric() || c == '+' {
            out.push(c);
        } else if !out.ends_with(' ') {
            out.push(' ');
        }
    }
    if !out.ends_with(' ') {
        out.push(' ');
    }
    out
}

// ============================================================================
// TABLES
// ============================================================================

static ISSUERS: Lazy<PatternTable<&'static str>> = Lazy::new(|| {
    PatternTable::new(vec![
        PatternRule::new("TD", &[" td "]),
        PatternRule::new("RBC", &[" rbc ", "royal bank"]),
        PatternRule::new("BMO", &[" bmo "]),
        PatternRule::new("CIBC", &[" cibc "]),
        PatternRule::new("Scotiabank", &["scotiabank", " scotia "]),
        PatternRule::new("American Express", &["american express", " amex "]),
        PatternRule::new("MBNA", &[" mbna "]),
        PatternRule::new("Capital One", &["capital one"]),
        PatternRule::new("Tangerine", &["tangerine"]),
        PatternRule::new("Simplii", &["simplii"]),
        PatternRule::new("PC Financial", &["pc financial", " pc "]),
        PatternRule::new("HSBC", &[" hsbc "]),
        PatternRule::new("National Bank", &["national bank"]),
        PatternRule::new("Desjardins", &["desjardins"]),
        PatternRule::new("Canadian Tire", &["canadian tire", "triangle"]),
    ])
});

static PROGRAMS: Lazy<PatternTable<&'static str>> = Lazy::new(|| {
    PatternTable::new(vec![
        PatternRule::new("Aeroplan", &["aeroplan"]),
        PatternRule::new("Scene+", &["scene"]),
        PatternRule::new("Air Miles", &["air miles"]),
        PatternRule::new("Avion", &["avion"]),
        PatternRule::new("TD Rewards", &["td rewards", "first class"]),
        PatternRule::new("BMO Rewards", &["bmo rewards", "eclipse"]),
        PatternRule::new("Aventura", &["aventura"]),
        PatternRule::new("Membership Rewards", &["cobalt", "gold rewards", "platinum", " amex "]),
        PatternRule::new("Cashback", &["cash back", "cashback", "dividend", "simply cash"]),
        PatternRule::new("PC Optimum", &["pc optimum", " optimum "]),
        PatternRule::new("Triangle Rewards", &["triangle"]),
        PatternRule::new("WestJet Rewards", &["westjet"]),
    ])
});

static CURRENCIES: Lazy<PatternTable<RewardCurrency>> = Lazy::new(|| {
    PatternTable::new(vec![
        PatternRule::new(
            RewardCurrency::AirlineMiles,
            &["aeroplan", "air miles", "avion", "westjet", "miles"],
        ),
        PatternRule::new(RewardCurrency::HotelPoints, &["marriott", "hilton", "bonvoy", "hotel"]),
        PatternRule::new(RewardCurrency::Cashback, &["cash", "dividend"]),
    ])
});

static POINT_VALUES: Lazy<PatternTable<f64>> = Lazy::new(|| {
    PatternTable::new(vec![
        PatternRule::new(2.0, &["membership rewards"]),
        PatternRule::new(1.8, &["aeroplan"]),
        PatternRule::new(1.5, &["avion"]),
        PatternRule::new(0.5, &["td rewards"]),
        PatternRule::new(0.7, &["bmo rewards"]),
        PatternRule::new(1.0, &["cashback", "scene", "aventura"]),
        PatternRule::new(0.1, &["pc optimum", "triangle", "air miles"]),
    ])
});

static CATEGORIES: Lazy<PatternTable<SpendCategory>> = Lazy::new(|| {
    PatternTable::new(vec![
        PatternRule::new(SpendCategory::Groceries, &["grocer", "supermarket"]),
        PatternRule::new(SpendCategory::Dining, &["dining", "restaurant", "food delivery"]),
        PatternRule::new(SpendCategory::Gas, &[" gas ", " fuel ", " ev charging "]),
        PatternRule::new(SpendCategory::Travel, &["travel", "flight", "airline", "hotel"]),
        PatternRule::new(SpendCategory::OnlineShopping, &["online", "amazon"]),
        PatternRule::new(SpendCategory::Entertainment, &["entertainment", "movie", "streaming"]),
        PatternRule::new(SpendCategory::Drugstores, &["drugstore", "drug store", "pharmac"]),
        PatternRule::new(SpendCategory::HomeImprovement, &["home improvement", "hardware"]),
    ])
});

// ============================================================================
// CLASSIFIERS
// ============================================================================

/// Canonical issuer named in `text`, if any
pub fn classify_issuer(text: &str) -> Option<&'static str> {
    ISSUERS.classify(text).copied()
}

/// Loyalty program named in `text`, falling back to the generic program
pub fn classify_program(text: &str) -> &'static str {
    PROGRAMS.classify(text).copied().unwrap_or(GENERIC_PROGRAM)
}

/// Reward currency from program name first, then card name
pub fn classify_currency(program: &str, name: &str) -> RewardCurrency {
    CURRENCIES
        .classify(&format!("{} {}", program, name))
        .copied()
        .unwrap_or(RewardCurrency::Points)
}

/// Estimated cents per point for a program (1.0 when unknown)
pub fn point_valuation(program: &str) -> f64 {
    POINT_VALUES.classify(program).copied().unwrap_or(1.0)
}

/// Spend category for a free-text label. Stored names ("online_shopping")
/// resolve exactly; anything else goes through the keyword table.
pub fn classify_category(text: &str) -> SpendCategory {
    if let Some(category) = SpendCategory::parse(&text.to_lowercase()) {
        return category;
    }
    CATEGORIES
        .classify(text)
        .copied()
        .unwrap_or(SpendCategory::Other)
}
