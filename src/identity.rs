// 🪪 Identity Normalizer - Free-text card name → stable keys
//
// Three keys, three jobs:
// - normalize():   identity key. Spelling variants of the same card collapse.
//                  The candidate merger groups on this.
// - storage_key(): URL-safe slug. The repository's upsert key.
// - group_key():   looser (issuer, core name) pair. The duplicate resolver
//                  uses it to catch records the identity key kept apart
//                  ("Best TD Aeroplan Card" vs "TD Aeroplan Visa Infinite").
//
// All three are pure and total: any input produces a key, possibly empty.

use crate::entities::UNKNOWN_ISSUER;

/// Decorative glyphs dropped before anything else
const TRADEMARK_GLYPHS: [char; 5] = ['®', '™', '©', '℠', '*'];

/// Removed as substrings (replaced by a space)
const NOISE_PUNCTUATION: [char; 1] = [':'];

/// Removed as whole words / whole word sequences, in this order.
/// Multi-word phrases come first so "perks of the" wins over "the".
const NOISE_PHRASES: [&str; 14] = [
    "american express",
    "perks of the",
    "perks of",
    "card",
    "credit",
    "mastercard",
    "visa",
    "best",
    "the",
    "a",
    "an",
    "for",
    "with",
    "from",
];

/// Network and tier words that do not distinguish one product from another
/// within an issuer. Only the resolver's grouping key drops these.
const TIER_PHRASES: [&str; 6] = [
    "world elite",
    "infinite privilege",
    "infinite",
    "amex",
    "signature",
    "privilege",
];

pub const MAX_STORAGE_KEY_LEN: usize = 100;

// ============================================================================
// IDENTITY KEY
// ============================================================================

/// Identity key for a (name, issuer) pair.
///
/// Lowercase, strip trademark glyphs, collapse whitespace, drop noise words,
/// collapse again. The unknown-issuer sentinel contributes nothing.
pub fn normalize(name: &str, issuer: &str) -> String {
    let issuer = if issuer.trim() == UNKNOWN_ISSUER { "" } else { issuer };
    let combined = format!("{} {}", issuer, name);
    let tokens = remove_phrases(tokenize(&combined), &NOISE_PHRASES);
    tokens.join(" ")
}

// ============================================================================
// STORAGE KEY
// ============================================================================

/// URL-safe storage key: "{issuer}-{name}" slugged.
///
/// The issuer prefix is skipped when the name already starts with it, so
/// "TD Aeroplan Visa Infinite" from "TD" is "td-aeroplan-visa-infinite",
/// not "td-td-aeroplan-visa-infinite".
pub fn storage_key(name: &str, issuer: &str) -> String {
    let name_lower = name.trim().to_lowercase();
    let issuer_lower = issuer.trim().to_lowercase();

    let combined = if issuer_lower.is_empty()
        || name_lower == issuer_lower
        || name_lower.starts_with(&format!("{} ", issuer_lower))
    {
        name_lower
    } else {
        format!("{}-{}", issuer_lower, name_lower)
    };

    let mut slug = String::with_capacity(combined.len());
    for c in combined.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if (c == '-' || c.is_whitespace()) && !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }

    let trimmed = slug.trim_end_matches('-');
    // ASCII only at this point, so byte truncation is char-safe
    let truncated = &trimmed[..trimmed.len().min(MAX_STORAGE_KEY_LEN)];
    truncated.trim_end_matches('-').to_string()
}

// ============================================================================
// GROUPING KEY
// ============================================================================

/// Loose (issuer, core-name) key for duplicate grouping.
///
/// The issuer's own words, noise words and network/tier words are removed
/// from the name. Two products of one issuer that differ only by tier
/// ("Dividend Visa" vs "Dividend Visa Infinite") share a grouping key.
pub fn group_key(name: &str, issuer: &str) -> (String, String) {
    let issuer_tokens = tokenize(issuer);
    let issuer_key = issuer_tokens.join(" ");

    let mut tokens = tokenize(name);
    if !issuer_key.is_empty() && issuer_key != UNKNOWN_ISSUER {
        tokens = remove_phrases(tokens, &[issuer_key.as_str()]);
    }
    tokens = remove_phrases(tokens, &NOISE_PHRASES);
    tokens = remove_phrases(tokens, &TIER_PHRASES);

    (issuer_key, tokens.join(" "))
}

// ============================================================================
// HELPERS
// ============================================================================

/// Lowercase, drop glyphs, break noise punctuation, split on whitespace
fn tokenize(s: &str) -> Vec<String> {
    let cleaned: String = s
        .to_lowercase()
        .chars()
        .filter(|c| !TRADEMARK_GLYPHS.contains(c))
        .map(|c| if NOISE_PUNCTUATION.contains(&c) { ' ' } else { c })
        .collect();

    cleaned.split_whitespace().map(str::to_string).collect()
}

/// Remove every whole-word occurrence of each phrase, phrase by phrase
fn remove_phrases(mut tokens: Vec<String>, phrases: &[&str]) -> Vec<String> {
    for phrase in phrases {
        let words: Vec<&str> = phrase.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }

        let mut i = 0;
        while i + words.len() <= tokens.len() {
            let hit = words.iter().enumerate().all(|(j, w)| tokens[i + j] == *w);
            if hit {
                tokens.drain(i..i + words.len());
            } else {
                i += 1;
            }
        }
    }
    tokens
}

// ============================================================================
// TESTS
// ============================================================================
