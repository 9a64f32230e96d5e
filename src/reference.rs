// 📚 Reference Table - Curated facts about known cards, keyed by storage key
// Loaded once per run from JSON; read-only afterwards.
//
// {
//   "td-aeroplan-visa-infinite": {
//     "issuer": "TD",
//     "program": "Aeroplan",
//     "fee_range": [120, 160],
//     "category_rewards": [{"category": "travel", "multiplier": 1.5, "unit": "multiplier"}]
//   }
// }

use crate::entities::{CategoryReward, EntityRecord, RewardUnit, SpendCategory};
use crate::error::{ReconError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Confidence added when enrichment fills a record's rewards
pub const ENRICHMENT_BONUS: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownReward {
    pub category: SpendCategory,
    pub multiplier: f64,
    pub unit: RewardUnit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub issuer: String,
    #[serde(default)]
    pub program: Option<String>,
    /// Inclusive [min, max] annual fee
    pub fee_range: (f64, f64),
    #[serde(default)]
    pub category_rewards: Vec<KnownReward>,
}

impl ReferenceEntry {
    pub fn fee_in_range(&self, fee: f64) -> bool {
        fee >= self.fee_range.0 && fee <= self.fee_range.1
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    entries: HashMap<String, ReferenceEntry>,
}

impl ReferenceTable {
    /// Load from a JSON file. Missing, unreadable or invalid data is a
    /// configuration failure.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ReconError::Configuration(format!("cannot read reference table {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let entries: HashMap<String, ReferenceEntry> = serde_json::from_str(json)
            .map_err(|e| ReconError::Configuration(format!("invalid reference table: {}", e)))?;
        Self::from_entries(entries)
    }

    pub fn from_entries(entries: HashMap<String, ReferenceEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(ReconError::Configuration("reference table is empty".to_string()));
        }

        for (key, entry) in &entries {
            let (min, max) = entry.fee_range;
            if !min.is_finite() || !max.is_finite() || min < 0.0 || min > max {
                return Err(ReconError::Configuration(format!(
                    "reference entry '{}' has invalid fee range [{}, {}]",
                    key, min, max
                )));
            }
            if entry.category_rewards.iter().any(|r| !(r.multiplier > 0.0)) {
                return Err(ReconError::Configuration(format!(
                    "reference entry '{}' has a non-positive reward multiplier",
                    key
                )));
            }
        }

        Ok(ReferenceTable { entries })
    }

    pub fn get(&self, storage_key: &str) -> Option<&ReferenceEntry> {
        self.entries.get(storage_key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Give a reward-less record the known rewards for its storage key.
    /// Returns true when the record changed.
    pub fn enrich(&self, record: &mut EntityRecord) -> bool {
        if !record.category_rewards.is_empty() {
            return false;
        }
        let Some(entry) = self.get(&record.storage_key) else {
            return false;
        };

        let mut added = 0;
        for known in &entry.category_rewards {
            if let Some(reward) = CategoryReward::new(known.category, known.multiplier, known.unit) {
                if record.add_category_reward(reward) {
                    added += 1;
                }
            }
        }
        if added == 0 {
            return false;
        }

        let bumped = record.confidence + ENRICHMENT_BONUS;
        record.raise_confidence(bumped);
        debug!(target: "reference", storage_key = %record.storage_key, added, "enriched from reference");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "td-aeroplan-visa-infinite": {
            "issuer": "TD",
            "program": "Aeroplan",
            "fee_range": [120, 160],
            "category_rewards": [
                {"category": "travel", "multiplier": 1.5, "unit": "multiplier"},
                {"category": "groceries", "multiplier": 1.5, "unit": "multiplier"}
            ]
        },
        "american-express-cobalt": {
            "issuer": "American Express",
            "fee_range": [150, 170]
        }
    }"#;

    #[test]
    fn test_load_from_json() {
        let table = ReferenceTable::from_json_str(SAMPLE).unwrap();
        assert_eq!(table.len(), 2);
        let entry = table.get("td-aeroplan-visa-infinite").unwrap();
        assert_eq!(entry.issuer, "TD");
        assert!(entry.fee_in_range(139.0));
        assert!(!entry.fee_in_range(0.0));
        assert!(table.get("american-express-cobalt").unwrap().category_rewards.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let table = ReferenceTable::from_file(file.path()).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_invalid_tables_are_configuration_errors() {
        let missing = ReferenceTable::from_file("/nonexistent/reference.json");
        assert!(matches!(missing, Err(ReconError::Configuration(_))));

        let empty = ReferenceTable::from_json_str("{}");
        assert!(matches!(empty, Err(ReconError::Configuration(_))));

        let inverted = ReferenceTable::from_json_str(r#"{"x": {"issuer": "TD", "fee_range": [200, 100]}}"#);
        assert!(matches!(inverted, Err(ReconError::Configuration(_))));

        let garbage = ReferenceTable::from_json_str("not json");
        assert!(matches!(garbage, Err(ReconError::Configuration(_))));
    }

    #[test]
    fn test_enrich_fills_empty_rewards() {
        let table = ReferenceTable::from_json_str(SAMPLE).unwrap();
        let mut record = EntityRecord::new("td td aeroplan infinite", "TD Aeroplan Visa Infinite", "TD");
        record.confidence = 0.5;

        assert!(table.enrich(&mut record));
        assert_eq!(record.category_rewards.len(), 2);
        assert!((record.confidence - 0.8).abs() < 1e-9);

        // Already has rewards: untouched
        assert!(!table.enrich(&mut record));
        assert!((record.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_enrich_ignores_unknown_cards() {
        let table = ReferenceTable::from_json_str(SAMPLE).unwrap();
        let mut record = EntityRecord::new("mystery", "Mystery Card", "TD");
        assert!(!table.enrich(&mut record));

        // Known card, but the reference has no rewards for it
        let mut cobalt = EntityRecord::new("cobalt", "Cobalt", "American Express");
        assert!(!table.enrich(&mut cobalt));
    }
}
