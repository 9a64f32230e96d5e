// 📥 Raw Candidate - One unverified sighting of a card from one source
//
// Everything except the name is optional free text. Adapters never parse;
// the merger owns all interpretation so that every source degrades the same
// way when a field is missing or garbled.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    // Core fields (every adapter provides)
    pub name: String,
    #[serde(default)]
    pub issuer: String,

    // Free text (depends on the source)
    #[serde(default)]
    pub fee_text: Option<String>,
    #[serde(default)]
    pub rate_text: Option<String>,
    #[serde(default)]
    pub reward_fragments: Vec<String>,
    #[serde(default)]
    pub program_text: Option<String>,
    #[serde(default)]
    pub bonus_text: Option<String>,

    // Provenance (stamped by the adapter when the payload omits it)
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl RawCandidate {
    pub fn new(name: impl Into<String>, issuer: impl Into<String>, source_id: impl Into<String>) -> Self {
        RawCandidate {
            name: name.into(),
            issuer: issuer.into(),
            fee_text: None,
            rate_text: None,
            reward_fragments: Vec::new(),
            program_text: None,
            bonus_text: None,
            source_id: source_id.into(),
            confidence: None,
        }
    }

    /// Builder pattern: add annual fee text
    pub fn with_fee(mut self, fee: impl Into<String>) -> Self {
        self.fee_text = Some(fee.into());
        self
    }

    /// Builder pattern: add base earn rate text
    pub fn with_rate(mut self, rate: impl Into<String>) -> Self {
        self.rate_text = Some(rate.into());
        self
    }

    /// Builder pattern: add one category reward fragment ("travel/1.5x", "5% on groceries")
    pub fn with_reward(mut self, fragment: impl Into<String>) -> Self {
        self.reward_fragments.push(fragment.into());
        self
    }

    /// Builder pattern: add loyalty program text
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program_text = Some(program.into());
        self
    }

    /// Builder pattern: add welcome bonus text
    pub fn with_bonus(mut self, bonus: impl Into<String>) -> Self {
        self.bonus_text = Some(bonus.into());
        self
    }

    /// Builder pattern: add adapter confidence score
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Content hash used to recognise a replayed candidate.
    ///
    /// Covers the source and every observed field, so the same source
    /// re-sending the same payload is a replay, while a changed payload from
    /// that source is still merged.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source_id.as_bytes());
        for field in [
            Some(self.name.as_str()),
            Some(self.issuer.as_str()),
            self.fee_text.as_deref(),
            self.rate_text.as_deref(),
            self.program_text.as_deref(),
            self.bonus_text.as_deref(),
        ] {
            hasher.update([0x1f]);
            hasher.update(field.unwrap_or("\u{0}").as_bytes());
        }
        for fragment in &self.reward_fragments {
            hasher.update([0x1e]);
            hasher.update(fragment.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_optional_fields() {
        let candidate = RawCandidate::new("TD Aeroplan Visa Infinite", "TD", "source-x")
            .with_fee("$139")
            .with_reward("travel/1.5x")
            .with_confidence(0.6);

        assert_eq!(candidate.fee_text.as_deref(), Some("$139"));
        assert_eq!(candidate.reward_fragments, vec!["travel/1.5x".to_string()]);
        assert_eq!(candidate.confidence, Some(0.6));
        assert!(candidate.rate_text.is_none());
    }

    #[test]
    fn test_fingerprint_stable_for_same_payload() {
        let a = RawCandidate::new("Amex Cobalt", "American Express", "s1").with_fee("$155.88");
        let b = RawCandidate::new("Amex Cobalt", "American Express", "s1").with_fee("$155.88");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_changes_with_source_or_content() {
        let base = RawCandidate::new("Amex Cobalt", "American Express", "s1");
        let other_source = RawCandidate::new("Amex Cobalt", "American Express", "s2");
        let with_fee = base.clone().with_fee("$155.88");

        assert_ne!(base.fingerprint(), other_source.fingerprint());
        assert_ne!(base.fingerprint(), with_fee.fingerprint());
    }

    #[test]
    fn test_deserialize_with_missing_optionals() {
        let json = r#"{"name": "Scotia Momentum Visa Infinite", "issuer": "Scotiabank"}"#;
        let candidate: RawCandidate = serde_json::from_str(json).unwrap();
        assert_eq!(candidate.issuer, "Scotiabank");
        assert!(candidate.fee_text.is_none());
        assert!(candidate.reward_fragments.is_empty());
        assert!(candidate.source_id.is_empty());
    }
}
