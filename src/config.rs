// Linkage configuration - scoring constants as data
// Loaded from a JSON file; every field falls back to the tuned defaults.

use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::LinkageError;
use crate::model::{DivisionId, N_VARIABLES};

// ============================================================================
// SLOT PAIRS
// ============================================================================

/// A variable of the base's split observation compared against a variable of
/// the query's first observation. The survey shifted some columns by one slot
/// across the cutoff, hence the differing indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotPair {
    pub label: String,
    pub base: usize,
    pub query: usize,
}

impl SlotPair {
    pub fn new(label: &str, base: usize, query: usize) -> Self {
        SlotPair {
            label: label.to_string(),
            base,
            query,
        }
    }
}

fn default_slot_pairs() -> Vec<SlotPair> {
    vec![
        SlotPair::new("sales abroad", 7, 6),
        SlotPair::new("hours", 4, 3),
        SlotPair::new("employees", 1, 0),
    ]
}

fn default_stopwords() -> Vec<String> {
    ["AB", "BRUK", "ABB", "CO", "&", "STORA", "SVENSKA"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// ============================================================================
// ID SCHEME
// ============================================================================

/// Historical id re-encoding: `query_id * multiplier + offset == base_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdScheme {
    pub multiplier: i64,
    pub offset: i64,
}

impl IdScheme {
    pub fn matches(&self, query_id: DivisionId, base_id: DivisionId) -> bool {
        query_id
            .checked_mul(self.multiplier)
            .and_then(|v| v.checked_add(self.offset))
            .map_or(false, |encoded| encoded == base_id)
    }
}

impl Default for IdScheme {
    fn default() -> Self {
        IdScheme {
            multiplier: 10,
            offset: -1_000_000,
        }
    }
}

// ============================================================================
// LINKAGE CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkageConfig {
    /// Divisions first reporting in or after this year are linked backwards
    pub cutoff_year: i32,

    /// Fractional band for proximity scoring (0.1 = 10%)
    pub tolerance: f64,

    /// Minimum accumulated score for a candidate to be listed
    pub value_threshold: f64,

    /// Score assigned on the exact-match short-circuit
    pub exact_match_score: f64,

    /// Points per shared name token
    pub token_bonus: u32,

    /// Points when the id scheme links query and base
    pub id_bonus: f64,

    pub id_scheme: IdScheme,

    pub slot_pairs: Vec<SlotPair>,

    /// Tokens never counted as name evidence
    pub stopwords: Vec<String>,

    /// Whether a base already claimed by one query stays in the pool
    pub allow_base_reuse: bool,

    /// Score the auto policy needs before it accepts the best candidate
    pub auto_accept_floor: f64,
}

impl Default for LinkageConfig {
    fn default() -> Self {
        LinkageConfig {
            cutoff_year: 1997,
            tolerance: 0.1,
            value_threshold: 1.5,
            exact_match_score: 1000.0,
            token_bonus: 5,
            id_bonus: 25.0,
            id_scheme: IdScheme::default(),
            slot_pairs: default_slot_pairs(),
            stopwords: default_stopwords(),
            allow_base_reuse: true,
            auto_accept_floor: 1000.0,
        }
    }
}

impl LinkageConfig {
    /// Load config from JSON file and validate it
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: LinkageConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LinkageError> {
        if !(self.tolerance > 0.0) || !self.tolerance.is_finite() {
            return Err(LinkageError::InvalidConfig(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }

        if !self.value_threshold.is_finite() || !self.exact_match_score.is_finite() {
            return Err(LinkageError::InvalidConfig(
                "thresholds must be finite".to_string(),
            ));
        }

        if self.slot_pairs.is_empty() {
            return Err(LinkageError::InvalidConfig(
                "at least one slot pair is required".to_string(),
            ));
        }

        for pair in &self.slot_pairs {
            if pair.base >= N_VARIABLES || pair.query >= N_VARIABLES {
                return Err(LinkageError::InvalidConfig(format!(
                    "slot pair '{}' ({} -> {}) outside X1..X{}",
                    pair.label, pair.base, pair.query, N_VARIABLES
                )));
            }
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_tuning() {
        let config = LinkageConfig::default();

        assert_eq!(config.cutoff_year, 1997);
        assert_eq!(config.tolerance, 0.1);
        assert_eq!(config.value_threshold, 1.5);
        assert_eq!(config.exact_match_score, 1000.0);
        assert_eq!(config.token_bonus, 5);
        assert_eq!(config.id_bonus, 25.0);
        assert!(config.allow_base_reuse);
        assert_eq!(
            config.slot_pairs.iter().map(|p| (p.base, p.query)).collect::<Vec<_>>(),
            vec![(7, 6), (4, 3), (1, 0)]
        );
        assert!(config.stopwords.contains(&"SVENSKA".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_id_scheme() {
        let scheme = IdScheme::default();
        assert!(scheme.matches(123_456, 234_560));
        assert!(!scheme.matches(123_456, 123_456));
        assert!(!scheme.matches(i64::MAX, 0));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "cutoff_year": 1995, "tolerance": 0.05 }}"#).unwrap();

        let config = LinkageConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cutoff_year, 1995);
        assert_eq!(config.tolerance, 0.05);
        assert_eq!(config.value_threshold, 1.5);
        assert_eq!(config.slot_pairs.len(), 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = LinkageConfig {
            tolerance: 0.0,
            ..LinkageConfig::default()
        };
        assert!(matches!(config.validate(), Err(LinkageError::InvalidConfig(_))));

        let config = LinkageConfig {
            slot_pairs: vec![SlotPair::new("bad", 65, 0)],
            ..LinkageConfig::default()
        };
        assert!(matches!(config.validate(), Err(LinkageError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = LinkageConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config JSON"));
    }
}
