// Panel data model - Observations and Divisions
//
// A Division is one reporting unit of the survey. Its id is the only thing
// reconciliation ever unifies; observations are never moved or deleted.

use serde::{Deserialize, Serialize};

use crate::error::LinkageError;

/// Division identifier as it appears in the survey files
pub type DivisionId = i64;

/// Number of numeric variables (X1..X65) carried by every observation
pub const N_VARIABLES: usize = 65;

/// First and last survey year of the panel
pub const MIN_YEAR: i32 = 1975;
pub const MAX_YEAR: i32 = 2000;

// ============================================================================
// MARKET
// ============================================================================

/// Coarse sector classification derived from a division's industry code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Market {
    RawMaterial,
    Intermediate,
    NonDurable,
    Durable,
    Construction,
}

impl Market {
    pub const ALL: [Market; 5] = [
        Market::RawMaterial,
        Market::Intermediate,
        Market::NonDurable,
        Market::Durable,
        Market::Construction,
    ];

    pub fn from_industry(industry: &str) -> Result<Self, LinkageError> {
        match industry.trim() {
            "R" => Ok(Market::RawMaterial),
            "S" => Ok(Market::Intermediate),
            "K" => Ok(Market::NonDurable),
            "V" => Ok(Market::Durable),
            "B" => Ok(Market::Construction),
            other => Err(LinkageError::UnknownIndustry(other.to_string())),
        }
    }

    /// Human-readable name for reports
    pub fn name(&self) -> &'static str {
        match self {
            Market::RawMaterial => "Raw Material Processing",
            Market::Intermediate => "Intermediate Goods",
            Market::NonDurable => "Consumption Goods",
            Market::Durable => "Investment Goods",
            Market::Construction => "Construction",
        }
    }
}

// ============================================================================
// OBSERVATION
// ============================================================================

/// One division's reported data for exactly one year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub year: i32,

    /// Industry code (B, S, R, K, V)
    pub industry: String,

    /// Free-text label; `None` when the survey left it blank
    pub name: Option<String>,

    /// Division code (full format only)
    pub code: Option<String>,

    /// SNI classification (full format only)
    pub sni: Option<i32>,

    /// X1..X65, `None` = not reported
    variables: Vec<Option<f64>>,
}

impl Observation {
    /// Create an observation; `variables` must hold exactly N_VARIABLES entries
    pub fn new(
        year: i32,
        industry: impl Into<String>,
        variables: Vec<Option<f64>>,
    ) -> Result<Self, LinkageError> {
        if variables.len() != N_VARIABLES {
            return Err(LinkageError::MalformedRecord {
                line: 0,
                id: String::new(),
                year: Some(year),
                reason: format!(
                    "expected {} variables, found {}",
                    N_VARIABLES,
                    variables.len()
                ),
            });
        }

        Ok(Observation {
            year,
            industry: industry.into(),
            name: None,
            code: None,
            sni: None,
            variables,
        })
    }

    /// Observation with every variable missing
    pub fn empty(year: i32, industry: impl Into<String>) -> Self {
        Observation {
            year,
            industry: industry.into(),
            name: None,
            code: None,
            sni: None,
            variables: vec![None; N_VARIABLES],
        }
    }

    /// Builder pattern: set one variable
    pub fn with_variable(mut self, index: usize, value: f64) -> Self {
        self.set_variable(index, Some(value));
        self
    }

    /// Builder pattern: add name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder pattern: add code and SNI classification
    pub fn with_classification(mut self, code: Option<String>, sni: Option<i32>) -> Self {
        self.code = code;
        self.sni = sni;
        self
    }

    /// Value of variable `index`; `None` when missing or out of range
    pub fn variable(&self, index: usize) -> Option<f64> {
        self.variables.get(index).copied().flatten()
    }

    pub fn set_variable(&mut self, index: usize, value: Option<f64>) {
        if let Some(slot) = self.variables.get_mut(index) {
            *slot = value;
        }
    }

    pub fn variables(&self) -> &[Option<f64>] {
        &self.variables
    }

    /// Name with surrounding whitespace removed, `None` if absent or blank
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }
}

// ============================================================================
// DIVISION
// ============================================================================

/// A reporting unit and its observations, always kept ascending by year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Division {
    pub id: DivisionId,
    observations: Vec<Observation>,
}

impl Division {
    pub fn new(id: DivisionId) -> Self {
        Division {
            id,
            observations: Vec::new(),
        }
    }

    pub fn with_observations(id: DivisionId, mut observations: Vec<Observation>) -> Self {
        // Stable: records for the same year keep their file order
        observations.sort_by_key(|ob| ob.year);
        Division { id, observations }
    }

    /// Insert keeping year order (after any existing record of the same year)
    pub fn push(&mut self, observation: Observation) {
        let pos = self
            .observations
            .partition_point(|ob| ob.year <= observation.year);
        self.observations.insert(pos, observation);
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Earliest observation
    pub fn first(&self) -> Option<&Observation> {
        self.observations.first()
    }

    /// Latest observation
    pub fn last(&self) -> Option<&Observation> {
        self.observations.last()
    }

    pub fn first_year(&self) -> Option<i32> {
        self.first().map(|ob| ob.year)
    }

    pub fn last_year(&self) -> Option<i32> {
        self.last().map(|ob| ob.year)
    }

    /// Most recent non-blank name
    pub fn latest_name(&self) -> Option<&str> {
        self.observations
            .iter()
            .rev()
            .find_map(|ob| ob.display_name())
    }

    /// Market of the division, taken from its earliest observation
    pub fn market(&self) -> Result<Market, LinkageError> {
        let first = self.first().ok_or(LinkageError::EmptyDivision(self.id))?;
        Market::from_industry(&first.industry)
    }

    /// Keep only observations whose year is in `years`
    pub fn retain_years(&mut self, years: &[i32]) {
        self.observations.retain(|ob| years.contains(&ob.year));
    }
}

// ============================================================================
// TESTS
// ============================================================================
