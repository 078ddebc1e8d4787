// Interval & overlap evaluation
//
// A base division can only be the predecessor of a query division when it has
// a report strictly before the query starts and never reports in the same year
// as the query afterwards.

use std::collections::BTreeSet;

use crate::error::LinkageError;
use crate::model::{Division, Observation};

/// Index and value of the base's last observation strictly before `query_first_year`
pub fn split_observation(base: &Division, query_first_year: i32) -> Option<(usize, &Observation)> {
    base.observations()
        .iter()
        .enumerate()
        .rev()
        .find(|(_, ob)| ob.year < query_first_year)
}

/// Returns the base observation to score against, or `None` when the base
/// cannot be a predecessor of `query`.
///
/// Errors only when `query` has no observations.
pub fn is_eligible_base<'a>(
    base: &'a Division,
    query: &Division,
) -> Result<Option<&'a Observation>, LinkageError> {
    let query_first_year = query
        .first_year()
        .ok_or(LinkageError::EmptyDivision(query.id))?;

    let (split_idx, split_ob) = match split_observation(base, query_first_year) {
        Some(found) => found,
        None => return Ok(None),
    };

    let query_years: BTreeSet<i32> = query.observations().iter().map(|ob| ob.year).collect();

    let overlaps = base.observations()[split_idx + 1..]
        .iter()
        .any(|ob| query_years.contains(&ob.year));

    if overlaps {
        Ok(None)
    } else {
        Ok(Some(split_ob))
    }
}

impl Division {
    pub fn has_year(&self, year: i32) -> bool {
        self.observations().iter().any(|ob| ob.year == year)
    }

    /// Whether the division spans `low..=high`.
    ///
    /// Soft: an observation at or before `low` and one at or after `high`.
    /// Hard: an observation for every year in the interval.
    pub fn in_interval(&self, low: i32, high: i32, hard: bool) -> bool {
        if hard {
            (low..=high).all(|year| self.has_year(year))
        } else {
            match (self.first_year(), self.last_year()) {
                (Some(first), Some(last)) => first <= low && last >= high,
                _ => false,
            }
        }
    }

    /// Number of breaks between consecutive reported years
    pub fn gap_count(&self) -> usize {
        self.observations()
            .windows(2)
            .filter(|pair| pair[1].year > pair[0].year + 1)
            .count()
    }
}

// ============================================================================
// TESTS
// ============================================================================
