// 🔍 Candidate Ranking Engine - Which earlier division does a new one continue?
// Two strategies: Exact Match short-circuit, Fuzzy Match (proximity + names + id scheme)

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::{IdScheme, LinkageConfig, SlotPair};
use crate::error::LinkageError;
use crate::interval::is_eligible_base;
use crate::model::{Division, Observation};
use crate::proximity::ProximityScorer;
use crate::tokens::NameTokenScorer;

// ============================================================================
// MATCH STRATEGY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStrategy {
    /// Base stops the year before the query starts and one slot pair is identical
    ExactMatch,

    /// Accumulated proximity, name-token and id-scheme evidence
    FuzzyMatch,
}

// ============================================================================
// CANDIDATE SCORE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub score: f64,
    pub strategy: MatchStrategy,

    /// Year of the base observation the query was compared against
    pub split_year: i32,

    /// Human-readable reason
    pub reason: String,
}

/// A base division surviving eligibility and the threshold
#[derive(Debug, Clone)]
pub struct RankedCandidate<'a> {
    pub base: &'a Division,

    /// Position of `base` in the pool it was ranked from
    pub pool_index: usize,

    pub score: CandidateScore,
}

impl RankedCandidate<'_> {
    pub fn value(&self) -> f64 {
        self.score.score
    }
}

// ============================================================================
// RANKER
// ============================================================================

pub struct CandidateRanker {
    proximity: ProximityScorer,
    names: NameTokenScorer,
    slot_pairs: Vec<SlotPair>,
    value_threshold: f64,
    exact_match_score: f64,
    id_bonus: f64,
    id_scheme: IdScheme,
}

impl CandidateRanker {
    pub fn new(config: &LinkageConfig) -> Self {
        CandidateRanker {
            proximity: ProximityScorer::new(config.tolerance),
            names: NameTokenScorer::new(config.stopwords.iter().cloned(), config.token_bonus),
            slot_pairs: config.slot_pairs.clone(),
            value_threshold: config.value_threshold,
            exact_match_score: config.exact_match_score,
            id_bonus: config.id_bonus,
            id_scheme: config.id_scheme.clone(),
        }
    }

    /// Score one base against the query, `None` when the base is ineligible.
    ///
    /// The threshold is not applied here.
    pub fn score_candidate(
        &self,
        query: &Division,
        base: &Division,
    ) -> Result<Option<CandidateScore>, LinkageError> {
        let first_ob = query.first().ok_or(LinkageError::EmptyDivision(query.id))?;

        let base_ob = match is_eligible_base(base, query)? {
            Some(ob) => ob,
            None => return Ok(None),
        };

        if let Some(pair) = self.exact_pair(base_ob, first_ob) {
            return Ok(Some(CandidateScore {
                score: self.exact_match_score,
                strategy: MatchStrategy::ExactMatch,
                split_year: base_ob.year,
                reason: format!(
                    "Exact match: {} {} -> {} unchanged ({})",
                    pair.label,
                    base_ob.year,
                    first_ob.year,
                    format_value(base_ob.variable(pair.base))
                ),
            }));
        }

        let proximity: f64 = self
            .slot_pairs
            .iter()
            .map(|pair| {
                self.proximity
                    .score(base_ob.variable(pair.base), first_ob.variable(pair.query))
            })
            .sum();

        let shared = self.names.shared_tokens(base, query);
        let token_points = self.names.token_overlap_bonus(base, query);

        let id_linked = self.id_scheme.matches(query.id, base.id);
        let id_points = if id_linked { self.id_bonus } else { 0.0 };

        let score = proximity + f64::from(token_points) + id_points;

        Ok(Some(CandidateScore {
            score,
            strategy: MatchStrategy::FuzzyMatch,
            split_year: base_ob.year,
            reason: format!(
                "Fuzzy match: proximity {:.2} | names {} [{}] | id scheme {}",
                proximity,
                token_points,
                shared.join(" "),
                if id_linked { "yes" } else { "no" }
            ),
        }))
    }

    /// Rank the whole pool for `query`, strongest candidate first
    pub fn rank_candidates<'a>(
        &self,
        query: &Division,
        base_pool: &'a [Division],
    ) -> Result<Vec<RankedCandidate<'a>>, LinkageError> {
        self.rank_filtered(query, base_pool, |_| false)
    }

    /// Rank the pool, skipping every base for which `skip` holds.
    ///
    /// Order is best-first: descending score, ties keep pool order.
    pub fn rank_filtered<'a, F>(
        &self,
        query: &Division,
        base_pool: &'a [Division],
        skip: F,
    ) -> Result<Vec<RankedCandidate<'a>>, LinkageError>
    where
        F: Fn(&Division) -> bool,
    {
        if query.is_empty() {
            return Err(LinkageError::EmptyDivision(query.id));
        }

        let mut ranking = Vec::new();

        for (pool_index, base) in base_pool.iter().enumerate() {
            if skip(base) {
                continue;
            }

            let score = match self.score_candidate(query, base)? {
                Some(score) => score,
                None => continue,
            };

            debug!(
                "division {} vs base {}: {:.3} ({})",
                query.id, base.id, score.score, score.reason
            );

            if score.score >= self.value_threshold {
                ranking.push(RankedCandidate {
                    base,
                    pool_index,
                    score,
                });
            }
        }

        // Stable: equal scores stay in pool order
        ranking.sort_by(|a, b| b.value().total_cmp(&a.value()));

        Ok(ranking)
    }

    /// First slot pair whose values are present and identical, provided the
    /// base stops exactly one year before the query starts
    fn exact_pair(&self, base_ob: &Observation, first_ob: &Observation) -> Option<&SlotPair> {
        if first_ob.year.checked_sub(1) != Some(base_ob.year) {
            return None;
        }

        self.slot_pairs.iter().find(|pair| {
            match (base_ob.variable(pair.base), first_ob.variable(pair.query)) {
                (Some(b), Some(q)) => b == q,
                _ => false,
            }
        })
    }
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{}", v),
        None => "NA".to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ranker() -> CandidateRanker {
        CandidateRanker::new(&LinkageConfig::default())
    }

    fn ob(year: i32, values: &[(usize, f64)]) -> Observation {
        values
            .iter()
            .fold(Observation::empty(year, "V"), |ob, (idx, v)| ob.with_variable(*idx, *v))
    }

    #[test]
    fn test_exact_match_short_circuit() {
        let base = Division::with_observations(1, vec![ob(1995, &[]), ob(1996, &[(7, 100.0)])]);
        let query = Division::with_observations(2, vec![ob(1997, &[(6, 100.0)]), ob(1998, &[])]);

        let score = ranker().score_candidate(&query, &base).unwrap().unwrap();
        assert_eq!(score.score, 1000.0);
        assert_eq!(score.strategy, MatchStrategy::ExactMatch);
        assert_eq!(score.split_year, 1996);

        let ranked = ranker().rank_candidates(&query, std::slice::from_ref(&base)).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].base.id, 1);
    }

    #[test]
    fn test_exact_match_requires_adjacent_year() {
        // Identical employees but the base stopped two years earlier
        let base = Division::with_observations(1, vec![ob(1995, &[(1, 40.0)])]);
        let query = Division::with_observations(2, vec![ob(1997, &[(0, 40.0)])]);

        let score = ranker().score_candidate(&query, &base).unwrap().unwrap();
        assert_eq!(score.strategy, MatchStrategy::FuzzyMatch);
        assert!((score.score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_missing_values_never_match_exactly() {
        let base = Division::with_observations(1, vec![ob(1996, &[])]);
        let query = Division::with_observations(2, vec![ob(1997, &[])]);

        let score = ranker().score_candidate(&query, &base).unwrap().unwrap();
        assert_eq!(score.strategy, MatchStrategy::FuzzyMatch);
        assert_eq!(score.score, 0.0);
    }

    #[test]
    fn test_fuzzy_score_accumulates_evidence() {
        let base = Division::with_observations(
            1_234_560,
            vec![ob(1995, &[(7, 100.0), (4, 500.0), (1, 80.0)]).with_name("HUSQVARNA AB")],
        );
        let query = Division::with_observations(
            223_456,
            vec![ob(1997, &[(6, 100.0), (3, 500.0), (0, 80.0)]).with_name("HUSQVARNA MOTOR AB")],
        );

        let score = ranker().score_candidate(&query, &base).unwrap().unwrap();
        // 3 * 0.9 proximity + 5 name points + 25 id scheme
        assert!((score.score - 32.7).abs() < 1e-9, "score was {}", score.score);
        assert!(score.reason.contains("HUSQVARNA"));
    }

    #[test]
    fn test_threshold_gate() {
        // Only one close value: 0.9 < 1.5
        let weak = Division::with_observations(1, vec![ob(1995, &[(1, 80.0)])]);
        // Two close values: 1.8 >= 1.5
        let strong = Division::with_observations(2, vec![ob(1995, &[(1, 80.0), (4, 500.0)])]);
        let query = Division::with_observations(9, vec![ob(1997, &[(0, 80.0), (3, 500.0)])]);

        let pool = vec![weak, strong];
        let ranked = ranker().rank_candidates(&query, &pool).unwrap();

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].base.id, 2);
        assert_eq!(ranked[0].pool_index, 1);
        assert!(ranked.iter().all(|c| c.value() >= 1.5));
    }

    #[test]
    fn test_exact_match_outranks_fuzzy() {
        let fuzzy = Division::with_observations(
            1,
            vec![ob(1995, &[(1, 80.0), (4, 500.0)]).with_name("ESAB SVETS")],
        );
        let exact = Division::with_observations(2, vec![ob(1996, &[(4, 321.0)])]);
        let query = Division::with_observations(
            9,
            vec![ob(1997, &[(0, 80.0), (3, 321.0)]).with_name("ESAB SVETS")],
        );

        let pool = vec![fuzzy, exact];
        let ranked = ranker().rank_candidates(&query, &pool).unwrap();

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].base.id, 2);
        assert_eq!(ranked[0].score.strategy, MatchStrategy::ExactMatch);
        assert!(ranked[0].value() > ranked[1].value());
    }

    #[test]
    fn test_overlapping_base_never_ranked() {
        // Values identical, but the base also reports in 1998
        let base = Division::with_observations(1, vec![ob(1996, &[(7, 100.0)]), ob(1998, &[])]);
        let query = Division::with_observations(2, vec![ob(1997, &[(6, 100.0)]), ob(1998, &[])]);

        let ranked = ranker().rank_candidates(&query, std::slice::from_ref(&base)).unwrap();
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_base_after_query_never_ranked() {
        let base = Division::with_observations(1, vec![ob(1998, &[(7, 100.0)])]);
        let query = Division::with_observations(2, vec![ob(1997, &[(6, 100.0)])]);

        assert!(ranker().score_candidate(&query, &base).unwrap().is_none());
        assert!(ranker().rank_candidates(&query, std::slice::from_ref(&base)).unwrap().is_empty());
    }

    #[test]
    fn test_ties_keep_pool_order_and_ranking_is_deterministic() {
        let make = |id| Division::with_observations(id, vec![ob(1996, &[(7, 50.0)])]);
        let pool = vec![make(30), make(10), make(20)];
        let query = Division::with_observations(9, vec![ob(1997, &[(6, 50.0)])]);

        let first: Vec<i64> = ranker()
            .rank_candidates(&query, &pool)
            .unwrap()
            .iter()
            .map(|c| c.base.id)
            .collect();
        let second: Vec<i64> = ranker()
            .rank_candidates(&query, &pool)
            .unwrap()
            .iter()
            .map(|c| c.base.id)
            .collect();

        assert_eq!(first, vec![30, 10, 20]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_skip_filter_excludes_bases() {
        let make = |id| Division::with_observations(id, vec![ob(1996, &[(7, 50.0)])]);
        let pool = vec![make(1), make(2)];
        let query = Division::with_observations(9, vec![ob(1997, &[(6, 50.0)])]);

        let ranked = ranker().rank_filtered(&query, &pool, |b| b.id == 1).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].base.id, 2);
    }

    #[test]
    fn test_adjacent_year_check_at_year_limits() {
        let base_ob = ob(i32::MAX, &[(7, 100.0)]);
        let first_ob = ob(i32::MIN, &[(6, 100.0)]);
        assert!(ranker().exact_pair(&base_ob, &first_ob).is_none());

        let query = Division::with_observations(2, vec![first_ob]);
        let pool = vec![Division::with_observations(1, vec![base_ob])];
        assert!(ranker().rank_candidates(&query, &pool).unwrap().is_empty());
    }

    #[test]
    fn test_empty_query_is_an_error() {
        let pool = vec![Division::with_observations(1, vec![ob(1990, &[])])];
        let result = ranker().rank_candidates(&Division::new(4), &pool);
        assert!(matches!(result, Err(LinkageError::EmptyDivision(4))));
    }
}
