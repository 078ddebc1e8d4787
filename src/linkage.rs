// ⛓️ Linkage Engine - Connect divisions that changed id across the cutoff
//
// Divisions first reporting at or after the cutoff year are "to-connect"
// queries; everything older is the base pool. Each query is ranked against the
// pool, a DecisionPolicy picks a candidate (or none), and accepted matches are
// recorded in an IdResolution table. Division records themselves never change
// until the final relabelled panel is produced.

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::config::LinkageConfig;
use crate::decision::{Decision, DecisionContext, DecisionPolicy};
use crate::error::LinkageError;
use crate::model::{Division, DivisionId};
use crate::ranking::CandidateRanker;

// ============================================================================
// ID RESOLUTION
// ============================================================================

/// Canonical-id table: which division id continues which predecessor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdResolution {
    links: BTreeMap<DivisionId, DivisionId>,
}

impl IdResolution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical id for `id`, following links to the oldest predecessor
    pub fn resolve(&self, id: DivisionId) -> DivisionId {
        let mut current = id;
        // Links never form cycles, the bound only guards against corrupt input
        for _ in 0..=self.links.len() {
            match self.links.get(&current) {
                Some(next) => current = *next,
                None => return current,
            }
        }
        current
    }

    /// Record that `query_id` continues `chosen_id`. Returns the canonical id
    /// the query now resolves to.
    pub fn unify(&mut self, query_id: DivisionId, chosen_id: DivisionId) -> DivisionId {
        let target = self.resolve(chosen_id);
        if target == query_id {
            return query_id;
        }
        self.links.insert(query_id, target);
        target
    }

    pub fn is_linked(&self, id: DivisionId) -> bool {
        self.links.contains_key(&id)
    }

    /// All (query id, predecessor id) pairs in id order
    pub fn links(&self) -> impl Iterator<Item = (DivisionId, DivisionId)> + '_ {
        self.links.iter().map(|(from, to)| (*from, *to))
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Apply an accepted candidate: the query's id now resolves to the chosen
/// division's id. Observations stay where they are.
pub fn apply_match(resolution: &mut IdResolution, query: &Division, chosen: &Division) -> DivisionId {
    resolution.unify(query.id, chosen.id)
}

// ============================================================================
// POOLS
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Pools {
    /// First observation at or after the cutoff year
    pub to_connect: Vec<Division>,

    /// First observation before the cutoff year
    pub base: Vec<Division>,
}

impl Pools {
    /// Split divisions by the year of their first observation
    pub fn split(divisions: Vec<Division>, cutoff_year: i32) -> Result<Self, LinkageError> {
        let mut pools = Pools::default();

        for division in divisions {
            let first_year = division
                .first_year()
                .ok_or(LinkageError::EmptyDivision(division.id))?;

            if first_year >= cutoff_year {
                pools.to_connect.push(division);
            } else {
                pools.base.push(division);
            }
        }

        Ok(pools)
    }

    /// Re-join both pools, to-connect divisions first, with ids resolved
    pub fn into_relabelled(self, resolution: &IdResolution) -> Vec<Division> {
        self.to_connect
            .into_iter()
            .chain(self.base)
            .map(|mut division| {
                division.id = resolution.resolve(division.id);
                division
            })
            .collect()
    }
}

// ============================================================================
// DECISION RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Accepted { chosen_id: DivisionId, score: f64 },
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub query_id: DivisionId,
    pub outcome: Outcome,
    pub candidates: usize,
    pub actor: String,
}

#[derive(Debug, Clone, Default)]
pub struct LinkageOutcome {
    pub resolution: IdResolution,

    /// Decisions made during this run, in query order
    pub decisions: Vec<DecisionRecord>,

    /// Queries settled from earlier sessions
    pub replayed: usize,

    pub total_queries: usize,
    pub aborted: bool,
}

impl LinkageOutcome {
    pub fn accepted(&self) -> usize {
        self.decisions
            .iter()
            .filter(|d| matches!(d.outcome, Outcome::Accepted { .. }))
            .count()
    }

    pub fn summary(&self) -> String {
        format!(
            "Linkage: {} queries, {} decided now ({} accepted), {} replayed, {} links total{}",
            self.total_queries,
            self.decisions.len(),
            self.accepted(),
            self.replayed,
            self.resolution.len(),
            if self.aborted { ", aborted early" } else { "" }
        )
    }
}

// ============================================================================
// LINKAGE ENGINE
// ============================================================================

pub struct LinkageEngine {
    config: LinkageConfig,
    ranker: CandidateRanker,
}

impl LinkageEngine {
    pub fn new(config: LinkageConfig) -> Result<Self, LinkageError> {
        config.validate()?;
        let ranker = CandidateRanker::new(&config);
        Ok(LinkageEngine { config, ranker })
    }

    pub fn config(&self) -> &LinkageConfig {
        &self.config
    }

    pub fn ranker(&self) -> &CandidateRanker {
        &self.ranker
    }

    pub fn split(&self, divisions: Vec<Division>) -> Result<Pools, LinkageError> {
        Pools::split(divisions, self.config.cutoff_year)
    }

    /// Run every to-connect query through ranking and `policy`
    pub fn run(&self, pools: &Pools, policy: &mut dyn DecisionPolicy) -> Result<LinkageOutcome> {
        self.resume(pools, policy, &HashMap::new())
    }

    /// Like `run`, but queries with a decision in `prior` are settled from it
    /// without asking the policy.
    pub fn resume(
        &self,
        pools: &Pools,
        policy: &mut dyn DecisionPolicy,
        prior: &HashMap<DivisionId, Outcome>,
    ) -> Result<LinkageOutcome> {
        self.resume_with(pools, policy, prior, |_| Ok(()))
    }

    /// Like `resume`; `on_decision` sees every new decision as soon as it is made
    pub fn resume_with<F>(
        &self,
        pools: &Pools,
        policy: &mut dyn DecisionPolicy,
        prior: &HashMap<DivisionId, Outcome>,
        mut on_decision: F,
    ) -> Result<LinkageOutcome>
    where
        F: FnMut(&DecisionRecord) -> Result<()>,
    {
        let total = pools.to_connect.len();
        let mut outcome = LinkageOutcome {
            total_queries: total,
            ..LinkageOutcome::default()
        };

        // base id -> first query that claimed it
        let mut claimed: HashMap<DivisionId, DivisionId> = HashMap::new();

        info!(
            "Linking {} divisions against {} base divisions (cutoff {})",
            total,
            pools.base.len(),
            self.config.cutoff_year
        );

        for (idx, query) in pools.to_connect.iter().enumerate() {
            if let Some(recorded) = prior.get(&query.id) {
                if let Outcome::Accepted { chosen_id, .. } = recorded {
                    outcome.resolution.unify(query.id, *chosen_id);
                    claimed.entry(*chosen_id).or_insert(query.id);
                }
                outcome.replayed += 1;
                continue;
            }

            let candidates = if self.config.allow_base_reuse {
                self.ranker.rank_candidates(query, &pools.base)?
            } else {
                self.ranker
                    .rank_filtered(query, &pools.base, |base| claimed.contains_key(&base.id))?
            };

            let ctx = DecisionContext {
                progress: idx + 1,
                total,
                query,
                candidates: &candidates,
            };

            let record = match policy.decide(&ctx)? {
                Decision::Reject => DecisionRecord {
                    query_id: query.id,
                    outcome: Outcome::Rejected,
                    candidates: candidates.len(),
                    actor: policy.actor().to_string(),
                },
                Decision::Accept(selection) => {
                    let chosen = candidates.get(selection).ok_or_else(|| {
                        LinkageError::InvalidSelection {
                            response: selection.to_string(),
                            candidates: candidates.len(),
                        }
                    })?;

                    if let Some(previous) = claimed.get(&chosen.base.id) {
                        warn!(
                            "base {} already continued by division {}, now also by {}",
                            chosen.base.id, previous, query.id
                        );
                    }
                    claimed.entry(chosen.base.id).or_insert(query.id);

                    let canonical = apply_match(&mut outcome.resolution, query, chosen.base);
                    info!("Changed division's ID from {} to {}", query.id, canonical);

                    DecisionRecord {
                        query_id: query.id,
                        outcome: Outcome::Accepted {
                            chosen_id: chosen.base.id,
                            score: chosen.value(),
                        },
                        candidates: candidates.len(),
                        actor: policy.actor().to_string(),
                    }
                }
                Decision::Abort => {
                    info!("Stopped at division {} ({}/{})", query.id, idx + 1, total);
                    outcome.aborted = true;
                    break;
                }
            };

            on_decision(&record)?;
            outcome.decisions.push(record);
        }

        info!("{}", outcome.summary());
        Ok(outcome)
    }
}

// ============================================================================
// TESTS
// ============================================================================
