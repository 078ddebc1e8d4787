// Name-token similarity - shared name fragments across a division's history
//
// A firm's recorded name drifts a little from year to year, but some tokens
// (the company name itself) stay put. Every name of every year goes into one
// set per division; each shared, non-generic token earns a fixed bonus.

use std::collections::{BTreeSet, HashSet};

use crate::model::Division;

pub struct NameTokenScorer {
    stopwords: HashSet<String>,
    bonus_per_token: u32,
}

impl NameTokenScorer {
    pub fn new<I, S>(stopwords: I, bonus_per_token: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        NameTokenScorer {
            stopwords: stopwords.into_iter().map(Into::into).collect(),
            bonus_per_token,
        }
    }

    /// All whitespace-separated tokens of every name in the division
    pub fn tokenize(division: &Division) -> BTreeSet<&str> {
        division
            .observations()
            .iter()
            .filter_map(|ob| ob.name.as_deref())
            .flat_map(str::split_whitespace)
            .collect()
    }

    /// Shared tokens that count as evidence, in sorted order
    pub fn shared_tokens<'a>(&self, base: &'a Division, query: &Division) -> Vec<&'a str> {
        let query_tokens = Self::tokenize(query);

        Self::tokenize(base)
            .into_iter()
            .filter(|token| query_tokens.contains(token))
            .filter(|token| !self.stopwords.contains(*token))
            .collect()
    }

    /// Bonus points for name overlap between `base` and `query`
    pub fn token_overlap_bonus(&self, base: &Division, query: &Division) -> u32 {
        self.shared_tokens(base, query).len() as u32 * self.bonus_per_token
    }
}

// ============================================================================
// TESTS
// ============================================================================
