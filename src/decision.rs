// Decision step - who says yes to a candidate?
//
// The linkage loop hands every query and its ranked candidates to a
// DecisionPolicy. Interactive prompts and automated rules share that seam.

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};

use crate::error::LinkageError;
use crate::model::{Division, Observation};
use crate::ranking::{MatchStrategy, RankedCandidate};

/// Variables shown per row when a human compares candidates (X1..X9)
pub const PREVIEW_VARIABLES: usize = 9;

pub const AUTO_ACCEPT_ACTOR: &str = "auto_accept";
pub const DRY_RUN_ACTOR: &str = "dry_run";

/// Actors that decide without a person looking at the candidates
pub fn is_automated_actor(actor: &str) -> bool {
    actor == AUTO_ACCEPT_ACTOR || actor == DRY_RUN_ACTOR
}

// ============================================================================
// DECISION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Query stays a division of its own
    Reject,

    /// Query continues the candidate at this index of the ranked list
    Accept(usize),

    /// Stop processing; decisions made so far are kept
    Abort,
}

/// Everything a policy gets to see for one query
pub struct DecisionContext<'a> {
    /// 1-based position of this query
    pub progress: usize,
    pub total: usize,
    pub query: &'a Division,

    /// Best candidate first
    pub candidates: &'a [RankedCandidate<'a>],
}

pub trait DecisionPolicy {
    fn decide(&mut self, ctx: &DecisionContext<'_>) -> Result<Decision>;

    /// Name recorded in the decision journal
    fn actor(&self) -> &str;
}

/// Interpret a typed response: `N`/`n` reject, `X`/`x` abort, a number accepts
/// that selection id.
pub fn parse_response(response: &str, candidates: usize) -> Result<Decision, LinkageError> {
    let response = response.trim();

    match response {
        "N" | "n" => return Ok(Decision::Reject),
        "X" | "x" => return Ok(Decision::Abort),
        _ => {}
    }

    match response.parse::<usize>() {
        Ok(index) if index < candidates => Ok(Decision::Accept(index)),
        _ => Err(LinkageError::InvalidSelection {
            response: response.to_string(),
            candidates,
        }),
    }
}

/// X1..X`count` as display strings, `NA` for missing
pub fn preview_values(ob: &Observation, count: usize) -> Vec<String> {
    (0..count)
        .map(|idx| match ob.variable(idx) {
            Some(v) => format!("{}", v),
            None => "NA".to_string(),
        })
        .collect()
}

// ============================================================================
// AUTOMATED POLICIES
// ============================================================================

/// Accept the best candidate when its score reaches `floor`
pub struct AutoAcceptPolicy {
    pub floor: f64,

    /// Only accept exact-match candidates, regardless of score
    pub exact_only: bool,
}

impl AutoAcceptPolicy {
    pub fn new(floor: f64) -> Self {
        AutoAcceptPolicy {
            floor,
            exact_only: false,
        }
    }
}

impl DecisionPolicy for AutoAcceptPolicy {
    fn decide(&mut self, ctx: &DecisionContext<'_>) -> Result<Decision> {
        let best = match ctx.candidates.first() {
            Some(best) => best,
            None => return Ok(Decision::Reject),
        };

        if self.exact_only && best.score.strategy != MatchStrategy::ExactMatch {
            return Ok(Decision::Reject);
        }

        // Two candidates at the top with the same score: leave it to a human
        if let Some(runner_up) = ctx.candidates.get(1) {
            if runner_up.value() == best.value() {
                warn!(
                    "division {}: bases {} and {} tie at {:.2}, not auto-accepting",
                    ctx.query.id,
                    best.base.id,
                    runner_up.base.id,
                    best.value()
                );
                return Ok(Decision::Reject);
            }
        }

        if best.value() >= self.floor {
            Ok(Decision::Accept(0))
        } else {
            Ok(Decision::Reject)
        }
    }

    fn actor(&self) -> &str {
        AUTO_ACCEPT_ACTOR
    }
}

/// Rejects everything; useful to list candidates without changing ids
pub struct RejectAllPolicy;

impl DecisionPolicy for RejectAllPolicy {
    fn decide(&mut self, _ctx: &DecisionContext<'_>) -> Result<Decision> {
        Ok(Decision::Reject)
    }

    fn actor(&self) -> &str {
        DRY_RUN_ACTOR
    }
}

// ============================================================================
// LINE PROMPT
// ============================================================================

/// Plain terminal prompt: prints the candidates and reads one answer per line
pub struct LinePrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LinePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        LinePrompt { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn write_row(&mut self, selection: Option<usize>, id: i64, ob: &Observation) -> Result<()> {
        let prefix = match selection {
            Some(sid) => format!("{}  |\t", sid),
            None => String::new(),
        };

        writeln!(
            self.output,
            "{}{}\t{}\t\t{}\t{}\t{}",
            prefix,
            id,
            ob.industry,
            ob.year,
            ob.name.as_deref().unwrap_or("NA"),
            preview_values(ob, PREVIEW_VARIABLES).join(";")
        )?;
        Ok(())
    }

    fn render(&mut self, ctx: &DecisionContext<'_>) -> Result<()> {
        writeln!(self.output, "[{}/{}]", ctx.progress, ctx.total)?;
        writeln!(self.output)?;
        writeln!(
            self.output,
            "SID\tID\tINDUSTRY\tYEAR\tNAME\t\tX1;X2;X3;X4;X5;X6;X7;X8;X9"
        )?;

        if ctx.candidates.is_empty() {
            writeln!(self.output)?;
            writeln!(self.output, "\t\t ===== NO MATCHES FOUND =====")?;
            writeln!(self.output)?;
        }

        for (sid, candidate) in ctx.candidates.iter().enumerate() {
            for ob in candidate.base.observations() {
                self.write_row(Some(sid), candidate.base.id, ob)?;
            }
            writeln!(
                self.output,
                "   score {:.2} - {}",
                candidate.value(),
                candidate.score.reason
            )?;
            writeln!(self.output)?;
        }

        writeln!(
            self.output,
            "|===== Should the following division connect with any of the above divisions? ====="
        )?;
        for ob in ctx.query.observations() {
            self.write_row(None, ctx.query.id, ob)?;
        }

        Ok(())
    }
}

impl<R: BufRead, W: Write> DecisionPolicy for LinePrompt<R, W> {
    fn decide(&mut self, ctx: &DecisionContext<'_>) -> Result<Decision> {
        self.render(ctx)?;

        loop {
            write!(self.output, "\nNO [N/n], YES [<SID>], EXIT & WRITE [X/x] : ")?;
            self.output.flush()?;

            let mut line = String::new();
            let read = self
                .input
                .read_line(&mut line)
                .context("Failed to read response")?;

            // End of input: stop and keep what has been decided
            if read == 0 {
                return Ok(Decision::Abort);
            }

            match parse_response(&line, ctx.candidates.len()) {
                Ok(decision) => return Ok(decision),
                Err(err) => {
                    warn!("{}", err);
                    writeln!(self.output, "Invalid response: {}", err)?;
                }
            }
        }
    }

    fn actor(&self) -> &str {
        "line_prompt"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::CandidateScore;
    use std::io::Cursor;

    fn division(id: i64, year: i32) -> Division {
        Division::with_observations(
            id,
            vec![Observation::empty(year, "V").with_name("ALFA LAVAL").with_variable(0, 12.0)],
        )
    }

    fn candidate(base: &Division, score: f64, strategy: MatchStrategy) -> RankedCandidate<'_> {
        RankedCandidate {
            base,
            pool_index: 0,
            score: CandidateScore {
                score,
                strategy,
                split_year: 1996,
                reason: "test".to_string(),
            },
        }
    }

    #[test]
    fn test_parse_response_keywords_and_numbers() {
        assert_eq!(parse_response("n", 2).unwrap(), Decision::Reject);
        assert_eq!(parse_response("N\n", 0).unwrap(), Decision::Reject);
        assert_eq!(parse_response(" X ", 2).unwrap(), Decision::Abort);
        assert_eq!(parse_response("1", 2).unwrap(), Decision::Accept(1));
    }

    #[test]
    fn test_parse_response_invalid_selection() {
        for bad in ["2", "-1", "yes", ""] {
            assert!(
                matches!(parse_response(bad, 2), Err(LinkageError::InvalidSelection { .. })),
                "accepted {bad:?}"
            );
        }
        assert!(parse_response("0", 0).is_err());
    }

    #[test]
    fn test_preview_values_marks_missing() {
        let ob = Observation::empty(1990, "V").with_variable(1, 4.5);
        assert_eq!(preview_values(&ob, 3), vec!["NA", "4.5", "NA"]);
    }

    #[test]
    fn test_only_unattended_policies_are_automated() {
        assert!(is_automated_actor(AutoAcceptPolicy::new(1000.0).actor()));
        assert!(is_automated_actor(RejectAllPolicy.actor()));

        let prompt = LinePrompt::new(std::io::empty(), Vec::new());
        assert!(!is_automated_actor(prompt.actor()));
    }

    #[test]
    fn test_auto_accept_policy() {
        let query = division(9, 1997);
        let exact = division(1, 1996);
        let fuzzy = division(2, 1995);

        let candidates = vec![
            candidate(&exact, 1000.0, MatchStrategy::ExactMatch),
            candidate(&fuzzy, 7.0, MatchStrategy::FuzzyMatch),
        ];
        let ctx = DecisionContext { progress: 1, total: 1, query: &query, candidates: &candidates };
        assert_eq!(AutoAcceptPolicy::new(1000.0).decide(&ctx).unwrap(), Decision::Accept(0));

        let weak = vec![candidate(&fuzzy, 7.0, MatchStrategy::FuzzyMatch)];
        let ctx = DecisionContext { progress: 1, total: 1, query: &query, candidates: &weak };
        assert_eq!(AutoAcceptPolicy::new(1000.0).decide(&ctx).unwrap(), Decision::Reject);

        let mut exact_only = AutoAcceptPolicy::new(5.0);
        exact_only.exact_only = true;
        assert_eq!(exact_only.decide(&ctx).unwrap(), Decision::Reject);

        let none: Vec<RankedCandidate> = Vec::new();
        let ctx = DecisionContext { progress: 1, total: 1, query: &query, candidates: &none };
        assert_eq!(AutoAcceptPolicy::new(0.0).decide(&ctx).unwrap(), Decision::Reject);
    }

    #[test]
    fn test_auto_accept_refuses_ties() {
        let query = division(9, 1997);
        let a = division(1, 1996);
        let b = division(2, 1996);
        let candidates = vec![
            candidate(&a, 1000.0, MatchStrategy::ExactMatch),
            candidate(&b, 1000.0, MatchStrategy::ExactMatch),
        ];
        let ctx = DecisionContext { progress: 1, total: 1, query: &query, candidates: &candidates };

        assert_eq!(AutoAcceptPolicy::new(1000.0).decide(&ctx).unwrap(), Decision::Reject);
    }

    #[test]
    fn test_line_prompt_reprompts_on_invalid_input() {
        let query = division(9, 1997);
        let base = division(1, 1996);
        let candidates = vec![candidate(&base, 1000.0, MatchStrategy::ExactMatch)];
        let ctx = DecisionContext { progress: 3, total: 10, query: &query, candidates: &candidates };

        let input = Cursor::new("maybe\n5\n0\n");
        let mut prompt = LinePrompt::new(input, Vec::new());

        assert_eq!(prompt.decide(&ctx).unwrap(), Decision::Accept(0));

        let output = String::from_utf8(prompt.into_output()).unwrap();
        assert!(output.starts_with("[3/10]"));
        assert!(output.contains("0  |\t1\tV"));
        assert!(output.contains("ALFA LAVAL"));
        assert_eq!(output.matches("Invalid response").count(), 2);
    }

    #[test]
    fn test_line_prompt_without_candidates() {
        let query = division(9, 1997);
        let none: Vec<RankedCandidate> = Vec::new();
        let ctx = DecisionContext { progress: 1, total: 1, query: &query, candidates: &none };

        let mut prompt = LinePrompt::new(Cursor::new("n\n"), Vec::new());
        assert_eq!(prompt.decide(&ctx).unwrap(), Decision::Reject);

        let output = String::from_utf8(prompt.into_output()).unwrap();
        assert!(output.contains("NO MATCHES FOUND"));
    }

    #[test]
    fn test_line_prompt_end_of_input_aborts() {
        let query = division(9, 1997);
        let none: Vec<RankedCandidate> = Vec::new();
        let ctx = DecisionContext { progress: 1, total: 1, query: &query, candidates: &none };

        let mut prompt = LinePrompt::new(Cursor::new(""), Vec::new());
        assert_eq!(prompt.decide(&ctx).unwrap(), Decision::Abort);
    }
}
