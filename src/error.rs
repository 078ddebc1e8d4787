// Linkage errors - typed failures for ingestion, ranking and decisions
//
// Everything above the engine (CLI, file IO) wraps these in anyhow with context.

use std::fmt;

use crate::model::DivisionId;

#[derive(Debug, Clone, PartialEq)]
pub enum LinkageError {
    /// Record does not carry exactly the expected number of variables,
    /// or a numeric cell cannot be parsed.
    MalformedRecord {
        line: usize,
        id: String,
        year: Option<i32>,
        reason: String,
    },

    /// Record has an empty id cell.
    MissingIdentifier { line: usize },

    /// Decision step returned a selection outside the ranked list,
    /// or a response that is neither a number nor a keyword.
    InvalidSelection { response: String, candidates: usize },

    /// A division with no observations reached year-based logic.
    EmptyDivision(DivisionId),

    /// Industry code has no market mapping.
    UnknownIndustry(String),

    /// Configuration value out of range.
    InvalidConfig(String),
}

impl fmt::Display for LinkageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedRecord { line, id, year, reason } => match year {
                Some(year) => write!(f, "malformed row at line {line} (id: {id}, year: {year}): {reason}"),
                None => write!(f, "malformed row at line {line} (id: {id}): {reason}"),
            },
            Self::MissingIdentifier { line } => write!(f, "observation at line {line} has no id"),
            Self::InvalidSelection { response, candidates } => {
                if *candidates == 0 {
                    write!(f, "invalid response '{response}': no candidates to select")
                } else {
                    write!(f, "invalid response '{response}': expected N, X or 0..={}", candidates - 1)
                }
            }
            Self::EmptyDivision(id) => write!(f, "division {id} has no observations"),
            Self::UnknownIndustry(code) => write!(f, "invalid industry code: '{code}'"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for LinkageError {}
