// Panel Linkage - Core Library
// Reconnects survey divisions whose id changed across a reporting cutoff

pub mod error;
pub mod model;
pub mod interval;      // Eligibility of a base as predecessor
pub mod proximity;     // Tolerance-banded value comparison
pub mod tokens;        // Name-token overlap
pub mod config;
pub mod ranking;       // Candidate scoring and ordering
pub mod decision;      // Policies: prompt, auto, dry run
pub mod linkage;       // Session driver and id resolution
pub mod panel;         // CSV ingestion / export
pub mod db;            // Decision journal
pub mod diagnostics;

// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
pub mod ui;

// Re-export commonly used types
pub use error::LinkageError;
pub use model::{Division, DivisionId, Market, Observation, MAX_YEAR, MIN_YEAR, N_VARIABLES};
pub use interval::{is_eligible_base, split_observation};
pub use proximity::ProximityScorer;
pub use tokens::NameTokenScorer;
pub use config::{IdScheme, LinkageConfig, SlotPair};
pub use ranking::{CandidateRanker, CandidateScore, MatchStrategy, RankedCandidate};
pub use decision::{
    parse_response, AutoAcceptPolicy, Decision, DecisionContext, DecisionPolicy, LinePrompt,
    RejectAllPolicy,
};
pub use linkage::{
    apply_match, DecisionRecord, IdResolution, LinkageEngine, LinkageOutcome, Outcome, Pools,
};
pub use panel::{fingerprint, write_divisions, PanelData, PanelFormat};
pub use db::{
    load_decisions, open_journal, record_decision, record_decisions, replay_map, setup_database,
    JournalEntry,
};
pub use diagnostics::{
    coverage_report, detect_restructures, interval_coverage, key_listing, CoverageRow,
    IntervalCount, Restructure, YearSpan,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
