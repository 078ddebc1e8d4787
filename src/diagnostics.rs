// 🩺 Panel Diagnostics - coverage, intervals, restructures, id key
// Read-only reports over the divisions of a panel.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::model::{Division, DivisionId, MAX_YEAR, MIN_YEAR};

// ============================================================================
// YEAR SPAN
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearSpan {
    pub first: i32,
    pub last: i32,
}

impl YearSpan {
    pub fn new(first: i32, last: i32) -> Self {
        YearSpan { first, last }
    }

    pub fn len(&self) -> usize {
        if self.last < self.first {
            0
        } else {
            (self.last - self.first + 1) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.first..=self.last
    }
}

impl Default for YearSpan {
    fn default() -> Self {
        YearSpan::new(MIN_YEAR, MAX_YEAR)
    }
}

// ============================================================================
// COVERAGE REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageRow {
    pub id: DivisionId,
    pub observations: usize,

    /// Years of the span without an observation
    pub missing: usize,

    pub gaps: usize,
    pub name: Option<String>,
}

/// Per-division coverage, most observations first
pub fn coverage_report(divisions: &[Division], span: YearSpan) -> Vec<CoverageRow> {
    let mut rows: Vec<CoverageRow> = divisions
        .iter()
        .map(|division| CoverageRow {
            id: division.id,
            observations: division.len(),
            missing: span.years().filter(|y| !division.has_year(*y)).count(),
            gaps: division.gap_count(),
            name: division.latest_name().map(str::to_string),
        })
        .collect();

    rows.sort_by(|a, b| b.observations.cmp(&a.observations));
    rows
}

pub fn render_coverage(rows: &[CoverageRow], span: YearSpan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "ID\tOBSERVATIONS\tGAPS\tNAME");
    let _ = writeln!(out, "  \t(MISSING) (x/{})", span.len());
    let _ = writeln!(out);

    for row in rows {
        let _ = writeln!(
            out,
            "{}\t{} ({})\t\t{}\t{}",
            row.id,
            row.observations,
            row.missing,
            row.gaps,
            row.name.as_deref().unwrap_or("")
        );
    }
    out
}

// ============================================================================
// INTERVAL COVERAGE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalCount {
    pub low: i32,
    pub high: i32,

    /// Divisions with an observation in every year of `low..=high`
    pub count: usize,
}

impl IntervalCount {
    pub fn length(&self) -> i32 {
        self.high - self.low
    }
}

/// Hard coverage for every interval inside `span`, longest intervals first
pub fn interval_coverage(divisions: &[Division], span: YearSpan) -> Vec<IntervalCount> {
    let mut counts = Vec::new();

    for low in span.years() {
        for high in low..=span.last {
            counts.push(IntervalCount {
                low,
                high,
                count: divisions
                    .iter()
                    .filter(|d| d.in_interval(low, high, true))
                    .count(),
            });
        }
    }

    counts.sort_by(|a, b| b.length().cmp(&a.length()));
    counts
}

pub fn render_intervals(counts: &[IntervalCount]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "INTERVAL\tLENGTH\tCOUNT\tCOUNT VISUALISATION");

    for c in counts {
        // one bar segment per 2.5 divisions
        let bar = "=".repeat((c.count as f64 * 0.4).ceil() as usize);
        let _ = writeln!(out, "{}-{}\t{}\t{}\t{}", c.low, c.high, c.length(), c.count, bar);
    }
    out
}

// ============================================================================
// RESTRUCTURE DETECTION
// ============================================================================

/// Default variable inspected for restructures (X2, employees)
pub const RESTRUCTURE_VARIABLE: usize = 1;

/// Default ratio above which a jump is reported
pub const RESTRUCTURE_THRESHOLD: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restructure {
    pub id: DivisionId,
    pub year: i32,
    pub variable: usize,
    pub previous: f64,
    pub value: f64,

    /// value / previous
    pub change: f64,

    pub name: Option<String>,
}

/// Jumps between consecutive reported values of `variable`.
///
/// Divisions whose first observation lacks the variable are skipped, as are
/// missing values and zero predecessors.
pub fn detect_restructures(divisions: &[Division], variable: usize, threshold: f64) -> Vec<Restructure> {
    let mut found = Vec::new();

    for division in divisions {
        let mut previous = match division.first().and_then(|ob| ob.variable(variable)) {
            Some(v) => v,
            None => continue,
        };

        for ob in division.observations().iter().skip(1) {
            let value = match ob.variable(variable) {
                Some(v) => v,
                None => continue,
            };

            if previous != 0.0 {
                let change = value / previous;
                if change.abs() > threshold {
                    found.push(Restructure {
                        id: division.id,
                        year: ob.year,
                        variable,
                        previous,
                        value,
                        change,
                        name: ob.display_name().map(str::to_string),
                    });
                }
            }

            previous = value;
        }
    }

    found
}

pub fn render_restructures(found: &[Restructure]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "ID\tYEAR\tVARIABLE\t\t\t\tNAME");
    let _ = writeln!(out, "{}", "-".repeat(83));

    for r in found {
        let _ = writeln!(
            out,
            "{}\t{}\tX{} ({:.0}%)\t{} -> {}\t\t{}",
            r.id,
            r.year,
            r.variable + 1,
            r.change * 100.0,
            r.previous,
            r.value,
            r.name.as_deref().unwrap_or("")
        );
    }
    out
}

// ============================================================================
// KEY LISTING
// ============================================================================

/// (id, latest non-blank name); divisions that never had a name are left out
pub fn key_listing(divisions: &[Division]) -> Vec<(DivisionId, String)> {
    divisions
        .iter()
        .filter_map(|d| d.latest_name().map(|name| (d.id, name.to_string())))
        .collect()
}

pub fn render_key(entries: &[(DivisionId, String)], separator: char) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "id{}name", separator);
    for (id, name) in entries {
        let _ = writeln!(out, "{}{}{}", id, separator, name);
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================
