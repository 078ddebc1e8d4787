// 📥 Panel Data - CSV ingestion, export and panel-wide filters
//
// Two layouts, both with a header row:
//   full:  id, code, industry, sni, year, name, X1..X65
//   short: id, industry, year, X1..X65
// Empty cells and "NA" are missing values.

use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use crate::error::LinkageError;
use crate::model::{Division, DivisionId, Market, Observation, N_VARIABLES};

/// Marker for a missing cell
pub const MISSING_MARKER: &str = "NA";

// ============================================================================
// FORMAT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelFormat {
    pub separator: u8,

    /// Full layout carries code, SNI and name columns
    pub full_data: bool,
}

impl PanelFormat {
    pub fn new(separator: u8, full_data: bool) -> Self {
        PanelFormat {
            separator,
            full_data,
        }
    }

    fn leading_columns(&self) -> &'static [&'static str] {
        if self.full_data {
            &["id", "code", "industry", "sni", "year", "name"]
        } else {
            &["id", "industry", "year"]
        }
    }

    pub fn column_count(&self) -> usize {
        self.leading_columns().len() + N_VARIABLES
    }

    pub fn header(&self) -> Vec<String> {
        self.leading_columns()
            .iter()
            .map(|c| c.to_string())
            .chain((1..=N_VARIABLES).map(|i| format!("X{}", i)))
            .collect()
    }
}

impl Default for PanelFormat {
    fn default() -> Self {
        PanelFormat::new(b',', true)
    }
}

// ============================================================================
// PANEL DATA
// ============================================================================

/// All divisions of a panel, sorted by id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelData {
    divisions: Vec<Division>,
}

impl PanelData {
    pub fn new(mut divisions: Vec<Division>) -> Self {
        divisions.sort_by_key(|d| d.id);
        PanelData { divisions }
    }

    /// Parse a panel file
    pub fn parse_csv<P: AsRef<Path>>(path: P, format: PanelFormat) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open panel file: {}", path.display()))?;

        Self::from_reader(file, format)
            .with_context(|| format!("Failed to parse panel file: {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R, format: PanelFormat) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(format.separator)
            .flexible(true)
            .from_reader(reader);

        let mut divisions: Vec<Division> = Vec::new();
        let mut index_by_id: HashMap<DivisionId, usize> = HashMap::new();

        for (row, result) in reader.records().enumerate() {
            let record = result.with_context(|| format!("Failed to read CSV line {}", row + 2))?;
            let line = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(row + 2);

            let (id, observation) = parse_record(&record, line, format)?;

            match index_by_id.get(&id) {
                Some(&idx) => divisions[idx].push(observation),
                None => {
                    index_by_id.insert(id, divisions.len());
                    divisions.push(Division::with_observations(id, vec![observation]));
                }
            }
        }

        Ok(PanelData::new(divisions))
    }

    /// Write the panel; with `year` set only that cross-section is written
    pub fn write_csv<P: AsRef<Path>>(
        &self,
        path: P,
        format: PanelFormat,
        year: Option<i32>,
    ) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;

        self.to_writer(file, format, year)
    }

    pub fn to_writer<W: Write>(&self, writer: W, format: PanelFormat, year: Option<i32>) -> Result<()> {
        write_divisions(&self.divisions, writer, format, year)
    }

    pub fn divisions(&self) -> &[Division] {
        &self.divisions
    }

    pub fn into_divisions(self) -> Vec<Division> {
        self.divisions
    }

    pub fn len(&self) -> usize {
        self.divisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.divisions.is_empty()
    }

    pub fn observation_count(&self) -> usize {
        self.divisions.iter().map(Division::len).sum()
    }

    /// Every year that occurs in the panel
    pub fn years(&self) -> BTreeSet<i32> {
        self.divisions
            .iter()
            .flat_map(|d| d.observations().iter().map(|ob| ob.year))
            .collect()
    }

    // ========================================================================
    // FILTERS
    // ========================================================================

    /// Keep only observations in `years`; divisions left empty are dropped
    pub fn filter_years(&mut self, years: &[i32]) {
        for division in &mut self.divisions {
            division.retain_years(years);
        }
        self.divisions.retain(|d| !d.is_empty());
    }

    /// Keep divisions belonging to one of `markets`. On an unknown industry
    /// code the panel is left as it was.
    pub fn filter_markets(&mut self, markets: &[Market]) -> Result<(), LinkageError> {
        let keep = self
            .divisions
            .iter()
            .map(|d| d.market().map(|m| markets.contains(&m)))
            .collect::<Result<Vec<bool>, _>>()?;

        let mut keep = keep.into_iter();
        self.divisions.retain(|_| keep.next().unwrap_or(false));
        Ok(())
    }

    /// Keep divisions covering `low..=high` (see `Division::in_interval`)
    pub fn filter_interval(&mut self, low: i32, high: i32, hard: bool) {
        self.divisions.retain(|d| d.in_interval(low, high, hard));
    }
}

/// Write divisions in the given order
pub fn write_divisions<W: Write>(
    divisions: &[Division],
    writer: W,
    format: PanelFormat,
    year: Option<i32>,
) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(format.separator)
        .from_writer(writer);

    writer.write_record(format.header())?;

    for division in divisions {
        for ob in division.observations() {
            if year.map_or(false, |y| y != ob.year) {
                continue;
            }
            writer.write_record(format_record(division.id, ob, format))?;
        }
    }

    writer.flush().context("Failed to flush panel output")?;
    Ok(())
}

/// SHA-256 of a file's bytes, used to recognise the same dataset across sessions
pub fn fingerprint<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// RECORD CODEC
// ============================================================================

fn is_missing(cell: &str) -> bool {
    let cell = cell.trim();
    cell.is_empty() || cell == MISSING_MARKER
}

fn malformed(line: usize, id: &str, year: Option<i32>, reason: String) -> LinkageError {
    LinkageError::MalformedRecord {
        line,
        id: id.to_string(),
        year,
        reason,
    }
}

fn parse_record(
    record: &StringRecord,
    line: usize,
    format: PanelFormat,
) -> Result<(DivisionId, Observation), LinkageError> {
    let raw_id = record.get(0).unwrap_or("").trim();
    if is_missing(raw_id) {
        return Err(LinkageError::MissingIdentifier { line });
    }

    if record.len() != format.column_count() {
        return Err(malformed(
            line,
            raw_id,
            None,
            format!("expected {} fields, found {}", format.column_count(), record.len()),
        ));
    }

    let id: DivisionId = raw_id
        .parse()
        .map_err(|_| malformed(line, raw_id, None, format!("invalid id {:?}", raw_id)))?;

    let field = |idx: usize| record.get(idx).unwrap_or("");
    let (industry_col, year_col) = if format.full_data { (2, 4) } else { (1, 2) };
    let first_variable = format.column_count() - N_VARIABLES;

    let raw_year = field(year_col).trim();
    if is_missing(raw_year) {
        return Err(malformed(line, raw_id, None, "missing year".to_string()));
    }
    let year: i32 = raw_year
        .parse()
        .map_err(|_| malformed(line, raw_id, None, format!("invalid year {:?}", raw_year)))?;

    let mut variables = Vec::with_capacity(N_VARIABLES);
    for slot in 0..N_VARIABLES {
        let cell = field(first_variable + slot).trim();
        if is_missing(cell) {
            variables.push(None);
            continue;
        }
        let value: f64 = cell.parse().map_err(|_| {
            malformed(
                line,
                raw_id,
                Some(year),
                format!("invalid value {:?} in X{}", cell, slot + 1),
            )
        })?;
        variables.push(Some(value));
    }

    let mut observation = Observation::new(year, field(industry_col).trim(), variables)
        .map_err(|err| match err {
            LinkageError::MalformedRecord { year, reason, .. } => malformed(line, raw_id, year, reason),
            other => other,
        })?;

    if format.full_data {
        let code = Some(field(1).trim())
            .filter(|c| !is_missing(c))
            .map(str::to_string);

        let raw_sni = field(3).trim();
        let sni = if is_missing(raw_sni) {
            None
        } else {
            Some(raw_sni.parse::<i32>().map_err(|_| {
                malformed(line, raw_id, Some(year), format!("invalid SNI {:?}", raw_sni))
            })?)
        };

        observation = observation.with_classification(code, sni);

        // "NA" is an absent name; an empty cell is a present, empty name
        let name = field(5);
        if name.trim() != MISSING_MARKER {
            observation = observation.with_name(name);
        }
    }

    Ok((id, observation))
}

fn format_value(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn format_record(id: DivisionId, ob: &Observation, format: PanelFormat) -> Vec<String> {
    let mut fields = vec![id.to_string()];

    if format.full_data {
        fields.push(ob.code.clone().unwrap_or_default());
        fields.push(ob.industry.clone());
        fields.push(ob.sni.map(|s| s.to_string()).unwrap_or_default());
        fields.push(ob.year.to_string());
        fields.push(
            ob.name
                .clone()
                .unwrap_or_else(|| MISSING_MARKER.to_string()),
        );
    } else {
        fields.push(ob.industry.clone());
        fields.push(ob.year.to_string());
    }

    fields.extend(ob.variables().iter().map(|v| format_value(*v)));
    fields
}

// ============================================================================
// TESTS
// ============================================================================
