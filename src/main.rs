use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use rusqlite::Connection;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use panel_linkage::db::{load_decisions, open_journal, record_decision, replay_map};
use panel_linkage::diagnostics::{
    coverage_report, detect_restructures, interval_coverage, key_listing, render_coverage,
    render_intervals, render_key, render_restructures, YearSpan, RESTRUCTURE_THRESHOLD,
    RESTRUCTURE_VARIABLE,
};
use panel_linkage::{
    fingerprint, write_divisions, AutoAcceptPolicy, DecisionPolicy, LinePrompt, LinkageConfig,
    LinkageEngine, LinkageError, Market, PanelData, PanelFormat, RejectAllPolicy,
};

#[derive(Parser)]
#[command(name = "panel-linkage", version, about = "Link panel-survey divisions across an id change")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct InputArgs {
    /// Panel CSV file
    input: PathBuf,

    /// Field separator
    #[arg(long, default_value_t = ',')]
    separator: char,

    /// Short layout (id, industry, year, X1..X65)
    #[arg(long)]
    short: bool,
}

impl InputArgs {
    fn format(&self) -> Result<PanelFormat> {
        if !self.separator.is_ascii() {
            bail!("Separator must be a single ASCII character, got {:?}", self.separator);
        }
        Ok(PanelFormat::new(self.separator as u8, !self.short))
    }

    fn load(&self) -> Result<PanelData> {
        let panel = PanelData::parse_csv(&self.input, self.format()?)?;
        info!(
            "Loaded {} divisions ({} observations) from {}",
            panel.len(),
            panel.observation_count(),
            self.input.display()
        );
        Ok(panel)
    }
}

#[derive(Args)]
struct SpanArgs {
    /// First year of the panel span
    #[arg(long, default_value_t = panel_linkage::MIN_YEAR)]
    first_year: i32,

    /// Last year of the panel span
    #[arg(long, default_value_t = panel_linkage::MAX_YEAR)]
    last_year: i32,
}

/// Which divisions go into the cross-section files
#[derive(Args)]
struct SelectionArgs {
    /// Years to export (default: every year in the panel)
    #[arg(long, value_delimiter = ',')]
    years: Vec<i32>,

    /// Industry codes to keep, e.g. `K,V`
    #[arg(long, value_delimiter = ',', value_parser = parse_market)]
    markets: Vec<Market>,

    /// First year a kept division must cover
    #[arg(long, requires = "interval_end")]
    interval_start: Option<i32>,

    /// Last year a kept division must cover
    #[arg(long, requires = "interval_start")]
    interval_end: Option<i32>,

    /// Require every year of the interval, not just its endpoints
    #[arg(long, requires = "interval_start")]
    hard: bool,
}

impl SelectionArgs {
    fn apply(&self, panel: &mut PanelData) -> Result<()> {
        if !self.years.is_empty() {
            panel.filter_years(&self.years);
        }
        if !self.markets.is_empty() {
            panel.filter_markets(&self.markets)?;
        }
        if let (Some(low), Some(high)) = (self.interval_start, self.interval_end) {
            if low > high {
                bail!("Interval start {} is after its end {}", low, high);
            }
            panel.filter_interval(low, high, self.hard);
        }
        Ok(())
    }
}

fn parse_market(code: &str) -> Result<Market, LinkageError> {
    Market::from_industry(code)
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PolicyKind {
    /// Full-screen terminal prompt
    Tui,
    /// Line-oriented prompt on stdin/stdout
    Prompt,
    /// Accept the best candidate above the configured floor
    Auto,
    /// Reject everything (dry run)
    None,
}

#[derive(Subcommand)]
enum Command {
    /// Link divisions first reporting at or after the cutoff to earlier ones
    Link {
        #[command(flatten)]
        input: InputArgs,

        /// Where to write the relabelled panel
        #[arg(short, long)]
        output: PathBuf,

        /// JSON file with scoring parameters
        #[arg(long)]
        config: Option<PathBuf>,

        /// Who decides on each candidate list
        #[arg(long, value_enum)]
        policy: Option<PolicyKind>,

        /// SQLite journal of decisions
        #[arg(long)]
        journal: Option<PathBuf>,

        /// Replay decisions journaled for this input file
        #[arg(long, requires = "journal")]
        resume: bool,
    },

    /// Observations, missing years and gaps per division
    Coverage {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        span: SpanArgs,
    },

    /// Number of divisions covering each year interval
    Intervals {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        span: SpanArgs,
    },

    /// Large jumps in one variable between reported years
    Restructures {
        #[command(flatten)]
        input: InputArgs,

        /// Variable number (1-based, X1..X65)
        #[arg(long, default_value_t = RESTRUCTURE_VARIABLE + 1)]
        variable: usize,

        #[arg(long, default_value_t = RESTRUCTURE_THRESHOLD)]
        threshold: f64,
    },

    /// Division ids with their latest name
    Key {
        #[command(flatten)]
        input: InputArgs,

        /// Tab-separated instead of `;`
        #[arg(long)]
        tabs: bool,
    },

    /// One file per year
    CrossSections {
        #[command(flatten)]
        input: InputArgs,

        /// Output directory
        #[arg(short, long)]
        out_dir: PathBuf,

        #[command(flatten)]
        selection: SelectionArgs,
    },
}

/// The full-screen prompt shares the terminal with stderr, so only
/// warnings get through while it runs (unless RUST_LOG says otherwise)
fn default_log_filter(command: &Command) -> &'static str {
    match command {
        Command::Link { policy, .. } if policy.unwrap_or_else(default_policy) == PolicyKind::Tui => {
            "warn"
        }
        _ => "info",
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_log_filter(&cli.command)),
    )
    .init();

    match cli.command {
        Command::Link {
            input,
            output,
            config,
            policy,
            journal,
            resume,
        } => run_link(&input, &output, config, policy, journal, resume),
        Command::Coverage { input, span } => {
            let span = YearSpan::new(span.first_year, span.last_year);
            let panel = input.load()?;
            print!("{}", render_coverage(&coverage_report(panel.divisions(), span), span));
            Ok(())
        }
        Command::Intervals { input, span } => {
            let span = YearSpan::new(span.first_year, span.last_year);
            let panel = input.load()?;
            print!("{}", render_intervals(&interval_coverage(panel.divisions(), span)));
            Ok(())
        }
        Command::Restructures {
            input,
            variable,
            threshold,
        } => {
            if variable == 0 || variable > panel_linkage::N_VARIABLES {
                bail!("Variable must be between 1 and {}", panel_linkage::N_VARIABLES);
            }
            let panel = input.load()?;
            let found = detect_restructures(panel.divisions(), variable - 1, threshold);
            info!("Found {} restructures", found.len());
            print!("{}", render_restructures(&found));
            Ok(())
        }
        Command::Key { input, tabs } => {
            let panel = input.load()?;
            let separator = if tabs { '\t' } else { ';' };
            print!("{}", render_key(&key_listing(panel.divisions()), separator));
            Ok(())
        }
        Command::CrossSections {
            input,
            out_dir,
            selection,
        } => run_cross_sections(&input, &out_dir, &selection),
    }
}

fn run_link(
    input: &InputArgs,
    output: &Path,
    config_path: Option<PathBuf>,
    policy: Option<PolicyKind>,
    journal_path: Option<PathBuf>,
    resume: bool,
) -> Result<()> {
    let config = match config_path {
        Some(path) => LinkageConfig::from_file(path)?,
        None => LinkageConfig::default(),
    };

    let format = input.format()?;
    let panel = input.load()?;
    let dataset = fingerprint(&input.input)?;

    let journal: Option<Connection> = journal_path.as_ref().map(open_journal).transpose()?;

    let prior = match (&journal, resume) {
        (Some(conn), true) => {
            let entries = load_decisions(conn, &dataset)?;
            info!("Replaying {} journaled decisions", entries.len());
            replay_map(&entries)
        }
        _ => HashMap::new(),
    };

    let engine = LinkageEngine::new(config)?;
    let pools = engine.split(panel.into_divisions())?;

    let outcome = {
        let mut policy = make_policy(policy.unwrap_or_else(default_policy), engine.config())?;

        engine.resume_with(&pools, policy.as_mut(), &prior, |record| match &journal {
            Some(conn) => record_decision(conn, &dataset, record),
            None => Ok(()),
        })?
    };

    let divisions = pools.into_relabelled(&outcome.resolution);
    let file = File::create(output)
        .with_context(|| format!("Failed to create output file: {}", output.display()))?;
    write_divisions(&divisions, file, format, None)?;

    println!("{}", outcome.summary());
    println!("✓ Wrote {} divisions to {}", divisions.len(), output.display());

    Ok(())
}

fn default_policy() -> PolicyKind {
    if cfg!(feature = "tui") {
        PolicyKind::Tui
    } else {
        PolicyKind::Prompt
    }
}

fn make_policy(kind: PolicyKind, config: &LinkageConfig) -> Result<Box<dyn DecisionPolicy>> {
    Ok(match kind {
        PolicyKind::Tui => tui_policy()?,
        PolicyKind::Prompt => Box::new(LinePrompt::new(io::stdin().lock(), io::stdout())),
        PolicyKind::Auto => Box::new(AutoAcceptPolicy::new(config.auto_accept_floor)),
        PolicyKind::None => Box::new(RejectAllPolicy),
    })
}

#[cfg(feature = "tui")]
fn tui_policy() -> Result<Box<dyn DecisionPolicy>> {
    Ok(Box::new(panel_linkage::ui::TuiPrompt::new()?))
}

#[cfg(not(feature = "tui"))]
fn tui_policy() -> Result<Box<dyn DecisionPolicy>> {
    bail!("TUI not available. Build with --features tui, or use --policy prompt")
}

fn run_cross_sections(input: &InputArgs, out_dir: &Path, selection: &SelectionArgs) -> Result<()> {
    let format = input.format()?;
    let mut panel = input.load()?;

    selection.apply(&mut panel)?;
    info!("{} divisions selected for export", panel.len());

    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create directory: {}", out_dir.display()))?;

    let years: Vec<i32> = if selection.years.is_empty() {
        panel.years().into_iter().collect()
    } else {
        selection.years.clone()
    };

    for year in years {
        let path = out_dir.join(format!("cross_section_{}.csv", year));
        panel.write_csv(&path, format, Some(year))?;
        println!("✓ {} -> {}", year, path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use panel_linkage::{Division, Observation};

    fn selection(args: &[&str]) -> SelectionArgs {
        let mut argv = vec!["panel-linkage", "cross-sections", "panel.csv", "-o", "out"];
        argv.extend_from_slice(args);
        match Cli::parse_from(argv).command {
            Command::CrossSections { selection, .. } => selection,
            _ => panic!("expected cross-sections"),
        }
    }

    fn sample_panel() -> PanelData {
        let make = |id, industry: &str, years: &[i32]| {
            Division::with_observations(
                id,
                years.iter().map(|y| Observation::empty(*y, industry)).collect(),
            )
        };
        PanelData::new(vec![
            make(1, "K", &[1990, 1991, 1992]),
            make(2, "V", &[1990, 1992]),
            make(3, "R", &[1991]),
        ])
    }

    #[test]
    fn test_tui_link_logs_warnings_only() {
        let cli = Cli::parse_from(["panel-linkage", "link", "in.csv", "-o", "out.csv", "--policy", "tui"]);
        assert_eq!(default_log_filter(&cli.command), "warn");

        let cli = Cli::parse_from(["panel-linkage", "link", "in.csv", "-o", "out.csv", "--policy", "auto"]);
        assert_eq!(default_log_filter(&cli.command), "info");

        let cli = Cli::parse_from(["panel-linkage", "key", "in.csv"]);
        assert_eq!(default_log_filter(&cli.command), "info");
    }

    #[test]
    fn test_cross_section_selection_filters_panel() {
        let mut panel = sample_panel();
        selection(&["--markets", "K,V", "--interval-start", "1990", "--interval-end", "1992", "--hard"])
            .apply(&mut panel)
            .unwrap();
        let ids: Vec<_> = panel.divisions().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1]);

        let mut panel = sample_panel();
        selection(&["--years", "1991"]).apply(&mut panel).unwrap();
        let ids: Vec<_> = panel.divisions().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(panel.years().into_iter().collect::<Vec<_>>(), vec![1991]);
    }

    #[test]
    fn test_cross_section_selection_rejects_bad_input() {
        let argv = ["panel-linkage", "cross-sections", "p.csv", "-o", "out", "--markets", "Q"];
        assert!(Cli::try_parse_from(argv).is_err());

        let mut panel = sample_panel();
        let backwards = selection(&["--interval-start", "1992", "--interval-end", "1990"]);
        assert!(backwards.apply(&mut panel).is_err());
        assert_eq!(panel, sample_panel());
    }
}
