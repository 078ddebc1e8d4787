// 🖥️ Terminal prompt - full-screen candidate review
//
// Candidates are listed best first, each with its whole history. Digits +
// Enter accept a selection id, arrows move the highlight and Enter on an empty
// input accepts the highlighted candidate. `n` rejects, `x` stops the session.

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::warn;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io::{self, Stdout};

use crate::decision::{
    parse_response, preview_values, Decision, DecisionContext, DecisionPolicy, PREVIEW_VARIABLES,
};
use crate::model::{Division, Observation};
use crate::ranking::{MatchStrategy, RankedCandidate};

// ============================================================================
// PROMPT STATE
// ============================================================================

/// Keyboard state for one query, independent of the terminal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptState {
    /// Digits typed so far
    pub input: String,

    /// Highlighted candidate
    pub selected: Option<usize>,

    /// Feedback for the last rejected input
    pub message: Option<String>,
}

impl PromptState {
    pub fn new(candidates: usize) -> Self {
        PromptState {
            selected: if candidates > 0 { Some(0) } else { None },
            ..PromptState::default()
        }
    }

    pub fn next(&mut self, candidates: usize) {
        if candidates == 0 {
            return;
        }
        let i = match self.selected {
            Some(i) if i + 1 < candidates => i + 1,
            _ => 0,
        };
        self.selected = Some(i);
    }

    pub fn previous(&mut self, candidates: usize) {
        if candidates == 0 {
            return;
        }
        let i = match self.selected {
            Some(0) | None => candidates - 1,
            Some(i) => i - 1,
        };
        self.selected = Some(i);
    }

    /// Apply one key; returns the decision once the user has made one
    pub fn handle_key(&mut self, code: KeyCode, candidates: usize) -> Option<Decision> {
        match code {
            KeyCode::Char(c) if c.is_ascii_digit() => {
                self.input.push(c);
                self.message = None;
                None
            }
            KeyCode::Char('n') | KeyCode::Char('N') => Some(Decision::Reject),
            KeyCode::Char('x') | KeyCode::Char('X') => Some(Decision::Abort),
            KeyCode::Backspace => {
                self.input.pop();
                None
            }
            KeyCode::Esc => {
                self.input.clear();
                self.message = None;
                None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.next(candidates);
                None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.previous(candidates);
                None
            }
            KeyCode::Enter => self.submit(candidates),
            _ => None,
        }
    }

    fn submit(&mut self, candidates: usize) -> Option<Decision> {
        if self.input.is_empty() {
            return match self.selected {
                Some(i) if i < candidates => Some(Decision::Accept(i)),
                _ => {
                    self.message = Some("No candidates, press n to reject".to_string());
                    None
                }
            };
        }

        let typed = std::mem::take(&mut self.input);
        match parse_response(&typed, candidates) {
            Ok(decision) => Some(decision),
            Err(err) => {
                warn!("{}", err);
                self.message = Some(format!("Invalid response: {}", err));
                None
            }
        }
    }
}

/// Table row of the first observation of each candidate
fn candidate_row_offsets(candidates: &[RankedCandidate<'_>]) -> Vec<usize> {
    candidates
        .iter()
        .scan(0, |offset, c| {
            let start = *offset;
            *offset += c.base.len().max(1);
            Some(start)
        })
        .collect()
}

// ============================================================================
// TERMINAL PROMPT
// ============================================================================

pub struct TuiPrompt {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TuiPrompt {
    /// Switch the terminal to raw mode and the alternate screen
    pub fn new() -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        Ok(TuiPrompt { terminal })
    }
}

impl Drop for TuiPrompt {
    fn drop(&mut self) {
        // Restore terminal
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

impl DecisionPolicy for TuiPrompt {
    fn decide(&mut self, ctx: &DecisionContext<'_>) -> Result<Decision> {
        let mut state = PromptState::new(ctx.candidates.len());

        loop {
            self.terminal.draw(|f| ui(f, ctx, &state))?;

            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if let Some(decision) = state.handle_key(key.code, ctx.candidates.len()) {
                    return Ok(decision);
                }
            }
        }
    }

    fn actor(&self) -> &str {
        "tui_prompt"
    }
}

// ============================================================================
// RENDERING
// ============================================================================

fn ui(f: &mut Frame, ctx: &DecisionContext<'_>, state: &PromptState) {
    let query_height = ctx.query.len() as u16 + 3;

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),            // Progress header
            Constraint::Min(5),               // Candidates
            Constraint::Length(query_height), // Division being linked
            Constraint::Length(3),            // Input line
        ])
        .split(f.size());

    render_header(f, chunks[0], ctx);
    render_candidates(f, chunks[1], ctx, state);
    render_query(f, chunks[2], ctx.query);
    render_input(f, chunks[3], state);
}

fn render_header(f: &mut Frame, area: Rect, ctx: &DecisionContext<'_>) {
    let mut spans = vec![
        Span::styled(
            format!("[{}/{}]", ctx.progress, ctx.total),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  |  "),
        Span::styled(
            format!("Division {}", ctx.query.id),
            Style::default().fg(Color::White),
        ),
        Span::raw("  |  "),
    ];

    let exact = ctx
        .candidates
        .iter()
        .filter(|c| c.score.strategy == MatchStrategy::ExactMatch)
        .count();
    spans.push(Span::styled(
        format!("{} candidates ({} exact)", ctx.candidates.len(), exact),
        Style::default().fg(Color::Cyan),
    ));

    let header = Paragraph::new(vec![Line::from(spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );

    f.render_widget(header, area);
}

fn column_widths() -> Vec<Constraint> {
    let mut widths = vec![
        Constraint::Length(4),  // SID
        Constraint::Length(9),  // ID
        Constraint::Length(4),  // Industry
        Constraint::Length(5),  // Year
        Constraint::Length(24), // Name
    ];
    widths.extend(std::iter::repeat(Constraint::Length(9)).take(PREVIEW_VARIABLES));
    widths.push(Constraint::Length(8)); // Score
    widths
}

fn header_row() -> Row<'static> {
    let cells = ["SID", "ID", "IND", "YEAR", "NAME"]
        .iter()
        .map(|h| h.to_string())
        .chain((1..=PREVIEW_VARIABLES).map(|i| format!("X{}", i)))
        .chain(std::iter::once("SCORE".to_string()))
        .map(|h| {
            Cell::from(h).style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
        });

    Row::new(cells.collect::<Vec<_>>())
        .style(Style::default().bg(Color::DarkGray))
        .height(1)
}

fn observation_row(
    sid: Option<usize>,
    id: i64,
    ob: &Observation,
    score: Option<f64>,
    color: Color,
) -> Row<'static> {
    let mut cells = vec![
        Cell::from(sid.map(|s| s.to_string()).unwrap_or_default()),
        Cell::from(id.to_string()),
        Cell::from(ob.industry.clone()),
        Cell::from(ob.year.to_string()),
        Cell::from(truncate(ob.display_name().unwrap_or("NA"), 23)),
    ];
    cells.extend(
        preview_values(ob, PREVIEW_VARIABLES)
            .into_iter()
            .map(Cell::from),
    );
    cells.push(Cell::from(score.map(|s| format!("{:.2}", s)).unwrap_or_default()));

    Row::new(cells).style(Style::default().fg(color)).height(1)
}

fn render_candidates(f: &mut Frame, area: Rect, ctx: &DecisionContext<'_>, state: &PromptState) {
    if ctx.candidates.is_empty() {
        let empty = Paragraph::new(vec![
            Line::from(""),
            Line::from(Span::styled(
                "  ===== NO MATCHES FOUND =====",
                Style::default().fg(Color::DarkGray),
            )),
        ])
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .title(" Candidates "),
        );
        f.render_widget(empty, area);
        return;
    }

    let mut rows = Vec::new();
    for (sid, candidate) in ctx.candidates.iter().enumerate() {
        // Alternate colours so each candidate's history reads as one block
        let color = if sid % 2 == 0 { Color::Cyan } else { Color::White };

        for (i, ob) in candidate.base.observations().iter().enumerate() {
            let first = i == 0;
            rows.push(observation_row(
                first.then_some(sid),
                candidate.base.id,
                ob,
                first.then(|| candidate.value()),
                color,
            ));
        }
    }

    let offsets = candidate_row_offsets(ctx.candidates);
    let mut table_state = TableState::default();
    table_state.select(state.selected.and_then(|i| offsets.get(i).copied()));

    let table = Table::new(rows, column_widths())
        .header(header_row())
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .title(" Candidates (best first) "),
        )
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut table_state);
}

fn render_query(f: &mut Frame, area: Rect, query: &Division) {
    let rows: Vec<Row> = query
        .observations()
        .iter()
        .map(|ob| observation_row(None, query.id, ob, None, Color::Green))
        .collect();

    let table = Table::new(rows, column_widths()).header(header_row()).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green))
            .title(" Should this division connect with any of the above? "),
    );

    f.render_widget(table, area);
}

fn render_input(f: &mut Frame, area: Rect, state: &PromptState) {
    let mut spans = vec![
        Span::raw(" NO "),
        Span::styled("[n]", Style::default().fg(Color::Red)),
        Span::raw("  YES "),
        Span::styled("[<SID>] / Enter", Style::default().fg(Color::Green)),
        Span::raw("  EXIT & WRITE "),
        Span::styled("[x]", Style::default().fg(Color::Yellow)),
        Span::raw("  : "),
        Span::styled(
            state.input.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        ),
    ];

    if let Some(message) = &state.message {
        spans.push(Span::raw("   "));
        spans.push(Span::styled(message.clone(), Style::default().fg(Color::Red)));
    }

    let input = Paragraph::new(vec![Line::from(spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(input, area);
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

// ============================================================================
// TESTS
// ============================================================================
