// 📓 Decision Journal - every accept/reject is an event
//
// SQLite keeps one row per decision, keyed by the dataset fingerprint, so a
// session that was aborted (or crashed) can be resumed against the same file.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::decision::is_automated_actor;
use crate::linkage::{DecisionRecord, Outcome};
use crate::model::DivisionId;

const OUTCOME_ACCEPT: &str = "accept";
const OUTCOME_REJECT: &str = "reject";

/// Journal row for one decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,

    /// SHA-256 of the panel file the decision was made on
    pub fingerprint: String,

    pub query_id: DivisionId,
    pub outcome: Outcome,
    pub candidates: usize,
    pub actor: String,
}

impl JournalEntry {
    pub fn new(fingerprint: &str, record: &DecisionRecord) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            fingerprint: fingerprint.to_string(),
            query_id: record.query_id,
            outcome: record.outcome.clone(),
            candidates: record.candidates,
            actor: record.actor.clone(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS decisions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            query_id INTEGER NOT NULL,
            outcome TEXT NOT NULL CHECK (outcome IN ('accept', 'reject')),
            chosen_id INTEGER,
            score REAL,
            candidates INTEGER NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_decisions_fingerprint ON decisions(fingerprint, query_id)",
        [],
    )?;

    Ok(())
}

/// Open (or create) a journal file and make sure the schema exists
pub fn open_journal<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let path = path.as_ref();
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open journal: {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn insert_entry(conn: &Connection, entry: &JournalEntry) -> Result<()> {
    let (outcome, chosen_id, score) = match &entry.outcome {
        Outcome::Accepted { chosen_id, score } => (OUTCOME_ACCEPT, Some(*chosen_id), Some(*score)),
        Outcome::Rejected => (OUTCOME_REJECT, None, None),
    };

    conn.execute(
        "INSERT INTO decisions (
            event_id, timestamp, fingerprint, query_id, outcome, chosen_id, score, candidates, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            entry.event_id,
            entry.timestamp.to_rfc3339(),
            entry.fingerprint,
            entry.query_id,
            outcome,
            chosen_id,
            score,
            entry.candidates as i64,
            entry.actor,
        ],
    )?;

    Ok(())
}

/// Journal one decision made on the dataset `fingerprint`
pub fn record_decision(conn: &Connection, fingerprint: &str, record: &DecisionRecord) -> Result<()> {
    insert_entry(conn, &JournalEntry::new(fingerprint, record))
}

/// Journal several decisions in one transaction
pub fn record_decisions(
    conn: &Connection,
    fingerprint: &str,
    records: &[DecisionRecord],
) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    for record in records {
        insert_entry(&tx, &JournalEntry::new(fingerprint, record))?;
    }
    tx.commit()?;
    Ok(records.len())
}

/// All decisions for a dataset, oldest first
pub fn load_decisions(conn: &Connection, fingerprint: &str) -> Result<Vec<JournalEntry>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, fingerprint, query_id, outcome, chosen_id, score, candidates, actor
         FROM decisions
         WHERE fingerprint = ?1
         ORDER BY id ASC",
    )?;

    let entries = stmt
        .query_map(params![fingerprint], |row| {
            let timestamp_str: String = row.get(1)?;
            let outcome_str: String = row.get(4)?;
            let chosen_id: Option<i64> = row.get(5)?;
            let score: Option<f64> = row.get(6)?;
            let candidates: i64 = row.get(7)?;

            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
                .with_timezone(&Utc);

            let outcome = match (outcome_str.as_str(), chosen_id) {
                (OUTCOME_ACCEPT, Some(chosen_id)) => Outcome::Accepted {
                    chosen_id,
                    score: score.unwrap_or_default(),
                },
                (OUTCOME_REJECT, _) => Outcome::Rejected,
                (other, _) => {
                    return Err(rusqlite::Error::FromSqlConversionFailure(
                        4,
                        Type::Text,
                        format!("unreadable outcome {:?}", other).into(),
                    ))
                }
            };

            Ok(JournalEntry {
                event_id: row.get(0)?,
                timestamp,
                fingerprint: row.get(2)?,
                query_id: row.get(3)?,
                outcome,
                candidates: candidates.max(0) as usize,
                actor: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

/// Outcome per query; a later entry for the same query wins.
///
/// Rejections by automated actors are not replayed: those queries go back
/// to whoever decides in the resumed session.
pub fn replay_map(entries: &[JournalEntry]) -> HashMap<DivisionId, Outcome> {
    entries
        .iter()
        .filter(|entry| {
            !(entry.outcome == Outcome::Rejected && is_automated_actor(&entry.actor))
        })
        .map(|entry| (entry.query_id, entry.outcome.clone()))
        .collect()
}

pub fn count_decisions(conn: &Connection, fingerprint: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM decisions WHERE fingerprint = ?1",
        params![fingerprint],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkageConfig;
    use crate::decision::{AutoAcceptPolicy, Decision, DecisionContext, DecisionPolicy};
    use crate::linkage::LinkageEngine;
    use crate::model::{Division, Observation};

    fn accepted(query_id: i64, chosen_id: i64) -> DecisionRecord {
        DecisionRecord {
            query_id,
            outcome: Outcome::Accepted { chosen_id, score: 1000.0 },
            candidates: 2,
            actor: "line_prompt".to_string(),
        }
    }

    fn rejected(query_id: i64) -> DecisionRecord {
        DecisionRecord {
            query_id,
            outcome: Outcome::Rejected,
            candidates: 0,
            actor: "tui_prompt".to_string(),
        }
    }

    #[test]
    fn test_decisions_round_trip() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        record_decision(&conn, "abc", &accepted(300, 100)).unwrap();
        record_decision(&conn, "abc", &rejected(400)).unwrap();

        let entries = load_decisions(&conn, "abc").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].query_id, 300);
        assert_eq!(entries[0].outcome, Outcome::Accepted { chosen_id: 100, score: 1000.0 });
        assert_eq!(entries[0].actor, "line_prompt");
        assert_eq!(entries[1].outcome, Outcome::Rejected);
        assert_eq!(entries[0].event_id.len(), 36);
    }

    #[test]
    fn test_fingerprints_are_separate() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        record_decisions(&conn, "one", &[accepted(1, 2), rejected(3)]).unwrap();
        record_decisions(&conn, "two", &[rejected(1)]).unwrap();

        assert_eq!(count_decisions(&conn, "one").unwrap(), 2);
        assert_eq!(count_decisions(&conn, "two").unwrap(), 1);
        assert!(load_decisions(&conn, "three").unwrap().is_empty());
    }

    #[test]
    fn test_replay_prefers_latest_entry() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        record_decision(&conn, "fp", &rejected(7)).unwrap();
        record_decision(&conn, "fp", &accepted(7, 5)).unwrap();
        record_decision(&conn, "fp", &accepted(8, 5)).unwrap();
        record_decision(&conn, "fp", &rejected(8)).unwrap();

        let replay = replay_map(&load_decisions(&conn, "fp").unwrap());
        assert_eq!(replay.len(), 2);
        assert!(matches!(replay[&7], Outcome::Accepted { chosen_id: 5, .. }));
        assert_eq!(replay[&8], Outcome::Rejected);
    }

    #[test]
    fn test_automated_rejections_are_not_replayed() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let mut auto = rejected(7);
        auto.actor = "auto_accept".to_string();
        let mut dry_run = rejected(8);
        dry_run.actor = "dry_run".to_string();
        let mut auto_accepted = accepted(10, 1);
        auto_accepted.actor = "auto_accept".to_string();

        record_decisions(&conn, "fp", &[auto, dry_run, rejected(9), auto_accepted]).unwrap();

        let replay = replay_map(&load_decisions(&conn, "fp").unwrap());
        assert_eq!(replay.len(), 2);
        assert_eq!(replay[&9], Outcome::Rejected);
        assert!(replay.contains_key(&10));
        assert!(!replay.contains_key(&7));
        assert!(!replay.contains_key(&8));
    }

    /// Remembers which queries it was shown, rejects them all
    struct Analyst {
        shown: Vec<i64>,
    }

    impl DecisionPolicy for Analyst {
        fn decide(&mut self, ctx: &DecisionContext<'_>) -> Result<Decision> {
            self.shown.push(ctx.query.id);
            Ok(Decision::Reject)
        }

        fn actor(&self) -> &str {
            "line_prompt"
        }
    }

    #[test]
    fn test_auto_pass_then_human_resume() {
        fn ob(year: i32, values: &[(usize, f64)]) -> Observation {
            values
                .iter()
                .fold(Observation::empty(year, "V"), |ob, (idx, v)| ob.with_variable(*idx, *v))
        }

        let divisions = vec![
            // fuzzy predecessor of 300 (score 1.8)
            Division::with_observations(100, vec![ob(1995, &[(1, 80.0), (4, 500.0)])]),
            // exact predecessor of 400
            Division::with_observations(200, vec![ob(1996, &[(7, 100.0)])]),
            Division::with_observations(300, vec![ob(1997, &[(0, 80.0), (3, 500.0)])]),
            Division::with_observations(400, vec![ob(1997, &[(6, 100.0)])]),
        ];

        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let engine = LinkageEngine::new(LinkageConfig::default()).unwrap();
        let pools = engine.split(divisions).unwrap();

        let mut auto = AutoAcceptPolicy::new(1000.0);
        let first = engine
            .resume_with(&pools, &mut auto, &HashMap::new(), |record| {
                record_decision(&conn, "fp", record)
            })
            .unwrap();
        assert_eq!(first.accepted(), 1);
        assert_eq!(count_decisions(&conn, "fp").unwrap(), 2);

        let prior = replay_map(&load_decisions(&conn, "fp").unwrap());
        let mut human = Analyst { shown: Vec::new() };
        let second = engine.resume(&pools, &mut human, &prior).unwrap();

        assert_eq!(human.shown, vec![300]);
        assert_eq!(second.replayed, 1);
        assert_eq!(second.resolution.resolve(400), 200);
    }

    #[test]
    fn test_journal_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.db");

        {
            let conn = open_journal(&path).unwrap();
            record_decision(&conn, "fp", &accepted(11, 10)).unwrap();
        }

        let conn = open_journal(&path).unwrap();
        assert_eq!(count_decisions(&conn, "fp").unwrap(), 1);
    }
}
