use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::calendar::MonthWindow;
use crate::discovery::DiscoveredEvent;
use crate::sets::GameRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Pending,
    Done,
    Doubles,
    Failed,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Done => "done",
            EventStatus::Doubles => "doubles",
            EventStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(EventStatus::Pending),
            "done" => Some(EventStatus::Done),
            "doubles" => Some(EventStatus::Doubles),
            "failed" => Some(EventStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Download,
    Import,
}

impl RunKind {
    fn as_str(self) -> &'static str {
        match self {
            RunKind::Download => "download",
            RunKind::Import => "import",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunTotals {
    pub events_total: usize,
    pub events_succeeded: usize,
    pub games_inserted: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LastRun {
    pub kind: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub games_inserted: usize,
    pub error_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DatasetStats {
    pub events_by_status: Vec<(String, usize)>,
    pub games: usize,
    pub imported_games: usize,
    pub windows_completed: usize,
    pub characters_seen: usize,
    pub last_run: Option<LastRun>,
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS events (
            event_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            tournament TEXT NOT NULL,
            created_at INTEGER NULL,
            status TEXT NOT NULL,
            last_error TEXT NULL,
            games INTEGER NOT NULL DEFAULT 0,
            discovered_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_status ON events(status);

        CREATE TABLE IF NOT EXISTS games (
            set_id TEXT NOT NULL,
            game_index INTEGER NOT NULL,
            event_id INTEGER NULL,
            char1 TEXT NULL,
            char2 TEXT NULL,
            stage TEXT NULL,
            winner_side INTEGER NOT NULL,
            entrant1 TEXT NULL,
            entrant2 TEXT NULL,
            source TEXT NOT NULL,
            inserted_at TEXT NOT NULL,
            PRIMARY KEY (set_id, game_index)
        );
        CREATE INDEX IF NOT EXISTS idx_games_event ON games(event_id);
        CREATE INDEX IF NOT EXISTS idx_games_chars ON games(char1, char2);

        CREATE TABLE IF NOT EXISTS windows (
            window_start TEXT PRIMARY KEY,
            window_end TEXT NOT NULL,
            events_found INTEGER NOT NULL,
            pages INTEGER NOT NULL,
            completed_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ingest_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NULL,
            events_total INTEGER NOT NULL,
            events_succeeded INTEGER NOT NULL,
            games_inserted INTEGER NOT NULL,
            errors_json TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// Returns true when the event was not known before.
pub fn record_discovered_event(conn: &Connection, event: &DiscoveredEvent) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let changed = conn
        .execute(
            "INSERT OR IGNORE INTO events
                (event_id, name, tournament, created_at, status, last_error, games, discovered_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, 0, ?6, ?6)",
            params![
                event.id as i64,
                event.name,
                event.tournament,
                event.created_at,
                EventStatus::Pending.as_str(),
                now,
            ],
        )
        .context("insert discovered event")?;
    Ok(changed == 1)
}

/// Pending events, plus failed ones when `retry_failed` is set, oldest first.
pub fn events_to_download(
    conn: &Connection,
    retry_failed: bool,
    limit: Option<usize>,
) -> Result<Vec<u64>> {
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let mut stmt = conn
        .prepare(
            "SELECT event_id FROM events
             WHERE status = ?1 OR (?2 = 1 AND status = ?3)
             ORDER BY created_at ASC, event_id ASC
             LIMIT ?4",
        )
        .context("prepare pending events query")?;
    let rows = stmt
        .query_map(
            params![
                EventStatus::Pending.as_str(),
                i64::from(retry_failed),
                EventStatus::Failed.as_str(),
                limit
            ],
            |row| row.get::<_, i64>(0),
        )
        .context("query pending events")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode event id")? as u64);
    }
    Ok(out)
}

pub fn event_status(conn: &Connection, event_id: u64) -> Result<Option<EventStatus>> {
    let raw = conn
        .query_row(
            "SELECT status FROM events WHERE event_id = ?1",
            params![event_id as i64],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .context("query event status")?;
    Ok(raw.as_deref().and_then(EventStatus::parse))
}

pub fn mark_event(
    conn: &Connection,
    event_id: u64,
    status: EventStatus,
    games: usize,
    error: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE events SET status = ?1, games = games + ?2, last_error = ?3, updated_at = ?4
         WHERE event_id = ?5",
        params![
            status.as_str(),
            games as i64,
            error,
            Utc::now().to_rfc3339(),
            event_id as i64
        ],
    )
    .context("update event status")?;
    Ok(())
}

/// Inserts records that are not stored yet and returns how many were new.
pub fn insert_games(conn: &Connection, records: &[GameRecord], source: &str) -> Result<usize> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT OR IGNORE INTO games
                (set_id, game_index, event_id, char1, char2, stage, winner_side, entrant1, entrant2, source, inserted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .context("prepare insert game")?;
    let now = Utc::now().to_rfc3339();
    let mut inserted = 0usize;
    for r in records {
        inserted += stmt
            .execute(params![
                r.set_id,
                r.game_index as i64,
                r.event_id.map(|id| id as i64),
                r.char1,
                r.char2,
                r.stage,
                i64::from(r.winner_side),
                r.entrant1,
                r.entrant2,
                source,
                now,
            ])
            .context("insert game")?;
    }
    Ok(inserted)
}

pub fn load_games(conn: &Connection) -> Result<Vec<GameRecord>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT set_id, game_index, event_id, char1, char2, stage, winner_side, entrant1, entrant2
            FROM games
            ORDER BY event_id ASC, set_id ASC, game_index ASC
            "#,
        )
        .context("prepare load games query")?;

    let rows = stmt
        .query_map([], |row| {
            Ok(GameRecord {
                set_id: row.get(0)?,
                game_index: row.get::<_, i64>(1)? as u32,
                event_id: row.get::<_, Option<i64>>(2)?.map(|id| id as u64),
                char1: row.get(3)?,
                char2: row.get(4)?,
                stage: row.get(5)?,
                winner_side: row.get::<_, i64>(6)? as u8,
                entrant1: row.get(7)?,
                entrant2: row.get(8)?,
            })
        })
        .context("query load games")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode game row")?);
    }
    Ok(out)
}

pub fn window_completed(conn: &Connection, window: &MonthWindow) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM windows WHERE window_start = ?1",
            params![window.key()],
            |_| Ok(()),
        )
        .optional()
        .context("query window")?;
    Ok(found.is_some())
}

pub fn mark_window_completed(
    conn: &Connection,
    window: &MonthWindow,
    events_found: usize,
    pages: u32,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO windows(window_start, window_end, events_found, pages, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            window.key(),
            window.end.format("%Y-%m-%d").to_string(),
            events_found as i64,
            i64::from(pages),
            Utc::now().to_rfc3339()
        ],
    )
    .context("record completed window")?;
    Ok(())
}

pub fn begin_run(conn: &Connection, kind: RunKind) -> Result<i64> {
    conn.execute(
        "INSERT INTO ingest_runs(kind, started_at, finished_at, events_total, events_succeeded, games_inserted, errors_json)
         VALUES (?1, ?2, NULL, 0, 0, 0, '[]')",
        params![kind.as_str(), Utc::now().to_rfc3339()],
    )
    .context("insert ingest run")?;
    Ok(conn.last_insert_rowid())
}

pub fn finish_run(conn: &Connection, run_id: i64, totals: &RunTotals) -> Result<()> {
    let errors_json = serde_json::to_string(&totals.errors).unwrap_or_else(|_| "[]".to_string());
    let changed = conn
        .execute(
            "UPDATE ingest_runs
             SET finished_at = ?1, events_total = ?2, events_succeeded = ?3, games_inserted = ?4, errors_json = ?5
             WHERE run_id = ?6",
            params![
                Utc::now().to_rfc3339(),
                totals.events_total as i64,
                totals.events_succeeded as i64,
                totals.games_inserted as i64,
                errors_json,
                run_id
            ],
        )
        .context("update ingest run")?;
    if changed != 1 {
        return Err(anyhow!("ingest run {run_id} not found"));
    }
    Ok(())
}

pub fn stats(conn: &Connection) -> Result<DatasetStats> {
    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM events GROUP BY status ORDER BY status")
        .context("prepare event stats")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })
        .context("query event stats")?;
    let mut events_by_status = Vec::new();
    for row in rows {
        events_by_status.push(row.context("decode event stats")?);
    }

    let count = |sql: &str| -> Result<usize> {
        conn.query_row(sql, [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .with_context(|| format!("count query: {sql}"))
    };

    let last_run = conn
        .query_row(
            "SELECT kind, started_at, finished_at, games_inserted, errors_json
             FROM ingest_runs ORDER BY run_id DESC LIMIT 1",
            [],
            |row| {
                let errors_json: String = row.get(4)?;
                Ok(LastRun {
                    kind: row.get(0)?,
                    started_at: row.get(1)?,
                    finished_at: row.get(2)?,
                    games_inserted: row.get::<_, i64>(3)? as usize,
                    error_count: serde_json::from_str::<Vec<String>>(&errors_json)
                        .map(|e| e.len())
                        .unwrap_or_default(),
                })
            },
        )
        .optional()
        .context("query last run")?;

    Ok(DatasetStats {
        events_by_status,
        games: count("SELECT COUNT(*) FROM games")?,
        imported_games: count("SELECT COUNT(*) FROM games WHERE source != 'api'")?,
        windows_completed: count("SELECT COUNT(*) FROM windows")?,
        characters_seen: count(
            "SELECT COUNT(*) FROM (SELECT char1 AS c FROM games WHERE char1 IS NOT NULL
                                   UNION SELECT char2 FROM games WHERE char2 IS NOT NULL)",
        )?,
        last_run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn record(set_id: &str, game_index: u32, char1: &str) -> GameRecord {
        GameRecord {
            set_id: set_id.to_string(),
            game_index,
            event_id: Some(1),
            char1: Some(char1.to_string()),
            char2: Some("Link".to_string()),
            stage: None,
            winner_side: 1,
            entrant1: None,
            entrant2: None,
        }
    }

    #[test]
    fn games_are_insert_once() {
        let conn = memory_db();
        assert_eq!(insert_games(&conn, &[record("s", 1, "Mario")], "api").unwrap(), 1);
        assert_eq!(insert_games(&conn, &[record("s", 1, "Wario")], "api").unwrap(), 0);
        let games = load_games(&conn).unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].char1.as_deref(), Some("Mario"));
    }

    #[test]
    fn rediscovery_keeps_status() {
        let conn = memory_db();
        let event = DiscoveredEvent {
            id: 5,
            name: "Weekly".to_string(),
            tournament: "T".to_string(),
            created_at: Some(10),
        };
        assert!(record_discovered_event(&conn, &event).unwrap());
        mark_event(&conn, 5, EventStatus::Done, 3, None).unwrap();
        assert!(!record_discovered_event(&conn, &event).unwrap());
        assert_eq!(event_status(&conn, 5).unwrap(), Some(EventStatus::Done));
        assert!(events_to_download(&conn, true, None).unwrap().is_empty());
    }

    #[test]
    fn failed_events_are_retried_only_on_request() {
        let conn = memory_db();
        for id in [1u64, 2] {
            let event = DiscoveredEvent {
                id,
                name: String::new(),
                tournament: String::new(),
                created_at: Some(id as i64),
            };
            record_discovered_event(&conn, &event).unwrap();
        }
        mark_event(&conn, 1, EventStatus::Failed, 0, Some("boom")).unwrap();
        assert_eq!(events_to_download(&conn, false, None).unwrap(), vec![2]);
        assert_eq!(events_to_download(&conn, true, None).unwrap(), vec![1, 2]);
        assert_eq!(events_to_download(&conn, true, Some(1)).unwrap(), vec![1]);
    }
}
