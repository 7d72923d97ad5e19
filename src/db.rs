use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Result};

pub const LEDGER_FILE: &str = "ledger.sqlite";

pub fn connect(dir: &Path) -> Result<Connection> {
    let conn = Connection::open(dir.join(LEDGER_FILE))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS captures (
            id             INTEGER PRIMARY KEY,
            run_id         TEXT NOT NULL,
            identifier     TEXT NOT NULL,
            source_url     TEXT NOT NULL,
            retrieved_at   TEXT NOT NULL,
            verdict        TEXT NOT NULL CHECK(verdict IN ('valid','quarantined')),
            content_length INTEGER NOT NULL,
            content_hash   TEXT NOT NULL,
            replaced       BOOLEAN NOT NULL DEFAULT 0,
            recorded_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_captures_identifier ON captures(identifier);
        CREATE INDEX IF NOT EXISTS idx_captures_run ON captures(run_id);

        CREATE TABLE IF NOT EXISTS runs (
            run_id       TEXT PRIMARY KEY,
            started_at   TEXT NOT NULL,
            finished_at  TEXT NOT NULL,
            summary_json TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

// ── Captures ──

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRow {
    pub run_id: String,
    pub identifier: String,
    pub source_url: String,
    pub retrieved_at: String,
    pub verdict: String,
    pub content_length: i64,
    pub content_hash: String,
    pub replaced: bool,
}

pub fn record_capture(conn: &Connection, row: &CaptureRow) -> Result<()> {
    conn.execute(
        "INSERT INTO captures
         (run_id, identifier, source_url, retrieved_at, verdict, content_length, content_hash, replaced)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            row.run_id, row.identifier, row.source_url, row.retrieved_at,
            row.verdict, row.content_length, row.content_hash, row.replaced,
        ],
    )?;
    Ok(())
}

/// Every capture of `identifier`, oldest first.
pub fn capture_history(conn: &Connection, identifier: &str) -> Result<Vec<CaptureRow>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, identifier, source_url, retrieved_at, verdict, content_length, content_hash, replaced
         FROM captures WHERE identifier = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([identifier], |row| {
            Ok(CaptureRow {
                run_id: row.get(0)?,
                identifier: row.get(1)?,
                source_url: row.get(2)?,
                retrieved_at: row.get(3)?,
                verdict: row.get(4)?,
                content_length: row.get(5)?,
                content_hash: row.get(6)?,
                replaced: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

/// Source URLs with a quarantined capture in the latest run that touched them.
/// Listing rows without a detail link share the page URL, so a valid row
/// must not hide a quarantined sibling from the same run.
pub fn quarantined_sources(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT c.source_url
         FROM captures c
         WHERE c.verdict = 'quarantined'
           AND c.run_id = (SELECT run_id FROM captures
                           WHERE source_url = c.source_url
                           ORDER BY id DESC LIMIT 1)
         GROUP BY c.source_url
         ORDER BY MIN(c.id)",
    )?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

// ── Runs ──

pub fn record_run(
    conn: &Connection,
    run_id: &str,
    started_at: &str,
    finished_at: &str,
    summary_json: &str,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO runs (run_id, started_at, finished_at, summary_json)
         VALUES (?1, ?2, ?3, ?4)",
        params![run_id, started_at, finished_at, summary_json],
    )?;
    Ok(())
}

/// Summary JSON of the `limit` most recent runs, newest first.
pub fn recent_runs(conn: &Connection, limit: usize) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT summary_json FROM runs ORDER BY started_at DESC LIMIT ?1")?;
    let rows = stmt
        .query_map([limit as i64], |row| row.get(0))?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn last_run_id(conn: &Connection) -> Result<Option<String>> {
    conn.query_row(
        "SELECT run_id FROM runs ORDER BY started_at DESC LIMIT 1",
        [],
        |row| row.get(0),
    )
    .optional()
}

// ── Stats ──

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LedgerStats {
    pub captures: i64,
    pub identifiers: i64,
    pub quarantined: i64,
    pub replacements: i64,
    pub runs: i64,
}

pub fn stats(conn: &Connection) -> Result<LedgerStats> {
    let (captures, identifiers, quarantined, replacements) = conn.query_row(
        "SELECT COUNT(*),
                COUNT(DISTINCT NULLIF(identifier, '')),
                COALESCE(SUM(verdict = 'quarantined'), 0),
                COALESCE(SUM(replaced), 0)
         FROM captures",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;
    let runs = conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
    Ok(LedgerStats {
        captures,
        identifiers,
        quarantined,
        replacements,
        runs,
    })
}
