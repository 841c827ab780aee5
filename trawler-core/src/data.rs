use rusqlite::{Connection, OptionalExtension, Result, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Run journal: one row per harvest run, one row per page it touched.
pub struct Journal {
    conn: Connection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Running,
    Completed,
    Aborted,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Aborted => "aborted",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(SessionStatus::Running),
            "completed" => Some(SessionStatus::Completed),
            "aborted" => Some(SessionStatus::Aborted),
            "cancelled" => Some(SessionStatus::Cancelled),
            "failed" => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: String,
    pub target: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: String,
    pub output_path: String,
    pub start_page: u32,
    pub total_pages: Option<u32>,
    pub records_written: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLogEntry {
    pub page_index: u32,
    pub status: String,
    pub origin: String,
    pub attempts: u32,
    pub records: u32,
    pub error: Option<String>,
    pub logged_at: i64,
}

fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn session_from_row(row: &rusqlite::Row<'_>) -> Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        target: row.get(1)?,
        start_time: row.get(2)?,
        end_time: row.get(3)?,
        status: row.get(4)?,
        output_path: row.get(5)?,
        start_page: row.get(6)?,
        total_pages: row.get(7)?,
        records_written: row.get::<_, i64>(8)? as u64,
    })
}

const SESSION_COLUMNS: &str =
    "id, target, start_time, end_time, status, output_path, start_page, total_pages, records_written";

impl Journal {
    pub fn drop(path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let journal = Journal { conn };
        journal.init_schema()?;
        Ok(journal)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let journal = Journal { conn };
        journal.init_schema()?;
        Ok(journal)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
CREATE TABLE IF NOT EXISTS run_sessions (
    id TEXT PRIMARY KEY,
    target TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'aborted', 'cancelled', 'failed')),
    output_path TEXT NOT NULL,
    start_page INTEGER NOT NULL DEFAULT 0,
    total_pages INTEGER,
    records_written INTEGER NOT NULL DEFAULT 0,
    configuration TEXT         -- job file as JSON
);

CREATE TABLE IF NOT EXISTS page_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    page_index INTEGER NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('success', 'blocked', 'failed')),
    origin TEXT NOT NULL CHECK(origin IN ('cache', 'network')),
    attempts INTEGER NOT NULL,
    records INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    logged_at INTEGER NOT NULL,
    FOREIGN KEY(session_id) REFERENCES run_sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_page_log_session ON page_log(session_id, page_index);
CREATE INDEX IF NOT EXISTS idx_sessions_target ON run_sessions(target);
            ",
        )
    }

    pub fn create_session(
        &self,
        target: &str,
        output_path: &str,
        start_page: u32,
        configuration: Option<&str>,
    ) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let timestamp = current_timestamp();

        self.conn.execute(
            "INSERT INTO run_sessions (id, target, start_time, status, output_path, start_page, configuration)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &session_id,
                target,
                timestamp,
                SessionStatus::Running.as_str(),
                output_path,
                start_page,
                configuration
            ],
        )?;

        Ok(session_id)
    }

    pub fn set_total_pages(&self, session_id: &str, total_pages: u32) -> Result<()> {
        self.conn.execute(
            "UPDATE run_sessions SET total_pages = ?1 WHERE id = ?2",
            params![total_pages, session_id],
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_page(
        &self,
        session_id: &str,
        page_index: u32,
        status: &str,
        origin: &str,
        attempts: u32,
        records: u32,
        error: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO page_log (session_id, page_index, status, origin, attempts, records, error, logged_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session_id,
                page_index,
                status,
                origin,
                attempts,
                records,
                error,
                current_timestamp()
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    pub fn finish_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        records_written: u64,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE run_sessions SET end_time = ?1, status = ?2, records_written = ?3 WHERE id = ?4",
            params![
                current_timestamp(),
                status.as_str(),
                records_written as i64,
                session_id
            ],
        )?;
        Ok(())
    }

    /// Newest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM run_sessions ORDER BY start_time DESC, rowid DESC",
            SESSION_COLUMNS
        ))?;

        let sessions = stmt
            .query_map([], session_from_row)?
            .collect::<Result<Vec<_>>>()?;

        Ok(sessions)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRow>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM run_sessions WHERE id = ?1", SESSION_COLUMNS),
                params![session_id],
                session_from_row,
            )
            .optional()
    }

    pub fn pages_for_session(&self, session_id: &str) -> Result<Vec<PageLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT page_index, status, origin, attempts, records, error, logged_at
             FROM page_log WHERE session_id = ?1 ORDER BY page_index, id",
        )?;

        let pages = stmt
            .query_map(params![session_id], |row| {
                Ok(PageLogEntry {
                    page_index: row.get(0)?,
                    status: row.get(1)?,
                    origin: row.get(2)?,
                    attempts: row.get(3)?,
                    records: row.get(4)?,
                    error: row.get(5)?,
                    logged_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        Ok(pages)
    }

    /// Highest page any run of `target` fetched successfully.
    pub fn last_completed_page(&self, target: &str) -> Result<Option<u32>> {
        self.conn.query_row(
            "SELECT MAX(p.page_index) FROM page_log p
             JOIN run_sessions s ON p.session_id = s.id
             WHERE s.target = ?1 AND p.status = 'success'",
            params![target],
            |row| row.get(0),
        )
    }
}
