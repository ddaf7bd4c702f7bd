mod db;
#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::types::ProofJobRecord;
use proof_gateway_core::JobStatus;

/// SQLite-backed persistent store for `ProofJobRecord`s and the singleton
/// active-job pointer. Records are small (no receipt bytes live here; those
/// go through the `ArtifactStore`) so each is kept as one JSON column
/// alongside a few indexed columns used for status counts and pruning scans.
pub(crate) struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    pub(crate) fn open(data_dir: &Path) -> Result<Self, String> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| format!("failed to create data dir {}: {e}", data_dir.display()))?;

        let db_path = data_dir.join("gateway.db");
        let conn = Connection::open(&db_path)
            .map_err(|e| format!("failed to open SQLite at {}: {e}", db_path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;
             PRAGMA synchronous=NORMAL;",
        )
        .map_err(|e| format!("failed to set pragmas: {e}"))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS jobs (
                job_id       TEXT PRIMARY KEY,
                status       TEXT NOT NULL,
                created_at   INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL,
                completed_at INTEGER,
                record_json  TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
             CREATE INDEX IF NOT EXISTS idx_jobs_completed_at ON jobs(completed_at);

             CREATE TABLE IF NOT EXISTS active_job (
                id     INTEGER PRIMARY KEY CHECK (id = 0),
                job_id TEXT
             );
             INSERT OR IGNORE INTO active_job (id, job_id) VALUES (0, NULL);",
        )
        .map_err(|e| format!("failed to create schema: {e}"))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub(crate) fn open_in_memory() -> Self {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE jobs (
                job_id       TEXT PRIMARY KEY,
                status       TEXT NOT NULL,
                created_at   INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL,
                completed_at INTEGER,
                record_json  TEXT NOT NULL
             );
             CREATE TABLE active_job (
                id     INTEGER PRIMARY KEY CHECK (id = 0),
                job_id TEXT
             );
             INSERT INTO active_job (id, job_id) VALUES (0, NULL);",
        )
        .unwrap();
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub(crate) fn insert(&self, record: &ProofJobRecord) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        db::insert_row(&conn, record)
    }

    pub(crate) fn replace(&self, record: &ProofJobRecord) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        db::replace_row(&conn, record)
    }

    pub(crate) fn get(&self, job_id: Uuid) -> Result<Option<ProofJobRecord>, String> {
        let conn = self.conn.lock().unwrap();
        db::get_row(&conn, job_id)
    }

    pub(crate) fn delete(&self, job_id: Uuid) -> Result<bool, String> {
        let conn = self.conn.lock().unwrap();
        db::delete_row(&conn, job_id)
    }

    pub(crate) fn count_by_status(&self) -> Result<Vec<(JobStatus, i64)>, String> {
        let conn = self.conn.lock().unwrap();
        db::count_by_status(&conn)
    }

    /// Oldest-first page of terminal jobs, used by pruning. Never includes
    /// non-terminal jobs regardless of how stale they look.
    pub(crate) fn terminal_jobs_oldest_first(
        &self,
        limit: usize,
    ) -> Result<Vec<ProofJobRecord>, String> {
        let conn = self.conn.lock().unwrap();
        db::terminal_jobs_oldest_first(&conn, limit as i64)
    }

    pub(crate) fn get_active_job_id(&self) -> Result<Option<Uuid>, String> {
        let conn = self.conn.lock().unwrap();
        let value: Option<String> = conn
            .query_row("SELECT job_id FROM active_job WHERE id = 0", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| format!("get_active_job_id failed: {e}"))?
            .flatten();
        Ok(match value {
            Some(raw) => {
                Some(Uuid::parse_str(&raw).map_err(|e| format!("bad active job uuid: {e}"))?)
            }
            None => None,
        })
    }

    pub(crate) fn set_active_job_id(&self, job_id: Uuid) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE active_job SET job_id = ?1 WHERE id = 0",
            params![job_id.to_string()],
        )
        .map_err(|e| format!("set_active_job_id failed: {e}"))?;
        Ok(())
    }

    /// Clears the pointer only if it still points at `job_id`; a stale
    /// caller racing a newer job must not clobber it.
    pub(crate) fn clear_active_job_id_if_matches(&self, job_id: Uuid) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE active_job SET job_id = NULL WHERE id = 0 AND job_id = ?1",
            params![job_id.to_string()],
        )
        .map_err(|e| format!("clear_active_job_id failed: {e}"))?;
        Ok(())
    }
}
