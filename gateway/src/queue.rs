//! A small at-least-once, lease-based task queue shared by the proof and
//! claim consumers. One SQLite table holds both queues, discriminated by
//! `queue_name`; a lease gives a consumer exclusive visibility of a row
//! until it acks, nacks, or the lease expires and the row becomes visible
//! again. `tokio::sync::Notify` wakes waiting consumers promptly instead of
//! relying solely on their poll interval.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Notify;
use uuid::Uuid;

pub(crate) const PROOF_QUEUE: &str = "proof";
pub(crate) const CLAIM_QUEUE: &str = "claim";

#[derive(Debug, Clone)]
pub(crate) struct LeasedMessage {
    pub(crate) id: i64,
    pub(crate) job_id: Uuid,
    pub(crate) attempts: u32,
}

pub(crate) struct SqliteQueue {
    conn: std::sync::Mutex<Connection>,
    notify: Arc<Notify>,
}

impl SqliteQueue {
    pub(crate) fn open(data_dir: &std::path::Path) -> Result<Self, String> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| format!("failed to create data dir: {e}"))?;
        let db_path = data_dir.join("queue.db");
        let conn = Connection::open(&db_path)
            .map_err(|e| format!("failed to open queue db: {e}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;
             PRAGMA synchronous=NORMAL;
             CREATE TABLE IF NOT EXISTS queue_messages (
                 id            INTEGER PRIMARY KEY AUTOINCREMENT,
                 queue_name    TEXT NOT NULL,
                 job_id        TEXT NOT NULL,
                 available_at  INTEGER NOT NULL,
                 leased_until  INTEGER,
                 attempts      INTEGER NOT NULL DEFAULT 0
             );
             CREATE INDEX IF NOT EXISTS idx_queue_lookup
                 ON queue_messages(queue_name, available_at);",
        )
        .map_err(|e| format!("failed to create queue schema: {e}"))?;

        Ok(Self {
            conn: std::sync::Mutex::new(conn),
            notify: Arc::new(Notify::new()),
        })
    }

    #[cfg(test)]
    pub(crate) fn open_in_memory() -> Self {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE queue_messages (
                 id            INTEGER PRIMARY KEY AUTOINCREMENT,
                 queue_name    TEXT NOT NULL,
                 job_id        TEXT NOT NULL,
                 available_at  INTEGER NOT NULL,
                 leased_until  INTEGER,
                 attempts      INTEGER NOT NULL DEFAULT 0
             );",
        )
        .unwrap();
        Self {
            conn: std::sync::Mutex::new(conn),
            notify: Arc::new(Notify::new()),
        }
    }

    pub(crate) fn enqueue(&self, queue_name: &str, job_id: Uuid) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO queue_messages (queue_name, job_id, available_at, attempts)
             VALUES (?1, ?2, ?3, 0)",
            params![queue_name, job_id.to_string(), now_unix_s() as i64],
        )
        .map_err(|e| format!("enqueue failed: {e}"))?;
        drop(conn);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Atomically claims the oldest visible message for `queue_name` and
    /// leases it for `lease_secs`. Redelivery after lease expiry is what
    /// gives the queue its at-least-once guarantee.
    pub(crate) fn lease_next(
        &self,
        queue_name: &str,
        lease_secs: u64,
    ) -> Result<Option<LeasedMessage>, String> {
        let mut conn = self.conn.lock().unwrap();
        let now = now_unix_s() as i64;
        let tx = conn
            .transaction()
            .map_err(|e| format!("lease_next transaction start failed: {e}"))?;

        let row: Option<(i64, String, i64)> = tx
            .query_row(
                "SELECT id, job_id, attempts FROM queue_messages
                 WHERE queue_name = ?1 AND available_at <= ?2
                   AND (leased_until IS NULL OR leased_until <= ?2)
                 ORDER BY available_at ASC
                 LIMIT 1",
                params![queue_name, now],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| format!("lease_next select failed: {e}"))?;

        let Some((id, job_id_str, attempts)) = row else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE queue_messages SET leased_until = ?1, attempts = attempts + 1 WHERE id = ?2",
            params![now + lease_secs as i64, id],
        )
        .map_err(|e| format!("lease_next update failed: {e}"))?;

        tx.commit()
            .map_err(|e| format!("lease_next commit failed: {e}"))?;

        let job_id =
            Uuid::parse_str(&job_id_str).map_err(|e| format!("bad job_id in queue row: {e}"))?;

        Ok(Some(LeasedMessage {
            id,
            job_id,
            attempts: attempts as u32 + 1,
        }))
    }

    pub(crate) fn ack(&self, message_id: i64) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM queue_messages WHERE id = ?1",
            params![message_id],
        )
        .map_err(|e| format!("ack failed: {e}"))?;
        Ok(())
    }

    /// Makes the message visible again after `delay_secs`, for redelivery.
    pub(crate) fn nack(&self, message_id: i64, delay_secs: u64) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE queue_messages SET available_at = ?1, leased_until = NULL WHERE id = ?2",
            params![now_unix_s() as i64 + delay_secs as i64, message_id],
        )
        .map_err(|e| format!("nack failed: {e}"))?;
        drop(conn);
        self.notify.notify_waiters();
        Ok(())
    }
}

fn now_unix_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Blocks until a message is available or `poll_interval` elapses, whichever
/// comes first, then attempts one lease. Consumers loop on this so that
/// enqueue-side `notify_waiters()` wakes them promptly without busy-polling.
pub(crate) async fn wait_for_message(
    queue: &SqliteQueue,
    queue_name: &str,
    lease_secs: u64,
    poll_interval: Duration,
) -> Result<LeasedMessage, String> {
    loop {
        if let Some(message) = queue.lease_next(queue_name, lease_secs)? {
            return Ok(message);
        }

        let notified = queue.notify.notified();
        tokio::select! {
            _ = notified => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}
