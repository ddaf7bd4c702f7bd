use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::types::ProofJobRecord;
use proof_gateway_core::JobStatus;

pub(super) fn insert_row(conn: &Connection, record: &ProofJobRecord) -> Result<(), String> {
    let json = serde_json::to_string(record).map_err(|e| format!("serialize job failed: {e}"))?;
    conn.execute(
        "INSERT INTO jobs (job_id, status, created_at, updated_at, completed_at, record_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.job_id.to_string(),
            record.status.as_str(),
            record.created_at as i64,
            record.updated_at as i64,
            record.completed_at.map(|v| v as i64),
            json,
        ],
    )
    .map_err(|e| format!("insert job failed: {e}"))?;
    Ok(())
}

pub(super) fn replace_row(conn: &Connection, record: &ProofJobRecord) -> Result<(), String> {
    let json = serde_json::to_string(record).map_err(|e| format!("serialize job failed: {e}"))?;
    conn.execute(
        "UPDATE jobs SET status = ?1, updated_at = ?2, completed_at = ?3, record_json = ?4
         WHERE job_id = ?5",
        params![
            record.status.as_str(),
            record.updated_at as i64,
            record.completed_at.map(|v| v as i64),
            json,
            record.job_id.to_string(),
        ],
    )
    .map_err(|e| format!("update job failed: {e}"))?;
    Ok(())
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ProofJobRecord> {
    let json: String = row.get(0)?;
    serde_json::from_str(&json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })
}

pub(super) fn get_row(conn: &Connection, job_id: Uuid) -> Result<Option<ProofJobRecord>, String> {
    conn.query_row(
        "SELECT record_json FROM jobs WHERE job_id = ?1",
        params![job_id.to_string()],
        row_to_record,
    )
    .optional()
    .map_err(|e| format!("get job failed: {e}"))
}

pub(super) fn count_by_status(conn: &Connection) -> Result<Vec<(JobStatus, i64)>, String> {
    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")
        .map_err(|e| format!("count_by_status prepare failed: {e}"))?;
    let rows = stmt
        .query_map([], |row| {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((status, count))
        })
        .map_err(|e| format!("count_by_status query failed: {e}"))?;

    let mut out = Vec::new();
    for row in rows {
        let (status, count) = row.map_err(|e| format!("count_by_status row failed: {e}"))?;
        if let Some(status) = JobStatus::from_str(&status) {
            out.push((status, count));
        }
    }
    Ok(out)
}

pub(super) fn terminal_jobs_oldest_first(
    conn: &Connection,
    limit: i64,
) -> Result<Vec<ProofJobRecord>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT record_json FROM jobs
             WHERE status IN ('succeeded', 'failed')
             ORDER BY COALESCE(completed_at, updated_at, created_at) ASC
             LIMIT ?1",
        )
        .map_err(|e| format!("terminal scan prepare failed: {e}"))?;
    let rows = stmt
        .query_map(params![limit], row_to_record)
        .map_err(|e| format!("terminal scan query failed: {e}"))?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| format!("terminal scan row failed: {e}"))?);
    }
    Ok(out)
}

pub(super) fn delete_row(conn: &Connection, job_id: Uuid) -> Result<bool, String> {
    let deleted = conn
        .execute(
            "DELETE FROM jobs WHERE job_id = ?1",
            params![job_id.to_string()],
        )
        .map_err(|e| format!("delete job failed: {e}"))?;
    Ok(deleted > 0)
}
