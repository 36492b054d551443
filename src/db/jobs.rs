use anyhow::{Result, anyhow};
use tokio_rusqlite::rusqlite::OptionalExtension;
use tokio_rusqlite::{Connection, params, rusqlite};
use uuid::Uuid;

use crate::core::LedgerEntry;

const ENTRY_COLUMNS: &str = "SELECT j.id, j.device_id, j.file_name, j.content_digest, j.settings, j.created_at,
     COALESCE((SELECT status FROM print_job_status_log WHERE job_id = j.id ORDER BY created_at DESC, rowid DESC LIMIT 1), 'submitted') as status
     FROM print_jobs j";

/// A job accepted by the provider, ready to be mirrored locally.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub job_id: String,
    pub device_id: String,
    pub file_name: String,
    pub content_digest: String,
    pub settings: String,
}

pub async fn record_submission(conn: &Connection, entry: NewLedgerEntry) -> Result<()> {
    conn.call(move |c| {
        c.execute(
            "INSERT INTO print_jobs (id, device_id, file_name, content_digest, settings)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO NOTHING",
            params![
                &entry.job_id,
                &entry.device_id,
                &entry.file_name,
                &entry.content_digest,
                &entry.settings
            ],
        )?;
        Ok::<(), rusqlite::Error>(())
    })
    .await?;

    Ok(())
}

/// Append an observed status. Jobs that were never recorded locally are ignored.
pub async fn record_status(conn: &Connection, job_id: String, status: String) -> Result<()> {
    conn.call(move |c| {
        let log_id = Uuid::now_v7().to_string();
        c.execute(
            "INSERT INTO print_job_status_log (id, job_id, status)
             SELECT ?1, ?2, ?3
             WHERE EXISTS (SELECT 1 FROM print_jobs WHERE id = ?2)",
            params![log_id, job_id, status],
        )?;
        Ok::<(), rusqlite::Error>(())
    })
    .await?;

    Ok(())
}

pub async fn get(conn: &Connection, job_id: String) -> Result<Option<LedgerEntry>> {
    conn.call(move |c| {
        let mut stmt = c.prepare(&format!("{} WHERE j.id = ?1", ENTRY_COLUMNS))?;
        stmt.query_row(params![job_id], row_to_entry).optional()
    })
    .await
    .map_err(|e| anyhow!("Failed to get ledger entry: {}", e))
}

/// Most recent jobs first.
pub async fn list(conn: &Connection, limit: u32) -> Result<Vec<LedgerEntry>> {
    conn.call(move |c| {
        let mut stmt = c.prepare(&format!(
            "{} ORDER BY j.created_at DESC, j.rowid DESC LIMIT ?1",
            ENTRY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit as i64], row_to_entry)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
    })
    .await
    .map_err(|e| anyhow!("Failed to list ledger entries: {}", e))
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.get(0)?,
        device_id: row.get(1)?,
        file_name: row.get(2)?,
        content_digest: row.get(3)?,
        settings: row.get(4)?,
        created_at: row.get(5)?,
        status: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn entry(job_id: &str) -> NewLedgerEntry {
        NewLedgerEntry {
            job_id: job_id.to_string(),
            device_id: "printer@print.example.com".to_string(),
            file_name: "photo.jpg".to_string(),
            content_digest: blake3::hash(b"jpeg").to_hex().to_string(),
            settings: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn submission_starts_as_submitted() {
        let conn = db::init_in_memory().await.unwrap();
        record_submission(&conn, entry("job-1")).await.unwrap();

        let found = get(&conn, "job-1".to_string()).await.unwrap().unwrap();
        assert_eq!(found.status, "submitted");
        assert_eq!(found.file_name, "photo.jpg");
        assert_eq!(found.content_digest.len(), 64);
    }

    #[tokio::test]
    async fn latest_status_wins() {
        let conn = db::init_in_memory().await.unwrap();
        record_submission(&conn, entry("job-1")).await.unwrap();
        record_status(&conn, "job-1".to_string(), "processing".to_string())
            .await
            .unwrap();
        record_status(&conn, "job-1".to_string(), "completed".to_string())
            .await
            .unwrap();

        let found = get(&conn, "job-1".to_string()).await.unwrap().unwrap();
        assert_eq!(found.status, "completed");
    }

    #[tokio::test]
    async fn status_for_unknown_job_is_ignored() {
        let conn = db::init_in_memory().await.unwrap();
        record_status(&conn, "ghost".to_string(), "completed".to_string())
            .await
            .unwrap();
        assert!(get(&conn, "ghost".to_string()).await.unwrap().is_none());
        assert!(list(&conn, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_respects_limit() {
        let conn = db::init_in_memory().await.unwrap();
        for i in 0..3 {
            record_submission(&conn, entry(&format!("job-{}", i)))
                .await
                .unwrap();
        }
        let entries = list(&conn, 2).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "job-2");
    }
}
