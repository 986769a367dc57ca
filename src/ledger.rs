//! Durable case index in `<artifacts_root>/cases.sqlite`.
//!
//! Progress itself is in-memory; the ledger only records where each case
//! ended up so `status` can summarise past runs.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::util::now_utc_string;

pub const LEDGER_FILE: &str = "cases.sqlite";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseRecord {
    pub case_id: String,
    pub status: String,
    pub template_id: Option<String>,
    pub config_state: Option<String>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub started_at: String,
    pub updated_at: String,
}

pub struct CaseLedger {
    path: PathBuf,
    connection: Mutex<Connection>,
}

impl CaseLedger {
    pub fn open(artifacts_root: &Path) -> Result<Self> {
        let path = artifacts_root.join(LEDGER_FILE);
        if let Some(parent) = path.parent() {
            crate::util::ensure_directory(parent)?;
        }

        let connection = Connection::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        configure_connection(&connection)?;
        ensure_schema(&connection)?;

        Ok(Self {
            path,
            connection: Mutex::new(connection),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_started(&self, case_id: &str) -> Result<()> {
        let now = now_utc_string();
        self.connection()
            .execute(
                "
                INSERT INTO cases(case_id, status, started_at, updated_at)
                VALUES(?1, 'queued', ?2, ?2)
                ON CONFLICT(case_id) DO UPDATE SET
                  status=excluded.status,
                  updated_at=excluded.updated_at
                ",
                params![case_id, now],
            )
            .with_context(|| format!("failed to record case {case_id}"))?;
        Ok(())
    }

    pub fn record_status(&self, case_id: &str, status: &str) -> Result<()> {
        self.connection()
            .execute(
                "UPDATE cases SET status=?2, updated_at=?3 WHERE case_id=?1",
                params![case_id, status, now_utc_string()],
            )
            .with_context(|| format!("failed to update case {case_id}"))?;
        Ok(())
    }

    pub fn record_finished(
        &self,
        case_id: &str,
        status: &str,
        template_id: Option<&str>,
        config_state: Option<&str>,
        error: Option<(&str, &str)>,
    ) -> Result<()> {
        let (error_kind, error_message) = error.unzip();
        self.connection()
            .execute(
                "
                UPDATE cases SET
                  status=?2,
                  template_id=?3,
                  config_state=?4,
                  error_kind=?5,
                  error_message=?6,
                  updated_at=?7
                WHERE case_id=?1
                ",
                params![
                    case_id,
                    status,
                    template_id,
                    config_state,
                    error_kind,
                    error_message,
                    now_utc_string()
                ],
            )
            .with_context(|| format!("failed to finish case {case_id}"))?;
        Ok(())
    }

    pub fn get(&self, case_id: &str) -> Result<Option<CaseRecord>> {
        self.connection()
            .query_row(
                &format!("SELECT {CASE_COLUMNS} FROM cases WHERE case_id=?1"),
                params![case_id],
                case_from_row,
            )
            .optional()
            .with_context(|| format!("failed to read case {case_id}"))
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<CaseRecord>> {
        let connection = self.connection();
        let mut statement = connection
            .prepare(&format!(
                "SELECT {CASE_COLUMNS} FROM cases ORDER BY updated_at DESC, case_id LIMIT ?1"
            ))
            .context("failed to prepare case listing")?;
        let rows = statement
            .query_map(params![limit as i64], case_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list cases")?;
        Ok(rows)
    }

    /// Case counts grouped by status, most frequent first.
    pub fn status_counts(&self) -> Result<Vec<(String, i64)>> {
        let connection = self.connection();
        let mut statement = connection.prepare(
            "SELECT status, COUNT(*) FROM cases GROUP BY status ORDER BY COUNT(*) DESC, status",
        )?;
        let rows = statement
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to count cases")?;
        Ok(rows)
    }

    fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

const CASE_COLUMNS: &str =
    "case_id, status, template_id, config_state, error_kind, error_message, started_at, updated_at";

fn case_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CaseRecord> {
    Ok(CaseRecord {
        case_id: row.get(0)?,
        status: row.get(1)?,
        template_id: row.get(2)?,
        config_state: row.get(3)?,
        error_kind: row.get(4)?,
        error_message: row.get(5)?,
        started_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    connection
        .busy_timeout(std::time::Duration::from_secs(5))
        .context("failed to set busy timeout")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cases (
              case_id TEXT PRIMARY KEY,
              status TEXT NOT NULL,
              template_id TEXT,
              config_state TEXT,
              error_kind TEXT,
              error_message TEXT,
              started_at TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cases_template ON cases(template_id);
            CREATE INDEX IF NOT EXISTS idx_cases_updated ON cases(updated_at);
            ",
        )
        .context("failed to ensure case ledger schema")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_case_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CaseLedger::open(dir.path()).unwrap();
        assert!(ledger.path().ends_with(LEDGER_FILE));

        ledger.record_started("case_a").unwrap();
        ledger.record_status("case_a", "extracting").unwrap();
        ledger
            .record_finished("case_a", "completed", Some("abc"), Some("configured"), None)
            .unwrap();
        ledger.record_started("case_b").unwrap();
        ledger
            .record_finished(
                "case_b",
                "failed",
                None,
                None,
                Some(("extraction_error", "provider down")),
            )
            .unwrap();

        let case_a = ledger.get("case_a").unwrap().unwrap();
        assert_eq!(case_a.status, "completed");
        assert_eq!(case_a.template_id.as_deref(), Some("abc"));
        assert_eq!(case_a.error_kind, None);

        let case_b = ledger.get("case_b").unwrap().unwrap();
        assert_eq!(case_b.error_message.as_deref(), Some("provider down"));
        assert!(ledger.get("case_c").unwrap().is_none());

        assert_eq!(ledger.recent(10).unwrap().len(), 2);
        let counts = ledger.status_counts().unwrap();
        assert_eq!(counts.len(), 2);
        assert!(counts.iter().all(|(_, count)| *count == 1));
    }

    #[test]
    fn reopening_keeps_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        CaseLedger::open(dir.path())
            .unwrap()
            .record_started("case_a")
            .unwrap();

        let reopened = CaseLedger::open(dir.path()).unwrap();
        assert_eq!(reopened.get("case_a").unwrap().unwrap().status, "queued");
    }
}
