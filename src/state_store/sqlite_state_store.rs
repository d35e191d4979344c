use super::models::{JobRun, JobRunStatus, JobScheduleState, UploadRecord};
use super::schema::STATE_VERSIONED_SCHEMAS;
use super::{CredentialStore, JobStore, UploadRecordStore, AUTH_TOKEN_KEY};
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// SQLite implementation of every local store.
///
/// All access goes through one connection behind a mutex. Checking and
/// recording an upload are separate calls, so two writers (the agent and
/// `cli-recordings upload-once`) can both upload the same file; the first
/// `mark_uploaded` wins and the path is recorded once.
#[derive(Clone)]
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path)
            .with_context(|| format!("Failed to open state database at {:?}", path))?;

        if is_new_db {
            info!("Creating new state database at {:?}", path);
            Self::latest_schema().create(&conn)?;
        } else {
            Self::check_and_migrate(&mut conn)?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, mainly for tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::latest_schema().create(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn latest_schema() -> &'static crate::sqlite_persistence::VersionedSchema {
        &STATE_VERSIONED_SCHEMAS[STATE_VERSIONED_SCHEMAS.len() - 1]
    }

    fn check_and_migrate(conn: &mut Connection) -> Result<()> {
        let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        let db_version = raw_version - BASE_DB_VERSION as i64;

        if db_version < 1 {
            anyhow::bail!(
                "State database version {} is invalid (expected >= 1)",
                db_version
            );
        }

        let version_index = STATE_VERSIONED_SCHEMAS
            .iter()
            .position(|s| s.version as i64 == db_version)
            .with_context(|| format!("Unknown state database version {}", db_version))?;
        STATE_VERSIONED_SCHEMAS[version_index]
            .validate(conn)
            .with_context(|| {
                format!(
                    "State database schema validation failed for version {}",
                    db_version
                )
            })?;

        let latest_version = Self::latest_schema().version;
        if (db_version as usize) < latest_version {
            info!(
                "Migrating state database from version {} to {}",
                db_version, latest_version
            );
            let tx = conn.transaction()?;
            for schema in STATE_VERSIONED_SCHEMAS.iter().skip(version_index + 1) {
                if let Some(migration_fn) = schema.migration {
                    migration_fn(&tx).with_context(|| {
                        format!("Failed to run migration to version {}", schema.version)
                    })?;
                }
            }
            tx.execute(
                &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_version),
                [],
            )?;
            tx.commit()?;
        }
        Ok(())
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }

    fn row_to_job_run(row: &rusqlite::Row) -> rusqlite::Result<JobRun> {
        let status_str: String = row.get("status")?;
        let started_at_str: String = row.get("started_at")?;
        let finished_at_str: Option<String> = row.get("finished_at")?;

        Ok(JobRun {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            started_at: Self::parse_datetime(&started_at_str).unwrap_or_else(Utc::now),
            finished_at: finished_at_str.and_then(|s| Self::parse_datetime(&s)),
            status: JobRunStatus::parse(&status_str).unwrap_or(JobRunStatus::Failed),
            error_message: row.get("error_message")?,
            triggered_by: row.get("triggered_by")?,
        })
    }

    fn get_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM app_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO app_state (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, value, Self::format_datetime(&Utc::now())],
        )?;
        Ok(())
    }

    fn delete_state(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM app_state WHERE key = ?1", params![key])?;
        Ok(())
    }
}

impl UploadRecordStore for SqliteStateStore {
    fn is_uploaded(&self, file_path: &str) -> Result<bool> {
        Ok(self.uploaded_at(file_path)?.is_some())
    }

    fn mark_uploaded(&self, file_path: &str, uploaded_at: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO recording_uploads (file_path, uploaded_at) VALUES (?1, ?2)",
            params![file_path, uploaded_at],
        )
        .with_context(|| format!("Failed to record upload of {}", file_path))?;
        Ok(())
    }

    fn uploaded_at(&self, file_path: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let uploaded_at = conn
            .query_row(
                "SELECT uploaded_at FROM recording_uploads WHERE file_path = ?1",
                params![file_path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(uploaded_at)
    }

    fn list_uploads(&self, limit: usize) -> Result<Vec<UploadRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT file_path, uploaded_at FROM recording_uploads
             ORDER BY uploaded_at DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map(params![limit as i64], |row| {
                Ok(UploadRecord {
                    file_path: row.get(0)?,
                    uploaded_at: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn upload_count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM recording_uploads", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn forget(&self, file_path: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM recording_uploads WHERE file_path = ?1",
            params![file_path],
        )?;
        Ok(removed > 0)
    }

    fn clear(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM recording_uploads", [])?;
        Ok(removed)
    }
}

impl CredentialStore for SqliteStateStore {
    fn auth_token(&self) -> Result<Option<String>> {
        Ok(self
            .get_state(AUTH_TOKEN_KEY)?
            .filter(|token| !token.trim().is_empty()))
    }

    fn set_auth_token(&self, token: &str) -> Result<()> {
        self.set_state(AUTH_TOKEN_KEY, token)
    }

    fn clear_auth_token(&self) -> Result<()> {
        self.delete_state(AUTH_TOKEN_KEY)
    }
}

impl JobStore for SqliteStateStore {
    fn record_job_start(&self, job_id: &str, triggered_by: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO job_runs (job_id, started_at, status, triggered_by)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                job_id,
                Self::format_datetime(&Utc::now()),
                JobRunStatus::Running.as_str(),
                triggered_by
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE job_runs SET finished_at = ?1, status = ?2, error_message = ?3 WHERE id = ?4",
            params![
                Self::format_datetime(&Utc::now()),
                status.as_str(),
                error_message,
                run_id
            ],
        )?;
        Ok(())
    }

    fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, started_at, finished_at, status, error_message, triggered_by
             FROM job_runs WHERE job_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let runs = stmt
            .query_map(params![job_id, limit as i64], Self::row_to_job_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let run = conn
            .query_row(
                "SELECT id, job_id, started_at, finished_at, status, error_message, triggered_by
                 FROM job_runs WHERE job_id = ?1 ORDER BY id DESC LIMIT 1",
                params![job_id],
                Self::row_to_job_run,
            )
            .optional()?;
        Ok(run)
    }

    fn mark_stale_jobs_failed(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE job_runs SET status = ?1, finished_at = ?2, error_message = ?3
             WHERE status = ?4",
            params![
                JobRunStatus::Failed.as_str(),
                Self::format_datetime(&Utc::now()),
                "Job was interrupted (agent restart)",
                JobRunStatus::Running.as_str()
            ],
        )?;
        Ok(count)
    }

    fn get_schedule_state(&self, job_id: &str) -> Result<Option<JobScheduleState>> {
        let conn = self.conn.lock().unwrap();
        let state = conn
            .query_row(
                "SELECT job_id, next_run_at, last_run_at FROM job_schedules WHERE job_id = ?1",
                params![job_id],
                |row| {
                    let next_run_at: String = row.get(1)?;
                    let last_run_at: Option<String> = row.get(2)?;
                    Ok(JobScheduleState {
                        job_id: row.get(0)?,
                        next_run_at: Self::parse_datetime(&next_run_at).unwrap_or_else(Utc::now),
                        last_run_at: last_run_at.and_then(|s| Self::parse_datetime(&s)),
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    fn update_schedule_state(&self, state: &JobScheduleState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO job_schedules (job_id, next_run_at, last_run_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id) DO UPDATE SET next_run_at = ?2, last_run_at = ?3",
            params![
                state.job_id,
                Self::format_datetime(&state.next_run_at),
                state.last_run_at.as_ref().map(Self::format_datetime)
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn mark_uploaded_is_append_only() {
        let store = SqliteStateStore::in_memory().unwrap();
        let path = "/storage/emulated/0/Recorder/01012345678.m4a";

        assert!(!store.is_uploaded(path).unwrap());
        store.mark_uploaded(path, 1_000).unwrap();
        store.mark_uploaded(path, 2_000).unwrap();

        assert!(store.is_uploaded(path).unwrap());
        assert_eq!(store.uploaded_at(path).unwrap(), Some(1_000));
        assert_eq!(store.upload_count().unwrap(), 1);
    }

    #[test]
    fn concurrent_writers_record_each_path_once() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("callup.db");
        let agent = SqliteStateStore::new(&db_path).unwrap();
        let cli = SqliteStateStore::new(&db_path).unwrap();

        let writers: Vec<_> = [(agent, 1_000), (cli, 2_000)]
            .into_iter()
            .map(|(store, uploaded_at)| {
                std::thread::spawn(move || {
                    for i in 0..20 {
                        let path = format!("/rec/{}.mp3", i);
                        store.mark_uploaded(&path, uploaded_at).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let store = SqliteStateStore::new(&db_path).unwrap();
        assert_eq!(store.upload_count().unwrap(), 20);
        for i in 0..20 {
            let uploaded_at = store.uploaded_at(&format!("/rec/{}.mp3", i)).unwrap();
            assert!(matches!(uploaded_at, Some(1_000) | Some(2_000)));
        }
    }

    #[test]
    fn list_forget_and_clear() {
        let store = SqliteStateStore::in_memory().unwrap();
        store.mark_uploaded("/a.mp3", 10).unwrap();
        store.mark_uploaded("/b.mp3", 30).unwrap();
        store.mark_uploaded("/c.mp3", 20).unwrap();

        let listed: Vec<String> = store
            .list_uploads(2)
            .unwrap()
            .into_iter()
            .map(|r| r.file_path)
            .collect();
        assert_eq!(listed, vec!["/b.mp3".to_string(), "/c.mp3".to_string()]);

        assert!(store.forget("/a.mp3").unwrap());
        assert!(!store.forget("/a.mp3").unwrap());
        assert_eq!(store.clear().unwrap(), 2);
        assert_eq!(store.upload_count().unwrap(), 0);
    }

    #[test]
    fn blank_auth_token_reads_as_absent() {
        let store = SqliteStateStore::in_memory().unwrap();
        assert_eq!(store.auth_token().unwrap(), None);

        store.set_auth_token("   ").unwrap();
        assert_eq!(store.auth_token().unwrap(), None);

        store.set_auth_token("jwt-abc").unwrap();
        assert_eq!(store.auth_token().unwrap(), Some("jwt-abc".to_string()));

        store.clear_auth_token().unwrap();
        assert_eq!(store.auth_token().unwrap(), None);
    }

    #[test]
    fn job_runs_round_trip_and_stale_cleanup() {
        let store = SqliteStateStore::in_memory().unwrap();
        let first = store.record_job_start("recording_upload", "schedule").unwrap();
        store
            .record_job_finish(first, JobRunStatus::Completed, None)
            .unwrap();
        store.record_job_start("recording_upload", "hook:OnStartup").unwrap();

        assert_eq!(store.mark_stale_jobs_failed().unwrap(), 1);

        let history = store.get_job_history("recording_upload", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, JobRunStatus::Failed);
        assert_eq!(history[1].status, JobRunStatus::Completed);
        assert!(history[1].finished_at.is_some());

        let last = store.get_last_run("recording_upload").unwrap().unwrap();
        assert_eq!(last.triggered_by, "hook:OnStartup");
    }

    #[test]
    fn schedule_state_upserts() {
        let store = SqliteStateStore::in_memory().unwrap();
        assert!(store.get_schedule_state("job").unwrap().is_none());

        let now = Utc::now();
        store
            .update_schedule_state(&JobScheduleState {
                job_id: "job".to_string(),
                next_run_at: now,
                last_run_at: None,
            })
            .unwrap();
        store
            .update_schedule_state(&JobScheduleState {
                job_id: "job".to_string(),
                next_run_at: now + chrono::Duration::seconds(600),
                last_run_at: Some(now),
            })
            .unwrap();

        let state = store.get_schedule_state("job").unwrap().unwrap();
        assert_eq!(
            state.next_run_at.timestamp(),
            (now + chrono::Duration::seconds(600)).timestamp()
        );
        assert!(state.last_run_at.is_some());
    }

    #[test]
    fn reopening_existing_database_keeps_records() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("callup.db");

        {
            let store = SqliteStateStore::new(&db_path).unwrap();
            store.mark_uploaded("/x.amr", 5).unwrap();
        }

        let reopened = SqliteStateStore::new(&db_path).unwrap();
        assert!(reopened.is_uploaded("/x.amr").unwrap());
    }

    #[test]
    fn foreign_database_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("other.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("CREATE TABLE t (x INTEGER)", []).unwrap();
        }

        let result = SqliteStateStore::new(&db_path);
        assert!(result.is_err());
    }
}
