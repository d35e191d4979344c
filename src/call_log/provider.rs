//! Sources of call history.

use super::models::{CallLogEntry, CallLogQuery, CallType};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, ErrorCode, OpenFlags};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallLogError {
    #[error("Call log permission denied: {0}")]
    PermissionDenied(String),

    #[error("Call log unavailable: {0}")]
    Unavailable(String),
}

/// Read-only query interface over the call history.
pub trait CallLogProvider: Send + Sync {
    /// Matching entries, newest first.
    fn query(&self, query: &CallLogQuery) -> Result<Vec<CallLogEntry>, CallLogError>;
}

/// Provider used when no call history source is configured.
pub struct NullCallLogProvider;

impl CallLogProvider for NullCallLogProvider {
    fn query(&self, _query: &CallLogQuery) -> Result<Vec<CallLogEntry>, CallLogError> {
        Err(CallLogError::Unavailable(
            "no call log source configured".to_string(),
        ))
    }
}

/// Reads an Android-schema call log database (`calls` table).
///
/// The database is opened read-only on every query, so a copy that is
/// refreshed in place by another process is always seen current.
pub struct SqliteCallLogProvider {
    db_path: PathBuf,
}

impl SqliteCallLogProvider {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn open(&self) -> Result<Connection, CallLogError> {
        if !self.db_path.exists() {
            return Err(CallLogError::Unavailable(format!(
                "{:?} does not exist",
                self.db_path
            )));
        }
        Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(map_sqlite_error)
    }
}

impl CallLogProvider for SqliteCallLogProvider {
    fn query(&self, query: &CallLogQuery) -> Result<Vec<CallLogEntry>, CallLogError> {
        let conn = self.open()?;

        let mut sql = String::from(
            "SELECT number, date, duration, type FROM calls
             WHERE number IS NOT NULL AND TRIM(number) != ''",
        );
        let mut params: Vec<Value> = Vec::new();
        if let Some(since_ms) = query.since_ms {
            sql.push_str(" AND date >= ?");
            params.push(Value::Integer(since_ms));
        }
        if let Some(call_type) = query.call_type {
            sql.push_str(" AND type = ?");
            params.push(Value::Integer(call_type.code()));
        }
        if let Some(number) = &query.number {
            sql.push_str(" AND number = ?");
            params.push(Value::Text(number.clone()));
        }
        sql.push_str(" ORDER BY date DESC");
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(limit as i64));
        }

        let mut stmt = conn.prepare(&sql).map_err(map_sqlite_error)?;
        let entries = stmt
            .query_map(params_from_iter(params), |row| {
                let duration: i64 = row.get(2)?;
                Ok(CallLogEntry {
                    phone_number: row.get(0)?,
                    timestamp: row.get(1)?,
                    duration: duration.max(0) as u64,
                    call_type: CallType::from_code(row.get(3)?),
                })
            })
            .map_err(map_sqlite_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sqlite_error)?;
        Ok(entries)
    }
}

fn map_sqlite_error(err: rusqlite::Error) -> CallLogError {
    let denied = match &err {
        rusqlite::Error::SqliteFailure(failure, _) => matches!(
            failure.code,
            ErrorCode::CannotOpen
                | ErrorCode::PermissionDenied
                | ErrorCode::AuthorizationForStatementDenied
        ),
        _ => false,
    };
    if denied {
        CallLogError::PermissionDenied(err.to_string())
    } else {
        CallLogError::Unavailable(err.to_string())
    }
}
