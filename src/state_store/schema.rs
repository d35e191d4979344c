//! SQLite schema of the local state database.
//!
//! One file holds the upload records, the key-value state written by the
//! surrounding application (auth credential) and the background job history.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1
// =============================================================================

/// Files already delivered to the upload API, keyed by path.
const RECORDING_UPLOADS_TABLE_V1: Table = Table {
    name: "recording_uploads",
    columns: &[
        sqlite_column!("file_path", &SqlType::Text, is_primary_key = true),
        sqlite_column!("uploaded_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_recording_uploads_uploaded_at", "uploaded_at DESC")],
};

/// Key-value state populated by the surrounding application.
const APP_STATE_TABLE_V1: Table = Table {
    name: "app_state",
    columns: &[
        sqlite_column!("key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("value", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[],
};

const JOB_RUNS_TABLE_V1: Table = Table {
    name: "job_runs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Text, non_null = true),
        sqlite_column!("finished_at", &SqlType::Text),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("triggered_by", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_job_runs_job_id_started", "job_id, started_at DESC")],
};

const JOB_SCHEDULES_TABLE_V1: Table = Table {
    name: "job_schedules",
    columns: &[
        sqlite_column!("job_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("next_run_at", &SqlType::Text, non_null = true),
        sqlite_column!("last_run_at", &SqlType::Text),
    ],
    indices: &[],
};

pub const STATE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[
        RECORDING_UPLOADS_TABLE_V1,
        APP_STATE_TABLE_V1,
        JOB_RUNS_TABLE_V1,
        JOB_SCHEDULES_TABLE_V1,
    ],
    migration: None,
}];
