//! Backup rows: immutable snapshots written before every accepted
//! update or delete.
//!
//! A backup shares the live row's UUID, so a resource's history remains
//! retrievable by UUID after the live row is deleted. Backups are
//! read-only through the API; a mutating request against a backup
//! collection is answered 404 "This resource is read-only.".

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::parse_datetime;
use crate::core::Id;

/// One snapshot of a historied resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRow {
    /// Backup row id.
    pub id: Id,
    /// The live row's id at snapshot time.
    pub resource_id: Id,
    /// The live row's UUID.
    pub uuid: String,
    /// Full serialization of the pre-change state, relations and user
    /// refs included.
    pub snapshot: serde_json::Value,
    /// `datetime_modified` of the snapshotted state.
    pub datetime_modified: DateTime<Utc>,
}

impl BackupRow {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let snapshot: String = row.get("snapshot")?;
        let modified: String = row.get("datetime_modified")?;
        Ok(Self {
            id: row.get("id")?,
            resource_id: row.get("resource_id")?,
            uuid: row.get("uuid")?,
            snapshot: serde_json::from_str(&snapshot).unwrap_or(serde_json::Value::Null),
            datetime_modified: parse_datetime(&modified).unwrap_or_else(crate::core::now),
        })
    }
}

/// A resource's history: the current row (if it still exists) plus every
/// backup for its UUID, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct History {
    /// The live row, serialized, or `null` after deletion.
    pub resource: Option<serde_json::Value>,
    /// Snapshots, newest first.
    pub previous_versions: Vec<BackupRow>,
}
