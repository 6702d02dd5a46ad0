//! Corpora and saved form searches.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::parse_datetime;
use crate::core::Id;
use crate::model::misc::Tag;

/// A saved, validated list-form search over forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSearch {
    /// Row id.
    pub id: Id,
    /// Unique name.
    pub name: String,
    /// The list-form query, stored as JSON text and validated by
    /// compiling it on create/update.
    pub search: serde_json::Value,
    /// Free-text description.
    pub description: String,
    /// Creating user.
    pub enterer_id: Option<Id>,
    /// Last modification time.
    pub datetime_modified: DateTime<Utc>,
}

impl FormSearch {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let search: String = row.get("search")?;
        let modified: String = row.get("datetime_modified")?;
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            search: serde_json::from_str(&search).unwrap_or(serde_json::Value::Null),
            description: row.get("description")?,
            enterer_id: row.get("enterer_id")?,
            datetime_modified: parse_datetime(&modified).unwrap_or_else(crate::core::now),
        })
    }
}

/// A corpus: an ordered collection of forms.
///
/// Membership is determined by exactly one of two sources: a saved form
/// search whose result set is snapshotted into `forms` at save time, or
/// an explicit comma-delimited id list in `content`. The denormalized
/// `forms` set is recomputed on every save from whichever source is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Corpus {
    /// Row id.
    pub id: Id,
    /// Stable identifier shared with backup rows.
    pub uuid: String,
    /// Unique name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Explicit membership: comma-delimited form ids; empty when
    /// `form_search_id` governs membership.
    pub content: String,
    /// Query-derived membership: the saved search executed at save time.
    pub form_search_id: Option<Id>,
    /// Creating user.
    pub enterer_id: Option<Id>,
    /// Last modifying user.
    pub modifier_id: Option<Id>,
    /// Creation time.
    pub datetime_entered: DateTime<Utc>,
    /// Last modification time; also bumped by every file write.
    pub datetime_modified: DateTime<Utc>,
    /// Member form ids, in corpus order.
    pub forms: Vec<Id>,
    /// Tags, inherited transitively from restricted member forms.
    pub tags: Vec<Tag>,
    /// Artifact files written for this corpus.
    pub files: Vec<CorpusFile>,
}

impl Corpus {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let entered: String = row.get("datetime_entered")?;
        let modified: String = row.get("datetime_modified")?;
        Ok(Self {
            id: row.get("id")?,
            uuid: row.get("uuid")?,
            name: row.get("name")?,
            description: row.get("description")?,
            content: row.get("content")?,
            form_search_id: row.get("form_search_id")?,
            enterer_id: row.get("enterer_id")?,
            modifier_id: row.get("modifier_id")?,
            datetime_entered: parse_datetime(&entered).unwrap_or_else(crate::core::now),
            datetime_modified: parse_datetime(&modified).unwrap_or_else(crate::core::now),
            forms: Vec::new(),
            tags: Vec::new(),
            files: Vec::new(),
        })
    }
}

/// A record of one artifact file written for a corpus (`.tbk`, `.txt`,
/// and their derivatives).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusFile {
    /// Row id.
    pub id: Id,
    /// File name within the corpus's directory.
    pub filename: String,
    /// The format registry key that produced the file.
    pub format: String,
    /// The user who requested the write.
    pub creator_id: Option<Id>,
    /// First write time.
    pub datetime_created: DateTime<Utc>,
    /// Most recent write time.
    pub datetime_modified: DateTime<Utc>,
}

impl CorpusFile {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let created: String = row.get("datetime_created")?;
        let modified: String = row.get("datetime_modified")?;
        Ok(Self {
            id: row.get("id")?,
            filename: row.get("filename")?,
            format: row.get("format")?,
            creator_id: row.get("creator_id")?,
            datetime_created: parse_datetime(&created).unwrap_or_else(crate::core::now),
            datetime_modified: parse_datetime(&modified).unwrap_or_else(crate::core::now),
        })
    }
}

/// The writable fields of a corpus.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusWrite {
    /// Unique name (required).
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Explicit comma-delimited form ids.
    #[serde(default)]
    pub content: String,
    /// Saved search governing membership.
    #[serde(default)]
    pub form_search_id: Option<Id>,
    /// Tag ids.
    #[serde(default)]
    pub tags: Vec<Id>,
}
