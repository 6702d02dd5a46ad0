//! Textual collections: stories, elicitation records, papers.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::parse_datetime;
use crate::core::Id;
use crate::model::misc::Tag;

/// A collection: marked-up text interpolating `form[<id>]` and
/// `collection[<id>]` references.
///
/// `contents` is what the author wrote; `contents_unpacked` is the same
/// text with collection references transitively expanded; `html` is the
/// rendering of the unpacked text; `forms` is the denormalized set of
/// every form the (unpacked) text references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    /// Row id.
    pub id: Id,
    /// Stable identifier shared with backup rows.
    pub uuid: String,
    /// Title.
    pub title: String,
    /// One of `story`, `elicitation`, `paper`, `discourse`, `other`.
    pub r#type: String,
    /// External URL, if the collection mirrors a published document.
    pub url: String,
    /// Free-text description.
    pub description: String,
    /// `Markdown` or `reStructuredText`.
    pub markup_language: String,
    /// Authored text with reference tokens.
    pub contents: String,
    /// Text with collection references transitively expanded.
    pub contents_unpacked: String,
    /// HTML rendering of the unpacked text.
    pub html: String,
    /// Elicitation date.
    pub date_elicited: Option<NaiveDate>,
    /// Eliciting user.
    pub elicitor_id: Option<Id>,
    /// Creating user.
    pub enterer_id: Option<Id>,
    /// Last modifying user.
    pub modifier_id: Option<Id>,
    /// Creation time.
    pub datetime_entered: DateTime<Utc>,
    /// Last modification time.
    pub datetime_modified: DateTime<Utc>,
    /// Denormalized referenced form ids.
    pub forms: Vec<Id>,
    /// Tags, auto-extended with `restricted` when a referenced form or
    /// file is restricted.
    pub tags: Vec<Tag>,
    /// Associated file ids.
    pub files: Vec<Id>,
}

impl Collection {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let date_elicited: Option<String> = row.get("date_elicited")?;
        let entered: String = row.get("datetime_entered")?;
        let modified: String = row.get("datetime_modified")?;
        Ok(Self {
            id: row.get("id")?,
            uuid: row.get("uuid")?,
            title: row.get("title")?,
            r#type: row.get("type")?,
            url: row.get("url")?,
            description: row.get("description")?,
            markup_language: row.get("markup_language")?,
            contents: row.get("contents")?,
            contents_unpacked: row.get("contents_unpacked")?,
            html: row.get("html")?,
            date_elicited: date_elicited
                .and_then(|d| NaiveDate::parse_from_str(&d, super::DATE_FORMAT).ok()),
            elicitor_id: row.get("elicitor_id")?,
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

/// The writable fields of a collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionWrite {
    /// Title (required).
    pub title: String,
    /// Collection type.
    #[serde(default)]
    pub r#type: Option<String>,
    /// External URL.
    #[serde(default)]
    pub url: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Markup language.
    #[serde(default)]
    pub markup_language: Option<String>,
    /// Authored text.
    #[serde(default)]
    pub contents: String,
    /// Elicitation date.
    #[serde(default)]
    pub date_elicited: Option<NaiveDate>,
    /// Eliciting user.
    #[serde(default)]
    pub elicitor_id: Option<Id>,
    /// Tag ids.
    #[serde(default)]
    pub tags: Vec<Id>,
    /// File ids.
    #[serde(default)]
    pub files: Vec<Id>,
}
