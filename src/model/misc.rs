//! Supporting entities: users, tags, syntactic categories, uploaded file
//! records, and the singleton application settings.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::{format_datetime, parse_datetime};
use crate::core::types::Role;
use crate::core::Id;

/// A registered user of the instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Row id.
    pub id: Id,
    /// Login name, unique per instance.
    pub username: String,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Contact address.
    pub email: String,
    /// Institutional affiliation.
    pub affiliation: String,
    /// Access role.
    pub role: Role,
}

impl User {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let role: String = row.get("role")?;
        Ok(Self {
            id: row.get("id")?,
            username: row.get("username")?,
            first_name: row.get("first_name")?,
            last_name: row.get("last_name")?,
            email: row.get("email")?,
            affiliation: row.get("affiliation")?,
            role: Role::parse(&role).unwrap_or(Role::Viewer),
        })
    }

    /// Whether this user holds the administrator role.
    pub fn is_administrator(&self) -> bool {
        self.role == Role::Administrator
    }
}

/// A tag. The tag named `restricted` is distinguished: it hides tagged
/// resources from users outside the unrestricted set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Row id.
    pub id: Id,
    /// Unique name.
    pub name: String,
    /// Free-text description.
    pub description: String,
}

impl Tag {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
        })
    }
}

/// A syntactic category, e.g. `N` or `V`, assignable to forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntacticCategory {
    /// Row id.
    pub id: Id,
    /// Unique name.
    pub name: String,
    /// One of `lexical`, `phrasal`, `sentential`.
    pub r#type: String,
    /// Free-text description.
    pub description: String,
}

impl SyntacticCategory {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            r#type: row.get("type")?,
            description: row.get("description")?,
        })
    }
}

/// An uploaded file's metadata row. Binary handling (upload decoding,
/// resizing) lives outside this crate; the record participates here in
/// the restricted-visibility filter and in form/collection associations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Row id.
    pub id: Id,
    /// Normalized filename under the instance's `files/` directory.
    pub filename: String,
    /// Detected MIME type.
    pub mime_type: String,
    /// Free-text description.
    pub description: String,
    /// For subinterval-referencing files, the parent file.
    pub parent_file_id: Option<Id>,
    /// Tags, including a possible `restricted`.
    pub tags: Vec<Tag>,
}

/// The singleton application settings row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Row id.
    pub id: Id,
    /// Comma-separated morpheme delimiter characters, e.g. `-,=`.
    pub morpheme_delimiters: String,
    /// Ids of users exempt from the restricted-visibility filter.
    pub unrestricted_users: Vec<Id>,
    /// Last modification time.
    pub datetime_modified: DateTime<Utc>,
}

impl ApplicationSettings {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let unrestricted: String = row.get("unrestricted_users")?;
        let modified: String = row.get("datetime_modified")?;
        Ok(Self {
            id: row.get("id")?,
            morpheme_delimiters: row.get("morpheme_delimiters")?,
            unrestricted_users: serde_json::from_str(&unrestricted).unwrap_or_default(),
            datetime_modified: parse_datetime(&modified).unwrap_or_else(crate::core::now),
        })
    }

    /// The delimiter characters as a vector, e.g. `['-', '=']`.
    pub fn delimiters(&self) -> Vec<char> {
        self.morpheme_delimiters
            .split(',')
            .filter_map(|d| d.trim().chars().next())
            .collect()
    }

    pub(crate) fn store_unrestricted(&self) -> String {
        serde_json::to_string(&self.unrestricted_users).unwrap_or_else(|_| "[]".into())
    }

    pub(crate) fn store_datetime(&self) -> String {
        format_datetime(&self.datetime_modified)
    }
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            id: 0,
            morpheme_delimiters: crate::core::constants::DEFAULT_MORPHEME_DELIMITERS
                .to_string(),
            unrestricted_users: Vec::new(),
            datetime_modified: crate::core::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delimiters() {
        let settings = ApplicationSettings {
            morpheme_delimiters: "-,=,~".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.delimiters(), vec!['-', '=', '~']);
    }

    #[test]
    fn test_default_delimiters() {
        assert_eq!(ApplicationSettings::default().delimiters(), vec!['-', '=']);
    }
}
