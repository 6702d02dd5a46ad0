//! Entity definitions.
//!
//! Each resource is a plain struct with serde derives; the serialized
//! form is both the API representation and the backup snapshot. Row
//! mapping is hand-written per entity rather than derived, which keeps
//! the SQL visible next to the struct it fills.

pub mod backup;
pub mod collection;
pub mod corpus;
pub mod form;
pub mod fst;
pub mod lm;
pub mod misc;

pub use backup::{BackupRow, History};
pub use collection::{Collection, CollectionWrite};
pub use corpus::{Corpus, CorpusFile, CorpusWrite, FormSearch};
pub use form::{Form, FormWrite, Translation};
pub use fst::{MorphologicalParser, Morphology, Phonology};
pub use lm::MorphemeLanguageModel;
pub use misc::{ApplicationSettings, FileRecord, SyntacticCategory, Tag, User};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// The on-disk datetime format: ISO 8601 at second precision.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// The on-disk date format.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Serialize a datetime for storage.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

/// Parse a stored datetime.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Serialize an optional datetime for storage.
pub fn format_datetime_opt(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(format_datetime)
}

/// Parse an optional stored datetime.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().and_then(parse_datetime)
}
