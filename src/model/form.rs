//! The form: a glossed utterance, the primary datum of fieldwork.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::parse_datetime;
use crate::core::Id;
use crate::model::misc::Tag;

/// One translation of a form, ordered within its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    /// Row id (0 before first save).
    #[serde(default)]
    pub id: Id,
    /// The translated text.
    pub transcription: String,
    /// Grammaticality judgment on the translation, e.g. `*` or `?`.
    #[serde(default)]
    pub grammaticality: String,
}

impl Translation {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            transcription: row.get("transcription")?,
            grammaticality: row.get("grammaticality")?,
        })
    }
}

/// A glossed utterance.
///
/// The four transcription fields record the same datum at different
/// levels of analysis; `morpheme_break` and `morpheme_gloss` are
/// delimiter-aligned, and the `morpheme_break_ids` / `morpheme_gloss_ids`
/// nests cross-reference the lexical entries matching each morpheme
/// position (see [`crate::forms`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Form {
    /// Row id.
    pub id: Id,
    /// Stable identifier shared with this form's backup rows.
    pub uuid: String,
    /// Orthographic transcription.
    pub transcription: String,
    /// Broad phonetic transcription.
    pub phonetic_transcription: String,
    /// Narrow phonetic transcription.
    pub narrow_phonetic_transcription: String,
    /// Morphologically segmented transcription, e.g. `chien-s`.
    pub morpheme_break: String,
    /// Gloss aligned with `morpheme_break`, e.g. `dog-PL`.
    pub morpheme_gloss: String,
    /// Analyst commentary.
    pub comments: String,
    /// Speaker commentary.
    pub speaker_comments: String,
    /// Grammaticality judgment, e.g. `*`.
    pub grammaticality: String,
    /// Date the datum was elicited.
    pub date_elicited: Option<NaiveDate>,
    /// Creation time.
    pub datetime_entered: DateTime<Utc>,
    /// Last modification time.
    pub datetime_modified: DateTime<Utc>,
    /// Category sequence derived from the morpheme analysis, e.g. `N-PL`.
    pub syntactic_category_string: String,
    /// Per-word, per-morpheme matches against the lexicon by shape:
    /// `[[ [id, gloss, category], ...], ...]` nested as words/morphemes.
    pub morpheme_break_ids: serde_json::Value,
    /// Per-word, per-morpheme matches against the lexicon by gloss.
    pub morpheme_gloss_ids: serde_json::Value,
    /// `shape|gloss|category` triples joined with the original
    /// delimiters, e.g. `chien|dog|N-s|PL|Num`.
    pub break_gloss_category: String,
    /// Phrase-structure representation, bracketed.
    pub syntax: String,
    /// Logical-form representation.
    pub semantics: String,
    /// One of `tested`, `requires testing`.
    pub status: String,
    /// The user who elicited the datum.
    pub elicitor_id: Option<Id>,
    /// The user who entered the datum.
    pub enterer_id: Option<Id>,
    /// The user who verified the datum.
    pub verifier_id: Option<Id>,
    /// The user who last modified the datum.
    pub modifier_id: Option<Id>,
    /// The form's syntactic category.
    pub syntactic_category_id: Option<Id>,
    /// Ordered translations.
    pub translations: Vec<Translation>,
    /// Tags, including a possible `restricted`.
    pub tags: Vec<Tag>,
    /// Associated file ids.
    pub files: Vec<Id>,
}

impl Form {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let date_elicited: Option<String> = row.get("date_elicited")?;
        let entered: String = row.get("datetime_entered")?;
        let modified: String = row.get("datetime_modified")?;
        let break_ids: String = row.get("morpheme_break_ids")?;
        let gloss_ids: String = row.get("morpheme_gloss_ids")?;
        Ok(Self {
            id: row.get("id")?,
            uuid: row.get("uuid")?,
            transcription: row.get("transcription")?,
            phonetic_transcription: row.get("phonetic_transcription")?,
            narrow_phonetic_transcription: row.get("narrow_phonetic_transcription")?,
            morpheme_break: row.get("morpheme_break")?,
            morpheme_gloss: row.get("morpheme_gloss")?,
            comments: row.get("comments")?,
            speaker_comments: row.get("speaker_comments")?,
            grammaticality: row.get("grammaticality")?,
            date_elicited: date_elicited
                .and_then(|d| NaiveDate::parse_from_str(&d, super::DATE_FORMAT).ok()),
            datetime_entered: parse_datetime(&entered).unwrap_or_else(crate::core::now),
            datetime_modified: parse_datetime(&modified).unwrap_or_else(crate::core::now),
            syntactic_category_string: row.get("syntactic_category_string")?,
            morpheme_break_ids: serde_json::from_str(&break_ids)
                .unwrap_or(serde_json::Value::Array(vec![])),
            morpheme_gloss_ids: serde_json::from_str(&gloss_ids)
                .unwrap_or(serde_json::Value::Array(vec![])),
            break_gloss_category: row.get("break_gloss_category")?,
            syntax: row.get("syntax")?,
            semantics: row.get("semantics")?,
            status: row.get("status")?,
            elicitor_id: row.get("elicitor_id")?,
            enterer_id: row.get("enterer_id")?,
            verifier_id: row.get("verifier_id")?,
            modifier_id: row.get("modifier_id")?,
            syntactic_category_id: row.get("syntactic_category_id")?,
            translations: Vec::new(),
            tags: Vec::new(),
            files: Vec::new(),
        })
    }

    /// Whether this form carries the `restricted` tag.
    pub fn is_restricted(&self) -> bool {
        self.tags
            .iter()
            .any(|t| t.name == crate::core::constants::RESTRICTED_TAG)
    }
}

/// The writable fields of a form, as accepted by create and update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormWrite {
    /// Orthographic transcription (required).
    pub transcription: String,
    /// Broad phonetic transcription.
    #[serde(default)]
    pub phonetic_transcription: String,
    /// Narrow phonetic transcription.
    #[serde(default)]
    pub narrow_phonetic_transcription: String,
    /// Morphologically segmented transcription.
    #[serde(default)]
    pub morpheme_break: String,
    /// Aligned gloss.
    #[serde(default)]
    pub morpheme_gloss: String,
    /// Analyst commentary.
    #[serde(default)]
    pub comments: String,
    /// Speaker commentary.
    #[serde(default)]
    pub speaker_comments: String,
    /// Grammaticality judgment.
    #[serde(default)]
    pub grammaticality: String,
    /// Elicitation date.
    #[serde(default)]
    pub date_elicited: Option<NaiveDate>,
    /// Phrase-structure representation.
    #[serde(default)]
    pub syntax: String,
    /// Logical-form representation.
    #[serde(default)]
    pub semantics: String,
    /// Form status.
    #[serde(default)]
    pub status: Option<String>,
    /// Elicitor.
    #[serde(default)]
    pub elicitor_id: Option<Id>,
    /// Verifier.
    #[serde(default)]
    pub verifier_id: Option<Id>,
    /// Syntactic category.
    #[serde(default)]
    pub syntactic_category_id: Option<Id>,
    /// Translations (at least one required).
    #[serde(default)]
    pub translations: Vec<Translation>,
    /// Tag ids.
    #[serde(default)]
    pub tags: Vec<Id>,
    /// File ids.
    #[serde(default)]
    pub files: Vec<Id>,
}
