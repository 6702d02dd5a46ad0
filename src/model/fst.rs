//! FST-backed resources: phonologies, morphologies, and the parsers
//! composed from them.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::{parse_datetime, parse_datetime_opt};
use crate::core::Id;

/// A phonology: a foma script mapping underlying morpheme sequences to
/// surface transcriptions, compiled on request into a binary FST.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phonology {
    /// Row id.
    pub id: Id,
    /// Stable identifier shared with backup rows.
    pub uuid: String,
    /// Unique name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// The foma script, including any `#test underlying -> surface`
    /// lines.
    pub script: String,
    /// Whether the most recent compile succeeded.
    pub compile_succeeded: bool,
    /// Outcome message of the most recent compile.
    pub compile_message: String,
    /// Nonce written when a compile is enqueued; clients poll until the
    /// resource's nonce matches the one they were handed.
    pub compile_attempt: String,
    /// Completion time of the last successful compile.
    pub datetime_compiled: Option<DateTime<Utc>>,
    /// Creating user.
    pub enterer_id: Option<Id>,
    /// Last modifying user.
    pub modifier_id: Option<Id>,
    /// Creation time.
    pub datetime_entered: DateTime<Utc>,
    /// Last modification time.
    pub datetime_modified: DateTime<Utc>,
}

impl Phonology {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let entered: String = row.get("datetime_entered")?;
        let modified: String = row.get("datetime_modified")?;
        let compiled: Option<String> = row.get("datetime_compiled")?;
        Ok(Self {
            id: row.get("id")?,
            uuid: row.get("uuid")?,
            name: row.get("name")?,
            description: row.get("description")?,
            script: row.get("script")?,
            compile_succeeded: row.get("compile_succeeded")?,
            compile_message: row.get("compile_message")?,
            compile_attempt: row.get("compile_attempt")?,
            datetime_compiled: parse_datetime_opt(compiled),
            enterer_id: row.get("enterer_id")?,
            modifier_id: row.get("modifier_id")?,
            datetime_entered: parse_datetime(&entered).unwrap_or_else(crate::core::now),
            datetime_modified: parse_datetime(&modified).unwrap_or_else(crate::core::now),
        })
    }
}

/// A morphology: a structural description of the object language's
/// word formation, from which a foma script is derived and compiled.
///
/// Word structure comes either from `rules` (explicit category-sequence
/// strings like `V-Agr`) or from a rules corpus whose analyzed forms
/// supply the attested sequences; the morpheme inventory comes from the
/// lexicon corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Morphology {
    /// Row id.
    pub id: Id,
    /// Stable identifier shared with backup rows.
    pub uuid: String,
    /// Unique name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Script flavor: `regex` or `lexc`.
    pub script_type: String,
    /// Explicit whitespace-separated category-sequence rules.
    pub rules: String,
    /// The rules actually in force after the last generate.
    pub rules_generated: String,
    /// Corpus whose forms' category sequences define the rules.
    pub rules_corpus_id: Option<Id>,
    /// Corpus supplying the morpheme inventory.
    pub lexicon_corpus_id: Option<Id>,
    /// Emit category suffixes on the upper (analysis) side.
    pub rich_upper: bool,
    /// Emit category suffixes on the lower (shape) side.
    pub rich_lower: bool,
    /// Admit unknown morphemes via a wildcard matcher.
    pub include_unknowns: bool,
    /// Also harvest morphemes from the rules corpus, not only the
    /// lexicon corpus.
    pub extract_morphemes_from_rules_corpus: bool,
    /// Whether the most recent compile succeeded.
    pub compile_succeeded: bool,
    /// Outcome message of the most recent compile.
    pub compile_message: String,
    /// Compile attempt nonce.
    pub compile_attempt: String,
    /// Generate attempt nonce.
    pub generate_attempt: String,
    /// Outcome message of the most recent script generation.
    pub generate_message: String,
    /// Completion time of the last successful compile.
    pub datetime_compiled: Option<DateTime<Utc>>,
    /// Creating user.
    pub enterer_id: Option<Id>,
    /// Last modifying user.
    pub modifier_id: Option<Id>,
    /// Creation time.
    pub datetime_entered: DateTime<Utc>,
    /// Last modification time.
    pub datetime_modified: DateTime<Utc>,
}

impl Morphology {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let entered: String = row.get("datetime_entered")?;
        let modified: String = row.get("datetime_modified")?;
        let compiled: Option<String> = row.get("datetime_compiled")?;
        Ok(Self {
            id: row.get("id")?,
            uuid: row.get("uuid")?,
            name: row.get("name")?,
            description: row.get("description")?,
            script_type: row.get("script_type")?,
            rules: row.get("rules")?,
            rules_generated: row.get("rules_generated")?,
            rules_corpus_id: row.get("rules_corpus_id")?,
            lexicon_corpus_id: row.get("lexicon_corpus_id")?,
            rich_upper: row.get("rich_upper")?,
            rich_lower: row.get("rich_lower")?,
            include_unknowns: row.get("include_unknowns")?,
            extract_morphemes_from_rules_corpus: row
                .get("extract_morphemes_from_rules_corpus")?,
            compile_succeeded: row.get("compile_succeeded")?,
            compile_message: row.get("compile_message")?,
            compile_attempt: row.get("compile_attempt")?,
            generate_attempt: row.get("generate_attempt")?,
            generate_message: row.get("generate_message")?,
            datetime_compiled: parse_datetime_opt(compiled),
            enterer_id: row.get("enterer_id")?,
            modifier_id: row.get("modifier_id")?,
            datetime_entered: parse_datetime(&entered).unwrap_or_else(crate::core::now),
            datetime_modified: parse_datetime(&modified).unwrap_or_else(crate::core::now),
        })
    }
}

/// A morphological parser: the composition of a phonology, a morphology,
/// and a morpheme language model into a single pipeline that maps
/// surface transcriptions to ranked analyses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MorphologicalParser {
    /// Row id.
    pub id: Id,
    /// Stable identifier shared with backup rows.
    pub uuid: String,
    /// Unique name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// The phonology component.
    pub phonology_id: Id,
    /// The morphology component.
    pub morphology_id: Id,
    /// The language model used to rank candidate analyses.
    pub language_model_id: Id,
    /// Whether the most recent compile succeeded.
    pub compile_succeeded: bool,
    /// Outcome message of the most recent compile.
    pub compile_message: String,
    /// Compile attempt nonce; also keys the parse cache.
    pub compile_attempt: String,
    /// Generate attempt nonce.
    pub generate_attempt: String,
    /// Outcome message of the most recent script generation.
    pub generate_message: String,
    /// Creating user.
    pub enterer_id: Option<Id>,
    /// Last modifying user.
    pub modifier_id: Option<Id>,
    /// Creation time.
    pub datetime_entered: DateTime<Utc>,
    /// Last modification time.
    pub datetime_modified: DateTime<Utc>,
}

impl MorphologicalParser {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let entered: String = row.get("datetime_entered")?;
        let modified: String = row.get("datetime_modified")?;
        Ok(Self {
            id: row.get("id")?,
            uuid: row.get("uuid")?,
            name: row.get("name")?,
            description: row.get("description")?,
            phonology_id: row.get("phonology_id")?,
            morphology_id: row.get("morphology_id")?,
            language_model_id: row.get("language_model_id")?,
            compile_succeeded: row.get("compile_succeeded")?,
            compile_message: row.get("compile_message")?,
            compile_attempt: row.get("compile_attempt")?,
            generate_attempt: row.get("generate_attempt")?,
            generate_message: row.get("generate_message")?,
            enterer_id: row.get("enterer_id")?,
            modifier_id: row.get("modifier_id")?,
            datetime_entered: parse_datetime(&entered).unwrap_or_else(crate::core::now),
            datetime_modified: parse_datetime(&modified).unwrap_or_else(crate::core::now),
        })
    }
}
