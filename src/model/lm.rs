//! The morpheme language model resource.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::parse_datetime;
use crate::core::Id;

/// An n-gram language model over morphemes (or over categories when
/// `categorial`), estimated by an external toolkit from the forms of a
/// training corpus and queried through an on-disk trie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MorphemeLanguageModel {
    /// Row id.
    pub id: Id,
    /// Stable identifier shared with backup rows.
    pub uuid: String,
    /// Unique name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Training corpus (required).
    pub corpus_id: Id,
    /// Morphology whose surface lexicon defines the allowed vocabulary.
    pub vocabulary_morphology_id: Option<Id>,
    /// Toolkit registry name, e.g. `mitlm`.
    pub toolkit: String,
    /// N-gram order, 2–5.
    pub order: i64,
    /// Toolkit-specific smoothing algorithm name.
    pub smoothing: String,
    /// Operate on category sequences instead of morpheme-form sequences.
    pub categorial: bool,
    /// The shape/gloss delimiter in LM tokens; must match the
    /// morphology's when the LM is not categorial.
    pub rare_delimiter: String,
    /// Whether the most recent generate run produced a fresh trie.
    pub generate_succeeded: bool,
    /// Outcome message of the most recent generate run.
    pub generate_message: String,
    /// Generate attempt nonce.
    pub generate_attempt: String,
    /// Mean perplexity over held-out splits, when computed.
    pub perplexity: Option<f64>,
    /// Whether `perplexity` holds a value.
    pub perplexity_computed: bool,
    /// Perplexity attempt nonce.
    pub perplexity_attempt: String,
    /// Creating user.
    pub enterer_id: Option<Id>,
    /// Last modifying user.
    pub modifier_id: Option<Id>,
    /// Creation time.
    pub datetime_entered: DateTime<Utc>,
    /// Last modification time.
    pub datetime_modified: DateTime<Utc>,
}

impl MorphemeLanguageModel {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let entered: String = row.get("datetime_entered")?;
        let modified: String = row.get("datetime_modified")?;
        Ok(Self {
            id: row.get("id")?,
            uuid: row.get("uuid")?,
            name: row.get("name")?,
            description: row.get("description")?,
            corpus_id: row.get("corpus_id")?,
            vocabulary_morphology_id: row.get("vocabulary_morphology_id")?,
            toolkit: row.get("toolkit")?,
            order: row.get("order")?,
            smoothing: row.get("smoothing")?,
            categorial: row.get("categorial")?,
            rare_delimiter: row.get("rare_delimiter")?,
            generate_succeeded: row.get("generate_succeeded")?,
            generate_message: row.get("generate_message")?,
            generate_attempt: row.get("generate_attempt")?,
            perplexity: row.get("perplexity")?,
            perplexity_computed: row.get("perplexity_computed")?,
            perplexity_attempt: row.get("perplexity_attempt")?,
            enterer_id: row.get("enterer_id")?,
            modifier_id: row.get("modifier_id")?,
            datetime_entered: parse_datetime(&entered).unwrap_or_else(crate::core::now),
            datetime_modified: parse_datetime(&modified).unwrap_or_else(crate::core::now),
        })
    }
}
