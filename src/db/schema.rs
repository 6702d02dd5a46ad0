//! Table definitions.
//!
//! Datetimes are stored as ISO-8601 text at second precision; JSON
//! columns hold serialized cross-references (translation lists, morpheme
//! reference nests, user snapshots inside backup rows).

use rusqlite::Connection;

use crate::core::Result;

const TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS user (
        id INTEGER PRIMARY KEY,
        username TEXT UNIQUE NOT NULL,
        first_name TEXT NOT NULL DEFAULT '',
        last_name TEXT NOT NULL DEFAULT '',
        email TEXT NOT NULL DEFAULT '',
        affiliation TEXT NOT NULL DEFAULT '',
        role TEXT NOT NULL DEFAULT 'viewer',
        datetime_modified TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS tag (
        id INTEGER PRIMARY KEY,
        name TEXT UNIQUE NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        datetime_modified TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS syntactic_category (
        id INTEGER PRIMARY KEY,
        name TEXT UNIQUE NOT NULL,
        type TEXT NOT NULL DEFAULT 'lexical',
        description TEXT NOT NULL DEFAULT '',
        datetime_modified TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS application_settings (
        id INTEGER PRIMARY KEY,
        morpheme_delimiters TEXT NOT NULL DEFAULT '-,=',
        unrestricted_users TEXT NOT NULL DEFAULT '[]',
        datetime_modified TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS file (
        id INTEGER PRIMARY KEY,
        filename TEXT NOT NULL,
        mime_type TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        parent_file_id INTEGER REFERENCES file (id),
        enterer_id INTEGER REFERENCES user (id),
        datetime_entered TEXT NOT NULL,
        datetime_modified TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS file_tag (
        file_id INTEGER NOT NULL REFERENCES file (id) ON DELETE CASCADE,
        tag_id INTEGER NOT NULL REFERENCES tag (id) ON DELETE CASCADE,
        PRIMARY KEY (file_id, tag_id)
    );",
    "CREATE TABLE IF NOT EXISTS form (
        id INTEGER PRIMARY KEY,
        uuid TEXT NOT NULL,
        transcription TEXT NOT NULL,
        phonetic_transcription TEXT NOT NULL DEFAULT '',
        narrow_phonetic_transcription TEXT NOT NULL DEFAULT '',
        morpheme_break TEXT NOT NULL DEFAULT '',
        morpheme_gloss TEXT NOT NULL DEFAULT '',
        comments TEXT NOT NULL DEFAULT '',
        speaker_comments TEXT NOT NULL DEFAULT '',
        grammaticality TEXT NOT NULL DEFAULT '',
        date_elicited TEXT,
        datetime_entered TEXT NOT NULL,
        datetime_modified TEXT NOT NULL,
        syntactic_category_string TEXT NOT NULL DEFAULT '',
        morpheme_break_ids TEXT NOT NULL DEFAULT '[]',
        morpheme_gloss_ids TEXT NOT NULL DEFAULT '[]',
        break_gloss_category TEXT NOT NULL DEFAULT '',
        syntax TEXT NOT NULL DEFAULT '',
        semantics TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'tested',
        elicitor_id INTEGER REFERENCES user (id),
        enterer_id INTEGER REFERENCES user (id),
        verifier_id INTEGER REFERENCES user (id),
        modifier_id INTEGER REFERENCES user (id),
        syntactic_category_id INTEGER REFERENCES syntactic_category (id)
    );",
    "CREATE TABLE IF NOT EXISTS translation (
        id INTEGER PRIMARY KEY,
        form_id INTEGER NOT NULL REFERENCES form (id) ON DELETE CASCADE,
        transcription TEXT NOT NULL,
        grammaticality TEXT NOT NULL DEFAULT '',
        datetime_modified TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS form_tag (
        form_id INTEGER NOT NULL REFERENCES form (id) ON DELETE CASCADE,
        tag_id INTEGER NOT NULL REFERENCES tag (id) ON DELETE CASCADE,
        PRIMARY KEY (form_id, tag_id)
    );",
    "CREATE TABLE IF NOT EXISTS form_file (
        form_id INTEGER NOT NULL REFERENCES form (id) ON DELETE CASCADE,
        file_id INTEGER NOT NULL REFERENCES file (id) ON DELETE CASCADE,
        PRIMARY KEY (form_id, file_id)
    );",
    "CREATE TABLE IF NOT EXISTS form_search (
        id INTEGER PRIMARY KEY,
        name TEXT UNIQUE NOT NULL,
        search TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        enterer_id INTEGER REFERENCES user (id),
        datetime_modified TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS corpus (
        id INTEGER PRIMARY KEY,
        uuid TEXT NOT NULL,
        name TEXT UNIQUE NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        content TEXT NOT NULL DEFAULT '',
        form_search_id INTEGER,
        enterer_id INTEGER REFERENCES user (id),
        modifier_id INTEGER REFERENCES user (id),
        datetime_entered TEXT NOT NULL,
        datetime_modified TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS corpus_form (
        corpus_id INTEGER NOT NULL REFERENCES corpus (id) ON DELETE CASCADE,
        form_id INTEGER NOT NULL REFERENCES form (id) ON DELETE CASCADE,
        position INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (corpus_id, form_id)
    );",
    "CREATE TABLE IF NOT EXISTS corpus_tag (
        corpus_id INTEGER NOT NULL REFERENCES corpus (id) ON DELETE CASCADE,
        tag_id INTEGER NOT NULL REFERENCES tag (id) ON DELETE CASCADE,
        PRIMARY KEY (corpus_id, tag_id)
    );",
    "CREATE TABLE IF NOT EXISTS corpus_file (
        id INTEGER PRIMARY KEY,
        corpus_id INTEGER NOT NULL REFERENCES corpus (id) ON DELETE CASCADE,
        filename TEXT NOT NULL,
        format TEXT NOT NULL,
        creator_id INTEGER REFERENCES user (id),
        datetime_created TEXT NOT NULL,
        datetime_modified TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS phonology (
        id INTEGER PRIMARY KEY,
        uuid TEXT NOT NULL,
        name TEXT UNIQUE NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        script TEXT NOT NULL DEFAULT '',
        compile_succeeded INTEGER NOT NULL DEFAULT 0,
        compile_message TEXT NOT NULL DEFAULT '',
        compile_attempt TEXT NOT NULL DEFAULT '',
        datetime_compiled TEXT,
        enterer_id INTEGER REFERENCES user (id),
        modifier_id INTEGER REFERENCES user (id),
        datetime_entered TEXT NOT NULL,
        datetime_modified TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS morphology (
        id INTEGER PRIMARY KEY,
        uuid TEXT NOT NULL,
        name TEXT UNIQUE NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        script_type TEXT NOT NULL DEFAULT 'lexc',
        rules TEXT NOT NULL DEFAULT '',
        rules_generated TEXT NOT NULL DEFAULT '',
        rules_corpus_id INTEGER,
        lexicon_corpus_id INTEGER,
        rich_upper INTEGER NOT NULL DEFAULT 1,
        rich_lower INTEGER NOT NULL DEFAULT 0,
        include_unknowns INTEGER NOT NULL DEFAULT 0,
        extract_morphemes_from_rules_corpus INTEGER NOT NULL DEFAULT 0,
        compile_succeeded INTEGER NOT NULL DEFAULT 0,
        compile_message TEXT NOT NULL DEFAULT '',
        compile_attempt TEXT NOT NULL DEFAULT '',
        generate_attempt TEXT NOT NULL DEFAULT '',
        generate_message TEXT NOT NULL DEFAULT '',
        datetime_compiled TEXT,
        enterer_id INTEGER REFERENCES user (id),
        modifier_id INTEGER REFERENCES user (id),
        datetime_entered TEXT NOT NULL,
        datetime_modified TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS morpheme_language_model (
        id INTEGER PRIMARY KEY,
        uuid TEXT NOT NULL,
        name TEXT UNIQUE NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        corpus_id INTEGER NOT NULL,
        vocabulary_morphology_id INTEGER,
        toolkit TEXT NOT NULL DEFAULT 'mitlm',
        \"order\" INTEGER NOT NULL DEFAULT 3,
        smoothing TEXT NOT NULL DEFAULT 'ModKN',
        categorial INTEGER NOT NULL DEFAULT 0,
        rare_delimiter TEXT NOT NULL DEFAULT '\u{2980}',
        generate_succeeded INTEGER NOT NULL DEFAULT 0,
        generate_message TEXT NOT NULL DEFAULT '',
        generate_attempt TEXT NOT NULL DEFAULT '',
        perplexity REAL,
        perplexity_computed INTEGER NOT NULL DEFAULT 0,
        perplexity_attempt TEXT NOT NULL DEFAULT '',
        enterer_id INTEGER REFERENCES user (id),
        modifier_id INTEGER REFERENCES user (id),
        datetime_entered TEXT NOT NULL,
        datetime_modified TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS morphological_parser (
        id INTEGER PRIMARY KEY,
        uuid TEXT NOT NULL,
        name TEXT UNIQUE NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        phonology_id INTEGER NOT NULL,
        morphology_id INTEGER NOT NULL,
        language_model_id INTEGER NOT NULL,
        compile_succeeded INTEGER NOT NULL DEFAULT 0,
        compile_message TEXT NOT NULL DEFAULT '',
        compile_attempt TEXT NOT NULL DEFAULT '',
        generate_attempt TEXT NOT NULL DEFAULT '',
        generate_message TEXT NOT NULL DEFAULT '',
        enterer_id INTEGER REFERENCES user (id),
        modifier_id INTEGER REFERENCES user (id),
        datetime_entered TEXT NOT NULL,
        datetime_modified TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS collection (
        id INTEGER PRIMARY KEY,
        uuid TEXT NOT NULL,
        title TEXT NOT NULL,
        type TEXT NOT NULL DEFAULT 'other',
        url TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        markup_language TEXT NOT NULL DEFAULT 'Markdown',
        contents TEXT NOT NULL DEFAULT '',
        contents_unpacked TEXT NOT NULL DEFAULT '',
        html TEXT NOT NULL DEFAULT '',
        date_elicited TEXT,
        elicitor_id INTEGER REFERENCES user (id),
        enterer_id INTEGER REFERENCES user (id),
        modifier_id INTEGER REFERENCES user (id),
        datetime_entered TEXT NOT NULL,
        datetime_modified TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS collection_form (
        collection_id INTEGER NOT NULL REFERENCES collection (id) ON DELETE CASCADE,
        form_id INTEGER NOT NULL REFERENCES form (id) ON DELETE CASCADE,
        PRIMARY KEY (collection_id, form_id)
    );",
    "CREATE TABLE IF NOT EXISTS collection_tag (
        collection_id INTEGER NOT NULL REFERENCES collection (id) ON DELETE CASCADE,
        tag_id INTEGER NOT NULL REFERENCES tag (id) ON DELETE CASCADE,
        PRIMARY KEY (collection_id, tag_id)
    );",
    "CREATE TABLE IF NOT EXISTS collection_file (
        collection_id INTEGER NOT NULL REFERENCES collection (id) ON DELETE CASCADE,
        file_id INTEGER NOT NULL REFERENCES file (id) ON DELETE CASCADE,
        PRIMARY KEY (collection_id, file_id)
    );",
];

/// Backup tables share one shape: the live row's id and UUID, the
/// snapshot (full JSON serialization, user refs and relations included),
/// and the snapshot's modification time.
const BACKUP_TABLES: &[&str] = &[
    "form_backup",
    "collection_backup",
    "corpus_backup",
    "phonology_backup",
    "morphology_backup",
    "morpheme_language_model_backup",
    "morphological_parser_backup",
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_form_uuid ON form (uuid);",
    "CREATE INDEX IF NOT EXISTS idx_form_morpheme_break ON form (morpheme_break);",
    "CREATE INDEX IF NOT EXISTS idx_form_morpheme_gloss ON form (morpheme_gloss);",
    "CREATE INDEX IF NOT EXISTS idx_translation_form ON translation (form_id);",
    "CREATE INDEX IF NOT EXISTS idx_corpus_form_corpus ON corpus_form (corpus_id, position);",
];

/// Create every table and index that does not already exist.
pub fn initialize(conn: &Connection) -> Result<()> {
    for ddl in TABLES {
        conn.execute_batch(ddl)?;
    }
    for name in BACKUP_TABLES {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {name} (
                id INTEGER PRIMARY KEY,
                resource_id INTEGER NOT NULL,
                uuid TEXT NOT NULL,
                snapshot TEXT NOT NULL,
                datetime_modified TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{name}_uuid ON {name} (uuid);"
        ))?;
    }
    for ddl in INDEXES {
        conn.execute_batch(ddl)?;
    }
    Ok(())
}
