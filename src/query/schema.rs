//! The static search schema: which models are searchable, which
//! attributes each exposes, how foreign attributes relate, and which
//! cross-model joins are permitted.
//!
//! Altering these tables is how the set of accepted queries changes;
//! the compiler itself is schema-agnostic.

/// How an attribute relates to its value or to a foreign model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrKind {
    /// A plain column.
    Scalar,
    /// A column holding an ISO-8601 date; values are validated and
    /// converted.
    Date,
    /// A column holding an ISO-8601 datetime; values are validated,
    /// converted, and rounded to the nearest second on MySQL/InnoDB.
    Datetime,
    /// A many-to-one reference; the name of the foreign model. Only
    /// equality relations apply to the reference itself.
    ScalarRef(&'static str),
    /// A -to-many reference; the foreign model and the linkage.
    CollectionRef(&'static str, Link),
}

/// How a collection attribute's rows are reached from the owning table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    /// The foreign table carries a foreign key to the owner (one-to-many),
    /// e.g. `translation.form_id`.
    Direct {
        /// FK column on the foreign table.
        fk_col: &'static str,
    },
    /// An association table links the two (many-to-many).
    Table {
        /// Association table name.
        table: &'static str,
        /// Column referencing the owner.
        self_col: &'static str,
        /// Column referencing the foreign model.
        other_col: &'static str,
    },
}

/// Everything the compiler needs to know about one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrInfo {
    /// The SQL column (already quoted where the name needs it). For
    /// scalar references this is the `_id` column.
    pub column: &'static str,
    /// Relation semantics.
    pub kind: AttrKind,
    /// Whether the column is string-typed; drives collation wrapping.
    pub string: bool,
}

fn s(column: &'static str) -> AttrInfo {
    AttrInfo { column, kind: AttrKind::Scalar, string: true }
}

fn n(column: &'static str) -> AttrInfo {
    AttrInfo { column, kind: AttrKind::Scalar, string: false }
}

fn d(column: &'static str) -> AttrInfo {
    AttrInfo { column, kind: AttrKind::Date, string: false }
}

fn dt(column: &'static str) -> AttrInfo {
    AttrInfo { column, kind: AttrKind::Datetime, string: false }
}

fn fk(column: &'static str, model: &'static str) -> AttrInfo {
    AttrInfo { column, kind: AttrKind::ScalarRef(model), string: false }
}

fn many(model: &'static str, link: Link) -> AttrInfo {
    AttrInfo { column: "id", kind: AttrKind::CollectionRef(model, link), string: false }
}

fn assoc(
    model: &'static str,
    table: &'static str,
    self_col: &'static str,
    other_col: &'static str,
) -> AttrInfo {
    many(model, Link::Table { table, self_col, other_col })
}

/// The table backing a searchable model, or `None` for unknown models.
pub fn table_name(model: &str) -> Option<&'static str> {
    Some(match model {
        "Form" => "form",
        "FormBackup" => "form_backup",
        "File" => "file",
        "Translation" => "translation",
        "Tag" => "tag",
        "User" => "user",
        "SyntacticCategory" => "syntactic_category",
        "FormSearch" => "form_search",
        "Corpus" => "corpus",
        "CorpusBackup" => "corpus_backup",
        "Collection" => "collection",
        "CollectionBackup" => "collection_backup",
        "Phonology" => "phonology",
        "PhonologyBackup" => "phonology_backup",
        "Morphology" => "morphology",
        "MorphologyBackup" => "morphology_backup",
        "MorphemeLanguageModel" => "morpheme_language_model",
        "MorphemeLanguageModelBackup" => "morpheme_language_model_backup",
        "MorphologicalParser" => "morphological_parser",
        "MorphologicalParserBackup" => "morphological_parser_backup",
        _ => return None,
    })
}

/// Look up an attribute of a model, or `None` when the pair is not
/// searchable.
pub fn attr_info(model: &str, attr: &str) -> Option<AttrInfo> {
    Some(match (model, attr) {
        // Form
        ("Form", "id") => n("id"),
        ("Form", "UUID") => s("uuid"),
        ("Form", "transcription") => s("transcription"),
        ("Form", "phonetic_transcription") => s("phonetic_transcription"),
        ("Form", "narrow_phonetic_transcription") => s("narrow_phonetic_transcription"),
        ("Form", "morpheme_break") => s("morpheme_break"),
        ("Form", "morpheme_gloss") => s("morpheme_gloss"),
        ("Form", "comments") => s("comments"),
        ("Form", "speaker_comments") => s("speaker_comments"),
        ("Form", "grammaticality") => s("grammaticality"),
        ("Form", "date_elicited") => d("date_elicited"),
        ("Form", "datetime_entered") => dt("datetime_entered"),
        ("Form", "datetime_modified") => dt("datetime_modified"),
        ("Form", "syntactic_category_string") => s("syntactic_category_string"),
        ("Form", "morpheme_break_ids") => s("morpheme_break_ids"),
        ("Form", "morpheme_gloss_ids") => s("morpheme_gloss_ids"),
        ("Form", "break_gloss_category") => s("break_gloss_category"),
        ("Form", "syntax") => s("syntax"),
        ("Form", "semantics") => s("semantics"),
        ("Form", "status") => s("status"),
        ("Form", "elicitor") => fk("elicitor_id", "User"),
        ("Form", "enterer") => fk("enterer_id", "User"),
        ("Form", "verifier") => fk("verifier_id", "User"),
        ("Form", "modifier") => fk("modifier_id", "User"),
        ("Form", "syntactic_category") => {
            fk("syntactic_category_id", "SyntacticCategory")
        }
        ("Form", "translations") => {
            many("Translation", Link::Direct { fk_col: "form_id" })
        }
        ("Form", "tags") => assoc("Tag", "form_tag", "form_id", "tag_id"),
        ("Form", "files") => assoc("File", "form_file", "form_id", "file_id"),
        ("Form", "collections") => {
            assoc("Collection", "collection_form", "form_id", "collection_id")
        }
        ("Form", "corpora") => assoc("Corpus", "corpus_form", "form_id", "corpus_id"),

        // Form backups
        ("FormBackup", "id") => n("id"),
        ("FormBackup", "UUID") => s("uuid"),
        ("FormBackup", "form_id") => n("resource_id"),
        ("FormBackup", "datetime_modified") => dt("datetime_modified"),

        // File
        ("File", "id") => n("id"),
        ("File", "filename") => s("filename"),
        ("File", "MIME_type") => s("mime_type"),
        ("File", "description") => s("description"),
        ("File", "datetime_entered") => dt("datetime_entered"),
        ("File", "datetime_modified") => dt("datetime_modified"),
        ("File", "parent_file") => fk("parent_file_id", "File"),
        ("File", "enterer") => fk("enterer_id", "User"),
        ("File", "tags") => assoc("Tag", "file_tag", "file_id", "tag_id"),
        ("File", "forms") => assoc("Form", "form_file", "file_id", "form_id"),
        ("File", "collections") => {
            assoc("Collection", "collection_file", "file_id", "collection_id")
        }

        // Translation
        ("Translation", "id") => n("id"),
        ("Translation", "transcription") => s("transcription"),
        ("Translation", "grammaticality") => s("grammaticality"),
        ("Translation", "datetime_modified") => dt("datetime_modified"),

        // Tag
        ("Tag", "id") => n("id"),
        ("Tag", "name") => s("name"),
        ("Tag", "description") => s("description"),
        ("Tag", "datetime_modified") => dt("datetime_modified"),

        // User
        ("User", "id") => n("id"),
        ("User", "username") => s("username"),
        ("User", "first_name") => s("first_name"),
        ("User", "last_name") => s("last_name"),
        ("User", "email") => s("email"),
        ("User", "affiliation") => s("affiliation"),
        ("User", "role") => s("role"),
        ("User", "datetime_modified") => dt("datetime_modified"),

        // SyntacticCategory
        ("SyntacticCategory", "id") => n("id"),
        ("SyntacticCategory", "name") => s("name"),
        ("SyntacticCategory", "type") => s("type"),
        ("SyntacticCategory", "description") => s("description"),
        ("SyntacticCategory", "datetime_modified") => dt("datetime_modified"),

        // FormSearch
        ("FormSearch", "id") => n("id"),
        ("FormSearch", "name") => s("name"),
        ("FormSearch", "search") => s("search"),
        ("FormSearch", "description") => s("description"),
        ("FormSearch", "enterer") => fk("enterer_id", "User"),
        ("FormSearch", "datetime_modified") => dt("datetime_modified"),

        // Corpus
        ("Corpus", "id") => n("id"),
        ("Corpus", "UUID") => s("uuid"),
        ("Corpus", "name") => s("name"),
        ("Corpus", "description") => s("description"),
        ("Corpus", "content") => s("content"),
        ("Corpus", "enterer") => fk("enterer_id", "User"),
        ("Corpus", "modifier") => fk("modifier_id", "User"),
        ("Corpus", "form_search") => fk("form_search_id", "FormSearch"),
        ("Corpus", "datetime_entered") => dt("datetime_entered"),
        ("Corpus", "datetime_modified") => dt("datetime_modified"),
        ("Corpus", "tags") => assoc("Tag", "corpus_tag", "corpus_id", "tag_id"),
        ("Corpus", "forms") => assoc("Form", "corpus_form", "corpus_id", "form_id"),

        ("CorpusBackup", "id") => n("id"),
        ("CorpusBackup", "UUID") => s("uuid"),
        ("CorpusBackup", "corpus_id") => n("resource_id"),
        ("CorpusBackup", "datetime_modified") => dt("datetime_modified"),

        // Collection
        ("Collection", "id") => n("id"),
        ("Collection", "UUID") => s("uuid"),
        ("Collection", "title") => s("title"),
        ("Collection", "type") => s("type"),
        ("Collection", "url") => s("url"),
        ("Collection", "description") => s("description"),
        ("Collection", "markup_language") => s("markup_language"),
        ("Collection", "contents") => s("contents"),
        ("Collection", "html") => s("html"),
        ("Collection", "date_elicited") => d("date_elicited"),
        ("Collection", "datetime_entered") => dt("datetime_entered"),
        ("Collection", "datetime_modified") => dt("datetime_modified"),
        ("Collection", "elicitor") => fk("elicitor_id", "User"),
        ("Collection", "enterer") => fk("enterer_id", "User"),
        ("Collection", "modifier") => fk("modifier_id", "User"),
        ("Collection", "tags") => {
            assoc("Tag", "collection_tag", "collection_id", "tag_id")
        }
        ("Collection", "forms") => {
            assoc("Form", "collection_form", "collection_id", "form_id")
        }
        ("Collection", "files") => {
            assoc("File", "collection_file", "collection_id", "file_id")
        }

        ("CollectionBackup", "id") => n("id"),
        ("CollectionBackup", "UUID") => s("uuid"),
        ("CollectionBackup", "collection_id") => n("resource_id"),
        ("CollectionBackup", "datetime_modified") => dt("datetime_modified"),

        // Phonology
        ("Phonology", "id") => n("id"),
        ("Phonology", "UUID") => s("uuid"),
        ("Phonology", "name") => s("name"),
        ("Phonology", "description") => s("description"),
        ("Phonology", "script") => s("script"),
        ("Phonology", "compile_succeeded") => n("compile_succeeded"),
        ("Phonology", "compile_message") => s("compile_message"),
        ("Phonology", "compile_attempt") => s("compile_attempt"),
        ("Phonology", "datetime_compiled") => dt("datetime_compiled"),
        ("Phonology", "datetime_entered") => dt("datetime_entered"),
        ("Phonology", "datetime_modified") => dt("datetime_modified"),
        ("Phonology", "enterer") => fk("enterer_id", "User"),
        ("Phonology", "modifier") => fk("modifier_id", "User"),

        ("PhonologyBackup", "id") => n("id"),
        ("PhonologyBackup", "UUID") => s("uuid"),
        ("PhonologyBackup", "phonology_id") => n("resource_id"),
        ("PhonologyBackup", "datetime_modified") => dt("datetime_modified"),

        // Morphology
        ("Morphology", "id") => n("id"),
        ("Morphology", "UUID") => s("uuid"),
        ("Morphology", "name") => s("name"),
        ("Morphology", "description") => s("description"),
        ("Morphology", "script_type") => s("script_type"),
        ("Morphology", "rules") => s("rules"),
        ("Morphology", "rules_generated") => s("rules_generated"),
        ("Morphology", "rich_upper") => n("rich_upper"),
        ("Morphology", "rich_lower") => n("rich_lower"),
        ("Morphology", "include_unknowns") => n("include_unknowns"),
        ("Morphology", "extract_morphemes_from_rules_corpus") => {
            n("extract_morphemes_from_rules_corpus")
        }
        ("Morphology", "compile_succeeded") => n("compile_succeeded"),
        ("Morphology", "compile_message") => s("compile_message"),
        ("Morphology", "compile_attempt") => s("compile_attempt"),
        ("Morphology", "generate_attempt") => s("generate_attempt"),
        ("Morphology", "generate_message") => s("generate_message"),
        ("Morphology", "datetime_compiled") => dt("datetime_compiled"),
        ("Morphology", "datetime_entered") => dt("datetime_entered"),
        ("Morphology", "datetime_modified") => dt("datetime_modified"),
        ("Morphology", "lexicon_corpus") => fk("lexicon_corpus_id", "Corpus"),
        ("Morphology", "rules_corpus") => fk("rules_corpus_id", "Corpus"),
        ("Morphology", "enterer") => fk("enterer_id", "User"),
        ("Morphology", "modifier") => fk("modifier_id", "User"),

        ("MorphologyBackup", "id") => n("id"),
        ("MorphologyBackup", "UUID") => s("uuid"),
        ("MorphologyBackup", "morphology_id") => n("resource_id"),
        ("MorphologyBackup", "datetime_modified") => dt("datetime_modified"),

        // MorphemeLanguageModel
        ("MorphemeLanguageModel", "id") => n("id"),
        ("MorphemeLanguageModel", "UUID") => s("uuid"),
        ("MorphemeLanguageModel", "name") => s("name"),
        ("MorphemeLanguageModel", "description") => s("description"),
        ("MorphemeLanguageModel", "toolkit") => s("toolkit"),
        ("MorphemeLanguageModel", "order") => n("\"order\""),
        ("MorphemeLanguageModel", "smoothing") => s("smoothing"),
        ("MorphemeLanguageModel", "categorial") => n("categorial"),
        ("MorphemeLanguageModel", "rare_delimiter") => s("rare_delimiter"),
        ("MorphemeLanguageModel", "generate_succeeded") => n("generate_succeeded"),
        ("MorphemeLanguageModel", "generate_message") => s("generate_message"),
        ("MorphemeLanguageModel", "generate_attempt") => s("generate_attempt"),
        ("MorphemeLanguageModel", "perplexity") => n("perplexity"),
        ("MorphemeLanguageModel", "perplexity_computed") => n("perplexity_computed"),
        ("MorphemeLanguageModel", "perplexity_attempt") => s("perplexity_attempt"),
        ("MorphemeLanguageModel", "datetime_entered") => dt("datetime_entered"),
        ("MorphemeLanguageModel", "datetime_modified") => dt("datetime_modified"),
        ("MorphemeLanguageModel", "corpus") => fk("corpus_id", "Corpus"),
        ("MorphemeLanguageModel", "vocabulary_morphology") => {
            fk("vocabulary_morphology_id", "Morphology")
        }
        ("MorphemeLanguageModel", "enterer") => fk("enterer_id", "User"),
        ("MorphemeLanguageModel", "modifier") => fk("modifier_id", "User"),

        ("MorphemeLanguageModelBackup", "id") => n("id"),
        ("MorphemeLanguageModelBackup", "UUID") => s("uuid"),
        ("MorphemeLanguageModelBackup", "morpheme_language_model_id") => {
            n("resource_id")
        }
        ("MorphemeLanguageModelBackup", "datetime_modified") => dt("datetime_modified"),

        // MorphologicalParser
        ("MorphologicalParser", "id") => n("id"),
        ("MorphologicalParser", "UUID") => s("uuid"),
        ("MorphologicalParser", "name") => s("name"),
        ("MorphologicalParser", "description") => s("description"),
        ("MorphologicalParser", "compile_succeeded") => n("compile_succeeded"),
        ("MorphologicalParser", "compile_message") => s("compile_message"),
        ("MorphologicalParser", "compile_attempt") => s("compile_attempt"),
        ("MorphologicalParser", "generate_attempt") => s("generate_attempt"),
        ("MorphologicalParser", "datetime_entered") => dt("datetime_entered"),
        ("MorphologicalParser", "datetime_modified") => dt("datetime_modified"),
        ("MorphologicalParser", "phonology") => fk("phonology_id", "Phonology"),
        ("MorphologicalParser", "morphology") => fk("morphology_id", "Morphology"),
        ("MorphologicalParser", "language_model") => {
            fk("language_model_id", "MorphemeLanguageModel")
        }
        ("MorphologicalParser", "enterer") => fk("enterer_id", "User"),
        ("MorphologicalParser", "modifier") => fk("modifier_id", "User"),

        ("MorphologicalParserBackup", "id") => n("id"),
        ("MorphologicalParserBackup", "UUID") => s("uuid"),
        ("MorphologicalParserBackup", "morphological_parser_id") => n("resource_id"),
        ("MorphologicalParserBackup", "datetime_modified") => dt("datetime_modified"),

        _ => return None,
    })
}

/// Cross-model joinability: when a filter names `other` while the query
/// targets `target`, which collection attribute of `target` carries the
/// join. `None` means the pair is not joinable.
pub fn join_attr(target: &str, other: &str) -> Option<&'static str> {
    Some(match (target, other) {
        ("Form", "File") => "files",
        ("Form", "Translation") => "translations",
        ("Form", "Tag") => "tags",
        ("Form", "Collection") => "collections",
        ("Form", "Corpus") => "corpora",
        ("File", "Tag") => "tags",
        ("File", "Form") => "forms",
        ("File", "Collection") => "collections",
        ("Collection", "Form") => "forms",
        ("Collection", "File") => "files",
        ("Collection", "Tag") => "tags",
        _ => return None,
    })
}
