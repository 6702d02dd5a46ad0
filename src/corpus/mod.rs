//! The corpus engine.
//!
//! A corpus materializes a collection of forms from either a saved form
//! search or an explicit id list, writes treebank / transcription files
//! (plus gzipped companions and a TGrep2 index) into its artifact
//! directory, and answers TGrep2 and list-form searches restricted to
//! its membership.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, OptionalExtension};
use serde_json::Value as Json;
use tracing::{debug, info};

use crate::core::constants::RESTRICTED_TAG;
use crate::core::types::normalize;
use crate::core::{Id, OldbError, Result};
use crate::forms::analyze_word;
use crate::layout::ResourceKind;
use crate::model::{
    format_datetime, Corpus, CorpusFile, CorpusWrite, Form, FormSearch, History, User,
};
use crate::query::QueryCompiler;
use crate::store::{paginate, HistoryKey, Page, Paginator, Store};
use crate::toolkit;

/// How long a `tgrep2 -p` index build may run.
const TGREP2_COMPILE_TIMEOUT: Duration = Duration::from_secs(60);

/// How long a `tgrep2` search may run.
const TGREP2_SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One entry in the corpus file-format registry.
#[derive(Debug, Clone, Copy)]
pub struct CorpusFormat {
    /// Registry key, e.g. `treebank`.
    pub name: &'static str,
    /// File extension without dot.
    pub extension: &'static str,
    /// Suffix between the id and the extension, e.g. `_transcriptions`.
    pub suffix: &'static str,
    /// Per-form line writer.
    pub writer: fn(&Form) -> String,
}

impl CorpusFormat {
    /// The artifact filename for a corpus id, e.g. `corpus_1.tbk`.
    pub fn filename(&self, corpus_id: Id) -> String {
        format!("corpus_{}{}.{}", corpus_id, self.suffix, self.extension)
    }
}

fn treebank_line(form: &Form) -> String {
    format!("(TOP-{} {})\n", form.id, form.syntax)
}

fn transcription_line(form: &Form) -> String {
    format!("{}\n", form.transcription)
}

/// The format registry.
pub const CORPUS_FORMATS: [CorpusFormat; 2] = [
    CorpusFormat { name: "treebank", extension: "tbk", suffix: "", writer: treebank_line },
    CorpusFormat {
        name: "transcriptions only",
        extension: "txt",
        suffix: "_transcriptions",
        writer: transcription_line,
    },
];

/// Look up a format by registry key.
pub fn corpus_format(name: &str) -> Option<&'static CorpusFormat> {
    CORPUS_FORMATS.iter().find(|f| f.name == name)
}

impl Store {
    // ------------------------------------------------------------------
    // Saved form searches
    // ------------------------------------------------------------------

    /// Create a saved form search; the query is validated by compiling
    /// it.
    pub fn create_form_search(
        &mut self,
        user: &User,
        name: &str,
        search: &Json,
        description: &str,
    ) -> Result<FormSearch> {
        self.guard_readonly()?;
        let name = normalize(name);
        if name.trim().is_empty() {
            return Err(OldbError::invalid("name", "Please enter a value"));
        }
        self.check_unique_name("form_search", &name, None)?;
        QueryCompiler::for_forms().compile(search)?;
        let now = format_datetime(&crate::core::now());
        self.conn().execute(
            "INSERT INTO form_search (name, search, description, enterer_id, datetime_modified)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, search.to_string(), normalize(description), user.id, now],
        )?;
        self.get_form_search(self.conn().last_insert_rowid())
    }

    /// Fetch a saved form search.
    pub fn get_form_search(&self, id: Id) -> Result<FormSearch> {
        self.conn()
            .query_row(
                "SELECT * FROM form_search WHERE id = ?1",
                params![id],
                FormSearch::from_row,
            )
            .optional()?
            .ok_or(OldbError::NotFound { kind: "form search", id })
    }

    /// Update a saved form search; identical submissions are rejected.
    pub fn update_form_search(
        &mut self,
        _user: &User,
        id: Id,
        name: &str,
        search: &Json,
        description: &str,
    ) -> Result<FormSearch> {
        self.guard_readonly()?;
        let existing = self.get_form_search(id)?;
        let name = normalize(name);
        self.check_unique_name("form_search", &name, Some(id))?;
        QueryCompiler::for_forms().compile(search)?;
        if existing.name == name
            && existing.search == *search
            && existing.description == description
        {
            return Err(OldbError::NotNew);
        }
        let now = format_datetime(&crate::core::now());
        self.conn().execute(
            "UPDATE form_search SET name = ?1, search = ?2, description = ?3,
             datetime_modified = ?4 WHERE id = ?5",
            params![name, search.to_string(), normalize(description), now, id],
        )?;
        self.get_form_search(id)
    }

    /// Delete a saved form search.
    pub fn delete_form_search(&mut self, _user: &User, id: Id) -> Result<FormSearch> {
        self.guard_readonly()?;
        let existing = self.get_form_search(id)?;
        self.conn()
            .execute("DELETE FROM form_search WHERE id = ?1", params![id])?;
        Ok(existing)
    }

    // ------------------------------------------------------------------
    // Corpus CRUD
    // ------------------------------------------------------------------

    /// Create a corpus and materialize its membership.
    pub fn create_corpus(&mut self, user: &User, write: CorpusWrite) -> Result<Corpus> {
        self.guard_readonly()?;
        self.validate_corpus_write(&write, None)?;
        let member_ids = self.resolve_corpus_membership(&write)?;
        let now = format_datetime(&crate::core::now());
        let uuid = crate::core::new_uuid();
        self.conn().execute(
            "INSERT INTO corpus
             (uuid, name, description, content, form_search_id, enterer_id, modifier_id,
              datetime_entered, datetime_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                uuid,
                normalize(&write.name),
                normalize(&write.description),
                write.content,
                write.form_search_id,
                user.id,
                user.id,
                now,
                now,
            ],
        )?;
        let id = self.conn().last_insert_rowid();
        self.save_corpus_members(id, &member_ids)?;
        self.save_corpus_tags(id, &write.tags)?;
        self.tree().ensure_resource_dir(ResourceKind::Corpus, id)?;
        info!(corpus_id = id, members = member_ids.len(), "corpus created");
        self.get_corpus_raw(id)
    }

    /// Update a corpus: recompute membership from whichever source is
    /// set, writing a backup of the previous state.
    pub fn update_corpus(&mut self, user: &User, id: Id, write: CorpusWrite) -> Result<Corpus> {
        self.guard_readonly()?;
        let existing = self.get_corpus_raw(id)?;
        self.check_referent_accessible(user, &existing.tags, id)?;
        self.validate_corpus_write(&write, Some(id))?;
        let member_ids = self.resolve_corpus_membership(&write)?;

        let tags_now: BTreeSet<Id> = existing.tags.iter().map(|t| t.id).collect();
        let tags_new: BTreeSet<Id> = write.tags.iter().copied().collect();
        if existing.name == normalize(&write.name)
            && existing.description == normalize(&write.description)
            && existing.content == write.content
            && existing.form_search_id == write.form_search_id
            && tags_now == tags_new
            && existing.forms == member_ids
        {
            return Err(OldbError::NotNew);
        }

        self.write_backup(
            "corpus_backup",
            existing.id,
            &existing.uuid,
            &serde_json::to_value(&existing)?,
            &format_datetime(&existing.datetime_modified),
        )?;
        let now = format_datetime(&crate::core::now());
        self.conn().execute(
            "UPDATE corpus SET name = ?1, description = ?2, content = ?3,
             form_search_id = ?4, modifier_id = ?5, datetime_modified = ?6
             WHERE id = ?7",
            params![
                normalize(&write.name),
                normalize(&write.description),
                write.content,
                write.form_search_id,
                user.id,
                now,
                id,
            ],
        )?;
        self.save_corpus_members(id, &member_ids)?;
        self.save_corpus_tags(id, &write.tags)?;
        info!(corpus_id = id, members = member_ids.len(), "corpus updated");
        self.get_corpus_raw(id)
    }

    /// Delete a corpus: backup, remove the row and the artifact
    /// directory it owns.
    pub fn delete_corpus(&mut self, user: &User, id: Id) -> Result<Corpus> {
        self.guard_readonly()?;
        let existing = self.get_corpus_raw(id)?;
        self.check_referent_accessible(user, &existing.tags, id)?;
        self.write_backup(
            "corpus_backup",
            existing.id,
            &existing.uuid,
            &serde_json::to_value(&existing)?,
            &format_datetime(&existing.datetime_modified),
        )?;
        self.conn().execute("DELETE FROM corpus WHERE id = ?1", params![id])?;
        self.tree().remove_resource_dir(ResourceKind::Corpus, id)?;
        info!(corpus_id = id, "corpus deleted");
        Ok(existing)
    }

    /// Fetch a corpus without access filtering.
    pub fn get_corpus_raw(&self, id: Id) -> Result<Corpus> {
        let corpus = self
            .conn()
            .query_row("SELECT * FROM corpus WHERE id = ?1", params![id], Corpus::from_row)
            .optional()?
            .ok_or(OldbError::NotFound { kind: "corpus", id })?;
        self.attach_corpus_relations(corpus)
    }

    /// Fetch a corpus, enforcing the access filter.
    pub fn get_corpus(&self, user: &User, id: Id) -> Result<Corpus> {
        let corpus = self.get_corpus_raw(id)?;
        if self.hidden_from(user, &corpus.tags)? {
            return Err(OldbError::Unauthorized { referent: Some(id) });
        }
        Ok(corpus)
    }

    /// A corpus's history by id or UUID.
    pub fn corpus_history(&self, key: &HistoryKey) -> Result<History> {
        self.history_generic("corpus", "corpus_backup", key, |store, id| {
            Ok(Some(serde_json::to_value(store.get_corpus_raw(id)?)?))
        })
    }

    /// The member forms visible to `user`, in corpus order.
    pub fn corpus_forms(&self, user: &User, corpus: &Corpus) -> Result<Vec<Form>> {
        let forms = self.corpus_forms_raw(corpus)?;
        self.filter_restricted_forms(user, forms)
    }

    pub(crate) fn corpus_forms_raw(&self, corpus: &Corpus) -> Result<Vec<Form>> {
        self.forms_by_ids(&corpus.forms)
    }

    // ------------------------------------------------------------------
    // File writing and serving
    // ------------------------------------------------------------------

    /// Write the corpus to file in the given format: the main artifact,
    /// a gzipped companion, and (for treebanks, when TGrep2 is present)
    /// a compiled `.t2c` index. Bumps `datetime_modified`
    /// unconditionally and records a CorpusFile row per artifact.
    pub fn write_corpus_to_file(
        &mut self,
        user: &User,
        corpus_id: Id,
        format_name: &str,
    ) -> Result<Vec<CorpusFile>> {
        self.guard_readonly()?;
        let corpus = self.get_corpus_raw(corpus_id)?;
        self.check_referent_accessible(user, &corpus.tags, corpus_id)?;
        let format = corpus_format(format_name).ok_or_else(|| {
            OldbError::invalid(
                "format",
                &format!("Value must be one of: treebank; transcriptions only (not {})", format_name),
            )
        })?;

        let dir = self.tree().ensure_resource_dir(ResourceKind::Corpus, corpus_id)?;
        let filename = format.filename(corpus_id);
        let path = dir.join(&filename);
        let forms = self.corpus_forms_raw(&corpus)?;
        let mut file = fs::File::create(&path)?;
        for form in &forms {
            file.write_all((format.writer)(form).as_bytes())?;
        }
        file.flush()?;
        debug!(corpus_id, filename = %filename, n_forms = forms.len(), "corpus file written");

        let gz_name = format!("{}.gz", filename);
        let gz = fs::File::create(dir.join(&gz_name))?;
        let mut encoder = GzEncoder::new(gz, Compression::default());
        encoder.write_all(&fs::read(&path)?)?;
        encoder.finish()?;

        let mut written = vec![filename.clone(), gz_name];
        if format.name == "treebank" && toolkit::tgrep2_installed() {
            let t2c_name = format!("corpus_{}.t2c", corpus_id);
            let mut cmd = std::process::Command::new("tgrep2");
            cmd.arg("-p").arg(&path).arg(dir.join(&t2c_name));
            let output = toolkit::run_with_timeout(cmd, None, TGREP2_COMPILE_TIMEOUT)?;
            if output.success {
                written.push(t2c_name);
            } else {
                debug!(stderr = %output.stderr_tail(), "tgrep2 -p failed");
            }
        }

        let now = format_datetime(&crate::core::now());
        self.conn().execute(
            "UPDATE corpus SET datetime_modified = ?1, modifier_id = ?2 WHERE id = ?3",
            params![now, user.id, corpus_id],
        )?;
        let mut records = Vec::new();
        for name in written {
            records.push(self.record_corpus_file(corpus_id, &name, format.name, user.id)?);
        }
        info!(corpus_id, format = format.name, "corpus written to file");
        Ok(records)
    }

    fn record_corpus_file(
        &self,
        corpus_id: Id,
        filename: &str,
        format: &str,
        creator_id: Id,
    ) -> Result<CorpusFile> {
        let now = format_datetime(&crate::core::now());
        let existing: Option<Id> = self
            .conn()
            .query_row(
                "SELECT id FROM corpus_file WHERE corpus_id = ?1 AND filename = ?2",
                params![corpus_id, filename],
                |row| row.get(0),
            )
            .optional()?;
        let id = match existing {
            Some(id) => {
                self.conn().execute(
                    "UPDATE corpus_file SET datetime_modified = ?1, creator_id = ?2 WHERE id = ?3",
                    params![now, creator_id, id],
                )?;
                id
            }
            None => {
                self.conn().execute(
                    "INSERT INTO corpus_file
                     (corpus_id, filename, format, creator_id, datetime_created, datetime_modified)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![corpus_id, filename, format, creator_id, now],
                )?;
                self.conn().last_insert_rowid()
            }
        };
        Ok(self.conn().query_row(
            "SELECT * FROM corpus_file WHERE id = ?1",
            params![id],
            CorpusFile::from_row,
        )?)
    }

    /// Resolve a written corpus file for serving: its path and media
    /// type.
    pub fn serve_corpus_file(
        &self,
        user: &User,
        corpus_id: Id,
        file_id: Id,
    ) -> Result<(PathBuf, &'static str)> {
        let corpus = self.get_corpus(user, corpus_id)?;
        let record = corpus
            .files
            .iter()
            .find(|f| f.id == file_id)
            .ok_or(OldbError::NotFound { kind: "corpus file", id: file_id })?;
        let path = self
            .tree()
            .resource_dir(ResourceKind::Corpus, corpus_id)
            .join(&record.filename);
        if !path.is_file() {
            return Err(OldbError::NotFound { kind: "corpus file", id: file_id });
        }
        let media_type = crate::layout::media_type_for(&path);
        Ok((path, media_type))
    }

    // ------------------------------------------------------------------
    // Searches
    // ------------------------------------------------------------------

    /// TGrep2 pattern search over the corpus's compiled treebank.
    /// Matching form ids are read off the per-line `TOP-<id>` prefixes,
    /// filtered for visibility, and paginated.
    pub fn tgrep2_search(
        &self,
        user: &User,
        corpus_id: Id,
        pattern: &str,
        paginator: &Paginator,
    ) -> Result<Page<Form>> {
        if !toolkit::tgrep2_installed() {
            return Err(OldbError::ToolNotInstalled("TGrep2"));
        }
        if pattern.trim().is_empty() {
            return Err(OldbError::invalid("tgrep2pattern", "Please enter a value"));
        }
        let corpus = self.get_corpus(user, corpus_id)?;
        let t2c = self
            .tree()
            .resource_dir(ResourceKind::Corpus, corpus_id)
            .join(format!("corpus_{}.t2c", corpus_id));
        if !t2c.is_file() {
            return Err(OldbError::NotWrittenToFile(corpus_id));
        }
        let mut cmd = std::process::Command::new("tgrep2");
        cmd.arg("-c").arg(&t2c).arg(pattern);
        let output = toolkit::run_with_timeout(cmd, None, TGREP2_SEARCH_TIMEOUT)?;
        if output.timed_out {
            return Err(OldbError::Timeout {
                tool: "tgrep2",
                seconds: TGREP2_SEARCH_TIMEOUT.as_secs(),
            });
        }
        let id_re = Regex::new(r"TOP-(\d+)").expect("static pattern");
        let mut ids: Vec<Id> = Vec::new();
        let mut seen = BTreeSet::new();
        for line in output.stdout.lines() {
            if let Some(captures) = id_re.captures(line) {
                if let Ok(id) = captures[1].parse::<Id>() {
                    if seen.insert(id) {
                        ids.push(id);
                    }
                }
            }
        }
        // Deleted forms may linger in a stale treebank.
        let ids: Vec<Id> = ids
            .into_iter()
            .filter(|id| corpus.forms.contains(id))
            .collect();
        let forms = self.forms_by_ids(&ids)?;
        let visible = self.filter_restricted_forms(user, forms)?;
        debug!(corpus_id, pattern, n = visible.len(), "tgrep2 search completed");
        Ok(paginate(visible, paginator))
    }

    /// List-form search restricted to the corpus's membership.
    pub fn search_corpus(
        &self,
        user: &User,
        corpus_id: Id,
        query: &Json,
        paginator: &Paginator,
    ) -> Result<Page<Form>> {
        let _corpus = self.get_corpus(user, corpus_id)?;
        let compiled = QueryCompiler::for_forms().compile_scoped(
            query,
            Some((
                "form.id IN (SELECT form_id FROM corpus_form WHERE corpus_id = ?)",
                vec![SqlValue::Integer(corpus_id)],
            )),
        )?;
        let forms = self.run_form_query(&compiled)?;
        let visible = self.filter_restricted_forms(user, forms)?;
        Ok(paginate(visible, paginator))
    }

    /// Group the corpus's forms by the category sequence of their words,
    /// sorted by support, optionally dropping sequences attested fewer
    /// than `min_count` times.
    pub fn word_category_sequences(
        &self,
        user: &User,
        corpus_id: Id,
        min_count: usize,
    ) -> Result<Vec<(String, Vec<Id>)>> {
        let corpus = self.get_corpus(user, corpus_id)?;
        let forms = self.corpus_forms(user, &corpus)?;
        let delims = self.app_settings()?.delimiters();
        let mut groups: std::collections::HashMap<String, BTreeSet<Id>> =
            std::collections::HashMap::new();
        for form in &forms {
            for sequence in word_category_sequences_of(&form.break_gloss_category, &delims) {
                groups.entry(sequence).or_default().insert(form.id);
            }
        }
        let mut result: Vec<(String, Vec<Id>)> = groups
            .into_iter()
            .map(|(seq, ids)| (seq, ids.into_iter().collect::<Vec<_>>()))
            .filter(|(_, ids)| ids.len() >= min_count.max(1))
            .collect();
        result.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn validate_corpus_write(&self, write: &CorpusWrite, exclude: Option<Id>) -> Result<()> {
        if write.name.trim().is_empty() {
            return Err(OldbError::invalid("name", "Please enter a value"));
        }
        self.check_unique_name("corpus", &normalize(&write.name), exclude)?;
        if let Some(fs_id) = write.form_search_id {
            self.get_form_search(fs_id).map_err(|_| {
                OldbError::invalid(
                    "form_search",
                    &format!("There is no form search with id {}.", fs_id),
                )
            })?;
        }
        self.tags_by_ids(&write.tags)?;
        Ok(())
    }

    /// Membership comes from the saved search when one is set, else from
    /// the explicit id list.
    fn resolve_corpus_membership(&self, write: &CorpusWrite) -> Result<Vec<Id>> {
        if let Some(fs_id) = write.form_search_id {
            let form_search = self.get_form_search(fs_id)?;
            let compiled = QueryCompiler::for_forms().compile(&form_search.search)?;
            let forms = self.run_form_query(&compiled)?;
            return Ok(forms.into_iter().map(|f| f.id).collect());
        }
        if write.content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        let mut seen = BTreeSet::new();
        for token in write.content.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let id: Id = token.parse().map_err(|_| {
                OldbError::invalid("content", &format!("{} is not a valid form id.", token))
            })?;
            if seen.insert(id) {
                ids.push(id);
            }
        }
        // Existence check; the fetch fails on any missing id.
        self.forms_by_ids(&ids)?;
        Ok(ids)
    }

    fn save_corpus_members(&self, corpus_id: Id, member_ids: &[Id]) -> Result<()> {
        self.conn()
            .execute("DELETE FROM corpus_form WHERE corpus_id = ?1", params![corpus_id])?;
        for (position, &form_id) in member_ids.iter().enumerate() {
            self.conn().execute(
                "INSERT INTO corpus_form (corpus_id, form_id, position) VALUES (?1, ?2, ?3)",
                params![corpus_id, form_id, position as i64],
            )?;
        }
        Ok(())
    }

    /// User-chosen tags plus a transitive `restricted` when any member
    /// form carries one.
    fn save_corpus_tags(&mut self, corpus_id: Id, tag_ids: &[Id]) -> Result<()> {
        let mut tag_ids: Vec<Id> = tag_ids.to_vec();
        let restricted_member: Option<Id> = self
            .conn()
            .query_row(
                "SELECT form_tag.form_id FROM form_tag
                 JOIN tag ON tag.id = form_tag.tag_id
                 WHERE tag.name = ?1
                   AND form_tag.form_id IN
                     (SELECT form_id FROM corpus_form WHERE corpus_id = ?2)
                 LIMIT 1",
                params![RESTRICTED_TAG, corpus_id],
                |row| row.get(0),
            )
            .optional()?;
        if restricted_member.is_some() {
            let restricted = self.get_or_create_tag(RESTRICTED_TAG)?;
            if !tag_ids.contains(&restricted.id) {
                tag_ids.push(restricted.id);
            }
        }
        self.set_tags("corpus_tag", "corpus_id", corpus_id, &tag_ids)
    }

    fn attach_corpus_relations(&self, mut corpus: Corpus) -> Result<Corpus> {
        let mut stmt = self.conn().prepare(
            "SELECT form_id FROM corpus_form WHERE corpus_id = ?1 ORDER BY position",
        )?;
        corpus.forms = stmt
            .query_map(params![corpus.id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        corpus.tags = self.tags_via("corpus_tag", "corpus_id", corpus.id)?;
        let mut stmt = self.conn().prepare(
            "SELECT * FROM corpus_file WHERE corpus_id = ?1 ORDER BY id",
        )?;
        corpus.files = stmt
            .query_map(params![corpus.id], CorpusFile::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(corpus)
    }
}

/// The per-word category sequences encoded in a `break_gloss_category`
/// string, e.g. `chien|dog|N-s|PL|Num le|the|Det` yields `["N-Num", "Det"]`.
pub fn word_category_sequences_of(break_gloss_category: &str, delims: &[char]) -> Vec<String> {
    break_gloss_category
        .split_whitespace()
        .map(|word| {
            let analysis = analyze_word(word, delims);
            let categories: Vec<String> = analysis
                .morphemes
                .iter()
                .map(|triple| {
                    triple
                        .rsplit(crate::core::constants::DEFAULT_DELIMITER)
                        .next()
                        .unwrap_or(crate::core::constants::UNKNOWN_CATEGORY)
                        .to_string()
                })
                .collect();
            let mut out = String::new();
            for (i, category) in categories.iter().enumerate() {
                if i > 0 {
                    out.push_str(
                        analysis.delimiters.get(i - 1).map(String::as_str).unwrap_or("-"),
                    );
                }
                out.push_str(category);
            }
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use crate::model::{FormWrite, Translation};
    use crate::store::testing::test_store;

    fn form_write(transcription: &str, syntax: &str) -> FormWrite {
        FormWrite {
            transcription: transcription.to_string(),
            syntax: syntax.to_string(),
            translations: vec![Translation {
                id: 0,
                transcription: "t".to_string(),
                grammaticality: String::new(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_format_registry() {
        let treebank = corpus_format("treebank").unwrap();
        assert_eq!(treebank.filename(1), "corpus_1.tbk");
        let transcriptions = corpus_format("transcriptions only").unwrap();
        assert_eq!(transcriptions.filename(2), "corpus_2_transcriptions.txt");
        assert!(corpus_format("conll").is_none());
    }

    #[test]
    fn test_membership_from_content() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let a = store.create_form(&user, form_write("a", "")).unwrap();
        let b = store.create_form(&user, form_write("b", "")).unwrap();

        let corpus = store
            .create_corpus(
                &user,
                CorpusWrite {
                    name: "c".to_string(),
                    content: format!("{}, {}, {}", b.id, a.id, b.id),
                    ..Default::default()
                },
            )
            .unwrap();
        // Order preserved, duplicates dropped.
        assert_eq!(corpus.forms, vec![b.id, a.id]);
    }

    #[test]
    fn test_membership_rejects_missing_ids() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let err = store
            .create_corpus(
                &user,
                CorpusWrite { name: "c".to_string(), content: "999".to_string(), ..Default::default() },
            )
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_membership_from_form_search() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let chien = store.create_form(&user, form_write("chien", "")).unwrap();
        store.create_form(&user, form_write("chat", "")).unwrap();
        let search = store
            .create_form_search(
                &user,
                "chiens",
                &serde_json::json!({"filter": ["Form", "transcription", "like", "chien%"]}),
                "",
            )
            .unwrap();
        let corpus = store
            .create_corpus(
                &user,
                CorpusWrite {
                    name: "c".to_string(),
                    form_search_id: Some(search.id),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(corpus.forms, vec![chien.id]);
    }

    #[test]
    fn test_form_search_validation() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let err = store
            .create_form_search(
                &user,
                "bad",
                &serde_json::json!({"filter": ["Form", "colour", "=", "red"]}),
                "",
            )
            .unwrap_err();
        assert!(matches!(err, OldbError::SearchParse(_)));
    }

    #[test]
    fn test_writetofile_and_serve() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let mut ids = Vec::new();
        for i in 0..3 {
            let form = store
                .create_form(
                    &user,
                    form_write(&format!("s{}", i), "(S (NP (N foo)) (VP (V bar)))"),
                )
                .unwrap();
            ids.push(form.id.to_string());
        }
        let corpus = store
            .create_corpus(
                &user,
                CorpusWrite { name: "tb".to_string(), content: ids.join(","), ..Default::default() },
            )
            .unwrap();

        let before = store.get_corpus_raw(corpus.id).unwrap().datetime_modified;
        let records = store
            .write_corpus_to_file(&user, corpus.id, "treebank")
            .unwrap();
        assert!(records.iter().any(|r| r.filename == format!("corpus_{}.tbk", corpus.id)));
        assert!(records.iter().any(|r| r.filename.ends_with(".tbk.gz")));

        let dir = store.tree().resource_dir(ResourceKind::Corpus, corpus.id);
        let content =
            std::fs::read_to_string(dir.join(format!("corpus_{}.tbk", corpus.id))).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.starts_with("(TOP-"));
        assert!(content.contains("(S (NP (N foo)) (VP (V bar)))"));

        // Gzip companion round-trips.
        let gz = std::fs::File::open(dir.join(format!("corpus_{}.tbk.gz", corpus.id))).unwrap();
        let mut decoded = String::new();
        use std::io::Read;
        flate2::read::GzDecoder::new(gz).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, content);

        // datetime_modified bumped unconditionally (>= is all wall
        // clocks guarantee at second precision).
        let after = store.get_corpus_raw(corpus.id).unwrap().datetime_modified;
        assert!(after >= before);

        let record = records.iter().find(|r| r.filename.ends_with(".tbk.gz")).unwrap();
        let (path, media) = store.serve_corpus_file(&user, corpus.id, record.id).unwrap();
        assert!(path.is_file());
        assert_eq!(media, "application/x-gzip");
    }

    #[test]
    fn test_writetofile_unknown_format() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let corpus = store
            .create_corpus(&user, CorpusWrite { name: "c".to_string(), ..Default::default() })
            .unwrap();
        let err = store
            .write_corpus_to_file(&user, corpus.id, "conll")
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_tgrep2_requires_treebank() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let corpus = store
            .create_corpus(&user, CorpusWrite { name: "c".to_string(), ..Default::default() })
            .unwrap();
        let err = store
            .tgrep2_search(&user, corpus.id, "S < NP", &Paginator::default())
            .unwrap_err();
        // Either the tool is missing (400) or the treebank has not been
        // compiled (400 with the corpus-specific message).
        assert_eq!(err.status_code(), 400);
        if toolkit::tgrep2_installed() {
            assert_eq!(
                err.to_string(),
                format!("Corpus {} has not been written to file as a treebank.", corpus.id)
            );
        } else {
            assert_eq!(err.to_string(), "TGrep2 is not installed.");
        }
    }

    #[test]
    fn test_corpus_scoped_search() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let inside = store.create_form(&user, form_write("chien", "")).unwrap();
        store.create_form(&user, form_write("chienne", "")).unwrap();
        let corpus = store
            .create_corpus(
                &user,
                CorpusWrite {
                    name: "c".to_string(),
                    content: inside.id.to_string(),
                    ..Default::default()
                },
            )
            .unwrap();
        let page = store
            .search_corpus(
                &user,
                corpus.id,
                &serde_json::json!({"filter": ["Form", "transcription", "like", "chien%"]}),
                &Paginator::default(),
            )
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, inside.id);
    }

    #[test]
    fn test_restricted_member_restricts_corpus_and_tags() {
        let (_tmp, mut store) = test_store();
        let admin = store.create_user("admin", Role::Administrator).unwrap();
        let viewer = store.create_user("viewer", Role::Viewer).unwrap();
        let restricted = store.get_or_create_tag(RESTRICTED_TAG).unwrap();
        let mut w = form_write("secret", "");
        w.tags = vec![restricted.id];
        let secret = store.create_form(&admin, w).unwrap();
        let public = store.create_form(&admin, form_write("ok", "")).unwrap();

        let corpus = store
            .create_corpus(
                &admin,
                CorpusWrite {
                    name: "mixed".to_string(),
                    content: format!("{},{}", secret.id, public.id),
                    ..Default::default()
                },
            )
            .unwrap();
        // The corpus inherits the restriction transitively.
        assert!(corpus.tags.iter().any(|t| t.name == RESTRICTED_TAG));
        assert!(store.get_corpus(&viewer, corpus.id).is_err());

        // The admin sees both members; a hypothetical unrestricted
        // viewer of the corpus would see the public one only.
        let forms = store.corpus_forms(&admin, &corpus).unwrap();
        assert_eq!(forms.len(), 2);
    }

    #[test]
    fn test_word_category_sequences() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let now = format_datetime(&crate::core::now());
        store
            .conn()
            .execute(
                "INSERT INTO syntactic_category (name, datetime_modified)
                 VALUES ('N', ?1), ('PL', ?1)",
                params![now],
            )
            .unwrap();
        let mut chien = FormWrite {
            transcription: "chien".into(),
            morpheme_break: "chien".into(),
            morpheme_gloss: "dog".into(),
            syntactic_category_id: Some(1),
            translations: vec![Translation { id: 0, transcription: "dog".into(), grammaticality: String::new() }],
            ..Default::default()
        };
        store.create_form(&user, chien.clone()).unwrap();
        chien.transcription = "chat".into();
        chien.morpheme_break = "chat".into();
        chien.morpheme_gloss = "cat".into();
        store.create_form(&user, chien).unwrap();
        let plural = FormWrite {
            transcription: "s".into(),
            morpheme_break: "s".into(),
            morpheme_gloss: "PL".into(),
            syntactic_category_id: Some(2),
            translations: vec![Translation { id: 0, transcription: "PL".into(), grammaticality: String::new() }],
            ..Default::default()
        };
        store.create_form(&user, plural).unwrap();

        let mut sentence = form_write("chiens chats", "");
        sentence.morpheme_break = "chien-s chat-s".into();
        sentence.morpheme_gloss = "dog-PL cat-PL".into();
        let s = store.create_form(&user, sentence).unwrap();

        let corpus = store
            .create_corpus(
                &user,
                CorpusWrite { name: "c".into(), content: s.id.to_string(), ..Default::default() },
            )
            .unwrap();
        let sequences = store.word_category_sequences(&user, corpus.id, 1).unwrap();
        assert_eq!(sequences.len(), 1);
        assert_eq!(sequences[0].0, "N-PL");
        assert_eq!(sequences[0].1, vec![s.id]);

        // min_count above support filters it out.
        let sequences = store.word_category_sequences(&user, corpus.id, 2).unwrap();
        assert!(sequences.is_empty());
    }

    #[test]
    fn test_corpus_backup_and_history() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let corpus = store
            .create_corpus(&user, CorpusWrite { name: "c1".to_string(), ..Default::default() })
            .unwrap();
        store
            .update_corpus(
                &user,
                corpus.id,
                CorpusWrite { name: "c2".to_string(), ..Default::default() },
            )
            .unwrap();
        store.delete_corpus(&user, corpus.id).unwrap();
        assert!(!store
            .tree()
            .resource_dir(ResourceKind::Corpus, corpus.id)
            .exists());

        let history = store
            .corpus_history(&HistoryKey::Uuid(corpus.uuid.clone()))
            .unwrap();
        assert!(history.resource.is_none());
        assert_eq!(history.previous_versions.len(), 2);
        assert_eq!(history.previous_versions[0].snapshot["name"], "c2");
    }

    #[test]
    fn test_word_category_sequences_of_parsing() {
        let sequences =
            word_category_sequences_of("chien|dog|N-s|PL|Num le|the|Det", &['-', '=']);
        assert_eq!(sequences, vec!["N-Num", "Det"]);
    }
}
