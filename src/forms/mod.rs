//! Form lifecycle and morpheme cross-referencing.
//!
//! On every form save the `morpheme_break` / `morpheme_gloss` pair is
//! parsed on the instance's morpheme delimiters and each morpheme
//! position is matched against the whole form inventory: which lexical
//! entries have that shape, which have that gloss, and what category a
//! perfect match assigns. The results are stored denormalized on the
//! form (`morpheme_break_ids`, `morpheme_gloss_ids`,
//! `syntactic_category_string`, `break_gloss_category`) so that glossing
//! consistency is queryable without joins.

use rusqlite::{params, OptionalExtension};
use serde_json::{json, Value as Json};
use tracing::{debug, info};

use crate::core::constants::{DEFAULT_DELIMITER, RESTRICTED_TAG, UNKNOWN_CATEGORY};
use crate::core::types::normalize;
use crate::core::{Id, OldbError, Result};
use crate::model::{format_datetime, Form, FormWrite, History, User};
use crate::query::QueryCompiler;
use crate::store::{paginate, HistoryKey, Page, Paginator, Store};

/// One word's worth of morpheme analysis: parallel morphemes and the
/// delimiters between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordAnalysis {
    /// Morpheme shapes, e.g. `["chien", "s"]`.
    pub morphemes: Vec<String>,
    /// The delimiters separating them, e.g. `["-"]`.
    pub delimiters: Vec<String>,
}

/// Split one word into morphemes and the delimiters between them.
pub fn analyze_word(word: &str, delims: &[char]) -> WordAnalysis {
    let mut morphemes = Vec::new();
    let mut delimiters = Vec::new();
    let mut current = String::new();
    for c in word.chars() {
        if delims.contains(&c) {
            morphemes.push(std::mem::take(&mut current));
            delimiters.push(c.to_string());
        } else {
            current.push(c);
        }
    }
    morphemes.push(current);
    WordAnalysis { morphemes, delimiters }
}

/// The denormalized morpheme-reference fields recomputed on save.
#[derive(Debug, Clone, Default)]
pub struct MorphemeReferences {
    /// Nested per-word, per-morpheme `[id, gloss, category]` matches by
    /// shape.
    pub break_ids: Json,
    /// Nested per-word, per-morpheme `[id, shape, category]` matches by
    /// gloss.
    pub gloss_ids: Json,
    /// Per-word category sequences, e.g. `N-PL V`.
    pub syntactic_category_string: String,
    /// Per-morpheme `shape|gloss|category` triples with delimiters
    /// preserved.
    pub break_gloss_category: String,
}

impl Store {
    /// For each aligned morpheme of the break/gloss pair, find every
    /// matching lexical entry in the database.
    pub fn compute_morpheme_references(
        &self,
        morpheme_break: &str,
        morpheme_gloss: &str,
    ) -> Result<MorphemeReferences> {
        let delims = self.app_settings()?.delimiters();
        let break_words: Vec<&str> = morpheme_break.split_whitespace().collect();
        let gloss_words: Vec<&str> = morpheme_gloss.split_whitespace().collect();
        if break_words.is_empty() || break_words.len() != gloss_words.len() {
            return Ok(MorphemeReferences {
                break_ids: json!([]),
                gloss_ids: json!([]),
                ..Default::default()
            });
        }

        let mut break_ids = Vec::new();
        let mut gloss_ids = Vec::new();
        let mut category_words = Vec::new();
        let mut bgc_words = Vec::new();

        for (bw, gw) in break_words.iter().zip(&gloss_words) {
            let b = analyze_word(bw, &delims);
            let g = analyze_word(gw, &delims);
            if b.morphemes.len() != g.morphemes.len() {
                // Misaligned analysis: no references for this word.
                break_ids.push(json!([]));
                gloss_ids.push(json!([]));
                category_words.push(UNKNOWN_CATEGORY.to_string());
                bgc_words.push(format!(
                    "{bw}{DEFAULT_DELIMITER}{gw}{DEFAULT_DELIMITER}{UNKNOWN_CATEGORY}"
                ));
                continue;
            }
            let mut word_break_ids = Vec::new();
            let mut word_gloss_ids = Vec::new();
            let mut categories = Vec::new();
            for (shape, gloss) in b.morphemes.iter().zip(&g.morphemes) {
                word_break_ids.push(Json::Array(self.matches_by_shape(shape)?));
                word_gloss_ids.push(Json::Array(self.matches_by_gloss(gloss)?));
                categories.push(
                    self.perfect_match_category(shape, gloss)?
                        .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string()),
                );
            }
            break_ids.push(Json::Array(word_break_ids));
            gloss_ids.push(Json::Array(word_gloss_ids));
            category_words.push(interleave(&categories, &b.delimiters));
            let triples: Vec<String> = b
                .morphemes
                .iter()
                .zip(&g.morphemes)
                .zip(&categories)
                .map(|((shape, gloss), cat)| {
                    format!("{shape}{DEFAULT_DELIMITER}{gloss}{DEFAULT_DELIMITER}{cat}")
                })
                .collect();
            bgc_words.push(interleave(&triples, &b.delimiters));
        }

        Ok(MorphemeReferences {
            break_ids: Json::Array(break_ids),
            gloss_ids: Json::Array(gloss_ids),
            syntactic_category_string: category_words.join(" "),
            break_gloss_category: bgc_words.join(" "),
        })
    }

    /// Lexical entries whose `morpheme_break` equals `shape`:
    /// `[id, gloss, category]` each.
    fn matches_by_shape(&self, shape: &str) -> Result<Vec<Json>> {
        let mut stmt = self.conn().prepare(
            "SELECT form.id, form.morpheme_gloss, syntactic_category.name
             FROM form LEFT JOIN syntactic_category
               ON syntactic_category.id = form.syntactic_category_id
             WHERE form.morpheme_break = ?1 ORDER BY form.id",
        )?;
        let rows = stmt
            .query_map(params![shape], |row| {
                let id: Id = row.get(0)?;
                let gloss: String = row.get(1)?;
                let category: Option<String> = row.get(2)?;
                Ok(json!([id, gloss, category.unwrap_or_else(|| UNKNOWN_CATEGORY.into())]))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Lexical entries whose `morpheme_gloss` equals `gloss`:
    /// `[id, shape, category]` each.
    fn matches_by_gloss(&self, gloss: &str) -> Result<Vec<Json>> {
        let mut stmt = self.conn().prepare(
            "SELECT form.id, form.morpheme_break, syntactic_category.name
             FROM form LEFT JOIN syntactic_category
               ON syntactic_category.id = form.syntactic_category_id
             WHERE form.morpheme_gloss = ?1 ORDER BY form.id",
        )?;
        let rows = stmt
            .query_map(params![gloss], |row| {
                let id: Id = row.get(0)?;
                let shape: String = row.get(1)?;
                let category: Option<String> = row.get(2)?;
                Ok(json!([id, shape, category.unwrap_or_else(|| UNKNOWN_CATEGORY.into())]))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// The category of a categorized lexical entry matching both shape
    /// and gloss. Uncategorized matches cannot decide a category and
    /// are skipped.
    fn perfect_match_category(&self, shape: &str, gloss: &str) -> Result<Option<String>> {
        let category: Option<String> = self
            .conn()
            .query_row(
                "SELECT syntactic_category.name
                 FROM form JOIN syntactic_category
                   ON syntactic_category.id = form.syntactic_category_id
                 WHERE form.morpheme_break = ?1 AND form.morpheme_gloss = ?2
                 ORDER BY form.id LIMIT 1",
                params![shape, gloss],
                |row| row.get(0),
            )
            .optional()?;
        Ok(category)
    }

    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    /// Create a form.
    pub fn create_form(&mut self, user: &User, mut write: FormWrite) -> Result<Form> {
        self.guard_readonly()?;
        normalize_write(&mut write);
        self.validate_form_write(&write)?;
        self.check_form_referents(user, &write)?;

        let now = format_datetime(&crate::core::now());
        let uuid = crate::core::new_uuid();
        self.conn().execute(
            "INSERT INTO form
             (uuid, transcription, phonetic_transcription, narrow_phonetic_transcription,
              morpheme_break, morpheme_gloss, comments, speaker_comments, grammaticality,
              date_elicited, syntax, semantics, status,
              elicitor_id, enterer_id, verifier_id, modifier_id, syntactic_category_id,
              datetime_entered, datetime_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                     ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
            params![
                uuid,
                write.transcription,
                write.phonetic_transcription,
                write.narrow_phonetic_transcription,
                write.morpheme_break,
                write.morpheme_gloss,
                write.comments,
                write.speaker_comments,
                write.grammaticality,
                write.date_elicited.map(|d| d.format("%Y-%m-%d").to_string()),
                write.syntax,
                write.semantics,
                write.status.clone().unwrap_or_else(|| "tested".to_string()),
                write.elicitor_id,
                user.id,
                write.verifier_id,
                user.id,
                write.syntactic_category_id,
                now,
                now,
            ],
        )?;
        let id = self.conn().last_insert_rowid();
        self.save_form_relations(id, &write)?;
        self.refresh_morpheme_fields(id)?;
        self.propagate_restriction_to_files(id)?;
        info!(form_id = id, "form created");
        self.get_form_raw(id)
    }

    /// Update a form. A submission identical to the stored state is
    /// rejected.
    pub fn update_form(&mut self, user: &User, id: Id, mut write: FormWrite) -> Result<Form> {
        self.guard_readonly()?;
        let existing = self.get_form_raw(id)?;
        self.check_referent_accessible(user, &existing.tags, id)?;
        normalize_write(&mut write);
        self.validate_form_write(&write)?;
        self.check_form_referents(user, &write)?;
        if !form_changed(&existing, &write) {
            return Err(OldbError::NotNew);
        }

        self.write_backup(
            "form_backup",
            existing.id,
            &existing.uuid,
            &serde_json::to_value(&existing)?,
            &format_datetime(&existing.datetime_modified),
        )?;

        let now = format_datetime(&crate::core::now());
        self.conn().execute(
            "UPDATE form SET
               transcription = ?1, phonetic_transcription = ?2,
               narrow_phonetic_transcription = ?3, morpheme_break = ?4,
               morpheme_gloss = ?5, comments = ?6, speaker_comments = ?7,
               grammaticality = ?8, date_elicited = ?9, syntax = ?10, semantics = ?11,
               status = ?12, elicitor_id = ?13, verifier_id = ?14,
               syntactic_category_id = ?15, modifier_id = ?16, datetime_modified = ?17
             WHERE id = ?18",
            params![
                write.transcription,
                write.phonetic_transcription,
                write.narrow_phonetic_transcription,
                write.morpheme_break,
                write.morpheme_gloss,
                write.comments,
                write.speaker_comments,
                write.grammaticality,
                write.date_elicited.map(|d| d.format("%Y-%m-%d").to_string()),
                write.syntax,
                write.semantics,
                write.status.clone().unwrap_or_else(|| existing.status.clone()),
                write.elicitor_id,
                write.verifier_id,
                write.syntactic_category_id,
                user.id,
                now,
                id,
            ],
        )?;
        self.conn()
            .execute("DELETE FROM translation WHERE form_id = ?1", params![id])?;
        self.save_form_relations(id, &write)?;
        self.refresh_morpheme_fields(id)?;
        self.propagate_restriction_to_files(id)?;
        info!(form_id = id, "form updated");
        self.get_form_raw(id)
    }

    /// Delete a form: backup, remove, and strip `form[<id>]` references
    /// out of collection contents.
    pub fn delete_form(&mut self, user: &User, id: Id) -> Result<Form> {
        self.guard_readonly()?;
        let existing = self.get_form_raw(id)?;
        self.check_referent_accessible(user, &existing.tags, id)?;
        self.write_backup(
            "form_backup",
            existing.id,
            &existing.uuid,
            &serde_json::to_value(&existing)?,
            &format_datetime(&existing.datetime_modified),
        )?;
        self.conn().execute("DELETE FROM form WHERE id = ?1", params![id])?;
        self.scrub_form_reference(user, id)?;
        info!(form_id = id, "form deleted");
        Ok(existing)
    }

    /// List forms visible to `user`.
    pub fn index_forms(&self, user: &User, paginator: &Paginator) -> Result<Page<Form>> {
        let mut stmt = self.conn().prepare("SELECT * FROM form ORDER BY id")?;
        let forms = stmt
            .query_map([], Form::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let forms: Result<Vec<Form>> = forms
            .into_iter()
            .map(|f| self.attach_form_relations(f))
            .collect();
        let visible = self.filter_restricted_forms(user, forms?)?;
        Ok(paginate(visible, paginator))
    }

    /// Execute a list-form search over forms, filtered and paginated.
    pub fn search_forms(
        &self,
        user: &User,
        query: &Json,
        paginator: &Paginator,
    ) -> Result<Page<Form>> {
        let compiled = QueryCompiler::for_forms().compile(query)?;
        let forms = self.run_form_query(&compiled)?;
        let visible = self.filter_restricted_forms(user, forms)?;
        Ok(paginate(visible, paginator))
    }

    /// A form's history by id or UUID; retrievable after deletion.
    pub fn form_history(&self, key: &HistoryKey) -> Result<History> {
        self.history_generic("form", "form_backup", key, |store, id| {
            Ok(Some(serde_json::to_value(store.get_form_raw(id)?)?))
        })
    }

    /// Rebuild the denormalized morpheme-reference fields of every form.
    /// Administrator-invoked; referenced-form edits do not propagate on
    /// their own. Returns the ids of the forms that changed.
    pub fn update_morpheme_references(&mut self, user: &User) -> Result<Vec<Id>> {
        self.guard_readonly()?;
        if !user.is_administrator() {
            return Err(OldbError::Unauthorized { referent: None });
        }
        let ids: Vec<Id> = {
            let mut stmt = self.conn().prepare("SELECT id FROM form ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids
        };
        let mut changed = Vec::new();
        for id in ids {
            let before = self.get_form_raw(id)?;
            self.refresh_morpheme_fields(id)?;
            let after = self.get_form_raw(id)?;
            if before.morpheme_break_ids != after.morpheme_break_ids
                || before.morpheme_gloss_ids != after.morpheme_gloss_ids
                || before.break_gloss_category != after.break_gloss_category
                || before.syntactic_category_string != after.syntactic_category_string
            {
                self.write_backup(
                    "form_backup",
                    before.id,
                    &before.uuid,
                    &serde_json::to_value(&before)?,
                    &format_datetime(&before.datetime_modified),
                )?;
                changed.push(id);
            }
        }
        info!(n_changed = changed.len(), "morpheme references rebuilt");
        Ok(changed)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn validate_form_write(&self, write: &FormWrite) -> Result<()> {
        let mut errors = std::collections::BTreeMap::new();
        if write.transcription.trim().is_empty() {
            errors.insert("transcription".to_string(), "Please enter a value".to_string());
        }
        if write.translations.is_empty() {
            errors.insert("translations".to_string(), "Please enter a value".to_string());
        }
        if let Some(status) = &write.status {
            if !crate::core::constants::FORM_STATUSES.contains(&status.as_str()) {
                errors.insert(
                    "status".to_string(),
                    format!("Value must be one of: tested; requires testing (not {})", status),
                );
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(OldbError::Validation { errors })
        }
    }

    /// Writers may not attach referents the user cannot access.
    fn check_form_referents(&self, user: &User, write: &FormWrite) -> Result<()> {
        for &file_id in &write.files {
            if self.file_hidden_from(user, file_id)? {
                return Err(OldbError::Unauthorized { referent: Some(file_id) });
            }
        }
        self.tags_by_ids(&write.tags)?;
        Ok(())
    }

    fn save_form_relations(&self, id: Id, write: &FormWrite) -> Result<()> {
        let now = format_datetime(&crate::core::now());
        for translation in &write.translations {
            self.conn().execute(
                "INSERT INTO translation (form_id, transcription, grammaticality, datetime_modified)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, translation.transcription, translation.grammaticality, now],
            )?;
        }
        self.set_tags("form_tag", "form_id", id, &write.tags)?;
        self.conn()
            .execute("DELETE FROM form_file WHERE form_id = ?1", params![id])?;
        for &file_id in &write.files {
            self.conn().execute(
                "INSERT OR IGNORE INTO form_file (form_id, file_id) VALUES (?1, ?2)",
                params![id, file_id],
            )?;
        }
        Ok(())
    }

    fn refresh_morpheme_fields(&self, id: Id) -> Result<()> {
        let (morpheme_break, morpheme_gloss): (String, String) = self.conn().query_row(
            "SELECT morpheme_break, morpheme_gloss FROM form WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let refs = self.compute_morpheme_references(&morpheme_break, &morpheme_gloss)?;
        self.conn().execute(
            "UPDATE form SET morpheme_break_ids = ?1, morpheme_gloss_ids = ?2,
             syntactic_category_string = ?3, break_gloss_category = ?4
             WHERE id = ?5",
            params![
                refs.break_ids.to_string(),
                refs.gloss_ids.to_string(),
                refs.syntactic_category_string,
                refs.break_gloss_category,
                id,
            ],
        )?;
        debug!(form_id = id, "morpheme references refreshed");
        Ok(())
    }

    /// A file associated to a restricted form becomes restricted itself.
    fn propagate_restriction_to_files(&mut self, form_id: Id) -> Result<()> {
        let form = self.get_form_raw(form_id)?;
        if !form.is_restricted() {
            return Ok(());
        }
        let restricted = self.get_or_create_tag(RESTRICTED_TAG)?;
        for file_id in form.files {
            self.conn().execute(
                "INSERT OR IGNORE INTO file_tag (file_id, tag_id) VALUES (?1, ?2)",
                params![file_id, restricted.id],
            )?;
        }
        Ok(())
    }
}

fn normalize_write(write: &mut FormWrite) {
    for field in [
        &mut write.transcription,
        &mut write.phonetic_transcription,
        &mut write.narrow_phonetic_transcription,
        &mut write.morpheme_break,
        &mut write.morpheme_gloss,
        &mut write.comments,
        &mut write.speaker_comments,
        &mut write.grammaticality,
        &mut write.syntax,
        &mut write.semantics,
    ] {
        *field = normalize(field).replace('\r', "");
    }
    for translation in &mut write.translations {
        translation.transcription = normalize(&translation.transcription);
    }
}

/// Field-wise change detection; the relation sets compare unordered.
fn form_changed(existing: &Form, write: &FormWrite) -> bool {
    let tags_now: std::collections::BTreeSet<Id> =
        existing.tags.iter().map(|t| t.id).collect();
    let tags_new: std::collections::BTreeSet<Id> = write.tags.iter().copied().collect();
    let files_now: std::collections::BTreeSet<Id> = existing.files.iter().copied().collect();
    let files_new: std::collections::BTreeSet<Id> = write.files.iter().copied().collect();
    let translations_now: Vec<(String, String)> = existing
        .translations
        .iter()
        .map(|t| (t.transcription.clone(), t.grammaticality.clone()))
        .collect();
    let translations_new: Vec<(String, String)> = write
        .translations
        .iter()
        .map(|t| (t.transcription.clone(), t.grammaticality.clone()))
        .collect();

    existing.transcription != write.transcription
        || existing.phonetic_transcription != write.phonetic_transcription
        || existing.narrow_phonetic_transcription != write.narrow_phonetic_transcription
        || existing.morpheme_break != write.morpheme_break
        || existing.morpheme_gloss != write.morpheme_gloss
        || existing.comments != write.comments
        || existing.speaker_comments != write.speaker_comments
        || existing.grammaticality != write.grammaticality
        || existing.date_elicited != write.date_elicited
        || existing.syntax != write.syntax
        || existing.semantics != write.semantics
        || write
            .status
            .as_ref()
            .map(|s| s != &existing.status)
            .unwrap_or(false)
        || existing.elicitor_id != write.elicitor_id
        || existing.verifier_id != write.verifier_id
        || existing.syntactic_category_id != write.syntactic_category_id
        || translations_now != translations_new
        || tags_now != tags_new
        || files_now != files_new
}

/// Join items back with their original delimiters: `a - b = c`-style.
fn interleave(items: &[String], delimiters: &[String]) -> String {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(delimiters.get(i - 1).map(String::as_str).unwrap_or("-"));
        }
        out.push_str(item);
    }
    out
}
