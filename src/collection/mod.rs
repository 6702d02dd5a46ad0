//! Collections and the cross-reference propagator.
//!
//! Collection contents interpolate `form[<id>]` and `collection[<id>]`
//! (or `collection(<id>)`) references. On save, collection references
//! are expanded transitively into `contents_unpacked` (a reference
//! cycle fails the save), the referenced forms are validated and
//! denormalized onto the collection, and the unpacked text is rendered
//! to HTML. Deleting a referent cascades: the dangling token is removed
//! from every referring collection's contents, each such edit writing a
//! backup.

use std::collections::BTreeSet;

use pulldown_cmark::{html, Parser};
use regex::Regex;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

use crate::core::constants::RESTRICTED_TAG;
use crate::core::types::normalize;
use crate::core::{Id, OldbError, Result};
use crate::model::{format_datetime, Collection, CollectionWrite, History, User};
use crate::store::{HistoryKey, Store};

fn form_ref_pattern() -> Regex {
    Regex::new(r"[Ff]orm\[(\d+)\]").expect("static pattern")
}

fn collection_ref_pattern() -> Regex {
    Regex::new(r"[cC]ollection[\[\(](\d+)[\]\)]").expect("static pattern")
}

/// The ids referenced by `form[<id>]` tokens, in order of appearance,
/// deduplicated.
pub fn referenced_form_ids(contents: &str) -> Vec<Id> {
    let mut seen = BTreeSet::new();
    form_ref_pattern()
        .captures_iter(contents)
        .filter_map(|c| c[1].parse::<Id>().ok())
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Render contents to HTML per the markup language. Markdown gets a
/// full renderer; reStructuredText falls back to escaped paragraphs.
pub fn render_html(contents: &str, markup_language: &str) -> String {
    match markup_language {
        "Markdown" => {
            let mut out = String::new();
            html::push_html(&mut out, Parser::new(contents));
            out
        }
        _ => contents
            .split("\n\n")
            .filter(|paragraph| !paragraph.trim().is_empty())
            .map(|paragraph| format!("<p>{}</p>\n", escape_html(paragraph.trim())))
            .collect(),
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

impl Store {
    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    /// Create a collection, expanding and validating its references.
    pub fn create_collection(
        &mut self,
        user: &User,
        write: CollectionWrite,
    ) -> Result<Collection> {
        self.guard_readonly()?;
        self.validate_collection_write(&write)?;
        let contents = normalize(&write.contents).replace('\r', "");
        let markup = write.markup_language.clone().unwrap_or_else(|| "Markdown".to_string());
        let unpacked = self.expand_collection_refs(&contents, &mut Vec::new())?;
        let form_ids = self.validate_form_refs(user, &unpacked)?;
        let html = render_html(&unpacked, &markup);

        let now = format_datetime(&crate::core::now());
        let uuid = crate::core::new_uuid();
        self.conn().execute(
            "INSERT INTO collection
             (uuid, title, type, url, description, markup_language, contents,
              contents_unpacked, html, date_elicited, elicitor_id, enterer_id, modifier_id,
              datetime_entered, datetime_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                uuid,
                normalize(&write.title),
                write.r#type.clone().unwrap_or_else(|| "other".to_string()),
                write.url,
                normalize(&write.description),
                markup,
                contents,
                unpacked,
                html,
                write.date_elicited.map(|d| d.format("%Y-%m-%d").to_string()),
                write.elicitor_id,
                user.id,
                user.id,
                now,
                now,
            ],
        )?;
        let id = self.conn().last_insert_rowid();
        self.save_collection_relations(id, &write.tags, &write.files, &form_ids)?;
        info!(collection_id = id, forms = form_ids.len(), "collection created");
        self.get_collection_raw(id)
    }

    /// Update a collection; identical submissions are rejected, accepted
    /// ones are backed up and their references re-propagated.
    pub fn update_collection(
        &mut self,
        user: &User,
        id: Id,
        write: CollectionWrite,
    ) -> Result<Collection> {
        self.guard_readonly()?;
        let existing = self.get_collection_raw(id)?;
        self.check_referent_accessible(user, &existing.tags, id)?;
        self.validate_collection_write(&write)?;
        let contents = normalize(&write.contents).replace('\r', "");
        let markup = write
            .markup_language
            .clone()
            .unwrap_or_else(|| existing.markup_language.clone());

        let tags_now: BTreeSet<Id> = existing.tags.iter().map(|t| t.id).collect();
        let tags_new: BTreeSet<Id> = write.tags.iter().copied().collect();
        let files_now: BTreeSet<Id> = existing.files.iter().copied().collect();
        let files_new: BTreeSet<Id> = write.files.iter().copied().collect();
        if existing.title == normalize(&write.title)
            && existing.r#type == write.r#type.clone().unwrap_or_else(|| existing.r#type.clone())
            && existing.url == write.url
            && existing.description == normalize(&write.description)
            && existing.markup_language == markup
            && existing.contents == contents
            && existing.date_elicited == write.date_elicited
            && existing.elicitor_id == write.elicitor_id
            && tags_now == tags_new
            && files_now == files_new
        {
            return Err(OldbError::NotNew);
        }

        let mut visited = vec![id];
        let unpacked = self.expand_collection_refs(&contents, &mut visited)?;
        let form_ids = self.validate_form_refs(user, &unpacked)?;
        let html = render_html(&unpacked, &markup);

        self.write_backup(
            "collection_backup",
            existing.id,
            &existing.uuid,
            &serde_json::to_value(&existing)?,
            &format_datetime(&existing.datetime_modified),
        )?;
        let now = format_datetime(&crate::core::now());
        self.conn().execute(
            "UPDATE collection SET title = ?1, type = ?2, url = ?3, description = ?4,
             markup_language = ?5, contents = ?6, contents_unpacked = ?7, html = ?8,
             date_elicited = ?9, elicitor_id = ?10, modifier_id = ?11, datetime_modified = ?12
             WHERE id = ?13",
            params![
                normalize(&write.title),
                write.r#type.clone().unwrap_or_else(|| existing.r#type.clone()),
                write.url,
                normalize(&write.description),
                markup,
                contents,
                unpacked,
                html,
                write.date_elicited.map(|d| d.format("%Y-%m-%d").to_string()),
                write.elicitor_id,
                user.id,
                now,
                id,
            ],
        )?;
        self.save_collection_relations(id, &write.tags, &write.files, &form_ids)?;
        info!(collection_id = id, "collection updated");
        self.get_collection_raw(id)
    }

    /// Delete a collection, scrubbing `collection[<id>]` tokens out of
    /// other collections' contents.
    pub fn delete_collection(&mut self, user: &User, id: Id) -> Result<Collection> {
        self.guard_readonly()?;
        let existing = self.get_collection_raw(id)?;
        self.check_referent_accessible(user, &existing.tags, id)?;
        self.write_backup(
            "collection_backup",
            existing.id,
            &existing.uuid,
            &serde_json::to_value(&existing)?,
            &format_datetime(&existing.datetime_modified),
        )?;
        self.conn().execute("DELETE FROM collection WHERE id = ?1", params![id])?;
        self.scrub_collection_reference(user, id)?;
        info!(collection_id = id, "collection deleted");
        Ok(existing)
    }

    /// Fetch a collection without access filtering.
    pub fn get_collection_raw(&self, id: Id) -> Result<Collection> {
        let collection = self
            .conn()
            .query_row(
                "SELECT * FROM collection WHERE id = ?1",
                params![id],
                Collection::from_row,
            )
            .optional()?
            .ok_or(OldbError::NotFound { kind: "collection", id })?;
        self.attach_collection_relations(collection)
    }

    /// Fetch a collection, enforcing the access filter.
    pub fn get_collection(&self, user: &User, id: Id) -> Result<Collection> {
        let collection = self.get_collection_raw(id)?;
        if self.hidden_from(user, &collection.tags)? {
            return Err(OldbError::Unauthorized { referent: Some(id) });
        }
        Ok(collection)
    }

    /// A collection's history by id or UUID.
    pub fn collection_history(&self, key: &HistoryKey) -> Result<History> {
        self.history_generic("collection", "collection_backup", key, |store, id| {
            Ok(Some(serde_json::to_value(store.get_collection_raw(id)?)?))
        })
    }

    // ------------------------------------------------------------------
    // Propagation
    // ------------------------------------------------------------------

    /// Expand `collection[...]` references transitively. `visited`
    /// holds the reference chain; re-entering a collection already on
    /// the chain is a cycle.
    fn expand_collection_refs(&self, contents: &str, visited: &mut Vec<Id>) -> Result<String> {
        let pattern = collection_ref_pattern();
        let mut out = String::with_capacity(contents.len());
        let mut last = 0usize;
        for captures in pattern.captures_iter(contents) {
            let whole = captures.get(0).expect("match exists");
            let referenced: Id = captures[1].parse().map_err(|_| {
                OldbError::invalid("contents", "Invalid collection reference.")
            })?;
            out.push_str(&contents[last..whole.start()]);
            if visited.contains(&referenced) {
                return Err(OldbError::CircularReference(referenced));
            }
            let child: Option<String> = self
                .conn()
                .query_row(
                    "SELECT contents FROM collection WHERE id = ?1",
                    params![referenced],
                    |row| row.get(0),
                )
                .optional()?;
            let child = child.ok_or_else(|| {
                OldbError::invalid(
                    "contents",
                    &format!("There is no collection with id {}.", referenced),
                )
            })?;
            visited.push(referenced);
            out.push_str(&self.expand_collection_refs(&child, visited)?);
            visited.pop();
            last = whole.end();
        }
        out.push_str(&contents[last..]);
        Ok(out)
    }

    /// Validate every `form[<id>]` referent: it must exist and be
    /// accessible to the writer. Returns the referenced ids.
    fn validate_form_refs(&self, user: &User, unpacked: &str) -> Result<Vec<Id>> {
        let ids = referenced_form_ids(unpacked);
        for &form_id in &ids {
            let form = self.get_form_raw(form_id).map_err(|_| {
                OldbError::invalid(
                    "contents",
                    &format!("There is no form with id {}.", form_id),
                )
            })?;
            self.check_referent_accessible(user, &form.tags, form_id)?;
        }
        Ok(ids)
    }

    /// Remove `form[<id>]` tokens naming a deleted form from every
    /// collection that carries them, re-rendering each and writing a
    /// backup per cascaded edit. Invoked by form deletion.
    pub(crate) fn scrub_form_reference(&mut self, user: &User, form_id: Id) -> Result<()> {
        let pattern = Regex::new(&format!(r"[Ff]orm\[{}\]", form_id)).expect("static shape");
        self.scrub_reference(user, &pattern)
    }

    /// Remove `collection[<id>]` tokens naming a deleted collection.
    fn scrub_collection_reference(&mut self, user: &User, collection_id: Id) -> Result<()> {
        let pattern = Regex::new(&format!(r"[cC]ollection[\[\(]{}[\]\)]", collection_id))
            .expect("static shape");
        self.scrub_reference(user, &pattern)
    }

    fn scrub_reference(&mut self, user: &User, pattern: &Regex) -> Result<()> {
        let affected: Vec<(Id, String)> = {
            let mut stmt = self
                .conn()
                .prepare("SELECT id, contents FROM collection ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<(Id, String)>>>()?;
            rows.into_iter()
                .filter(|(_, contents)| pattern.is_match(contents))
                .collect()
        };
        for (id, contents) in affected {
            let existing = self.get_collection_raw(id)?;
            self.write_backup(
                "collection_backup",
                existing.id,
                &existing.uuid,
                &serde_json::to_value(&existing)?,
                &format_datetime(&existing.datetime_modified),
            )?;
            let scrubbed = pattern.replace_all(&contents, "").to_string();
            let mut visited = vec![id];
            let unpacked = self.expand_collection_refs(&scrubbed, &mut visited)?;
            let form_ids = referenced_form_ids(&unpacked);
            let html = render_html(&unpacked, &existing.markup_language);
            let now = format_datetime(&crate::core::now());
            self.conn().execute(
                "UPDATE collection SET contents = ?1, contents_unpacked = ?2, html = ?3,
                 modifier_id = ?4, datetime_modified = ?5 WHERE id = ?6",
                params![scrubbed, unpacked, html, user.id, now, id],
            )?;
            self.set_collection_forms(id, &form_ids)?;
            debug!(collection_id = id, "dangling reference scrubbed");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn validate_collection_write(&self, write: &CollectionWrite) -> Result<()> {
        let mut errors = std::collections::BTreeMap::new();
        if write.title.trim().is_empty() {
            errors.insert("title".to_string(), "Please enter a value".to_string());
        }
        if let Some(kind) = &write.r#type {
            if !crate::core::constants::COLLECTION_TYPES.contains(&kind.as_str()) {
                errors.insert(
                    "type".to_string(),
                    format!(
                        "Value must be one of: story; elicitation; paper; discourse; other (not {})",
                        kind
                    ),
                );
            }
        }
        if let Some(markup) = &write.markup_language {
            if !crate::core::constants::MARKUP_LANGUAGES.contains(&markup.as_str()) {
                errors.insert(
                    "markup_language".to_string(),
                    format!(
                        "Value must be one of: reStructuredText; Markdown (not {})",
                        markup
                    ),
                );
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(OldbError::Validation { errors })
        }
    }

    fn save_collection_relations(
        &mut self,
        id: Id,
        tag_ids: &[Id],
        file_ids: &[Id],
        form_ids: &[Id],
    ) -> Result<()> {
        let mut tag_ids = tag_ids.to_vec();
        // Transitive restriction: referencing a restricted form or file
        // restricts the collection.
        let mut inherit = false;
        for &form_id in form_ids {
            let form = self.get_form_raw(form_id)?;
            if form.is_restricted() {
                inherit = true;
                break;
            }
        }
        if !inherit {
            for &file_id in file_ids {
                let tags = self.tags_via("file_tag", "file_id", file_id)?;
                if tags.iter().any(|t| t.name == RESTRICTED_TAG) {
                    inherit = true;
                    break;
                }
            }
        }
        if inherit {
            let restricted = self.get_or_create_tag(RESTRICTED_TAG)?;
            if !tag_ids.contains(&restricted.id) {
                tag_ids.push(restricted.id);
            }
        }
        self.set_tags("collection_tag", "collection_id", id, &tag_ids)?;
        self.conn()
            .execute("DELETE FROM collection_file WHERE collection_id = ?1", params![id])?;
        for &file_id in file_ids {
            self.conn().execute(
                "INSERT OR IGNORE INTO collection_file (collection_id, file_id) VALUES (?1, ?2)",
                params![id, file_id],
            )?;
        }
        self.set_collection_forms(id, form_ids)
    }

    fn set_collection_forms(&self, id: Id, form_ids: &[Id]) -> Result<()> {
        self.conn()
            .execute("DELETE FROM collection_form WHERE collection_id = ?1", params![id])?;
        for &form_id in form_ids {
            self.conn().execute(
                "INSERT OR IGNORE INTO collection_form (collection_id, form_id) VALUES (?1, ?2)",
                params![id, form_id],
            )?;
        }
        Ok(())
    }

    fn attach_collection_relations(&self, mut collection: Collection) -> Result<Collection> {
        let mut stmt = self.conn().prepare(
            "SELECT form_id FROM collection_form WHERE collection_id = ?1 ORDER BY form_id",
        )?;
        collection.forms = stmt
            .query_map(params![collection.id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        collection.tags = self.tags_via("collection_tag", "collection_id", collection.id)?;
        let mut stmt = self.conn().prepare(
            "SELECT file_id FROM collection_file WHERE collection_id = ?1 ORDER BY file_id",
        )?;
        collection.files = stmt
            .query_map(params![collection.id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use crate::model::{FormWrite, Translation};
    use crate::store::testing::test_store;

    fn form(store: &mut Store, user: &User, transcription: &str) -> Id {
        store
            .create_form(
                user,
                FormWrite {
                    transcription: transcription.to_string(),
                    translations: vec![Translation {
                        id: 0,
                        transcription: "t".to_string(),
                        grammaticality: String::new(),
                    }],
                    ..Default::default()
                },
            )
            .unwrap()
            .id
    }

    fn collection(store: &mut Store, user: &User, title: &str, contents: &str) -> Collection {
        store
            .create_collection(
                user,
                CollectionWrite {
                    title: title.to_string(),
                    contents: contents.to_string(),
                    ..Default::default()
                },
            )
            .unwrap()
    }

    #[test]
    fn test_referenced_form_ids() {
        assert_eq!(referenced_form_ids("form[1] Form[2] form[1]"), vec![1, 2]);
        assert!(referenced_form_ids("formless").is_empty());
    }

    #[test]
    fn test_render_markdown_and_rest() {
        let html = render_html("# Title\n\nBody", "Markdown");
        assert!(html.contains("<h1>"));
        let rest = render_html("One <tag>\n\nTwo", "reStructuredText");
        assert_eq!(rest, "<p>One &lt;tag&gt;</p>\n<p>Two</p>\n");
    }

    #[test]
    fn test_form_refs_denormalized() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let a = form(&mut store, &user, "a");
        let b = form(&mut store, &user, "b");
        let c = collection(
            &mut store,
            &user,
            "story",
            &format!("Once upon form[{}] and form[{}].", a, b),
        );
        assert_eq!(c.forms, vec![a, b]);
        assert!(c.html.contains("Once upon"));
    }

    #[test]
    fn test_missing_form_ref_rejected() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let err = store
            .create_collection(
                &user,
                CollectionWrite {
                    title: "t".to_string(),
                    contents: "form[999]".to_string(),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_transitive_expansion() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let a = form(&mut store, &user, "a");
        let inner = collection(&mut store, &user, "inner", &format!("inner text form[{}]", a));
        let outer = collection(
            &mut store,
            &user,
            "outer",
            &format!("before collection[{}] after", inner.id),
        );
        assert_eq!(
            outer.contents_unpacked,
            format!("before inner text form[{}] after", a)
        );
        // Forms referenced by included collections are inherited.
        assert_eq!(outer.forms, vec![a]);

        // The paren spelling resolves too.
        let outer2 = collection(
            &mut store,
            &user,
            "outer2",
            &format!("collection({})", inner.id),
        );
        assert_eq!(outer2.contents_unpacked, format!("inner text form[{}]", a));
    }

    #[test]
    fn test_circular_reference_detected() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let a = collection(&mut store, &user, "a", "plain");
        let b = collection(&mut store, &user, "b", &format!("collection[{}]", a.id));
        // Make a reference b: now a -> b -> a.
        let err = store
            .update_collection(
                &user,
                a.id,
                CollectionWrite {
                    title: "a".to_string(),
                    contents: format!("collection[{}]", b.id),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, OldbError::CircularReference(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_restricted_form_ref_restricts_collection() {
        let (_tmp, mut store) = test_store();
        let admin = store.create_user("admin", Role::Administrator).unwrap();
        let viewer = store.create_user("viewer", Role::Viewer).unwrap();
        let restricted = store.get_or_create_tag(RESTRICTED_TAG).unwrap();
        let secret = store
            .create_form(
                &admin,
                FormWrite {
                    transcription: "secret".to_string(),
                    tags: vec![restricted.id],
                    translations: vec![Translation {
                        id: 0,
                        transcription: "t".to_string(),
                        grammaticality: String::new(),
                    }],
                    ..Default::default()
                },
            )
            .unwrap();

        // A restricted writer may not even reference the form.
        let err = store
            .create_collection(
                &viewer,
                CollectionWrite {
                    title: "t".to_string(),
                    contents: format!("form[{}]", secret.id),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.status_code(), 403);

        // An admin may; the collection then inherits the restriction.
        let c = collection(&mut store, &admin, "t", &format!("form[{}]", secret.id));
        assert!(c.tags.iter().any(|t| t.name == RESTRICTED_TAG));
        assert!(store.get_collection(&viewer, c.id).is_err());
    }

    #[test]
    fn test_form_delete_cascades_into_contents() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let a = form(&mut store, &user, "a");
        let keep = form(&mut store, &user, "keep");
        let c = collection(
            &mut store,
            &user,
            "story",
            &format!("keep form[{}] drop form[{}]", keep, a),
        );

        store.delete_form(&user, a).unwrap();
        let updated = store.get_collection_raw(c.id).unwrap();
        assert_eq!(updated.contents, format!("keep form[{}] drop ", keep));
        assert_eq!(updated.forms, vec![keep]);
        // The cascaded edit wrote a backup of the pre-edit state.
        let history = store.collection_history(&HistoryKey::Id(c.id)).unwrap();
        assert_eq!(history.previous_versions.len(), 1);
    }

    #[test]
    fn test_collection_delete_cascades() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let inner = collection(&mut store, &user, "inner", "inner text");
        let outer = collection(
            &mut store,
            &user,
            "outer",
            &format!("see collection[{}] here", inner.id),
        );
        store.delete_collection(&user, inner.id).unwrap();
        let updated = store.get_collection_raw(outer.id).unwrap();
        assert_eq!(updated.contents, "see  here");
        assert_eq!(updated.contents_unpacked, "see  here");
    }

    #[test]
    fn test_vacuous_update_rejected() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let c = collection(&mut store, &user, "t", "body");
        let err = store
            .update_collection(
                &user,
                c.id,
                CollectionWrite {
                    title: "t".to_string(),
                    contents: "body".to_string(),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, OldbError::NotNew));
    }
}
