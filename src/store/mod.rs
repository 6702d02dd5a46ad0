//! The resource store.
//!
//! One [`Store`] wraps one database connection plus the instance's
//! artifact tree. Request threads and background workers each open
//! their own; nothing here is shared across threads.
//!
//! The store enforces the cross-cutting persistence rules:
//!
//! - **Restricted visibility**: resources tagged `restricted` are
//!   invisible to users outside the unrestricted set, on every read
//!   path; mutations referencing an inaccessible referent are rejected.
//! - **Backup-on-mutate**: every accepted update or delete first writes
//!   an immutable snapshot row sharing the live row's UUID.
//! - **Vacuous-update rejection**: an update that changes nothing is
//!   answered with "the submitted data were not new".
//!
//! Resource-specific operations live with their domains
//! ([`crate::forms`], [`crate::corpus`], [`crate::phonology`], …) as
//! further `impl Store` blocks.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Settings;
use crate::core::constants::RESTRICTED_TAG;
use crate::core::{Id, OldbError, Result};
use crate::db;
use crate::layout::ArtifactTree;
use crate::model::{
    format_datetime, ApplicationSettings, BackupRow, Form, History, Tag, Translation, User,
};
use crate::query::CompiledQuery;

/// SQLite bails out beyond roughly a thousand bound parameters; id
/// batches stay safely under the cap.
pub(crate) const SQLITE_ID_BATCH: usize = 500;

/// Client-supplied pagination parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Paginator {
    /// 1-based page number.
    #[serde(default)]
    pub page: Option<u64>,
    /// Page size.
    #[serde(default)]
    pub items_per_page: Option<u64>,
    /// Client-claimed total; echoed back without verification when
    /// present, sparing a count on follow-up pages.
    #[serde(default)]
    pub count: Option<u64>,
}

/// One page of results.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    /// Echoed pagination parameters plus the total count.
    pub paginator: EchoedPaginator,
    /// The page's items.
    pub items: Vec<T>,
    /// Total item count (same as `paginator.count`).
    #[serde(skip)]
    pub count: u64,
}

/// The paginator as echoed back to the client.
#[derive(Debug, Clone, Serialize)]
pub struct EchoedPaginator {
    /// 1-based page number served.
    pub page: u64,
    /// Page size served.
    pub items_per_page: u64,
    /// Total item count.
    pub count: u64,
}

/// Slice `items` according to `paginator`. Absent parameters mean "all
/// items, one page".
pub fn paginate<T>(items: Vec<T>, paginator: &Paginator) -> Page<T> {
    let total = paginator.count.unwrap_or(items.len() as u64);
    let items_per_page = paginator
        .items_per_page
        .unwrap_or_else(|| (items.len() as u64).max(1));
    let page = paginator.page.unwrap_or(1).max(1);
    let start = ((page - 1) * items_per_page) as usize;
    let sliced: Vec<T> = items
        .into_iter()
        .skip(start)
        .take(items_per_page as usize)
        .collect();
    Page {
        paginator: EchoedPaginator { page, items_per_page, count: total },
        items: sliced,
        count: total,
    }
}

/// Key for history lookups: live id or UUID (the latter survives
/// deletion).
#[derive(Debug, Clone)]
pub enum HistoryKey {
    /// Look up by the live row's id.
    Id(Id),
    /// Look up by UUID.
    Uuid(String),
}

/// A database session bound to one instance's settings and artifact
/// tree.
pub struct Store {
    conn: Connection,
    settings: Settings,
    tree: ArtifactTree,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("db_path", &self.settings.db_path)
            .field("old_name", &self.settings.old_name)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open a session: connect (creating the schema if needed) and make
    /// sure the artifact tree skeleton exists.
    pub fn open(settings: &Settings) -> Result<Self> {
        let conn = db::connect(&settings.db_path)?;
        let tree = ArtifactTree::new(settings);
        tree.initialize()?;
        info!(db = %settings.db_path.display(), old_name = %settings.old_name, "store opened");
        Ok(Self { conn, settings: settings.clone(), tree })
    }

    /// The underlying connection.
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// The instance settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The instance's artifact tree.
    pub fn tree(&self) -> &ArtifactTree {
        &self.tree
    }

    /// Reject mutations when the instance runs read-only.
    pub fn guard_readonly(&self) -> Result<()> {
        if self.settings.readonly {
            Err(OldbError::ReadOnlyMode)
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Application settings and users
    // ------------------------------------------------------------------

    /// The current application settings (the most recent row), or the
    /// defaults when none has been created.
    pub fn app_settings(&self) -> Result<ApplicationSettings> {
        let row = self
            .conn
            .query_row(
                "SELECT * FROM application_settings ORDER BY id DESC LIMIT 1",
                [],
                ApplicationSettings::from_row,
            )
            .optional()?;
        Ok(row.unwrap_or_default())
    }

    /// Replace the application settings.
    pub fn save_app_settings(&mut self, settings: &ApplicationSettings) -> Result<()> {
        self.guard_readonly()?;
        self.conn.execute(
            "INSERT INTO application_settings
             (morpheme_delimiters, unrestricted_users, datetime_modified)
             VALUES (?1, ?2, ?3)",
            params![
                settings.morpheme_delimiters,
                settings.store_unrestricted(),
                settings.store_datetime(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a user.
    pub fn get_user(&self, id: Id) -> Result<User> {
        self.conn
            .query_row("SELECT * FROM user WHERE id = ?1", params![id], User::from_row)
            .optional()?
            .ok_or(OldbError::NotFound { kind: "user", id })
    }

    /// Create a user. Fixture-level; full user CRUD and validation live
    /// with the account-management layer.
    pub fn create_user(
        &mut self,
        username: &str,
        role: crate::core::types::Role,
    ) -> Result<User> {
        self.guard_readonly()?;
        let now = format_datetime(&crate::core::now());
        self.conn.execute(
            "INSERT INTO user (username, role, datetime_modified) VALUES (?1, ?2, ?3)",
            params![username, role.as_str(), now],
        )?;
        let id = self.conn.last_insert_rowid();
        std::fs::create_dir_all(self.tree.user_dir(username))?;
        self.get_user(id)
    }

    // ------------------------------------------------------------------
    // Syntactic categories
    // ------------------------------------------------------------------

    /// Create a syntactic category; names are unique per instance.
    pub fn create_syntactic_category(
        &mut self,
        name: &str,
        r#type: &str,
    ) -> Result<crate::model::SyntacticCategory> {
        self.guard_readonly()?;
        self.check_unique_name("syntactic_category", name, None)?;
        let now = format_datetime(&crate::core::now());
        self.conn.execute(
            "INSERT INTO syntactic_category (name, type, datetime_modified) VALUES (?1, ?2, ?3)",
            params![name, r#type, now],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(self.conn.query_row(
            "SELECT * FROM syntactic_category WHERE id = ?1",
            params![id],
            crate::model::SyntacticCategory::from_row,
        )?)
    }

    // ------------------------------------------------------------------
    // Tags
    // ------------------------------------------------------------------

    /// Fetch a tag by name.
    pub fn tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        Ok(self
            .conn
            .query_row("SELECT * FROM tag WHERE name = ?1", params![name], Tag::from_row)
            .optional()?)
    }

    /// Fetch a tag by name, creating it if absent.
    pub fn get_or_create_tag(&mut self, name: &str) -> Result<Tag> {
        if let Some(tag) = self.tag_by_name(name)? {
            return Ok(tag);
        }
        let now = format_datetime(&crate::core::now());
        self.conn.execute(
            "INSERT INTO tag (name, datetime_modified) VALUES (?1, ?2)",
            params![name, now],
        )?;
        Ok(self.tag_by_name(name)?.expect("tag was just inserted"))
    }

    /// Fetch tags by id, erroring on any missing id.
    pub fn tags_by_ids(&self, ids: &[Id]) -> Result<Vec<Tag>> {
        let mut tags = Vec::with_capacity(ids.len());
        for &id in ids {
            let tag = self
                .conn
                .query_row("SELECT * FROM tag WHERE id = ?1", params![id], Tag::from_row)
                .optional()?
                .ok_or(OldbError::NotFound { kind: "tag", id })?;
            tags.push(tag);
        }
        Ok(tags)
    }

    pub(crate) fn tags_via(&self, link_table: &str, owner_col: &str, owner: Id) -> Result<Vec<Tag>> {
        let sql = format!(
            "SELECT tag.* FROM tag JOIN {link_table} ON tag.id = {link_table}.tag_id
             WHERE {link_table}.{owner_col} = ?1 ORDER BY tag.id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let tags = stmt
            .query_map(params![owner], Tag::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    pub(crate) fn set_tags(
        &self,
        link_table: &str,
        owner_col: &str,
        owner: Id,
        tag_ids: &[Id],
    ) -> Result<()> {
        self.conn.execute(
            &format!("DELETE FROM {link_table} WHERE {owner_col} = ?1"),
            params![owner],
        )?;
        for &tag_id in tag_ids {
            self.conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO {link_table} ({owner_col}, tag_id) VALUES (?1, ?2)"
                ),
                params![owner, tag_id],
            )?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Restricted visibility (the access filter)
    // ------------------------------------------------------------------

    /// A user is unrestricted iff they are an administrator or their id
    /// appears in the application settings' unrestricted-users set.
    pub fn is_unrestricted(&self, user: &User) -> Result<bool> {
        if user.is_administrator() {
            return Ok(true);
        }
        Ok(self.app_settings()?.unrestricted_users.contains(&user.id))
    }

    /// Whether `tags` make a resource invisible to `user`.
    pub fn hidden_from(&self, user: &User, tags: &[Tag]) -> Result<bool> {
        if !tags.iter().any(|t| t.name == RESTRICTED_TAG) {
            return Ok(false);
        }
        Ok(!self.is_unrestricted(user)?)
    }

    /// Reject a mutation whose referent the user cannot access.
    pub fn check_referent_accessible(
        &self,
        user: &User,
        tags: &[Tag],
        referent: Id,
    ) -> Result<()> {
        if self.hidden_from(user, tags)? {
            Err(OldbError::Unauthorized { referent: Some(referent) })
        } else {
            Ok(())
        }
    }

    /// Whether a file is hidden from `user`. A subinterval-referencing
    /// file carries no tags of its own and inherits accessibility from
    /// its parent.
    pub fn file_hidden_from(&self, user: &User, file_id: Id) -> Result<bool> {
        let tags = self.tags_via("file_tag", "file_id", file_id)?;
        if self.hidden_from(user, &tags)? {
            return Ok(true);
        }
        if tags.is_empty() {
            let parent: Option<Id> = self
                .conn
                .query_row(
                    "SELECT parent_file_id FROM file WHERE id = ?1",
                    params![file_id],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            if let Some(parent) = parent {
                return self.file_hidden_from(user, parent);
            }
        }
        Ok(false)
    }

    /// Drop the forms `user` may not see.
    pub fn filter_restricted_forms(&self, user: &User, forms: Vec<Form>) -> Result<Vec<Form>> {
        if self.is_unrestricted(user)? {
            return Ok(forms);
        }
        Ok(forms.into_iter().filter(|f| !f.is_restricted()).collect())
    }

    // ------------------------------------------------------------------
    // Form fetching
    // ------------------------------------------------------------------

    /// Fetch one form with relations, unfiltered. Access checks are the
    /// caller's job (readers filter, writers reject).
    pub fn get_form_raw(&self, id: Id) -> Result<Form> {
        let form = self
            .conn
            .query_row("SELECT * FROM form WHERE id = ?1", params![id], Form::from_row)
            .optional()?
            .ok_or(OldbError::NotFound { kind: "form", id })?;
        self.attach_form_relations(form)
    }

    /// Fetch one form, enforcing the access filter for `user`.
    pub fn get_form(&self, user: &User, id: Id) -> Result<Form> {
        let form = self.get_form_raw(id)?;
        if self.hidden_from(user, &form.tags)? {
            return Err(OldbError::Unauthorized { referent: Some(id) });
        }
        Ok(form)
    }

    /// Fetch forms by explicit ids, in the given order, erroring on any
    /// missing id. Ids are looked up in batches of at most
    /// [`SQLITE_ID_BATCH`] to stay under the host parameter cap.
    pub fn forms_by_ids(&self, ids: &[Id]) -> Result<Vec<Form>> {
        let mut by_id = std::collections::HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(SQLITE_ID_BATCH) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("SELECT * FROM form WHERE id IN ({placeholders})");
            let mut stmt = self.conn.prepare(&sql)?;
            let chunk_params: Vec<SqlValue> =
                chunk.iter().map(|&id| SqlValue::Integer(id)).collect();
            let rows = stmt
                .query_map(rusqlite::params_from_iter(chunk_params), Form::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for form in rows {
                by_id.insert(form.id, form);
            }
        }
        let mut forms = Vec::with_capacity(ids.len());
        for &id in ids {
            match by_id.remove(&id) {
                Some(form) => forms.push(self.attach_form_relations(form)?),
                None => {
                    return Err(OldbError::invalid(
                        "content",
                        &format!("There is no form with id {}.", id),
                    ))
                }
            }
        }
        Ok(forms)
    }

    /// Run a compiled Form search and hydrate the results.
    pub fn run_form_query(&self, compiled: &CompiledQuery) -> Result<Vec<Form>> {
        let mut stmt = self.conn.prepare(&compiled.sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(compiled.params.iter().cloned()),
                Form::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!(n = rows.len(), "form search executed");
        rows.into_iter().map(|f| self.attach_form_relations(f)).collect()
    }

    pub(crate) fn attach_form_relations(&self, mut form: Form) -> Result<Form> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM translation WHERE form_id = ?1 ORDER BY id",
        )?;
        form.translations = stmt
            .query_map(params![form.id], Translation::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        form.tags = self.tags_via("form_tag", "form_id", form.id)?;
        let mut stmt = self
            .conn
            .prepare("SELECT file_id FROM form_file WHERE form_id = ?1 ORDER BY file_id")?;
        form.files = stmt
            .query_map(params![form.id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(form)
    }

    // ------------------------------------------------------------------
    // Backups and history
    // ------------------------------------------------------------------

    /// Write a backup row capturing `snapshot` (the full pre-change
    /// serialization of the resource).
    pub(crate) fn write_backup(
        &self,
        backup_table: &str,
        resource_id: Id,
        uuid: &str,
        snapshot: &serde_json::Value,
        datetime_modified: &str,
    ) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO {backup_table}
                 (resource_id, uuid, snapshot, datetime_modified)
                 VALUES (?1, ?2, ?3, ?4)"
            ),
            params![resource_id, uuid, snapshot.to_string(), datetime_modified],
        )?;
        debug!(backup_table, resource_id, uuid, "backup row written");
        Ok(())
    }

    /// All backups for a UUID, newest first.
    pub fn backups_for_uuid(&self, backup_table: &str, uuid: &str) -> Result<Vec<BackupRow>> {
        let sql = format!(
            "SELECT * FROM {backup_table} WHERE uuid = ?1
             ORDER BY datetime_modified DESC, id DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![uuid], BackupRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Generic history: resolve the key to a UUID (via the live table
    /// first, then the backups), then assemble the live serialization
    /// plus all snapshots.
    pub(crate) fn history_generic(
        &self,
        live_table: &str,
        backup_table: &str,
        key: &HistoryKey,
        serialize_live: impl Fn(&Store, Id) -> Result<Option<serde_json::Value>>,
    ) -> Result<History> {
        let (live_id, uuid) = match key {
            HistoryKey::Id(id) => {
                let uuid: Option<String> = self
                    .conn
                    .query_row(
                        &format!("SELECT uuid FROM {live_table} WHERE id = ?1"),
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                match uuid {
                    Some(uuid) => (Some(*id), uuid),
                    None => {
                        // Deleted: the id may still appear in backups.
                        let uuid: Option<String> = self
                            .conn
                            .query_row(
                                &format!(
                                    "SELECT uuid FROM {backup_table}
                                     WHERE resource_id = ?1
                                     ORDER BY id DESC LIMIT 1"
                                ),
                                params![id],
                                |row| row.get(0),
                            )
                            .optional()?;
                        match uuid {
                            Some(uuid) => (None, uuid),
                            None => {
                                return Ok(History {
                                    resource: None,
                                    previous_versions: Vec::new(),
                                })
                            }
                        }
                    }
                }
            }
            HistoryKey::Uuid(uuid) => {
                let live_id: Option<Id> = self
                    .conn
                    .query_row(
                        &format!("SELECT id FROM {live_table} WHERE uuid = ?1"),
                        params![uuid],
                        |row| row.get(0),
                    )
                    .optional()?;
                (live_id, uuid.clone())
            }
        };
        let resource = match live_id {
            Some(id) => serialize_live(self, id)?,
            None => None,
        };
        Ok(History {
            resource,
            previous_versions: self.backups_for_uuid(backup_table, &uuid)?,
        })
    }

    /// Enforce per-resource name uniqueness.
    pub(crate) fn check_unique_name(
        &self,
        table: &str,
        name: &str,
        exclude_id: Option<Id>,
    ) -> Result<()> {
        let clash: Option<Id> = self
            .conn
            .query_row(
                &format!("SELECT id FROM {table} WHERE name = ?1"),
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        match clash {
            Some(id) if Some(id) != exclude_id => Err(OldbError::invalid(
                "name",
                &format!("The name {} is already taken.", name),
            )),
            _ => Ok(()),
        }
    }
}

/// Shared unit-test fixtures.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tempfile::TempDir;

    /// A store over a fresh temp directory; keep the `TempDir` alive
    /// for the test's duration.
    pub(crate) fn test_store() -> (TempDir, Store) {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::for_root(tmp.path());
        let store = Store::open(&settings).unwrap();
        (tmp, store)
    }
}
