// Copyright 2025 Roberto Antunes
//
// Licensed under the Functional Source License, Version 1.1 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://github.com/RobAntunes/lingodb/blob/main/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The morphology compiler.
//!
//! A morphology derives a foma script from data: word-structure rules
//! (explicit `V-Agr`-style category sequences, or the attested
//! sequences of a rules corpus) and a morpheme inventory harvested from
//! a lexicon corpus. The script is emitted in either regex or lexc
//! flavor, compiled into a binary FST, and applied in both directions.
//!
//! Morphemes are written with the rare delimiter (U+2980) separating
//! shape, gloss and category, so analyses survive round trips through
//! foma unambiguously even in orthographies that use ordinary
//! punctuation.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use rusqlite::{params, OptionalExtension};
use tracing::{info, warn};

use crate::core::constants::{RARE_DELIMITER, UNKNOWN_CATEGORY};
use crate::core::types::normalize;
use crate::core::{Id, OldbError, Result};
use crate::corpus::word_category_sequences_of;
use crate::forms::analyze_word;
use crate::layout::ResourceKind;
use crate::model::{format_datetime, History, Morphology, User};
use crate::phonology::FLOOKUP_TIMEOUT;
use crate::store::{HistoryKey, Store};
use crate::toolkit;

/// The morpheme inventory keyed by category: each entry is a
/// `(shape, gloss)` pair.
pub type Lexicon = BTreeMap<String, BTreeSet<(String, String)>>;

/// The writable fields of a morphology.
#[derive(Debug, Clone)]
pub struct MorphologyWrite {
    /// Unique name (required).
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Script flavor: `regex` or `lexc`.
    pub script_type: String,
    /// Explicit whitespace-separated category-sequence rules.
    pub rules: String,
    /// Corpus whose analyzed forms supply the rules.
    pub rules_corpus_id: Option<Id>,
    /// Corpus supplying the morpheme inventory.
    pub lexicon_corpus_id: Option<Id>,
    /// Emit rich (shape⦀gloss⦀category) tokens on the upper side.
    pub rich_upper: bool,
    /// Emit rich tokens on the lower side.
    pub rich_lower: bool,
    /// Admit unknown morphemes via a wildcard matcher.
    pub include_unknowns: bool,
    /// Harvest morphemes from the rules corpus too.
    pub extract_morphemes_from_rules_corpus: bool,
}

impl Default for MorphologyWrite {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            script_type: "lexc".to_string(),
            rules: String::new(),
            rules_corpus_id: None,
            lexicon_corpus_id: None,
            rich_upper: true,
            rich_lower: false,
            include_unknowns: false,
            extract_morphemes_from_rules_corpus: false,
        }
    }
}

impl Store {
    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    /// Create a morphology.
    pub fn create_morphology(&mut self, user: &User, write: MorphologyWrite) -> Result<Morphology> {
        self.guard_readonly()?;
        self.validate_morphology_write(&write, None)?;
        let now = format_datetime(&crate::core::now());
        let uuid = crate::core::new_uuid();
        self.conn().execute(
            "INSERT INTO morphology
             (uuid, name, description, script_type, rules, rules_corpus_id, lexicon_corpus_id,
              rich_upper, rich_lower, include_unknowns, extract_morphemes_from_rules_corpus,
              enterer_id, modifier_id, datetime_entered, datetime_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                uuid,
                normalize(&write.name),
                normalize(&write.description),
                write.script_type,
                normalize_rules(&write.rules),
                write.rules_corpus_id,
                write.lexicon_corpus_id,
                write.rich_upper,
                write.rich_lower,
                write.include_unknowns,
                write.extract_morphemes_from_rules_corpus,
                user.id,
                user.id,
                now,
                now,
            ],
        )?;
        let id = self.conn().last_insert_rowid();
        self.tree().ensure_resource_dir(ResourceKind::Morphology, id)?;
        info!(morphology_id = id, "morphology created");
        self.get_morphology(id)
    }

    /// Update a morphology; identical submissions are rejected, accepted
    /// ones are backed up first.
    pub fn update_morphology(
        &mut self,
        user: &User,
        id: Id,
        write: MorphologyWrite,
    ) -> Result<Morphology> {
        self.guard_readonly()?;
        let existing = self.get_morphology(id)?;
        self.validate_morphology_write(&write, Some(id))?;
        let name = normalize(&write.name);
        let rules = normalize_rules(&write.rules);
        if existing.name == name
            && existing.description == normalize(&write.description)
            && existing.script_type == write.script_type
            && existing.rules == rules
            && existing.rules_corpus_id == write.rules_corpus_id
            && existing.lexicon_corpus_id == write.lexicon_corpus_id
            && existing.rich_upper == write.rich_upper
            && existing.rich_lower == write.rich_lower
            && existing.include_unknowns == write.include_unknowns
            && existing.extract_morphemes_from_rules_corpus
                == write.extract_morphemes_from_rules_corpus
        {
            return Err(OldbError::NotNew);
        }
        self.write_backup(
            "morphology_backup",
            existing.id,
            &existing.uuid,
            &serde_json::to_value(&existing)?,
            &format_datetime(&existing.datetime_modified),
        )?;
        let now = format_datetime(&crate::core::now());
        self.conn().execute(
            "UPDATE morphology SET name = ?1, description = ?2, script_type = ?3, rules = ?4,
             rules_corpus_id = ?5, lexicon_corpus_id = ?6, rich_upper = ?7, rich_lower = ?8,
             include_unknowns = ?9, extract_morphemes_from_rules_corpus = ?10,
             modifier_id = ?11, datetime_modified = ?12
             WHERE id = ?13",
            params![
                name,
                normalize(&write.description),
                write.script_type,
                rules,
                write.rules_corpus_id,
                write.lexicon_corpus_id,
                write.rich_upper,
                write.rich_lower,
                write.include_unknowns,
                write.extract_morphemes_from_rules_corpus,
                user.id,
                now,
                id,
            ],
        )?;
        info!(morphology_id = id, "morphology updated");
        self.get_morphology(id)
    }

    /// Delete a morphology: backup, drop the row, remove its directory.
    pub fn delete_morphology(&mut self, user: &User, id: Id) -> Result<Morphology> {
        self.guard_readonly()?;
        let existing = self.get_morphology(id)?;
        self.write_backup(
            "morphology_backup",
            existing.id,
            &existing.uuid,
            &serde_json::to_value(&existing)?,
            &format_datetime(&existing.datetime_modified),
        )?;
        self.conn().execute("DELETE FROM morphology WHERE id = ?1", params![id])?;
        self.tree().remove_resource_dir(ResourceKind::Morphology, id)?;
        info!(morphology_id = id, user_id = user.id, "morphology deleted");
        Ok(existing)
    }

    /// Fetch a morphology.
    pub fn get_morphology(&self, id: Id) -> Result<Morphology> {
        self.conn()
            .query_row(
                "SELECT * FROM morphology WHERE id = ?1",
                params![id],
                Morphology::from_row,
            )
            .optional()?
            .ok_or(OldbError::NotFound { kind: "morphology", id })
    }

    /// A morphology's history by id or UUID.
    pub fn morphology_history(&self, key: &HistoryKey) -> Result<History> {
        self.history_generic("morphology", "morphology_backup", key, |store, id| {
            Ok(Some(serde_json::to_value(store.get_morphology(id)?)?))
        })
    }

    // ------------------------------------------------------------------
    // Generation
    // ------------------------------------------------------------------

    /// Write a new generate-attempt nonce and return it.
    pub fn new_morphology_generate_attempt(&mut self, id: Id) -> Result<String> {
        let attempt = crate::core::new_attempt();
        self.conn().execute(
            "UPDATE morphology SET generate_attempt = ?1 WHERE id = ?2",
            params![attempt, id],
        )?;
        Ok(attempt)
    }

    /// Write a new compile-attempt nonce and return it.
    pub fn new_morphology_compile_attempt(&mut self, id: Id) -> Result<String> {
        let attempt = crate::core::new_attempt();
        self.conn().execute(
            "UPDATE morphology SET compile_attempt = ?1 WHERE id = ?2",
            params![attempt, id],
        )?;
        Ok(attempt)
    }

    /// Derive the morphology's script from its corpora and persist both
    /// the script and the extracted lexicon. Synchronous; runs on a
    /// worker thread.
    pub fn generate_morphology_now(&mut self, id: Id, user_id: Id) -> Result<Morphology> {
        let morphology = self.get_morphology(id)?;
        let outcome = self.derive_morphology_script(&morphology);
        let now = format_datetime(&crate::core::now());
        match outcome {
            Ok((rules, script, lexicon)) => {
                self.tree().ensure_resource_dir(ResourceKind::Morphology, id)?;
                let script_path =
                    self.tree().resource_file(ResourceKind::Morphology, id, ".script");
                fs::write(script_path, &script)?;
                let lexicon_path = self.morphology_lexicon_path(id);
                fs::write(&lexicon_path, bincode::serialize(&lexicon).map_err(io_like)?)?;
                self.conn().execute(
                    "UPDATE morphology SET rules_generated = ?1,
                     generate_message = 'Morphology script generated successfully.',
                     modifier_id = ?2, datetime_modified = ?3 WHERE id = ?4",
                    params![rules.join(" "), user_id, now, id],
                )?;
            }
            Err(error) => {
                warn!(morphology_id = id, error = %error, "morphology generation failed");
                self.conn().execute(
                    "UPDATE morphology SET generate_message = ?1, modifier_id = ?2,
                     datetime_modified = ?3 WHERE id = ?4",
                    params![format!("Error generating the morphology script. {}", error), user_id, now, id],
                )?;
            }
        }
        self.get_morphology(id)
    }

    /// Compile the generated script to a binary FST. Synchronous; runs
    /// on a worker thread.
    pub fn compile_morphology_now(
        &mut self,
        id: Id,
        user_id: Id,
        timeout: Duration,
    ) -> Result<Morphology> {
        let morphology = self.get_morphology(id)?;
        let dir = self.tree().ensure_resource_dir(ResourceKind::Morphology, id)?;
        let script_path = self.tree().resource_file(ResourceKind::Morphology, id, ".script");
        let binary_path = self.tree().resource_file(ResourceKind::Morphology, id, "");
        let foma_path = self.tree().resource_file(ResourceKind::Morphology, id, ".foma");

        let batch = if morphology.script_type == "lexc" {
            format!(
                "read lexc {script}\ndefine morphology;\nregex morphology;\nsave stack {binary}\nquit\n",
                script = script_path.display(),
                binary = binary_path.display(),
            )
        } else {
            format!(
                "source {script}\nregex morphology;\nsave stack {binary}\nquit\n",
                script = script_path.display(),
                binary = binary_path.display(),
            )
        };
        fs::write(&foma_path, &batch)?;

        let mut cmd = std::process::Command::new("foma");
        cmd.arg("-f").arg(&foma_path).current_dir(&dir);
        let output = toolkit::run_with_timeout(cmd, None, timeout)?;

        let now = format_datetime(&crate::core::now());
        let (succeeded, message, compiled_at) = if output.timed_out {
            (false, "Foma script compilation process timed out.".to_string(), None)
        } else if output.success && binary_path.is_file() {
            (true, "Compilation process terminated successfully.".to_string(), Some(now.clone()))
        } else {
            let tail = if output.stderr.trim().is_empty() {
                output.stdout.lines().rev().take(5).collect::<Vec<_>>().join("\n")
            } else {
                output.stderr_tail()
            };
            (false, format!("Compilation process failed: {}", tail), None)
        };
        self.conn().execute(
            "UPDATE morphology SET compile_succeeded = ?1, compile_message = ?2,
             datetime_compiled = ?3, modifier_id = ?4, datetime_modified = ?5
             WHERE id = ?6",
            params![succeeded, message, compiled_at, user_id, now, id],
        )?;
        info!(morphology_id = id, succeeded, "morphology compile finished");
        self.get_morphology(id)
    }

    /// The compiled binary's path; errors when not yet compiled.
    pub fn morphology_binary_path(&self, id: Id) -> Result<PathBuf> {
        let _ = self.get_morphology(id)?;
        let path = self.tree().resource_file(ResourceKind::Morphology, id, "");
        if path.is_file() {
            Ok(path)
        } else {
            Err(OldbError::NotCompiled { kind: "Morphology", id })
        }
    }

    /// The persisted lexicon artifact's path.
    pub fn morphology_lexicon_path(&self, id: Id) -> PathBuf {
        self.tree()
            .resource_dir(ResourceKind::Morphology, id)
            .join(format!("morphology_{}_lexicon.bin", id))
    }

    /// Load the lexicon persisted by the last generate run.
    pub fn load_morphology_lexicon(&self, id: Id) -> Result<Lexicon> {
        let path = self.morphology_lexicon_path(id);
        if !path.is_file() {
            return Err(OldbError::NotCompiled { kind: "Morphology", id });
        }
        bincode::deserialize(&fs::read(path)?).map_err(io_like)
    }

    /// Apply the compiled FST in the given direction over `inputs`,
    /// order preserved.
    pub fn morphology_apply(
        &self,
        id: Id,
        direction: ApplyDirection,
        inputs: &[String],
    ) -> Result<BTreeMap<String, Vec<String>>> {
        if !toolkit::foma_installed() {
            return Err(OldbError::ToolNotInstalled("Foma and flookup"));
        }
        let binary = self.morphology_binary_path(id)?;
        let inputs: Vec<String> = inputs.iter().map(|i| normalize(i)).collect();
        let groups = toolkit::flookup(
            &binary,
            &inputs,
            direction == ApplyDirection::Down,
            FLOOKUP_TIMEOUT,
        )?;
        Ok(inputs.into_iter().zip(groups).collect())
    }

    // ------------------------------------------------------------------
    // Script derivation
    // ------------------------------------------------------------------

    /// The rules in force, the script text, and the harvested lexicon.
    fn derive_morphology_script(
        &self,
        morphology: &Morphology,
    ) -> Result<(Vec<String>, String, Lexicon)> {
        let delims = self.app_settings()?.delimiters();
        let mut lexicon: Lexicon = Lexicon::new();
        if let Some(corpus_id) = morphology.lexicon_corpus_id {
            self.harvest_lexicon(corpus_id, &mut lexicon)?;
        }
        if morphology.extract_morphemes_from_rules_corpus {
            if let Some(corpus_id) = morphology.rules_corpus_id {
                self.harvest_lexicon(corpus_id, &mut lexicon)?;
            }
        }

        let mut rules: Vec<String> = Vec::new();
        let mut seen = BTreeSet::new();
        for rule in normalize_rules(&morphology.rules).split_whitespace() {
            if seen.insert(rule.to_string()) {
                rules.push(rule.to_string());
            }
        }
        if let Some(corpus_id) = morphology.rules_corpus_id {
            let corpus = self.get_corpus_raw(corpus_id)?;
            for form in self.corpus_forms_raw(&corpus)? {
                for sequence in
                    word_category_sequences_of(&form.break_gloss_category, &delims)
                {
                    if sequence.is_empty()
                        || (!morphology.include_unknowns
                            && sequence.contains(UNKNOWN_CATEGORY))
                    {
                        continue;
                    }
                    if seen.insert(sequence.clone()) {
                        rules.push(sequence);
                    }
                }
            }
        }
        if rules.is_empty() {
            return Err(OldbError::invalid(
                "rules",
                "No rules could be derived: supply rules or a rules corpus with analyzed forms.",
            ));
        }

        let script = match morphology.script_type.as_str() {
            "regex" => regex_script(morphology, &rules, &lexicon, &delims),
            _ => lexc_script(morphology, &rules, &lexicon, &delims),
        };
        Ok((rules, script, lexicon))
    }

    /// Collect single-morpheme forms of a corpus into the lexicon.
    fn harvest_lexicon(&self, corpus_id: Id, lexicon: &mut Lexicon) -> Result<()> {
        let delims = self.app_settings()?.delimiters();
        let corpus = self.get_corpus_raw(corpus_id)?;
        for form in self.corpus_forms_raw(&corpus)? {
            let shape = form.morpheme_break.trim();
            let gloss = form.morpheme_gloss.trim();
            if shape.is_empty()
                || gloss.is_empty()
                || shape.contains(char::is_whitespace)
                || shape.contains(|c| delims.contains(&c))
            {
                continue;
            }
            let category = match form.syntactic_category_id {
                Some(category_id) => self
                    .conn()
                    .query_row(
                        "SELECT name FROM syntactic_category WHERE id = ?1",
                        params![category_id],
                        |row| row.get(0),
                    )
                    .optional()?
                    .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string()),
                None => UNKNOWN_CATEGORY.to_string(),
            };
            lexicon
                .entry(category)
                .or_default()
                .insert((shape.to_string(), gloss.to_string()));
        }
        Ok(())
    }

    fn validate_morphology_write(
        &self,
        write: &MorphologyWrite,
        exclude: Option<Id>,
    ) -> Result<()> {
        let mut errors = std::collections::BTreeMap::new();
        if write.name.trim().is_empty() {
            errors.insert("name".to_string(), "Please enter a value".to_string());
        }
        if !crate::core::constants::MORPHOLOGY_SCRIPT_TYPES
            .contains(&write.script_type.as_str())
        {
            errors.insert(
                "script_type".to_string(),
                format!("Value must be one of: regex; lexc (not {})", write.script_type),
            );
        }
        if write.rules.trim().is_empty() && write.rules_corpus_id.is_none() {
            errors.insert(
                "rules".to_string(),
                "A value for either rules or rules_corpus must be specified.".to_string(),
            );
        }
        if write.lexicon_corpus_id.is_none() && !write.extract_morphemes_from_rules_corpus {
            errors.insert(
                "lexicon_corpus".to_string(),
                "A lexicon corpus is required unless morphemes are extracted from the rules corpus."
                    .to_string(),
            );
        }
        for (field, corpus_id) in [
            ("rules_corpus", write.rules_corpus_id),
            ("lexicon_corpus", write.lexicon_corpus_id),
        ] {
            if let Some(corpus_id) = corpus_id {
                if self.get_corpus_raw(corpus_id).is_err() {
                    errors.insert(
                        field.to_string(),
                        format!("There is no corpus with id {}.", corpus_id),
                    );
                }
            }
        }
        if !errors.is_empty() {
            return Err(OldbError::Validation { errors });
        }
        self.check_unique_name("morphology", &normalize(&write.name), exclude)?;
        Ok(())
    }
}

/// Apply direction through a compiled FST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyDirection {
    /// Surface to analysis.
    Up,
    /// Analysis to surface.
    Down,
}

impl ApplyDirection {
    /// Parse `up` / `down`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(ApplyDirection::Up),
            "down" => Some(ApplyDirection::Down),
            _ => None,
        }
    }
}

/// Collapse all whitespace runs in a rules string to single spaces.
fn normalize_rules(rules: &str) -> String {
    rules.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A morpheme's term on one side of the transduction.
fn side(shape: &str, gloss: &str, category: &str, rich: bool) -> String {
    if rich {
        format!("{shape}{RARE_DELIMITER}{gloss}{RARE_DELIMITER}{category}")
    } else {
        shape.to_string()
    }
}

/// A foma identifier for a category, e.g. `N` → `NCat`.
fn category_symbol(category: &str) -> String {
    let sanitized: String = category
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}Cat", sanitized)
}

/// Split a rule like `V-Agr` into categories and delimiters.
fn rule_parts(rule: &str, delims: &[char]) -> (Vec<String>, Vec<String>) {
    let analysis = analyze_word(rule, delims);
    (analysis.morphemes, analysis.delimiters)
}

/// Emit the regex-flavor script: one `define` per category, one
/// disjunct per rule.
fn regex_script(
    morphology: &Morphology,
    rules: &[String],
    lexicon: &Lexicon,
    delims: &[char],
) -> String {
    let mut script = String::new();
    script.push_str(&format!("# morphology {} (regex)\n\n", morphology.name));
    let mut defined = BTreeSet::new();
    for rule in rules {
        let (categories, _) = rule_parts(rule, delims);
        for category in categories {
            if !defined.insert(category.clone()) {
                continue;
            }
            let terms: Vec<String> = lexicon
                .get(&category)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|(shape, gloss)| {
                            let upper = side(shape, gloss, &category, morphology.rich_upper);
                            let lower = side(shape, gloss, &category, morphology.rich_lower);
                            if upper == lower {
                                format!("{{{upper}}}")
                            } else {
                                format!("[{{{upper}}}:{{{lower}}}]")
                            }
                        })
                        .collect()
                })
                .unwrap_or_default();
            if terms.is_empty() {
                if morphology.include_unknowns {
                    script.push_str(&format!("define {} [?+];\n", category_symbol(&category)));
                }
                continue;
            }
            script.push_str(&format!(
                "define {} [{}];\n",
                category_symbol(&category),
                terms.join(" | ")
            ));
        }
    }
    script.push('\n');
    let mut disjuncts = Vec::new();
    for rule in rules {
        let (categories, delimiters) = rule_parts(rule, delims);
        if !morphology.include_unknowns
            && categories.iter().any(|c| !lexicon.contains_key(c))
        {
            continue;
        }
        let mut parts = Vec::new();
        for (i, category) in categories.iter().enumerate() {
            if i > 0 {
                parts.push(format!("\"{}\"", delimiters[i - 1]));
            }
            parts.push(category_symbol(category));
        }
        disjuncts.push(format!("[{}]", parts.join(" ")));
    }
    script.push_str(&format!("define morphology {};\n", disjuncts.join(" |\n    ")));
    script
}

/// Emit the lexc-flavor script: a continuation-class chain per rule.
fn lexc_script(
    morphology: &Morphology,
    rules: &[String],
    lexicon: &Lexicon,
    delims: &[char],
) -> String {
    let mut script = String::new();
    script.push_str(&format!("! morphology {} (lexc)\n\n", morphology.name));
    let mut usable: Vec<(usize, Vec<String>, Vec<String>)> = Vec::new();
    for (r, rule) in rules.iter().enumerate() {
        let (categories, delimiters) = rule_parts(rule, delims);
        if !morphology.include_unknowns
            && categories.iter().any(|c| !lexicon.contains_key(c))
        {
            continue;
        }
        usable.push((r, categories, delimiters));
    }

    script.push_str("LEXICON Root\n");
    for (r, _, _) in &usable {
        script.push_str(&format!("R{}C0 ;\n", r));
    }
    script.push('\n');

    for (r, categories, delimiters) in &usable {
        for (i, category) in categories.iter().enumerate() {
            let next = if i + 1 < categories.len() {
                format!("R{}D{}", r, i)
            } else {
                "#".to_string()
            };
            script.push_str(&format!("LEXICON R{}C{}\n", r, i));
            match lexicon.get(category) {
                Some(entries) => {
                    for (shape, gloss) in entries {
                        let upper = side(shape, gloss, category, morphology.rich_upper);
                        let lower = side(shape, gloss, category, morphology.rich_lower);
                        if upper == lower {
                            script.push_str(&format!("{} {} ;\n", upper, next));
                        } else {
                            script.push_str(&format!("{}:{} {} ;\n", upper, lower, next));
                        }
                    }
                }
                None => {
                    // Unknown-category wildcard entry point.
                    script.push_str(&format!("?+ {} ;\n", next));
                }
            }
            script.push('\n');
            if i + 1 < categories.len() {
                script.push_str(&format!(
                    "LEXICON R{}D{}\n{} R{}C{} ;\n\n",
                    r,
                    i,
                    delimiters[i],
                    r,
                    i + 1
                ));
            }
        }
    }
    script
}

fn io_like(error: impl std::error::Error + Send + Sync + 'static) -> OldbError {
    OldbError::Io(std::io::Error::other(error))
}
