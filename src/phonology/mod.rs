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

//! The phonology compiler.
//!
//! A phonology is a user-edited foma script that must `define
//! phonology`, optionally carrying `#test underlying -> surface` lines.
//! The script is persisted NFD-decomposed (combining characters
//! separated from their bases, so foma sees the same code points
//! contributors type in any input method), compiled in the background
//! into a binary FST, and applied down over word-boundary-wrapped
//! inputs with `flookup`.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::{info, warn};

use crate::core::constants::WORD_BOUNDARY_SYMBOL;
use crate::core::types::normalize;
use crate::core::{Id, OldbError, Result};
use crate::layout::ResourceKind;
use crate::model::{format_datetime, History, Phonology, User};
use crate::store::{HistoryKey, Store};
use crate::toolkit;

/// How long a single `flookup` application may run.
pub(crate) const FLOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

/// The writable fields of a phonology.
#[derive(Debug, Clone, Default)]
pub struct PhonologyWrite {
    /// Unique name (required).
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// The foma script.
    pub script: String,
}

/// Outcome of one `#test` line: what the script promised and what the
/// compiled FST produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestComparison {
    /// Expected surface forms.
    pub expected: Vec<String>,
    /// Actual apply-down outputs.
    pub actual: Vec<String>,
}

/// Parse the `#test <underlying> -> <surface>, <surface>…` lines of a
/// script.
pub fn parse_tests(script: &str) -> Vec<(String, Vec<String>)> {
    let re = Regex::new(r"^#test\s+(.+?)\s*->\s*(.+)$").expect("static pattern");
    script
        .lines()
        .filter_map(|line| {
            let captures = re.captures(line.trim())?;
            let underlying = captures[1].to_string();
            let surfaces: Vec<String> = captures[2]
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            Some((underlying, surfaces))
        })
        .collect()
}

impl Store {
    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    /// Create a phonology and write its script artifact.
    pub fn create_phonology(&mut self, user: &User, write: PhonologyWrite) -> Result<Phonology> {
        self.guard_readonly()?;
        self.validate_phonology_write(&write, None)?;
        let now = format_datetime(&crate::core::now());
        let uuid = crate::core::new_uuid();
        self.conn().execute(
            "INSERT INTO phonology
             (uuid, name, description, script, enterer_id, modifier_id,
              datetime_entered, datetime_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                uuid,
                normalize(&write.name),
                normalize(&write.description),
                clean_script(&write.script),
                user.id,
                user.id,
                now,
                now,
            ],
        )?;
        let id = self.conn().last_insert_rowid();
        self.save_phonology_script(id)?;
        info!(phonology_id = id, "phonology created");
        self.get_phonology(id)
    }

    /// Update a phonology; identical submissions are rejected, accepted
    /// ones are backed up and the script artifact rewritten.
    pub fn update_phonology(
        &mut self,
        user: &User,
        id: Id,
        write: PhonologyWrite,
    ) -> Result<Phonology> {
        self.guard_readonly()?;
        let existing = self.get_phonology(id)?;
        self.validate_phonology_write(&write, Some(id))?;
        let name = normalize(&write.name);
        let description = normalize(&write.description);
        let script = clean_script(&write.script);
        if existing.name == name
            && existing.description == description
            && existing.script == script
        {
            return Err(OldbError::NotNew);
        }
        self.write_backup(
            "phonology_backup",
            existing.id,
            &existing.uuid,
            &serde_json::to_value(&existing)?,
            &format_datetime(&existing.datetime_modified),
        )?;
        let now = format_datetime(&crate::core::now());
        self.conn().execute(
            "UPDATE phonology SET name = ?1, description = ?2, script = ?3,
             modifier_id = ?4, datetime_modified = ?5 WHERE id = ?6",
            params![name, description, script, user.id, now, id],
        )?;
        self.save_phonology_script(id)?;
        info!(phonology_id = id, "phonology updated");
        self.get_phonology(id)
    }

    /// Delete a phonology: backup, drop the row, remove its directory.
    pub fn delete_phonology(&mut self, user: &User, id: Id) -> Result<Phonology> {
        self.guard_readonly()?;
        let existing = self.get_phonology(id)?;
        self.write_backup(
            "phonology_backup",
            existing.id,
            &existing.uuid,
            &serde_json::to_value(&existing)?,
            &format_datetime(&existing.datetime_modified),
        )?;
        self.conn().execute("DELETE FROM phonology WHERE id = ?1", params![id])?;
        self.tree().remove_resource_dir(ResourceKind::Phonology, id)?;
        info!(phonology_id = id, user_id = user.id, "phonology deleted");
        Ok(existing)
    }

    /// Fetch a phonology.
    pub fn get_phonology(&self, id: Id) -> Result<Phonology> {
        self.conn()
            .query_row(
                "SELECT * FROM phonology WHERE id = ?1",
                params![id],
                Phonology::from_row,
            )
            .optional()?
            .ok_or(OldbError::NotFound { kind: "phonology", id })
    }

    /// A phonology's history by id or UUID.
    pub fn phonology_history(&self, key: &HistoryKey) -> Result<History> {
        self.history_generic("phonology", "phonology_backup", key, |store, id| {
            Ok(Some(serde_json::to_value(store.get_phonology(id)?)?))
        })
    }

    // ------------------------------------------------------------------
    // Compilation and application
    // ------------------------------------------------------------------

    /// Write a new compile-attempt nonce and return it. Called by the
    /// request path immediately before enqueueing the compile job, so a
    /// client can correlate its poll with its own request.
    pub fn new_phonology_compile_attempt(&mut self, id: Id) -> Result<String> {
        let attempt = crate::core::new_attempt();
        self.conn().execute(
            "UPDATE phonology SET compile_attempt = ?1 WHERE id = ?2",
            params![attempt, id],
        )?;
        Ok(attempt)
    }

    /// Compile the phonology's script to a binary FST, synchronously.
    /// Runs on a worker thread; the outcome lands in the status fields,
    /// never in an error.
    pub fn compile_phonology_now(
        &mut self,
        id: Id,
        user_id: Id,
        timeout: Duration,
    ) -> Result<Phonology> {
        self.get_phonology(id)?;
        self.save_phonology_script(id)?;
        let dir = self.tree().ensure_resource_dir(ResourceKind::Phonology, id)?;
        let script_path = self.tree().resource_file(ResourceKind::Phonology, id, ".script");
        let binary_path = self.tree().resource_file(ResourceKind::Phonology, id, "");
        let foma_path = self.tree().resource_file(ResourceKind::Phonology, id, ".foma");
        let sh_path = self.tree().resource_file(ResourceKind::Phonology, id, ".sh");

        let batch = format!(
            "source {script}\nregex phonology;\nsave stack {binary}\nquit\n",
            script = script_path.display(),
            binary = binary_path.display(),
        );
        fs::write(&foma_path, &batch)?;
        fs::write(&sh_path, format!("#!/bin/sh\nfoma -f {}\n", foma_path.display()))?;

        let mut cmd = std::process::Command::new("foma");
        cmd.arg("-f").arg(&foma_path).current_dir(&dir);
        let output = toolkit::run_with_timeout(cmd, None, timeout)?;

        let now = format_datetime(&crate::core::now());
        let (succeeded, message, compiled_at) = if output.timed_out {
            (false, "Foma script compilation process timed out.".to_string(), None)
        } else if output.success
            && output.stdout.contains("defined phonology")
            && binary_path.is_file()
        {
            (true, "Compilation process terminated successfully.".to_string(), Some(now.clone()))
        } else {
            let tail = if output.stderr.trim().is_empty() {
                output.stdout.lines().rev().take(5).collect::<Vec<_>>().join("\n")
            } else {
                output.stderr_tail()
            };
            (false, format!("Compilation process failed: {}", tail), None)
        };
        if !succeeded {
            warn!(phonology_id = id, message = %message, "phonology compile failed");
        }

        self.conn().execute(
            "UPDATE phonology SET compile_succeeded = ?1, compile_message = ?2,
             datetime_compiled = ?3, modifier_id = ?4, datetime_modified = ?5
             WHERE id = ?6",
            params![succeeded, message, compiled_at, user_id, now, id],
        )?;
        info!(phonology_id = id, succeeded, "phonology compile finished");
        self.get_phonology(id)
    }

    /// The compiled binary's path, for serving; errors when the
    /// phonology has not been compiled yet.
    pub fn phonology_binary_path(&self, id: Id) -> Result<PathBuf> {
        let _ = self.get_phonology(id)?;
        let path = self.tree().resource_file(ResourceKind::Phonology, id, "");
        if path.is_file() {
            Ok(path)
        } else {
            Err(OldbError::NotCompiled { kind: "Phonology", id })
        }
    }

    /// Phonologize: apply the compiled FST down over each transcription,
    /// preserving input order. Inputs are wrapped in the word boundary
    /// symbol before lookup and outputs unwrapped after.
    pub fn phonology_applydown(
        &self,
        id: Id,
        transcriptions: &[String],
    ) -> Result<BTreeMap<String, Vec<String>>> {
        if !toolkit::foma_installed() {
            return Err(OldbError::ToolNotInstalled("Foma and flookup"));
        }
        let binary = self.phonology_binary_path(id)?;
        let inputs: Vec<String> = transcriptions.iter().map(|t| normalize(t)).collect();
        let wrapped: Vec<String> = inputs
            .iter()
            .map(|t| format!("{WORD_BOUNDARY_SYMBOL}{t}{WORD_BOUNDARY_SYMBOL}"))
            .collect();
        let groups = toolkit::flookup(&binary, &wrapped, true, FLOOKUP_TIMEOUT)?;
        let mut results = BTreeMap::new();
        for (input, group) in inputs.into_iter().zip(groups) {
            let outputs: Vec<String> = group
                .into_iter()
                .map(|o| o.trim_matches(|c: char| WORD_BOUNDARY_SYMBOL.contains(c)).to_string())
                .collect();
            results.insert(input, outputs);
        }
        Ok(results)
    }

    /// Run the script's `#test` lines against the compiled FST and
    /// report expected vs. actual surface sets for each.
    pub fn run_phonology_tests(&self, id: Id) -> Result<BTreeMap<String, TestComparison>> {
        let phonology = self.get_phonology(id)?;
        let tests = parse_tests(&phonology.script);
        if tests.is_empty() {
            return Err(OldbError::NoTests(id));
        }
        let inputs: Vec<String> = tests.iter().map(|(u, _)| u.clone()).collect();
        let actual = self.phonology_applydown(id, &inputs)?;
        let mut results = BTreeMap::new();
        for (underlying, expected) in tests {
            let normalized = normalize(&underlying);
            let actual_outputs = actual.get(&normalized).cloned().unwrap_or_default();
            results.insert(
                underlying,
                TestComparison { expected, actual: actual_outputs },
            );
        }
        Ok(results)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn validate_phonology_write(&self, write: &PhonologyWrite, exclude: Option<Id>) -> Result<()> {
        if write.name.trim().is_empty() {
            return Err(OldbError::invalid("name", "Please enter a value"));
        }
        self.check_unique_name("phonology", &normalize(&write.name), exclude)?;
        Ok(())
    }

    /// Write the stored script into the phonology's directory.
    fn save_phonology_script(&self, id: Id) -> Result<()> {
        let script: String = self.conn().query_row(
            "SELECT script FROM phonology WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        self.tree().ensure_resource_dir(ResourceKind::Phonology, id)?;
        let path = self.tree().resource_file(ResourceKind::Phonology, id, ".script");
        fs::write(path, script)?;
        Ok(())
    }
}

/// Normalize a script for storage: NFD (separating combining characters
/// from their bases) with carriage returns dropped.
fn clean_script(script: &str) -> String {
    normalize(script).replace('\r', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use crate::store::testing::test_store;

    const SCRIPT: &str = "define phonology a -> b || _ ;\n#test aaa -> bbb\n";

    fn create(store: &mut Store, user: &User, name: &str, script: &str) -> Phonology {
        store
            .create_phonology(
                user,
                PhonologyWrite {
                    name: name.to_string(),
                    description: String::new(),
                    script: script.to_string(),
                },
            )
            .unwrap()
    }

    #[test]
    fn test_parse_tests() {
        let tests = parse_tests("define phonology a -> b;\n#test aaa -> bbb\n#test ab -> ab, ba\n");
        assert_eq!(
            tests,
            vec![
                ("aaa".to_string(), vec!["bbb".to_string()]),
                ("ab".to_string(), vec!["ab".to_string(), "ba".to_string()]),
            ]
        );
        assert!(parse_tests("define phonology a -> b;").is_empty());
    }

    #[test]
    fn test_script_is_decomposed_on_save() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let phonology = create(&mut store, &user, "p", "define phonology \u{00e9} -> e;\r\n");
        // Precomposed é is stored as e + combining acute, CRs dropped.
        assert_eq!(phonology.script, "define phonology e\u{0301} -> e;\n");

        let script_path = store
            .tree()
            .resource_file(ResourceKind::Phonology, phonology.id, ".script");
        assert_eq!(std::fs::read_to_string(script_path).unwrap(), phonology.script);
    }

    #[test]
    fn test_vacuous_update_and_backup() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let phonology = create(&mut store, &user, "p", SCRIPT);

        let err = store
            .update_phonology(
                &user,
                phonology.id,
                PhonologyWrite {
                    name: "p".to_string(),
                    description: String::new(),
                    script: SCRIPT.to_string(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, OldbError::NotNew));

        store
            .update_phonology(
                &user,
                phonology.id,
                PhonologyWrite {
                    name: "p".to_string(),
                    description: String::new(),
                    script: "define phonology b -> a;\n".to_string(),
                },
            )
            .unwrap();
        let history = store
            .phonology_history(&HistoryKey::Id(phonology.id))
            .unwrap();
        assert_eq!(history.previous_versions.len(), 1);
        assert!(history.resource.is_some());
    }

    #[test]
    fn test_applydown_requires_compilation() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let phonology = create(&mut store, &user, "p", SCRIPT);
        let err = store.phonology_binary_path(phonology.id).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Phonology {} has not been compiled yet.", phonology.id)
        );
    }

    #[test]
    fn test_runtests_requires_tests() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let phonology = create(&mut store, &user, "p", "define phonology a -> b;\n");
        let err = store.run_phonology_tests(phonology.id).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("The script of phonology {} contains no tests.", phonology.id)
        );
    }

    #[test]
    fn test_attempt_nonce_changes_per_request() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let phonology = create(&mut store, &user, "p", SCRIPT);
        let first = store.new_phonology_compile_attempt(phonology.id).unwrap();
        let second = store.new_phonology_compile_attempt(phonology.id).unwrap();
        assert_ne!(first, second);
        assert_eq!(
            store.get_phonology(phonology.id).unwrap().compile_attempt,
            second
        );
    }

    // Exercised only where foma is actually installed; the compile
    // pipeline itself is what the worker runs.
    #[test]
    fn test_compile_and_applydown_with_foma() {
        if !toolkit::foma_installed() {
            return;
        }
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let phonology = create(
            &mut store,
            &user,
            "p",
            "define phonology a -> b;\n#test aaa -> bbb\n",
        );
        let compiled = store
            .compile_phonology_now(phonology.id, user.id, Duration::from_secs(30))
            .unwrap();
        assert!(compiled.compile_succeeded, "{}", compiled.compile_message);
        assert_eq!(compiled.compile_message, "Compilation process terminated successfully.");

        let results = store
            .phonology_applydown(phonology.id, &["aaa".to_string()])
            .unwrap();
        assert_eq!(results["aaa"], vec!["bbb".to_string()]);

        let tests = store.run_phonology_tests(phonology.id).unwrap();
        assert_eq!(tests["aaa"].expected, vec!["bbb".to_string()]);
        assert_eq!(tests["aaa"].actual, vec!["bbb".to_string()]);
    }
}
