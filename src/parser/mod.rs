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

//! The parser orchestrator.
//!
//! A morphological parser composes its morphology with its phonology
//! into a single morphophonology FST (`morphology .o. phonology`), then
//! pairs it with a morpheme language model: apply-up proposes candidate
//! analyses of a surface transcription, the LM scores them, and the
//! maximum-scoring candidate is the parse. Parses are cached per
//! compile nonce; a component change detected by input fingerprinting
//! clears the cache (persisting the stranded entries to disk).

pub mod cache;

pub use cache::{CacheRegistry, CachedParse, ParseCache};

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::Xxh3;

use crate::core::constants::RARE_DELIMITER;
use crate::core::types::normalize;
use crate::core::{Id, OldbError, Result};
use crate::layout::ResourceKind;
use crate::model::{format_datetime, History, MorphologicalParser, User};
use crate::phonology::FLOOKUP_TIMEOUT;
use crate::store::{HistoryKey, Store};
use crate::toolkit;

/// The writable fields of a morphological parser.
#[derive(Debug, Clone, Default)]
pub struct ParserWrite {
    /// Unique name (required).
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// The phonology component.
    pub phonology_id: Id,
    /// The morphology component.
    pub morphology_id: Id,
    /// The scoring language model.
    pub language_model_id: Id,
}

/// The parser's persisted configuration: component identities and the
/// input fingerprint the current binary was built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// The phonology component.
    pub phonology_id: Id,
    /// The morphology component.
    pub morphology_id: Id,
    /// The scoring language model.
    pub language_model_id: Id,
    /// xxh3 of the component artifacts at generate time.
    pub fingerprint: u64,
}

impl Store {
    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    /// Create a morphological parser.
    pub fn create_parser(&mut self, user: &User, write: ParserWrite) -> Result<MorphologicalParser> {
        self.guard_readonly()?;
        self.validate_parser_write(&write, None)?;
        let now = format_datetime(&crate::core::now());
        let uuid = crate::core::new_uuid();
        self.conn().execute(
            "INSERT INTO morphological_parser
             (uuid, name, description, phonology_id, morphology_id, language_model_id,
              enterer_id, modifier_id, datetime_entered, datetime_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                uuid,
                normalize(&write.name),
                normalize(&write.description),
                write.phonology_id,
                write.morphology_id,
                write.language_model_id,
                user.id,
                user.id,
                now,
                now,
            ],
        )?;
        let id = self.conn().last_insert_rowid();
        self.tree()
            .ensure_resource_dir(ResourceKind::MorphologicalParser, id)?;
        info!(parser_id = id, "morphological parser created");
        self.get_parser(id)
    }

    /// Update a morphological parser.
    pub fn update_parser(
        &mut self,
        user: &User,
        id: Id,
        write: ParserWrite,
    ) -> Result<MorphologicalParser> {
        self.guard_readonly()?;
        let existing = self.get_parser(id)?;
        self.validate_parser_write(&write, Some(id))?;
        if existing.name == normalize(&write.name)
            && existing.description == normalize(&write.description)
            && existing.phonology_id == write.phonology_id
            && existing.morphology_id == write.morphology_id
            && existing.language_model_id == write.language_model_id
        {
            return Err(OldbError::NotNew);
        }
        self.write_backup(
            "morphological_parser_backup",
            existing.id,
            &existing.uuid,
            &serde_json::to_value(&existing)?,
            &format_datetime(&existing.datetime_modified),
        )?;
        let now = format_datetime(&crate::core::now());
        self.conn().execute(
            "UPDATE morphological_parser SET name = ?1, description = ?2, phonology_id = ?3,
             morphology_id = ?4, language_model_id = ?5, modifier_id = ?6,
             datetime_modified = ?7 WHERE id = ?8",
            params![
                normalize(&write.name),
                normalize(&write.description),
                write.phonology_id,
                write.morphology_id,
                write.language_model_id,
                user.id,
                now,
                id,
            ],
        )?;
        info!(parser_id = id, "morphological parser updated");
        self.get_parser(id)
    }

    /// Delete a morphological parser.
    pub fn delete_parser(&mut self, user: &User, id: Id) -> Result<MorphologicalParser> {
        self.guard_readonly()?;
        let existing = self.get_parser(id)?;
        self.write_backup(
            "morphological_parser_backup",
            existing.id,
            &existing.uuid,
            &serde_json::to_value(&existing)?,
            &format_datetime(&existing.datetime_modified),
        )?;
        self.conn()
            .execute("DELETE FROM morphological_parser WHERE id = ?1", params![id])?;
        self.tree()
            .remove_resource_dir(ResourceKind::MorphologicalParser, id)?;
        CacheRegistry::global().remove(id);
        info!(parser_id = id, user_id = user.id, "morphological parser deleted");
        Ok(existing)
    }

    /// Fetch a morphological parser.
    pub fn get_parser(&self, id: Id) -> Result<MorphologicalParser> {
        self.conn()
            .query_row(
                "SELECT * FROM morphological_parser WHERE id = ?1",
                params![id],
                MorphologicalParser::from_row,
            )
            .optional()?
            .ok_or(OldbError::NotFound { kind: "morphological parser", id })
    }

    /// A parser's history by id or UUID.
    pub fn parser_history(&self, key: &HistoryKey) -> Result<History> {
        self.history_generic(
            "morphological_parser",
            "morphological_parser_backup",
            key,
            |store, id| Ok(Some(serde_json::to_value(store.get_parser(id)?)?)),
        )
    }

    // ------------------------------------------------------------------
    // Generation and compilation
    // ------------------------------------------------------------------

    /// Write a new generate-attempt nonce and return it.
    pub fn new_parser_generate_attempt(&mut self, id: Id) -> Result<String> {
        let attempt = crate::core::new_attempt();
        self.conn().execute(
            "UPDATE morphological_parser SET generate_attempt = ?1 WHERE id = ?2",
            params![attempt, id],
        )?;
        Ok(attempt)
    }

    /// Write a new compile-attempt nonce and return it.
    pub fn new_parser_compile_attempt(&mut self, id: Id) -> Result<String> {
        let attempt = crate::core::new_attempt();
        self.conn().execute(
            "UPDATE morphological_parser SET compile_attempt = ?1 WHERE id = ?2",
            params![attempt, id],
        )?;
        Ok(attempt)
    }

    /// Emit the morphophonology composition script and the parser
    /// config. When the component fingerprint changed since the last
    /// generate, the parse cache is cleared (entries persisted).
    /// Synchronous; runs on a worker thread.
    pub fn generate_parser_now(
        &mut self,
        id: Id,
        user_id: Id,
        registry: &CacheRegistry,
    ) -> Result<MorphologicalParser> {
        let parser = self.get_parser(id)?;
        let outcome = self.write_parser_script(&parser);
        let now = format_datetime(&crate::core::now());
        match outcome {
            Ok(fingerprint) => {
                let previous = self.load_parser_config(id).ok().map(|c| c.fingerprint);
                if previous != Some(fingerprint) {
                    debug!(parser_id = id, "parser inputs changed; clearing parse cache");
                    registry
                        .for_parser(id)
                        .clear(Some(&self.parser_file(id, "cache.bin")))?;
                }
                let config = ParserConfig {
                    phonology_id: parser.phonology_id,
                    morphology_id: parser.morphology_id,
                    language_model_id: parser.language_model_id,
                    fingerprint,
                };
                let bytes = bincode::serialize(&config)
                    .map_err(|e| OldbError::Io(std::io::Error::other(e)))?;
                fs::write(self.parser_file(id, "config.bin"), bytes)?;
                self.conn().execute(
                    "UPDATE morphological_parser
                     SET generate_message = 'Morphophonology script generated successfully.',
                         modifier_id = ?1, datetime_modified = ?2 WHERE id = ?3",
                    params![user_id, now, id],
                )?;
            }
            Err(error) => {
                warn!(parser_id = id, error = %error, "parser generation failed");
                self.conn().execute(
                    "UPDATE morphological_parser SET generate_message = ?1,
                     modifier_id = ?2, datetime_modified = ?3 WHERE id = ?4",
                    params![
                        format!("Error generating the morphophonology script. {}", error),
                        user_id,
                        now,
                        id
                    ],
                )?;
            }
        }
        self.get_parser(id)
    }

    /// Compile the morphophonology script to the parser's binary FST.
    /// Synchronous; runs on a worker thread.
    pub fn compile_parser_now(
        &mut self,
        id: Id,
        user_id: Id,
        timeout: Duration,
    ) -> Result<MorphologicalParser> {
        let dir = self
            .tree()
            .ensure_resource_dir(ResourceKind::MorphologicalParser, id)?;
        let foma_path = self.tree().resource_file(ResourceKind::MorphologicalParser, id, ".foma");
        let binary_path = self.tree().resource_file(ResourceKind::MorphologicalParser, id, "");
        if !foma_path.is_file() {
            let now = format_datetime(&crate::core::now());
            self.conn().execute(
                "UPDATE morphological_parser SET compile_succeeded = 0,
                 compile_message = 'The morphophonology script must be generated before compilation.',
                 modifier_id = ?1, datetime_modified = ?2 WHERE id = ?3",
                params![user_id, now, id],
            )?;
            return self.get_parser(id);
        }

        let mut cmd = std::process::Command::new("foma");
        cmd.arg("-f").arg(&foma_path).current_dir(&dir);
        let output = toolkit::run_with_timeout(cmd, None, timeout)?;
        let now = format_datetime(&crate::core::now());
        let (succeeded, message) = if output.timed_out {
            (false, "Foma script compilation process timed out.".to_string())
        } else if output.success && binary_path.is_file() {
            (true, "Compilation process terminated successfully.".to_string())
        } else {
            let tail = if output.stderr.trim().is_empty() {
                output.stdout.lines().rev().take(5).collect::<Vec<_>>().join("\n")
            } else {
                output.stderr_tail()
            };
            (false, format!("Compilation process failed: {}", tail))
        };
        self.conn().execute(
            "UPDATE morphological_parser SET compile_succeeded = ?1, compile_message = ?2,
             modifier_id = ?3, datetime_modified = ?4 WHERE id = ?5",
            params![succeeded, message, user_id, now, id],
        )?;
        info!(parser_id = id, succeeded, "parser compile finished");
        self.get_parser(id)
    }

    /// The compiled morphophonology binary's path.
    pub fn parser_binary_path(&self, id: Id) -> Result<PathBuf> {
        let _ = self.get_parser(id)?;
        let path = self.tree().resource_file(ResourceKind::MorphologicalParser, id, "");
        if path.is_file() {
            Ok(path)
        } else {
            Err(OldbError::NotCompiled { kind: "MorphologicalParser", id })
        }
    }

    /// A file in the parser's directory.
    pub fn parser_file(&self, id: Id, name: &str) -> PathBuf {
        self.tree()
            .resource_dir(ResourceKind::MorphologicalParser, id)
            .join(name)
    }

    /// Apply the composed FST up (surface → analyses).
    pub fn parser_applyup(
        &self,
        id: Id,
        transcriptions: &[String],
    ) -> Result<BTreeMap<String, Vec<String>>> {
        self.parser_apply(id, transcriptions, false)
    }

    /// Apply the composed FST down (analysis → surfaces).
    pub fn parser_applydown(
        &self,
        id: Id,
        morpheme_sequences: &[String],
    ) -> Result<BTreeMap<String, Vec<String>>> {
        self.parser_apply(id, morpheme_sequences, true)
    }

    fn parser_apply(
        &self,
        id: Id,
        inputs: &[String],
        invert: bool,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        if !toolkit::foma_installed() {
            return Err(OldbError::ToolNotInstalled("Foma and flookup"));
        }
        let binary = self.parser_binary_path(id)?;
        let inputs: Vec<String> = inputs.iter().map(|i| normalize(i)).collect();
        let groups = toolkit::flookup(&binary, &inputs, invert, FLOOKUP_TIMEOUT)?;
        Ok(inputs.into_iter().zip(groups).collect())
    }

    /// Parse transcriptions: look up the cache, apply up on the misses,
    /// score every candidate with the LM, and cache the ranked outcome.
    pub fn parse_transcriptions(
        &self,
        id: Id,
        transcriptions: &[String],
        registry: &CacheRegistry,
    ) -> Result<BTreeMap<String, CachedParse>> {
        let parser = self.get_parser(id)?;
        let cache = registry.for_parser(id);
        cache.load_from(&self.parser_file(id, "cache.bin"))?;

        let inputs: Vec<String> = transcriptions.iter().map(|t| normalize(t)).collect();
        let mut results: BTreeMap<String, CachedParse> = BTreeMap::new();
        let mut misses: Vec<String> = Vec::new();
        for input in &inputs {
            match cache.get(&parser.compile_attempt, input) {
                Some(hit) => {
                    results.insert(input.clone(), hit);
                }
                None => misses.push(input.clone()),
            }
        }

        if !misses.is_empty() {
            let candidate_map = self.parser_applyup(id, &misses)?;
            for input in &misses {
                let candidates = candidate_map.get(input).cloned().unwrap_or_default();
                let scored = self.rank_candidates(&parser, &candidates)?;
                let parse = CachedParse {
                    parse: scored.first().map(|(c, _)| c.clone()),
                    candidates: scored,
                };
                cache.put(&parser.compile_attempt, input, parse.clone());
                results.insert(input.clone(), parse);
            }
            debug!(parser_id = id, misses = misses.len(), "parses computed");
        }
        Ok(results)
    }

    /// Score candidates with the LM and sort best-first (ties broken
    /// deterministically by candidate text).
    fn rank_candidates(
        &self,
        parser: &MorphologicalParser,
        candidates: &[String],
    ) -> Result<Vec<(String, f64)>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let scores = self.lm_get_probabilities(parser.language_model_id, candidates)?;
        let mut scored: Vec<(String, f64)> = candidates
            .iter()
            .map(|c| (c.clone(), scores.get(c).copied().unwrap_or(f64::NEG_INFINITY)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(scored)
    }

    /// Bundle the parser for offline use: config, cache, scripts,
    /// binaries and the LM artifacts, zipped into `archive.zip` in the
    /// parser's directory.
    pub fn export_parser(&self, id: Id, registry: &CacheRegistry) -> Result<PathBuf> {
        let parser = self.get_parser(id)?;
        let dir = self
            .tree()
            .ensure_resource_dir(ResourceKind::MorphologicalParser, id)?;

        // Refresh the cache artifact from the live cache.
        let cache = registry.for_parser(id);
        let snapshot = cache.export();
        let bytes = bincode::serialize(&snapshot)
            .map_err(|e| OldbError::Io(std::io::Error::other(e)))?;
        fs::write(self.parser_file(id, "cache.bin"), bytes)?;

        // Pull in the LM artifacts so the archive is self-contained.
        for name in ["arpa.txt", "trie.bin"] {
            let source = self.lm_file(parser.language_model_id, name);
            if source.is_file() {
                fs::copy(&source, dir.join(name))?;
            }
        }
        fs::write(
            dir.join("README"),
            format!(
                "Morphological parser {} export.\n\n\
                 Contents: the compiled morphophonology FST (morphological_parser_{}),\n\
                 its foma script, the parser config and parse cache (bincode), and the\n\
                 language model's ARPA and trie files.\n\n\
                 With foma and MITLM installed, apply the FST with:\n\
                 flookup morphological_parser_{} < words.txt\n",
                parser.name, id, id
            ),
        )?;

        let zip_path = dir.join("archive.zip");
        let zip_file = fs::File::create(&zip_path)?;
        let mut zip = zip::ZipWriter::new(zip_file);
        let options = zip::write::SimpleFileOptions::default();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if matches!(extension, "zip" | "log" | "sh") {
                continue;
            }
            zip.start_file(name, options)
                .map_err(|e| OldbError::Io(std::io::Error::other(e)))?;
            zip.write_all(&fs::read(&path)?)?;
        }
        zip.finish()
            .map_err(|e| OldbError::Io(std::io::Error::other(e)))?;
        info!(parser_id = id, "parser exported");
        Ok(zip_path)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Load the persisted parser config.
    pub fn load_parser_config(&self, id: Id) -> Result<ParserConfig> {
        let path = self.parser_file(id, "config.bin");
        if !path.is_file() {
            return Err(OldbError::NotCompiled { kind: "MorphologicalParser", id });
        }
        bincode::deserialize(&fs::read(path)?)
            .map_err(|e| OldbError::Io(std::io::Error::other(e)))
    }

    /// Write the composition script and return the component
    /// fingerprint.
    fn write_parser_script(&self, parser: &MorphologicalParser) -> Result<u64> {
        let phonology_binary = self.phonology_binary_path(parser.phonology_id)?;
        let morphology_binary = self.morphology_binary_path(parser.morphology_id)?;
        self.tree()
            .ensure_resource_dir(ResourceKind::MorphologicalParser, parser.id)?;
        let binary_path =
            self.tree()
                .resource_file(ResourceKind::MorphologicalParser, parser.id, "");
        let script = format!(
            "load stack {morphology}\ndefine morphology;\n\
             load stack {phonology}\ndefine phonology;\n\
             regex [morphology .o. phonology];\n\
             save stack {binary}\nquit\n",
            morphology = morphology_binary.display(),
            phonology = phonology_binary.display(),
            binary = binary_path.display(),
        );
        let script_path =
            self.tree()
                .resource_file(ResourceKind::MorphologicalParser, parser.id, ".script");
        let foma_path =
            self.tree()
                .resource_file(ResourceKind::MorphologicalParser, parser.id, ".foma");
        fs::write(&script_path, &script)?;
        fs::write(&foma_path, &script)?;

        let mut hasher = Xxh3::new();
        hasher.update(&fs::read(&phonology_binary)?);
        hasher.update(&fs::read(&morphology_binary)?);
        let trie = self.lm_file(parser.language_model_id, "trie.bin");
        if trie.is_file() {
            hasher.update(&fs::read(&trie)?);
        }
        Ok(hasher.digest())
    }

    fn validate_parser_write(&self, write: &ParserWrite, exclude: Option<Id>) -> Result<()> {
        let mut errors = std::collections::BTreeMap::new();
        if write.name.trim().is_empty() {
            errors.insert("name".to_string(), "Please enter a value".to_string());
        }
        if self.get_phonology(write.phonology_id).is_err() {
            errors.insert(
                "phonology".to_string(),
                format!("There is no phonology with id {}.", write.phonology_id),
            );
        }
        if self.get_morphology(write.morphology_id).is_err() {
            errors.insert(
                "morphology".to_string(),
                format!("There is no morphology with id {}.", write.morphology_id),
            );
        }
        match self.get_lm(write.language_model_id) {
            Err(_) => {
                errors.insert(
                    "language_model".to_string(),
                    format!(
                        "There is no morpheme language model with id {}.",
                        write.language_model_id
                    ),
                );
            }
            Ok(lm) => {
                // A non-categorial LM must tokenize morphemes exactly
                // the way the morphology writes them.
                if !lm.categorial && lm.rare_delimiter != RARE_DELIMITER.to_string() {
                    errors.insert(
                        "language_model".to_string(),
                        "The parser's non-categorial LM must use the same rare delimiter as its morphology."
                            .to_string(),
                    );
                }
            }
        }
        if !errors.is_empty() {
            return Err(OldbError::Validation { errors });
        }
        self.check_unique_name("morphological_parser", &normalize(&write.name), exclude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use crate::model::{CorpusWrite, FormWrite, Translation};
    use crate::store::testing::test_store;

    fn fixture(store: &mut Store) -> (User, ParserWrite) {
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let form = store
            .create_form(
                &user,
                FormWrite {
                    transcription: "chiens".to_string(),
                    morpheme_break: "chien-s".to_string(),
                    morpheme_gloss: "dog-PL".to_string(),
                    translations: vec![Translation {
                        id: 0,
                        transcription: "dogs".to_string(),
                        grammaticality: String::new(),
                    }],
                    ..Default::default()
                },
            )
            .unwrap();
        let corpus = store
            .create_corpus(
                &user,
                CorpusWrite {
                    name: "c".to_string(),
                    content: form.id.to_string(),
                    ..Default::default()
                },
            )
            .unwrap();
        let phonology = store
            .create_phonology(
                &user,
                crate::phonology::PhonologyWrite {
                    name: "p".to_string(),
                    description: String::new(),
                    script: "define phonology a -> a;\n".to_string(),
                },
            )
            .unwrap();
        let morphology = store
            .create_morphology(
                &user,
                crate::morphology::MorphologyWrite {
                    name: "m".to_string(),
                    rules: "N".to_string(),
                    lexicon_corpus_id: Some(corpus.id),
                    ..Default::default()
                },
            )
            .unwrap();
        let lm = store
            .create_lm(
                &user,
                crate::lm::LmWrite {
                    name: "lm".to_string(),
                    corpus_id: corpus.id,
                    ..Default::default()
                },
            )
            .unwrap();
        (
            user.clone(),
            ParserWrite {
                name: "parser".to_string(),
                description: String::new(),
                phonology_id: phonology.id,
                morphology_id: morphology.id,
                language_model_id: lm.id,
            },
        )
    }

    #[test]
    fn test_create_validates_components() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let err = store
            .create_parser(
                &user,
                ParserWrite {
                    name: "p".to_string(),
                    phonology_id: 1,
                    morphology_id: 1,
                    language_model_id: 1,
                    ..Default::default()
                },
            )
            .unwrap_err();
        match err {
            OldbError::Validation { errors } => {
                assert!(errors.contains_key("phonology"));
                assert!(errors.contains_key("morphology"));
                assert!(errors.contains_key("language_model"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_create_update_history() {
        let (_tmp, mut store) = test_store();
        let (user, write) = fixture(&mut store);
        let parser = store.create_parser(&user, write.clone()).unwrap();

        let err = store.update_parser(&user, parser.id, write.clone()).unwrap_err();
        assert!(matches!(err, OldbError::NotNew));

        let mut renamed = write;
        renamed.name = "parser2".to_string();
        store.update_parser(&user, parser.id, renamed).unwrap();
        let history = store
            .parser_history(&HistoryKey::Uuid(parser.uuid.clone()))
            .unwrap();
        assert_eq!(history.previous_versions.len(), 1);
        assert_eq!(history.previous_versions[0].snapshot["name"], "parser");
    }

    #[test]
    fn test_generate_requires_compiled_components() {
        let (_tmp, mut store) = test_store();
        let (user, write) = fixture(&mut store);
        let parser = store.create_parser(&user, write).unwrap();
        let registry = CacheRegistry::new();
        let generated = store
            .generate_parser_now(parser.id, user.id, &registry)
            .unwrap();
        assert!(generated
            .generate_message
            .starts_with("Error generating the morphophonology script."));
        assert!(generated.generate_message.contains("has not been compiled yet"));
    }

    #[test]
    fn test_parse_uses_cache_without_binary() {
        // A cache hit must answer without touching foma: seed the cache
        // and parse with no compiled artifacts at all.
        let (_tmp, mut store) = test_store();
        let (user, write) = fixture(&mut store);
        let parser = store.create_parser(&user, write).unwrap();
        let registry = CacheRegistry::new();
        let cached = CachedParse {
            parse: Some("chien\u{2980}dog\u{2980}N-s\u{2980}PL\u{2980}Num".to_string()),
            candidates: vec![(
                "chien\u{2980}dog\u{2980}N-s\u{2980}PL\u{2980}Num".to_string(),
                -1.5,
            )],
        };
        registry
            .for_parser(parser.id)
            .put(&parser.compile_attempt, "chiens", cached.clone());

        let results = store
            .parse_transcriptions(parser.id, &["chiens".to_string()], &registry)
            .unwrap();
        assert_eq!(results["chiens"], cached);
    }

    #[test]
    fn test_parse_miss_without_binary_errors() {
        let (_tmp, mut store) = test_store();
        let (user, write) = fixture(&mut store);
        let parser = store.create_parser(&user, write).unwrap();
        let registry = CacheRegistry::new();
        let err = store
            .parse_transcriptions(parser.id, &["chiens".to_string()], &registry)
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_nonce_supersedes_previous_cache_entries() {
        let (_tmp, mut store) = test_store();
        let (user, write) = fixture(&mut store);
        let parser = store.create_parser(&user, write).unwrap();
        let registry = CacheRegistry::new();
        let cached = CachedParse { parse: Some("x".to_string()), candidates: vec![] };
        registry
            .for_parser(parser.id)
            .put(&parser.compile_attempt, "chiens", cached);

        // A second build supersedes the first: new nonce, old entries
        // unreachable.
        let first = store.new_parser_compile_attempt(parser.id).unwrap();
        let second = store.new_parser_compile_attempt(parser.id).unwrap();
        assert_ne!(first, second);
        let current = store.get_parser(parser.id).unwrap();
        assert_eq!(current.compile_attempt, second);
        assert!(registry
            .for_parser(parser.id)
            .get(&current.compile_attempt, "chiens")
            .is_none());
    }

    #[test]
    fn test_export_without_binary_still_bundles_config() {
        let (_tmp, mut store) = test_store();
        let (user, write) = fixture(&mut store);
        let parser = store.create_parser(&user, write).unwrap();
        let registry = CacheRegistry::new();
        registry.for_parser(parser.id).put(
            "a",
            "chiens",
            CachedParse { parse: None, candidates: vec![] },
        );
        let zip_path = store.export_parser(parser.id, &registry).unwrap();
        assert!(zip_path.is_file());
        let file = std::fs::File::open(&zip_path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"cache.bin".to_string()));
        assert!(names.contains(&"README".to_string()));
        assert!(!names.iter().any(|n| n.ends_with(".zip")));
    }
}
