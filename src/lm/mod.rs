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

//! The morpheme language model builder.
//!
//! Generation is a four-stage pipeline, each stage writing one file in
//! the LM's directory: the training corpus (one line of
//! space-separated tokens per form, bracketed by `<s>`/`</s>`), the
//! vocabulary, the ARPA file estimated by the external toolkit, and the
//! serialized [`NgramTrie`]. Generation counts as successful iff the
//! trie file's modification time actually changed; otherwise the first
//! failing stage's message is recorded.

pub mod trie;

pub use trie::NgramTrie;

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use rand::seq::SliceRandom;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info, warn};

use crate::core::constants::{lm_toolkit, LM_END, LM_ORDER_RANGE, LM_START, RARE_DELIMITER};
use crate::core::types::normalize;
use crate::core::{Id, OldbError, Result};
use crate::forms::analyze_word;
use crate::layout::ResourceKind;
use crate::model::{format_datetime, History, MorphemeLanguageModel, User};
use crate::store::{HistoryKey, Store};
use crate::toolkit;

/// The writable fields of a morpheme language model.
#[derive(Debug, Clone)]
pub struct LmWrite {
    /// Unique name (required).
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Training corpus (required).
    pub corpus_id: Id,
    /// Morphology whose lexicon bounds the vocabulary.
    pub vocabulary_morphology_id: Option<Id>,
    /// Toolkit registry name.
    pub toolkit: String,
    /// N-gram order, 2–5.
    pub order: i64,
    /// Toolkit-specific smoothing algorithm.
    pub smoothing: String,
    /// Train on category sequences instead of morpheme tokens.
    pub categorial: bool,
}

impl Default for LmWrite {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            corpus_id: 0,
            vocabulary_morphology_id: None,
            toolkit: "mitlm".to_string(),
            order: 3,
            smoothing: "ModKN".to_string(),
            categorial: false,
        }
    }
}

impl Store {
    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    /// Create a morpheme language model.
    pub fn create_lm(&mut self, user: &User, write: LmWrite) -> Result<MorphemeLanguageModel> {
        self.guard_readonly()?;
        self.validate_lm_write(&write, None)?;
        let now = format_datetime(&crate::core::now());
        let uuid = crate::core::new_uuid();
        self.conn().execute(
            "INSERT INTO morpheme_language_model
             (uuid, name, description, corpus_id, vocabulary_morphology_id, toolkit,
              \"order\", smoothing, categorial, rare_delimiter,
              enterer_id, modifier_id, datetime_entered, datetime_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                uuid,
                normalize(&write.name),
                normalize(&write.description),
                write.corpus_id,
                write.vocabulary_morphology_id,
                write.toolkit,
                write.order,
                write.smoothing,
                write.categorial,
                RARE_DELIMITER.to_string(),
                user.id,
                user.id,
                now,
                now,
            ],
        )?;
        let id = self.conn().last_insert_rowid();
        self.tree()
            .ensure_resource_dir(ResourceKind::MorphemeLanguageModel, id)?;
        info!(lm_id = id, "morpheme language model created");
        self.get_lm(id)
    }

    /// Update a morpheme language model.
    pub fn update_lm(
        &mut self,
        user: &User,
        id: Id,
        write: LmWrite,
    ) -> Result<MorphemeLanguageModel> {
        self.guard_readonly()?;
        let existing = self.get_lm(id)?;
        self.validate_lm_write(&write, Some(id))?;
        if existing.name == normalize(&write.name)
            && existing.description == normalize(&write.description)
            && existing.corpus_id == write.corpus_id
            && existing.vocabulary_morphology_id == write.vocabulary_morphology_id
            && existing.toolkit == write.toolkit
            && existing.order == write.order
            && existing.smoothing == write.smoothing
            && existing.categorial == write.categorial
        {
            return Err(OldbError::NotNew);
        }
        self.write_backup(
            "morpheme_language_model_backup",
            existing.id,
            &existing.uuid,
            &serde_json::to_value(&existing)?,
            &format_datetime(&existing.datetime_modified),
        )?;
        let now = format_datetime(&crate::core::now());
        self.conn().execute(
            "UPDATE morpheme_language_model SET name = ?1, description = ?2, corpus_id = ?3,
             vocabulary_morphology_id = ?4, toolkit = ?5, \"order\" = ?6, smoothing = ?7,
             categorial = ?8, modifier_id = ?9, datetime_modified = ?10
             WHERE id = ?11",
            params![
                normalize(&write.name),
                normalize(&write.description),
                write.corpus_id,
                write.vocabulary_morphology_id,
                write.toolkit,
                write.order,
                write.smoothing,
                write.categorial,
                user.id,
                now,
                id,
            ],
        )?;
        info!(lm_id = id, "morpheme language model updated");
        self.get_lm(id)
    }

    /// Delete a morpheme language model.
    pub fn delete_lm(&mut self, user: &User, id: Id) -> Result<MorphemeLanguageModel> {
        self.guard_readonly()?;
        let existing = self.get_lm(id)?;
        self.write_backup(
            "morpheme_language_model_backup",
            existing.id,
            &existing.uuid,
            &serde_json::to_value(&existing)?,
            &format_datetime(&existing.datetime_modified),
        )?;
        self.conn()
            .execute("DELETE FROM morpheme_language_model WHERE id = ?1", params![id])?;
        self.tree()
            .remove_resource_dir(ResourceKind::MorphemeLanguageModel, id)?;
        info!(lm_id = id, user_id = user.id, "morpheme language model deleted");
        Ok(existing)
    }

    /// Fetch a morpheme language model.
    pub fn get_lm(&self, id: Id) -> Result<MorphemeLanguageModel> {
        self.conn()
            .query_row(
                "SELECT * FROM morpheme_language_model WHERE id = ?1",
                params![id],
                MorphemeLanguageModel::from_row,
            )
            .optional()?
            .ok_or(OldbError::NotFound { kind: "morpheme language model", id })
    }

    /// An LM's history by id or UUID.
    pub fn lm_history(&self, key: &HistoryKey) -> Result<History> {
        self.history_generic(
            "morpheme_language_model",
            "morpheme_language_model_backup",
            key,
            |store, id| Ok(Some(serde_json::to_value(store.get_lm(id)?)?)),
        )
    }

    // ------------------------------------------------------------------
    // Generation pipeline
    // ------------------------------------------------------------------

    /// Write a new generate-attempt nonce and return it.
    pub fn new_lm_generate_attempt(&mut self, id: Id) -> Result<String> {
        let attempt = crate::core::new_attempt();
        self.conn().execute(
            "UPDATE morpheme_language_model SET generate_attempt = ?1 WHERE id = ?2",
            params![attempt, id],
        )?;
        Ok(attempt)
    }

    /// Write a new perplexity-attempt nonce and return it.
    pub fn new_lm_perplexity_attempt(&mut self, id: Id) -> Result<String> {
        let attempt = crate::core::new_attempt();
        self.conn().execute(
            "UPDATE morpheme_language_model SET perplexity_attempt = ?1 WHERE id = ?2",
            params![attempt, id],
        )?;
        Ok(attempt)
    }

    /// Run the four-stage generation pipeline synchronously. Outcomes
    /// land in the status fields; only infrastructural failures (e.g.
    /// the database going away) surface as errors.
    pub fn generate_lm_now(
        &mut self,
        id: Id,
        user_id: Id,
        timeout: Duration,
    ) -> Result<MorphemeLanguageModel> {
        let lm = self.get_lm(id)?;
        let trie_path = self.lm_file(id, "trie.bin");
        let trie_mtime_before = crate::layout::modification_time(&trie_path);

        let mut message: Option<String> = None;
        if let Err(error) = self.lm_write_corpus(&lm) {
            message = Some(format!("Error writing the corpus file. {}", error));
        }
        if message.is_none() {
            if let Err(error) = self.lm_write_vocabulary(&lm) {
                message = Some(format!("Error writing the vocabulary file. {}", error));
            }
        }
        if message.is_none() {
            if let Err(error) = self.lm_write_arpa(&lm, timeout) {
                message = Some(format!("Error writing the ARPA file. {}", error));
            }
        }
        if message.is_none() {
            if let Err(error) = self.lm_generate_trie(&lm) {
                message = Some(format!("Error generating the trie. {}", error));
            }
        }

        let trie_mtime_after = crate::layout::modification_time(&trie_path);
        let succeeded =
            message.is_none() && trie_mtime_after.is_some() && trie_mtime_after != trie_mtime_before;
        let message = match (&message, succeeded) {
            (Some(m), _) => m.clone(),
            (None, true) => "Language model successfully generated.".to_string(),
            (None, false) => "Error generating the trie.".to_string(),
        };
        if !succeeded {
            warn!(lm_id = id, message = %message, "LM generation failed");
        }

        let now = format_datetime(&crate::core::now());
        self.conn().execute(
            "UPDATE morpheme_language_model SET generate_succeeded = ?1,
             generate_message = ?2, modifier_id = ?3, datetime_modified = ?4
             WHERE id = ?5",
            params![succeeded, message, user_id, now, id],
        )?;
        info!(lm_id = id, succeeded, "LM generation finished");
        self.get_lm(id)
    }

    /// The path of one of the LM's artifact files.
    pub fn lm_file(&self, id: Id, name: &str) -> PathBuf {
        self.tree()
            .resource_dir(ResourceKind::MorphemeLanguageModel, id)
            .join(name)
    }

    /// The ARPA file's path, for serving; errors when generation has
    /// not produced one yet.
    pub fn lm_arpa_path(&self, id: Id) -> Result<PathBuf> {
        let _ = self.get_lm(id)?;
        let path = self.lm_file(id, "arpa.txt");
        if path.is_file() {
            Ok(path)
        } else {
            Err(OldbError::NotCompiled { kind: "MorphemeLanguageModel", id })
        }
    }

    /// Tokenize a morpheme-sequence string for this LM: each morpheme's
    /// `shape|gloss|category` (or rare-delimited `shape⦀gloss⦀category`)
    /// triple becomes a `shape⦀gloss` token, or a bare category token
    /// when the model is categorial.
    fn lm_tokens_of(
        &self,
        lm: &MorphemeLanguageModel,
        morpheme_sequence: &str,
        delims: &[char],
    ) -> Vec<String> {
        let mut tokens = Vec::new();
        for word in morpheme_sequence.split_whitespace() {
            let analysis = analyze_word(word, delims);
            for triple in analysis.morphemes {
                let parts: Vec<&str> = if triple.contains(RARE_DELIMITER) {
                    triple.split(RARE_DELIMITER).collect()
                } else {
                    triple.split(crate::core::constants::DEFAULT_DELIMITER).collect()
                };
                let shape = parts.first().copied().unwrap_or_default();
                let gloss = parts.get(1).copied().unwrap_or_default();
                let category = parts.get(2).copied().unwrap_or_default();
                if lm.categorial {
                    tokens.push(category.to_string());
                } else {
                    tokens.push(format!("{shape}{RARE_DELIMITER}{gloss}"));
                }
            }
        }
        tokens
    }

    /// Stage 1: the training corpus file, one sentence per form.
    fn lm_write_corpus(&self, lm: &MorphemeLanguageModel) -> Result<()> {
        let delims = self.app_settings()?.delimiters();
        let corpus = self.get_corpus_raw(lm.corpus_id)?;
        let forms = self.corpus_forms_raw(&corpus)?;
        let allowed: Option<BTreeSet<String>> = match lm.vocabulary_morphology_id {
            Some(morphology_id) => {
                let lexicon = self.load_morphology_lexicon(morphology_id)?;
                Some(
                    lexicon
                        .values()
                        .flatten()
                        .map(|(shape, gloss)| format!("{shape}{RARE_DELIMITER}{gloss}"))
                        .collect(),
                )
            }
            None => None,
        };
        self.tree()
            .ensure_resource_dir(ResourceKind::MorphemeLanguageModel, lm.id)?;
        let mut out = String::new();
        let mut written = 0usize;
        for form in &forms {
            let tokens = self.lm_tokens_of(lm, &form.break_gloss_category, &delims);
            if tokens.is_empty() || tokens.iter().any(|t| t.is_empty()) {
                continue;
            }
            if let Some(allowed) = &allowed {
                if !lm.categorial && tokens.iter().any(|t| !allowed.contains(t)) {
                    continue;
                }
            }
            out.push_str(LM_START);
            for token in &tokens {
                out.push(' ');
                out.push_str(token);
            }
            out.push(' ');
            out.push_str(LM_END);
            out.push('\n');
            written += 1;
        }
        if written == 0 {
            return Err(OldbError::invalid(
                "corpus",
                "The training corpus contains no analyzed forms.",
            ));
        }
        fs::write(self.lm_file(lm.id, "corpus.txt"), out)?;
        debug!(lm_id = lm.id, sentences = written, "LM corpus written");
        Ok(())
    }

    /// Stage 2: the sorted unique token inventory.
    fn lm_write_vocabulary(&self, lm: &MorphemeLanguageModel) -> Result<()> {
        let corpus = fs::read_to_string(self.lm_file(lm.id, "corpus.txt"))?;
        let vocabulary: BTreeSet<&str> = corpus.split_whitespace().collect();
        let mut out = String::new();
        for token in vocabulary {
            out.push_str(token);
            out.push('\n');
        }
        fs::write(self.lm_file(lm.id, "vocab.txt"), out)?;
        Ok(())
    }

    /// Stage 3: estimate the ARPA file with the external toolkit.
    fn lm_write_arpa(&self, lm: &MorphemeLanguageModel, timeout: Duration) -> Result<()> {
        let toolkit_spec = lm_toolkit(&lm.toolkit)
            .ok_or_else(|| OldbError::invalid("toolkit", "Unknown LM toolkit"))?;
        if !toolkit::installed(toolkit_spec.executable) {
            return Err(OldbError::ToolNotInstalled("The LM estimator"));
        }
        let mut cmd = std::process::Command::new(toolkit_spec.executable);
        cmd.arg("-t")
            .arg(self.lm_file(lm.id, "corpus.txt"))
            .arg("-v")
            .arg(self.lm_file(lm.id, "vocab.txt"))
            .arg("-o")
            .arg(lm.order.to_string())
            .arg("-s")
            .arg(&lm.smoothing)
            .arg("-wl")
            .arg(self.lm_file(lm.id, "arpa.txt"));
        let output = toolkit::run_with_timeout(cmd, None, timeout)?;
        if output.timed_out {
            return Err(OldbError::Timeout {
                tool: "estimate-ngram",
                seconds: timeout.as_secs(),
            });
        }
        if !output.success {
            return Err(OldbError::ToolFailure {
                tool: "estimate-ngram",
                stderr: output.stderr_tail(),
            });
        }
        Ok(())
    }

    /// Stage 4: parse the ARPA file into a trie and serialize it.
    fn lm_generate_trie(&self, lm: &MorphemeLanguageModel) -> Result<()> {
        let arpa = fs::read_to_string(self.lm_file(lm.id, "arpa.txt"))?;
        let trie = NgramTrie::parse_arpa(&arpa)?;
        trie.save(&self.lm_file(lm.id, "trie.bin"))
    }

    /// Log10 probability of each input morpheme sequence under the trie.
    pub fn lm_get_probabilities(
        &self,
        id: Id,
        morpheme_sequences: &[String],
    ) -> Result<std::collections::BTreeMap<String, f64>> {
        let lm = self.get_lm(id)?;
        let trie_path = self.lm_file(id, "trie.bin");
        if !trie_path.is_file() {
            return Err(OldbError::NotCompiled { kind: "MorphemeLanguageModel", id });
        }
        let trie = NgramTrie::load(&trie_path)?;
        let delims = self.app_settings()?.delimiters();
        let mut results = std::collections::BTreeMap::new();
        for sequence in morpheme_sequences {
            let mut tokens = vec![LM_START.to_string()];
            tokens.extend(self.lm_tokens_of(&lm, sequence, &delims));
            tokens.push(LM_END.to_string());
            results.insert(sequence.clone(), trie.sequence_logprob(&tokens));
        }
        Ok(results)
    }

    /// Compute mean held-out perplexity over `iterations` random 90/10
    /// splits, re-estimating the ARPA on each training split.
    pub fn compute_lm_perplexity_now(
        &mut self,
        id: Id,
        user_id: Id,
        timeout: Duration,
        iterations: usize,
    ) -> Result<MorphemeLanguageModel> {
        let lm = self.get_lm(id)?;
        let perplexity = match self.perplexity_runs(&lm, timeout, iterations) {
            Ok(values) if !values.is_empty() => {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
            Ok(_) => None,
            Err(error) => {
                warn!(lm_id = id, error = %error, "perplexity computation failed");
                None
            }
        };
        let now = format_datetime(&crate::core::now());
        self.conn().execute(
            "UPDATE morpheme_language_model SET perplexity = ?1, perplexity_computed = ?2,
             modifier_id = ?3, datetime_modified = ?4 WHERE id = ?5",
            params![perplexity, perplexity.is_some(), user_id, now, id],
        )?;
        self.get_lm(id)
    }

    fn perplexity_runs(
        &self,
        lm: &MorphemeLanguageModel,
        timeout: Duration,
        iterations: usize,
    ) -> Result<Vec<f64>> {
        let toolkit_spec = lm_toolkit(&lm.toolkit)
            .ok_or_else(|| OldbError::invalid("toolkit", "Unknown LM toolkit"))?;
        if !toolkit::installed(toolkit_spec.executable)
            || !toolkit::installed(toolkit_spec.evaluator)
        {
            return Err(OldbError::ToolNotInstalled("The LM toolkit"));
        }
        self.lm_write_corpus(lm)?;
        let corpus = fs::read_to_string(self.lm_file(lm.id, "corpus.txt"))?;
        let mut lines: Vec<&str> = corpus.lines().collect();
        if lines.len() < 10 {
            return Err(OldbError::invalid(
                "corpus",
                "The training corpus is too small for held-out evaluation.",
            ));
        }
        let mut rng = rand::thread_rng();
        let mut values = Vec::new();
        for iteration in 0..iterations {
            lines.shuffle(&mut rng);
            let split = (lines.len() * 9) / 10;
            let train_path = self.lm_file(lm.id, "perplexity_train.txt");
            let test_path = self.lm_file(lm.id, "perplexity_test.txt");
            let arpa_path = self.lm_file(lm.id, "perplexity_arpa.txt");
            fs::write(&train_path, lines[..split].join("\n") + "\n")?;
            fs::write(&test_path, lines[split..].join("\n") + "\n")?;

            let mut cmd = std::process::Command::new(toolkit_spec.executable);
            cmd.arg("-t")
                .arg(&train_path)
                .arg("-o")
                .arg(lm.order.to_string())
                .arg("-s")
                .arg(&lm.smoothing)
                .arg("-wl")
                .arg(&arpa_path);
            let output = toolkit::run_with_timeout(cmd, None, timeout)?;
            if !output.success {
                return Err(OldbError::ToolFailure {
                    tool: "estimate-ngram",
                    stderr: output.stderr_tail(),
                });
            }
            let mut cmd = std::process::Command::new(toolkit_spec.evaluator);
            cmd.arg("-lm").arg(&arpa_path).arg("-ep").arg(&test_path);
            let output = toolkit::run_with_timeout(cmd, None, timeout)?;
            if !output.success {
                return Err(OldbError::ToolFailure {
                    tool: "evaluate-ngram",
                    stderr: output.stderr_tail(),
                });
            }
            match parse_perplexity(&output.stdout) {
                Some(value) => values.push(value),
                None => debug!(lm_id = lm.id, iteration, "no perplexity in evaluator output"),
            }
        }
        Ok(values)
    }

    fn validate_lm_write(&self, write: &LmWrite, exclude: Option<Id>) -> Result<()> {
        let mut errors = std::collections::BTreeMap::new();
        if write.name.trim().is_empty() {
            errors.insert("name".to_string(), "Please enter a value".to_string());
        }
        if self.get_corpus_raw(write.corpus_id).is_err() {
            errors.insert(
                "corpus".to_string(),
                format!("There is no corpus with id {}.", write.corpus_id),
            );
        }
        if let Some(morphology_id) = write.vocabulary_morphology_id {
            if self.get_morphology(morphology_id).is_err() {
                errors.insert(
                    "vocabulary_morphology".to_string(),
                    format!("There is no morphology with id {}.", morphology_id),
                );
            }
        }
        if !LM_ORDER_RANGE.contains(&write.order) {
            errors.insert(
                "order".to_string(),
                "Please enter an integer from 2 to 5".to_string(),
            );
        }
        match lm_toolkit(&write.toolkit) {
            None => {
                errors.insert(
                    "toolkit".to_string(),
                    format!("There is no LM toolkit named {}.", write.toolkit),
                );
            }
            Some(toolkit_spec) => {
                if !toolkit_spec
                    .smoothing_algorithms
                    .contains(&write.smoothing.as_str())
                {
                    errors.insert(
                        "smoothing".to_string(),
                        format!(
                            "The {} toolkit does not implement the smoothing algorithm {}.",
                            write.toolkit, write.smoothing
                        ),
                    );
                }
            }
        }
        if !errors.is_empty() {
            return Err(OldbError::Validation { errors });
        }
        self.check_unique_name("morpheme_language_model", &normalize(&write.name), exclude)
    }
}

/// Pull the perplexity value out of the evaluator's report.
fn parse_perplexity(stdout: &str) -> Option<f64> {
    for line in stdout.lines() {
        if line.to_lowercase().contains("perp") {
            if let Some(value) = line
                .split_whitespace()
                .filter_map(|field| field.trim_end_matches(',').parse::<f64>().ok())
                .last()
            {
                return Some(value);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use crate::model::{CorpusWrite, FormWrite, Translation};
    use crate::store::testing::test_store;

    fn analyzed_form(transcription: &str, morpheme_break: &str, gloss: &str) -> FormWrite {
        FormWrite {
            transcription: transcription.to_string(),
            morpheme_break: morpheme_break.to_string(),
            morpheme_gloss: gloss.to_string(),
            translations: vec![Translation {
                id: 0,
                transcription: "t".to_string(),
                grammaticality: String::new(),
            }],
            ..Default::default()
        }
    }

    fn seed_training_corpus(store: &mut Store, user: &User) -> Id {
        let mut ids = Vec::new();
        for (t, b, g) in [
            ("chiens", "chien-s", "dog-PL"),
            ("chats", "chat-s", "cat-PL"),
            ("chien", "chien", "dog"),
        ] {
            ids.push(store.create_form(user, analyzed_form(t, b, g)).unwrap().id.to_string());
        }
        store
            .create_corpus(
                user,
                CorpusWrite {
                    name: "training".to_string(),
                    content: ids.join(","),
                    ..Default::default()
                },
            )
            .unwrap()
            .id
    }

    #[test]
    fn test_validation() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let err = store
            .create_lm(
                &user,
                LmWrite {
                    name: "lm".to_string(),
                    corpus_id: 42,
                    order: 9,
                    smoothing: "Laplace".to_string(),
                    ..Default::default()
                },
            )
            .unwrap_err();
        match err {
            OldbError::Validation { errors } => {
                assert!(errors.contains_key("corpus"));
                assert!(errors.contains_key("order"));
                assert!(errors.contains_key("smoothing"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_write_corpus_and_vocabulary() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let corpus_id = seed_training_corpus(&mut store, &user);
        let lm = store
            .create_lm(&user, LmWrite { name: "lm".into(), corpus_id, ..Default::default() })
            .unwrap();

        store.lm_write_corpus(&lm).unwrap();
        let corpus = std::fs::read_to_string(store.lm_file(lm.id, "corpus.txt")).unwrap();
        let lines: Vec<&str> = corpus.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("<s> "));
        assert!(lines[0].ends_with(" </s>"));
        assert!(lines[0].contains(&format!("chien{}dog", RARE_DELIMITER)));

        store.lm_write_vocabulary(&lm).unwrap();
        let vocab = std::fs::read_to_string(store.lm_file(lm.id, "vocab.txt")).unwrap();
        let tokens: Vec<&str> = vocab.lines().collect();
        assert!(tokens.contains(&"<s>"));
        assert!(tokens.contains(&format!("s{}PL", RARE_DELIMITER).as_str()));
        // Sorted unique.
        let mut sorted = tokens.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(tokens, sorted);
    }

    #[test]
    fn test_categorial_corpus() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let now = format_datetime(&crate::core::now());
        store
            .conn()
            .execute(
                "INSERT INTO syntactic_category (name, datetime_modified) VALUES ('N', ?1)",
                params![now],
            )
            .unwrap();
        let mut lexical = analyzed_form("chien", "chien", "dog");
        lexical.syntactic_category_id = Some(1);
        store.create_form(&user, lexical).unwrap();
        let form = store
            .create_form(&user, analyzed_form("le chien", "chien", "dog"))
            .unwrap();
        let corpus_id = store
            .create_corpus(
                &user,
                CorpusWrite {
                    name: "c".into(),
                    content: form.id.to_string(),
                    ..Default::default()
                },
            )
            .unwrap()
            .id;
        let lm = store
            .create_lm(
                &user,
                LmWrite { name: "lm".into(), corpus_id, categorial: true, ..Default::default() },
            )
            .unwrap();
        store.lm_write_corpus(&lm).unwrap();
        let corpus = std::fs::read_to_string(store.lm_file(lm.id, "corpus.txt")).unwrap();
        assert_eq!(corpus.trim(), "<s> N </s>");
    }

    #[test]
    fn test_generation_records_first_failing_stage() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        // Empty corpus: stage one fails.
        let corpus_id = store
            .create_corpus(&user, CorpusWrite { name: "empty".into(), ..Default::default() })
            .unwrap()
            .id;
        let lm = store
            .create_lm(&user, LmWrite { name: "lm".into(), corpus_id, ..Default::default() })
            .unwrap();
        let lm = store
            .generate_lm_now(lm.id, user.id, Duration::from_secs(5))
            .unwrap();
        assert!(!lm.generate_succeeded);
        assert!(lm.generate_message.starts_with("Error writing the corpus file."));
    }

    #[test]
    fn test_probabilities_from_handwritten_trie() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let corpus_id = seed_training_corpus(&mut store, &user);
        let lm = store
            .create_lm(&user, LmWrite { name: "lm".into(), corpus_id, ..Default::default() })
            .unwrap();

        // Place a trie directly, sidestepping the external estimator.
        let d = RARE_DELIMITER;
        let arpa = format!(
            "\\data\\\nngram 1=4\n\n\\1-grams:\n-0.5\t<s>\t0.0\n-0.4\tchien{d}dog\t0.0\n-0.6\ts{d}PL\t0.0\n-0.3\t</s>\n\n\\end\\\n"
        );
        let trie = NgramTrie::parse_arpa(&arpa).unwrap();
        trie.save(&store.lm_file(lm.id, "trie.bin")).unwrap();

        let sequence = format!("chien{d}dog{d}N-s{d}PL{d}Num");
        let probabilities = store
            .lm_get_probabilities(lm.id, &[sequence.clone()])
            .unwrap();
        // P(chien⦀dog) + P(s⦀PL) + P(</s>) under the unigram model.
        let expected = -0.4 + -0.6 + -0.3;
        assert!((probabilities[&sequence] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_get_probabilities_requires_trie() {
        let (_tmp, mut store) = test_store();
        let user = store.create_user("ann", Role::Contributor).unwrap();
        let corpus_id = seed_training_corpus(&mut store, &user);
        let lm = store
            .create_lm(&user, LmWrite { name: "lm".into(), corpus_id, ..Default::default() })
            .unwrap();
        let err = store
            .lm_get_probabilities(lm.id, &["chien-s".to_string()])
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_parse_perplexity() {
        let stdout = "n-grams 123\nperplexity: 42.17\n";
        assert_eq!(parse_perplexity(stdout), Some(42.17));
        assert_eq!(parse_perplexity("nothing here"), None);
    }
}
