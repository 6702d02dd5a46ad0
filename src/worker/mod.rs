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

//! Background workers for long-running toolkit jobs.
//!
//! Two named queues, each bounded at one pending job and drained by two
//! long-lived threads: the foma queue (compilation, LM estimation,
//! parser generation) and the export queue (archive bundling). The
//! request path writes a fresh attempt nonce on the resource *before*
//! enqueueing and returns immediately; clients poll the resource until
//! its status fields change under their nonce. A second build of the
//! same resource overwrites the nonce, so at most one pending build per
//! resource is ever current; its enqueue waits on the full queue.
//!
//! Workers open their own store session per job, record outcomes on the
//! resource row, and swallow job errors: log the class and message,
//! move on.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{info, warn};

use crate::config::Settings;
use crate::core::constants::{
    MORPHEME_LANGUAGE_MODEL_GENERATE_TIMEOUT, MORPHOLOGICAL_PARSER_COMPILE_TIMEOUT,
    MORPHOLOGY_COMPILE_TIMEOUT, PHONOLOGY_COMPILE_TIMEOUT,
};
use crate::core::{Id, OldbError, Result};
use crate::model::User;
use crate::parser::CacheRegistry;
use crate::store::Store;
use crate::toolkit;

/// A named background job and its arguments.
#[derive(Debug, Clone)]
pub enum Job {
    /// Compile a phonology's script.
    CompilePhonology {
        /// Target phonology.
        phonology_id: Id,
        /// Requesting user (recorded as modifier).
        user_id: Id,
        /// Foma timeout in seconds.
        timeout_secs: u64,
    },
    /// Generate a morphology's script and optionally compile it.
    GenerateAndCompileMorphology {
        /// Target morphology.
        morphology_id: Id,
        /// Whether to compile after generating.
        compile: bool,
        /// Requesting user.
        user_id: Id,
        /// Foma timeout in seconds.
        timeout_secs: u64,
    },
    /// Run the LM generation pipeline.
    GenerateLanguageModel {
        /// Target language model.
        lm_id: Id,
        /// Requesting user.
        user_id: Id,
        /// Estimator timeout in seconds.
        timeout_secs: u64,
    },
    /// Compute held-out perplexity.
    ComputePerplexity {
        /// Target language model.
        lm_id: Id,
        /// Requesting user.
        user_id: Id,
        /// Estimator timeout in seconds.
        timeout_secs: u64,
    },
    /// Generate a parser's morphophonology and optionally compile it.
    GenerateAndCompileParser {
        /// Target parser.
        parser_id: Id,
        /// Whether to compile after generating.
        compile: bool,
        /// Requesting user.
        user_id: Id,
        /// Foma timeout in seconds.
        timeout_secs: u64,
    },
    /// Rebuild every form's morpheme cross-references.
    UpdateMorphemeReferences {
        /// Requesting administrator.
        user_id: Id,
    },
    /// Bundle a parser into its export archive.
    ExportParser {
        /// Target parser.
        parser_id: Id,
    },
}

/// A queued job with its correlation id.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    /// Opaque job id, for log correlation.
    pub id: String,
    /// The job.
    pub job: Job,
}

/// The process-wide worker pool: the foma queue and the export queue,
/// two threads each.
#[derive(Debug)]
pub struct WorkerPool {
    foma_tx: Sender<QueuedJob>,
    export_tx: Sender<QueuedJob>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start the pool. Each worker opens its own store session per job.
    pub fn start(settings: Settings) -> Self {
        let (foma_tx, foma_rx) = bounded::<QueuedJob>(1);
        let (export_tx, export_rx) = bounded::<QueuedJob>(1);
        let mut handles = Vec::with_capacity(4);
        for i in 0..2 {
            handles.push(spawn_worker(format!("foma-worker-{i}"), settings.clone(), foma_rx.clone()));
            handles.push(spawn_worker(
                format!("export-worker-{i}"),
                settings.clone(),
                export_rx.clone(),
            ));
        }
        info!("worker pool started");
        Self { foma_tx, export_tx, handles }
    }

    /// Stop accepting jobs and wait for the workers to drain.
    pub fn shutdown(self) {
        drop(self.foma_tx);
        drop(self.export_tx);
        for handle in self.handles {
            let _ = handle.join();
        }
        info!("worker pool stopped");
    }

    fn send_foma(&self, job: Job) -> String {
        let id = crate::core::new_attempt();
        info!(job_id = %id, ?job, "enqueueing foma job");
        // Capacity 1: a second enqueue waits here, serializing builds.
        let _ = self.foma_tx.send(QueuedJob { id: id.clone(), job });
        id
    }

    fn send_export(&self, job: Job) -> String {
        let id = crate::core::new_attempt();
        info!(job_id = %id, ?job, "enqueueing export job");
        let _ = self.export_tx.send(QueuedJob { id: id.clone(), job });
        id
    }

    // ------------------------------------------------------------------
    // Request-path enqueue operations
    // ------------------------------------------------------------------

    /// Enqueue a phonology compile; returns the new attempt nonce the
    /// client polls for.
    pub fn enqueue_compile_phonology(
        &self,
        store: &mut Store,
        user: &User,
        phonology_id: Id,
    ) -> Result<String> {
        store.guard_readonly()?;
        store.get_phonology(phonology_id)?;
        if !toolkit::foma_installed() {
            return Err(OldbError::ToolNotInstalled("Foma and flookup"));
        }
        let attempt = store.new_phonology_compile_attempt(phonology_id)?;
        self.send_foma(Job::CompilePhonology {
            phonology_id,
            user_id: user.id,
            timeout_secs: PHONOLOGY_COMPILE_TIMEOUT,
        });
        Ok(attempt)
    }

    /// Enqueue morphology generation (and optional compilation).
    pub fn enqueue_generate_morphology(
        &self,
        store: &mut Store,
        user: &User,
        morphology_id: Id,
        compile: bool,
    ) -> Result<String> {
        store.guard_readonly()?;
        store.get_morphology(morphology_id)?;
        if compile && !toolkit::foma_installed() {
            return Err(OldbError::ToolNotInstalled("Foma and flookup"));
        }
        let attempt = store.new_morphology_generate_attempt(morphology_id)?;
        if compile {
            store.new_morphology_compile_attempt(morphology_id)?;
        }
        self.send_foma(Job::GenerateAndCompileMorphology {
            morphology_id,
            compile,
            user_id: user.id,
            timeout_secs: MORPHOLOGY_COMPILE_TIMEOUT,
        });
        Ok(attempt)
    }

    /// Enqueue the LM generation pipeline.
    pub fn enqueue_generate_lm(
        &self,
        store: &mut Store,
        user: &User,
        lm_id: Id,
    ) -> Result<String> {
        store.guard_readonly()?;
        store.get_lm(lm_id)?;
        let attempt = store.new_lm_generate_attempt(lm_id)?;
        self.send_foma(Job::GenerateLanguageModel {
            lm_id,
            user_id: user.id,
            timeout_secs: MORPHEME_LANGUAGE_MODEL_GENERATE_TIMEOUT,
        });
        Ok(attempt)
    }

    /// Enqueue a perplexity computation.
    pub fn enqueue_compute_perplexity(
        &self,
        store: &mut Store,
        user: &User,
        lm_id: Id,
    ) -> Result<String> {
        store.guard_readonly()?;
        store.get_lm(lm_id)?;
        let attempt = store.new_lm_perplexity_attempt(lm_id)?;
        self.send_foma(Job::ComputePerplexity {
            lm_id,
            user_id: user.id,
            timeout_secs: MORPHEME_LANGUAGE_MODEL_GENERATE_TIMEOUT,
        });
        Ok(attempt)
    }

    /// Enqueue parser generation (and optional compilation).
    pub fn enqueue_generate_parser(
        &self,
        store: &mut Store,
        user: &User,
        parser_id: Id,
        compile: bool,
    ) -> Result<String> {
        store.guard_readonly()?;
        store.get_parser(parser_id)?;
        if compile && !toolkit::foma_installed() {
            return Err(OldbError::ToolNotInstalled("Foma and flookup"));
        }
        let attempt = store.new_parser_generate_attempt(parser_id)?;
        if compile {
            store.new_parser_compile_attempt(parser_id)?;
        }
        self.send_foma(Job::GenerateAndCompileParser {
            parser_id,
            compile,
            user_id: user.id,
            timeout_secs: MORPHOLOGICAL_PARSER_COMPILE_TIMEOUT,
        });
        Ok(attempt)
    }

    /// Enqueue the global morpheme-reference rebuild (administrators
    /// only).
    pub fn enqueue_update_morpheme_references(
        &self,
        store: &mut Store,
        user: &User,
    ) -> Result<String> {
        store.guard_readonly()?;
        if !user.is_administrator() {
            return Err(OldbError::Unauthorized { referent: None });
        }
        Ok(self.send_foma(Job::UpdateMorphemeReferences { user_id: user.id }))
    }

    /// Enqueue a parser export.
    pub fn enqueue_export_parser(&self, store: &mut Store, parser_id: Id) -> Result<String> {
        store.get_parser(parser_id)?;
        Ok(self.send_export(Job::ExportParser { parser_id }))
    }
}

fn spawn_worker(name: String, settings: Settings, rx: Receiver<QueuedJob>) -> JoinHandle<()> {
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            for queued in rx.iter() {
                info!(worker = %name, job_id = %queued.id, "job started");
                match run_job(&settings, &queued.job) {
                    Ok(()) => info!(worker = %name, job_id = %queued.id, "job finished"),
                    Err(error) => warn!(
                        worker = %name,
                        job_id = %queued.id,
                        class = error_class(&error),
                        error = %error,
                        "unable to process job"
                    ),
                }
            }
        })
        .expect("worker thread spawns")
}

/// Run one job against a fresh store session.
fn run_job(settings: &Settings, job: &Job) -> Result<()> {
    let mut store = Store::open(settings)?;
    match job {
        Job::CompilePhonology { phonology_id, user_id, timeout_secs } => {
            store.compile_phonology_now(
                *phonology_id,
                *user_id,
                Duration::from_secs(*timeout_secs),
            )?;
        }
        Job::GenerateAndCompileMorphology { morphology_id, compile, user_id, timeout_secs } => {
            store.generate_morphology_now(*morphology_id, *user_id)?;
            if *compile {
                store.compile_morphology_now(
                    *morphology_id,
                    *user_id,
                    Duration::from_secs(*timeout_secs),
                )?;
            }
        }
        Job::GenerateLanguageModel { lm_id, user_id, timeout_secs } => {
            store.generate_lm_now(*lm_id, *user_id, Duration::from_secs(*timeout_secs))?;
        }
        Job::ComputePerplexity { lm_id, user_id, timeout_secs } => {
            store.compute_lm_perplexity_now(
                *lm_id,
                *user_id,
                Duration::from_secs(*timeout_secs),
                5,
            )?;
        }
        Job::GenerateAndCompileParser { parser_id, compile, user_id, timeout_secs } => {
            store.generate_parser_now(*parser_id, *user_id, CacheRegistry::global())?;
            if *compile {
                store.compile_parser_now(
                    *parser_id,
                    *user_id,
                    Duration::from_secs(*timeout_secs),
                )?;
            }
        }
        Job::UpdateMorphemeReferences { user_id } => {
            let user = store.get_user(*user_id)?;
            store.update_morpheme_references(&user)?;
        }
        Job::ExportParser { parser_id } => {
            store.export_parser(*parser_id, CacheRegistry::global())?;
        }
    }
    Ok(())
}

fn error_class(error: &OldbError) -> &'static str {
    match error {
        OldbError::Io(_) => "Io",
        OldbError::Db(_) => "Db",
        OldbError::Json(_) => "Json",
        OldbError::Validation { .. } => "Validation",
        OldbError::SearchParse(_) => "SearchParse",
        OldbError::ReadOnlyMode => "ReadOnlyMode",
        OldbError::ReadOnlyResource => "ReadOnlyResource",
        OldbError::Unauthenticated => "Unauthenticated",
        OldbError::Unauthorized { .. } => "Unauthorized",
        OldbError::NotFound { .. } => "NotFound",
        OldbError::ToolNotInstalled(_) => "ToolNotInstalled",
        OldbError::NotCompiled { .. } => "NotCompiled",
        OldbError::NotWrittenToFile(_) => "NotWrittenToFile",
        OldbError::NoTests(_) => "NoTests",
        OldbError::NotNew => "NotNew",
        OldbError::CircularReference(_) => "CircularReference",
        OldbError::Timeout { .. } => "Timeout",
        OldbError::ToolFailure { .. } => "ToolFailure",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use crate::model::{FormWrite, Translation};
    use crate::store::testing::test_store;
    use std::time::Instant;

    #[test]
    fn test_update_morpheme_references_job_round_trip() {
        let (tmp, mut store) = test_store();
        let admin = store.create_user("admin", Role::Administrator).unwrap();
        let sentence = store
            .create_form(
                &admin,
                FormWrite {
                    transcription: "chiens".to_string(),
                    morpheme_break: "chien".to_string(),
                    morpheme_gloss: "dog".to_string(),
                    translations: vec![Translation {
                        id: 0,
                        transcription: "dogs".to_string(),
                        grammaticality: String::new(),
                    }],
                    ..Default::default()
                },
            )
            .unwrap();
        // Stale until rebuilt: the matching lexical entry arrives later.
        let now = crate::model::format_datetime(&crate::core::now());
        store
            .conn()
            .execute(
                "INSERT INTO syntactic_category (name, datetime_modified) VALUES ('N', ?1)",
                rusqlite::params![now],
            )
            .unwrap();
        let mut lexical = FormWrite {
            transcription: "chien".to_string(),
            morpheme_break: "chien".to_string(),
            morpheme_gloss: "dog".to_string(),
            syntactic_category_id: Some(1),
            translations: vec![Translation {
                id: 0,
                transcription: "dog".to_string(),
                grammaticality: String::new(),
            }],
            ..Default::default()
        };
        lexical.comments = "lexical entry".to_string();
        store.create_form(&admin, lexical).unwrap();

        let settings = crate::config::Settings::for_root(tmp.path());
        let pool = WorkerPool::start(settings);
        pool.enqueue_update_morpheme_references(&mut store, &admin)
            .unwrap();

        // Poll the resource until the worker's rebuild lands.
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut category = String::new();
        while Instant::now() < deadline {
            category = store
                .get_form_raw(sentence.id)
                .unwrap()
                .syntactic_category_string;
            if category == "N" {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        pool.shutdown();
        assert_eq!(category, "N");
    }

    #[test]
    fn test_enqueue_requires_admin_for_global_rebuild() {
        let (tmp, mut store) = test_store();
        let viewer = store.create_user("viewer", Role::Viewer).unwrap();
        let settings = crate::config::Settings::for_root(tmp.path());
        let pool = WorkerPool::start(settings);
        let err = pool
            .enqueue_update_morpheme_references(&mut store, &viewer)
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        pool.shutdown();
    }

    #[test]
    fn test_enqueue_missing_resource_is_404() {
        let (tmp, mut store) = test_store();
        let admin = store.create_user("admin", Role::Administrator).unwrap();
        let settings = crate::config::Settings::for_root(tmp.path());
        let pool = WorkerPool::start(settings);
        let err = pool
            .enqueue_compile_phonology(&mut store, &admin, 999)
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
        pool.shutdown();
    }

    #[test]
    fn test_nonce_written_before_enqueue() {
        let (tmp, mut store) = test_store();
        let admin = store.create_user("admin", Role::Administrator).unwrap();
        let lm_corpus = store
            .create_corpus(
                &admin,
                crate::model::CorpusWrite { name: "c".to_string(), ..Default::default() },
            )
            .unwrap();
        let lm = store
            .create_lm(
                &admin,
                crate::lm::LmWrite {
                    name: "lm".to_string(),
                    corpus_id: lm_corpus.id,
                    ..Default::default()
                },
            )
            .unwrap();
        let settings = crate::config::Settings::for_root(tmp.path());
        let pool = WorkerPool::start(settings);
        let attempt = pool.enqueue_generate_lm(&mut store, &admin, lm.id).unwrap();
        // The nonce is on the resource even before the worker runs.
        assert_eq!(store.get_lm(lm.id).unwrap().generate_attempt, attempt);
        pool.shutdown();
    }
}
