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

//! # OLDB
//!
//! A multi-tenant store for collaborative linguistic fieldwork: glossed
//! utterances, corpora, saved searches, and the derived computational
//! resources compiled from them — foma phonologies and morphologies,
//! morpheme n-gram language models, and composed morphological parsers
//! that score candidate analyses of input word forms.
//!
//! ## Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`core`]: Error taxonomy, constants, and shared types
//! - [`db`]: SQLite schema and connection management
//! - [`model`]: Entities and their backup snapshots
//! - [`query`]: The list-form search compiler (filter lists to SQL)
//! - [`store`]: Persistence with restricted-visibility filtering and
//!   backup-on-mutate semantics
//! - [`corpus`]: Form collections, treebank files, and TGrep2 search
//! - [`phonology`], [`morphology`]: foma FST script management and
//!   compilation
//! - [`lm`]: Morpheme language model estimation and trie scoring
//! - [`parser`]: Morphophonology composition and probabilistic parsing
//! - [`worker`]: Background queues for long-running toolkit jobs
//! - [`layout`]: The on-disk artifact tree owned by each resource
//! - [`collection`]: Cross-reference propagation for textual collections
//! - [`toolkit`]: Timeout-bounded subprocess invocation of foma,
//!   flookup, tgrep2 and the n-gram estimator
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use oldb::config::Settings;
//! use oldb::store::Store;
//!
//! # fn main() -> anyhow::Result<()> {
//! let settings = Settings::from_env();
//! let mut store = Store::open(&settings)?;
//! let admin = store.get_user(1)?;
//! let page = store.index_forms(&admin, &oldb::store::Paginator::default())?;
//! println!("{} forms", page.count);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency model
//!
//! Request handling is thread-per-request over a blocking store; each
//! thread opens its own [`store::Store`]. Long toolkit runs are
//! dispatched to the process-wide [`worker::WorkerPool`] and observed by
//! polling the resource's attempt nonce and status fields.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod core;
pub mod db;
pub mod model;
pub mod query;
pub mod store;
pub mod corpus;
pub mod phonology;
pub mod morphology;
pub mod lm;
pub mod parser;
pub mod worker;
pub mod layout;
pub mod collection;
pub mod forms;
pub mod toolkit;
pub mod config;
pub mod logging;

pub use crate::config::Settings;
pub use crate::core::error::{OldbError, Result, SearchParseError};
pub use crate::query::QueryCompiler;
pub use crate::store::Store;
pub use crate::worker::WorkerPool;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
