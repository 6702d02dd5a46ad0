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

//! The parse cache.
//!
//! Parses are cached process-wide, keyed by parser, compile-attempt
//! nonce, and transcription, so repeated parse requests return without
//! touching foma or the LM. Changing the nonce (a recompile) strands the
//! old keys; [`ParseCache::clear`] drops them and can persist the
//! surviving entries to the parser's on-disk cache file first.
//!
//! Tests needing isolation construct their own [`CacheRegistry`]
//! instead of using [`CacheRegistry::global`].

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::core::{Id, OldbError, Result};

/// Default per-parser cache capacity.
const CACHE_CAPACITY: usize = 4096;

/// One cached parse: the winning candidate and the full ranked list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedParse {
    /// The maximum-scoring analysis, or `None` when nothing parsed.
    pub parse: Option<String>,
    /// All candidates with their log10 scores, best first.
    pub candidates: Vec<(String, f64)>,
}

/// A per-parser cache of transcription parses.
pub struct ParseCache {
    entries: Mutex<LruCache<String, CachedParse>>,
}

impl std::fmt::Debug for ParseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseCache").field("len", &self.len()).finish()
    }
}

fn key(attempt: &str, transcription: &str) -> String {
    format!("{}\u{0}{}", attempt, transcription)
}

impl ParseCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is nonzero"),
            )),
        }
    }

    /// Fetch a cached parse for this compile attempt.
    pub fn get(&self, attempt: &str, transcription: &str) -> Option<CachedParse> {
        self.entries
            .lock()
            .expect("cache lock")
            .get(&key(attempt, transcription))
            .cloned()
    }

    /// Record a parse under this compile attempt.
    pub fn put(&self, attempt: &str, transcription: &str, parse: CachedParse) {
        self.entries
            .lock()
            .expect("cache lock")
            .put(key(attempt, transcription), parse);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock").len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot every entry, most recent first.
    pub fn export(&self) -> Vec<(String, CachedParse)> {
        self.entries
            .lock()
            .expect("cache lock")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Drop all entries; when `persist_to` is given, the dropped
    /// entries are written there first.
    pub fn clear(&self, persist_to: Option<&Path>) -> Result<()> {
        let snapshot = self.export();
        if let Some(path) = persist_to {
            let bytes = bincode::serialize(&snapshot)
                .map_err(|e| OldbError::Io(std::io::Error::other(e)))?;
            std::fs::write(path, bytes)?;
        }
        self.entries.lock().expect("cache lock").clear();
        Ok(())
    }

    /// Merge entries persisted by a prior process.
    pub fn load_from(&self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Ok(());
        }
        let snapshot: Vec<(String, CachedParse)> =
            bincode::deserialize(&std::fs::read(path)?)
                .map_err(|e| OldbError::Io(std::io::Error::other(e)))?;
        let mut entries = self.entries.lock().expect("cache lock");
        for (k, v) in snapshot.into_iter().rev() {
            entries.put(k, v);
        }
        Ok(())
    }
}

impl Default for ParseCache {
    fn default() -> Self {
        Self::new()
    }
}

/// The set of per-parser caches alive in this process.
#[derive(Debug, Default)]
pub struct CacheRegistry {
    caches: Mutex<HashMap<Id, Arc<ParseCache>>>,
}

impl CacheRegistry {
    /// A fresh registry (per-test isolation).
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry, created on first use.
    pub fn global() -> &'static CacheRegistry {
        static GLOBAL: OnceLock<CacheRegistry> = OnceLock::new();
        GLOBAL.get_or_init(CacheRegistry::new)
    }

    /// The cache for one parser, created empty on first access.
    pub fn for_parser(&self, parser_id: Id) -> Arc<ParseCache> {
        self.caches
            .lock()
            .expect("registry lock")
            .entry(parser_id)
            .or_insert_with(|| Arc::new(ParseCache::new()))
            .clone()
    }

    /// Drop a parser's cache entirely (resource deletion).
    pub fn remove(&self, parser_id: Id) {
        self.caches.lock().expect("registry lock").remove(&parser_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> CachedParse {
        CachedParse { parse: Some(s.to_string()), candidates: vec![(s.to_string(), -1.0)] }
    }

    #[test]
    fn test_get_put_respects_attempt() {
        let cache = ParseCache::new();
        cache.put("attempt-1", "chiens", parse("chien-s"));
        assert_eq!(cache.get("attempt-1", "chiens"), Some(parse("chien-s")));
        // A recompile (new nonce) misses.
        assert!(cache.get("attempt-2", "chiens").is_none());
    }

    #[test]
    fn test_clear_persists() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("cache.bin");
        let cache = ParseCache::new();
        cache.put("a", "x", parse("p"));
        cache.clear(Some(&path)).unwrap();
        assert!(cache.is_empty());

        let restored = ParseCache::new();
        restored.load_from(&path).unwrap();
        assert_eq!(restored.get("a", "x"), Some(parse("p")));
    }

    #[test]
    fn test_registry_isolation() {
        let registry = CacheRegistry::new();
        let one = registry.for_parser(1);
        let also_one = registry.for_parser(1);
        let two = registry.for_parser(2);
        one.put("a", "x", parse("p"));
        assert!(also_one.get("a", "x").is_some());
        assert!(two.get("a", "x").is_none());
        registry.remove(1);
        assert!(registry.for_parser(1).get("a", "x").is_none());
    }
}
