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

//! The n-gram trie: an ARPA language model parsed into a token-indexed
//! tree and serialized opaquely to disk.
//!
//! Nodes carry the ARPA log10 probability and back-off weight; children
//! are indexed by token. Scoring follows standard back-off: an unseen
//! n-gram costs the context's back-off weight plus the score of the
//! shortened context.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{OldbError, Result};

/// Log10 probability assigned when even the unigram is unknown and the
/// model has no `<unk>` entry. The conventional ARPA floor.
const OOV_LOGPROB: f64 = -99.0;

/// One node of the trie.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrieNode {
    /// Log10 probability of the n-gram ending at this node.
    pub logprob: Option<f64>,
    /// Back-off weight for extending this context.
    pub backoff: Option<f64>,
    /// Children keyed by next token.
    pub children: BTreeMap<String, TrieNode>,
}

/// An n-gram language model as a trie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NgramTrie {
    /// Model order (highest n).
    pub order: usize,
    root: TrieNode,
}

impl NgramTrie {
    /// An empty trie of the given order.
    pub fn new(order: usize) -> Self {
        Self { order, root: TrieNode::default() }
    }

    /// Parse an ARPA text serialization.
    pub fn parse_arpa(text: &str) -> Result<Self> {
        let mut order = 0usize;
        let mut trie: Option<NgramTrie> = None;
        let mut current_n: Option<usize> = None;
        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line == "\\data\\" {
                continue;
            }
            if line == "\\end\\" {
                break;
            }
            if let Some(rest) = line.strip_prefix("ngram ") {
                if let Some((n, _count)) = rest.split_once('=') {
                    if let Ok(n) = n.trim().parse::<usize>() {
                        order = order.max(n);
                    }
                }
                continue;
            }
            if line.ends_with("-grams:") && line.starts_with('\\') {
                let n: usize = line
                    .trim_start_matches('\\')
                    .trim_end_matches("-grams:")
                    .parse()
                    .map_err(|_| arpa_error(line))?;
                if trie.is_none() {
                    trie = Some(NgramTrie::new(order.max(n)));
                }
                current_n = Some(n);
                continue;
            }
            let n = match current_n {
                Some(n) => n,
                None => continue,
            };
            let mut fields = line.split_whitespace();
            let logprob: f64 = fields
                .next()
                .and_then(|f| f.parse().ok())
                .ok_or_else(|| arpa_error(line))?;
            let tokens: Vec<String> = fields.by_ref().take(n).map(str::to_string).collect();
            if tokens.len() != n {
                return Err(arpa_error(line));
            }
            let backoff: Option<f64> = fields.next().and_then(|f| f.parse().ok());
            trie.as_mut()
                .expect("grams section opens before entries")
                .insert(&tokens, logprob, backoff);
        }
        trie.ok_or_else(|| arpa_error("no n-gram sections found"))
    }

    /// Insert one n-gram.
    pub fn insert(&mut self, tokens: &[String], logprob: f64, backoff: Option<f64>) {
        let mut node = &mut self.root;
        for token in tokens {
            node = node.children.entry(token.clone()).or_default();
        }
        node.logprob = Some(logprob);
        if backoff.is_some() {
            node.backoff = backoff;
        }
    }

    fn lookup(&self, tokens: &[&str]) -> Option<&TrieNode> {
        let mut node = &self.root;
        for token in tokens {
            node = node.children.get(*token)?;
        }
        Some(node)
    }

    /// Conditional log10 probability of `word` after `context`, with
    /// back-off.
    fn conditional_logprob(&self, context: &[&str], word: &str) -> f64 {
        let keep = self.order.saturating_sub(1);
        let context = if context.len() > keep {
            &context[context.len() - keep..]
        } else {
            context
        };
        let mut ngram: Vec<&str> = context.to_vec();
        ngram.push(word);
        if let Some(logprob) = self.lookup(&ngram).and_then(|n| n.logprob) {
            return logprob;
        }
        if context.is_empty() {
            return match self.lookup(&["<unk>"]).and_then(|n| n.logprob) {
                Some(unk) => unk,
                None => OOV_LOGPROB,
            };
        }
        let backoff = self
            .lookup(context)
            .and_then(|n| n.backoff)
            .unwrap_or(0.0);
        backoff + self.conditional_logprob(&context[1..], word)
    }

    /// Log10 probability of a full token sequence (sentinels included by
    /// the caller).
    pub fn sequence_logprob(&self, tokens: &[String]) -> f64 {
        let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
        let mut total = 0.0;
        for i in 0..refs.len() {
            // The leading <s> is conditioned on, not predicted.
            if i == 0 && refs[i] == crate::core::constants::LM_START {
                continue;
            }
            let start = i.saturating_sub(self.order.saturating_sub(1));
            total += self.conditional_logprob(&refs[start..i], refs[i]);
        }
        total
    }

    /// Serialize to the opaque on-disk form.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serialize(self)
            .map_err(|e| OldbError::Io(std::io::Error::other(e)))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Load the opaque on-disk form.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        bincode::deserialize(&bytes).map_err(|e| OldbError::Io(std::io::Error::other(e)))
    }
}

fn arpa_error(line: &str) -> OldbError {
    OldbError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("malformed ARPA line: {}", line),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARPA: &str = "\
\\data\\
ngram 1=5
ngram 2=3

\\1-grams:
-1.0\t<s>\t-0.5
-0.7\tchien\t-0.4
-0.9\ts\t-0.3
-1.2\t</s>
-2.0\tchat\t-0.2

\\2-grams:
-0.3\t<s> chien\t-0.1
-0.2\tchien s
-0.4\ts </s>

\\end\\
";

    fn trie() -> NgramTrie {
        NgramTrie::parse_arpa(ARPA).unwrap()
    }

    #[test]
    fn test_parse_arpa() {
        let trie = trie();
        assert_eq!(trie.order, 2);
        assert_eq!(trie.lookup(&["chien"]).unwrap().logprob, Some(-0.7));
        assert_eq!(trie.lookup(&["chien"]).unwrap().backoff, Some(-0.4));
        assert_eq!(trie.lookup(&["chien", "s"]).unwrap().logprob, Some(-0.2));
        assert!(trie.lookup(&["s", "chien"]).is_none());
    }

    #[test]
    fn test_seen_bigram_scoring() {
        let trie = trie();
        // <s> chien s </s>: bigrams all present.
        let tokens: Vec<String> =
            ["<s>", "chien", "s", "</s>"].iter().map(|s| s.to_string()).collect();
        let expected = -0.3 + -0.2 + -0.4;
        assert!((trie.sequence_logprob(&tokens) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_backoff_scoring() {
        let trie = trie();
        // "chien chat" is unseen: backoff(chien) + P(chat).
        let score = trie.conditional_logprob(&["chien"], "chat");
        assert!((score - (-0.4 + -2.0)).abs() < 1e-9);
    }

    #[test]
    fn test_oov_floor() {
        let trie = trie();
        let score = trie.conditional_logprob(&[], "zebra");
        assert_eq!(score, OOV_LOGPROB);
    }

    #[test]
    fn test_save_load_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("trie.bin");
        let trie = trie();
        let tokens: Vec<String> =
            ["<s>", "chien", "s", "</s>"].iter().map(|s| s.to_string()).collect();
        let before = trie.sequence_logprob(&tokens);
        trie.save(&path).unwrap();
        let loaded = NgramTrie::load(&path).unwrap();
        assert_eq!(loaded.order, trie.order);
        assert!((loaded.sequence_logprob(&tokens) - before).abs() < 1e-12);
    }
}
