//! Fixed values shared across subsystems: toolkit timeouts, delimiter
//! symbols, enumerated vocabularies, and the n-gram toolkit registry.

/// Seconds to wait before terminating a foma process compiling a
/// phonology script.
pub const PHONOLOGY_COMPILE_TIMEOUT: u64 = 30;

/// Seconds to wait before terminating a foma process compiling a
/// morphology script. Morphology compilation over a large lexicon can run
/// for days; this ceiling is effectively unbounded by policy.
pub const MORPHOLOGY_COMPILE_TIMEOUT: u64 = 60 * 3000;

/// Seconds to wait before terminating a foma process compiling a
/// morphophonology script.
pub const MORPHOLOGICAL_PARSER_COMPILE_TIMEOUT: u64 = 60 * 60;

/// Seconds allowed for the external estimator to write an ARPA file.
pub const MORPHEME_LANGUAGE_MODEL_GENERATE_TIMEOUT: u64 = 60 * 15;

/// The word boundary symbol is used in foma FST scripts to denote the
/// beginning or end of a word, i.e., it can be referred to in
/// phonological rules, e.g., `define semivowelDrop glides -> 0 || "#" _;`
/// Inputs are wrapped in this symbol when a phonology is applied against
/// them.
pub const WORD_BOUNDARY_SYMBOL: &str = "#";

/// String used when a morpheme's category cannot be determined.
pub const UNKNOWN_CATEGORY: &str = "?";

/// Default delimiter for the three fields of a break-gloss-category
/// triple as stored in `break_gloss_category`.
pub const DEFAULT_DELIMITER: &str = "|";

/// Rare delimiter (U+2980, TRIPLE VERTICAL BAR DELIMITER): separates a
/// morpheme's shape from its gloss in foma lexica and LM tokens, chosen
/// for its improbability in fieldwork orthographies.
pub const RARE_DELIMITER: char = '\u{2980}';

/// Morpheme delimiters assumed when no application settings row exists.
pub const DEFAULT_MORPHEME_DELIMITERS: &str = "-,=";

/// Sentence-start sentinel in LM training corpora.
pub const LM_START: &str = "<s>";

/// Sentence-end sentinel in LM training corpora.
pub const LM_END: &str = "</s>";

/// Valid n-gram orders for a morpheme language model.
pub const LM_ORDER_RANGE: std::ops::RangeInclusive<i64> = 2..=5;

/// The user roles recognized by the access layer.
pub const USER_ROLES: [&str; 3] = ["viewer", "contributor", "administrator"];

/// Valid `script_type` values for a morphology.
pub const MORPHOLOGY_SCRIPT_TYPES: [&str; 2] = ["regex", "lexc"];

/// Valid markup languages for collection contents.
pub const MARKUP_LANGUAGES: [&str; 2] = ["reStructuredText", "Markdown"];

/// Valid collection types.
pub const COLLECTION_TYPES: [&str; 5] =
    ["story", "elicitation", "paper", "discourse", "other"];

/// Valid form statuses.
pub const FORM_STATUSES: [&str; 2] = ["tested", "requires testing"];

/// The distinguished tag that hides a resource from restricted users.
pub const RESTRICTED_TAG: &str = "restricted";

/// A supported external n-gram toolkit: the executables it provides and
/// the smoothing algorithms its estimator accepts.
#[derive(Debug, Clone, Copy)]
pub struct LmToolkit {
    /// Registry name, e.g. `mitlm`.
    pub name: &'static str,
    /// The estimator executable, e.g. `estimate-ngram`.
    pub executable: &'static str,
    /// The evaluator executable used for perplexity, e.g.
    /// `evaluate-ngram`.
    pub evaluator: &'static str,
    /// Smoothing algorithm names the estimator accepts.
    pub smoothing_algorithms: &'static [&'static str],
}

/// The registry of supported LM toolkits.
pub const LM_TOOLKITS: [LmToolkit; 1] = [LmToolkit {
    name: "mitlm",
    executable: "estimate-ngram",
    evaluator: "evaluate-ngram",
    smoothing_algorithms: &["ML", "FixKN", "FixModKN", "FixKNn", "KN", "ModKN", "KNn"],
}];

/// Look up a toolkit by registry name.
pub fn lm_toolkit(name: &str) -> Option<&'static LmToolkit> {
    LM_TOOLKITS.iter().find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rare_delimiter_is_u2980() {
        assert_eq!(RARE_DELIMITER as u32, 0x2980);
    }

    #[test]
    fn test_toolkit_lookup() {
        let mitlm = lm_toolkit("mitlm").unwrap();
        assert_eq!(mitlm.executable, "estimate-ngram");
        assert!(mitlm.smoothing_algorithms.contains(&"ModKN"));
        assert!(lm_toolkit("srilm").is_none());
    }
}
