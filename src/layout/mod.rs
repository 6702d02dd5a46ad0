//! The on-disk artifact tree.
//!
//! Every derived-resource kind owns a deterministic directory under the
//! instance root:
//!
//! ```text
//! <permanent_store>/<old_name>/
//!   files/
//!     reduced_files/
//!   corpora/corpus_<id>/
//!   phonologies/phonology_<id>/
//!   morphologies/morphology_<id>/
//!   morpheme_language_models/morpheme_language_model_<id>/
//!   morphological_parsers/morphological_parser_<id>/
//!   users/<username>/
//! ```
//!
//! A resource's directory is exclusively owned by that resource:
//! deleting the resource removes the directory. Freshness of derived
//! files is compared by modification time.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::Settings;
use crate::core::types::normalize_nfc;
use crate::core::{Id, Result};

/// The derived-resource kinds that own artifact directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// `corpora/corpus_<id>/`
    Corpus,
    /// `phonologies/phonology_<id>/`
    Phonology,
    /// `morphologies/morphology_<id>/`
    Morphology,
    /// `morpheme_language_models/morpheme_language_model_<id>/`
    MorphemeLanguageModel,
    /// `morphological_parsers/morphological_parser_<id>/`
    MorphologicalParser,
}

impl ResourceKind {
    /// The plural directory that groups this kind's resources.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ResourceKind::Corpus => "corpora",
            ResourceKind::Phonology => "phonologies",
            ResourceKind::Morphology => "morphologies",
            ResourceKind::MorphemeLanguageModel => "morpheme_language_models",
            ResourceKind::MorphologicalParser => "morphological_parsers",
        }
    }

    /// The singular prefix of a per-resource directory and its files.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            ResourceKind::Corpus => "corpus",
            ResourceKind::Phonology => "phonology",
            ResourceKind::Morphology => "morphology",
            ResourceKind::MorphemeLanguageModel => "morpheme_language_model",
            ResourceKind::MorphologicalParser => "morphological_parser",
        }
    }
}

/// Path arithmetic for one instance's artifact tree.
#[derive(Debug, Clone)]
pub struct ArtifactTree {
    root: PathBuf,
}

impl ArtifactTree {
    /// The tree rooted at `<permanent_store>/<old_name>/`.
    pub fn new(settings: &Settings) -> Self {
        Self {
            root: settings.permanent_store.join(&settings.old_name),
        }
    }

    /// The instance root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the full fixed directory skeleton.
    pub fn initialize(&self) -> Result<()> {
        fs::create_dir_all(self.root.join("files").join("reduced_files"))?;
        fs::create_dir_all(self.root.join("users"))?;
        for kind in [
            ResourceKind::Corpus,
            ResourceKind::Phonology,
            ResourceKind::Morphology,
            ResourceKind::MorphemeLanguageModel,
            ResourceKind::MorphologicalParser,
        ] {
            fs::create_dir_all(self.root.join(kind.dir_name()))?;
        }
        Ok(())
    }

    /// The directory owned by resource `id` of `kind`, e.g.
    /// `phonologies/phonology_3/`.
    pub fn resource_dir(&self, kind: ResourceKind, id: Id) -> PathBuf {
        self.root
            .join(kind.dir_name())
            .join(format!("{}_{}", kind.file_prefix(), id))
    }

    /// A file inside the resource directory named
    /// `<prefix>_<id><suffix>`, e.g. `phonology_3.script`.
    pub fn resource_file(&self, kind: ResourceKind, id: Id, suffix: &str) -> PathBuf {
        self.resource_dir(kind, id)
            .join(format!("{}_{}{}", kind.file_prefix(), id, suffix))
    }

    /// Create the resource directory if missing.
    pub fn ensure_resource_dir(&self, kind: ResourceKind, id: Id) -> Result<PathBuf> {
        let dir = self.resource_dir(kind, id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Remove the resource directory and everything under it. Called on
    /// resource delete; missing directories are not an error.
    pub fn remove_resource_dir(&self, kind: ResourceKind, id: Id) -> Result<()> {
        let dir = self.resource_dir(kind, id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// A user's personal directory.
    pub fn user_dir(&self, username: &str) -> PathBuf {
        self.root.join("users").join(normalize_filename(username))
    }
}

/// Modification time of a file, or `None` when it does not exist.
/// Derived-artifact freshness is decided by comparing these.
pub fn modification_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Normalize an uploaded filename: NFC, spaces and path separators
/// replaced, no leading dots.
pub fn normalize_filename(name: &str) -> String {
    let cleaned: String = normalize_nfc(name)
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}

/// Infer a media type from a served artifact's extension.
pub fn media_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("gz") => "application/x-gzip",
        Some("tbk") | Some("txt") | Some("script") | Some("foma") | Some("sh") => {
            "text/plain"
        }
        Some("zip") => "application/zip",
        Some("wav") => "audio/x-wav",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree() -> (TempDir, ArtifactTree) {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::for_root(tmp.path());
        let tree = ArtifactTree::new(&settings);
        tree.initialize().unwrap();
        (tmp, tree)
    }

    #[test]
    fn test_resource_paths() {
        let (_tmp, tree) = tree();
        let dir = tree.resource_dir(ResourceKind::Phonology, 3);
        assert!(dir.ends_with("phonologies/phonology_3"));
        let script = tree.resource_file(ResourceKind::Phonology, 3, ".script");
        assert!(script.ends_with("phonologies/phonology_3/phonology_3.script"));
        let binary = tree.resource_file(ResourceKind::Morphology, 9, "");
        assert!(binary.ends_with("morphologies/morphology_9/morphology_9"));
    }

    #[test]
    fn test_initialize_creates_skeleton() {
        let (_tmp, tree) = tree();
        assert!(tree.root().join("files/reduced_files").is_dir());
        assert!(tree.root().join("corpora").is_dir());
        assert!(tree.root().join("morphological_parsers").is_dir());
    }

    #[test]
    fn test_remove_resource_dir() {
        let (_tmp, tree) = tree();
        let dir = tree.ensure_resource_dir(ResourceKind::Corpus, 1).unwrap();
        std::fs::write(dir.join("corpus_1.tbk"), "x").unwrap();
        tree.remove_resource_dir(ResourceKind::Corpus, 1).unwrap();
        assert!(!dir.exists());
        // idempotent
        tree.remove_resource_dir(ResourceKind::Corpus, 1).unwrap();
    }

    #[test]
    fn test_normalize_filename() {
        assert_eq!(normalize_filename("my file/na\\me.wav"), "my_file_na_me.wav");
        assert_eq!(normalize_filename("..hidden"), "hidden");
        // NFC composition
        assert_eq!(normalize_filename("e\u{0301}.txt"), "\u{00e9}.txt");
    }

    #[test]
    fn test_media_types() {
        assert_eq!(media_type_for(Path::new("corpus_1.tbk.gz")), "application/x-gzip");
        assert_eq!(media_type_for(Path::new("corpus_1.tbk")), "text/plain");
        assert_eq!(media_type_for(Path::new("corpus_1.t2c")), "application/octet-stream");
    }
}
