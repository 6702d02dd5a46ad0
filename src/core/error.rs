//! Error types for the OLDB store and its derived-resource pipeline.

use std::collections::BTreeMap;
use std::io;
use thiserror::Error;

/// A failed attempt to compile a list-form search expression.
///
/// Carries a map from `Model.attribute[.relation]` keys to messages; one
/// entry per validation failure encountered while walking the filter.
#[derive(Debug, Clone, Error)]
#[error("search parse error: {}", self.joined())]
pub struct SearchParseError {
    /// Per-key validation messages.
    pub errors: BTreeMap<String, String>,
}

impl SearchParseError {
    /// Wrap an error map.
    pub fn new(errors: BTreeMap<String, String>) -> Self {
        Self { errors }
    }

    fn joined(&self) -> String {
        self.errors
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Main error type for OLDB operations.
#[derive(Debug, Error)]
pub enum OldbError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Input failed schema validation; one message per offending field
    #[error("Validation failed: {errors:?}")]
    Validation {
        /// Field name to message.
        errors: BTreeMap<String, String>,
    },

    /// A list-form search expression did not compile
    #[error(transparent)]
    SearchParse(#[from] SearchParseError),

    /// A mutating request arrived while the instance runs read-only
    #[error("This OLD is running in read-only mode and cannot be updated.")]
    ReadOnlyMode,

    /// A mutating request targeted a backup collection
    #[error("This resource is read-only.")]
    ReadOnlyResource,

    /// No authenticated user
    #[error("Authentication is required to access this resource.")]
    Unauthenticated,

    /// The user may not access the resource (or a referent of the
    /// mutation); `referent` is the id of the offending resource
    #[error("You are not authorized to access this resource.")]
    Unauthorized {
        /// Id of the restricted referent, when one is identifiable.
        referent: Option<i64>,
    },

    /// No resource of the given kind has the given id
    #[error("There is no {kind} with id {id}")]
    NotFound {
        /// Human-readable resource kind, e.g. "phonology".
        kind: &'static str,
        /// The requested id.
        id: i64,
    },

    /// A required external executable is not on the PATH
    #[error("{0} is not installed.")]
    ToolNotInstalled(&'static str),

    /// A resource's FST has not been compiled yet
    #[error("{kind} {id} has not been compiled yet.")]
    NotCompiled {
        /// Capitalized resource kind, e.g. "Phonology".
        kind: &'static str,
        /// The resource id.
        id: i64,
    },

    /// TGrep2 search requested against a corpus with no compiled treebank
    #[error("Corpus {0} has not been written to file as a treebank.")]
    NotWrittenToFile(i64),

    /// A phonology's script defines no `#test` lines
    #[error("The script of phonology {0} contains no tests.")]
    NoTests(i64),

    /// An update whose submitted state equals the current state
    #[error("The update request failed because the submitted data were not new.")]
    NotNew,

    /// Collection contents reference each other in a cycle
    #[error("Circular collection reference involving collection {0}.")]
    CircularReference(i64),

    /// An external process exceeded its allotted time
    #[error("{tool} process timed out after {seconds} seconds")]
    Timeout {
        /// The external executable.
        tool: &'static str,
        /// The enforced limit.
        seconds: u64,
    },

    /// An external process failed; carries the stderr tail
    #[error("{tool} failed: {stderr}")]
    ToolFailure {
        /// The external executable.
        tool: &'static str,
        /// Trailing stderr output.
        stderr: String,
    },
}

impl OldbError {
    /// The HTTP status code this error maps to at the API boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            OldbError::Validation { .. }
            | OldbError::SearchParse(_)
            | OldbError::NotNew
            | OldbError::ToolNotInstalled(_)
            | OldbError::NotCompiled { .. }
            | OldbError::NotWrittenToFile(_)
            | OldbError::NoTests(_)
            | OldbError::CircularReference(_)
            | OldbError::ToolFailure { .. } => 400,
            OldbError::Unauthenticated => 401,
            OldbError::ReadOnlyMode | OldbError::Unauthorized { .. } => 403,
            OldbError::NotFound { .. } | OldbError::ReadOnlyResource => 404,
            _ => 500,
        }
    }

    /// The JSON body this error maps to at the API boundary: either
    /// `{"error": msg}` or `{"errors": {...}}` for field-keyed failures.
    pub fn json_body(&self) -> serde_json::Value {
        match self {
            OldbError::Validation { errors } => serde_json::json!({ "errors": errors }),
            OldbError::SearchParse(e) => serde_json::json!({ "errors": e.errors }),
            other => serde_json::json!({ "error": other.to_string() }),
        }
    }

    /// Build a single-field validation error.
    pub fn invalid(field: &str, message: &str) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.to_string(), message.to_string());
        OldbError::Validation { errors }
    }
}

/// Result type alias for OLDB operations.
pub type Result<T> = std::result::Result<T, OldbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(OldbError::NotNew.status_code(), 400);
        assert_eq!(OldbError::Unauthenticated.status_code(), 401);
        assert_eq!(OldbError::ReadOnlyMode.status_code(), 403);
        assert_eq!(OldbError::Unauthorized { referent: None }.status_code(), 403);
        assert_eq!(OldbError::ReadOnlyResource.status_code(), 404);
        assert_eq!(
            OldbError::NotFound { kind: "phonology", id: 3 }.status_code(),
            404
        );
    }

    #[test]
    fn test_messages_are_stable() {
        assert_eq!(
            OldbError::NotFound { kind: "phonology", id: 3 }.to_string(),
            "There is no phonology with id 3"
        );
        assert_eq!(
            OldbError::NotNew.to_string(),
            "The update request failed because the submitted data were not new."
        );
        assert_eq!(
            OldbError::ReadOnlyResource.to_string(),
            "This resource is read-only."
        );
        assert_eq!(
            OldbError::ToolNotInstalled("TGrep2").to_string(),
            "TGrep2 is not installed."
        );
    }

    #[test]
    fn test_json_bodies() {
        let e = OldbError::invalid("name", "Please enter a value");
        let body = e.json_body();
        assert_eq!(body["errors"]["name"], "Please enter a value");
        let e = OldbError::NotWrittenToFile(7);
        assert_eq!(
            e.json_body()["error"],
            "Corpus 7 has not been written to file as a treebank."
        );
    }
}
