//! Core data structures and types shared by every subsystem.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{OldbError, Result, SearchParseError};
pub use types::{new_attempt, new_uuid, normalize, now, Id, Role};
