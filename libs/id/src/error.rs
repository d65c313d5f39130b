//! Error types for identity parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating server identities.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The identity string is empty.
    #[error("server uuid cannot be empty")]
    Empty,

    /// The string is not a valid UUID at all.
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),

    /// The string parses as a UUID but is not in the canonical lowercase
    /// hyphenated form used everywhere in the panel and on disk.
    #[error("uuid is not in canonical hyphenated form: {0}")]
    NotCanonical(String),
}
