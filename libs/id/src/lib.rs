//! # roost-id
//!
//! Server identity types, parsing, and validation for the roost panel.
//!
//! ## Design Principles
//!
//! - Identities are stable and system-generated; names are user-controlled labels
//! - All identities have a canonical string representation with strict parsing
//! - Identities support roundtrip serialization (parse → format → parse)
//!
//! ## Identity Format
//!
//! A server is identified by a UUID pair: a random version-4 UUID in its
//! canonical lowercase hyphenated form, plus a short handle derived from it
//! (the first 8 hex characters).
//!
//! Example:
//! - full: `6f2a9c8e-1d43-4b7a-9f3e-0c5d2b8a7e61`
//! - short: `6f2a9c8e`
//!
//! The short form exists purely for humans (volume paths, CLI output); the
//! pair is treated as one identity and uniqueness is checked on both forms
//! together.

mod error;
mod server_uuid;

pub use error::IdError;
pub use server_uuid::{ServerUuid, SHORT_LEN};

/// Re-export uuid for consumers that need raw UUID operations
pub use uuid::Uuid;
