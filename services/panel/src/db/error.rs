//! Database error types.

use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("migration directory not found; tried {tried}. Last error: {last_error}. Run from repo root or services/panel.")]
    MigrationDirNotFound { tried: String, last_error: String },

    /// One or more allocations in a bind batch were already assigned or
    /// missing, so the whole batch was rolled back.
    #[error("could not bind all allocations: requested {requested}, bound {bound}")]
    AllocationsUnavailable { requested: usize, bound: u64 },
}

impl DbError {
    /// True when the error came from a unique constraint violation, e.g. the
    /// uuid pair backstop index on the servers table.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DbError::Query(sqlx::Error::Database(e)) => e.is_unique_violation(),
            _ => false,
        }
    }
}
