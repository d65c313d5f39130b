//! Egg and egg-variable lookups.
//!
//! Eggs are the workload templates; every egg belongs to a nest and carries a
//! set of variable definitions with validation rules.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::DbError;

/// A template-defined configuration variable.
#[derive(Debug, Clone)]
pub struct EggVariable {
    pub id: i32,
    pub egg_id: i32,
    pub name: String,
    /// Environment variable name; the key user-supplied values are matched on.
    pub env_variable: String,
    pub default_value: String,
    pub user_viewable: bool,
    pub user_editable: bool,
    /// Pipe-separated rule list, e.g. `required|integer|max:65535`.
    pub rules: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for EggVariable {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            egg_id: row.try_get("egg_id")?,
            name: row.try_get("name")?,
            env_variable: row.try_get("env_variable")?,
            default_value: row.try_get("default_value")?,
            user_viewable: row.try_get("user_viewable")?,
            user_editable: row.try_get("user_editable")?,
            rules: row.try_get("rules")?,
        })
    }
}

/// Read access to eggs and their variable definitions.
#[async_trait]
pub trait EggStore: Send + Sync {
    /// The nest owning an egg, if the egg exists.
    async fn nest_id_for(&self, egg_id: i32) -> Result<Option<i32>, DbError>;

    /// All variable definitions for an egg, in definition order.
    async fn variables_for(&self, egg_id: i32) -> Result<Vec<EggVariable>, DbError>;
}

/// Postgres-backed egg store.
#[derive(Clone)]
pub struct PgEggStore {
    pool: PgPool,
}

impl PgEggStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EggStore for PgEggStore {
    async fn nest_id_for(&self, egg_id: i32) -> Result<Option<i32>, DbError> {
        sqlx::query_scalar::<_, i32>("SELECT nest_id FROM eggs WHERE id = $1")
            .bind(egg_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Query)
    }

    async fn variables_for(&self, egg_id: i32) -> Result<Vec<EggVariable>, DbError> {
        sqlx::query_as::<_, EggVariable>(
            "SELECT * FROM egg_variables WHERE egg_id = $1 ORDER BY id",
        )
        .bind(egg_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)
    }
}
