//! Network allocation lookups.
//!
//! Binding allocations to a server happens inside the server create
//! transaction (see `servers.rs`); this store only answers read queries.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::DbError;

/// A reservable (node, ip, port) tuple.
#[derive(Debug, Clone)]
pub struct Allocation {
    pub id: i32,
    pub node_id: i32,
    pub ip: String,
    pub port: i32,
    pub alias: Option<String>,
    pub server_id: Option<i32>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for Allocation {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            node_id: row.try_get("node_id")?,
            ip: row.try_get("ip")?,
            port: row.try_get("port")?,
            alias: row.try_get("alias")?,
            server_id: row.try_get("server_id")?,
        })
    }
}

/// Read access to the allocation table.
#[async_trait]
pub trait AllocationStore: Send + Sync {
    /// The node owning an allocation, if the allocation exists.
    async fn node_id_for(&self, allocation_id: i32) -> Result<Option<i32>, DbError>;

    /// Fetch a batch of allocations by id. Missing ids are simply absent from
    /// the result; callers compare lengths when that matters.
    async fn get_many(&self, allocation_ids: &[i32]) -> Result<Vec<Allocation>, DbError>;
}

/// Postgres-backed allocation store.
#[derive(Clone)]
pub struct PgAllocationStore {
    pool: PgPool,
}

impl PgAllocationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AllocationStore for PgAllocationStore {
    async fn node_id_for(&self, allocation_id: i32) -> Result<Option<i32>, DbError> {
        sqlx::query_scalar::<_, i32>("SELECT node_id FROM allocations WHERE id = $1")
            .bind(allocation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Query)
    }

    async fn get_many(&self, allocation_ids: &[i32]) -> Result<Vec<Allocation>, DbError> {
        sqlx::query_as::<_, Allocation>(
            "SELECT * FROM allocations WHERE id = ANY($1) ORDER BY id",
        )
        .bind(allocation_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)
    }
}
