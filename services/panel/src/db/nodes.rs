//! Worker node lookups.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::DbError;

/// A worker node running a provisioning daemon.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: i32,
    pub location_id: i32,
    pub name: String,
    pub fqdn: String,
    /// `http` or `https`; daemons in lab setups often run plain http.
    pub scheme: String,
    pub daemon_listen: i32,
    pub daemon_token: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for Node {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            location_id: row.try_get("location_id")?,
            name: row.try_get("name")?,
            fqdn: row.try_get("fqdn")?,
            scheme: row.try_get("scheme")?,
            daemon_listen: row.try_get("daemon_listen")?,
            daemon_token: row.try_get("daemon_token")?,
        })
    }
}

/// Read access to the node table.
#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn find(&self, node_id: i32) -> Result<Option<Node>, DbError>;
}

/// Postgres-backed node store.
#[derive(Clone)]
pub struct PgNodeStore {
    pool: PgPool,
}

impl PgNodeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NodeStore for PgNodeStore {
    async fn find(&self, node_id: i32) -> Result<Option<Node>, DbError> {
        sqlx::query_as::<_, Node>(
            "SELECT id, location_id, name, fqdn, scheme, daemon_listen, daemon_token FROM nodes WHERE id = $1",
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)
    }
}
