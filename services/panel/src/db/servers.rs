//! The server record store.
//!
//! Server creation is the one multi-statement write in the panel: the record
//! insert, the allocation binds, and the variable rows must land atomically
//! or not at all. Everything else here is plain lookups.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roost_id::ServerUuid;
use sqlx::{PgPool, QueryBuilder};

use crate::db::DbError;

/// A durable server record.
#[derive(Debug, Clone)]
pub struct Server {
    pub id: i32,
    pub external_id: Option<String>,
    pub uuid: ServerUuid,
    pub uuid_short: String,
    pub node_id: i32,
    pub name: String,
    pub description: String,
    pub skip_scripts: bool,
    pub suspended: bool,
    pub owner_id: i32,
    pub memory: i64,
    pub swap: i64,
    pub disk: i64,
    pub io: i16,
    pub cpu: i32,
    pub threads: Option<String>,
    pub oom_disabled: bool,
    pub allocation_id: i32,
    pub nest_id: i32,
    pub egg_id: i32,
    pub startup: String,
    pub image: String,
    pub database_limit: i32,
    pub allocation_limit: i32,
    pub backup_limit: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for Server {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            external_id: row.try_get("external_id")?,
            uuid: ServerUuid::from_uuid(row.try_get("uuid")?),
            uuid_short: row.try_get("uuid_short")?,
            node_id: row.try_get("node_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            skip_scripts: row.try_get("skip_scripts")?,
            suspended: row.try_get("suspended")?,
            owner_id: row.try_get("owner_id")?,
            memory: row.try_get("memory")?,
            swap: row.try_get("swap")?,
            disk: row.try_get("disk")?,
            io: row.try_get("io")?,
            cpu: row.try_get("cpu")?,
            threads: row.try_get("threads")?,
            oom_disabled: row.try_get("oom_disabled")?,
            allocation_id: row.try_get("allocation_id")?,
            nest_id: row.try_get("nest_id")?,
            egg_id: row.try_get("egg_id")?,
            startup: row.try_get("startup")?,
            image: row.try_get("image")?,
            database_limit: row.try_get("database_limit")?,
            allocation_limit: row.try_get("allocation_limit")?,
            backup_limit: row.try_get("backup_limit")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// One variable row to write alongside a new server.
#[derive(Debug, Clone)]
pub struct VariableAssignment {
    pub variable_id: i32,
    pub value: String,
}

/// Everything needed to create a server record in one transaction.
///
/// Field defaults (empty description, suspended=false, oom_disabled=true,
/// zeroed feature limits) are applied by the orchestrator before this struct
/// is built; the store writes exactly what it is given.
#[derive(Debug, Clone)]
pub struct NewServer {
    pub external_id: Option<String>,
    pub uuid: ServerUuid,
    pub node_id: i32,
    pub name: String,
    pub description: String,
    pub skip_scripts: bool,
    pub owner_id: i32,
    pub memory: i64,
    pub swap: i64,
    pub disk: i64,
    pub io: i16,
    pub cpu: i32,
    pub threads: Option<String>,
    pub oom_disabled: bool,
    pub allocation_id: i32,
    pub additional_allocation_ids: Vec<i32>,
    pub nest_id: i32,
    pub egg_id: i32,
    pub startup: String,
    pub image: String,
    pub database_limit: i32,
    pub allocation_limit: i32,
    pub backup_limit: i32,
    pub variables: Vec<VariableAssignment>,
}

/// Durable storage for server records.
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// True when a server already uses either half of the uuid pair. The
    /// short form is derived from the full form but could collide
    /// independently, so both are checked together.
    async fn uuid_combo_exists(&self, uuid: &str, uuid_short: &str) -> Result<bool, DbError>;

    /// Insert the server record, bind its allocations, and write its variable
    /// rows in a single transaction. No partial state survives a failure.
    async fn create_server(&self, server: NewServer) -> Result<Server, DbError>;

    /// Look up a server by its full uuid.
    async fn find_by_uuid(&self, uuid: &str) -> Result<Option<Server>, DbError>;

    /// Remove a server record, its variable rows, and its allocation binds in
    /// a single transaction.
    async fn delete_server(&self, server_id: i32) -> Result<(), DbError>;
}

/// Postgres-backed server store.
#[derive(Clone)]
pub struct PgServerStore {
    pool: PgPool,
}

impl PgServerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServerStore for PgServerStore {
    async fn uuid_combo_exists(&self, uuid: &str, uuid_short: &str) -> Result<bool, DbError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM servers WHERE uuid::TEXT = $1 OR uuid_short = $2)",
        )
        .bind(uuid)
        .bind(uuid_short)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::Query)
    }

    async fn create_server(&self, server: NewServer) -> Result<Server, DbError> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        let record = sqlx::query_as::<_, Server>(
            r#"
            INSERT INTO servers (
                external_id, uuid, uuid_short, node_id, name, description,
                skip_scripts, suspended, owner_id, memory, swap, disk, io, cpu,
                threads, oom_disabled, allocation_id, nest_id, egg_id, startup,
                image, database_limit, allocation_limit, backup_limit
            )
            VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, FALSE, $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18, $19,
                $20, $21, $22, $23
            )
            RETURNING *
            "#,
        )
        .bind(&server.external_id)
        .bind(server.uuid.uuid())
        .bind(server.uuid.short())
        .bind(server.node_id)
        .bind(&server.name)
        .bind(&server.description)
        .bind(server.skip_scripts)
        .bind(server.owner_id)
        .bind(server.memory)
        .bind(server.swap)
        .bind(server.disk)
        .bind(server.io)
        .bind(server.cpu)
        .bind(&server.threads)
        .bind(server.oom_disabled)
        .bind(server.allocation_id)
        .bind(server.nest_id)
        .bind(server.egg_id)
        .bind(&server.startup)
        .bind(&server.image)
        .bind(server.database_limit)
        .bind(server.allocation_limit)
        .bind(server.backup_limit)
        .fetch_one(&mut *tx)
        .await
        .map_err(DbError::Query)?;

        // Primary and additional allocations are stamped in one statement;
        // the server_id IS NULL guard makes a concurrent steal visible as a
        // short row count.
        let mut allocation_ids = vec![server.allocation_id];
        allocation_ids.extend(&server.additional_allocation_ids);
        allocation_ids.sort_unstable();
        allocation_ids.dedup();

        let bound = sqlx::query(
            "UPDATE allocations SET server_id = $1 WHERE id = ANY($2) AND server_id IS NULL",
        )
        .bind(record.id)
        .bind(&allocation_ids)
        .execute(&mut *tx)
        .await
        .map_err(DbError::Query)?
        .rows_affected();

        if bound != allocation_ids.len() as u64 {
            // Dropping the transaction rolls everything back.
            return Err(DbError::AllocationsUnavailable {
                requested: allocation_ids.len(),
                bound,
            });
        }

        // Empty validated set means no rows at all, never an empty-valued row.
        if !server.variables.is_empty() {
            let mut builder = QueryBuilder::new(
                "INSERT INTO server_variables (server_id, variable_id, variable_value) ",
            );
            builder.push_values(server.variables.iter(), |mut b, variable| {
                b.push_bind(record.id)
                    .push_bind(variable.variable_id)
                    .push_bind(&variable.value);
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(DbError::Query)?;
        }

        tx.commit().await.map_err(DbError::Query)?;

        Ok(record)
    }

    async fn find_by_uuid(&self, uuid: &str) -> Result<Option<Server>, DbError> {
        sqlx::query_as::<_, Server>("SELECT * FROM servers WHERE uuid::TEXT = $1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Query)
    }

    async fn delete_server(&self, server_id: i32) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        sqlx::query("UPDATE allocations SET server_id = NULL WHERE server_id = $1")
            .bind(server_id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::Query)?;

        sqlx::query("DELETE FROM server_variables WHERE server_id = $1")
            .bind(server_id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::Query)?;

        sqlx::query("DELETE FROM servers WHERE id = $1")
            .bind(server_id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::Query)?;

        tx.commit().await.map_err(DbError::Query)
    }
}
