//! Stage one of placement: node viability by capacity headroom.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use super::{NodeFinder, PlacementError};

/// Finds nodes with enough memory and disk headroom for a new server.
///
/// Headroom accounts for each node's overallocation percentages: a node with
/// 8 GiB of memory and `memory_overallocate = 50` will accept servers until
/// their combined memory reaches 12 GiB.
pub struct FindViableNodes {
    pool: PgPool,
}

impl FindViableNodes {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NodeFinder for FindViableNodes {
    async fn viable_nodes(
        &self,
        locations: &[i32],
        disk: i64,
        memory: i64,
    ) -> Result<Vec<i32>, PlacementError> {
        let nodes = sqlx::query_scalar::<_, i32>(
            r#"
            SELECT n.id
            FROM nodes n
            LEFT JOIN servers s ON s.node_id = n.id
            WHERE n.public
              AND (cardinality($1::INT4[]) = 0 OR n.location_id = ANY($1))
            GROUP BY n.id
            HAVING COALESCE(SUM(s.memory), 0) + $2 <= n.memory * (1 + n.memory_overallocate / 100.0)
               AND COALESCE(SUM(s.disk), 0) + $3 <= n.disk * (1 + n.disk_overallocate / 100.0)
            ORDER BY n.id
            "#,
        )
        .bind(locations)
        .bind(memory)
        .bind(disk)
        .fetch_all(&self.pool)
        .await?;

        debug!(
            candidates = nodes.len(),
            locations = ?locations,
            memory,
            disk,
            "Resolved viable nodes"
        );

        if nodes.is_empty() {
            return Err(PlacementError::NoViableNode);
        }

        Ok(nodes)
    }
}
