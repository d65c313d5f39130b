//! Stage two of placement: picking a free allocation on a candidate node.

use async_trait::async_trait;
use sqlx::{PgPool, QueryBuilder};
use tracing::debug;

use super::{AllocationSelector, PlacementError};
use crate::db::Allocation;

/// Deploy-time ports live outside the privileged range; anything below this
/// is reserved for node-level services.
const PORT_FLOOR: i32 = 1024;
const PORT_CEIL: i32 = 65535;

/// A single port range is capped to keep the generated predicate sane.
const MAX_RANGE_SPAN: i32 = 1000;

/// A parsed port constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PortSpec {
    Single(i32),
    Range(i32, i32),
}

/// Selects one unassigned allocation on one of the candidate nodes.
pub struct AllocationSelection {
    pool: PgPool,
}

impl AllocationSelection {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AllocationSelector for AllocationSelection {
    async fn select(
        &self,
        nodes: &[i32],
        ports: &[String],
        dedicated: bool,
    ) -> Result<Allocation, PlacementError> {
        let specs = parse_ports(ports)?;

        let mut builder = QueryBuilder::new(
            "SELECT a.id, a.node_id, a.ip, a.port, a.alias, a.server_id \
             FROM allocations a \
             WHERE a.server_id IS NULL AND a.node_id = ANY(",
        );
        builder.push_bind(nodes).push(")");

        if !specs.is_empty() {
            builder.push(" AND (");
            for (i, spec) in specs.iter().enumerate() {
                if i > 0 {
                    builder.push(" OR ");
                }
                match spec {
                    PortSpec::Single(port) => {
                        builder.push("a.port = ").push_bind(*port);
                    }
                    PortSpec::Range(start, end) => {
                        builder
                            .push("a.port BETWEEN ")
                            .push_bind(*start)
                            .push(" AND ")
                            .push_bind(*end);
                    }
                }
            }
            builder.push(")");
        }

        if dedicated {
            builder.push(
                " AND NOT EXISTS (SELECT 1 FROM allocations b \
                 WHERE b.ip = a.ip AND b.server_id IS NOT NULL)",
            );
        }

        builder.push(" ORDER BY random() LIMIT 1");

        let allocation = builder
            .build_query_as::<Allocation>()
            .fetch_optional(&self.pool)
            .await?;

        debug!(
            nodes = nodes.len(),
            ports = ports.len(),
            dedicated,
            found = allocation.is_some(),
            "Allocation selection"
        );

        allocation.ok_or(PlacementError::NoViableAllocation)
    }
}

/// Parses port entries into validated specs.
pub(crate) fn parse_ports(ports: &[String]) -> Result<Vec<PortSpec>, PlacementError> {
    let mut specs = Vec::with_capacity(ports.len());

    for entry in ports {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let spec = match entry.split_once('-') {
            Some((start, end)) => {
                let start = parse_port(start, entry)?;
                let end = parse_port(end, entry)?;
                if start > end {
                    return Err(PlacementError::InvalidPorts(format!(
                        "range '{entry}' is reversed"
                    )));
                }
                if end - start > MAX_RANGE_SPAN {
                    return Err(PlacementError::InvalidPorts(format!(
                        "range '{entry}' spans more than {MAX_RANGE_SPAN} ports"
                    )));
                }
                PortSpec::Range(start, end)
            }
            None => PortSpec::Single(parse_port(entry, entry)?),
        };

        specs.push(spec);
    }

    Ok(specs)
}

fn parse_port(raw: &str, entry: &str) -> Result<i32, PlacementError> {
    let port: i32 = raw
        .trim()
        .parse()
        .map_err(|_| PlacementError::InvalidPorts(format!("'{entry}' is not a port")))?;

    if !(PORT_FLOOR..=PORT_CEIL).contains(&port) {
        return Err(PlacementError::InvalidPorts(format!(
            "port {port} is outside {PORT_FLOOR}-{PORT_CEIL}"
        )));
    }

    Ok(port)
}
