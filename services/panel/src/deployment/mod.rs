//! Automatic placement: finding a node and an allocation for a new server.
//!
//! Placement is a two stage pipeline. Node resolution narrows the fleet to
//! nodes with enough headroom in the requested locations; allocation
//! selection then picks one free allocation on those nodes. A failure at
//! either stage aborts placement entirely; the stages never interleave
//! retries.

mod allocation_selection;
mod viable_nodes;

pub use allocation_selection::AllocationSelection;
pub use viable_nodes::FindViableNodes;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::Allocation;

/// Errors from the placement pipeline.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// No node in the requested locations has enough memory and disk
    /// headroom, including the configured overallocation percentages.
    #[error("no viable node satisfies the deployment requirements")]
    NoViableNode,

    /// Viable nodes exist but none of them has a free allocation matching
    /// the requested ports and dedicated-ip constraint.
    #[error("no viable allocation satisfies the deployment requirements")]
    NoViableAllocation,

    /// A port entry could not be parsed or is outside the allowed range.
    #[error("invalid port specification: {0}")]
    InvalidPorts(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Stage one: locations and resource minimums to candidate node ids.
#[async_trait]
pub trait NodeFinder: Send + Sync {
    /// Returns the ids of nodes that can fit a server of the given size.
    /// An empty `locations` slice means any location.
    async fn viable_nodes(
        &self,
        locations: &[i32],
        disk: i64,
        memory: i64,
    ) -> Result<Vec<i32>, PlacementError>;
}

/// Stage two: candidate nodes plus port constraints to one free allocation.
#[async_trait]
pub trait AllocationSelector: Send + Sync {
    /// Picks a single unassigned allocation on one of the candidate nodes.
    ///
    /// `ports` entries are either single ports (`"25565"`) or inclusive
    /// ranges (`"25565-25570"`); an empty list matches any port. When
    /// `dedicated` is set, only allocations on an ip with no other assigned
    /// allocation qualify.
    async fn select(
        &self,
        nodes: &[i32],
        ports: &[String],
        dedicated: bool,
    ) -> Result<Allocation, PlacementError>;
}
