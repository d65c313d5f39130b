//! Renders a committed server record into the daemon creation payload.
//!
//! The payload is built entirely from values the orchestrator already holds
//! at commit time; no re-read of the record is needed between commit and the
//! daemon call.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::db::{Allocation, Server};
use crate::servers::ValidatedVariable;

/// The full configuration the daemon needs to materialize a server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfiguration {
    pub uuid: String,
    pub uuid_short: String,
    pub name: String,
    pub suspended: bool,
    /// The startup command template.
    pub invocation: String,
    pub skip_egg_scripts: bool,
    /// Environment handed to the workload: validated egg variables plus the
    /// panel-injected `SERVER_IP` / `SERVER_PORT` / `SERVER_MEMORY`.
    pub environment: BTreeMap<String, String>,
    pub build: BuildLimits,
    pub container: Container,
    pub allocations: AllocationMappings,
    pub egg: EggRef,
}

/// Resource limits enforced by the daemon.
#[derive(Debug, Clone, Serialize)]
pub struct BuildLimits {
    pub memory_limit: i64,
    pub swap: i64,
    pub io_weight: i16,
    pub cpu_limit: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<String>,
    pub disk_space: i64,
    pub oom_disabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Container {
    pub image: String,
    pub requires_rebuild: bool,
}

/// The network bindings the daemon should expose.
#[derive(Debug, Clone, Serialize)]
pub struct AllocationMappings {
    pub default: AllocationBinding,
    /// ip to list of ports, covering the default and any additional binds.
    pub mappings: BTreeMap<String, Vec<i32>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocationBinding {
    pub ip: String,
    pub port: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EggRef {
    pub id: i32,
    pub nest_id: i32,
}

/// Builds the daemon payload from the committed record and what was bound to
/// it. `additional` must not repeat the primary allocation.
pub fn structure(
    server: &Server,
    primary: &Allocation,
    additional: &[Allocation],
    variables: &[ValidatedVariable],
) -> ServerConfiguration {
    let mut environment: BTreeMap<String, String> = variables
        .iter()
        .map(|v| (v.env_variable.clone(), v.value.clone()))
        .collect();
    environment.insert("SERVER_IP".to_string(), primary.ip.clone());
    environment.insert("SERVER_PORT".to_string(), primary.port.to_string());
    environment.insert("SERVER_MEMORY".to_string(), server.memory.to_string());

    let mut mappings: BTreeMap<String, Vec<i32>> = BTreeMap::new();
    mappings
        .entry(primary.ip.clone())
        .or_default()
        .push(primary.port);
    for allocation in additional {
        mappings
            .entry(allocation.ip.clone())
            .or_default()
            .push(allocation.port);
    }
    for ports in mappings.values_mut() {
        ports.sort_unstable();
        ports.dedup();
    }

    ServerConfiguration {
        uuid: server.uuid.full(),
        uuid_short: server.uuid_short.clone(),
        name: server.name.clone(),
        suspended: server.suspended,
        invocation: server.startup.clone(),
        skip_egg_scripts: server.skip_scripts,
        environment,
        build: BuildLimits {
            memory_limit: server.memory,
            swap: server.swap,
            io_weight: server.io,
            cpu_limit: server.cpu,
            threads: server.threads.clone(),
            disk_space: server.disk,
            oom_disabled: server.oom_disabled,
        },
        container: Container {
            image: server.image.clone(),
            requires_rebuild: false,
        },
        allocations: AllocationMappings {
            default: AllocationBinding {
                ip: primary.ip.clone(),
                port: primary.port,
            },
            mappings,
        },
        egg: EggRef {
            id: server.egg_id,
            nest_id: server.nest_id,
        },
    }
}
