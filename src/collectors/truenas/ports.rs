//! TrueNAS port pipeline.
//!
//! 1. Declared container bindings (`docker ps --format`).
//! 2. OS sockets (`ss -tulpn`, falling back to `netstat`).
//! 3. PID → container map from `docker inspect --format` over running containers.
//! 4. PID → container map for host-network containers from `docker top`.
//! 5. Merge: declared bindings win; leftovers are re-owned by direct PID,
//!    host-network PID, self-attribution, then the well-known service table.
//!    The UDP filter is applied last.

use crate::collectors::reconcile::{
    enhance_known_ports, fill_created, find_container, keep_port, merge_declared,
};
use crate::error::Result;
use crate::host::Host;
use crate::model::{dedup_ports, AppStatus, Application, ContainerRef, PortEntry};
use crate::parsers::docker::{parse_pid_map, parse_ps_ports, parse_top, PID_FORMAT, PORTS_FORMAT};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::containers::uses_host_network;

pub const SYSTEM_PORTS_CACHE_KEY: &str = "systemPorts";
pub const SYSTEM_PORTS_TTL: Duration = Duration::from_secs(30);
pub const HOST_NETWORK_PIDS_CACHE_KEY: &str = "hostNetworkPids";
pub const HOST_NETWORK_PIDS_TTL: Duration = Duration::from_secs(120);

/// Wrapper processes whose PIDs say nothing about which service listens.
const SHELL_WRAPPERS: [&str; 2] = ["sh", "bash"];

pub type PidMap = HashMap<u32, ContainerRef>;

/// Settings that shape the merge stage.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub include_udp: bool,
    pub self_port: Option<u16>,
    pub self_container: Option<ContainerRef>,
}

pub async fn declared_ports(host: &dyn Host) -> Result<Vec<PortEntry>> {
    let output = host.run("docker", &["ps", "--format", PORTS_FORMAT]).await?;
    Ok(parse_ps_ports(&output))
}

/// PID of each running container's main process.
pub async fn pid_container_map(host: &dyn Host, containers: &[ContainerRef]) -> Result<PidMap> {
    let ids = host.run("docker", &["ps", "-q"]).await?;
    let ids: Vec<&str> = ids.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if ids.is_empty() {
        return Ok(PidMap::new());
    }

    let mut args = vec!["inspect", "--format", PID_FORMAT];
    args.extend(ids.iter().copied());
    let output = host.run("docker", &args).await?;

    let mut map = parse_pid_map(&output);
    for container in map.values_mut() {
        if let Some(known) = find_container(containers, &container.id) {
            container.image = known.image.clone();
            container.created = known.created.clone();
        }
    }
    Ok(map)
}

/// Every non-shell process inside running host-network containers.
pub async fn host_network_pids(host: &dyn Host, apps: &[Application]) -> PidMap {
    let targets: Vec<ContainerRef> = apps
        .iter()
        .filter(|app| app.status == AppStatus::Running && uses_host_network(app))
        .map(Application::as_container_ref)
        .collect();
    if targets.is_empty() {
        return PidMap::new();
    }
    debug!(containers = targets.len(), "Collecting host-network PIDs");

    let probes = targets.iter().map(|container| async move {
        match host
            .run("docker", &["top", container.id.as_str(), "-eo", "pid,comm"])
            .await
        {
            Ok(output) => parse_top(&output)
                .into_iter()
                .filter(|(_, command)| !SHELL_WRAPPERS.contains(&command.as_str()))
                .map(|(pid, _)| (pid, container.clone()))
                .collect(),
            Err(e) => {
                debug!("docker top {} failed: {}", container.name, e);
                Vec::new()
            }
        }
    });

    join_all(probes).await.into_iter().flatten().collect()
}

/// The container this process runs in, looked up by name.
pub async fn self_container(host: &dyn Host, name: &str) -> Option<ContainerRef> {
    let filter = format!("name={}", name);
    let output = host
        .run(
            "docker",
            &["ps", "--filter", filter.as_str(), "--format", "{{.ID}}::{{.Names}}::{{.Image}}"],
        )
        .await
        .ok()?;
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut parts = line.splitn(3, "::");
    Some(ContainerRef {
        id: parts.next()?.to_string(),
        name: parts.next()?.to_string(),
        image: parts.next().unwrap_or_default().to_string(),
        created: None,
    })
}

/// Stage five: merge every source into one list.
pub fn merge_ports(
    declared: Vec<PortEntry>,
    system: Vec<PortEntry>,
    pid_map: &PidMap,
    host_pids: &PidMap,
    containers: &[ContainerRef],
    options: &MergeOptions,
) -> Vec<PortEntry> {
    let (mut ports, leftovers) = merge_declared(declared, system);
    let first_system = ports.len();

    for mut port in leftovers {
        let by_pid = port
            .pid
            .and_then(|pid| pid_map.get(&pid).or_else(|| host_pids.get(&pid)));
        if let Some(container) = by_pid {
            port.attribute_to_container(container);
        } else if let (Some(self_port), Some(own)) = (options.self_port, &options.self_container) {
            if port.host_port == self_port {
                debug!(port = self_port, "Attributing own listening port");
                port.attribute_to_container(own);
            }
        }
        ports.push(port);
    }

    enhance_known_ports(&mut ports[first_system..], containers);
    ports.retain(|p| keep_port(p, options.include_udp));
    fill_created(&mut ports, containers);

    let ports = dedup_ports(ports);
    info!(ports = ports.len(), "TrueNAS ports reconciled");
    ports
}
