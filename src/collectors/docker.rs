//! Docker collector.
//!
//! Applications are the containers from `docker ps -a`. Ports come from three
//! independent probes that are reconciled into one list:
//!
//! 1. declared bindings from `docker ps` port strings
//! 2. in-container PIDs of host-network containers (`docker inspect` + `docker top`)
//! 3. OS listening sockets
//!
//! A declared binding always wins. Remaining OS sockets are attributed to a
//! container by PID, then by `docker ps --filter publish=<port>`, then by
//! matching the process name against container names and images.

use super::reconcile::{fill_created, find_container, match_by_process_name, merge_declared};
use super::system::{collect_listening_ports, host_facts};
use super::{Collector, DetectionInfo};
use crate::config::CollectorConfig;
use crate::error::{DiscoveryError, Result};
use crate::host::Host;
use crate::model::{
    dedup_ports, AppStatus, Application, ContainerRef, Platform, PortEntry, SystemInfo, Vm,
};
use crate::parsers::docker::{
    normalize_created, parse_info, parse_network_mode, parse_ps_json_lines, parse_ps_ports,
    parse_top, PsRecord, JSON_FORMAT, NETWORK_FORMAT, PORTS_FORMAT,
};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const SOCKET_SCORE: u32 = 50;
pub const CLI_SCORE: u32 = 40;

pub struct DockerCollector {
    host: Arc<dyn Host>,
    config: CollectorConfig,
    detection: Option<DetectionInfo>,
}

impl DockerCollector {
    pub fn new(config: CollectorConfig, host: Arc<dyn Host>) -> Self {
        Self {
            host,
            config,
            detection: None,
        }
    }

    async fn running_containers(&self) -> Result<Vec<PsRecord>> {
        let output = self
            .host
            .run("docker", &["ps", "--format", JSON_FORMAT])
            .await?;
        Ok(parse_ps_json_lines(&output))
    }

    async fn declared_ports(&self) -> Result<Vec<PortEntry>> {
        let output = self
            .host
            .run("docker", &["ps", "--format", PORTS_FORMAT])
            .await?;
        Ok(parse_ps_ports(&output))
    }

    /// PID → container for every process inside a host-network container.
    async fn host_network_pids(&self, containers: &[ContainerRef]) -> HashMap<u32, ContainerRef> {
        let probes = containers.iter().map(|container| async move {
            let mode = match self
                .host
                .run("docker", &["inspect", "--format", NETWORK_FORMAT, container.id.as_str()])
                .await
            {
                Ok(output) => parse_network_mode(&output).0,
                Err(e) => {
                    debug!("Inspect of {} failed: {}", container.name, e);
                    return Vec::new();
                }
            };
            if mode != "host" {
                return Vec::new();
            }
            match self
                .host
                .run("docker", &["top", container.id.as_str(), "-eo", "pid,comm"])
                .await
            {
                Ok(output) => parse_top(&output)
                    .into_iter()
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

    async fn container_publishing(&self, port: u16) -> Option<(String, String)> {
        let filter = format!("publish={}", port);
        let output = self
            .host
            .run(
                "docker",
                &["ps", "--filter", filter.as_str(), "--format", "{{.ID}}::{{.Names}}"],
            )
            .await
            .ok()?;
        let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
        let (id, name) = line.split_once("::")?;
        Some((id.to_string(), name.to_string()))
    }

    /// Attribute OS sockets that no declared binding covers.
    pub async fn reconcile(
        &self,
        declared: Vec<PortEntry>,
        system: Vec<PortEntry>,
        pid_map: &HashMap<u32, ContainerRef>,
        containers: &[ContainerRef],
    ) -> Vec<PortEntry> {
        let (mut ports, leftovers) = merge_declared(declared, system);

        for mut port in leftovers {
            if let Some(container) = port.pid.and_then(|pid| pid_map.get(&pid)) {
                debug!(port = port.host_port, container = %container.name, "Host-network PID match");
                port.attribute_to_container(container);
            } else if let Some((id, name)) = self.container_publishing(port.host_port).await {
                let container = find_container(containers, &id).cloned().unwrap_or(ContainerRef {
                    id,
                    name,
                    ..Default::default()
                });
                port.attribute_to_container(&container);
            } else if let Some(container) = match_by_process_name(&port.owner, containers) {
                debug!(port = port.host_port, container = %container.name, "Process name match");
                port.attribute_to_container(container);
            }
            ports.push(port);
        }

        fill_created(&mut ports, containers);
        dedup_ports(ports)
    }
}

#[async_trait]
impl Collector for DockerCollector {
    fn platform(&self) -> Platform {
        Platform::Docker
    }

    async fn is_compatible(&self) -> Result<u32> {
        if self
            .host
            .is_socket(Path::new(&self.config.docker_socket))
            .await
        {
            return Ok(SOCKET_SCORE);
        }
        match self
            .host
            .run("docker", &["version", "--format", "{{.Server.Version}}"])
            .await
        {
            Ok(_) => Ok(CLI_SCORE),
            Err(e) => {
                debug!("docker CLI unavailable: {}", e);
                Ok(0)
            }
        }
    }

    async fn system_info(&self) -> Result<SystemInfo> {
        let docker = self
            .host
            .run("docker", &["info", "--format", JSON_FORMAT])
            .await
            .map_err(DiscoveryError::from)
            .and_then(|output| parse_info(&output).map_err(DiscoveryError::from));
        let facts = host_facts(Platform::Docker).await;

        match (docker, facts) {
            (Ok(docker), facts) => {
                let mut info = SystemInfo::new(
                    docker.name.clone(),
                    format!("Docker {}", docker.server_version),
                    Platform::Docker,
                );
                info.arch = Some(docker.architecture.clone()).filter(|a| !a.is_empty());
                info.cpu_cores = Some(docker.ncpu).filter(|n| *n > 0);
                info.memory_total = Some(docker.mem_total).filter(|m| *m > 0);
                if let Ok(facts) = facts {
                    info.cpu_model = facts.cpu_model;
                    info.memory_free = facts.memory_free;
                    info.uptime_seconds = facts.uptime_seconds;
                    info.cpu_cores = info.cpu_cores.or(facts.cpu_cores);
                }
                info.platform_data.description =
                    format!("Docker host running {}", docker.operating_system);
                let extra = &mut info.platform_data.extra;
                extra.insert("kernelVersion".to_string(), json!(docker.kernel_version));
                extra.insert("osType".to_string(), json!(docker.os_type));
                extra.insert("containers".to_string(), json!(docker.containers));
                extra.insert(
                    "containersRunning".to_string(),
                    json!(docker.containers_running),
                );
                extra.insert("images".to_string(), json!(docker.images));
                Ok(info)
            }
            (Err(e), Ok(mut facts)) => {
                warn!("docker info failed, using host facts: {}", e);
                facts.platform_data.description = "Docker host".to_string();
                Ok(facts)
            }
            (Err(e), Err(_)) => Err(e),
        }
    }

    async fn applications(&self) -> Result<Vec<Application>> {
        let output = self
            .host
            .run("docker", &["ps", "-a", "--format", JSON_FORMAT])
            .await?;
        Ok(parse_ps_json_lines(&output)
            .iter()
            .map(application_from_ps)
            .collect())
    }

    async fn ports(&self) -> Result<Vec<PortEntry>> {
        let (declared, running, system) = tokio::join!(
            self.declared_ports(),
            self.running_containers(),
            collect_listening_ports(self.host.as_ref()),
        );

        if let (Err(declared_err), Err(system_err)) = (&declared, &system) {
            warn!("Both declared and OS port probes failed: {}", system_err);
            return Err(DiscoveryError::Parse(format!(
                "no port source available: {}; {}",
                declared_err, system_err
            )));
        }

        let declared = declared.unwrap_or_else(|e| {
            warn!("Declared port probe failed: {}", e);
            Vec::new()
        });
        let system = system.unwrap_or_else(|e| {
            warn!("OS port probe failed: {}", e);
            Vec::new()
        });
        let containers: Vec<ContainerRef> = running
            .unwrap_or_else(|e| {
                warn!("Listing running containers failed: {}", e);
                Vec::new()
            })
            .iter()
            .map(container_ref_from_ps)
            .collect();

        let pid_map = self.host_network_pids(&containers).await;
        let ports = self.reconcile(declared, system, &pid_map, &containers).await;
        info!(ports = ports.len(), "Docker ports reconciled");
        Ok(ports)
    }

    async fn vms(&self) -> Result<Vec<Vm>> {
        Ok(Vec::new())
    }

    fn set_detection_info(&mut self, info: DetectionInfo) {
        self.detection = Some(info);
    }

    fn detection_info(&self) -> Option<&DetectionInfo> {
        self.detection.as_ref()
    }
}

fn first_name(names: &str) -> &str {
    names.split(',').next().unwrap_or(names).trim()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn container_ref_from_ps(record: &PsRecord) -> ContainerRef {
    ContainerRef {
        id: record.id.clone(),
        name: first_name(&record.names).to_string(),
        image: record.image.clone(),
        created: normalize_created(&record.created_at),
    }
}

pub fn application_from_ps(record: &PsRecord) -> Application {
    let state = if record.state.is_empty() {
        &record.status
    } else {
        &record.state
    };
    let mut app = Application::new(
        record.id.clone(),
        first_name(&record.names),
        Platform::Docker,
    );
    app.status = AppStatus::from_container_state(state);
    app.image = Some(record.image.clone()).filter(|i| !i.is_empty());
    app.created = normalize_created(&record.created_at);
    app.platform_data = json!({
        "status": record.status,
        "command": record.command,
        "ports": record.ports,
        "networks": split_list(&record.networks),
        "mounts": split_list(&record.mounts),
        "labels": record.labels,
    });
    app
}
