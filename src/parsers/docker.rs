//! Docker CLI output parsers.
//!
//! # Formats
//!
//! - [`PORTS_FORMAT`] lines: `name:::ports:::id`, where `ports` is Docker's own
//!   comma-separated rendering (`0.0.0.0:8080->80/tcp, :::8080->80/tcp`).
//! - `docker ps --format '{{json .}}'` JSON lines → [`PsRecord`]
//! - `docker inspect <ids...>` JSON array → [`ContainerInspect`]
//! - [`PID_FORMAT`] lines: `pid::id::/name`
//! - `docker top <id> -eo pid,comm` → `(pid, command)` pairs
//! - `docker info --format '{{json .}}'` → [`DockerInfo`]

use crate::model::{normalize_host_ip, ContainerRef, PortEntry, PortSource, PortTarget, Protocol};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

pub const PORTS_FORMAT: &str = "{{.Names}}:::{{.Ports}}:::{{.ID}}";
pub const JSON_FORMAT: &str = "{{json .}}";
pub const PID_FORMAT: &str = "{{.State.Pid}}::{{.Id}}::{{.Name}}";
pub const NETWORK_FORMAT: &str = "{{.HostConfig.NetworkMode}}::{{json .Config.ExposedPorts}}";

/// Upper bound on how many entries a single published range may expand into.
const MAX_RANGE_EXPANSION: usize = 1024;

/// One published port mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub host_ip: String,
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
}

/// Parse Docker's `Ports` column. Exposed-only entries (`80/tcp`) are skipped
/// and published ranges are expanded.
pub fn parse_port_mappings(ports: &str) -> Vec<PortMapping> {
    let mut mappings = Vec::new();

    for item in ports.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((host, container)) = item.split_once("->") else {
            continue;
        };
        let (container_ports, proto) = container.split_once('/').unwrap_or((container, "tcp"));
        let protocol = Protocol::parse_lossy(proto);

        let (host_ip, host_ports) = match host.rsplit_once(':') {
            Some((ip, ports)) => (normalize_host_ip(ip), ports),
            None => ("0.0.0.0".to_string(), host),
        };

        let (Some(host_range), Some(container_range)) =
            (parse_range(host_ports), parse_range(container_ports))
        else {
            debug!("Skipping unparsable docker port mapping: {}", item);
            continue;
        };

        let span = usize::from(host_range.1 - host_range.0) + 1;
        if span > MAX_RANGE_EXPANSION {
            debug!("Skipping oversized docker port range: {}", item);
            continue;
        }

        for offset in 0..span as u16 {
            let container_port = if container_range.0 == container_range.1 {
                container_range.0
            } else {
                container_range.0.saturating_add(offset).min(container_range.1)
            };
            mappings.push(PortMapping {
                host_ip: host_ip.clone(),
                host_port: host_range.0 + offset,
                container_port,
                protocol,
            });
        }
    }

    mappings
}

fn parse_range(value: &str) -> Option<(u16, u16)> {
    match value.split_once('-') {
        Some((start, end)) => {
            let start = start.trim().parse::<u16>().ok()?;
            let end = end.trim().parse::<u16>().ok()?;
            (start <= end).then_some((start, end))
        }
        None => {
            let port = value.trim().parse::<u16>().ok()?;
            Some((port, port))
        }
    }
}

/// Parse output produced with [`PORTS_FORMAT`] into docker-sourced port
/// entries.
pub fn parse_ps_ports(output: &str) -> Vec<PortEntry> {
    let mut entries = Vec::new();

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((name, rest)) = line.split_once(":::") else {
            continue;
        };
        let Some((ports, id)) = rest.rsplit_once(":::") else {
            continue;
        };

        for mapping in parse_port_mappings(ports) {
            entries.push(PortEntry {
                source: PortSource::Docker,
                owner: name.to_string(),
                protocol: mapping.protocol,
                host_ip: mapping.host_ip,
                host_port: mapping.host_port,
                target: Some(PortTarget::Port(mapping.container_port)),
                container_id: Some(id.trim().to_string()),
                vm_id: None,
                app_id: None,
                created: None,
                pid: None,
            });
        }
    }

    entries
}

/// A row of `docker ps --format '{{json .}}'`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PsRecord {
    #[serde(rename = "ID")]
    pub id: String,
    pub names: String,
    pub image: String,
    pub command: String,
    pub created_at: String,
    pub ports: String,
    pub state: String,
    pub status: String,
    pub networks: String,
    pub mounts: String,
    pub labels: String,
}

pub fn parse_ps_json_lines(output: &str) -> Vec<PsRecord> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .filter_map(|line| match serde_json::from_str::<PsRecord>(line) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Skipping malformed docker ps line: {}", e);
                None
            }
        })
        .collect()
}

/// Subset of `docker inspect` output the collectors use.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerInspect {
    pub id: String,
    pub name: String,
    pub created: Option<String>,
    pub state: InspectState,
    pub config: InspectConfig,
    pub host_config: InspectHostConfig,
    pub network_settings: InspectNetworkSettings,
    pub mounts: Vec<InspectMount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InspectState {
    pub status: String,
    pub running: bool,
    pub paused: bool,
    pub restarting: bool,
    pub pid: u32,
    pub started_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InspectConfig {
    pub image: String,
    pub exposed_ports: Option<HashMap<String, Value>>,
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InspectHostConfig {
    pub network_mode: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InspectNetworkSettings {
    pub networks: Option<HashMap<String, Value>>,
    pub ports: Option<HashMap<String, Option<Vec<InspectPortBinding>>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InspectPortBinding {
    pub host_ip: String,
    pub host_port: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InspectMount {
    #[serde(rename = "Type")]
    pub kind: String,
    pub source: String,
    pub destination: String,
    #[serde(rename = "RW")]
    pub rw: bool,
}

impl ContainerInspect {
    pub fn clean_name(&self) -> String {
        self.name.trim_start_matches('/').to_string()
    }

    pub fn uses_host_network(&self) -> bool {
        self.host_config.network_mode == "host"
    }

    pub fn network_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .network_settings
            .networks
            .as_ref()
            .map(|n| n.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn as_container_ref(&self) -> ContainerRef {
        ContainerRef {
            id: self.id.clone(),
            name: self.clean_name(),
            image: self.config.image.clone(),
            created: self.created.clone(),
        }
    }

    /// Port bindings declared in `NetworkSettings.Ports`.
    pub fn published_ports(&self) -> Vec<PortEntry> {
        let mut entries = Vec::new();
        let Some(ports) = &self.network_settings.ports else {
            return entries;
        };
        for (spec, bindings) in ports {
            let (container_port, proto) = spec.split_once('/').unwrap_or((spec.as_str(), "tcp"));
            let Ok(container_port) = container_port.parse::<u16>() else {
                continue;
            };
            for binding in bindings.iter().flatten() {
                let Ok(host_port) = binding.host_port.parse::<u16>() else {
                    continue;
                };
                let mut entry = PortEntry::system(
                    self.clean_name(),
                    Protocol::parse_lossy(proto),
                    &binding.host_ip,
                    host_port,
                );
                entry.source = PortSource::Docker;
                entry.target = Some(PortTarget::Port(container_port));
                entry.container_id = Some(self.id.clone());
                entry.created = self.created.clone();
                entries.push(entry);
            }
        }
        entries.sort_by_key(|e| e.host_port);
        entries
    }
}

pub fn parse_inspect(output: &str) -> serde_json::Result<Vec<ContainerInspect>> {
    serde_json::from_str(output.trim())
}

/// Parse [`PID_FORMAT`] lines into a PID → container map. Stopped containers
/// report PID 0 and are skipped.
pub fn parse_pid_map(output: &str) -> HashMap<u32, ContainerRef> {
    let mut map = HashMap::new();
    for line in output.lines().map(str::trim) {
        let mut parts = line.splitn(3, "::");
        let (Some(pid), Some(id), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let Ok(pid) = pid.trim().parse::<u32>() else {
            continue;
        };
        if pid == 0 {
            continue;
        }
        map.insert(
            pid,
            ContainerRef {
                id: id.trim().to_string(),
                name: name.trim().trim_start_matches('/').to_string(),
                ..Default::default()
            },
        );
    }
    map
}

/// Parse `docker top <id> -eo pid,comm`. The header row is skipped.
pub fn parse_top(output: &str) -> Vec<(u32, String)> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let pid = tokens.next()?.parse::<u32>().ok()?;
            let command = tokens.collect::<Vec<_>>().join(" ");
            Some((pid, command))
        })
        .collect()
}

/// Parse [`NETWORK_FORMAT`] output: network mode plus exposed port specs.
pub fn parse_network_mode(output: &str) -> (String, Vec<String>) {
    let line = output.trim();
    let (mode, exposed) = line.split_once("::").unwrap_or((line, "null"));
    let mut ports: Vec<String> = serde_json::from_str::<Option<HashMap<String, Value>>>(exposed)
        .ok()
        .flatten()
        .map(|m| m.into_keys().collect())
        .unwrap_or_default();
    ports.sort();
    (mode.trim().to_string(), ports)
}

/// Subset of `docker info --format '{{json .}}'`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DockerInfo {
    pub name: String,
    pub server_version: String,
    pub operating_system: String,
    #[serde(rename = "OSType")]
    pub os_type: String,
    pub kernel_version: String,
    pub architecture: String,
    #[serde(rename = "NCPU")]
    pub ncpu: usize,
    pub mem_total: u64,
    pub containers: u64,
    pub containers_running: u64,
    pub images: u64,
}

pub fn parse_info(output: &str) -> serde_json::Result<DockerInfo> {
    serde_json::from_str(output.trim())
}

/// Convert `docker ps` `CreatedAt` (`2024-05-01 10:00:00 +0000 UTC`) or an
/// inspect `Created` value into RFC 3339.
pub fn normalize_created(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(value) {
        return Some(ts.to_rfc3339());
    }
    let head: Vec<&str> = value.split_whitespace().take(3).collect();
    chrono::DateTime::parse_from_str(&head.join(" "), "%Y-%m-%d %H:%M:%S %z")
        .ok()
        .map(|ts| ts.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_mapping_line() {
        let entries = parse_ps_ports("web:::0.0.0.0:8080->80/tcp:::abc123");
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.owner, "web");
        assert_eq!(e.host_ip, "0.0.0.0");
        assert_eq!(e.host_port, 8080);
        assert_eq!(e.target, Some(PortTarget::Port(80)));
        assert_eq!(e.protocol, Protocol::Tcp);
        assert_eq!(e.container_id.as_deref(), Some("abc123"));
        assert_eq!(e.source, PortSource::Docker);
    }

    #[test]
    fn ipv6_and_multiple_mappings() {
        let line = "dns:::0.0.0.0:53->53/udp, :::53->53/udp, 127.0.0.1:8053->80/tcp:::def456";
        let entries = parse_ps_ports(line);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].host_ip, "0.0.0.0");
        assert_eq!(entries[1].protocol, Protocol::Udp);
        assert_eq!(entries[2].host_ip, "127.0.0.1");
        assert_eq!(entries[2].host_port, 8053);
    }

    #[test]
    fn unpublished_ports_and_empty_columns_are_skipped() {
        let output = "redis:::6379/tcp:::aaa\nidle::::::bbb\n";
        assert!(parse_ps_ports(output).is_empty());
    }

    #[test]
    fn ranges_expand_per_port() {
        let mappings = parse_port_mappings("0.0.0.0:8000-8002->9000-9002/tcp");
        let pairs: Vec<(u16, u16)> = mappings.iter().map(|m| (m.host_port, m.container_port)).collect();
        assert_eq!(pairs, vec![(8000, 9000), (8001, 9001), (8002, 9002)]);
    }

    #[test]
    fn pid_map_skips_stopped_containers() {
        let output = "4242::abc::/plex\n0::def::/stopped\nbad line\n";
        let map = parse_pid_map(output);
        assert_eq!(map.len(), 1);
        assert_eq!(map[&4242].name, "plex");
        assert_eq!(map[&4242].id, "abc");
    }

    #[test]
    fn top_output_skips_header() {
        let output = "PID                 COMMAND\n1201                nginx\n1202                sh\n";
        assert_eq!(
            parse_top(output),
            vec![(1201, "nginx".to_string()), (1202, "sh".to_string())]
        );
    }

    #[test]
    fn network_mode_with_exposed_ports() {
        let (mode, ports) = parse_network_mode("host::{\"51820/udp\":{},\"80/tcp\":{}}\n");
        assert_eq!(mode, "host");
        assert_eq!(ports, vec!["51820/udp".to_string(), "80/tcp".to_string()]);

        let (mode, ports) = parse_network_mode("bridge::null");
        assert_eq!(mode, "bridge");
        assert!(ports.is_empty());
    }

    #[test]
    fn ps_json_lines() {
        let output = r#"{"ID":"abc","Names":"web","Image":"nginx:1.27","State":"running","Status":"Up 2 hours","CreatedAt":"2024-05-01 10:00:00 +0000 UTC","Ports":"0.0.0.0:8080->80/tcp"}
not json
{"ID":"def","Names":"db","Image":"postgres:16","State":"exited","Status":"Exited (0) 1 day ago"}"#;
        let records = parse_ps_json_lines(output);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].names, "web");
        assert_eq!(records[1].state, "exited");
    }

    #[test]
    fn inspect_published_ports() {
        let output = r#"[{
            "Id": "abc123",
            "Name": "/web",
            "Created": "2024-05-01T10:00:00Z",
            "State": {"Status": "running", "Running": true, "Pid": 4242},
            "Config": {"Image": "nginx:1.27", "ExposedPorts": {"80/tcp": {}}},
            "HostConfig": {"NetworkMode": "bridge"},
            "NetworkSettings": {
                "Networks": {"bridge": {}},
                "Ports": {"80/tcp": [{"HostIp": "0.0.0.0", "HostPort": "8080"}], "443/tcp": null}
            },
            "Mounts": [{"Type": "bind", "Source": "/srv", "Destination": "/usr/share/nginx", "RW": true}]
        }]"#;
        let containers = parse_inspect(output).unwrap();
        assert_eq!(containers.len(), 1);
        let c = &containers[0];
        assert_eq!(c.clean_name(), "web");
        assert!(!c.uses_host_network());
        assert_eq!(c.state.pid, 4242);

        let ports = c.published_ports();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].host_port, 8080);
        assert_eq!(ports[0].created.as_deref(), Some("2024-05-01T10:00:00Z"));
    }

    #[test]
    fn created_timestamps_become_rfc3339() {
        assert_eq!(
            normalize_created("2024-05-01 10:00:00 +0000 UTC").as_deref(),
            Some("2024-05-01T10:00:00+00:00")
        );
        assert_eq!(
            normalize_created("2024-05-01T10:00:00Z").as_deref(),
            Some("2024-05-01T10:00:00+00:00")
        );
        assert_eq!(normalize_created(""), None);
        assert_eq!(normalize_created("yesterday"), None);
    }
}
