//! Canonical Record Model
//!
//! These are the shapes every collector produces and the presentation layer
//! consumes. Port entries keep their snake_case wire names; the top-level
//! [`CollectionResult`] uses camelCase keys.
//!
//! # Dedup key
//!
//! Within a single collection pass `(host_ip, host_port)` identifies a port.
//! Protocol is deliberately not part of the key; see [`PortKey`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Collector platform identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Truenas,
    Docker,
    System,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Truenas, Platform::Docker, Platform::System];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Truenas => "truenas",
            Platform::Docker => "docker",
            Platform::System => "system",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Truenas => "TrueNAS SCALE",
            Platform::Docker => "Docker",
            Platform::System => "Generic System",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "truenas" => Some(Platform::Truenas),
            "docker" => Some(Platform::Docker),
            "system" => Some(Platform::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortSource {
    Docker,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    /// Accepts `tcp`, `tcp6`, `UDP`, `udp6` and friends. Anything else is TCP.
    pub fn parse_lossy(value: &str) -> Self {
        if value.trim().to_ascii_lowercase().starts_with("udp") {
            Protocol::Udp
        } else {
            Protocol::Tcp
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// What a host port forwards to: a container port or a free-form descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortTarget {
    Port(u16),
    Descriptor(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEntry {
    pub source: PortSource,
    pub owner: String,
    pub protocol: Protocol,
    pub host_ip: String,
    pub host_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PortTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// Dedup key for a port within one collection pass.
pub type PortKey = (String, u16);

impl PortEntry {
    pub fn system(owner: impl Into<String>, protocol: Protocol, host_ip: &str, port: u16) -> Self {
        Self {
            source: PortSource::System,
            owner: owner.into(),
            protocol,
            host_ip: normalize_host_ip(host_ip),
            host_port: port,
            target: None,
            container_id: None,
            vm_id: None,
            app_id: None,
            created: None,
            pid: None,
        }
    }

    pub fn key(&self) -> PortKey {
        (self.host_ip.clone(), self.host_port)
    }

    pub fn is_docker(&self) -> bool {
        self.source == PortSource::Docker
    }

    /// Re-own this entry as belonging to a container.
    pub fn attribute_to_container(&mut self, container: &ContainerRef) {
        self.source = PortSource::Docker;
        self.owner = container.name.clone();
        self.container_id = Some(container.id.clone());
        if container.created.is_some() {
            self.created = container.created.clone();
        }
    }
}

/// Minimal handle on a container used when re-attributing ports.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerRef {
    pub id: String,
    pub name: String,
    pub image: String,
    pub created: Option<String>,
}

/// Build a [`PortEntry`] from a loosely-typed JSON record, filling every
/// missing or malformed field with a safe default.
pub fn normalize_port_entry(raw: &Value) -> PortEntry {
    let text = |key: &str| -> Option<String> {
        match raw.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    };

    let host_port = raw.get("host_port").map(parse_port_value).unwrap_or(0);
    let source = match text("source").as_deref() {
        Some("docker") => PortSource::Docker,
        _ => PortSource::System,
    };
    let target = match raw.get("target") {
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .map(PortTarget::Port),
        Some(Value::String(s)) if !s.is_empty() => Some(match s.parse::<u16>() {
            Ok(p) => PortTarget::Port(p),
            Err(_) => PortTarget::Descriptor(s.clone()),
        }),
        _ => None,
    };

    PortEntry {
        source,
        owner: text("owner").unwrap_or_else(|| "unknown".to_string()),
        protocol: text("protocol")
            .map(|p| Protocol::parse_lossy(&p))
            .unwrap_or_default(),
        host_ip: normalize_host_ip(&text("host_ip").unwrap_or_default()),
        host_port,
        target,
        container_id: text("container_id"),
        vm_id: text("vm_id"),
        app_id: text("app_id"),
        created: text("created"),
        pid: raw
            .get("pid")
            .and_then(Value::as_u64)
            .and_then(|p| u32::try_from(p).ok()),
    }
}

fn parse_port_value(value: &Value) -> u16 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(0),
        Value::String(s) => s.trim().parse::<u16>().unwrap_or(0),
        _ => 0,
    }
}

/// Map wildcard and loopback spellings onto a single canonical form.
///
/// `""`, `*`, `::`, `[::]` and `0.0.0.0` become `0.0.0.0`; `::1` becomes
/// `127.0.0.1`. Interface zone suffixes such as `%lo` are stripped.
pub fn normalize_host_ip(ip: &str) -> String {
    let trimmed = ip.trim().trim_start_matches('[').trim_end_matches(']');
    let without_zone = trimmed.split('%').next().unwrap_or(trimmed);
    match without_zone {
        "" | "*" | "::" | "0.0.0.0" | "::ffff:0.0.0.0" => "0.0.0.0".to_string(),
        "::1" | "localhost" => "127.0.0.1".to_string(),
        other => other
            .strip_prefix("::ffff:")
            .unwrap_or(other)
            .to_string(),
    }
}

/// Drop entries whose key was already seen, keeping the first occurrence.
pub fn dedup_ports(ports: Vec<PortEntry>) -> Vec<PortEntry> {
    let mut seen = HashSet::new();
    ports
        .into_iter()
        .filter(|p| seen.insert(p.key()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Running,
    Stopped,
    Restarting,
    Paused,
    Created,
    Error,
    Unknown,
}

impl AppStatus {
    /// Map a Docker container state (`running`, `exited`, ...) or a status
    /// line (`Up 3 hours`, `Exited (0) 2 days ago`).
    pub fn from_container_state(state: &str) -> Self {
        let state = state.trim().to_ascii_lowercase();
        match state.as_str() {
            "running" => AppStatus::Running,
            "exited" | "dead" | "stopped" => AppStatus::Stopped,
            "restarting" => AppStatus::Restarting,
            "paused" => AppStatus::Paused,
            "created" => AppStatus::Created,
            s if s.starts_with("up") && s.contains("paused") => AppStatus::Paused,
            s if s.starts_with("up") => AppStatus::Running,
            s if s.starts_with("exited") => AppStatus::Stopped,
            s if s.starts_with("restarting") => AppStatus::Restarting,
            _ => AppStatus::Unknown,
        }
    }

    /// Map a TrueNAS native app state (`RUNNING`, `STOPPED`, `CRASHED`, ...).
    pub fn from_native_app_state(state: &str) -> Self {
        match state.trim().to_ascii_uppercase().as_str() {
            "RUNNING" | "ACTIVE" => AppStatus::Running,
            "STOPPED" | "STOPPING" => AppStatus::Stopped,
            "CRASHED" | "ERROR" | "FAILED" => AppStatus::Error,
            _ => AppStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub name: String,
    pub status: AppStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    pub platform: Platform,
    #[serde(default)]
    pub platform_data: Value,
}

impl Application {
    pub fn new(id: impl Into<String>, name: impl Into<String>, platform: Platform) -> Self {
        Self {
            kind: "application".to_string(),
            id: id.into(),
            name: name.into(),
            status: AppStatus::Unknown,
            image: None,
            version: None,
            created: None,
            platform,
            platform_data: Value::Null,
        }
    }

    pub fn as_container_ref(&self) -> ContainerRef {
        ContainerRef {
            id: self.id.clone(),
            name: self.name.clone(),
            image: self.image.clone().unwrap_or_default(),
            created: self.created.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    Running,
    Stopped,
    Paused,
    Unknown,
}

impl VmStatus {
    pub fn from_state(state: &str) -> Self {
        match state.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => VmStatus::Running,
            "STOPPED" | "SHUTOFF" | "STOPPING" => VmStatus::Stopped,
            "PAUSED" | "SUSPENDED" | "FROZEN" => VmStatus::Paused,
            _ => VmStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vm {
    pub id: String,
    pub name: String,
    pub status: VmStatus,
    #[serde(default)]
    pub vcpus: Option<u32>,
    /// Bytes.
    #[serde(default)]
    pub memory: Option<u64>,
    #[serde(default)]
    pub autostart: bool,
    #[serde(default)]
    pub platform_data: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemPlatformData {
    pub description: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub hostname: String,
    pub version: String,
    pub platform: Platform,
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default)]
    pub cpu_model: Option<String>,
    #[serde(default)]
    pub cpu_cores: Option<usize>,
    /// Bytes.
    #[serde(default)]
    pub memory_total: Option<u64>,
    /// Bytes.
    #[serde(default)]
    pub memory_free: Option<u64>,
    #[serde(default)]
    pub uptime_seconds: Option<u64>,
    pub platform_data: SystemPlatformData,
}

impl SystemInfo {
    pub fn new(hostname: impl Into<String>, version: impl Into<String>, platform: Platform) -> Self {
        Self {
            hostname: hostname.into(),
            version: version.into(),
            platform,
            arch: None,
            cpu_model: None,
            cpu_cores: None,
            memory_total: None,
            memory_free: None,
            uptime_seconds: None,
            platform_data: SystemPlatformData::default(),
        }
    }
}

/// Output of one collection pass. Always well-formed: a failed slice is empty
/// or `None` and its reason is recorded in `errors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionResult {
    pub platform: Platform,
    pub platform_name: String,
    pub system_info: Option<SystemInfo>,
    pub applications: Vec<Application>,
    pub ports: Vec<PortEntry>,
    pub vms: Vec<Vm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
    pub timestamp: String,
    pub enhanced_features_enabled: bool,
}

impl CollectionResult {
    pub fn empty(platform: Platform) -> Self {
        Self {
            platform,
            platform_name: platform.display_name().to_string(),
            system_info: None,
            applications: Vec::new(),
            ports: Vec::new(),
            vms: Vec::new(),
            error: None,
            errors: BTreeMap::new(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            enhanced_features_enabled: false,
        }
    }

    pub fn record_error(&mut self, field: &str, error: impl std::fmt::Display) {
        self.errors.insert(field.to_string(), error.to_string());
    }

    pub fn has_errors(&self) -> bool {
        self.error.is_some() || !self.errors.is_empty()
    }
}
