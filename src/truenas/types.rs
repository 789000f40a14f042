//! TrueNAS Middleware Type Definitions
//!
//! Wire envelopes for the middleware WebSocket protocol and the response
//! payloads the collectors consume.
//!
//! # Design Notes
//!
//! - **Optional Fields**: The middleware omits or nulls fields between releases,
//!   so payload structs use `#[serde(default)]` throughout. An empty `{}` (what the
//!   degraded client returns) deserializes into an all-default value.
//! - **Completeness**: Only fields the collectors read are modelled; everything
//!   else is ignored.
//!
//! # API Endpoints Covered
//!
//! - `system.info` → [`NasSystemInfo`]
//! - `app.query` → [`AppInfo`]
//! - `virt.instance.query` → [`VirtInstance`]
//! - `system.general.config` → [`GeneralConfig`]
//!
//! # Protocol
//!
//! - [`DdpConnect`] - Initial handshake message
//! - [`JsonRpcRequest`] - Outgoing method calls
//! - [`ServerMessage`] - Any incoming frame (`connected`, `result`, `pong`, ...)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Method call envelope
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub id: String,
    pub msg: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn method(id: impl Into<String>, method: &str, params: Value) -> Self {
        Self {
            id: id.into(),
            msg: "method".to_string(),
            method: method.to_string(),
            params: Some(params),
        }
    }
}

/// Any frame received from the middleware
#[derive(Debug, Deserialize)]
pub struct ServerMessage {
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl ServerMessage {
    /// Request id as a string, whether the server echoed it as text or number.
    pub fn id(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn is_result_for(&self, id: &str) -> bool {
        self.msg == "result" && self.id().as_deref() == Some(id)
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct JsonRpcError {
    #[serde(default)]
    pub error: Option<i32>,
    #[serde(default)]
    pub errname: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl JsonRpcError {
    pub fn describe(&self) -> String {
        match (&self.errname, &self.reason) {
            (Some(name), Some(reason)) => format!("{}: {}", name, reason),
            (None, Some(reason)) => reason.clone(),
            (Some(name), None) => name.clone(),
            (None, None) => "Unknown error".to_string(),
        }
    }
}

/// DDP Connect message
#[derive(Debug, Serialize)]
pub struct DdpConnect {
    pub msg: String,
    pub version: String,
    pub support: Vec<String>,
}

impl Default for DdpConnect {
    fn default() -> Self {
        Self {
            msg: "connect".to_string(),
            version: "1".to_string(),
            support: vec!["1".to_string()],
        }
    }
}

/// Body of a middleware call over the UNIX socket (`POST /_middleware`)
#[derive(Debug, Deserialize)]
pub struct SocketResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

/// System information from system.info
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct NasSystemInfo {
    pub version: String,
    pub hostname: String,
    pub uptime_seconds: f64,
    pub physmem: Option<u64>,
    pub model: Option<String>,
    pub cores: Option<usize>,
    pub physical_cores: Option<usize>,
    pub loadavg: Option<Vec<f64>>,
    pub system_product: Option<String>,
    pub system_manufacturer: Option<String>,
    pub timezone: Option<String>,
}

/// Application information from app.query
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AppInfo {
    pub id: String,
    pub name: String,
    pub state: String,
    pub version: String,
    pub human_version: String,
    pub upgrade_available: bool,
    pub custom_app: bool,
    pub metadata: Option<AppMetadata>,
    pub active_workloads: Option<AppWorkloads>,
    pub portals: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AppMetadata {
    pub train: Option<String>,
    pub app_version: Option<String>,
    pub title: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AppWorkloads {
    pub containers: u32,
    pub images: Vec<String>,
    pub used_ports: Vec<AppUsedPort>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AppUsedPort {
    pub container_port: u16,
    pub protocol: String,
    pub host_ports: Vec<AppHostPort>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AppHostPort {
    pub host_port: u16,
    pub host_ip: String,
}

/// Virtual machine or system container from virt.instance.query
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct VirtInstance {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    /// CPU count or cpuset string, depending on release.
    pub cpu: Option<Value>,
    /// Bytes.
    pub memory: Option<u64>,
    pub autostart: bool,
    pub image: Option<Value>,
}

impl VirtInstance {
    pub fn vcpus(&self) -> Option<u32> {
        match self.cpu.as_ref()? {
            Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Web UI settings from system.general.config
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    pub ui_port: u16,
    pub ui_httpsport: u16,
    pub ui_httpsredirect: bool,
    pub ui_address: Vec<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            ui_port: 80,
            ui_httpsport: 443,
            ui_httpsredirect: false,
            ui_address: Vec::new(),
        }
    }
}
