//! Generic OS collector.
//!
//! Always available and always the lowest-confidence candidate. Host facts
//! come from `sysinfo`; listening sockets come from `ss`/`netstat` on Unix and
//! `netstat -ano`/`netstat -an` on Windows.

use super::{Collector, DetectionInfo};
use crate::error::{DiscoveryError, Result};
use crate::host::Host;
use crate::model::{Application, Platform, PortEntry, SystemInfo, Vm};
use crate::parsers::netstat::{parse_netstat_linux, parse_netstat_windows};
use crate::parsers::ss::parse_ss;
use async_trait::async_trait;
use std::sync::Arc;
use sysinfo::System;
use tracing::{debug, warn};

pub const SYSTEM_SCORE: u32 = 10;

pub struct SystemCollector {
    host: Arc<dyn Host>,
    detection: Option<DetectionInfo>,
}

impl SystemCollector {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self {
            host,
            detection: None,
        }
    }
}

#[async_trait]
impl Collector for SystemCollector {
    fn platform(&self) -> Platform {
        Platform::System
    }

    async fn is_compatible(&self) -> Result<u32> {
        Ok(SYSTEM_SCORE)
    }

    async fn system_info(&self) -> Result<SystemInfo> {
        let mut info = host_facts(Platform::System).await?;
        if let Some(version) = os_version(self.host.as_ref()).await {
            info.version = version;
        }
        info.platform_data.description = format!("Generic system running {}", info.version);
        Ok(info)
    }

    async fn applications(&self) -> Result<Vec<Application>> {
        Ok(Vec::new())
    }

    async fn ports(&self) -> Result<Vec<PortEntry>> {
        collect_listening_ports(self.host.as_ref()).await
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

/// Host name, CPU, memory and uptime from the OS APIs.
pub async fn host_facts(platform: Platform) -> Result<SystemInfo> {
    tokio::task::spawn_blocking(move || {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu();

        let hostname = System::host_name().unwrap_or_else(|| "unknown".to_string());
        let version = System::long_os_version()
            .or_else(System::os_version)
            .unwrap_or_else(|| "unknown".to_string());

        let mut info = SystemInfo::new(hostname, version, platform);
        info.arch = System::cpu_arch();
        info.cpu_cores = Some(sys.cpus().len()).filter(|n| *n > 0);
        info.cpu_model = sys
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .filter(|brand| !brand.is_empty());
        info.memory_total = Some(sys.total_memory());
        info.memory_free = Some(sys.available_memory());
        info.uptime_seconds = Some(System::uptime());
        info
    })
    .await
    .map_err(|e| DiscoveryError::Io(std::io::Error::other(e)))
}

/// Kernel or OS version string from the platform's version command.
async fn os_version(host: &dyn Host) -> Option<String> {
    let result = if cfg!(windows) {
        host.run("cmd", &["/c", "ver"]).await
    } else {
        host.run("uname", &["-sr"]).await
    };
    match result {
        Ok(output) => Some(output.trim().to_string()).filter(|v| !v.is_empty()),
        Err(e) => {
            debug!("Version command unavailable: {}", e);
            None
        }
    }
}

/// Listening sockets from the primary listing command, retried once with the
/// fallback command. Fails only when both commands fail.
pub async fn collect_listening_ports(host: &dyn Host) -> Result<Vec<PortEntry>> {
    if cfg!(windows) {
        match host.run("netstat", &["-ano"]).await {
            Ok(output) => Ok(parse_netstat_windows(&output)),
            Err(e) => {
                warn!("netstat -ano failed, retrying with netstat -an: {}", e);
                let output = host.run("netstat", &["-an"]).await?;
                Ok(parse_netstat_windows(&output))
            }
        }
    } else {
        match host.run("ss", &["-tulpn"]).await {
            Ok(output) => Ok(parse_ss(&output)),
            Err(e) => {
                warn!("ss failed, falling back to netstat: {}", e);
                let output = host.run("netstat", &["-tulpn"]).await?;
                Ok(parse_netstat_linux(&output))
            }
        }
    }
}
