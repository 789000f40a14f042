//! Local (credential-free) system facts for a TrueNAS host.
//!
//! Every probe is independent. A probe that fails leaves the corresponding
//! field at its fallback value and never fails the whole lookup.

use crate::host::Host;
use crate::model::{Platform, SystemInfo};
use crate::parsers::docker::{parse_info, DockerInfo, JSON_FORMAT};
use crate::parsers::procfs::{parse_cpuinfo, parse_meminfo, parse_uptime};
use serde_json::json;
use std::path::Path;
use tracing::debug;

pub const SYSTEM_INFO_CACHE_KEY: &str = "systemInfo";

/// What is reported when nothing could be probed.
pub fn fallback_system_info() -> SystemInfo {
    let mut info = SystemInfo::new("truenas", "unknown", Platform::Truenas);
    info.platform_data.description = "TrueNAS SCALE".to_string();
    info
}

pub async fn local_system_info(host: &dyn Host) -> SystemInfo {
    let (docker_version, docker_info, meminfo, cpuinfo, uptime, version, hostname) = tokio::join!(
        host.run("docker", &["version", "--format", "{{.Server.Version}}"]),
        host.run("docker", &["info", "--format", JSON_FORMAT]),
        host.read_to_string(Path::new("/proc/meminfo")),
        host.read_to_string(Path::new("/proc/cpuinfo")),
        host.read_to_string(Path::new("/proc/uptime")),
        host.read_to_string(Path::new("/etc/version")),
        host.read_to_string(Path::new("/etc/hostname")),
    );

    let mut info = fallback_system_info();

    let docker: Option<DockerInfo> = match docker_info {
        Ok(output) => parse_info(&output)
            .map_err(|e| debug!("Unparsable docker info: {}", e))
            .ok(),
        Err(e) => {
            debug!("docker info unavailable: {}", e);
            None
        }
    };

    match version {
        Ok(v) if !v.trim().is_empty() => info.version = v.trim().to_string(),
        Ok(_) => {}
        Err(e) => debug!("/etc/version unavailable: {}", e),
    }

    if let Some(name) = docker
        .as_ref()
        .map(|d| d.name.clone())
        .filter(|n| !n.is_empty())
        .or_else(|| {
            hostname
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
    {
        info.hostname = name;
    }

    if let Ok(content) = meminfo {
        let (total, free) = parse_meminfo(&content);
        info.memory_total = total;
        info.memory_free = free;
    }
    if let Ok(content) = cpuinfo {
        let (count, model) = parse_cpuinfo(&content);
        info.cpu_cores = Some(count).filter(|c| *c > 0);
        info.cpu_model = model;
    }
    if let Ok(content) = uptime {
        info.uptime_seconds = parse_uptime(&content);
    }

    let extra = &mut info.platform_data.extra;
    if let Ok(v) = docker_version {
        extra.insert("dockerVersion".to_string(), json!(v.trim()));
    }
    if let Some(docker) = &docker {
        info.arch = Some(docker.architecture.clone()).filter(|a| !a.is_empty());
        info.cpu_cores = info.cpu_cores.or(Some(docker.ncpu).filter(|n| *n > 0));
        info.memory_total = info.memory_total.or(Some(docker.mem_total).filter(|m| *m > 0));
        extra.insert("kernelVersion".to_string(), json!(docker.kernel_version));
        extra.insert("containers".to_string(), json!(docker.containers));
        extra.insert("containersRunning".to_string(), json!(docker.containers_running));
    }

    info.platform_data.description = format!("TrueNAS SCALE {}", info.version);
    info
}
