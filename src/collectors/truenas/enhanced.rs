//! Enhanced tier: data only the middleware can provide.
//!
//! `system.info`, `app.query` and `virt.instance.query` are called
//! concurrently. Each one degrades independently, so a failing VM query still
//! leaves native apps and system facts in place.

use crate::error::DiscoveryError;
use crate::model::{AppStatus, Application, Platform, PortEntry, SystemInfo, Vm, VmStatus};
use crate::truenas::types::{AppInfo, NasSystemInfo, VirtInstance};
use crate::truenas::TrueNasClient;
use serde_json::json;
use tracing::warn;

/// Outcome of the three middleware calls.
#[derive(Debug, Default)]
pub struct EnhancedData {
    pub system_info: Option<NasSystemInfo>,
    pub apps: Option<Vec<AppInfo>>,
    pub instances: Option<Vec<VirtInstance>>,
    /// `(field, reason)` for each failed call.
    pub errors: Vec<(&'static str, String)>,
}

impl EnhancedData {
    pub fn any_succeeded(&self) -> bool {
        self.system_info.is_some() || self.apps.is_some() || self.instances.is_some()
    }
}

pub async fn fetch_enhanced(client: &TrueNasClient) -> EnhancedData {
    let (system_info, apps, instances) = tokio::join!(
        client.query_system_info(),
        client.query_apps(),
        client.query_instances(),
    );

    let mut data = EnhancedData::default();
    data.system_info = keep(&mut data.errors, "enhancedSystemInfo", system_info);
    data.apps = keep(&mut data.errors, "nativeApps", apps);
    data.instances = keep(&mut data.errors, "vms", instances);
    data
}

fn keep<T>(
    errors: &mut Vec<(&'static str, String)>,
    field: &'static str,
    outcome: Result<T, DiscoveryError>,
) -> Option<T> {
    match outcome {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Enhanced {} unavailable: {}", field, e);
            errors.push((field, e.to_string()));
            None
        }
    }
}

/// Overlay middleware facts onto locally probed system info.
pub fn apply_system_info(info: &mut SystemInfo, nas: &NasSystemInfo) {
    if !nas.version.is_empty() {
        info.version = nas.version.clone();
        info.platform_data.description = format!("TrueNAS SCALE {}", nas.version);
    }
    if !nas.hostname.is_empty() {
        info.hostname = nas.hostname.clone();
    }
    if nas.uptime_seconds > 0.0 {
        info.uptime_seconds = Some(nas.uptime_seconds as u64);
    }
    info.memory_total = nas.physmem.or(info.memory_total);
    info.cpu_model = nas.model.clone().or(info.cpu_model.take());
    info.cpu_cores = nas.cores.or(info.cpu_cores);

    let extra = &mut info.platform_data.extra;
    for (key, value) in [
        ("systemProduct", json!(nas.system_product)),
        ("systemManufacturer", json!(nas.system_manufacturer)),
        ("timezone", json!(nas.timezone)),
        ("loadavg", json!(nas.loadavg)),
        ("physicalCores", json!(nas.physical_cores)),
    ] {
        if !value.is_null() {
            extra.insert(key.to_string(), value);
        }
    }
}

pub fn native_app_to_application(app: &AppInfo) -> Application {
    let id = if app.id.is_empty() { &app.name } else { &app.id };
    let mut application = Application::new(id.clone(), app.name.clone(), Platform::Truenas);
    application.status = AppStatus::from_native_app_state(&app.state);
    application.version = Some(if app.human_version.is_empty() {
        app.version.clone()
    } else {
        app.human_version.clone()
    })
    .filter(|v| !v.is_empty());

    let workloads = app.active_workloads.clone().unwrap_or_default();
    application.image = workloads.images.first().cloned();
    let metadata = app.metadata.clone().unwrap_or_default();
    application.platform_data = json!({
        "type": if app.custom_app { "custom" } else { "catalog" },
        "train": metadata.train,
        "title": metadata.title,
        "app_version": metadata.app_version,
        "upgrade_available": app.upgrade_available,
        "containers": workloads.containers,
        "portals": app.portals,
        "used_ports": workloads
            .used_ports
            .iter()
            .map(|p| json!({
                "container_port": p.container_port,
                "protocol": p.protocol,
                "host_ports": p.host_ports.iter().map(|h| h.host_port).collect::<Vec<_>>(),
            }))
            .collect::<Vec<_>>(),
    });
    application
}

pub fn instance_to_vm(instance: &VirtInstance) -> Vm {
    Vm {
        id: instance.id.clone(),
        name: instance.name.clone(),
        status: VmStatus::from_state(&instance.status),
        vcpus: instance.vcpus(),
        memory: instance.memory,
        autostart: instance.autostart,
        platform_data: json!({
            "type": instance.kind,
            "image": instance.image,
        }),
    }
}

/// Link container ports to the native app that deployed them. TrueNAS names
/// app containers `ix-<app>-<service>-<n>`.
pub fn tag_app_ports(ports: &mut [PortEntry], apps: &[AppInfo]) {
    for port in ports.iter_mut().filter(|p| p.is_docker()) {
        if let Some(app) = apps
            .iter()
            .find(|app| port.owner.starts_with(&format!("ix-{}-", app.name)))
        {
            let id = if app.id.is_empty() { &app.name } else { &app.id };
            port.app_id = Some(id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PortSource, Protocol};

    #[test]
    fn native_app_mapping() {
        let app: AppInfo = serde_json::from_value(json!({
            "id": "jellyfin",
            "name": "jellyfin",
            "state": "RUNNING",
            "human_version": "10.9.7_1.0.12",
            "metadata": {"train": "community"},
            "active_workloads": {"containers": 1, "images": ["jellyfin/jellyfin:10.9.7"], "used_ports": []}
        }))
        .unwrap();

        let mapped = native_app_to_application(&app);
        assert_eq!(mapped.status, AppStatus::Running);
        assert_eq!(mapped.platform, Platform::Truenas);
        assert_eq!(mapped.image.as_deref(), Some("jellyfin/jellyfin:10.9.7"));
        assert_eq!(mapped.platform_data["train"], "community");
        assert_eq!(mapped.platform_data["type"], "catalog");
    }

    #[test]
    fn crashed_app_maps_to_error() {
        let app = AppInfo {
            name: "broken".to_string(),
            state: "CRASHED".to_string(),
            ..Default::default()
        };
        let mapped = native_app_to_application(&app);
        assert_eq!(mapped.id, "broken");
        assert_eq!(mapped.status, AppStatus::Error);
    }

    #[test]
    fn vm_mapping() {
        let instance: VirtInstance = serde_json::from_value(json!({
            "id": "win11", "name": "win11", "type": "VM", "status": "STOPPED",
            "cpu": "4", "memory": 8589934592u64, "autostart": true
        }))
        .unwrap();
        let vm = instance_to_vm(&instance);
        assert_eq!(vm.status, VmStatus::Stopped);
        assert_eq!(vm.vcpus, Some(4));
        assert_eq!(vm.memory, Some(8_589_934_592));
    }

    #[test]
    fn app_ports_are_tagged_by_container_prefix() {
        let mut port = PortEntry::system("ix-jellyfin-jellyfin-1", Protocol::Tcp, "0.0.0.0", 8096);
        port.source = PortSource::Docker;
        let other = PortEntry::system("ix-jellyfin-jellyfin-1", Protocol::Tcp, "0.0.0.0", 22);
        let apps = vec![AppInfo {
            id: "jellyfin".to_string(),
            name: "jellyfin".to_string(),
            ..Default::default()
        }];
        let mut ports = vec![port, other];
        tag_app_ports(&mut ports, &apps);
        assert_eq!(ports[0].app_id.as_deref(), Some("jellyfin"));
        assert_eq!(ports[1].app_id, None);
    }
}
