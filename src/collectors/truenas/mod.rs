//! TrueNAS SCALE collector.
//!
//! A hybrid collector. The core tier (system facts, Docker containers, ports)
//! is probed locally and needs no credentials. The enhanced tier (native apps,
//! VMs, middleware system info) goes through [`TrueNasClient`] and is skipped
//! when no API key is configured.
//!
//! # Collection order
//!
//! [`Collector::collect`] runs system info, containers, the port pipeline and
//! the enhanced tier in that order, sharing the container list between the
//! stages. Expensive probes are memoised in the collector's [`TtlCache`].
//!
//! # Detection
//!
//! | Signal | Weight |
//! |--------|--------|
//! | kernel release mentions TrueNAS | 60 |
//! | `/etc/os-release` ID, NAME or PRETTY_NAME names TrueNAS | 40 |
//! | middleware UNIX socket present | 10 |
//! | TrueNAS config directory present | 10 |
//! | API key configured | 20 |

pub mod containers;
pub mod enhanced;
pub mod ports;
pub mod system_info;

use super::system::collect_listening_ports;
use super::{settle, CollectionStrategy, Collector, DetectionInfo};
use crate::cache::TtlCache;
use crate::config::{CollectorConfig, Config, TrueNasConfig};
use crate::error::{DiscoveryError, Result};
use crate::host::Host;
use crate::model::{Application, CollectionResult, Platform, PortEntry, SystemInfo, Vm};
use crate::parsers::procfs::parse_os_release;
use crate::truenas::TrueNasClient;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use containers::{container_refs, list_containers, CONTAINERS_CACHE_KEY, CONTAINERS_TTL};
use enhanced::{
    apply_system_info, fetch_enhanced, instance_to_vm, native_app_to_application, tag_app_ports,
};
use ports::{
    declared_ports, host_network_pids, merge_ports, pid_container_map, self_container,
    MergeOptions, PidMap, HOST_NETWORK_PIDS_CACHE_KEY, HOST_NETWORK_PIDS_TTL,
    SYSTEM_PORTS_CACHE_KEY, SYSTEM_PORTS_TTL,
};
use system_info::{local_system_info, SYSTEM_INFO_CACHE_KEY};

pub const KERNEL_WEIGHT: u32 = 60;
pub const OS_RELEASE_WEIGHT: u32 = 40;
pub const SOCKET_WEIGHT: u32 = 10;
pub const CONFIG_DIR_WEIGHT: u32 = 10;
pub const API_KEY_WEIGHT: u32 = 20;

const CONFIG_DIRS: [&str; 2] = ["/etc/truenas", "/usr/lib/python3/dist-packages/middlewared"];

pub struct TrueNasCollector {
    host: Arc<dyn Host>,
    collector: CollectorConfig,
    truenas: TrueNasConfig,
    client: TrueNasClient,
    cache: TtlCache,
    detection: Option<DetectionInfo>,
}

impl TrueNasCollector {
    pub fn new(config: &Config, host: Arc<dyn Host>) -> Self {
        let client = TrueNasClient::new(config.truenas.clone(), host.clone());
        Self {
            host,
            collector: config.collector.clone(),
            truenas: config.truenas.clone(),
            client,
            cache: TtlCache::new(config.cache.ttl(), config.cache.disabled),
            detection: None,
        }
    }

    pub fn client(&self) -> &TrueNasClient {
        &self.client
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    async fn local_system_info(&self) -> SystemInfo {
        let host = self.host.clone();
        self.cache
            .get_cached_or_fresh::<_, DiscoveryError, _, _>(SYSTEM_INFO_CACHE_KEY, None, || async move {
                Ok(local_system_info(host.as_ref()).await)
            })
            .await
            .unwrap_or_else(|_| system_info::fallback_system_info())
    }

    async fn containers(&self) -> Result<Vec<Application>> {
        self.cache
            .get_cached_or_fresh(CONTAINERS_CACHE_KEY, Some(CONTAINERS_TTL), || {
                list_containers(self.host.as_ref())
            })
            .await
    }

    async fn system_ports(&self) -> Result<Vec<PortEntry>> {
        self.cache
            .get_cached_or_fresh(SYSTEM_PORTS_CACHE_KEY, Some(SYSTEM_PORTS_TTL), || {
                collect_listening_ports(self.host.as_ref())
            })
            .await
    }

    async fn host_network_pids(&self, apps: &[Application]) -> PidMap {
        self.cache
            .get_cached_or_fresh::<_, DiscoveryError, _, _>(
                HOST_NETWORK_PIDS_CACHE_KEY,
                Some(HOST_NETWORK_PIDS_TTL),
                || async { Ok(host_network_pids(self.host.as_ref(), apps).await) },
            )
            .await
            .unwrap_or_default()
    }

    /// The five-stage port pipeline over an already-listed set of containers.
    async fn collect_ports(&self, apps: &[Application]) -> Result<Vec<PortEntry>> {
        let refs = container_refs(apps);
        let (declared, system, pid_map) = tokio::join!(
            declared_ports(self.host.as_ref()),
            self.system_ports(),
            pid_container_map(self.host.as_ref(), &refs),
        );

        if let (Err(declared_err), Err(system_err)) = (&declared, &system) {
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
        let pid_map = pid_map.unwrap_or_else(|e| {
            debug!("PID map unavailable: {}", e);
            PidMap::new()
        });
        let host_pids = self.host_network_pids(apps).await;

        let own_container = match self.collector.self_port {
            Some(_) => self_container(self.host.as_ref(), &self.collector.self_container_name).await,
            None => None,
        };
        let options = MergeOptions {
            include_udp: self.collector.include_udp,
            self_port: self.collector.self_port,
            self_container: own_container,
        };

        Ok(merge_ports(declared, system, &pid_map, &host_pids, &refs, &options))
    }

    async fn kernel_mentions_truenas(&self) -> bool {
        match self.host.run("uname", &["-r"]).await {
            Ok(release) => release.to_ascii_lowercase().contains("truenas"),
            Err(_) => self
                .host
                .read_to_string(Path::new("/proc/sys/kernel/osrelease"))
                .await
                .is_ok_and(|r| r.to_ascii_lowercase().contains("truenas")),
        }
    }

    async fn os_release_mentions_truenas(&self) -> bool {
        let Ok(content) = self.host.read_to_string(Path::new("/etc/os-release")).await else {
            return false;
        };
        let fields = parse_os_release(&content);
        ["ID", "NAME", "PRETTY_NAME"]
            .iter()
            .filter_map(|key| fields.get(*key))
            .any(|value| value.to_ascii_lowercase().contains("truenas"))
    }

    async fn middleware_socket_present(&self) -> bool {
        for path in &self.truenas.socket_paths {
            if self.host.is_socket(Path::new(path)).await {
                return true;
            }
        }
        false
    }

    async fn config_dir_present(&self) -> bool {
        for dir in CONFIG_DIRS {
            if self.host.exists(Path::new(dir)).await {
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl Collector for TrueNasCollector {
    fn platform(&self) -> Platform {
        Platform::Truenas
    }

    fn strategy(&self) -> CollectionStrategy {
        CollectionStrategy::Unified
    }

    async fn is_compatible(&self) -> Result<u32> {
        let (kernel, os_release, socket, config_dir) = tokio::join!(
            self.kernel_mentions_truenas(),
            self.os_release_mentions_truenas(),
            self.middleware_socket_present(),
            self.config_dir_present(),
        );

        let signals = [
            (kernel, KERNEL_WEIGHT),
            (os_release, OS_RELEASE_WEIGHT),
            (socket, SOCKET_WEIGHT),
            (config_dir, CONFIG_DIR_WEIGHT),
            (self.truenas.has_api_key(), API_KEY_WEIGHT),
        ];
        let score: u32 = signals
            .iter()
            .filter(|(present, _)| *present)
            .map(|(_, weight)| weight)
            .sum();
        debug!(kernel, os_release, socket, config_dir, score, "TrueNAS detection signals");
        Ok(score)
    }

    async fn system_info(&self) -> Result<SystemInfo> {
        let mut info = self.local_system_info().await;
        if !self.client.is_degraded() {
            match self.client.query_system_info().await {
                Ok(nas) => apply_system_info(&mut info, &nas),
                Err(e) => warn!("system.info unavailable: {}", e),
            }
        }
        Ok(info)
    }

    async fn applications(&self) -> Result<Vec<Application>> {
        let mut apps = self.containers().await?;
        if !self.client.is_degraded() {
            match self.client.query_apps().await {
                Ok(native) => apps.extend(native.iter().map(native_app_to_application)),
                Err(e) => warn!("app.query unavailable: {}", e),
            }
        }
        Ok(apps)
    }

    async fn ports(&self) -> Result<Vec<PortEntry>> {
        let apps = self.containers().await.unwrap_or_else(|e| {
            warn!("Container listing failed: {}", e);
            Vec::new()
        });
        self.collect_ports(&apps).await
    }

    async fn vms(&self) -> Result<Vec<Vm>> {
        let instances = self.client.query_instances().await?;
        Ok(instances.iter().map(instance_to_vm).collect())
    }

    async fn collect(&self) -> CollectionResult {
        let mut result = CollectionResult::empty(Platform::Truenas);
        result.platform_name = self.platform_name().to_string();

        let mut system_info = self.local_system_info().await;
        let apps = settle(&mut result, "applications", self.containers().await).unwrap_or_default();
        let ports = settle(&mut result, "ports", self.collect_ports(&apps).await);
        result.applications = apps;
        result.ports = ports.unwrap_or_default();

        if self.client.is_degraded() {
            debug!("Enhanced features skipped: no API key");
        } else {
            let enhanced = fetch_enhanced(&self.client).await;
            if let Some(nas) = &enhanced.system_info {
                apply_system_info(&mut system_info, nas);
            }
            if let Some(native) = &enhanced.apps {
                tag_app_ports(&mut result.ports, native);
                result
                    .applications
                    .extend(native.iter().map(native_app_to_application));
            }
            if let Some(instances) = &enhanced.instances {
                result.vms = instances.iter().map(instance_to_vm).collect();
            }
            for (field, reason) in &enhanced.errors {
                result.record_error(field, reason);
            }
            result.enhanced_features_enabled = enhanced.any_succeeded();
        }

        if result.errors.contains_key("applications") && result.errors.contains_key("ports") {
            result.error = Some("container and port probes both failed".to_string());
        }
        result.system_info = Some(system_info);
        info!(
            ports = result.ports.len(),
            applications = result.applications.len(),
            vms = result.vms.len(),
            enhanced = result.enhanced_features_enabled,
            "TrueNAS collection finished"
        );
        result
    }

    fn set_detection_info(&mut self, info: DetectionInfo) {
        self.detection = Some(info);
    }

    fn detection_info(&self) -> Option<&DetectionInfo> {
        self.detection.as_ref()
    }

    fn enhanced_features_enabled(&self) -> bool {
        !self.client.is_degraded()
    }
}
