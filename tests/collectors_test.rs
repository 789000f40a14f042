//! Collector integration tests
//!
//! Each collector runs against a scripted host, so these cover the command
//! fallbacks and the port reconciliation pipeline end to end.

mod common;

use async_trait::async_trait;
use common::{FakeHost, NETSTAT_OUTPUT, SS_OUTPUT};
use portracker_discovery::collectors::{
    fan_out, Collector, DetectionInfo, DockerCollector, SystemCollector, TrueNasCollector,
};
use portracker_discovery::config::{CollectorConfig, Config};
use portracker_discovery::error::{DiscoveryError, Result};
use portracker_discovery::model::{
    AppStatus, Application, Platform, PortEntry, PortSource, Protocol, SystemInfo, Vm,
};
use portracker_discovery::parsers::docker::{JSON_FORMAT, NETWORK_FORMAT, PORTS_FORMAT};
use std::sync::Arc;

const PS_JSON: &str = r#"{"ID":"abc123","Names":"jellyfin","Image":"jellyfin/jellyfin:10.9.7","Command":"\"/jellyfin/jellyfin\"","CreatedAt":"2024-05-01 10:00:00 +0000 UTC","Ports":"0.0.0.0:8096->8096/tcp","State":"running","Status":"Up 3 days","Networks":"bridge","Mounts":"/media","Labels":""}
{"ID":"def456","Names":"plex","Image":"plexinc/pms-docker:latest","Command":"\"/init\"","CreatedAt":"2024-04-20 08:30:00 +0000 UTC","Ports":"","State":"running","Status":"Up 9 days","Networks":"host","Mounts":"","Labels":""}
"#;

const DECLARED: &str = "jellyfin:::0.0.0.0:8096->8096/tcp, :::8096->8096/tcp:::abc123\nplex::::::def456\n";

fn port(ports: &[PortEntry], number: u16) -> Option<&PortEntry> {
    ports.iter().find(|p| p.host_port == number)
}

#[cfg(not(windows))]
#[tokio::test]
async fn test_system_ports_come_from_ss() {
    // Given: A host where ss works
    let host = FakeHost::new().with_command("ss", &["-tulpn"], SS_OUTPUT);
    let collector = SystemCollector::new(Arc::new(host));

    // When: Collecting ports
    let ports = collector.ports().await.expect("ports");

    // Then: Every listening row is reported as a system port
    assert_eq!(ports.len(), 4);
    assert!(ports.iter().all(|p| p.source == PortSource::System));
    assert_eq!(port(&ports, 22).unwrap().owner, "sshd");
    assert_eq!(port(&ports, 5353).unwrap().protocol, Protocol::Udp);
}

#[cfg(not(windows))]
#[tokio::test]
async fn test_system_ports_fall_back_to_netstat() {
    // Given: A host without ss but with netstat
    let host = Arc::new(
        FakeHost::new()
            .with_failing_command("ss", &["-tulpn"])
            .with_command("netstat", &["-tulpn"], NETSTAT_OUTPUT),
    );
    let collector = SystemCollector::new(host.clone());

    // When: Collecting ports
    let ports = collector.ports().await.expect("ports");

    // Then: The netstat listing is used
    assert_eq!(ports.len(), 2);
    assert_eq!(port(&ports, 631).unwrap().owner, "cupsd");
    assert_eq!(port(&ports, 631).unwrap().host_ip, "127.0.0.1");
    assert!(host.ran("ss -tulpn"));
    assert!(host.ran("netstat -tulpn"));
}

#[cfg(not(windows))]
#[tokio::test]
async fn test_system_ports_fail_when_both_commands_fail() {
    // Given: A host with neither ss nor netstat
    let collector = SystemCollector::new(Arc::new(FakeHost::new()));

    // When: Collecting ports
    let result = collector.ports().await;

    // Then: The slice fails with a command error
    assert!(matches!(result, Err(DiscoveryError::Command(_))));
}

#[tokio::test]
async fn test_system_collector_has_no_applications_or_vms() {
    let collector = SystemCollector::new(Arc::new(FakeHost::new()));
    assert!(collector.applications().await.unwrap().is_empty());
    assert!(collector.vms().await.unwrap().is_empty());
    assert_eq!(collector.is_compatible().await.unwrap(), 10);
}

fn docker_host() -> FakeHost {
    FakeHost::new()
        .with_command("docker", &["ps", "--format", JSON_FORMAT], PS_JSON)
        .with_command("docker", &["ps", "-a", "--format", JSON_FORMAT], PS_JSON)
        .with_command("docker", &["ps", "--format", PORTS_FORMAT], DECLARED)
        .with_command("ss", &["-tulpn"], SS_OUTPUT)
        .with_command(
            "docker",
            &["inspect", "--format", NETWORK_FORMAT, "abc123"],
            "bridge::{\"8096/tcp\":{}}",
        )
        .with_command("docker", &["inspect", "--format", NETWORK_FORMAT, "def456"], "host::null")
        .with_command(
            "docker",
            &["top", "def456", "-eo", "pid,comm"],
            "PID COMMAND\n3100 Plex Media Serv\n3150 Plex Tuner Serv\n",
        )
}

#[cfg(not(windows))]
#[tokio::test]
async fn test_docker_declared_binding_wins_over_proxy_socket() {
    // Given: A published container whose docker-proxy also shows up in ss
    let collector = DockerCollector::new(CollectorConfig::default(), Arc::new(docker_host()));

    // When: Collecting ports
    let ports = collector.ports().await.expect("ports");

    // Then: Port 8096 appears once, owned by the container
    let jellyfin: Vec<_> = ports.iter().filter(|p| p.host_port == 8096).collect();
    assert_eq!(jellyfin.len(), 1);
    assert_eq!(jellyfin[0].source, PortSource::Docker);
    assert_eq!(jellyfin[0].owner, "jellyfin");
    assert_eq!(jellyfin[0].container_id.as_deref(), Some("abc123"));
    assert_eq!(
        jellyfin[0].created.as_deref(),
        Some("2024-05-01T10:00:00+00:00")
    );
}

#[cfg(not(windows))]
#[tokio::test]
async fn test_docker_host_network_pid_attributes_port() {
    // Given: A host-network container whose process listens on 32400
    let collector = DockerCollector::new(CollectorConfig::default(), Arc::new(docker_host()));

    // When: Collecting ports
    let ports = collector.ports().await.expect("ports");

    // Then: The OS socket is re-owned by the container, unrelated sockets stay system
    let plex = port(&ports, 32400).expect("plex port");
    assert_eq!(plex.source, PortSource::Docker);
    assert_eq!(plex.owner, "plex");
    assert_eq!(plex.container_id.as_deref(), Some("def456"));
    assert_eq!(port(&ports, 22).unwrap().source, PortSource::System);
}

#[cfg(not(windows))]
#[tokio::test]
async fn test_docker_publish_filter_attributes_unknown_socket() {
    // Given: An unowned socket that docker reports as published by a container
    let ss = "Netid State Recv-Q Send-Q Local Address:Port Peer Address:Port Process\n\
              tcp LISTEN 0 128 0.0.0.0:9000 0.0.0.0:*\n";
    let ps = r#"{"ID":"fff999aaa","Names":"portainer","Image":"portainer/portainer-ce","State":"running","Networks":"bridge"}"#;
    let host = FakeHost::new()
        .with_command("docker", &["ps", "--format", JSON_FORMAT], ps)
        .with_command("docker", &["ps", "--format", PORTS_FORMAT], "")
        .with_command("ss", &["-tulpn"], ss)
        .with_command("docker", &["inspect", "--format", NETWORK_FORMAT, "fff999aaa"], "bridge::null")
        .with_command(
            "docker",
            &["ps", "--filter", "publish=9000", "--format", "{{.ID}}::{{.Names}}"],
            "fff999::portainer\n",
        );
    let collector = DockerCollector::new(CollectorConfig::default(), Arc::new(host));

    // When: Collecting ports
    let ports = collector.ports().await.expect("ports");

    // Then: The socket belongs to the publishing container
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].owner, "portainer");
    assert_eq!(ports[0].container_id.as_deref(), Some("fff999aaa"));
}

#[cfg(not(windows))]
#[tokio::test]
async fn test_docker_process_name_match_is_last_resort() {
    // Given: A socket whose process name matches a container name
    let ss = "Netid State Recv-Q Send-Q Local Address:Port Peer Address:Port Process\n\
              tcp LISTEN 0 128 0.0.0.0:8123 0.0.0.0:* users:((\"homeassistant\",pid=77,fd=3))\n";
    let ps = r#"{"ID":"ha1","Names":"homeassistant","Image":"ghcr.io/home-assistant/home-assistant","State":"running","Networks":"bridge"}"#;
    let host = FakeHost::new()
        .with_command("docker", &["ps", "--format", JSON_FORMAT], ps)
        .with_command("docker", &["ps", "--format", PORTS_FORMAT], "")
        .with_command("ss", &["-tulpn"], ss)
        .with_command("docker", &["inspect", "--format", NETWORK_FORMAT, "ha1"], "bridge::null");
    let collector = DockerCollector::new(CollectorConfig::default(), Arc::new(host));

    // When: Collecting ports
    let ports = collector.ports().await.expect("ports");

    // Then: The name match attributes it
    assert_eq!(ports[0].source, PortSource::Docker);
    assert_eq!(ports[0].container_id.as_deref(), Some("ha1"));
}

#[tokio::test]
async fn test_docker_applications_from_ps() {
    // Given: docker ps -a output with two containers
    let collector = DockerCollector::new(CollectorConfig::default(), Arc::new(docker_host()));

    // When: Listing applications
    let apps = collector.applications().await.expect("applications");

    // Then: Both are mapped with status and image
    assert_eq!(apps.len(), 2);
    assert_eq!(apps[0].name, "jellyfin");
    assert_eq!(apps[0].status, AppStatus::Running);
    assert_eq!(apps[0].platform, Platform::Docker);
    assert_eq!(apps[1].image.as_deref(), Some("plexinc/pms-docker:latest"));
}

#[tokio::test]
async fn test_docker_compatibility_prefers_socket() {
    // Given: A host with the docker socket
    let host = FakeHost::new().with_socket("/var/run/docker.sock");
    let collector = DockerCollector::new(CollectorConfig::default(), Arc::new(host));

    // Then: The socket score is reported
    assert_eq!(collector.is_compatible().await.unwrap(), 50);

    // And: Without socket or CLI the score is 0
    let bare = DockerCollector::new(CollectorConfig::default(), Arc::new(FakeHost::new()));
    assert_eq!(bare.is_compatible().await.unwrap(), 0);
}

fn truenas_host() -> FakeHost {
    FakeHost::new()
        .with_failing_command("docker", &["ps", "-a", "-q", "--no-trunc"])
        .with_command("docker", &["ps", "-a", "--format", JSON_FORMAT], PS_JSON)
        .with_command("docker", &["ps", "--format", PORTS_FORMAT], DECLARED)
        .with_command("ss", &["-tulpn"], SS_OUTPUT)
        .with_command(
            "docker",
            &["top", "def456", "-eo", "pid,comm"],
            "PID COMMAND\n3090 bash\n3100 Plex Media Serv\n",
        )
        .with_file("/etc/hostname", "truenas-lab\n")
        .with_file("/etc/version", "24.10.2")
        .with_file("/etc/os-release", "NAME=\"TrueNAS SCALE\"\n")
}

#[cfg(not(windows))]
#[tokio::test]
async fn test_truenas_collect_without_api_key_is_degraded() {
    // Given: A TrueNAS host and no API key
    let host = Arc::new(truenas_host());
    let collector = TrueNasCollector::new(&Config::default(), host.clone());
    assert!(collector.client().is_degraded());

    // When: Running a full collection
    let result = collector.collect_all().await;

    // Then: Core data is present and the enhanced tier is off
    assert!(!result.enhanced_features_enabled);
    assert!(result.error.is_none());
    assert!(result.errors.is_empty(), "unexpected errors: {:?}", result.errors);
    assert!(result.vms.is_empty());
    assert_eq!(result.applications.len(), 2);

    let info = result.system_info.as_ref().expect("system info");
    assert_eq!(info.hostname, "truenas-lab");
    assert_eq!(info.version, "24.10.2");
    assert_eq!(info.platform_data.description, "TrueNAS SCALE 24.10.2");

    // And: Ports are reconciled, UDP noise dropped
    assert_eq!(port(&result.ports, 8096).unwrap().owner, "jellyfin");
    assert_eq!(port(&result.ports, 32400).unwrap().owner, "plex");
    assert_eq!(port(&result.ports, 22).unwrap().source, PortSource::System);
    assert!(port(&result.ports, 5353).is_none());
}

#[cfg(not(windows))]
#[tokio::test]
async fn test_truenas_container_list_is_cached() {
    // Given: A TrueNAS collector
    let host = Arc::new(truenas_host());
    let collector = TrueNasCollector::new(&Config::default(), host.clone());

    // When: Collecting twice
    collector.collect_all().await;
    collector.collect_all().await;

    // Then: The container listing ran once
    let listings = host
        .calls()
        .iter()
        .filter(|c| c.starts_with("docker ps -a --format"))
        .count();
    assert_eq!(listings, 1);
    assert!(!collector.cache().is_empty());
}

#[tokio::test]
async fn test_truenas_detection_score_sums_signals() {
    // Given: A host with os-release, kernel and middleware socket signals
    let host = FakeHost::new()
        .with_command("uname", &["-r"], "6.6.44-production+truenas\n")
        .with_file("/etc/os-release", "NAME=\"TrueNAS SCALE\"\n")
        .with_socket("/var/run/middleware/middlewared.sock");
    let collector = TrueNasCollector::new(&Config::default(), Arc::new(host));

    // When: Scoring
    let score = collector.is_compatible().await.unwrap();

    // Then: 60 + 40 + 10
    assert_eq!(score, 110);
}

#[tokio::test]
async fn test_truenas_os_release_signal_reads_identity_fields() {
    // Given: A Debian os-release that only links to TrueNAS in an unrelated field
    let host = FakeHost::new().with_file(
        "/etc/os-release",
        "PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nNAME=\"Debian GNU/Linux\"\nID=debian\nSUPPORT_URL=\"https://www.truenas.com/\"\n",
    );
    let collector = TrueNasCollector::new(&Config::default(), Arc::new(host));

    // When: Scoring
    let score = collector.is_compatible().await.unwrap();

    // Then: The os-release signal does not fire
    assert_eq!(score, 0);

    // Given: An os-release identifying TrueNAS by ID only
    let host = FakeHost::new().with_file("/etc/os-release", "ID=truenas\n");
    let collector = TrueNasCollector::new(&Config::default(), Arc::new(host));

    // Then: The os-release weight applies
    assert_eq!(collector.is_compatible().await.unwrap(), 40);
}

#[tokio::test]
async fn test_truenas_vms_empty_without_api_key() {
    let collector = TrueNasCollector::new(&Config::default(), Arc::new(FakeHost::new()));
    assert!(collector.vms().await.unwrap().is_empty());
    assert!(!collector.enhanced_features_enabled());
}

/// Collector with scripted slice outcomes.
struct StubCollector {
    fail_vms: bool,
    fail_all: bool,
    detection: Option<DetectionInfo>,
}

impl StubCollector {
    fn new(fail_vms: bool, fail_all: bool) -> Self {
        Self {
            fail_vms,
            fail_all,
            detection: None,
        }
    }

    fn check(&self) -> Result<()> {
        if self.fail_all {
            Err(DiscoveryError::Parse("stub failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Collector for StubCollector {
    fn platform(&self) -> Platform {
        Platform::System
    }

    async fn is_compatible(&self) -> Result<u32> {
        Ok(1)
    }

    async fn system_info(&self) -> Result<SystemInfo> {
        self.check()?;
        Ok(SystemInfo::new("stub", "1.0", Platform::System))
    }

    async fn applications(&self) -> Result<Vec<Application>> {
        self.check()?;
        Ok(vec![Application::new("a1", "app", Platform::System)])
    }

    async fn ports(&self) -> Result<Vec<PortEntry>> {
        self.check()?;
        Ok(vec![PortEntry::system("sshd", Protocol::Tcp, "0.0.0.0", 22)])
    }

    async fn vms(&self) -> Result<Vec<Vm>> {
        self.check()?;
        if self.fail_vms {
            return Err(DiscoveryError::TrueNasApi("virt.instance.query failed".to_string()));
        }
        Ok(Vec::new())
    }

    fn set_detection_info(&mut self, info: DetectionInfo) {
        self.detection = Some(info);
    }

    fn detection_info(&self) -> Option<&DetectionInfo> {
        self.detection.as_ref()
    }
}

#[tokio::test]
async fn test_fan_out_keeps_other_slices_when_one_fails() {
    // Given: A collector whose VM probe fails
    let collector = StubCollector::new(true, false);

    // When: Fanning out
    let result = fan_out(&collector).await;

    // Then: The other slices survive and only vms is recorded
    assert!(result.system_info.is_some());
    assert_eq!(result.applications.len(), 1);
    assert_eq!(result.ports.len(), 1);
    assert!(result.vms.is_empty());
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors["vms"].contains("virt.instance.query failed"));
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_fan_out_sets_top_level_error_when_everything_fails() {
    let collector = StubCollector::new(false, true);
    let result = fan_out(&collector).await;
    assert!(result.error.is_some());
    assert_eq!(result.errors.len(), 4);
    assert!(result.system_info.is_none());
}

#[tokio::test]
async fn test_collect_all_embeds_detection_info() {
    // Given: A collector that was chosen by detection
    let mut collector = StubCollector::new(false, false);
    collector.set_detection_info(DetectionInfo::forced());

    // When: Collecting
    let result = collector.collect_all().await;

    // Then: The detection record travels with the system info
    let extra = &result.system_info.unwrap().platform_data.extra;
    assert_eq!(extra["detection"]["method"], "forced");
}
