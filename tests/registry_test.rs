//! Registry and detection tests

mod common;

use async_trait::async_trait;
use common::FakeHost;
use portracker_discovery::collectors::{Collector, DetectionInfo, DetectionMethod};
use portracker_discovery::config::Config;
use portracker_discovery::error::{DiscoveryError, Result};
use portracker_discovery::model::{Application, Platform, PortEntry, SystemInfo, Vm};
use portracker_discovery::registry::{
    create_collector, detect_collector, detect_from, resolve_collector,
};
use std::sync::Arc;

/// Collector that only reports a fixed compatibility outcome.
struct Scored {
    platform: Platform,
    score: Option<u32>,
    detection: Option<DetectionInfo>,
}

fn scored(platform: Platform, score: Option<u32>) -> Box<dyn Collector> {
    Box::new(Scored {
        platform,
        score,
        detection: None,
    })
}

#[async_trait]
impl Collector for Scored {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn is_compatible(&self) -> Result<u32> {
        self.score
            .ok_or_else(|| DiscoveryError::Parse("probe exploded".to_string()))
    }

    async fn system_info(&self) -> Result<SystemInfo> {
        Ok(SystemInfo::new("stub", "1", self.platform))
    }

    async fn applications(&self) -> Result<Vec<Application>> {
        Ok(Vec::new())
    }

    async fn ports(&self) -> Result<Vec<PortEntry>> {
        Ok(Vec::new())
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

fn fallback() -> Box<dyn Collector> {
    scored(Platform::System, Some(0))
}

#[tokio::test]
async fn test_highest_score_wins() {
    // Given: Scores 0, 50 and 10
    let candidates = vec![
        scored(Platform::Truenas, Some(0)),
        scored(Platform::Docker, Some(50)),
        scored(Platform::System, Some(10)),
    ];

    // When: Detecting
    let chosen = detect_from(candidates, fallback).await;

    // Then: Docker is chosen and the detection record lists every candidate
    assert_eq!(chosen.platform(), Platform::Docker);
    let detection = chosen.detection_info().expect("detection info");
    assert_eq!(detection.method, DetectionMethod::Auto);
    assert_eq!(detection.score, 50);
    assert_eq!(
        detection.candidates,
        vec![
            (Platform::Truenas, 0),
            (Platform::Docker, 50),
            (Platform::System, 10)
        ]
    );
}

#[tokio::test]
async fn test_tie_goes_to_earlier_candidate() {
    let candidates = vec![
        scored(Platform::Truenas, Some(40)),
        scored(Platform::Docker, Some(40)),
    ];
    let chosen = detect_from(candidates, fallback).await;
    assert_eq!(chosen.platform(), Platform::Truenas);
}

#[tokio::test]
async fn test_all_zero_uses_fallback() {
    // Given: Nobody claims the host
    let candidates = vec![
        scored(Platform::Truenas, Some(0)),
        scored(Platform::Docker, Some(0)),
    ];

    // When: Detecting
    let chosen = detect_from(candidates, fallback).await;

    // Then: The generic collector is used with score 0
    assert_eq!(chosen.platform(), Platform::System);
    assert_eq!(chosen.detection_info().unwrap().score, 0);
}

#[tokio::test]
async fn test_scoring_error_counts_as_zero() {
    // Given: The first probe fails outright
    let candidates = vec![
        scored(Platform::Truenas, None),
        scored(Platform::Docker, Some(5)),
    ];

    // When: Detecting
    let chosen = detect_from(candidates, fallback).await;

    // Then: The failure does not abort detection
    assert_eq!(chosen.platform(), Platform::Docker);
    assert_eq!(
        chosen.detection_info().unwrap().candidates[0],
        (Platform::Truenas, 0)
    );
}

#[test]
fn test_create_collector_by_name() {
    let config = Config::default();
    let host = Arc::new(FakeHost::new());
    assert_eq!(
        create_collector("truenas", &config, host.clone()).platform(),
        Platform::Truenas
    );
    assert_eq!(
        create_collector("Docker", &config, host.clone()).platform(),
        Platform::Docker
    );
    assert_eq!(
        create_collector("system", &config, host.clone()).platform(),
        Platform::System
    );
}

#[test]
fn test_unknown_platform_falls_back_to_system() {
    let collector = create_collector("solaris", &Config::default(), Arc::new(FakeHost::new()));
    assert_eq!(collector.platform(), Platform::System);
}

#[tokio::test]
async fn test_detect_on_bare_host_picks_system() {
    // Given: No TrueNAS or Docker signals
    let host = Arc::new(FakeHost::new());

    // When: Detecting against the real candidate list
    let collector = detect_collector(&Config::default(), host).await;

    // Then: Only the generic collector scores
    assert_eq!(collector.platform(), Platform::System);
    assert_eq!(collector.detection_info().unwrap().score, 10);
}

#[tokio::test]
async fn test_detect_prefers_docker_socket_over_system() {
    let host = Arc::new(FakeHost::new().with_socket("/var/run/docker.sock"));
    let collector = detect_collector(&Config::default(), host).await;
    assert_eq!(collector.platform(), Platform::Docker);
}

#[tokio::test]
async fn test_configured_platform_skips_detection() {
    // Given: A forced platform
    let mut config = Config::default();
    config.collector.platform = Some("docker".to_string());

    // When: Resolving
    let collector = resolve_collector(&config, Arc::new(FakeHost::new())).await;

    // Then: The forced collector is returned without probing
    assert_eq!(collector.platform(), Platform::Docker);
    assert_eq!(
        collector.detection_info().unwrap().method,
        DetectionMethod::Forced
    );
}
