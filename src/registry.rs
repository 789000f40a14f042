//! Collector Registry
//!
//! [`create_collector`] builds a collector by platform name. [`detect_collector`]
//! asks every known collector how confident it is about the current host and
//! keeps the best one.
//!
//! Candidates are scored in a fixed priority order (TrueNAS, Docker, generic);
//! a later candidate must score strictly higher to win, so ties go to the
//! earlier one. A scoring error counts as 0.

use crate::collectors::{
    Collector, DetectionInfo, DetectionMethod, DockerCollector, SystemCollector, TrueNasCollector,
};
use crate::config::Config;
use crate::host::Host;
use crate::model::Platform;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Build the collector for `platform`. Unknown names fall back to the generic
/// OS collector.
pub fn create_collector(
    platform: &str,
    config: &Config,
    host: Arc<dyn Host>,
) -> Box<dyn Collector> {
    match Platform::parse(platform) {
        Some(platform) => build(platform, config, host),
        None => {
            warn!("Unknown platform '{}', using the generic collector", platform);
            build(Platform::System, config, host)
        }
    }
}

fn build(platform: Platform, config: &Config, host: Arc<dyn Host>) -> Box<dyn Collector> {
    match platform {
        Platform::Truenas => Box::new(TrueNasCollector::new(config, host)),
        Platform::Docker => Box::new(DockerCollector::new(config.collector.clone(), host)),
        Platform::System => Box::new(SystemCollector::new(host)),
    }
}

/// Honour a configured platform, otherwise detect one.
pub async fn resolve_collector(config: &Config, host: Arc<dyn Host>) -> Box<dyn Collector> {
    match config.collector.platform.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(platform) => {
            info!("Using configured platform '{}'", platform);
            let mut collector = create_collector(platform, config, host);
            collector.set_detection_info(DetectionInfo::forced());
            collector
        }
        None => detect_collector(config, host).await,
    }
}

pub async fn detect_collector(config: &Config, host: Arc<dyn Host>) -> Box<dyn Collector> {
    let candidates = Platform::ALL
        .iter()
        .map(|platform| build(*platform, config, host.clone()))
        .collect();
    detect_from(candidates, || {
        Box::new(SystemCollector::new(host.clone())) as Box<dyn Collector>
    })
    .await
}

/// Pick the highest-scoring candidate, or `fallback()` when every score is 0.
pub async fn detect_from<F>(
    candidates: Vec<Box<dyn Collector>>,
    fallback: F,
) -> Box<dyn Collector>
where
    F: FnOnce() -> Box<dyn Collector>,
{
    let mut scores = Vec::with_capacity(candidates.len());
    let mut best: Option<(usize, u32)> = None;

    for (index, candidate) in candidates.iter().enumerate() {
        let score = match candidate.is_compatible().await {
            Ok(score) => score,
            Err(e) => {
                warn!(platform = %candidate.platform(), "Compatibility check failed: {}", e);
                0
            }
        };
        debug!(platform = %candidate.platform(), score, "Compatibility score");
        scores.push((candidate.platform(), score));
        if score > best.map_or(0, |(_, s)| s) {
            best = Some((index, score));
        }
    }

    let (mut chosen, score) = match best {
        Some((index, score)) => match candidates.into_iter().nth(index) {
            Some(collector) => (collector, score),
            None => (fallback(), 0),
        },
        None => {
            warn!("No collector reported a positive score, using the generic collector");
            (fallback(), 0)
        }
    };

    info!(platform = %chosen.platform(), score, "Selected collector");
    chosen.set_detection_info(DetectionInfo {
        method: DetectionMethod::Auto,
        score,
        candidates: scores,
    });
    chosen
}
