//! Prometheus Metrics Definitions
//!
//! Metrics describing discovery runs. The server updates them after every
//! on-demand collection, so they always reflect the most recent run.
//!
//! # Metrics
//!
//! - `portracker_collections_total{platform,status}` - Runs, by outcome (`ok`/`partial`/`failed`)
//! - `portracker_ports{source,protocol}` - Ports found in the last run
//! - `portracker_applications` / `portracker_vms` - Entity counts from the last run
//! - `portracker_collection_errors{field}` - 1 for each field that failed in the last run
//! - `portracker_detection_score{platform}` - Confidence score of each candidate
//! - `portracker_collection_duration_seconds` - Run latency histogram
//! - `portracker_enhanced_features` - 1 when middleware data was available
//! - `portracker_up` - 1 when the last run produced a result without a top-level error
//!
//! All metrics use the `portracker_` namespace prefix.

use crate::collectors::DetectionInfo;
use crate::model::{CollectionResult, PortSource};
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Metrics for discovery runs
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,

    pub collections_total: Arc<IntCounterVec>,
    pub ports: Arc<IntGaugeVec>,
    pub applications: Arc<IntGauge>,
    pub vms: Arc<IntGauge>,
    pub collection_errors: Arc<IntGaugeVec>,
    pub detection_score: Arc<IntGaugeVec>,
    pub collection_duration_seconds: Arc<Histogram>,
    pub enhanced_features: Arc<IntGauge>,
    pub up: Arc<Gauge>,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let collections_total = IntCounterVec::new(
            Opts::new("collections_total", "Discovery runs by platform and outcome")
                .namespace("portracker"),
            &["platform", "status"],
        )?;

        let ports = IntGaugeVec::new(
            Opts::new("ports", "Listening ports found in the last run").namespace("portracker"),
            &["source", "protocol"],
        )?;

        let applications = IntGauge::with_opts(
            Opts::new("applications", "Applications found in the last run")
                .namespace("portracker"),
        )?;

        let vms = IntGauge::with_opts(
            Opts::new("vms", "Virtual machines found in the last run").namespace("portracker"),
        )?;

        let collection_errors = IntGaugeVec::new(
            Opts::new(
                "collection_errors",
                "Fields that failed in the last run (1=failed)",
            )
            .namespace("portracker"),
            &["field"],
        )?;

        let detection_score = IntGaugeVec::new(
            Opts::new("detection_score", "Compatibility score reported by each collector")
                .namespace("portracker"),
            &["platform"],
        )?;

        let collection_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "collection_duration_seconds",
                "Time taken by one discovery run",
            )
            .namespace("portracker")
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )?;

        let enhanced_features = IntGauge::with_opts(
            Opts::new(
                "enhanced_features",
                "Whether middleware data was available in the last run (1=yes)",
            )
            .namespace("portracker"),
        )?;

        let up = Gauge::new(
            "portracker_up",
            "Whether the last run produced a result (1=up, 0=down)",
        )?;

        registry.register(Box::new(collections_total.clone()))?;
        registry.register(Box::new(ports.clone()))?;
        registry.register(Box::new(applications.clone()))?;
        registry.register(Box::new(vms.clone()))?;
        registry.register(Box::new(collection_errors.clone()))?;
        registry.register(Box::new(detection_score.clone()))?;
        registry.register(Box::new(collection_duration_seconds.clone()))?;
        registry.register(Box::new(enhanced_features.clone()))?;
        registry.register(Box::new(up.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            collections_total: Arc::new(collections_total),
            ports: Arc::new(ports),
            applications: Arc::new(applications),
            vms: Arc::new(vms),
            collection_errors: Arc::new(collection_errors),
            detection_score: Arc::new(detection_score),
            collection_duration_seconds: Arc::new(collection_duration_seconds),
            enhanced_features: Arc::new(enhanced_features),
            up: Arc::new(up),
        })
    }

    /// Update every gauge from one finished run.
    pub fn record_collection(&self, result: &CollectionResult, elapsed: Duration) {
        let status = if result.error.is_some() {
            "failed"
        } else if result.has_errors() {
            "partial"
        } else {
            "ok"
        };
        self.collections_total
            .with_label_values(&[result.platform.as_str(), status])
            .inc();
        self.collection_duration_seconds
            .observe(elapsed.as_secs_f64());

        self.ports.reset();
        let mut counts: HashMap<(&str, &str), i64> = HashMap::new();
        for port in &result.ports {
            let source = match port.source {
                PortSource::Docker => "docker",
                PortSource::System => "system",
            };
            *counts.entry((source, port.protocol.as_str())).or_default() += 1;
        }
        for ((source, protocol), count) in counts {
            self.ports.with_label_values(&[source, protocol]).set(count);
        }

        self.applications.set(result.applications.len() as i64);
        self.vms.set(result.vms.len() as i64);

        self.collection_errors.reset();
        for field in result.errors.keys() {
            self.collection_errors
                .with_label_values(&[field.as_str()])
                .set(1);
        }

        self.enhanced_features
            .set(i64::from(result.enhanced_features_enabled));
        self.up.set(if result.error.is_none() { 1.0 } else { 0.0 });
    }

    pub fn record_detection(&self, detection: &DetectionInfo) {
        self.detection_score.reset();
        for (platform, score) in &detection.candidates {
            self.detection_score
                .with_label_values(&[platform.as_str()])
                .set(i64::from(*score));
        }
    }

    /// Render metrics in Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics collector")
    }
}
