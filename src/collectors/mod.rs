//! Platform Collectors
//!
//! Each collector answers the same five questions about the host it runs on:
//! system facts, applications, listening ports, virtual machines, and all of
//! the above at once.
//!
//! # Architecture
//!
//! Collectors implement the [`Collector`] trait and declare a
//! [`CollectionStrategy`]:
//! - `FanOut` runs the four getters concurrently and tolerates independent
//!   failure (see [`fan_out`])
//! - `Unified` delegates to the collector's own [`Collector::collect`], which
//!   orders and shares work between the slices itself
//!
//! # Error Handling
//!
//! A failing slice never fails the collection. Its field is left empty (or
//! `None`) and the reason lands in [`CollectionResult::errors`], keyed by
//! field name. Only when every slice fails is [`CollectionResult::error`] set.

use crate::error::Result;
use crate::model::{Application, CollectionResult, Platform, PortEntry, SystemInfo, Vm};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

pub mod docker;
pub mod reconcile;
pub mod system;
pub mod truenas;

pub use docker::DockerCollector;
pub use system::SystemCollector;
pub use truenas::TrueNasCollector;

/// How [`Collector::collect_all`] gathers data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStrategy {
    /// Run the four getters concurrently, all-settled.
    FanOut,
    /// The collector provides its own ordered [`Collector::collect`].
    Unified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    Auto,
    Forced,
}

/// How a collector came to be chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionInfo {
    pub method: DetectionMethod,
    pub score: u32,
    pub candidates: Vec<(Platform, u32)>,
}

impl DetectionInfo {
    pub fn forced() -> Self {
        Self {
            method: DetectionMethod::Forced,
            score: 0,
            candidates: Vec::new(),
        }
    }
}

#[async_trait]
pub trait Collector: Send + Sync {
    fn platform(&self) -> Platform;

    fn platform_name(&self) -> &'static str {
        self.platform().display_name()
    }

    fn strategy(&self) -> CollectionStrategy {
        CollectionStrategy::FanOut
    }

    /// Confidence (0-100) that this collector fits the current host.
    async fn is_compatible(&self) -> Result<u32>;

    async fn system_info(&self) -> Result<SystemInfo>;

    async fn applications(&self) -> Result<Vec<Application>>;

    async fn ports(&self) -> Result<Vec<PortEntry>>;

    async fn vms(&self) -> Result<Vec<Vm>>;

    /// Unified collection. Collectors declaring [`CollectionStrategy::Unified`]
    /// override this.
    async fn collect(&self) -> CollectionResult {
        fan_out(self).await
    }

    async fn collect_all(&self) -> CollectionResult {
        let mut result = match self.strategy() {
            CollectionStrategy::Unified => self.collect().await,
            CollectionStrategy::FanOut => fan_out(self).await,
        };
        if let (Some(detection), Some(system_info)) =
            (self.detection_info(), result.system_info.as_mut())
        {
            if let Ok(value) = serde_json::to_value(detection) {
                system_info
                    .platform_data
                    .extra
                    .insert("detection".to_string(), value);
            }
        }
        result
    }

    fn set_detection_info(&mut self, info: DetectionInfo);

    fn detection_info(&self) -> Option<&DetectionInfo>;

    fn enhanced_features_enabled(&self) -> bool {
        false
    }
}

/// Run all four getters concurrently and merge them into one result.
pub async fn fan_out<C: Collector + ?Sized>(collector: &C) -> CollectionResult {
    let (system_info, applications, ports, vms) = tokio::join!(
        collector.system_info(),
        collector.applications(),
        collector.ports(),
        collector.vms(),
    );

    let mut result = CollectionResult::empty(collector.platform());
    result.platform_name = collector.platform_name().to_string();
    result.enhanced_features_enabled = collector.enhanced_features_enabled();
    result.system_info = settle(&mut result, "systemInfo", system_info);
    result.applications = settle(&mut result, "applications", applications).unwrap_or_default();
    result.ports = settle(&mut result, "ports", ports).unwrap_or_default();
    result.vms = settle(&mut result, "vms", vms).unwrap_or_default();
    if result.errors.len() == 4 {
        result.error = Some("every collection slice failed".to_string());
    }

    info!(
        platform = %result.platform,
        ports = result.ports.len(),
        applications = result.applications.len(),
        vms = result.vms.len(),
        errors = result.errors.len(),
        "Collection finished"
    );
    result
}

/// Record a failed slice on `result` and hand back the value when it succeeded.
pub fn settle<T, E>(
    result: &mut CollectionResult,
    field: &str,
    outcome: std::result::Result<T, E>,
) -> Option<T>
where
    E: std::fmt::Display,
{
    match outcome {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to collect {}: {}", field, e);
            result.record_error(field, e);
            None
        }
    }
}
