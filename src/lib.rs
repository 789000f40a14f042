//! Portracker Discovery
//!
//! A host and service discovery engine: listening ports, containers, native
//! apps and virtual machines on a generic Linux/Windows host, a Docker host, or
//! TrueNAS SCALE.
//!
//! # Overview
//!
//! A caller asks the [`registry`] for the collector that best fits the current
//! host, then runs [`collectors::Collector::collect_all`]. The result is one
//! [`model::CollectionResult`] that is always well-formed: a failing probe
//! empties its own field and records why, it never aborts the run.
//!
//! # Architecture
//!
//! ```text
//!  caller ──► registry::detect_collector ──► Collector::collect_all
//!                                               │
//!                     ┌─────────────────────────┼──────────────────────────┐
//!                     ▼                         ▼                          ▼
//!              SystemCollector           DockerCollector           TrueNasCollector
//!              (ss / netstat)        (docker ps / inspect / top)   (local probes + RPC)
//!                                                                          │
//!                                                                          ▼
//!                                                            truenas::TrueNasClient
//!                                                         discovery ─► WebSocket (DDP)
//! ```
//!
//! # Modules
//!
//! - [`model`] - Canonical port, application, VM and system records
//! - [`collectors`] - Collector trait and the three platform collectors
//! - [`registry`] - Collector factory and confidence-scored detection
//! - [`truenas`] - Middleware client, WebSocket transport and endpoint discovery
//! - [`parsers`] - Pure parsers for `ss`, `netstat`, `docker` and `/proc` output
//! - [`host`] - Shell and filesystem access behind a trait
//! - [`cache`] - Per-collector TTL cache
//! - [`metrics`] / [`server`] - Prometheus metrics and the on-demand HTTP surface
//! - [`config`] / [`error`] - Configuration and error types
//!
//! # Quick Start
//!
//! ```no_run
//! use portracker_discovery::{config::Config, host::SystemHost, registry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/Default.toml")?;
//!     let collector = registry::detect_collector(&config, Arc::new(SystemHost)).await;
//!     let result = collector.collect_all().await;
//!     println!("{} ports", result.ports.len());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod collectors;
pub mod config;
pub mod error;
pub mod host;
pub mod metrics;
pub mod model;
pub mod parsers;
pub mod registry;
pub mod server;
pub mod truenas;
