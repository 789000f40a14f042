//! Docker containers on a TrueNAS host.
//!
//! `docker inspect` over every container id is the primary path because it
//! carries network mode, mounts and creation time. When inspect fails the
//! lighter `docker ps --format '{{json .}}'` listing is used instead.

use crate::collectors::docker::application_from_ps;
use crate::error::Result;
use crate::host::Host;
use crate::model::{AppStatus, Application, ContainerRef, Platform};
use crate::parsers::docker::{
    normalize_created, parse_inspect, parse_ps_json_lines, ContainerInspect, JSON_FORMAT,
};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

pub const CONTAINERS_CACHE_KEY: &str = "dockerContainers";
pub const CONTAINERS_TTL: Duration = Duration::from_secs(45);

pub async fn list_containers(host: &dyn Host) -> Result<Vec<Application>> {
    match inspect_all(host).await {
        Ok(apps) => Ok(apps),
        Err(e) => {
            warn!("docker inspect failed, falling back to docker ps: {}", e);
            let output = host
                .run("docker", &["ps", "-a", "--format", JSON_FORMAT])
                .await?;
            Ok(parse_ps_json_lines(&output)
                .iter()
                .map(application_from_ps)
                .collect())
        }
    }
}

async fn inspect_all(host: &dyn Host) -> Result<Vec<Application>> {
    let ids = host.run("docker", &["ps", "-a", "-q", "--no-trunc"]).await?;
    let ids: Vec<&str> = ids.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if ids.is_empty() {
        debug!("No containers present");
        return Ok(Vec::new());
    }

    let mut args = vec!["inspect"];
    args.extend(ids.iter().copied());
    let output = host.run("docker", &args).await?;
    Ok(parse_inspect(&output)?
        .iter()
        .map(application_from_inspect)
        .collect())
}

pub fn application_from_inspect(container: &ContainerInspect) -> Application {
    let state = &container.state;
    let status = if state.paused {
        AppStatus::Paused
    } else if state.restarting {
        AppStatus::Restarting
    } else {
        AppStatus::from_container_state(&state.status)
    };

    let mut app = Application::new(container.id.clone(), container.clean_name(), Platform::Docker);
    app.status = status;
    app.image = Some(container.config.image.clone()).filter(|i| !i.is_empty());
    app.created = container.created.as_deref().and_then(normalize_created);

    let mounts: Vec<Value> = container
        .mounts
        .iter()
        .map(|m| {
            json!({
                "type": m.kind,
                "source": m.source,
                "destination": m.destination,
                "rw": m.rw,
            })
        })
        .collect();
    app.platform_data = json!({
        "network_mode": container.host_config.network_mode,
        "networks": container.network_names(),
        "mounts": mounts,
        "labels": container.config.labels,
        "pid": state.pid,
        "started_at": state.started_at,
    });
    app
}

/// Whether a container shares the host network namespace.
pub fn uses_host_network(app: &Application) -> bool {
    if app.platform_data.get("network_mode").and_then(Value::as_str) == Some("host") {
        return true;
    }
    app.platform_data
        .get("networks")
        .and_then(Value::as_array)
        .is_some_and(|networks| networks.iter().any(|n| n.as_str() == Some("host")))
}

pub fn container_refs(apps: &[Application]) -> Vec<ContainerRef> {
    apps.iter().map(Application::as_container_ref).collect()
}
