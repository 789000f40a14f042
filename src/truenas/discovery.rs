//! Endpoint Auto-Discovery
//!
//! Works out which WebSocket URLs might reach the middleware:
//!
//! 1. `TRUENAS_WS_BASE` short-circuits everything.
//! 2. Otherwise `system.general.config` is fetched over the middleware UNIX
//!    socket (`POST /_middleware`) to learn the UI port, scheme and addresses.
//! 3. If that fails, a fixed matrix of common ports is used.
//!
//! Host addresses are loopback plus, when running inside a container, the
//! Docker bridge gateways.

use crate::config::TrueNasConfig;
use crate::error::{DiscoveryError, Result};
use crate::host::Host;
use crate::parsers::procfs::parse_default_gateways;
use crate::truenas::types::{GeneralConfig, SocketResponse};
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, info, warn};

const WEBSOCKET_PATH: &str = "/websocket";
const DOCKER_BRIDGE_GATEWAY: &str = "172.17.0.1";
const DOCKER_HOST_ALIAS: &str = "host.docker.internal";

/// Scheme and port a WebSocket endpoint is expected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UiEndpoint {
    pub secure: bool,
    pub port: u16,
}

impl UiEndpoint {
    pub const fn ws(port: u16) -> Self {
        Self {
            secure: false,
            port,
        }
    }

    pub const fn wss(port: u16) -> Self {
        Self { secure: true, port }
    }

    fn scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }
}

/// Used when the middleware could not be asked.
pub const FALLBACK_ENDPOINTS: [UiEndpoint; 4] = [
    UiEndpoint::wss(443),
    UiEndpoint::ws(80),
    UiEndpoint::wss(8443),
    UiEndpoint::ws(8080),
];

/// Ordered, de-duplicated list of candidate WebSocket URLs.
pub async fn discover_endpoints(config: &TrueNasConfig, host: &dyn Host) -> Vec<String> {
    if let Some(base) = config.ws_base.as_deref().filter(|b| !b.trim().is_empty()) {
        let url = normalize_ws_base(base);
        info!("Using configured TrueNAS WebSocket endpoint {}", url);
        return vec![url];
    }

    let general = match query_general_config(config, host).await {
        Ok(general) => Some(general),
        Err(e) => {
            warn!("Middleware socket discovery failed, using fallback ports: {}", e);
            None
        }
    };

    let hosts = host_addresses(host, general.as_ref()).await;
    let candidates = match &general {
        Some(general) => build_candidates(&hosts, &endpoints_from_general_config(general)),
        None => build_candidates(&hosts, &FALLBACK_ENDPOINTS),
    };
    debug!("Candidate endpoints: {:?}", candidates);
    candidates
}

/// Accepts `host`, `host:port`, `ws://host:port` or a full URL with a path.
pub fn normalize_ws_base(base: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    let with_scheme = if base.contains("://") {
        base.to_string()
    } else {
        format!("ws://{}", base)
    };

    let authority_start = with_scheme.find("://").map(|i| i + 3).unwrap_or(0);
    if with_scheme[authority_start..].contains('/') {
        with_scheme
    } else {
        format!("{}{}", with_scheme, WEBSOCKET_PATH)
    }
}

pub fn endpoints_from_general_config(general: &GeneralConfig) -> Vec<UiEndpoint> {
    let http = UiEndpoint::ws(general.ui_port);
    let https = UiEndpoint::wss(general.ui_httpsport);
    if general.ui_httpsredirect {
        vec![https, http]
    } else {
        vec![http, https]
    }
}

/// Every host × endpoint combination, host-major, without duplicates.
pub fn build_candidates(hosts: &[String], endpoints: &[UiEndpoint]) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for host in hosts {
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]", host)
        } else {
            host.clone()
        };
        for endpoint in endpoints {
            let url = format!(
                "{}://{}:{}{}",
                endpoint.scheme(),
                host,
                endpoint.port,
                WEBSOCKET_PATH
            );
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
    }
    urls
}

/// Loopback first, then container gateways and any specific UI addresses.
pub async fn host_addresses(host: &dyn Host, general: Option<&GeneralConfig>) -> Vec<String> {
    let mut addresses = vec!["127.0.0.1".to_string()];
    let mut push = |address: String| {
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    };

    if host.exists(Path::new("/.dockerenv")).await {
        debug!("Running inside a container; adding bridge gateways");
        if let Ok(routes) = host.read_to_string(Path::new("/proc/net/route")).await {
            for gateway in parse_default_gateways(&routes) {
                push(gateway.to_string());
            }
        }
        push(DOCKER_BRIDGE_GATEWAY.to_string());
        push(DOCKER_HOST_ALIAS.to_string());
    }

    if let Some(general) = general {
        for address in &general.ui_address {
            if address != "0.0.0.0" && address != "::" && !address.is_empty() {
                push(address.clone());
            }
        }
    }

    addresses
}

async fn query_general_config(config: &TrueNasConfig, host: &dyn Host) -> Result<GeneralConfig> {
    let mut last_error = None;
    for path in &config.socket_paths {
        let path = Path::new(path);
        if !host.is_socket(path).await {
            continue;
        }
        match call_middleware_socket(path, "system.general.config", json!([])).await {
            Ok(value) => {
                info!("Discovered TrueNAS UI settings via {}", path.display());
                return Ok(serde_json::from_value(value)?);
            }
            Err(e) => {
                debug!("Middleware socket {} failed: {}", path.display(), e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        DiscoveryError::Config("no middleware socket found".to_string())
    }))
}

/// Call a middleware method with an HTTP POST over a UNIX domain socket.
#[cfg(unix)]
pub async fn call_middleware_socket(path: &Path, method: &str, params: Value) -> Result<Value> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let body = serde_json::to_string(&json!({
        "id": "discovery",
        "msg": "method",
        "method": method,
        "params": params,
    }))?;
    let request = format!(
        "POST /_middleware HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );

    let mut stream = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        tokio::net::UnixStream::connect(path),
    )
    .await
    .map_err(|_| DiscoveryError::connection(path.display().to_string(), "socket connect timed out"))??;
    stream.write_all(request.as_bytes()).await?;

    let mut raw = Vec::new();
    tokio::time::timeout(std::time::Duration::from_secs(10), stream.read_to_end(&mut raw))
        .await
        .map_err(|_| DiscoveryError::connection(path.display().to_string(), "socket read timed out"))??;

    parse_http_response(&raw)
}

#[cfg(not(unix))]
pub async fn call_middleware_socket(path: &Path, _method: &str, _params: Value) -> Result<Value> {
    Err(DiscoveryError::connection(
        path.display().to_string(),
        "UNIX sockets are not available on this platform",
    ))
}

/// Parse a raw HTTP/1.1 response carrying a `{result}` / `{error}` body.
pub fn parse_http_response(raw: &[u8]) -> Result<Value> {
    let split = find(raw, b"\r\n\r\n").ok_or_else(|| {
        DiscoveryError::Parse("HTTP response without header terminator".to_string())
    })?;
    let head = String::from_utf8_lossy(&raw[..split]);
    let body = &raw[split + 4..];

    let mut lines = head.lines();
    let status = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| DiscoveryError::Parse("malformed HTTP status line".to_string()))?;

    let chunked = lines.any(|line| {
        let lower = line.to_ascii_lowercase();
        lower.starts_with("transfer-encoding:") && lower.contains("chunked")
    });
    let body = if chunked {
        decode_chunked(body)?
    } else {
        body.to_vec()
    };
    let body = String::from_utf8(body)
        .map_err(|e| DiscoveryError::Parse(format!("response body is not UTF-8: {}", e)))?;

    if !(200..300).contains(&status) {
        return Err(DiscoveryError::TrueNasApi(format!(
            "middleware socket returned HTTP {}: {}",
            status,
            body.trim()
        )));
    }

    let response: SocketResponse = serde_json::from_str(body.trim())?;
    match response.error {
        Some(error) if !error.is_null() => Err(DiscoveryError::TrueNasApi(error.to_string())),
        _ => Ok(response.result.unwrap_or(Value::Null)),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Chunk sizes count bytes, so reassembly happens before any UTF-8 decoding.
fn decode_chunked(body: &[u8]) -> Result<Vec<u8>> {
    let mut decoded = Vec::new();
    let mut rest = body;
    loop {
        let line_end = find(rest, b"\r\n")
            .ok_or_else(|| DiscoveryError::Parse("truncated chunk header".to_string()))?;
        let size_line = String::from_utf8_lossy(&rest[..line_end]);
        let size_hex = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| DiscoveryError::Parse(format!("bad chunk size {:?}", size_hex)))?;
        if size == 0 {
            return Ok(decoded);
        }
        let after = &rest[line_end + 2..];
        let chunk = after
            .get(..size)
            .ok_or_else(|| DiscoveryError::Parse("truncated chunk".to_string()))?;
        decoded.extend_from_slice(chunk);
        rest = after[size..].strip_prefix(b"\r\n").unwrap_or(&after[size..]);
    }
}
