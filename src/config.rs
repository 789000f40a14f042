use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub truenas: TrueNasConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    /// Force a collector (`truenas`, `docker`, `system`) instead of detecting one.
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub include_udp: bool,
    /// Port this process listens on, used to attribute it to its own container.
    #[serde(default)]
    pub self_port: Option<u16>,
    #[serde(default = "default_self_container_name")]
    pub self_container_name: String,
    #[serde(default = "default_docker_socket")]
    pub docker_socket: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrueNasConfig {
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Explicit WebSocket endpoint, skipping auto-discovery.
    #[serde(default)]
    pub ws_base: Option<String>,
    #[serde(default)]
    pub verify_tls: bool,
    #[serde(default = "default_socket_paths")]
    pub socket_paths: Vec<String>,
    #[serde(default = "default_phase_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_phase_timeout_ms")]
    pub auth_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_self_container_name() -> String {
    "portracker".to_string()
}

fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

fn default_socket_paths() -> Vec<String> {
    vec![
        "/var/run/middleware/middlewared.sock".to_string(),
        "/run/middleware/middlewared.sock".to_string(),
        "/var/run/middlewared.sock".to_string(),
    ]
}

fn default_phase_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_keepalive_interval_ms() -> u64 {
    20_000
}

fn default_cache_timeout_ms() -> u64 {
    60_000
}

fn default_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4999
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            platform: None,
            include_udp: false,
            self_port: None,
            self_container_name: default_self_container_name(),
            docker_socket: default_docker_socket(),
        }
    }
}

impl Default for TrueNasConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            ws_base: None,
            verify_tls: false,
            socket_paths: default_socket_paths(),
            connect_timeout_ms: default_phase_timeout_ms(),
            auth_timeout_ms: default_phase_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_cache_timeout_ms(),
            disabled: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            port: default_port(),
        }
    }
}

impl TrueNasConfig {
    /// True when a non-blank API key is configured.
    pub fn has_api_key(&self) -> bool {
        use secrecy::ExposeSecret;
        self.api_key
            .as_ref()
            .is_some_and(|k| !k.expose_secret().trim().is_empty())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

impl ServerConfig {
    /// Replace the bind address and port only where a value was given.
    pub fn apply_overrides(&mut self, addr: Option<String>, port: Option<u16>) {
        if let Some(addr) = addr.filter(|a| !a.trim().is_empty()) {
            self.addr = addr.trim().to_string();
        }
        if let Some(port) = port {
            self.port = port;
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        // Load environment variables from .env if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("PORTRACKER").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let mut config: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply the plain environment variables the engine has always honoured
    /// (`TRUENAS_API_KEY`, `CACHE_TIMEOUT_MS`, `DISABLE_CACHE`, `INCLUDE_UDP`,
    /// `TRUENAS_WS_BASE`, `PORT`) on top of file and prefixed settings.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("TRUENAS_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.truenas.api_key = Some(SecretString::from(key));
        }
        if let Some(base) = lookup("TRUENAS_WS_BASE").filter(|b| !b.trim().is_empty()) {
            self.truenas.ws_base = Some(base.trim().to_string());
        }
        if let Some(ms) = lookup("CACHE_TIMEOUT_MS") {
            self.cache.timeout_ms = ms
                .trim()
                .parse()
                .with_context(|| format!("CACHE_TIMEOUT_MS is not a number: {}", ms))?;
        }
        if let Some(flag) = lookup("DISABLE_CACHE") {
            self.cache.disabled = parse_flag(&flag);
        }
        if let Some(flag) = lookup("INCLUDE_UDP") {
            self.collector.include_udp = parse_flag(&flag);
        }
        if let Some(port) = lookup("PORT") {
            self.collector.self_port = Some(
                port.trim()
                    .parse()
                    .with_context(|| format!("PORT is not a valid port: {}", port))?,
            );
        }
        Ok(())
    }
}

/// `true`, `1`, `yes` and `on` (any case) are set; everything else is unset.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}
