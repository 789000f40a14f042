//! TrueNAS Middleware RPC Client
//!
//! [`TrueNasClient`] is the single entry point collectors use to talk to the
//! middleware. It owns the API key, runs endpoint discovery, and keeps one
//! [`WsConnection`] that every call is multiplexed over.
//!
//! # Degraded mode
//!
//! Without an API key the client is built in [`ClientMode::Degraded`]: it never
//! opens a socket and answers every call with an empty value (`[]` for
//! `*.query` methods, `{}` otherwise). Callers therefore never special-case the
//! unauthenticated setup.
//!
//! # Example
//!
//! ```no_run
//! use portracker_discovery::config::TrueNasConfig;
//! use portracker_discovery::host::SystemHost;
//! use portracker_discovery::truenas::TrueNasClient;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = TrueNasClient::new(TrueNasConfig::default(), Arc::new(SystemHost));
//! let apps = client.query_apps().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::TrueNasConfig;
use crate::error::{DiscoveryError, Result};
use crate::host::Host;
use crate::truenas::connection::{CloseReason, ConnectOptions, ConnectionState, WsConnection};
use crate::truenas::discovery::discover_endpoints;
use crate::truenas::types::{AppInfo, NasSystemInfo, VirtInstance};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Whether the client can reach the middleware at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    /// No API key: every call resolves to an empty value.
    Degraded,
    Live,
}

pub struct TrueNasClient {
    mode: ClientMode,
    config: TrueNasConfig,
    host: Arc<dyn Host>,
    connection: Mutex<Option<WsConnection>>,
}

impl TrueNasClient {
    pub fn new(config: TrueNasConfig, host: Arc<dyn Host>) -> Self {
        let mode = if config.has_api_key() {
            ClientMode::Live
        } else {
            info!("No TrueNAS API key configured; enhanced features disabled");
            ClientMode::Degraded
        };
        Self {
            mode,
            config,
            host,
            connection: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> ClientMode {
        self.mode
    }

    pub fn is_degraded(&self) -> bool {
        self.mode == ClientMode::Degraded
    }

    /// State of the current connection, if one was ever opened.
    pub async fn connection_state(&self) -> Option<ConnectionState> {
        self.connection.lock().await.as_ref().map(WsConnection::state)
    }

    /// Discover endpoints and open a fresh authenticated session, replacing any
    /// closed one. Returns the URL that authenticated.
    pub async fn connect(&self) -> Result<String> {
        let connection = {
            let mut guard = self.connection.lock().await;
            match guard.as_ref() {
                Some(existing) if !matches!(existing.state(), ConnectionState::Closed(_)) => {
                    existing.clone()
                }
                _ => {
                    let fresh = self.open().await?;
                    *guard = Some(fresh.clone());
                    fresh
                }
            }
        };
        connection.ready().await
    }

    /// Call a middleware method and return its raw result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        if self.is_degraded() {
            return Ok(degraded_response(method));
        }
        let connection = self.session().await?;
        connection.request(method, params).await
    }

    pub async fn query_system_info(&self) -> Result<NasSystemInfo> {
        self.execute_query("system.info", json!([])).await
    }

    pub async fn query_apps(&self) -> Result<Vec<AppInfo>> {
        self.execute_query("app.query", json!([])).await
    }

    /// VMs and system containers.
    pub async fn query_instances(&self) -> Result<Vec<VirtInstance>> {
        self.execute_query("virt.instance.query", json!([])).await
    }

    pub async fn close(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            connection.close().await;
        }
    }

    async fn execute_query<T>(&self, method: &str, params: Value) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| {
            DiscoveryError::TrueNasApi(format!("unexpected {} response: {}", method, e))
        })
    }

    /// Current session, opening one lazily. A session that was authenticated
    /// and then lost is not reopened here; callers go through [`connect`].
    ///
    /// [`connect`]: TrueNasClient::connect
    async fn session(&self) -> Result<WsConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(existing) = guard.as_ref() {
            match existing.state() {
                ConnectionState::Closed(CloseReason::Dropped(reason)) => {
                    return Err(DiscoveryError::connection(
                        "middleware",
                        format!("session lost ({}); call connect() to reopen", reason),
                    ));
                }
                ConnectionState::Closed(CloseReason::ClosedByClient) => {
                    return Err(DiscoveryError::connection(
                        "middleware",
                        "session closed; call connect() to reopen",
                    ));
                }
                ConnectionState::Closed(_) => {
                    debug!("Previous connection attempt failed; retrying discovery");
                }
                _ => return Ok(existing.clone()),
            }
        }

        let fresh = self.open().await?;
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    async fn open(&self) -> Result<WsConnection> {
        let api_key = self
            .config
            .api_key
            .clone()
            .ok_or_else(|| DiscoveryError::Config("TRUENAS_API_KEY is not set".to_string()))?;
        let urls = discover_endpoints(&self.config, self.host.as_ref()).await;
        if urls.is_empty() {
            return Err(DiscoveryError::Config(
                "no candidate middleware endpoints".to_string(),
            ));
        }
        Ok(WsConnection::spawn(
            urls,
            api_key,
            ConnectOptions::from(&self.config),
        ))
    }
}

impl std::fmt::Debug for TrueNasClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrueNasClient")
            .field("mode", &self.mode)
            .field("ws_base", &self.config.ws_base)
            .finish_non_exhaustive()
    }
}

/// What a degraded client answers for `method`.
pub fn degraded_response(method: &str) -> Value {
    if method.ends_with(".query") {
        json!([])
    } else {
        json!({})
    }
}

/// Build a live client directly from a key, bypassing environment lookup.
pub fn client_with_key(
    mut config: TrueNasConfig,
    api_key: impl Into<String>,
    host: Arc<dyn Host>,
) -> TrueNasClient {
    config.api_key = Some(SecretString::from(api_key.into()));
    TrueNasClient::new(config, host)
}
