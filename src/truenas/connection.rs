//! WebSocket Connection Management
//!
//! This module owns the single logical WebSocket session to the TrueNAS
//! middleware. A background task walks the candidate URLs in order and, for
//! each one, runs the connect → handshake → authenticate protocol:
//!
//! ```text
//! Idle → Connecting(url) → HandshakeSent → Authenticating → Authenticated
//!                 │               │               │
//!                 └── error / timeout ──► next candidate ──► … ──► Closed
//! ```
//!
//! Calls issued before authentication are queued in submission order and
//! replayed once the session is authenticated. After that every call gets a
//! fresh id and is matched to its `result` frame, so concurrent calls share
//! the one socket. A keep-alive ping is sent on a fixed interval.
//!
//! There is no reconnect once an authenticated session drops; callers open a
//! new connection.

use crate::config::TrueNasConfig;
use crate::error::{DiscoveryError, Result, TimeoutPhase};
use crate::truenas::types::{DdpConnect, JsonRpcRequest, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Reply = oneshot::Sender<Result<Value>>;

/// Timeouts and TLS behaviour for one connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
    pub request_timeout: Duration,
    pub keepalive_interval: Duration,
    pub verify_tls: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(20),
            verify_tls: false,
        }
    }
}

impl From<&TrueNasConfig> for ConnectOptions {
    fn from(config: &TrueNasConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            auth_timeout: config.auth_timeout(),
            request_timeout: config.request_timeout(),
            keepalive_interval: config.keepalive_interval(),
            verify_tls: config.verify_tls,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Every candidate failed before authenticating.
    Exhausted(String),
    /// The middleware answered the login with an error.
    AuthRejected(String),
    /// An authenticated session was lost.
    Dropped(String),
    ClosedByClient,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Exhausted(last) => write!(f, "all candidate endpoints failed ({})", last),
            CloseReason::AuthRejected(reason) => write!(f, "authentication rejected: {}", reason),
            CloseReason::Dropped(reason) => write!(f, "session dropped: {}", reason),
            CloseReason::ClosedByClient => f.write_str("closed by client"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting { url: String },
    HandshakeSent { url: String },
    Authenticating { url: String },
    Authenticated { url: String },
    Closed(CloseReason),
}

impl ConnectionState {
    fn is_settled(&self) -> bool {
        matches!(
            self,
            ConnectionState::Authenticated { .. } | ConnectionState::Closed(_)
        )
    }
}

struct PendingCall {
    method: String,
    params: Value,
    reply: Reply,
}

enum Command {
    Call(PendingCall),
    Close,
}

/// Handle on a middleware session. Cheap to clone; all clones share the socket.
#[derive(Clone)]
pub struct WsConnection {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    request_timeout: Duration,
}

/// Connect to the first candidate that authenticates.
///
/// Resolves once the session is `Authenticated`; fails once every candidate
/// has been tried or the API key was rejected.
pub async fn connect_ws(
    urls: Vec<String>,
    api_key: SecretString,
    options: ConnectOptions,
) -> Result<WsConnection> {
    let connection = WsConnection::spawn(urls, api_key, options);
    connection.ready().await?;
    Ok(connection)
}

impl WsConnection {
    /// Start connecting in the background and return immediately. Calls made
    /// on the handle before authentication completes are queued.
    pub fn spawn(urls: Vec<String>, api_key: SecretString, options: ConnectOptions) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Idle);
        let request_timeout = options.request_timeout;

        tokio::spawn(drive(urls, api_key, options, command_rx, state_tx));

        Self {
            commands,
            state,
            request_timeout,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state(), ConnectionState::Authenticated { .. })
    }

    /// Wait until the session is authenticated and return the URL in use.
    pub async fn ready(&self) -> Result<String> {
        let mut state = self.state.clone();
        let settled = state
            .wait_for(ConnectionState::is_settled)
            .await
            .map(|s| s.clone())
            .map_err(|_| DiscoveryError::connection("middleware", "connection task ended"))?;

        match settled {
            ConnectionState::Authenticated { url } => Ok(url),
            ConnectionState::Closed(CloseReason::AuthRejected(reason)) => {
                Err(DiscoveryError::Auth(reason))
            }
            ConnectionState::Closed(reason) => {
                Err(DiscoveryError::connection("middleware", reason))
            }
            other => Err(DiscoveryError::connection(
                "middleware",
                format!("unexpected state {:?}", other),
            )),
        }
    }

    /// Call a middleware method and return its `result`.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Call(PendingCall {
                method: method.to_string(),
                params,
                reply,
            }))
            .map_err(|_| DiscoveryError::connection("middleware", "connection closed"))?;

        // The request timeout starts once the queued call can actually be sent.
        self.ready().await?;

        match tokio::time::timeout(self.request_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DiscoveryError::connection(
                "middleware",
                "connection closed before a response arrived",
            )),
            Err(_) => Err(DiscoveryError::Timeout {
                phase: TimeoutPhase::Request,
                after: self.request_timeout,
            }),
        }
    }

    pub async fn close(&self) {
        if self.commands.send(Command::Close).is_ok() {
            let mut state = self.state.clone();
            let _ = state
                .wait_for(|s| matches!(s, ConnectionState::Closed(_)))
                .await;
        }
        info!("WebSocket connection closed");
    }
}

/// Background task owning the socket.
async fn drive(
    urls: Vec<String>,
    api_key: SecretString,
    options: ConnectOptions,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
) {
    let mut queue = VecDeque::new();
    let mut ids = RequestIds::default();
    let mut last_error = "no candidate endpoints".to_string();

    for url in &urls {
        let attempt = establish(
            url,
            &api_key,
            &options,
            &mut ids,
            &mut commands,
            &mut queue,
            &state,
        )
        .await;

        match attempt {
            Ok(Some(stream)) => {
                info!(url = %url, "Authenticated to TrueNAS middleware");
                state.send_replace(ConnectionState::Authenticated { url: url.clone() });
                run_session(stream, url, &options, ids, queue, commands, &state).await;
                return;
            }
            Ok(None) => {
                debug!("Connection attempt cancelled by client");
                finish(&state, queue, CloseReason::ClosedByClient);
                return;
            }
            Err(DiscoveryError::Auth(reason)) => {
                warn!(url = %url, "TrueNAS rejected the API key: {}", reason);
                finish(&state, queue, CloseReason::AuthRejected(reason));
                return;
            }
            Err(e) => {
                warn!(url = %url, "Connection attempt failed, trying next candidate: {}", e);
                last_error = e.to_string();
            }
        }
    }

    finish(&state, queue, CloseReason::Exhausted(last_error));
}

fn finish(state: &watch::Sender<ConnectionState>, queue: VecDeque<PendingCall>, reason: CloseReason) {
    for call in queue {
        let _ = call.reply.send(Err(closed_error(&reason)));
    }
    state.send_replace(ConnectionState::Closed(reason));
}

fn closed_error(reason: &CloseReason) -> DiscoveryError {
    match reason {
        CloseReason::AuthRejected(r) => DiscoveryError::Auth(r.clone()),
        other => DiscoveryError::connection("middleware", other),
    }
}

#[derive(Default)]
struct RequestIds(u64);

impl RequestIds {
    fn next(&mut self) -> String {
        self.0 += 1;
        self.0.to_string()
    }
}

/// One candidate: open, handshake, authenticate. `Ok(None)` means the client
/// closed the handle mid-attempt.
async fn establish(
    url: &str,
    api_key: &SecretString,
    options: &ConnectOptions,
    ids: &mut RequestIds,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    queue: &mut VecDeque<PendingCall>,
    state: &watch::Sender<ConnectionState>,
) -> Result<Option<WsStream>> {
    state.send_replace(ConnectionState::Connecting {
        url: url.to_string(),
    });
    debug!("Connecting to {}", url);

    let mut stream = tokio::time::timeout(options.connect_timeout, open_socket(url, options.verify_tls))
        .await
        .map_err(|_| DiscoveryError::Timeout {
            phase: TimeoutPhase::Connect,
            after: options.connect_timeout,
        })??;

    send_json(&mut stream, &DdpConnect::default()).await?;
    state.send_replace(ConnectionState::HandshakeSent {
        url: url.to_string(),
    });

    let handshake = PhaseDeadline::new(TimeoutPhase::Handshake, options.connect_timeout);
    let connected = await_frame(&mut stream, url, handshake, commands, queue, |m| {
        m.msg == "connected"
    })
    .await?;
    if connected.is_none() {
        let _ = stream.close(None).await;
        return Ok(None);
    }

    let auth_id = ids.next();
    let login = JsonRpcRequest::method(
        auth_id.clone(),
        "auth.login_with_api_key",
        serde_json::json!([api_key.expose_secret().trim()]),
    );
    debug!("Sending auth request");
    send_json(&mut stream, &login).await?;
    state.send_replace(ConnectionState::Authenticating {
        url: url.to_string(),
    });

    let auth = PhaseDeadline::new(TimeoutPhase::Auth, options.auth_timeout);
    let Some(response) = await_frame(&mut stream, url, auth, commands, queue, |m| {
        m.is_result_for(&auth_id)
    })
    .await?
    else {
        let _ = stream.close(None).await;
        return Ok(None);
    };

    if let Some(error) = response.error {
        let _ = stream.close(None).await;
        return Err(DiscoveryError::Auth(error.describe()));
    }
    if response.result == Some(Value::Bool(false)) {
        let _ = stream.close(None).await;
        return Err(DiscoveryError::Auth(
            "API key rejected by TrueNAS".to_string(),
        ));
    }

    Ok(Some(stream))
}

#[derive(Clone, Copy)]
struct PhaseDeadline {
    phase: TimeoutPhase,
    after: Duration,
    at: Instant,
}

impl PhaseDeadline {
    fn new(phase: TimeoutPhase, after: Duration) -> Self {
        Self {
            phase,
            after,
            at: Instant::now() + after,
        }
    }
}

/// Read frames until `accept` matches one, queueing any calls the client
/// submits meanwhile.
async fn await_frame<F>(
    stream: &mut WsStream,
    url: &str,
    deadline: PhaseDeadline,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    queue: &mut VecDeque<PendingCall>,
    accept: F,
) -> Result<Option<ServerMessage>>
where
    F: Fn(&ServerMessage) -> bool,
{
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline.at) => {
                let _ = stream.close(None).await;
                return Err(DiscoveryError::Timeout {
                    phase: deadline.phase,
                    after: deadline.after,
                });
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(message) if accept(&message) => return Ok(Some(message)),
                    Ok(message) if message.msg == "failed" => {
                        return Err(DiscoveryError::connection(url, "middleware refused the handshake"));
                    }
                    Ok(message) => debug!("Ignoring {} frame during {}", message.msg, deadline.phase),
                    Err(e) => debug!("Ignoring malformed frame: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(DiscoveryError::connection(url, "socket closed before authentication"));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(DiscoveryError::connection(url, e)),
            },
            command = commands.recv() => match command {
                Some(Command::Call(call)) => {
                    debug!("Queueing {} until authenticated", call.method);
                    queue.push_back(call);
                }
                Some(Command::Close) | None => return Ok(None),
            },
        }
    }
}

async fn run_session(
    mut stream: WsStream,
    url: &str,
    options: &ConnectOptions,
    mut ids: RequestIds,
    mut queue: VecDeque<PendingCall>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: &watch::Sender<ConnectionState>,
) {
    let mut pending: HashMap<String, Reply> = HashMap::new();

    if !queue.is_empty() {
        debug!("Replaying {} queued call(s)", queue.len());
    }
    let mut reason = None;
    while let Some(call) = queue.pop_front() {
        if let Err(e) = dispatch(&mut stream, url, &mut ids, call, &mut pending).await {
            reason = Some(CloseReason::Dropped(e.to_string()));
            break;
        }
    }

    let mut keepalive = tokio::time::interval_at(
        Instant::now() + options.keepalive_interval,
        options.keepalive_interval,
    );
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let reason = match reason {
        Some(reason) => reason,
        None => loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => route_response(&text, &mut pending),
                    Some(Ok(Message::Close(_))) | None => {
                        break CloseReason::Dropped("closed by server".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break CloseReason::Dropped(e.to_string()),
                },
                command = commands.recv() => match command {
                    Some(Command::Call(call)) => {
                        if let Err(e) = dispatch(&mut stream, url, &mut ids, call, &mut pending).await {
                            break CloseReason::Dropped(e.to_string());
                        }
                    }
                    Some(Command::Close) | None => {
                        let _ = stream.close(None).await;
                        break CloseReason::ClosedByClient;
                    }
                },
                _ = keepalive.tick() => {
                    let abandoned = prune_abandoned(&mut pending);
                    if abandoned > 0 {
                        debug!("Dropped {} request(s) whose caller gave up", abandoned);
                    }
                    debug!("Sending keep-alive ping");
                    if let Err(e) = send_json(&mut stream, &serde_json::json!({"msg": "ping"})).await {
                        break CloseReason::Dropped(e.to_string());
                    }
                }
            }
        },
    };

    if reason != CloseReason::ClosedByClient {
        warn!(url = %url, "TrueNAS session ended: {}", reason);
    }
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(closed_error(&reason)));
    }
    finish(state, queue, reason);
}

async fn dispatch(
    stream: &mut WsStream,
    url: &str,
    ids: &mut RequestIds,
    call: PendingCall,
    pending: &mut HashMap<String, Reply>,
) -> Result<()> {
    let id = ids.next();
    let request = JsonRpcRequest::method(id.clone(), &call.method, call.params);
    debug!("Sending request {} ({})", call.method, id);

    match send_json(stream, &request).await {
        Ok(()) => {
            pending.insert(id, call.reply);
            Ok(())
        }
        Err(e) => {
            let _ = call.reply.send(Err(DiscoveryError::connection(url, &e)));
            Err(e)
        }
    }
}

fn route_response(text: &str, pending: &mut HashMap<String, Reply>) {
    let message = match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            debug!("Ignoring malformed frame: {}", e);
            return;
        }
    };

    match message.msg.as_str() {
        "result" => {
            let Some(reply) = message.id().and_then(|id| pending.remove(&id)) else {
                debug!("Dropping result for unknown request {:?}", message.id);
                return;
            };
            let outcome = match message.error {
                Some(error) => Err(DiscoveryError::TrueNasApi(error.describe())),
                None => Ok(message.result.unwrap_or(Value::Null)),
            };
            let _ = reply.send(outcome);
        }
        "pong" => debug!("Keep-alive acknowledged"),
        other => debug!("Ignoring {} frame", other),
    }
}

/// Forget requests whose caller already timed out or went away.
fn prune_abandoned(pending: &mut HashMap<String, Reply>) -> usize {
    let before = pending.len();
    pending.retain(|_, reply| !reply.is_closed());
    before - pending.len()
}

async fn send_json<T: Serialize>(stream: &mut WsStream, payload: &T) -> Result<()> {
    let text = serde_json::to_string(payload)?;
    stream.send(Message::Text(text.into())).await?;
    Ok(())
}

async fn open_socket(url: &str, verify_tls: bool) -> Result<WsStream> {
    let (stream, _) = if url.starts_with("wss://") && !verify_tls {
        // Middleware certificates are usually self-signed
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| DiscoveryError::Config(e.to_string()))?;

        let connector = tokio_tungstenite::Connector::NativeTls(connector);
        tokio_tungstenite::connect_async_tls_with_config(url, None, false, Some(connector))
            .await
            .map_err(|e| DiscoveryError::connection(url, e))?
    } else {
        connect_async(url)
            .await
            .map_err(|e| DiscoveryError::connection(url, e))?
    };

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abandoned_requests_are_pruned() {
        let mut pending = HashMap::new();
        let (kept, _receiver) = oneshot::channel();
        let (abandoned, dropped_receiver) = oneshot::channel();
        pending.insert("1".to_string(), kept);
        pending.insert("2".to_string(), abandoned);
        drop(dropped_receiver);

        assert_eq!(prune_abandoned(&mut pending), 1);
        assert!(pending.contains_key("1"));
        assert!(!pending.contains_key("2"));
    }

    #[test]
    fn default_request_timeout_is_thirty_seconds() {
        assert_eq!(ConnectOptions::default().request_timeout, Duration::from_secs(30));
    }
}
