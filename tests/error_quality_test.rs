//! Error message quality tests
//!
//! Tests that verify error messages are helpful and distinguishable.

use portracker_discovery::error::{CommandError, DiscoveryError, TimeoutPhase};
use std::time::Duration;

#[test]
fn test_auth_error_message_clarity() {
    // Given: An authentication error
    let error = DiscoveryError::Auth("API key rejected by TrueNAS".to_string());

    // When: Converting to string
    let message = format!("{}", error);

    // Then: Message should clearly indicate authentication issue
    assert!(message.contains("Authentication failed"));
    assert!(message.contains("API key rejected"));
}

#[test]
fn test_connection_error_names_the_endpoint() {
    let error = DiscoveryError::connection("ws://127.0.0.1/websocket", "connection refused");
    let message = error.to_string();
    assert!(message.contains("ws://127.0.0.1/websocket"));
    assert!(message.contains("connection refused"));
}

#[test]
fn test_timeout_error_names_the_phase() {
    // Given: A timeout during authentication
    let error = DiscoveryError::Timeout {
        phase: TimeoutPhase::Auth,
        after: Duration::from_secs(10),
    };

    // When: Converting to string
    let message = error.to_string();

    // Then: The phase and the limit are both visible
    assert!(message.contains("authentication"));
    assert!(message.contains("10s"));
}

#[test]
fn test_command_error_keeps_the_command_line() {
    // Given: A command that exited non-zero
    let error: DiscoveryError = CommandError::NonZeroExit {
        command: "docker ps -q".to_string(),
        status: 1,
        stderr: "Cannot connect to the Docker daemon".to_string(),
    }
    .into();

    // When: Converting to string
    let message = error.to_string();

    // Then: The command, status and stderr are all included
    assert!(message.contains("Command failed"));
    assert!(message.contains("docker ps -q"));
    assert!(message.contains("status 1"));
    assert!(message.contains("Cannot connect to the Docker daemon"));
}

#[test]
fn test_missing_binary_is_distinct() {
    let error = CommandError::NotFound {
        command: "ss -tulpn".to_string(),
    };
    assert_eq!(error.command(), "ss -tulpn");
    assert!(error.to_string().contains("not found"));
}

#[test]
fn test_websocket_error_message_clarity() {
    // Given: A WebSocket error (needs a tungstenite::Error)
    use tungstenite::error::Error as WsError;
    use tungstenite::error::ProtocolError;

    let ws_err = WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake);
    let error = DiscoveryError::WebSocket(ws_err);

    // When: Converting to string
    let message = format!("{}", error);

    // Then: Message should clearly indicate WebSocket issue
    assert!(message.contains("WebSocket error"));
}

#[test]
fn test_json_error_message_clarity() {
    let json_err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
    let error = DiscoveryError::from(json_err);
    assert!(error.to_string().contains("JSON error"));
}
