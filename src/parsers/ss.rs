//! `ss` output parser.
//!
//! Handles both the `-tulpn` layout (leading `Netid` column) and the `-tlpn`
//! layout where ss omits the `Netid` column.

use super::split_host_port;
use crate::model::{PortEntry, Protocol};
use once_cell::sync::Lazy;
use regex::Regex;

static USERS_TRAILER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"users:\(\("([^"]+)",pid=(\d+)"#).expect("valid regex"));

/// Parse `ss -tulpn` output into listening port entries.
pub fn parse_ss(output: &str) -> Vec<PortEntry> {
    output.lines().filter_map(parse_ss_line).collect()
}

pub fn parse_ss_line(line: &str) -> Option<PortEntry> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let first = *tokens.first()?;

    let (protocol, columns) = match first.to_ascii_lowercase().as_str() {
        "tcp" | "tcp6" => (Protocol::Tcp, &tokens[1..]),
        "udp" | "udp6" => (Protocol::Udp, &tokens[1..]),
        // Without a Netid column the state implies the socket type
        "listen" => (Protocol::Tcp, &tokens[..]),
        "unconn" => (Protocol::Udp, &tokens[..]),
        _ => return None,
    };

    // State, Recv-Q, Send-Q, Local, Peer
    if columns.len() < 4 {
        return None;
    }
    let state = columns[0].to_ascii_uppercase();
    if state != "LISTEN" && state != "UNCONN" {
        return None;
    }

    let (ip, port) = split_host_port(columns[3])?;
    let mut entry = PortEntry::system("unknown", protocol, ip, port);

    if let Some(caps) = USERS_TRAILER.captures(line) {
        entry.owner = caps[1].to_string();
        entry.pid = caps[2].parse().ok();
    }

    Some(entry)
}
