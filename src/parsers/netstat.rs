//! `netstat` output parsers for Linux (`-tulpn`) and Windows (`-ano`, `-an`).

use super::split_host_port;
use crate::model::{PortEntry, Protocol};

/// Parse Linux `netstat -tulpn` output.
///
/// TCP rows must be in `LISTEN` state; UDP rows have no state column. The
/// trailing column is `PID/Program name` or `-` without privileges.
pub fn parse_netstat_linux(output: &str) -> Vec<PortEntry> {
    output.lines().filter_map(parse_linux_line).collect()
}

fn parse_linux_line(line: &str) -> Option<PortEntry> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 4 {
        return None;
    }

    let proto = tokens[0].to_ascii_lowercase();
    let protocol = match proto.as_str() {
        "tcp" | "tcp6" => Protocol::Tcp,
        "udp" | "udp6" => Protocol::Udp,
        _ => return None,
    };

    if protocol == Protocol::Tcp && !tokens.iter().any(|t| *t == "LISTEN") {
        return None;
    }

    let (ip, port) = split_host_port(tokens[3])?;
    let mut entry = PortEntry::system("unknown", protocol, ip, port);

    if let Some(trailer) = tokens.last().filter(|t| t.contains('/')) {
        if let Some((pid, name)) = trailer.split_once('/') {
            if let Ok(pid) = pid.parse::<u32>() {
                entry.pid = Some(pid);
                if !name.is_empty() {
                    entry.owner = name.to_string();
                }
            }
        }
    }

    Some(entry)
}

/// Parse Windows `netstat -ano` (PID column) or `netstat -an` output, keeping
/// only `LISTENING` rows.
pub fn parse_netstat_windows(output: &str) -> Vec<PortEntry> {
    output.lines().filter_map(parse_windows_line).collect()
}

fn parse_windows_line(line: &str) -> Option<PortEntry> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 4 || !tokens[0].eq_ignore_ascii_case("tcp") {
        return None;
    }
    let state_index = tokens.iter().position(|t| *t == "LISTENING")?;

    let (ip, port) = split_host_port(tokens[1])?;
    let mut entry = PortEntry::system("unknown", Protocol::Tcp, ip, port);
    entry.pid = tokens
        .get(state_index + 1)
        .and_then(|pid| pid.parse::<u32>().ok())
        .filter(|pid| *pid != 0);

    Some(entry)
}
