//! Tool Output Parsers
//!
//! Pure functions turning captured command output into typed records. None of
//! them touch the host; a malformed line is skipped and parsing continues, so
//! the same input always yields the same list.
//!
//! - [`ss`] - `ss -tulpn` / `ss -tlpn`
//! - [`netstat`] - Linux `netstat -tulpn` and Windows `netstat -ano` / `-an`
//! - [`docker`] - `docker ps`, `docker inspect`, `docker top`, `docker info`
//! - [`procfs`] - `/proc/meminfo`, `/proc/cpuinfo`, `/proc/uptime`, `/proc/net/route`, os-release

pub mod docker;
pub mod netstat;
pub mod procfs;
pub mod ss;

/// Split `ip:port` (including `[::]:22`, `*:22`, `:::22`) into its parts.
///
/// Returns `None` when the port is missing or not numeric (`*`).
pub fn split_host_port(address: &str) -> Option<(&str, u16)> {
    let (ip, port) = address.rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    Some((ip, port))
}

#[cfg(test)]
mod tests {
    use super::split_host_port;

    #[test]
    fn splits_ipv4_ipv6_and_wildcards() {
        assert_eq!(split_host_port("0.0.0.0:22"), Some(("0.0.0.0", 22)));
        assert_eq!(split_host_port("[::]:443"), Some(("[::]", 443)));
        assert_eq!(split_host_port(":::80"), Some(("::", 80)));
        assert_eq!(split_host_port("*:5353"), Some(("*", 5353)));
        assert_eq!(split_host_port("0.0.0.0:*"), None);
        assert_eq!(split_host_port("garbage"), None);
    }
}
