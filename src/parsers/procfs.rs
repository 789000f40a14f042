//! Parsers for `/proc` files and `os-release`.

use std::collections::HashMap;
use std::net::Ipv4Addr;

/// `MemTotal` and `MemAvailable` (falling back to `MemFree`) in bytes.
pub fn parse_meminfo(content: &str) -> (Option<u64>, Option<u64>) {
    let mut total = None;
    let mut available = None;
    let mut free = None;

    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let kib = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.saturating_mul(1024));
        match key.trim() {
            "MemTotal" => total = kib,
            "MemAvailable" => available = kib,
            "MemFree" => free = kib,
            _ => {}
        }
    }

    (total, available.or(free))
}

/// Logical CPU count and the first `model name`.
pub fn parse_cpuinfo(content: &str) -> (usize, Option<String>) {
    let mut count = 0;
    let mut model = None;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "processor" => count += 1,
            "model name" if model.is_none() => model = Some(value.trim().to_string()),
            _ => {}
        }
    }

    (count, model)
}

/// Whole seconds from `/proc/uptime`.
pub fn parse_uptime(content: &str) -> Option<u64> {
    content
        .split_whitespace()
        .next()?
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64)
}

pub fn parse_os_release(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().trim_matches('"').to_string()))
        .collect()
}

/// Default-route gateways from `/proc/net/route`. Addresses there are
/// little-endian hex.
pub fn parse_default_gateways(content: &str) -> Vec<Ipv4Addr> {
    let mut gateways = Vec::new();
    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[1] != "00000000" {
            continue;
        }
        let Ok(raw) = u32::from_str_radix(fields[2], 16) else {
            continue;
        };
        if raw == 0 {
            continue;
        }
        let gateway = Ipv4Addr::from(raw.to_le_bytes());
        if !gateways.contains(&gateway) {
            gateways.push(gateway);
        }
    }
    gateways
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meminfo_in_bytes() {
        let content = "MemTotal:       16314240 kB\nMemFree:         1000000 kB\nMemAvailable:    8000000 kB\n";
        assert_eq!(
            parse_meminfo(content),
            (Some(16314240 * 1024), Some(8000000 * 1024))
        );
    }

    #[test]
    fn meminfo_saturates_on_huge_values() {
        let content = "MemTotal: 18446744073709551615 kB\n";
        assert_eq!(parse_meminfo(content), (Some(u64::MAX), None));
    }

    #[test]
    fn cpuinfo_counts_processors() {
        let content = "processor\t: 0\nmodel name\t: AMD Ryzen 5 5600G\n\nprocessor\t: 1\nmodel name\t: AMD Ryzen 5 5600G\n";
        assert_eq!(parse_cpuinfo(content), (2, Some("AMD Ryzen 5 5600G".to_string())));
    }

    #[test]
    fn uptime_seconds() {
        assert_eq!(parse_uptime("350735.47 234388.90\n"), Some(350735));
        assert_eq!(parse_uptime(""), None);
    }

    #[test]
    fn os_release_strips_quotes() {
        let map = parse_os_release("NAME=\"Debian GNU/Linux\"\nID=debian\n");
        assert_eq!(map["NAME"], "Debian GNU/Linux");
        assert_eq!(map["ID"], "debian");
    }

    #[test]
    fn default_gateway_from_route_table() {
        let content = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
eth0\t00000000\t010011AC\t0003\t0\t0\t0\t00000000\t0\t0\t0
eth0\t000011AC\t00000000\t0001\t0\t0\t0\t0000FFFF\t0\t0\t0
";
        assert_eq!(parse_default_gateways(content), vec![Ipv4Addr::new(172, 17, 0, 1)]);
    }
}
