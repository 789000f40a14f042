//! Port reconciliation helpers shared by the Docker and TrueNAS collectors.
//!
//! Both collectors see the same listener twice: once as a declared container
//! binding and once as an OS socket (usually owned by `docker-proxy`). They
//! also see host-network containers only as OS sockets. The helpers here merge
//! the two views into one list keyed by `(host_ip, host_port)`.

use crate::model::{dedup_ports, ContainerRef, PortEntry, PortKey, PortSource, Protocol};
use std::collections::HashSet;
use tracing::debug;

/// Well-known services and the name fragments that identify their containers.
pub const KNOWN_SERVICES: &[(u16, &[&str])] = &[
    (51820, &["wireguard", "wg-easy", "wg"]),
    (1194, &["openvpn"]),
    (500, &["ipsec", "strongswan"]),
    (4500, &["ipsec", "strongswan"]),
    (53, &["pihole", "pi-hole", "adguard", "unbound", "bind", "dns"]),
    (67, &["dhcp"]),
    (68, &["dhcp"]),
];

/// UDP listeners worth reporting even when UDP collection is off.
pub const IMPORTANT_UDP_PORTS: [u16; 8] = [53, 67, 68, 123, 500, 1194, 4500, 51820];

/// Process names too generic to match against container names.
const MIN_OWNER_MATCH_LEN: usize = 3;

/// Split OS ports into those already covered by a declared binding (dropped)
/// and the rest. Returns the declared ports (deduplicated) and the leftovers.
pub fn merge_declared(
    declared: Vec<PortEntry>,
    system: Vec<PortEntry>,
) -> (Vec<PortEntry>, Vec<PortEntry>) {
    let declared = dedup_ports(declared);
    let keys: HashSet<PortKey> = declared.iter().map(PortEntry::key).collect();
    let leftovers = system
        .into_iter()
        .filter(|port| {
            let covered = keys.contains(&port.key());
            if covered {
                debug!(port = port.host_port, "OS socket covered by declared binding");
            }
            !covered
        })
        .collect();
    (declared, leftovers)
}

/// Look up a container by full or abbreviated id.
pub fn find_container<'a>(containers: &'a [ContainerRef], id: &str) -> Option<&'a ContainerRef> {
    if id.is_empty() {
        return None;
    }
    containers
        .iter()
        .find(|c| !c.id.is_empty() && (c.id.starts_with(id) || id.starts_with(&c.id)))
}

/// Best-effort match of a process name against running container names and
/// images.
pub fn match_by_process_name<'a>(
    owner: &str,
    containers: &'a [ContainerRef],
) -> Option<&'a ContainerRef> {
    let owner = owner.trim().to_ascii_lowercase();
    if owner.len() < MIN_OWNER_MATCH_LEN || owner == "unknown" || owner == "docker-proxy" {
        return None;
    }
    containers.iter().find(|c| {
        let name = c.name.to_ascii_lowercase();
        let image = c.image.to_ascii_lowercase();
        name.contains(&owner) || image.contains(&owner) || (!name.is_empty() && owner.contains(&name))
    })
}

/// Re-own system ports on well-known service ports to the container that most
/// plausibly runs the service.
///
/// A single candidate wins outright. With several, a container whose name
/// (not just image) carries the fragment is preferred; ties go to the first.
pub fn enhance_known_ports(ports: &mut [PortEntry], containers: &[ContainerRef]) {
    for port in ports.iter_mut().filter(|p| p.source == PortSource::System) {
        let Some((_, fragments)) = KNOWN_SERVICES.iter().find(|(p, _)| *p == port.host_port) else {
            continue;
        };

        let candidates: Vec<&ContainerRef> = containers
            .iter()
            .filter(|c| {
                let name = c.name.to_ascii_lowercase();
                let image = c.image.to_ascii_lowercase();
                fragments
                    .iter()
                    .any(|f| name.contains(f) || image.contains(f))
            })
            .collect();

        let chosen = match candidates.as_slice() {
            [] => None,
            [only] => Some(*only),
            several => several
                .iter()
                .find(|c| {
                    let name = c.name.to_ascii_lowercase();
                    fragments.iter().any(|f| name.contains(f))
                })
                .or_else(|| several.first())
                .copied(),
        };

        if let Some(container) = chosen {
            debug!(
                port = port.host_port,
                container = %container.name,
                "Attributing well-known service port"
            );
            port.attribute_to_container(container);
        }
    }
}

/// TCP is always kept. UDP is kept when docker-sourced, on an important port,
/// or when UDP collection is enabled.
pub fn keep_port(port: &PortEntry, include_udp: bool) -> bool {
    match port.protocol {
        Protocol::Tcp => true,
        Protocol::Udp => {
            include_udp || port.is_docker() || IMPORTANT_UDP_PORTS.contains(&port.host_port)
        }
    }
}

/// Copy container creation times onto docker-sourced entries that lack one.
pub fn fill_created(ports: &mut [PortEntry], containers: &[ContainerRef]) {
    for port in ports.iter_mut().filter(|p| p.is_docker() && p.created.is_none()) {
        if let Some(container) = port
            .container_id
            .as_deref()
            .and_then(|id| find_container(containers, id))
        {
            port.created = container.created.clone();
        }
    }
}
