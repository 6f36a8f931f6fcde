use std::fs::File;
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::process::Command;

use ipnetwork::Ipv4Network;

use crate::netlink::{NetlinkError, NetlinkHandle};
use crate::netns::{NetnsError, NetnsGuard};
use crate::network::Network;

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error(transparent)]
    Netlink(#[from] NetlinkError),
    #[error(transparent)]
    Netns(#[from] NetnsError),
    #[error("failed to open {path}: {err}")]
    Io { err: std::io::Error, path: PathBuf },
    #[error("failed to run iptables: {0}")]
    IptablesSpawn(std::io::Error),
    #[error("iptables rejected the rule: {0}")]
    Iptables(String),
}

/// A container's attachment to one network: the veth pair naming, the
/// allocated address and the port mappings to publish. Derived per
/// connect, never persisted; the host-side veth itself lives until the
/// bridge disappears or the endpoint is disconnected.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// `<container-id>-<network-name>`
    pub id: String,
    pub ip: Ipv4Addr,
    pub mac: [u8; 6],
    pub gateway: Ipv4Addr,
    pub prefix: u8,
    pub port_mappings: Vec<String>,
}

impl Endpoint {
    pub fn new(
        container_id: &str,
        network: &Network,
        ip: Ipv4Addr,
        port_mappings: &[String],
    ) -> Self {
        Self {
            id: format!("{}-{}", container_id, network.name),
            ip,
            mac: derive_mac(ip),
            gateway: network.gateway(),
            prefix: network.ip_range.prefix(),
            port_mappings: port_mappings.to_vec(),
        }
    }

    /// Host-side veth name. Interface names are tightly length-limited, so
    /// only the first five id characters are used.
    pub fn if_name(&self) -> String {
        self.id[..5].to_string()
    }

    /// Container-side peer name.
    pub fn peer_name(&self) -> String {
        format!("cif-{}", &self.id[..5])
    }
}

/// Locally administered MAC derived from the endpoint address, so repeat
/// connects of the same address produce the same interface identity.
fn derive_mac(ip: Ipv4Addr) -> [u8; 6] {
    let octets = ip.octets();
    [0x02, 0x42, octets[0], octets[1], octets[2], octets[3]]
}

/// Finishes the endpoint inside the container: moves the veth peer into
/// the target's network namespace, then from within it assigns the
/// address, brings the peer and loopback up and points the default route
/// at the gateway. The host namespace is restored when the guard drops.
pub fn configure(endpoint: &Endpoint, pid: &str) -> Result<(), EndpointError> {
    let peer_name = endpoint.peer_name();

    {
        let mut handle = NetlinkHandle::new()?;
        let peer_index = handle.ifindex(&peer_name)?;
        let ns_path = PathBuf::from(format!("/proc/{pid}/ns/net"));
        let ns = File::open(&ns_path).map_err(|err| EndpointError::Io {
            err,
            path: ns_path,
        })?;
        handle.set_link_netns(peer_index, ns.as_raw_fd())?;
    }

    let _guard = NetnsGuard::enter(pid)?;

    // Sockets opened from here on live in the container's namespace.
    let mut handle = NetlinkHandle::new()?;
    let peer_index = handle.ifindex(&peer_name)?;

    let addr = Ipv4Network::new(endpoint.ip, endpoint.prefix)
        .expect("endpoint address comes from the subnet and fits its prefix");
    handle.set_link_addr(peer_index, &endpoint.mac)?;
    handle.add_address(peer_index, addr)?;
    handle.set_link_up(peer_index)?;

    let lo_index = handle.ifindex("lo")?;
    handle.set_link_up(lo_index)?;

    handle.add_default_route(endpoint.gateway, peer_index)?;
    tracing::info!(ip = %endpoint.ip, gateway = %endpoint.gateway, "configured container endpoint");

    Ok(())
}

/// Publishes each `host:container` mapping as a PREROUTING DNAT rule.
/// Malformed mappings are logged and skipped.
pub fn config_port_mappings(endpoint: &Endpoint) -> Result<(), EndpointError> {
    for mapping in &endpoint.port_mappings {
        let parts: Vec<&str> = mapping.split(':').collect();
        let (host_port, container_port) = match parts.as_slice() {
            [host, container] => (*host, *container),
            _ => {
                tracing::warn!(mapping = %mapping, "port mapping format error, skipping");
                continue;
            }
        };

        let destination = format!("{}:{}", endpoint.ip, container_port);
        let output = Command::new("iptables")
            .args([
                "-t",
                "nat",
                "-A",
                "PREROUTING",
                "-p",
                "tcp",
                "--dport",
                host_port,
                "-j",
                "DNAT",
                "--to-destination",
                destination.as_str(),
            ])
            .output()
            .map_err(EndpointError::IptablesSpawn)?;

        if !output.status.success() {
            return Err(EndpointError::Iptables(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        tracing::info!(host_port, container = %destination, "published port");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_network() -> Network {
        Network {
            name: "br0".to_string(),
            ip_range: "192.168.10.1/24".parse().unwrap(),
            driver: "bridge".to_string(),
        }
    }

    fn test_endpoint() -> Endpoint {
        Endpoint::new(
            "1234567890",
            &test_network(),
            "192.168.10.2".parse().unwrap(),
            &["8080:80".to_string()],
        )
    }

    #[test]
    fn test_veth_names_derive_from_id() {
        let endpoint = test_endpoint();
        assert_eq!(endpoint.id, "1234567890-br0");
        assert_eq!(endpoint.if_name(), "12345");
        assert_eq!(endpoint.peer_name(), "cif-12345");
    }

    #[test]
    fn test_endpoint_inherits_network_routing() {
        let endpoint = test_endpoint();
        assert_eq!(endpoint.gateway.to_string(), "192.168.10.1");
        assert_eq!(endpoint.prefix, 24);
    }

    #[test]
    fn test_mac_is_stable_per_address() {
        let endpoint = test_endpoint();
        assert_eq!(endpoint.mac, [0x02, 0x42, 192, 168, 10, 2]);
        // Locally administered, unicast.
        assert_eq!(endpoint.mac[0] & 0b0000_0011, 0b10);
    }
}
