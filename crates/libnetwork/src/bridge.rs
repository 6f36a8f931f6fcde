use std::process::Command;

use ipnetwork::Ipv4Network;

use crate::endpoint::Endpoint;
use crate::netlink::{NetlinkError, NetlinkHandle};
use crate::network::Network;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Netlink(#[from] NetlinkError),
    #[error("invalid subnet {subnet}: {err}")]
    Subnet {
        subnet: String,
        err: ipnetwork::IpNetworkError,
    },
    #[error("failed to run iptables: {0}")]
    IptablesSpawn(std::io::Error),
    #[error("iptables rejected the rule: {0}")]
    Iptables(String),
}

/// The only network driver: a Linux bridge per network, veth pairs per
/// endpoint and MASQUERADE for egress.
pub struct BridgeDriver;

impl BridgeDriver {
    pub fn name(&self) -> &'static str {
        "bridge"
    }

    /// Creates the network. `subnet` is the CIDR with the gateway address
    /// in its IP bits; the bridge is named after the network, carries the
    /// gateway and NATs egress traffic.
    pub fn create(&self, subnet: &str, name: &str) -> Result<Network, BridgeError> {
        let ip_range: Ipv4Network = subnet.parse().map_err(|err| BridgeError::Subnet {
            subnet: subnet.to_string(),
            err,
        })?;

        let network = Network {
            name: name.to_string(),
            ip_range,
            driver: self.name().to_string(),
        };
        self.init_bridge(&network)?;

        Ok(network)
    }

    fn init_bridge(&self, network: &Network) -> Result<(), BridgeError> {
        let mut handle = NetlinkHandle::new()?;

        if !handle.link_exists(&network.name) {
            handle.create_bridge(&network.name)?;
            tracing::info!(bridge = %network.name, "created bridge");
        }

        let index = handle.ifindex(&network.name)?;
        handle.add_address(index, network.ip_range)?;
        handle.set_link_up(index)?;

        setup_masquerade(network.subnet(), &network.name)?;

        Ok(())
    }

    /// Deletes the bridge link; attached veths cascade down with it.
    /// IPAM state and iptables rules are reclaimed by the caller.
    pub fn delete(&self, network: &Network) -> Result<(), BridgeError> {
        let mut handle = NetlinkHandle::new()?;
        let index = handle.ifindex(&network.name)?;
        handle.delete_link(index)?;
        tracing::info!(bridge = %network.name, "deleted bridge");

        Ok(())
    }

    /// Creates the endpoint's veth pair: the host side is enslaved to the
    /// bridge and brought up, the peer is left in the host namespace for
    /// the endpoint configurator to move into the container.
    pub fn connect(&self, network: &Network, endpoint: &Endpoint) -> Result<(), BridgeError> {
        let mut handle = NetlinkHandle::new()?;
        let bridge_index = handle.ifindex(&network.name)?;

        let if_name = endpoint.if_name();
        handle.create_veth(&if_name, &endpoint.peer_name(), bridge_index)?;
        let index = handle.ifindex(&if_name)?;
        handle.set_link_up(index)?;

        Ok(())
    }

    /// Removes the host-side veth; the kernel removes the peer with it.
    pub fn disconnect(&self, endpoint: &Endpoint) -> Result<(), BridgeError> {
        let mut handle = NetlinkHandle::new()?;
        let index = handle.ifindex(&endpoint.if_name())?;
        handle.delete_link(index)?;

        Ok(())
    }
}

/// `iptables -t nat -A POSTROUTING -s <subnet> ! -o <bridge> -j MASQUERADE`
fn setup_masquerade(subnet: Ipv4Network, bridge: &str) -> Result<(), BridgeError> {
    let subnet = subnet.to_string();
    let output = Command::new("iptables")
        .args([
            "-t",
            "nat",
            "-A",
            "POSTROUTING",
            "-s",
            subnet.as_str(),
            "!",
            "-o",
            bridge,
            "-j",
            "MASQUERADE",
        ])
        .output()
        .map_err(BridgeError::IptablesSpawn)?;

    if !output.status.success() {
        return Err(BridgeError::Iptables(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    Ok(())
}
