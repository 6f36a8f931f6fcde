//! Virtual networking for containers: a Linux bridge driver, a bitmap IPAM
//! over CIDR subnets, veth endpoint wiring into container network
//! namespaces and iptables NAT for egress and port mapping.

pub mod bridge;
pub mod endpoint;
pub mod ipam;
pub mod netlink;
pub mod netns;
pub mod network;

pub use network::{NetworkRegistry, DEFAULT_NETWORK_ROOT};
