use std::collections::HashMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use ipnetwork::Ipv4Network;
use libcontainer::container::ContainerRecord;
use serde::{Deserialize, Serialize};

use crate::bridge::{BridgeDriver, BridgeError};
use crate::endpoint::{self, Endpoint, EndpointError};
use crate::ipam::{Ipam, IpamError};

/// Network definitions live here, one JSON file per network name.
pub const DEFAULT_NETWORK_ROOT: &str = "/var/run/mydocker/network/network";

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("no such network: {0}")]
    NotFound(String),
    #[error("unsupported network driver: {0}")]
    UnknownDriver(String),
    #[error("invalid subnet {subnet}: {err}")]
    InvalidSubnet {
        subnet: String,
        err: ipnetwork::IpNetworkError,
    },
    #[error("container {0} is not running")]
    ContainerNotRunning(String),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error(transparent)]
    Ipam(#[from] IpamError),
    #[error("io error on {path}: {err}")]
    Io { err: std::io::Error, path: PathBuf },
    #[error("failed to decode network definition: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A named container network. `ip_range` carries the gateway address in
/// its IP bits and the subnet in its prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub ip_range: Ipv4Network,
    pub driver: String,
}

impl Network {
    pub fn gateway(&self) -> Ipv4Addr {
        self.ip_range.ip()
    }

    /// The subnet with host bits cleared.
    pub fn subnet(&self) -> Ipv4Network {
        Ipv4Network::new(self.ip_range.network(), self.ip_range.prefix())
            .expect("network address with same prefix is always valid")
    }

    fn dump(&self, root: &Path) -> Result<(), NetworkError> {
        fs::create_dir_all(root).map_err(|err| NetworkError::Io {
            err,
            path: root.to_path_buf(),
        })?;

        let path = root.join(&self.name);
        fs::write(&path, serde_json::to_string(self)?)
            .map_err(|err| NetworkError::Io { err, path })?;

        Ok(())
    }
}

/// Name-keyed view of every persisted network, loaded once per invocation.
pub struct NetworkRegistry {
    root: PathBuf,
    networks: HashMap<String, Network>,
}

impl NetworkRegistry {
    pub fn load_default() -> Result<Self, NetworkError> {
        Self::load(DEFAULT_NETWORK_ROOT)
    }

    pub fn load<P: Into<PathBuf>>(root: P) -> Result<Self, NetworkError> {
        let root = root.into();
        let mut networks = HashMap::new();

        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self { root, networks })
            }
            Err(err) => {
                return Err(NetworkError::Io {
                    err,
                    path: root.clone(),
                })
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(|err| NetworkError::Io {
                    err,
                    path: path.clone(),
                })
                .and_then(|content| Ok(serde_json::from_str::<Network>(&content)?))
            {
                Ok(network) => {
                    networks.insert(network.name.clone(), network);
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), "skipping network definition: {}", err)
                }
            }
        }

        Ok(Self { root, networks })
    }

    pub fn get(&self, name: &str) -> Option<&Network> {
        self.networks.get(name)
    }

    pub fn list(&self) -> Vec<&Network> {
        let mut networks: Vec<&Network> = self.networks.values().collect();
        networks.sort_by(|a, b| a.name.cmp(&b.name));
        networks
    }

    /// Creates and persists a network. The gateway is the subnet's first
    /// usable address, reserved through IPAM before the driver runs.
    pub fn create(
        &mut self,
        driver: &str,
        subnet: &str,
        name: &str,
        ipam: &Ipam,
    ) -> Result<(), NetworkError> {
        if driver != BridgeDriver.name() {
            return Err(NetworkError::UnknownDriver(driver.to_string()));
        }

        let cidr: Ipv4Network = subnet.parse().map_err(|err| NetworkError::InvalidSubnet {
            subnet: subnet.to_string(),
            err,
        })?;
        let gateway = ipam.allocate(cidr)?;
        let gateway_cidr = Ipv4Network::new(gateway, cidr.prefix())
            .expect("gateway is inside the subnet");

        let network = BridgeDriver.create(&gateway_cidr.to_string(), name)?;
        network.dump(&self.root)?;
        self.networks.insert(name.to_string(), network);

        Ok(())
    }

    /// Removes a network: releases the gateway, deletes the bridge and
    /// unlinks the definition file.
    pub fn remove(&mut self, name: &str, ipam: &Ipam) -> Result<(), NetworkError> {
        let network = self
            .networks
            .get(name)
            .ok_or_else(|| NetworkError::NotFound(name.to_string()))?;

        ipam.release(network.subnet(), network.gateway())?;
        BridgeDriver.delete(network)?;

        let path = self.root.join(name);
        if let Err(err) = fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(NetworkError::Io { err, path });
            }
        }
        self.networks.remove(name);

        Ok(())
    }

    /// Wires a running container into a network: allocates an address,
    /// creates and attaches the veth pair, configures the container side
    /// and publishes the port mappings. Returns the allocated address.
    pub fn connect(
        &self,
        network_name: &str,
        record: &ContainerRecord,
        ipam: &Ipam,
    ) -> Result<Ipv4Addr, NetworkError> {
        let network = self
            .networks
            .get(network_name)
            .ok_or_else(|| NetworkError::NotFound(network_name.to_string()))?;
        if record.pid.is_empty() {
            return Err(NetworkError::ContainerNotRunning(record.name.clone()));
        }

        let ip = ipam.allocate(network.subnet())?;
        let endpoint = Endpoint::new(&record.id, network, ip, &record.port_mapping);

        BridgeDriver.connect(network, &endpoint)?;
        endpoint::configure(&endpoint, &record.pid)?;
        endpoint::config_port_mappings(&endpoint)?;

        Ok(ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_network() -> Network {
        Network {
            name: "br0".to_string(),
            ip_range: "192.168.10.1/24".parse().unwrap(),
            driver: "bridge".to_string(),
        }
    }

    #[test]
    fn test_network_json_round_trip() {
        let network = sample_network();
        let json = serde_json::to_string(&network).unwrap();
        let decoded: Network = serde_json::from_str(&json).unwrap();
        assert_eq!(network, decoded);
    }

    #[test]
    fn test_gateway_and_subnet_views() {
        let network = sample_network();
        assert_eq!(network.gateway().to_string(), "192.168.10.1");
        assert_eq!(network.subnet().to_string(), "192.168.10.0/24");
    }

    #[test]
    fn test_registry_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        sample_network().dump(dir.path()).unwrap();

        let registry = NetworkRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.list().len(), 1);
        assert_eq!(registry.get("br0"), Some(&sample_network()));
    }

    #[test]
    fn test_registry_tolerates_missing_root() {
        let registry = NetworkRegistry::load("/nonexistent/mydocker/network").unwrap();
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_registry_skips_corrupt_definitions() {
        let dir = tempfile::tempdir().unwrap();
        sample_network().dump(dir.path()).unwrap();
        fs::write(dir.path().join("broken"), "not json").unwrap();

        let registry = NetworkRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_unknown_driver_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = NetworkRegistry::load(dir.path()).unwrap();
        let ipam = Ipam::with_path(dir.path().join("subnet.json"));

        let err = registry
            .create("macvlan", "10.0.0.0/24", "m0", &ipam)
            .unwrap_err();
        assert!(matches!(err, NetworkError::UnknownDriver(_)));
    }

    #[test]
    fn test_remove_unknown_network() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = NetworkRegistry::load(dir.path()).unwrap();
        let ipam = Ipam::with_path(dir.path().join("subnet.json"));

        assert!(matches!(
            registry.remove("ghost", &ipam),
            Err(NetworkError::NotFound(_))
        ));
    }
}
