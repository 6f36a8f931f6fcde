use std::collections::HashMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use ipnetwork::Ipv4Network;

/// IP allocation state for every subnet, one bitmap of `'0'`/`'1'` chars
/// per CIDR, persisted as a single JSON object.
pub const DEFAULT_ALLOCATOR_PATH: &str = "/var/run/mydocker/network/ipam/subnet.json";

#[derive(Debug, thiserror::Error)]
pub enum IpamError {
    #[error("subnet {subnet} has no free addresses")]
    Exhausted { subnet: String },
    #[error("allocation bitmap for {subnet} is corrupt: expected {expected} bits, found {found}")]
    CorruptBitmap {
        subnet: String,
        expected: usize,
        found: usize,
    },
    #[error("io error on {path}: {err}")]
    Io { err: std::io::Error, path: PathBuf },
    #[error("failed to decode allocation state: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Bitmap allocator over CIDR subnets. Bit `i` set means host offset
/// `i + 1` is taken; offset 0 stays reserved for the wire address, so a
/// fresh subnet hands out `.1`, `.2`, … in order. Every call reloads the
/// state file, making the file the single source of truth between
/// invocations.
pub struct Ipam {
    allocator_path: PathBuf,
}

impl Default for Ipam {
    fn default() -> Self {
        Self::new()
    }
}

impl Ipam {
    pub fn new() -> Self {
        Self::with_path(DEFAULT_ALLOCATOR_PATH)
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            allocator_path: path.into(),
        }
    }

    /// Hands out the lowest free address of the subnet.
    pub fn allocate(&self, subnet: Ipv4Network) -> Result<Ipv4Addr, IpamError> {
        let subnet = normalize(subnet);
        let key = subnet.to_string();
        let size = bitmap_size(subnet);

        let mut subnets = self.load()?;
        let bitmap = subnets
            .entry(key.clone())
            .or_insert_with(|| "0".repeat(size));
        if bitmap.len() != size {
            return Err(IpamError::CorruptBitmap {
                subnet: key,
                expected: size,
                found: bitmap.len(),
            });
        }

        let index = bitmap
            .bytes()
            .position(|bit| bit == b'0')
            .ok_or(IpamError::Exhausted { subnet: key })?;
        bitmap.replace_range(index..index + 1, "1");

        let ip = Ipv4Addr::from(u32::from(subnet.network()) + index as u32 + 1);
        self.dump(&subnets)?;
        tracing::debug!(%subnet, %ip, "allocated address");

        Ok(ip)
    }

    /// Returns an address to the subnet. Releasing an address that is not
    /// allocated (or a subnet never seen) is a no-op.
    pub fn release(&self, subnet: Ipv4Network, ip: Ipv4Addr) -> Result<(), IpamError> {
        let subnet = normalize(subnet);
        let key = subnet.to_string();

        let mut subnets = self.load()?;
        let Some(bitmap) = subnets.get_mut(&key) else {
            return Ok(());
        };

        let offset = u32::from(ip).wrapping_sub(u32::from(subnet.network()));
        let Some(index) = offset.checked_sub(1).map(|index| index as usize) else {
            tracing::warn!(%subnet, %ip, "release of the reserved wire address ignored");
            return Ok(());
        };
        if index >= bitmap.len() {
            tracing::warn!(%subnet, %ip, "release outside the subnet ignored");
            return Ok(());
        }

        bitmap.replace_range(index..index + 1, "0");
        self.dump(&subnets)?;
        tracing::debug!(%subnet, %ip, "released address");

        Ok(())
    }

    fn load(&self) -> Result<HashMap<String, String>, IpamError> {
        let content = match fs::read_to_string(&self.allocator_path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(HashMap::new())
            }
            Err(err) => {
                return Err(IpamError::Io {
                    err,
                    path: self.allocator_path.clone(),
                })
            }
        };

        Ok(serde_json::from_str(&content)?)
    }

    /// Truncate-then-write of the whole allocation map. A crash between
    /// truncate and write loses the file; the window is accepted for a
    /// single-writer CLI.
    fn dump(&self, subnets: &HashMap<String, String>) -> Result<(), IpamError> {
        if let Some(dir) = self.allocator_path.parent() {
            fs::create_dir_all(dir).map_err(|err| IpamError::Io {
                err,
                path: dir.to_path_buf(),
            })?;
        }

        let json = serde_json::to_string(subnets)?;
        fs::write(&self.allocator_path, json).map_err(|err| IpamError::Io {
            err,
            path: self.allocator_path.clone(),
        })?;

        Ok(())
    }
}

/// Strips the host bits so `192.168.0.5/24` and `192.168.0.0/24` share one
/// bitmap entry.
fn normalize(subnet: Ipv4Network) -> Ipv4Network {
    Ipv4Network::new(subnet.network(), subnet.prefix())
        .expect("network address with same prefix is always valid")
}

fn bitmap_size(subnet: Ipv4Network) -> usize {
    1usize << (32 - subnet.prefix())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ipam() -> (Ipam, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ipam = Ipam::with_path(dir.path().join("subnet.json"));
        (ipam, dir)
    }

    fn subnet(s: &str) -> Ipv4Network {
        s.parse().unwrap()
    }

    #[test]
    fn test_monotonic_assignment() {
        let (ipam, _dir) = test_ipam();
        let net = subnet("192.168.0.0/24");

        for expected in ["192.168.0.1", "192.168.0.2", "192.168.0.3", "192.168.0.4"] {
            let ip = ipam.allocate(net).unwrap();
            assert_eq!(ip.to_string(), expected);
        }
    }

    #[test]
    fn test_gateway_cidr_shares_bitmap_with_network_cidr() {
        let (ipam, _dir) = test_ipam();

        let first = ipam.allocate(subnet("192.168.10.1/24")).unwrap();
        let second = ipam.allocate(subnet("192.168.10.0/24")).unwrap();
        assert_eq!(first.to_string(), "192.168.10.1");
        assert_eq!(second.to_string(), "192.168.10.2");
    }

    #[test]
    fn test_released_address_is_reused() {
        let (ipam, _dir) = test_ipam();
        let net = subnet("192.168.0.0/24");

        for _ in 0..4 {
            ipam.allocate(net).unwrap();
        }
        ipam.release(net, "192.168.0.2".parse().unwrap()).unwrap();

        assert_eq!(ipam.allocate(net).unwrap().to_string(), "192.168.0.2");
        assert_eq!(ipam.allocate(net).unwrap().to_string(), "192.168.0.5");
    }

    #[test]
    fn test_round_trip_restores_bitmap() {
        let (ipam, _dir) = test_ipam();
        let net = subnet("10.0.0.0/28");

        let mut allocated = vec![];
        for _ in 0..5 {
            allocated.push(ipam.allocate(net).unwrap());
        }
        // Release out of order.
        for ip in [allocated[3], allocated[0], allocated[4], allocated[1], allocated[2]] {
            ipam.release(net, ip).unwrap();
        }

        // The bitmap is all zeros again, so allocation restarts at .1.
        assert_eq!(ipam.allocate(net).unwrap().to_string(), "10.0.0.1");
    }

    #[test]
    fn test_exhausted_subnet_is_an_error() {
        let (ipam, _dir) = test_ipam();
        let net = subnet("192.168.0.0/30");

        for _ in 0..4 {
            ipam.allocate(net).unwrap();
        }
        assert!(matches!(
            ipam.allocate(net),
            Err(IpamError::Exhausted { .. })
        ));
    }

    #[test]
    fn test_release_is_idempotent() {
        let (ipam, _dir) = test_ipam();
        let net = subnet("192.168.0.0/24");
        let ip = ipam.allocate(net).unwrap();

        ipam.release(net, ip).unwrap();
        ipam.release(net, ip).unwrap();
        ipam.release(net, "192.168.0.200".parse().unwrap()).unwrap();

        assert_eq!(ipam.allocate(net).unwrap(), ip);
    }

    #[test]
    fn test_state_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subnet.json");
        let net = subnet("192.168.0.0/24");

        Ipam::with_path(&path).allocate(net).unwrap();
        let ip = Ipam::with_path(&path).allocate(net).unwrap();
        assert_eq!(ip.to_string(), "192.168.0.2");
    }

    #[test]
    fn test_bitmap_length_matches_prefix() {
        assert_eq!(bitmap_size(subnet("10.0.0.0/24")), 256);
        assert_eq!(bitmap_size(subnet("10.0.0.0/30")), 4);
        assert_eq!(bitmap_size(subnet("10.0.0.0/16")), 65536);
    }
}
