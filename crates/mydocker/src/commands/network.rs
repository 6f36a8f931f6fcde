use anyhow::Result;
use clap::{Args, Subcommand};
use libnetwork::ipam::Ipam;
use libnetwork::NetworkRegistry;

#[derive(Subcommand, Debug)]
pub enum NetworkCmd {
    /// Create a container network
    Create(Create),

    /// List container networks
    List,

    /// Remove a container network
    Remove(Remove),
}

#[derive(Args, Debug)]
pub struct Create {
    /// Network driver
    #[arg(long, default_value = "bridge")]
    pub driver: String,

    /// Subnet in CIDR notation, e.g. 192.168.10.0/24
    #[arg(long)]
    pub subnet: String,

    /// Network name
    pub name: String,
}

#[derive(Args, Debug)]
pub struct Remove {
    /// Network name
    pub name: String,
}

pub fn network(cmd: NetworkCmd) -> Result<()> {
    let mut registry = NetworkRegistry::load_default()?;
    let ipam = Ipam::new();

    match cmd {
        NetworkCmd::Create(args) => {
            registry.create(&args.driver, &args.subnet, &args.name, &ipam)?;
        }
        NetworkCmd::List => {
            println!("{:<12} {:<20} {}", "NAME", "IpRange", "Driver");
            for network in registry.list() {
                println!(
                    "{:<12} {:<20} {}",
                    network.name,
                    network.ip_range.to_string(),
                    network.driver
                );
            }
        }
        NetworkCmd::Remove(args) => {
            registry.remove(&args.name, &ipam)?;
        }
    }

    Ok(())
}
