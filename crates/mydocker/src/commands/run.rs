use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use libcgroups::common::Resources;
use libcgroups::v1::CgroupManager;
use libcontainer::container::{random_id, ContainerRecord, DEFAULT_INFO_ROOT};
use libcontainer::process::new_parent_process;
use libcontainer::rootfs;
use libnetwork::ipam::Ipam;
use libnetwork::NetworkRegistry;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Relative cgroup path shared by all mydocker containers.
pub const CGROUP_PATH: &str = "mydocker-cgroup";

#[derive(Args, Debug)]
pub struct Run {
    /// Attach the parent terminal; invoked as -ti
    #[arg(short = 't', long = "ti", conflicts_with = "detach")]
    pub tty: bool,

    /// Accepted so the flag reads -ti; stdin is inherited either way
    #[arg(short = 'i', hide = true, conflicts_with = "detach")]
    pub interactive: bool,

    /// Detach and leave the container running in the background
    #[arg(short = 'd', long = "detach")]
    pub detach: bool,

    /// Memory limit, e.g. 100m
    #[arg(short = 'm', long = "memory")]
    pub memory: Option<String>,

    /// cpu.shares weight
    #[arg(long = "cpushare")]
    pub cpushare: Option<String>,

    /// cpuset.cpus list, e.g. 0-1
    #[arg(long = "cpuset")]
    pub cpuset: Option<String>,

    /// Bind mount host:container
    #[arg(short = 'v', long = "volume")]
    pub volume: Option<String>,

    /// Container name; defaults to the generated id
    #[arg(long = "name")]
    pub name: Option<String>,

    /// Extra environment variables KEY=VALUE
    #[arg(short = 'e', long = "env")]
    pub env: Vec<String>,

    /// Network to connect the container to
    #[arg(long = "net")]
    pub net: Option<String>,

    /// Publish host:container tcp port mappings
    #[arg(short = 'p', long = "publish")]
    pub port_mapping: Vec<String>,

    /// Image name; /root/IMAGE.tar must exist
    pub image: String,

    /// Command to run inside the container
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Creates and starts a container: workspace, init process, record,
/// cgroups, optional network, then the command handoff that releases the
/// blocked init. Failures undo the steps already completed, in reverse.
///
/// Two concurrent runs under the same container name are undefined; image
/// extraction itself is serialized.
pub fn run(args: Run) -> Result<()> {
    let id = random_id();
    let name = args.name.clone().unwrap_or_else(|| id.clone());
    let info_root = Path::new(DEFAULT_INFO_ROOT);
    let volume = args.volume.as_deref();
    tracing::info!(container = %name, image = %args.image, "creating container");

    if let Err(err) = rootfs::new_workspace(volume, &args.image, &name) {
        rootfs::delete_workspace(volume, &name);
        return Err(err).with_context(|| format!("failed to build workspace for {name}"));
    }

    let mut parent = match new_parent_process(args.tty, &name, &args.env, info_root) {
        Ok(parent) => parent,
        Err(err) => {
            rootfs::delete_workspace(volume, &name);
            return Err(err).context("failed to start container init process");
        }
    };
    let pid = parent.pid();

    let record = ContainerRecord::new(
        &id,
        &name,
        pid.as_raw(),
        &args.command.join(" "),
        volume.unwrap_or(""),
        &args.port_mapping,
    );
    if let Err(err) = record.save(info_root) {
        rollback(pid, None, info_root, &name, volume);
        return Err(err).context("failed to record container state");
    }

    // The init process stays blocked on the pipe until the command is
    // sent, so it is inside its cgroup before it ever execs.
    let cgroup_manager = CgroupManager::new(CGROUP_PATH);
    let resources = Resources {
        memory_limit: args.memory.clone(),
        cpu_shares: args.cpushare.clone(),
        cpuset_cpus: args.cpuset.clone(),
    };
    if let Err(err) = cgroup_manager
        .set(&resources)
        .and_then(|()| cgroup_manager.apply(pid))
    {
        rollback(pid, Some(&cgroup_manager), info_root, &name, volume);
        return Err(err).context("failed to apply cgroup limits");
    }

    if let Some(net) = &args.net {
        let connected = NetworkRegistry::load_default()
            .and_then(|registry| registry.connect(net, &record, &Ipam::new()));
        if let Err(err) = connected {
            rollback(pid, Some(&cgroup_manager), info_root, &name, volume);
            return Err(err).with_context(|| format!("failed to connect container to {net}"));
        }
    }

    if let Err(err) = parent.send_init_command(&args.command) {
        rollback(pid, Some(&cgroup_manager), info_root, &name, volume);
        return Err(err).context("failed to hand the command to container init");
    }

    if args.tty {
        let status = parent.wait().context("failed to wait for container")?;
        tracing::info!(?status, container = %name, "container exited");

        if let Err(err) = ContainerRecord::delete(info_root, &name) {
            tracing::warn!(container = %name, "failed to delete container record: {}", err);
        }
        rootfs::delete_workspace(volume, &name);
        cgroup_manager.destroy();
    }
    // A detached container keeps its record, workspace and cgroup; `stop`
    // and `rm` reclaim them.

    Ok(())
}

/// Best-effort undo of everything `run` has created so far, in reverse
/// order. Every step logs instead of failing so the rest still runs.
fn rollback(
    pid: Pid,
    cgroup_manager: Option<&CgroupManager>,
    info_root: &Path,
    name: &str,
    volume: Option<&str>,
) {
    if let Some(cgroup_manager) = cgroup_manager {
        cgroup_manager.destroy();
    }

    if let Err(errno) = kill(pid, Signal::SIGKILL) {
        tracing::warn!(%pid, "failed to kill container init: {}", errno);
    }

    if let Err(err) = ContainerRecord::delete(info_root, name) {
        tracing::warn!(container = name, "failed to delete container record: {}", err);
    }

    rootfs::delete_workspace(volume, name);
}
