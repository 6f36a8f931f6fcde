use std::path::Path;

use anyhow::{bail, Result};
use clap::Args;
use libcgroups::v1::CgroupManager;
use libcontainer::container::{ContainerRecord, ContainerStatus, DEFAULT_INFO_ROOT};
use libcontainer::rootfs;

use super::run::CGROUP_PATH;

#[derive(Args, Debug)]
pub struct Rm {
    /// Container name
    pub container: String,
}

/// Removes a stopped or exited container: its record directory, its
/// workspace and the cgroup subtree detached runs leave behind.
pub fn rm(args: Rm) -> Result<()> {
    let info_root = Path::new(DEFAULT_INFO_ROOT);
    let record = ContainerRecord::load(info_root, &args.container)?;

    if record.status == ContainerStatus::Running {
        bail!(
            "cannot remove running container {}, stop it first",
            args.container
        );
    }

    ContainerRecord::delete(info_root, &args.container)?;

    let volume = (!record.volume.is_empty()).then_some(record.volume.as_str());
    rootfs::delete_workspace(volume, &args.container);

    CgroupManager::new(CGROUP_PATH).destroy();

    Ok(())
}
