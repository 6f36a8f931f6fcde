use std::fs;
use std::path::{Path, PathBuf};

use procfs::process::Process;

use super::controller::V1ControllerError;
use crate::common::WrappedIoError;

/// Locates the v1 mount point of a controller by scanning
/// `/proc/self/mountinfo` for a cgroup entry whose super options carry the
/// controller name.
pub fn subsystem_mount_point(subsystem: &'static str) -> Result<PathBuf, V1ControllerError> {
    Process::myself()?
        .mountinfo()?
        .into_iter()
        .find(|m| m.fs_type == "cgroup" && m.super_options.contains_key(subsystem))
        .map(|m| m.mount_point)
        .ok_or(V1ControllerError::NotMounted {
            controller: subsystem,
        })
}

/// Resolves the absolute path of a cgroup within a controller's hierarchy.
/// With `create` the group directory is created (with parents) when absent;
/// without it a missing group is an error.
pub fn subsystem_cgroup_path(
    subsystem: &'static str,
    cgroup_path: &Path,
    create: bool,
) -> Result<PathBuf, V1ControllerError> {
    let path = subsystem_mount_point(subsystem)?.join(cgroup_path);
    if !path.exists() {
        if !create {
            return Err(V1ControllerError::NotFound { path });
        }

        fs::create_dir_all(&path).map_err(|err| WrappedIoError::CreateDir {
            err,
            path: path.clone(),
        })?;
    }

    Ok(path)
}
