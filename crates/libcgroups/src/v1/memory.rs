use std::path::Path;

use nix::unistd::Pid;

use super::controller::{Subsystem, V1ControllerError, CGROUP_TASKS};
use super::util;
use crate::common::{self, Resources, WrappedIoError};

const CGROUP_MEMORY_LIMIT: &str = "memory.limit_in_bytes";

pub struct Memory {}

impl Subsystem for Memory {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn set(&self, cgroup_path: &Path, res: &Resources) -> Result<(), V1ControllerError> {
        tracing::debug!("apply memory cgroup config");

        if let Some(limit) = &res.memory_limit {
            let path = util::subsystem_cgroup_path(self.name(), cgroup_path, true)?;
            common::write_cgroup_file(path.join(CGROUP_MEMORY_LIMIT), limit)?;
        }

        Ok(())
    }

    fn apply(&self, cgroup_path: &Path, pid: Pid) -> Result<(), V1ControllerError> {
        let path = util::subsystem_cgroup_path(self.name(), cgroup_path, true)?;
        common::write_cgroup_file(path.join(CGROUP_TASKS), pid)?;

        Ok(())
    }

    fn remove(&self, cgroup_path: &Path) -> Result<(), V1ControllerError> {
        let path = util::subsystem_cgroup_path(self.name(), cgroup_path, false)?;
        std::fs::remove_dir(&path)
            .map_err(|err| WrappedIoError::RemoveDir { err, path })?;

        Ok(())
    }
}
