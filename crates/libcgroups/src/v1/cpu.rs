use std::path::Path;

use nix::unistd::Pid;

use super::controller::{Subsystem, V1ControllerError, CGROUP_TASKS};
use super::util;
use crate::common::{self, Resources, WrappedIoError};

const CGROUP_CPU_SHARES: &str = "cpu.shares";

pub struct Cpu {}

impl Subsystem for Cpu {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn set(&self, cgroup_path: &Path, res: &Resources) -> Result<(), V1ControllerError> {
        tracing::debug!("apply cpu cgroup config");

        if let Some(shares) = &res.cpu_shares {
            let path = util::subsystem_cgroup_path(self.name(), cgroup_path, true)?;
            common::write_cgroup_file(path.join(CGROUP_CPU_SHARES), shares)?;
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
