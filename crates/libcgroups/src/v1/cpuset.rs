use std::path::Path;

use nix::unistd::Pid;

use super::controller::{Subsystem, V1ControllerError, CGROUP_TASKS};
use super::util;
use crate::common::{self, Resources, WrappedIoError};

const CGROUP_CPUSET_CPUS: &str = "cpuset.cpus";
const CGROUP_CPUSET_MEMS: &str = "cpuset.mems";

pub struct CpuSet {}

impl Subsystem for CpuSet {
    fn name(&self) -> &'static str {
        "cpuset"
    }

    fn set(&self, cgroup_path: &Path, res: &Resources) -> Result<(), V1ControllerError> {
        tracing::debug!("apply cpuset cgroup config");

        if let Some(cpus) = &res.cpuset_cpus {
            let path = util::subsystem_cgroup_path(self.name(), cgroup_path, true)?;

            // A fresh cpuset group starts with empty cpuset.mems; copy the
            // parent's memory nodes before constraining the cpus.
            if let Some(parent) = path.parent() {
                let parent_mems = common::read_cgroup_file(parent.join(CGROUP_CPUSET_MEMS))?;
                common::write_cgroup_file(path.join(CGROUP_CPUSET_MEMS), parent_mems.trim())?;
            }
            common::write_cgroup_file(path.join(CGROUP_CPUSET_CPUS), cpus)?;
        }

        Ok(())
    }

    fn apply(&self, cgroup_path: &Path, pid: Pid) -> Result<(), V1ControllerError> {
        let path = util::subsystem_cgroup_path(self.name(), cgroup_path, true)?;

        // The kernel rejects tasks while cpuset.cpus or cpuset.mems is
        // empty; fill both from the parent group when `set` has not run.
        if common::read_cgroup_file(path.join(CGROUP_CPUSET_CPUS))?
            .trim()
            .is_empty()
        {
            self.inherit_from_parent(&path)?;
        }

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

impl CpuSet {
    fn inherit_from_parent(&self, path: &Path) -> Result<(), V1ControllerError> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };

        let cpus = common::read_cgroup_file(parent.join(CGROUP_CPUSET_CPUS))?;
        let mems = common::read_cgroup_file(parent.join(CGROUP_CPUSET_MEMS))?;
        common::write_cgroup_file(path.join(CGROUP_CPUSET_MEMS), mems.trim())?;
        common::write_cgroup_file(path.join(CGROUP_CPUSET_CPUS), cpus.trim())?;

        Ok(())
    }
}
