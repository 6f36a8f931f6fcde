use std::path::{Path, PathBuf};

use nix::unistd::Pid;

use crate::common::{Resources, WrappedIoError};

/// Control file every v1 controller exposes; writing a pid into it moves
/// the task into the group.
pub const CGROUP_TASKS: &str = "tasks";

#[derive(Debug, thiserror::Error)]
pub enum V1ControllerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("controller {controller} is not mounted in the v1 hierarchy")]
    NotMounted { controller: &'static str },
    #[error("cgroup {path} does not exist")]
    NotFound { path: PathBuf },
    #[error("failed to read mountinfo: {0}")]
    Mountinfo(#[from] procfs::ProcError),
}

/// One driver per v1 controller. The cgroup is addressed by its path
/// relative to the controller's mount point; `set` and `apply` create the
/// group on demand, `remove` expects it to be empty of tasks.
pub trait Subsystem {
    fn name(&self) -> &'static str;

    /// Writes the controller's tunables for the given limits.
    fn set(&self, cgroup_path: &Path, res: &Resources) -> Result<(), V1ControllerError>;

    /// Moves `pid` into the cgroup by appending it to `tasks`.
    fn apply(&self, cgroup_path: &Path, pid: Pid) -> Result<(), V1ControllerError>;

    /// Deletes the cgroup directory.
    fn remove(&self, cgroup_path: &Path) -> Result<(), V1ControllerError>;
}
