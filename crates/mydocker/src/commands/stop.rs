use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use libcontainer::container::{ContainerRecord, ContainerStatus, DEFAULT_INFO_ROOT};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

#[derive(Args, Debug)]
pub struct Stop {
    /// Container name
    pub container: String,
}

/// SIGTERMs the container's init process and persists the record as
/// stopped with its pid cleared.
pub fn stop(args: Stop) -> Result<()> {
    let info_root = Path::new(DEFAULT_INFO_ROOT);
    let mut record = ContainerRecord::load(info_root, &args.container)?;

    if record.status == ContainerStatus::Running && !record.pid.is_empty() {
        let pid = record.pid.parse::<i32>().with_context(|| {
            format!(
                "container {} has a malformed pid {:?}",
                args.container, record.pid
            )
        })?;

        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => tracing::info!(container = %args.container, pid, "sent SIGTERM"),
            Err(Errno::ESRCH) => {
                tracing::warn!(container = %args.container, pid, "init process already gone")
            }
            Err(errno) => {
                return Err(anyhow!(
                    "failed to stop container {}: {}",
                    args.container,
                    errno
                ))
            }
        }
    }

    record.status = ContainerStatus::Stopped;
    record.pid = String::new();
    record.save(info_root)?;

    Ok(())
}
