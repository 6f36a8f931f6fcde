use std::fs::File;
use std::os::fd::AsFd;
use std::path::PathBuf;

use nix::sched::{setns, CloneFlags};

#[derive(Debug, thiserror::Error)]
pub enum NetnsError {
    #[error("failed to open {path}: {err}")]
    Open { err: std::io::Error, path: PathBuf },
    #[error("setns failed: {0}")]
    Setns(nix::Error),
}

/// Scoped entry into a container's network namespace.
///
/// On construction the calling thread switches to `/proc/<pid>/ns/net`; on
/// drop it switches back to the namespace captured beforehand, so the
/// restore runs on every exit path including unwinding. setns applies to
/// the calling thread only; the guard must be dropped on the thread that
/// created it.
pub struct NetnsGuard {
    host: File,
}

impl NetnsGuard {
    pub fn enter(pid: &str) -> Result<Self, NetnsError> {
        let target_path = PathBuf::from(format!("/proc/{pid}/ns/net"));
        let target = File::open(&target_path).map_err(|err| NetnsError::Open {
            err,
            path: target_path,
        })?;

        let host_path = PathBuf::from("/proc/self/ns/net");
        let host = File::open(&host_path).map_err(|err| NetnsError::Open {
            err,
            path: host_path,
        })?;

        setns(target.as_fd(), CloneFlags::CLONE_NEWNET).map_err(NetnsError::Setns)?;
        tracing::debug!(pid, "entered container network namespace");

        Ok(Self { host })
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        if let Err(errno) = setns(self.host.as_fd(), CloneFlags::CLONE_NEWNET) {
            tracing::error!("failed to restore host network namespace: {}", errno);
        }
    }
}
