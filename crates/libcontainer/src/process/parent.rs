use std::ffi::CString;
use std::fs::File;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::sched::CloneFlags;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{self, Pid};

use super::clone::{container_clone, CloneCb, CloneError};
use crate::container::ContainerRecord;
use crate::rootfs;

/// The pipe's read end is handed to the init process on this descriptor.
pub const INIT_PIPE_FD: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to create init pipe: {0}")]
    Pipe(nix::Error),
    #[error(transparent)]
    Clone(#[from] CloneError),
    #[error("io error on {path}: {err}")]
    Io { err: std::io::Error, path: PathBuf },
    #[error("failed to send command to container init: {0}")]
    SendCommand(std::io::Error),
    #[error("failed to wait for container init: {0}")]
    Wait(nix::Error),
    #[error("invalid argument string: {0}")]
    Nul(#[from] std::ffi::NulError),
}

/// Handle on the cloned container init process. Holds the write end of the
/// init pipe until the command has been sent.
pub struct ParentProcess {
    pid: Pid,
    write_pipe: Option<File>,
}

impl ParentProcess {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Writes the space-joined user command into the pipe and closes it.
    /// The init process is blocked reading until this happens, which is
    /// what sequences cgroup assignment before the user exec.
    pub fn send_init_command(&mut self, argv: &[String]) -> Result<(), ProcessError> {
        let command = argv.join(" ");
        tracing::info!(%command, "sending command to container init");

        if let Some(mut pipe) = self.write_pipe.take() {
            pipe.write_all(command.as_bytes())
                .map_err(ProcessError::SendCommand)?;
        }

        Ok(())
    }

    pub fn wait(&self) -> Result<WaitStatus, ProcessError> {
        waitpid(self.pid, None).map_err(ProcessError::Wait)
    }
}

/// Clones the container init process into fresh uts/pid/mount/net/ipc
/// namespaces. The child wires the pipe onto fd 3, redirects stdio into
/// the container log when detached (a tty run inherits the terminal), sets
/// its working directory to the merged rootfs and re-execs
/// `/proc/self/exe init`.
pub fn new_parent_process(
    tty: bool,
    container_name: &str,
    envs: &[String],
    info_root: &Path,
) -> Result<ParentProcess, ProcessError> {
    // Cloexec on both ends: the child inherits a copy of the whole fd
    // table, and a write end surviving its execve would keep the pipe
    // open and starve init's read of EOF. The dup2 onto fd 3 below clears
    // the flag on the one descriptor that must cross the exec.
    let (read_pipe, write_pipe) =
        unistd::pipe2(OFlag::O_CLOEXEC).map_err(ProcessError::Pipe)?;

    let log_file = if tty {
        None
    } else {
        let dir = ContainerRecord::dir(info_root, container_name);
        std::fs::create_dir_all(&dir).map_err(|err| ProcessError::Io {
            err,
            path: dir.clone(),
        })?;
        let path = ContainerRecord::log_path(info_root, container_name);
        Some(File::create(&path).map_err(|err| ProcessError::Io { err, path })?)
    };

    let exe = CString::new("/proc/self/exe")?;
    let argv = [exe.clone(), CString::new("init")?];
    let env: Vec<CString> = std::env::vars()
        .map(|(key, value)| format!("{key}={value}"))
        .chain(envs.iter().cloned())
        .map(CString::new)
        .collect::<Result<_, _>>()?;
    let workdir = rootfs::mnt_path(container_name);

    let read_fd = read_pipe.as_raw_fd();
    let log_fd = log_file.as_ref().map(|file| file.as_raw_fd());

    let cb: CloneCb = Box::new(|| {
        // Child side of clone. Only async-signal-safe work until execve.
        if let Some(log_fd) = log_fd {
            if unistd::dup2(log_fd, 1).is_err() || unistd::dup2(log_fd, 2).is_err() {
                return -1;
            }
        }

        if read_fd == INIT_PIPE_FD {
            // Already on the right descriptor; strip cloexec by hand since
            // no dup2 will do it.
            if fcntl(read_fd, FcntlArg::F_SETFD(FdFlag::empty())).is_err() {
                return -1;
            }
        } else if unistd::dup2(read_fd, INIT_PIPE_FD).is_err() {
            return -1;
        }

        if unistd::chdir(workdir.as_path()).is_err() {
            eprintln!("container init: cannot enter {}", workdir.display());
            return -1;
        }

        match unistd::execve(&exe, &argv, &env) {
            Ok(_) => 0,
            Err(errno) => {
                eprintln!("container init: execve failed: {errno}");
                -1
            }
        }
    });

    let flags = CloneFlags::CLONE_NEWUTS
        | CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWNET
        | CloneFlags::CLONE_NEWIPC;

    let pid = container_clone(cb, flags)?;
    tracing::debug!(%pid, container = container_name, "container init process cloned");

    // The child holds its own copies; release the read end and the log
    // handle so EOF and log rotation behave.
    drop(read_pipe);
    drop(log_file);

    Ok(ParentProcess {
        pid,
        write_pipe: Some(File::from(write_pipe)),
    })
}
