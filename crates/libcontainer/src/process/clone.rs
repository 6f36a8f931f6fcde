use nix::sched::{self, CloneFlags};
use nix::sys::signal::Signal;
use nix::unistd::Pid;

pub use nix::sched::CloneCb;

/// Stack for the cloned child; the child only re-execs, so this does not
/// need to be large.
const CLONE_STACK_SIZE: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    #[error("clone failed: {0}")]
    Clone(#[from] nix::Error),
}

/// Clones a child process into the given fresh namespaces and runs `cb`
/// inside it. SIGCHLD is requested so the parent can wait(2) on the child
/// like a regular fork.
pub fn container_clone(cb: CloneCb<'_>, flags: CloneFlags) -> Result<Pid, CloneError> {
    let mut stack = vec![0u8; CLONE_STACK_SIZE];
    let pid = unsafe { sched::clone(cb, &mut stack, flags, Some(Signal::SIGCHLD as i32)) }?;

    Ok(pid)
}
