//! Early namespace entry for `exec`.
//!
//! `mydocker exec` re-executes the runtime binary with the target pid and
//! command carried in environment variables. The re-executed process calls
//! [`enter_if_requested`] as the very first statement of `main`, before
//! anything else initializes, so the namespace switch happens while the
//! process is still single threaded and nothing has latched onto the old
//! mount namespace.

use std::env;
use std::fs::File;
use std::os::fd::AsFd;
use std::process::{self, Command};

use nix::sched::{setns, CloneFlags};

/// Pid of the container whose namespaces to join.
pub const ENV_EXEC_PID: &str = "mydocker_pid";
/// Command line to run inside the container.
pub const ENV_EXEC_CMD: &str = "mydocker_cmd";

/// The namespaces joined for `exec`, in entry order.
const NAMESPACES: [&str; 5] = ["ipc", "uts", "net", "pid", "mnt"];

/// Checks for an exec request in the environment and, if present, joins
/// the target's namespaces, runs the command through a shell and exits
/// with its status. Returns immediately when no request is present.
///
/// Must run before argument parsing, logging setup or anything else that
/// could spawn a thread: joining a pid or mount namespace is refused by
/// the kernel once the process is multi-threaded.
pub fn enter_if_requested() {
    let (Ok(pid), Ok(cmd)) = (env::var(ENV_EXEC_PID), env::var(ENV_EXEC_CMD)) else {
        return;
    };

    for ns in NAMESPACES {
        let path = format!("/proc/{pid}/ns/{ns}");
        match File::open(&path) {
            Ok(file) => {
                if let Err(errno) = setns(file.as_fd(), CloneFlags::empty()) {
                    eprintln!("setns on {ns} namespace failed: {errno}");
                }
            }
            Err(err) => eprintln!("open {path} failed: {err}"),
        }
    }

    // Entering the pid namespace only affects children, so the command
    // runs in a forked shell rather than replacing this process.
    let code = match Command::new("sh").arg("-c").arg(&cmd).status() {
        Ok(status) => status.code().unwrap_or(0),
        Err(err) => {
            eprintln!("exec of {cmd:?} failed: {err}");
            1
        }
    };

    process::exit(code);
}
