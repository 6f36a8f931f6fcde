use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::Args;
use libcontainer::container::{ContainerRecord, DEFAULT_INFO_ROOT};
use libcontainer::nsenter::{ENV_EXEC_CMD, ENV_EXEC_PID};

#[derive(Args, Debug)]
pub struct Exec {
    /// Container name
    pub container: String,

    /// Command to run inside the container
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Re-executes the runtime with the exec request in the environment. The
/// nsenter bootstrap in the re-executed process joins the container's
/// namespaces before anything else runs, then executes the command.
pub fn exec(args: Exec) -> Result<()> {
    let record = ContainerRecord::load(Path::new(DEFAULT_INFO_ROOT), &args.container)?;
    if record.pid.is_empty() {
        bail!("container {} is not running", args.container);
    }

    let command = args.command.join(" ");
    tracing::info!(container = %args.container, pid = %record.pid, %command, "exec in container");

    let status = Command::new("/proc/self/exe")
        .arg("exec")
        .env(ENV_EXEC_PID, &record.pid)
        .env(ENV_EXEC_CMD, &command)
        .envs(container_env(&record.pid))
        .status()
        .with_context(|| format!("failed to exec in container {}", args.container))?;

    std::process::exit(status.code().unwrap_or(1));
}

/// The environment of the container's init process, so exec'd commands see
/// the same variables the container was started with.
fn container_env(pid: &str) -> Vec<(String, String)> {
    match fs::read(format!("/proc/{pid}/environ")) {
        Ok(environ) => parse_environ(&environ),
        Err(err) => {
            tracing::warn!(pid, "cannot read container environment: {}", err);
            vec![]
        }
    }
}

fn parse_environ(environ: &[u8]) -> Vec<(String, String)> {
    environ
        .split(|byte| *byte == 0)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            entry
                .split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_environ() {
        let raw = b"PATH=/bin:/usr/bin\0HOME=/root\0WEIRD\0EMPTY=\0";
        let env = parse_environ(raw);
        assert_eq!(
            env,
            vec![
                ("PATH".to_string(), "/bin:/usr/bin".to_string()),
                ("HOME".to_string(), "/root".to_string()),
                ("EMPTY".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_parse_environ_empty() {
        assert!(parse_environ(b"").is_empty());
    }
}
