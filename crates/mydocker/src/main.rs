//! # mydocker
//! A minimal container runtime: fresh namespaces for isolation, cgroup v1
//! for resource limits, an overlay rootfs per container and bridge
//! networking with a bitmap IPAM.

mod commands;
mod observability;

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "mydocker", version, about = "a minimal container runtime")]
struct Opts {
    /// set the log level (default is 'error')
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// log format: text or json
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    subcmd: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Create and start a container with namespace and cgroup limits
    Run(commands::run::Run),

    /// Container-side init entry; not for direct use
    #[command(hide = true)]
    Init,

    /// Store a container's filesystem as a new image tarball
    Commit(commands::commit::Commit),

    /// List containers
    Ps,

    /// Print the captured log of a detached container
    Logs(commands::logs::Logs),

    /// Run a command inside a running container
    Exec(commands::exec::Exec),

    /// Stop a running container
    Stop(commands::stop::Stop),

    /// Remove a stopped container
    Rm(commands::rm::Rm),

    /// Manage container networks
    #[command(subcommand)]
    Network(commands::network::NetworkCmd),
}

fn main() -> Result<()> {
    // The `exec` re-entry must run before argument parsing, logging setup
    // or anything else that could spawn a thread; when the exec request
    // variables are present this call never returns.
    libcontainer::nsenter::enter_if_requested();

    let opts = Opts::parse();

    observability::init(opts.log_level.as_deref(), opts.log_format.as_deref()).map_err(|err| {
        eprintln!("failed to initialize logging: {}", err);
        err
    })?;

    let result = match opts.subcmd {
        SubCommand::Run(run) => commands::run::run(run),
        SubCommand::Init => commands::init::init(),
        SubCommand::Commit(commit) => commands::commit::commit(commit),
        SubCommand::Ps => commands::ps::ps(),
        SubCommand::Logs(logs) => commands::logs::logs(logs),
        SubCommand::Exec(exec) => commands::exec::exec(exec),
        SubCommand::Stop(stop) => commands::stop::stop(stop),
        SubCommand::Rm(rm) => commands::rm::rm(rm),
        SubCommand::Network(cmd) => commands::network::network(cmd),
    };

    if let Err(ref err) = result {
        tracing::error!("error in executing command: {:?}", err);
    }

    result
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Opts::command().debug_assert();
    }

    #[test]
    fn test_tty_and_detach_conflict() {
        let err = Opts::try_parse_from(["mydocker", "run", "-ti", "-d", "busybox", "sh"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_ti_parses_as_one_token() {
        let opts = Opts::try_parse_from(["mydocker", "run", "-ti", "busybox", "sh"]).unwrap();

        let SubCommand::Run(run) = opts.subcmd else {
            panic!("expected run subcommand");
        };
        assert!(run.tty);
        assert!(!run.detach);
        assert_eq!(run.image, "busybox");
        assert_eq!(run.command, vec!["sh"]);
    }

    #[test]
    fn test_run_requires_a_command() {
        assert!(Opts::try_parse_from(["mydocker", "run", "-d", "busybox"]).is_err());
    }

    #[test]
    fn test_run_parses_the_full_flag_surface() {
        let opts = Opts::try_parse_from([
            "mydocker", "run", "-d", "-m", "100m", "--cpushare", "512", "--cpuset", "0-1",
            "-v", "/tmp/data:/data", "--name", "web", "-e", "KEY=value", "--net", "br0",
            "-p", "8080:80", "nginx", "nginx", "-g", "daemon off;",
        ])
        .unwrap();

        let SubCommand::Run(run) = opts.subcmd else {
            panic!("expected run subcommand");
        };
        assert!(run.detach);
        assert!(!run.tty);
        assert_eq!(run.memory.as_deref(), Some("100m"));
        assert_eq!(run.cpushare.as_deref(), Some("512"));
        assert_eq!(run.cpuset.as_deref(), Some("0-1"));
        assert_eq!(run.volume.as_deref(), Some("/tmp/data:/data"));
        assert_eq!(run.name.as_deref(), Some("web"));
        assert_eq!(run.env, vec!["KEY=value"]);
        assert_eq!(run.net.as_deref(), Some("br0"));
        assert_eq!(run.port_mapping, vec!["8080:80"]);
        assert_eq!(run.image, "nginx");
        assert_eq!(run.command, vec!["nginx", "-g", "daemon off;"]);
    }

    #[test]
    fn test_network_create_parses() {
        let opts = Opts::try_parse_from([
            "mydocker", "network", "create", "--driver", "bridge",
            "--subnet", "192.168.10.0/24", "br0",
        ])
        .unwrap();

        let SubCommand::Network(commands::network::NetworkCmd::Create(create)) = opts.subcmd
        else {
            panic!("expected network create subcommand");
        };
        assert_eq!(create.driver, "bridge");
        assert_eq!(create.subnet, "192.168.10.0/24");
        assert_eq!(create.name, "br0");
    }
}
