use std::env;
use std::ffi::CString;
use std::fs::{self, File};
use std::io::Read;
use std::os::fd::{FromRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::unistd;

use super::parent::INIT_PIPE_FD;

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("failed to read command from init pipe: {0}")]
    ReadPipe(std::io::Error),
    #[error("no command passed to container init")]
    EmptyCommand,
    #[error("failed to mount {target}: {errno}")]
    Mount { errno: nix::Error, target: PathBuf },
    #[error("pivot_root failed: {0}")]
    PivotRoot(nix::Error),
    #[error("io error on {path}: {err}")]
    Io { err: std::io::Error, path: PathBuf },
    #[error("executable {0} not found on PATH")]
    NotFound(String),
    #[error("exec failed: {0}")]
    Exec(nix::Error),
    #[error("invalid argument string: {0}")]
    Nul(#[from] std::ffi::NulError),
    #[error("syscall failed: {0}")]
    Nix(#[from] nix::Error),
}

/// Entry point of the hidden `init` subcommand. Runs as pid 1 of the new
/// namespaces with the merged rootfs as working directory: blocks on the
/// pipe until the parent has finished cgroup and network setup, makes the
/// mount tree private, pivots into the rootfs and execs the user command.
pub fn container_init_process() -> Result<(), InitError> {
    let argv = read_user_command()?;
    if argv.is_empty() {
        return Err(InitError::EmptyCommand);
    }
    tracing::info!(?argv, "container init starting");

    setup_mount()?;

    let executable = lookup_path(&argv[0])?;
    let path = CString::new(executable.as_os_str().as_bytes())?;
    let args: Vec<CString> = argv
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<Result<_, _>>()?;
    let env: Vec<CString> = env::vars()
        .map(|(key, value)| CString::new(format!("{key}={value}")))
        .collect::<Result<_, _>>()?;

    unistd::execve(&path, &args, &env).map_err(InitError::Exec)?;

    Ok(())
}

/// Reads the full command line from fd 3. EOF arrives once the parent has
/// written the command and closed its end, i.e. after cgroups are applied.
fn read_user_command() -> Result<Vec<String>, InitError> {
    let mut pipe = unsafe { File::from_raw_fd(INIT_PIPE_FD as RawFd) };
    let mut command = String::new();
    pipe.read_to_string(&mut command)
        .map_err(InitError::ReadPipe)?;

    Ok(split_command(&command))
}

fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

fn setup_mount() -> Result<(), InitError> {
    // systemd defaults the host mount tree to shared propagation; without
    // flipping it to private, pivot_root below fails and our mounts leak
    // back to the host.
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|errno| InitError::Mount {
        errno,
        target: PathBuf::from("/"),
    })?;

    let root = env::current_dir().map_err(|err| InitError::Io {
        err,
        path: PathBuf::from("."),
    })?;
    pivot_root(&root)?;

    for dir in ["/proc", "/dev"] {
        fs::create_dir_all(dir).map_err(|err| InitError::Io {
            err,
            path: PathBuf::from(dir),
        })?;
    }

    mount(
        Some("proc"),
        "/proc",
        Some("proc"),
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        None::<&str>,
    )
    .map_err(|errno| InitError::Mount {
        errno,
        target: PathBuf::from("/proc"),
    })?;

    mount(
        Some("tmpfs"),
        "/dev",
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=755"),
    )
    .map_err(|errno| InitError::Mount {
        errno,
        target: PathBuf::from("/dev"),
    })?;

    Ok(())
}

/// Swings the root of the mount namespace onto `root`, parking the old
/// root on `<root>/.pivot_root` and detaching it afterwards.
fn pivot_root(root: &Path) -> Result<(), InitError> {
    // pivot_root requires new_root to be a mount point; bind it over
    // itself to make it one.
    mount(
        Some(root),
        root,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|errno| InitError::Mount {
        errno,
        target: root.to_path_buf(),
    })?;

    let put_old = root.join(".pivot_root");
    if !put_old.exists() {
        fs::create_dir(&put_old).map_err(|err| InitError::Io {
            err,
            path: put_old.clone(),
        })?;
    }

    unistd::pivot_root(root, &put_old).map_err(InitError::PivotRoot)?;
    unistd::chdir("/")?;

    let put_old = Path::new("/.pivot_root");
    umount2(put_old, MntFlags::MNT_DETACH)?;
    fs::remove_dir(put_old).map_err(|err| InitError::Io {
        err,
        path: put_old.to_path_buf(),
    })?;

    Ok(())
}

/// Resolves the command on the container's PATH the way execlp would.
fn lookup_path(command: &str) -> Result<PathBuf, InitError> {
    let path_var =
        env::var("PATH").unwrap_or_else(|_| "/bin:/usr/bin:/sbin:/usr/sbin".to_string());
    lookup_in(command, &path_var)
}

fn lookup_in(command: &str, path_var: &str) -> Result<PathBuf, InitError> {
    if command.contains('/') {
        return Ok(PathBuf::from(command));
    }

    for dir in path_var.split(':').filter(|dir| !dir.is_empty()) {
        let candidate = Path::new(dir).join(command);
        if let Ok(metadata) = candidate.metadata() {
            if metadata.is_file() && metadata.permissions().mode() & 0o111 != 0 {
                return Ok(candidate);
            }
        }
    }

    Err(InitError::NotFound(command.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_command() {
        assert_eq!(split_command("sh"), vec!["sh"]);
        assert_eq!(split_command("ls -l /tmp"), vec!["ls", "-l", "/tmp"]);
        assert_eq!(split_command("  stress --vm-bytes 200m  "), vec![
            "stress",
            "--vm-bytes",
            "200m"
        ]);
        assert!(split_command("").is_empty());
    }

    #[test]
    fn test_lookup_absolute_path_passes_through() {
        let path = lookup_in("/bin/sh", "").unwrap();
        assert_eq!(path, PathBuf::from("/bin/sh"));
    }

    #[test]
    fn test_lookup_searches_path_entries() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("mytool");
        fs::write(&exe, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();

        let path_var = format!("/nonexistent:{}", dir.path().display());
        assert_eq!(lookup_in("mytool", &path_var).unwrap(), exe);
    }

    #[test]
    fn test_lookup_ignores_non_executables() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data");
        fs::write(&file, "not a program").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();

        let path_var = dir.path().display().to_string();
        assert!(matches!(
            lookup_in("data", &path_var),
            Err(InitError::NotFound(_))
        ));
    }
}
