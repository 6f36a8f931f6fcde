use std::fs;
use std::path::PathBuf;

use nix::mount::{mount, umount2, MntFlags, MsFlags};

use super::{mnt_path, RootfsError};

/// Splits a `-v host:guest` flag. Both sides must be present and
/// non-empty; anything else is rejected and the caller decides whether
/// that is fatal.
pub fn parse(volume: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = volume.split(':').collect();
    match parts.as_slice() {
        [host, guest] if !host.is_empty() && !guest.is_empty() => {
            Some((host.to_string(), guest.to_string()))
        }
        _ => None,
    }
}

/// Guest mount point inside the merged root.
fn guest_path(guest: &str, container: &str) -> PathBuf {
    mnt_path(container).join(guest.trim_start_matches('/'))
}

/// Bind-mounts the host directory onto the guest path inside the merged
/// root, creating both sides as needed.
pub fn mount_volume(host: &str, guest: &str, container: &str) -> Result<(), RootfsError> {
    fs::create_dir_all(host).map_err(|err| RootfsError::Io {
        err,
        path: host.into(),
    })?;

    let target = guest_path(guest, container);
    fs::create_dir_all(&target).map_err(|err| RootfsError::Io {
        err,
        path: target.clone(),
    })?;

    tracing::info!(host, guest = %target.display(), "mounting volume");
    mount(
        Some(host),
        &target,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )
    .map_err(|errno| RootfsError::Mount {
        errno,
        target,
    })?;

    Ok(())
}

/// Unmounts the volume bind; failures are logged so teardown of the rest
/// of the workspace still proceeds.
pub fn umount_volume(guest: &str, container: &str) {
    let target = guest_path(guest, container);
    if let Err(errno) = umount2(&target, MntFlags::MNT_DETACH) {
        tracing::warn!(target = %target.display(), "umount volume failed: {}", errno);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_well_formed() {
        assert_eq!(
            parse("/tmp/data:/data"),
            Some(("/tmp/data".to_string(), "/data".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_missing_parts() {
        assert_eq!(parse("onlyonepart"), None);
        assert_eq!(parse(":/data"), None);
        assert_eq!(parse("/tmp/data:"), None);
        assert_eq!(parse(""), None);
        assert_eq!(parse("a:b:c"), None);
    }

    #[test]
    fn test_guest_path_strips_leading_slash() {
        assert_eq!(
            guest_path("/data", "web"),
            PathBuf::from("/root/mnt/web/data")
        );
        assert_eq!(
            guest_path("data", "web"),
            PathBuf::from("/root/mnt/web/data")
        );
    }
}
