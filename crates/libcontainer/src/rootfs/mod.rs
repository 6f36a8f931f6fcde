//! The layered per-container root: a read-only image layer, a writable
//! overlay upper layer and the merged mount the init process pivots into,
//! plus optional bind-mounted volumes.

pub mod volume;

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::fcntl::{Flock, FlockArg};
use nix::mount::{mount, umount2, MntFlags, MsFlags};

use crate::container::{IMAGE_ROOT, MNT_ROOT, WORK_LAYER_ROOT, WRITE_LAYER_ROOT};

#[derive(Debug, thiserror::Error)]
pub enum RootfsError {
    #[error("io error on {path}: {err}")]
    Io { err: std::io::Error, path: PathBuf },
    #[error("failed to lock {path}: {errno}")]
    Lock { errno: nix::Error, path: PathBuf },
    #[error("failed to extract image {image}: {detail}")]
    Extract { image: String, detail: String },
    #[error("failed to mount {target}: {errno}")]
    Mount { errno: nix::Error, target: PathBuf },
}

pub fn image_layer_path(image: &str) -> PathBuf {
    Path::new(IMAGE_ROOT).join(image)
}

pub fn image_tar_path(image: &str) -> PathBuf {
    Path::new(IMAGE_ROOT).join(format!("{image}.tar"))
}

pub fn write_layer_path(container: &str) -> PathBuf {
    Path::new(WRITE_LAYER_ROOT).join(container)
}

pub fn work_layer_path(container: &str) -> PathBuf {
    Path::new(WORK_LAYER_ROOT).join(container)
}

pub fn mnt_path(container: &str) -> PathBuf {
    Path::new(MNT_ROOT).join(container)
}

/// Assembles the container's root: extracts the image if needed, creates
/// the write and work layers, mounts the merged overlay view and binds the
/// optional `host:guest` volume into it.
pub fn new_workspace(volume: Option<&str>, image: &str, container: &str) -> Result<(), RootfsError> {
    create_read_only_layer(image)?;
    create_write_layer(container)?;
    create_mount_point(container, image)?;

    if let Some(volume) = volume {
        match volume::parse(volume) {
            Some((host, guest)) => volume::mount_volume(&host, &guest, container)?,
            // A malformed -v flag is not fatal; the container starts
            // without the volume.
            None => tracing::warn!(volume, "volume parameter is malformed, skipping"),
        }
    }

    Ok(())
}

/// Unwinds `new_workspace`: unmounts the volume and the merged root,
/// removes the mount point and both per-container layers. The extracted
/// image layer is kept for reuse.
pub fn delete_workspace(volume: Option<&str>, container: &str) {
    if let Some((_, guest)) = volume.and_then(volume::parse) {
        volume::umount_volume(&guest, container);
    }

    delete_mount_point(container);
    remove_dir_logged(&write_layer_path(container));
    remove_dir_logged(&work_layer_path(container));
}

/// Extracts `/root/<image>.tar` into `/root/<image>/` once. Extraction is
/// serialized across invocations with a lock file next to the tarball.
fn create_read_only_layer(image: &str) -> Result<(), RootfsError> {
    let layer = image_layer_path(image);
    if layer.exists() {
        return Ok(());
    }

    let tar = image_tar_path(image);
    let lock_path = Path::new(IMAGE_ROOT).join(format!("{image}.tar.lock"));
    let lock_file = File::create(&lock_path).map_err(|err| RootfsError::Io {
        err,
        path: lock_path.clone(),
    })?;
    let _lock = Flock::lock(lock_file, FlockArg::LockExclusive).map_err(|(_, errno)| {
        RootfsError::Lock {
            errno,
            path: lock_path,
        }
    })?;

    // Another invocation may have extracted while we waited on the lock.
    if layer.exists() {
        return Ok(());
    }

    fs::create_dir_all(&layer).map_err(|err| RootfsError::Io {
        err,
        path: layer.clone(),
    })?;

    tracing::info!(image, tar = %tar.display(), "extracting image layer");
    let output = Command::new("tar")
        .arg("-xvf")
        .arg(&tar)
        .arg("-C")
        .arg(&layer)
        .output()
        .map_err(|err| RootfsError::Io { err, path: tar })?;

    if !output.status.success() {
        return Err(RootfsError::Extract {
            image: image.to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(())
}

fn create_write_layer(container: &str) -> Result<(), RootfsError> {
    for path in [write_layer_path(container), work_layer_path(container)] {
        create_dir_world_writable(&path)?;
    }

    Ok(())
}

/// The layer directories are mode 0777 so unprivileged processes inside
/// the container can write through the overlay.
fn create_dir_world_writable(path: &Path) -> Result<(), RootfsError> {
    use std::os::unix::fs::PermissionsExt;

    fs::create_dir_all(path).map_err(|err| RootfsError::Io {
        err,
        path: path.to_path_buf(),
    })?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o777)).map_err(|err| {
        RootfsError::Io {
            err,
            path: path.to_path_buf(),
        }
    })?;

    Ok(())
}

/// Union-mounts the write layer over the image layer at the container's
/// mount point. Writes land in the upper layer; the image layer is never
/// modified.
fn create_mount_point(container: &str, image: &str) -> Result<(), RootfsError> {
    let mnt = mnt_path(container);
    create_dir_world_writable(&mnt)?;

    let data = format!(
        "lowerdir={},upperdir={},workdir={}",
        image_layer_path(image).display(),
        write_layer_path(container).display(),
        work_layer_path(container).display(),
    );

    mount(
        Some("overlay"),
        &mnt,
        Some("overlay"),
        MsFlags::empty(),
        Some(data.as_str()),
    )
    .map_err(|errno| RootfsError::Mount { errno, target: mnt })?;

    Ok(())
}

fn delete_mount_point(container: &str) {
    let mnt = mnt_path(container);
    if let Err(errno) = umount2(&mnt, MntFlags::MNT_DETACH) {
        tracing::warn!(mnt = %mnt.display(), "umount failed: {}", errno);
    }
    remove_dir_logged(&mnt);
}

fn remove_dir_logged(path: &Path) {
    if let Err(err) = fs::remove_dir_all(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), "remove failed: {}", err);
        }
    }
}
