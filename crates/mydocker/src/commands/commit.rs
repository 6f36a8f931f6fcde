use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::Args;
use libcontainer::rootfs;

#[derive(Args, Debug)]
pub struct Commit {
    /// Container name
    pub container: String,

    /// Image name to store the container's filesystem under
    pub image: String,
}

/// Packs the container's merged rootfs into `/root/<image>.tar`, write
/// layer included.
pub fn commit(args: Commit) -> Result<()> {
    let mnt = rootfs::mnt_path(&args.container);
    let tar = rootfs::image_tar_path(&args.image);
    tracing::info!(container = %args.container, image = %tar.display(), "committing container");

    let output = Command::new("tar")
        .arg("-czf")
        .arg(&tar)
        .arg("-C")
        .arg(&mnt)
        .arg(".")
        .output()
        .context("failed to run tar")?;

    if !output.status.success() {
        bail!(
            "tar failed for {}: {}",
            args.container,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(())
}
