//! On-disk container state. One directory per container under the info
//! root holds the JSON record and, for detached containers, the captured
//! log file.

mod record;

pub use record::{random_id, ContainerRecord, ContainerStatus, StateError};

/// Per-container state directories live here, one per container name.
pub const DEFAULT_INFO_ROOT: &str = "/var/run/mydocker";
/// Record file inside the container's state directory.
pub const CONFIG_NAME: &str = "config.json";
/// Captured stdout of detached containers.
pub const LOG_NAME: &str = "container.log";

/// Image tarballs (`<name>.tar`) and extracted image layers (`<name>/`).
pub const IMAGE_ROOT: &str = "/root";
/// Per-container writable overlay layers.
pub const WRITE_LAYER_ROOT: &str = "/root/writeLayer";
/// Per-container overlayfs work directories.
pub const WORK_LAYER_ROOT: &str = "/root/work";
/// Per-container merged mount points, used as the pivoted root.
pub const MNT_ROOT: &str = "/root/mnt";
