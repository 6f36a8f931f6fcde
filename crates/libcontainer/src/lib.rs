//! Container lifecycle primitives: the persisted per-container record, the
//! layered root filesystem, the clone/pipe init protocol and the namespace
//! re-entry used by `exec`.

pub mod container;
pub mod nsenter;
pub mod process;
pub mod rootfs;
