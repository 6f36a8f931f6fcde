//! The init protocol: the parent clones a child into fresh namespaces with
//! a pipe on fd 3, the child re-execs `/proc/self/exe init` and blocks on
//! that pipe until the parent has finished cgroup and network setup.

pub mod clone;
pub mod init;
pub mod parent;

pub use init::{container_init_process, InitError};
pub use parent::{new_parent_process, ParentProcess, ProcessError};
