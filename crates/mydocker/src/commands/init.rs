use anyhow::{bail, Context, Result};
use libcontainer::process::container_init_process;

/// The hidden child-side entry. Only the runtime's own re-exec is supposed
/// to land here, recognizable by its argv[0].
pub fn init() -> Result<()> {
    if std::env::args().next().as_deref() != Some("/proc/self/exe") {
        bail!("init is an internal command and cannot be invoked directly");
    }

    tracing::info!("container init process started");
    container_init_process().context("container init failed")
}
