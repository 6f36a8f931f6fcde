use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use libcontainer::container::{ContainerRecord, DEFAULT_INFO_ROOT};

#[derive(Args, Debug)]
pub struct Logs {
    /// Container name
    pub container: String,
}

pub fn logs(args: Logs) -> Result<()> {
    let path = ContainerRecord::log_path(Path::new(DEFAULT_INFO_ROOT), &args.container);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("no log for container {}", args.container))?;

    print!("{content}");
    io::stdout().flush()?;

    Ok(())
}
