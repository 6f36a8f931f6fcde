use std::path::Path;

use anyhow::Result;
use libcontainer::container::{ContainerRecord, DEFAULT_INFO_ROOT};

pub fn ps() -> Result<()> {
    let records = ContainerRecord::load_all(Path::new(DEFAULT_INFO_ROOT))?;

    println!(
        "{:<12} {:<14} {:<8} {:<10} {:<24} {:<20} {}",
        "ID", "NAME", "PID", "STATUS", "COMMAND", "CREATED", "VOLUME"
    );
    for record in &records {
        println!(
            "{:<12} {:<14} {:<8} {:<10} {:<24} {:<20} {}",
            record.id,
            record.name,
            record.pid,
            record.status.to_string(),
            record.command,
            record.created_at,
            record.volume,
        );
    }

    Ok(())
}
