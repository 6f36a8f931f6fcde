use std::str::FromStr;

use anyhow::{bail, Result};
use tracing::Level;
use tracing_subscriber::prelude::*;

const LOG_FORMAT_TEXT: &str = "text";
const LOG_FORMAT_JSON: &str = "json";

enum LogFormat {
    Text,
    Json,
}

/// If in debug mode, default level is debug to get maximum logging
#[cfg(debug_assertions)]
const DEFAULT_LOG_LEVEL: &str = "debug";

/// If not in debug mode, default level is error to get important logs
#[cfg(not(debug_assertions))]
const DEFAULT_LOG_LEVEL: &str = "error";

fn detect_log_format(log_format: Option<&str>) -> Result<LogFormat> {
    match log_format {
        None | Some(LOG_FORMAT_TEXT) => Ok(LogFormat::Text),
        Some(LOG_FORMAT_JSON) => Ok(LogFormat::Json),
        Some(unknown) => bail!("unknown log format: {}", unknown),
    }
}

fn detect_log_level(input: Option<&str>) -> Result<Level> {
    Ok(Level::from_str(input.unwrap_or(DEFAULT_LOG_LEVEL))?)
}

/// Wires tracing up to stderr. Container stdout is captured separately in
/// the per-container log file, so runtime diagnostics never mix with user
/// process output.
pub fn init(log_level: Option<&str>, log_format: Option<&str>) -> Result<()> {
    let level = detect_log_level(log_level)?;
    let filter = tracing_subscriber::filter::LevelFilter::from(level);
    let subscriber = tracing_subscriber::registry().with(filter);

    match detect_log_format(log_format)? {
        LogFormat::Text => subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .without_time()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Json => subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    }
    .map_err(|err| anyhow::anyhow!("failed to init logger: {}", err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_detection() {
        assert_eq!(detect_log_level(Some("info")).unwrap(), Level::INFO);
        assert!(detect_log_level(Some("verbose")).is_err());
    }

    #[test]
    fn test_log_format_detection() {
        assert!(matches!(detect_log_format(None).unwrap(), LogFormat::Text));
        assert!(matches!(
            detect_log_format(Some("json")).unwrap(),
            LogFormat::Json
        ));
        assert!(detect_log_format(Some("xml")).is_err());
    }
}
