use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Local;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{CONFIG_NAME, LOG_NAME};

const ID_LEN: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("container {name} does not exist")]
    NotFound { name: String },
    #[error("failed to serialize container record: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error on {path}: {err}")]
    Io { err: std::io::Error, path: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Exited,
}

impl Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Running => f.write_str("running"),
            ContainerStatus::Stopped => f.write_str("stopped"),
            ContainerStatus::Exited => f.write_str("exited"),
        }
    }
}

/// The persisted view of a container, written to
/// `<info-root>/<name>/config.json`. Unknown fields in older or newer
/// records are ignored on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    /// Host pid of the init process as a decimal string; empty once the
    /// container is stopped.
    pub pid: String,
    pub command: String,
    pub created_at: String,
    pub status: ContainerStatus,
    #[serde(default)]
    pub volume: String,
    #[serde(default)]
    pub port_mapping: Vec<String>,
}

impl ContainerRecord {
    pub fn new(
        id: &str,
        name: &str,
        pid: i32,
        command: &str,
        volume: &str,
        port_mapping: &[String],
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            pid: pid.to_string(),
            command: command.to_string(),
            created_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            status: ContainerStatus::Running,
            volume: volume.to_string(),
            port_mapping: port_mapping.to_vec(),
        }
    }

    pub fn dir(info_root: &Path, name: &str) -> PathBuf {
        info_root.join(name)
    }

    pub fn config_path(info_root: &Path, name: &str) -> PathBuf {
        Self::dir(info_root, name).join(CONFIG_NAME)
    }

    pub fn log_path(info_root: &Path, name: &str) -> PathBuf {
        Self::dir(info_root, name).join(LOG_NAME)
    }

    pub fn save(&self, info_root: &Path) -> Result<(), StateError> {
        let dir = Self::dir(info_root, &self.name);
        fs::create_dir_all(&dir).map_err(|err| StateError::Io {
            err,
            path: dir.clone(),
        })?;

        let path = dir.join(CONFIG_NAME);
        let json = serde_json::to_string(self)?;
        fs::write(&path, json).map_err(|err| StateError::Io { err, path })?;

        Ok(())
    }

    pub fn load(info_root: &Path, name: &str) -> Result<Self, StateError> {
        let path = Self::config_path(info_root, name);
        let content = fs::read_to_string(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                StateError::NotFound {
                    name: name.to_string(),
                }
            } else {
                StateError::Io { err, path }
            }
        })?;

        Ok(serde_json::from_str(&content)?)
    }

    /// Walks the info root and loads every record found. Unreadable entries
    /// are logged and skipped so one corrupt record does not hide the rest.
    pub fn load_all(info_root: &Path) -> Result<Vec<Self>, StateError> {
        let entries = match fs::read_dir(info_root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => {
                return Err(StateError::Io {
                    err,
                    path: info_root.to_path_buf(),
                })
            }
        };

        let mut records = vec![];
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !entry.path().join(CONFIG_NAME).exists() {
                continue;
            }
            match Self::load(info_root, &name) {
                Ok(record) => records.push(record),
                Err(err) => tracing::warn!(container = %name, "skipping record: {}", err),
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(records)
    }

    /// Removes the container's state directory, record and log included.
    pub fn delete(info_root: &Path, name: &str) -> Result<(), StateError> {
        let dir = Self::dir(info_root, name);
        fs::remove_dir_all(&dir).map_err(|err| StateError::Io { err, path: dir })?;

        Ok(())
    }
}

/// Generates a container id: ten decimal digits from a time-seeded RNG.
pub fn random_id() -> String {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let mut rng = StdRng::seed_from_u64(seed);

    (0..ID_LEN)
        .map(|_| char::from(b'0' + rng.gen_range(0..10)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ContainerRecord {
        ContainerRecord::new(
            "1234567890",
            "web",
            4711,
            "sh -c top",
            "/tmp/data:/data",
            &["8080:80".to_string()],
        )
    }

    #[test]
    fn test_record_json_round_trip() {
        let record = sample_record();
        let json = serde_json::to_string(&record).unwrap();
        let decoded: ContainerRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let json = r#"{
            "id": "1234567890",
            "name": "web",
            "pid": "",
            "command": "sh",
            "created_at": "2024-01-01 00:00:00",
            "status": "stopped",
            "volume": "",
            "port_mapping": [],
            "some_future_field": {"nested": true}
        }"#;
        let record: ContainerRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status, ContainerStatus::Stopped);
        assert!(record.pid.is_empty());
    }

    #[test]
    fn test_save_load_delete() {
        let root = tempfile::tempdir().unwrap();
        let record = sample_record();

        record.save(root.path()).unwrap();
        let loaded = ContainerRecord::load(root.path(), "web").unwrap();
        assert_eq!(record, loaded);

        ContainerRecord::delete(root.path(), "web").unwrap();
        assert!(matches!(
            ContainerRecord::load(root.path(), "web"),
            Err(StateError::NotFound { .. })
        ));
    }

    #[test]
    fn test_load_all_skips_foreign_directories() {
        let root = tempfile::tempdir().unwrap();
        sample_record().save(root.path()).unwrap();
        std::fs::create_dir(root.path().join("network")).unwrap();

        let records = ContainerRecord::load_all(root.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "web");
    }

    #[test]
    fn test_load_all_on_missing_root() {
        let records = ContainerRecord::load_all(Path::new("/nonexistent/mydocker")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_random_id_shape() {
        let id = random_id();
        assert_eq!(id.len(), 10);
        assert!(id.chars().all(|c| c.is_ascii_digit()));
    }
}
