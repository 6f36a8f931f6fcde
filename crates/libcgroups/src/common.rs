use std::fmt::Display;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum WrappedIoError {
    #[error("failed to open {path}: {err}")]
    Open { err: std::io::Error, path: PathBuf },
    #[error("failed to write {data} to {path}: {err}")]
    Write {
        err: std::io::Error,
        path: PathBuf,
        data: String,
    },
    #[error("failed to read from {path}: {err}")]
    Read { err: std::io::Error, path: PathBuf },
    #[error("failed to create directory {path}: {err}")]
    CreateDir { err: std::io::Error, path: PathBuf },
    #[error("failed to remove directory {path}: {err}")]
    RemoveDir { err: std::io::Error, path: PathBuf },
}

impl WrappedIoError {
    pub fn inner(&self) -> &std::io::Error {
        match self {
            WrappedIoError::Open { err, .. } => err,
            WrappedIoError::Write { err, .. } => err,
            WrappedIoError::Read { err, .. } => err,
            WrappedIoError::CreateDir { err, .. } => err,
            WrappedIoError::RemoveDir { err, .. } => err,
        }
    }
}

/// Writes a value into a cgroup control file. The file must already exist;
/// cgroupfs creates the control files together with the group directory.
pub fn write_cgroup_file<P: AsRef<Path>, T: Display>(
    path: P,
    data: T,
) -> Result<(), WrappedIoError> {
    let path = path.as_ref();
    let data = data.to_string();
    OpenOptions::new()
        .create(false)
        .write(true)
        .open(path)
        .map_err(|err| WrappedIoError::Open {
            err,
            path: path.to_path_buf(),
        })?
        .write_all(data.as_bytes())
        .map_err(|err| WrappedIoError::Write {
            err,
            path: path.to_path_buf(),
            data,
        })?;

    Ok(())
}

pub fn read_cgroup_file<P: AsRef<Path>>(path: P) -> Result<String, WrappedIoError> {
    let path = path.as_ref();
    let mut contents = String::new();
    OpenOptions::new()
        .create(false)
        .read(true)
        .open(path)
        .map_err(|err| WrappedIoError::Open {
            err,
            path: path.to_path_buf(),
        })?
        .read_to_string(&mut contents)
        .map_err(|err| WrappedIoError::Read {
            err,
            path: path.to_path_buf(),
        })?;

    Ok(contents)
}

/// Resource limits accepted by `run`. The raw flag values are written into
/// the v1 tunables verbatim; the kernel itself understands the k/m/g
/// suffixes for memory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Resources {
    /// `memory.limit_in_bytes`, e.g. "100m".
    pub memory_limit: Option<String>,
    /// `cpu.shares`, relative weight.
    pub cpu_shares: Option<String>,
    /// `cpuset.cpus`, e.g. "0-1".
    pub cpuset_cpus: Option<String>,
}

impl Resources {
    pub fn is_empty(&self) -> bool {
        self.memory_limit.is_none() && self.cpu_shares.is_none() && self.cpuset_cpus.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_resources() {
        assert!(Resources::default().is_empty());

        let res = Resources {
            memory_limit: Some("100m".into()),
            ..Default::default()
        };
        assert!(!res.is_empty());
    }

    #[test]
    fn test_write_requires_existing_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let missing = dir.path().join("memory.limit_in_bytes");

        let err = write_cgroup_file(&missing, "100m").unwrap_err();
        assert_eq!(err.inner().kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let file = dir.path().join("cpu.shares");
        std::fs::write(&file, "").unwrap();

        write_cgroup_file(&file, 512).unwrap();
        assert_eq!(read_cgroup_file(&file).unwrap(), "512");
    }
}
