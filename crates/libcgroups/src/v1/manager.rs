use std::path::PathBuf;

use nix::unistd::Pid;

use super::controller::{Subsystem, V1ControllerError};
use super::cpu::Cpu;
use super::cpuset::CpuSet;
use super::memory::Memory;
use crate::common::Resources;

/// Fans resource configuration out across the registered v1 subsystem
/// drivers under a single relative cgroup path. The manager owns that path
/// for its lifetime.
pub struct CgroupManager {
    cgroup_path: PathBuf,
    subsystems: Vec<Box<dyn Subsystem>>,
}

impl CgroupManager {
    pub fn new<P: Into<PathBuf>>(cgroup_path: P) -> Self {
        Self {
            cgroup_path: cgroup_path.into(),
            subsystems: vec![Box::new(Memory {}), Box::new(Cpu {}), Box::new(CpuSet {})],
        }
    }

    /// Writes the limits into every subsystem.
    pub fn set(&self, res: &Resources) -> Result<(), V1ControllerError> {
        for subsystem in &self.subsystems {
            subsystem.set(&self.cgroup_path, res)?;
        }

        Ok(())
    }

    /// Moves `pid` into the cgroup of every subsystem.
    pub fn apply(&self, pid: Pid) -> Result<(), V1ControllerError> {
        for subsystem in &self.subsystems {
            subsystem.apply(&self.cgroup_path, pid)?;
        }

        Ok(())
    }

    /// Removes the cgroup from every subsystem. Failures are logged so the
    /// remaining subsystems still get a teardown attempt.
    pub fn destroy(&self) {
        for subsystem in &self.subsystems {
            if let Err(err) = subsystem.remove(&self.cgroup_path) {
                tracing::warn!(subsystem = subsystem.name(), "remove cgroup failed: {}", err);
            }
        }
    }

    #[cfg(test)]
    fn with_subsystems(cgroup_path: &str, subsystems: Vec<Box<dyn Subsystem>>) -> Self {
        Self {
            cgroup_path: cgroup_path.into(),
            subsystems,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use super::*;

    struct RecordingSubsystem {
        name: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
        fail_remove: bool,
    }

    impl Subsystem for RecordingSubsystem {
        fn name(&self) -> &'static str {
            self.name
        }

        fn set(&self, cgroup_path: &Path, _res: &Resources) -> Result<(), V1ControllerError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:set:{}", self.name, cgroup_path.display()));
            Ok(())
        }

        fn apply(&self, cgroup_path: &Path, pid: Pid) -> Result<(), V1ControllerError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:apply:{}:{}", self.name, cgroup_path.display(), pid));
            Ok(())
        }

        fn remove(&self, cgroup_path: &Path) -> Result<(), V1ControllerError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:remove:{}", self.name, cgroup_path.display()));
            if self.fail_remove {
                return Err(V1ControllerError::NotFound {
                    path: cgroup_path.to_path_buf(),
                });
            }
            Ok(())
        }
    }

    fn recording_manager(
        fail_first_remove: bool,
    ) -> (CgroupManager, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let manager = CgroupManager::with_subsystems(
            "mydocker-cgroup",
            vec![
                Box::new(RecordingSubsystem {
                    name: "memory",
                    calls: calls.clone(),
                    fail_remove: fail_first_remove,
                }),
                Box::new(RecordingSubsystem {
                    name: "cpu",
                    calls: calls.clone(),
                    fail_remove: false,
                }),
            ],
        );
        (manager, calls)
    }

    #[test]
    fn test_set_and_apply_visit_every_subsystem() {
        let (manager, calls) = recording_manager(false);

        manager.set(&Resources::default()).unwrap();
        manager.apply(Pid::from_raw(42)).unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                "memory:set:mydocker-cgroup",
                "cpu:set:mydocker-cgroup",
                "memory:apply:mydocker-cgroup:42",
                "cpu:apply:mydocker-cgroup:42",
            ]
        );
    }

    #[test]
    fn test_destroy_continues_past_failures() {
        let (manager, calls) = recording_manager(true);

        manager.destroy();

        let calls = calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec!["memory:remove:mydocker-cgroup", "cpu:remove:mydocker-cgroup"]
        );
    }
}
