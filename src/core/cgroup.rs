//! The cgroup manager contract (§4.5): per-container subsystem directories,
//! resource limits, freeze/thaw, and the `{subsystem: path}` map persisted
//! in `StateStorage::cgroup_paths`. The actual file writes are delegated
//! to `platform::linux::cgroups`.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::core::config::ResourceLimits;
use crate::core::error::Result;

#[derive(Debug, Clone, Default)]
pub struct CgroupManager {
    id: String,
    paths: HashMap<String, PathBuf>,
}

impl CgroupManager {
    pub fn new(id: impl Into<String>) -> CgroupManager {
        CgroupManager {
            id: id.into(),
            paths: HashMap::new(),
        }
    }

    /// Reconstruct a manager from a previously-persisted paths map (used
    /// by `Factory::Load`).
    pub fn from_paths(id: impl Into<String>, paths: HashMap<String, PathBuf>) -> CgroupManager {
        CgroupManager {
            id: id.into(),
            paths,
        }
    }

    pub fn paths(&self) -> &HashMap<String, PathBuf> {
        &self.paths
    }

    /// Create the cgroup(s), apply `resources`, and join `pid`. Records
    /// `{subsystem: path}` for every logical subsystem this backend covers.
    #[cfg(target_os = "linux")]
    pub fn apply(&mut self, pid: u32, resources: &ResourceLimits) -> Result<()> {
        use crate::platform::linux::cgroups;
        let path = cgroups::setup_cgroup(&self.id, resources)?;
        cgroups::add_process(&path, pid)?;
        for subsystem in cgroups::SUBSYSTEMS {
            self.paths.insert(subsystem.to_string(), path.clone());
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn apply(&mut self, _pid: u32, _resources: &ResourceLimits) -> Result<()> {
        Ok(())
    }

    /// Remove every recorded subsystem directory. Idempotent.
    #[cfg(target_os = "linux")]
    pub fn destroy(&self) -> Result<()> {
        crate::platform::linux::cgroups::remove_cgroup(&self.id)
    }

    #[cfg(not(target_os = "linux"))]
    pub fn destroy(&self) -> Result<()> {
        Ok(())
    }

    #[cfg(target_os = "linux")]
    pub fn freeze(&self) -> Result<()> {
        if let Some(path) = self.paths.get("freezer") {
            crate::platform::linux::cgroups::freeze(path)?;
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn freeze(&self) -> Result<()> {
        Ok(())
    }

    #[cfg(target_os = "linux")]
    pub fn thaw(&self) -> Result<()> {
        if let Some(path) = self.paths.get("freezer") {
            crate::platform::linux::cgroups::thaw(path)?;
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn thaw(&self) -> Result<()> {
        Ok(())
    }

    #[cfg(target_os = "linux")]
    pub fn is_frozen(&self) -> Result<bool> {
        match self.paths.get("freezer") {
            Some(path) => crate::platform::linux::cgroups::is_frozen(path),
            None => Ok(false),
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn is_frozen(&self) -> Result<bool> {
        Ok(false)
    }

    /// Every pid currently in the cgroup's pids controller (Signal-all).
    #[cfg(target_os = "linux")]
    pub fn member_pids(&self) -> Result<Vec<u32>> {
        match self.paths.get("pids") {
            Some(path) => crate::platform::linux::cgroups::list_pids(path),
            None => Ok(Vec::new()),
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn member_pids(&self) -> Result<Vec<u32>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_manager_has_no_paths() {
        let mgr = CgroupManager::new("c1");
        assert!(mgr.paths().is_empty());
    }

    #[test]
    fn from_paths_preserves_the_map() {
        let mut paths = HashMap::new();
        paths.insert("memory".to_string(), PathBuf::from("/sys/fs/cgroup/capsule/c1"));
        let mgr = CgroupManager::from_paths("c1", paths.clone());
        assert_eq!(mgr.paths(), &paths);
    }
}
