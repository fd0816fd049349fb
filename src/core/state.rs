//! Persisted on-disk state: `<root>/containers/<id>/state.json`, written
//! atomically (write to `.tmp`, then rename — DESIGN NOTES §9), plus the
//! pid/start-time fingerprint used to tell a live process from a reused pid
//! (I4), and the directory-layout helpers shared by every component that
//! touches the runtime root.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::config::ContainerConfig;
use crate::core::constant::{CONTAINERS_DIR, EXEC_FIFO, NETWORK_DIR, STATE_FILE};
use crate::core::error::{CapsuleError, ErrorKind, Result};
use crate::core::network::Endpoint;

/// A (pid, start-time) pair identifying a specific process instance,
/// immune to pid reuse (I4). `start_time` is field 22 of `/proc/<pid>/stat`
/// — clock ticks since boot — the same fingerprint field the container's
/// init process is traced by across parent restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessFingerprint {
    pub pid: u32,
    pub start_time: u64,
}

impl ProcessFingerprint {
    /// Capture the fingerprint of a just-spawned process.
    pub fn capture(pid: u32) -> Result<ProcessFingerprint> {
        let start_time = read_start_time(pid).ok_or_else(|| {
            CapsuleError::new(
                ErrorKind::SystemError,
                format!("process {pid} vanished before its fingerprint could be read"),
            )
        })?;
        Ok(ProcessFingerprint { pid, start_time })
    }

    /// Whether the process this fingerprint names is still the same
    /// process (i.e. still alive and with the same start time).
    pub fn is_alive(&self) -> bool {
        read_start_time(self.pid) == Some(self.start_time)
    }
}

/// Check whether `/proc/<pid>` exists at all (used for a quick early-out;
/// does not account for pid reuse on its own).
pub fn pid_alive(pid: u32) -> bool {
    pid != 0 && Path::new(&format!("/proc/{pid}")).exists()
}

/// Read field 22 (`starttime`) of `/proc/<pid>/stat`, clock ticks since boot.
pub fn read_start_time(pid: u32) -> Option<u64> {
    if pid == 0 {
        return None;
    }
    let contents = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // The second field is "(comm)" and may itself contain spaces/parens, so
    // split on the last ')' and then tokenize the remainder by position.
    let after_comm = contents.rsplit_once(')')?.1;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // fields[0] is state (field 3); starttime is field 22, i.e. fields[19].
    fields.get(19)?.parse().ok()
}

/// The full wire format of `state.json` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateStorage {
    pub id: String,
    pub created_time: DateTime<Utc>,
    pub config: ContainerConfig,
    #[serde(default)]
    pub cgroup_paths: HashMap<String, PathBuf>,
    #[serde(default)]
    pub init_process: Option<ProcessFingerprint>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

/// The base state directory: `/var/run/capsule` when root, else
/// `$HOME/.capsule`.
pub fn default_runtime_root() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        if nix::unistd::geteuid().is_root() {
            return Ok(PathBuf::from(crate::core::constant::DEFAULT_RUNTIME_ROOT));
        }
    }
    let home = std::env::var("HOME")
        .map_err(|e| CapsuleError::with_cause(ErrorKind::SystemError, "HOME is not set", e))?;
    Ok(PathBuf::from(home).join(".capsule"))
}

pub fn containers_dir(root: &Path) -> PathBuf {
    root.join(CONTAINERS_DIR)
}

pub fn container_dir(root: &Path, id: &str) -> PathBuf {
    containers_dir(root).join(id)
}

pub fn state_file_path(root: &Path, id: &str) -> PathBuf {
    container_dir(root, id).join(STATE_FILE)
}

pub fn exec_fifo_path(root: &Path, id: &str) -> PathBuf {
    container_dir(root, id).join(EXEC_FIFO)
}

pub fn network_dir(root: &Path, driver: &str) -> PathBuf {
    root.join(NETWORK_DIR).join(driver)
}

/// Atomically write `state.json`: write to a temp file, then rename over
/// the target so a reader never observes a half-written file.
pub fn save_state(root: &Path, state: &StateStorage) -> Result<()> {
    let dir = container_dir(root, &state.id);
    fs::create_dir_all(&dir).map_err(|e| {
        CapsuleError::with_cause(
            ErrorKind::StateWriteError,
            format!("failed to create container directory {}", dir.display()),
            e,
        )
    })?;

    let path = state_file_path(root, &state.id);
    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(state).map_err(|e| {
        CapsuleError::with_cause(ErrorKind::StateWriteError, "failed to serialize state", e)
    })?;
    fs::write(&tmp_path, json).map_err(|e| {
        CapsuleError::with_cause(
            ErrorKind::StateWriteError,
            format!("failed to write {}", tmp_path.display()),
            e,
        )
    })?;
    fs::rename(&tmp_path, &path).map_err(|e| {
        CapsuleError::with_cause(
            ErrorKind::StateWriteError,
            format!(
                "failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            ),
            e,
        )
    })?;
    Ok(())
}

/// Load `state.json` for `id`. `ContainerNotExists` if absent.
pub fn load_state(root: &Path, id: &str) -> Result<StateStorage> {
    let path = state_file_path(root, id);
    let data = fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CapsuleError::new(
                ErrorKind::ContainerNotExists,
                format!("container {id} does not exist"),
            )
        } else {
            CapsuleError::with_cause(
                ErrorKind::StateReadError,
                format!("failed to read {}", path.display()),
                e,
            )
        }
    })?;
    serde_json::from_str(&data).map_err(|e| {
        CapsuleError::with_cause(
            ErrorKind::StateReadError,
            format!("failed to parse {}", path.display()),
            e,
        )
    })
}

/// List every container id with a container directory under `root`.
pub fn list_container_ids(root: &Path) -> Result<Vec<String>> {
    let dir = containers_dir(root);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    let entries = fs::read_dir(&dir).map_err(|e| {
        CapsuleError::with_cause(
            ErrorKind::StateReadError,
            format!("failed to read {}", dir.display()),
            e,
        )
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| {
            CapsuleError::with_cause(
                ErrorKind::StateReadError,
                "failed to read directory entry",
                e,
            )
        })?;
        if let Some(name) = entry.file_name().to_str() {
            ids.push(name.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

/// Resolve a possibly-abbreviated id to the single container it matches.
pub fn resolve_id(root: &Path, prefix: &str) -> Result<String> {
    let all = list_container_ids(root)?;
    let matches: Vec<&String> = all.iter().filter(|id| id.starts_with(prefix)).collect();
    match matches.len() {
        0 => Err(CapsuleError::new(
            ErrorKind::ContainerNotExists,
            format!("no container found with id prefix '{prefix}'"),
        )),
        1 => Ok(matches[0].clone()),
        n => Err(CapsuleError::new(
            ErrorKind::ContainerNotExists,
            format!("ambiguous container id prefix '{prefix}': {n} matches"),
        )),
    }
}

/// Remove a container's entire directory (Destroy's final step).
pub fn remove_container_dir(root: &Path, id: &str) -> Result<()> {
    let dir = container_dir(root, id);
    if dir.exists() {
        fs::remove_dir_all(&dir).map_err(|e| {
            CapsuleError::with_cause(
                ErrorKind::SystemError,
                format!("failed to remove container directory {}", dir.display()),
                e,
            )
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ContainerConfig;

    fn sample_state(id: &str) -> StateStorage {
        StateStorage {
            id: id.to_string(),
            created_time: Utc::now(),
            config: ContainerConfig::example(id),
            cgroup_paths: HashMap::new(),
            init_process: Some(ProcessFingerprint {
                pid: 1234,
                start_time: 99,
            }),
            endpoints: Vec::new(),
        }
    }

    #[test]
    fn save_and_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let state = sample_state("aabbccdd11223344");
        save_state(tmp.path(), &state).unwrap();
        let loaded = load_state(tmp.path(), &state.id).unwrap();
        assert_eq!(loaded.id, state.id);
        assert_eq!(loaded.init_process, state.init_process);
        assert_eq!(loaded.config.process.args, state.config.process.args);
    }

    #[test]
    fn load_missing_is_container_not_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_state(tmp.path(), "nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContainerNotExists);
    }

    #[test]
    fn list_and_resolve_by_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        save_state(tmp.path(), &sample_state("aabbccdd11223344")).unwrap();
        save_state(tmp.path(), &sample_state("aabbccdd55667788")).unwrap();
        save_state(tmp.path(), &sample_state("11223344aabbccdd")).unwrap();

        let all = list_container_ids(tmp.path()).unwrap();
        assert_eq!(all.len(), 3);

        assert_eq!(
            resolve_id(tmp.path(), "11223344aabbccdd").unwrap(),
            "11223344aabbccdd"
        );
        assert_eq!(resolve_id(tmp.path(), "1122").unwrap(), "11223344aabbccdd");
        assert!(resolve_id(tmp.path(), "aabb").is_err());
        assert!(resolve_id(tmp.path(), "ffff").is_err());
    }

    #[test]
    fn remove_container_dir_deletes_tree() {
        let tmp = tempfile::tempdir().unwrap();
        save_state(tmp.path(), &sample_state("deadbeef12345678")).unwrap();
        assert!(container_dir(tmp.path(), "deadbeef12345678").exists());
        remove_container_dir(tmp.path(), "deadbeef12345678").unwrap();
        assert!(!container_dir(tmp.path(), "deadbeef12345678").exists());
    }

    #[test]
    fn fingerprint_of_current_process_is_alive() {
        let pid = std::process::id();
        let fp = ProcessFingerprint::capture(pid).unwrap();
        assert!(fp.is_alive());
    }

    #[test]
    fn fingerprint_of_bogus_pid_is_dead() {
        let fp = ProcessFingerprint {
            pid: 999_999,
            start_time: 1,
        };
        assert!(!fp.is_alive());
    }
}
