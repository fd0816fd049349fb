//! Raw cgroup v2 file manipulation (§4.5): creating the per-container
//! directory, writing resource-limit control files, joining a pid, and
//! freezing/thawing. `core::cgroup::CgroupManager` is the OS-independent
//! façade; this module is where the actual file writes happen.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::config::ResourceLimits;
use crate::core::error::{CapsuleError, ErrorKind, Result};

/// The cgroup v2 unified mount point.
const CGROUP_ROOT: &str = "/sys/fs/cgroup";
/// This runtime's sub-hierarchy under the unified mount point.
const CAPSULE_PREFIX: &str = "capsule";

/// Logical subsystem names recorded in `cgroup_paths` (§3). Under cgroup
/// v2's unified hierarchy these all point at the same directory; the map
/// is kept per-subsystem anyway so `core::state::StateStorage` matches the
/// shape spec.md describes and a v1 backend could later populate it with
/// genuinely distinct paths.
pub const SUBSYSTEMS: [&str; 4] = ["memory", "cpu", "pids", "freezer"];

/// Return the cgroup path for a specific container.
pub fn cgroup_path(container_id: &str) -> PathBuf {
    Path::new(CGROUP_ROOT).join(CAPSULE_PREFIX).join(container_id)
}

/// Create the cgroup for the container and apply resource limits.
pub fn setup_cgroup(container_id: &str, resources: &ResourceLimits) -> Result<PathBuf> {
    let path = cgroup_path(container_id);

    let parent = path.parent().unwrap();
    if !parent.exists() {
        fs::create_dir_all(parent).map_err(|e| {
            CapsuleError::with_cause(
                ErrorKind::CgroupError,
                format!(
                    "failed to create parent cgroup dir {}. Is cgroup v2 mounted?",
                    parent.display()
                ),
                e,
            )
        })?;
        enable_controllers(parent)?;
    }

    fs::create_dir_all(&path).map_err(|e| {
        CapsuleError::with_cause(
            ErrorKind::CgroupError,
            format!("failed to create cgroup {}", path.display()),
            e,
        )
    })?;

    if let Some(mem) = resources.memory_bytes {
        write_cgroup_file(&path, "memory.max", &mem.to_string())?;
    }
    if let Some(shares) = resources.cpu_shares {
        // cgroup v2 expresses weight on a 1-10000 scale via cpu.weight
        // rather than v1's cpu.shares; pass the value through unscaled,
        // callers are expected to supply a cpu.weight-range value.
        write_cgroup_file(&path, "cpu.weight", &shares.to_string())?;
    }
    if let Some(cpuset) = &resources.cpuset_cpus {
        let _ = write_cgroup_file(&path, "cpuset.cpus", cpuset);
    }
    if let Some(max_pids) = resources.pids_limit {
        write_cgroup_file(&path, "pids.max", &max_pids.to_string())?;
    }
    for device in &resources.devices {
        let file = if device.allow { "devices.allow" } else { "devices.deny" };
        let _ = write_cgroup_file(&path, file, &device.rule);
    }

    Ok(path)
}

/// Place a process into a cgroup by writing its pid to `cgroup.procs`.
pub fn add_process(cgroup: &Path, pid: u32) -> Result<()> {
    write_cgroup_file(cgroup, "cgroup.procs", &pid.to_string())
}

/// List every pid currently in the cgroup (used by Signal(all)).
pub fn list_pids(cgroup: &Path) -> Result<Vec<u32>> {
    let path = cgroup.join("cgroup.procs");
    let data = fs::read_to_string(&path).map_err(|e| {
        CapsuleError::with_cause(
            ErrorKind::CgroupError,
            format!("failed to read {}", path.display()),
            e,
        )
    })?;
    Ok(data.lines().filter_map(|l| l.trim().parse().ok()).collect())
}

/// Write `FROZEN` to `cgroup.freeze`, suspending every process in the
/// cgroup.
pub fn freeze(cgroup: &Path) -> Result<()> {
    write_cgroup_file(cgroup, "cgroup.freeze", "1")
}

/// Write `THAWED` (0) to `cgroup.freeze`, resuming the cgroup.
pub fn thaw(cgroup: &Path) -> Result<()> {
    write_cgroup_file(cgroup, "cgroup.freeze", "0")
}

/// Whether the cgroup is currently frozen.
pub fn is_frozen(cgroup: &Path) -> Result<bool> {
    let path = cgroup.join("cgroup.freeze");
    if !path.exists() {
        return Ok(false);
    }
    let data = fs::read_to_string(&path).map_err(|e| {
        CapsuleError::with_cause(ErrorKind::CgroupError, format!("failed to read {}", path.display()), e)
    })?;
    Ok(data.trim() == "1")
}

/// Remove the cgroup directory. Idempotent.
pub fn remove_cgroup(container_id: &str) -> Result<()> {
    let path = cgroup_path(container_id);
    if path.exists() {
        fs::remove_dir(&path).map_err(|e| {
            CapsuleError::with_cause(
                ErrorKind::CgroupError,
                format!(
                    "failed to remove cgroup {}. Is the container still running?",
                    path.display()
                ),
                e,
            )
        })?;
    }
    Ok(())
}

/// Enable all available controllers in a parent cgroup so children can use
/// them (write to `cgroup.subtree_control`).
fn enable_controllers(path: &Path) -> Result<()> {
    let controllers_file = path.join("cgroup.controllers");
    if !controllers_file.exists() {
        return Ok(());
    }

    let available = fs::read_to_string(&controllers_file).map_err(|e| {
        CapsuleError::with_cause(
            ErrorKind::CgroupError,
            format!("failed to read {}", controllers_file.display()),
            e,
        )
    })?;

    let enable_str: String = available
        .split_whitespace()
        .map(|c| format!("+{c}"))
        .collect::<Vec<_>>()
        .join(" ");

    if !enable_str.is_empty() {
        let subtree = path.join("cgroup.subtree_control");
        fs::write(&subtree, &enable_str).map_err(|e| {
            CapsuleError::with_cause(
                ErrorKind::CgroupError,
                format!(
                    "failed to enable controllers ({enable_str}) in {}",
                    subtree.display()
                ),
                e,
            )
        })?;
    }

    Ok(())
}

/// Write a value to a cgroup control file.
fn write_cgroup_file(cgroup: &Path, filename: &str, value: &str) -> Result<()> {
    let file = cgroup.join(filename);
    if !cgroup.exists() {
        return Err(CapsuleError::new(
            ErrorKind::CgroupError,
            format!("cgroup directory {} does not exist", cgroup.display()),
        ));
    }
    fs::write(&file, value).map_err(|e| {
        CapsuleError::with_cause(
            ErrorKind::CgroupError,
            format!("failed to write '{value}' to {}", file.display()),
            e,
        )
    })
}
