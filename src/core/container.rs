//! The container value and its state machine (§4.2): `Start`, `Status`,
//! `Signal`, `Destroy`, plus the `Pause`/`Resume` pair this crate adds on
//! top of the freezer cgroup. `Destroyed` is not a stored variant — once a
//! container is destroyed there is no `Container` left to hold it, so
//! absence (a failed `Factory::load`) is the terminal state.
//!
//! Per-state behavior is dispatched by matching on `self.status` rather
//! than through a polymorphic "status behavior" object with a back
//! reference to its container (DESIGN NOTES §9): each arm calls a free
//! function in the private `transition` module below.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::cgroup::CgroupManager;
use crate::core::config::ContainerConfig;
use crate::core::error::{CapsuleError, ErrorKind, Result};
use crate::core::network::{Endpoint, Registry};
use crate::core::state::{self, ProcessFingerprint, StateStorage};

/// The three persisted states plus `Paused`. `Destroyed` is absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Stopped,
    Created,
    Running,
    Paused,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Stopped => "stopped",
            Status::Created => "created",
            Status::Running => "running",
            Status::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

/// The per-container value a `Factory` hands back. In-memory only: the
/// `parent_process` fds of spec.md §3 are never held across calls — each
/// operation re-derives liveness from `/proc` and the fingerprint.
pub struct Container {
    pub id: String,
    pub created_time: DateTime<Utc>,
    pub runtime_root: PathBuf,
    pub container_root: PathBuf,
    pub config: ContainerConfig,
    pub cgroup: CgroupManager,
    pub endpoints: Vec<Endpoint>,
    pub init_process: Option<ProcessFingerprint>,
    pub status: Status,
}

impl Container {
    /// A brand-new, never-started container (§4.1 Factory::Create).
    pub fn new_stopped(runtime_root: &Path, config: ContainerConfig) -> Container {
        let container_root = state::container_dir(runtime_root, &config.id);
        Container {
            id: config.id.clone(),
            created_time: Utc::now(),
            runtime_root: runtime_root.to_path_buf(),
            container_root,
            cgroup: CgroupManager::new(&config.id),
            config,
            endpoints: Vec::new(),
            init_process: None,
            status: Status::Stopped,
        }
    }

    /// Reconstruct from persisted state (§4.1 Factory::Load), recomputing
    /// `status` from `/proc` rather than trusting the stored tag (I3).
    pub fn from_state(runtime_root: &Path, storage: StateStorage) -> Container {
        let container_root = state::container_dir(runtime_root, &storage.id);
        let mut status = detect_status(runtime_root, &storage.id, storage.init_process);
        let cgroup = CgroupManager::from_paths(&storage.id, storage.cgroup_paths);
        // detect_status only distinguishes Stopped/Created/Running; Paused
        // is real kernel state the freezer cgroup still remembers even
        // across a parent restart, so recover it here.
        if status == Status::Running && cgroup.is_frozen().unwrap_or(false) {
            status = Status::Paused;
        }
        Container {
            id: storage.id.clone(),
            created_time: storage.created_time,
            runtime_root: runtime_root.to_path_buf(),
            container_root,
            cgroup,
            config: storage.config,
            endpoints: storage.endpoints,
            init_process: storage.init_process,
            status,
        }
    }

    pub fn to_state_storage(&self) -> StateStorage {
        StateStorage {
            id: self.id.clone(),
            created_time: self.created_time,
            config: self.config.clone(),
            cgroup_paths: self.cgroup.paths().clone(),
            init_process: self.init_process,
            endpoints: self.endpoints.clone(),
        }
    }

    fn persist(&self) -> Result<()> {
        state::save_state(&self.runtime_root, &self.to_state_storage())
    }

    /// **Start**. `also_run` mirrors the `run` command: from `Stopped`,
    /// continue straight through `Created` into `Running` in one call.
    pub fn start(&mut self, registry: &Registry, also_run: bool) -> Result<()> {
        match self.status {
            Status::Stopped => {
                transition::start_from_stopped(self, registry)?;
                if also_run {
                    transition::start_from_created(self)?;
                }
                Ok(())
            }
            Status::Created => transition::start_from_created(self),
            Status::Running | Status::Paused => Err(CapsuleError::new(
                ErrorKind::ContainerNotStopped,
                format!("container {} is already running", self.id),
            )),
        }
    }

    /// **Status**: re-verify the fingerprint if the in-memory tag claims
    /// the process is alive, downgrading to `Stopped` on mismatch.
    pub fn refresh_status(&mut self) -> Result<Status> {
        if matches!(self.status, Status::Running | Status::Paused) {
            let alive = self.init_process.map(|fp| fp.is_alive()).unwrap_or(false);
            if !alive {
                self.status = Status::Stopped;
                self.persist()?;
            }
        }
        Ok(self.status)
    }

    /// **Signal(sig, all)**.
    pub fn signal(&mut self, sig: nix::sys::signal::Signal, all: bool) -> Result<()> {
        match self.status {
            Status::Running => transition::signal_running(self, sig, all),
            Status::Paused => Err(CapsuleError::new(
                ErrorKind::ContainerPaused,
                format!("container {} is paused", self.id),
            )),
            Status::Stopped | Status::Created => Err(CapsuleError::new(
                ErrorKind::ContainerNotRunning,
                format!("container {} is not running", self.id),
            )),
        }
    }

    /// **Pause** (ADDED, §9 open question): freeze the cgroup.
    pub fn pause(&mut self) -> Result<()> {
        if self.status != Status::Running {
            return Err(CapsuleError::new(
                ErrorKind::ContainerNotRunning,
                format!("container {} is not running", self.id),
            ));
        }
        self.cgroup.freeze()?;
        self.status = Status::Paused;
        self.persist()
    }

    /// **Resume** (ADDED): thaw the cgroup.
    pub fn resume(&mut self) -> Result<()> {
        if self.status != Status::Paused {
            return Err(CapsuleError::new(
                ErrorKind::ContainerNotPaused,
                format!("container {} is not paused", self.id),
            ));
        }
        self.cgroup.thaw()?;
        self.status = Status::Running;
        self.persist()
    }

    /// **Destroy**: kill if still alive, deconfigure cgroups, disconnect
    /// endpoints, remove `container_root`. Consumes `self` — a destroyed
    /// container has nothing left to hold (Destroyed is absence, not a
    /// variant).
    pub fn destroy(mut self, registry: &Registry) -> Result<()> {
        transition::destroy(&mut self, registry)
    }
}

/// **detect_status** (§4.2, called from `Factory::Load`).
pub fn detect_status(
    runtime_root: &Path,
    id: &str,
    fingerprint: Option<ProcessFingerprint>,
) -> Status {
    let alive = fingerprint.map(|fp| fp.is_alive()).unwrap_or(false);
    if !alive {
        return Status::Stopped;
    }
    if state::exec_fifo_path(runtime_root, id).exists() {
        return Status::Created;
    }
    Status::Running
}

/// Per-state transition bodies — kept as free functions so the dispatch in
/// `Container`'s methods stays a flat match with no inheritance.
mod transition {
    use super::*;
    use crate::core::error::ErrContext;
    use std::time::{Duration, Instant};

    #[cfg(target_os = "linux")]
    pub fn start_from_stopped(container: &mut Container, registry: &Registry) -> Result<()> {
        let outcome = crate::platform::linux::process::spawn_container(
            &container.config,
            &container.container_root,
            &mut container.cgroup,
            registry,
        )?;
        container.init_process = Some(outcome.init_process);
        container.endpoints = outcome.endpoints;
        container.status = Status::Created;

        // The init process should have actually entered a fresh instance of
        // every requested namespace kind, not silently stayed in the host's.
        // A namespace that reports identical to ours here means `unshare`
        // didn't do what it was asked, worth a loud warning rather than a
        // silent Created state.
        let pid = outcome.init_process.pid;
        for kind in &container.config.namespaces {
            match crate::platform::linux::namespaces::differs_from_self(pid, *kind) {
                Ok(true) => {}
                Ok(false) => log::warn!(
                    "container {}: init process pid {pid} shares its {:?} namespace with the host",
                    container.id,
                    kind
                ),
                Err(e) => log::debug!(
                    "container {}: could not verify {:?} namespace isolation: {e}",
                    container.id,
                    kind
                ),
            }
        }

        container.persist()
    }

    #[cfg(not(target_os = "linux"))]
    pub fn start_from_stopped(_container: &mut Container, _registry: &Registry) -> Result<()> {
        Err(CapsuleError::new(
            ErrorKind::SystemError,
            "container bootstrap is only implemented on Linux",
        ))
    }

    #[cfg(target_os = "linux")]
    pub fn start_from_created(container: &mut Container) -> Result<()> {
        use std::fs::OpenOptions;
        use std::io::Read;

        let fifo = crate::core::state::exec_fifo_path(&container.runtime_root, &container.id);
        let mut reader = OpenOptions::new()
            .read(true)
            .open(&fifo)
            .err_kind(ErrorKind::PipeError, format!("failed to open {}", fifo.display()))?;
        let mut byte = [0u8; 1];
        let _ = reader.read(&mut byte);
        drop(reader);

        container.status = Status::Running;
        container.persist()
    }

    #[cfg(not(target_os = "linux"))]
    pub fn start_from_created(container: &mut Container) -> Result<()> {
        container.status = Status::Running;
        container.persist()
    }

    #[cfg(target_os = "linux")]
    pub fn signal_running(
        container: &mut Container,
        sig: nix::sys::signal::Signal,
        all: bool,
    ) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pids = if all {
            container.cgroup.member_pids()?
        } else {
            container
                .init_process
                .map(|fp| vec![fp.pid])
                .unwrap_or_default()
        };

        for pid in &pids {
            let _ = kill(Pid::from_raw(*pid as i32), sig);
        }

        // A plain SIGTERM gets a grace period to let the container exit on
        // its own before being escalated to SIGKILL.
        if sig == Signal::SIGTERM {
            let timeout = Duration::from_secs(crate::core::constant::DEFAULT_SIGTERM_TIMEOUT_SECS);
            if !wait_for_death(&pids, timeout) {
                log::warn!(
                    "container {}: SIGTERM timed out after {}s, escalating to SIGKILL",
                    container.id,
                    timeout.as_secs()
                );
                for pid in &pids {
                    let _ = kill(Pid::from_raw(*pid as i32), Signal::SIGKILL);
                }
                wait_for_death(&pids, Duration::from_secs(5));
            }
        }

        container.refresh_status()?;
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn signal_running(
        _container: &mut Container,
        _sig: nix::sys::signal::Signal,
        _all: bool,
    ) -> Result<()> {
        Err(CapsuleError::new(
            ErrorKind::NoProcessOps,
            "signal delivery is only implemented on Linux",
        ))
    }

    #[cfg(target_os = "linux")]
    pub fn destroy(container: &mut Container, registry: &Registry) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if matches!(container.status, Status::Running | Status::Created | Status::Paused) {
            if container.status == Status::Paused {
                let _ = container.cgroup.thaw();
            }
            let pids = container.cgroup.member_pids().unwrap_or_default();
            let targets: Vec<u32> = if pids.is_empty() {
                container.init_process.map(|fp| vec![fp.pid]).unwrap_or_default()
            } else {
                pids
            };
            for pid in &targets {
                let _ = kill(Pid::from_raw(*pid as i32), Signal::SIGKILL);
            }
            wait_for_death(&targets, Duration::from_secs(5));
        }

        for endpoint in container.endpoints.iter().rev() {
            let _ = registry.disconnect(endpoint);
        }

        let _ = container.cgroup.destroy();
        state::remove_container_dir(&container.runtime_root, &container.id)
    }

    #[cfg(not(target_os = "linux"))]
    pub fn destroy(container: &mut Container, registry: &Registry) -> Result<()> {
        for endpoint in container.endpoints.iter().rev() {
            let _ = registry.disconnect(endpoint);
        }
        state::remove_container_dir(&container.runtime_root, &container.id)
    }

    #[cfg(target_os = "linux")]
    /// Polls until every pid has exited or `timeout` elapses. Returns
    /// `true` if all pids were confirmed dead before the deadline.
    fn wait_for_death(pids: &[u32], timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let any_alive = pids.iter().any(|pid| state::pid_alive(*pid));
            if !any_alive {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ContainerConfig;

    #[test]
    fn new_stopped_container_has_stopped_status_and_empty_cgroup() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = ContainerConfig::example("c1");
        let container = Container::new_stopped(tmp.path(), cfg);
        assert_eq!(container.status, Status::Stopped);
        assert!(container.cgroup.paths().is_empty());
        assert!(container.init_process.is_none());
    }

    #[test]
    fn detect_status_with_no_fingerprint_is_stopped() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(detect_status(tmp.path(), "c1", None), Status::Stopped);
    }

    #[test]
    fn detect_status_with_dead_pid_is_stopped() {
        let tmp = tempfile::tempdir().unwrap();
        let fp = ProcessFingerprint {
            pid: 999_999,
            start_time: 1,
        };
        assert_eq!(detect_status(tmp.path(), "c1", Some(fp)), Status::Stopped);
    }

    #[test]
    fn detect_status_with_live_pid_and_fifo_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let id = "c1";
        std::fs::create_dir_all(state::container_dir(tmp.path(), id)).unwrap();
        std::fs::write(state::exec_fifo_path(tmp.path(), id), b"").unwrap();
        let fp = ProcessFingerprint::capture(std::process::id()).unwrap();
        assert_eq!(detect_status(tmp.path(), id, Some(fp)), Status::Created);
    }

    #[test]
    fn detect_status_with_live_pid_and_no_fifo_is_running() {
        let tmp = tempfile::tempdir().unwrap();
        let fp = ProcessFingerprint::capture(std::process::id()).unwrap();
        assert_eq!(detect_status(tmp.path(), "c1", Some(fp)), Status::Running);
    }

    #[test]
    fn start_on_running_container_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = ContainerConfig::example("c1");
        let mut container = Container::new_stopped(tmp.path(), cfg);
        container.status = Status::Running;
        let registry = Registry::new(tmp.path()).unwrap();
        let err = container.start(&registry, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContainerNotStopped);
    }

    #[test]
    fn signal_on_stopped_container_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = ContainerConfig::example("c1");
        let mut container = Container::new_stopped(tmp.path(), cfg);
        let err = container
            .signal(nix::sys::signal::Signal::SIGTERM, false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContainerNotRunning);
    }

    #[test]
    fn signal_on_paused_container_reports_paused() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = ContainerConfig::example("c1");
        let mut container = Container::new_stopped(tmp.path(), cfg);
        container.status = Status::Paused;
        let err = container
            .signal(nix::sys::signal::Signal::SIGTERM, false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContainerPaused);
    }

    #[test]
    fn pause_requires_running() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = ContainerConfig::example("c1");
        let mut container = Container::new_stopped(tmp.path(), cfg);
        let err = container.pause().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContainerNotRunning);
    }

    #[test]
    fn resume_requires_paused() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = ContainerConfig::example("c1");
        let mut container = Container::new_stopped(tmp.path(), cfg);
        let err = container.resume().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContainerNotPaused);
    }
}
