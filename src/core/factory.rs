//! The factory (§4.1): owns the runtime root, creates and loads
//! containers, and carries the process-wide network driver registry each
//! `Container::start`/`destroy` call needs.

use std::path::{Path, PathBuf};

use crate::core::config::ContainerConfig;
use crate::core::container::Container;
use crate::core::error::{CapsuleError, ErrorKind, Result};
use crate::core::network::Registry;
use crate::core::state;

pub struct Factory {
    pub runtime_root: PathBuf,
    pub network: Registry,
}

impl Factory {
    /// **NewFactory(runtime_root, init)**. If `init` and `runtime_root` is
    /// absent, create it 0700; otherwise require it to exist. Initializes
    /// the (idempotent) network registry.
    pub fn new(runtime_root: impl Into<PathBuf>, init: bool) -> Result<Factory> {
        let runtime_root = runtime_root.into();
        if !runtime_root.exists() {
            if init {
                create_root_dir(&runtime_root)?;
            } else {
                return Err(CapsuleError::new(
                    ErrorKind::FactoryInitError,
                    format!("runtime root {} does not exist", runtime_root.display()),
                ));
            }
        }
        let network = Registry::new(&runtime_root)
            .map_err(|e| CapsuleError::wrap(e, "failed to initialize network registry"))?;
        Ok(Factory {
            runtime_root,
            network,
        })
    }

    /// Convenience constructor using the default runtime root (euid-aware,
    /// per `core::state::default_runtime_root`), creating it if absent.
    pub fn with_default_root() -> Result<Factory> {
        let root = state::default_runtime_root()?;
        Factory::new(root, true)
    }

    /// **Create(id, config) → Container**. Fails with `IdInUse` if the
    /// container directory already exists. Does not fork anything or
    /// persist state — state is written only at the first transition out
    /// of `Stopped` (§4.1).
    pub fn create(&self, config: ContainerConfig) -> Result<Container> {
        config.validate()?;
        let dir = state::container_dir(&self.runtime_root, &config.id);
        if dir.exists() {
            return Err(CapsuleError::new(
                ErrorKind::IdInUse,
                format!("container id '{}' is already in use", config.id),
            ));
        }
        create_root_dir(&dir)?;
        Ok(Container::new_stopped(&self.runtime_root, config))
    }

    /// **Load(id) → Container**. Reads `state.json`, reconstructs the
    /// container, and re-validates each endpoint's network still exists in
    /// its driver's registry (I5) — a stale network is logged, not fatal,
    /// since `Destroy` must still be able to tear the container down.
    pub fn load(&self, id: &str) -> Result<Container> {
        let storage = state::load_state(&self.runtime_root, id)?;
        for endpoint in &storage.endpoints {
            if self
                .network
                .load_network(&endpoint.driver, &endpoint.network_name)
                .is_err()
            {
                log::warn!(
                    "container {id}: endpoint {} references missing network '{}'",
                    endpoint.id,
                    endpoint.network_name
                );
            }
        }
        Ok(Container::from_state(&self.runtime_root, storage))
    }

    /// **Exists(id) → bool**.
    pub fn exists(&self, id: &str) -> bool {
        state::state_file_path(&self.runtime_root, id).exists()
    }

    /// Every container id known to this runtime root, for `ps`.
    pub fn list(&self) -> Result<Vec<String>> {
        state::list_container_ids(&self.runtime_root)
    }

    /// Resolve a possibly-abbreviated id, then load it.
    pub fn load_by_prefix(&self, prefix: &str) -> Result<Container> {
        let id = state::resolve_id(&self.runtime_root, prefix)?;
        self.load(&id)
    }
}

fn create_root_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| {
        CapsuleError::with_cause(
            ErrorKind::FactoryInitError,
            format!("failed to create {}", path.display()),
            e,
        )
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_factory_creates_missing_root_when_init_true() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("capsule-root");
        assert!(!root.exists());
        let factory = Factory::new(&root, true).unwrap();
        assert!(factory.runtime_root.exists());
    }

    #[test]
    fn new_factory_fails_when_root_missing_and_init_false() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("nope");
        let err = Factory::new(&root, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FactoryInitError);
    }

    #[test]
    fn create_then_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = Factory::new(tmp.path(), true).unwrap();
        let cfg = ContainerConfig::example("c1");
        let container = factory.create(cfg).unwrap();
        assert_eq!(container.status, crate::core::container::Status::Stopped);

        // Create does not persist state until the first transition, so
        // Load before any Start should fail with ContainerNotExists.
        let err = factory.load("c1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContainerNotExists);
    }

    #[test]
    fn duplicate_create_fails_with_id_in_use() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = Factory::new(tmp.path(), true).unwrap();
        factory.create(ContainerConfig::example("c1")).unwrap();
        let err = factory.create(ContainerConfig::example("c1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdInUse);
    }

    #[test]
    fn exists_reflects_persisted_state_not_bare_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = Factory::new(tmp.path(), true).unwrap();
        factory.create(ContainerConfig::example("c1")).unwrap();
        assert!(!factory.exists("c1"));
    }

    #[test]
    fn list_is_empty_on_a_fresh_root() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = Factory::new(tmp.path(), true).unwrap();
        assert!(factory.list().unwrap().is_empty());
    }
}
