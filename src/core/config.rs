//! In-memory representation of the container spec (§3): process command,
//! environment, hostname, rootfs, mounts, namespaces, readonly/mask paths,
//! cgroup resources, and network attachments. Immutable after `Create`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::error::{CapsuleError, ErrorKind, Result};

/// The kinds of Linux namespace a container may unshare or join. A closed
/// enum rather than a free-form string set (DESIGN NOTES §9: "A closed
/// enum of driver kinds is preferable"; the same reasoning applies here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    Mount,
    Pid,
    Uts,
    Ipc,
    Network,
    Cgroup,
    User,
}

impl NamespaceKind {
    /// Fixed entry order mandated by §4.3 step 4: user, pid, network, ipc,
    /// uts, mount — mount always last so pivot_root sees the final tree.
    pub const ENTRY_ORDER: [NamespaceKind; 6] = [
        NamespaceKind::User,
        NamespaceKind::Pid,
        NamespaceKind::Network,
        NamespaceKind::Ipc,
        NamespaceKind::Uts,
        NamespaceKind::Mount,
    ];

    /// The name of the file under `/proc/<pid>/ns/` for this namespace kind.
    pub fn proc_ns_name(&self) -> &'static str {
        match self {
            NamespaceKind::Mount => "mnt",
            NamespaceKind::Pid => "pid",
            NamespaceKind::Uts => "uts",
            NamespaceKind::Ipc => "ipc",
            NamespaceKind::Network => "net",
            NamespaceKind::Cgroup => "cgroup",
            NamespaceKind::User => "user",
        }
    }
}

/// The process to launch inside the container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Command and arguments; `args[0]` is resolved via PATH lookup.
    pub args: Vec<String>,
    /// `KEY=VALUE` environment entries.
    #[serde(default)]
    pub env: Vec<String>,
    /// Absolute working directory inside the container.
    pub cwd: PathBuf,
    /// uid to switch to before exec, if any.
    #[serde(default)]
    pub uid: Option<u32>,
    /// gid to switch to before exec, if any.
    #[serde(default)]
    pub gid: Option<u32>,
}

/// One entry of the container's mount list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    pub source: PathBuf,
    pub destination: PathBuf,
    #[serde(rename = "type")]
    pub fstype: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

/// A device cgroup allow/deny rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRule {
    pub allow: bool,
    /// e.g. "c 1:3 rwm" — the literal line written to devices.allow/deny.
    pub rule: String,
}

/// Cgroup resource limits for a container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default)]
    pub memory_bytes: Option<u64>,
    #[serde(default)]
    pub cpu_shares: Option<u64>,
    #[serde(default)]
    pub cpuset_cpus: Option<String>,
    #[serde(default)]
    pub pids_limit: Option<u64>,
    #[serde(default)]
    pub devices: Vec<DeviceRule>,
}

/// A single host port forwarded to a container port, e.g. `8080:80/tcp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
    #[serde(default = "default_proto")]
    pub protocol: String,
}

fn default_proto() -> String {
    "tcp".to_string()
}

/// Which network driver backs an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Bridge,
    Loopback,
}

impl DriverKind {
    pub fn name(&self) -> &'static str {
        match self {
            DriverKind::Bridge => "bridge",
            DriverKind::Loopback => "loopback",
        }
    }
}

/// One requested network attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkAttachment {
    pub driver: DriverKind,
    pub network_name: String,
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
}

/// The full, validated container configuration (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub id: String,
    pub rootfs_path: PathBuf,
    #[serde(default)]
    pub hostname: Option<String>,
    pub process: ProcessConfig,
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
    #[serde(default)]
    pub namespaces: Vec<NamespaceKind>,
    #[serde(default)]
    pub readonly_paths: Vec<PathBuf>,
    #[serde(default)]
    pub mask_paths: Vec<PathBuf>,
    #[serde(default)]
    pub resources: ResourceLimits,
    #[serde(default)]
    pub networks: Vec<NetworkAttachment>,
}

impl ContainerConfig {
    /// Validate the configuration per the boundary rules of §8: non-empty
    /// id that is filesystem-safe, non-empty args, absolute cwd, and
    /// well-formed `KEY=VALUE` environment entries.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() || !crate::core::id::is_filesystem_safe(&self.id) {
            return Err(CapsuleError::new(
                ErrorKind::InvalidIdFormat,
                format!("invalid container id '{}'", self.id),
            ));
        }
        if !self.rootfs_path.is_absolute() {
            return Err(CapsuleError::new(
                ErrorKind::ConfigInvalid,
                "rootfs_path must be an absolute path",
            ));
        }
        if self.process.args.is_empty() {
            return Err(CapsuleError::new(
                ErrorKind::ConfigInvalid,
                "process.args must not be empty",
            ));
        }
        if !self.process.cwd.is_absolute() {
            return Err(CapsuleError::new(
                ErrorKind::ConfigInvalid,
                "process.cwd must be an absolute path",
            ));
        }
        for entry in &self.process.env {
            if !entry.contains('=') {
                return Err(CapsuleError::new(
                    ErrorKind::ConfigInvalid,
                    format!("env entry '{entry}' is not of the form KEY=VALUE"),
                ));
            }
        }
        Ok(())
    }

    /// An example configuration, used by the `spec` subcommand.
    pub fn example(id: &str) -> ContainerConfig {
        ContainerConfig {
            id: id.to_string(),
            rootfs_path: PathBuf::from("/var/lib/capsule/rootfs"),
            hostname: Some("capsule".to_string()),
            process: ProcessConfig {
                args: vec!["/bin/sh".to_string()],
                env: vec![
                    "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin"
                        .to_string(),
                    "TERM=xterm".to_string(),
                ],
                cwd: PathBuf::from("/"),
                uid: None,
                gid: None,
            },
            mounts: Vec::new(),
            namespaces: vec![
                NamespaceKind::Mount,
                NamespaceKind::Pid,
                NamespaceKind::Uts,
                NamespaceKind::Ipc,
                NamespaceKind::Network,
            ],
            readonly_paths: Vec::new(),
            mask_paths: vec![PathBuf::from("/proc/kcore")],
            resources: ResourceLimits::default(),
            networks: Vec::new(),
        }
    }
}
