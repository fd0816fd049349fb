//! The network subsystem (§4.6): a registry of named drivers, each
//! exposing the same eight-operation contract. The lifecycle engine only
//! ever calls `connect` during bootstrap; the rest back the `network`
//! CLI surface.

pub mod bridge;
pub mod ipam;
pub mod loopback;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::config::{DriverKind, PortMapping};
use crate::core::error::{CapsuleError, ErrorKind, Result};

pub use bridge::BridgeDriver;
pub use loopback::LoopbackDriver;

/// A named network, owned by its driver's registry, independent of any
/// single container's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub driver: String,
    pub ip_range_cidr: String,
}

/// One attachment of a container to a network, produced by `connect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub driver: String,
    pub network_name: String,
    pub ip_address: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
    pub mac_address: Option<String>,
    pub host_veth_name: Option<String>,
    pub container_veth_name: Option<String>,
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
}

/// The capability set every network driver implements (§4.6).
pub trait NetworkDriver {
    fn name(&self) -> &'static str;

    fn create(&self, subnet: &str, name: &str) -> Result<Network>;
    fn delete(&self, name: &str) -> Result<()>;
    fn load(&self, name: &str) -> Result<Network>;
    fn list(&self) -> Result<Vec<Network>>;

    fn connect(
        &self,
        endpoint_id: &str,
        network: &Network,
        port_mappings: &[PortMapping],
        container_pid: u32,
    ) -> Result<Endpoint>;
    fn disconnect(&self, endpoint: &Endpoint) -> Result<()>;
}

/// Process-wide registry mapping driver name to driver object. Dispatch is
/// over the closed `DriverKind` enum rather than a dynamic string map
/// (DESIGN NOTES §9: third-party drivers are a non-goal for this core).
pub struct Registry {
    bridge: BridgeDriver,
    loopback: LoopbackDriver,
}

impl Registry {
    /// Idempotent: only ensures each driver's persistence directory
    /// exists, performing no other I/O (§4.6).
    pub fn new(runtime_root: &Path) -> Result<Registry> {
        let bridge = BridgeDriver::new(runtime_root)?;
        let loopback = LoopbackDriver::new(runtime_root)?;
        Ok(Registry { bridge, loopback })
    }

    pub fn driver(&self, kind: DriverKind) -> &dyn NetworkDriver {
        match kind {
            DriverKind::Bridge => &self.bridge,
            DriverKind::Loopback => &self.loopback,
        }
    }

    pub fn driver_by_name(&self, name: &str) -> Result<&dyn NetworkDriver> {
        match name {
            "bridge" => Ok(&self.bridge),
            "loopback" => Ok(&self.loopback),
            other => Err(CapsuleError::new(
                ErrorKind::NetworkError,
                format!("unknown network driver '{other}'"),
            )),
        }
    }

    pub fn create_network(&self, kind: DriverKind, subnet: &str, name: &str) -> Result<Network> {
        self.driver(kind).create(subnet, name)
    }

    pub fn load_network(&self, driver: &str, name: &str) -> Result<Network> {
        self.driver_by_name(driver)?.load(name)
    }

    pub fn delete_network(&self, kind: DriverKind, name: &str) -> Result<()> {
        self.driver(kind).delete(name)
    }

    pub fn list_networks(&self, kind: DriverKind) -> Result<Vec<Network>> {
        self.driver(kind).list()
    }

    /// Connect a single attachment, used by the Parent Process Driver
    /// during bootstrap (§4.3 step 7).
    pub fn connect(
        &self,
        endpoint_id: &str,
        kind: DriverKind,
        network_name: &str,
        port_mappings: &[PortMapping],
        container_pid: u32,
    ) -> Result<Endpoint> {
        let network = self.load_network(kind.name(), network_name)?;
        self.driver(kind)
            .connect(endpoint_id, &network, port_mappings, container_pid)
    }

    pub fn disconnect(&self, endpoint: &Endpoint) -> Result<()> {
        self.driver_by_name(&endpoint.driver)?.disconnect(endpoint)
    }
}

pub fn network_json_path(runtime_root: &Path, driver: &str, name: &str) -> PathBuf {
    crate::core::state::network_dir(runtime_root, driver).join(format!("{name}.json"))
}

pub fn network_ipam_path(runtime_root: &Path, driver: &str, name: &str) -> PathBuf {
    crate::core::state::network_dir(runtime_root, driver).join(format!("{name}.ipam"))
}
