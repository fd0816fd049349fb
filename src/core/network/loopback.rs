//! The loopback driver (§4.6): a no-op at the parent side. The child
//! enables its own `lo` device during Initializer step 3; the driver here
//! exists only to satisfy the uniform eight-operation contract.

use std::path::PathBuf;

use crate::core::config::PortMapping;
use crate::core::error::{CapsuleError, ErrorKind, Result};
use crate::core::network::{Endpoint, Network, NetworkDriver};

pub struct LoopbackDriver {
    runtime_root: PathBuf,
}

impl LoopbackDriver {
    pub fn new(runtime_root: &std::path::Path) -> Result<LoopbackDriver> {
        Ok(LoopbackDriver {
            runtime_root: runtime_root.to_path_buf(),
        })
    }
}

impl NetworkDriver for LoopbackDriver {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn create(&self, _subnet: &str, name: &str) -> Result<Network> {
        Ok(Network {
            name: name.to_string(),
            driver: self.name().to_string(),
            ip_range_cidr: "127.0.0.0/8".to_string(),
        })
    }

    fn delete(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Network> {
        // The loopback network always exists implicitly; there is nothing
        // to persist or fail to find.
        let _ = &self.runtime_root;
        Ok(Network {
            name: name.to_string(),
            driver: self.name().to_string(),
            ip_range_cidr: "127.0.0.0/8".to_string(),
        })
    }

    fn list(&self) -> Result<Vec<Network>> {
        Ok(vec![self.load("lo")?])
    }

    fn connect(
        &self,
        endpoint_id: &str,
        network: &Network,
        port_mappings: &[PortMapping],
        _container_pid: u32,
    ) -> Result<Endpoint> {
        if !port_mappings.is_empty() {
            return Err(CapsuleError::new(
                ErrorKind::NetworkError,
                "loopback network does not support port mappings",
            ));
        }
        Ok(Endpoint {
            id: endpoint_id.to_string(),
            driver: self.name().to_string(),
            network_name: network.name.clone(),
            ip_address: Some("127.0.0.1/8".to_string()),
            gateway: None,
            mac_address: None,
            host_veth_name: None,
            container_veth_name: None,
            port_mappings: Vec::new(),
        })
    }

    fn disconnect(&self, _endpoint: &Endpoint) -> Result<()> {
        Ok(())
    }
}
