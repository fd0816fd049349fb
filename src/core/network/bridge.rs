//! The bridge driver (§4.6): a Linux bridge per network, veth pairs per
//! endpoint, IP forwarding + MASQUERADE for outbound traffic, and DNAT
//! rules for published ports. Manipulates the host network stack by
//! invoking `ip(8)`/`iptables(8)` — the concrete veth/bridge manipulation
//! spec.md marks as an external collaborator of the core, kept here as a
//! real, minimal implementation rather than a stub.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use crate::core::config::PortMapping;
use crate::core::error::{CapsuleError, ErrorKind, Result};
use crate::core::network::ipam::IpamPool;
use crate::core::network::{network_ipam_path, network_json_path, Endpoint, Network, NetworkDriver};

pub struct BridgeDriver {
    runtime_root: PathBuf,
}

fn run(cmd: &mut Command) -> Result<()> {
    let output = cmd.output().map_err(|e| {
        CapsuleError::with_cause(
            ErrorKind::NetworkError,
            format!("failed to spawn {cmd:?}"),
            e,
        )
    })?;
    if !output.status.success() {
        return Err(CapsuleError::new(
            ErrorKind::NetworkError,
            format!(
                "{cmd:?} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }
    Ok(())
}

impl BridgeDriver {
    pub fn new(runtime_root: &std::path::Path) -> Result<BridgeDriver> {
        let dir = crate::core::state::network_dir(runtime_root, "bridge");
        fs::create_dir_all(&dir).map_err(|e| {
            CapsuleError::with_cause(
                ErrorKind::FactoryInitError,
                format!("failed to create {}", dir.display()),
                e,
            )
        })?;
        Ok(BridgeDriver {
            runtime_root: runtime_root.to_path_buf(),
        })
    }

    fn json_path(&self, name: &str) -> PathBuf {
        network_json_path(&self.runtime_root, "bridge", name)
    }

    fn ipam_path(&self, name: &str) -> PathBuf {
        network_ipam_path(&self.runtime_root, "bridge", name)
    }
}

impl NetworkDriver for BridgeDriver {
    fn name(&self) -> &'static str {
        "bridge"
    }

    fn create(&self, subnet: &str, name: &str) -> Result<Network> {
        let network = Network {
            name: name.to_string(),
            driver: self.name().to_string(),
            ip_range_cidr: subnet.to_string(),
        };
        let pool = IpamPool::new(subnet)?;
        let gateway = pool.gateway()?;
        let prefix = pool.prefix_len()?;

        run(Command::new("ip").args(["link", "add", "name", name, "type", "bridge"]))?;
        run(Command::new("ip").args([
            "addr",
            "add",
            &format!("{gateway}/{prefix}"),
            "dev",
            name,
        ]))?;
        run(Command::new("ip").args(["link", "set", name, "up"]))?;

        let _ = fs::write("/proc/sys/net/ipv4/ip_forward", b"1\n");
        let _ = run(Command::new("iptables").args([
            "-t",
            "nat",
            "-A",
            "POSTROUTING",
            "-s",
            subnet,
            "!",
            "-o",
            name,
            "-j",
            "MASQUERADE",
        ]));

        let json = serde_json::to_string_pretty(&network).map_err(|e| {
            CapsuleError::with_cause(ErrorKind::NetworkError, "failed to serialize network", e)
        })?;
        fs::write(self.json_path(name), json)
            .map_err(|e| CapsuleError::with_cause(ErrorKind::NetworkError, "failed to persist network", e))?;
        pool.save(&self.ipam_path(name))?;

        Ok(network)
    }

    fn delete(&self, name: &str) -> Result<()> {
        let network = self.load(name)?;
        let _ = run(Command::new("iptables").args([
            "-t",
            "nat",
            "-D",
            "POSTROUTING",
            "-s",
            &network.ip_range_cidr,
            "!",
            "-o",
            name,
            "-j",
            "MASQUERADE",
        ]));
        let _ = run(Command::new("ip").args(["link", "del", name, "type", "bridge"]));
        let _ = fs::remove_file(self.json_path(name));
        let _ = fs::remove_file(self.ipam_path(name));
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Network> {
        let data = fs::read_to_string(self.json_path(name)).map_err(|e| {
            CapsuleError::with_cause(
                ErrorKind::NetworkError,
                format!("network '{name}' not found"),
                e,
            )
        })?;
        serde_json::from_str(&data).map_err(|e| {
            CapsuleError::with_cause(ErrorKind::NetworkError, "failed to parse network", e)
        })
    }

    fn list(&self) -> Result<Vec<Network>> {
        let dir = crate::core::state::network_dir(&self.runtime_root, "bridge");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut networks = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| {
            CapsuleError::with_cause(ErrorKind::NetworkError, "failed to list networks", e)
        })? {
            let entry = entry
                .map_err(|e| CapsuleError::with_cause(ErrorKind::NetworkError, "bad entry", e))?;
            if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                let data = fs::read_to_string(entry.path()).map_err(|e| {
                    CapsuleError::with_cause(ErrorKind::NetworkError, "failed to read network", e)
                })?;
                let network: Network = serde_json::from_str(&data).map_err(|e| {
                    CapsuleError::with_cause(ErrorKind::NetworkError, "failed to parse network", e)
                })?;
                networks.push(network);
            }
        }
        networks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(networks)
    }

    fn connect(
        &self,
        endpoint_id: &str,
        network: &Network,
        port_mappings: &[PortMapping],
        container_pid: u32,
    ) -> Result<Endpoint> {
        let ipam_path = self.ipam_path(&network.name);
        let mut pool = IpamPool::load_or_create(&ipam_path, &network.ip_range_cidr)?;
        let ip = pool.allocate()?;
        let prefix = pool.prefix_len()?;
        let gateway = pool.gateway()?;
        pool.save(&ipam_path)?;

        let host_veth = format!("veth{}", &endpoint_id[..8.min(endpoint_id.len())]);
        let container_veth = format!("ceth{}", &endpoint_id[..8.min(endpoint_id.len())]);

        run(Command::new("ip").args([
            "link", "add", &host_veth, "type", "veth", "peer", "name", &container_veth,
        ]))?;
        run(Command::new("ip").args(["link", "set", &host_veth, "master", &network.name]))?;
        run(Command::new("ip").args(["link", "set", &host_veth, "up"]))?;
        run(Command::new("ip").args([
            "link",
            "set",
            &container_veth,
            "netns",
            &container_pid.to_string(),
        ]))?;

        for mapping in port_mappings {
            let _ = run(Command::new("iptables").args([
                "-t",
                "nat",
                "-A",
                "PREROUTING",
                "-p",
                &mapping.protocol,
                "--dport",
                &mapping.host_port.to_string(),
                "-j",
                "DNAT",
                "--to-destination",
                &format!("{ip}:{}", mapping.container_port),
            ]));
        }

        Ok(Endpoint {
            id: endpoint_id.to_string(),
            driver: self.name().to_string(),
            network_name: network.name.clone(),
            ip_address: Some(format!("{ip}/{prefix}")),
            gateway: Some(gateway.to_string()),
            mac_address: None,
            host_veth_name: Some(host_veth),
            container_veth_name: Some(container_veth),
            port_mappings: port_mappings.to_vec(),
        })
    }

    fn disconnect(&self, endpoint: &Endpoint) -> Result<()> {
        if let Some(host_veth) = &endpoint.host_veth_name {
            let _ = run(Command::new("ip").args(["link", "del", host_veth]));
        }
        for mapping in &endpoint.port_mappings {
            if let Some(ip_cidr) = &endpoint.ip_address {
                let ip = ip_cidr.split('/').next().unwrap_or_default();
                let _ = run(Command::new("iptables").args([
                    "-t",
                    "nat",
                    "-D",
                    "PREROUTING",
                    "-p",
                    &mapping.protocol,
                    "--dport",
                    &mapping.host_port.to_string(),
                    "-j",
                    "DNAT",
                    "--to-destination",
                    &format!("{ip}:{}", mapping.container_port),
                ]));
            }
        }

        if let Some(ip_cidr) = &endpoint.ip_address {
            let ipam_path = self.ipam_path(&endpoint.network_name);
            if let Ok(network) = self.load(&endpoint.network_name) {
                if let Ok(mut pool) = IpamPool::load_or_create(&ipam_path, &network.ip_range_cidr) {
                    if let Some(ip_str) = ip_cidr.split('/').next() {
                        if let Ok(ip) = ip_str.parse() {
                            let _ = pool.release(ip);
                            let _ = pool.save(&ipam_path);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
