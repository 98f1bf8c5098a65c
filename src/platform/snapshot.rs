//! Immutable topology snapshots and their file format.

use crate::core::{IngestError, Result};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

/// What the platform knows about one reporting agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentView {
    /// VPC (EPC) the agent runs in
    pub epc_id: i32,
    pub region_id: u16,
    pub az_id: u16,
    pub host_id: u16,
}

/// Resource that owns an address inside one EPC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceInfo {
    pub region_id: u32,
    pub az_id: u32,
    pub subnet_id: u32,
    pub host_id: u32,
    pub pod_id: u32,
    pub pod_node_id: u32,
    pub pod_ns_id: u32,
    pub pod_cluster_id: u32,
    pub pod_group_id: u32,
    pub device_type: u8,
    pub device_id: u32,
}

/// Everything needed to resolve the service behind an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceQuery {
    pub pod_id: u32,
    pub pod_node_id: u32,
    pub pod_cluster_id: u32,
    pub pod_group_id: u32,
    pub epc_id: i32,
    pub ip: IpAddr,
    pub protocol: u8,
    pub port: u16,
}

/// One consistent view of the platform topology.
#[derive(Debug, Default)]
pub struct PlatformSnapshot {
    version: u64,
    agents: AHashMap<u16, AgentView>,
    ipv4: AHashMap<(i32, Ipv4Addr), ResourceInfo>,
    ipv6: AHashMap<(i32, Ipv6Addr), ResourceInfo>,
    pod_group_services: AHashMap<u32, u32>,
    ip_services: AHashMap<(i32, IpAddr, u16), u32>,
}

impl PlatformSnapshot {
    pub fn builder(version: u64) -> SnapshotBuilder {
        SnapshotBuilder {
            snapshot: PlatformSnapshot {
                version,
                ..PlatformSnapshot::default()
            },
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn agent(&self, stream_tag: u16) -> Option<AgentView> {
        self.agents.get(&stream_tag).copied()
    }

    pub fn ipv4(&self, epc_id: i32, ip: Ipv4Addr) -> Option<ResourceInfo> {
        self.ipv4.get(&(epc_id, ip)).copied()
    }

    pub fn ipv6(&self, epc_id: i32, ip: Ipv6Addr) -> Option<ResourceInfo> {
        self.ipv6.get(&(epc_id, ip)).copied()
    }

    /// Service id behind `query`, or 0.
    ///
    /// Pods resolve through their pod group; anything else through
    /// `(epc, ip, port)` with a port-less entry as fallback.
    pub fn service(&self, query: &ServiceQuery) -> u32 {
        if query.pod_group_id != 0 {
            if let Some(service) = self.pod_group_services.get(&query.pod_group_id) {
                return *service;
            }
        }
        self.ip_services
            .get(&(query.epc_id, query.ip, query.port))
            .or_else(|| self.ip_services.get(&(query.epc_id, query.ip, 0)))
            .copied()
            .unwrap_or(0)
    }

    pub fn resource_count(&self) -> usize {
        self.ipv4.len() + self.ipv6.len()
    }

    /// Load a snapshot file; `.yaml`/`.yml` files are YAML, anything else JSON.
    pub fn from_file(path: &Path, version: u64) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: SnapshotFile = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        file.into_snapshot(version)
    }
}

/// Incremental construction of a [`PlatformSnapshot`].
pub struct SnapshotBuilder {
    snapshot: PlatformSnapshot,
}

impl SnapshotBuilder {
    pub fn agent(mut self, stream_tag: u16, view: AgentView) -> Self {
        self.snapshot.agents.insert(stream_tag, view);
        self
    }

    pub fn resource(mut self, epc_id: i32, ip: IpAddr, info: ResourceInfo) -> Self {
        match ip {
            IpAddr::V4(ip) => self.snapshot.ipv4.insert((epc_id, ip), info),
            IpAddr::V6(ip) => self.snapshot.ipv6.insert((epc_id, ip), info),
        };
        self
    }

    pub fn pod_group_service(mut self, pod_group_id: u32, service_id: u32) -> Self {
        self.snapshot.pod_group_services.insert(pod_group_id, service_id);
        self
    }

    pub fn ip_service(mut self, epc_id: i32, ip: IpAddr, port: u16, service_id: u32) -> Self {
        self.snapshot.ip_services.insert((epc_id, ip, port), service_id);
        self
    }

    pub fn build(self) -> PlatformSnapshot {
        self.snapshot
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SnapshotFile {
    agents: Vec<AgentEntry>,
    resources: Vec<ResourceEntry>,
    services: Vec<ServiceEntry>,
}

#[derive(Debug, Deserialize)]
struct AgentEntry {
    vtap_id: u16,
    #[serde(flatten)]
    view: AgentView,
}

#[derive(Debug, Deserialize)]
struct ResourceEntry {
    epc_id: i32,
    ip: IpAddr,
    #[serde(flatten)]
    info: ResourceInfo,
}

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    service_id: u32,
    #[serde(default)]
    pod_group_id: u32,
    #[serde(default)]
    epc_id: i32,
    ip: Option<IpAddr>,
    #[serde(default)]
    port: u16,
}

impl SnapshotFile {
    fn into_snapshot(self, version: u64) -> Result<PlatformSnapshot> {
        let mut builder = PlatformSnapshot::builder(version);
        for agent in self.agents {
            builder = builder.agent(agent.vtap_id, agent.view);
        }
        for resource in self.resources {
            builder = builder.resource(resource.epc_id, resource.ip, resource.info);
        }
        for service in self.services {
            builder = match (service.pod_group_id, service.ip) {
                (0, Some(ip)) => builder.ip_service(service.epc_id, ip, service.port, service.service_id),
                (0, None) => {
                    return Err(IngestError::platform(format!(
                        "service {} has neither pod_group_id nor ip",
                        service.service_id
                    )))
                },
                (group, _) => builder.pod_group_service(group, service.service_id),
            };
        }
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn query(ip: IpAddr, group: u32, port: u16) -> ServiceQuery {
        ServiceQuery {
            pod_id: 0,
            pod_node_id: 0,
            pod_cluster_id: 0,
            pod_group_id: group,
            epc_id: 3,
            ip,
            protocol: 6,
            port,
        }
    }

    #[test]
    fn test_service_resolution_order() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let snapshot = PlatformSnapshot::builder(1)
            .pod_group_service(9, 100)
            .ip_service(3, ip, 8080, 200)
            .ip_service(3, ip, 0, 300)
            .build();

        assert_eq!(snapshot.service(&query(ip, 9, 8080)), 100);
        assert_eq!(snapshot.service(&query(ip, 0, 8080)), 200);
        assert_eq!(snapshot.service(&query(ip, 0, 9090)), 300);
        assert_eq!(snapshot.service(&query("10.0.0.2".parse().unwrap(), 0, 80)), 0);
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "agents": [{{"vtap_id": 5, "epc_id": 3}}],
                "resources": [
                    {{"epc_id": 3, "ip": "10.0.0.1", "region_id": 1, "az_id": 2, "pod_id": 42}},
                    {{"epc_id": 3, "ip": "fd00::1", "subnet_id": 7}}
                ],
                "services": [{{"service_id": 11, "pod_group_id": 4}}]
            }}"#
        )
        .unwrap();

        let snapshot = PlatformSnapshot::from_file(file.path(), 2).unwrap();
        assert_eq!(snapshot.version(), 2);
        assert_eq!(snapshot.agent(5).unwrap().epc_id, 3);
        assert_eq!(snapshot.ipv4(3, "10.0.0.1".parse().unwrap()).unwrap().pod_id, 42);
        assert_eq!(snapshot.ipv6(3, "fd00::1".parse().unwrap()).unwrap().subnet_id, 7);
        assert_eq!(snapshot.resource_count(), 2);
    }

    #[test]
    fn test_service_without_key_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(file, "services:\n  - service_id: 1\n").unwrap();
        assert!(PlatformSnapshot::from_file(file.path(), 1).is_err());
    }
}
