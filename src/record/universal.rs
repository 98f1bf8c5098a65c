//! Resource fields shared by every enriched record.

use crate::platform::{PlatformLookup, ServiceQuery};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// An IPv4 or IPv6 address stored as the `ip4`/`ip6`/`is_ipv4` columns.
///
/// Only the column selected by `is_ipv4` is meaningful; the other one is
/// kept unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IpUnion {
    ip4: Ipv4Addr,
    ip6: Ipv6Addr,
    is_ipv4: bool,
}

impl Default for IpUnion {
    fn default() -> Self {
        Self {
            ip4: Ipv4Addr::UNSPECIFIED,
            ip6: Ipv6Addr::UNSPECIFIED,
            is_ipv4: true,
        }
    }
}

impl IpUnion {
    pub fn set(&mut self, ip: IpAddr) {
        *self = Self::from(ip);
    }

    pub fn addr(&self) -> IpAddr {
        if self.is_ipv4 {
            IpAddr::V4(self.ip4)
        } else {
            IpAddr::V6(self.ip6)
        }
    }

    pub fn is_ipv4(&self) -> bool {
        self.is_ipv4
    }
}

impl From<IpAddr> for IpUnion {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(ip4) => Self {
                ip4,
                ..Self::default()
            },
            IpAddr::V6(ip6) => Self {
                ip4: Ipv4Addr::UNSPECIFIED,
                ip6,
                is_ipv4: false,
            },
        }
    }
}

/// Topology attributes of a record; all zero until a lookup hits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UniversalTag {
    pub vtap_id: u16,
    pub region_id: u16,
    pub az_id: u16,
    pub subnet_id: u16,
    pub l3_epc_id: i32,
    pub host_id: u16,
    pub pod_id: u32,
    pub pod_node_id: u32,
    pub pod_ns_id: u16,
    pub pod_cluster_id: u16,
    pub pod_group_id: u32,
    pub l3_device_type: u8,
    pub l3_device_id: u32,
    pub service_id: u32,
}

impl UniversalTag {
    /// Fill the resource fields of the address `ip` seen by agent `vtap_id`.
    ///
    /// The agent's EPC is taken even when the address is unknown; an
    /// unknown address leaves every other field at zero.
    pub fn fill_resource(
        &mut self,
        vtap_id: u16,
        ip: IpAddr,
        protocol: u8,
        port: u16,
        platform: &dyn PlatformLookup,
    ) {
        self.vtap_id = vtap_id;
        self.l3_epc_id = platform.query_agent(vtap_id).map_or(0, |agent| agent.epc_id);

        let info = match ip {
            IpAddr::V4(ip) => platform.query_ipv4(self.l3_epc_id, ip),
            IpAddr::V6(ip) => platform.query_ipv6(self.l3_epc_id, ip),
        };
        let Some(info) = info else {
            return;
        };

        self.region_id = info.region_id as u16;
        self.az_id = info.az_id as u16;
        self.subnet_id = info.subnet_id as u16;
        self.host_id = info.host_id as u16;
        self.pod_id = info.pod_id;
        self.pod_node_id = info.pod_node_id;
        self.pod_ns_id = info.pod_ns_id as u16;
        self.pod_cluster_id = info.pod_cluster_id as u16;
        self.pod_group_id = info.pod_group_id;
        self.l3_device_type = info.device_type;
        self.l3_device_id = info.device_id;
        self.service_id = platform.query_service(&ServiceQuery {
            pod_id: self.pod_id,
            pod_node_id: self.pod_node_id,
            pod_cluster_id: u32::from(self.pod_cluster_id),
            pod_group_id: self.pod_group_id,
            epc_id: self.l3_epc_id,
            ip,
            protocol,
            port,
        });
    }
}
