//! Primary-store records.
//!
//! These mirror the orchestrator's authoritative tables closely enough for the
//! model graph to compute desired state. They are read-only from the engine's
//! point of view.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Primary key of a record in the orchestrator database.
pub type RecordId = u64;

/// Metadata key that links a VM to the service instance it implements.
pub const SERVICE_INSTANCE_DETAIL: &str = "service-instance";

/// Traffic classifier of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficType {
    Guest,
    Public,
    Management,
    Control,
    Storage,
}

impl TrafficType {
    /// Whether networks of this type are owned by the controller.
    pub const fn is_controller_owned(self) -> bool {
        matches!(self, Self::Management | Self::Control | Self::Storage)
    }
}

/// Lifecycle state of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkState {
    Allocated,
    Setup,
    Implementing,
    Implemented,
    Shutdown,
    Destroy,
}

impl NetworkState {
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Implemented | Self::Setup)
    }
}

/// Lifecycle state of a virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Migrating,
    Destroyed,
    Expunging,
    Error,
}

impl VmState {
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Running | Self::Stopping | Self::Migrating
        )
    }
}

/// Lifecycle state of a NIC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NicState {
    Allocated,
    Reserved,
    Releasing,
    Deallocating,
}

impl NicState {
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Allocated | Self::Reserved)
    }
}

/// A network as recorded by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub id: RecordId,
    pub uuid: String,
    pub name: String,
    pub traffic_type: TrafficType,
    pub state: NetworkState,
    /// Guest CIDR such as `10.0.1.0/24`. Public networks use VLAN ranges instead.
    pub cidr: Option<String>,
    pub gateway: Option<Ipv4Addr>,
    /// Network ACL whose rules become this network's policy.
    pub acl_id: Option<RecordId>,
}

impl NetworkRecord {
    /// A guest network in the `Implemented` state.
    pub fn guest(id: RecordId, uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            uuid: uuid.into(),
            name: name.into(),
            traffic_type: TrafficType::Guest,
            state: NetworkState::Implemented,
            cidr: None,
            gateway: None,
            acl_id: None,
        }
    }

    #[must_use]
    pub fn with_subnet(mut self, cidr: impl Into<String>, gateway: Ipv4Addr) -> Self {
        self.cidr = Some(cidr.into());
        self.gateway = Some(gateway);
        self
    }

    #[must_use]
    pub const fn with_traffic_type(mut self, traffic_type: TrafficType) -> Self {
        self.traffic_type = traffic_type;
        self
    }

    #[must_use]
    pub const fn with_state(mut self, state: NetworkState) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub const fn with_acl(mut self, acl_id: RecordId) -> Self {
        self.acl_id = Some(acl_id);
        self
    }
}

/// A VLAN range attached to a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanRecord {
    pub id: RecordId,
    pub network_id: RecordId,
    pub gateway: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// A virtual machine as recorded by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    pub id: RecordId,
    pub uuid: String,
    pub instance_name: String,
    pub display_name: String,
    pub state: VmState,
    /// Free-form instance metadata.
    pub details: BTreeMap<String, String>,
}

impl VmRecord {
    /// A running VM whose display name equals its instance name.
    pub fn running(id: RecordId, uuid: impl Into<String>, instance_name: impl Into<String>) -> Self {
        let instance_name = instance_name.into();
        Self {
            id,
            uuid: uuid.into(),
            display_name: instance_name.clone(),
            instance_name,
            state: VmState::Running,
            details: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn with_state(mut self, state: VmState) -> Self {
        self.state = state;
        self
    }

    /// The raw service-instance link, if the VM carries one.
    pub fn service_instance_detail(&self) -> Option<&str> {
        self.details.get(SERVICE_INSTANCE_DETAIL).map(String::as_str)
    }
}

/// A NIC of a virtual machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicRecord {
    pub id: RecordId,
    pub uuid: String,
    pub vm_id: RecordId,
    pub network_id: RecordId,
    pub mac_address: String,
    pub ipv4_address: Option<Ipv4Addr>,
    pub device_id: u32,
    pub state: NicState,
}

impl NicRecord {
    /// A reserved NIC without an address.
    pub fn reserved(
        id: RecordId,
        uuid: impl Into<String>,
        vm_id: RecordId,
        network_id: RecordId,
        mac_address: impl Into<String>,
    ) -> Self {
        Self {
            id,
            uuid: uuid.into(),
            vm_id,
            network_id,
            mac_address: mac_address.into(),
            ipv4_address: None,
            device_id: 0,
            state: NicState::Reserved,
        }
    }

    #[must_use]
    pub const fn with_address(mut self, address: Ipv4Addr) -> Self {
        self.ipv4_address = Some(address);
        self
    }

    #[must_use]
    pub const fn with_device_id(mut self, device_id: u32) -> Self {
        self.device_id = device_id;
        self
    }

    #[must_use]
    pub const fn with_state(mut self, state: NicState) -> Self {
        self.state = state;
        self
    }
}

/// A public address allocated from a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddressRecord {
    pub id: RecordId,
    pub uuid: String,
    pub address: Ipv4Addr,
    /// Public network the address was allocated from.
    pub source_network_id: RecordId,
    pub associated_vm_id: Option<RecordId>,
    /// Network of the NIC the address is associated with.
    pub associated_network_id: Option<RecordId>,
}

/// A network ACL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRecord {
    pub id: RecordId,
    pub uuid: String,
    pub name: String,
}

/// Action of an ACL rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclAction {
    Allow,
    Deny,
}

/// Direction of an ACL rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclTrafficType {
    Ingress,
    Egress,
}

/// A numbered ACL rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRuleRecord {
    pub id: RecordId,
    pub acl_id: RecordId,
    pub number: u32,
    /// `all`, `tcp`, `udp`, `icmp` or a protocol number.
    pub protocol: String,
    pub source_cidrs: Vec<String>,
    pub start_port: Option<u16>,
    pub end_port: Option<u16>,
    pub action: AclAction,
    pub traffic_type: AclTrafficType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_predicates() {
        assert!(NetworkState::Implemented.is_active());
        assert!(NetworkState::Setup.is_active());
        assert!(!NetworkState::Shutdown.is_active());
        assert!(NicState::Reserved.is_active());
        assert!(!NicState::Releasing.is_active());
        assert!(VmState::Running.is_active());
        assert!(!VmState::Expunging.is_active());
    }

    #[test]
    fn test_controller_owned_traffic() {
        assert!(TrafficType::Control.is_controller_owned());
        assert!(!TrafficType::Guest.is_controller_owned());
        assert!(!TrafficType::Public.is_controller_owned());
    }

    #[test]
    fn test_service_instance_detail() {
        let vm = VmRecord::running(1, "vm-1", "i-2-1-VM")
            .with_detail(SERVICE_INSTANCE_DETAIL, "default-domain:default-project:fw");
        assert_eq!(
            vm.service_instance_detail(),
            Some("default-domain:default-project:fw")
        );
    }
}
