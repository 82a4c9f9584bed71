//! Controller object model.
//!
//! Every remote resource is an [`ApiObject`]: an identity header (uuid,
//! fully-qualified name, parent) plus a typed body. The body decides the
//! object's [`ApiObjectType`].

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Resource types known to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApiObjectType {
    FloatingIp,
    FloatingIpPool,
    InstanceIp,
    NetworkIpam,
    NetworkPolicy,
    Project,
    ServiceInstance,
    ServiceTemplate,
    VirtualMachine,
    VirtualMachineInterface,
    VirtualNetwork,
}

impl ApiObjectType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FloatingIp => "floating-ip",
            Self::FloatingIpPool => "floating-ip-pool",
            Self::InstanceIp => "instance-ip",
            Self::NetworkIpam => "network-ipam",
            Self::NetworkPolicy => "network-policy",
            Self::Project => "project",
            Self::ServiceInstance => "service-instance",
            Self::ServiceTemplate => "service-template",
            Self::VirtualMachine => "virtual-machine",
            Self::VirtualMachineInterface => "virtual-machine-interface",
            Self::VirtualNetwork => "virtual-network",
        }
    }
}

impl fmt::Display for ApiObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference from one object to another, by uuid, fq-name or both.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ObjectReference {
    pub uuid: Option<String>,
    pub fq_name: Vec<String>,
}

impl ObjectReference {
    pub const fn new(uuid: Option<String>, fq_name: Vec<String>) -> Self {
        Self { uuid, fq_name }
    }

    pub fn by_uuid(uuid: impl Into<String>) -> Self {
        Self {
            uuid: Some(uuid.into()),
            fq_name: Vec::new(),
        }
    }

    pub const fn by_fq_name(fq_name: Vec<String>) -> Self {
        Self {
            uuid: None,
            fq_name,
        }
    }

    pub fn fq_name_string(&self) -> String {
        self.fq_name.join(":")
    }
}

/// An IPv4 prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubnetType {
    pub ip_prefix: Ipv4Addr,
    pub ip_prefix_len: u8,
}

impl fmt::Display for SubnetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip_prefix, self.ip_prefix_len)
    }
}

/// A subnet attached to a network through an IPAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IpamSubnet {
    pub subnet: SubnetType,
    pub default_gateway: Option<Ipv4Addr>,
}

impl IpamSubnet {
    pub const fn new(ip_prefix: Ipv4Addr, ip_prefix_len: u8, gateway: Option<Ipv4Addr>) -> Self {
        Self {
            subnet: SubnetType {
                ip_prefix,
                ip_prefix_len,
            },
            default_gateway: gateway,
        }
    }
}

impl fmt::Display for IpamSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.default_gateway {
            Some(gateway) => write!(f, "{} gw {gateway}", self.subnet),
            None => write!(f, "{}", self.subnet),
        }
    }
}

/// A network's attachment to an IPAM, with the subnets allocated through it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpamReference {
    pub ipam: ObjectReference,
    pub subnets: Vec<IpamSubnet>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyDirection {
    #[serde(rename = "<>")]
    Bidirectional,
    #[serde(rename = ">")]
    Unidirectional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimpleAction {
    Pass,
    Deny,
}

/// One side of a policy rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressMatch {
    Any,
    VirtualNetwork(String),
    Subnet(SubnetType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start_port: u16,
    pub end_port: u16,
}

impl PortRange {
    pub const fn any() -> Self {
        Self {
            start_port: 0,
            end_port: u16::MAX,
        }
    }
}

/// A single network-policy entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub direction: PolicyDirection,
    pub protocol: String,
    pub src_addresses: Vec<AddressMatch>,
    pub src_ports: Vec<PortRange>,
    pub dst_addresses: Vec<AddressMatch>,
    pub dst_ports: Vec<PortRange>,
    pub action: SimpleAction,
    /// Service instances traffic is steered through, by fq-name.
    pub apply_service: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkIpam {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualNetwork {
    pub network_ipam_refs: Vec<IpamReference>,
    pub network_policy_refs: Vec<ObjectReference>,
    pub router_external: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub service_instance_refs: Vec<ObjectReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachineInterface {
    pub mac_addresses: Vec<String>,
    pub virtual_machine_refs: Vec<ObjectReference>,
    pub virtual_network_refs: Vec<ObjectReference>,
    /// `left`, `right` or `management` for service VM interfaces.
    pub service_interface_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceIp {
    pub address: Option<Ipv4Addr>,
    pub virtual_network_refs: Vec<ObjectReference>,
    pub virtual_machine_interface_refs: Vec<ObjectReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingIpPool {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingIp {
    pub address: Option<Ipv4Addr>,
    pub virtual_machine_interface_refs: Vec<ObjectReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    pub entries: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTemplate {
    pub service_mode: String,
    pub service_type: String,
    pub image_name: String,
    pub interface_types: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// fq-name of the left network, colon separated.
    pub left_virtual_network: String,
    /// fq-name of the right network, colon separated.
    pub right_virtual_network: String,
    pub service_template_refs: Vec<ObjectReference>,
    pub max_instances: u32,
}

/// Typed payload of an [`ApiObject`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ApiObjectBody {
    FloatingIp(FloatingIp),
    FloatingIpPool(FloatingIpPool),
    InstanceIp(InstanceIp),
    NetworkIpam(NetworkIpam),
    NetworkPolicy(NetworkPolicy),
    Project(Project),
    ServiceInstance(ServiceInstance),
    ServiceTemplate(ServiceTemplate),
    VirtualMachine(VirtualMachine),
    VirtualMachineInterface(VirtualMachineInterface),
    VirtualNetwork(VirtualNetwork),
}

impl ApiObjectBody {
    pub const fn kind(&self) -> ApiObjectType {
        match self {
            Self::FloatingIp(_) => ApiObjectType::FloatingIp,
            Self::FloatingIpPool(_) => ApiObjectType::FloatingIpPool,
            Self::InstanceIp(_) => ApiObjectType::InstanceIp,
            Self::NetworkIpam(_) => ApiObjectType::NetworkIpam,
            Self::NetworkPolicy(_) => ApiObjectType::NetworkPolicy,
            Self::Project(_) => ApiObjectType::Project,
            Self::ServiceInstance(_) => ApiObjectType::ServiceInstance,
            Self::ServiceTemplate(_) => ApiObjectType::ServiceTemplate,
            Self::VirtualMachine(_) => ApiObjectType::VirtualMachine,
            Self::VirtualMachineInterface(_) => ApiObjectType::VirtualMachineInterface,
            Self::VirtualNetwork(_) => ApiObjectType::VirtualNetwork,
        }
    }

    /// Every outgoing reference held by this body.
    pub fn references_mut(&mut self) -> Vec<&mut ObjectReference> {
        match self {
            Self::VirtualNetwork(vn) => vn
                .network_ipam_refs
                .iter_mut()
                .map(|r| &mut r.ipam)
                .chain(vn.network_policy_refs.iter_mut())
                .collect(),
            Self::VirtualMachine(vm) => vm.service_instance_refs.iter_mut().collect(),
            Self::VirtualMachineInterface(vmi) => vmi
                .virtual_machine_refs
                .iter_mut()
                .chain(vmi.virtual_network_refs.iter_mut())
                .collect(),
            Self::InstanceIp(iip) => iip
                .virtual_network_refs
                .iter_mut()
                .chain(iip.virtual_machine_interface_refs.iter_mut())
                .collect(),
            Self::FloatingIp(fip) => fip.virtual_machine_interface_refs.iter_mut().collect(),
            Self::ServiceInstance(si) => si.service_template_refs.iter_mut().collect(),
            Self::FloatingIpPool(_)
            | Self::NetworkIpam(_)
            | Self::NetworkPolicy(_)
            | Self::Project(_)
            | Self::ServiceTemplate(_) => Vec::new(),
        }
    }
}

/// A controller object: identity header plus typed body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiObject {
    pub uuid: Option<String>,
    pub fq_name: Vec<String>,
    pub parent_uuid: Option<String>,
    pub display_name: Option<String>,
    pub body: ApiObjectBody,
}

impl ApiObject {
    /// A transient object that has not been created yet.
    pub const fn new(fq_name: Vec<String>, body: ApiObjectBody) -> Self {
        Self {
            uuid: None,
            fq_name,
            parent_uuid: None,
            display_name: None,
            body,
        }
    }

    #[must_use]
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent_uuid: Option<String>) -> Self {
        self.parent_uuid = parent_uuid;
        self
    }

    pub const fn kind(&self) -> ApiObjectType {
        self.body.kind()
    }

    /// Last component of the fq-name.
    pub fn name(&self) -> &str {
        self.fq_name.last().map_or("", String::as_str)
    }

    pub fn fq_name_string(&self) -> String {
        self.fq_name.join(":")
    }

    /// A reference to this object carrying everything known about it.
    pub fn reference(&self) -> ObjectReference {
        ObjectReference::new(self.uuid.clone(), self.fq_name.clone())
    }

    /// Short human-readable description for logs and errors.
    pub fn describe(&self) -> String {
        format!("{} {}", self.kind(), self.fq_name_string())
    }

    pub const fn as_virtual_network(&self) -> Option<&VirtualNetwork> {
        match &self.body {
            ApiObjectBody::VirtualNetwork(vn) => Some(vn),
            _ => None,
        }
    }

    pub const fn as_virtual_machine(&self) -> Option<&VirtualMachine> {
        match &self.body {
            ApiObjectBody::VirtualMachine(vm) => Some(vm),
            _ => None,
        }
    }

    pub const fn as_virtual_machine_interface(&self) -> Option<&VirtualMachineInterface> {
        match &self.body {
            ApiObjectBody::VirtualMachineInterface(vmi) => Some(vmi),
            _ => None,
        }
    }

    pub const fn as_instance_ip(&self) -> Option<&InstanceIp> {
        match &self.body {
            ApiObjectBody::InstanceIp(iip) => Some(iip),
            _ => None,
        }
    }

    pub const fn as_floating_ip(&self) -> Option<&FloatingIp> {
        match &self.body {
            ApiObjectBody::FloatingIp(fip) => Some(fip),
            _ => None,
        }
    }

    pub const fn as_network_policy(&self) -> Option<&NetworkPolicy> {
        match &self.body {
            ApiObjectBody::NetworkPolicy(policy) => Some(policy),
            _ => None,
        }
    }

    pub const fn as_service_instance(&self) -> Option<&ServiceInstance> {
        match &self.body {
            ApiObjectBody::ServiceInstance(si) => Some(si),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipam_subnet_display() {
        let subnet = IpamSubnet::new(
            Ipv4Addr::new(10, 0, 1, 0),
            24,
            Some(Ipv4Addr::new(10, 0, 1, 254)),
        );
        assert_eq!(subnet.to_string(), "10.0.1.0/24 gw 10.0.1.254");
    }

    #[test]
    fn test_object_header() {
        let obj = ApiObject::new(
            vec!["default-domain".into(), "default-project".into(), "web".into()],
            ApiObjectBody::VirtualNetwork(VirtualNetwork::default()),
        )
        .with_uuid("net-1");

        assert_eq!(obj.kind(), ApiObjectType::VirtualNetwork);
        assert_eq!(obj.name(), "web");
        assert_eq!(obj.describe(), "virtual-network default-domain:default-project:web");
        assert_eq!(obj.reference().uuid.as_deref(), Some("net-1"));
        assert!(obj.as_virtual_network().is_some());
        assert!(obj.as_virtual_machine().is_none());
    }

    #[test]
    fn test_references_mut_covers_both_parents() {
        let mut body = ApiObjectBody::VirtualMachineInterface(VirtualMachineInterface {
            virtual_machine_refs: vec![ObjectReference::by_uuid("vm-1")],
            virtual_network_refs: vec![ObjectReference::by_uuid("net-1")],
            ..VirtualMachineInterface::default()
        });
        assert_eq!(body.references_mut().len(), 2);
    }

    #[test]
    fn test_wire_shape_uses_controller_names() -> Result<(), serde_json::Error> {
        let rule = PolicyRule {
            direction: PolicyDirection::Bidirectional,
            protocol: "any".into(),
            src_addresses: vec![AddressMatch::Any],
            src_ports: vec![PortRange::any()],
            dst_addresses: vec![AddressMatch::VirtualNetwork("d:p:right".into())],
            dst_ports: vec![PortRange::any()],
            action: SimpleAction::Pass,
            apply_service: vec![],
        };
        let value = serde_json::to_value(&rule)?;
        assert_eq!(value["direction"], "<>");
        assert_eq!(value["action"], "pass");
        assert_eq!(value["dst_addresses"][0]["virtual-network"], "d:p:right");

        let obj = ApiObject::new(
            vec!["d".into(), "p".into(), "web".into()],
            ApiObjectBody::VirtualNetwork(VirtualNetwork::default()),
        );
        let value = serde_json::to_value(&obj)?;
        assert_eq!(value["body"]["type"], "virtual-network");

        let back: ApiObject = serde_json::from_value(value)?;
        assert_eq!(back, obj);
        Ok(())
    }
}
