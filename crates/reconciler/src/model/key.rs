//! Identity keys and the total order over model nodes.
//!
//! Variants are declared in type-name order so the derived `Ord` compares
//! nodes of different types by type first and by identity second. That gives
//! successor sets holding mixed node types one deterministic iteration order.

use std::fmt;

/// Identity of a virtual network.
///
/// Controller-owned networks are known only by their fq-name; orchestrator
/// networks by uuid. Static networks sort before dynamic ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NetworkKey {
    /// Controller-owned network, by colon-joined fq-name.
    Static(String),
    /// Orchestrator-owned network, by uuid.
    Dynamic(String),
}

impl NetworkKey {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Static(fq_name) => fq_name,
            Self::Dynamic(uuid) => uuid,
        }
    }

    pub const fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic(_))
    }
}

impl fmt::Display for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a model node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModelKey {
    /// Floating IP, by uuid.
    FloatingIp(String),
    /// At most one pool exists per network.
    FloatingIpPool,
    /// Instance IP, by `<vmName>-<deviceId>`.
    InstanceIp(String),
    /// Network policy, by uuid.
    NetworkPolicy(String),
    /// Service instance, by colon-joined fq-name.
    ServiceInstance(String),
    /// Virtual machine, by uuid.
    VirtualMachine(String),
    VirtualNetwork(NetworkKey),
    /// VM interface, by uuid.
    VmInterface(String),
}

impl ModelKey {
    /// Name of the node type this key identifies.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::FloatingIp(_) => "floating-ip",
            Self::FloatingIpPool => "floating-ip-pool",
            Self::InstanceIp(_) => "instance-ip",
            Self::NetworkPolicy(_) => "network-policy",
            Self::ServiceInstance(_) => "service-instance",
            Self::VirtualMachine(_) => "virtual-machine",
            Self::VirtualNetwork(_) => "virtual-network",
            Self::VmInterface(_) => "vm-interface",
        }
    }

    /// The identity within the type. Empty for singletons.
    pub fn id(&self) -> &str {
        match self {
            Self::FloatingIp(id)
            | Self::InstanceIp(id)
            | Self::NetworkPolicy(id)
            | Self::ServiceInstance(id)
            | Self::VirtualMachine(id)
            | Self::VmInterface(id) => id,
            Self::VirtualNetwork(key) => key.as_str(),
            Self::FloatingIpPool => "",
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FloatingIpPool => f.write_str(self.type_name()),
            _ => write!(f, "{}:{}", self.type_name(), self.id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_networks_sort_first() {
        let fabric = NetworkKey::Static("default-domain:default-project:ip-fabric".into());
        let guest = NetworkKey::Dynamic("0000".into());
        assert!(fabric < guest);
    }

    #[test]
    fn test_same_type_orders_by_identity() {
        let a = ModelKey::VmInterface("nic-a".into());
        let b = ModelKey::VmInterface("nic-b".into());
        assert!(a < b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_cross_type_orders_by_type_name() {
        let keys = [
            ModelKey::FloatingIp("z".into()),
            ModelKey::FloatingIpPool,
            ModelKey::InstanceIp("a".into()),
            ModelKey::NetworkPolicy("a".into()),
            ModelKey::ServiceInstance("a".into()),
            ModelKey::VirtualMachine("a".into()),
            ModelKey::VirtualNetwork(NetworkKey::Static("a".into())),
            ModelKey::VmInterface("a".into()),
        ];
        assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(keys.windows(2).all(|pair| pair[0].type_name() < pair[1].type_name()));
    }

    #[test]
    fn test_singleton_pool_key_is_unique() {
        assert_eq!(ModelKey::FloatingIpPool, ModelKey::FloatingIpPool);
        assert_eq!(ModelKey::FloatingIpPool.to_string(), "floating-ip-pool");
    }

    #[test]
    fn test_display() {
        let key = ModelKey::VirtualNetwork(NetworkKey::Dynamic("net-1".into()));
        assert_eq!(key.to_string(), "virtual-network:net-1");
    }
}
