//! Closed set of model node types.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::controller::ModelController;
use crate::error::Result;
use crate::model::floating_ip::FloatingIpModel;
use crate::model::floating_ip_pool::FloatingIpPoolModel;
use crate::model::graph::ModelGraph;
use crate::model::instance_ip::InstanceIpModel;
use crate::model::key::ModelKey;
use crate::model::network_policy::NetworkPolicyModel;
use crate::model::object::ModelObject;
use crate::model::service_instance::ServiceInstanceModel;
use crate::model::virtual_machine::VirtualMachineModel;
use crate::model::virtual_network::VirtualNetworkModel;
use crate::model::vm_interface::VmInterfaceModel;

/// A shared handle to any model node.
///
/// Equality, ordering and hashing follow the node's [`ModelKey`].
#[derive(Clone)]
pub enum ModelNode {
    FloatingIp(Arc<FloatingIpModel>),
    FloatingIpPool(Arc<FloatingIpPoolModel>),
    InstanceIp(Arc<InstanceIpModel>),
    NetworkPolicy(Arc<NetworkPolicyModel>),
    ServiceInstance(Arc<ServiceInstanceModel>),
    VirtualMachine(Arc<VirtualMachineModel>),
    VirtualNetwork(Arc<VirtualNetworkModel>),
    VmInterface(Arc<VmInterfaceModel>),
}

impl ModelNode {
    /// The shared lifecycle interface of the node.
    pub fn object(&self) -> &dyn ModelObject {
        match self {
            Self::FloatingIp(m) => m.as_ref(),
            Self::FloatingIpPool(m) => m.as_ref(),
            Self::InstanceIp(m) => m.as_ref(),
            Self::NetworkPolicy(m) => m.as_ref(),
            Self::ServiceInstance(m) => m.as_ref(),
            Self::VirtualMachine(m) => m.as_ref(),
            Self::VirtualNetwork(m) => m.as_ref(),
            Self::VmInterface(m) => m.as_ref(),
        }
    }

    pub fn key(&self) -> &ModelKey {
        self.graph().key()
    }

    pub fn graph(&self) -> &ModelGraph {
        self.object().graph()
    }

    pub async fn update(&self, controller: &ModelController) -> Result<()> {
        self.object().update(controller).await
    }

    pub async fn verify(&self, controller: &ModelController) -> Result<bool> {
        self.object().verify(controller).await
    }

    pub async fn compare(&self, controller: &ModelController, other: &Self) -> Result<bool> {
        self.object().compare(controller, other).await
    }

    pub async fn delete(&self, controller: &ModelController) {
        self.object().delete(controller).await;
    }

    pub async fn destroy(&self, controller: &ModelController) {
        self.object().destroy(controller).await;
    }

    pub const fn as_floating_ip(&self) -> Option<&Arc<FloatingIpModel>> {
        match self {
            Self::FloatingIp(m) => Some(m),
            _ => None,
        }
    }

    pub const fn as_floating_ip_pool(&self) -> Option<&Arc<FloatingIpPoolModel>> {
        match self {
            Self::FloatingIpPool(m) => Some(m),
            _ => None,
        }
    }

    pub const fn as_instance_ip(&self) -> Option<&Arc<InstanceIpModel>> {
        match self {
            Self::InstanceIp(m) => Some(m),
            _ => None,
        }
    }

    pub const fn as_network_policy(&self) -> Option<&Arc<NetworkPolicyModel>> {
        match self {
            Self::NetworkPolicy(m) => Some(m),
            _ => None,
        }
    }

    pub const fn as_service_instance(&self) -> Option<&Arc<ServiceInstanceModel>> {
        match self {
            Self::ServiceInstance(m) => Some(m),
            _ => None,
        }
    }

    pub const fn as_virtual_machine(&self) -> Option<&Arc<VirtualMachineModel>> {
        match self {
            Self::VirtualMachine(m) => Some(m),
            _ => None,
        }
    }

    pub const fn as_virtual_network(&self) -> Option<&Arc<VirtualNetworkModel>> {
        match self {
            Self::VirtualNetwork(m) => Some(m),
            _ => None,
        }
    }

    pub const fn as_vm_interface(&self) -> Option<&Arc<VmInterfaceModel>> {
        match self {
            Self::VmInterface(m) => Some(m),
            _ => None,
        }
    }
}

macro_rules! impl_from_model {
    ($($variant:ident => $model:ty),* $(,)?) => {
        $(
            impl From<Arc<$model>> for ModelNode {
                fn from(model: Arc<$model>) -> Self {
                    Self::$variant(model)
                }
            }
        )*
    };
}

impl_from_model! {
    FloatingIp => FloatingIpModel,
    FloatingIpPool => FloatingIpPoolModel,
    InstanceIp => InstanceIpModel,
    NetworkPolicy => NetworkPolicyModel,
    ServiceInstance => ServiceInstanceModel,
    VirtualMachine => VirtualMachineModel,
    VirtualNetwork => VirtualNetworkModel,
    VmInterface => VmInterfaceModel,
}

impl PartialEq for ModelNode {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ModelNode {}

impl PartialOrd for ModelNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ModelNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(other.key())
    }
}

impl Hash for ModelNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Debug for ModelNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModelNode").field(self.key()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_follows_key() {
        let a: ModelNode = Arc::new(VmInterfaceModel::new("nic-1")).into();
        let b: ModelNode = Arc::new(VmInterfaceModel::new("nic-1")).into();
        let c: ModelNode = Arc::new(VmInterfaceModel::new("nic-2")).into();
        assert_eq!(a, b);
        assert!(a < c);
    }

    #[test]
    fn test_filtered_accessors() {
        let node: ModelNode = Arc::new(InstanceIpModel::new("vm-0")).into();
        assert!(node.as_instance_ip().is_some());
        assert!(node.as_vm_interface().is_none());
        assert_eq!(format!("{node:?}"), "ModelNode(InstanceIp(\"vm-0\"))");
    }
}
