//! Registry of graph roots.
//!
//! One table per independent resource family. Lookups are by natural key;
//! `locate_*` is an atomic find-or-create.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::model::{
    ModelKey, ModelNode, NetworkKey, NetworkPolicyModel, ServiceInstanceModel,
    VirtualMachineModel, VirtualNetworkModel,
};

/// Root lookup tables shared by every reconciliation.
#[derive(Default)]
pub struct ModelDatabase {
    service_instances: RwLock<BTreeMap<String, Arc<ServiceInstanceModel>>>,
    virtual_machines: RwLock<BTreeMap<String, Arc<VirtualMachineModel>>>,
    virtual_networks: RwLock<BTreeMap<NetworkKey, Arc<VirtualNetworkModel>>>,
    network_policies: RwLock<BTreeMap<String, Arc<NetworkPolicyModel>>>,
}

impl ModelDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    // Service instances, by colon-joined fq-name.

    pub fn lookup_service_instance(&self, fq_name: &str) -> Option<Arc<ServiceInstanceModel>> {
        self.service_instances.read().get(fq_name).cloned()
    }

    pub fn locate_service_instance(&self, fq_name: &[String]) -> Arc<ServiceInstanceModel> {
        self.service_instances
            .write()
            .entry(fq_name.join(":"))
            .or_insert_with(|| Arc::new(ServiceInstanceModel::new(fq_name.to_vec())))
            .clone()
    }

    /// Insert unless present. Returns the registered instance.
    pub fn insert_service_instance(
        &self,
        si: Arc<ServiceInstanceModel>,
    ) -> Arc<ServiceInstanceModel> {
        self.service_instances
            .write()
            .entry(si.fq_name_string())
            .or_insert(si)
            .clone()
    }

    pub fn remove_service_instance(&self, fq_name: &str) -> Option<Arc<ServiceInstanceModel>> {
        self.service_instances.write().remove(fq_name)
    }

    pub fn list_service_instances(&self) -> Vec<Arc<ServiceInstanceModel>> {
        self.service_instances.read().values().cloned().collect()
    }

    // Virtual machines, by uuid.

    pub fn lookup_virtual_machine(&self, uuid: &str) -> Option<Arc<VirtualMachineModel>> {
        self.virtual_machines.read().get(uuid).cloned()
    }

    pub fn locate_virtual_machine(
        &self,
        uuid: &str,
        instance_name: &str,
    ) -> Arc<VirtualMachineModel> {
        self.virtual_machines
            .write()
            .entry(uuid.to_string())
            .or_insert_with(|| Arc::new(VirtualMachineModel::new(uuid, instance_name)))
            .clone()
    }

    /// Register a built VM. An entry registered first wins.
    pub fn insert_virtual_machine(&self, vm: Arc<VirtualMachineModel>) -> Arc<VirtualMachineModel> {
        self.virtual_machines
            .write()
            .entry(vm.uuid().to_string())
            .or_insert(vm)
            .clone()
    }

    pub fn remove_virtual_machine(&self, uuid: &str) -> Option<Arc<VirtualMachineModel>> {
        self.virtual_machines.write().remove(uuid)
    }

    pub fn list_virtual_machines(&self) -> Vec<Arc<VirtualMachineModel>> {
        self.virtual_machines.read().values().cloned().collect()
    }

    // Virtual networks, by network key.

    pub fn lookup_virtual_network(&self, key: &NetworkKey) -> Option<Arc<VirtualNetworkModel>> {
        self.virtual_networks.read().get(key).cloned()
    }

    pub fn locate_virtual_network(&self, key: &NetworkKey) -> Arc<VirtualNetworkModel> {
        self.virtual_networks
            .write()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(VirtualNetworkModel::new(key.clone())))
            .clone()
    }

    /// Register a built network. An entry registered first wins.
    pub fn insert_virtual_network(&self, network: Arc<VirtualNetworkModel>) -> Arc<VirtualNetworkModel> {
        self.virtual_networks
            .write()
            .entry(network.network_key().clone())
            .or_insert(network)
            .clone()
    }

    pub fn remove_virtual_network(&self, key: &NetworkKey) -> Option<Arc<VirtualNetworkModel>> {
        self.virtual_networks.write().remove(key)
    }

    pub fn list_virtual_networks(&self) -> Vec<Arc<VirtualNetworkModel>> {
        self.virtual_networks.read().values().cloned().collect()
    }

    /// Find a network by fq-name.
    pub async fn lookup_virtual_network_by_fq_name(
        &self,
        fq_name: &[String],
    ) -> Option<Arc<VirtualNetworkModel>> {
        for network in self.list_virtual_networks() {
            if network.fq_name().await == fq_name {
                return Some(network);
            }
        }
        None
    }

    // Network policies, by uuid.

    pub fn lookup_network_policy(&self, uuid: &str) -> Option<Arc<NetworkPolicyModel>> {
        self.network_policies.read().get(uuid).cloned()
    }

    pub fn locate_network_policy(&self, uuid: &str, fq_name: &[String]) -> Arc<NetworkPolicyModel> {
        self.network_policies
            .write()
            .entry(uuid.to_string())
            .or_insert_with(|| Arc::new(NetworkPolicyModel::new(uuid, fq_name.to_vec())))
            .clone()
    }

    pub fn insert_network_policy(&self, policy: Arc<NetworkPolicyModel>) {
        self.network_policies
            .write()
            .insert(policy.uuid().to_string(), policy);
    }

    pub fn remove_network_policy(&self, uuid: &str) -> Option<Arc<NetworkPolicyModel>> {
        self.network_policies.write().remove(uuid)
    }

    pub fn list_network_policies(&self) -> Vec<Arc<NetworkPolicyModel>> {
        self.network_policies.read().values().cloned().collect()
    }

    /// Resolve a root by key. Non-root keys resolve to nothing.
    pub fn lookup_node(&self, key: &ModelKey) -> Option<ModelNode> {
        match key {
            ModelKey::ServiceInstance(fq_name) => {
                self.lookup_service_instance(fq_name).map(ModelNode::from)
            }
            ModelKey::VirtualMachine(uuid) => self.lookup_virtual_machine(uuid).map(ModelNode::from),
            ModelKey::VirtualNetwork(key) => self.lookup_virtual_network(key).map(ModelNode::from),
            ModelKey::NetworkPolicy(uuid) => self.lookup_network_policy(uuid).map(ModelNode::from),
            ModelKey::FloatingIp(_)
            | ModelKey::FloatingIpPool
            | ModelKey::InstanceIp(_)
            | ModelKey::VmInterface(_) => None,
        }
    }

    /// Roots reconciled independently: networks, then service instances,
    /// then virtual machines. Policies are reached through their networks.
    pub fn roots(&self) -> Vec<ModelNode> {
        let networks = self.list_virtual_networks().into_iter().map(ModelNode::from);
        let instances = self.list_service_instances().into_iter().map(ModelNode::from);
        let machines = self.list_virtual_machines().into_iter().map(ModelNode::from);
        networks.chain(instances).chain(machines).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_is_find_or_create() {
        let database = ModelDatabase::new();
        let first = database.locate_virtual_machine("vm-1", "i-2-1-VM");
        let second = database.locate_virtual_machine("vm-1", "ignored");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.instance_name(), "i-2-1-VM");
    }

    #[test]
    fn test_lookup_node_by_key() {
        let database = ModelDatabase::new();
        let key = NetworkKey::Dynamic("net-1".into());
        database.locate_virtual_network(&key);

        assert!(database
            .lookup_node(&ModelKey::VirtualNetwork(key.clone()))
            .is_some());
        assert!(database
            .lookup_node(&ModelKey::VmInterface("nic-1".into()))
            .is_none());

        database.remove_virtual_network(&key);
        assert!(database.lookup_node(&ModelKey::VirtualNetwork(key)).is_none());
    }

    #[test]
    fn test_insert_service_instance_keeps_existing() {
        let database = ModelDatabase::new();
        let fq: Vec<String> = vec!["d".into(), "p".into(), "fw".into()];
        let registered = database.locate_service_instance(&fq);
        let duplicate = Arc::new(ServiceInstanceModel::new(fq));
        let kept = database.insert_service_instance(duplicate);
        assert!(Arc::ptr_eq(&registered, &kept));
    }

    #[test]
    fn test_roots_order() {
        let database = ModelDatabase::new();
        database.locate_virtual_machine("vm-1", "i-2-1-VM");
        database.locate_virtual_network(&NetworkKey::Dynamic("net-1".into()));
        let roots = database.roots();
        assert!(roots[0].as_virtual_network().is_some());
        assert!(roots[1].as_virtual_machine().is_some());
    }
}
