//! VM interface: one NIC, owned by a virtual machine and a virtual network.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use vnc_core::NicRecord;

use crate::api::object::VirtualMachineInterface;
use crate::api::{ApiObject, ApiObjectBody, ApiObjectType, ObjectReference};
use crate::controller::ModelController;
use crate::error::{Error, Result};
use crate::model::graph::ModelGraph;
use crate::model::instance_ip::InstanceIpModel;
use crate::model::key::{ModelKey, NetworkKey};
use crate::model::node::ModelNode;
use crate::model::object::{
    delete_by_id_logged, delete_successors, destroy_successors, ensure_initialized,
    ensure_same_identity, push, resolve_by_id, update_successors, verify_successors, ModelObject,
};
use crate::model::virtual_machine::VirtualMachineModel;
use crate::model::virtual_network::VirtualNetworkModel;

#[derive(Default)]
struct InterfaceState {
    initialized: bool,
    vm_uuid: String,
    vm_name: String,
    device_id: u32,
    mac: String,
    service_tag: Option<String>,
    nic_active: bool,
    net_active: bool,
    network_key: Option<NetworkKey>,
    network: Option<ObjectReference>,
    /// Instance IPs unwired by `build`, deleted on the next update.
    released: Vec<Arc<InstanceIpModel>>,
    handle: Option<ApiObject>,
}

impl InterfaceState {
    const fn is_active(&self) -> bool {
        self.nic_active && self.net_active
    }

    fn desired_body(&self, network: Option<ObjectReference>) -> VirtualMachineInterface {
        VirtualMachineInterface {
            mac_addresses: vec![self.mac.clone()],
            virtual_machine_refs: vec![ObjectReference::by_uuid(self.vm_uuid.clone())],
            virtual_network_refs: network.into_iter().collect(),
            service_interface_type: self.service_tag.clone(),
        }
    }
}

/// A NIC. Pushed to the controller only while both the NIC and its network
/// are active.
pub struct VmInterfaceModel {
    uuid: String,
    graph: ModelGraph,
    state: Mutex<InterfaceState>,
}

impl VmInterfaceModel {
    pub fn new(uuid: impl Into<String>) -> Self {
        let uuid = uuid.into();
        Self {
            graph: ModelGraph::new(ModelKey::VmInterface(uuid.clone())),
            uuid,
            state: Mutex::new(InterfaceState::default()),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn add_to_virtual_machine(self: &Arc<Self>, vm: &VirtualMachineModel) -> bool {
        vm.graph().add_successor(ModelNode::from(self.clone()))
    }

    pub fn add_to_virtual_network(self: &Arc<Self>, network: &VirtualNetworkModel) -> bool {
        network.graph().add_successor(ModelNode::from(self.clone()))
    }

    pub fn instance_ip(&self) -> Option<Arc<InstanceIpModel>> {
        self.graph
            .filter_successors(ModelNode::as_instance_ip)
            .into_iter()
            .next()
    }

    pub async fn mac(&self) -> String {
        self.state.lock().await.mac.clone()
    }

    /// Whether both the NIC and its network are active.
    pub async fn is_active(&self) -> bool {
        self.state.lock().await.is_active()
    }

    pub async fn service_tag(&self) -> Option<String> {
        self.state.lock().await.service_tag.clone()
    }

    /// Mark this interface as a service-VM interface (`left`, `right`, ...).
    pub async fn set_service_tag(&self, tag: Option<String>) {
        self.state.lock().await.service_tag = tag;
    }

    /// Populate from the NIC record and its owners.
    ///
    /// Wires an instance IP while the NIC has an address and unwires it once
    /// the address is gone. An unwired instance IP is deleted remotely by the
    /// next `update` or `delete`.
    pub async fn build(
        &self,
        controller: &ModelController,
        vm: &VirtualMachineModel,
        network: &VirtualNetworkModel,
        nic: &NicRecord,
    ) -> Result<()> {
        let network_record = controller
            .store()
            .network(nic.network_id)
            .await?
            .ok_or_else(|| Error::not_found("network", nic.network_id))?;
        let network_ref = network.reference().await;

        let service_tag = match vm.service_instance().await {
            Some(fq_name) => match controller.database().lookup_service_instance(&fq_name) {
                Some(si) => Some(
                    si.interface_type_for(&network_ref.fq_name_string())
                        .await
                        .to_string(),
                ),
                None => None,
            },
            None => None,
        };

        let vm_name = vm.instance_name().to_string();
        {
            let mut state = self.state.lock().await;
            state.vm_uuid = vm.uuid().to_string();
            state.vm_name.clone_from(&vm_name);
            state.device_id = nic.device_id;
            state.mac.clone_from(&nic.mac_address);
            state.nic_active = nic.state.is_active();
            state.net_active = network_record.state.is_active();
            state.network_key = Some(network.network_key().clone());
            state.network = Some(network_ref.clone());
            if service_tag.is_some() {
                state.service_tag = service_tag;
            }
            state.initialized = true;
        }

        match nic.ipv4_address {
            Some(address) => {
                let iip = self.instance_ip().unwrap_or_else(|| {
                    Arc::new(InstanceIpModel::new(format!("{vm_name}-{}", nic.device_id)))
                });
                iip.configure(address, self.uuid.clone(), network_ref).await;
                self.graph.add_successor(ModelNode::from(iip));
            }
            None => {
                if let Some(iip) = self.instance_ip() {
                    debug!(key = %self.graph.key(), "Address released, unwiring instance ip");
                    self.graph.remove_successor(iip.graph().key());
                    self.state.lock().await.released.push(iip);
                }
            }
        }
        Ok(())
    }

    /// The network reference to write, resolving the network remotely first.
    async fn resolve_network(
        &self,
        controller: &ModelController,
        key: Option<NetworkKey>,
        cached: Option<ObjectReference>,
    ) -> Result<Option<ObjectReference>> {
        match key.and_then(|key| controller.database().lookup_virtual_network(&key)) {
            Some(network) => Ok(Some(network.ensure_resolved(controller).await?)),
            None => Ok(cached),
        }
    }

    async fn delete_released(&self, controller: &ModelController) {
        let released = std::mem::take(&mut self.state.lock().await.released);
        for iip in released {
            iip.delete(controller).await;
        }
    }

    async fn fetch(&self, controller: &ModelController) -> Result<Option<VirtualMachineInterface>> {
        let remote = controller
            .api()
            .find_by_id(ApiObjectType::VirtualMachineInterface, &self.uuid)
            .await?;
        Ok(remote
            .as_ref()
            .and_then(ApiObject::as_virtual_machine_interface)
            .cloned())
    }
}

fn interface_matches(desired: &VirtualMachineInterface, actual: &VirtualMachineInterface) -> bool {
    let vm = |vmi: &VirtualMachineInterface| vmi.virtual_machine_refs.first().and_then(|r| r.uuid.clone());
    desired.mac_addresses == actual.mac_addresses
        && vm(desired) == vm(actual)
        && desired.service_interface_type == actual.service_interface_type
}

#[async_trait]
impl ModelObject for VmInterfaceModel {
    fn graph(&self) -> &ModelGraph {
        &self.graph
    }

    async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    async fn update(&self, controller: &ModelController) -> Result<()> {
        let (active, network_key, cached_network) = {
            let state = self.state.lock().await;
            ensure_initialized(state.initialized, self.key())?;
            (state.is_active(), state.network_key.clone(), state.network.clone())
        };

        if !active {
            debug!(key = %self.key(), "Interface inactive, removing from controller");
            self.delete(controller).await;
            return Ok(());
        }

        let network = self
            .resolve_network(controller, network_key, cached_network)
            .await?;
        {
            let mut state = self.state.lock().await;
            let (mut obj, exists) = resolve_by_id(
                controller.api(),
                state.handle.as_ref(),
                ApiObjectType::VirtualMachineInterface,
                &self.uuid,
                || {
                    ApiObject::new(
                        vec![state.vm_uuid.clone(), self.uuid.clone()],
                        ApiObjectBody::VirtualMachineInterface(VirtualMachineInterface::default()),
                    )
                    .with_uuid(self.uuid.clone())
                    .with_parent(Some(state.vm_uuid.clone()))
                },
            )
            .await?;
            obj.body = ApiObjectBody::VirtualMachineInterface(state.desired_body(network.clone()));
            push(controller.api(), &mut obj, exists).await?;
            state.network = network;
            state.handle = Some(obj);
        }
        self.delete_released(controller).await;
        update_successors(&self.graph, controller).await
    }

    async fn verify(&self, controller: &ModelController) -> Result<bool> {
        let (active, desired) = {
            let state = self.state.lock().await;
            ensure_initialized(state.initialized, self.key())?;
            (state.is_active(), state.desired_body(state.network.clone()))
        };
        let remote = self.fetch(controller).await?;
        if !active {
            if remote.is_some() {
                warn!(key = %self.key(), "Inactive interface still present in controller");
            }
            return Ok(remote.is_none());
        }
        let Some(actual) = remote else {
            warn!(key = %self.key(), "Interface missing from controller");
            self.state.lock().await.handle = None;
            return Ok(false);
        };
        if !interface_matches(&desired, &actual) {
            warn!(key = %self.key(), "Interface drifted");
            return Ok(false);
        }
        verify_successors(&self.graph, controller).await
    }

    async fn compare(&self, controller: &ModelController, other: &ModelNode) -> Result<bool> {
        ensure_same_identity(self.key(), other)?;
        let Some(other) = other.as_vm_interface() else {
            return Ok(false);
        };
        let desired = {
            let state = self.state.lock().await;
            state.desired_body(state.network.clone())
        };
        Ok(other
            .fetch(controller)
            .await?
            .is_some_and(|actual| interface_matches(&desired, &actual)))
    }

    async fn delete(&self, controller: &ModelController) {
        self.delete_released(controller).await;
        delete_successors(&self.graph, controller).await;
        self.state.lock().await.handle = None;
        delete_by_id_logged(
            controller.api(),
            ApiObjectType::VirtualMachineInterface,
            &self.uuid,
        )
        .await;
    }

    async fn destroy(&self, controller: &ModelController) {
        self.delete(controller).await;
        destroy_successors(&self.graph, controller).await;
        self.graph.detach_from_owners();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(mac: &str, vm: &str) -> VirtualMachineInterface {
        VirtualMachineInterface {
            mac_addresses: vec![mac.to_string()],
            virtual_machine_refs: vec![ObjectReference::by_uuid(vm)],
            virtual_network_refs: Vec::new(),
            service_interface_type: None,
        }
    }

    #[test]
    fn test_interface_matches_on_mac_and_vm() {
        let desired = body("02:00:00:00:00:01", "vm-1");
        assert!(interface_matches(&desired, &desired.clone()));
        assert!(!interface_matches(&desired, &body("02:00:00:00:00:02", "vm-1")));
        assert!(!interface_matches(&desired, &body("02:00:00:00:00:01", "vm-2")));
    }

    #[test]
    fn test_inactive_unless_nic_and_network_active() {
        let mut state = InterfaceState {
            nic_active: true,
            ..InterfaceState::default()
        };
        assert!(!state.is_active());
        state.net_active = true;
        assert!(state.is_active());
    }

    #[tokio::test]
    async fn test_service_tag() {
        let vmi = VmInterfaceModel::new("nic-1");
        vmi.set_service_tag(Some("left".into())).await;
        assert_eq!(vmi.service_tag().await.as_deref(), Some("left"));
    }
}
