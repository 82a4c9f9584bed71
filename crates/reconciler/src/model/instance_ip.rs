//! Instance IP: the address assigned to one VM interface.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;
use vnc_core::ResultExt;

use crate::api::object::InstanceIp;
use crate::api::{ApiObject, ApiObjectBody, ApiObjectType, ObjectReference};
use crate::controller::ModelController;
use crate::error::Result;
use crate::model::graph::ModelGraph;
use crate::model::key::ModelKey;
use crate::model::node::ModelNode;
use crate::model::object::{
    delete_logged, ensure_initialized, ensure_same_identity, push, resolve_by_fqn, ModelObject,
};

#[derive(Default)]
struct InstanceIpState {
    initialized: bool,
    address: Option<Ipv4Addr>,
    vmi_uuid: Option<String>,
    network: Option<ObjectReference>,
    handle: Option<ApiObject>,
}

/// Address assignment of one NIC, keyed by `<vmName>-<deviceId>`.
pub struct InstanceIpModel {
    name: String,
    graph: ModelGraph,
    state: Mutex<InstanceIpState>,
}

impl InstanceIpModel {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            graph: ModelGraph::new(ModelKey::InstanceIp(name.clone())),
            name,
            state: Mutex::new(InstanceIpState::default()),
        }
    }

    /// Key an instance IP would have for a VM's device.
    pub fn key_for(vm_name: &str, device_id: u32) -> ModelKey {
        ModelKey::InstanceIp(format!("{vm_name}-{device_id}"))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set desired state: the address, the owning interface and its network.
    pub async fn configure(
        &self,
        address: Ipv4Addr,
        vmi_uuid: impl Into<String>,
        network: ObjectReference,
    ) {
        let mut state = self.state.lock().await;
        state.address = Some(address);
        state.vmi_uuid = Some(vmi_uuid.into());
        state.network = Some(network);
        state.initialized = true;
    }

    pub async fn address(&self) -> Option<Ipv4Addr> {
        self.state.lock().await.address
    }

    fn fq_name(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    fn desired_body(state: &InstanceIpState) -> InstanceIp {
        InstanceIp {
            address: state.address,
            virtual_network_refs: state.network.iter().cloned().collect(),
            virtual_machine_interface_refs: state
                .vmi_uuid
                .iter()
                .map(ObjectReference::by_uuid)
                .collect(),
        }
    }
}

/// Same address on the same interface.
fn assignment_matches(desired: &InstanceIp, actual: &InstanceIp) -> bool {
    let interface = |iip: &InstanceIp| {
        iip.virtual_machine_interface_refs
            .first()
            .and_then(|r| r.uuid.clone())
    };
    desired.address == actual.address && interface(desired) == interface(actual)
}

#[async_trait]
impl ModelObject for InstanceIpModel {
    fn graph(&self) -> &ModelGraph {
        &self.graph
    }

    async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    async fn update(&self, controller: &ModelController) -> Result<()> {
        let mut state = self.state.lock().await;
        ensure_initialized(state.initialized, self.key())?;

        let fq_name = self.fq_name();
        let (mut obj, exists) = resolve_by_fqn(
            controller.api(),
            state.handle.as_ref(),
            ApiObjectType::InstanceIp,
            &fq_name,
            || {
                ApiObject::new(
                    fq_name.clone(),
                    ApiObjectBody::InstanceIp(InstanceIp::default()),
                )
            },
        )
        .await?;
        obj.body = ApiObjectBody::InstanceIp(Self::desired_body(&state));
        push(controller.api(), &mut obj, exists).await?;
        state.handle = Some(obj);
        Ok(())
    }

    async fn verify(&self, controller: &ModelController) -> Result<bool> {
        let mut state = self.state.lock().await;
        ensure_initialized(state.initialized, self.key())?;

        let remote = controller
            .api()
            .find_by_fqn(ApiObjectType::InstanceIp, &self.fq_name())
            .await?;
        let Some(actual) = remote.as_ref().and_then(ApiObject::as_instance_ip) else {
            warn!(key = %self.key(), "Instance ip missing from controller");
            state.handle = None;
            return Ok(false);
        };
        Ok(assignment_matches(&Self::desired_body(&state), actual))
    }

    async fn compare(&self, controller: &ModelController, other: &ModelNode) -> Result<bool> {
        ensure_same_identity(self.key(), other)?;
        let Some(other) = other.as_instance_ip() else {
            return Ok(false);
        };
        let remote = controller
            .api()
            .find_by_fqn(ApiObjectType::InstanceIp, &other.fq_name())
            .await?;
        let desired = Self::desired_body(&*self.state.lock().await);
        Ok(remote
            .as_ref()
            .and_then(ApiObject::as_instance_ip)
            .is_some_and(|actual| assignment_matches(&desired, actual)))
    }

    async fn delete(&self, controller: &ModelController) {
        let handle = self.state.lock().await.handle.take();
        let target = match handle {
            Some(handle) => Some(handle),
            None => controller
                .api()
                .find_by_fqn(ApiObjectType::InstanceIp, &self.fq_name())
                .await
                .into_option_logged("resolve instance ip for delete")
                .flatten(),
        };
        if let Some(obj) = target {
            delete_logged(controller.api(), &obj).await;
        }
    }

    async fn destroy(&self, controller: &ModelController) {
        self.delete(controller).await;
        self.graph.detach_from_owners();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_key_for_device() {
        assert_eq!(
            InstanceIpModel::key_for("i-2-1-VM", 0),
            ModelKey::InstanceIp("i-2-1-VM-0".into())
        );
    }

    #[tokio::test]
    async fn test_configure_initializes() {
        let iip = InstanceIpModel::new("i-2-1-VM-0");
        assert!(!iip.is_initialized().await);
        iip.configure(
            Ipv4Addr::new(192, 168, 0, 10),
            "nic-1",
            ObjectReference::by_uuid("net-1"),
        )
        .await;
        assert!(iip.is_initialized().await);
        assert_eq!(iip.address().await, Some(Ipv4Addr::new(192, 168, 0, 10)));
    }

    #[test]
    fn test_assignment_matches_ignores_network_ref_shape() {
        let desired = InstanceIp {
            address: Some(Ipv4Addr::new(10, 0, 0, 5)),
            virtual_network_refs: vec![ObjectReference::by_fq_name(vec!["a".into()])],
            virtual_machine_interface_refs: vec![ObjectReference::by_uuid("nic-1")],
        };
        let mut actual = desired.clone();
        actual.virtual_network_refs = vec![ObjectReference::by_uuid("net-1")];
        assert!(assignment_matches(&desired, &actual));

        actual.address = Some(Ipv4Addr::new(10, 0, 0, 6));
        assert!(!assignment_matches(&desired, &actual));
    }
}
