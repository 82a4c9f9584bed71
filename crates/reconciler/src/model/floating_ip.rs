//! Floating IP: a public address associated with one VM interface.

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;
use vnc_core::IpAddressRecord;

use crate::api::object::FloatingIp;
use crate::api::{ApiObject, ApiObjectBody, ApiObjectType, ObjectReference};
use crate::controller::ModelController;
use crate::error::{Error, Result};
use crate::model::floating_ip_pool::FloatingIpPoolModel;
use crate::model::graph::ModelGraph;
use crate::model::key::ModelKey;
use crate::model::node::ModelNode;
use crate::model::object::{
    delete_by_id_logged, ensure_initialized, ensure_same_identity, push, resolve_by_id, ModelObject,
};

#[derive(Default)]
struct FloatingIpState {
    initialized: bool,
    address: Option<Ipv4Addr>,
    vmi_uuid: Option<String>,
    pool_fq_name: Vec<String>,
    handle: Option<ApiObject>,
}

pub struct FloatingIpModel {
    uuid: String,
    graph: ModelGraph,
    state: Mutex<FloatingIpState>,
}

impl FloatingIpModel {
    pub fn new(uuid: impl Into<String>) -> Self {
        let uuid = uuid.into();
        Self {
            graph: ModelGraph::new(ModelKey::FloatingIp(uuid.clone())),
            uuid,
            state: Mutex::new(FloatingIpState::default()),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub async fn address(&self) -> Option<Ipv4Addr> {
        self.state.lock().await.address
    }

    pub async fn vmi_uuid(&self) -> Option<String> {
        self.state.lock().await.vmi_uuid.clone()
    }

    /// Wire this address under a pool.
    pub async fn add_to_pool(self: &Arc<Self>, pool: &FloatingIpPoolModel) -> bool {
        let pool_fq_name = pool.fq_name().await;
        self.state.lock().await.pool_fq_name = pool_fq_name;
        pool.graph().add_successor(ModelNode::from(self.clone()))
    }

    /// Populate from an allocated public address. The interface is the NIC
    /// the associated VM has on the associated network.
    pub async fn build(&self, controller: &ModelController, record: &IpAddressRecord) -> Result<()> {
        let vmi_uuid = match (record.associated_vm_id, record.associated_network_id) {
            (Some(vm_id), Some(network_id)) => controller
                .store()
                .nic_for_vm_on_network(vm_id, network_id)
                .await?
                .map(|nic| nic.uuid),
            _ => None,
        };
        let mut state = self.state.lock().await;
        state.address = Some(record.address);
        state.vmi_uuid = vmi_uuid;
        state.initialized = true;
        Ok(())
    }

    fn desired_body(state: &FloatingIpState) -> FloatingIp {
        FloatingIp {
            address: state.address,
            virtual_machine_interface_refs: state
                .vmi_uuid
                .iter()
                .map(ObjectReference::by_uuid)
                .collect(),
        }
    }

    async fn fetch(&self, controller: &ModelController) -> Result<Option<FloatingIp>> {
        let remote = controller
            .api()
            .find_by_id(ApiObjectType::FloatingIp, &self.uuid)
            .await?;
        Ok(remote.as_ref().and_then(ApiObject::as_floating_ip).cloned())
    }
}

fn association_matches(desired: &FloatingIp, actual: &FloatingIp) -> bool {
    let interface = |fip: &FloatingIp| {
        fip.virtual_machine_interface_refs
            .first()
            .and_then(|r| r.uuid.clone())
    };
    desired.address == actual.address && interface(desired) == interface(actual)
}

#[async_trait]
impl ModelObject for FloatingIpModel {
    fn graph(&self) -> &ModelGraph {
        &self.graph
    }

    async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    async fn update(&self, controller: &ModelController) -> Result<()> {
        let mut state = self.state.lock().await;
        ensure_initialized(state.initialized, self.key())?;
        if state.pool_fq_name.is_empty() {
            return Err(Error::invalid_reference(self.key(), "not attached to a pool"));
        }

        let mut fq_name = state.pool_fq_name.clone();
        fq_name.push(self.uuid.clone());
        let (mut obj, exists) = resolve_by_id(
            controller.api(),
            state.handle.as_ref(),
            ApiObjectType::FloatingIp,
            &self.uuid,
            || {
                ApiObject::new(fq_name, ApiObjectBody::FloatingIp(FloatingIp::default()))
                    .with_uuid(self.uuid.clone())
            },
        )
        .await?;
        obj.body = ApiObjectBody::FloatingIp(Self::desired_body(&state));
        push(controller.api(), &mut obj, exists).await?;
        state.handle = Some(obj);
        Ok(())
    }

    async fn verify(&self, controller: &ModelController) -> Result<bool> {
        let desired = {
            let state = self.state.lock().await;
            ensure_initialized(state.initialized, self.key())?;
            Self::desired_body(&state)
        };
        let Some(actual) = self.fetch(controller).await? else {
            warn!(key = %self.key(), "Floating ip missing from controller");
            self.state.lock().await.handle = None;
            return Ok(false);
        };
        Ok(association_matches(&desired, &actual))
    }

    async fn compare(&self, controller: &ModelController, other: &ModelNode) -> Result<bool> {
        ensure_same_identity(self.key(), other)?;
        let Some(other) = other.as_floating_ip() else {
            return Ok(false);
        };
        let desired = Self::desired_body(&*self.state.lock().await);
        Ok(other
            .fetch(controller)
            .await?
            .is_some_and(|actual| association_matches(&desired, &actual)))
    }

    async fn delete(&self, controller: &ModelController) {
        self.state.lock().await.handle = None;
        delete_by_id_logged(controller.api(), ApiObjectType::FloatingIp, &self.uuid).await;
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
    fn test_association_matches() {
        let desired = FloatingIp {
            address: Some(Ipv4Addr::new(203, 0, 113, 7)),
            virtual_machine_interface_refs: vec![ObjectReference::by_uuid("nic-1")],
        };
        assert!(association_matches(&desired, &desired.clone()));

        let detached = FloatingIp {
            virtual_machine_interface_refs: Vec::new(),
            ..desired.clone()
        };
        assert!(!association_matches(&desired, &detached));
    }

    #[tokio::test]
    async fn test_destroy_leaves_owning_pool() {
        let controller = ModelController::new(
            vnc_core::InMemoryPrimaryStore::new_arc(),
            crate::api::InMemoryApiConnector::new_arc(),
            vnc_core::ReconcilerConfig::default(),
        );
        let pool = FloatingIpPoolModel::new();
        let fip = Arc::new(FloatingIpModel::new("fip-1"));
        pool.graph().add_successor(fip.clone().into());

        fip.destroy(&controller).await;

        assert!(pool.floating_ip("fip-1").is_none());
        assert_eq!(fip.graph().ancestor_count(), 0);
    }

    #[tokio::test]
    async fn test_new_is_uninitialized() {
        let fip = FloatingIpModel::new("fip-1");
        assert!(!fip.is_initialized().await);
        assert_eq!(fip.graph().key(), &ModelKey::FloatingIp("fip-1".into()));
    }
}
