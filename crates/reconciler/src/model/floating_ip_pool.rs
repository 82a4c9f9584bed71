//! Floating-IP pool: the singleton pool under a public network.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use vnc_core::{NetworkRecord, ResultExt};

use crate::api::object::FloatingIpPool;
use crate::api::{ApiObject, ApiObjectBody, ApiObjectType};
use crate::controller::ModelController;
use crate::error::{Error, Result};
use crate::model::floating_ip::FloatingIpModel;
use crate::model::graph::ModelGraph;
use crate::model::key::ModelKey;
use crate::model::node::ModelNode;
use crate::model::object::{
    delete_logged, delete_successors, destroy_successors, ensure_initialized, push, resolve_by_fqn,
    update_successors, verify_successors, ModelObject,
};
use crate::model::virtual_network::VirtualNetworkModel;

#[derive(Default)]
struct PoolState {
    initialized: bool,
    name: String,
    parent_fq_name: Vec<String>,
    handle: Option<ApiObject>,
    /// Unwired floating IPs whose remote objects still have to go.
    released: Vec<Arc<FloatingIpModel>>,
}

pub struct FloatingIpPoolModel {
    graph: ModelGraph,
    state: Mutex<PoolState>,
}

impl Default for FloatingIpPoolModel {
    fn default() -> Self {
        Self::new()
    }
}

impl FloatingIpPoolModel {
    pub fn new() -> Self {
        Self {
            graph: ModelGraph::new(ModelKey::FloatingIpPool),
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Wire this pool under a network. The pool's fq-name follows the network's.
    pub async fn add_to_virtual_network(self: &Arc<Self>, network: &VirtualNetworkModel) -> bool {
        let parent_fq_name = network.fq_name().await;
        self.state.lock().await.parent_fq_name = parent_fq_name;
        network.graph().add_successor(ModelNode::from(self.clone()))
    }

    pub async fn fq_name(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut fq_name = state.parent_fq_name.clone();
        fq_name.push(state.name.clone());
        fq_name
    }

    pub fn floating_ips(&self) -> Vec<Arc<FloatingIpModel>> {
        self.graph.filter_successors(ModelNode::as_floating_ip)
    }

    pub fn floating_ip(&self, uuid: &str) -> Option<Arc<FloatingIpModel>> {
        self.graph
            .successor(&ModelKey::FloatingIp(uuid.to_string()))
            .and_then(|node| node.as_floating_ip().cloned())
    }

    /// Build from the public network's record and wire a floating IP for
    /// every address that is associated with a VM. Floating IPs whose address
    /// is no longer associated are unwired and deleted on the next update.
    pub async fn build(self: &Arc<Self>, controller: &ModelController, network: &NetworkRecord) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.name.clone_from(&controller.config().floating_ip_pool_name);
            state.initialized = true;
        }

        let addresses = controller.store().ip_addresses_for_network(network.id).await?;
        let mut associated = BTreeSet::new();
        for address in addresses.iter().filter(|a| a.associated_vm_id.is_some()) {
            let fip = self
                .floating_ip(&address.uuid)
                .unwrap_or_else(|| Arc::new(FloatingIpModel::new(address.uuid.clone())));
            fip.build(controller, address).await?;
            fip.add_to_pool(self).await;
            associated.insert(address.uuid.as_str());
        }

        let stale: Vec<_> = self
            .floating_ips()
            .into_iter()
            .filter(|fip| !associated.contains(fip.uuid()))
            .collect();
        for fip in &stale {
            debug!(floating_ip = %fip.uuid(), "Address no longer associated, unwiring floating ip");
            self.graph.remove_successor(fip.graph().key());
        }
        self.state.lock().await.released.extend(stale);
        debug!(network = %network.uuid, floating_ips = self.graph.successor_count(), "Built floating ip pool");
        Ok(())
    }

    async fn delete_released(&self, controller: &ModelController) {
        let released = std::mem::take(&mut self.state.lock().await.released);
        for fip in released {
            fip.delete(controller).await;
        }
    }

    async fn remote_fq_name(&self) -> Result<Vec<String>> {
        let fq_name = self.fq_name().await;
        if fq_name.len() < 2 {
            return Err(Error::invalid_reference(self.graph.key(), "not attached to a network"));
        }
        Ok(fq_name)
    }
}

#[async_trait]
impl ModelObject for FloatingIpPoolModel {
    fn graph(&self) -> &ModelGraph {
        &self.graph
    }

    async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    async fn update(&self, controller: &ModelController) -> Result<()> {
        let fq_name = self.remote_fq_name().await?;
        {
            let mut state = self.state.lock().await;
            ensure_initialized(state.initialized, self.key())?;

            let (mut obj, exists) = resolve_by_fqn(
                controller.api(),
                state.handle.as_ref(),
                ApiObjectType::FloatingIpPool,
                &fq_name,
                || {
                    ApiObject::new(
                        fq_name.clone(),
                        ApiObjectBody::FloatingIpPool(FloatingIpPool {}),
                    )
                },
            )
            .await?;
            push(controller.api(), &mut obj, exists).await?;
            state.handle = Some(obj);
        }
        self.delete_released(controller).await;
        update_successors(&self.graph, controller).await
    }

    async fn verify(&self, controller: &ModelController) -> Result<bool> {
        ensure_initialized(self.is_initialized().await, self.key())?;
        let fq_name = self.remote_fq_name().await?;
        let remote = controller
            .api()
            .find_by_fqn(ApiObjectType::FloatingIpPool, &fq_name)
            .await?;
        if remote.is_none() {
            warn!(pool = %fq_name.join(":"), "Floating ip pool missing from controller");
            self.state.lock().await.handle = None;
            return Ok(false);
        }
        verify_successors(&self.graph, controller).await
    }

    async fn delete(&self, controller: &ModelController) {
        self.delete_released(controller).await;
        delete_successors(&self.graph, controller).await;

        let handle = self.state.lock().await.handle.take();
        let target = match handle {
            Some(handle) => Some(handle),
            None => match self.remote_fq_name().await {
                Ok(fq_name) => controller
                    .api()
                    .find_by_fqn(ApiObjectType::FloatingIpPool, &fq_name)
                    .await
                    .into_option_logged("resolve floating ip pool for delete")
                    .flatten(),
                Err(_) => None,
            },
        };
        if let Some(obj) = target {
            delete_logged(controller.api(), &obj).await;
        }
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

    #[tokio::test]
    async fn test_unattached_pool_has_no_remote_name() {
        let pool = FloatingIpPoolModel::new();
        assert!(matches!(
            pool.remote_fq_name().await,
            Err(Error::InvalidReference { .. })
        ));
    }

    #[test]
    fn test_floating_ip_lookup_by_uuid() {
        let pool = FloatingIpPoolModel::new();
        pool.graph()
            .add_successor(Arc::new(FloatingIpModel::new("fip-1")).into());
        assert!(pool.floating_ip("fip-1").is_some());
        assert!(pool.floating_ip("fip-2").is_none());
        assert_eq!(pool.floating_ips().len(), 1);
    }
}
