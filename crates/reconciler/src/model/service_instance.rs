//! Service instance: a service chain between a left and a right network.
//!
//! On first update the instance creates a companion network policy that
//! steers traffic between the two networks through the service, and wires
//! that policy under both networks. Deleting the instance unwires the policy
//! and re-pushes both networks before the instance itself goes away.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vnc_core::{ResultExt, ServiceTemplateConfig};

use crate::api::object::{ServiceInstance, ServiceTemplate};
use crate::api::{ApiObject, ApiObjectBody, ApiObjectType, ObjectReference};
use crate::controller::ModelController;
use crate::error::{Error, Result};
use crate::model::graph::ModelGraph;
use crate::model::key::ModelKey;
use crate::model::network_policy::NetworkPolicyModel;
use crate::model::node::ModelNode;
use crate::model::object::{
    delete_logged, delete_successors, ensure_initialized, ensure_same_identity, push,
    resolve_by_fqn, update_successors, verify_successors, ModelObject,
};
use crate::model::virtual_machine::VirtualMachineModel;
use crate::model::virtual_network::VirtualNetworkModel;

#[derive(Default)]
struct InstanceState {
    initialized: bool,
    uuid: Option<String>,
    left: Option<Arc<VirtualNetworkModel>>,
    right: Option<Arc<VirtualNetworkModel>>,
    left_fq_name: String,
    right_fq_name: String,
    template: ServiceTemplateConfig,
    policy: Option<Arc<NetworkPolicyModel>>,
    handle: Option<ApiObject>,
}

impl InstanceState {
    fn networks(&self) -> Vec<Arc<VirtualNetworkModel>> {
        self.left.iter().chain(self.right.iter()).cloned().collect()
    }
}

pub struct ServiceInstanceModel {
    fq_name: Vec<String>,
    graph: ModelGraph,
    state: Mutex<InstanceState>,
}

fn split_fq_name(fq_name: &str) -> Vec<String> {
    fq_name.split(':').map(str::to_string).collect()
}

impl ServiceInstanceModel {
    pub fn new(fq_name: Vec<String>) -> Self {
        Self {
            graph: ModelGraph::new(ModelKey::ServiceInstance(fq_name.join(":"))),
            fq_name,
            state: Mutex::new(InstanceState::default()),
        }
    }

    pub fn fq_name(&self) -> &[String] {
        &self.fq_name
    }

    pub fn fq_name_string(&self) -> String {
        self.fq_name.join(":")
    }

    pub fn name(&self) -> &str {
        self.fq_name.last().map_or("", String::as_str)
    }

    pub async fn uuid(&self) -> Option<String> {
        self.state.lock().await.uuid.clone()
    }

    pub async fn left_network(&self) -> Option<Arc<VirtualNetworkModel>> {
        self.state.lock().await.left.clone()
    }

    pub async fn right_network(&self) -> Option<Arc<VirtualNetworkModel>> {
        self.state.lock().await.right.clone()
    }

    /// The companion policy, once created.
    pub async fn network_policy(&self) -> Option<Arc<NetworkPolicyModel>> {
        self.state.lock().await.policy.clone()
    }

    pub fn virtual_machines(&self) -> Vec<Arc<VirtualMachineModel>> {
        self.graph.filter_successors(ModelNode::as_virtual_machine)
    }

    /// Interface role of a service VM's NIC on the given network.
    pub async fn interface_type_for(&self, network_fq_name: &str) -> &'static str {
        let state = self.state.lock().await;
        if state.left_fq_name == network_fq_name {
            "left"
        } else if state.right_fq_name == network_fq_name {
            "right"
        } else {
            "management"
        }
    }

    /// Populate desired state. A uuid is generated on first build.
    pub async fn build(
        &self,
        left: Arc<VirtualNetworkModel>,
        right: Arc<VirtualNetworkModel>,
        template: ServiceTemplateConfig,
    ) {
        let left_fq_name = left.fq_name().await.join(":");
        let right_fq_name = right.fq_name().await.join(":");

        let mut state = self.state.lock().await;
        if state.uuid.is_none() {
            state.uuid = Some(Uuid::new_v4().to_string());
        }
        state.left = Some(left);
        state.right = Some(right);
        state.left_fq_name = left_fq_name;
        state.right_fq_name = right_fq_name;
        state.template = template;
        state.initialized = true;
    }

    /// Load an instance the controller already has and register it.
    pub async fn from_remote(controller: &ModelController, fq_name: &[String]) -> Result<Arc<Self>> {
        let remote = controller
            .api()
            .find_by_fqn(ApiObjectType::ServiceInstance, fq_name)
            .await?
            .ok_or_else(|| Error::not_found("service instance", fq_name.join(":")))?;
        let si = Arc::new(Self::new(fq_name.to_vec()));
        si.build_from_remote(controller, &remote).await?;
        Ok(controller.database().insert_service_instance(si))
    }

    /// Populate desired state from the controller's copy of this instance.
    ///
    /// Both networks must already be registered. A companion policy already
    /// wired under the left network is adopted rather than recreated.
    pub async fn build_from_remote(&self, controller: &ModelController, remote: &ApiObject) -> Result<()> {
        let Some(body) = remote.as_service_instance() else {
            return Err(Error::invalid_reference(
                self.graph.key(),
                format!("{} is not a service instance", remote.describe()),
            ));
        };
        let database = controller.database();
        let left = database
            .lookup_virtual_network_by_fq_name(&split_fq_name(&body.left_virtual_network))
            .await
            .ok_or_else(|| Error::not_found("virtual network", &body.left_virtual_network))?;
        let right = database
            .lookup_virtual_network_by_fq_name(&split_fq_name(&body.right_virtual_network))
            .await
            .ok_or_else(|| Error::not_found("virtual network", &body.right_virtual_network))?;

        let mut template = controller.config().service_template.clone();
        if let Some(name) = body
            .service_template_refs
            .first()
            .and_then(|r| r.fq_name.last())
        {
            template.name.clone_from(name);
        }

        let policy = match left.network_policy() {
            Some(policy) if self.chains_through(&policy).await => Some(policy),
            _ => None,
        };

        let mut state = self.state.lock().await;
        state.uuid.clone_from(&remote.uuid);
        state.left = Some(left);
        state.right = Some(right);
        state.left_fq_name.clone_from(&body.left_virtual_network);
        state.right_fq_name.clone_from(&body.right_virtual_network);
        state.template = template;
        state.policy = policy;
        state.handle = Some(remote.clone());
        state.initialized = true;
        Ok(())
    }

    async fn chains_through(&self, policy: &NetworkPolicyModel) -> bool {
        let fq_name = self.fq_name_string();
        policy
            .entries()
            .await
            .iter()
            .any(|rule| rule.apply_service.contains(&fq_name))
    }

    async fn locate_template(
        controller: &ModelController,
        template: &ServiceTemplateConfig,
    ) -> Result<ApiObject> {
        let fq_name = vec![controller.config().domain.clone(), template.name.clone()];
        if let Some(found) = controller
            .api()
            .find_by_fqn(ApiObjectType::ServiceTemplate, &fq_name)
            .await?
        {
            return Ok(found);
        }
        let mut obj = ApiObject::new(
            fq_name,
            ApiObjectBody::ServiceTemplate(ServiceTemplate {
                service_mode: template.service_mode.clone(),
                service_type: template.service_type.clone(),
                image_name: template.image_name.clone(),
                interface_types: ["management", "left", "right"]
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            }),
        );
        push(controller.api(), &mut obj, false).await?;
        Ok(obj)
    }

    fn desired_body(state: &InstanceState, template: ObjectReference) -> ServiceInstance {
        ServiceInstance {
            left_virtual_network: state.left_fq_name.clone(),
            right_virtual_network: state.right_fq_name.clone(),
            service_template_refs: vec![template],
            max_instances: 1,
        }
    }

    async fn fetch(&self, controller: &ModelController) -> Result<Option<ServiceInstance>> {
        let remote = controller
            .api()
            .find_by_fqn(ApiObjectType::ServiceInstance, &self.fq_name)
            .await?;
        Ok(remote.as_ref().and_then(ApiObject::as_service_instance).cloned())
    }
}

fn chain_matches(desired: &ServiceInstance, actual: &ServiceInstance) -> bool {
    desired.left_virtual_network == actual.left_virtual_network
        && desired.right_virtual_network == actual.right_virtual_network
}

#[async_trait]
impl ModelObject for ServiceInstanceModel {
    fn graph(&self) -> &ModelGraph {
        &self.graph
    }

    async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    async fn update(&self, controller: &ModelController) -> Result<()> {
        let (networks, policy, created) = {
            let mut state = self.state.lock().await;
            ensure_initialized(state.initialized, self.key())?;

            let template = Self::locate_template(controller, &state.template).await?;
            let project = controller.locate_project().await?;
            let uuid = state.uuid.clone();
            let (mut obj, exists) = resolve_by_fqn(
                controller.api(),
                state.handle.as_ref(),
                ApiObjectType::ServiceInstance,
                &self.fq_name,
                || {
                    let obj = ApiObject::new(
                        self.fq_name.clone(),
                        ApiObjectBody::ServiceInstance(ServiceInstance::default()),
                    )
                    .with_parent(project.uuid.clone());
                    match uuid {
                        Some(uuid) => obj.with_uuid(uuid),
                        None => obj,
                    }
                },
            )
            .await?;
            obj.body =
                ApiObjectBody::ServiceInstance(Self::desired_body(&state, template.reference()));
            push(controller.api(), &mut obj, exists).await?;
            state.uuid.clone_from(&obj.uuid);
            state.handle = Some(obj);

            let (policy, created) = match state.policy.clone() {
                Some(policy) => (policy, false),
                None => {
                    let policy = Arc::new(NetworkPolicyModel::new(
                        Uuid::new_v4().to_string(),
                        controller
                            .config()
                            .project_child_fq_name(format!("{}-chain", self.name())),
                    ));
                    policy
                        .build_service_chain(
                            state.left_fq_name.clone(),
                            state.right_fq_name.clone(),
                            self.fq_name_string(),
                        )
                        .await;
                    state.policy = Some(policy.clone());
                    (policy, true)
                }
            };
            (state.networks(), policy, created)
        };

        policy.update(controller).await?;
        if created {
            info!(service_instance = %self.fq_name_string(), policy = %policy.uuid(), "Wiring service chain policy");
            controller.database().insert_network_policy(policy.clone());
            for network in &networks {
                network.set_network_policy(&policy);
            }
            for network in &networks {
                network.update(controller).await?;
            }
        }
        update_successors(&self.graph, controller).await
    }

    async fn verify(&self, controller: &ModelController) -> Result<bool> {
        let (desired, policy) = {
            let state = self.state.lock().await;
            ensure_initialized(state.initialized, self.key())?;
            (
                Self::desired_body(&state, ObjectReference::default()),
                state.policy.clone(),
            )
        };
        let Some(actual) = self.fetch(controller).await? else {
            warn!(key = %self.key(), "Service instance missing from controller");
            self.state.lock().await.handle = None;
            return Ok(false);
        };
        if !chain_matches(&desired, &actual) {
            warn!(key = %self.key(), "Service chain networks drifted");
            return Ok(false);
        }
        if let Some(policy) = policy {
            if !policy.verify(controller).await? {
                return Ok(false);
            }
        }
        verify_successors(&self.graph, controller).await
    }

    async fn compare(&self, controller: &ModelController, other: &ModelNode) -> Result<bool> {
        ensure_same_identity(self.key(), other)?;
        let Some(other) = other.as_service_instance() else {
            return Ok(false);
        };
        let desired = Self::desired_body(&*self.state.lock().await, ObjectReference::default());
        Ok(other
            .fetch(controller)
            .await?
            .is_some_and(|actual| chain_matches(&desired, &actual)))
    }

    async fn delete(&self, controller: &ModelController) {
        delete_successors(&self.graph, controller).await;

        let (policy, networks, handle) = {
            let mut state = self.state.lock().await;
            (state.policy.take(), state.networks(), state.handle.take())
        };

        if let Some(policy) = policy {
            debug!(service_instance = %self.fq_name_string(), "Unwiring service chain policy");
            for network in &networks {
                network.unset_network_policy(controller, policy.graph().key()).await;
            }
            controller.database().remove_network_policy(policy.uuid());
            for network in &networks {
                network
                    .update(controller)
                    .await
                    .into_option_logged("re-push network after unwiring policy");
            }
            policy.delete(controller).await;
        }

        let target = match handle {
            Some(handle) => Some(handle),
            None => controller
                .api()
                .find_by_fqn(ApiObjectType::ServiceInstance, &self.fq_name)
                .await
                .into_option_logged("resolve service instance for delete")
                .flatten(),
        };
        if let Some(obj) = target {
            delete_logged(controller.api(), &obj).await;
        }
    }

    async fn destroy(&self, controller: &ModelController) {
        self.delete(controller).await;
        for machine in self.graph.clear_successors() {
            machine.destroy(controller).await;
        }
        self.graph.detach_from_owners();
        controller
            .database()
            .remove_service_instance(&self.fq_name_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NetworkKey;

    fn fq(name: &str) -> Vec<String> {
        vec!["default-domain".into(), "default-project".into(), name.into()]
    }

    #[tokio::test]
    async fn test_build_generates_uuid_once() {
        let si = ServiceInstanceModel::new(fq("fw"));
        let left = Arc::new(VirtualNetworkModel::new(NetworkKey::Dynamic("net-a".into())));
        let right = Arc::new(VirtualNetworkModel::new(NetworkKey::Dynamic("net-b".into())));

        si.build(left.clone(), right.clone(), ServiceTemplateConfig::default())
            .await;
        let first = si.uuid().await;
        si.build(left, right, ServiceTemplateConfig::default()).await;

        assert!(first.is_some());
        assert_eq!(si.uuid().await, first);
        assert!(si.is_initialized().await);
    }

    #[test]
    fn test_chain_matches_ignores_template() {
        let desired = ServiceInstance {
            left_virtual_network: "d:p:a".into(),
            right_virtual_network: "d:p:b".into(),
            ..ServiceInstance::default()
        };
        let mut actual = desired.clone();
        actual.service_template_refs = vec![ObjectReference::by_uuid("t-1")];
        assert!(chain_matches(&desired, &actual));

        actual.right_virtual_network = "d:p:c".into();
        assert!(!chain_matches(&desired, &actual));
    }

    #[test]
    fn test_name_is_last_fq_component() {
        let si = ServiceInstanceModel::new(fq("fw"));
        assert_eq!(si.name(), "fw");
        assert_eq!(si.fq_name_string(), "default-domain:default-project:fw");
    }
}
