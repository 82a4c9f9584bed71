//! Virtual machine: owns the VM's interfaces and optionally implements a
//! service instance.

use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use vnc_core::VmRecord;

use crate::api::object::VirtualMachine;
use crate::api::{ApiObject, ApiObjectBody, ApiObjectType, ObjectReference};
use crate::controller::ModelController;
use crate::error::{Error, Result};
use crate::model::graph::ModelGraph;
use crate::model::key::ModelKey;
use crate::model::node::ModelNode;
use crate::model::object::{
    delete_by_id_logged, delete_successors, destroy_successors, ensure_initialized,
    ensure_same_identity, push, resolve_by_id, update_successors, verify_successors, ModelObject,
};
use crate::model::service_instance::ServiceInstanceModel;
use crate::model::vm_interface::VmInterfaceModel;

#[derive(Default)]
struct MachineState {
    initialized: bool,
    display_name: String,
    active: bool,
    /// Colon-joined fq-name of the implemented service instance.
    service_instance: Option<String>,
    handle: Option<ApiObject>,
}

pub struct VirtualMachineModel {
    uuid: String,
    instance_name: String,
    graph: ModelGraph,
    state: Mutex<MachineState>,
}

/// Parse a `domain:project:name` service-instance link.
pub fn parse_service_instance_link(raw: &str) -> Option<Vec<String>> {
    let parts = raw.split(':').map(str::trim).collect_vec();
    if parts.len() == 3 && parts.iter().all(|part| !part.is_empty()) {
        Some(parts.into_iter().map(str::to_string).collect())
    } else {
        None
    }
}

impl VirtualMachineModel {
    pub fn new(uuid: impl Into<String>, instance_name: impl Into<String>) -> Self {
        let uuid = uuid.into();
        Self {
            graph: ModelGraph::new(ModelKey::VirtualMachine(uuid.clone())),
            uuid,
            instance_name: instance_name.into(),
            state: Mutex::new(MachineState::default()),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.active
    }

    pub fn interfaces(&self) -> Vec<Arc<VmInterfaceModel>> {
        self.graph.filter_successors(ModelNode::as_vm_interface)
    }

    pub fn interface(&self, uuid: &str) -> Option<Arc<VmInterfaceModel>> {
        self.graph
            .successor(&ModelKey::VmInterface(uuid.to_string()))
            .and_then(|node| node.as_vm_interface().cloned())
    }

    /// Colon-joined fq-name of the linked service instance.
    pub async fn service_instance(&self) -> Option<String> {
        self.state.lock().await.service_instance.clone()
    }

    /// Populate from the VM record.
    ///
    /// A `service-instance` detail links this VM to a service instance. The
    /// link is resolved through the registry, falling back to the
    /// controller's copy of the instance. A malformed link fails the build
    /// before anything is changed.
    pub async fn build(self: &Arc<Self>, controller: &ModelController, record: &VmRecord) -> Result<()> {
        let link = record
            .service_instance_detail()
            .map(|raw| {
                parse_service_instance_link(raw).ok_or_else(|| {
                    Error::invalid_reference(
                        self.graph.key(),
                        format!("malformed service instance link '{raw}'"),
                    )
                })
            })
            .transpose()?;

        if let Some(fq_name) = link {
            let si = match controller
                .database()
                .lookup_service_instance(&fq_name.join(":"))
            {
                Some(si) => si,
                None => ServiceInstanceModel::from_remote(controller, &fq_name).await?,
            };
            self.set_service_instance(controller, &si).await;
        }

        let mut state = self.state.lock().await;
        state.display_name.clone_from(&record.display_name);
        state.active = record.state.is_active();
        state.initialized = true;
        Ok(())
    }

    /// Link this VM to a service instance, becoming one of its successors.
    pub async fn set_service_instance(
        self: &Arc<Self>,
        controller: &ModelController,
        si: &ServiceInstanceModel,
    ) {
        let linked = si.fq_name_string();
        let previous = self
            .state
            .lock()
            .await
            .service_instance
            .replace(linked.clone());

        if let Some(previous) = previous.filter(|p| *p != linked) {
            if let Some(old) = controller.database().lookup_service_instance(&previous) {
                old.graph().remove_successor(self.graph.key());
            }
        }
        si.graph().add_successor(ModelNode::from(self.clone()));
    }

    /// Unlink from the service instance. Destroys the instance when this VM
    /// was its last implementation.
    async fn release_service_instance(&self, controller: &ModelController) {
        let Some(fq_name) = self.state.lock().await.service_instance.take() else {
            return;
        };
        let Some(si) = controller.database().lookup_service_instance(&fq_name) else {
            return;
        };
        let detached = si.graph().remove_successor(self.graph.key()).is_some();
        if detached && si.graph().successor_count() == 0 {
            info!(service_instance = %fq_name, "Last service VM gone, destroying service instance");
            si.destroy(controller).await;
        }
    }

    fn desired_body(state: &MachineState) -> VirtualMachine {
        VirtualMachine {
            service_instance_refs: state
                .service_instance
                .iter()
                .map(|fq| ObjectReference::by_fq_name(fq.split(':').map(str::to_string).collect()))
                .collect(),
        }
    }

    async fn fetch(&self, controller: &ModelController) -> Result<Option<ApiObject>> {
        controller
            .api()
            .find_by_id(ApiObjectType::VirtualMachine, &self.uuid)
            .await
    }
}

fn service_link(vm: &VirtualMachine) -> Option<&[String]> {
    vm.service_instance_refs.first().map(|r| r.fq_name.as_slice())
}

#[async_trait]
impl ModelObject for VirtualMachineModel {
    fn graph(&self) -> &ModelGraph {
        &self.graph
    }

    async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    async fn update(&self, controller: &ModelController) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            ensure_initialized(state.initialized, self.key())?;

            let (mut obj, exists) = resolve_by_id(
                controller.api(),
                state.handle.as_ref(),
                ApiObjectType::VirtualMachine,
                &self.uuid,
                || {
                    ApiObject::new(
                        vec![self.uuid.clone()],
                        ApiObjectBody::VirtualMachine(VirtualMachine::default()),
                    )
                    .with_uuid(self.uuid.clone())
                },
            )
            .await?;
            obj.display_name = Some(state.display_name.clone());
            obj.body = ApiObjectBody::VirtualMachine(Self::desired_body(&state));
            push(controller.api(), &mut obj, exists).await?;
            state.handle = Some(obj);
        }
        debug!(key = %self.key(), interfaces = self.graph.successor_count(), "Cascading update");
        update_successors(&self.graph, controller).await
    }

    async fn verify(&self, controller: &ModelController) -> Result<bool> {
        let desired = {
            let state = self.state.lock().await;
            ensure_initialized(state.initialized, self.key())?;
            Self::desired_body(&state)
        };
        let remote = self.fetch(controller).await?;
        let Some(actual) = remote.as_ref().and_then(ApiObject::as_virtual_machine) else {
            warn!(key = %self.key(), "Virtual machine missing from controller");
            self.state.lock().await.handle = None;
            return Ok(false);
        };
        if service_link(&desired) != service_link(actual) {
            warn!(key = %self.key(), "Service instance link drifted");
            return Ok(false);
        }
        verify_successors(&self.graph, controller).await
    }

    async fn compare(&self, controller: &ModelController, other: &ModelNode) -> Result<bool> {
        ensure_same_identity(self.key(), other)?;
        let Some(other) = other.as_virtual_machine() else {
            return Ok(false);
        };
        let desired = Self::desired_body(&*self.state.lock().await);
        let remote = other.fetch(controller).await?;
        Ok(remote
            .as_ref()
            .and_then(ApiObject::as_virtual_machine)
            .is_some_and(|actual| service_link(&desired) == service_link(actual)))
    }

    async fn delete(&self, controller: &ModelController) {
        delete_successors(&self.graph, controller).await;
        self.state.lock().await.handle = None;
        delete_by_id_logged(controller.api(), ApiObjectType::VirtualMachine, &self.uuid).await;
    }

    async fn destroy(&self, controller: &ModelController) {
        self.delete(controller).await;
        destroy_successors(&self.graph, controller).await;
        self.release_service_instance(controller).await;
        self.graph.detach_from_owners();
        controller.database().remove_virtual_machine(&self.uuid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_service_instance_link() {
        assert_eq!(
            parse_service_instance_link("default-domain:default-project:fw"),
            Some(vec![
                "default-domain".to_string(),
                "default-project".to_string(),
                "fw".to_string()
            ])
        );
        assert_eq!(parse_service_instance_link("fw"), None);
        assert_eq!(parse_service_instance_link("a::c"), None);
        assert_eq!(parse_service_instance_link("a:b:c:d"), None);
    }

    #[test]
    fn test_desired_body_links_service_instance() {
        let state = MachineState {
            service_instance: Some("d:p:fw".into()),
            ..MachineState::default()
        };
        let body = VirtualMachineModel::desired_body(&state);
        assert_eq!(service_link(&body), Some(&["d".to_string(), "p".to_string(), "fw".to_string()][..]));
    }

    #[test]
    fn test_interface_lookup() {
        let vm = Arc::new(VirtualMachineModel::new("vm-1", "i-2-1-VM"));
        let nic = Arc::new(VmInterfaceModel::new("nic-1"));
        assert!(nic.add_to_virtual_machine(&vm));
        assert!(vm.interface("nic-1").is_some());
        assert!(vm.interface("nic-2").is_none());
        assert_eq!(vm.interfaces().len(), 1);
    }
}
