//! Orchestrator-facing entry points.
//!
//! Each orchestrator event is mapped onto the model graph: find or create the
//! affected nodes in the registry, rebuild them from the primary store, then
//! push (or destroy) them.

use std::sync::Arc;

use tracing::{debug, info, warn};
use vnc_core::{
    NetworkRecord, PrimaryStore, RecordId, ReconcilerConfig, ServiceTemplateConfig, VmRecord,
};

use crate::api::ApiConnector;
use crate::controller::ModelController;
use crate::error::{Error, Result};
use crate::model::{
    ModelNode, ModelObject, NetworkKey, ServiceInstanceModel, VirtualMachineModel,
    VirtualNetworkModel, VmInterfaceModel,
};
use crate::registry::ModelDatabase;
use crate::types::SyncReport;

/// Drives the model graph from orchestrator events.
pub struct Reconciler {
    controller: ModelController,
}

impl Reconciler {
    /// Create a reconciler over a controller context.
    pub const fn new(controller: ModelController) -> Self {
        Self { controller }
    }

    /// Get the controller context.
    pub const fn controller(&self) -> &ModelController {
        &self.controller
    }

    /// Get the configuration.
    pub const fn config(&self) -> &ReconcilerConfig {
        self.controller.config()
    }

    /// A reconciler sharing this one's collaborators but with an empty
    /// registry, for building a snapshot to compare against.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self::new(self.controller.snapshot())
    }

    async fn network_record(&self, uuid: &str) -> Result<NetworkRecord> {
        self.controller
            .store()
            .network_by_uuid(uuid)
            .await?
            .ok_or_else(|| Error::not_found("network", uuid))
    }

    /// Rebuild a registered network, or build a new one and register it
    /// only once the build succeeded.
    async fn build_network(&self, record: &NetworkRecord) -> Result<Arc<VirtualNetworkModel>> {
        let database = self.controller.database();
        let key = VirtualNetworkModel::key_for(record, self.config());
        if let Some(network) = database.lookup_virtual_network(&key) {
            network.build(&self.controller, record).await?;
            return Ok(network);
        }
        let network = Arc::new(VirtualNetworkModel::new(key));
        network.build(&self.controller, record).await?;
        Ok(database.insert_virtual_network(network))
    }

    /// Same as [`Self::build_network`] for VMs: a VM whose build fails is
    /// never reconciled.
    async fn build_virtual_machine(&self, record: &VmRecord) -> Result<Arc<VirtualMachineModel>> {
        let database = self.controller.database();
        if let Some(vm) = database.lookup_virtual_machine(&record.uuid) {
            vm.build(&self.controller, record).await?;
            return Ok(vm);
        }
        let vm = Arc::new(VirtualMachineModel::new(&record.uuid, &record.instance_name));
        vm.build(&self.controller, record).await?;
        Ok(database.insert_virtual_machine(vm))
    }

    /// Find or create a network's model and rebuild it, without pushing.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the primary store has no such network, or the
    /// error of the build.
    pub async fn load_network(&self, uuid: &str) -> Result<Arc<VirtualNetworkModel>> {
        let record = self.network_record(uuid).await?;
        self.build_network(&record).await
    }

    /// A network was implemented or changed: rebuild and push it.
    ///
    /// # Errors
    ///
    /// Returns the first build or update error.
    pub async fn network_implemented(&self, uuid: &str) -> Result<Arc<VirtualNetworkModel>> {
        let network = self.load_network(uuid).await?;
        network.update(&self.controller).await?;
        info!(network = %network.network_key(), "Network implemented");
        Ok(network)
    }

    /// A network was shut down: destroy its model. Returns whether a model
    /// existed.
    ///
    /// # Errors
    ///
    /// Returns an error only if the primary store fails.
    pub async fn network_shutdown(&self, uuid: &str) -> Result<bool> {
        let key = match self.controller.store().network_by_uuid(uuid).await? {
            Some(record) => VirtualNetworkModel::key_for(&record, self.config()),
            None => NetworkKey::Dynamic(uuid.to_string()),
        };
        let Some(network) = self.controller.database().lookup_virtual_network(&key) else {
            debug!(network = %key, "No model for shut down network");
            return Ok(false);
        };
        network.destroy(&self.controller).await;
        info!(network = %key, "Network shut down");
        Ok(true)
    }

    /// A NIC was prepared for a VM: wire VM, network and interface, then
    /// push the VM and everything under it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for missing records, `InvalidReference` for a
    /// malformed service-instance link, or the first update error.
    pub async fn nic_prepared(&self, vm_uuid: &str, nic_uuid: &str) -> Result<Arc<VmInterfaceModel>> {
        let store = self.controller.store();

        let vm_record = store
            .virtual_machine_by_uuid(vm_uuid)
            .await?
            .ok_or_else(|| Error::not_found("virtual machine", vm_uuid))?;
        let nic = store
            .nics_for_vm(vm_record.id)
            .await?
            .into_iter()
            .find(|nic| nic.uuid == nic_uuid)
            .ok_or_else(|| Error::not_found("nic", nic_uuid))?;
        let network_record = store
            .network(nic.network_id)
            .await?
            .ok_or_else(|| Error::not_found("network", nic.network_id))?;

        let vm = self.build_virtual_machine(&vm_record).await?;

        let key = VirtualNetworkModel::key_for(&network_record, self.config());
        let network = match self.controller.database().lookup_virtual_network(&key) {
            Some(network) => {
                if !network.is_initialized().await {
                    network.build(&self.controller, &network_record).await?;
                }
                network
            }
            None => self.build_network(&network_record).await?,
        };

        let vmi = vm
            .interface(nic_uuid)
            .unwrap_or_else(|| Arc::new(VmInterfaceModel::new(nic_uuid)));
        vmi.add_to_virtual_machine(&vm);
        vmi.add_to_virtual_network(&network);
        vmi.build(&self.controller, &vm, &network, &nic).await?;

        vm.update(&self.controller).await?;
        info!(vm = %vm_uuid, nic = %nic_uuid, network = %key, "NIC prepared");
        Ok(vmi)
    }

    /// A NIC was released: destroy its interface model. Returns whether a
    /// model existed.
    pub async fn nic_released(&self, vm_uuid: &str, nic_uuid: &str) -> bool {
        let vmi = self
            .controller
            .database()
            .lookup_virtual_machine(vm_uuid)
            .and_then(|vm| vm.interface(nic_uuid));
        let Some(vmi) = vmi else {
            debug!(vm = %vm_uuid, nic = %nic_uuid, "No model for released NIC");
            return false;
        };
        vmi.destroy(&self.controller).await;
        info!(vm = %vm_uuid, nic = %nic_uuid, "NIC released");
        true
    }

    /// A VM was expunged: destroy it and its interfaces. Returns whether a
    /// model existed.
    pub async fn vm_expunged(&self, vm_uuid: &str) -> bool {
        let Some(vm) = self.controller.database().lookup_virtual_machine(vm_uuid) else {
            debug!(vm = %vm_uuid, "No model for expunged VM");
            return false;
        };
        vm.destroy(&self.controller).await;
        info!(vm = %vm_uuid, "VM expunged");
        true
    }

    /// Create a service instance chaining two networks and push it together
    /// with its companion policy.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown networks, or the first build or update
    /// error.
    pub async fn create_service_instance(
        &self,
        name: &str,
        left_network: &str,
        right_network: &str,
        template: Option<ServiceTemplateConfig>,
    ) -> Result<Arc<ServiceInstanceModel>> {
        let left = self.load_network(left_network).await?;
        let right = self.load_network(right_network).await?;

        let fq_name = self.config().project_child_fq_name(name);
        let si = self.controller.database().locate_service_instance(&fq_name);
        si.build(
            left,
            right,
            template.unwrap_or_else(|| self.config().service_template.clone()),
        )
        .await;
        si.update(&self.controller).await?;
        info!(service_instance = %si.fq_name_string(), "Service instance created");
        Ok(si)
    }

    /// Destroy a service instance, its companion policy and its VMs.
    /// Returns whether a model existed.
    pub async fn delete_service_instance(&self, fq_name: &[String]) -> bool {
        let fq_name = fq_name.join(":");
        let Some(si) = self.controller.database().lookup_service_instance(&fq_name) else {
            debug!(service_instance = %fq_name, "No model for deleted service instance");
            return false;
        };
        si.destroy(&self.controller).await;
        info!(service_instance = %fq_name, "Service instance deleted");
        true
    }

    /// A public address was associated with a VM: rebuild and push the
    /// public network it came from, floating IPs included.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for missing records, or the first build or update
    /// error.
    pub async fn floating_ip_associated(&self, address_id: RecordId) -> Result<Arc<VirtualNetworkModel>> {
        let store = self.controller.store();
        let address = store
            .ip_address(address_id)
            .await?
            .ok_or_else(|| Error::not_found("ip address", address_id))?;
        let record = store
            .network(address.source_network_id)
            .await?
            .ok_or_else(|| Error::not_found("network", address.source_network_id))?;

        let network = self.build_network(&record).await?;
        network.update(&self.controller).await?;
        info!(address = %address.address, network = %record.uuid, "Floating ip associated");
        Ok(network)
    }

    /// A public address was released: destroy its floating IP. Returns
    /// whether a model existed.
    ///
    /// # Errors
    ///
    /// Returns an error only if the primary store fails.
    pub async fn floating_ip_released(&self, network_uuid: &str, fip_uuid: &str) -> Result<bool> {
        let key = match self.controller.store().network_by_uuid(network_uuid).await? {
            Some(record) => VirtualNetworkModel::key_for(&record, self.config()),
            None => NetworkKey::Dynamic(network_uuid.to_string()),
        };
        let Some(pool) = self
            .controller
            .database()
            .lookup_virtual_network(&key)
            .and_then(|network| network.floating_ip_pool())
        else {
            return Ok(false);
        };
        let Some(fip) = pool.floating_ip(fip_uuid) else {
            return Ok(false);
        };
        fip.destroy(&self.controller).await;
        info!(floating_ip = %fip_uuid, network = %key, "Floating ip released");
        Ok(true)
    }

    /// Verify every root against the controller.
    ///
    /// Drifted roots are pushed again when `repair_on_resync` is set.
    pub async fn verify_all(&self) -> SyncReport {
        let mut report = SyncReport::new();
        for root in self.controller.database().roots() {
            let key = root.key().clone();
            match root.verify(&self.controller).await {
                Ok(true) => report.record_in_sync(&key),
                Ok(false) if self.config().repair_on_resync => {
                    match root.update(&self.controller).await {
                        Ok(()) => {
                            info!(key = %key, "Repaired drifted root");
                            report.record_repaired(&key);
                        }
                        Err(e) => {
                            warn!(key = %key, error = %e, "Repair failed");
                            report.record_failed(&key, e);
                        }
                    }
                }
                Ok(false) => report.record_drifted(&key),
                Err(e) => {
                    warn!(key = %key, error = %e, "Verify failed");
                    report.record_failed(&key, e);
                }
            }
        }
        info!(
            checked = report.checked,
            drifted = report.drifted.len(),
            repaired = report.repaired.len(),
            failed = report.failed.len(),
            "Verify pass complete"
        );
        report
    }

    /// Compare every live network against the same network in a snapshot
    /// registry built independently from the primary store.
    pub async fn compare_snapshot(&self, snapshot: &ModelDatabase) -> SyncReport {
        let mut report = SyncReport::new();
        for network in self.controller.database().list_virtual_networks() {
            let key = network.graph().key().clone();
            let Some(other) = snapshot.lookup_virtual_network(network.network_key()) else {
                warn!(key = %key, "Network missing from snapshot");
                report.record_drifted(&key);
                continue;
            };
            match network.compare(&self.controller, &ModelNode::from(other)).await {
                Ok(true) => report.record_in_sync(&key),
                Ok(false) => {
                    warn!(key = %key, "Network differs from snapshot");
                    report.record_drifted(&key);
                }
                Err(e) => report.record_failed(&key, e),
            }
        }
        report
    }
}

/// Builder for [`Reconciler`].
#[derive(Default)]
pub struct ReconcilerBuilder {
    store: Option<Arc<dyn PrimaryStore>>,
    api: Option<Arc<dyn ApiConnector>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the primary store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn PrimaryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the controller client.
    #[must_use]
    pub fn with_api(mut self, api: Arc<dyn ApiConnector>) -> Self {
        self.api = Some(api);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a collaborator is missing or the
    /// configuration does not validate.
    pub fn build(self) -> Result<Reconciler> {
        let store = self
            .store
            .ok_or_else(|| vnc_core::Error::invalid_config("primary store is required"))?;
        let api = self
            .api
            .ok_or_else(|| vnc_core::Error::invalid_config("controller api is required"))?;
        self.config.validate()?;
        Ok(Reconciler::new(ModelController::new(store, api, self.config)))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::net::Ipv4Addr;

    use vnc_core::{InMemoryPrimaryStore, NicRecord, VmRecord};

    use super::*;
    use crate::api::{ApiObjectType, ApiOperation, InMemoryApiConnector};

    async fn setup() -> (Reconciler, Arc<InMemoryPrimaryStore>, Arc<InMemoryApiConnector>) {
        let store = InMemoryPrimaryStore::new_arc();
        store
            .insert_network(
                NetworkRecord::guest(1, "net-1", "web")
                    .with_subnet("192.168.0.0/24", Ipv4Addr::new(192, 168, 0, 1)),
            )
            .await;
        store
            .insert_virtual_machine(VmRecord::running(1, "vm-1", "i-2-1-VM"))
            .await;
        store
            .insert_nic(
                NicRecord::reserved(1, "nic-1", 1, 1, "02:00:00:00:00:01")
                    .with_address(Ipv4Addr::new(192, 168, 0, 10)),
            )
            .await;
        let api = InMemoryApiConnector::new_arc();
        let reconciler = ReconcilerBuilder::new()
            .with_store(store.clone())
            .with_api(api.clone())
            .build()
            .unwrap();
        (reconciler, store, api)
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let result = ReconcilerBuilder::new().build();
        assert!(matches!(result, Err(Error::Core(_))));
    }

    #[tokio::test]
    async fn test_nic_prepared_registers_vm_and_network() {
        let (reconciler, _, api) = setup().await;
        reconciler.nic_prepared("vm-1", "nic-1").await.unwrap();

        let database = reconciler.controller().database();
        assert!(database.lookup_virtual_machine("vm-1").is_some());
        assert!(database
            .lookup_virtual_network(&NetworkKey::Dynamic("net-1".into()))
            .is_some());
        assert_eq!(
            api.count(ApiOperation::Create, ApiObjectType::VirtualMachineInterface)
                .await,
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_vm_is_not_found() {
        let (reconciler, _, _) = setup().await;
        let result = reconciler.nic_prepared("vm-9", "nic-1").await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_vm_expunged_removes_vm() {
        let (reconciler, _, api) = setup().await;
        reconciler.nic_prepared("vm-1", "nic-1").await.unwrap();

        assert!(reconciler.vm_expunged("vm-1").await);
        assert!(!reconciler.vm_expunged("vm-1").await);
        assert!(api.object(ApiObjectType::VirtualMachine, "vm-1").await.is_none());
        assert!(reconciler
            .controller()
            .database()
            .lookup_virtual_machine("vm-1")
            .is_none());
    }

    #[tokio::test]
    async fn test_verify_all_after_push_is_converged() {
        let (reconciler, _, _) = setup().await;
        reconciler.nic_prepared("vm-1", "nic-1").await.unwrap();

        let report = reconciler.verify_all().await;
        assert!(report.converged(), "{report:?}");
        assert_eq!(report.checked, 2);
    }

    #[tokio::test]
    async fn test_network_shutdown_of_unknown_network() {
        let (reconciler, _, _) = setup().await;
        assert!(!reconciler.network_shutdown("net-9").await.unwrap());
    }
}
