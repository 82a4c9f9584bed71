//! Primary-store repository trait and an in-memory implementation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use tokio::sync::RwLock;

use crate::result::Result;
use crate::types::{
    AclRecord, AclRuleRecord, IpAddressRecord, NetworkRecord, NicRecord, RecordId, VlanRecord,
    VmRecord,
};

/// Read-only access to the orchestrator's authoritative records.
///
/// Only consulted while building or verifying models, never while pushing
/// state to the controller.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Look up a network by primary key.
    async fn network(&self, id: RecordId) -> Result<Option<NetworkRecord>>;

    /// Look up a network by UUID.
    async fn network_by_uuid(&self, uuid: &str) -> Result<Option<NetworkRecord>>;

    /// VLAN ranges attached to a network.
    async fn vlans_for_network(&self, network_id: RecordId) -> Result<Vec<VlanRecord>>;

    /// Look up a virtual machine by primary key.
    async fn virtual_machine(&self, id: RecordId) -> Result<Option<VmRecord>>;

    /// Look up a virtual machine by UUID.
    async fn virtual_machine_by_uuid(&self, uuid: &str) -> Result<Option<VmRecord>>;

    /// Look up a NIC by primary key.
    async fn nic(&self, id: RecordId) -> Result<Option<NicRecord>>;

    /// NICs of a virtual machine, ordered by device id.
    async fn nics_for_vm(&self, vm_id: RecordId) -> Result<Vec<NicRecord>>;

    /// The NIC a virtual machine has on a given network.
    async fn nic_for_vm_on_network(
        &self,
        vm_id: RecordId,
        network_id: RecordId,
    ) -> Result<Option<NicRecord>>;

    /// Look up a public address by primary key.
    async fn ip_address(&self, id: RecordId) -> Result<Option<IpAddressRecord>>;

    /// Public addresses allocated from a network.
    async fn ip_addresses_for_network(&self, network_id: RecordId)
    -> Result<Vec<IpAddressRecord>>;

    /// Look up a network ACL by primary key.
    async fn acl(&self, id: RecordId) -> Result<Option<AclRecord>>;

    /// Rules of an ACL, ordered by rule number.
    async fn acl_rules(&self, acl_id: RecordId) -> Result<Vec<AclRuleRecord>>;
}

#[derive(Default)]
struct Tables {
    networks: BTreeMap<RecordId, NetworkRecord>,
    vlans: BTreeMap<RecordId, VlanRecord>,
    vms: BTreeMap<RecordId, VmRecord>,
    nics: BTreeMap<RecordId, NicRecord>,
    ip_addresses: BTreeMap<RecordId, IpAddressRecord>,
    acls: BTreeMap<RecordId, AclRecord>,
    acl_rules: BTreeMap<RecordId, AclRuleRecord>,
}

/// In-memory primary store for testing.
#[derive(Default)]
pub struct InMemoryPrimaryStore {
    tables: RwLock<Tables>,
}

impl InMemoryPrimaryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert or replace a network.
    pub async fn insert_network(&self, record: NetworkRecord) {
        self.tables.write().await.networks.insert(record.id, record);
    }

    /// Insert or replace a VLAN range.
    pub async fn insert_vlan(&self, record: VlanRecord) {
        self.tables.write().await.vlans.insert(record.id, record);
    }

    /// Insert or replace a virtual machine.
    pub async fn insert_virtual_machine(&self, record: VmRecord) {
        self.tables.write().await.vms.insert(record.id, record);
    }

    /// Insert or replace a NIC.
    pub async fn insert_nic(&self, record: NicRecord) {
        self.tables.write().await.nics.insert(record.id, record);
    }

    /// Insert or replace a public address.
    pub async fn insert_ip_address(&self, record: IpAddressRecord) {
        self.tables.write().await.ip_addresses.insert(record.id, record);
    }

    /// Remove a public address.
    pub async fn remove_ip_address(&self, id: RecordId) -> Option<IpAddressRecord> {
        self.tables.write().await.ip_addresses.remove(&id)
    }

    /// Insert or replace an ACL.
    pub async fn insert_acl(&self, record: AclRecord) {
        self.tables.write().await.acls.insert(record.id, record);
    }

    /// Insert or replace an ACL rule.
    pub async fn insert_acl_rule(&self, record: AclRuleRecord) {
        self.tables.write().await.acl_rules.insert(record.id, record);
    }
}

#[async_trait]
impl PrimaryStore for InMemoryPrimaryStore {
    async fn network(&self, id: RecordId) -> Result<Option<NetworkRecord>> {
        Ok(self.tables.read().await.networks.get(&id).cloned())
    }

    async fn network_by_uuid(&self, uuid: &str) -> Result<Option<NetworkRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.networks.values().find(|n| n.uuid == uuid).cloned())
    }

    async fn vlans_for_network(&self, network_id: RecordId) -> Result<Vec<VlanRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .vlans
            .values()
            .filter(|v| v.network_id == network_id)
            .cloned()
            .collect_vec())
    }

    async fn virtual_machine(&self, id: RecordId) -> Result<Option<VmRecord>> {
        Ok(self.tables.read().await.vms.get(&id).cloned())
    }

    async fn virtual_machine_by_uuid(&self, uuid: &str) -> Result<Option<VmRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.vms.values().find(|vm| vm.uuid == uuid).cloned())
    }

    async fn nic(&self, id: RecordId) -> Result<Option<NicRecord>> {
        Ok(self.tables.read().await.nics.get(&id).cloned())
    }

    async fn nics_for_vm(&self, vm_id: RecordId) -> Result<Vec<NicRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .nics
            .values()
            .filter(|nic| nic.vm_id == vm_id)
            .sorted_by_key(|nic| nic.device_id)
            .cloned()
            .collect_vec())
    }

    async fn nic_for_vm_on_network(
        &self,
        vm_id: RecordId,
        network_id: RecordId,
    ) -> Result<Option<NicRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .nics
            .values()
            .find(|nic| nic.vm_id == vm_id && nic.network_id == network_id)
            .cloned())
    }

    async fn ip_address(&self, id: RecordId) -> Result<Option<IpAddressRecord>> {
        Ok(self.tables.read().await.ip_addresses.get(&id).cloned())
    }

    async fn ip_addresses_for_network(
        &self,
        network_id: RecordId,
    ) -> Result<Vec<IpAddressRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .ip_addresses
            .values()
            .filter(|ip| ip.source_network_id == network_id)
            .cloned()
            .collect_vec())
    }

    async fn acl(&self, id: RecordId) -> Result<Option<AclRecord>> {
        Ok(self.tables.read().await.acls.get(&id).cloned())
    }

    async fn acl_rules(&self, acl_id: RecordId) -> Result<Vec<AclRuleRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .acl_rules
            .values()
            .filter(|rule| rule.acl_id == acl_id)
            .sorted_by_key(|rule| rule.number)
            .cloned()
            .collect_vec())
    }
}
