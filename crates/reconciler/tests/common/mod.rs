//! Shared fixtures for reconciler integration tests.

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use vnc_core::{
    AclAction, AclRecord, AclRuleRecord, AclTrafficType, InMemoryPrimaryStore, NetworkRecord,
    NicRecord, RecordId, VmRecord,
};
use vnc_reconciler::{InMemoryApiConnector, ModelController, Reconciler, ReconcilerBuilder};

/// Install a test-writer subscriber once. Filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A primary store, a fake controller and a reconciler wired to both.
pub struct Fixture {
    pub store: Arc<InMemoryPrimaryStore>,
    pub api: Arc<InMemoryApiConnector>,
    pub reconciler: Reconciler,
}

impl Fixture {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        init_tracing();
        let store = InMemoryPrimaryStore::new_arc();
        let api = InMemoryApiConnector::new_arc();
        let reconciler = ReconcilerBuilder::new()
            .with_store(store.clone())
            .with_api(api.clone())
            .build()?;
        Ok(Self {
            store,
            api,
            reconciler,
        })
    }

    pub fn controller(&self) -> &ModelController {
        self.reconciler.controller()
    }

    pub async fn guest_network(&self, id: RecordId, uuid: &str, cidr: &str, gateway: Ipv4Addr) {
        self.store
            .insert_network(NetworkRecord::guest(id, uuid, uuid).with_subnet(cidr, gateway))
            .await;
    }

    pub async fn running_vm(&self, id: RecordId, uuid: &str) {
        self.store
            .insert_virtual_machine(VmRecord::running(id, uuid, format!("i-2-{id}-VM")))
            .await;
    }

    /// ACL `acl-1` (id 1) allowing HTTP from 10.0.0.0/8.
    pub async fn web_acl(&self) {
        self.store
            .insert_acl(AclRecord {
                id: 1,
                uuid: "acl-1".to_string(),
                name: "web-acl".to_string(),
            })
            .await;
        self.store
            .insert_acl_rule(AclRuleRecord {
                id: 1,
                acl_id: 1,
                number: 10,
                protocol: "tcp".to_string(),
                source_cidrs: vec!["10.0.0.0/8".to_string()],
                start_port: Some(80),
                end_port: Some(80),
                action: AclAction::Allow,
                traffic_type: AclTrafficType::Ingress,
            })
            .await;
    }

    pub async fn nic(&self, record: NicRecord) {
        self.store.insert_nic(record).await;
    }

    /// `vm-1` with `nic-1` on dynamic network `net-1` (192.168.0.0/24),
    /// the NIC holding 192.168.0.10.
    pub async fn single_vm_scenario(&self) {
        self.guest_network(1, "net-1", "192.168.0.0/24", Ipv4Addr::new(192, 168, 0, 1))
            .await;
        self.running_vm(1, "vm-1").await;
        self.nic(
            NicRecord::reserved(1, "nic-1", 1, 1, "02:00:00:00:00:01")
                .with_address(Ipv4Addr::new(192, 168, 0, 10)),
        )
        .await;
    }
}
