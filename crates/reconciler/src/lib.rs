//! Desired-state reconciliation of orchestrator resources against a VNC
//! network controller.
//!
//! The orchestrator's records (networks, VMs, NICs, public addresses, ACLs)
//! are the source of truth. This crate mirrors them as a graph of model
//! nodes and pushes that graph to the controller:
//!
//! - **Desired state**: each node rebuilds its state from the primary store
//! - **Update**: idempotent create-or-update of the remote object, cascading
//!   to the nodes it owns in key order
//! - **Verify / Compare**: detect drift between desired and remote state
//! - **Delete / Destroy**: best-effort removal, never failing the caller
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use vnc_core::{InMemoryPrimaryStore, ReconcilerConfig};
//! use vnc_reconciler::{InMemoryApiConnector, ModelController, Reconciler};
//!
//! #[tokio::main]
//! async fn main() -> vnc_reconciler::Result<()> {
//!     let store = InMemoryPrimaryStore::new_arc();
//!     let api = InMemoryApiConnector::new_arc();
//!     let reconciler = Reconciler::new(ModelController::new(
//!         store,
//!         api,
//!         ReconcilerConfig::default(),
//!     ));
//!
//!     reconciler.nic_prepared("vm-1", "nic-1").await?;
//!     let report = reconciler.verify_all().await;
//!     assert!(report.converged());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod api;
pub mod controller;
pub mod error;
pub mod model;
pub mod reconciler;
pub mod registry;
pub mod types;

// Re-export main types
pub use api::{
    ApiCall, ApiConnector, ApiObject, ApiObjectBody, ApiObjectType, ApiOperation,
    InMemoryApiConnector, ObjectReference,
};
pub use controller::ModelController;
pub use error::{Error, Result};
pub use model::{
    FloatingIpModel, FloatingIpPoolModel, InstanceIpModel, ModelGraph, ModelKey, ModelNode,
    ModelObject, NetworkKey, NetworkPolicyModel, ServiceInstanceModel, VirtualMachineModel,
    VirtualNetworkModel, VmInterfaceModel,
};
pub use reconciler::{Reconciler, ReconcilerBuilder};
pub use registry::ModelDatabase;
pub use types::SyncReport;
