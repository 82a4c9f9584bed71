//! Shared foundations for the VNC reconciler.
//!
//! - **Errors**: typed core errors and a `ResultExt` for log-and-continue paths
//! - **Configuration**: naming and resync settings loaded from TOML
//! - **Primary store**: the orchestrator records models are built from, and the
//!   repository trait used to read them

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod result;
pub mod store;
pub mod types;

// Re-export main types
pub use config::{ReconcilerConfig, ServiceTemplateConfig, StaticNetworkNames};
pub use error::Error;
pub use result::{Result, ResultExt};
pub use store::{InMemoryPrimaryStore, PrimaryStore};
pub use types::{
    AclAction, AclRecord, AclRuleRecord, AclTrafficType, IpAddressRecord, NetworkRecord,
    NetworkState, NicRecord, NicState, RecordId, SERVICE_INSTANCE_DETAIL, TrafficType, VlanRecord,
    VmRecord, VmState,
};
