//! Remote network-controller boundary.
//!
//! - [`object`]: the typed object model exchanged with the controller
//! - [`connector`]: the [`ApiConnector`] client trait
//! - [`memory`]: an in-memory controller used by tests

pub mod connector;
pub mod memory;
pub mod object;

pub use connector::ApiConnector;
pub use memory::{ApiCall, ApiOperation, InMemoryApiConnector};
pub use object::{
    AddressMatch, ApiObject, ApiObjectBody, ApiObjectType, IpamReference, IpamSubnet,
    ObjectReference, PolicyDirection, PolicyRule, PortRange, SimpleAction, SubnetType,
};
