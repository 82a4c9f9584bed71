//! The model graph.
//!
//! Every controller resource the orchestrator manages is represented by a
//! model node holding its desired state. Nodes own other nodes (successors)
//! and remember their owners (ancestors) by key. Lifecycle operations run
//! over the graph in key order:
//!
//! - **build**: recompute desired state from the primary store
//! - **update**: create or update the remote object, then cascade
//! - **verify**: check remote state against desired state, then cascade
//! - **compare**: diff two independently resolved snapshots of one identity
//! - **delete** / **destroy**: remove remote objects, then unwire the node

pub mod floating_ip;
pub mod floating_ip_pool;
pub mod graph;
pub mod instance_ip;
pub mod key;
pub mod network_policy;
pub mod node;
pub mod object;
pub mod service_instance;
pub mod virtual_machine;
pub mod virtual_network;
pub mod vm_interface;

pub use floating_ip::FloatingIpModel;
pub use floating_ip_pool::FloatingIpPoolModel;
pub use graph::ModelGraph;
pub use instance_ip::InstanceIpModel;
pub use key::{ModelKey, NetworkKey};
pub use network_policy::NetworkPolicyModel;
pub use node::ModelNode;
pub use object::ModelObject;
pub use service_instance::ServiceInstanceModel;
pub use virtual_machine::{VirtualMachineModel, parse_service_instance_link};
pub use virtual_network::{
    SubnetDiff, VirtualNetworkModel, desired_subnets, snapshots_match, subnet_difference,
};
pub use vm_interface::VmInterfaceModel;
