//! Property-based tests for key ordering and graph bookkeeping using proptest.
//!
//! Properties verified:
//! - Successors always iterate in key order
//! - Key lookup finds exactly the inserted members, never a false positive
//! - Every successor records its owner, and forgets it once removed

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use vnc_reconciler::{
    InstanceIpModel, ModelKey, ModelNode, ModelObject, NetworkKey, VirtualMachineModel,
    VmInterfaceModel,
};

fn uuid_strategy() -> impl Strategy<Value = String> {
    "[a-f0-9]{1,8}"
}

fn key_strategy() -> impl Strategy<Value = ModelKey> {
    prop_oneof![
        uuid_strategy().prop_map(ModelKey::FloatingIp),
        Just(ModelKey::FloatingIpPool),
        uuid_strategy().prop_map(ModelKey::InstanceIp),
        uuid_strategy().prop_map(ModelKey::NetworkPolicy),
        uuid_strategy().prop_map(ModelKey::ServiceInstance),
        uuid_strategy().prop_map(ModelKey::VirtualMachine),
        uuid_strategy().prop_map(|u| ModelKey::VirtualNetwork(NetworkKey::Dynamic(u))),
        uuid_strategy().prop_map(|u| ModelKey::VirtualNetwork(NetworkKey::Static(u))),
        uuid_strategy().prop_map(ModelKey::VmInterface),
    ]
}

/// Interfaces and instance IPs, so the owner holds mixed successor types.
fn children(interfaces: &[String], addresses: &[String]) -> Vec<ModelNode> {
    let vmis = interfaces
        .iter()
        .map(|uuid| ModelNode::from(Arc::new(VmInterfaceModel::new(uuid.clone()))));
    let iips = addresses
        .iter()
        .map(|name| ModelNode::from(Arc::new(InstanceIpModel::new(name.clone()))));
    vmis.chain(iips).collect()
}

// ==========================================================================
// PROPERTY: Key order
// ==========================================================================

proptest! {
    /// Keys order by resource type first, then by identity.
    #[test]
    fn prop_keys_order_by_type_then_identity(a in key_strategy(), b in key_strategy()) {
        if a.type_name() != b.type_name() {
            prop_assert_eq!(a.cmp(&b), a.type_name().cmp(b.type_name()));
        } else if a.type_name() != "virtual-network" {
            prop_assert_eq!(a.cmp(&b), a.id().cmp(b.id()));
        }
    }

    /// Successors iterate in non-decreasing key order regardless of
    /// insertion order.
    #[test]
    fn prop_successors_iterate_in_key_order(
        interfaces in prop::collection::vec(uuid_strategy(), 0..12),
        addresses in prop::collection::vec(uuid_strategy(), 0..12),
    ) {
        let vm = VirtualMachineModel::new("vm-1", "i-2-1-VM");
        for child in children(&interfaces, &addresses).into_iter().rev() {
            vm.graph().add_successor(child);
        }

        let keys: Vec<ModelKey> = vm.graph().successors().iter().map(|n| n.key().clone()).collect();
        prop_assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]));

        let distinct = interfaces.iter().collect::<BTreeSet<_>>().len()
            + addresses.iter().collect::<BTreeSet<_>>().len();
        prop_assert_eq!(keys.len(), distinct);
    }
}

// ==========================================================================
// PROPERTY: Lookup by key
// ==========================================================================

proptest! {
    /// A key built from the identity alone finds the member or nothing.
    #[test]
    fn prop_lookup_has_no_false_positives(
        inserted in prop::collection::btree_set(uuid_strategy(), 0..10),
        wanted in uuid_strategy(),
    ) {
        let vm = VirtualMachineModel::new("vm-1", "i-2-1-VM");
        let interfaces: Vec<String> = inserted.iter().cloned().collect();
        for child in children(&interfaces, &[]) {
            vm.graph().add_successor(child);
        }

        let found = vm.graph().successor(&ModelKey::VmInterface(wanted.clone()));
        prop_assert_eq!(found.is_some(), inserted.contains(&wanted));
        if let Some(node) = found {
            prop_assert_eq!(node.key(), &ModelKey::VmInterface(wanted.clone()));
        }

        // Same identity under another type is a different key.
        prop_assert!(vm.graph().successor(&ModelKey::InstanceIp(wanted)).is_none());
    }
}

// ==========================================================================
// PROPERTY: Graph consistency
// ==========================================================================

proptest! {
    /// Every successor has exactly one ancestor entry for its owner; removal
    /// clears both sides.
    #[test]
    fn prop_successor_and_ancestor_stay_consistent(
        interfaces in prop::collection::btree_set(uuid_strategy(), 1..10),
        removed in prop::collection::btree_set(uuid_strategy(), 0..10),
    ) {
        let vm = VirtualMachineModel::new("vm-1", "i-2-1-VM");
        let owner = vm.graph().key().clone();
        let interfaces: Vec<String> = interfaces.into_iter().collect();
        for child in children(&interfaces, &[]) {
            prop_assert!(vm.graph().add_successor(child.clone()));
            prop_assert!(!vm.graph().add_successor(child));
        }

        for child in vm.graph().successors() {
            let owners = child.graph().ancestors();
            prop_assert_eq!(owners.iter().filter(|k| **k == owner).count(), 1);
        }

        for uuid in &removed {
            let key = ModelKey::VmInterface(uuid.clone());
            if let Some(child) = vm.graph().remove_successor(&key) {
                prop_assert!(!child.graph().has_ancestor(&owner));
            }
            prop_assert!(!vm.graph().contains_successor(&key));
        }

        let remaining = interfaces.iter().filter(|u| !removed.contains(*u)).count();
        prop_assert_eq!(vm.graph().successor_count(), remaining);
        for child in vm.graph().successors() {
            prop_assert!(child.graph().has_ancestor(&owner));
        }
    }
}
