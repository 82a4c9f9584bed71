//! Successor and ancestor bookkeeping shared by every model node.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::model::key::ModelKey;
use crate::model::node::ModelNode;

type SharedSets = Arc<Mutex<GraphSets>>;

#[derive(Default)]
struct GraphSets {
    successors: BTreeMap<ModelKey, ModelNode>,
    /// Owner key plus a back-pointer to the owner's sets. Both are written by
    /// the owner's `add_successor` and cleared by its `remove_successor`.
    ancestors: BTreeMap<ModelKey, Weak<Mutex<GraphSets>>>,
}

/// Ownership edges of one node.
///
/// Successors are held strongly, ordered by key. Ancestors are held as owner
/// keys with a weak back-pointer, maintained only by
/// [`ModelGraph::add_successor`] and [`ModelGraph::remove_successor`] on the
/// owner. At most one lock is held at a time, and never across an await.
pub struct ModelGraph {
    key: ModelKey,
    sets: SharedSets,
}

impl ModelGraph {
    pub fn new(key: ModelKey) -> Self {
        Self {
            key,
            sets: SharedSets::default(),
        }
    }

    /// Key of the node owning this graph.
    pub const fn key(&self) -> &ModelKey {
        &self.key
    }

    /// Add `child` as a successor and record this node as its ancestor.
    ///
    /// Returns `false` when a successor with the same key already exists.
    pub fn add_successor(&self, child: ModelNode) -> bool {
        let child_key = child.key().clone();
        {
            let mut sets = self.sets.lock();
            if sets.successors.contains_key(&child_key) {
                return false;
            }
            sets.successors.insert(child_key, child.clone());
        }
        child
            .graph()
            .sets
            .lock()
            .ancestors
            .insert(self.key.clone(), Arc::downgrade(&self.sets));
        true
    }

    /// Detach the successor with `key`, dropping this node from its ancestors.
    pub fn remove_successor(&self, key: &ModelKey) -> Option<ModelNode> {
        let removed = self.sets.lock().successors.remove(key);
        if let Some(child) = &removed {
            child.graph().sets.lock().ancestors.remove(&self.key);
        }
        removed
    }

    /// Detach every successor. Returns them in key order.
    pub fn clear_successors(&self) -> Vec<ModelNode> {
        let drained = std::mem::take(&mut self.sets.lock().successors);
        drained
            .into_values()
            .inspect(|child| {
                child.graph().sets.lock().ancestors.remove(&self.key);
            })
            .collect()
    }

    /// Snapshot of the successors in key order.
    pub fn successors(&self) -> Vec<ModelNode> {
        self.sets.lock().successors.values().cloned().collect()
    }

    pub fn successor(&self, key: &ModelKey) -> Option<ModelNode> {
        self.sets.lock().successors.get(key).cloned()
    }

    pub fn contains_successor(&self, key: &ModelKey) -> bool {
        self.sets.lock().successors.contains_key(key)
    }

    pub fn successor_count(&self) -> usize {
        self.sets.lock().successors.len()
    }

    /// Successors of one concrete type, in key order.
    pub fn filter_successors<T>(&self, select: impl Fn(&ModelNode) -> Option<&Arc<T>>) -> Vec<Arc<T>> {
        self.sets
            .lock()
            .successors
            .values()
            .filter_map(|node| select(node).cloned())
            .collect()
    }

    /// Snapshot of the owner keys.
    pub fn ancestors(&self) -> Vec<ModelKey> {
        self.sets.lock().ancestors.keys().cloned().collect()
    }

    pub fn has_ancestor(&self, key: &ModelKey) -> bool {
        self.sets.lock().ancestors.contains_key(key)
    }

    pub fn ancestor_count(&self) -> usize {
        self.sets.lock().ancestors.len()
    }

    /// Remove this node from every owner's successors, roots or not.
    ///
    /// Returns the number of owners that still held it.
    pub fn detach_from_owners(&self) -> usize {
        let owners = std::mem::take(&mut self.sets.lock().ancestors);
        owners
            .into_values()
            .filter_map(|owner| owner.upgrade())
            .filter(|owner| owner.lock().successors.remove(&self.key).is_some())
            .count()
    }
}

impl fmt::Debug for ModelGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sets = self.sets.lock();
        f.debug_struct("ModelGraph")
            .field("key", &self.key)
            .field("successors", &sets.successors.keys().collect::<Vec<_>>())
            .field("ancestors", &sets.ancestors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstanceIpModel, ModelObject, VirtualMachineModel, VmInterfaceModel};

    fn interface(uuid: &str) -> Arc<VmInterfaceModel> {
        Arc::new(VmInterfaceModel::new(uuid))
    }

    #[test]
    fn test_add_successor_records_ancestor() {
        let vm = VirtualMachineModel::new("vm-1", "i-2-1-VM");
        let nic = interface("nic-1");

        assert!(vm.graph().add_successor(nic.clone().into()));
        assert!(vm.graph().contains_successor(nic.graph().key()));
        assert!(nic.graph().has_ancestor(vm.graph().key()));
        assert_eq!(nic.graph().ancestor_count(), 1);
    }

    #[test]
    fn test_duplicate_successor_rejected() {
        let vm = VirtualMachineModel::new("vm-1", "i-2-1-VM");
        let nic = interface("nic-1");
        let same_key = interface("nic-1");

        assert!(vm.graph().add_successor(nic.into()));
        assert!(!vm.graph().add_successor(same_key.clone().into()));
        assert_eq!(vm.graph().successor_count(), 1);
        assert_eq!(same_key.graph().ancestor_count(), 0);
    }

    #[test]
    fn test_remove_successor_clears_ancestor() {
        let vm = VirtualMachineModel::new("vm-1", "i-2-1-VM");
        let nic = interface("nic-1");
        vm.graph().add_successor(nic.clone().into());

        let removed = vm.graph().remove_successor(nic.graph().key());
        assert!(removed.is_some());
        assert!(!nic.graph().has_ancestor(vm.graph().key()));
        assert!(vm.graph().remove_successor(nic.graph().key()).is_none());
    }

    #[test]
    fn test_clear_successors_in_key_order() {
        let vm = VirtualMachineModel::new("vm-1", "i-2-1-VM");
        for uuid in ["nic-c", "nic-a", "nic-b"] {
            vm.graph().add_successor(interface(uuid).into());
        }
        let cleared = vm.graph().clear_successors();
        let ids: Vec<_> = cleared.iter().map(|n| n.key().id().to_string()).collect();
        assert_eq!(ids, vec!["nic-a", "nic-b", "nic-c"]);
        assert_eq!(vm.graph().successor_count(), 0);
        assert!(cleared.iter().all(|n| n.graph().ancestor_count() == 0));
    }

    #[test]
    fn test_leaf_detaches_from_non_root_owner() {
        let nic = VmInterfaceModel::new("nic-1");
        let iip = Arc::new(InstanceIpModel::new("i-2-1-VM-0"));
        nic.graph().add_successor(iip.clone().into());

        assert_eq!(iip.graph().detach_from_owners(), 1);
        assert!(!nic.graph().contains_successor(iip.graph().key()));
        assert_eq!(iip.graph().ancestor_count(), 0);
        assert_eq!(iip.graph().detach_from_owners(), 0);
    }

    #[test]
    fn test_detach_leaves_every_owner() {
        let vm = VirtualMachineModel::new("vm-1", "i-2-1-VM");
        let other = VirtualMachineModel::new("vm-2", "i-2-2-VM");
        let nic = interface("nic-1");
        vm.graph().add_successor(nic.clone().into());
        other.graph().add_successor(nic.clone().into());

        assert_eq!(nic.graph().detach_from_owners(), 2);
        assert_eq!(vm.graph().successor_count(), 0);
        assert_eq!(other.graph().successor_count(), 0);
    }

    #[test]
    fn test_filter_successors_by_type() {
        let nic = VmInterfaceModel::new("nic-1");
        nic.graph()
            .add_successor(Arc::new(InstanceIpModel::new("i-2-1-VM-0")).into());
        assert_eq!(nic.graph().filter_successors(ModelNode::as_instance_ip).len(), 1);
        assert!(nic.graph().filter_successors(ModelNode::as_floating_ip).is_empty());
    }
}
