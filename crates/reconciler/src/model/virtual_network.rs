//! Virtual network.
//!
//! Dynamic networks are owned by the orchestrator: `update` creates or
//! updates them with their subnets and policy. Static networks are owned by
//! the controller: `update` only resolves them so interfaces can reference
//! them.
//!
//! A network owns its interfaces, at most one floating-IP pool (public
//! networks) and at most one policy. The policy may be shared with another
//! network when it implements a service chain; shared policies are never
//! deleted or destroyed through a network.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use itertools::Itertools;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use vnc_core::{NetworkRecord, RecordId, ReconcilerConfig, TrafficType};

use crate::api::object::VirtualNetwork;
use crate::api::{
    ApiObject, ApiObjectBody, ApiObjectType, IpamReference, IpamSubnet, ObjectReference,
};
use crate::controller::ModelController;
use crate::error::{Error, Result};
use crate::model::floating_ip_pool::FloatingIpPoolModel;
use crate::model::graph::ModelGraph;
use crate::model::key::{ModelKey, NetworkKey};
use crate::model::network_policy::NetworkPolicyModel;
use crate::model::node::ModelNode;
use crate::model::object::{
    delete_by_id_logged, ensure_initialized, ensure_same_identity, push, resolve_by_id,
    verify_successors, ModelObject,
};
use crate::model::vm_interface::VmInterfaceModel;

#[derive(Default)]
struct NetworkState {
    initialized: bool,
    name: String,
    fq_name: Vec<String>,
    network_id: Option<RecordId>,
    traffic_type: Option<TrafficType>,
    active: bool,
    subnets: Vec<IpamSubnet>,
    /// Uuid of the policy built from this network's ACL.
    acl_policy: Option<String>,
    handle: Option<ApiObject>,
}

impl NetworkState {
    fn desired_body(
        &self,
        ipam: Option<ObjectReference>,
        policy: Option<&NetworkPolicyModel>,
    ) -> VirtualNetwork {
        VirtualNetwork {
            network_ipam_refs: ipam
                .filter(|_| !self.subnets.is_empty())
                .map(|ipam| IpamReference {
                    ipam,
                    subnets: self.subnets.clone(),
                })
                .into_iter()
                .collect(),
            network_policy_refs: policy
                .map(NetworkPolicyModel::reference)
                .into_iter()
                .collect(),
            router_external: self.traffic_type == Some(TrafficType::Public),
        }
    }
}

/// Subnets present on only one side of a comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubnetDiff {
    /// Desired but absent from the controller.
    pub missing: Vec<IpamSubnet>,
    /// Present on the controller but not desired.
    pub unexpected: Vec<IpamSubnet>,
}

impl SubnetDiff {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// Order-independent difference between desired and actual subnets.
pub fn subnet_difference(desired: &[IpamSubnet], actual: &[IpamSubnet]) -> SubnetDiff {
    let desired: BTreeSet<_> = desired.iter().copied().collect();
    let actual: BTreeSet<_> = actual.iter().copied().collect();
    SubnetDiff {
        missing: desired.difference(&actual).copied().collect(),
        unexpected: actual.difference(&desired).copied().collect(),
    }
}

/// Shallow snapshot diff: the first subnet under the first IPAM reference
/// and the first policy reference. Nothing else is compared, so extra VLAN
/// subnets never count as drift here; `verify` diffs the full set.
pub fn snapshots_match(ours: &VirtualNetwork, theirs: &VirtualNetwork) -> bool {
    match (ours.network_ipam_refs.first(), theirs.network_ipam_refs.first()) {
        (None, None) => {}
        (Some(a), Some(b)) => {
            let first = |subnets: &[IpamSubnet]| subnets.get(..1).unwrap_or_default().to_vec();
            if !subnet_difference(&first(&a.subnets), &first(&b.subnets)).is_empty() {
                return false;
            }
        }
        _ => return false,
    }
    if ours.network_policy_refs.len() != theirs.network_policy_refs.len() {
        return false;
    }
    match (ours.network_policy_refs.first(), theirs.network_policy_refs.first()) {
        (Some(a), Some(b)) => a.uuid == b.uuid,
        _ => true,
    }
}

/// Subnets a network should have: its CIDR, or one subnet per VLAN range.
pub async fn desired_subnets(
    controller: &ModelController,
    record: &NetworkRecord,
) -> Result<Vec<IpamSubnet>> {
    let invalid = |reason: String| Error::from(vnc_core::Error::invalid_record(reason));

    if let Some(cidr) = &record.cidr {
        let network: Ipv4Network = cidr
            .parse()
            .map_err(|e| invalid(format!("network {}: bad cidr '{cidr}': {e}", record.uuid)))?;
        return Ok(vec![IpamSubnet::new(
            network.network(),
            network.prefix(),
            record.gateway,
        )]);
    }

    let vlans = controller.store().vlans_for_network(record.id).await?;
    let mut subnets = vlans
        .iter()
        .map(|vlan| {
            let prefix = ipnetwork::ipv4_mask_to_prefix(vlan.netmask).map_err(|e| {
                invalid(format!("vlan {}: bad netmask {}: {e}", vlan.id, vlan.netmask))
            })?;
            let network = Ipv4Network::new(vlan.gateway, prefix)
                .map_err(|e| invalid(format!("vlan {}: {e}", vlan.id)))?;
            Ok(IpamSubnet::new(network.network(), prefix, Some(vlan.gateway)))
        })
        .collect::<Result<Vec<_>>>()?;
    subnets.sort();
    Ok(subnets)
}

pub struct VirtualNetworkModel {
    key: NetworkKey,
    graph: ModelGraph,
    state: Mutex<NetworkState>,
}

impl VirtualNetworkModel {
    pub fn new(key: NetworkKey) -> Self {
        Self {
            graph: ModelGraph::new(ModelKey::VirtualNetwork(key.clone())),
            key,
            state: Mutex::new(NetworkState::default()),
        }
    }

    /// Registry key for a network record.
    pub fn key_for(record: &NetworkRecord, config: &ReconcilerConfig) -> NetworkKey {
        match config.static_network_name(record.traffic_type) {
            Some(name) => NetworkKey::Static(config.project_child_fq_name(name).join(":")),
            None => NetworkKey::Dynamic(record.uuid.clone()),
        }
    }

    pub const fn network_key(&self) -> &NetworkKey {
        &self.key
    }

    pub const fn is_dynamic(&self) -> bool {
        self.key.is_dynamic()
    }

    pub async fn fq_name(&self) -> Vec<String> {
        let state = self.state.lock().await;
        if !state.fq_name.is_empty() {
            return state.fq_name.clone();
        }
        match &self.key {
            NetworkKey::Static(fq_name) => fq_name.split(':').map(str::to_string).collect(),
            NetworkKey::Dynamic(_) => Vec::new(),
        }
    }

    /// Controller uuid, once known.
    pub async fn uuid(&self) -> Option<String> {
        match &self.key {
            NetworkKey::Dynamic(uuid) => Some(uuid.clone()),
            NetworkKey::Static(_) => self
                .state
                .lock()
                .await
                .handle
                .as_ref()
                .and_then(|h| h.uuid.clone()),
        }
    }

    /// Reference carrying everything known locally about this network.
    pub async fn reference(&self) -> ObjectReference {
        ObjectReference::new(self.uuid().await, self.fq_name().await)
    }

    pub async fn subnets(&self) -> Vec<IpamSubnet> {
        self.state.lock().await.subnets.clone()
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.active
    }

    pub fn network_policy(&self) -> Option<Arc<NetworkPolicyModel>> {
        self.graph
            .filter_successors(ModelNode::as_network_policy)
            .into_iter()
            .next()
    }

    pub fn floating_ip_pool(&self) -> Option<Arc<FloatingIpPoolModel>> {
        self.graph
            .filter_successors(ModelNode::as_floating_ip_pool)
            .into_iter()
            .next()
    }

    pub fn interfaces(&self) -> Vec<Arc<VmInterfaceModel>> {
        self.graph.filter_successors(ModelNode::as_vm_interface)
    }

    /// Attach a policy, replacing any other policy of this network.
    pub fn set_network_policy(&self, policy: &Arc<NetworkPolicyModel>) -> bool {
        for existing in self.graph.filter_successors(ModelNode::as_network_policy) {
            if existing.uuid() != policy.uuid() {
                self.graph.remove_successor(existing.graph().key());
            }
        }
        self.graph.add_successor(ModelNode::from(policy.clone()))
    }

    /// Detach `policy`. A network left without a policy falls back to the
    /// one built from its ACL.
    pub async fn unset_network_policy(&self, controller: &ModelController, policy: &ModelKey) {
        self.graph.remove_successor(policy);
        if self.network_policy().is_some() {
            return;
        }
        let acl_policy = self.state.lock().await.acl_policy.clone();
        let restored = acl_policy.and_then(|uuid| controller.database().lookup_network_policy(&uuid));
        if let Some(acl) = restored {
            debug!(key = %self.key, policy = %acl.uuid(), "Restoring acl policy");
            self.set_network_policy(&acl);
        }
    }

    /// Populate from the network record.
    ///
    /// Subnets come from the CIDR or the VLAN ranges. An ACL becomes the
    /// network's policy; a public network gets a floating-IP pool.
    pub async fn build(self: &Arc<Self>, controller: &ModelController, record: &NetworkRecord) -> Result<()> {
        let config = controller.config();
        let name = config
            .static_network_name(record.traffic_type)
            .map_or_else(|| record.name.clone(), str::to_string);
        let fq_name = match &self.key {
            NetworkKey::Static(fq_name) => fq_name.split(':').map(str::to_string).collect(),
            NetworkKey::Dynamic(_) => config.project_child_fq_name(name.clone()),
        };
        let subnets = desired_subnets(controller, record).await?;

        let acl_policy = match record.acl_id {
            Some(acl_id) => {
                let acl = controller
                    .store()
                    .acl(acl_id)
                    .await?
                    .ok_or_else(|| Error::not_found("acl", acl_id))?;
                let policy = controller.database().locate_network_policy(
                    &acl.uuid,
                    &config.project_child_fq_name(acl.name.clone()),
                );
                policy.build_from_acl(controller, &acl).await?;
                Some(policy)
            }
            None => None,
        };

        let previous_acl = {
            let mut state = self.state.lock().await;
            state.name = name;
            state.fq_name = fq_name;
            state.network_id = Some(record.id);
            state.traffic_type = Some(record.traffic_type);
            state.active = record.state.is_active();
            state.subnets = subnets;
            state.initialized = true;
            std::mem::replace(
                &mut state.acl_policy,
                acl_policy.as_ref().map(|p| p.uuid().to_string()),
            )
        };

        match acl_policy {
            Some(policy) => {
                self.set_network_policy(&policy);
            }
            None => {
                if let Some(uuid) = previous_acl {
                    self.graph.remove_successor(&ModelKey::NetworkPolicy(uuid));
                }
            }
        }

        if record.traffic_type == TrafficType::Public && self.is_dynamic() {
            let pool = self
                .floating_ip_pool()
                .unwrap_or_else(|| Arc::new(FloatingIpPoolModel::new()));
            pool.add_to_virtual_network(self).await;
            pool.build(controller, record).await?;
        }
        debug!(key = %self.key, subnets = ?self.subnets().await, "Built network");
        Ok(())
    }

    /// Make sure the remote network exists and return a reference to it.
    /// Does not cascade.
    pub async fn ensure_resolved(&self, controller: &ModelController) -> Result<ObjectReference> {
        if let Some(handle) = &self.state.lock().await.handle {
            return Ok(handle.reference());
        }
        self.sync(controller).await
    }

    /// Push this network alone: resolve static networks, create or update
    /// dynamic ones.
    async fn sync(&self, controller: &ModelController) -> Result<ObjectReference> {
        let policy = self.network_policy();
        let mut state = self.state.lock().await;
        ensure_initialized(state.initialized, self.graph.key())?;

        let uuid = match &self.key {
            NetworkKey::Static(_) => {
                let found = match &state.handle {
                    Some(handle) => handle.clone(),
                    None => controller
                        .api()
                        .find_by_fqn(ApiObjectType::VirtualNetwork, &state.fq_name)
                        .await?
                        .ok_or_else(|| Error::not_found("virtual network", &self.key))?,
                };
                let reference = found.reference();
                state.handle = Some(found);
                return Ok(reference);
            }
            NetworkKey::Dynamic(uuid) => uuid,
        };

        let (mut obj, exists) = resolve_by_id(
            controller.api(),
            state.handle.as_ref(),
            ApiObjectType::VirtualNetwork,
            uuid,
            || {
                ApiObject::new(
                    state.fq_name.clone(),
                    ApiObjectBody::VirtualNetwork(VirtualNetwork::default()),
                )
                .with_uuid(uuid.clone())
            },
        )
        .await?;
        if !exists {
            obj.parent_uuid = controller.locate_project().await?.uuid;
        }
        let ipam = if state.subnets.is_empty() {
            None
        } else {
            Some(controller.locate_default_ipam().await?.reference())
        };
        obj.display_name = Some(state.name.clone());
        obj.body = ApiObjectBody::VirtualNetwork(state.desired_body(ipam, policy.as_deref()));
        push(controller.api(), &mut obj, exists).await?;

        let reference = obj.reference();
        state.handle = Some(obj);
        Ok(reference)
    }

    async fn fetch(&self, controller: &ModelController) -> Result<Option<VirtualNetwork>> {
        let remote = match &self.key {
            NetworkKey::Static(fq_name) => {
                let fq_name = fq_name.split(':').map(str::to_string).collect_vec();
                controller
                    .api()
                    .find_by_fqn(ApiObjectType::VirtualNetwork, &fq_name)
                    .await?
            }
            NetworkKey::Dynamic(uuid) => {
                controller
                    .api()
                    .find_by_id(ApiObjectType::VirtualNetwork, uuid)
                    .await?
            }
        };
        Ok(remote.as_ref().and_then(ApiObject::as_virtual_network).cloned())
    }

    /// Policies shared with another network are left to their owner.
    fn is_shared_policy(node: &ModelNode) -> bool {
        node.as_network_policy().is_some() && node.graph().ancestor_count() > 1
    }
}

#[async_trait]
impl ModelObject for VirtualNetworkModel {
    fn graph(&self) -> &ModelGraph {
        &self.graph
    }

    async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    /// The policy is pushed before the network that references it; the
    /// remaining successors follow in key order.
    async fn update(&self, controller: &ModelController) -> Result<()> {
        let policy = self.network_policy();
        if let Some(policy) = &policy {
            policy.update(controller).await?;
        }
        self.sync(controller).await?;

        for successor in self.graph.successors() {
            if successor.as_network_policy().is_some() {
                continue;
            }
            successor.update(controller).await?;
        }
        Ok(())
    }

    async fn verify(&self, controller: &ModelController) -> Result<bool> {
        let network_id = {
            let state = self.state.lock().await;
            ensure_initialized(state.initialized, self.key())?;
            state.network_id
        };
        let Some(actual) = self.fetch(controller).await? else {
            warn!(key = %self.key, "Network missing from controller");
            self.state.lock().await.handle = None;
            return Ok(false);
        };

        if self.is_dynamic() {
            let record = match network_id {
                Some(id) => controller.store().network(id).await?,
                None => None,
            };
            let Some(record) = record else {
                warn!(key = %self.key, "Network record gone from primary store");
                return Ok(false);
            };
            let desired = desired_subnets(controller, &record).await?;
            let remote = actual
                .network_ipam_refs
                .iter()
                .flat_map(|r| r.subnets.iter().copied())
                .collect_vec();
            let diff = subnet_difference(&desired, &remote);
            if !diff.is_empty() {
                warn!(
                    key = %self.key,
                    missing = %diff.missing.iter().join(", "),
                    unexpected = %diff.unexpected.iter().join(", "),
                    "Subnets drifted"
                );
                return Ok(false);
            }
        }

        let expected = self.network_policy().map(|p| p.uuid().to_string());
        let linked = actual
            .network_policy_refs
            .first()
            .and_then(|r| r.uuid.clone());
        if expected != linked {
            warn!(key = %self.key, ?expected, ?linked, "Policy link drifted");
            return Ok(false);
        }
        verify_successors(&self.graph, controller).await
    }

    async fn compare(&self, controller: &ModelController, other: &ModelNode) -> Result<bool> {
        ensure_same_identity(self.key(), other)?;
        let Some(other) = other.as_virtual_network() else {
            return Ok(false);
        };
        let policy = self.network_policy();
        let ours = {
            let state = self.state.lock().await;
            match state.handle.as_ref().and_then(ApiObject::as_virtual_network) {
                Some(cached) => cached.clone(),
                None => {
                    let config = controller.config();
                    let ipam = ObjectReference::by_fq_name(
                        config.project_child_fq_name(config.ipam_name.clone()),
                    );
                    state.desired_body(Some(ipam), policy.as_deref())
                }
            }
        };
        let Some(theirs) = other.fetch(controller).await? else {
            warn!(key = %self.key, "Network missing from controller");
            return Ok(false);
        };
        Ok(snapshots_match(&ours, &theirs))
    }

    async fn delete(&self, controller: &ModelController) {
        for successor in self.graph.successors() {
            if Self::is_shared_policy(&successor) {
                continue;
            }
            successor.delete(controller).await;
        }
        self.state.lock().await.handle = None;
        if let NetworkKey::Dynamic(uuid) = &self.key {
            delete_by_id_logged(controller.api(), ApiObjectType::VirtualNetwork, uuid).await;
        }
    }

    async fn destroy(&self, controller: &ModelController) {
        self.delete(controller).await;
        for successor in self.graph.successors() {
            if Self::is_shared_policy(&successor) {
                continue;
            }
            successor.destroy(controller).await;
        }
        self.graph.clear_successors();
        self.graph.detach_from_owners();
        controller.database().remove_virtual_network(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn subnet(a: u8, b: u8, c: u8, len: u8, gw: u8) -> IpamSubnet {
        IpamSubnet::new(Ipv4Addr::new(a, b, c, 0), len, Some(Ipv4Addr::new(a, b, c, gw)))
    }

    fn network(subnets: Vec<IpamSubnet>, policy: Option<&str>) -> VirtualNetwork {
        VirtualNetwork {
            network_ipam_refs: if subnets.is_empty() {
                Vec::new()
            } else {
                vec![IpamReference {
                    ipam: ObjectReference::by_uuid("ipam"),
                    subnets,
                }]
            },
            network_policy_refs: policy
                .map(ObjectReference::by_uuid)
                .into_iter()
                .collect(),
            router_external: false,
        }
    }

    #[test]
    fn test_subnet_difference_is_order_independent() {
        let a = subnet(10, 0, 1, 24, 254);
        let b = subnet(10, 0, 2, 24, 254);
        assert!(subnet_difference(&[a, b], &[b, a]).is_empty());
    }

    #[test]
    fn test_subnet_difference_reports_both_directions() {
        let desired = subnet(10, 0, 1, 24, 254);
        let actual = subnet(10, 0, 1, 25, 254);
        let diff = subnet_difference(&[desired], &[actual]);
        assert_eq!(diff.missing, vec![desired]);
        assert_eq!(diff.unexpected, vec![actual]);
    }

    #[test]
    fn test_snapshots_match_requires_ipam_on_both_sides() {
        let with = network(vec![subnet(10, 0, 1, 24, 254)], None);
        let without = network(Vec::new(), None);
        assert!(!snapshots_match(&with, &without));
        assert!(!snapshots_match(&without, &with));
        assert!(snapshots_match(&without, &without));
    }

    #[test]
    fn test_snapshots_match_looks_at_first_subnet_only() {
        let one = network(vec![subnet(10, 0, 1, 24, 1)], None);
        let two = network(vec![subnet(10, 0, 1, 24, 1), subnet(10, 0, 2, 24, 1)], None);
        let other = network(vec![subnet(10, 0, 3, 24, 1), subnet(10, 0, 2, 24, 1)], None);

        assert!(snapshots_match(&one, &two));
        assert!(!snapshots_match(&two, &other));
    }

    #[test]
    fn test_snapshots_match_compares_first_policy() {
        let subnets = vec![subnet(10, 0, 1, 24, 254)];
        let a = network(subnets.clone(), Some("p-1"));
        let b = network(subnets.clone(), Some("p-2"));
        let none = network(subnets, None);
        assert!(snapshots_match(&a, &a.clone()));
        assert!(!snapshots_match(&a, &b));
        assert!(!snapshots_match(&a, &none));
    }

    #[test]
    fn test_key_for_static_and_dynamic() {
        let config = ReconcilerConfig::default();
        let guest = NetworkRecord::guest(1, "net-1", "web");
        assert_eq!(
            VirtualNetworkModel::key_for(&guest, &config),
            NetworkKey::Dynamic("net-1".into())
        );

        let control = NetworkRecord::guest(2, "net-2", "control")
            .with_traffic_type(TrafficType::Control);
        assert_eq!(
            VirtualNetworkModel::key_for(&control, &config),
            NetworkKey::Static("default-domain:default-project:__link_local__".into())
        );
    }

    #[tokio::test]
    async fn test_static_fq_name_known_before_build() {
        let network = VirtualNetworkModel::new(NetworkKey::Static("d:p:ip-fabric".into()));
        assert_eq!(network.fq_name().await, vec!["d", "p", "ip-fabric"]);
        assert_eq!(network.uuid().await, None);
    }
}
