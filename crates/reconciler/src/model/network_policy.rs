//! Network policy: an ordered rule list attached to one or more networks.
//!
//! Rules come either from a network ACL or from a service chain joining two
//! networks through a service instance.

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use itertools::Itertools;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use vnc_core::{AclAction, AclRecord, AclRuleRecord, AclTrafficType, ResultExt};

use crate::api::object::NetworkPolicy;
use crate::api::{
    AddressMatch, ApiObject, ApiObjectBody, ApiObjectType, ObjectReference, PolicyDirection,
    PolicyRule, PortRange, SimpleAction, SubnetType,
};
use crate::controller::ModelController;
use crate::error::Result;
use crate::model::graph::ModelGraph;
use crate::model::key::ModelKey;
use crate::model::node::ModelNode;
use crate::model::object::{
    delete_logged, ensure_initialized, ensure_same_identity, push, resolve_by_id, ModelObject,
};

#[derive(Default)]
struct PolicyState {
    initialized: bool,
    entries: Vec<PolicyRule>,
    handle: Option<ApiObject>,
}

pub struct NetworkPolicyModel {
    uuid: String,
    fq_name: Vec<String>,
    graph: ModelGraph,
    state: Mutex<PolicyState>,
}

impl NetworkPolicyModel {
    pub fn new(uuid: impl Into<String>, fq_name: Vec<String>) -> Self {
        let uuid = uuid.into();
        Self {
            graph: ModelGraph::new(ModelKey::NetworkPolicy(uuid.clone())),
            uuid,
            fq_name,
            state: Mutex::new(PolicyState::default()),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn fq_name(&self) -> &[String] {
        &self.fq_name
    }

    pub fn reference(&self) -> ObjectReference {
        ObjectReference::new(Some(self.uuid.clone()), self.fq_name.clone())
    }

    pub async fn entries(&self) -> Vec<PolicyRule> {
        self.state.lock().await.entries.clone()
    }

    /// Populate rules from a network ACL, in rule-number order.
    pub async fn build_from_acl(&self, controller: &ModelController, acl: &AclRecord) -> Result<()> {
        let rules = controller.store().acl_rules(acl.id).await?;
        let entries = rules
            .iter()
            .sorted_by_key(|rule| rule.number)
            .map(rule_from_acl)
            .collect::<vnc_core::Result<Vec<_>>>()?;
        debug!(acl = %acl.name, rules = entries.len(), "Built policy from acl");

        let mut state = self.state.lock().await;
        state.entries = entries;
        state.initialized = true;
        Ok(())
    }

    /// Populate a single rule steering traffic between two networks through
    /// a service instance.
    pub async fn build_service_chain(
        &self,
        left_network: impl Into<String>,
        right_network: impl Into<String>,
        service_instance: impl Into<String>,
    ) {
        let rule = PolicyRule {
            direction: PolicyDirection::Bidirectional,
            protocol: "any".to_string(),
            src_addresses: vec![AddressMatch::VirtualNetwork(left_network.into())],
            src_ports: vec![PortRange::any()],
            dst_addresses: vec![AddressMatch::VirtualNetwork(right_network.into())],
            dst_ports: vec![PortRange::any()],
            action: SimpleAction::Pass,
            apply_service: vec![service_instance.into()],
        };
        let mut state = self.state.lock().await;
        state.entries = vec![rule];
        state.initialized = true;
    }

    async fn fetch_entries(&self, controller: &ModelController) -> Result<Option<Vec<PolicyRule>>> {
        let remote = controller
            .api()
            .find_by_id(ApiObjectType::NetworkPolicy, &self.uuid)
            .await?;
        Ok(remote
            .as_ref()
            .and_then(ApiObject::as_network_policy)
            .map(|policy| policy.entries.clone()))
    }
}

fn rule_from_acl(rule: &AclRuleRecord) -> vnc_core::Result<PolicyRule> {
    let cidrs = rule
        .source_cidrs
        .iter()
        .map(|cidr| {
            cidr.parse::<Ipv4Network>()
                .map(|net| {
                    AddressMatch::Subnet(SubnetType {
                        ip_prefix: net.network(),
                        ip_prefix_len: net.prefix(),
                    })
                })
                .map_err(|e| {
                    vnc_core::Error::invalid_record(format!(
                        "acl rule {}: bad cidr '{cidr}': {e}",
                        rule.number
                    ))
                })
        })
        .collect::<vnc_core::Result<Vec<_>>>()?;
    let remote = if cidrs.is_empty() {
        vec![AddressMatch::Any]
    } else {
        cidrs
    };
    let ports = match (rule.start_port, rule.end_port) {
        (Some(start_port), end) => PortRange {
            start_port,
            end_port: end.unwrap_or(start_port),
        },
        (None, _) => PortRange::any(),
    };
    let (src_addresses, dst_addresses) = match rule.traffic_type {
        AclTrafficType::Ingress => (remote, vec![AddressMatch::Any]),
        AclTrafficType::Egress => (vec![AddressMatch::Any], remote),
    };
    Ok(PolicyRule {
        direction: PolicyDirection::Unidirectional,
        protocol: rule.protocol.clone(),
        src_addresses,
        src_ports: vec![PortRange::any()],
        dst_addresses,
        dst_ports: vec![ports],
        action: match rule.action {
            AclAction::Allow => SimpleAction::Pass,
            AclAction::Deny => SimpleAction::Deny,
        },
        apply_service: Vec::new(),
    })
}

#[async_trait]
impl ModelObject for NetworkPolicyModel {
    fn graph(&self) -> &ModelGraph {
        &self.graph
    }

    async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    async fn update(&self, controller: &ModelController) -> Result<()> {
        let mut state = self.state.lock().await;
        ensure_initialized(state.initialized, self.key())?;

        let (mut obj, exists) = resolve_by_id(
            controller.api(),
            state.handle.as_ref(),
            ApiObjectType::NetworkPolicy,
            &self.uuid,
            || {
                ApiObject::new(
                    self.fq_name.clone(),
                    ApiObjectBody::NetworkPolicy(NetworkPolicy::default()),
                )
                .with_uuid(self.uuid.clone())
            },
        )
        .await?;
        if !exists {
            obj.parent_uuid = controller.locate_project().await?.uuid;
        }
        obj.body = ApiObjectBody::NetworkPolicy(NetworkPolicy {
            entries: state.entries.clone(),
        });
        push(controller.api(), &mut obj, exists).await?;
        state.handle = Some(obj);
        Ok(())
    }

    async fn verify(&self, controller: &ModelController) -> Result<bool> {
        let desired = {
            let state = self.state.lock().await;
            ensure_initialized(state.initialized, self.key())?;
            state.entries.clone()
        };
        match self.fetch_entries(controller).await? {
            Some(actual) if actual == desired => Ok(true),
            Some(_) => {
                warn!(key = %self.key(), "Policy rules drifted");
                Ok(false)
            }
            None => {
                warn!(key = %self.key(), "Policy missing from controller");
                self.state.lock().await.handle = None;
                Ok(false)
            }
        }
    }

    async fn compare(&self, controller: &ModelController, other: &ModelNode) -> Result<bool> {
        ensure_same_identity(self.key(), other)?;
        let Some(other) = other.as_network_policy() else {
            return Ok(false);
        };
        let desired = self.entries().await;
        Ok(other.fetch_entries(controller).await? == Some(desired))
    }

    async fn delete(&self, controller: &ModelController) {
        let handle = self.state.lock().await.handle.take();
        let target = match handle {
            Some(handle) => Some(handle),
            None => controller
                .api()
                .find_by_id(ApiObjectType::NetworkPolicy, &self.uuid)
                .await
                .into_option_logged("resolve policy for delete")
                .flatten(),
        };
        if let Some(obj) = target {
            delete_logged(controller.api(), &obj).await;
        }
    }

    async fn destroy(&self, controller: &ModelController) {
        self.delete(controller).await;
        self.graph.detach_from_owners();
        controller.database().remove_network_policy(&self.uuid);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::net::Ipv4Addr;

    use super::*;

    fn acl_rule(number: u32, traffic_type: AclTrafficType) -> AclRuleRecord {
        AclRuleRecord {
            id: u64::from(number),
            acl_id: 1,
            number,
            protocol: "tcp".to_string(),
            source_cidrs: vec!["10.1.0.0/16".to_string()],
            start_port: Some(22),
            end_port: None,
            action: AclAction::Allow,
            traffic_type,
        }
    }

    #[test]
    fn test_ingress_rule_matches_source_cidrs() {
        let rule = rule_from_acl(&acl_rule(1, AclTrafficType::Ingress)).unwrap();
        assert_eq!(
            rule.src_addresses,
            vec![AddressMatch::Subnet(SubnetType {
                ip_prefix: Ipv4Addr::new(10, 1, 0, 0),
                ip_prefix_len: 16,
            })]
        );
        assert_eq!(rule.dst_addresses, vec![AddressMatch::Any]);
        assert_eq!(
            rule.dst_ports,
            vec![PortRange {
                start_port: 22,
                end_port: 22
            }]
        );
        assert_eq!(rule.action, SimpleAction::Pass);
    }

    #[test]
    fn test_egress_rule_matches_destination() {
        let mut record = acl_rule(2, AclTrafficType::Egress);
        record.action = AclAction::Deny;
        let rule = rule_from_acl(&record).unwrap();
        assert_eq!(rule.src_addresses, vec![AddressMatch::Any]);
        assert_eq!(rule.action, SimpleAction::Deny);
    }

    #[test]
    fn test_bad_cidr_is_invalid_record() {
        let mut record = acl_rule(3, AclTrafficType::Ingress);
        record.source_cidrs = vec!["10.1.0.0/99".to_string()];
        let err = rule_from_acl(&record).unwrap_err();
        assert!(matches!(err, vnc_core::Error::InvalidRecord { .. }));
    }

    #[tokio::test]
    async fn test_service_chain_rule() {
        let policy = NetworkPolicyModel::new("p-1", vec!["d".into(), "p".into(), "fw".into()]);
        policy
            .build_service_chain("d:p:left", "d:p:right", "d:p:fw")
            .await;

        let entries = policy.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].direction, PolicyDirection::Bidirectional);
        assert_eq!(
            entries[0].src_addresses,
            vec![AddressMatch::VirtualNetwork("d:p:left".into())]
        );
        assert_eq!(entries[0].apply_service, vec!["d:p:fw".to_string()]);
        assert!(policy.is_initialized().await);
    }
}
