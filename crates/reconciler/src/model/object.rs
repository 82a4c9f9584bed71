//! Lifecycle interface shared by every model node, plus the helpers the
//! concrete types compose it from.

use async_trait::async_trait;
use tracing::{debug, info, warn};
use vnc_core::ResultExt;

use crate::api::{ApiConnector, ApiObject, ApiObjectType};
use crate::controller::ModelController;
use crate::error::{Error, Result};
use crate::model::graph::ModelGraph;
use crate::model::key::ModelKey;
use crate::model::node::ModelNode;

/// Desired-state lifecycle of one controller resource.
///
/// `update` and `verify` require the node to have been built. `delete` and
/// `destroy` are best-effort and never fail.
#[async_trait]
pub trait ModelObject: Send + Sync {
    fn graph(&self) -> &ModelGraph;

    fn key(&self) -> &ModelKey {
        self.graph().key()
    }

    /// Whether desired state has been populated.
    async fn is_initialized(&self) -> bool;

    /// Create or update the remote object, then cascade to successors.
    async fn update(&self, controller: &ModelController) -> Result<()>;

    /// Re-resolve the remote object and check it against desired state.
    async fn verify(&self, controller: &ModelController) -> Result<bool>;

    /// Diff this node against another snapshot of the same identity.
    async fn compare(&self, _controller: &ModelController, other: &ModelNode) -> Result<bool> {
        ensure_same_identity(self.key(), other)?;
        Ok(true)
    }

    /// Delete successors, then the remote object. Failures are logged.
    async fn delete(&self, controller: &ModelController);

    /// Delete, destroy successors and detach from the graph.
    async fn destroy(&self, controller: &ModelController);
}

pub(crate) fn ensure_initialized(initialized: bool, key: &ModelKey) -> Result<()> {
    if initialized {
        Ok(())
    } else {
        Err(Error::not_initialized(key))
    }
}

pub(crate) fn ensure_same_identity(key: &ModelKey, other: &ModelNode) -> Result<()> {
    if key == other.key() {
        Ok(())
    } else {
        Err(Error::identity_mismatch(key, other.key()))
    }
}

/// Create (`exists == false`) or update the remote object.
///
/// Transport failures and refusals both surface as `OperationFailed`.
pub(crate) async fn push(api: &dyn ApiConnector, obj: &mut ApiObject, exists: bool) -> Result<()> {
    let operation = if exists { "update" } else { "create" };
    let object = obj.describe();
    let accepted = if exists {
        api.update(obj).await
    } else {
        api.create(obj).await
    }
    .map_err(|e| Error::operation_failed(operation, object.clone(), e.to_string()))?;

    if !accepted {
        warn!(object = %object, operation, "Controller refused request");
        return Err(Error::operation_failed(operation, object, "refused by controller"));
    }
    if exists {
        debug!(object = %object, "Updated");
    } else {
        info!(object = %object, uuid = ?obj.uuid, "Created");
    }
    Ok(())
}

/// Resolve a remote object by uuid, or start a transient descriptor.
///
/// Returns the object and whether it already existed.
pub(crate) async fn resolve_by_id(
    api: &dyn ApiConnector,
    cached: Option<&ApiObject>,
    kind: ApiObjectType,
    uuid: &str,
    transient: impl FnOnce() -> ApiObject + Send,
) -> Result<(ApiObject, bool)> {
    if let Some(handle) = cached {
        return Ok((handle.clone(), true));
    }
    Ok(match api.find_by_id(kind, uuid).await? {
        Some(found) => (found, true),
        None => (transient(), false),
    })
}

/// Resolve a remote object by fq-name, or start a transient descriptor.
pub(crate) async fn resolve_by_fqn(
    api: &dyn ApiConnector,
    cached: Option<&ApiObject>,
    kind: ApiObjectType,
    fq_name: &[String],
    transient: impl FnOnce() -> ApiObject + Send,
) -> Result<(ApiObject, bool)> {
    if let Some(handle) = cached {
        return Ok((handle.clone(), true));
    }
    Ok(match api.find_by_fqn(kind, fq_name).await? {
        Some(found) => (found, true),
        None => (transient(), false),
    })
}

/// Delete a remote object, logging instead of failing.
pub(crate) async fn delete_logged(api: &dyn ApiConnector, obj: &ApiObject) {
    let context = format!("delete {}", obj.describe());
    if api.delete(obj).await.into_option_logged(&context).is_some() {
        info!(object = %obj.describe(), "Deleted");
    }
}

/// Delete a remote object by uuid, logging instead of failing.
pub(crate) async fn delete_by_id_logged(api: &dyn ApiConnector, kind: ApiObjectType, uuid: &str) {
    let context = format!("delete {kind} {uuid}");
    if api
        .delete_by_id(kind, uuid)
        .await
        .into_option_logged(&context)
        .is_some()
    {
        info!(kind = %kind, uuid, "Deleted");
    }
}

pub(crate) async fn update_successors(graph: &ModelGraph, controller: &ModelController) -> Result<()> {
    for successor in graph.successors() {
        successor.update(controller).await?;
    }
    Ok(())
}

pub(crate) async fn verify_successors(graph: &ModelGraph, controller: &ModelController) -> Result<bool> {
    for successor in graph.successors() {
        if !successor.verify(controller).await? {
            debug!(owner = %graph.key(), successor = %successor.key(), "Successor failed verification");
            return Ok(false);
        }
    }
    Ok(true)
}

pub(crate) async fn delete_successors(graph: &ModelGraph, controller: &ModelController) {
    for successor in graph.successors() {
        successor.delete(controller).await;
    }
}

/// Destroy every successor, then detach them.
pub(crate) async fn destroy_successors(graph: &ModelGraph, controller: &ModelController) {
    for successor in graph.successors() {
        successor.destroy(controller).await;
    }
    graph.clear_successors();
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;

    use super::*;
    use crate::api::{ApiObjectBody, InMemoryApiConnector};
    use crate::api::object::Project;
    use crate::model::VmInterfaceModel;

    #[test]
    fn test_ensure_initialized() {
        let key = ModelKey::VmInterface("nic-1".into());
        assert!(ensure_initialized(true, &key).is_ok());
        assert!(matches!(
            ensure_initialized(false, &key),
            Err(Error::NotInitialized { .. })
        ));
    }

    #[test]
    fn test_identity_mismatch() {
        let key = ModelKey::VmInterface("nic-1".into());
        let other: ModelNode = Arc::new(VmInterfaceModel::new("nic-2")).into();
        assert!(matches!(
            ensure_same_identity(&key, &other),
            Err(Error::IdentityMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_push_reports_refusal() {
        let api = InMemoryApiConnector::new();
        let mut project = ApiObject::new(
            vec!["d".into(), "p".into()],
            ApiObjectBody::Project(Project {}),
        );
        push(&api, &mut project, false).await.unwrap();

        let mut duplicate = ApiObject::new(
            vec!["d".into(), "p".into()],
            ApiObjectBody::Project(Project {}),
        );
        let result = push(&api, &mut duplicate, false).await;
        assert!(matches!(result, Err(Error::OperationFailed { .. })));
    }

    #[tokio::test]
    async fn test_update_of_missing_object_is_refused() {
        let api = InMemoryApiConnector::new();
        let mut project = ApiObject::new(
            vec!["d".into(), "p".into()],
            ApiObjectBody::Project(Project {}),
        )
        .with_uuid("missing");
        let result = push(&api, &mut project, true).await;
        assert!(matches!(result, Err(Error::OperationFailed { .. })));
    }
}
