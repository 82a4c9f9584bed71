//! Context handed to every lifecycle operation.

use std::sync::Arc;

use tracing::info;
use vnc_core::{PrimaryStore, ReconcilerConfig};

use crate::api::object::{NetworkIpam, Project};
use crate::api::{ApiConnector, ApiObject, ApiObjectBody, ApiObjectType};
use crate::error::{Error, Result};
use crate::registry::ModelDatabase;

/// Primary store, controller client, registry and configuration.
///
/// Cloning is cheap and shares every collaborator.
#[derive(Clone)]
pub struct ModelController {
    store: Arc<dyn PrimaryStore>,
    api: Arc<dyn ApiConnector>,
    database: Arc<ModelDatabase>,
    config: ReconcilerConfig,
}

impl ModelController {
    /// Create a controller context with an empty registry.
    pub fn new(
        store: Arc<dyn PrimaryStore>,
        api: Arc<dyn ApiConnector>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            api,
            database: Arc::new(ModelDatabase::new()),
            config,
        }
    }

    /// Same collaborators, separate registry. Used to build a resync snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self {
            database: Arc::new(ModelDatabase::new()),
            ..self.clone()
        }
    }

    pub fn store(&self) -> &dyn PrimaryStore {
        self.store.as_ref()
    }

    pub fn api(&self) -> &dyn ApiConnector {
        self.api.as_ref()
    }

    pub fn database(&self) -> &ModelDatabase {
        &self.database
    }

    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Find the owning project, creating it on first use.
    pub async fn locate_project(&self) -> Result<ApiObject> {
        let fq_name = self.config.project_fq_name();
        if let Some(project) = self
            .api
            .find_by_fqn(ApiObjectType::Project, &fq_name)
            .await?
        {
            return Ok(project);
        }
        let mut project = ApiObject::new(fq_name, ApiObjectBody::Project(Project {}));
        self.create_required(&mut project).await?;
        Ok(project)
    }

    /// Find the IPAM subnets are attached through, creating it on first use.
    pub async fn locate_default_ipam(&self) -> Result<ApiObject> {
        let project = self.locate_project().await?;
        if let Some(ipam) = self
            .api
            .find(ApiObjectType::NetworkIpam, &project, &self.config.ipam_name)
            .await?
        {
            return Ok(ipam);
        }
        let mut ipam = ApiObject::new(
            self.config.project_child_fq_name(&self.config.ipam_name),
            ApiObjectBody::NetworkIpam(NetworkIpam {}),
        )
        .with_parent(project.uuid.clone());
        self.create_required(&mut ipam).await?;
        Ok(ipam)
    }

    async fn create_required(&self, obj: &mut ApiObject) -> Result<()> {
        let object = obj.describe();
        let created = self
            .api
            .create(obj)
            .await
            .map_err(|e| Error::operation_failed("create", object.clone(), e.to_string()))?;
        if !created {
            return Err(Error::operation_failed("create", object, "refused by controller"));
        }
        info!(object = %object, uuid = ?obj.uuid, "Created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use vnc_core::InMemoryPrimaryStore;

    use super::*;
    use crate::api::{ApiOperation, InMemoryApiConnector};

    fn controller(api: Arc<InMemoryApiConnector>) -> ModelController {
        ModelController::new(
            InMemoryPrimaryStore::new_arc(),
            api,
            ReconcilerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_locate_default_ipam_creates_once() {
        let api = InMemoryApiConnector::new_arc();
        let controller = controller(api.clone());

        let first = controller.locate_default_ipam().await.unwrap();
        let second = controller.locate_default_ipam().await.unwrap();

        assert_eq!(first.uuid, second.uuid);
        assert_eq!(
            first.fq_name,
            vec!["default-domain", "default-project", "default-network-ipam"]
        );
        assert_eq!(api.count(ApiOperation::Create, ApiObjectType::NetworkIpam).await, 1);
        assert_eq!(api.count(ApiOperation::Create, ApiObjectType::Project).await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_has_separate_registry() {
        let controller = controller(InMemoryApiConnector::new_arc());
        let snapshot = controller.snapshot();
        controller
            .database()
            .locate_virtual_machine("vm-1", "i-2-1-VM");
        assert!(snapshot.database().lookup_virtual_machine("vm-1").is_none());
    }
}
