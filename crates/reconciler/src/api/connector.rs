//! Controller client trait.

use async_trait::async_trait;

use crate::api::object::{ApiObject, ApiObjectType};
use crate::error::Result;

/// Object-access client of the remote network controller.
///
/// Every call may fail with [`crate::Error::Api`]. `create`, `update` and
/// `read` additionally report whether the server accepted the request.
#[async_trait]
pub trait ApiConnector: Send + Sync {
    /// Create an object. On success the server-assigned uuid is written back.
    async fn create(&self, obj: &mut ApiObject) -> Result<bool>;

    /// Replace the stored state of an existing object.
    async fn update(&self, obj: &mut ApiObject) -> Result<bool>;

    /// Refresh `obj` from the server. Returns `false` if it no longer exists.
    async fn read(&self, obj: &mut ApiObject) -> Result<bool>;

    /// Delete an object.
    async fn delete(&self, obj: &ApiObject) -> Result<()>;

    /// Delete an object by type and uuid.
    async fn delete_by_id(&self, kind: ApiObjectType, uuid: &str) -> Result<()>;

    /// Find an object by type and uuid.
    async fn find_by_id(&self, kind: ApiObjectType, uuid: &str) -> Result<Option<ApiObject>>;

    /// Find an object by type and fully-qualified name.
    async fn find_by_fqn(
        &self,
        kind: ApiObjectType,
        fq_name: &[String],
    ) -> Result<Option<ApiObject>>;

    /// Find an object by name within a parent.
    async fn find(
        &self,
        kind: ApiObjectType,
        parent: &ApiObject,
        name: &str,
    ) -> Result<Option<ApiObject>> {
        let mut fq_name = parent.fq_name.clone();
        fq_name.push(name.to_string());
        self.find_by_fqn(kind, &fq_name).await
    }

    /// Resolve the uuid of an object by name within a parent.
    async fn find_by_name(
        &self,
        kind: ApiObjectType,
        parent: &ApiObject,
        name: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .find(kind, parent, name)
            .await?
            .and_then(|obj| obj.uuid))
    }
}
