//! In-memory controller for testing.
//!
//! Behaves like the API server where the engine can observe it: uuids are
//! assigned on create, duplicate creates and updates of unknown objects are
//! refused, and references are completed between uuid and fq-name. Every call
//! is recorded so tests can assert on the exact traffic a reconciliation
//! produced.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::api::connector::ApiConnector;
use crate::api::object::{ApiObject, ApiObjectType};
use crate::error::{Error, Result};

/// Kind of controller call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApiOperation {
    Create,
    Update,
    Read,
    Delete,
    Find,
}

impl fmt::Display for ApiOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Read => "read",
            Self::Delete => "delete",
            Self::Find => "find",
        };
        f.write_str(name)
    }
}

/// A recorded controller call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCall {
    pub operation: ApiOperation,
    pub kind: ApiObjectType,
    /// uuid or fq-name the call addressed.
    pub target: String,
}

#[derive(Default)]
struct ControllerState {
    objects: BTreeMap<String, ApiObject>,
    fq_index: BTreeMap<(ApiObjectType, Vec<String>), String>,
    calls: Vec<ApiCall>,
    failures: BTreeSet<(ApiOperation, ApiObjectType)>,
    rejections: BTreeSet<(ApiOperation, ApiObjectType)>,
}

impl ControllerState {
    /// Record a call and decide whether it proceeds.
    fn admit(&mut self, operation: ApiOperation, kind: ApiObjectType, target: String) -> Result<bool> {
        self.calls.push(ApiCall {
            operation,
            kind,
            target,
        });
        if self.failures.contains(&(operation, kind)) {
            return Err(Error::api(
                format!("{operation} {kind}"),
                "controller unreachable",
            ));
        }
        Ok(!self.rejections.contains(&(operation, kind)))
    }

    fn locate(&self, obj: &ApiObject) -> Option<String> {
        obj.uuid
            .clone()
            .filter(|uuid| self.objects.contains_key(uuid))
            .or_else(|| {
                self.fq_index
                    .get(&(obj.kind(), obj.fq_name.clone()))
                    .cloned()
            })
    }

    fn resolve_references(&self, obj: &mut ApiObject) {
        for reference in obj.body.references_mut() {
            if reference.uuid.is_none() {
                reference.uuid = self
                    .fq_index
                    .iter()
                    .find(|((_, fq_name), _)| *fq_name == reference.fq_name)
                    .map(|(_, uuid)| uuid.clone());
            }
            if reference.fq_name.is_empty() {
                if let Some(target) = reference.uuid.as_ref().and_then(|u| self.objects.get(u)) {
                    reference.fq_name = target.fq_name.clone();
                }
            }
        }
    }

    fn store(&mut self, obj: ApiObject) -> ApiObject {
        let uuid = obj
            .uuid
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut obj = obj;
        obj.uuid = Some(uuid.clone());
        self.resolve_references(&mut obj);
        if let Some(previous) = self.objects.get(&uuid) {
            self.fq_index
                .remove(&(previous.kind(), previous.fq_name.clone()));
        }
        self.fq_index
            .insert((obj.kind(), obj.fq_name.clone()), uuid.clone());
        self.objects.insert(uuid, obj.clone());
        obj
    }

    fn remove(&mut self, kind: ApiObjectType, uuid: &str) -> Option<ApiObject> {
        let matches = self.objects.get(uuid).is_some_and(|obj| obj.kind() == kind);
        if !matches {
            return None;
        }
        let removed = self.objects.remove(uuid)?;
        self.fq_index
            .remove(&(removed.kind(), removed.fq_name.clone()));
        Some(removed)
    }
}

/// In-memory controller for testing.
#[derive(Default)]
pub struct InMemoryApiConnector {
    state: RwLock<ControllerState>,
}

impl InMemoryApiConnector {
    /// Create a new empty controller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty controller wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make every matching call fail with an API error.
    pub async fn fail_on(&self, operation: ApiOperation, kind: ApiObjectType) {
        self.state.write().await.failures.insert((operation, kind));
    }

    /// Make every matching call be refused by the server.
    pub async fn reject_on(&self, operation: ApiOperation, kind: ApiObjectType) {
        self.state.write().await.rejections.insert((operation, kind));
    }

    /// Remove all injected failures and rejections.
    pub async fn heal(&self) {
        let mut state = self.state.write().await;
        state.failures.clear();
        state.rejections.clear();
    }

    /// Every call made so far, oldest first.
    pub async fn calls(&self) -> Vec<ApiCall> {
        self.state.read().await.calls.clone()
    }

    /// Number of recorded calls of an operation on a type.
    pub async fn count(&self, operation: ApiOperation, kind: ApiObjectType) -> usize {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|call| call.operation == operation && call.kind == kind)
            .count()
    }

    /// Forget recorded calls.
    pub async fn clear_calls(&self) {
        self.state.write().await.calls.clear();
    }

    /// Insert or overwrite an object out of band, as another client would.
    pub async fn seed(&self, obj: ApiObject) -> ApiObject {
        self.state.write().await.store(obj)
    }

    /// Remove an object out of band.
    pub async fn remove(&self, kind: ApiObjectType, uuid: &str) -> Option<ApiObject> {
        self.state.write().await.remove(kind, uuid)
    }

    /// Peek at a stored object without recording a call.
    pub async fn object(&self, kind: ApiObjectType, uuid: &str) -> Option<ApiObject> {
        let state = self.state.read().await;
        state
            .objects
            .get(uuid)
            .filter(|obj| obj.kind() == kind)
            .cloned()
    }

    /// Peek at a stored object by fq-name without recording a call.
    pub async fn object_by_fqn(&self, kind: ApiObjectType, fq_name: &[String]) -> Option<ApiObject> {
        let state = self.state.read().await;
        state
            .fq_index
            .get(&(kind, fq_name.to_vec()))
            .and_then(|uuid| state.objects.get(uuid))
            .cloned()
    }

    /// All stored objects of a type.
    pub async fn objects(&self, kind: ApiObjectType) -> Vec<ApiObject> {
        self.state
            .read()
            .await
            .objects
            .values()
            .filter(|obj| obj.kind() == kind)
            .cloned()
            .collect_vec()
    }
}

#[async_trait]
impl ApiConnector for InMemoryApiConnector {
    async fn create(&self, obj: &mut ApiObject) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.admit(ApiOperation::Create, obj.kind(), obj.fq_name_string())? {
            return Ok(false);
        }
        let taken = obj.uuid.as_ref().is_some_and(|u| state.objects.contains_key(u))
            || state.fq_index.contains_key(&(obj.kind(), obj.fq_name.clone()));
        if taken {
            return Ok(false);
        }
        *obj = state.store(obj.clone());
        Ok(true)
    }

    async fn update(&self, obj: &mut ApiObject) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.admit(ApiOperation::Update, obj.kind(), obj.fq_name_string())? {
            return Ok(false);
        }
        let Some(uuid) = state.locate(obj) else {
            return Ok(false);
        };
        obj.uuid = Some(uuid);
        *obj = state.store(obj.clone());
        Ok(true)
    }

    async fn read(&self, obj: &mut ApiObject) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.admit(ApiOperation::Read, obj.kind(), obj.fq_name_string())? {
            return Ok(false);
        }
        let stored = state
            .locate(obj)
            .and_then(|uuid| state.objects.get(&uuid).cloned());
        match stored {
            Some(current) => {
                *obj = current;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, obj: &ApiObject) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.admit(ApiOperation::Delete, obj.kind(), obj.fq_name_string())? {
            return Ok(());
        }
        if let Some(uuid) = state.locate(obj) {
            state.remove(obj.kind(), &uuid);
        }
        Ok(())
    }

    async fn delete_by_id(&self, kind: ApiObjectType, uuid: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.admit(ApiOperation::Delete, kind, uuid.to_string())? {
            state.remove(kind, uuid);
        }
        Ok(())
    }

    async fn find_by_id(&self, kind: ApiObjectType, uuid: &str) -> Result<Option<ApiObject>> {
        let mut state = self.state.write().await;
        if !state.admit(ApiOperation::Find, kind, uuid.to_string())? {
            return Ok(None);
        }
        Ok(state
            .objects
            .get(uuid)
            .filter(|obj| obj.kind() == kind)
            .cloned())
    }

    async fn find_by_fqn(
        &self,
        kind: ApiObjectType,
        fq_name: &[String],
    ) -> Result<Option<ApiObject>> {
        let mut state = self.state.write().await;
        if !state.admit(ApiOperation::Find, kind, fq_name.join(":"))? {
            return Ok(None);
        }
        Ok(state
            .fq_index
            .get(&(kind, fq_name.to_vec()))
            .and_then(|uuid| state.objects.get(uuid))
            .cloned())
    }
}
