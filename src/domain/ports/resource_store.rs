use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::errors::DomainResult;
use crate::domain::models::{IndexField, Object, ObjectKey, ResourceKind, Spec};

/// What happened to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchChange {
    Added,
    Modified,
    Deleted,
}

/// Change notification published by the store after every write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: ResourceKind,
    pub key: ObjectKey,
    pub change: WatchChange,
}

/// Port for the declarative object store.
///
/// Every write is a compare-and-swap on `metadata.resource_version`: the
/// caller hands over an owned snapshot it read earlier, and the store rejects
/// it with [`DomainError::Conflict`](crate::domain::errors::DomainError) when
/// the stored version moved on.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Insert a new object. Assigns uid, generation 1 and a version.
    async fn create<S: Spec>(&self, object: Object<S>) -> DomainResult<Object<S>>;

    /// Fetch one object; `NotFound` when absent.
    async fn get<S: Spec>(&self, key: &ObjectKey) -> DomainResult<Object<S>>;

    /// List objects of one kind, optionally restricted to a namespace.
    async fn list<S: Spec>(&self, namespace: Option<&str>) -> DomainResult<Vec<Object<S>>>;

    /// List objects whose indexed `field` contains `value`.
    async fn list_by_index<S: Spec>(
        &self,
        field: IndexField,
        value: &str,
    ) -> DomainResult<Vec<Object<S>>>;

    /// Write spec and metadata. Bumps `generation` when the spec changed and
    /// removes the object once it is deleting and has no finalizers left.
    async fn update<S: Spec>(&self, object: Object<S>) -> DomainResult<Object<S>>;

    /// Write the status block only.
    async fn update_status<S: Spec>(&self, object: Object<S>) -> DomainResult<Object<S>>;

    /// Request deletion. Objects with finalizers are only marked.
    async fn delete<S: Spec>(&self, key: &ObjectKey) -> DomainResult<()>;

    /// Subscribe to change notifications.
    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}
