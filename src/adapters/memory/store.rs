//! In-memory declarative store.
//!
//! Objects are held as JSON documents per kind, the way an API server keeps
//! them, and decoded into typed [`Object<S>`] on the way out. Field indexes are
//! updated on every write from [`Spec::index_values`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{IndexField, Object, ObjectKey, ResourceKind, Spec};
use crate::domain::ports::{ResourceStore, WatchChange, WatchEvent};

const WATCH_CAPACITY: usize = 1024;

type IndexKey = (ResourceKind, IndexField);

#[derive(Default)]
struct Inner {
    objects: HashMap<ResourceKind, BTreeMap<ObjectKey, Value>>,
    indexes: HashMap<IndexKey, HashMap<String, BTreeSet<ObjectKey>>>,
    /// Values each object currently publishes, so stale entries can be dropped.
    published: HashMap<(ResourceKind, ObjectKey), Vec<(IndexField, String)>>,
    last_version: u64,
}

impl Inner {
    fn next_version(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }

    fn stored<S: Spec>(&self, key: &ObjectKey) -> DomainResult<Object<S>> {
        let value = self
            .objects
            .get(&S::KIND)
            .and_then(|objects| objects.get(key))
            .ok_or_else(|| DomainError::resource_not_found(S::KIND, key.to_string()))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    fn put<S: Spec>(&mut self, object: &Object<S>) -> DomainResult<()> {
        let key = object.key();
        self.unindex(S::KIND, &key);

        let mut entries = Vec::new();
        for field in IndexField::ALL {
            for value in S::index_values(object, field) {
                self.indexes
                    .entry((S::KIND, field))
                    .or_default()
                    .entry(value.clone())
                    .or_default()
                    .insert(key.clone());
                entries.push((field, value));
            }
        }
        self.published.insert((S::KIND, key.clone()), entries);

        let value = serde_json::to_value(object)?;
        self.objects.entry(S::KIND).or_default().insert(key, value);
        Ok(())
    }

    fn remove(&mut self, kind: ResourceKind, key: &ObjectKey) {
        self.unindex(kind, key);
        if let Some(objects) = self.objects.get_mut(&kind) {
            objects.remove(key);
        }
    }

    fn unindex(&mut self, kind: ResourceKind, key: &ObjectKey) {
        let Some(entries) = self.published.remove(&(kind, key.clone())) else {
            return;
        };
        for (field, value) in entries {
            if let Some(index) = self.indexes.get_mut(&(kind, field)) {
                if let Some(keys) = index.get_mut(&value) {
                    keys.remove(key);
                    if keys.is_empty() {
                        index.remove(&value);
                    }
                }
            }
        }
    }
}

/// In-memory implementation of [`ResourceStore`].
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
    events: broadcast::Sender<WatchEvent>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            events,
        }
    }

    /// Number of stored objects of one kind.
    pub async fn count(&self, kind: ResourceKind) -> usize {
        let inner = self.inner.read().await;
        inner.objects.get(&kind).map_or(0, BTreeMap::len)
    }

    fn publish(&self, kind: ResourceKind, key: ObjectKey, change: WatchChange) {
        // No subscribers is fine; the store works without controllers.
        let _ = self.events.send(WatchEvent { kind, key, change });
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_version<S: Spec>(stored: &Object<S>, incoming: &Object<S>) -> DomainResult<()> {
    if stored.metadata.resource_version == incoming.metadata.resource_version {
        Ok(())
    } else {
        Err(DomainError::Conflict(format!(
            "{} {} was modified: expected version {}, found {}",
            S::KIND,
            stored.key(),
            incoming.metadata.resource_version,
            stored.metadata.resource_version
        )))
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn create<S: Spec>(&self, mut object: Object<S>) -> DomainResult<Object<S>> {
        let key = object.key();
        if key.name.is_empty() {
            return Err(DomainError::Validation(format!("{} name cannot be empty", S::KIND)));
        }

        let mut inner = self.inner.write().await;
        if inner
            .objects
            .get(&S::KIND)
            .is_some_and(|objects| objects.contains_key(&key))
        {
            return Err(DomainError::Conflict(format!("{} {key} already exists", S::KIND)));
        }

        if object.metadata.uid.is_nil() {
            object.metadata.uid = Uuid::new_v4();
        }
        object.metadata.generation = 1;
        object.metadata.resource_version = inner.next_version();
        object.metadata.created_at = Some(Utc::now());
        object.metadata.deletion_requested_at = None;

        inner.put(&object)?;
        drop(inner);

        self.publish(S::KIND, key, WatchChange::Added);
        Ok(object)
    }

    async fn get<S: Spec>(&self, key: &ObjectKey) -> DomainResult<Object<S>> {
        self.inner.read().await.stored(key)
    }

    async fn list<S: Spec>(&self, namespace: Option<&str>) -> DomainResult<Vec<Object<S>>> {
        let inner = self.inner.read().await;
        let Some(objects) = inner.objects.get(&S::KIND) else {
            return Ok(Vec::new());
        };
        objects
            .iter()
            .filter(|(key, _)| namespace.is_none_or(|ns| key.namespace == ns))
            .map(|(_, value)| Ok(serde_json::from_value(value.clone())?))
            .collect()
    }

    async fn list_by_index<S: Spec>(
        &self,
        field: IndexField,
        value: &str,
    ) -> DomainResult<Vec<Object<S>>> {
        let inner = self.inner.read().await;
        let Some(keys) = inner
            .indexes
            .get(&(S::KIND, field))
            .and_then(|index| index.get(value))
        else {
            return Ok(Vec::new());
        };
        keys.iter().map(|key| inner.stored(key)).collect()
    }

    async fn update<S: Spec>(&self, object: Object<S>) -> DomainResult<Object<S>> {
        let key = object.key();
        let mut inner = self.inner.write().await;
        let stored: Object<S> = inner.stored(&key)?;
        check_version(&stored, &object)?;

        let mut next = stored.clone();
        next.metadata.finalizers = object.metadata.finalizers;
        if next.spec != object.spec {
            next.spec = object.spec;
            next.metadata.generation += 1;
        }
        next.metadata.resource_version = inner.next_version();

        let change = if next.metadata.is_deleting() && next.metadata.finalizers.is_empty() {
            inner.remove(S::KIND, &key);
            WatchChange::Deleted
        } else {
            inner.put(&next)?;
            WatchChange::Modified
        };
        drop(inner);

        self.publish(S::KIND, key, change);
        Ok(next)
    }

    async fn update_status<S: Spec>(&self, object: Object<S>) -> DomainResult<Object<S>> {
        let key = object.key();
        let mut inner = self.inner.write().await;
        let stored: Object<S> = inner.stored(&key)?;
        check_version(&stored, &object)?;

        let mut next = stored;
        next.status = object.status;
        next.metadata.resource_version = inner.next_version();
        inner.put(&next)?;
        drop(inner);

        self.publish(S::KIND, key, WatchChange::Modified);
        Ok(next)
    }

    async fn delete<S: Spec>(&self, key: &ObjectKey) -> DomainResult<()> {
        let mut inner = self.inner.write().await;
        let mut stored: Object<S> = inner.stored(key)?;

        let change = if stored.metadata.finalizers.is_empty() {
            inner.remove(S::KIND, key);
            WatchChange::Deleted
        } else if stored.metadata.is_deleting() {
            return Ok(());
        } else {
            stored.metadata.deletion_requested_at = Some(Utc::now());
            stored.metadata.resource_version = inner.next_version();
            inner.put(&stored)?;
            WatchChange::Modified
        };
        drop(inner);

        self.publish(S::KIND, key.clone(), change);
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}
