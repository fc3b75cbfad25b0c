//! YAML manifests used to seed the in-memory store.
//!
//! A manifest file holds one or more `---`-separated documents:
//!
//! ```yaml
//! kind: Contact
//! metadata:
//!   namespace: default
//!   name: jane
//! spec:
//!   email: jane@example.com
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ContactGroupMembershipRemovalSpec, ContactGroupMembershipSpec, ContactGroupSpec, ContactSpec,
    EmailSpec, EmailTemplateSpec, Object, ObjectKey, ResourceKind, Spec, UserSpec,
};
use crate::domain::ports::ResourceStore;

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(bound = "S: Spec")]
pub struct Document<S> {
    pub metadata: ManifestMeta,
    pub spec: S,
}

/// One declared resource, tagged by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum Manifest {
    Email(Document<EmailSpec>),
    EmailTemplate(Document<EmailTemplateSpec>),
    User(Document<UserSpec>),
    Contact(Document<ContactSpec>),
    ContactGroup(Document<ContactGroupSpec>),
    ContactGroupMembership(Document<ContactGroupMembershipSpec>),
    ContactGroupMembershipRemoval(Document<ContactGroupMembershipRemovalSpec>),
}

impl Manifest {
    /// Parse every document in a YAML string.
    pub fn parse_all(source: &str) -> DomainResult<Vec<Self>> {
        serde_yaml::Deserializer::from_str(source)
            .map(|document| {
                Self::deserialize(document)
                    .map_err(|e| DomainError::Serialization(format!("invalid manifest: {e}")))
            })
            .collect()
    }

    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Email(_) => ResourceKind::Email,
            Self::EmailTemplate(_) => ResourceKind::EmailTemplate,
            Self::User(_) => ResourceKind::User,
            Self::Contact(_) => ResourceKind::Contact,
            Self::ContactGroup(_) => ResourceKind::ContactGroup,
            Self::ContactGroupMembership(_) => ResourceKind::ContactGroupMembership,
            Self::ContactGroupMembershipRemoval(_) => ResourceKind::ContactGroupMembershipRemoval,
        }
    }

    /// Create the object, or replace the spec of an existing one.
    pub async fn apply<St: ResourceStore>(self, store: &St) -> DomainResult<ObjectKey> {
        match self {
            Self::Email(doc) => apply_document(store, doc).await,
            Self::EmailTemplate(doc) => apply_document(store, doc).await,
            Self::User(doc) => apply_document(store, doc).await,
            Self::Contact(doc) => apply_document(store, doc).await,
            Self::ContactGroup(doc) => apply_document(store, doc).await,
            Self::ContactGroupMembership(doc) => apply_document(store, doc).await,
            Self::ContactGroupMembershipRemoval(doc) => apply_document(store, doc).await,
        }
    }
}

async fn apply_document<St: ResourceStore, S: Spec>(
    store: &St,
    doc: Document<S>,
) -> DomainResult<ObjectKey> {
    let key = ObjectKey::new(doc.metadata.namespace, doc.metadata.name);
    match store.get::<S>(&key).await {
        Ok(mut existing) => {
            existing.spec = doc.spec;
            store.update(existing).await?;
        }
        Err(e) if e.is_not_found() => {
            store
                .create(Object::new(key.namespace.clone(), key.name.clone(), doc.spec))
                .await?;
        }
        Err(e) => return Err(e),
    }
    Ok(key)
}

/// Apply every `*.yaml` / `*.yml` file in `dir`, in file-name order.
pub async fn load_manifests<St: ResourceStore>(
    store: &St,
    dir: &Path,
) -> DomainResult<Vec<(ResourceKind, ObjectKey)>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| DomainError::Internal(format!("failed to read {}: {e}", dir.display())))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
        })
        .collect();
    files.sort();

    let mut applied = Vec::new();
    for path in files {
        let source = std::fs::read_to_string(&path)
            .map_err(|e| DomainError::Internal(format!("failed to read {}: {e}", path.display())))?;
        for manifest in Manifest::parse_all(&source)? {
            let kind = manifest.kind();
            let key = manifest.apply(store).await?;
            debug!(%kind, %key, file = %path.display(), "Applied manifest");
            applied.push((kind, key));
        }
    }

    info!(count = applied.len(), dir = %dir.display(), "Loaded manifests");
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryStore;
    use crate::domain::models::{Contact, ContactGroupMembership};

    const MANIFEST: &str = r"
kind: Contact
metadata:
  namespace: default
  name: jane
spec:
  email: jane@example.com
  given_name: Jane
---
kind: ContactGroupMembership
metadata:
  namespace: default
  name: jane-news
spec:
  contact_ref:
    name: jane
  contact_group_ref:
    name: news
";

    #[test]
    fn test_parse_multi_document() {
        let manifests = Manifest::parse_all(MANIFEST).unwrap();
        let kinds: Vec<_> = manifests.iter().map(Manifest::kind).collect();
        assert_eq!(
            kinds,
            vec![ResourceKind::Contact, ResourceKind::ContactGroupMembership]
        );
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = Manifest::parse_all("kind: Pod\nmetadata: {name: x}\nspec: {}\n").unwrap_err();
        assert!(matches!(err, DomainError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_load_manifests_creates_then_updates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("01-contacts.yaml"), MANIFEST).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let store = InMemoryStore::new();

        let applied = load_manifests(&store, dir.path()).await.unwrap();
        assert_eq!(applied.len(), 2);
        let membership: ContactGroupMembership = store
            .get(&ObjectKey::new("default", "jane-news"))
            .await
            .unwrap();
        assert_eq!(membership.spec.contact_group_ref.name, "news");

        std::fs::write(
            dir.path().join("01-contacts.yaml"),
            MANIFEST.replace("jane@example.com", "jane@new.example.com"),
        )
        .unwrap();
        load_manifests(&store, dir.path()).await.unwrap();

        let contact: Contact = store.get(&ObjectKey::new("default", "jane")).await.unwrap();
        assert_eq!(contact.spec.email, "jane@new.example.com");
        assert_eq!(contact.generation(), 2);
    }
}
