use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Condition, ConditionStatus, ConditionType, Contact, ContactGroupMembershipSpec, ContactSpec,
    ObjectKey, Reason, RecreateRequest, ResourceKind, Severity,
};
use crate::domain::ports::ResourceStore;
use crate::services::provider_service::{ContactSync, DeleteOutcome};

use super::{Action, Context, Reconciler, StatusPatch, EMAIL_PROVIDER_FINALIZER};

/// Keeps a Contact in line with its entry on the email-delivery provider.
///
/// The provider cannot change a contact's email address in place, so an
/// address change deletes the old contact before creating the new one, and
/// every membership of the contact is told to recreate its audience entry.
pub struct ContactReconciler<St> {
    ctx: Arc<Context<St>>,
}

impl<St: ResourceStore> ContactReconciler<St> {
    pub fn new(ctx: Arc<Context<St>>) -> Self {
        Self { ctx }
    }

    async fn create(&self, contact: &Contact) -> DomainResult<()> {
        let output = self.ctx.provider.create_contact(contact).await?;
        let patch = StatusPatch::new()
            .provider_id(output.contact_id.clone())
            .observed_generation(contact.generation())
            .condition(Condition::new(
                ConditionType::EmailProviderReady,
                ConditionStatus::True,
                Reason::Created,
                format!("Contact created. Provider ID: {}", output.contact_id),
                contact.generation(),
            ))
            .aggregate(self.ctx.contact_readiness());
        self.ctx
            .transition::<ContactSpec>(
                &contact.key(),
                &patch,
                Reason::Created,
                "Contact created on email provider",
                Severity::Normal,
            )
            .await?;
        info!(contact = %contact.key(), provider_id = %output.contact_id, "Created contact");
        Ok(())
    }

    async fn update(&self, contact: &Contact) -> DomainResult<()> {
        self.request_membership_recreation(contact).await?;

        let mut patch = StatusPatch::new()
            .observed_generation(contact.generation())
            .condition(Condition::new(
                ConditionType::Updated,
                ConditionStatus::False,
                Reason::UpdatePending,
                "Waiting for email provider confirmation",
                contact.generation(),
            ));
        match self.ctx.provider.sync_contact(contact).await? {
            ContactSync::UpdatedInPlace => {
                debug!(contact = %contact.key(), "Updated contact in place");
            }
            ContactSync::Recreated(output) => {
                info!(
                    contact = %contact.key(),
                    old_provider_id = %contact.status.provider_id,
                    provider_id = %output.contact_id,
                    "Recreated contact with new email address"
                );
                patch = patch.provider_id(output.contact_id);
            }
            ContactSync::Adopted(output) => {
                info!(
                    contact = %contact.key(),
                    old_provider_id = %contact.status.provider_id,
                    provider_id = %output.contact_id,
                    "Adopted provider contact registered under new email address"
                );
                patch = patch.provider_id(output.contact_id).condition(Condition::new(
                    ConditionType::Updated,
                    ConditionStatus::True,
                    Reason::Updated,
                    "Existing provider contact adopted",
                    contact.generation(),
                ));
            }
        }
        let patch = patch.aggregate(self.ctx.contact_readiness());

        self.ctx
            .transition::<ContactSpec>(
                &contact.key(),
                &patch,
                Reason::UpdateRequested,
                "Contact update sent to email provider",
                Severity::Normal,
            )
            .await?;
        Ok(())
    }

    /// Signal every membership of `contact` that its audience entry is stale.
    async fn request_membership_recreation(&self, contact: &Contact) -> DomainResult<()> {
        let memberships = self.ctx.index.memberships_of_contact(&contact.key()).await?;
        for membership in memberships {
            let already_requested = membership
                .status
                .recreate_request
                .as_ref()
                .is_some_and(|r| r.contact_generation == contact.generation());
            if already_requested || membership.metadata.is_deleting() {
                continue;
            }
            let patch = StatusPatch::new().recreate_request(Some(RecreateRequest {
                requested_at: Utc::now(),
                contact_generation: contact.generation(),
            }));
            self.ctx
                .write_status::<ContactGroupMembershipSpec>(&membership.key(), &patch)
                .await?;
            debug!(membership = %membership.key(), "Requested membership recreation");
        }
        Ok(())
    }

    /// Deletion guard: memberships and removals first, then the provider
    /// contact. The provider delete is synchronous, so a successful delete
    /// releases the hook immediately.
    async fn finalize(&self, contact: &Contact) -> DomainResult<()> {
        let key = contact.key();

        let memberships = self.ctx.index.memberships_of_contact(&key).await?;
        self.ctx.delete_all(&memberships).await?;
        let remaining = self.ctx.index.memberships_of_contact(&key).await?;
        if !remaining.is_empty() {
            return Err(DomainError::WaitingForDependents {
                count: remaining.len(),
                kind: ResourceKind::ContactGroupMembership,
            });
        }

        let removals = self.ctx.index.removals_of_contact(&key).await?;
        self.ctx.delete_all(&removals).await?;
        let remaining = self.ctx.index.removals_of_contact(&key).await?;
        if !remaining.is_empty() {
            return Err(DomainError::WaitingForDependents {
                count: remaining.len(),
                kind: ResourceKind::ContactGroupMembershipRemoval,
            });
        }

        if !contact.status.provider_id.is_empty() {
            match self.ctx.provider.delete_contact(contact).await? {
                DeleteOutcome::Deleted => {
                    info!(
                        contact = %key,
                        provider_id = %contact.status.provider_id,
                        "Deleted provider contact"
                    );
                }
                DeleteOutcome::NotFound => {
                    debug!(contact = %key, "Provider contact already gone");
                }
            }
        }

        self.ctx
            .release_finalizer::<ContactSpec>(&key, EMAIL_PROVIDER_FINALIZER)
            .await
    }
}

/// Generation the last update pass ran for.
fn last_synced_generation(contact: &Contact) -> i64 {
    contact
        .status
        .condition(ConditionType::Updated)
        .map_or(contact.status.observed_generation, |c| c.observed_generation)
}

#[async_trait]
impl<St: ResourceStore> Reconciler for ContactReconciler<St> {
    fn name(&self) -> &'static str {
        "contact"
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Contact
    }

    async fn reconcile(&self, key: &ObjectKey) -> DomainResult<Action> {
        let contact: Contact = match self.ctx.store.get(key).await {
            Ok(contact) => contact,
            Err(e) if e.is_not_found() => return Ok(Action::Done),
            Err(e) => return Err(e),
        };

        if contact.metadata.is_deleting() {
            if contact.metadata.has_finalizer(EMAIL_PROVIDER_FINALIZER) {
                self.finalize(&contact).await?;
            }
            return Ok(Action::Done);
        }

        let contact = self
            .ctx
            .ensure_finalizer(contact, EMAIL_PROVIDER_FINALIZER)
            .await?;

        if contact.status.condition(ConditionType::EmailProviderReady).is_none() {
            self.create(&contact).await?;
            return Ok(Action::Done);
        }

        if contact.generation() > last_synced_generation(&contact) {
            self.update(&contact).await?;
        }
        Ok(Action::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::adapters::memory::{InMemoryStore, MockOperation};
    use crate::domain::models::ContactGroupMembership;

    async fn created_contact(
        h: &Harness,
        reconciler: &ContactReconciler<InMemoryStore>,
    ) -> Contact {
        h.store.create(contact("jane", "jane@example.com")).await.unwrap();
        reconciler.reconcile(&key("jane")).await.unwrap();
        h.store.get(&key("jane")).await.unwrap()
    }

    async fn edit_email(h: &Harness, address: &str) {
        let mut contact: Contact = h.store.get(&key("jane")).await.unwrap();
        contact.spec.email = address.into();
        h.store.update(contact).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_sets_provider_id_and_ready() {
        let h = Harness::new();
        let reconciler = ContactReconciler::new(h.ctx.clone());

        let contact = created_contact(&h, &reconciler).await;

        assert!(!contact.status.provider_id.is_empty());
        assert!(contact.metadata.has_finalizer(EMAIL_PROVIDER_FINALIZER));
        assert!(contact.status.is_true(ConditionType::EmailProviderReady));
        assert!(contact.status.is_true(ConditionType::Ready));
        assert!(contact.status.condition(ConditionType::Updated).is_none());
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let h = Harness::new();
        let reconciler = ContactReconciler::new(h.ctx.clone());
        let first = created_contact(&h, &reconciler).await;

        reconciler.reconcile(&key("jane")).await.unwrap();
        let second: Contact = h.store.get(&key("jane")).await.unwrap();

        assert_eq!(first.status.provider_id, second.status.provider_id);
        assert_eq!(h.email.calls(MockOperation::CreateContact).await, 1);
        assert_eq!(h.email.calls(MockOperation::UpdateContact).await, 0);
    }

    #[tokio::test]
    async fn test_email_change_deletes_before_create_and_flags_memberships() {
        let h = Harness::new();
        let reconciler = ContactReconciler::new(h.ctx.clone());
        let before = created_contact(&h, &reconciler).await;
        h.store.create(membership("jane-news", "jane", "news")).await.unwrap();

        edit_email(&h, "jane@new.example.com").await;
        reconciler.reconcile(&key("jane")).await.unwrap();

        let log = h.email.call_log().await;
        let delete_at = log.iter().position(|op| *op == MockOperation::DeleteContact).unwrap();
        let create_at = log.iter().rposition(|op| *op == MockOperation::CreateContact).unwrap();
        assert!(delete_at < create_at);

        let after: Contact = h.store.get(&key("jane")).await.unwrap();
        assert_ne!(after.status.provider_id, before.status.provider_id);
        assert!(h.email.contact(&before.status.provider_id).await.is_none());
        let updated = after.status.condition(ConditionType::Updated).unwrap();
        assert_eq!(updated.reason, Reason::UpdatePending);
        assert_eq!(updated.observed_generation, 2);

        let cgm: ContactGroupMembership = h.store.get(&key("jane-news")).await.unwrap();
        assert_eq!(cgm.status.recreate_request.unwrap().contact_generation, 2);
    }

    #[tokio::test]
    async fn test_email_change_to_registered_address_confirms_update() {
        let h = Harness::new();
        let reconciler = ContactReconciler::new(h.ctx.clone());
        created_contact(&h, &reconciler).await;
        h.store.create(contact("john", "jane@new.example.com")).await.unwrap();
        reconciler.reconcile(&key("john")).await.unwrap();
        let registered: Contact = h.store.get(&key("john")).await.unwrap();

        edit_email(&h, "jane@new.example.com").await;
        reconciler.reconcile(&key("jane")).await.unwrap();

        let after: Contact = h.store.get(&key("jane")).await.unwrap();
        assert_eq!(after.status.provider_id, registered.status.provider_id);
        assert!(after.status.has_reason(ConditionType::Updated, Reason::Updated));
        assert!(after.status.is_true(ConditionType::Updated));
        assert_eq!(h.email.calls(MockOperation::CreateContact).await, 2);
    }

    #[tokio::test]
    async fn test_name_change_updates_in_place() {
        let h = Harness::new();
        let reconciler = ContactReconciler::new(h.ctx.clone());
        let before = created_contact(&h, &reconciler).await;

        let mut contact: Contact = h.store.get(&key("jane")).await.unwrap();
        contact.spec.given_name = "Janet".into();
        h.store.update(contact).await.unwrap();
        reconciler.reconcile(&key("jane")).await.unwrap();

        let after: Contact = h.store.get(&key("jane")).await.unwrap();
        assert_eq!(after.status.provider_id, before.status.provider_id);
        assert_eq!(h.email.calls(MockOperation::DeleteContact).await, 0);
        assert_eq!(
            h.email.contact(&after.status.provider_id).await.unwrap().given_name,
            "Janet"
        );
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_old_provider_id() {
        let h = Harness::new();
        let reconciler = ContactReconciler::new(h.ctx.clone());
        let before = created_contact(&h, &reconciler).await;
        edit_email(&h, "jane@new.example.com").await;
        h.email
            .fail_next(MockOperation::DeleteContact, DomainError::Transport("reset".into()))
            .await;

        assert!(reconciler.reconcile(&key("jane")).await.is_err());

        let after: Contact = h.store.get(&key("jane")).await.unwrap();
        assert_eq!(after.status.provider_id, before.status.provider_id);
        assert_eq!(h.email.calls(MockOperation::CreateContact).await, 1);
    }

    #[tokio::test]
    async fn test_delete_waits_for_memberships_then_removes_contact() {
        let h = Harness::new();
        let reconciler = ContactReconciler::new(h.ctx.clone());
        let contact = created_contact(&h, &reconciler).await;
        let mut cgm = membership("jane-news", "jane", "news");
        cgm.metadata.finalizers.push("test/hold".into());
        h.store.create(cgm).await.unwrap();

        h.store.delete::<ContactSpec>(&key("jane")).await.unwrap();
        let err = reconciler.reconcile(&key("jane")).await.unwrap_err();
        assert!(matches!(err, DomainError::WaitingForDependents { count: 1, .. }));

        let mut cgm: ContactGroupMembership = h.store.get(&key("jane-news")).await.unwrap();
        assert!(cgm.metadata.is_deleting());
        cgm.metadata.finalizers.clear();
        h.store.update(cgm).await.unwrap();

        reconciler.reconcile(&key("jane")).await.unwrap();
        assert!(h.store.get::<ContactSpec>(&key("jane")).await.unwrap_err().is_not_found());
        assert!(h.email.contact(&contact.status.provider_id).await.is_none());
    }
}
