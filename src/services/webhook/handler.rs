//! Correlates verified events with resources and applies their transitions.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    Condition, ConditionStatus, ConditionType, ContactGroupMembershipSpec, ContactSpec, EmailSpec,
    Object, ObservedEvent, Reason, Severity, Spec,
};
use crate::domain::ports::{EventRecorder, ResourceStore};
use crate::services::index::CorrelationIndex;
use crate::services::reconcilers::{write_status, StatusPatch};

use super::events::{ContactEvent, ContactEventType, DeliveryEvent, WebhookEvent};

/// Reporting component for records written by the receiver.
pub const WEBHOOK_COMPONENT: &str = "herald-webhook";

/// Result of handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A status changed.
    Applied,
    /// The correlated resource already had this status.
    Unchanged,
    /// No resource owns the event's provider id.
    Uncorrelated,
}

pub struct WebhookHandler<St> {
    store: Arc<St>,
    index: CorrelationIndex<St>,
    recorder: Arc<dyn EventRecorder>,
}

impl<St: ResourceStore> WebhookHandler<St> {
    pub fn new(store: Arc<St>, recorder: Arc<dyn EventRecorder>) -> Self {
        Self {
            index: CorrelationIndex::new(Arc::clone(&store)),
            store,
            recorder,
        }
    }

    pub async fn handle(&self, event: &WebhookEvent) -> DomainResult<Outcome> {
        match event {
            WebhookEvent::Delivery(event) => self.delivery(event).await,
            WebhookEvent::Contact(event) => self.contact(event).await,
        }
    }

    async fn delivery(&self, event: &DeliveryEvent) -> DomainResult<Outcome> {
        let Some(email) = self
            .index
            .find_by_provider_id::<EmailSpec>(&event.data.email_id)
            .await?
        else {
            debug!(
                provider_id = %event.data.email_id,
                event_type = event.event_type.as_str(),
                "No email for delivery event"
            );
            return Ok(Outcome::Uncorrelated);
        };

        let (status, reason) = event.event_type.delivered_condition();
        let message = format!(
            "Updated Email status from webhook event: {}",
            event.event_type.as_str()
        );
        let patch = StatusPatch::new().condition(Condition::new(
            ConditionType::Delivered,
            status,
            reason,
            message.clone(),
            email.generation(),
        ));
        self.apply(&email, &patch, reason, &message, event.event_type.severity())
            .await
    }

    async fn contact(&self, event: &ContactEvent) -> DomainResult<Outcome> {
        let provider_id = &event.data.id;
        if let Some(contact) = self.index.find_by_provider_id::<ContactSpec>(provider_id).await? {
            let patch = contact_patch(&contact, event);
            return self.apply_contact_event(&contact, patch, event).await;
        }
        if let Some(membership) = self
            .index
            .find_by_provider_id::<ContactGroupMembershipSpec>(provider_id)
            .await?
        {
            let patch = membership_patch(&membership, event);
            return self.apply_contact_event(&membership, patch, event).await;
        }
        debug!(
            %provider_id,
            event_type = event.event_type.as_str(),
            "No resource for contact event"
        );
        Ok(Outcome::Uncorrelated)
    }

    async fn apply_contact_event<S: Spec>(
        &self,
        object: &Object<S>,
        patch: Option<(StatusPatch, Reason)>,
        event: &ContactEvent,
    ) -> DomainResult<Outcome> {
        let Some((patch, reason)) = patch else {
            return Ok(Outcome::Unchanged);
        };
        let message = format!(
            "Updated {} status from webhook event: {}",
            S::KIND,
            event.event_type.as_str()
        );
        self.apply(object, &patch, reason, &message, Severity::Normal)
            .await
    }

    async fn apply<S: Spec>(
        &self,
        object: &Object<S>,
        patch: &StatusPatch,
        reason: Reason,
        message: &str,
        severity: Severity,
    ) -> DomainResult<Outcome> {
        let key = object.key();
        let Some(written) = write_status::<St, S>(self.store.as_ref(), &key, patch).await? else {
            return Ok(Outcome::Unchanged);
        };
        info!(kind = %S::KIND, %key, %reason, "Applied webhook transition");
        let event = ObservedEvent::new(&written, reason, message, severity, WEBHOOK_COMPONENT);
        if let Err(e) = self.recorder.record(event).await {
            warn!(kind = %S::KIND, %key, error = %e, "Failed to record event");
        }
        Ok(Outcome::Applied)
    }
}

fn confirmed(condition_type: ConditionType, reason: Reason, generation: i64) -> Condition {
    Condition::new(
        condition_type,
        ConditionStatus::True,
        reason,
        format!("Confirmed by email provider: {reason}"),
        generation,
    )
}

fn update_pending<S: Spec>(object: &Object<S>) -> bool {
    object
        .status
        .has_reason(ConditionType::Updated, Reason::UpdatePending)
}

fn confirm(
    condition_type: ConditionType,
    reason: Reason,
    generation: i64,
) -> (StatusPatch, Reason) {
    (
        StatusPatch::new().condition(confirmed(condition_type, reason, generation)),
        reason,
    )
}

/// A contact entity is only ever created by an update that replaced it, and
/// a deletion seen while an update is pending is the first half of that
/// replacement.
fn contact_patch(
    contact: &Object<ContactSpec>,
    event: &ContactEvent,
) -> Option<(StatusPatch, Reason)> {
    let generation = contact.generation();
    match event.event_type {
        ContactEventType::Created | ContactEventType::Updated => {
            update_pending(contact)
                .then(|| confirm(ConditionType::Updated, Reason::Updated, generation))
        }
        ContactEventType::Deleted if update_pending(contact) => {
            Some(confirm(ConditionType::Updated, Reason::Updated, generation))
        }
        ContactEventType::Deleted => {
            Some(confirm(ConditionType::Deleted, Reason::Deleted, generation))
        }
    }
}

/// Deletion is only confirmed for an entry the guard asked the provider to
/// remove. Any other `contact.deleted` for the current id is stale, usually
/// the delete half of a recreate, and must not release the guard.
fn membership_patch(
    membership: &Object<ContactGroupMembershipSpec>,
    event: &ContactEvent,
) -> Option<(StatusPatch, Reason)> {
    let generation = membership.generation();
    match event.event_type {
        ContactEventType::Created => {
            let mut patch = StatusPatch::new()
                .condition(confirmed(ConditionType::Ready, Reason::Created, generation));
            if update_pending(membership) {
                patch = patch.condition(confirmed(
                    ConditionType::Updated,
                    Reason::Updated,
                    generation,
                ));
            }
            Some((patch, Reason::Created))
        }
        ContactEventType::Updated => {
            Some(confirm(ConditionType::Updated, Reason::Updated, generation))
        }
        ContactEventType::Deleted => membership
            .status
            .has_reason(ConditionType::Deleted, Reason::DeletePending)
            .then(|| confirm(ConditionType::Deleted, Reason::Deleted, generation)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MockOperation;
    use crate::domain::errors::DomainError;
    use crate::domain::models::{ContactGroupSpec, Email, EmailPriority, EmailRecipient};
    use crate::services::reconcilers::testing::*;
    use crate::services::reconcilers::{
        ContactGroupReconciler, ContactReconciler, EmailReconciler, MembershipReconciler,
        Reconciler,
    };
    use crate::services::webhook::events::{ContactData, DeliveryData, DeliveryEventType};

    fn delivery(event_type: DeliveryEventType, email_id: &str) -> WebhookEvent {
        WebhookEvent::Delivery(DeliveryEvent {
            event_type,
            created_at: None,
            data: DeliveryData {
                email_id: email_id.into(),
                from: String::new(),
                to: Vec::new(),
                subject: String::new(),
            },
        })
    }

    fn contact_event(event_type: ContactEventType, id: &str) -> WebhookEvent {
        WebhookEvent::Contact(ContactEvent {
            event_type,
            created_at: None,
            data: ContactData {
                id: id.into(),
                audience_id: String::new(),
                email: String::new(),
                first_name: String::new(),
                last_name: String::new(),
                unsubscribed: false,
                created_at: None,
                updated_at: None,
            },
        })
    }

    fn handler(h: &Harness) -> WebhookHandler<crate::adapters::memory::InMemoryStore> {
        WebhookHandler::new(h.store.clone(), h.recorder.clone())
    }

    async fn sent_email(h: &Harness) -> String {
        h.store.create(template("welcome")).await.unwrap();
        let recipient = EmailRecipient::address("jane@example.com");
        h.store
            .create(email("hello", recipient, EmailPriority::Normal))
            .await
            .unwrap();
        EmailReconciler::new(h.ctx.clone())
            .reconcile(&key("hello"))
            .await
            .unwrap();
        h.store
            .get::<EmailSpec>(&key("hello"))
            .await
            .unwrap()
            .status
            .provider_id
    }

    #[tokio::test]
    async fn test_delivered_event_sets_condition() {
        let h = Harness::new();
        let provider_id = sent_email(&h).await;
        let handler = handler(&h);

        let outcome = handler
            .handle(&delivery(DeliveryEventType::Delivered, &provider_id))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Applied);
        let email: Email = h.store.get(&key("hello")).await.unwrap();
        let delivered = email.status.condition(ConditionType::Delivered).unwrap();
        assert_eq!(delivered.status, ConditionStatus::True);
        assert_eq!(delivered.message, "Updated Email status from webhook event: email.delivered");
        let events = h.recorder.events().await;
        let last = events.last().unwrap();
        assert_eq!(last.reporting_component, WEBHOOK_COMPONENT);
        assert_eq!(last.severity, Severity::Normal);
    }

    #[tokio::test]
    async fn test_repeated_event_is_unchanged() {
        let h = Harness::new();
        let provider_id = sent_email(&h).await;
        let handler = handler(&h);
        let event = delivery(DeliveryEventType::Bounced, &provider_id);

        assert_eq!(handler.handle(&event).await.unwrap(), Outcome::Applied);
        let recorded = h.recorder.len().await;
        assert_eq!(handler.handle(&event).await.unwrap(), Outcome::Unchanged);
        assert_eq!(h.recorder.len().await, recorded);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_uncorrelated() {
        let h = Harness::new();
        let handler = handler(&h);

        assert_eq!(
            handler.handle(&delivery(DeliveryEventType::Sent, "d-404")).await.unwrap(),
            Outcome::Uncorrelated
        );
        assert_eq!(
            handler.handle(&contact_event(ContactEventType::Deleted, "c-404")).await.unwrap(),
            Outcome::Uncorrelated
        );
        assert!(h.recorder.is_empty().await);
    }

    /// Contact and group created on the provider, membership created and
    /// pending. Returns the membership's provider id.
    async fn created_membership(h: &Harness) -> String {
        h.store.create(contact("jane", "jane@example.com")).await.unwrap();
        h.store.create(group("news")).await.unwrap();
        ContactGroupReconciler::new(h.ctx.clone())
            .reconcile(&key("news"))
            .await
            .unwrap();
        h.store.create(membership("jane-news", "jane", "news")).await.unwrap();
        MembershipReconciler::new(h.ctx.clone())
            .reconcile(&key("jane-news"))
            .await
            .unwrap();
        h.store
            .get::<ContactGroupMembershipSpec>(&key("jane-news"))
            .await
            .unwrap()
            .status
            .provider_id
    }

    #[tokio::test]
    async fn test_membership_lifecycle_confirmations() {
        let h = Harness::new();
        let provider_id = created_membership(&h).await;
        let handler = handler(&h);

        handler
            .handle(&contact_event(ContactEventType::Created, &provider_id))
            .await
            .unwrap();
        let cgm: Object<ContactGroupMembershipSpec> =
            h.store.get(&key("jane-news")).await.unwrap();
        assert!(cgm.status.has_reason(ConditionType::Ready, Reason::Created));
        assert!(cgm.status.is_true(ConditionType::Ready));

        h.store
            .delete::<ContactGroupMembershipSpec>(&key("jane-news"))
            .await
            .unwrap();
        let err = MembershipReconciler::new(h.ctx.clone())
            .reconcile(&key("jane-news"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::AwaitingConfirmation(_)));

        let outcome = handler
            .handle(&contact_event(ContactEventType::Deleted, &provider_id))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Applied);
        let cgm: Object<ContactGroupMembershipSpec> =
            h.store.get(&key("jane-news")).await.unwrap();
        assert!(cgm.status.is_true(ConditionType::Deleted));
    }

    #[tokio::test]
    async fn test_stale_contact_deleted_does_not_skip_provider_delete() {
        let h = Harness::new();
        let provider_id = created_membership(&h).await;
        let audience = h
            .store
            .get::<ContactGroupSpec>(&key("news"))
            .await
            .unwrap()
            .status
            .provider_id;

        let outcome = handler(&h)
            .handle(&contact_event(ContactEventType::Deleted, &provider_id))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Unchanged);
        let cgm: Object<ContactGroupMembershipSpec> =
            h.store.get(&key("jane-news")).await.unwrap();
        assert!(cgm.status.condition(ConditionType::Deleted).is_none());

        h.store
            .delete::<ContactGroupMembershipSpec>(&key("jane-news"))
            .await
            .unwrap();
        let err = MembershipReconciler::new(h.ctx.clone())
            .reconcile(&key("jane-news"))
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::AwaitingConfirmation(_)));
        assert_eq!(h.email.calls(MockOperation::DeleteMembership).await, 1);
        assert_eq!(h.email.audience_contact_count(&audience).await, 0);
    }

    #[tokio::test]
    async fn test_contact_deleted_during_update_confirms_update() {
        let h = Harness::new();
        h.store.create(contact("jane", "jane@example.com")).await.unwrap();
        let reconciler = ContactReconciler::new(h.ctx.clone());
        reconciler.reconcile(&key("jane")).await.unwrap();
        let mut edited: Object<ContactSpec> = h.store.get(&key("jane")).await.unwrap();
        edited.spec.given_name = "Janet".into();
        h.store.update(edited).await.unwrap();
        reconciler.reconcile(&key("jane")).await.unwrap();
        let pending: Object<ContactSpec> = h.store.get(&key("jane")).await.unwrap();
        assert!(pending.status.has_reason(ConditionType::Updated, Reason::UpdatePending));

        let outcome = handler(&h)
            .handle(&contact_event(ContactEventType::Deleted, &pending.status.provider_id))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Applied);
        let confirmed: Object<ContactSpec> = h.store.get(&key("jane")).await.unwrap();
        assert!(confirmed.status.has_reason(ConditionType::Updated, Reason::Updated));
        assert!(confirmed.status.is_true(ConditionType::Updated));
        assert!(confirmed.status.condition(ConditionType::Deleted).is_none());
    }

    #[tokio::test]
    async fn test_contact_created_only_confirms_pending_update() {
        let h = Harness::new();
        h.store.create(contact("jane", "jane@example.com")).await.unwrap();
        ContactReconciler::new(h.ctx.clone())
            .reconcile(&key("jane"))
            .await
            .unwrap();
        let provider_id = h
            .store
            .get::<ContactSpec>(&key("jane"))
            .await
            .unwrap()
            .status
            .provider_id;

        let outcome = handler(&h)
            .handle(&contact_event(ContactEventType::Created, &provider_id))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Unchanged);
    }
}
