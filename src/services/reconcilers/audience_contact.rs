use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Condition, ConditionStatus, ConditionType, Contact, ContactGroupMembership,
    ContactGroupMembershipSpec, ContactSpec, ObjectKey, ProviderName, Reason, ResourceKind,
    Severity,
};
use crate::domain::ports::{
    AudienceContactInput, AudienceProvider, ResourceStore, WatchChange, WatchEvent,
};

use super::{Action, Context, Reconciler, StatusPatch, AUDIENCE_PROVIDER_FINALIZER};

/// Contacts whose name carries this prefix always join the newsletter.
const NEWSLETTER_NAME_PREFIX: &str = "newsletter-";

/// Mirrors Contacts onto the audience provider.
///
/// Contacts are keyed there by their UID, which never changes, so updates
/// happen in place. Readiness lands on `AudienceProviderReady` and feeds the
/// Contact's aggregated `Ready`.
pub struct AudienceContactReconciler<St> {
    ctx: Arc<Context<St>>,
    audience: Arc<dyn AudienceProvider>,
}

impl<St: ResourceStore> AudienceContactReconciler<St> {
    /// `None` when the context carries no audience provider.
    pub fn new(ctx: Arc<Context<St>>) -> Option<Self> {
        let audience = ctx.audience.clone()?;
        Some(Self { ctx, audience })
    }

    fn input(contact: &Contact) -> AudienceContactInput {
        AudienceContactInput {
            email: contact.spec.email.clone(),
            first_name: contact.spec.given_name.clone(),
            last_name: contact.spec.family_name.clone(),
            user_id: contact.metadata.uid.to_string(),
            mailing_lists: BTreeMap::new(),
        }
    }

    fn sub_condition(
        status: ConditionStatus,
        reason: Reason,
        message: String,
        generation: i64,
    ) -> Condition {
        Condition::new(ConditionType::AudienceProviderReady, status, reason, message, generation)
    }

    /// Find the contact by user id or create it. The flag is `false` when
    /// the provider rejected the create as a duplicate.
    async fn create(
        &self,
        contact: &Contact,
        patch: StatusPatch,
    ) -> DomainResult<(StatusPatch, bool)> {
        let user_id = contact.metadata.uid.to_string();
        let existing = self.audience.find_contact_by_user_id(&user_id).await?;
        let id = match existing {
            Some(found) => {
                debug!(
                    contact = %contact.key(),
                    audience_id = %found.id,
                    "Reusing audience contact"
                );
                Ok(found.id)
            }
            None => self.audience.create_contact(Self::input(contact)).await,
        };

        match id {
            Ok(id) => {
                info!(contact = %contact.key(), audience_id = %id, "Created audience contact");
                let patch = patch
                    .provider_record(ProviderName::Loops, id.clone())
                    .condition(Self::sub_condition(
                        ConditionStatus::True,
                        Reason::Created,
                        format!("Contact created. Provider ID: {id}"),
                        contact.generation(),
                    ));
                Ok((patch, true))
            }
            Err(e) if e.is_conflict() => {
                warn!(contact = %contact.key(), error = %e, "Audience provider rejected contact");
                let patch = patch.condition(Self::sub_condition(
                    ConditionStatus::False,
                    Reason::NotCreated,
                    e.to_string(),
                    contact.generation(),
                ));
                Ok((patch, false))
            }
            Err(e) => Err(e),
        }
    }

    async fn update(
        &self,
        contact: &Contact,
        patch: StatusPatch,
    ) -> DomainResult<(StatusPatch, Reason)> {
        match self.audience.update_contact(Self::input(contact)).await {
            Ok(updated) => {
                debug!(
                    contact = %contact.key(),
                    audience_id = %updated.id,
                    "Updated audience contact"
                );
                let patch = patch.condition(Self::sub_condition(
                    ConditionStatus::True,
                    Reason::Updated,
                    "Contact updated".to_string(),
                    contact.generation(),
                ));
                Ok((patch, Reason::Updated))
            }
            Err(
                e @ (DomainError::Conflict(_)
                | DomainError::BadRequest(_)
                | DomainError::NotFound { .. }),
            ) => {
                warn!(contact = %contact.key(), error = %e, "Audience provider rejected update");
                let patch = patch.condition(Self::sub_condition(
                    ConditionStatus::False,
                    Reason::NotUpdated,
                    e.to_string(),
                    contact.generation(),
                ));
                Ok((patch, Reason::NotUpdated))
            }
            Err(e) => Err(e),
        }
    }

    async fn wants_newsletter(&self, contact: &Contact) -> DomainResult<bool> {
        if self.ctx.config.audience_provider.newsletter_list_id.is_empty() {
            return Ok(false);
        }
        if contact.metadata.name.starts_with(NEWSLETTER_NAME_PREFIX) {
            return Ok(true);
        }
        let Some(group) = self.ctx.config.audience_provider.newsletter_group_key() else {
            return Ok(false);
        };
        let memberships: Vec<ContactGroupMembership> = self
            .ctx
            .index
            .referencing_pair(&contact.key(), &group)
            .await?;
        Ok(memberships.iter().any(|m| !m.metadata.is_deleting()))
    }

    /// Subscribe to the newsletter list. Subscription is never revoked here.
    async fn subscribe(
        &self,
        contact: &Contact,
        patch: StatusPatch,
    ) -> (StatusPatch, Option<DomainError>) {
        let list_id = self.ctx.config.audience_provider.newsletter_list_id.clone();
        let lists = BTreeMap::from([(list_id.clone(), true)]);
        let user_id = contact.metadata.uid.to_string();

        match self.audience.update_mailing_lists(&user_id, lists).await {
            Ok(()) => {
                info!(
                    contact = %contact.key(),
                    list_id = %list_id,
                    "Subscribed contact to newsletter"
                );
                let patch = patch.condition(Condition::new(
                    ConditionType::NewsletterSubscribed,
                    ConditionStatus::True,
                    Reason::Subscribed,
                    format!("Subscribed to mailing list {list_id}"),
                    contact.generation(),
                ));
                (patch, None)
            }
            Err(e) => {
                let patch = patch.condition(Condition::new(
                    ConditionType::NewsletterSubscribed,
                    ConditionStatus::False,
                    Reason::SubscriptionFailed,
                    e.to_string(),
                    contact.generation(),
                ));
                (patch, Some(e))
            }
        }
    }

    async fn finalize(&self, contact: &Contact) -> DomainResult<()> {
        let user_id = contact.metadata.uid.to_string();
        match self.audience.delete_contact(&user_id).await {
            Ok(()) => info!(contact = %contact.key(), "Deleted audience contact"),
            Err(e) if e.is_not_found() => {
                debug!(contact = %contact.key(), "Audience contact already gone");
            }
            Err(e) => return Err(e),
        }
        self.ctx
            .release_finalizer::<ContactSpec>(&contact.key(), AUDIENCE_PROVIDER_FINALIZER)
            .await
    }
}

#[async_trait]
impl<St: ResourceStore> Reconciler for AudienceContactReconciler<St> {
    fn name(&self) -> &'static str {
        "audience-contact"
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
            if contact.metadata.has_finalizer(AUDIENCE_PROVIDER_FINALIZER) {
                self.finalize(&contact).await?;
            }
            return Ok(Action::Done);
        }

        let contact = self
            .ctx
            .ensure_finalizer(contact, AUDIENCE_PROVIDER_FINALIZER)
            .await?;

        let readiness = contact.status.condition(ConditionType::AudienceProviderReady);
        let needs_create = readiness.is_none_or(|c| c.reason == Reason::NotCreated);
        let needs_update = readiness.is_some_and(|c| !c.is_current(contact.generation()));

        let mut patch = StatusPatch::new();
        let mut present = readiness.is_some_and(Condition::is_true);
        let mut outcome = None;
        let mut failure = None;
        if needs_create {
            let (next, created) = self.create(&contact, patch).await?;
            patch = next;
            present = created;
            if created {
                outcome = Some(Reason::Created);
            } else {
                outcome = Some(Reason::NotCreated);
                failure = Some(DomainError::Conflict(format!(
                    "audience provider rejected contact {key}"
                )));
            }
        } else if needs_update {
            let (next, reason) = self.update(&contact, patch).await?;
            patch = next;
            outcome = Some(reason);
        }

        if present
            && !contact.status.is_true(ConditionType::NewsletterSubscribed)
            && self.wants_newsletter(&contact).await?
        {
            let (next, error) = self.subscribe(&contact, patch).await;
            patch = next;
            outcome = Some(if error.is_some() {
                Reason::SubscriptionFailed
            } else {
                Reason::Subscribed
            });
            failure = failure.or(error);
        }

        let patch = patch.aggregate(self.ctx.contact_readiness());
        let written = self.ctx.write_status::<ContactSpec>(key, &patch).await?;
        if let (Some(written), Some(reason)) = (written, outcome) {
            let severity = match reason {
                Reason::NotCreated | Reason::NotUpdated | Reason::SubscriptionFailed => {
                    Severity::Warning
                }
                _ => Severity::Normal,
            };
            self.ctx
                .record(&written, reason, "Audience provider contact reconciled", severity)
                .await;
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(Action::Done),
        }
    }

    /// A membership joining the newsletter group re-runs its contact.
    async fn related_keys(&self, event: &WatchEvent) -> Vec<ObjectKey> {
        match event.kind {
            ResourceKind::Contact => vec![event.key.clone()],
            ResourceKind::ContactGroupMembership if event.change != WatchChange::Deleted => {
                let Some(group) = self.ctx.config.audience_provider.newsletter_group_key() else {
                    return Vec::new();
                };
                match self.ctx.store.get::<ContactGroupMembershipSpec>(&event.key).await {
                    Ok(membership) if membership.group_key() == group => {
                        vec![membership.contact_key()]
                    }
                    Ok(_) => Vec::new(),
                    Err(e) => {
                        debug!(
                            membership = %event.key,
                            error = %e,
                            "Membership vanished before lookup"
                        );
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        }
    }
}
