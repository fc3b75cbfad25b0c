use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Condition, ConditionStatus, ConditionType, Contact, ContactGroup, ContactGroupMembership,
    ContactGroupMembershipSpec, ObjectKey, Reason, ResourceKind, Severity,
};
use crate::domain::ports::{ResourceStore, WatchChange, WatchEvent};
use crate::services::provider_service::DeleteOutcome;

use super::{Action, Context, Reconciler, StatusPatch, EMAIL_PROVIDER_FINALIZER};

/// Places a contact into a group's audience on the email-delivery provider.
///
/// The provider confirms audience changes asynchronously, so creation and
/// deletion both end in a pending condition that the webhook settles.
pub struct MembershipReconciler<St> {
    ctx: Arc<Context<St>>,
}

impl<St: ResourceStore> MembershipReconciler<St> {
    pub fn new(ctx: Arc<Context<St>>) -> Self {
        Self { ctx }
    }

    async fn dependencies(
        &self,
        membership: &ContactGroupMembership,
    ) -> DomainResult<(Contact, ContactGroup)> {
        let contact: Contact = self.ctx.store.get(&membership.contact_key()).await?;
        let group: ContactGroup = self.ctx.store.get(&membership.group_key()).await?;
        if group.status.provider_id.is_empty() {
            return Err(DomainError::MissingDependency(format!(
                "contact group {} has no provider id yet",
                group.key()
            )));
        }
        Ok((contact, group))
    }

    async fn create(
        &self,
        membership: &ContactGroupMembership,
        contact: &Contact,
        group: &ContactGroup,
    ) -> DomainResult<()> {
        let output = self
            .ctx
            .provider
            .create_contact_group_membership(group, contact)
            .await?;
        let message = format!(
            "Waiting for email provider confirmation. Provider ID: {}",
            output.contact_id
        );
        let patch = StatusPatch::new()
            .provider_id(output.contact_id.clone())
            .observed_generation(membership.generation())
            .recreate_request(None)
            .remove(ConditionType::Deleted)
            .condition(Condition::new(
                ConditionType::Ready,
                ConditionStatus::False,
                Reason::CreatePending,
                message.clone(),
                membership.generation(),
            ));
        self.ctx
            .transition::<ContactGroupMembershipSpec>(
                &membership.key(),
                &patch,
                Reason::CreatePending,
                &message,
                Severity::Normal,
            )
            .await?;
        info!(
            membership = %membership.key(),
            provider_id = %output.contact_id,
            "Created audience membership"
        );
        Ok(())
    }

    /// Act on a recreate request from the contact: drop the stale audience
    /// entry, create a fresh one, then clear the request.
    async fn recreate(
        &self,
        membership: &ContactGroupMembership,
        contact: &Contact,
        group: &ContactGroup,
    ) -> DomainResult<()> {
        let output = self
            .ctx
            .provider
            .recreate_contact_group_membership(membership, group, contact)
            .await?;
        let patch = StatusPatch::new()
            .provider_id(output.contact_id.clone())
            .recreate_request(None)
            .remove(ConditionType::Deleted)
            .condition(Condition::new(
                ConditionType::Updated,
                ConditionStatus::False,
                Reason::UpdatePending,
                "Waiting for email provider confirmation",
                membership.generation(),
            ));
        self.ctx
            .transition::<ContactGroupMembershipSpec>(
                &membership.key(),
                &patch,
                Reason::UpdateRequested,
                "Audience membership recreated for updated contact",
                Severity::Normal,
            )
            .await?;
        info!(
            membership = %membership.key(),
            old_provider_id = %membership.status.provider_id,
            provider_id = %output.contact_id,
            "Recreated audience membership"
        );
        Ok(())
    }

    /// Deletion guard. The provider removes audience entries asynchronously:
    /// after a successful delete the hook stays until the webhook reports
    /// `Deleted=True`, or until a repeated delete finds nothing to remove.
    async fn finalize(&self, membership: &ContactGroupMembership) -> DomainResult<()> {
        let key = membership.key();
        if membership.status.is_true(ConditionType::Deleted) {
            debug!(membership = %key, "Provider confirmed deletion");
            return self.release(&key).await;
        }
        if membership.status.provider_id.is_empty() {
            debug!(membership = %key, "Membership was never created");
            return self.release(&key).await;
        }
        let group: ContactGroup = match self.ctx.store.get(&membership.group_key()).await {
            Ok(group) => group,
            Err(e) if e.is_not_found() => {
                debug!(membership = %key, "Contact group already gone");
                return self.release(&key).await;
            }
            Err(e) => return Err(e),
        };
        if group.status.provider_id.is_empty() {
            return self.release(&key).await;
        }

        match self
            .ctx
            .provider
            .delete_contact_group_membership(membership, &group)
            .await?
        {
            DeleteOutcome::NotFound => {
                debug!(membership = %key, "Audience entry already gone");
                self.release(&key).await
            }
            DeleteOutcome::Deleted => {
                let patch = StatusPatch::new().condition(Condition::new(
                    ConditionType::Deleted,
                    ConditionStatus::False,
                    Reason::DeletePending,
                    "Waiting for email provider confirmation",
                    membership.generation(),
                ));
                self.ctx
                    .transition::<ContactGroupMembershipSpec>(
                        &key,
                        &patch,
                        Reason::DeletePending,
                        "Audience membership deletion requested",
                        Severity::Normal,
                    )
                    .await?;
                Err(DomainError::AwaitingConfirmation(format!(
                    "membership {key} deletion"
                )))
            }
        }
    }

    async fn release(&self, key: &ObjectKey) -> DomainResult<()> {
        self.ctx
            .release_finalizer::<ContactGroupMembershipSpec>(key, EMAIL_PROVIDER_FINALIZER)
            .await
    }

    /// Memberships still waiting to be created.
    fn uncreated(memberships: Vec<ContactGroupMembership>) -> Vec<ObjectKey> {
        memberships
            .into_iter()
            .filter(|m| m.status.provider_id.is_empty() && !m.metadata.is_deleting())
            .map(|m| m.key())
            .collect()
    }
}

#[async_trait]
impl<St: ResourceStore> Reconciler for MembershipReconciler<St> {
    fn name(&self) -> &'static str {
        "contact-group-membership"
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::ContactGroupMembership
    }

    async fn reconcile(&self, key: &ObjectKey) -> DomainResult<Action> {
        let membership: ContactGroupMembership = match self.ctx.store.get(key).await {
            Ok(membership) => membership,
            Err(e) if e.is_not_found() => return Ok(Action::Done),
            Err(e) => return Err(e),
        };

        if membership.metadata.is_deleting() {
            if membership.metadata.has_finalizer(EMAIL_PROVIDER_FINALIZER) {
                self.finalize(&membership).await?;
            }
            return Ok(Action::Done);
        }

        let membership = self
            .ctx
            .ensure_finalizer(membership, EMAIL_PROVIDER_FINALIZER)
            .await?;

        let create = membership.status.condition(ConditionType::Ready).is_none();
        let recreate = membership.status.recreate_request.is_some();
        if !create && !recreate {
            return Ok(Action::Done);
        }

        let (contact, group) = self.dependencies(&membership).await?;
        if create {
            self.create(&membership, &contact, &group).await?;
        } else {
            self.recreate(&membership, &contact, &group).await?;
        }
        Ok(Action::Done)
    }

    /// Uncreated memberships are woken when their contact or group changes,
    /// typically when the group receives its provider id.
    async fn related_keys(&self, event: &WatchEvent) -> Vec<ObjectKey> {
        if event.kind == ResourceKind::ContactGroupMembership {
            return vec![event.key.clone()];
        }
        if event.change == WatchChange::Deleted {
            return Vec::new();
        }
        let memberships = match event.kind {
            ResourceKind::Contact => self.ctx.index.memberships_of_contact(&event.key).await,
            ResourceKind::ContactGroup => self.ctx.index.memberships_of_group(&event.key).await,
            _ => return Vec::new(),
        };
        match memberships {
            Ok(memberships) => Self::uncreated(memberships),
            Err(e) => {
                warn!(key = %event.key, error = %e, "Failed to list memberships");
                Vec::new()
            }
        }
    }
}
