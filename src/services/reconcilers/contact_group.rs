use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Condition, ConditionStatus, ConditionType, ContactGroup, ContactGroupSpec, ObjectKey, Reason,
    ResourceKind, Severity,
};
use crate::domain::ports::ResourceStore;
use crate::services::provider_service::DeleteOutcome;

use super::{Action, Context, Reconciler, StatusPatch, EMAIL_PROVIDER_FINALIZER};

/// Keeps a ContactGroup backed by an audience on the email-delivery provider.
pub struct ContactGroupReconciler<St> {
    ctx: Arc<Context<St>>,
}

impl<St: ResourceStore> ContactGroupReconciler<St> {
    pub fn new(ctx: Arc<Context<St>>) -> Self {
        Self { ctx }
    }

    async fn create(&self, group: &ContactGroup) -> DomainResult<()> {
        let output = self.ctx.provider.create_contact_group(group).await?;
        let patch = StatusPatch::new()
            .provider_id(output.contact_group_id.clone())
            .observed_generation(group.generation())
            .condition(Condition::new(
                ConditionType::Ready,
                ConditionStatus::True,
                Reason::Created,
                format!("Contact group created. Provider ID: {}", output.contact_group_id),
                group.generation(),
            ));
        self.ctx
            .transition::<ContactGroupSpec>(
                &group.key(),
                &patch,
                Reason::Created,
                "Contact group created on email provider",
                Severity::Normal,
            )
            .await?;
        info!(
            group = %group.key(),
            provider_id = %output.contact_group_id,
            "Created contact group"
        );
        Ok(())
    }

    /// The provider only knows the group by its UID, so a spec change never
    /// reaches it.
    async fn update(&self, group: &ContactGroup) -> DomainResult<()> {
        let patch = StatusPatch::new()
            .observed_generation(group.generation())
            .condition(Condition::new(
                ConditionType::Updated,
                ConditionStatus::True,
                Reason::Updated,
                "Contact group metadata updated",
                group.generation(),
            ));
        self.ctx
            .transition::<ContactGroupSpec>(
                &group.key(),
                &patch,
                Reason::Updated,
                "Contact group metadata updated",
                Severity::Normal,
            )
            .await?;
        Ok(())
    }

    async fn finalize(&self, group: &ContactGroup) -> DomainResult<()> {
        let key = group.key();

        let memberships = self.ctx.index.memberships_of_group(&key).await?;
        self.ctx.delete_all(&memberships).await?;
        let remaining = self.ctx.index.memberships_of_group(&key).await?;
        if !remaining.is_empty() {
            debug!(group = %key, remaining = remaining.len(), "Waiting for memberships");
            return Err(DomainError::WaitingForDependents {
                count: remaining.len(),
                kind: ResourceKind::ContactGroupMembership,
            });
        }

        let removals = self.ctx.index.removals_of_group(&key).await?;
        self.ctx.delete_all(&removals).await?;
        let remaining = self.ctx.index.removals_of_group(&key).await?;
        if !remaining.is_empty() {
            return Err(DomainError::WaitingForDependents {
                count: remaining.len(),
                kind: ResourceKind::ContactGroupMembershipRemoval,
            });
        }

        if !group.status.provider_id.is_empty() {
            match self.ctx.provider.get_contact_group(group).await {
                Ok(_) => match self.ctx.provider.delete_contact_group(group).await? {
                    DeleteOutcome::Deleted => {
                        info!(
                            group = %key,
                            provider_id = %group.status.provider_id,
                            "Deleted provider audience"
                        );
                    }
                    DeleteOutcome::NotFound => {
                        debug!(group = %key, "Provider audience already gone");
                    }
                },
                Err(e) if e.is_not_found() => {
                    debug!(group = %key, "Provider audience already gone");
                }
                Err(e) => return Err(e),
            }
        }

        self.ctx
            .release_finalizer::<ContactGroupSpec>(&key, EMAIL_PROVIDER_FINALIZER)
            .await
    }
}

#[async_trait]
impl<St: ResourceStore> Reconciler for ContactGroupReconciler<St> {
    fn name(&self) -> &'static str {
        "contact-group"
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::ContactGroup
    }

    async fn reconcile(&self, key: &ObjectKey) -> DomainResult<Action> {
        let group: ContactGroup = match self.ctx.store.get(key).await {
            Ok(group) => group,
            Err(e) if e.is_not_found() => return Ok(Action::Done),
            Err(e) => return Err(e),
        };

        if group.metadata.is_deleting() {
            if group.metadata.has_finalizer(EMAIL_PROVIDER_FINALIZER) {
                self.finalize(&group).await?;
            }
            return Ok(Action::Done);
        }

        let group = self
            .ctx
            .ensure_finalizer(group, EMAIL_PROVIDER_FINALIZER)
            .await?;

        if group.status.condition(ConditionType::Ready).is_none() {
            self.create(&group).await?;
            return Ok(Action::Done);
        }

        let synced = group
            .status
            .condition(ConditionType::Updated)
            .map_or(group.status.observed_generation, |c| c.observed_generation);
        if group.generation() > synced {
            self.update(&group).await?;
        }
        Ok(Action::Done)
    }
}
