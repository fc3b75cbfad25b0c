use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    Condition, ConditionStatus, ConditionType, ContactGroupMembership,
    ContactGroupMembershipRemoval, ContactGroupMembershipRemovalSpec, ObjectKey, Reason,
    ResourceKind, Severity,
};
use crate::domain::ports::ResourceStore;

use super::{Action, Context, Reconciler, StatusPatch};

/// Deletes every membership of one `(contact, group)` pair.
///
/// Lets a client remove a contact from a group without owning the
/// membership resource. The removal has no provider entity of its own.
pub struct MembershipRemovalReconciler<St> {
    ctx: Arc<Context<St>>,
}

impl<St: ResourceStore> MembershipRemovalReconciler<St> {
    pub fn new(ctx: Arc<Context<St>>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<St: ResourceStore> Reconciler for MembershipRemovalReconciler<St> {
    fn name(&self) -> &'static str {
        "contact-group-membership-removal"
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::ContactGroupMembershipRemoval
    }

    async fn reconcile(&self, key: &ObjectKey) -> DomainResult<Action> {
        let removal: ContactGroupMembershipRemoval = match self.ctx.store.get(key).await {
            Ok(removal) => removal,
            Err(e) if e.is_not_found() => return Ok(Action::Done),
            Err(e) => return Err(e),
        };
        if removal.metadata.is_deleting() || removal.status.is_true(ConditionType::Ready) {
            return Ok(Action::Done);
        }

        let memberships: Vec<ContactGroupMembership> = self
            .ctx
            .index
            .referencing_pair(&removal.contact_key(), &removal.group_key())
            .await?;
        self.ctx.delete_all(&memberships).await?;

        let message = format!("Removed {} membership(s)", memberships.len());
        let patch = StatusPatch::new()
            .observed_generation(removal.generation())
            .condition(Condition::new(
                ConditionType::Ready,
                ConditionStatus::True,
                Reason::RemovalCompleted,
                message.clone(),
                removal.generation(),
            ));
        self.ctx
            .transition::<ContactGroupMembershipRemovalSpec>(
                key,
                &patch,
                Reason::RemovalCompleted,
                &message,
                Severity::Normal,
            )
            .await?;
        info!(removal = %key, removed = memberships.len(), "Membership removal completed");
        Ok(Action::Done)
    }
}
