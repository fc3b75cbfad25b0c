use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Condition, ConditionStatus, ConditionType, Email, EmailSpec, EmailTemplate, ObjectKey, Reason,
    ResourceKind, Severity, User,
};
use crate::domain::ports::{ResourceStore, WatchChange, WatchEvent};

use super::{Action, Context, Reconciler, StatusPatch};

/// Sends each Email exactly once.
///
/// An Email is immutable after the send, so there is no update path and no
/// deletion hook. Delivery outcome arrives later through the webhook.
pub struct EmailReconciler<St> {
    ctx: Arc<Context<St>>,
}

impl<St: ResourceStore> EmailReconciler<St> {
    pub fn new(ctx: Arc<Context<St>>) -> Self {
        Self { ctx }
    }

    async fn resolve_recipient(&self, email: &Email) -> DomainResult<String> {
        let recipient = &email.spec.recipient;
        match (&recipient.email_address, &recipient.user_ref) {
            (Some(address), None) if !address.is_empty() => Ok(address.clone()),
            (None, Some(user_ref)) => {
                let key = user_ref.resolve(&email.metadata.namespace);
                let user: User = self.ctx.store.get(&key).await?;
                if user.spec.email.is_empty() {
                    return Err(DomainError::Validation(format!(
                        "user {key} has no email address"
                    )));
                }
                Ok(user.spec.email)
            }
            _ => Err(DomainError::Validation(format!(
                "email {} must set exactly one of email_address or user_ref",
                email.key()
            ))),
        }
    }
}

#[async_trait]
impl<St: ResourceStore> Reconciler for EmailReconciler<St> {
    fn name(&self) -> &'static str {
        "email"
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Email
    }

    async fn reconcile(&self, key: &ObjectKey) -> DomainResult<Action> {
        let email: Email = match self.ctx.store.get(key).await {
            Ok(email) => email,
            Err(e) if e.is_not_found() => return Ok(Action::Done),
            Err(e) => return Err(e),
        };

        if !email.status.provider_id.is_empty() || email.status.is_true(ConditionType::Delivered) {
            debug!(email = %key, provider_id = %email.status.provider_id, "Email already sent");
            return Ok(Action::Done);
        }
        if email.metadata.is_deleting() {
            return Ok(Action::Done);
        }

        let template_key = email.spec.template_ref.resolve(&email.metadata.namespace);
        let template: EmailTemplate = self.ctx.store.get(&template_key).await?;
        let recipient = self.resolve_recipient(&email).await?;

        let output = match self.ctx.provider.send_email(&email, &template, &recipient).await {
            Ok(output) => output,
            Err(e) => {
                let wait = self.ctx.config.email.wait_for(email.spec.priority);
                warn!(
                    email = %key,
                    priority = email.spec.priority.as_str(),
                    error = %e,
                    retry_in_secs = wait.as_secs(),
                    "Failed to send email"
                );
                self.ctx
                    .record(
                        &email,
                        Reason::SendFailed,
                        &format!("Failed to send email: {e}"),
                        Severity::Warning,
                    )
                    .await;
                return Ok(Action::RequeueAfter(wait));
            }
        };

        let message = format!(
            "Email accepted for delivery. Provider ID: {}",
            output.delivery_id
        );
        let patch = StatusPatch::new()
            .provider_id(output.delivery_id.clone())
            .observed_generation(email.generation())
            .condition(Condition::new(
                ConditionType::Delivered,
                ConditionStatus::Unknown,
                Reason::DeliveryPending,
                message.clone(),
                email.generation(),
            ));
        self.ctx
            .transition::<EmailSpec>(
                key,
                &patch,
                Reason::DeliveryPending,
                &message,
                Severity::Normal,
            )
            .await?;

        info!(email = %key, provider_id = %output.delivery_id, "Email accepted for delivery");
        Ok(Action::Done)
    }

    /// Unsent emails in the namespace of a template or user that just
    /// appeared are retried right away instead of waiting out their backoff.
    async fn related_keys(&self, event: &WatchEvent) -> Vec<ObjectKey> {
        match event.kind {
            ResourceKind::Email => vec![event.key.clone()],
            ResourceKind::EmailTemplate | ResourceKind::User
                if event.change != WatchChange::Deleted =>
            {
                let emails: Vec<Email> = match self.ctx.store.list(None).await {
                    Ok(emails) => emails,
                    Err(e) => {
                        warn!(error = %e, "Failed to list emails");
                        return Vec::new();
                    }
                };
                emails
                    .into_iter()
                    .filter(|email| email.status.provider_id.is_empty())
                    .filter(|email| {
                        let namespace = &email.metadata.namespace;
                        match event.kind {
                            ResourceKind::EmailTemplate => {
                                email.spec.template_ref.resolve(namespace) == event.key
                            }
                            _ => email
                                .spec
                                .recipient
                                .user_ref
                                .as_ref()
                                .is_some_and(|r| r.resolve(namespace) == event.key),
                        }
                    })
                    .map(|email| email.key())
                    .collect()
            }
            _ => Vec::new(),
        }
    }
}
