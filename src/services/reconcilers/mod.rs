//! Per-resource reconcilers and their deletion guards.
//!
//! Every reconciler reads the resource fresh, drives the provider through
//! [`ProviderService`], and records the outcome as a [`StatusPatch`]. Patches
//! are applied to a re-read copy of the resource and written with
//! compare-and-swap, so a concurrent webhook write is never lost, and a pass
//! that computes the same status writes nothing.

pub mod audience_contact;
pub mod contact;
pub mod contact_group;
pub mod email;
pub mod membership;
pub mod membership_removal;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    aggregate_readiness, Condition, ConditionType, Config, Object, ObjectKey, ObservedEvent,
    ProviderName, Reason, RecreateRequest, ResourceKind, Severity, Spec,
};
use crate::domain::ports::{AudienceProvider, EventRecorder, ResourceStore, WatchEvent};

use super::index::CorrelationIndex;
use super::provider_service::ProviderService;

pub use audience_contact::AudienceContactReconciler;
pub use contact::ContactReconciler;
pub use contact_group::ContactGroupReconciler;
pub use email::EmailReconciler;
pub use membership::MembershipReconciler;
pub use membership_removal::MembershipRemovalReconciler;

/// Reporting component for records written by reconcilers.
pub const CONTROLLER_COMPONENT: &str = "herald-controller";

/// Deletion hook owned by the email-delivery provider reconcilers.
pub const EMAIL_PROVIDER_FINALIZER: &str = "herald.io/email-provider-cleanup";

/// Deletion hook owned by the audience provider reconciler.
pub const AUDIENCE_PROVIDER_FINALIZER: &str = "herald.io/audience-provider-cleanup";

/// Conflicting status writes are retried this many times from a fresh read.
const STATUS_WRITE_ATTEMPTS: usize = 3;

/// What the controller should do after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Converged; wait for the next change.
    Done,
    /// Run again after a fixed delay.
    RequeueAfter(Duration),
}

/// One state machine per resource type.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Human-readable controller name, used in logs.
    fn name(&self) -> &'static str;

    /// Kind of resource this reconciler owns.
    fn kind(&self) -> ResourceKind;

    /// Drive one resource toward its spec.
    async fn reconcile(&self, key: &ObjectKey) -> DomainResult<Action>;

    /// Keys of [`Self::kind`] that must be reconciled after `event`.
    async fn related_keys(&self, event: &WatchEvent) -> Vec<ObjectKey> {
        if event.kind == self.kind() {
            vec![event.key.clone()]
        } else {
            Vec::new()
        }
    }
}

/// Collaborators shared by every reconciler.
pub struct Context<St> {
    pub store: Arc<St>,
    pub index: CorrelationIndex<St>,
    pub provider: ProviderService,
    pub audience: Option<Arc<dyn AudienceProvider>>,
    pub recorder: Arc<dyn EventRecorder>,
    pub config: Arc<Config>,
}

impl<St: ResourceStore> Context<St> {
    pub fn new(
        store: Arc<St>,
        provider: ProviderService,
        audience: Option<Arc<dyn AudienceProvider>>,
        recorder: Arc<dyn EventRecorder>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            index: CorrelationIndex::new(Arc::clone(&store)),
            store,
            provider,
            audience,
            recorder,
            config,
        }
    }

    /// Sub-conditions that make up a Contact's user-facing Ready.
    pub fn contact_readiness(&self) -> Vec<(ProviderName, ConditionType)> {
        let mut inputs = vec![(ProviderName::Resend, ConditionType::EmailProviderReady)];
        if self.audience.is_some() {
            inputs.push((ProviderName::Loops, ConditionType::AudienceProviderReady));
        }
        inputs
    }

    /// See [`write_status`].
    pub async fn write_status<S: Spec>(
        &self,
        key: &ObjectKey,
        patch: &StatusPatch,
    ) -> DomainResult<Option<Object<S>>> {
        write_status(self.store.as_ref(), key, patch).await
    }

    /// Write `patch` and emit one observability record if anything changed.
    pub async fn transition<S: Spec>(
        &self,
        key: &ObjectKey,
        patch: &StatusPatch,
        reason: Reason,
        message: &str,
        severity: Severity,
    ) -> DomainResult<Option<Object<S>>> {
        let written = self.write_status::<S>(key, patch).await?;
        if let Some(object) = &written {
            self.record(object, reason, message, severity).await;
        }
        Ok(written)
    }

    pub async fn record<S: Spec>(
        &self,
        object: &Object<S>,
        reason: Reason,
        message: &str,
        severity: Severity,
    ) {
        let event = ObservedEvent::new(object, reason, message, severity, CONTROLLER_COMPONENT);
        if let Err(e) = self.recorder.record(event).await {
            warn!(kind = %S::KIND, key = %object.key(), error = %e, "Failed to record event");
        }
    }

    /// Register `finalizer` before any external side effect happens.
    pub async fn ensure_finalizer<S: Spec>(
        &self,
        mut object: Object<S>,
        finalizer: &str,
    ) -> DomainResult<Object<S>> {
        if object.metadata.add_finalizer(finalizer) {
            object = self.store.update(object).await?;
        }
        Ok(object)
    }

    /// Drop `finalizer` from a fresh copy, letting the store remove the
    /// object once no hooks remain.
    pub async fn release_finalizer<S: Spec>(
        &self,
        key: &ObjectKey,
        finalizer: &str,
    ) -> DomainResult<()> {
        let mut object = match self.store.get::<S>(key).await {
            Ok(object) => object,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        if object.metadata.remove_finalizer(finalizer) {
            self.store.update(object).await?;
        }
        Ok(())
    }

    /// Request deletion of each dependent, ignoring ones already gone.
    pub async fn delete_all<S: Spec>(&self, dependents: &[Object<S>]) -> DomainResult<()> {
        for dependent in dependents {
            if dependent.metadata.is_deleting() {
                continue;
            }
            match self.store.delete::<S>(&dependent.key()).await {
                Ok(()) => {
                    debug!(kind = %S::KIND, key = %dependent.key(), "Requested dependent deletion");
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Apply `patch` to a fresh copy of the resource and write it when the
/// status changed. Returns the written object, or `None` when nothing
/// changed or the resource is gone.
pub async fn write_status<St: ResourceStore, S: Spec>(
    store: &St,
    key: &ObjectKey,
    patch: &StatusPatch,
) -> DomainResult<Option<Object<S>>> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut object = match store.get::<S>(key).await {
            Ok(object) => object,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        if !patch.apply(&mut object) {
            debug!(kind = %S::KIND, %key, "Status unchanged, skipping write");
            return Ok(None);
        }
        match store.update_status(object).await {
            Ok(written) => return Ok(Some(written)),
            Err(e) if e.is_conflict() && attempt < STATUS_WRITE_ATTEMPTS => {
                debug!(kind = %S::KIND, %key, attempt, "Status write conflicted, re-reading");
            }
            Err(e) => return Err(e),
        }
    }
}

/// A set of status changes computed by one pass.
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    conditions: Vec<Condition>,
    removed: Vec<ConditionType>,
    provider_id: Option<String>,
    provider_record: Option<(ProviderName, String)>,
    observed_generation: Option<i64>,
    recreate_request: Option<Option<RecreateRequest>>,
    readiness: Option<Vec<(ProviderName, ConditionType)>>,
}

impl StatusPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn remove(mut self, condition_type: ConditionType) -> Self {
        self.removed.push(condition_type);
        self
    }

    pub fn provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn provider_record(mut self, provider: ProviderName, id: impl Into<String>) -> Self {
        self.provider_record = Some((provider, id.into()));
        self
    }

    pub fn observed_generation(mut self, generation: i64) -> Self {
        self.observed_generation = Some(generation);
        self
    }

    pub fn recreate_request(mut self, request: Option<RecreateRequest>) -> Self {
        self.recreate_request = Some(request);
        self
    }

    /// Recompute Ready from these sub-conditions after the other changes.
    pub fn aggregate(mut self, sub_conditions: Vec<(ProviderName, ConditionType)>) -> Self {
        self.readiness = Some(sub_conditions);
        self
    }

    /// Apply to `object`; `true` when its status changed.
    pub fn apply<S: Spec>(&self, object: &mut Object<S>) -> bool {
        let before = object.status.clone();
        let status = &mut object.status;

        for condition in &self.conditions {
            status.set_condition(condition.clone());
        }
        for condition_type in &self.removed {
            status.remove_condition(*condition_type);
        }
        if let Some(provider_id) = &self.provider_id {
            status.provider_id.clone_from(provider_id);
        }
        if let Some((provider, id)) = &self.provider_record {
            status.set_provider_record(*provider, id.clone());
        }
        if let Some(generation) = self.observed_generation {
            status.observed_generation = generation;
        }
        if let Some(request) = &self.recreate_request {
            status.recreate_request.clone_from(request);
        }
        if let Some(sub_conditions) = &self.readiness {
            let ready = aggregate_readiness(status, sub_conditions, object.metadata.generation);
            status.set_condition(ready);
        }

        object.status != before
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the reconciler tests.

    use super::*;
    use crate::adapters::memory::{
        InMemoryEventRecorder, InMemoryStore, MockAudienceProvider, MockEmailProvider,
    };
    use crate::domain::models::{
        AudienceProviderConfig, ContactGroupMembershipRemovalSpec, ContactGroupMembershipSpec,
        ContactGroupSpec, ContactSpec, Email, EmailPriority, EmailProviderConfig, EmailRecipient,
        EmailSpec, EmailTemplate, EmailTemplateSpec, EmailVariable, ObjectRef,
    };

    pub struct Harness {
        pub store: Arc<InMemoryStore>,
        pub email: Arc<MockEmailProvider>,
        pub audience: Arc<MockAudienceProvider>,
        pub recorder: Arc<InMemoryEventRecorder>,
        pub ctx: Arc<Context<InMemoryStore>>,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::build(Config::default(), false)
        }

        pub fn with_audience(newsletter_group: Option<&str>) -> Self {
            let config = Config {
                audience_provider: AudienceProviderConfig {
                    enabled: true,
                    api_key: "loops_test".into(),
                    newsletter_list_id: "list-news".into(),
                    newsletter_group: newsletter_group.map(str::to_string),
                    ..AudienceProviderConfig::default()
                },
                ..Config::default()
            };
            Self::build(config, true)
        }

        fn build(mut config: Config, audience_enabled: bool) -> Self {
            config.email_provider = EmailProviderConfig {
                api_key: "re_test".into(),
                from: "noreply@example.com".into(),
                reply_to: "support@example.com".into(),
                ..EmailProviderConfig::default()
            };
            let store = Arc::new(InMemoryStore::new());
            let email = Arc::new(MockEmailProvider::new());
            let audience = Arc::new(MockAudienceProvider::new());
            let recorder = Arc::new(InMemoryEventRecorder::new());
            let provider = ProviderService::new(
                email.clone(),
                config.email_provider.from.clone(),
                config.email_provider.reply_to.clone(),
            );
            let audience_port: Option<Arc<dyn AudienceProvider>> = if audience_enabled {
                Some(audience.clone())
            } else {
                None
            };
            let ctx = Arc::new(Context::new(
                store.clone(),
                provider,
                audience_port,
                recorder.clone(),
                Arc::new(config),
            ));
            Self {
                store,
                email,
                audience,
                recorder,
                ctx,
            }
        }
    }

    pub fn template(name: &str) -> EmailTemplate {
        Object::new(
            "default",
            name,
            EmailTemplateSpec {
                subject: "Welcome {{ .Name }}".into(),
                html_body: "<p>Hello {{ .Name }}</p>".into(),
                text_body: "Hello {{ .Name }}".into(),
                variables: Vec::new(),
            },
        )
    }

    /// Email using the `welcome` template.
    pub fn email(name: &str, recipient: EmailRecipient, priority: EmailPriority) -> Email {
        Object::new(
            "default",
            name,
            EmailSpec {
                template_ref: ObjectRef::new("welcome"),
                recipient,
                variables: vec![EmailVariable::new("Name", "Jane")],
                cc: Vec::new(),
                bcc: Vec::new(),
                priority,
            },
        )
    }

    pub fn contact(name: &str, email: &str) -> Object<ContactSpec> {
        Object::new(
            "default",
            name,
            ContactSpec {
                email: email.into(),
                given_name: "Jane".into(),
                family_name: "Doe".into(),
                subject_ref: None,
            },
        )
    }

    pub fn group(name: &str) -> Object<ContactGroupSpec> {
        Object::new(
            "default",
            name,
            ContactGroupSpec {
                display_name: name.to_string(),
                description: String::new(),
            },
        )
    }

    pub fn membership(
        name: &str,
        contact: &str,
        group: &str,
    ) -> Object<ContactGroupMembershipSpec> {
        Object::new(
            "default",
            name,
            ContactGroupMembershipSpec {
                contact_ref: ObjectRef::new(contact),
                contact_group_ref: ObjectRef::new(group),
            },
        )
    }

    pub fn removal(
        name: &str,
        contact: &str,
        group: &str,
    ) -> Object<ContactGroupMembershipRemovalSpec> {
        Object::new(
            "default",
            name,
            ContactGroupMembershipRemovalSpec {
                contact_ref: ObjectRef::new(contact),
                contact_group_ref: ObjectRef::new(group),
            },
        )
    }

    pub fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }
}
