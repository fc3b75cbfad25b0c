use std::sync::Arc;

use tracing::{debug, instrument};

use crate::domain::errors::{DomainError, DomainResult, EntityKind};
use crate::domain::models::{Contact, ContactGroup, ContactGroupMembership, Email, EmailTemplate};
use crate::domain::ports::{
    ContactGroupOutput, ContactInput, ContactOutput, CreateContactGroupInput,
    CreateContactGroupMembershipInput, DeleteOutput, EmailProvider, SendEmailInput,
    SendEmailOutput,
};

use super::template::TemplateRenderer;

/// Outcome of an idempotent provider delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The provider removed the entity.
    Deleted,
    /// The entity was already gone.
    NotFound,
}

/// How a contact was brought in line with its spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactSync {
    /// Names were updated on the existing provider contact.
    UpdatedInPlace,
    /// The old provider contact was deleted and this one took its place.
    Recreated(ContactOutput),
    /// The old provider contact was deleted and a contact already registered
    /// under the new email took its place. No lifecycle event will follow.
    Adopted(ContactOutput),
}

/// Idempotent operations over an [`EmailProvider`], expressed in terms of
/// resources rather than provider payloads.
///
/// Creates probe for an existing entity before creating one. Deletes treat
/// "not found" as success. Sends forward the resource UID as the idempotency
/// key so a retried send is deduplicated by the provider.
#[derive(Clone)]
pub struct ProviderService {
    provider: Arc<dyn EmailProvider>,
    renderer: TemplateRenderer,
    from: String,
    reply_to: String,
}

impl ProviderService {
    pub fn new(
        provider: Arc<dyn EmailProvider>,
        from: impl Into<String>,
        reply_to: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            renderer: TemplateRenderer::new(),
            from: from.into(),
            reply_to: reply_to.into(),
        }
    }

    /// Render `template` with the email's variables and hand the result to
    /// the provider.
    #[instrument(skip_all, fields(email = %email.key(), uid = %email.metadata.uid))]
    pub async fn send_email(
        &self,
        email: &Email,
        template: &EmailTemplate,
        recipient: &str,
    ) -> DomainResult<SendEmailOutput> {
        let rendered = self
            .renderer
            .render_email(&email.spec.variables, &template.spec)?;

        self.provider
            .send_email(SendEmailInput {
                from: self.from.clone(),
                reply_to: self.reply_to.clone(),
                idempotency_key: email.metadata.uid.to_string(),
                to: vec![recipient.to_string()],
                cc: email.spec.cc.clone(),
                bcc: email.spec.bcc.clone(),
                subject: rendered.subject,
                html_body: rendered.html_body,
                text_body: rendered.text_body,
            })
            .await
    }

    /// Provider-side name of a contact group. The provider has no namespaces,
    /// so the immutable UID stands in for `namespace/name`.
    pub fn contact_group_display_name(group: &ContactGroup) -> String {
        group.metadata.uid.to_string()
    }

    /// Reuse an audience carrying the group's deterministic name, or create one.
    pub async fn create_contact_group(
        &self,
        group: &ContactGroup,
    ) -> DomainResult<ContactGroupOutput> {
        let display_name = Self::contact_group_display_name(group);
        match self.get_contact_group_by_display_name(&display_name).await {
            Ok(existing) => {
                debug!(contact_group_id = %existing.contact_group_id, "Reusing existing audience");
                Ok(existing)
            }
            Err(e) if e.is_not_found() => {
                self.provider
                    .create_contact_group(CreateContactGroupInput { display_name })
                    .await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_contact_group(
        &self,
        group: &ContactGroup,
    ) -> DomainResult<ContactGroupOutput> {
        self.provider
            .get_contact_group(&group.status.provider_id)
            .await
    }

    pub async fn get_contact_group_by_display_name(
        &self,
        display_name: &str,
    ) -> DomainResult<ContactGroupOutput> {
        self.provider
            .list_contact_groups()
            .await?
            .into_iter()
            .find(|g| g.display_name == display_name)
            .ok_or_else(|| DomainError::NotFound {
                kind: EntityKind::ProviderAudience,
                name: display_name.to_string(),
            })
    }

    pub async fn delete_contact_group(&self, group: &ContactGroup) -> DomainResult<DeleteOutcome> {
        let result = self
            .provider
            .delete_contact_group(&group.status.provider_id)
            .await;
        idempotent_delete(result, "contact group", &group.status.provider_id)
    }

    /// Reuse the audience entry for the contact's email, or create one.
    pub async fn create_contact_group_membership(
        &self,
        group: &ContactGroup,
        contact: &Contact,
    ) -> DomainResult<ContactOutput> {
        let group_id = &group.status.provider_id;
        match self
            .provider
            .get_contact_group_membership_by_email(group_id, &contact.spec.email)
            .await
        {
            Ok(existing) => Ok(existing),
            Err(e) if e.is_not_found() => {
                self.provider
                    .create_contact_group_membership(CreateContactGroupMembershipInput {
                        contact_group_id: group_id.clone(),
                        contact: contact_input(contact),
                    })
                    .await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn delete_contact_group_membership(
        &self,
        membership: &ContactGroupMembership,
        group: &ContactGroup,
    ) -> DomainResult<DeleteOutcome> {
        let result = self
            .provider
            .delete_contact_group_membership(
                &group.status.provider_id,
                &membership.status.provider_id,
            )
            .await;
        idempotent_delete(result, "contact group membership", &membership.status.provider_id)
    }

    /// Replace a membership: the provider cannot change an audience entry's
    /// email, so the old entry is deleted before a new one is created.
    pub async fn recreate_contact_group_membership(
        &self,
        membership: &ContactGroupMembership,
        group: &ContactGroup,
        contact: &Contact,
    ) -> DomainResult<ContactOutput> {
        if !membership.status.provider_id.is_empty() {
            self.delete_contact_group_membership(membership, group)
                .await?;
        }
        self.create_contact_group_membership(group, contact).await
    }

    /// Reuse the provider contact registered under the spec's email, or
    /// create one.
    pub async fn create_contact(&self, contact: &Contact) -> DomainResult<ContactOutput> {
        match self.provider.get_contact_by_email(&contact.spec.email).await {
            Ok(existing) => Ok(existing),
            Err(e) if e.is_not_found() => {
                self.provider.create_contact(contact_input(contact)).await
            }
            Err(e) => Err(e),
        }
    }

    /// Bring the provider contact in line with the spec.
    ///
    /// When the recorded provider contact is still registered under the
    /// spec's email only the names are updated. Otherwise the email changed:
    /// the old contact is deleted first, and only once that succeeded (or it
    /// was already gone) is the replacement created.
    pub async fn sync_contact(&self, contact: &Contact) -> DomainResult<ContactSync> {
        let current_id = &contact.status.provider_id;
        let existing = match self.provider.get_contact_by_email(&contact.spec.email).await {
            Ok(found) if !current_id.is_empty() && found.contact_id == *current_id => {
                self.provider
                    .update_contact(current_id, contact_input(contact))
                    .await?;
                return Ok(ContactSync::UpdatedInPlace);
            }
            Ok(found) => Some(found),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        if !current_id.is_empty() {
            self.delete_contact(contact).await?;
        }
        match existing {
            Some(found) => Ok(ContactSync::Adopted(found)),
            None => {
                let created = self.provider.create_contact(contact_input(contact)).await?;
                Ok(ContactSync::Recreated(created))
            }
        }
    }

    pub async fn delete_contact(&self, contact: &Contact) -> DomainResult<DeleteOutcome> {
        let result = self
            .provider
            .delete_contact(&contact.status.provider_id)
            .await;
        idempotent_delete(result, "contact", &contact.status.provider_id)
    }
}

fn contact_input(contact: &Contact) -> ContactInput {
    ContactInput {
        email: contact.spec.email.clone(),
        given_name: contact.spec.given_name.clone(),
        family_name: contact.spec.family_name.clone(),
    }
}

/// NotFound is success. A provider that answers without deleting anything
/// is an error, so the caller retries from the same identifier.
fn idempotent_delete(
    result: DomainResult<DeleteOutput>,
    what: &str,
    id: &str,
) -> DomainResult<DeleteOutcome> {
    match result {
        Ok(DeleteOutput { deleted: true }) => Ok(DeleteOutcome::Deleted),
        Ok(DeleteOutput { deleted: false }) => Err(DomainError::Unavailable(format!(
            "provider did not delete {what} {id}"
        ))),
        Err(e) if e.is_not_found() => Ok(DeleteOutcome::NotFound),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MockEmailProvider, MockOperation};
    use crate::domain::models::{
        ContactGroupMembershipSpec, ContactGroupSpec, ContactSpec, EmailRecipient, EmailSpec,
        EmailTemplateSpec, EmailVariable, Object, ObjectRef,
    };
    use uuid::Uuid;

    fn service(mock: &Arc<MockEmailProvider>) -> ProviderService {
        ProviderService::new(mock.clone(), "noreply@example.com", "support@example.com")
    }

    fn group() -> ContactGroup {
        let mut group = Object::new("default", "news", ContactGroupSpec::default());
        group.metadata.uid = Uuid::new_v4();
        group
    }

    fn contact(email: &str) -> Contact {
        Object::new(
            "default",
            "jane",
            ContactSpec {
                email: email.into(),
                given_name: "Jane".into(),
                ..ContactSpec::default()
            },
        )
    }

    #[tokio::test]
    async fn test_send_renders_and_uses_uid_as_idempotency_key() {
        let mock = Arc::new(MockEmailProvider::new());
        let mut email = Object::new(
            "default",
            "welcome",
            EmailSpec {
                template_ref: ObjectRef::new("welcome"),
                recipient: EmailRecipient::address("jane@example.com"),
                variables: vec![EmailVariable::new("Name", "Jane")],
                cc: vec!["cc@example.com".into()],
                bcc: Vec::new(),
                priority: Default::default(),
            },
        );
        email.metadata.uid = Uuid::new_v4();
        let template = Object::new(
            "default",
            "welcome",
            EmailTemplateSpec {
                subject: "Hello {{ .Name }}".into(),
                ..EmailTemplateSpec::default()
            },
        );

        let out = service(&mock)
            .send_email(&email, &template, "jane@example.com")
            .await
            .unwrap();

        let sent = mock.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].idempotency_key, email.metadata.uid.to_string());
        assert_eq!(sent[0].subject, "Hello Jane");
        assert_eq!(sent[0].cc, vec!["cc@example.com".to_string()]);
        assert_eq!(sent[0].reply_to, "support@example.com");
        assert!(!out.delivery_id.is_empty());
    }

    #[tokio::test]
    async fn test_create_contact_group_is_idempotent() {
        let mock = Arc::new(MockEmailProvider::new());
        let service = service(&mock);
        let group = group();

        let first = service.create_contact_group(&group).await.unwrap();
        let second = service.create_contact_group(&group).await.unwrap();

        assert_eq!(first.contact_group_id, second.contact_group_id);
        assert_eq!(mock.calls(MockOperation::CreateContactGroup).await, 1);
        assert_eq!(mock.audience_ids().await.len(), 1);
    }

    #[tokio::test]
    async fn test_create_membership_reuses_existing_entry() {
        let mock = Arc::new(MockEmailProvider::new());
        let service = service(&mock);
        let mut group = group();
        group.status.provider_id = service
            .create_contact_group(&group)
            .await
            .unwrap()
            .contact_group_id;
        let contact = contact("jane@example.com");

        let first = service
            .create_contact_group_membership(&group, &contact)
            .await
            .unwrap();
        let second = service
            .create_contact_group_membership(&group, &contact)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(mock.audience_contact_count(&group.status.provider_id).await, 1);
    }

    #[tokio::test]
    async fn test_delete_treats_not_found_as_success() {
        let mock = Arc::new(MockEmailProvider::new());
        let mut group = group();
        group.status.provider_id = "aud-missing".into();

        let outcome = service(&mock).delete_contact_group(&group).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_sync_contact_updates_in_place_when_email_unchanged() {
        let mock = Arc::new(MockEmailProvider::new());
        let service = service(&mock);
        let mut contact = contact("jane@example.com");
        contact.status.provider_id = service.create_contact(&contact).await.unwrap().contact_id;
        contact.spec.family_name = "Doe".into();

        let sync = service.sync_contact(&contact).await.unwrap();

        assert_eq!(sync, ContactSync::UpdatedInPlace);
        assert_eq!(mock.calls(MockOperation::DeleteContact).await, 0);
        assert_eq!(mock.calls(MockOperation::UpdateContact).await, 1);
    }

    #[tokio::test]
    async fn test_sync_contact_deletes_before_recreating() {
        let mock = Arc::new(MockEmailProvider::new());
        let service = service(&mock);
        let mut contact = contact("jane@example.com");
        contact.status.provider_id = service.create_contact(&contact).await.unwrap().contact_id;
        let old_id = contact.status.provider_id.clone();
        contact.spec.email = "jane@new.example.com".into();

        let sync = service.sync_contact(&contact).await.unwrap();

        let ContactSync::Recreated(created) = sync else {
            panic!("expected recreate, got {sync:?}");
        };
        assert_ne!(created.contact_id, old_id);
        let log = mock.call_log().await;
        let delete_at = log
            .iter()
            .position(|op| *op == MockOperation::DeleteContact)
            .unwrap();
        let create_at = log
            .iter()
            .rposition(|op| *op == MockOperation::CreateContact)
            .unwrap();
        assert!(delete_at < create_at);
    }

    #[tokio::test]
    async fn test_sync_contact_does_not_create_when_delete_fails() {
        let mock = Arc::new(MockEmailProvider::new());
        let service = service(&mock);
        let mut contact = contact("jane@example.com");
        contact.status.provider_id = service.create_contact(&contact).await.unwrap().contact_id;
        contact.spec.email = "jane@new.example.com".into();
        mock.fail_next(
            MockOperation::DeleteContact,
            DomainError::Unavailable("boom".into()),
        )
        .await;

        let err = service.sync_contact(&contact).await.unwrap_err();

        assert!(matches!(err, DomainError::Unavailable(_)));
        assert_eq!(mock.calls(MockOperation::CreateContact).await, 1);
    }

    #[tokio::test]
    async fn test_sync_contact_adopts_contact_registered_under_new_email() {
        let mock = Arc::new(MockEmailProvider::new());
        let service = service(&mock);
        let other = service
            .create_contact(&contact("jane@new.example.com"))
            .await
            .unwrap();
        let mut contact = contact("jane@example.com");
        contact.status.provider_id = service.create_contact(&contact).await.unwrap().contact_id;
        contact.spec.email = "jane@new.example.com".into();

        let sync = service.sync_contact(&contact).await.unwrap();

        assert_eq!(sync, ContactSync::Adopted(other));
        assert_eq!(mock.calls(MockOperation::DeleteContact).await, 1);
        assert_eq!(mock.calls(MockOperation::CreateContact).await, 2);
    }

    #[tokio::test]
    async fn test_recreate_membership_requires_delete() {
        let mock = Arc::new(MockEmailProvider::new());
        let service = service(&mock);
        let mut group = group();
        group.status.provider_id = service
            .create_contact_group(&group)
            .await
            .unwrap()
            .contact_group_id;
        let contact = contact("jane@example.com");
        let mut membership = Object::new(
            "default",
            "jane-news",
            ContactGroupMembershipSpec {
                contact_ref: ObjectRef::new("jane"),
                contact_group_ref: ObjectRef::new("news"),
            },
        );
        membership.status.provider_id = service
            .create_contact_group_membership(&group, &contact)
            .await
            .unwrap()
            .contact_id;

        let replacement = service
            .recreate_contact_group_membership(&membership, &group, &contact)
            .await
            .unwrap();

        assert_ne!(replacement.contact_id, membership.status.provider_id);
        assert_eq!(mock.audience_contact_count(&group.status.provider_id).await, 1);
    }
}
