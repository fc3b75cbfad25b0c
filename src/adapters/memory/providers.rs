//! Mock providers for tests and local runs.
//!
//! Both mocks keep their remote state in memory, count calls per operation,
//! and can be told to fail a specific operation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult, EntityKind};
use crate::domain::ports::{
    AudienceContact, AudienceContactInput, AudienceProvider, ContactGroupOutput, ContactInput,
    ContactOutput, CreateContactGroupInput, CreateContactGroupMembershipInput, DeleteOutput,
    EmailProvider, SendEmailInput, SendEmailOutput,
};

/// Operations a mock can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    SendEmail,
    CreateContactGroup,
    GetContactGroup,
    ListContactGroups,
    DeleteContactGroup,
    CreateMembership,
    GetMembership,
    DeleteMembership,
    CreateContact,
    GetContact,
    UpdateContact,
    DeleteContact,
    FindAudienceContact,
    CreateAudienceContact,
    UpdateAudienceContact,
    UpdateMailingLists,
    DeleteAudienceContact,
}

#[derive(Default)]
struct Failures {
    queued: HashMap<MockOperation, VecDeque<DomainError>>,
}

impl Failures {
    fn take(&mut self, operation: MockOperation) -> Option<DomainError> {
        self.queued.get_mut(&operation).and_then(VecDeque::pop_front)
    }
}

#[derive(Default)]
struct EmailState {
    next_id: u64,
    sent: Vec<SendEmailInput>,
    deliveries_by_key: HashMap<String, String>,
    audiences: BTreeMap<String, String>,
    audience_contacts: HashMap<String, BTreeMap<String, ContactInput>>,
    contacts: BTreeMap<String, ContactInput>,
    calls: HashMap<MockOperation, usize>,
    call_log: Vec<MockOperation>,
    failures: Failures,
}

impl EmailState {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn enter(&mut self, operation: MockOperation) -> DomainResult<()> {
        *self.calls.entry(operation).or_default() += 1;
        self.call_log.push(operation);
        self.failures.take(operation).map_or(Ok(()), Err)
    }
}

fn not_found(kind: EntityKind, name: &str) -> DomainError {
    DomainError::NotFound {
        kind,
        name: name.to_string(),
    }
}

/// In-memory stand-in for the email-delivery provider.
#[derive(Clone, Default)]
pub struct MockEmailProvider {
    state: Arc<RwLock<EmailState>>,
}

impl MockEmailProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call of `operation` with `error`. Calls queue up.
    pub async fn fail_next(&self, operation: MockOperation, error: DomainError) {
        self.state
            .write()
            .await
            .failures
            .queued
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    pub async fn calls(&self, operation: MockOperation) -> usize {
        self.state.read().await.calls.get(&operation).copied().unwrap_or(0)
    }

    /// Every call in order, failed ones included.
    pub async fn call_log(&self) -> Vec<MockOperation> {
        self.state.read().await.call_log.clone()
    }

    pub async fn sent(&self) -> Vec<SendEmailInput> {
        self.state.read().await.sent.clone()
    }

    pub async fn audience_ids(&self) -> Vec<String> {
        self.state.read().await.audiences.keys().cloned().collect()
    }

    pub async fn audience_contact_count(&self, audience_id: &str) -> usize {
        self.state
            .read()
            .await
            .audience_contacts
            .get(audience_id)
            .map_or(0, BTreeMap::len)
    }

    pub async fn contact(&self, contact_id: &str) -> Option<ContactInput> {
        self.state.read().await.contacts.get(contact_id).cloned()
    }

    /// Seed an audience directly, bypassing the call counters.
    pub async fn seed_audience(&self, display_name: &str) -> String {
        let mut state = self.state.write().await;
        let id = state.id("aud");
        state.audiences.insert(id.clone(), display_name.to_string());
        state.audience_contacts.insert(id.clone(), BTreeMap::new());
        id
    }
}

#[async_trait]
impl EmailProvider for MockEmailProvider {
    async fn send_email(&self, input: SendEmailInput) -> DomainResult<SendEmailOutput> {
        let mut state = self.state.write().await;
        state.enter(MockOperation::SendEmail)?;

        if let Some(existing) = state.deliveries_by_key.get(&input.idempotency_key) {
            return Ok(SendEmailOutput {
                delivery_id: existing.clone(),
            });
        }
        let delivery_id = state.id("d");
        state
            .deliveries_by_key
            .insert(input.idempotency_key.clone(), delivery_id.clone());
        state.sent.push(input);
        Ok(SendEmailOutput { delivery_id })
    }

    async fn create_contact_group(
        &self,
        input: CreateContactGroupInput,
    ) -> DomainResult<ContactGroupOutput> {
        let mut state = self.state.write().await;
        state.enter(MockOperation::CreateContactGroup)?;
        let id = state.id("aud");
        state.audiences.insert(id.clone(), input.display_name.clone());
        state.audience_contacts.insert(id.clone(), BTreeMap::new());
        Ok(ContactGroupOutput {
            contact_group_id: id,
            display_name: input.display_name,
            created_at: Some(Utc::now()),
        })
    }

    async fn get_contact_group(&self, contact_group_id: &str) -> DomainResult<ContactGroupOutput> {
        let mut state = self.state.write().await;
        state.enter(MockOperation::GetContactGroup)?;
        state
            .audiences
            .get(contact_group_id)
            .map(|name| ContactGroupOutput {
                contact_group_id: contact_group_id.to_string(),
                display_name: name.clone(),
                created_at: None,
            })
            .ok_or_else(|| not_found(EntityKind::ProviderAudience, contact_group_id))
    }

    async fn list_contact_groups(&self) -> DomainResult<Vec<ContactGroupOutput>> {
        let mut state = self.state.write().await;
        state.enter(MockOperation::ListContactGroups)?;
        Ok(state
            .audiences
            .iter()
            .map(|(id, name)| ContactGroupOutput {
                contact_group_id: id.clone(),
                display_name: name.clone(),
                created_at: None,
            })
            .collect())
    }

    async fn delete_contact_group(&self, contact_group_id: &str) -> DomainResult<DeleteOutput> {
        let mut state = self.state.write().await;
        state.enter(MockOperation::DeleteContactGroup)?;
        if state.audiences.remove(contact_group_id).is_none() {
            return Err(not_found(EntityKind::ProviderAudience, contact_group_id));
        }
        state.audience_contacts.remove(contact_group_id);
        Ok(DeleteOutput { deleted: true })
    }

    async fn create_contact_group_membership(
        &self,
        input: CreateContactGroupMembershipInput,
    ) -> DomainResult<ContactOutput> {
        let mut state = self.state.write().await;
        state.enter(MockOperation::CreateMembership)?;
        if !state.audience_contacts.contains_key(&input.contact_group_id) {
            return Err(not_found(EntityKind::ProviderAudience, &input.contact_group_id));
        }
        let id = state.id("m");
        if let Some(contacts) = state.audience_contacts.get_mut(&input.contact_group_id) {
            contacts.insert(id.clone(), input.contact);
        }
        Ok(ContactOutput { contact_id: id })
    }

    async fn get_contact_group_membership_by_email(
        &self,
        contact_group_id: &str,
        email: &str,
    ) -> DomainResult<ContactOutput> {
        let mut state = self.state.write().await;
        state.enter(MockOperation::GetMembership)?;
        state
            .audience_contacts
            .get(contact_group_id)
            .and_then(|contacts| contacts.iter().find(|(_, c)| c.email == email))
            .map(|(id, _)| ContactOutput {
                contact_id: id.clone(),
            })
            .ok_or_else(|| not_found(EntityKind::ProviderContact, email))
    }

    async fn delete_contact_group_membership(
        &self,
        contact_group_id: &str,
        membership_id: &str,
    ) -> DomainResult<DeleteOutput> {
        let mut state = self.state.write().await;
        state.enter(MockOperation::DeleteMembership)?;
        state
            .audience_contacts
            .get_mut(contact_group_id)
            .and_then(|contacts| contacts.remove(membership_id))
            .map(|_| DeleteOutput { deleted: true })
            .ok_or_else(|| not_found(EntityKind::ProviderContact, membership_id))
    }

    async fn create_contact(&self, input: ContactInput) -> DomainResult<ContactOutput> {
        let mut state = self.state.write().await;
        state.enter(MockOperation::CreateContact)?;
        let id = state.id("c");
        state.contacts.insert(id.clone(), input);
        Ok(ContactOutput { contact_id: id })
    }

    async fn get_contact_by_email(&self, email: &str) -> DomainResult<ContactOutput> {
        let mut state = self.state.write().await;
        state.enter(MockOperation::GetContact)?;
        state
            .contacts
            .iter()
            .find(|(_, c)| c.email == email)
            .map(|(id, _)| ContactOutput {
                contact_id: id.clone(),
            })
            .ok_or_else(|| not_found(EntityKind::ProviderContact, email))
    }

    async fn update_contact(&self, contact_id: &str, input: ContactInput) -> DomainResult<()> {
        let mut state = self.state.write().await;
        state.enter(MockOperation::UpdateContact)?;
        match state.contacts.get_mut(contact_id) {
            Some(existing) => {
                *existing = input;
                Ok(())
            }
            None => Err(not_found(EntityKind::ProviderContact, contact_id)),
        }
    }

    async fn delete_contact(&self, contact_id: &str) -> DomainResult<DeleteOutput> {
        let mut state = self.state.write().await;
        state.enter(MockOperation::DeleteContact)?;
        state
            .contacts
            .remove(contact_id)
            .map(|_| DeleteOutput { deleted: true })
            .ok_or_else(|| not_found(EntityKind::ProviderContact, contact_id))
    }
}

#[derive(Default)]
struct AudienceState {
    next_id: u64,
    contacts: BTreeMap<String, AudienceContact>,
    calls: HashMap<MockOperation, usize>,
    failures: Failures,
}

impl AudienceState {
    fn enter(&mut self, operation: MockOperation) -> DomainResult<()> {
        *self.calls.entry(operation).or_default() += 1;
        self.failures.take(operation).map_or(Ok(()), Err)
    }
}

/// In-memory stand-in for the audience provider. Contacts are keyed by user id.
#[derive(Clone, Default)]
pub struct MockAudienceProvider {
    state: Arc<RwLock<AudienceState>>,
}

impl MockAudienceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_next(&self, operation: MockOperation, error: DomainError) {
        self.state
            .write()
            .await
            .failures
            .queued
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    pub async fn calls(&self, operation: MockOperation) -> usize {
        self.state.read().await.calls.get(&operation).copied().unwrap_or(0)
    }

    pub async fn contact(&self, user_id: &str) -> Option<AudienceContact> {
        self.state.read().await.contacts.get(user_id).cloned()
    }
}

#[async_trait]
impl AudienceProvider for MockAudienceProvider {
    async fn find_contact_by_user_id(
        &self,
        user_id: &str,
    ) -> DomainResult<Option<AudienceContact>> {
        let mut state = self.state.write().await;
        state.enter(MockOperation::FindAudienceContact)?;
        Ok(state.contacts.get(user_id).cloned())
    }

    async fn create_contact(&self, input: AudienceContactInput) -> DomainResult<String> {
        let mut state = self.state.write().await;
        state.enter(MockOperation::CreateAudienceContact)?;
        if state.contacts.contains_key(&input.user_id) {
            return Err(DomainError::Conflict(format!(
                "contact with user id {} already exists",
                input.user_id
            )));
        }
        state.next_id += 1;
        let id = format!("loops-{}", state.next_id);
        state.contacts.insert(
            input.user_id.clone(),
            AudienceContact {
                id: id.clone(),
                email: input.email,
                user_id: input.user_id,
                first_name: input.first_name,
                last_name: input.last_name,
                mailing_lists: input.mailing_lists,
            },
        );
        Ok(id)
    }

    async fn update_contact(&self, input: AudienceContactInput) -> DomainResult<AudienceContact> {
        let mut state = self.state.write().await;
        state.enter(MockOperation::UpdateAudienceContact)?;
        let contact = state
            .contacts
            .get_mut(&input.user_id)
            .ok_or_else(|| not_found(EntityKind::ProviderContact, &input.user_id))?;
        contact.email = input.email;
        contact.first_name = input.first_name;
        contact.last_name = input.last_name;
        contact.mailing_lists.extend(input.mailing_lists);
        Ok(contact.clone())
    }

    async fn update_mailing_lists(
        &self,
        user_id: &str,
        mailing_lists: BTreeMap<String, bool>,
    ) -> DomainResult<()> {
        let mut state = self.state.write().await;
        state.enter(MockOperation::UpdateMailingLists)?;
        let contact = state
            .contacts
            .get_mut(user_id)
            .ok_or_else(|| not_found(EntityKind::ProviderContact, user_id))?;
        contact.mailing_lists.extend(mailing_lists);
        Ok(())
    }

    async fn delete_contact(&self, user_id: &str) -> DomainResult<()> {
        let mut state = self.state.write().await;
        state.enter(MockOperation::DeleteAudienceContact)?;
        state
            .contacts
            .remove(user_id)
            .map(|_| ())
            .ok_or_else(|| not_found(EntityKind::ProviderContact, user_id))
    }
}
