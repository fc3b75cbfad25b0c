//! Loops HTTP client.
//!
//! Contacts are addressed by `userId`, which herald sets to the Contact
//! resource's uid so lookups never depend on a mutable email address.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::domain::errors::{DomainError, DomainResult, EntityKind};
use crate::domain::models::AudienceProviderConfig;
use crate::domain::ports::{AudienceContact, AudienceContactInput, AudienceProvider};

use super::models::{ContactPayload, CreateResponse, DeletePayload, LoopsContact, UpdateResponse};

const MAX_TIMEOUT_SECS: u64 = 15;

/// HTTP client for the Loops contacts API.
#[derive(Clone)]
pub struct LoopsClient {
    http: Client,
    api_key: String,
    base_url: String,
    source: String,
}

impl LoopsClient {
    pub fn new(config: &AudienceProviderConfig) -> DomainResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs.clamp(1, MAX_TIMEOUT_SECS));
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::Internal(format!("failed to build Loops client: {e}")))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            source: config.source.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
    }

    async fn execute<T: DeserializeOwned>(
        operation: &str,
        user_id: &str,
        request: RequestBuilder,
    ) -> DomainResult<T> {
        let resp = request
            .send()
            .await
            .map_err(|e| DomainError::Transport(format!("loops {operation} request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify(operation, user_id, status, &body));
        }

        resp.json::<T>().await.map_err(|e| {
            DomainError::Serialization(format!("failed to parse loops {operation} response: {e}"))
        })
    }
}

fn classify(operation: &str, user_id: &str, status: StatusCode, body: &str) -> DomainError {
    let message = format!("loops {operation} failed: status={status} body={body}");
    match status {
        StatusCode::NOT_FOUND => DomainError::NotFound {
            kind: EntityKind::ProviderContact,
            name: user_id.to_string(),
        },
        StatusCode::CONFLICT => DomainError::Conflict(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            DomainError::BadRequest(message)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DomainError::Validation(message),
        _ => DomainError::Unavailable(message),
    }
}

#[async_trait]
impl AudienceProvider for LoopsClient {
    async fn find_contact_by_user_id(
        &self,
        user_id: &str,
    ) -> DomainResult<Option<AudienceContact>> {
        if user_id.trim().is_empty() {
            return Err(DomainError::Validation("userId must not be empty".into()));
        }
        let request = self
            .request(Method::GET, "/api/v1/contacts/find")
            .query(&[("userId", user_id)]);

        let found: Vec<LoopsContact> = Self::execute("find contact", user_id, request).await?;
        Ok(found.into_iter().next().map(AudienceContact::from))
    }

    async fn create_contact(&self, input: AudienceContactInput) -> DomainResult<String> {
        let payload = ContactPayload {
            email: &input.email,
            first_name: &input.first_name,
            last_name: &input.last_name,
            source: &self.source,
            subscribed: true,
            user_id: &input.user_id,
            mailing_lists: Some(&input.mailing_lists),
        };
        let request = self
            .request(Method::POST, "/api/v1/contacts/create")
            .json(&payload);

        let created: CreateResponse =
            Self::execute("create contact", &input.user_id, request).await?;
        if !created.success || created.id.is_empty() {
            return Err(DomainError::Unavailable(format!(
                "loops create contact for {} was not acknowledged",
                input.user_id
            )));
        }
        Ok(created.id)
    }

    async fn update_contact(&self, input: AudienceContactInput) -> DomainResult<AudienceContact> {
        let mailing_lists = (!input.mailing_lists.is_empty()).then_some(&input.mailing_lists);
        let payload = ContactPayload {
            email: &input.email,
            first_name: &input.first_name,
            last_name: &input.last_name,
            source: &self.source,
            subscribed: true,
            user_id: &input.user_id,
            mailing_lists,
        };
        let request = self
            .request(Method::PUT, "/api/v1/contacts/update")
            .json(&payload);

        let updated: UpdateResponse =
            Self::execute("update contact", &input.user_id, request).await?;
        updated
            .into_first()
            .map(AudienceContact::from)
            .ok_or_else(|| {
                DomainError::Serialization("empty loops update contact response".into())
            })
    }

    async fn update_mailing_lists(
        &self,
        user_id: &str,
        mailing_lists: BTreeMap<String, bool>,
    ) -> DomainResult<()> {
        let payload = ContactPayload {
            email: "",
            first_name: "",
            last_name: "",
            source: "",
            subscribed: true,
            user_id,
            mailing_lists: Some(&mailing_lists),
        };
        let request = self
            .request(Method::PUT, "/api/v1/contacts/update")
            .json(&payload);

        let _: UpdateResponse = Self::execute("update mailing lists", user_id, request).await?;
        Ok(())
    }

    async fn delete_contact(&self, user_id: &str) -> DomainResult<()> {
        let request = self
            .request(Method::POST, "/api/v1/contacts/delete")
            .json(&DeletePayload { user_id });

        let _: serde_json::Value = Self::execute("delete contact", user_id, request).await?;
        Ok(())
    }
}
