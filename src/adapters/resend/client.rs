//! Resend HTTP client with rate limiting.
//!
//! Implements [`EmailProvider`] over the Resend REST API. Audiences back
//! contact groups, audience contacts back memberships, and top-level
//! contacts back Contact resources. A `governor` limiter keeps the client
//! inside the provider's per-second quota.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;

use crate::domain::errors::{DomainError, DomainResult, EntityKind};
use crate::domain::models::EmailProviderConfig;
use crate::domain::ports::{
    ContactGroupOutput, ContactInput, ContactOutput, CreateContactGroupInput,
    CreateContactGroupMembershipInput, DeleteOutput, EmailProvider, SendEmailInput,
    SendEmailOutput,
};

use super::errors::ResendError;
use super::models::{
    AudienceResponse, ContactRequest, ContactResponse, CreateAudienceRequest, DeleteResponse,
    IdResponse, ListResponse, SendEmailRequest,
};

/// Header the provider uses to deduplicate retried sends.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Upper bound for the client timeout.
const MAX_TIMEOUT_SECS: u64 = 15;

/// Configuration for [`ResendClient`].
#[derive(Clone)]
pub struct ResendClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub requests_per_second: u32,
}

impl From<&EmailProviderConfig> for ResendClientConfig {
    fn from(config: &EmailProviderConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            timeout_secs: config.timeout_secs,
            requests_per_second: config.requests_per_second,
        }
    }
}

/// HTTP client for the Resend REST API.
#[derive(Clone)]
pub struct ResendClient {
    http: Client,
    api_key: String,
    base_url: Url,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl ResendClient {
    pub fn with_config(config: ResendClientConfig) -> DomainResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs.clamp(1, MAX_TIMEOUT_SECS));
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::Internal(format!("failed to build Resend client: {e}")))?;

        let base_url = Url::parse(&config.base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                DomainError::Validation(format!("invalid Resend base url: {}", config.base_url))
            })?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        Ok(Self {
            http,
            api_key: config.api_key,
            base_url,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
        })
    }

    /// Endpoint under the base url. Each segment is percent-encoded, so ids
    /// and email addresses cannot escape their path position.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Wait for a rate-limit permit and build an authorized request.
    async fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        self.limiter.until_ready().await;
        self.http
            .request(method, self.endpoint(segments))
            .bearer_auth(&self.api_key)
    }

    async fn execute<T: DeserializeOwned>(
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, ResendError> {
        let resp = request
            .send()
            .await
            .map_err(|source| ResendError::Transport { operation, source })?;
        Self::decode(operation, resp).await
    }

    async fn decode<T: DeserializeOwned>(
        operation: &'static str,
        resp: Response,
    ) -> Result<T, ResendError> {
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ResendError::api(operation, status, &body));
        }

        resp.json::<T>().await.map_err(|e| ResendError::Decode {
            operation,
            message: e.to_string(),
        })
    }
}

fn contact_request(input: &ContactInput) -> ContactRequest<'_> {
    ContactRequest {
        email: &input.email,
        first_name: &input.given_name,
        last_name: &input.family_name,
        unsubscribed: false,
    }
}

fn audience_output(audience: AudienceResponse) -> ContactGroupOutput {
    ContactGroupOutput {
        contact_group_id: audience.id,
        display_name: audience.name,
        created_at: audience.created_at,
    }
}

#[async_trait]
impl EmailProvider for ResendClient {
    async fn send_email(&self, input: SendEmailInput) -> DomainResult<SendEmailOutput> {
        let body = SendEmailRequest {
            from: &input.from,
            to: &input.to,
            subject: &input.subject,
            html: &input.html_body,
            text: &input.text_body,
            cc: &input.cc,
            bcc: &input.bcc,
            reply_to: &input.reply_to,
        };
        let request = self
            .request(Method::POST, &["emails"])
            .await
            .header(IDEMPOTENCY_HEADER, &input.idempotency_key)
            .json(&body);

        let sent: IdResponse = Self::execute("send_email", request)
            .await
            .map_err(|e| e.translate(EntityKind::ProviderEmail, &input.idempotency_key))?;
        Ok(SendEmailOutput {
            delivery_id: sent.id,
        })
    }

    async fn create_contact_group(
        &self,
        input: CreateContactGroupInput,
    ) -> DomainResult<ContactGroupOutput> {
        let request = self
            .request(Method::POST, &["audiences"])
            .await
            .json(&CreateAudienceRequest {
                name: &input.display_name,
            });

        let created: IdResponse = Self::execute("create_audience", request)
            .await
            .map_err(|e| e.translate(EntityKind::ProviderAudience, &input.display_name))?;
        Ok(ContactGroupOutput {
            contact_group_id: created.id,
            display_name: input.display_name,
            created_at: None,
        })
    }

    async fn get_contact_group(&self, contact_group_id: &str) -> DomainResult<ContactGroupOutput> {
        let request = self
            .request(Method::GET, &["audiences", contact_group_id])
            .await;

        Self::execute("get_audience", request)
            .await
            .map(audience_output)
            .map_err(|e| e.translate(EntityKind::ProviderAudience, contact_group_id))
    }

    async fn list_contact_groups(&self) -> DomainResult<Vec<ContactGroupOutput>> {
        let request = self.request(Method::GET, &["audiences"]).await;

        let listed: ListResponse<AudienceResponse> = Self::execute("list_audiences", request)
            .await
            .map_err(|e| e.translate(EntityKind::ProviderAudience, "*"))?;
        Ok(listed.data.into_iter().map(audience_output).collect())
    }

    async fn delete_contact_group(&self, contact_group_id: &str) -> DomainResult<DeleteOutput> {
        let request = self
            .request(Method::DELETE, &["audiences", contact_group_id])
            .await;

        let deleted: DeleteResponse = Self::execute("delete_audience", request)
            .await
            .map_err(|e| e.translate(EntityKind::ProviderAudience, contact_group_id))?;
        Ok(DeleteOutput {
            deleted: deleted.deleted,
        })
    }

    async fn create_contact_group_membership(
        &self,
        input: CreateContactGroupMembershipInput,
    ) -> DomainResult<ContactOutput> {
        let request = self
            .request(
                Method::POST,
                &["audiences", &input.contact_group_id, "contacts"],
            )
            .await
            .json(&contact_request(&input.contact));

        let created: IdResponse = Self::execute("create_audience_contact", request)
            .await
            .map_err(|e| e.translate(EntityKind::ProviderAudience, &input.contact_group_id))?;
        Ok(ContactOutput {
            contact_id: created.id,
        })
    }

    async fn get_contact_group_membership_by_email(
        &self,
        contact_group_id: &str,
        email: &str,
    ) -> DomainResult<ContactOutput> {
        let request = self
            .request(
                Method::GET,
                &["audiences", contact_group_id, "contacts", email],
            )
            .await;

        let found: ContactResponse = Self::execute("get_audience_contact", request)
            .await
            .map_err(|e| e.translate(EntityKind::ProviderContact, email))?;
        Ok(ContactOutput {
            contact_id: found.id,
        })
    }

    async fn delete_contact_group_membership(
        &self,
        contact_group_id: &str,
        membership_id: &str,
    ) -> DomainResult<DeleteOutput> {
        let request = self
            .request(
                Method::DELETE,
                &["audiences", contact_group_id, "contacts", membership_id],
            )
            .await;

        let deleted: DeleteResponse = Self::execute("delete_audience_contact", request)
            .await
            .map_err(|e| e.translate(EntityKind::ProviderContact, membership_id))?;
        Ok(DeleteOutput {
            deleted: deleted.deleted,
        })
    }

    async fn create_contact(&self, input: ContactInput) -> DomainResult<ContactOutput> {
        let request = self
            .request(Method::POST, &["contacts"])
            .await
            .json(&contact_request(&input));

        let created: IdResponse = Self::execute("create_contact", request)
            .await
            .map_err(|e| e.translate(EntityKind::ProviderContact, &input.email))?;
        Ok(ContactOutput {
            contact_id: created.id,
        })
    }

    async fn get_contact_by_email(&self, email: &str) -> DomainResult<ContactOutput> {
        let request = self.request(Method::GET, &["contacts", email]).await;

        let found: ContactResponse = Self::execute("get_contact", request)
            .await
            .map_err(|e| e.translate(EntityKind::ProviderContact, email))?;
        Ok(ContactOutput {
            contact_id: found.id,
        })
    }

    async fn update_contact(&self, contact_id: &str, input: ContactInput) -> DomainResult<()> {
        let request = self
            .request(Method::PATCH, &["contacts", contact_id])
            .await
            .json(&contact_request(&input));

        let _: IdResponse = Self::execute("update_contact", request)
            .await
            .map_err(|e| e.translate(EntityKind::ProviderContact, contact_id))?;
        Ok(())
    }

    async fn delete_contact(&self, contact_id: &str) -> DomainResult<DeleteOutput> {
        let request = self
            .request(Method::DELETE, &["contacts", contact_id])
            .await;

        let deleted: DeleteResponse = Self::execute("delete_contact", request)
            .await
            .map_err(|e| e.translate(EntityKind::ProviderContact, contact_id))?;
        Ok(DeleteOutput {
            deleted: deleted.deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client(server: &Server) -> ResendClient {
        ResendClient::with_config(ResendClientConfig {
            api_key: "re_test".into(),
            base_url: server.url(),
            timeout_secs: 5,
            requests_per_second: 100,
        })
        .expect("client should build")
    }

    #[tokio::test]
    async fn test_send_email_forwards_idempotency_key() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/emails")
            .match_header("authorization", "Bearer re_test")
            .match_header(IDEMPOTENCY_HEADER, "0f8e-uid")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "from": "noreply@example.com",
                "to": ["jane@example.com"],
                "subject": "Welcome"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"d-1"}"#)
            .create_async()
            .await;

        let output = client(&server)
            .send_email(SendEmailInput {
                from: "noreply@example.com".into(),
                idempotency_key: "0f8e-uid".into(),
                to: vec!["jane@example.com".into()],
                subject: "Welcome".into(),
                html_body: "<p>Hi</p>".into(),
                ..SendEmailInput::default()
            })
            .await
            .expect("send should succeed");

        assert_eq!(output.delivery_id, "d-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_audience_is_not_found() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/audiences/aud-404")
            .with_status(404)
            .with_body(r#"{"statusCode":404,"message":"Audience not found","name":"not_found"}"#)
            .create_async()
            .await;

        let err = client(&server)
            .get_contact_group("aud-404")
            .await
            .unwrap_err();

        assert_eq!(
            err,
            DomainError::NotFound {
                kind: EntityKind::ProviderAudience,
                name: "aud-404".into()
            }
        );
    }

    #[tokio::test]
    async fn test_get_audience_parses_sql_timestamp() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/audiences/aud-1")
            .with_status(200)
            .with_body(
                r#"{"object":"audience","id":"aud-1","name":"group-uid","created_at":"2023-10-06 22:59:55.977+00"}"#,
            )
            .create_async()
            .await;

        let audience = client(&server).get_contact_group("aud-1").await.unwrap();

        assert_eq!(audience.display_name, "group-uid");
        assert!(audience.created_at.is_some());
    }

    #[tokio::test]
    async fn test_list_audiences() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/audiences")
            .with_status(200)
            .with_body(
                r#"{"object":"list","data":[{"id":"aud-1","name":"a"},{"id":"aud-2","name":"b"}]}"#,
            )
            .create_async()
            .await;

        let groups = client(&server).list_contact_groups().await.unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].contact_group_id, "aud-2");
    }

    #[tokio::test]
    async fn test_delete_membership_reports_deleted_flag() {
        let mut server = Server::new_async().await;
        server
            .mock("DELETE", "/audiences/aud-1/contacts/m-1")
            .with_status(200)
            .with_body(r#"{"object":"contact","contact":"m-1","deleted":true}"#)
            .create_async()
            .await;

        let output = client(&server)
            .delete_contact_group_membership("aud-1", "m-1")
            .await
            .unwrap();

        assert!(output.deleted);
    }

    #[tokio::test]
    async fn test_email_lookups_encode_the_address() {
        let mut server = Server::new_async().await;
        let contact = server
            .mock("GET", "/contacts/jane+news%231@example.com")
            .with_status(200)
            .with_body(r#"{"object":"contact","id":"c-1","email":"jane+news#1@example.com"}"#)
            .create_async()
            .await;
        let member = server
            .mock("GET", "/audiences/aud-1/contacts/jane%2Fnews@example.com")
            .with_status(200)
            .with_body(r#"{"object":"contact","id":"m-1","email":"jane/news@example.com"}"#)
            .create_async()
            .await;
        let client = client(&server);

        let found = client
            .get_contact_by_email("jane+news#1@example.com")
            .await
            .unwrap();
        let membership = client
            .get_contact_group_membership_by_email("aud-1", "jane/news@example.com")
            .await
            .unwrap();

        assert_eq!(found.contact_id, "c-1");
        assert_eq!(membership.contact_id, "m-1");
        contact.assert_async().await;
        member.assert_async().await;
    }

    #[test]
    fn test_opaque_base_url_is_rejected() {
        let result = ResendClient::with_config(ResendClientConfig {
            api_key: "re_test".into(),
            base_url: "mailto:api@resend.com".into(),
            timeout_secs: 5,
            requests_per_second: 1,
        });
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/contacts")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let err = client(&server)
            .create_contact(ContactInput {
                email: "jane@example.com".into(),
                ..ContactInput::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Unavailable(_)));
        assert!(err.is_retryable());
    }
}
