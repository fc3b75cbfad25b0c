//! Common test utilities for integration tests
//!
//! Provides an engine wired to the in-memory store and mock providers,
//! resource fixtures, and signed webhook requests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use herald::adapters::memory::{
    InMemoryEventRecorder, InMemoryStore, MockAudienceProvider, MockEmailProvider,
};
use herald::domain::models::{
    AudienceProviderConfig, Config, ContactGroupMembershipRemovalSpec, ContactGroupMembershipSpec,
    ContactGroupSpec, ContactSpec, ControllerConfig, EmailPriority, EmailProviderConfig,
    EmailRecipient, EmailSpec, EmailTemplateSpec, EmailVariable, Object, ObjectKey, ObjectRef,
    Spec, WebhookConfig,
};
use herald::domain::ports::{AudienceProvider, ResourceStore};
use herald::services::webhook::signature::{ID_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use herald::services::webhook::SignatureVerifier;
use herald::services::{Context, ControllerManager, ProviderService, WebhookServer};
use herald::DomainResult;

pub const SECRET: &str = "whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";
pub const WEBHOOK_PATH: &str = "/webhooks/resend";

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Poll an async predicate every 20ms until it holds or `timeout_ms` passes.
pub async fn wait_for<F, Fut>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if predicate().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    false
}

/// Valid configuration with short backoffs.
pub fn test_config(audience: bool) -> Config {
    Config {
        email_provider: EmailProviderConfig {
            api_key: "re_test".into(),
            from: "noreply@example.com".into(),
            reply_to: "support@example.com".into(),
            ..EmailProviderConfig::default()
        },
        audience_provider: AudienceProviderConfig {
            enabled: audience,
            api_key: "loops_test".into(),
            newsletter_list_id: "list-news".into(),
            ..AudienceProviderConfig::default()
        },
        controller: ControllerConfig {
            workers: 2,
            initial_backoff_ms: 20,
            max_backoff_ms: 200,
        },
        webhook: WebhookConfig {
            signing_secret: SECRET.into(),
            ..WebhookConfig::default()
        },
        ..Config::default()
    }
}

/// Controllers over the in-memory store and mock providers.
pub struct Engine {
    pub store: Arc<InMemoryStore>,
    pub email: Arc<MockEmailProvider>,
    pub audience: Arc<MockAudienceProvider>,
    pub recorder: Arc<InMemoryEventRecorder>,
    pub ctx: Arc<Context<InMemoryStore>>,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<DomainResult<()>>>,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let email = Arc::new(MockEmailProvider::new());
        let audience = Arc::new(MockAudienceProvider::new());
        let recorder = Arc::new(InMemoryEventRecorder::new());
        let provider = ProviderService::new(
            email.clone(),
            config.email_provider.from.clone(),
            config.email_provider.reply_to.clone(),
        );
        let audience_port: Option<Arc<dyn AudienceProvider>> = if config.audience_provider.enabled {
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
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            email,
            audience,
            recorder,
            ctx,
            shutdown,
            handle: None,
        }
    }

    /// Start every controller in the background.
    pub fn start(mut self) -> Self {
        let manager = ControllerManager::with_reconcilers(&self.ctx);
        self.handle = Some(tokio::spawn(manager.run(self.shutdown.subscribe())));
        self
    }

    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("controllers should stop")
                .expect("controller task should not panic")
                .expect("controllers should exit cleanly");
        }
    }

    pub fn webhook(&self) -> Router {
        WebhookServer::new(
            self.store.clone(),
            self.recorder.clone(),
            self.ctx.config.webhook.clone(),
        )
        .expect("valid webhook config")
        .router()
    }

    pub async fn get<S: Spec>(&self, name: &str) -> Option<Object<S>> {
        self.store.get::<S>(&key(name)).await.ok()
    }
}

/// POST `body` to the webhook path with a valid signature.
pub fn signed_request(body: &str) -> Request<Body> {
    let verifier = SignatureVerifier::new(SECRET, Duration::from_secs(300)).expect("valid secret");
    let timestamp = Utc::now().timestamp().to_string();
    Request::builder()
        .method(Method::POST)
        .uri(WEBHOOK_PATH)
        .header(ID_HEADER, format!("msg_{timestamp}"))
        .header(TIMESTAMP_HEADER, &timestamp)
        .header(
            SIGNATURE_HEADER,
            verifier.sign(&format!("msg_{timestamp}"), &timestamp, body.as_bytes()),
        )
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::new("default", name)
}

pub fn template(name: &str) -> Object<EmailTemplateSpec> {
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

pub fn email(name: &str, to: &str) -> Object<EmailSpec> {
    Object::new(
        "default",
        name,
        EmailSpec {
            template_ref: ObjectRef::new("welcome"),
            recipient: EmailRecipient::address(to),
            variables: vec![EmailVariable::new("Name", "Jane")],
            cc: Vec::new(),
            bcc: Vec::new(),
            priority: EmailPriority::High,
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

pub fn membership(name: &str, contact: &str, group: &str) -> Object<ContactGroupMembershipSpec> {
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
