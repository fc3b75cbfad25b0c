//! HTTP surface of the webhook receiver.
//!
//! Responses never carry a body; the status code is the only signal.

use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, Method, Response, StatusCode},
    response::IntoResponse,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::domain::models::WebhookConfig;
use crate::domain::ports::{EventRecorder, ResourceStore};

use super::events::WebhookEvent;
use super::handler::{Outcome, WebhookHandler};
use super::signature::SignatureVerifier;

/// Shared state for the receiver.
pub struct WebhookState<St> {
    handler: WebhookHandler<St>,
    verifier: SignatureVerifier,
}

impl<St: ResourceStore> WebhookState<St> {
    pub fn new(handler: WebhookHandler<St>, verifier: SignatureVerifier) -> Self {
        Self { handler, verifier }
    }
}

/// Webhook HTTP server.
pub struct WebhookServer<St> {
    state: Arc<WebhookState<St>>,
    config: WebhookConfig,
}

impl<St: ResourceStore + 'static> WebhookServer<St> {
    pub fn new(
        store: Arc<St>,
        recorder: Arc<dyn EventRecorder>,
        config: WebhookConfig,
    ) -> anyhow::Result<Self> {
        let verifier = SignatureVerifier::new(
            &config.signing_secret,
            Duration::from_secs(config.tolerance_secs),
        )
        .context("Invalid webhook signing secret")?;
        let handler = WebhookHandler::new(store, recorder);
        Ok(Self {
            state: Arc::new(WebhookState::new(handler, verifier)),
            config,
        })
    }

    pub fn router(&self) -> Router {
        router(Arc::clone(&self.state), &self.config.path)
    }

    fn addr(&self) -> anyhow::Result<SocketAddr> {
        let port = u16::try_from(self.config.port)
            .with_context(|| format!("Webhook port out of range: {}", self.config.port))?;
        format!("{}:{}", self.config.bind_address, port)
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.config.bind_address))
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.addr()?;
        let router = self.router();
        info!(%addr, path = %self.config.path, "Webhook server listening");

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .context("Webhook server failed")?;
        info!("Webhook server stopped");
        Ok(())
    }
}

/// Router answering every method on `path`; only POST is accepted.
pub fn router<St: ResourceStore + 'static>(state: Arc<WebhookState<St>>, path: &str) -> Router {
    Router::new()
        .route(path, any(receive::<St>))
        .with_state(state)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
}

async fn receive<St: ResourceStore + 'static>(
    State(state): State<Arc<WebhookState<St>>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    if method != Method::POST {
        return (StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, "POST")]).into_response();
    }

    if let Err(e) = state.verifier.verify(&headers, &body) {
        warn!(error = %e, "Rejected webhook signature");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let Some(event) = WebhookEvent::parse(&body) else {
        warn!(bytes = body.len(), "Unrecognized webhook payload");
        return StatusCode::BAD_REQUEST.into_response();
    };

    match state.handler.handle(&event).await {
        Ok(Outcome::Uncorrelated) => match event {
            WebhookEvent::Delivery(_) => StatusCode::NOT_FOUND.into_response(),
            WebhookEvent::Contact(_) => StatusCode::OK.into_response(),
        },
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => {
            error!(event_type = event.type_str(), error = %e, "Failed to apply webhook event");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_default();
    error!(%detail, "Webhook handler panicked");
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
