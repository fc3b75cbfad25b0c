//! Provider error classification.

use reqwest::StatusCode;
use thiserror::Error;

use crate::domain::errors::{DomainError, EntityKind};

use super::models::ErrorResponse;

#[derive(Debug, Error)]
pub enum ResendError {
    #[error("{operation} returned {status}: {message}")]
    Api {
        operation: &'static str,
        status: StatusCode,
        message: String,
    },

    #[error("{operation} request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} response could not be decoded: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },
}

impl ResendError {
    /// Build an API error from a raw response body, preferring the
    /// provider's `message` field when the body is JSON.
    pub fn api(operation: &'static str, status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorResponse>(body)
            .ok()
            .filter(|e| !e.message.is_empty())
            .map_or_else(|| body.to_string(), |e| e.message);
        Self::Api {
            operation,
            status,
            message,
        }
    }

    /// Normalize into the shared error taxonomy.
    ///
    /// Any 404, or any message mentioning "not found", becomes
    /// `NotFound { kind, name }` so callers can treat deletes idempotently.
    pub fn translate(self, kind: EntityKind, name: &str) -> DomainError {
        let status = match &self {
            Self::Api { status, message, .. } => {
                if *status == StatusCode::NOT_FOUND
                    || message.to_ascii_lowercase().contains("not found")
                {
                    return DomainError::NotFound {
                        kind,
                        name: name.to_string(),
                    };
                }
                *status
            }
            Self::Transport { .. } => return DomainError::Transport(self.to_string()),
            Self::Decode { .. } => return DomainError::Serialization(self.to_string()),
        };

        match status {
            StatusCode::CONFLICT => DomainError::Conflict(self.to_string()),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                DomainError::BadRequest(self.to_string())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                DomainError::Validation(self.to_string())
            }
            _ => DomainError::Unavailable(self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_is_normalized() {
        let err = ResendError::api(
            "get_audience",
            StatusCode::BAD_REQUEST,
            r#"{"statusCode":400,"message":"Audience Not Found","name":"validation_error"}"#,
        );
        let translated = err.translate(EntityKind::ProviderAudience, "aud-1");
        assert_eq!(
            translated,
            DomainError::NotFound {
                kind: EntityKind::ProviderAudience,
                name: "aud-1".into()
            }
        );
    }

    #[test]
    fn test_status_classification() {
        let conflict = ResendError::api("create", StatusCode::CONFLICT, "duplicate")
            .translate(EntityKind::ProviderContact, "x");
        let throttled = ResendError::api("create", StatusCode::TOO_MANY_REQUESTS, "slow down")
            .translate(EntityKind::ProviderContact, "x");
        let invalid = ResendError::api("create", StatusCode::UNPROCESSABLE_ENTITY, "bad email")
            .translate(EntityKind::ProviderContact, "x");

        assert!(conflict.is_conflict());
        assert!(matches!(throttled, DomainError::Unavailable(_)));
        assert!(matches!(invalid, DomainError::BadRequest(_)));
        assert!(!invalid.is_retryable());
    }

    #[test]
    fn test_plain_text_body_kept_as_message() {
        let err = ResendError::api("send_email", StatusCode::BAD_GATEWAY, "upstream exploded");
        assert_eq!(
            err.to_string(),
            "send_email returned 502 Bad Gateway: upstream exploded"
        );
    }
}
