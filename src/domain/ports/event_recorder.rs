use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::ObservedEvent;

/// Sink for observability records.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, event: ObservedEvent) -> DomainResult<()>;
}
