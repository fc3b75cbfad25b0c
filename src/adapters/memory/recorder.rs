//! Observability sinks.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ObservedEvent, Severity};
use crate::domain::ports::EventRecorder;

const DEFAULT_HISTORY: usize = 512;

/// Writes every record to the log and keeps a bounded history in memory.
#[derive(Clone)]
pub struct InMemoryEventRecorder {
    events: Arc<RwLock<VecDeque<ObservedEvent>>>,
    capacity: usize,
}

impl InMemoryEventRecorder {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    /// Snapshot of the retained records, oldest first.
    pub async fn events(&self) -> Vec<ObservedEvent> {
        self.events.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

impl Default for InMemoryEventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventRecorder for InMemoryEventRecorder {
    async fn record(&self, event: ObservedEvent) -> DomainResult<()> {
        match event.severity {
            Severity::Normal => tracing::info!(
                kind = %event.subject.kind,
                namespace = %event.subject.namespace,
                name = %event.subject.name,
                reason = %event.reason,
                component = %event.reporting_component,
                "{}",
                event.message
            ),
            Severity::Warning => tracing::warn!(
                kind = %event.subject.kind,
                namespace = %event.subject.namespace,
                name = %event.subject.name,
                reason = %event.reason,
                component = %event.reporting_component,
                "{}",
                event.message
            ),
        }

        let mut events = self.events.write().await;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ContactSpec, Object, Reason};

    #[tokio::test]
    async fn test_history_is_bounded() {
        let recorder = InMemoryEventRecorder::with_capacity(2);
        let contact = Object::new("default", "jane", ContactSpec::default());

        for reason in [Reason::Created, Reason::Updated, Reason::Deleted] {
            recorder
                .record(ObservedEvent::new(&contact, reason, "", Severity::Normal, "test"))
                .await
                .unwrap();
        }

        let events = recorder.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].reason, Reason::Updated);
        assert_eq!(events[1].reason, Reason::Deleted);
    }
}
