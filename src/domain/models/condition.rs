//! Conditions and the status block shared by all resources.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition types understood by reconcilers and the webhook receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// User-facing readiness; aggregated for multi-provider resources.
    Ready,
    /// Readiness of the entity on the email-delivery provider.
    EmailProviderReady,
    /// Readiness of the entity on the audience provider.
    AudienceProviderReady,
    Updated,
    Delivered,
    Deleted,
    NewsletterSubscribed,
}

impl ConditionType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::EmailProviderReady => "EmailProviderReady",
            Self::AudienceProviderReady => "AudienceProviderReady",
            Self::Updated => "Updated",
            Self::Delivered => "Delivered",
            Self::Deleted => "Deleted",
            Self::NewsletterSubscribed => "NewsletterSubscribed",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        })
    }
}

/// Machine-readable reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reason {
    Created,
    CreatePending,
    NotCreated,
    Updated,
    UpdatePending,
    UpdateRequested,
    NotUpdated,
    Deleted,
    DeletePending,
    DeliveryPending,
    Delivered,
    DeliveryFailed,
    SendFailed,
    Subscribed,
    SubscriptionFailed,
    ProvidersReady,
    ProvidersNotReady,
    RemovalCompleted,
}

impl Reason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::CreatePending => "CreatePending",
            Self::NotCreated => "NotCreated",
            Self::Updated => "Updated",
            Self::UpdatePending => "UpdatePending",
            Self::UpdateRequested => "UpdateRequested",
            Self::NotUpdated => "NotUpdated",
            Self::Deleted => "Deleted",
            Self::DeletePending => "DeletePending",
            Self::DeliveryPending => "DeliveryPending",
            Self::Delivered => "Delivered",
            Self::DeliveryFailed => "DeliveryFailed",
            Self::SendFailed => "SendFailed",
            Self::Subscribed => "Subscribed",
            Self::SubscriptionFailed => "SubscriptionFailed",
            Self::ProvidersReady => "ProvidersReady",
            Self::ProvidersNotReady => "ProvidersNotReady",
            Self::RemovalCompleted => "RemovalCompleted",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: Reason,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub observed_generation: i64,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: Reason,
        message: impl Into<String>,
        observed_generation: i64,
    ) -> Self {
        Self {
            condition_type,
            status,
            reason,
            message: message.into(),
            observed_generation,
            last_transition_time: Utc::now(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// A condition is current when it was computed for the resource's
    /// present generation.
    pub const fn is_current(&self, generation: i64) -> bool {
        self.observed_generation == generation
    }
}

/// Provider that holds an external entity for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    Resend,
    Loops,
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resend => "Resend",
            Self::Loops => "Loops",
        })
    }
}

/// External identifier held on a secondary provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub provider: ProviderName,
    pub id: String,
}

/// Signal from the Contact reconciler to a dependent ContactGroupMembership.
///
/// Set when the referenced contact's identity changed and the provider-side
/// membership has to be deleted and created again. The membership reconciler
/// clears it once the new membership has been created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecreateRequest {
    pub requested_at: DateTime<Utc>,
    /// Contact generation that triggered the request.
    pub contact_generation: i64,
}

/// Status block owned by the reconcilers and the webhook receiver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Identifier on the email-delivery provider; empty until created.
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<ProviderRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recreate_request: Option<RecreateRequest>,
}

impl Status {
    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    pub fn is_true(&self, condition_type: ConditionType) -> bool {
        self.condition(condition_type).is_some_and(Condition::is_true)
    }

    pub fn has_reason(&self, condition_type: ConditionType, reason: Reason) -> bool {
        self.condition(condition_type)
            .is_some_and(|c| c.reason == reason)
    }

    /// Insert or replace the condition of the same type.
    ///
    /// `last_transition_time` only moves when the status value flips.
    /// Returns `true` when anything other than the timestamp changed.
    pub fn set_condition(&mut self, condition: Condition) -> bool {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => {
                let changed = existing.status != condition.status
                    || existing.reason != condition.reason
                    || existing.message != condition.message
                    || existing.observed_generation != condition.observed_generation;
                if existing.status != condition.status {
                    existing.status = condition.status;
                    existing.last_transition_time = condition.last_transition_time;
                }
                existing.reason = condition.reason;
                existing.message = condition.message;
                existing.observed_generation = condition.observed_generation;
                changed
            }
            None => {
                self.conditions.push(condition);
                true
            }
        }
    }

    pub fn remove_condition(&mut self, condition_type: ConditionType) -> bool {
        let before = self.conditions.len();
        self.conditions
            .retain(|c| c.condition_type != condition_type);
        before != self.conditions.len()
    }

    pub fn provider_record(&self, provider: ProviderName) -> Option<&ProviderRecord> {
        self.providers.iter().find(|p| p.provider == provider)
    }

    pub fn set_provider_record(&mut self, provider: ProviderName, id: impl Into<String>) {
        let id = id.into();
        match self.providers.iter_mut().find(|p| p.provider == provider) {
            Some(record) => record.id = id,
            None => self.providers.push(ProviderRecord { provider, id }),
        }
    }

    pub(crate) fn provider_id_index(&self) -> Vec<String> {
        if self.provider_id.is_empty() {
            Vec::new()
        } else {
            vec![self.provider_id.clone()]
        }
    }
}

/// Compute the user-facing Ready condition from provider sub-conditions.
///
/// Ready is `True` only when every listed sub-condition is `True`. Otherwise
/// it is `False` and the message names each provider that is not ready
/// together with its reason.
pub fn aggregate_readiness(
    status: &Status,
    sub_conditions: &[(ProviderName, ConditionType)],
    generation: i64,
) -> Condition {
    let not_ready: Vec<String> = sub_conditions
        .iter()
        .filter_map(|(provider, condition_type)| match status.condition(*condition_type) {
            Some(c) if c.is_true() => None,
            Some(c) => Some(format!("{provider} not ready: {}", c.reason)),
            None => Some(format!("{provider} not ready: not yet reported")),
        })
        .collect();

    if not_ready.is_empty() {
        Condition::new(
            ConditionType::Ready,
            ConditionStatus::True,
            Reason::ProvidersReady,
            "All providers ready",
            generation,
        )
    } else {
        Condition::new(
            ConditionType::Ready,
            ConditionStatus::False,
            Reason::ProvidersNotReady,
            not_ready.join("; "),
            generation,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cond(status: ConditionStatus, reason: Reason) -> Condition {
        Condition::new(ConditionType::Delivered, status, reason, "", 1)
    }

    #[test]
    fn test_set_condition_keeps_one_per_type() {
        let mut status = Status::default();
        status.set_condition(cond(ConditionStatus::Unknown, Reason::DeliveryPending));
        status.set_condition(cond(ConditionStatus::True, Reason::Delivered));

        assert_eq!(status.conditions.len(), 1);
        assert!(status.is_true(ConditionType::Delivered));
    }

    #[test]
    fn test_unchanged_status_preserves_transition_time() {
        let mut status = Status::default();
        let mut first = cond(ConditionStatus::Unknown, Reason::DeliveryPending);
        first.last_transition_time = Utc::now() - Duration::hours(1);
        let original_time = first.last_transition_time;
        status.set_condition(first);

        let changed = status.set_condition(Condition::new(
            ConditionType::Delivered,
            ConditionStatus::Unknown,
            Reason::DeliveryPending,
            "still pending",
            1,
        ));

        assert!(changed);
        let stored = status.condition(ConditionType::Delivered).unwrap();
        assert_eq!(stored.last_transition_time, original_time);
        assert_eq!(stored.message, "still pending");
    }

    #[test]
    fn test_status_flip_moves_transition_time() {
        let mut status = Status::default();
        let mut first = cond(ConditionStatus::Unknown, Reason::DeliveryPending);
        first.last_transition_time = Utc::now() - Duration::hours(1);
        let original_time = first.last_transition_time;
        status.set_condition(first);

        status.set_condition(cond(ConditionStatus::True, Reason::Delivered));

        let stored = status.condition(ConditionType::Delivered).unwrap();
        assert!(stored.last_transition_time > original_time);
    }

    #[test]
    fn test_identical_condition_reports_no_change() {
        let mut status = Status::default();
        status.set_condition(cond(ConditionStatus::True, Reason::Delivered));
        assert!(!status.set_condition(cond(ConditionStatus::True, Reason::Delivered)));
    }

    const PROVIDERS: [(ProviderName, ConditionType); 2] = [
        (ProviderName::Resend, ConditionType::EmailProviderReady),
        (ProviderName::Loops, ConditionType::AudienceProviderReady),
    ];

    fn with_subconditions(resend: ConditionStatus, loops: ConditionStatus) -> Status {
        let mut status = Status::default();
        status.set_condition(Condition::new(
            ConditionType::EmailProviderReady,
            resend,
            if resend == ConditionStatus::True { Reason::Created } else { Reason::NotCreated },
            "",
            1,
        ));
        status.set_condition(Condition::new(
            ConditionType::AudienceProviderReady,
            loops,
            if loops == ConditionStatus::True { Reason::Created } else { Reason::NotCreated },
            "",
            1,
        ));
        status
    }

    #[test]
    fn test_aggregated_ready_requires_every_provider() {
        use ConditionStatus::{False, True};

        let ready = aggregate_readiness(&with_subconditions(True, True), &PROVIDERS, 1);
        assert_eq!(ready.status, True);
        assert_eq!(ready.reason, Reason::ProvidersReady);

        let only_loops = aggregate_readiness(&with_subconditions(False, True), &PROVIDERS, 1);
        assert_eq!(only_loops.status, False);
        assert!(only_loops.message.contains("Resend not ready: NotCreated"));
        assert!(!only_loops.message.contains("Loops"));

        let only_resend = aggregate_readiness(&with_subconditions(True, False), &PROVIDERS, 1);
        assert_eq!(only_resend.status, False);
        assert!(only_resend.message.contains("Loops not ready: NotCreated"));

        let neither = aggregate_readiness(&with_subconditions(False, False), &PROVIDERS, 1);
        assert_eq!(neither.status, False);
        assert!(neither.message.contains("Resend not ready"));
        assert!(neither.message.contains("Loops not ready"));
    }

    #[test]
    fn test_aggregated_ready_names_unreported_provider() {
        let status = Status::default();
        let ready = aggregate_readiness(&status, &PROVIDERS[..1], 3);
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.message, "Resend not ready: not yet reported");
        assert_eq!(ready.observed_generation, 3);
    }
}
