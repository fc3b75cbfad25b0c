pub mod condition;
pub mod config;
pub mod contact;
pub mod email;
pub mod event;
pub mod index;
pub mod resource;

pub use condition::{
    aggregate_readiness, Condition, ConditionStatus, ConditionType, ProviderName, ProviderRecord,
    Reason, RecreateRequest, Status,
};
pub use config::{
    AudienceProviderConfig, Config, ControllerConfig, EmailConfig, EmailProviderConfig,
    LoggingConfig, WebhookConfig,
};
pub use contact::{
    Contact, ContactGroup, ContactGroupMembership, ContactGroupMembershipRemoval,
    ContactGroupMembershipRemovalSpec, ContactGroupMembershipSpec, ContactGroupSpec, ContactSpec,
};
pub use email::{
    Email, EmailPriority, EmailRecipient, EmailSpec, EmailTemplate, EmailTemplateSpec,
    EmailVariable, TemplateVariable, User, UserSpec,
};
pub use event::{ObservedEvent, Severity, Subject};
pub use index::{pair_key, ref_key, IndexField};
pub use resource::{Object, ObjectKey, ObjectMeta, ObjectRef, ResourceKind, Spec};
