//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that adapters must implement:
//! - ResourceStore: declarative object store with indexes and watch
//! - EmailProvider: email-delivery provider (sends, audiences, contacts)
//! - AudienceProvider: secondary contact/audience provider
//! - EventRecorder: observability sink
//!
//! These traits keep reconcilers and the webhook independent of concrete
//! providers and storage.

pub mod audience_provider;
pub mod email_provider;
pub mod event_recorder;
pub mod resource_store;

pub use audience_provider::{AudienceContact, AudienceContactInput, AudienceProvider};
pub use email_provider::{
    ContactGroupOutput, ContactInput, ContactOutput, CreateContactGroupInput,
    CreateContactGroupMembershipInput, DeleteOutput, EmailProvider, SendEmailInput,
    SendEmailOutput,
};
pub use event_recorder::EventRecorder;
pub use resource_store::{ResourceStore, WatchChange, WatchEvent};
