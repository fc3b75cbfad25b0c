//! Field indexes maintained by the store.

use super::resource::ObjectKey;

/// Indexed fields. Each [`Spec`](super::Spec) implementation decides which of
/// these it publishes values for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexField {
    /// `status.provider_id`, the correlation index for webhook events.
    ProviderId,
    /// Referenced contact, keyed by [`ref_key`].
    ContactRef,
    /// Referenced contact group, keyed by [`ref_key`].
    ContactGroupRef,
    /// Referenced `(contact, group)` pair, keyed by [`pair_key`].
    ContactAndGroupRef,
}

impl IndexField {
    pub const ALL: [Self; 4] = [
        Self::ProviderId,
        Self::ContactRef,
        Self::ContactGroupRef,
        Self::ContactAndGroupRef,
    ];
}

/// Composite key for a single reference: `namespace|name`.
pub fn ref_key(key: &ObjectKey) -> String {
    format!("{}|{}", key.namespace, key.name)
}

/// Composite key for a `(contact, group)` pair:
/// `contact_ns|contact_name|group_ns|group_name`.
pub fn pair_key(contact: &ObjectKey, group: &ObjectKey) -> String {
    format!(
        "{}|{}|{}|{}",
        contact.namespace, contact.name, group.namespace, group.name
    )
}
