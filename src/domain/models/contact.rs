//! Contacts, contact groups, memberships and membership removals.

use serde::{Deserialize, Serialize};

use super::index::{pair_key, ref_key, IndexField};
use super::resource::{Object, ObjectKey, ObjectRef, ResourceKind, Spec};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSpec {
    pub email: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
    /// Optional link to the [`User`](super::User) this contact represents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_ref: Option<ObjectRef>,
}

impl Spec for ContactSpec {
    const KIND: ResourceKind = ResourceKind::Contact;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactGroupSpec {
    /// Human-readable name. Not synced to the provider, which only ever
    /// sees the group's UID.
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Spec for ContactGroupSpec {
    const KIND: ResourceKind = ResourceKind::ContactGroup;
}

/// Places one contact into one contact group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactGroupMembershipSpec {
    pub contact_ref: ObjectRef,
    pub contact_group_ref: ObjectRef,
}

impl Spec for ContactGroupMembershipSpec {
    const KIND: ResourceKind = ResourceKind::ContactGroupMembership;

    fn index_values(object: &Object<Self>, field: IndexField) -> Vec<String> {
        reference_index_values(
            object,
            field,
            &object.spec.contact_ref,
            &object.spec.contact_group_ref,
        )
    }
}

/// Request to remove a contact from a group without owning the membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactGroupMembershipRemovalSpec {
    pub contact_ref: ObjectRef,
    pub contact_group_ref: ObjectRef,
}

impl Spec for ContactGroupMembershipRemovalSpec {
    const KIND: ResourceKind = ResourceKind::ContactGroupMembershipRemoval;

    fn index_values(object: &Object<Self>, field: IndexField) -> Vec<String> {
        reference_index_values(
            object,
            field,
            &object.spec.contact_ref,
            &object.spec.contact_group_ref,
        )
    }
}

fn reference_index_values<S: Spec>(
    object: &Object<S>,
    field: IndexField,
    contact_ref: &ObjectRef,
    group_ref: &ObjectRef,
) -> Vec<String> {
    let namespace = &object.metadata.namespace;
    match field {
        IndexField::ProviderId => object.status.provider_id_index(),
        IndexField::ContactRef => vec![ref_key(&contact_ref.resolve(namespace))],
        IndexField::ContactGroupRef => vec![ref_key(&group_ref.resolve(namespace))],
        IndexField::ContactAndGroupRef => vec![pair_key(
            &contact_ref.resolve(namespace),
            &group_ref.resolve(namespace),
        )],
    }
}

pub type Contact = Object<ContactSpec>;
pub type ContactGroup = Object<ContactGroupSpec>;
pub type ContactGroupMembership = Object<ContactGroupMembershipSpec>;
pub type ContactGroupMembershipRemoval = Object<ContactGroupMembershipRemovalSpec>;

impl ContactGroupMembership {
    pub fn contact_key(&self) -> ObjectKey {
        self.spec.contact_ref.resolve(&self.metadata.namespace)
    }

    pub fn group_key(&self) -> ObjectKey {
        self.spec.contact_group_ref.resolve(&self.metadata.namespace)
    }
}

impl ContactGroupMembershipRemoval {
    pub fn contact_key(&self) -> ObjectKey {
        self.spec.contact_ref.resolve(&self.metadata.namespace)
    }

    pub fn group_key(&self) -> ObjectKey {
        self.spec.contact_group_ref.resolve(&self.metadata.namespace)
    }
}
