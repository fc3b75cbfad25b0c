//! Loops contacts API payloads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::ports::AudienceContact;

/// Body for create and update calls. Empty fields are omitted so a
/// mailing-list-only update leaves the profile untouched.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPayload<'a> {
    #[serde(skip_serializing_if = "str::is_empty")]
    pub email: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub first_name: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub last_name: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub source: &'a str,
    pub subscribed: bool,
    pub user_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mailing_lists: Option<&'a BTreeMap<String, bool>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePayload<'a> {
    pub user_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoopsContact {
    pub id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub user_id: Option<String>,
    pub mailing_lists: BTreeMap<String, bool>,
}

impl From<LoopsContact> for AudienceContact {
    fn from(contact: LoopsContact) -> Self {
        Self {
            id: contact.id,
            email: contact.email,
            user_id: contact.user_id.unwrap_or_default(),
            first_name: contact.first_name.unwrap_or_default(),
            last_name: contact.last_name.unwrap_or_default(),
            mailing_lists: contact.mailing_lists,
        }
    }
}

/// Update responses come back either as a single contact or as a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UpdateResponse {
    Many(Vec<LoopsContact>),
    One(LoopsContact),
}

impl UpdateResponse {
    pub fn into_first(self) -> Option<LoopsContact> {
        match self {
            Self::Many(contacts) => contacts.into_iter().next(),
            Self::One(contact) => Some(contact),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_response_accepts_both_shapes() {
        let many: UpdateResponse =
            serde_json::from_str(r#"[{"id":"c1","email":"a@example.com","userId":"u1"}]"#).unwrap();
        let one: UpdateResponse =
            serde_json::from_str(r#"{"id":"c2","email":"b@example.com","userId":"u2"}"#).unwrap();

        assert_eq!(many.into_first().unwrap().id, "c1");
        assert_eq!(one.into_first().unwrap().user_id.as_deref(), Some("u2"));
    }

    #[test]
    fn test_mailing_list_only_payload_omits_profile() {
        let lists = BTreeMap::from([("list-1".to_string(), true)]);
        let payload = ContactPayload {
            email: "",
            first_name: "",
            last_name: "",
            source: "",
            subscribed: true,
            user_id: "uid-1",
            mailing_lists: Some(&lists),
        };
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "subscribed": true,
                "userId": "uid-1",
                "mailingLists": {"list-1": true}
            })
        );
    }
}
