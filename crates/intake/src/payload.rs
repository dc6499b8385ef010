use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A submitted answer: one string or an ordered list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    /// Values as a slice-like vector, preserving submission order.
    pub fn values(&self) -> Vec<&str> {
        match self {
            FieldValue::Text(text) => vec![text.as_str()],
            FieldValue::List(items) => items.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Text(text) => text.trim().is_empty(),
            FieldValue::List(items) => items.iter().all(|item| item.trim().is_empty()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::List(value)
    }
}

/// A whitelisted, validated submission.
///
/// Only constructed by [`validate`](crate::validate); every key that was not
/// declared for the route has already been discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormPayload {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: Option<String>,
    /// Client-reported policy version. Informative; the server stamps its own.
    pub policy_version: Option<String>,
    /// Client-reported consent time. Informative, never the attribute of record.
    pub client_consent_at: Option<String>,
    /// Route-declared extra answers, keyed by logical field key.
    pub answers: BTreeMap<String, FieldValue>,
}

impl FormPayload {
    pub fn answer(&self, key: &str) -> Option<&FieldValue> {
        self.answers.get(key)
    }

    /// Title-friendly display name, falling back to the e-mail.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.email
        } else {
            &self.name
        }
    }
}
