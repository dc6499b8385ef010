//! Error surface for payload intake.
//!
//! | Error | HTTP |
//! |-------|------|
//! | [`PayloadTooLarge`](IntakeError::PayloadTooLarge) | 413 |
//! | [`MalformedJson`](IntakeError::MalformedJson) | 400 |
//! | [`Validation`](IntakeError::Validation) | 422 |

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Errors raised while turning a raw body into a [`FormPayload`](crate::FormPayload).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IntakeError {
    /// Declared or actual body size exceeds the configured budget.
    #[error("payload too large: {actual} bytes exceeds limit of {limit}")]
    PayloadTooLarge { actual: usize, limit: usize },

    /// Body is not a JSON object.
    #[error("invalid JSON: {0}")]
    MalformedJson(String),

    /// One or more fields failed validation.
    #[error("validation failed for {}", .0)]
    Validation(FieldErrors),
}

/// One structured error per invalid field, keyed by payload field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.0.insert(field.into(), reason.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<&str> = self.fields().collect();
        write!(f, "{}", fields.join(", "))
    }
}

impl FromIterator<(String, String)> for FieldErrors {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
