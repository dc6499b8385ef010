//! Limits and route profiles that drive payload intake.
//!
//! [`IntakeConfig`] holds the limits shared by every route; [`IntakeProfile`]
//! describes what a single submission route accepts on top of the core
//! contact fields. Both are plain serde types so they can be embedded in the
//! server configuration file.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Byte and length limits applied to every submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Largest accepted body, checked before parsing.
    pub max_body_bytes: usize,
    /// Name of the decoy field legitimate clients never fill.
    pub honeypot_field: String,
    pub max_name_chars: usize,
    pub max_email_chars: usize,
    pub max_message_chars: usize,
    pub max_policy_version_chars: usize,
    /// Per-value limit for route-declared answer fields.
    pub max_answer_chars: usize,
    /// Maximum number of items in a multi-valued answer.
    pub max_answer_items: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 100 * 1024,
            honeypot_field: "hp".into(),
            max_name_chars: 100,
            max_email_chars: 254,
            max_message_chars: 5000,
            max_policy_version_chars: 20,
            max_answer_chars: 1000,
            max_answer_items: 50,
        }
    }
}

impl IntakeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_body_bytes == 0 {
            return Err(ConfigError::InvalidLimit("max_body_bytes"));
        }
        if self.honeypot_field.trim().is_empty() {
            return Err(ConfigError::EmptyHoneypot);
        }
        if self.max_name_chars == 0 || self.max_email_chars == 0 {
            return Err(ConfigError::InvalidLimit("max_name_chars/max_email_chars"));
        }
        Ok(())
    }
}

/// What one submission route accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeProfile {
    /// Route name, also part of the rate-limit key.
    pub name: String,
    /// Whether `message` must be present and non-empty.
    #[serde(default)]
    pub require_message: bool,
    /// Extra payload keys this route whitelists.
    #[serde(default)]
    pub answer_fields: Vec<String>,
    /// Answer fields that must carry a non-blank value.
    #[serde(default)]
    pub required_answers: Vec<String>,
}

impl IntakeProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            require_message: false,
            answer_fields: Vec::new(),
            required_answers: Vec::new(),
        }
    }

    pub fn with_required_message(mut self, required: bool) -> Self {
        self.require_message = required;
        self
    }

    pub fn with_answer_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.answer_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_required_answers<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_answers = fields.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("intake limit `{0}` must be greater than zero")]
    InvalidLimit(&'static str),
    #[error("honeypot field name must not be empty")]
    EmptyHoneypot,
}
