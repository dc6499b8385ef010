use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{IntakeConfig, IntakeProfile};
use crate::error::{FieldErrors, IntakeError};
use crate::payload::{FieldValue, FormPayload};

pub const FIELD_NAME: &str = "name";
pub const FIELD_EMAIL: &str = "email";
pub const FIELD_PHONE: &str = "phone";
pub const FIELD_MESSAGE: &str = "message";
pub const FIELD_CONSENT: &str = "consent";
pub const FIELD_POLICY_VERSION: &str = "policyVersion";
pub const FIELD_CLIENT_CONSENT_AT: &str = "consentClientTs";

/// Keys every route accepts, besides the honeypot and the route's answers.
pub const CORE_FIELDS: [&str; 7] = [
    FIELD_NAME,
    FIELD_EMAIL,
    FIELD_PHONE,
    FIELD_MESSAGE,
    FIELD_CONSENT,
    FIELD_POLICY_VERSION,
    FIELD_CLIENT_CONSENT_AT,
];

const MAX_EMAIL_LOCAL_CHARS: usize = 64;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+)*@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*\.[A-Za-z]{2,63}$",
    )
    .expect("email pattern is valid")
});

static E164_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[1-9]\d{1,14}$").expect("E.164 pattern is valid"));

/// Reject a body whose declared or actual length exceeds the budget.
///
/// `declared` is the `Content-Length` header when the client sent one; a
/// missing or unparsable header is not an error on its own.
pub fn check_body_size(declared: Option<usize>, cfg: &IntakeConfig) -> Result<(), IntakeError> {
    match declared {
        Some(actual) if actual > cfg.max_body_bytes => Err(IntakeError::PayloadTooLarge {
            actual,
            limit: cfg.max_body_bytes,
        }),
        _ => Ok(()),
    }
}

/// Parse a raw body into a JSON object. An empty body is an empty object.
pub fn parse_body(bytes: &[u8]) -> Result<Map<String, Value>, IntakeError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(IntakeError::MalformedJson(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(err) => Err(IntakeError::MalformedJson(err.to_string())),
    }
}

/// Whether the decoy field carries anything at all.
pub fn honeypot_tripped(raw: &Map<String, Value>, cfg: &IntakeConfig) -> bool {
    match raw.get(&cfg.honeypot_field) {
        None | Some(Value::Null) => false,
        Some(Value::String(text)) => !text.trim().is_empty(),
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Number(_)) => true,
    }
}

/// Whitelist, type-check and length-check a parsed body for one route.
///
/// Unknown keys are dropped silently. Every invalid field contributes one
/// entry to the returned [`FieldErrors`].
pub fn validate(
    mut raw: Map<String, Value>,
    profile: &IntakeProfile,
    cfg: &IntakeConfig,
) -> Result<FormPayload, IntakeError> {
    let mut errors = FieldErrors::new();

    let name = take_text(&mut raw, FIELD_NAME, &mut errors);
    match name.as_deref() {
        Some(name) if !name.is_empty() && name.chars().count() <= cfg.max_name_chars => {}
        _ if errors.contains(FIELD_NAME) => {}
        _ => errors.insert(
            FIELD_NAME,
            format!("Name is required (max {} characters).", cfg.max_name_chars),
        ),
    }

    let email = take_text(&mut raw, FIELD_EMAIL, &mut errors);
    match email.as_deref() {
        Some(email) if is_valid_email(email, cfg.max_email_chars) => {}
        _ if errors.contains(FIELD_EMAIL) => {}
        _ => errors.insert(FIELD_EMAIL, "Invalid email."),
    }

    let phone = take_text(&mut raw, FIELD_PHONE, &mut errors).filter(|p| !p.is_empty());
    if let Some(phone) = phone.as_deref() {
        if !E164_RE.is_match(phone) {
            errors.insert(
                FIELD_PHONE,
                "Phone must be in E.164 format (e.g. +5511999999999).",
            );
        }
    }

    let message = take_text(&mut raw, FIELD_MESSAGE, &mut errors).filter(|m| !m.is_empty());
    match message.as_deref() {
        Some(message) if message.chars().count() > cfg.max_message_chars => errors.insert(
            FIELD_MESSAGE,
            format!("Message too long (max {} characters).", cfg.max_message_chars),
        ),
        None if profile.require_message && !errors.contains(FIELD_MESSAGE) => {
            errors.insert(FIELD_MESSAGE, "Message is required.")
        }
        _ => {}
    }

    if raw.remove(FIELD_CONSENT) != Some(Value::Bool(true)) {
        errors.insert(FIELD_CONSENT, "Consent is required.");
    }

    let policy_version =
        take_text(&mut raw, FIELD_POLICY_VERSION, &mut errors).filter(|v| !v.is_empty());
    if let Some(version) = policy_version.as_deref() {
        if version.chars().count() > cfg.max_policy_version_chars {
            errors.insert(FIELD_POLICY_VERSION, "policyVersion too long.");
        }
    }

    let client_consent_at =
        take_text(&mut raw, FIELD_CLIENT_CONSENT_AT, &mut errors).filter(|v| !v.is_empty());

    let mut answers = BTreeMap::new();
    for key in &profile.answer_fields {
        if CORE_FIELDS.contains(&key.as_str()) || *key == cfg.honeypot_field {
            continue;
        }
        let Some(value) = raw.remove(key) else {
            continue;
        };
        match coerce_answer(value, cfg) {
            Ok(Some(answer)) => {
                answers.insert(key.clone(), answer);
            }
            Ok(None) => {}
            Err(reason) => errors.insert(key.clone(), reason),
        }
    }

    for key in &profile.required_answers {
        if profile.answer_fields.contains(key)
            && !answers.contains_key(key)
            && !errors.contains(key)
        {
            errors.insert(key.clone(), "This field is required.");
        }
    }

    raw.remove(&cfg.honeypot_field);
    if !raw.is_empty() {
        debug!(
            route = %profile.name,
            dropped = ?raw.keys().collect::<Vec<_>>(),
            "non-whitelisted keys discarded"
        );
    }

    if !errors.is_empty() {
        return Err(IntakeError::Validation(errors));
    }

    Ok(FormPayload {
        name: name.unwrap_or_default(),
        email: email.unwrap_or_default(),
        phone,
        message,
        policy_version,
        client_consent_at,
        answers,
    })
}

/// RFC-shaped address check with the usual length ceilings.
pub fn is_valid_email(email: &str, max_chars: usize) -> bool {
    if email.is_empty() || email.chars().count() > max_chars {
        return false;
    }
    match email.split_once('@') {
        Some((local, _)) if local.len() <= MAX_EMAIL_LOCAL_CHARS => EMAIL_RE.is_match(email),
        _ => false,
    }
}

fn take_text(
    raw: &mut Map<String, Value>,
    key: &'static str,
    errors: &mut FieldErrors,
) -> Option<String> {
    match raw.remove(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.trim().to_string()),
        Some(other) => {
            errors.insert(key, format!("Expected a string, got {}.", json_kind(&other)));
            None
        }
    }
}

fn coerce_answer(value: Value, cfg: &IntakeConfig) -> Result<Option<FieldValue>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() {
                Ok(None)
            } else if text.chars().count() > cfg.max_answer_chars {
                Err(format!("Value too long (max {} characters).", cfg.max_answer_chars))
            } else {
                Ok(Some(FieldValue::Text(text.to_string())))
            }
        }
        Value::Array(items) => {
            if items.len() > cfg.max_answer_items {
                return Err(format!("Too many values (max {}).", cfg.max_answer_items));
            }
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                let Value::String(text) = item else {
                    return Err("Expected a list of strings.".into());
                };
                let text = text.trim();
                if text.chars().count() > cfg.max_answer_chars {
                    return Err(format!(
                        "Value too long (max {} characters).",
                        cfg.max_answer_chars
                    ));
                }
                if !text.is_empty() {
                    values.push(text.to_string());
                }
            }
            if values.is_empty() {
                Ok(None)
            } else {
                Ok(Some(FieldValue::List(values)))
            }
        }
        other => Err(format!(
            "Expected a string or a list of strings, got {}.",
            json_kind(&other)
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
