//! Consent stamping.
//!
//! The record of consent is built from what the server observed, never from
//! what the client claims: the timestamp is the server clock at request
//! entry, the address and user agent come from the connection. A
//! client-reported consent time is forwarded only to its own informative
//! field.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use upstream::{AttributeValue, FieldBinding, OutboundAttribute, RecordDraft, ResolvedSchema};

use crate::RequestContext;

pub const CONSENT_AT: &str = "consent_at";
pub const CONSENT_IP: &str = "consent_ip";
pub const CONSENT_UA: &str = "consent_ua";
pub const CONSENT_POLICY_VERSION: &str = "consent_policy_version";
pub const CONSENT_CLIENT_AT: &str = "consent_client_at";
pub const CONSENT_FORM_ID: &str = "form_id";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentConfig {
    /// Privacy policy version in force; stamped on every record.
    pub policy_version: String,
    /// When set, the stamped address is `sha256("{ip}:{salt}")` in hex.
    pub pii_salt: Option<String>,
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            policy_version: "v1".into(),
            pii_salt: None,
        }
    }
}

/// Server-authoritative consent metadata for one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsentRecord {
    pub timestamp: DateTime<Utc>,
    pub client_address: String,
    pub user_agent: String,
    pub policy_version: String,
    pub form_id: String,
}

impl ConsentRecord {
    pub fn observe(ctx: &RequestContext, form_id: &str, cfg: &ConsentConfig) -> Self {
        let client_address = match cfg.pii_salt.as_deref() {
            Some(salt) => hash_address(&ctx.client_address, salt),
            None => ctx.client_address.clone(),
        };
        Self {
            timestamp: ctx.received_at,
            client_address,
            user_agent: ctx.user_agent.clone(),
            policy_version: cfg.policy_version.clone(),
            form_id: form_id.to_string(),
        }
    }

    /// ISO-8601 UTC with millisecond precision, e.g. `2026-10-19T12:00:00.000Z`.
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Append the consent attributes whose fields exist upstream.
    ///
    /// Returns the logical keys that were attached.
    pub fn stamp(
        &self,
        client_reported_at: Option<&str>,
        schema: &ResolvedSchema,
        draft: &mut RecordDraft,
    ) -> Vec<&'static str> {
        let values = [
            (CONSENT_AT, Some(self.timestamp_iso())),
            (CONSENT_IP, Some(self.client_address.clone())),
            (CONSENT_UA, Some(self.user_agent.clone())),
            (CONSENT_POLICY_VERSION, Some(self.policy_version.clone())),
            (CONSENT_FORM_ID, Some(self.form_id.clone())),
            (CONSENT_CLIENT_AT, client_reported_at.map(str::to_string)),
        ];

        let mut attached = Vec::new();
        for (key, value) in values {
            let (Some(value), Some(meta)) = (value, schema.get(key)) else {
                continue;
            };
            draft.push(OutboundAttribute::for_field(
                key,
                meta,
                AttributeValue::Text(value),
            ));
            attached.push(key);
        }
        attached
    }
}

/// A consent field as it should exist on the upstream form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsentField {
    pub key: &'static str,
    pub label: &'static str,
    pub field_type: &'static str,
    pub description: &'static str,
}

pub const CONSENT_FIELDS: [ConsentField; 6] = [
    ConsentField {
        key: CONSENT_AT,
        label: "Consent TS",
        field_type: "datetime",
        description: "Consent timestamp (server).",
    },
    ConsentField {
        key: CONSENT_IP,
        label: "Consent IP",
        field_type: "short_text",
        description: "Client address, possibly hashed.",
    },
    ConsentField {
        key: CONSENT_UA,
        label: "Consent UA",
        field_type: "long_text",
        description: "Browser user agent.",
    },
    ConsentField {
        key: CONSENT_POLICY_VERSION,
        label: "Consent Policy Version",
        field_type: "short_text",
        description: "Privacy policy version.",
    },
    ConsentField {
        key: CONSENT_CLIENT_AT,
        label: "Consent Client TS",
        field_type: "datetime",
        description: "Client-reported timestamp, informative only.",
    },
    ConsentField {
        key: CONSENT_FORM_ID,
        label: "Form ID",
        field_type: "short_text",
        description: "Logical origin of the submission.",
    },
];

/// Optional bindings for the consent fields, located by label.
pub fn consent_bindings() -> Vec<FieldBinding> {
    CONSENT_FIELDS
        .iter()
        .map(|field| FieldBinding::new(field.key).with_labels([field.label]))
        .collect()
}

/// Salted SHA-256 of a client address, hex encoded.
pub fn hash_address(address: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(address.as_bytes());
    hasher.update(b":");
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use upstream::{resolve_bindings, FieldMeta};

    fn ctx() -> RequestContext {
        RequestContext {
            correlation_id: "c-1".into(),
            client_address: "203.0.113.7".into(),
            user_agent: "Mozilla/5.0".into(),
            received_at: Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn uses_server_observed_values() {
        let record = ConsentRecord::observe(&ctx(), "form", &ConsentConfig::default());
        assert_eq!(record.timestamp_iso(), "2026-10-19T12:00:00.000Z");
        assert_eq!(record.client_address, "203.0.113.7");
        assert_eq!(record.policy_version, "v1");
    }

    #[test]
    fn salted_address_is_hashed() {
        let cfg = ConsentConfig {
            pii_salt: Some("pepper".into()),
            ..Default::default()
        };
        let record = ConsentRecord::observe(&ctx(), "form", &cfg);
        assert_eq!(record.client_address.len(), 64);
        assert_eq!(record.client_address, hash_address("203.0.113.7", "pepper"));
        assert_ne!(record.client_address, hash_address("203.0.113.7", "salt"));
    }

    #[test]
    fn stamps_only_resolved_fields() {
        let catalog = vec![
            FieldMeta::new("consent_ts", "datetime").with_label("Consent TS"),
            FieldMeta::new("consent_ua", "long_text").with_label("Consent UA"),
            FieldMeta::new("consent_client", "datetime").with_label("Consent Client TS"),
        ];
        let schema = resolve_bindings(catalog, &consent_bindings()).unwrap();
        let record = ConsentRecord::observe(&ctx(), "form", &ConsentConfig::default());

        let mut draft = RecordDraft::new("42", "t");
        let attached = record.stamp(None, &schema, &mut draft);
        assert_eq!(attached, vec![CONSENT_AT, CONSENT_UA]);
        assert_eq!(draft.attributes[0].primary_id, "consent_ts");
        assert_eq!(
            draft.attributes[0].value,
            AttributeValue::Text("2026-10-19T12:00:00.000Z".into())
        );

        let mut draft = RecordDraft::new("42", "t");
        let attached = record.stamp(Some("1999-01-01T00:00:00Z"), &schema, &mut draft);
        assert!(attached.contains(&CONSENT_CLIENT_AT));
        let client = draft.attribute(CONSENT_CLIENT_AT).unwrap();
        assert_eq!(client.value.as_text(), Some("1999-01-01T00:00:00Z"));
        let server = draft.attribute(CONSENT_AT).unwrap();
        assert_eq!(server.value.as_text(), Some("2026-10-19T12:00:00.000Z"));
    }
}
