//! Form intake
//!
//! This is where a website submission enters the gateway. We take the raw
//! body bytes, make sure they fit the byte budget, parse them, check the
//! honeypot, and turn the loosely-typed JSON into a [`FormPayload`] that the
//! rest of the pipeline can trust.
//!
//! ## What we do here
//!
//! - **Budget** - bodies over [`IntakeConfig::max_body_bytes`] are refused
//!   before any parsing happens.
//! - **Whitelist** - only the core contact keys and the route's declared
//!   answer keys survive. Everything else is dropped without comment.
//! - **Validate** - name, e-mail, E.164 phone, message length, and an explicit
//!   `consent: true`. Consent is never defaulted.
//! - **Honeypot** - [`honeypot_tripped`] tells the caller whether the decoy
//!   field was filled, so it can answer with success semantics and stop.
//!
//! ## Example
//!
//! ```
//! use intake::{parse_body, validate, IntakeConfig, IntakeProfile};
//!
//! let cfg = IntakeConfig::default();
//! let profile = IntakeProfile::new("contact").with_required_message(true);
//! let raw = parse_body(br#"{
//!     "name": "Ana", "email": "ana@example.com", "phone": "+5511999999999",
//!     "message": "Olá", "consent": true, "isAdmin": true
//! }"#).unwrap();
//!
//! let payload = validate(raw, &profile, &cfg).unwrap();
//! assert_eq!(payload.name, "Ana");
//! assert!(payload.answers.is_empty());
//! ```

mod config;
mod error;
mod payload;
mod validate;

pub use crate::config::{ConfigError, IntakeConfig, IntakeProfile};
pub use crate::error::{FieldErrors, IntakeError};
pub use crate::payload::{FieldValue, FormPayload};
pub use crate::validate::{
    check_body_size, honeypot_tripped, is_valid_email, parse_body, validate, CORE_FIELDS,
    FIELD_CLIENT_CONSENT_AT, FIELD_CONSENT, FIELD_EMAIL, FIELD_MESSAGE, FIELD_NAME, FIELD_PHONE,
    FIELD_POLICY_VERSION,
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("test body must be an object"),
        }
    }

    fn complete() -> serde_json::Value {
        json!({
            "name": "Ana",
            "email": "ana@example.com",
            "phone": "+5511999999999",
            "message": "Olá",
            "consent": true,
        })
    }

    fn questionnaire() -> IntakeProfile {
        IntakeProfile::new("form").with_answer_fields(["objectives", "horizon"])
    }

    #[test]
    fn accepts_complete_payload() {
        let payload = validate(body(complete()), &questionnaire(), &IntakeConfig::default())
            .expect("complete payload is valid");
        assert_eq!(payload.email, "ana@example.com");
        assert_eq!(payload.phone.as_deref(), Some("+5511999999999"));
        assert_eq!(payload.message.as_deref(), Some("Olá"));
    }

    #[test]
    fn drops_undeclared_keys() {
        let mut raw = complete();
        raw["pipe_id"] = json!(42);
        raw["objectives"] = json!(["Growth"]);
        raw["title"] = json!("injected");
        let payload = validate(body(raw), &questionnaire(), &IntakeConfig::default()).unwrap();
        assert_eq!(payload.answers.len(), 1);
        assert_eq!(
            payload.answer("objectives"),
            Some(&FieldValue::List(vec!["Growth".into()]))
        );
    }

    #[test]
    fn missing_consent_is_always_a_failure() {
        for consent in [json!(false), json!("true"), json!(1), serde_json::Value::Null] {
            let mut raw = complete();
            raw["consent"] = consent;
            let err = validate(body(raw), &questionnaire(), &IntakeConfig::default()).unwrap_err();
            match err {
                IntakeError::Validation(errors) => {
                    assert!(errors.contains(FIELD_CONSENT));
                    assert_eq!(errors.len(), 1);
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        let mut raw = body(complete());
        raw.remove("consent");
        let err = validate(raw, &questionnaire(), &IntakeConfig::default()).unwrap_err();
        assert!(matches!(err, IntakeError::Validation(e) if e.contains(FIELD_CONSENT)));
    }

    #[test]
    fn reports_one_error_per_invalid_field() {
        let raw = json!({
            "name": "x".repeat(101),
            "email": "not-an-email",
            "phone": "11 9999-9999",
            "consent": false,
        });
        let err = validate(body(raw), &questionnaire(), &IntakeConfig::default()).unwrap_err();
        let IntakeError::Validation(errors) = err else {
            panic!("expected validation failure");
        };
        let fields: Vec<&str> = errors.fields().collect();
        assert_eq!(fields, vec!["consent", "email", "name", "phone"]);
    }

    #[test]
    fn message_required_only_when_route_demands_it() {
        let mut raw = body(complete());
        raw.remove("message");
        assert!(validate(raw.clone(), &questionnaire(), &IntakeConfig::default()).is_ok());

        let contact = IntakeProfile::new("contact").with_required_message(true);
        let err = validate(raw, &contact, &IntakeConfig::default()).unwrap_err();
        assert!(matches!(err, IntakeError::Validation(e) if e.contains(FIELD_MESSAGE)));
    }

    #[test]
    fn required_answers_must_be_present() {
        let request = IntakeProfile::new("lgpd")
            .with_answer_fields(["request_type"])
            .with_required_answers(["request_type"]);

        let err = validate(body(complete()), &request, &IntakeConfig::default()).unwrap_err();
        assert!(matches!(err, IntakeError::Validation(e) if e.contains("request_type")));

        let mut raw = complete();
        raw["request_type"] = json!("   ");
        assert!(validate(body(raw), &request, &IntakeConfig::default()).is_err());

        let mut raw = complete();
        raw["request_type"] = json!("exclusao");
        let payload = validate(body(raw), &request, &IntakeConfig::default()).unwrap();
        assert_eq!(payload.answer("request_type"), Some(&FieldValue::from("exclusao")));
    }

    #[test]
    fn message_length_is_bounded() {
        let mut raw = complete();
        raw["message"] = json!("a".repeat(5001));
        let err = validate(body(raw), &questionnaire(), &IntakeConfig::default()).unwrap_err();
        assert!(matches!(err, IntakeError::Validation(e) if e.contains(FIELD_MESSAGE)));
    }

    #[test]
    fn non_string_fields_are_type_errors() {
        let mut raw = complete();
        raw["name"] = json!({"first": "Ana"});
        raw["objectives"] = json!([1, 2]);
        let err = validate(body(raw), &questionnaire(), &IntakeConfig::default()).unwrap_err();
        let IntakeError::Validation(errors) = err else {
            panic!("expected validation failure");
        };
        assert!(errors.get(FIELD_NAME).unwrap().contains("object"));
        assert!(errors.contains("objectives"));
    }

    #[test]
    fn email_shapes() {
        assert!(is_valid_email("ana@example.com", 254));
        assert!(is_valid_email("first.last+tag@mail.example.com.br", 254));
        assert!(!is_valid_email("ana@localhost", 254));
        assert!(!is_valid_email("ana..b@example.com", 254));
        assert!(!is_valid_email("@example.com", 254));
        let long = format!("{}@example.com", "a".repeat(250));
        assert!(!is_valid_email(&long, 254));
    }

    #[test]
    fn body_budget_uses_declared_length() {
        let cfg = IntakeConfig {
            max_body_bytes: 10,
            ..Default::default()
        };
        assert!(check_body_size(Some(10), &cfg).is_ok());
        assert!(check_body_size(None, &cfg).is_ok());
        assert_eq!(
            check_body_size(Some(11), &cfg),
            Err(IntakeError::PayloadTooLarge {
                actual: 11,
                limit: 10
            })
        );
    }

    #[test]
    fn parse_rejects_non_objects() {
        assert!(matches!(
            parse_body(b"{not json"),
            Err(IntakeError::MalformedJson(_))
        ));
        assert!(matches!(
            parse_body(b"[1,2]"),
            Err(IntakeError::MalformedJson(msg)) if msg.contains("array")
        ));
        assert!(parse_body(b"  ").unwrap().is_empty());
    }

    #[test]
    fn honeypot_detection() {
        let cfg = IntakeConfig::default();
        assert!(honeypot_tripped(&body(json!({"hp": "I am a bot"})), &cfg));
        assert!(honeypot_tripped(&body(json!({"hp": 7})), &cfg));
        assert!(!honeypot_tripped(&body(json!({"hp": "   "})), &cfg));
        assert!(!honeypot_tripped(&body(json!({"hp": null})), &cfg));
        assert!(!honeypot_tripped(&body(complete()), &cfg));
    }

    #[test]
    fn blank_answers_are_omitted() {
        let mut raw = complete();
        raw["objectives"] = json!(["  ", ""]);
        raw["horizon"] = json!("  Long term  ");
        let payload = validate(body(raw), &questionnaire(), &IntakeConfig::default()).unwrap();
        assert!(payload.answer("objectives").is_none());
        assert_eq!(payload.answer("horizon"), Some(&FieldValue::from("Long term")));
    }
}
