//! Record submission.
//!
//! ```text
//!                ┌──────────────┐  ok                ┌─────────┐
//!   start ──────►│ Attempt      ├───────────────────►│ Created │
//!                │ Primary      │                    └─────────┘
//!                └──┬────────┬──┘                         ▲
//!   field id not    │        │ timeout / network          │ ok
//!   found (+alt ids)│        └──────────► Unavailable     │
//!                   ▼                                     │
//!                ┌──────────────┐  any failure            │
//!                │ Attempt      ├──────────► Rejected     │
//!                │ Fallback     ├─────────────────────────┘
//!                └──────────────┘
//! ```
//!
//! Exactly one retry, and only when the CRM says a field identifier does not
//! exist and the implicated attributes have an alternate identifier. Network
//! failures are never retried: a blind retry of a create call can duplicate
//! the record.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::client::CrmClient;
use crate::error::UpstreamError;
use crate::types::{CreatedRecord, OutboundAttribute, RecordDraft};

/// Terminal state of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    Created {
        record: CreatedRecord,
        used_fallback: bool,
    },
    Rejected {
        reason: String,
    },
    Unavailable {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Attempt {
    Primary,
    Fallback { substitute: Vec<String> },
}

pub struct SubmissionEngine {
    client: Arc<dyn CrmClient>,
    timeout: Duration,
}

impl SubmissionEngine {
    pub fn new(client: Arc<dyn CrmClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub async fn submit(&self, draft: &RecordDraft) -> EngineOutcome {
        let mut attempt = Attempt::Primary;

        loop {
            let substitute: &[String] = match &attempt {
                Attempt::Primary => &[],
                Attempt::Fallback { substitute } => substitute,
            };
            let request = draft.to_request(substitute);

            let result = tokio::time::timeout(self.timeout, self.client.create_record(&request))
                .await
                .unwrap_or(Err(UpstreamError::Timeout(self.timeout)));

            let err = match result {
                Ok(record) => {
                    let used_fallback = matches!(attempt, Attempt::Fallback { .. });
                    info!(record_id = %record.id, used_fallback, "upstream record created");
                    return EngineOutcome::Created {
                        record,
                        used_fallback,
                    };
                }
                Err(err) => err,
            };

            if err.is_unavailable() {
                return EngineOutcome::Unavailable {
                    reason: err.to_string(),
                };
            }

            let targets = match (&attempt, &err) {
                (Attempt::Primary, UpstreamError::Rejected { messages }) => {
                    fallback_targets(messages, draft)
                }
                _ => None,
            };

            match targets {
                Some(substitute) => {
                    warn!(
                        event = "upstream_fallback",
                        fields = ?substitute,
                        reason = %err,
                        "field identifier rejected, retrying with alternate ids"
                    );
                    attempt = Attempt::Fallback { substitute };
                }
                None => return rejected(err),
            }
        }
    }
}

fn rejected(err: UpstreamError) -> EngineOutcome {
    let reason = match err {
        UpstreamError::Rejected { messages } => messages.join("; "),
        other => other.to_string(),
    };
    EngineOutcome::Rejected { reason }
}

/// Whether a CRM error message says a field identifier does not exist.
///
/// Accepts `unknown field ...` and `field ... not found` / `does not exist`,
/// with the negation after the word "field".
pub fn is_field_not_found(message: &str) -> bool {
    let lower = message.to_lowercase();
    if lower.contains("unknown field") {
        return true;
    }
    let Some(at) = lower.find("field") else {
        return false;
    };
    let rest = &lower[at..];
    ["not found", "does not exist", "doesn't exist", "not exist"]
        .iter()
        .any(|phrase| rest.contains(phrase))
}

/// Primary ids to swap for their alternates, or `None` when the error is not
/// an identifier mismatch or nothing has an alternate to fall back to.
///
/// Attributes named in the message are implicated, and only those with an
/// alternate are swapped. When the message names no attribute at all, every
/// attribute with an alternate id is implicated.
fn fallback_targets(messages: &[String], draft: &RecordDraft) -> Option<Vec<String>> {
    let relevant: Vec<&String> = messages.iter().filter(|m| is_field_not_found(m)).collect();
    if relevant.is_empty() {
        return None;
    }

    let tokens: HashSet<&str> = relevant
        .iter()
        .flat_map(|m| m.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-')))
        .filter(|token| !token.is_empty())
        .collect();

    let named: Vec<&OutboundAttribute> = draft
        .attributes
        .iter()
        .filter(|attr| tokens.contains(attr.primary_id.as_str()))
        .collect();

    let implicated: Vec<&OutboundAttribute> = if named.is_empty() {
        draft.attributes.iter().collect()
    } else {
        named
    };
    let substitute: Vec<String> = implicated
        .into_iter()
        .filter(|attr| attr.alternate_id.is_some())
        .map(|attr| attr.primary_id.clone())
        .collect();

    if substitute.is_empty() {
        None
    } else {
        Some(substitute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttributeValue, CreateRecord, FieldMeta};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<Result<CreatedRecord, UpstreamError>>>,
        seen: Mutex<Vec<CreateRecord>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<CreatedRecord, UpstreamError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<CreateRecord> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CrmClient for Scripted {
        async fn fetch_fields(&self, _form_id: &str) -> Result<Vec<FieldMeta>, UpstreamError> {
            Ok(Vec::new())
        }

        async fn create_record(
            &self,
            request: &CreateRecord,
        ) -> Result<CreatedRecord, UpstreamError> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(UpstreamError::Unavailable("script exhausted".into())))
        }
    }

    fn created(id: &str) -> Result<CreatedRecord, UpstreamError> {
        Ok(CreatedRecord {
            id: id.into(),
            url: None,
        })
    }

    fn draft() -> RecordDraft {
        let email = FieldMeta::new("e_mail", "email").with_internal_id("318829");
        let name = FieldMeta::new("nome", "short_text").with_internal_id("318830");
        let notes = FieldMeta::new("notes", "long_text");
        let mut draft = RecordDraft::new("42", "Lead - Ana");
        draft.push(OutboundAttribute::for_field(
            "email",
            &email,
            AttributeValue::Text("ana@example.com".into()),
        ));
        draft.push(OutboundAttribute::for_field("name", &name, AttributeValue::Text("Ana".into())));
        draft.push(OutboundAttribute::for_field("notes", &notes, AttributeValue::Text("hi".into())));
        draft
    }

    fn engine(client: Arc<Scripted>) -> SubmissionEngine {
        SubmissionEngine::new(client, Duration::from_secs(10))
    }

    #[tokio::test]
    async fn primary_success_makes_one_call() {
        let client = Scripted::new(vec![created("1")]);
        let outcome = engine(client.clone()).submit(&draft()).await;
        assert!(matches!(outcome, EngineOutcome::Created { used_fallback: false, .. }));
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn field_not_found_retries_once_with_alternate_ids() {
        let client = Scripted::new(vec![
            Err(UpstreamError::rejected("Field not found: e_mail")),
            created("2"),
        ]);
        let outcome = engine(client.clone()).submit(&draft()).await;
        assert_eq!(
            outcome,
            EngineOutcome::Created {
                record: CreatedRecord {
                    id: "2".into(),
                    url: None
                },
                used_fallback: true,
            }
        );
        let calls = client.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].attributes[0].field_id, "318829");
        assert_eq!(calls[1].attributes[1].field_id, "nome");
        assert_eq!(calls[1].attributes[2].field_id, "notes");
    }

    #[tokio::test]
    async fn unnamed_field_error_swaps_every_alternate() {
        let client = Scripted::new(vec![
            Err(UpstreamError::rejected("Field does not exist")),
            created("3"),
        ]);
        engine(client.clone()).submit(&draft()).await;
        let calls = client.calls();
        assert_eq!(calls[1].attributes[0].field_id, "318829");
        assert_eq!(calls[1].attributes[1].field_id, "318830");
        assert_eq!(calls[1].attributes[2].field_id, "notes");
    }

    #[tokio::test]
    async fn fallback_failure_is_terminal() {
        let client = Scripted::new(vec![
            Err(UpstreamError::rejected("Field not found: e_mail")),
            Err(UpstreamError::rejected("Field not found: 318829")),
            created("never"),
        ]);
        let outcome = engine(client.clone()).submit(&draft()).await;
        assert_eq!(
            outcome,
            EngineOutcome::Rejected {
                reason: "Field not found: 318829".into()
            }
        );
        assert_eq!(client.calls().len(), 2);
    }

    #[tokio::test]
    async fn other_rejections_are_not_retried() {
        let client = Scripted::new(vec![
            Err(UpstreamError::rejected("Permission denied")),
            created("never"),
        ]);
        let outcome = engine(client.clone()).submit(&draft()).await;
        assert!(matches!(outcome, EngineOutcome::Rejected { reason } if reason == "Permission denied"));
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn network_failures_are_not_retried() {
        let client = Scripted::new(vec![
            Err(UpstreamError::Unavailable("connection reset".into())),
            created("never"),
        ]);
        let outcome = engine(client.clone()).submit(&draft()).await;
        assert!(matches!(outcome, EngineOutcome::Unavailable { .. }));
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn field_error_without_alternates_is_rejected() {
        let notes = FieldMeta::new("notes", "long_text");
        let mut draft = RecordDraft::new("42", "t");
        draft.push(OutboundAttribute::for_field("notes", &notes, AttributeValue::Text("x".into())));
        let client = Scripted::new(vec![Err(UpstreamError::rejected("Field not found: notes"))]);
        let outcome = engine(client.clone()).submit(&draft).await;
        assert!(matches!(outcome, EngineOutcome::Rejected { .. }));
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn named_field_without_alternate_is_not_retried() {
        let client = Scripted::new(vec![
            Err(UpstreamError::rejected("Field not found: notes")),
            created("never"),
        ]);
        let outcome = engine(client.clone()).submit(&draft()).await;
        assert_eq!(
            outcome,
            EngineOutcome::Rejected {
                reason: "Field not found: notes".into()
            }
        );
        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].attributes[0].field_id, "e_mail");
    }

    #[tokio::test]
    async fn only_named_fields_with_alternates_are_swapped() {
        let client = Scripted::new(vec![
            Err(UpstreamError::rejected("Field not found: nome, notes")),
            created("4"),
        ]);
        engine(client.clone()).submit(&draft()).await;
        let calls = client.calls();
        assert_eq!(calls.len(), 2);
        let ids: Vec<&str> = calls[1].attributes.iter().map(|a| a.field_id.as_str()).collect();
        assert_eq!(ids, vec!["e_mail", "318830", "notes"]);
    }

    struct Stalled;

    #[async_trait]
    impl CrmClient for Stalled {
        async fn fetch_fields(&self, _form_id: &str) -> Result<Vec<FieldMeta>, UpstreamError> {
            Ok(Vec::new())
        }

        async fn create_record(&self, _: &CreateRecord) -> Result<CreatedRecord, UpstreamError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            created("late")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_degrades_to_unavailable() {
        let engine = SubmissionEngine::new(Arc::new(Stalled), Duration::from_secs(10));
        let outcome = engine.submit(&draft()).await;
        assert!(matches!(outcome, EngineOutcome::Unavailable { reason } if reason.contains("timed out")));
    }

    #[test]
    fn recognizes_identifier_errors() {
        assert!(is_field_not_found("Field not found: e_mail"));
        assert!(is_field_not_found("field with id 'x' does not exist"));
        assert!(!is_field_not_found("Record not found"));
        assert!(!is_field_not_found("Invalid value for field e_mail"));
        assert!(is_field_not_found("Unknown field: solicitacao_tipo"));
        assert!(!is_field_not_found("unknown error in field value"));
        assert!(!is_field_not_found("Not found: field e_mail is locked"));
    }
}
