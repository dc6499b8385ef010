use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use leadgate::{
    parse_body, validate, CrmClient, FieldBinding, FieldMeta, FormPayload, IntakeConfig,
    LeadPipeline, PipelineConfig, RequestContext, RouteProfile, SubmissionOutcome,
    UpstreamError,
};
use upstream::{CreateRecord, CreatedRecord};

#[derive(Default)]
struct RecordingCrm {
    catalog: Vec<FieldMeta>,
    replies: Mutex<Vec<Result<CreatedRecord, UpstreamError>>>,
    fetches: Mutex<usize>,
    creates: Mutex<Vec<CreateRecord>>,
}

impl RecordingCrm {
    fn new(catalog: Vec<FieldMeta>, replies: Vec<Result<CreatedRecord, UpstreamError>>) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            replies: Mutex::new(replies.into_iter().rev().collect()),
            ..Default::default()
        })
    }

    fn creates(&self) -> Vec<CreateRecord> {
        self.creates.lock().unwrap().clone()
    }
}

#[async_trait]
impl CrmClient for RecordingCrm {
    async fn fetch_fields(&self, _form_id: &str) -> Result<Vec<FieldMeta>, UpstreamError> {
        *self.fetches.lock().unwrap() += 1;
        Ok(self.catalog.clone())
    }

    async fn create_record(&self, request: &CreateRecord) -> Result<CreatedRecord, UpstreamError> {
        self.creates.lock().unwrap().push(request.clone());
        self.replies.lock().unwrap().pop().unwrap_or_else(|| {
            Ok(CreatedRecord {
                id: "rec-1".into(),
                url: None,
            })
        })
    }
}

fn catalog() -> Vec<FieldMeta> {
    vec![
        FieldMeta::new("nome_do_cliente", "short_text")
            .with_internal_id("1001")
            .with_label("Nome do cliente"),
        FieldMeta::new("e_mail", "email").with_internal_id("1002"),
        FieldMeta::new("telefone_para_contato_whatsapp", "phone").with_internal_id("1003"),
        FieldMeta::new("mensagem", "long_text").with_label("Mensagem"),
        FieldMeta::new("objetivos", "checklist_vertical")
            .with_label("Objetivos")
            .with_options(["Crescimento", "Renda passiva"]),
        FieldMeta::new("consent_ts", "datetime").with_label("Consent TS"),
        FieldMeta::new("consent_ip", "short_text").with_label("consent ip"),
        FieldMeta::new("consent_policy", "short_text").with_label("Consent Policy Version"),
    ]
}

fn route() -> RouteProfile {
    RouteProfile::new("form")
        .with_title_prefix("Lead")
        .with_field(FieldBinding::new("objectives").with_labels(["Objetivos"]))
}

fn pipeline(client: Arc<RecordingCrm>) -> LeadPipeline {
    let config = PipelineConfig {
        form_id: Some("301".into()),
        ..Default::default()
    };
    LeadPipeline::new(client, config)
}

fn payload(body: &str) -> FormPayload {
    let raw = parse_body(body.as_bytes()).unwrap();
    validate(raw, &route().intake(), &IntakeConfig::default()).unwrap()
}

fn ctx() -> RequestContext {
    RequestContext::new("corr-1", "203.0.113.9", "Mozilla/5.0")
}

const ANA: &str = r#"{"name":"Ana","email":"ana@example.com","phone":"+5511999999999","message":"Olá","consent":true}"#;

#[tokio::test]
async fn valid_submission_creates_exactly_one_record() {
    let client = RecordingCrm::new(catalog(), vec![]);
    let outcome = pipeline(client.clone()).submit(&route(), &payload(ANA), &ctx()).await;

    assert!(matches!(&outcome, SubmissionOutcome::Success { record_id, .. } if record_id == "rec-1"));
    let creates = client.creates();
    assert_eq!(creates.len(), 1);
    let request = &creates[0];
    assert_eq!(request.form_id, "301");
    assert_eq!(request.title, "Lead - Ana");

    let ids: Vec<&str> = request.attributes.iter().map(|a| a.field_id.as_str()).collect();
    assert!(ids.contains(&"nome_do_cliente"));
    assert!(ids.contains(&"e_mail"));
    assert!(ids.contains(&"telefone_para_contato_whatsapp"));
    assert!(ids.contains(&"mensagem"));
    assert!(ids.contains(&"consent_ts"));
    assert!(ids.contains(&"consent_ip"));
    assert!(ids.contains(&"consent_policy"));
}

#[tokio::test]
async fn consent_attributes_are_server_authoritative() {
    let client = RecordingCrm::new(catalog(), vec![]);
    let body = r#"{"name":"Ana","email":"ana@example.com","consent":true,
        "policyVersion":"v0-client","consentClientTs":"1999-01-01T00:00:00Z"}"#;
    let context = ctx();
    pipeline(client.clone()).submit(&route(), &payload(body), &context).await;

    let request = &client.creates()[0];
    let value = |id: &str| {
        request
            .attributes
            .iter()
            .find(|a| a.field_id == id)
            .and_then(|a| a.value.as_text())
            .map(str::to_string)
    };
    assert_eq!(value("consent_policy").as_deref(), Some("v1"));
    assert_eq!(value("consent_ip").as_deref(), Some("203.0.113.9"));
    let stamped = value("consent_ts").unwrap();
    assert!(stamped.ends_with('Z'));
    assert!(!stamped.starts_with("1999"));
}

#[tokio::test]
async fn missing_required_schema_field_stops_before_create() {
    let catalog = vec![FieldMeta::new("e_mail", "email")];
    let client = RecordingCrm::new(catalog, vec![]);
    let outcome = pipeline(client.clone()).submit(&route(), &payload(ANA), &ctx()).await;

    match outcome {
        SubmissionOutcome::SchemaMismatch { missing, catalog } => {
            assert_eq!(missing, vec!["name".to_string()]);
            assert_eq!(catalog.len(), 1);
        }
        other => panic!("expected schema mismatch, got {other:?}"),
    }
    assert!(client.creates().is_empty());
}

#[tokio::test]
async fn unknown_option_lists_allowed_values() {
    let client = RecordingCrm::new(catalog(), vec![]);
    let body = r#"{"name":"Ana","email":"ana@example.com","consent":true,"objectives":["Nonexistent Option"]}"#;
    let outcome = pipeline(client.clone()).submit(&route(), &payload(body), &ctx()).await;

    match outcome {
        SubmissionOutcome::ValidationFailed(failure) => {
            assert!(failure.details.contains("objectives"));
            assert_eq!(
                failure.allowed_options.get("objectives"),
                Some(&vec!["Crescimento".to_string(), "Renda passiva".to_string()])
            );
        }
        other => panic!("expected validation failure, got {other:?}"),
    }
    assert!(client.creates().is_empty());
}

#[tokio::test]
async fn identifier_mismatch_falls_back_to_internal_ids() {
    let client = RecordingCrm::new(
        catalog(),
        vec![Err(UpstreamError::rejected("Field not found: e_mail"))],
    );
    let outcome = pipeline(client.clone()).submit(&route(), &payload(ANA), &ctx()).await;

    assert!(matches!(outcome, SubmissionOutcome::Success { used_fallback: true, .. }));
    let creates = client.creates();
    assert_eq!(creates.len(), 2);
    assert!(creates[1].attributes.iter().any(|a| a.field_id == "1002"));
}

#[tokio::test]
async fn upstream_outage_is_unavailable() {
    let client = RecordingCrm::new(
        catalog(),
        vec![Err(UpstreamError::Unavailable("connection refused".into()))],
    );
    let outcome = pipeline(client.clone()).submit(&route(), &payload(ANA), &ctx()).await;
    assert!(matches!(outcome, SubmissionOutcome::UpstreamUnavailable { .. }));
    assert_eq!(client.creates().len(), 1);
}

#[tokio::test]
async fn field_overrides_redirect_core_fields() {
    let mut catalog = catalog();
    catalog.push(FieldMeta::new("email_alt", "short_text"));
    let client = RecordingCrm::new(catalog, vec![]);
    let config = PipelineConfig {
        form_id: Some("301".into()),
        field_overrides: BTreeMap::from([("email".to_string(), "email_alt".to_string())]),
        ..Default::default()
    };
    LeadPipeline::new(client.clone(), config)
        .submit(&route(), &payload(ANA), &ctx())
        .await;

    let request = &client.creates()[0];
    assert!(request.attributes.iter().any(|a| a.field_id == "email_alt"));
    assert!(!request.attributes.iter().any(|a| a.field_id == "e_mail"));
}

#[tokio::test]
async fn dry_run_never_calls_upstream() {
    let client = RecordingCrm::new(catalog(), vec![]);
    let config = PipelineConfig {
        form_id: Some("301".into()),
        dry_run: true,
        ..Default::default()
    };
    let outcome = LeadPipeline::new(client.clone(), config)
        .submit(&route(), &payload(ANA), &ctx())
        .await;
    assert_eq!(outcome, SubmissionOutcome::Skipped);
    assert_eq!(*client.fetches.lock().unwrap(), 0);
    assert!(client.creates().is_empty());
}
