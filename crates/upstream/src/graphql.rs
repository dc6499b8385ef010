//! GraphQL CRM client.
//!
//! Speaks the pipe/start-form dialect: the catalog comes from
//! `pipe(id) { start_form_fields }` and records are created through the
//! `createCard` mutation. One POST per operation, bearer-token auth, no
//! retries at this layer.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::client::CrmClient;
use crate::error::UpstreamError;
use crate::types::{CreateRecord, CreatedRecord, FieldMeta, NewField};

const FIELDS_QUERY: &str = r#"
query ($pipeId: ID!) {
  pipe(id: $pipeId) {
    start_form_fields { id internal_id label type options multiple }
  }
}"#;

const START_PHASE_QUERY: &str = r#"
query ($pipeId: ID!) {
  pipe(id: $pipeId) { startFormPhaseId }
}"#;

const CREATE_FIELD_MUTATION: &str = r#"
mutation ($input: CreatePhaseFieldInput!) {
  createPhaseField(input: $input) { phase_field { id label type } }
}"#;

const CREATE_MUTATION: &str = r#"
mutation ($input: CreateCardInput!) {
  createCard(input: $input) { card { id url } }
}"#;

/// Connection settings for the CRM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub endpoint: String,
    pub token: Option<String>,
    /// Form (pipe) that receives submissions.
    pub form_id: Option<String>,
    /// Per-call budget for both the schema query and the create mutation.
    pub timeout_secs: u64,
    /// Validate and answer, but never call the CRM.
    pub dry_run: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.pipefy.com/graphql".into(),
            token: None,
            form_id: None,
            timeout_secs: 10,
            dry_run: false,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn is_configured(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
            && self.form_id.as_deref().is_some_and(|f| !f.is_empty())
    }
}

pub struct GraphqlCrmClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    timeout: Duration,
}

impl GraphqlCrmClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let token = config
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| UpstreamError::NotConfigured("upstream.token is required".into()))?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| UpstreamError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            token,
            timeout: config.timeout(),
        })
    }

    async fn execute(&self, query: &str, variables: Value) -> Result<Value, UpstreamError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout(self.timeout)
                } else {
                    UpstreamError::Unavailable(format!("HTTP request failed: {e}"))
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(self.timeout)
            } else {
                UpstreamError::Unavailable(format!("reading response failed: {e}"))
            }
        })?;
        debug!(status = %status, bytes = text.len(), "upstream response");

        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        let messages = graphql_errors(&body);
        if !messages.is_empty() {
            return Err(UpstreamError::Rejected { messages });
        }
        if status.is_server_error() {
            return Err(UpstreamError::Unavailable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(UpstreamError::rejected(format!("HTTP {status}: {text}")));
        }

        match body {
            Value::Object(mut map) => map
                .remove("data")
                .filter(|data| !data.is_null())
                .ok_or_else(|| UpstreamError::InvalidResponse("missing `data`".into())),
            _ => Err(UpstreamError::InvalidResponse(format!(
                "expected a JSON object, got: {}",
                truncate(&text, 200)
            ))),
        }
    }
}

#[async_trait]
impl CrmClient for GraphqlCrmClient {
    async fn fetch_fields(&self, form_id: &str) -> Result<Vec<FieldMeta>, UpstreamError> {
        let data = self
            .execute(FIELDS_QUERY, json!({ "pipeId": form_id }))
            .await?;
        parse_fields(&data)
    }

    async fn create_record(&self, request: &CreateRecord) -> Result<CreatedRecord, UpstreamError> {
        let variables = json!({
            "input": {
                "pipe_id": request.form_id,
                "title": request.title,
                "fields_attributes": request.attributes,
            }
        });
        let data = self.execute(CREATE_MUTATION, variables).await?;
        parse_created(&data)
    }

    async fn create_field(&self, form_id: &str, field: &NewField) -> Result<FieldMeta, UpstreamError> {
        let data = self
            .execute(START_PHASE_QUERY, json!({ "pipeId": form_id }))
            .await?;
        let phase_id = match data.pointer("/pipe/startFormPhaseId") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                return Err(UpstreamError::InvalidResponse(
                    "form has no start phase".into(),
                ))
            }
        };

        let variables = json!({
            "input": {
                "phase_id": phase_id,
                "label": field.label,
                "type": field.field_type,
                "description": field.description,
            }
        });
        let data = self.execute(CREATE_FIELD_MUTATION, variables).await?;
        parse_created_field(&data)
    }
}

/// Error messages of a GraphQL response, empty when there are none.
pub fn graphql_errors(body: &Value) -> Vec<String> {
    body.get("errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|error| {
                    error
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string())
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_fields(data: &Value) -> Result<Vec<FieldMeta>, UpstreamError> {
    let fields = data
        .pointer("/pipe/start_form_fields")
        .and_then(Value::as_array)
        .ok_or_else(|| UpstreamError::InvalidResponse("missing pipe.start_form_fields".into()))?;

    Ok(fields
        .iter()
        .filter_map(|field| {
            let id = field.get("id").and_then(Value::as_str)?;
            let text = |key: &str| field.get(key).and_then(Value::as_str).map(str::to_string);
            let options = field
                .get("options")
                .and_then(Value::as_array)
                .map(|opts| {
                    opts.iter()
                        .filter_map(|o| o.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            Some(FieldMeta {
                id: id.to_string(),
                internal_id: field.get("internal_id").and_then(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                }),
                label: text("label").unwrap_or_default(),
                field_type: text("type").unwrap_or_default(),
                options,
                multiple: field.get("multiple").and_then(Value::as_bool),
            })
        })
        .collect())
}

fn parse_created(data: &Value) -> Result<CreatedRecord, UpstreamError> {
    let card = data
        .pointer("/createCard/card")
        .ok_or_else(|| UpstreamError::InvalidResponse("missing createCard.card".into()))?;
    let id = match card.get("id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => return Err(UpstreamError::InvalidResponse("created record has no id".into())),
    };
    Ok(CreatedRecord {
        id,
        url: card.get("url").and_then(Value::as_str).map(str::to_string),
    })
}

fn parse_created_field(data: &Value) -> Result<FieldMeta, UpstreamError> {
    let field = data
        .pointer("/createPhaseField/phase_field")
        .ok_or_else(|| UpstreamError::InvalidResponse("missing createPhaseField.phase_field".into()))?;
    let id = field
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| UpstreamError::InvalidResponse("created field has no id".into()))?;
    let text = |key: &str| field.get(key).and_then(Value::as_str).unwrap_or_default();
    Ok(FieldMeta::new(id, text("type")).with_label(text("label")))
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
