use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use catalog::{normalize, Cardinality};
use intake::{FieldErrors, FieldValue, FormPayload, FIELD_EMAIL, FIELD_MESSAGE, FIELD_NAME, FIELD_PHONE};
use tracing::{error, info, warn};
use upstream::{
    AttributeValue, CrmClient, EngineOutcome, FieldBinding, OutboundAttribute, RecordDraft,
    ResolveError, ResolvedSchema, SchemaResolver, SubmissionEngine,
};

use crate::consent::{ConsentConfig, ConsentRecord, CONSENT_AT};
use crate::outcome::{SubmissionOutcome, ValidationFailure};
use crate::profile::RouteProfile;
use crate::RequestContext;

/// Settings for the stages after intake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Upstream form used when the route does not name its own.
    pub form_id: Option<String>,
    pub dry_run: bool,
    pub field_overrides: BTreeMap<String, String>,
    pub consent: ConsentConfig,
    /// Budget for each upstream call.
    pub timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            form_id: None,
            dry_run: false,
            field_overrides: BTreeMap::new(),
            consent: ConsentConfig::default(),
            timeout: Duration::from_secs(10),
        }
    }
}

struct Crm {
    resolver: SchemaResolver,
    engine: SubmissionEngine,
}

/// Schema resolution, option normalization, consent stamping and record
/// creation for one validated payload.
pub struct LeadPipeline {
    crm: Option<Crm>,
    config: PipelineConfig,
}

impl LeadPipeline {
    pub fn new(client: Arc<dyn CrmClient>, config: PipelineConfig) -> Self {
        let crm = Crm {
            resolver: SchemaResolver::new(client.clone(), config.timeout),
            engine: SubmissionEngine::new(client, config.timeout),
        };
        Self {
            crm: Some(crm),
            config,
        }
    }

    /// A pipeline with no CRM behind it; every submission is `Skipped`.
    pub fn dry_run(mut config: PipelineConfig) -> Self {
        config.dry_run = true;
        Self { crm: None, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run || self.crm.is_none()
    }

    pub async fn submit(
        &self,
        route: &RouteProfile,
        payload: &FormPayload,
        ctx: &RequestContext,
    ) -> SubmissionOutcome {
        let crm = match &self.crm {
            Some(crm) if !self.config.dry_run => crm,
            _ => {
                info!(
                    correlation_id = %ctx.correlation_id,
                    route = %route.name,
                    "dry run, upstream skipped"
                );
                return SubmissionOutcome::Skipped;
            }
        };

        let Some(form_id) = route.form_id.as_deref().or(self.config.form_id.as_deref()) else {
            error!(
                event = "upstream_failed",
                correlation_id = %ctx.correlation_id,
                route = %route.name,
                "no upstream form configured"
            );
            return SubmissionOutcome::UpstreamUnavailable {
                reason: "upstream form is not configured".into(),
            };
        };

        let bindings = route.bindings(&self.config.field_overrides);
        let schema = match crm.resolver.resolve(form_id, &bindings).await {
            Ok(schema) => schema,
            Err(ResolveError::MissingFields { missing, catalog }) => {
                error!(
                    event = "schema_mismatch",
                    correlation_id = %ctx.correlation_id,
                    route = %route.name,
                    missing = ?missing,
                    catalog = ?catalog.iter().map(|f| (&f.id, &f.label, &f.field_type)).collect::<Vec<_>>(),
                    "upstream schema lacks required fields"
                );
                return SubmissionOutcome::SchemaMismatch { missing, catalog };
            }
            Err(ResolveError::Upstream(err)) => {
                error!(
                    event = "upstream_failed",
                    correlation_id = %ctx.correlation_id,
                    stage = "schema",
                    error = %err,
                    "schema discovery failed"
                );
                return if err.is_unavailable() {
                    SubmissionOutcome::UpstreamUnavailable {
                        reason: err.to_string(),
                    }
                } else {
                    SubmissionOutcome::UpstreamRejected {
                        reason: err.to_string(),
                    }
                };
            }
        };

        let consent = ConsentRecord::observe(ctx, &route.name, &self.config.consent);
        let draft = match build_draft(form_id, route, &bindings, payload, &schema, &consent) {
            Ok(draft) => draft,
            Err(failure) => {
                warn!(
                    event = "validation_failed",
                    correlation_id = %ctx.correlation_id,
                    stage = "options",
                    fields = ?failure.details.fields().collect::<Vec<_>>(),
                    "submitted values outside the upstream option catalog"
                );
                return SubmissionOutcome::ValidationFailed(failure);
            }
        };

        match crm.engine.submit(&draft).await {
            EngineOutcome::Created {
                record,
                used_fallback,
            } => SubmissionOutcome::Success {
                record_id: record.id,
                url: record.url,
                used_fallback,
            },
            EngineOutcome::Rejected { reason } => {
                error!(
                    event = "upstream_failed",
                    correlation_id = %ctx.correlation_id,
                    stage = "create",
                    reason = %reason,
                    "upstream rejected the record"
                );
                SubmissionOutcome::UpstreamRejected { reason }
            }
            EngineOutcome::Unavailable { reason } => {
                error!(
                    event = "upstream_failed",
                    correlation_id = %ctx.correlation_id,
                    stage = "create",
                    reason = %reason,
                    "upstream unavailable"
                );
                SubmissionOutcome::UpstreamUnavailable { reason }
            }
        }
    }
}

/// Assemble the outbound record from a payload and a resolved schema.
///
/// Values for fields with an option catalog (the upstream one, else the
/// binding's own) are normalized onto the canonical spellings. A required
/// field with any unmatched value, or an optional one with nothing matched,
/// fails the whole submission with the allowed options attached. Fields
/// without a catalog are forwarded exactly as submitted.
pub fn build_draft(
    form_id: &str,
    route: &RouteProfile,
    bindings: &[FieldBinding],
    payload: &FormPayload,
    schema: &ResolvedSchema,
    consent: &ConsentRecord,
) -> Result<RecordDraft, ValidationFailure> {
    let mut draft = RecordDraft::new(form_id, String::new());
    let mut details = FieldErrors::new();
    let mut allowed_options = BTreeMap::new();
    let mut title_detail = None;

    for binding in bindings {
        let Some(value) = payload_value(payload, &binding.key) else {
            continue;
        };
        if value.is_blank() {
            continue;
        }
        let Some(meta) = schema.get(&binding.key) else {
            warn!(key = %binding.key, "no upstream field for submitted value, dropped");
            continue;
        };

        let options = if meta.options.is_empty() {
            &binding.options
        } else {
            &meta.options
        };

        let attribute = if options.is_empty() {
            match value {
                FieldValue::Text(text) => AttributeValue::Text(text),
                FieldValue::List(items) => AttributeValue::List(items),
            }
        } else {
            let cardinality = meta.cardinality();
            let normalized = normalize(&value.values(), options, cardinality);

            if !normalized.rejected.is_empty() {
                if binding.required || normalized.matched.is_empty() {
                    details.insert(
                        binding.key.clone(),
                        format!("Invalid option(s): {}", normalized.rejected.join(", ")),
                    );
                    allowed_options.insert(binding.key.clone(), options.clone());
                    continue;
                }
                warn!(
                    key = %binding.key,
                    rejected = normalized.rejected.len(),
                    "unmatched options dropped from optional field"
                );
            }

            let mut matched = normalized.matched;
            match cardinality {
                Cardinality::Multiple => AttributeValue::List(matched),
                Cardinality::Single if matched.is_empty() => continue,
                Cardinality::Single => AttributeValue::Text(matched.swap_remove(0)),
            }
        };

        if route.title_field.as_deref() == Some(binding.key.as_str()) {
            title_detail = Some(title_text(&attribute));
        }
        draft.push(OutboundAttribute::for_field(&binding.key, meta, attribute));
    }

    if !details.is_empty() {
        return Err(ValidationFailure {
            details,
            allowed_options,
        });
    }

    let title_detail = title_detail.or_else(|| {
        let key = route.title_field.as_deref()?;
        payload.answer(key).map(|value| value.values().join(", "))
    });
    draft.title = match title_detail {
        Some(detail) => format!("{} - {} - {}", route.title_prefix, detail, payload.display_name()),
        None => format!("{} - {}", route.title_prefix, payload.display_name()),
    };

    consent.stamp(payload.client_consent_at.as_deref(), schema, &mut draft);
    Ok(draft)
}

fn title_text(value: &AttributeValue) -> String {
    match value {
        AttributeValue::Text(text) => text.clone(),
        AttributeValue::List(items) => items.join(", "),
    }
}

fn payload_value(payload: &FormPayload, key: &str) -> Option<FieldValue> {
    let text = |value: &Option<String>| value.clone().map(FieldValue::Text);
    match key {
        FIELD_NAME => Some(FieldValue::Text(payload.name.clone())),
        FIELD_EMAIL => Some(FieldValue::Text(payload.email.clone())),
        FIELD_PHONE => text(&payload.phone),
        FIELD_MESSAGE => text(&payload.message),
        key if is_consent_key(key) => None,
        key => payload.answer(key).cloned(),
    }
}

fn is_consent_key(key: &str) -> bool {
    use crate::consent::{
        CONSENT_CLIENT_AT, CONSENT_FORM_ID, CONSENT_IP, CONSENT_POLICY_VERSION, CONSENT_UA,
    };
    [
        CONSENT_AT,
        CONSENT_IP,
        CONSENT_UA,
        CONSENT_POLICY_VERSION,
        CONSENT_CLIENT_AT,
        CONSENT_FORM_ID,
    ]
    .contains(&key)
}
