use std::collections::BTreeMap;

use intake::FieldErrors;
use serde::Serialize;
use upstream::FieldMeta;

/// Per-field reasons plus, for option fields, what would have been accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    pub details: FieldErrors,
    #[serde(rename = "allowedOptions", skip_serializing_if = "BTreeMap::is_empty")]
    pub allowed_options: BTreeMap<String, Vec<String>>,
}

impl From<FieldErrors> for ValidationFailure {
    fn from(details: FieldErrors) -> Self {
        Self {
            details,
            allowed_options: BTreeMap::new(),
        }
    }
}

/// How a submission ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Success {
        record_id: String,
        url: Option<String>,
        used_fallback: bool,
    },
    /// Accepted and validated, upstream intentionally not called.
    Skipped,
    /// Honeypot filled; answered as success, never forwarded.
    Discarded,
    Throttled {
        retry_after_secs: u64,
    },
    ValidationFailed(ValidationFailure),
    SchemaMismatch {
        missing: Vec<String>,
        catalog: Vec<FieldMeta>,
    },
    UpstreamRejected {
        reason: String,
    },
    UpstreamUnavailable {
        reason: String,
    },
}

impl SubmissionOutcome {
    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            SubmissionOutcome::Success { .. } => "success",
            SubmissionOutcome::Skipped => "skipped",
            SubmissionOutcome::Discarded => "discarded",
            SubmissionOutcome::Throttled { .. } => "throttled",
            SubmissionOutcome::ValidationFailed(_) => "validation_failed",
            SubmissionOutcome::SchemaMismatch { .. } => "schema_mismatch",
            SubmissionOutcome::UpstreamRejected { .. } => "upstream_rejected",
            SubmissionOutcome::UpstreamUnavailable { .. } => "upstream_unavailable",
        }
    }
}
