//! Workspace umbrella crate for the leadgate form gateway.
//!
//! This crate stitches the stages that run after a payload has been accepted
//! by [`intake`]: the upstream schema is resolved, option values are
//! normalized against its catalogs, consent metadata is stamped, and the
//! record is handed to the submission engine. The HTTP surface lives in the
//! `leadgate-server` crate.
//!
//! [`provision_consent_fields`] is the administrative counterpart: it makes
//! sure the upstream form carries the consent fields the stamper looks for.

mod consent;
mod outcome;
mod pipeline;
mod profile;
mod provision;

pub use catalog::{fold, normalize, Cardinality, Normalized};
pub use intake::{
    check_body_size, honeypot_tripped, parse_body, validate, FieldErrors, FieldValue,
    FormPayload, IntakeConfig, IntakeError, IntakeProfile,
};
pub use upstream::{
    CrmClient, FieldBinding, FieldMeta, GraphqlCrmClient, NewField, UpstreamConfig,
    UpstreamError,
};

pub use crate::consent::{
    consent_bindings, hash_address, ConsentConfig, ConsentField, ConsentRecord, CONSENT_AT,
    CONSENT_CLIENT_AT, CONSENT_FIELDS, CONSENT_FORM_ID, CONSENT_IP, CONSENT_POLICY_VERSION,
    CONSENT_UA,
};
pub use crate::outcome::{SubmissionOutcome, ValidationFailure};
pub use crate::pipeline::{build_draft, LeadPipeline, PipelineConfig};
pub use crate::provision::{provision_consent_fields, ProvisionReport};
pub use crate::profile::{
    default_routes, RouteProfile, CONSENT_ROUTE, CONTACT_ROUTE, DATA_REQUEST_ROUTE, DEFAULT_ROUTE,
    REQUEST_TYPE, REQUEST_TYPES,
};

use chrono::{DateTime, Utc};

/// What the server observed about the request carrying a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub correlation_id: String,
    /// Client identity; `"unknown"` when no address could be resolved.
    pub client_address: String,
    pub user_agent: String,
    /// Server clock at request entry.
    pub received_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(
        correlation_id: impl Into<String>,
        client_address: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            client_address: client_address.into(),
            user_agent: user_agent.into(),
            received_at: Utc::now(),
        }
    }
}
