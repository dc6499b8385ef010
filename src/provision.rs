//! Administrative provisioning of the consent fields.
//!
//! Creates whichever of [`CONSENT_FIELDS`] the upstream form lacks. Labels
//! are compared folded, so running it twice creates nothing the second time.

use std::time::Duration;

use catalog::folded_eq;
use serde::Serialize;
use tracing::info;
use upstream::{CrmClient, FieldMeta, NewField, UpstreamError};

use crate::consent::CONSENT_FIELDS;

/// What one provisioning run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionReport {
    pub form_id: String,
    pub created: Vec<FieldMeta>,
    /// Labels that already existed.
    pub skipped: Vec<String>,
}

pub async fn provision_consent_fields(
    client: &dyn CrmClient,
    form_id: &str,
    timeout: Duration,
) -> Result<ProvisionReport, UpstreamError> {
    let existing = tokio::time::timeout(timeout, client.fetch_fields(form_id))
        .await
        .unwrap_or(Err(UpstreamError::Timeout(timeout)))?;

    let mut report = ProvisionReport {
        form_id: form_id.to_string(),
        created: Vec::new(),
        skipped: Vec::new(),
    };

    for field in CONSENT_FIELDS {
        if existing.iter().any(|meta| folded_eq(&meta.label, field.label)) {
            report.skipped.push(field.label.to_string());
            continue;
        }
        let spec = NewField::new(field.label, field.field_type).with_description(field.description);
        let created = tokio::time::timeout(timeout, client.create_field(form_id, &spec))
            .await
            .unwrap_or(Err(UpstreamError::Timeout(timeout)))?;
        report.created.push(created);
    }

    info!(
        form_id,
        created = report.created.len(),
        skipped = report.skipped.len(),
        "consent fields provisioned"
    );
    Ok(report)
}
