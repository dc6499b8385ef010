//! Administrative endpoints, guarded by [`crate::middleware::admin_auth`].

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use leadgate::{provision_consent_fields, ProvisionReport};
use serde::Deserialize;
use tracing::warn;

use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionRequest {
    form_id: Option<String>,
}

/// `POST /admin/consent-fields`
///
/// Creates the consent fields missing from a form. The body is optional;
/// `{"formId": "..."}` targets a form other than the configured one.
pub async fn provision_consent(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> ServerResult<Json<ProvisionReport>> {
    let request: ProvisionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ProvisionRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|err| ServerError::BadRequest(err.to_string()))?
    };

    let form_id = request
        .form_id
        .filter(|id| !id.trim().is_empty())
        .or_else(|| state.config.upstream.form_id.clone())
        .ok_or_else(|| ServerError::BadRequest("no form id given or configured".into()))?;

    let client = state
        .crm
        .as_ref()
        .ok_or_else(|| ServerError::Upstream("upstream is not configured".into()))?;

    let report =
        provision_consent_fields(client.as_ref(), &form_id, state.config.upstream.timeout())
            .await
            .map_err(|err| {
                warn!(form_id = %form_id, error = %err, "consent field provisioning failed");
                ServerError::Upstream(err.to_string())
            })?;
    Ok(Json(report))
}
