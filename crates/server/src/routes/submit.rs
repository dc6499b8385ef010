//! Submission handlers and the response composer.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Path, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use intake::{check_body_size, honeypot_tripped, parse_body, validate, IntakeError};
use leadgate::{RequestContext, SubmissionOutcome, DEFAULT_ROUTE};
use serde_json::json;
use tracing::{info, warn};

use crate::context::{client_identity, declared_length, identity_tag, mask_email, mask_phone, user_agent};
use crate::error::ServerError;
use crate::middleware::CorrelationId;
use crate::ratelimit::Admission;
use crate::state::ServerState;

/// `POST /submit`
pub async fn submit_default(
    State(state): State<Arc<ServerState>>,
    Extension(correlation): Extension<CorrelationId>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    submit(state, DEFAULT_ROUTE, correlation, headers, body).await
}

/// `POST /submit/{route}`
pub async fn submit_route(
    State(state): State<Arc<ServerState>>,
    Path(route): Path<String>,
    Extension(correlation): Extension<CorrelationId>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    submit(state, &route, correlation, headers, body).await
}

/// Preflights are answered by the CORS layer; this only keeps the method
/// routable.
pub async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn submit(
    state: Arc<ServerState>,
    route: &str,
    correlation: CorrelationId,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let (label, response) = match run(&state, route, &correlation, &headers, body).await {
        Ok(outcome) => (outcome.label(), compose(&outcome, &correlation)),
        Err(err) => (err.error_code(), err.into_response()),
    };
    metrics::counter!("leadgate_submissions_total", "outcome" => label).increment(1);
    response
}

async fn run(
    state: &ServerState,
    route_name: &str,
    correlation: &CorrelationId,
    headers: &HeaderMap,
    body: Body,
) -> Result<SubmissionOutcome, ServerError> {
    let received_at = Utc::now();
    let route = state.route(route_name).ok_or(ServerError::NotFound)?;
    let identity = client_identity(headers, state.config.client_ip_header.as_deref());
    let salt = state.config.consent.pii_salt.as_deref();

    if let Admission::Refused { retry_after_secs } =
        state.limiter.admit(&identity, &route.name).await
    {
        warn!(
            event = "rate_limited",
            correlation_id = %correlation.as_str(),
            route = %route.name,
            identity = %identity_tag(&identity, salt),
            "submission refused by rate limiter"
        );
        return Ok(SubmissionOutcome::Throttled { retry_after_secs });
    }

    let limit = state.intake.max_body_bytes;
    check_body_size(declared_length(headers), &state.intake)?;
    let bytes = to_bytes(body, limit)
        .await
        .map_err(|_| ServerError::PayloadTooLarge { limit })?;
    check_body_size(Some(bytes.len()), &state.intake)?;
    let raw = parse_body(&bytes)?;

    if honeypot_tripped(&raw, &state.intake) {
        warn!(
            event = "honeypot_triggered",
            correlation_id = %correlation.as_str(),
            route = %route.name,
            identity = %identity_tag(&identity, salt),
            "decoy field filled, submission discarded"
        );
        return Ok(SubmissionOutcome::Discarded);
    }

    let payload = match validate(raw, &route.intake(), &state.intake) {
        Ok(payload) => payload,
        Err(IntakeError::Validation(details)) => {
            warn!(
                event = "validation_failed",
                correlation_id = %correlation.as_str(),
                route = %route.name,
                fields = ?details.fields().collect::<Vec<_>>(),
                "submission failed validation"
            );
            return Ok(SubmissionOutcome::ValidationFailed(details.into()));
        }
        Err(err) => return Err(err.into()),
    };

    info!(
        event = "form_received",
        correlation_id = %correlation.as_str(),
        route = %route.name,
        email = %mask_email(&payload.email),
        phone = %payload.phone.as_deref().map(mask_phone).unwrap_or_default(),
        answers = payload.answers.len(),
        "submission accepted"
    );

    let ctx = RequestContext {
        correlation_id: correlation.0.clone(),
        client_address: identity,
        user_agent: user_agent(headers),
        received_at,
    };
    Ok(state.pipeline.submit(route, &payload, &ctx).await)
}

/// Map an outcome onto its wire response.
pub fn compose(outcome: &SubmissionOutcome, correlation: &CorrelationId) -> Response {
    let correlation_id = correlation.as_str();
    match outcome {
        SubmissionOutcome::Success { record_id, url, .. } => {
            let mut body = json!({
                "ok": true,
                "correlationId": correlation_id,
                "recordId": record_id,
            });
            if let Some(url) = url {
                body["recordUrl"] = json!(url);
            }
            (StatusCode::OK, Json(body)).into_response()
        }
        SubmissionOutcome::Skipped => (
            StatusCode::OK,
            Json(json!({ "ok": true, "correlationId": correlation_id, "skipped": true })),
        )
            .into_response(),
        SubmissionOutcome::Discarded => StatusCode::NO_CONTENT.into_response(),
        SubmissionOutcome::Throttled { retry_after_secs } => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": "Too Many Requests" })),
            )
                .into_response();
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            response
        }
        SubmissionOutcome::ValidationFailed(failure) => {
            let mut body = json!({
                "error": "Validation failed",
                "details": failure.details,
            });
            if !failure.allowed_options.is_empty() {
                body["allowedOptions"] = json!(failure.allowed_options);
            }
            (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
        }
        SubmissionOutcome::SchemaMismatch { missing, catalog } => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Upstream schema mismatch",
                "message": format!("Missing required field(s): {}", missing.join(", ")),
                "missing": missing,
                "detail": { "catalog": catalog },
                "correlationId": correlation_id,
            })),
        )
            .into_response(),
        SubmissionOutcome::UpstreamRejected { reason } => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": "Upstream rejected the submission",
                "detail": reason,
                "correlationId": correlation_id,
            })),
        )
            .into_response(),
        SubmissionOutcome::UpstreamUnavailable { reason } => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": "Upstream unavailable",
                "message": reason,
                "correlationId": correlation_id,
            })),
        )
            .into_response(),
    }
}
