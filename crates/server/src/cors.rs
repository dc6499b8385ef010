//! Origin negotiation for the submission routes.
//!
//! Runs before anything else touches the request: a disallowed origin is
//! answered with 403 without consulting the rate limiter, reading the body
//! or contacting the CRM. Preflights are answered here and never reach a
//! handler.

use std::collections::HashSet;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_HEADERS,
    ORIGIN, VARY,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ServerError;
use crate::state::ServerState;

const ALLOWED_METHODS: &str = "POST, OPTIONS";
const DEFAULT_ALLOWED_HEADERS: &str = "Content-Type, X-Correlation-Id";
const EXPOSED_HEADERS: &str = "X-Correlation-Id";
const MAX_AGE_SECS: &str = "86400";

#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    any: bool,
    origins: HashSet<String>,
}

impl CorsPolicy {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut policy = Self::default();
        for origin in origins {
            let origin = origin.as_ref().trim().trim_end_matches('/');
            if origin == "*" {
                policy.any = true;
            } else if !origin.is_empty() {
                policy.origins.insert(origin.to_ascii_lowercase());
            }
        }
        policy
    }

    /// A missing origin is never allowed.
    pub fn is_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            Some(origin) if !origin.is_empty() && origin != "null" => {
                self.any || self.origins.contains(&origin.to_ascii_lowercase())
            }
            _ => false,
        }
    }

    /// Write the negotiated headers onto `headers`.
    pub fn apply(
        &self,
        origin: Option<&str>,
        requested_headers: Option<&HeaderValue>,
        headers: &mut HeaderMap,
    ) {
        headers.append(VARY, HeaderValue::from_static("Origin"));

        let allow_origin = origin
            .filter(|_| self.is_allowed(origin))
            .and_then(|origin| HeaderValue::from_str(origin).ok())
            .unwrap_or_else(|| HeaderValue::from_static("null"));
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        let allow_headers = requested_headers
            .filter(|value| !value.is_empty())
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_ALLOWED_HEADERS));
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, allow_headers);
        headers.insert(
            ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static(EXPOSED_HEADERS),
        );
        headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(MAX_AGE_SECS));
    }
}

/// CORS negotiation middleware
pub async fn negotiate(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let requested_headers = request.headers().get(ACCESS_CONTROL_REQUEST_HEADERS).cloned();
    let allowed = state.cors.is_allowed(origin.as_deref());

    let mut response = if request.method() == Method::OPTIONS {
        let status = if allowed {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::FORBIDDEN
        };
        (status, Body::empty()).into_response()
    } else if !allowed {
        tracing::warn!(
            origin = origin.as_deref().unwrap_or("<none>"),
            uri = %request.uri(),
            "origin not allowed"
        );
        ServerError::OriginNotAllowed.into_response()
    } else {
        next.run(request).await
    };

    state
        .cors
        .apply(origin.as_deref(), requested_headers.as_ref(), response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_matching() {
        let policy = CorsPolicy::new(["https://site.example/", "HTTPS://Other.example"]);
        assert!(policy.is_allowed(Some("https://site.example")));
        assert!(policy.is_allowed(Some("https://other.example")));
        assert!(!policy.is_allowed(Some("https://evil.example")));
        assert!(!policy.is_allowed(None));
        assert!(!policy.is_allowed(Some("null")));
    }

    #[test]
    fn wildcard_still_requires_an_origin() {
        let policy = CorsPolicy::new(["*"]);
        assert!(policy.is_allowed(Some("https://anything.example")));
        assert!(!policy.is_allowed(None));
    }

    #[test]
    fn echoes_requested_headers() {
        let policy = CorsPolicy::new(["https://site.example"]);
        let mut headers = HeaderMap::new();
        let requested = HeaderValue::from_static("content-type, x-trace-token");
        policy.apply(Some("https://site.example"), Some(&requested), &mut headers);

        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "https://site.example");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_HEADERS], "content-type, x-trace-token");
        assert_eq!(headers[VARY], "Origin");
        assert_eq!(headers[ACCESS_CONTROL_MAX_AGE], "86400");
    }

    #[test]
    fn disallowed_origin_gets_null() {
        let policy = CorsPolicy::new(["https://site.example"]);
        let mut headers = HeaderMap::new();
        policy.apply(Some("https://evil.example"), None, &mut headers);
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "null");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_HEADERS], DEFAULT_ALLOWED_HEADERS);
    }
}
