//! Shared HTTP API plumbing for the gateway, document, and vector services.
//!
//! Every error response follows one envelope:
//!
//! ```json
//! { "detail": "document not found", "code": "not_found" }
//! ```
//!
//! Validation errors may carry a `fields` map with per-field reasons. Status
//! codes follow the platform taxonomy: 400 validation, 401 authentication,
//! 403 authorization, 404 not found, 409 conflict, 429 rate limited,
//! 502 upstream failure, 504 upstream timeout, 500 internal.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;

/// JSON error body shared by all services.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

/// Error type that converts into an HTTP response with the shared envelope.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
    pub code: Option<String>,
    pub fields: Option<BTreeMap<String, String>>,
    /// Extra headers, e.g. Retry-After on 429.
    pub headers: Vec<(&'static str, String)>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
            code: Some(code.to_string()),
            fields: None,
            headers: Vec::new(),
        }
    }

    pub fn with_fields(mut self, fields: BTreeMap<String, String>) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_header(mut self, name: &'static str, value: String) -> Self {
        self.headers.push((name, value));
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            detail: self.detail,
            code: self.code,
            fields: self.fields,
        };
        let mut response = (self.status, Json(body)).into_response();
        for (name, value) in self.headers {
            if let Ok(value) = HeaderValue::from_str(&value) {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

pub fn bad_request(detail: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "validation", detail)
}

pub fn unauthorized(detail: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::UNAUTHORIZED, "authentication", detail)
}

pub fn forbidden(detail: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::FORBIDDEN, "authorization", detail)
}

pub fn not_found(detail: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "not_found", detail)
}

pub fn conflict(detail: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::CONFLICT, "conflict", detail)
}

pub fn rate_limited(retry_after_secs: u64) -> ApiError {
    ApiError::new(
        StatusCode::TOO_MANY_REQUESTS,
        "rate_limited",
        "rate limit exceeded",
    )
    .with_header("retry-after", retry_after_secs.to_string())
}

pub fn upstream_timeout(detail: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::GATEWAY_TIMEOUT, "upstream_timeout", detail)
}

pub fn upstream_failure(detail: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::BAD_GATEWAY, "upstream_failure", detail)
}

pub fn service_unavailable(detail: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "unavailable", detail)
}

/// 500 with internals suppressed unless debug is on.
pub fn internal_error(err: &anyhow::Error, debug: bool) -> ApiError {
    let detail = if debug {
        format!("{err:#}")
    } else {
        "internal server error".to_string()
    };
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_omits_empty_optionals() {
        let body = ErrorBody {
            detail: "nope".to_string(),
            code: None,
            fields: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"detail":"nope"}"#);
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let err = rate_limited(42);
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.headers[0].0, "retry-after");
        assert_eq!(err.headers[0].1, "42");
    }

    #[test]
    fn internal_error_suppresses_detail_outside_debug() {
        let err = anyhow::anyhow!("connection string leaked");
        let resp = internal_error(&err, false);
        assert_eq!(resp.detail, "internal server error");
        let verbose = internal_error(&err, true);
        assert!(verbose.detail.contains("leaked"));
    }
}
