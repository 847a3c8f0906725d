//! API error wrapper with the service's stable wire shape
//! `{error, code?, details?}`.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use torva_data::DataError;
use tracing::error;

/// Stable machine-readable error codes surfaced to clients.
pub mod codes {
    /// Access token expired; the client should refresh and retry.
    pub const TOKEN_EXPIRED: &str = "TOKEN_EXPIRED";
    /// The plan's concurrent-download ceiling is reached.
    pub const CONCURRENT_LIMIT: &str = "CONCURRENT_LIMIT";
    /// The plan's monthly transfer allowance is exhausted.
    pub const BANDWIDTH_LIMIT: &str = "BANDWIDTH_LIMIT";
    /// A record for this infohash already exists.
    pub const TORRENT_EXISTS: &str = "TORRENT_EXISTS";
    /// The fixed-window request limit was exceeded.
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Structured API error; converts into the service's JSON error shape.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: String,
    code: Option<&'static str>,
    details: Option<String>,
    retry_after: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            error: message.into(),
            code: None,
            details: None,
            retry_after: None,
        }
    }

    /// Attach a stable machine-readable code.
    #[must_use]
    pub const fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach free-form detail text.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// 400 with a validation message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// 401 with a message.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    /// 403 with a message.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    /// 404 with a message.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// 409 with a message.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// 410 for expired or exhausted download tokens.
    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GONE, message)
    }

    /// 416 for unsatisfiable range requests.
    pub fn range_not_satisfiable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::RANGE_NOT_SATISFIABLE, message)
    }

    /// 429 with `Retry-After` advice in seconds.
    #[must_use]
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        let mut err = Self::new(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded")
            .with_code(codes::RATE_LIMITED);
        err.retry_after = Some(retry_after_secs.max(1));
        err
    }

    /// 503 when a collaborator is not configured.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    /// 500 with an opaque body; the underlying fault is logged, never
    /// surfaced.
    pub fn internal(source: impl std::fmt::Display) -> Self {
        error!(error = %source, "internal server error");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }

    /// Status code this error renders with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<DataError> for ApiError {
    fn from(source: DataError) -> Self {
        Self::internal(source)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.error,
            code: self.code,
            details: self.details,
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(seconds) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_pick_expected_statuses() {
        assert_eq!(ApiError::bad_request("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::unauthorized("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::gone("x").status(), StatusCode::GONE);
        assert_eq!(
            ApiError::range_not_satisfiable("x").status(),
            StatusCode::RANGE_NOT_SATISFIABLE
        );
        assert_eq!(
            ApiError::rate_limited(60).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(ApiError::unavailable("x").status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn rate_limited_sets_retry_after_header() {
        let response = ApiError::rate_limited(17).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(RETRY_AFTER).and_then(|v| v.to_str().ok()),
            Some("17")
        );
    }

    #[test]
    fn internal_error_body_is_opaque() {
        let response = ApiError::internal("secret database detail").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
