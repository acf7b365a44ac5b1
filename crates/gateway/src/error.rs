use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// The error taxonomy (§7). Variant names track the wire `type` string one-to-one
/// except for the `snake_case` rendering, which `error_type()` produces.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("authentication failed: {0}")]
    AuthError(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("capability error: {0}")]
    CapabilityError(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("upstream error: {0}")]
    UpstreamError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    /// An internal invariant was violated (e.g. a tool delta referenced an
    /// index that was already closed). Logged with a full state dump by the
    /// caller before being converted into a response.
    #[error("translator error: {0}")]
    TranslatorError(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::AuthError(_) => StatusCode::UNAUTHORIZED,
            Self::ModelNotFound(_) => StatusCode::NOT_FOUND,
            Self::CapabilityError(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            Self::ConnectionError(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::TranslatorError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::AuthError(_) => "auth_error",
            Self::ModelNotFound(_) => "model_not_found",
            Self::CapabilityError(_) => "capability_error",
            Self::RateLimited(_) => "rate_limited",
            Self::UpstreamError(_) => "upstream_error",
            Self::ConnectionError(_) => "connection_error",
            Self::TranslatorError(_) => "translator_error",
        }
    }

    /// The message surfaced to the client, distinct from `Display` in case we
    /// ever want to redact detail server-side while logging the full error.
    pub fn client_message(&self) -> String {
        self.to_string()
    }

    /// The same payload shape used for the pre-`message_start` HTTP error
    /// response and for the mid-stream SSE `error` event (§7 propagation
    /// policy): `{error:{type,message}}`.
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetails {
                kind: self.error_type(),
                message: self.client_message(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetails,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetails {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if matches!(self, Self::TranslatorError(_)) {
            log::error!(target: "gateway::translator", "translator invariant violated: {self}");
        }
        (self.status_code(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s5_upstream_auth_error_maps_to_401_with_plain_json_body() {
        // S5: a 401 from the upstream surfaces as a 401 with a plain JSON
        // error body, never as SSE framing (§7: errors discovered before
        // `message_start` use plain HTTP status + body, not an event).
        let err = GatewayError::AuthError("invalid api key".into());
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.error_type(), "auth_error");

        let body = err.body();
        assert_eq!(body.error.kind, "auth_error");
        assert_eq!(body.error.message, "authentication failed: invalid api key");
    }
}
