use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Gateway errors with their surfaced code and HTTP status.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed or non-object request body.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or unrecognized client API key.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// The presented key may not call this endpoint.
    #[error("API key is not allowed to access endpoint '{0}'")]
    Forbidden(String),

    /// No `(provider, model)` target could be resolved.
    #[error("No route found for model '{0}'")]
    RouteNotFound(String),

    /// Upstream transport failure.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream answered with a non-2xx status; passed through verbatim.
    #[error("Upstream error ({status})")]
    UpstreamError { status: u16, body: String },

    /// Request rejected by the Anthropic request gate.
    #[error("{message}")]
    ClaudeValidation {
        code: &'static str,
        message: String,
        path: String,
    },

    /// Internal error. `Some` messages came from outside and can be shown.
    #[error("Internal server error")]
    Internal(Option<String>),
}

/// Deliberately non-standard status for validation gate rejections, chosen to
/// be distinguishable from upstream 400s.
const VALIDATION_REJECTED: u16 = 430;

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::RouteNotFound(_) => StatusCode::BAD_REQUEST,
            Self::InvalidApiKey => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamError { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::ClaudeValidation { .. } => {
                StatusCode::from_u16(VALIDATION_REJECTED).unwrap_or(StatusCode::BAD_REQUEST)
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The surfaced error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidApiKey => "invalid_api_key",
            Self::Forbidden(_) => "forbidden",
            Self::RouteNotFound(_) => "route_not_found",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::UpstreamError { .. } => "upstream_error",
            Self::ClaudeValidation { .. } => "claude_validation",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Code rendered in HTTP bodies. Validation rejections surface their
    /// specific check code; `claude_validation` is the sink-event type only.
    fn body_code(&self) -> &'static str {
        match self {
            Self::ClaudeValidation { code, .. } => code,
            other => other.code(),
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(Some(message)) => message.clone(),
            Self::Internal(None) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// OpenAI-style error body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    r#type: &'static str,
    code: &'static str,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Upstream bodies pass through untouched.
        if let Self::UpstreamError { body, .. } = self {
            return (status, [(http::header::CONTENT_TYPE, "application/json")], body).into_response();
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                message: self.client_message(),
                r#type: if status.is_server_error() {
                    "api_error"
                } else {
                    "invalid_request_error"
                },
                code: self.body_code(),
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Anthropic-style error body.
#[derive(Debug, Serialize)]
pub struct AnthropicErrorBody {
    r#type: &'static str,
    error: AnthropicErrorDetails,
}

#[derive(Debug, Serialize)]
struct AnthropicErrorDetails {
    r#type: &'static str,
    code: &'static str,
    message: String,
}

/// Error rendered in the Anthropic wire shape.
pub struct AnthropicErrorResponse(pub GatewayError);

impl IntoResponse for AnthropicErrorResponse {
    fn into_response(self) -> Response {
        let status = self.0.status_code();

        if let GatewayError::UpstreamError { body, .. } = self.0 {
            return (status, [(http::header::CONTENT_TYPE, "application/json")], body).into_response();
        }

        let body = AnthropicErrorBody {
            r#type: "error",
            error: AnthropicErrorDetails {
                r#type: if status.is_server_error() {
                    "api_error"
                } else {
                    "invalid_request_error"
                },
                code: self.0.body_code(),
                message: self.0.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}
