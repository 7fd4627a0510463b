//! The HTTP-facing error type. Every handler returns `Result<T, ApiError>`;
//! `ApiError` wraps the shared taxonomy (spec §7) plus a handful of
//! request-shape problems the core crate never sees (malformed JSON body,
//! missing confirmation, unauthenticated request), and implements
//! `IntoResponse` once, centrally, rather than per handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use shepherd_core::error::{Error as CoreError, ErrorClass};
use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum ApiError {
    #[snafu(display("{source}"))]
    Core { source: CoreError },

    #[snafu(display("{source}"))]
    Store { source: shepherd_store::error::Error },

    #[snafu(display("{source}"))]
    Queue { source: shepherd_queue::error::Error },

    #[snafu(display("request body is not valid JSON: {message}"))]
    MalformedBody { message: String },

    #[snafu(display("no credential was presented"))]
    Unauthenticated,

    #[snafu(display("credential could not be resolved to an identity: {message}"))]
    IdentityResolution { message: String },

    #[snafu(display("vnc token is invalid: {message}"))]
    InvalidVncToken { message: String },

    #[snafu(display("vnc token has already been used"))]
    VncTokenReplayed,
}

impl From<CoreError> for ApiError {
    fn from(source: CoreError) -> Self {
        Self::Core { source }
    }
}

impl From<shepherd_store::error::Error> for ApiError {
    fn from(source: shepherd_store::error::Error) -> Self {
        match source.into_domain() {
            CoreError::NotFound { what } => Self::Core {
                source: CoreError::NotFound { what },
            },
            other => Self::Core { source: other },
        }
    }
}

impl From<shepherd_queue::error::Error> for ApiError {
    fn from(source: shepherd_queue::error::Error) -> Self {
        Self::Queue { source }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    /// The granular string code named in spec §6 ("paired with HTTP
    /// status"). One code per core error variant, plus the API-local
    /// variants above.
    fn code(&self) -> &'static str {
        match self {
            Self::Core { source } => match source {
                CoreError::Validation { .. } => "VALIDATION_FAILED",
                CoreError::ForbiddenField { .. } => "FORBIDDEN_FIELD",
                CoreError::MissingCapability { .. } => "MISSING_CAPABILITY",
                CoreError::ResourceNotVisible => "NOT_FOUND",
                CoreError::DuplicatePendingRequest { .. } => "DUPLICATE_PENDING_REQUEST",
                CoreError::NameCollision { .. } => "NAME_COLLISION",
                CoreError::Precondition { .. } => "PRECONDITION_FAILED",
                CoreError::EnvironmentMismatch { .. } => "ENVIRONMENT_MISMATCH",
                CoreError::DeletionBlocked { .. } => "DELETION_BLOCKED",
                CoreError::TransientInfra { .. } => "TRANSIENT_INFRA_ERROR",
                CoreError::PermanentInfra { .. } => "INTERNAL_ERROR",
                CoreError::CriticalDiscrepancy { .. } => "INTERNAL_ERROR",
                CoreError::NotFound { .. } => "NOT_FOUND",
                CoreError::Throttled { .. } => "RATE_LIMITED",
            },
            Self::Store { .. } | Self::Queue { .. } => "INTERNAL_ERROR",
            Self::MalformedBody { .. } => "MALFORMED_BODY",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::IdentityResolution { .. } => "UNAUTHENTICATED",
            Self::InvalidVncToken { .. } => "VNC_TOKEN_INVALID",
            Self::VncTokenReplayed => "VNC_TOKEN_REPLAYED",
        }
    }

    /// Maps the shared `ErrorClass` (and the API-local variants) onto an
    /// HTTP status once, centrally (spec §7's propagation policy). A
    /// resource invisible to the caller is indistinguishable from "absent" —
    /// both surface as 404, per spec §4.1.
    fn status(&self) -> StatusCode {
        match self {
            Self::Core { source } => match source.class() {
                ErrorClass::Validation => StatusCode::BAD_REQUEST,
                ErrorClass::Authorization => match source {
                    CoreError::ResourceNotVisible => StatusCode::NOT_FOUND,
                    _ => StatusCode::FORBIDDEN,
                },
                ErrorClass::Conflict => StatusCode::CONFLICT,
                ErrorClass::Precondition => StatusCode::PRECONDITION_FAILED,
                ErrorClass::TransientInfra => match source {
                    CoreError::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
                    _ => StatusCode::SERVICE_UNAVAILABLE,
                },
                ErrorClass::PermanentInfra => match source {
                    CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                },
                ErrorClass::CriticalDiscrepancy => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Store { .. } | Self::Queue { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MalformedBody { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::IdentityResolution { .. } => StatusCode::UNAUTHORIZED,
            Self::InvalidVncToken { .. } => StatusCode::UNAUTHORIZED,
            Self::VncTokenReplayed => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status() == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed with an internal error");
        }
        let retry_after = match &self {
            Self::Core {
                source: CoreError::Throttled { retry_after_seconds },
            } => Some(*retry_after_seconds),
            _ => None,
        };
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
        };
        let mut response = (self.status(), Json(body)).into_response();
        if let Some(seconds) = retry_after {
            if let Ok(value) = axum::http::HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub type Result<T, E = ApiError> = std::result::Result<T, E>;
