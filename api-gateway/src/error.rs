//! Gateway error taxonomy
//!
//! Every failure class callers need to tell apart surfaces as its own
//! variant with a stable HTTP status and error code, so automated clients
//! can distinguish "retry later" (circuit open, rate limited) from "fix your
//! request" from "server fault" without reading logs.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("rate limit of {limit} exceeded")]
    RateLimited {
        limit: u32,
        reset_at: DateTime<Utc>,
    },

    #[error("circuit open for '{service}', retry in {retry_after_secs}s")]
    CircuitOpen {
        service: String,
        retry_after_secs: u64,
    },

    #[error("no healthy instance for service '{service}'")]
    NoHealthyInstance { service: String },

    #[error("retries exhausted for '{service}' after {attempts} attempts")]
    RetriesExhausted {
        service: String,
        attempts: u32,
        #[source]
        source: Box<GatewayError>,
    },

    #[error("dependency '{service}' returned {status}: {message}")]
    Dependency {
        service: String,
        status: u16,
        message: String,
    },

    #[error("deadline exceeded calling '{service}'")]
    Timeout { service: String },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Wire shape of every error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CircuitOpen { .. } | GatewayError::NoHealthyInstance { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::RetriesExhausted { .. } => StatusCode::BAD_GATEWAY,
            // Downstream statuses surface verbatim; anything unmappable is a
            // gateway-side fault
            GatewayError::Dependency { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized(_) => "UNAUTHORIZED",
            GatewayError::Validation(_) => "VALIDATION_ERROR",
            GatewayError::RateLimited { .. } => "RATE_LIMITED",
            GatewayError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            GatewayError::NoHealthyInstance { .. } => "NO_HEALTHY_INSTANCE",
            GatewayError::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            GatewayError::Dependency { .. } => "DEPENDENCY_ERROR",
            GatewayError::Timeout { .. } => "TIMEOUT",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Structured metadata clients can act on without parsing the message
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            GatewayError::RateLimited { limit, reset_at } => Some(serde_json::json!({
                "limit": limit,
                "reset_at": reset_at.to_rfc3339(),
            })),
            GatewayError::CircuitOpen {
                service,
                retry_after_secs,
            } => Some(serde_json::json!({
                "service": service,
                "retry_after_secs": retry_after_secs,
            })),
            GatewayError::RetriesExhausted {
                service,
                attempts,
                source,
            } => Some(serde_json::json!({
                "service": service,
                "attempts": attempts,
                "last_error": source.to_string(),
            })),
            GatewayError::NoHealthyInstance { service }
            | GatewayError::Timeout { service } => Some(serde_json::json!({
                "service": service,
            })),
            _ => None,
        }
    }

    pub fn to_response_body(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                details: self.details(),
            },
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        GatewayError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());

        match self {
            GatewayError::CircuitOpen {
                retry_after_secs, ..
            } => {
                builder.insert_header(("Retry-After", retry_after_secs.to_string()));
            }
            GatewayError::RateLimited { reset_at, .. } => {
                let wait = (*reset_at - Utc::now()).num_seconds().max(0);
                builder.insert_header(("Retry-After", wait.to_string()));
                builder.insert_header(("X-RateLimit-Reset", reset_at.timestamp().to_string()));
            }
            _ => {}
        }

        builder.json(self.to_response_body())
    }
}

impl From<service_registry::RegistryError> for GatewayError {
    fn from(err: service_registry::RegistryError) -> Self {
        match err {
            service_registry::RegistryError::NoHealthyInstance(service) => {
                GatewayError::NoHealthyInstance { service }
            }
        }
    }
}

impl From<rate_limit::RateLimitError> for GatewayError {
    fn from(err: rate_limit::RateLimitError) -> Self {
        match err {
            rate_limit::RateLimitError::Exceeded { limit, reset_at } => {
                GatewayError::RateLimited { limit, reset_at }
            }
            // A dead counter store must not take the gateway down; callers
            // fail open before this conversion, so reaching it is a bug
            rate_limit::RateLimitError::Store(e) => GatewayError::Internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_maps_to_a_stable_status_and_code() {
        let cases: Vec<(GatewayError, StatusCode, &str)> = vec![
            (
                GatewayError::Unauthorized("no token".into()),
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
            ),
            (
                GatewayError::Validation("query empty".into()),
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
            ),
            (
                GatewayError::RateLimited {
                    limit: 60,
                    reset_at: Utc::now(),
                },
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
            ),
            (
                GatewayError::CircuitOpen {
                    service: "graph-search".into(),
                    retry_after_secs: 12,
                },
                StatusCode::SERVICE_UNAVAILABLE,
                "CIRCUIT_OPEN",
            ),
            (
                GatewayError::NoHealthyInstance {
                    service: "auth".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
                "NO_HEALTHY_INSTANCE",
            ),
            (
                GatewayError::Timeout {
                    service: "embeddings".into(),
                },
                StatusCode::GATEWAY_TIMEOUT,
                "TIMEOUT",
            ),
            (
                GatewayError::Internal("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
            ),
        ];

        for (error, status, code) in cases {
            assert_eq!(error.status_code(), status, "{error}");
            assert_eq!(error.error_code(), code, "{error}");
        }
    }

    #[test]
    fn dependency_status_passes_through() {
        let not_found = GatewayError::Dependency {
            service: "graph-search".into(),
            status: 404,
            message: "entity missing".into(),
        };
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let server_fault = GatewayError::Dependency {
            service: "graph-search".into(),
            status: 503,
            message: "overloaded".into(),
        };
        assert_eq!(server_fault.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn retries_exhausted_wraps_the_last_failure() {
        let err = GatewayError::RetriesExhausted {
            service: "graph-search".into(),
            attempts: 3,
            source: Box::new(GatewayError::Dependency {
                service: "graph-search".into(),
                status: 502,
                message: "bad gateway".into(),
            }),
        };

        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        let body = err.to_response_body();
        assert_eq!(body.error.code, "RETRIES_EXHAUSTED");
        let details = body.error.details.unwrap();
        assert_eq!(details["attempts"], 3);
    }

    #[test]
    fn rate_limited_body_carries_reset_metadata() {
        let reset_at = Utc::now() + chrono::Duration::seconds(30);
        let err = GatewayError::RateLimited {
            limit: 60,
            reset_at,
        };

        let body = err.to_response_body();
        let details = body.error.details.unwrap();
        assert_eq!(details["limit"], 60);
        assert!(details["reset_at"].is_string());
    }
}
