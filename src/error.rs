use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Gateway error variants mapped to HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("missing X-Idempotency-Key header")]
    MissingIdempotencyKey,
    #[error("invalid X-Idempotency-Key, allowed: [A-Za-z0-9._:-], max length 128")]
    InvalidIdempotencyKey,
    #[error("bad request: {0}")]
    Validation(String),
    #[error("idempotency key '{0}' was already used with a different request payload")]
    HashConflict(String),
    #[error("idempotency key '{0}' is currently being processed, retry with the same key")]
    InProgressConflict(String),
    #[error("payment not found")]
    PaymentNotFound,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingIdempotencyKey | Self::InvalidIdempotencyKey | Self::Validation(_) => {
                "VALIDATION_ERROR"
            }
            Self::HashConflict(_) | Self::InProgressConflict(_) => "CONFLICT",
            Self::PaymentNotFound => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::MissingIdempotencyKey | Self::InvalidIdempotencyKey | Self::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::HashConflict(_) | Self::InProgressConflict(_) => StatusCode::CONFLICT,
            Self::PaymentNotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Log 500s only — TraceLayer already records method/uri/status for all
        // requests, and 4xx are expected client errors.
        if let Self::Internal(ref e) = self {
            tracing::error!(error = %e, kind = "INTERNAL", "internal error");
        }
        let body = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}

/// Failure of a persistence operation.
///
/// `UniqueViolation` is the one case callers branch on: a losing race on
/// the `(scope, key)` or `payments.idempotency_key` unique constraints is
/// resolved by retrying the read path, never surfaced to the client.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violation")]
    UniqueViolation,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Failure to publish an event to the bus. Never surfaces to clients; the
/// dispatcher records it on the row and schedules a retry.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct BusError(pub String);
