use axum::Json;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Response, header};
use uuid::Uuid;

use crate::domain::types::{ChargeRequest, PaymentResponse, validate_idempotency_key};
use crate::error::GatewayError;
use crate::hash;
use crate::infra::processor::StubPaymentProcessor;
use crate::state::AppState;
use crate::usecase::charge::{ChargeInput, ChargeUseCase, payment_id_from_body};
use crate::usecase::get_payment::GetPaymentUseCase;

/// Header carrying the client-supplied idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "X-Idempotency-Key";

/// Header set to "true" when the response was replayed.
pub const IDEMPOTENCY_REPLAYED_HEADER: &str = "X-Idempotency-Replayed";

/// Header returning the request hash for observability and debugging.
pub const IDEMPOTENCY_REQUEST_HASH_HEADER: &str = "X-Idempotency-Request-Hash";

pub async fn charge(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChargeRequest>, JsonRejection>,
) -> Result<Response<Body>, GatewayError> {
    let key = normalized_key(&headers)?;
    let Json(body) = body.map_err(|e| GatewayError::Validation(e.body_text()))?;
    body.validate().map_err(GatewayError::Validation)?;

    // The hash is computed once here; the orchestrator and the record both
    // work with this value.
    let request_hash =
        hash::request_hash(&body).map_err(|e| GatewayError::Internal(e.into()))?;

    let uc = ChargeUseCase {
        store: state.charge_store(),
        cache: state.response_cache(),
        processor: StubPaymentProcessor,
        settings: state.idempotency.clone(),
    };
    let outcome = uc
        .execute(ChargeInput {
            idempotency_key: key.clone(),
            request_hash: request_hash.clone(),
            request: body,
        })
        .await?;

    let mut builder = Response::builder()
        .status(outcome.http_status)
        .header(header::CONTENT_TYPE, "application/json")
        .header(IDEMPOTENCY_KEY_HEADER, &key)
        .header(IDEMPOTENCY_REQUEST_HASH_HEADER, &request_hash);
    if outcome.replayed {
        builder = builder.header(IDEMPOTENCY_REPLAYED_HEADER, "true");
    }
    if outcome.http_status == 201 {
        if let Some(payment_id) = payment_id_from_body(&outcome.body) {
            builder = builder.header(header::LOCATION, format!("/api/payments/{payment_id}"));
        }
    }

    // Replays must return the original body byte-for-byte, so the stored
    // string goes out untouched instead of being re-serialized.
    builder
        .body(Body::from(outcome.body))
        .map_err(|e| GatewayError::Internal(e.into()))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentResponse>, GatewayError> {
    let uc = GetPaymentUseCase {
        repo: state.payment_repo(),
    };
    let response = uc.execute(payment_id).await?;
    Ok(Json(response))
}

fn normalized_key(headers: &HeaderMap) -> Result<String, GatewayError> {
    let raw = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .ok_or(GatewayError::MissingIdempotencyKey)?
        .to_str()
        .map_err(|_| GatewayError::InvalidIdempotencyKey)?
        .trim();
    if raw.is_empty() {
        return Err(GatewayError::MissingIdempotencyKey);
    }
    if !validate_idempotency_key(raw) {
        return Err(GatewayError::InvalidIdempotencyKey);
    }
    Ok(raw.to_owned())
}
