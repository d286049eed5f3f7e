use crate::domain::repository::PaymentProcessor;
use crate::domain::types::{ChargeRequest, Payment};

/// Deterministic processor for local development and tests: always
/// authorizes. A real PSP integration must be idempotent on the key and
/// record its outcome before the transaction commits.
#[derive(Clone, Copy, Default)]
pub struct StubPaymentProcessor;

impl PaymentProcessor for StubPaymentProcessor {
    async fn authorize(
        &self,
        idempotency_key: &str,
        request: &ChargeRequest,
    ) -> anyhow::Result<Payment> {
        Ok(Payment::authorized(idempotency_key, request))
    }
}
