use uuid::Uuid;

use crate::domain::repository::PaymentRepository;
use crate::domain::types::{Payment, PaymentResponse};
use crate::error::{GatewayError, StoreError};

pub struct GetPaymentUseCase<R: PaymentRepository> {
    pub repo: R,
}

impl<R: PaymentRepository> GetPaymentUseCase<R> {
    pub async fn execute(&self, payment_id: Uuid) -> Result<PaymentResponse, GatewayError> {
        let payment: Payment = self
            .repo
            .find_by_id(payment_id)
            .await
            .map_err(|e| match e {
                StoreError::Backend(e) => GatewayError::Internal(e),
                StoreError::UniqueViolation => {
                    GatewayError::Internal(anyhow::anyhow!("unexpected unique violation on read"))
                }
            })?
            .ok_or(GatewayError::PaymentNotFound)?;
        Ok(PaymentResponse::from_payment(&payment))
    }
}
