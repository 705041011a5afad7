use std::sync::Arc;
use uuid::Uuid;

use crate::domain::error::PaymentError;
use crate::domain::repository::PaymentMethodRepository;
use crate::domain::types::{MerchantId, PaymentMethodId};

/// Caso de uso: soft-delete de un método de pago.
///
/// La fila se conserva (las transacciones históricas la referencian) pero
/// deja de ser usable para cargos nuevos.
#[derive(Clone)]
pub struct RemovePaymentMethodUseCase {
    payment_method_repo: Arc<dyn PaymentMethodRepository>,
}

impl RemovePaymentMethodUseCase {
    pub fn new(payment_method_repo: Arc<dyn PaymentMethodRepository>) -> Self {
        Self { payment_method_repo }
    }

    #[tracing::instrument(name = "RemovePaymentMethodUseCase::execute", skip(self))]
    pub async fn execute(
        &self,
        merchant_id: Uuid,
        payment_method_id: Uuid,
    ) -> Result<(), PaymentError> {
        let id = PaymentMethodId(payment_method_id);
        let payment_method = self
            .payment_method_repo
            .find_by_id(id)
            .await?
            .ok_or(PaymentError::PaymentMethodNotFound(id))?;

        if payment_method.merchant_id() != MerchantId(merchant_id) {
            return Err(PaymentError::PaymentMethodNotFound(id));
        }
        if payment_method.is_deleted() {
            return Ok(()); // borrar dos veces es un no-op
        }

        self.payment_method_repo.soft_delete(id).await
    }
}
