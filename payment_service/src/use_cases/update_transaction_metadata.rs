use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::entities::Transaction;
use crate::domain::error::PaymentError;
use crate::domain::repository::TransactionRepository;
use crate::domain::types::{MerchantId, TransactionId};

/// Caso de uso: actualizar la metadata de una transacción.
///
/// Es la ÚNICA mutación permitida sobre una fila terminal; los campos
/// financieros y de desenlace son inmutables una vez escritos.
#[derive(Clone)]
pub struct UpdateTransactionMetadataUseCase {
    transaction_repo: Arc<dyn TransactionRepository>,
}

impl UpdateTransactionMetadataUseCase {
    pub fn new(transaction_repo: Arc<dyn TransactionRepository>) -> Self {
        Self { transaction_repo }
    }

    #[tracing::instrument(name = "UpdateTransactionMetadataUseCase::execute", skip(self, metadata))]
    pub async fn execute(
        &self,
        merchant_id: Uuid,
        transaction_id: Uuid,
        metadata: Value,
    ) -> Result<Transaction, PaymentError> {
        if !metadata.is_object() {
            return Err(PaymentError::Validation(
                "metadata must be a JSON object".to_string(),
            ));
        }

        let id = TransactionId(transaction_id);
        let transaction = self
            .transaction_repo
            .find_by_id(id)
            .await?
            .ok_or(PaymentError::TransactionNotFound(id))?;

        if transaction.merchant_id() != MerchantId(merchant_id) {
            return Err(PaymentError::TransactionNotFound(id));
        }

        self.transaction_repo.update_metadata(id, metadata).await
    }
}
