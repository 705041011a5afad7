use std::sync::Arc;
use uuid::Uuid;

use crate::domain::entities::Transaction;
use crate::domain::error::PaymentError;
use crate::domain::repository::TransactionRepository;
use crate::domain::types::{MerchantId, TransactionId};

/// Caso de uso para obtener los detalles de una única transacción.
///
/// El comercio del contexto del llamador debe ser el dueño de la fila; una
/// transacción de otro comercio se reporta como inexistente para no filtrar
/// su existencia.
#[derive(Clone)]
pub struct GetTransactionUseCase {
    transaction_repo: Arc<dyn TransactionRepository>,
}

impl GetTransactionUseCase {
    pub fn new(transaction_repo: Arc<dyn TransactionRepository>) -> Self {
        Self { transaction_repo }
    }

    #[tracing::instrument(name = "GetTransactionUseCase::execute", skip(self))]
    pub async fn execute(
        &self,
        merchant_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Transaction, PaymentError> {
        let id = TransactionId(transaction_id);
        let transaction = self
            .transaction_repo
            .find_by_id(id)
            .await?
            .ok_or(PaymentError::TransactionNotFound(id))?;

        if transaction.merchant_id() != MerchantId(merchant_id) {
            return Err(PaymentError::TransactionNotFound(id));
        }

        Ok(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{TransactionStatus, TransactionType};
    use crate::domain::repository::MockTransactionRepository;
    use crate::use_cases::test_support::{stored_transaction, timeline};

    #[tokio::test]
    async fn test_returns_own_transaction() {
        let merchant_id = MerchantId::new();
        let transaction = stored_transaction(
            merchant_id,
            TransactionType::SALE,
            TransactionStatus::APPROVED,
            9900,
            None,
            Some("GUID"),
            timeline(0),
        );
        let id = transaction.id();

        let mut tx_repo = MockTransactionRepository::new();
        tx_repo
            .expect_find_by_id()
            .returning(move |_| Ok(Some(transaction.clone())));

        let use_case = GetTransactionUseCase::new(Arc::new(tx_repo));
        let result = use_case.execute(merchant_id.0, id.0).await.unwrap();

        assert_eq!(result.id(), id);
    }

    #[tokio::test]
    async fn test_foreign_transaction_reads_as_not_found() {
        let transaction = stored_transaction(
            MerchantId::new(),
            TransactionType::SALE,
            TransactionStatus::APPROVED,
            9900,
            None,
            Some("GUID"),
            timeline(0),
        );
        let id = transaction.id();

        let mut tx_repo = MockTransactionRepository::new();
        tx_repo
            .expect_find_by_id()
            .returning(move |_| Ok(Some(transaction.clone())));

        let use_case = GetTransactionUseCase::new(Arc::new(tx_repo));
        let result = use_case.execute(Uuid::new_v4(), id.0).await;

        assert!(matches!(
            result,
            Err(PaymentError::TransactionNotFound(_))
        ));
    }
}
