use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::entities::{Transaction, TransactionStatus, TransactionType};
use crate::domain::error::PaymentError;
use crate::domain::repository::{TransactionFilter, TransactionRepository};
use crate::domain::types::{MerchantId, TransactionId};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTransactionsQuery {
    pub customer_id: Option<String>,
    pub group_root: Option<Uuid>,
    pub status: Option<TransactionStatus>,
    pub transaction_type: Option<TransactionType>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Caso de uso para listar transacciones de un comercio con paginación.
#[derive(Clone)]
pub struct ListTransactionsUseCase {
    transaction_repo: Arc<dyn TransactionRepository>,
}

impl ListTransactionsUseCase {
    pub fn new(transaction_repo: Arc<dyn TransactionRepository>) -> Self {
        Self { transaction_repo }
    }

    #[tracing::instrument(name = "ListTransactionsUseCase::execute", skip(self, query))]
    pub async fn execute(
        &self,
        merchant_id: Uuid,
        query: ListTransactionsQuery,
    ) -> Result<Vec<Transaction>, PaymentError> {
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
        if limit < 1 || limit > MAX_LIMIT {
            return Err(PaymentError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_LIMIT
            )));
        }
        let offset = query.offset.unwrap_or(0);
        if offset < 0 {
            return Err(PaymentError::Validation(
                "offset cannot be negative".to_string(),
            ));
        }

        self.transaction_repo
            .list(
                MerchantId(merchant_id),
                TransactionFilter {
                    customer_id: query.customer_id,
                    group_root: query.group_root.map(TransactionId),
                    status: query.status,
                    transaction_type: query.transaction_type,
                    limit,
                    offset,
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::MockTransactionRepository;

    #[tokio::test]
    async fn test_limit_above_cap_is_rejected() {
        let use_case = ListTransactionsUseCase::new(Arc::new(MockTransactionRepository::new()));

        let result = use_case
            .execute(
                Uuid::new_v4(),
                ListTransactionsQuery {
                    limit: Some(1001),
                    ..Default::default()
                },
            )
            .await;

        assert!(matches!(result, Err(PaymentError::Validation(_))));
    }

    #[tokio::test]
    async fn test_defaults_are_applied() {
        let mut tx_repo = MockTransactionRepository::new();
        tx_repo
            .expect_list()
            .withf(|_, filter: &TransactionFilter| filter.limit == 50 && filter.offset == 0)
            .times(1)
            .returning(|_, _| Ok(vec![]));

        let use_case = ListTransactionsUseCase::new(Arc::new(tx_repo));
        let result = use_case
            .execute(Uuid::new_v4(), ListTransactionsQuery::default())
            .await;

        assert!(result.unwrap().is_empty());
    }
}
