use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entities::{Transaction, TransactionType};
use crate::domain::error::PaymentError;
use crate::domain::repository::{GroupGuard, TransactionFilter, TransactionRepository};
use crate::domain::types::{MerchantId, TransactionId};
use crate::infrastructure::persistence::models::TransactionModel;
use crate::infrastructure::persistence::{
    with_query_timeout, ID_LOOKUP_TIMEOUT, LIST_TIMEOUT, REPORT_TIMEOUT,
};

/// Repositorio de transacciones implementado para PostgreSQL.
///
/// Las escrituras son cortas por diseño: nunca se abre una transacción de
/// BD alrededor de una llamada al gateway. La variante `save_guarded` toma
/// un advisory lock transaccional por grupo y re-valida el invariante de
/// monto justo antes del INSERT, para que dos capturas concurrentes no
/// puedan exceder el monto autorizado.
pub struct PostgresTransactionRepository {
    pool: PgPool,
}

impl PostgresTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_insert_error(e: sqlx::Error) -> PaymentError {
        if let Some(db_error) = e.as_database_error() {
            if let Some(constraint) = db_error.constraint() {
                if constraint == "transactions_idempotency_key" {
                    return PaymentError::IdempotencyConflict(
                        "idempotency key already used by another transaction".to_string(),
                    );
                }
                if constraint.contains("parent") {
                    return PaymentError::Validation(
                        "parent transaction must belong to the same merchant and currency"
                            .to_string(),
                    );
                }
            }
        }
        PaymentError::RepositoryError(e.to_string())
    }

    async fn insert_model(
        executor: impl sqlx::PgExecutor<'_>,
        model: &TransactionModel,
    ) -> Result<TransactionModel, sqlx::Error> {
        sqlx::query_as::<_, TransactionModel>(
            r#"
            INSERT INTO transactions (
                id, merchant_id, customer_id, payment_method_id, parent_transaction_id,
                amount, currency, transaction_type, status, gateway_token,
                parent_gateway_token, gateway_tran_nbr, auth_code, avs_result, cvv_result,
                response_text, idempotency_key, metadata, created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20
            )
            RETURNING *
            "#,
        )
        .bind(model.id)
        .bind(model.merchant_id)
        .bind(&model.customer_id)
        .bind(model.payment_method_id)
        .bind(model.parent_transaction_id)
        .bind(model.amount)
        .bind(&model.currency)
        .bind(model.transaction_type)
        .bind(model.status)
        .bind(&model.gateway_token)
        .bind(&model.parent_gateway_token)
        .bind(&model.gateway_tran_nbr)
        .bind(&model.auth_code)
        .bind(&model.avs_result)
        .bind(&model.cvv_result)
        .bind(&model.response_text)
        .bind(&model.idempotency_key)
        .bind(&model.metadata)
        .bind(model.created_at)
        .bind(model.updated_at)
        .fetch_one(executor)
        .await
    }
}

#[async_trait]
impl TransactionRepository for PostgresTransactionRepository {
    async fn save(&self, transaction: Transaction) -> Result<Transaction, PaymentError> {
        let model = TransactionModel::from(&transaction);

        let saved = match tokio::time::timeout(
            ID_LOOKUP_TIMEOUT,
            Self::insert_model(&self.pool, &model),
        )
        .await
        {
            Ok(result) => result.map_err(Self::map_insert_error)?,
            Err(_) => {
                return Err(PaymentError::RepositoryError(
                    "transactions.save timed out".to_string(),
                ))
            }
        };

        Transaction::try_from(saved)
    }

    async fn save_guarded(
        &self,
        transaction: Transaction,
        guard: GroupGuard,
    ) -> Result<Transaction, PaymentError> {
        let model = TransactionModel::from(&transaction);

        let write = async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;

            // Serializa las escrituras del grupo; el lock vive solo lo que
            // dura esta transacción de BD, nunca a través de I/O externo.
            sqlx::query(r#"SELECT pg_advisory_xact_lock(hashtextextended($1, 0))"#)
                .bind(guard.group_root.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;

            if let Some(recheck) = &guard.recheck {
                let (already_applied,): (i64,) = sqlx::query_as(
                    r#"
                    SELECT COALESCE(SUM(amount), 0)::BIGINT
                    FROM transactions
                    WHERE parent_transaction_id = $1
                      AND transaction_type = $2
                      AND status = 'APPROVED'
                    "#,
                )
                .bind(recheck.parent_id.0)
                .bind(recheck.kind)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;

                // La fila nueva solo cuenta contra el tope si es del mismo
                // tipo que se está sumando; un void usa cap = 0 para exigir
                // que no exista ninguna fila aprobada de ese tipo.
                let contribution = if model.transaction_type == recheck.kind {
                    model.amount
                } else {
                    0
                };

                if already_applied + contribution > recheck.cap.minor_units() {
                    return Err(match model.transaction_type {
                        TransactionType::CAPTURE => PaymentError::CannotCapture {
                            reason: "exceeds_authorized".to_string(),
                        },
                        TransactionType::REFUND => PaymentError::CannotRefund {
                            reason: "exceeds_refundable".to_string(),
                        },
                        TransactionType::VOID => PaymentError::CannotVoid {
                            reason: if recheck.kind == TransactionType::CAPTURE {
                                "already_captured".to_string()
                            } else {
                                "already_refunded".to_string()
                            },
                        },
                        _ => PaymentError::Internal(
                            "amount recheck on unexpected transaction type".to_string(),
                        ),
                    });
                }
            }

            let inserted = Self::insert_model(&mut *tx, &model)
                .await
                .map_err(Self::map_insert_error)?;

            tx.commit()
                .await
                .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;
            Ok(inserted)
        };

        let saved = match tokio::time::timeout(LIST_TIMEOUT, write).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(PaymentError::RepositoryError(
                    "transactions.save_guarded timed out".to_string(),
                ))
            }
        };

        Transaction::try_from(saved)
    }

    async fn find_by_id(
        &self,
        id: TransactionId,
    ) -> Result<Option<Transaction>, PaymentError> {
        let model_opt = with_query_timeout(
            ID_LOOKUP_TIMEOUT,
            "transactions.find_by_id",
            sqlx::query_as::<_, TransactionModel>(
                r#"SELECT * FROM transactions WHERE id = $1"#,
            )
            .bind(id.0)
            .fetch_optional(&self.pool),
        )
        .await?;

        model_opt.map(Transaction::try_from).transpose()
    }

    async fn find_group_root(
        &self,
        id: TransactionId,
    ) -> Result<TransactionId, PaymentError> {
        let root: Option<(Uuid,)> = with_query_timeout(
            ID_LOOKUP_TIMEOUT,
            "transactions.find_group_root",
            sqlx::query_as(
                r#"
                WITH RECURSIVE up AS (
                    SELECT id, parent_transaction_id FROM transactions WHERE id = $1
                    UNION ALL
                    SELECT t.id, t.parent_transaction_id
                    FROM transactions t
                    JOIN up ON t.id = up.parent_transaction_id
                )
                SELECT id FROM up WHERE parent_transaction_id IS NULL
                "#,
            )
            .bind(id.0)
            .fetch_optional(&self.pool),
        )
        .await?;

        root.map(|(id,)| TransactionId(id))
            .ok_or(PaymentError::TransactionNotFound(id))
    }

    async fn find_tree(
        &self,
        root: TransactionId,
    ) -> Result<Vec<Transaction>, PaymentError> {
        let models = with_query_timeout(
            LIST_TIMEOUT,
            "transactions.find_tree",
            sqlx::query_as::<_, TransactionModel>(
                r#"
                WITH RECURSIVE tree AS (
                    SELECT * FROM transactions WHERE id = $1
                    UNION ALL
                    SELECT t.*
                    FROM transactions t
                    JOIN tree ON t.parent_transaction_id = tree.id
                )
                SELECT * FROM tree ORDER BY created_at ASC, id ASC
                "#,
            )
            .bind(root.0)
            .fetch_all(&self.pool),
        )
        .await?;

        models.into_iter().map(Transaction::try_from).collect()
    }

    async fn list(
        &self,
        merchant_id: MerchantId,
        filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, PaymentError> {
        let models = with_query_timeout(
            REPORT_TIMEOUT,
            "transactions.list",
            sqlx::query_as::<_, TransactionModel>(
                r#"
                SELECT * FROM transactions
                WHERE merchant_id = $1
                  AND ($2::TEXT IS NULL OR customer_id = $2)
                  AND ($3::transaction_status IS NULL OR status = $3)
                  AND ($4::transaction_type IS NULL OR transaction_type = $4)
                  AND ($5::UUID IS NULL OR id IN (
                      WITH RECURSIVE grp AS (
                          SELECT id FROM transactions WHERE id = $5
                          UNION ALL
                          SELECT t.id FROM transactions t
                          JOIN grp ON t.parent_transaction_id = grp.id
                      )
                      SELECT id FROM grp
                  ))
                ORDER BY created_at DESC
                LIMIT $6 OFFSET $7
                "#,
            )
            .bind(merchant_id.0)
            .bind(&filter.customer_id)
            .bind(filter.status)
            .bind(filter.transaction_type)
            .bind(filter.group_root.map(|id| id.0))
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(&self.pool),
        )
        .await?;

        models.into_iter().map(Transaction::try_from).collect()
    }

    async fn find_by_tran_nbr(
        &self,
        merchant_id: MerchantId,
        tran_nbr: &str,
    ) -> Result<Option<Transaction>, PaymentError> {
        let model_opt = with_query_timeout(
            ID_LOOKUP_TIMEOUT,
            "transactions.find_by_tran_nbr",
            sqlx::query_as::<_, TransactionModel>(
                r#"
                SELECT * FROM transactions
                WHERE merchant_id = $1 AND gateway_tran_nbr = $2
                ORDER BY created_at ASC
                LIMIT 1
                "#,
            )
            .bind(merchant_id.0)
            .bind(tran_nbr)
            .fetch_optional(&self.pool),
        )
        .await?;

        model_opt.map(Transaction::try_from).transpose()
    }

    async fn update_metadata(
        &self,
        id: TransactionId,
        metadata: Value,
    ) -> Result<Transaction, PaymentError> {
        let model_opt = with_query_timeout(
            ID_LOOKUP_TIMEOUT,
            "transactions.update_metadata",
            sqlx::query_as::<_, TransactionModel>(
                r#"
                UPDATE transactions
                SET metadata = $2, updated_at = now()
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(id.0)
            .bind(&metadata)
            .fetch_optional(&self.pool),
        )
        .await?;

        match model_opt {
            Some(model) => Transaction::try_from(model),
            None => Err(PaymentError::TransactionNotFound(id)),
        }
    }
}
