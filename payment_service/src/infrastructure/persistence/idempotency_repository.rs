use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use std::time::Duration;

use crate::domain::error::PaymentError;
use crate::domain::repository::{ClaimOutcome, CompletedIdempotency, IdempotencyRepository};
use crate::domain::types::{MerchantId, TransactionId};
use crate::infrastructure::persistence::models::IdempotencyModel;
use crate::infrastructure::persistence::{with_query_timeout, ID_LOOKUP_TIMEOUT};

/// Registro de idempotencia sobre el mismo Postgres relacional.
///
/// El liderazgo se decide con un INSERT bajo la primary key
/// `(merchant_id, idempotency_key)`: exactamente un llamador concurrente
/// logra insertar el row IN_PROGRESS. Un líder que murió deja un claim
/// viejo que el siguiente llamador retoma vía UPDATE condicionado.
pub struct PostgresIdempotencyRepository {
    pool: PgPool,
}

impl PostgresIdempotencyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(
        &self,
        merchant_id: MerchantId,
        key: &str,
    ) -> Result<Option<IdempotencyModel>, PaymentError> {
        with_query_timeout(
            ID_LOOKUP_TIMEOUT,
            "idempotency.fetch",
            sqlx::query_as::<_, IdempotencyModel>(
                r#"
                SELECT * FROM idempotency_records
                WHERE merchant_id = $1 AND idempotency_key = $2
                "#,
            )
            .bind(merchant_id.0)
            .bind(key)
            .fetch_optional(&self.pool),
        )
        .await
    }
}

#[async_trait]
impl IdempotencyRepository for PostgresIdempotencyRepository {
    async fn claim(
        &self,
        merchant_id: MerchantId,
        key: &str,
        fingerprint: &str,
        stale_after: Duration,
    ) -> Result<ClaimOutcome, PaymentError> {
        let inserted = with_query_timeout(
            ID_LOOKUP_TIMEOUT,
            "idempotency.claim",
            sqlx::query(
                r#"
                INSERT INTO idempotency_records
                    (merchant_id, idempotency_key, fingerprint, status, claimed_at)
                VALUES ($1, $2, $3, 'IN_PROGRESS', now())
                ON CONFLICT (merchant_id, idempotency_key) DO NOTHING
                "#,
            )
            .bind(merchant_id.0)
            .bind(key)
            .bind(fingerprint)
            .execute(&self.pool),
        )
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(ClaimOutcome::Leader);
        }

        let existing = self.fetch(merchant_id, key).await?.ok_or_else(|| {
            PaymentError::Internal("idempotency record vanished during claim".to_string())
        })?;

        if existing.is_completed() {
            return Ok(ClaimOutcome::Completed(existing.into_completed()?));
        }

        // Claim IN_PROGRESS: si envejeció más que el stale timeout, el
        // líder murió y este llamador lo retoma.
        let takeover = with_query_timeout(
            ID_LOOKUP_TIMEOUT,
            "idempotency.takeover",
            sqlx::query(
                r#"
                UPDATE idempotency_records
                SET fingerprint = $3, claimed_at = now()
                WHERE merchant_id = $1
                  AND idempotency_key = $2
                  AND status = 'IN_PROGRESS'
                  AND claimed_at < now() - make_interval(secs => $4)
                "#,
            )
            .bind(merchant_id.0)
            .bind(key)
            .bind(fingerprint)
            .bind(stale_after.as_secs_f64())
            .execute(&self.pool),
        )
        .await?;

        if takeover.rows_affected() == 1 {
            tracing::warn!(
                merchant_id = %merchant_id,
                "reclaimed stale idempotency claim from a dead leader"
            );
            return Ok(ClaimOutcome::Leader);
        }

        // Puede haberse completado entre el fetch y el takeover
        let current = self.fetch(merchant_id, key).await?.ok_or_else(|| {
            PaymentError::Internal("idempotency record vanished during claim".to_string())
        })?;

        if current.is_completed() {
            Ok(ClaimOutcome::Completed(current.into_completed()?))
        } else {
            Ok(ClaimOutcome::InFlight {
                fingerprint: current.fingerprint,
            })
        }
    }

    async fn complete(
        &self,
        merchant_id: MerchantId,
        key: &str,
        transaction_id: TransactionId,
        response_snapshot: Value,
    ) -> Result<(), PaymentError> {
        with_query_timeout(
            ID_LOOKUP_TIMEOUT,
            "idempotency.complete",
            sqlx::query(
                r#"
                UPDATE idempotency_records
                SET status = 'COMPLETED',
                    transaction_id = $3,
                    response_snapshot = $4,
                    completed_at = now()
                WHERE merchant_id = $1 AND idempotency_key = $2
                "#,
            )
            .bind(merchant_id.0)
            .bind(key)
            .bind(transaction_id.0)
            .bind(&response_snapshot)
            .execute(&self.pool),
        )
        .await?;

        Ok(())
    }

    async fn lookup(
        &self,
        merchant_id: MerchantId,
        key: &str,
    ) -> Result<Option<CompletedIdempotency>, PaymentError> {
        match self.fetch(merchant_id, key).await? {
            Some(model) if model.is_completed() => Ok(Some(model.into_completed()?)),
            _ => Ok(None),
        }
    }

    async fn release(&self, merchant_id: MerchantId, key: &str) -> Result<(), PaymentError> {
        with_query_timeout(
            ID_LOOKUP_TIMEOUT,
            "idempotency.release",
            sqlx::query(
                r#"
                DELETE FROM idempotency_records
                WHERE merchant_id = $1 AND idempotency_key = $2 AND status = 'IN_PROGRESS'
                "#,
            )
            .bind(merchant_id.0)
            .bind(key)
            .execute(&self.pool),
        )
        .await?;

        Ok(())
    }

    async fn purge(
        &self,
        retention: Duration,
        stale_after: Duration,
    ) -> Result<u64, PaymentError> {
        let result = with_query_timeout(
            crate::infrastructure::persistence::REPORT_TIMEOUT,
            "idempotency.purge",
            sqlx::query(
                r#"
                DELETE FROM idempotency_records
                WHERE (status = 'COMPLETED' AND completed_at < now() - make_interval(secs => $1))
                   OR (status = 'IN_PROGRESS' AND claimed_at < now() - make_interval(secs => $2))
                "#,
            )
            .bind(retention.as_secs_f64())
            .bind(stale_after.as_secs_f64())
            .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected())
    }
}
