use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::entities::PaymentMethod;
use crate::domain::error::PaymentError;
use crate::domain::repository::PaymentMethodRepository;
use crate::domain::types::PaymentMethodId;
use crate::infrastructure::persistence::models::PaymentMethodModel;
use crate::infrastructure::persistence::{with_query_timeout, ID_LOOKUP_TIMEOUT};

/// Repositorio de métodos de pago implementado para PostgreSQL.
pub struct PostgresPaymentMethodRepository {
    pool: PgPool,
}

impl PostgresPaymentMethodRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentMethodRepository for PostgresPaymentMethodRepository {
    /// Inserta el método de pago. Si llega como default, el default
    /// anterior del mismo (merchant, customer) se limpia dentro de la misma
    /// transacción de BD para sostener el índice parcial de unicidad.
    async fn create(&self, payment_method: PaymentMethod) -> Result<PaymentMethod, PaymentError> {
        let model = PaymentMethodModel::from(&payment_method);

        let inserted = with_query_timeout(ID_LOOKUP_TIMEOUT, "payment_methods.create", async {
            let mut tx = self.pool.begin().await?;

            if model.is_default {
                sqlx::query(
                    r#"
                    UPDATE payment_methods
                    SET is_default = FALSE, updated_at = now()
                    WHERE merchant_id = $1
                      AND customer_id IS NOT DISTINCT FROM $2
                      AND is_default
                      AND deleted_at IS NULL
                    "#,
                )
                .bind(model.merchant_id)
                .bind(&model.customer_id)
                .execute(&mut *tx)
                .await?;
            }

            let inserted = sqlx::query_as::<_, PaymentMethodModel>(
                r#"
                INSERT INTO payment_methods (
                    id, merchant_id, customer_id, method_type, storage_token,
                    last_four, card_brand, expiry, verified, is_default,
                    deleted_at, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                RETURNING *
                "#,
            )
            .bind(model.id)
            .bind(model.merchant_id)
            .bind(&model.customer_id)
            .bind(model.method_type)
            .bind(&model.storage_token)
            .bind(&model.last_four)
            .bind(&model.card_brand)
            .bind(&model.expiry)
            .bind(model.verified)
            .bind(model.is_default)
            .bind(model.deleted_at)
            .bind(model.created_at)
            .bind(model.updated_at)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(inserted)
        })
        .await?;

        PaymentMethod::try_from(inserted)
    }

    async fn find_by_id(
        &self,
        id: PaymentMethodId,
    ) -> Result<Option<PaymentMethod>, PaymentError> {
        let model_opt = with_query_timeout(
            ID_LOOKUP_TIMEOUT,
            "payment_methods.find_by_id",
            sqlx::query_as::<_, PaymentMethodModel>(
                r#"SELECT * FROM payment_methods WHERE id = $1"#,
            )
            .bind(id.0)
            .fetch_optional(&self.pool),
        )
        .await?;

        model_opt.map(PaymentMethod::try_from).transpose()
    }

    async fn update_metadata(
        &self,
        id: PaymentMethodId,
        card_brand: Option<String>,
        expiry: Option<String>,
        is_default: Option<bool>,
    ) -> Result<PaymentMethod, PaymentError> {
        let updated = with_query_timeout(
            ID_LOOKUP_TIMEOUT,
            "payment_methods.update_metadata",
            async {
                let mut tx = self.pool.begin().await?;

                if is_default == Some(true) {
                    sqlx::query(
                        r#"
                        UPDATE payment_methods
                        SET is_default = FALSE, updated_at = now()
                        WHERE merchant_id = (SELECT merchant_id FROM payment_methods WHERE id = $1)
                          AND customer_id IS NOT DISTINCT FROM
                              (SELECT customer_id FROM payment_methods WHERE id = $1)
                          AND id <> $1
                          AND is_default
                          AND deleted_at IS NULL
                        "#,
                    )
                    .bind(id.0)
                    .execute(&mut *tx)
                    .await?;
                }

                let updated = sqlx::query_as::<_, PaymentMethodModel>(
                    r#"
                    UPDATE payment_methods
                    SET card_brand = COALESCE($2, card_brand),
                        expiry = COALESCE($3, expiry),
                        is_default = COALESCE($4, is_default),
                        updated_at = now()
                    WHERE id = $1 AND deleted_at IS NULL
                    RETURNING *
                    "#,
                )
                .bind(id.0)
                .bind(&card_brand)
                .bind(&expiry)
                .bind(is_default)
                .fetch_optional(&mut *tx)
                .await?;

                tx.commit().await?;
                Ok(updated)
            },
        )
        .await?;

        match updated {
            Some(model) => PaymentMethod::try_from(model),
            None => Err(PaymentError::PaymentMethodNotFound(id)),
        }
    }

    async fn soft_delete(&self, id: PaymentMethodId) -> Result<(), PaymentError> {
        let result = with_query_timeout(
            ID_LOOKUP_TIMEOUT,
            "payment_methods.soft_delete",
            sqlx::query(
                r#"
                UPDATE payment_methods
                SET deleted_at = now(), is_default = FALSE, updated_at = now()
                WHERE id = $1 AND deleted_at IS NULL
                "#,
            )
            .bind(id.0)
            .execute(&self.pool),
        )
        .await?;

        if result.rows_affected() == 0 {
            return Err(PaymentError::PaymentMethodNotFound(id));
        }
        Ok(())
    }
}
