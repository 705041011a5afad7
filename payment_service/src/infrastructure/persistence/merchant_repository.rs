use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::entities::Merchant;
use crate::domain::error::PaymentError;
use crate::domain::repository::MerchantRepository;
use crate::domain::types::MerchantId;
use crate::infrastructure::persistence::models::MerchantModel;
use crate::infrastructure::persistence::{with_query_timeout, ID_LOOKUP_TIMEOUT};

/// Repositorio de comercios implementado para PostgreSQL.
///
/// Solo lecturas: los comercios se crean y mutan por el tooling de
/// administración, fuera de este servicio.
pub struct PostgresMerchantRepository {
    pool: PgPool,
}

impl PostgresMerchantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MerchantRepository for PostgresMerchantRepository {
    async fn find_by_id(&self, id: MerchantId) -> Result<Option<Merchant>, PaymentError> {
        let model_opt = with_query_timeout(
            ID_LOOKUP_TIMEOUT,
            "merchants.find_by_id",
            sqlx::query_as::<_, MerchantModel>(r#"SELECT * FROM merchants WHERE id = $1"#)
                .bind(id.0)
                .fetch_optional(&self.pool),
        )
        .await?;

        model_opt.map(Merchant::try_from).transpose()
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Merchant>, PaymentError> {
        let model_opt = with_query_timeout(
            ID_LOOKUP_TIMEOUT,
            "merchants.find_by_slug",
            sqlx::query_as::<_, MerchantModel>(r#"SELECT * FROM merchants WHERE slug = $1"#)
                .bind(slug)
                .fetch_optional(&self.pool),
        )
        .await?;

        model_opt.map(Merchant::try_from).transpose()
    }
}
