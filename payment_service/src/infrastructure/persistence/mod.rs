pub mod idempotency_repository;
pub mod merchant_repository;
pub mod models;
pub mod payment_method_repository;
pub mod transaction_repository;

use std::future::Future;
use std::time::Duration;

use crate::domain::error::PaymentError;

// Timeouts por nivel de consulta: lookup por id, listado filtrado y
// reporte/analítica. Toda query pasa por `with_query_timeout` para que una
// BD degradada no cuelgue a los workers.
pub(crate) const ID_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);
pub(crate) const LIST_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const REPORT_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) async fn with_query_timeout<T, F>(
    limit: Duration,
    operation: &str,
    query: F,
) -> Result<T, PaymentError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, query).await {
        Ok(result) => result.map_err(|e| PaymentError::RepositoryError(e.to_string())),
        Err(_) => Err(PaymentError::RepositoryError(format!(
            "{} timed out after {:?}",
            operation, limit
        ))),
    }
}
