use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::domain::repository::IdempotencyRepository;

/// Job en segundo plano de mantenimiento del registro de idempotencia.
///
/// Borra los registros completados que superaron la ventana de retención
/// (el caller ya no va a reintentar con esa key) y los claims IN_PROGRESS
/// abandonados por líderes que murieron sin completar ni liberar.
pub struct IdempotencyMaintenanceJob {
    idempotency_repo: Arc<dyn IdempotencyRepository>,
    retention: Duration,
    stale_after: Duration,
}

impl IdempotencyMaintenanceJob {
    pub fn new(
        idempotency_repo: Arc<dyn IdempotencyRepository>,
        retention: Duration,
        stale_after: Duration,
    ) -> Self {
        Self {
            idempotency_repo,
            retention,
            stale_after,
        }
    }

    /// Ejecuta una pasada de limpieza.
    pub async fn run(&self) {
        match self
            .idempotency_repo
            .purge(self.retention, self.stale_after)
            .await
        {
            Ok(0) => {}
            Ok(purged) => {
                info!(purged, "purged expired idempotency records");
            }
            Err(e) => {
                error!(error = %e, "idempotency maintenance pass failed");
            }
        }
    }
}
