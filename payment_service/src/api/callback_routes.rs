use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Form, Router,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::jobs::idempotency_maintenance::IdempotencyMaintenanceJob;
use crate::use_cases::process_callback::ProcessCallbackUseCase;

// Estado del listener secundario (callback del hosted-form + endpoints de
// jobs programados). Vive en un puerto separado del tráfico de clientes.
pub struct CallbackState {
    pub process_callback_use_case: ProcessCallbackUseCase,
    pub maintenance_job: Arc<IdempotencyMaintenanceJob>,
}

pub fn routes(state: Arc<CallbackState>) -> Router {
    Router::new()
        .route("/callbacks/epx/{merchant_slug}", post(receive_epx_callback))
        .route(
            "/jobs/idempotency-maintenance",
            post(run_idempotency_maintenance),
        )
        .with_state(state)
}

// Handler: POST del gateway con el desenlace de un pago hosted-form.
// El gateway espera un 200 plano; cualquier otra cosa provoca un repost.
pub async fn receive_epx_callback(
    State(state): State<Arc<CallbackState>>,
    Path(merchant_slug): Path<String>,
    Form(fields): Form<HashMap<String, String>>,
) -> Result<&'static str, ApiError> {
    let transaction = state
        .process_callback_use_case
        .execute(&merchant_slug, fields)
        .await?;

    tracing::info!(
        transaction_id = %transaction.id(),
        status = ?transaction.status(),
        "hosted-form callback recorded"
    );
    Ok("OK")
}

// Handler: dispara una pasada de mantenimiento de idempotencia bajo
// demanda (el scheduler interno ya corre en intervalo).
pub async fn run_idempotency_maintenance(
    State(state): State<Arc<CallbackState>>,
) -> StatusCode {
    state.maintenance_job.run().await;
    StatusCode::ACCEPTED
}
