use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::dto::{PaymentMethodDto, TransactionDto};
use crate::api::error::ApiError;
use crate::api::response::ApiResponse;
use crate::domain::entities::{
    PaymentMethodType, TransactionStatus, TransactionType,
};
use crate::domain::error::PaymentError;
use crate::use_cases::authorize::AuthorizeUseCase;
use crate::use_cases::capture::{CaptureCommand, CaptureUseCase};
use crate::use_cases::charge::ChargeCommand;
use crate::use_cases::get_transaction::GetTransactionUseCase;
use crate::use_cases::list_transactions::{ListTransactionsQuery, ListTransactionsUseCase};
use crate::use_cases::refund::{RefundCommand, RefundUseCase};
use crate::use_cases::register_payment_method::{
    RegisterPaymentMethodCommand, RegisterPaymentMethodUseCase,
};
use crate::use_cases::remove_payment_method::RemovePaymentMethodUseCase;
use crate::use_cases::sale::SaleUseCase;
use crate::use_cases::update_payment_method::{
    UpdatePaymentMethodCommand, UpdatePaymentMethodUseCase,
};
use crate::use_cases::update_transaction_metadata::UpdateTransactionMetadataUseCase;
use crate::use_cases::void_transaction::{VoidCommand, VoidTransactionUseCase};

// Estado compartido de la aplicación
pub struct AppState {
    pub authorize_use_case: AuthorizeUseCase,
    pub sale_use_case: SaleUseCase,
    pub capture_use_case: CaptureUseCase,
    pub void_use_case: VoidTransactionUseCase,
    pub refund_use_case: RefundUseCase,
    pub get_transaction_use_case: GetTransactionUseCase,
    pub list_transactions_use_case: ListTransactionsUseCase,
    pub register_payment_method_use_case: RegisterPaymentMethodUseCase,
    pub update_payment_method_use_case: UpdatePaymentMethodUseCase,
    pub remove_payment_method_use_case: RemovePaymentMethodUseCase,
    pub update_transaction_metadata_use_case: UpdateTransactionMetadataUseCase,
    pub db_pool: PgPool,
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/transactions/authorize", post(authorize_transaction))
        .route("/transactions/sale", post(sale_transaction))
        .route("/transactions/capture", post(capture_transaction))
        .route("/transactions/void", post(void_transaction))
        .route("/transactions/refund", post(refund_transaction))
        .route("/transactions", get(list_transactions))
        .route("/transactions/{id}", get(get_transaction_details))
        .route(
            "/transactions/{id}/metadata",
            patch(update_transaction_metadata),
        )
        .route("/payment-methods", post(register_payment_method))
        .route(
            "/payment-methods/{id}",
            patch(update_payment_method).delete(remove_payment_method),
        )
        .route("/health", get(health))
        .with_state(state)
}

// DTO de entrada para authorize y sale. El monto viaja como string decimal
// para no perder precisión en el borde JSON.
#[derive(Deserialize, ToSchema)]
pub struct ChargeRequest {
    pub merchant_id: Uuid,
    pub amount: String,
    pub currency: String,
    pub payment_method_id: Option<Uuid>,
    pub payment_token: Option<String>,
    pub billing_zip: Option<String>,
    pub customer_id: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: Option<Value>,
    pub idempotency_key: String,
}

#[derive(Deserialize, ToSchema)]
pub struct CaptureRequest {
    pub merchant_id: Uuid,
    pub parent_transaction_id: Uuid,
    pub amount: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: Option<Value>,
    pub idempotency_key: String,
}

#[derive(Deserialize, ToSchema)]
pub struct VoidRequest {
    pub merchant_id: Uuid,
    pub transaction_id: Uuid,
    #[schema(value_type = Object)]
    pub metadata: Option<Value>,
    pub idempotency_key: String,
}

#[derive(Deserialize, ToSchema)]
pub struct RefundRequest {
    pub merchant_id: Uuid,
    pub transaction_id: Uuid,
    pub amount: Option<String>,
    pub reason: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: Option<Value>,
    pub idempotency_key: String,
}

#[derive(Deserialize, ToSchema)]
pub struct RegisterPaymentMethodRequest {
    pub merchant_id: Uuid,
    pub customer_id: Option<String>,
    pub method_type: String,
    pub payment_token: String,
    pub billing_zip: Option<String>,
    pub currency: Option<String>,
    pub expiry: Option<String>,
    #[serde(default)]
    pub set_default: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdatePaymentMethodRequest {
    pub merchant_id: Uuid,
    pub card_brand: Option<String>,
    pub expiry: Option<String>,
    pub set_default: Option<bool>,
}

#[derive(Deserialize)]
pub struct MerchantScope {
    pub merchant_id: Uuid,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub merchant_id: Uuid,
    pub customer_id: Option<String>,
    pub group_root: Option<Uuid>,
    pub status: Option<String>,
    pub transaction_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn parse_amount(value: &str) -> Result<Decimal, ApiError> {
    Decimal::from_str_exact(value.trim()).map_err(|_| {
        ApiError(PaymentError::Validation(format!(
            "invalid decimal amount: '{}'",
            value
        )))
    })
}

fn parse_optional_amount(value: &Option<String>) -> Result<Option<Decimal>, ApiError> {
    value.as_deref().map(|v| parse_amount(v)).transpose()
}

fn parse_status(value: &str) -> Result<TransactionStatus, ApiError> {
    match value.to_uppercase().as_str() {
        "PENDING" => Ok(TransactionStatus::PENDING),
        "APPROVED" => Ok(TransactionStatus::APPROVED),
        "DECLINED" => Ok(TransactionStatus::DECLINED),
        "ERROR" => Ok(TransactionStatus::ERROR),
        other => Err(ApiError(PaymentError::Validation(format!(
            "unknown status '{}'",
            other
        )))),
    }
}

fn parse_type(value: &str) -> Result<TransactionType, ApiError> {
    match value.to_uppercase().as_str() {
        "AUTH" => Ok(TransactionType::AUTH),
        "CAPTURE" => Ok(TransactionType::CAPTURE),
        "SALE" => Ok(TransactionType::SALE),
        "REFUND" => Ok(TransactionType::REFUND),
        "VOID" => Ok(TransactionType::VOID),
        other => Err(ApiError(PaymentError::Validation(format!(
            "unknown transaction type '{}'",
            other
        )))),
    }
}

fn parse_method_type(value: &str) -> Result<PaymentMethodType, ApiError> {
    match value.to_uppercase().as_str() {
        "CARD" => Ok(PaymentMethodType::CARD),
        "ACH" => Ok(PaymentMethodType::ACH),
        other => Err(ApiError(PaymentError::Validation(format!(
            "unknown payment method type '{}'",
            other
        )))),
    }
}

// Una fila ERROR se persistió pero el desenlace en el gateway es
// desconocido: se responde 503 con la fila adjunta para que el cliente
// reintente con una key nueva. Declines viajan como respuesta exitosa con
// is_approved = false.
fn transaction_response(transaction: crate::domain::entities::Transaction) -> Response {
    let dto = TransactionDto::from(&transaction);
    if transaction.status() == TransactionStatus::ERROR {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "code": "GATEWAY_UNAVAILABLE",
                "message": "gateway outcome unknown; retry with a new idempotency key",
                "data": dto,
            })),
        )
            .into_response();
    }
    (StatusCode::CREATED, Json(ApiResponse::success(dto))).into_response()
}

// Handler: Autorizar (retener fondos)
// POST /transactions/authorize
#[utoipa::path(
    post,
    path = "/transactions/authorize",
    request_body = ChargeRequest,
    responses(
        (status = 201, description = "Fila de transacción registrada", body = ApiResponse<TransactionDto>),
        (status = 400, description = "Entrada inválida"),
        (status = 503, description = "Gateway no disponible; fila ERROR registrada")
    )
)]
pub async fn authorize_transaction(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChargeRequest>,
) -> Result<Response, ApiError> {
    let amount = parse_amount(&payload.amount)?;
    let transaction = state
        .authorize_use_case
        .execute(ChargeCommand {
            merchant_id: payload.merchant_id,
            amount,
            currency: payload.currency,
            payment_method_id: payload.payment_method_id,
            payment_token: payload.payment_token,
            billing_zip: payload.billing_zip,
            customer_id: payload.customer_id,
            metadata: payload.metadata,
            idempotency_key: payload.idempotency_key,
        })
        .await?;
    Ok(transaction_response(transaction))
}

// Handler: Venta (auth + capture en una sola operación)
// POST /transactions/sale
#[utoipa::path(
    post,
    path = "/transactions/sale",
    request_body = ChargeRequest,
    responses(
        (status = 201, description = "Fila de transacción registrada", body = ApiResponse<TransactionDto>),
        (status = 400, description = "Entrada inválida"),
        (status = 503, description = "Gateway no disponible; fila ERROR registrada")
    )
)]
pub async fn sale_transaction(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChargeRequest>,
) -> Result<Response, ApiError> {
    let amount = parse_amount(&payload.amount)?;
    let transaction = state
        .sale_use_case
        .execute(ChargeCommand {
            merchant_id: payload.merchant_id,
            amount,
            currency: payload.currency,
            payment_method_id: payload.payment_method_id,
            payment_token: payload.payment_token,
            billing_zip: payload.billing_zip,
            customer_id: payload.customer_id,
            metadata: payload.metadata,
            idempotency_key: payload.idempotency_key,
        })
        .await?;
    Ok(transaction_response(transaction))
}

// Handler: Capturar un auth aprobado (parcial o total)
// POST /transactions/capture
#[utoipa::path(
    post,
    path = "/transactions/capture",
    request_body = CaptureRequest,
    responses(
        (status = 201, description = "Captura registrada", body = ApiResponse<TransactionDto>),
        (status = 422, description = "La transacción no admite captura")
    )
)]
pub async fn capture_transaction(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CaptureRequest>,
) -> Result<Response, ApiError> {
    let amount = parse_optional_amount(&payload.amount)?;
    let transaction = state
        .capture_use_case
        .execute(CaptureCommand {
            merchant_id: payload.merchant_id,
            parent_transaction_id: payload.parent_transaction_id,
            amount,
            metadata: payload.metadata,
            idempotency_key: payload.idempotency_key,
        })
        .await?;
    Ok(transaction_response(transaction))
}

// Handler: Anular un auth/sale no liquidado
// POST /transactions/void
#[utoipa::path(
    post,
    path = "/transactions/void",
    request_body = VoidRequest,
    responses(
        (status = 201, description = "Void registrado", body = ApiResponse<TransactionDto>),
        (status = 422, description = "La transacción no admite void")
    )
)]
pub async fn void_transaction(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<VoidRequest>,
) -> Result<Response, ApiError> {
    let transaction = state
        .void_use_case
        .execute(VoidCommand {
            merchant_id: payload.merchant_id,
            transaction_id: payload.transaction_id,
            metadata: payload.metadata,
            idempotency_key: payload.idempotency_key,
        })
        .await?;
    Ok(transaction_response(transaction))
}

// Handler: Reembolsar un sale/capture liquidado
// POST /transactions/refund
#[utoipa::path(
    post,
    path = "/transactions/refund",
    request_body = RefundRequest,
    responses(
        (status = 201, description = "Reembolso registrado", body = ApiResponse<TransactionDto>),
        (status = 422, description = "La transacción no admite reembolso")
    )
)]
pub async fn refund_transaction(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RefundRequest>,
) -> Result<Response, ApiError> {
    let amount = parse_optional_amount(&payload.amount)?;
    let transaction = state
        .refund_use_case
        .execute(RefundCommand {
            merchant_id: payload.merchant_id,
            transaction_id: payload.transaction_id,
            amount,
            reason: payload.reason,
            metadata: payload.metadata,
            idempotency_key: payload.idempotency_key,
        })
        .await?;
    Ok(transaction_response(transaction))
}

// Handler: Detalle de una transacción
// GET /transactions/{id}?merchant_id=...
#[utoipa::path(
    get,
    path = "/transactions/{id}",
    params(("id" = Uuid, Path, description = "Id de la transacción")),
    responses(
        (status = 200, description = "Transacción encontrada", body = ApiResponse<TransactionDto>),
        (status = 404, description = "No existe")
    )
)]
pub async fn get_transaction_details(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(scope): Query<MerchantScope>,
) -> Result<Json<ApiResponse<TransactionDto>>, ApiError> {
    let transaction = state
        .get_transaction_use_case
        .execute(scope.merchant_id, id)
        .await?;
    Ok(Json(ApiResponse::success(TransactionDto::from(
        &transaction,
    ))))
}

// Handler: Listado paginado por comercio
// GET /transactions?merchant_id=...
#[utoipa::path(
    get,
    path = "/transactions",
    responses(
        (status = 200, description = "Listado de transacciones", body = ApiResponse<Vec<TransactionDto>>)
    )
)]
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<TransactionDto>>>, ApiError> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let transaction_type = query
        .transaction_type
        .as_deref()
        .map(parse_type)
        .transpose()?;

    let transactions = state
        .list_transactions_use_case
        .execute(
            query.merchant_id,
            ListTransactionsQuery {
                customer_id: query.customer_id,
                group_root: query.group_root,
                status,
                transaction_type,
                limit: query.limit,
                offset: query.offset,
            },
        )
        .await?;

    Ok(Json(ApiResponse::success(
        transactions.iter().map(TransactionDto::from).collect(),
    )))
}

// Handler: Registrar un método de pago (probe de verificación + token)
// POST /payment-methods
#[utoipa::path(
    post,
    path = "/payment-methods",
    request_body = RegisterPaymentMethodRequest,
    responses(
        (status = 201, description = "Método de pago almacenado", body = ApiResponse<PaymentMethodDto>),
        (status = 402, description = "El gateway rechazó la verificación")
    )
)]
pub async fn register_payment_method(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterPaymentMethodRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentMethodDto>>), ApiError> {
    let method_type = parse_method_type(&payload.method_type)?;
    let payment_method = state
        .register_payment_method_use_case
        .execute(RegisterPaymentMethodCommand {
            merchant_id: payload.merchant_id,
            customer_id: payload.customer_id,
            method_type,
            payment_token: payload.payment_token,
            billing_zip: payload.billing_zip,
            currency: payload.currency,
            expiry: payload.expiry,
            set_default: payload.set_default,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(PaymentMethodDto::from(&payment_method))),
    ))
}

// Handler: Actualizar metadata mutable de un método de pago
// PATCH /payment-methods/{id}
#[utoipa::path(
    patch,
    path = "/payment-methods/{id}",
    request_body = UpdatePaymentMethodRequest,
    responses(
        (status = 200, description = "Método de pago actualizado", body = ApiResponse<PaymentMethodDto>),
        (status = 404, description = "No existe")
    )
)]
pub async fn update_payment_method(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePaymentMethodRequest>,
) -> Result<Json<ApiResponse<PaymentMethodDto>>, ApiError> {
    let payment_method = state
        .update_payment_method_use_case
        .execute(
            payload.merchant_id,
            id,
            UpdatePaymentMethodCommand {
                card_brand: payload.card_brand,
                expiry: payload.expiry,
                set_default: payload.set_default,
            },
        )
        .await?;

    Ok(Json(ApiResponse::success(PaymentMethodDto::from(
        &payment_method,
    ))))
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateTransactionMetadataRequest {
    pub merchant_id: Uuid,
    #[schema(value_type = Object)]
    pub metadata: Value,
}

// Handler: Actualizar la metadata de una transacción (única mutación
// permitida sobre una fila terminal)
// PATCH /transactions/{id}/metadata
#[utoipa::path(
    patch,
    path = "/transactions/{id}/metadata",
    request_body = UpdateTransactionMetadataRequest,
    responses(
        (status = 200, description = "Metadata actualizada", body = ApiResponse<TransactionDto>),
        (status = 404, description = "No existe")
    )
)]
pub async fn update_transaction_metadata(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTransactionMetadataRequest>,
) -> Result<Json<ApiResponse<TransactionDto>>, ApiError> {
    let transaction = state
        .update_transaction_metadata_use_case
        .execute(payload.merchant_id, id, payload.metadata)
        .await?;
    Ok(Json(ApiResponse::success(TransactionDto::from(
        &transaction,
    ))))
}

// Handler: Soft-delete de un método de pago
// DELETE /payment-methods/{id}?merchant_id=...
#[utoipa::path(
    delete,
    path = "/payment-methods/{id}",
    params(("id" = Uuid, Path, description = "Id del método de pago")),
    responses(
        (status = 204, description = "Método de pago eliminado"),
        (status = 404, description = "No existe")
    )
)]
pub async fn remove_payment_method(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(scope): Query<MerchantScope>,
) -> Result<StatusCode, ApiError> {
    state
        .remove_payment_method_use_case
        .execute(scope.merchant_id, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// Handler: Salud del servicio, incluida la utilización del pool de BD
// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let size = state.db_pool.size();
    let idle = state.db_pool.num_idle();
    Json(json!({
        "status": "ok",
        "db_pool": {
            "size": size,
            "idle": idle,
            "in_use": size as usize - idle,
        }
    }))
}
