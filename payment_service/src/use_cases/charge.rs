use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::entities::{Merchant, Transaction, TransactionStatus, TransactionType};
use crate::domain::error::PaymentError;
use crate::domain::gateways::{ChargeSource, GatewayResponse};
use crate::domain::money::{Amount, Currency};
use crate::domain::repository::{MerchantRepository, PaymentMethodRepository, TransactionRepository};
use crate::domain::types::{MerchantId, PaymentMethodId, TransactionId};

/// Comando compartido por las operaciones de cargo (authorize y sale).
///
/// El monto llega como decimal de frontera; la conversión a unidades
/// menores ocurre aquí, consciente de la divisa.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeCommand {
    pub merchant_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method_id: Option<Uuid>,
    pub payment_token: Option<String>,
    pub billing_zip: Option<String>,
    pub customer_id: Option<String>,
    pub metadata: Option<Value>,
    pub idempotency_key: String,
}

/// Cargo ya validado y resuelto, listo para ir al gateway.
pub(crate) struct PreparedCharge {
    pub merchant: Merchant,
    pub amount: Amount,
    pub currency: Currency,
    pub source: ChargeSource,
    pub payment_method_id: Option<PaymentMethodId>,
}

/// Validación y resolución común de un cargo: comercio activo, monto
/// positivo, divisa conocida y EXACTAMENTE una fuente de pago (método
/// almacenado vivo y verificado, o token de un solo uso).
pub(crate) async fn prepare_charge(
    merchant_repo: &dyn MerchantRepository,
    payment_method_repo: &dyn PaymentMethodRepository,
    command: &ChargeCommand,
) -> Result<PreparedCharge, PaymentError> {
    let merchant_id = MerchantId(command.merchant_id);
    let merchant = merchant_repo
        .find_by_id(merchant_id)
        .await?
        .ok_or(PaymentError::MerchantNotFound(merchant_id))?;
    merchant.ensure_active()?;

    let currency = Currency::new(&command.currency)?;
    let amount = Amount::from_decimal(command.amount, &currency)?;
    if amount.is_zero() {
        return Err(PaymentError::Validation(
            "amount must be greater than zero".to_string(),
        ));
    }

    let (source, payment_method_id) = match (&command.payment_method_id, &command.payment_token)
    {
        (Some(_), Some(_)) | (None, None) => {
            return Err(PaymentError::Validation(
                "exactly one of payment_method_id or payment_token is required".to_string(),
            ));
        }
        (Some(pm_id), None) => {
            let pm_id = PaymentMethodId(*pm_id);
            let payment_method = payment_method_repo
                .find_by_id(pm_id)
                .await?
                .ok_or(PaymentError::PaymentMethodNotFound(pm_id))?;

            if payment_method.merchant_id() != merchant.id() {
                return Err(PaymentError::PermissionDenied(
                    "payment method belongs to another merchant".to_string(),
                ));
            }
            if payment_method.is_deleted() {
                return Err(PaymentError::PaymentMethodNotFound(pm_id));
            }
            if !payment_method.is_verified() {
                return Err(PaymentError::PaymentMethodNotVerified(pm_id));
            }

            (
                ChargeSource::StoredToken(payment_method.storage_token().to_string()),
                Some(pm_id),
            )
        }
        (None, Some(token)) => {
            if token.trim().is_empty() {
                return Err(PaymentError::Validation(
                    "payment_token cannot be empty".to_string(),
                ));
            }
            (
                ChargeSource::OneTimeToken {
                    token: token.clone(),
                    billing_zip: command.billing_zip.clone(),
                },
                None,
            )
        }
    };

    Ok(PreparedCharge {
        merchant,
        amount,
        currency,
        source,
        payment_method_id,
    })
}

/// Construye la fila de transacción a partir del resultado del gateway.
///
/// Un decline confirmado produce una fila DECLINED; un fallo con resultado
/// desconocido (transporte, circuito abierto) produce una fila ERROR. En
/// ambos casos la fila se persiste: es el registro auditable del intento.
#[allow(clippy::too_many_arguments)]
pub(crate) fn transaction_from_outcome(
    id: TransactionId,
    merchant_id: MerchantId,
    transaction_type: TransactionType,
    amount: Amount,
    currency: Currency,
    customer_id: Option<String>,
    payment_method_id: Option<PaymentMethodId>,
    parent: Option<(TransactionId, String)>,
    idempotency_key: Option<String>,
    metadata: Value,
    outcome: Result<GatewayResponse, PaymentError>,
) -> Result<Transaction, PaymentError> {
    let mut builder = Transaction::builder()
        .id(id)
        .merchant_id(merchant_id)
        .transaction_type(transaction_type)
        .amount(amount)
        .currency(currency)
        .customer_id(customer_id)
        .payment_method_id(payment_method_id)
        .idempotency_key(idempotency_key)
        .metadata(metadata);

    if let Some((parent_id, parent_token)) = parent {
        builder = builder
            .parent_transaction_id(parent_id)
            .parent_gateway_token(Some(parent_token));
    }

    match outcome {
        Ok(response) => builder
            .status(if response.approved {
                TransactionStatus::APPROVED
            } else {
                TransactionStatus::DECLINED
            })
            .gateway_token(response.gateway_token)
            .gateway_tran_nbr(response.tran_nbr_echo)
            .auth_code(response.auth_code)
            .avs_result(response.avs_result)
            .cvv_result(response.cvv_result)
            .response_text(
                response
                    .response_text
                    .or(Some(response.response_code.clone())),
            )
            .build(),
        Err(PaymentError::GatewayUnavailable(message)) => builder
            .status(TransactionStatus::ERROR)
            .response_text(Some(message))
            .build(),
        Err(other) => Err(other),
    }
}

/// Persiste la fila del intento. Si la escritura falla DESPUÉS de haber
/// recibido un gateway token, se intenta una fila ERROR de reconciliación
/// que conserva el token en metadata: el token nunca se pierde.
pub(crate) async fn persist_outcome(
    transaction_repo: &dyn TransactionRepository,
    transaction: Transaction,
) -> Result<Transaction, PaymentError> {
    let gateway_token = transaction.gateway_token().map(str::to_string);

    match transaction_repo.save(transaction.clone()).await {
        Ok(saved) => Ok(saved),
        Err(e) => {
            if let Some(token) = gateway_token {
                tracing::error!(
                    transaction_id = %transaction.id(),
                    error = %e,
                    "failed to persist transaction with a live gateway token; recording reconciliation row"
                );
                let mut metadata = transaction.metadata().clone();
                if let Value::Object(ref mut map) = metadata {
                    map.insert("gateway_token".to_string(), Value::String(token));
                    map.insert(
                        "reconciliation_reason".to_string(),
                        Value::String("persistence_failed".to_string()),
                    );
                }
                let fallback = Transaction::reconstitute(
                    transaction.id(),
                    transaction.merchant_id(),
                    transaction.customer_id().map(str::to_string),
                    transaction.payment_method_id(),
                    transaction.parent_transaction_id(),
                    transaction.amount(),
                    transaction.currency().clone(),
                    transaction.transaction_type(),
                    TransactionStatus::ERROR,
                    None,
                    transaction.parent_gateway_token().map(str::to_string),
                    transaction.gateway_tran_nbr().map(str::to_string),
                    None,
                    None,
                    None,
                    transaction.response_text().map(str::to_string),
                    None, // sin key: no debe chocar con el índice de idempotencia
                    metadata,
                    transaction.created_at(),
                    transaction.updated_at(),
                );
                if let Ok(fallback) = fallback {
                    let _ = transaction_repo.save(fallback).await;
                }
            }
            Err(e)
        }
    }
}
