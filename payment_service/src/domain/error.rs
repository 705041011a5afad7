use crate::domain::types::{MerchantId, PaymentMethodId, TransactionId};
use thiserror::Error;

/// Error unificado del dominio de pagos.
///
/// Cada variante lleva un código de máquina estable (ver [`PaymentError::code`])
/// que la capa de API traduce a estatus HTTP / gRPC. Los mensajes nunca
/// incluyen datos sensibles del instrumento de pago.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PaymentError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Merchant not found with ID: {0}")]
    MerchantNotFound(MerchantId),

    #[error("Merchant not found with slug: {0}")]
    MerchantSlugNotFound(String),

    #[error("Merchant is inactive: {0}")]
    MerchantInactive(MerchantId),

    #[error("Transaction not found with ID: {0}")]
    TransactionNotFound(TransactionId),

    #[error("Payment method not found with ID: {0}")]
    PaymentMethodNotFound(PaymentMethodId),

    #[error("Payment method is not verified: {0}")]
    PaymentMethodNotVerified(PaymentMethodId),

    #[error("Caller is not allowed to act on this resource: {0}")]
    PermissionDenied(String),

    #[error("Transaction cannot be captured: {reason}")]
    CannotCapture { reason: String },

    #[error("Transaction cannot be voided: {reason}")]
    CannotVoid { reason: String },

    #[error("Transaction cannot be refunded: {reason}")]
    CannotRefund { reason: String },

    #[error("Idempotency key already used with a different payload: {0}")]
    IdempotencyConflict(String),

    #[error("Another request with this idempotency key is in progress: {0}")]
    IdempotencyInFlight(String),

    #[error("Gateway declined the transaction (code {code}): {text}")]
    GatewayDeclined { code: String, text: String },

    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// Fail-fast del circuit breaker: la llamada nunca tocó la red, así
    /// que no hay intento que persistir.
    #[error("Gateway circuit is open: {0}")]
    CircuitOpen(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Repository error: {0}")]
    RepositoryError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PaymentError {
    /// Código de máquina estable que acompaña a cada error en las respuestas.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::Validation(_) => "VALIDATION",
            PaymentError::MerchantNotFound(_) | PaymentError::MerchantSlugNotFound(_) => {
                "MERCHANT_NOT_FOUND"
            }
            PaymentError::MerchantInactive(_) => "MERCHANT_INACTIVE",
            PaymentError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            PaymentError::PaymentMethodNotFound(_) => "PAYMENT_METHOD_NOT_FOUND",
            PaymentError::PaymentMethodNotVerified(_) => "PAYMENT_METHOD_NOT_VERIFIED",
            PaymentError::PermissionDenied(_) => "PERMISSION_DENIED",
            PaymentError::CannotCapture { .. } => "TRANSACTION_CANNOT_BE_CAPTURED",
            PaymentError::CannotVoid { .. } => "TRANSACTION_CANNOT_BE_VOIDED",
            PaymentError::CannotRefund { .. } => "TRANSACTION_CANNOT_BE_REFUNDED",
            PaymentError::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            PaymentError::IdempotencyInFlight(_) => "IDEMPOTENCY_IN_FLIGHT",
            PaymentError::GatewayDeclined { .. } => "GATEWAY_DECLINED",
            PaymentError::GatewayUnavailable(_) | PaymentError::CircuitOpen(_) => {
                "GATEWAY_UNAVAILABLE"
            }
            PaymentError::AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            PaymentError::RepositoryError(_) => "REPOSITORY_ERROR",
            PaymentError::Internal(_) => "INTERNAL",
        }
    }

    /// Determina si el error es transitorio y el cliente puede reintentar
    /// (con backoff) usando la MISMA idempotency key.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::IdempotencyInFlight(_)
                | PaymentError::GatewayUnavailable(_)
                | PaymentError::CircuitOpen(_)
        )
    }
}
