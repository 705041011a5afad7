use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tonic::Status;

use crate::domain::error::PaymentError;

// Error unificado para la API del servicio de pagos. El body siempre lleva
// un código de máquina estable y un mensaje humano; los detalles de
// errores internos se loguean pero no se filtran al cliente.
pub struct ApiError(pub PaymentError);

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            PaymentError::Validation(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            PaymentError::MerchantNotFound(_)
            | PaymentError::MerchantSlugNotFound(_)
            | PaymentError::TransactionNotFound(_)
            | PaymentError::PaymentMethodNotFound(_) => {
                (StatusCode::NOT_FOUND, self.0.to_string())
            }
            PaymentError::PermissionDenied(_) => (StatusCode::FORBIDDEN, self.0.to_string()),
            PaymentError::MerchantInactive(_)
            | PaymentError::PaymentMethodNotVerified(_)
            | PaymentError::CannotCapture { .. }
            | PaymentError::CannotVoid { .. }
            | PaymentError::CannotRefund { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.0.to_string())
            }
            PaymentError::IdempotencyConflict(_) | PaymentError::IdempotencyInFlight(_) => {
                (StatusCode::CONFLICT, self.0.to_string())
            }
            PaymentError::GatewayDeclined { .. } => {
                (StatusCode::PAYMENT_REQUIRED, self.0.to_string())
            }
            PaymentError::GatewayUnavailable(_) | PaymentError::CircuitOpen(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string())
            }
            PaymentError::AuthenticationFailed(_) => {
                (StatusCode::UNAUTHORIZED, self.0.to_string())
            }
            PaymentError::RepositoryError(ref e) => {
                tracing::error!("Database Repository Error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            PaymentError::Internal(ref e) => {
                tracing::error!("Internal Error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "status": "error",
            "code": self.0.code(),
            "message": message,
        }));

        (status, body).into_response()
    }
}

/// Mapeo del dominio a los códigos del RPC binario.
pub fn to_grpc_status(err: PaymentError) -> Status {
    let message = err.to_string();
    match err {
        PaymentError::Validation(_) => Status::invalid_argument(message),
        PaymentError::MerchantNotFound(_)
        | PaymentError::MerchantSlugNotFound(_)
        | PaymentError::TransactionNotFound(_)
        | PaymentError::PaymentMethodNotFound(_) => Status::not_found(message),
        PaymentError::PermissionDenied(_) => Status::permission_denied(message),
        PaymentError::MerchantInactive(_)
        | PaymentError::PaymentMethodNotVerified(_)
        | PaymentError::CannotCapture { .. }
        | PaymentError::CannotVoid { .. }
        | PaymentError::CannotRefund { .. }
        | PaymentError::GatewayDeclined { .. } => Status::failed_precondition(message),
        PaymentError::IdempotencyConflict(_) => Status::already_exists(message),
        PaymentError::IdempotencyInFlight(_) => Status::aborted(message),
        PaymentError::GatewayUnavailable(_) | PaymentError::CircuitOpen(_) => {
            Status::unavailable(message)
        }
        PaymentError::AuthenticationFailed(_) => Status::unauthenticated(message),
        PaymentError::RepositoryError(ref detail) | PaymentError::Internal(ref detail) => {
            tracing::error!("Internal error surfaced to RPC: {}", detail);
            Status::internal("internal error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::TransactionId;

    #[test]
    fn test_grpc_code_mapping() {
        assert_eq!(
            to_grpc_status(PaymentError::Validation("x".into())).code(),
            tonic::Code::InvalidArgument
        );
        assert_eq!(
            to_grpc_status(PaymentError::TransactionNotFound(TransactionId::new())).code(),
            tonic::Code::NotFound
        );
        assert_eq!(
            to_grpc_status(PaymentError::CannotCapture {
                reason: "voided".into()
            })
            .code(),
            tonic::Code::FailedPrecondition
        );
        assert_eq!(
            to_grpc_status(PaymentError::GatewayUnavailable("down".into())).code(),
            tonic::Code::Unavailable
        );
        assert_eq!(
            to_grpc_status(PaymentError::Internal("secret detail".into())).code(),
            tonic::Code::Internal
        );
    }

    #[test]
    fn test_internal_details_are_not_leaked() {
        let status = to_grpc_status(PaymentError::Internal("password=hunter2".into()));
        assert_eq!(status.message(), "internal error");
    }
}
