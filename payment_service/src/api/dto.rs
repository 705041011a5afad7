use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::domain::entities::{PaymentMethod, Transaction, TransactionStatus};

/// Representación de frontera de una transacción.
///
/// Los ids viajan como strings, el monto como string decimal (la precisión
/// se preserva textualmente) y los enums por su nombre canónico. El token
/// de gateway se expone porque es el handle del cliente para operaciones
/// follow-on; las credenciales del comercio jamás se serializan.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransactionDto {
    pub id: String,
    pub merchant_id: String,
    pub customer_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub parent_transaction_id: Option<String>,
    pub amount: String,
    pub currency: String,
    pub transaction_type: String,
    pub status: String,
    pub is_approved: bool,
    pub gateway_token: Option<String>,
    pub auth_code: Option<String>,
    pub avs_result: Option<String>,
    pub cvv_result: Option<String>,
    pub response_text: Option<String>,
    pub idempotency_key: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl From<&Transaction> for TransactionDto {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id().to_string(),
            merchant_id: tx.merchant_id().to_string(),
            customer_id: tx.customer_id().map(str::to_string),
            payment_method_id: tx.payment_method_id().map(|id| id.to_string()),
            parent_transaction_id: tx.parent_transaction_id().map(|id| id.to_string()),
            amount: tx.amount().to_decimal(tx.currency()).to_string(),
            currency: tx.currency().code().to_string(),
            transaction_type: format!("{:?}", tx.transaction_type()),
            status: format!("{:?}", tx.status()),
            is_approved: tx.status() == TransactionStatus::APPROVED,
            gateway_token: tx.gateway_token().map(str::to_string),
            auth_code: tx.auth_code().map(str::to_string),
            avs_result: tx.avs_result().map(str::to_string),
            cvv_result: tx.cvv_result().map(str::to_string),
            response_text: tx.response_text().map(str::to_string),
            idempotency_key: tx.idempotency_key().map(str::to_string),
            metadata: tx.metadata().clone(),
            created_at: tx.created_at(),
        }
    }
}

/// Representación de frontera de un método de pago almacenado. El storage
/// token es interno y no se expone.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentMethodDto {
    pub id: String,
    pub merchant_id: String,
    pub customer_id: Option<String>,
    pub method_type: String,
    pub last_four: String,
    pub card_brand: Option<String>,
    pub expiry: Option<String>,
    pub verified: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&PaymentMethod> for PaymentMethodDto {
    fn from(pm: &PaymentMethod) -> Self {
        Self {
            id: pm.id().to_string(),
            merchant_id: pm.merchant_id().to_string(),
            customer_id: pm.customer_id().map(str::to_string),
            method_type: format!("{:?}", pm.method_type()),
            last_four: pm.last_four().to_string(),
            card_brand: pm.card_brand().map(str::to_string),
            expiry: pm.expiry().map(str::to_string),
            verified: pm.is_verified(),
            is_default: pm.is_default(),
            created_at: pm.created_at(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::TransactionType;
    use crate::domain::money::{Amount, Currency};
    use crate::domain::types::MerchantId;

    #[test]
    fn test_amount_serializes_as_boundary_decimal() {
        let tx = Transaction::builder()
            .merchant_id(MerchantId::new())
            .transaction_type(TransactionType::SALE)
            .status(TransactionStatus::APPROVED)
            .amount(Amount::from_minor_units(10050).unwrap())
            .currency(Currency::new("USD").unwrap())
            .build()
            .unwrap();

        let dto = TransactionDto::from(&tx);
        assert_eq!(dto.amount, "100.50");
        assert_eq!(dto.status, "APPROVED");
        assert!(dto.is_approved);
    }
}
