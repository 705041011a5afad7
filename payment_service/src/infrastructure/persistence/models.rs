use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::entities::{
    GatewayCredentials, Merchant, PaymentMethod, PaymentMethodType, Transaction,
    TransactionStatus, TransactionType,
};
use crate::domain::error::PaymentError;
use crate::domain::money::{Amount, Currency};
use crate::domain::repository::CompletedIdempotency;
use crate::domain::types::{MerchantId, PaymentMethodId, TransactionId};

// Modelos de persistencia (Infrastructure Layer). Mapean filas de Postgres
// y se convierten a entidades de dominio vía `reconstitute`, que re-valida
// las reglas básicas por si la BD contiene datos inválidos.

#[derive(Debug, FromRow)]
pub struct MerchantModel {
    pub id: Uuid,
    pub slug: String,
    pub display_name: String,
    pub cust_nbr: String,
    pub merch_nbr: String,
    pub dba_nbr: String,
    pub terminal_nbr: String,
    pub mac_secret_ref: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<MerchantModel> for Merchant {
    type Error = PaymentError;

    fn try_from(m: MerchantModel) -> Result<Self, Self::Error> {
        let credentials =
            GatewayCredentials::new(m.cust_nbr, m.merch_nbr, m.dba_nbr, m.terminal_nbr)?;
        Merchant::reconstitute(
            MerchantId(m.id),
            m.slug,
            m.display_name,
            credentials,
            m.mac_secret_ref,
            m.active,
            m.created_at,
            m.updated_at,
        )
    }
}

#[derive(Debug, FromRow)]
pub struct PaymentMethodModel {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub customer_id: Option<String>,
    pub method_type: PaymentMethodType,
    pub storage_token: String,
    pub last_four: String,
    pub card_brand: Option<String>,
    pub expiry: Option<String>,
    pub verified: bool,
    pub is_default: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&PaymentMethod> for PaymentMethodModel {
    fn from(pm: &PaymentMethod) -> Self {
        Self {
            id: pm.id().0,
            merchant_id: pm.merchant_id().0,
            customer_id: pm.customer_id().map(str::to_string),
            method_type: pm.method_type(),
            storage_token: pm.storage_token().to_string(),
            last_four: pm.last_four().to_string(),
            card_brand: pm.card_brand().map(str::to_string),
            expiry: pm.expiry().map(str::to_string),
            verified: pm.is_verified(),
            is_default: pm.is_default(),
            deleted_at: pm.deleted_at(),
            created_at: pm.created_at(),
            updated_at: pm.updated_at(),
        }
    }
}

impl TryFrom<PaymentMethodModel> for PaymentMethod {
    type Error = PaymentError;

    fn try_from(m: PaymentMethodModel) -> Result<Self, Self::Error> {
        PaymentMethod::reconstitute(
            PaymentMethodId(m.id),
            MerchantId(m.merchant_id),
            m.customer_id,
            m.method_type,
            m.storage_token,
            m.last_four,
            m.card_brand,
            m.expiry,
            m.verified,
            m.is_default,
            m.deleted_at,
            m.created_at,
            m.updated_at,
        )
    }
}

#[derive(Debug, FromRow)]
pub struct TransactionModel {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub customer_id: Option<String>,
    pub payment_method_id: Option<Uuid>,
    pub parent_transaction_id: Option<Uuid>,
    pub amount: i64,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub gateway_token: Option<String>,
    pub parent_gateway_token: Option<String>,
    pub gateway_tran_nbr: Option<String>,
    pub auth_code: Option<String>,
    pub avs_result: Option<String>,
    pub cvv_result: Option<String>,
    pub response_text: Option<String>,
    pub idempotency_key: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Transaction> for TransactionModel {
    fn from(t: &Transaction) -> Self {
        Self {
            id: t.id().0,
            merchant_id: t.merchant_id().0,
            customer_id: t.customer_id().map(str::to_string),
            payment_method_id: t.payment_method_id().map(|id| id.0),
            parent_transaction_id: t.parent_transaction_id().map(|id| id.0),
            amount: t.amount().minor_units(),
            currency: t.currency().code().to_string(),
            transaction_type: t.transaction_type(),
            status: t.status(),
            gateway_token: t.gateway_token().map(str::to_string),
            parent_gateway_token: t.parent_gateway_token().map(str::to_string),
            gateway_tran_nbr: t.gateway_tran_nbr().map(str::to_string),
            auth_code: t.auth_code().map(str::to_string),
            avs_result: t.avs_result().map(str::to_string),
            cvv_result: t.cvv_result().map(str::to_string),
            response_text: t.response_text().map(str::to_string),
            idempotency_key: t.idempotency_key().map(str::to_string),
            metadata: t.metadata().clone(),
            created_at: t.created_at(),
            updated_at: t.updated_at(),
        }
    }
}

impl TryFrom<TransactionModel> for Transaction {
    type Error = PaymentError;

    fn try_from(m: TransactionModel) -> Result<Self, Self::Error> {
        Transaction::reconstitute(
            TransactionId(m.id),
            MerchantId(m.merchant_id),
            m.customer_id,
            m.payment_method_id.map(PaymentMethodId),
            m.parent_transaction_id.map(TransactionId),
            Amount::from_minor_units(m.amount)?,
            Currency::new(&m.currency)?,
            m.transaction_type,
            m.status,
            m.gateway_token,
            m.parent_gateway_token,
            m.gateway_tran_nbr,
            m.auth_code,
            m.avs_result,
            m.cvv_result,
            m.response_text,
            m.idempotency_key,
            m.metadata,
            m.created_at,
            m.updated_at,
        )
    }
}

#[derive(Debug, FromRow)]
pub struct IdempotencyModel {
    pub merchant_id: Uuid,
    pub idempotency_key: String,
    pub fingerprint: String,
    pub status: String,
    pub transaction_id: Option<Uuid>,
    pub response_snapshot: Option<Value>,
    pub claimed_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IdempotencyModel {
    pub fn is_completed(&self) -> bool {
        self.status == "COMPLETED"
    }

    pub fn into_completed(self) -> Result<CompletedIdempotency, PaymentError> {
        let transaction_id = self.transaction_id.ok_or_else(|| {
            PaymentError::Internal("completed idempotency record without transaction".into())
        })?;
        let completed_at = self.completed_at.ok_or_else(|| {
            PaymentError::Internal("completed idempotency record without timestamp".into())
        })?;
        Ok(CompletedIdempotency {
            transaction_id: TransactionId(transaction_id),
            fingerprint: self.fingerprint,
            response_snapshot: self.response_snapshot.unwrap_or(Value::Null),
            completed_at,
        })
    }
}
