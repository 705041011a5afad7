//! Fixtures compartidos por los tests de los casos de uso.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::domain::entities::{
    GatewayCredentials, Merchant, PaymentMethod, PaymentMethodType, Transaction,
    TransactionStatus, TransactionType,
};
use crate::domain::error::PaymentError;
use crate::domain::gateways::{CardGateway, GatewayCharge, GatewayFollowOn, GatewayResponse};
use crate::domain::money::{Amount, Currency};
use crate::domain::repository::{ClaimOutcome, MockIdempotencyRepository};
use crate::domain::types::{MerchantId, PaymentMethodId, TransactionId};
use crate::use_cases::idempotency::{IdempotencyConfig, IdempotencyCoordinator};

/// Gateway guionado: devuelve respuestas pre-cargadas en orden LIFO.
pub struct ScriptedGateway {
    responses: Mutex<Vec<Result<GatewayResponse, PaymentError>>>,
}

impl ScriptedGateway {
    pub fn new(responses: Vec<Result<GatewayResponse, PaymentError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }

    fn next(&self) -> Result<GatewayResponse, PaymentError> {
        self.responses
            .lock()
            .pop()
            .expect("scripted gateway ran out of responses")
    }
}

#[async_trait]
impl CardGateway for ScriptedGateway {
    async fn authorize(&self, _charge: &GatewayCharge) -> Result<GatewayResponse, PaymentError> {
        self.next()
    }
    async fn sale(&self, _charge: &GatewayCharge) -> Result<GatewayResponse, PaymentError> {
        self.next()
    }
    async fn verify(&self, _charge: &GatewayCharge) -> Result<GatewayResponse, PaymentError> {
        self.next()
    }
    async fn capture(&self, _op: &GatewayFollowOn) -> Result<GatewayResponse, PaymentError> {
        self.next()
    }
    async fn void(&self, _op: &GatewayFollowOn) -> Result<GatewayResponse, PaymentError> {
        self.next()
    }
    async fn refund(&self, _op: &GatewayFollowOn) -> Result<GatewayResponse, PaymentError> {
        self.next()
    }
}

pub fn approved_response(token: &str) -> GatewayResponse {
    GatewayResponse {
        approved: true,
        response_code: "00".to_string(),
        response_text: Some("APPROVAL".to_string()),
        auth_code: Some("000042".to_string()),
        gateway_token: Some(token.to_string()),
        tran_nbr_echo: Some("0000000001".to_string()),
        ..Default::default()
    }
}

pub fn declined_response() -> GatewayResponse {
    GatewayResponse {
        approved: false,
        response_code: "51".to_string(),
        response_text: Some("DECLINE".to_string()),
        ..Default::default()
    }
}

pub fn active_merchant(id: MerchantId) -> Merchant {
    Merchant::reconstitute(
        id,
        "acme".into(),
        "Acme Inc".into(),
        GatewayCredentials::new("9001".into(), "900300".into(), "1".into(), "1".into()).unwrap(),
        "epx-mac-acme".into(),
        true,
        Utc::now(),
        Utc::now(),
    )
    .unwrap()
}

pub fn inactive_merchant(id: MerchantId) -> Merchant {
    Merchant::reconstitute(
        id,
        "acme".into(),
        "Acme Inc".into(),
        GatewayCredentials::new("9001".into(), "900300".into(), "1".into(), "1".into()).unwrap(),
        "epx-mac-acme".into(),
        false,
        Utc::now(),
        Utc::now(),
    )
    .unwrap()
}

pub fn verified_payment_method(id: PaymentMethodId, merchant_id: MerchantId) -> PaymentMethod {
    PaymentMethod::reconstitute(
        id,
        merchant_id,
        Some("cust-1".into()),
        PaymentMethodType::CARD,
        "BRIC-STORED".into(),
        "4242".into(),
        Some("VISA".into()),
        Some("1227".into()),
        true,
        true,
        None,
        Utc::now(),
        Utc::now(),
    )
    .unwrap()
}

/// Coordinador cuyo claim siempre elige líder (registro mockeado).
pub fn leader_idempotency() -> IdempotencyCoordinator {
    let mut mock = MockIdempotencyRepository::new();
    mock.expect_claim()
        .returning(|_, _, _, _| Ok(ClaimOutcome::Leader));
    mock.expect_complete().returning(|_, _, _, _| Ok(()));
    mock.expect_release().returning(|_, _| Ok(()));
    IdempotencyCoordinator::new(Arc::new(mock), IdempotencyConfig::default())
}

/// Construye una fila persistida con timestamp controlado, para armar
/// árboles de prueba deterministas.
#[allow(clippy::too_many_arguments)]
pub fn stored_transaction(
    merchant_id: MerchantId,
    transaction_type: TransactionType,
    status: TransactionStatus,
    amount_minor: i64,
    parent: Option<TransactionId>,
    gateway_token: Option<&str>,
    created_at: DateTime<Utc>,
) -> Transaction {
    let requires_parent = transaction_type.requires_parent();
    Transaction::reconstitute(
        TransactionId::new(),
        merchant_id,
        Some("cust-1".into()),
        None,
        if requires_parent { parent } else { None },
        Amount::from_minor_units(amount_minor).unwrap(),
        Currency::new("USD").unwrap(),
        transaction_type,
        status,
        gateway_token.map(str::to_string),
        None,
        None,
        None,
        None,
        None,
        None,
        None,
        serde_json::json!({}),
        created_at,
        created_at,
    )
    .unwrap()
}

/// Secuencia temporal creciente para historiales.
pub fn timeline(offset_ms: i64) -> DateTime<Utc> {
    Utc::now() + Duration::milliseconds(offset_ms)
}
