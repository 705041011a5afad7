use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::domain::error::PaymentError;
use crate::domain::gateways::{CardGateway, GatewayCharge, GatewayFollowOn, GatewayResponse};
use crate::infrastructure::gateways::epx::wire::{mask_card, tran_nbr};

/// Implementación fake del gateway para desarrollo y testing.
///
/// Aprueba todas las operaciones, fabrica un AUTH_GUID por llamada y
/// loguea lo que haría la implementación real. Útil para probar el flujo
/// completo del servicio sin credenciales de EPX.
pub struct FakeCardGateway;

impl FakeCardGateway {
    pub fn new() -> Self {
        Self
    }

    fn approve(&self, operation: &str, transaction_id: Uuid) -> GatewayResponse {
        info!(
            " [FakeCardGateway] {} approved for transaction {}",
            operation, transaction_id
        );
        GatewayResponse {
            approved: true,
            response_code: "00".to_string(),
            response_text: Some("APPROVAL".to_string()),
            auth_code: Some("000000".to_string()),
            avs_result: Some("Y".to_string()),
            cvv_result: Some("M".to_string()),
            card_brand: Some("V".to_string()),
            last_four: Some("4242".to_string()),
            masked_card: Some(mask_card("4242")),
            gateway_token: Some(format!("FAKE-{}", Uuid::new_v4().simple())),
            tran_nbr_echo: Some(tran_nbr(transaction_id)),
            raw_body: String::new(),
        }
    }
}

impl Default for FakeCardGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CardGateway for FakeCardGateway {
    async fn authorize(&self, charge: &GatewayCharge) -> Result<GatewayResponse, PaymentError> {
        Ok(self.approve("authorize", charge.transaction_id))
    }

    async fn sale(&self, charge: &GatewayCharge) -> Result<GatewayResponse, PaymentError> {
        Ok(self.approve("sale", charge.transaction_id))
    }

    async fn verify(&self, charge: &GatewayCharge) -> Result<GatewayResponse, PaymentError> {
        Ok(self.approve("verify", charge.transaction_id))
    }

    async fn capture(&self, op: &GatewayFollowOn) -> Result<GatewayResponse, PaymentError> {
        Ok(self.approve("capture", op.transaction_id))
    }

    async fn void(&self, op: &GatewayFollowOn) -> Result<GatewayResponse, PaymentError> {
        Ok(self.approve("void", op.transaction_id))
    }

    async fn refund(&self, op: &GatewayFollowOn) -> Result<GatewayResponse, PaymentError> {
        Ok(self.approve("refund", op.transaction_id))
    }
}
