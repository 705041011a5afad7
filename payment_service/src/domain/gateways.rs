use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::entities::GatewayCredentials;
use crate::domain::error::PaymentError;
use crate::domain::money::{Amount, Currency};

/// Fuente de fondos para una operación de cargo (auth/sale/verify):
/// exactamente una de un token almacenado o un token de un solo uso
/// obtenido por el browser-post. Nunca un PAN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeSource {
    StoredToken(String),
    OneTimeToken {
        token: String,
        billing_zip: Option<String>,
    },
}

/// Request de cargo contra el gateway. `transaction_id` es el UUID de la
/// fila local: de él se deriva el TRAN_NBR determinista de 10 dígitos, así
/// un reintento del mismo intento lógico presenta el mismo número y el
/// gateway de-duplica de su lado.
#[derive(Debug, Clone)]
pub struct GatewayCharge {
    pub credentials: GatewayCredentials,
    pub transaction_id: Uuid,
    pub amount: Amount,
    pub currency: Currency,
    pub source: ChargeSource,
}

/// Request follow-on (capture/void/refund): enlaza con la operación padre
/// a través de su gateway token (ORIG_AUTH_GUID en el wire).
#[derive(Debug, Clone)]
pub struct GatewayFollowOn {
    pub credentials: GatewayCredentials,
    pub transaction_id: Uuid,
    pub amount: Amount,
    pub currency: Currency,
    pub parent_gateway_token: String,
}

/// Respuesta estructurada del gateway, ya interpretada.
///
/// `approved == false` con `Ok(..)` significa un decline confirmado por el
/// gateway; los fallos de transporte/parseo/circuito abierto llegan como
/// `Err(PaymentError::GatewayUnavailable)`.
#[derive(Debug, Clone, Default)]
pub struct GatewayResponse {
    pub approved: bool,
    pub response_code: String,
    pub response_text: Option<String>,
    pub auth_code: Option<String>,
    pub avs_result: Option<String>,
    pub cvv_result: Option<String>,
    pub card_brand: Option<String>,
    pub last_four: Option<String>,
    pub masked_card: Option<String>,
    /// AUTH_GUID devuelto para ESTA operación; es el handle para
    /// capture/void/refund posteriores.
    pub gateway_token: Option<String>,
    /// Eco del TRAN_NBR presentado.
    pub tran_nbr_echo: Option<String>,
    /// Cuerpo crudo para auditoría (se loguea solo en debug, redactado).
    pub raw_body: String,
}

// Puerto hacia el gateway de tarjetas. La implementación real (EPX) vive en
// infrastructure::gateways; FakeCardGateway aprueba todo para desarrollo.
#[async_trait]
pub trait CardGateway: Send + Sync {
    /// Retiene fondos sin transferirlos.
    async fn authorize(&self, charge: &GatewayCharge) -> Result<GatewayResponse, PaymentError>;

    /// Auth + capture en una sola operación.
    async fn sale(&self, charge: &GatewayCharge) -> Result<GatewayResponse, PaymentError>;

    /// Probe de verificación/tokenización de un instrumento (monto cero).
    async fn verify(&self, charge: &GatewayCharge) -> Result<GatewayResponse, PaymentError>;

    /// Liquida parte o todo de un auth previo.
    async fn capture(&self, op: &GatewayFollowOn) -> Result<GatewayResponse, PaymentError>;

    /// Cancela un auth/sale no liquidado.
    async fn void(&self, op: &GatewayFollowOn) -> Result<GatewayResponse, PaymentError>;

    /// Devuelve fondos liquidados de un sale/capture.
    async fn refund(&self, op: &GatewayFollowOn) -> Result<GatewayResponse, PaymentError>;
}
