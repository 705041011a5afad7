use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::entities::GatewayCredentials;
use crate::domain::gateways::ChargeSource;
use crate::domain::money::{Amount, Currency};

/// Operación en el wire del gateway EPX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpxOperation {
    AuthOnly,
    Sale,
    Capture,
    Void,
    Refund,
    Verify,
}

impl EpxOperation {
    /// Código TRAN_TYPE de la operación.
    pub fn tran_type(&self) -> &'static str {
        match self {
            EpxOperation::AuthOnly => "CCE1",
            EpxOperation::Sale => "CCE2",
            EpxOperation::Capture => "CCE9",
            EpxOperation::Refund => "CCE4",
            EpxOperation::Void => "CCEX",
            EpxOperation::Verify => "CCE0",
        }
    }

    /// Clase de la transacción (TRAN_GROUP). Es la CLASE de la operación en
    /// el wire, no un marcador de parentesco: el enlace al padre viaja
    /// exclusivamente en ORIG_AUTH_GUID.
    pub fn tran_group(&self) -> &'static str {
        match self {
            EpxOperation::AuthOnly | EpxOperation::Verify => "AUTH",
            EpxOperation::Sale
            | EpxOperation::Capture
            | EpxOperation::Refund
            | EpxOperation::Void => "SALE",
        }
    }
}

/// Deriva el TRAN_NBR determinista de 10 dígitos decimales del UUID de la
/// fila local. Un reintento del mismo intento lógico presenta exactamente
/// el mismo número, lo que habilita la de-duplicación del lado del gateway.
pub fn tran_nbr(transaction_id: Uuid) -> String {
    format!("{:010}", transaction_id.as_u128() % 10_000_000_000)
}

/// Regla de enmascaramiento: últimos cuatro del gateway, los 12 primeros
/// reemplazados con `X`.
pub fn mask_card(last_four: &str) -> String {
    format!("XXXXXXXXXXXX{}", last_four)
}

/// Instrumento presentado en una operación de cargo.
#[derive(Debug, Clone)]
pub enum WireSource {
    /// Token de gateway previo (instrumento almacenado o padre follow-on).
    OrigAuthGuid(String),
    /// Token de un solo uso del browser-post, con ZIP de facturación.
    OneTime {
        token: String,
        billing_zip: Option<String>,
    },
}

impl From<&ChargeSource> for WireSource {
    fn from(source: &ChargeSource) -> Self {
        match source {
            ChargeSource::StoredToken(token) => WireSource::OrigAuthGuid(token.clone()),
            ChargeSource::OneTimeToken { token, billing_zip } => WireSource::OneTime {
                token: token.clone(),
                billing_zip: billing_zip.clone(),
            },
        }
    }
}

/// Request plano hacia EPX, listo para codificarse como formulario.
#[derive(Debug, Clone)]
pub struct EpxRequest {
    pub credentials: GatewayCredentials,
    pub operation: EpxOperation,
    pub transaction_id: Uuid,
    pub amount: Amount,
    pub currency: Currency,
    pub source: Option<WireSource>,
}

impl EpxRequest {
    /// Codifica el request como la lista ordenada de pares clave/valor del
    /// formulario. El orden es parte del contrato con el gateway: codificar
    /// dos veces el mismo request lógico produce cuerpos idénticos byte a
    /// byte, con la única excepción de los campos de fecha/hora/batch.
    pub fn to_form(&self, now: DateTime<Utc>) -> Vec<(&'static str, String)> {
        let mut fields: Vec<(&'static str, String)> = vec![
            ("CUST_NBR", self.credentials.cust_nbr().to_string()),
            ("MERCH_NBR", self.credentials.merch_nbr().to_string()),
            ("DBA_NBR", self.credentials.dba_nbr().to_string()),
            ("TERMINAL_NBR", self.credentials.terminal_nbr().to_string()),
            ("TRAN_TYPE", self.operation.tran_type().to_string()),
            ("TRAN_GROUP", self.operation.tran_group().to_string()),
            ("TRAN_NBR", tran_nbr(self.transaction_id)),
            ("BATCH_ID", now.format("%Y%m%d").to_string()),
            ("LOCAL_DATE", now.format("%m%d%y").to_string()),
            ("LOCAL_TIME", now.format("%H%M%S").to_string()),
            ("AMOUNT", self.amount.to_decimal(&self.currency).to_string()),
        ];

        match &self.source {
            Some(WireSource::OrigAuthGuid(guid)) => {
                fields.push(("ORIG_AUTH_GUID", guid.clone()));
            }
            Some(WireSource::OneTime { token, billing_zip }) => {
                fields.push(("ACCOUNT_NBR", token.clone()));
                if let Some(zip) = billing_zip {
                    fields.push(("ZIP_CODE", zip.clone()));
                }
            }
            None => {}
        }

        fields
    }

    /// Claves cuyo valor nunca debe aparecer en logs.
    pub fn sensitive_keys() -> &'static [&'static str] {
        &["ACCOUNT_NBR", "CVV2"]
    }

    /// Copia del formulario con los campos sensibles redactados, para el
    /// logging de debug.
    pub fn redacted_form(&self, now: DateTime<Utc>) -> Vec<(&'static str, String)> {
        self.to_form(now)
            .into_iter()
            .map(|(key, value)| {
                if Self::sensitive_keys().contains(&key) {
                    (key, "***".to_string())
                } else {
                    (key, value)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn credentials() -> GatewayCredentials {
        GatewayCredentials::new("9001".into(), "900300".into(), "2".into(), "77".into()).unwrap()
    }

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    #[test]
    fn test_tran_nbr_is_ten_digits_and_deterministic() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();

        let first = tran_nbr(id);
        let second = tran_nbr(id);

        assert_eq!(first.len(), 10);
        assert!(first.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(first, second);
    }

    #[test]
    fn test_tran_nbr_differs_for_different_uuids() {
        let a = tran_nbr(Uuid::new_v4());
        let b = tran_nbr(Uuid::new_v4());
        // No es una garantía criptográfica, pero dos UUIDs aleatorios
        // prácticamente nunca colisionan en el módulo de 10 dígitos.
        assert_ne!(a, b);
    }

    #[test]
    fn test_mask_card_rule() {
        assert_eq!(mask_card("4242"), "XXXXXXXXXXXX4242");
    }

    #[test]
    fn test_form_field_order_is_stable() {
        let now = Utc.with_ymd_and_hms(2025, 3, 15, 14, 30, 45).unwrap();
        let request = EpxRequest {
            credentials: credentials(),
            operation: EpxOperation::AuthOnly,
            transaction_id: Uuid::new_v4(),
            amount: Amount::from_minor_units(10050).unwrap(),
            currency: usd(),
            source: Some(WireSource::OrigAuthGuid("BRIC-123".into())),
        };

        let form = request.to_form(now);
        let keys: Vec<&str> = form.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec![
                "CUST_NBR",
                "MERCH_NBR",
                "DBA_NBR",
                "TERMINAL_NBR",
                "TRAN_TYPE",
                "TRAN_GROUP",
                "TRAN_NBR",
                "BATCH_ID",
                "LOCAL_DATE",
                "LOCAL_TIME",
                "AMOUNT",
                "ORIG_AUTH_GUID",
            ]
        );
    }

    #[test]
    fn test_form_encoding_is_reproducible() {
        let now = Utc.with_ymd_and_hms(2025, 3, 15, 14, 30, 45).unwrap();
        let request = EpxRequest {
            credentials: credentials(),
            operation: EpxOperation::Sale,
            transaction_id: Uuid::new_v4(),
            amount: Amount::from_minor_units(9900).unwrap(),
            currency: usd(),
            source: Some(WireSource::OrigAuthGuid("BRIC-9".into())),
        };

        assert_eq!(request.to_form(now), request.to_form(now));
    }

    #[test]
    fn test_amount_has_currency_scale() {
        let now = Utc.with_ymd_and_hms(2025, 3, 15, 14, 30, 45).unwrap();
        let request = EpxRequest {
            credentials: credentials(),
            operation: EpxOperation::Sale,
            transaction_id: Uuid::new_v4(),
            amount: Amount::from_minor_units(10000).unwrap(),
            currency: usd(),
            source: None,
        };

        let form = request.to_form(now);
        let amount = form.iter().find(|(k, _)| *k == "AMOUNT").unwrap();
        assert_eq!(amount.1, "100.00");

        let batch = form.iter().find(|(k, _)| *k == "BATCH_ID").unwrap();
        assert_eq!(batch.1, "20250315");
        let date = form.iter().find(|(k, _)| *k == "LOCAL_DATE").unwrap();
        assert_eq!(date.1, "031525");
        let time = form.iter().find(|(k, _)| *k == "LOCAL_TIME").unwrap();
        assert_eq!(time.1, "143045");
    }

    #[test]
    fn test_one_time_token_goes_to_account_nbr_and_is_redacted() {
        let now = Utc.with_ymd_and_hms(2025, 3, 15, 14, 30, 45).unwrap();
        let request = EpxRequest {
            credentials: credentials(),
            operation: EpxOperation::AuthOnly,
            transaction_id: Uuid::new_v4(),
            amount: Amount::from_minor_units(100).unwrap(),
            currency: usd(),
            source: Some(WireSource::OneTime {
                token: "onetime-token-xyz".into(),
                billing_zip: Some("19801".into()),
            }),
        };

        let form = request.to_form(now);
        assert!(form.iter().any(|(k, v)| *k == "ACCOUNT_NBR" && v == "onetime-token-xyz"));
        assert!(form.iter().any(|(k, v)| *k == "ZIP_CODE" && v == "19801"));

        let redacted = request.redacted_form(now);
        assert!(redacted.iter().any(|(k, v)| *k == "ACCOUNT_NBR" && v == "***"));
        assert!(redacted.iter().any(|(k, v)| *k == "ZIP_CODE" && v == "19801"));
    }
}
