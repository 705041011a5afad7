use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::entities::{Transaction, TransactionStatus, TransactionType};
use crate::domain::error::PaymentError;
use crate::domain::money::{Amount, Currency};
use crate::domain::repository::{MerchantRepository, TransactionRepository};
use crate::domain::secrets::SecretStore;
use crate::domain::types::TransactionId;
use crate::infrastructure::gateways::epx::wire::EpxOperation;

type HmacSha256 = Hmac<Sha256>;

/// Campo del formulario que transporta el MAC.
pub const MAC_FIELD: &str = "MAC";

/// Campos firmados, en orden fijo. Los ausentes participan con valor vacío
/// para que omitir un campo no cambie la firma esperada.
const SIGNED_FIELDS: &[&str] = &[
    "CUST_NBR",
    "MERCH_NBR",
    "DBA_NBR",
    "TERMINAL_NBR",
    "TRAN_TYPE",
    "TRAN_NBR",
    "AMOUNT",
    "AUTH_RESP",
    "AUTH_GUID",
];

fn canonical_payload(fields: &HashMap<String, String>) -> String {
    SIGNED_FIELDS
        .iter()
        .map(|key| format!("{}={}", key, fields.get(*key).map(String::as_str).unwrap_or("")))
        .collect::<Vec<_>>()
        .join("&")
}

/// Calcula el MAC (HMAC-SHA256, hex) sobre la lista blanca de campos.
pub fn compute_mac(secret: &str, fields: &HashMap<String, String>) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(canonical_payload(fields).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifica el MAC provisto contra el secreto del comercio, en tiempo
/// constante. Un MAC ausente o inválido es un error de autenticación.
pub fn verify_mac(secret: &str, fields: &HashMap<String, String>) -> Result<(), PaymentError> {
    let provided = fields
        .get(MAC_FIELD)
        .ok_or_else(|| PaymentError::AuthenticationFailed("callback MAC missing".to_string()))?;
    let provided_bytes = hex::decode(provided.trim().to_lowercase()).map_err(|_| {
        PaymentError::AuthenticationFailed("callback MAC is not valid hex".to_string())
    })?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(canonical_payload(fields).as_bytes());
    mac.verify_slice(&provided_bytes).map_err(|_| {
        PaymentError::AuthenticationFailed("callback MAC verification failed".to_string())
    })
}

/// Caso de uso: persistir el resultado del flujo hosted-form.
///
/// El gateway postea el desenlace de un pago iniciado por browser-post; el
/// llamador se autentica verificando el MAC con el secreto del comercio.
/// La operación es idempotente sobre TRAN_NBR: un repost del gateway
/// devuelve la fila ya registrada sin crear otra.
#[derive(Clone)]
pub struct ProcessCallbackUseCase {
    merchant_repo: Arc<dyn MerchantRepository>,
    transaction_repo: Arc<dyn TransactionRepository>,
    secret_store: Arc<dyn SecretStore>,
}

impl ProcessCallbackUseCase {
    pub fn new(
        merchant_repo: Arc<dyn MerchantRepository>,
        transaction_repo: Arc<dyn TransactionRepository>,
        secret_store: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            merchant_repo,
            transaction_repo,
            secret_store,
        }
    }

    #[tracing::instrument(name = "ProcessCallbackUseCase::execute", skip(self, fields))]
    pub async fn execute(
        &self,
        merchant_slug: &str,
        fields: HashMap<String, String>,
    ) -> Result<Transaction, PaymentError> {
        // El gateway identifica el destino por el slug configurado en la
        // URL de retorno. Un comercio desactivado no origina pagos nuevos,
        // pero el desenlace de un pago ya iniciado se registra igual.
        let merchant = self
            .merchant_repo
            .find_by_slug(merchant_slug)
            .await?
            .ok_or_else(|| PaymentError::MerchantSlugNotFound(merchant_slug.to_string()))?;

        let secret = self.secret_store.resolve(merchant.mac_secret_ref())?;
        verify_mac(&secret, &fields)?;

        let tran_nbr = fields
            .get("TRAN_NBR")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                PaymentError::Validation("callback is missing TRAN_NBR".to_string())
            })?;

        // Idempotencia por TRAN_NBR: un repost devuelve la fila existente
        if let Some(existing) = self
            .transaction_repo
            .find_by_tran_nbr(merchant.id(), tran_nbr)
            .await?
        {
            return Ok(existing);
        }

        let tran_type_code = fields.get("TRAN_TYPE").ok_or_else(|| {
            PaymentError::Validation("callback is missing TRAN_TYPE".to_string())
        })?;
        let transaction_type = if tran_type_code == EpxOperation::AuthOnly.tran_type() {
            TransactionType::AUTH
        } else if tran_type_code == EpxOperation::Sale.tran_type() {
            TransactionType::SALE
        } else {
            return Err(PaymentError::Validation(format!(
                "unsupported callback TRAN_TYPE '{}'",
                tran_type_code
            )));
        };

        let currency = Currency::new(
            fields
                .get("CURRENCY_CODE")
                .map(String::as_str)
                .unwrap_or("USD"),
        )?;
        let amount_str = fields.get("AMOUNT").ok_or_else(|| {
            PaymentError::Validation("callback is missing AMOUNT".to_string())
        })?;
        let amount = Amount::from_decimal_str(amount_str, &currency)?;

        let approved = fields.get("AUTH_RESP").map(String::as_str) == Some("00");
        let get = |key: &str| fields.get(key).filter(|v| !v.is_empty()).cloned();

        let row = Transaction::builder()
            .id(TransactionId::new())
            .merchant_id(merchant.id())
            .customer_id(get("CUSTOMER_ID"))
            .transaction_type(transaction_type)
            .status(if approved {
                TransactionStatus::APPROVED
            } else {
                TransactionStatus::DECLINED
            })
            .amount(amount)
            .currency(currency)
            .gateway_token(get("AUTH_GUID"))
            .gateway_tran_nbr(Some(tran_nbr.clone()))
            .auth_code(get("AUTH_CODE"))
            .avs_result(get("AUTH_AVS"))
            .cvv_result(get("AUTH_CVV2"))
            .response_text(get("AUTH_RESP_TEXT"))
            .metadata(serde_json::json!({ "source": "hosted_form_callback" }))
            .build()?;

        self.transaction_repo.save(row).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::{MockMerchantRepository, MockTransactionRepository};
    use crate::use_cases::test_support::{
        active_merchant, stored_transaction, timeline,
    };

    struct StaticSecretStore(&'static str);

    impl SecretStore for StaticSecretStore {
        fn resolve(&self, _secret_ref: &str) -> Result<String, PaymentError> {
            Ok(self.0.to_string())
        }
    }

    const SECRET: &str = "callback-mac-secret";

    fn signed_fields(auth_resp: &str) -> HashMap<String, String> {
        let mut fields: HashMap<String, String> = [
            ("CUST_NBR", "9001"),
            ("MERCH_NBR", "900300"),
            ("DBA_NBR", "1"),
            ("TERMINAL_NBR", "1"),
            ("TRAN_TYPE", "CCE2"),
            ("TRAN_NBR", "1130275151"),
            ("AMOUNT", "99.00"),
            ("AUTH_RESP", auth_resp),
            ("AUTH_GUID", "GUID-CALLBACK"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let mac = compute_mac(SECRET, &fields);
        fields.insert(MAC_FIELD.to_string(), mac);
        fields
    }

    fn use_case(tx_repo: MockTransactionRepository) -> ProcessCallbackUseCase {
        let mut merchant_repo = MockMerchantRepository::new();
        merchant_repo
            .expect_find_by_slug()
            .returning(|_| Ok(Some(active_merchant(crate::domain::types::MerchantId::new()))));

        ProcessCallbackUseCase::new(
            Arc::new(merchant_repo),
            Arc::new(tx_repo),
            Arc::new(StaticSecretStore(SECRET)),
        )
    }

    #[tokio::test]
    async fn test_valid_callback_persists_sale_row() {
        let mut tx_repo = MockTransactionRepository::new();
        tx_repo
            .expect_find_by_tran_nbr()
            .returning(|_, _| Ok(None));
        tx_repo
            .expect_save()
            .withf(|tx: &Transaction| {
                tx.transaction_type() == TransactionType::SALE
                    && tx.status() == TransactionStatus::APPROVED
                    && tx.gateway_token() == Some("GUID-CALLBACK")
                    && tx.gateway_tran_nbr() == Some("1130275151")
                    && tx.amount().minor_units() == 9900
            })
            .times(1)
            .returning(|tx| Ok(tx));

        let use_case = use_case(tx_repo);
        let result = use_case
            .execute("acme", signed_fields("00"))
            .await
            .unwrap();

        assert!(result.is_approved());
    }

    #[tokio::test]
    async fn test_repost_returns_existing_row_without_inserting() {
        let merchant_id = crate::domain::types::MerchantId::new();
        let existing = stored_transaction(
            merchant_id,
            TransactionType::SALE,
            TransactionStatus::APPROVED,
            9900,
            None,
            Some("GUID-CALLBACK"),
            timeline(0),
        );
        let existing_id = existing.id();

        let mut tx_repo = MockTransactionRepository::new();
        tx_repo
            .expect_find_by_tran_nbr()
            .returning(move |_, _| Ok(Some(existing.clone())));

        let mut merchant_repo = MockMerchantRepository::new();
        merchant_repo
            .expect_find_by_slug()
            .returning(move |_| Ok(Some(active_merchant(merchant_id))));

        let use_case = ProcessCallbackUseCase::new(
            Arc::new(merchant_repo),
            Arc::new(tx_repo),
            Arc::new(StaticSecretStore(SECRET)),
        );

        let result = use_case
            .execute("acme", signed_fields("00"))
            .await
            .unwrap();

        assert_eq!(result.id(), existing_id);
    }

    #[tokio::test]
    async fn test_tampered_mac_is_rejected() {
        let use_case = use_case(MockTransactionRepository::new());

        let mut fields = signed_fields("00");
        fields.insert("AMOUNT".to_string(), "1.00".to_string()); // firma rota

        let result = use_case.execute("acme", fields).await;
        assert!(matches!(
            result,
            Err(PaymentError::AuthenticationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_mac_is_rejected() {
        let use_case = use_case(MockTransactionRepository::new());

        let mut fields = signed_fields("00");
        fields.remove(MAC_FIELD);

        let result = use_case.execute("acme", fields).await;
        assert!(matches!(
            result,
            Err(PaymentError::AuthenticationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_declined_callback_is_recorded_as_declined() {
        let mut tx_repo = MockTransactionRepository::new();
        tx_repo
            .expect_find_by_tran_nbr()
            .returning(|_, _| Ok(None));
        tx_repo
            .expect_save()
            .withf(|tx: &Transaction| tx.status() == TransactionStatus::DECLINED)
            .times(1)
            .returning(|tx| Ok(tx));

        let use_case = use_case(tx_repo);
        let result = use_case
            .execute("acme", signed_fields("51"))
            .await
            .unwrap();

        assert_eq!(result.status(), TransactionStatus::DECLINED);
    }

    #[test]
    fn test_mac_round_trip() {
        let fields = signed_fields("00");
        assert!(verify_mac(SECRET, &fields).is_ok());
        assert!(verify_mac("wrong-secret", &fields).is_err());
    }
}
