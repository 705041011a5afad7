use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::entities::{PaymentMethod, PaymentMethodType};
use crate::domain::error::PaymentError;
use crate::domain::gateways::{CardGateway, ChargeSource, GatewayCharge};
use crate::domain::money::{Amount, Currency};
use crate::domain::repository::{MerchantRepository, PaymentMethodRepository};
use crate::domain::types::MerchantId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPaymentMethodCommand {
    pub merchant_id: Uuid,
    pub customer_id: Option<String>,
    pub method_type: PaymentMethodType,
    /// Token de un solo uso obtenido por el browser-post; se canjea por un
    /// token de almacenamiento mediante el probe de verificación.
    pub payment_token: String,
    pub billing_zip: Option<String>,
    pub currency: Option<String>,
    pub expiry: Option<String>,
    pub set_default: bool,
}

/// Caso de uso: registrar un instrumento de pago almacenado.
///
/// Corre el probe de verificación/tokenización de monto cero contra el
/// gateway; si aprueba, persiste el token opaco devuelto junto con los
/// últimos cuatro y la marca. El PAN jamás pasa por aquí.
#[derive(Clone)]
pub struct RegisterPaymentMethodUseCase {
    merchant_repo: Arc<dyn MerchantRepository>,
    payment_method_repo: Arc<dyn PaymentMethodRepository>,
    card_gateway: Arc<dyn CardGateway>,
}

impl RegisterPaymentMethodUseCase {
    pub fn new(
        merchant_repo: Arc<dyn MerchantRepository>,
        payment_method_repo: Arc<dyn PaymentMethodRepository>,
        card_gateway: Arc<dyn CardGateway>,
    ) -> Self {
        Self {
            merchant_repo,
            payment_method_repo,
            card_gateway,
        }
    }

    #[tracing::instrument(name = "RegisterPaymentMethodUseCase::execute", skip(self, command))]
    pub async fn execute(
        &self,
        command: RegisterPaymentMethodCommand,
    ) -> Result<PaymentMethod, PaymentError> {
        let merchant_id = MerchantId(command.merchant_id);
        let merchant = self
            .merchant_repo
            .find_by_id(merchant_id)
            .await?
            .ok_or(PaymentError::MerchantNotFound(merchant_id))?;
        merchant.ensure_active()?;

        if command.payment_token.trim().is_empty() {
            return Err(PaymentError::Validation(
                "payment_token cannot be empty".to_string(),
            ));
        }

        let currency = Currency::new(command.currency.as_deref().unwrap_or("USD"))?;

        let response = self
            .card_gateway
            .verify(&GatewayCharge {
                credentials: merchant.credentials().clone(),
                transaction_id: Uuid::new_v4(),
                amount: Amount::ZERO,
                currency,
                source: ChargeSource::OneTimeToken {
                    token: command.payment_token.clone(),
                    billing_zip: command.billing_zip.clone(),
                },
            })
            .await?;

        if !response.approved {
            return Err(PaymentError::GatewayDeclined {
                code: response.response_code,
                text: response.response_text.unwrap_or_default(),
            });
        }

        let storage_token = response.gateway_token.ok_or_else(|| {
            PaymentError::Internal("verification approved without a storage token".to_string())
        })?;
        let last_four = response.last_four.ok_or_else(|| {
            PaymentError::Internal("verification approved without last four digits".to_string())
        })?;

        let payment_method = PaymentMethod::new(
            merchant.id(),
            command.customer_id.clone(),
            command.method_type,
            storage_token,
            last_four,
            response.card_brand,
            command.expiry.clone(),
            true,
            command.set_default,
        )?;

        self.payment_method_repo.create(payment_method).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::gateways::GatewayResponse;
    use crate::domain::repository::{MockMerchantRepository, MockPaymentMethodRepository};
    use crate::use_cases::test_support::{active_merchant, ScriptedGateway};

    fn command(merchant_id: MerchantId) -> RegisterPaymentMethodCommand {
        RegisterPaymentMethodCommand {
            merchant_id: merchant_id.0,
            customer_id: Some("cust-1".into()),
            method_type: PaymentMethodType::CARD,
            payment_token: "onetime-token".into(),
            billing_zip: Some("19801".into()),
            currency: None,
            expiry: Some("1227".into()),
            set_default: true,
        }
    }

    #[tokio::test]
    async fn test_approved_probe_stores_verified_method() {
        let merchant_id = MerchantId::new();

        let mut merchant_repo = MockMerchantRepository::new();
        merchant_repo
            .expect_find_by_id()
            .returning(|id| Ok(Some(active_merchant(id))));

        let mut pm_repo = MockPaymentMethodRepository::new();
        pm_repo
            .expect_create()
            .withf(|pm: &PaymentMethod| {
                pm.is_verified()
                    && pm.is_default()
                    && pm.storage_token() == "BRIC-NEW"
                    && pm.last_four() == "4242"
            })
            .times(1)
            .returning(|pm| Ok(pm));

        let gateway = ScriptedGateway::new(vec![Ok(GatewayResponse {
            approved: true,
            response_code: "00".into(),
            gateway_token: Some("BRIC-NEW".into()),
            last_four: Some("4242".into()),
            card_brand: Some("VISA".into()),
            ..Default::default()
        })]);

        let use_case = RegisterPaymentMethodUseCase::new(
            Arc::new(merchant_repo),
            Arc::new(pm_repo),
            Arc::new(gateway),
        );

        let result = use_case.execute(command(merchant_id)).await.unwrap();
        assert!(result.is_verified());
    }

    #[tokio::test]
    async fn test_declined_probe_is_surfaced() {
        let merchant_id = MerchantId::new();

        let mut merchant_repo = MockMerchantRepository::new();
        merchant_repo
            .expect_find_by_id()
            .returning(|id| Ok(Some(active_merchant(id))));

        let gateway = ScriptedGateway::new(vec![Ok(GatewayResponse {
            approved: false,
            response_code: "05".into(),
            response_text: Some("DO NOT HONOR".into()),
            ..Default::default()
        })]);

        let use_case = RegisterPaymentMethodUseCase::new(
            Arc::new(merchant_repo),
            Arc::new(MockPaymentMethodRepository::new()),
            Arc::new(gateway),
        );

        let result = use_case.execute(command(merchant_id)).await;
        assert!(matches!(result, Err(PaymentError::GatewayDeclined { .. })));
    }
}
