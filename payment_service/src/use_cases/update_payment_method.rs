use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::entities::PaymentMethod;
use crate::domain::error::PaymentError;
use crate::domain::repository::PaymentMethodRepository;
use crate::domain::types::{MerchantId, PaymentMethodId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePaymentMethodCommand {
    pub card_brand: Option<String>,
    pub expiry: Option<String>,
    pub set_default: Option<bool>,
}

/// Caso de uso: actualizar la metadata mutable de un método de pago.
///
/// Marca, expiración y la bandera default son editables; el storage token
/// es inmutable (reemplazar el instrumento es registrar uno nuevo).
#[derive(Clone)]
pub struct UpdatePaymentMethodUseCase {
    payment_method_repo: Arc<dyn PaymentMethodRepository>,
}

impl UpdatePaymentMethodUseCase {
    pub fn new(payment_method_repo: Arc<dyn PaymentMethodRepository>) -> Self {
        Self { payment_method_repo }
    }

    #[tracing::instrument(name = "UpdatePaymentMethodUseCase::execute", skip(self, command))]
    pub async fn execute(
        &self,
        merchant_id: Uuid,
        payment_method_id: Uuid,
        command: UpdatePaymentMethodCommand,
    ) -> Result<PaymentMethod, PaymentError> {
        if let Some(ref expiry) = command.expiry {
            if expiry.len() != 4 || !expiry.chars().all(|c| c.is_ascii_digit()) {
                return Err(PaymentError::Validation(format!(
                    "expiry must be MMYY, got '{}'",
                    expiry
                )));
            }
        }

        let id = PaymentMethodId(payment_method_id);
        let payment_method = self
            .payment_method_repo
            .find_by_id(id)
            .await?
            .ok_or(PaymentError::PaymentMethodNotFound(id))?;

        if payment_method.merchant_id() != MerchantId(merchant_id)
            || payment_method.is_deleted()
        {
            return Err(PaymentError::PaymentMethodNotFound(id));
        }

        self.payment_method_repo
            .update_metadata(id, command.card_brand, command.expiry, command.set_default)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::MockPaymentMethodRepository;
    use crate::use_cases::test_support::verified_payment_method;

    #[tokio::test]
    async fn test_updates_mutable_metadata() {
        let merchant_id = MerchantId::new();
        let pm_id = PaymentMethodId::new();
        let pm = verified_payment_method(pm_id, merchant_id);

        let mut pm_repo = MockPaymentMethodRepository::new();
        let found = pm.clone();
        pm_repo
            .expect_find_by_id()
            .returning(move |_| Ok(Some(found.clone())));
        pm_repo
            .expect_update_metadata()
            .withf(|_, brand, expiry, default| {
                brand.as_deref() == Some("MC") && expiry.is_none() && *default == Some(false)
            })
            .times(1)
            .returning(move |_, _, _, _| Ok(pm.clone()));

        let use_case = UpdatePaymentMethodUseCase::new(Arc::new(pm_repo));
        let result = use_case
            .execute(
                merchant_id.0,
                pm_id.0,
                UpdatePaymentMethodCommand {
                    card_brand: Some("MC".into()),
                    expiry: None,
                    set_default: Some(false),
                },
            )
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_expiry_is_rejected() {
        let use_case =
            UpdatePaymentMethodUseCase::new(Arc::new(MockPaymentMethodRepository::new()));

        let result = use_case
            .execute(
                Uuid::new_v4(),
                Uuid::new_v4(),
                UpdatePaymentMethodCommand {
                    expiry: Some("13/27".into()),
                    ..Default::default()
                },
            )
            .await;

        assert!(matches!(result, Err(PaymentError::Validation(_))));
    }
}
