use std::sync::Arc;

use crate::domain::entities::{Transaction, TransactionType};
use crate::domain::error::PaymentError;
use crate::domain::gateways::{CardGateway, GatewayCharge};
use crate::domain::repository::{
    MerchantRepository, PaymentMethodRepository, TransactionRepository,
};
use crate::domain::types::TransactionId;
use crate::use_cases::charge::{
    persist_outcome, prepare_charge, transaction_from_outcome, ChargeCommand,
};
use crate::use_cases::idempotency::{fingerprint, validate_key, IdempotencyCoordinator};

/// Caso de uso: sale (auth + capture en una sola llamada al gateway).
///
/// Produce una única fila SALE sin padre; la venta es su propio padre
/// reembolsable para los refunds posteriores del grupo.
#[derive(Clone)]
pub struct SaleUseCase {
    merchant_repo: Arc<dyn MerchantRepository>,
    payment_method_repo: Arc<dyn PaymentMethodRepository>,
    transaction_repo: Arc<dyn TransactionRepository>,
    card_gateway: Arc<dyn CardGateway>,
    idempotency: IdempotencyCoordinator,
}

impl SaleUseCase {
    pub fn new(
        merchant_repo: Arc<dyn MerchantRepository>,
        payment_method_repo: Arc<dyn PaymentMethodRepository>,
        transaction_repo: Arc<dyn TransactionRepository>,
        card_gateway: Arc<dyn CardGateway>,
        idempotency: IdempotencyCoordinator,
    ) -> Self {
        Self {
            merchant_repo,
            payment_method_repo,
            transaction_repo,
            card_gateway,
            idempotency,
        }
    }

    #[tracing::instrument(name = "SaleUseCase::execute", skip(self, command))]
    pub async fn execute(&self, command: ChargeCommand) -> Result<Transaction, PaymentError> {
        validate_key(&command.idempotency_key)?;
        let request_fingerprint = fingerprint(&command)?;

        let prepared = prepare_charge(
            self.merchant_repo.as_ref(),
            self.payment_method_repo.as_ref(),
            &command,
        )
        .await?;

        let gateway = self.card_gateway.clone();
        let transaction_repo = self.transaction_repo.clone();
        let merchant_id = prepared.merchant.id();
        let key = command.idempotency_key.clone();

        self.idempotency
            .execute(merchant_id, &key, &request_fingerprint, || async move {
                let transaction_id = TransactionId::new();
                let gateway_charge = GatewayCharge {
                    credentials: prepared.merchant.credentials().clone(),
                    transaction_id: transaction_id.0,
                    amount: prepared.amount,
                    currency: prepared.currency.clone(),
                    source: prepared.source.clone(),
                };

                let outcome = gateway.sale(&gateway_charge).await;

                let row = transaction_from_outcome(
                    transaction_id,
                    merchant_id,
                    TransactionType::SALE,
                    prepared.amount,
                    prepared.currency.clone(),
                    command.customer_id.clone(),
                    prepared.payment_method_id,
                    None,
                    Some(command.idempotency_key.clone()),
                    command.metadata.clone().unwrap_or_else(|| serde_json::json!({})),
                    outcome,
                )?;

                persist_outcome(transaction_repo.as_ref(), row).await
            })
            .await
    }
}
