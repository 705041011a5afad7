use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::entities::{Transaction, TransactionStatus, TransactionType};
use crate::domain::error::PaymentError;
use crate::domain::gateways::{CardGateway, GatewayFollowOn};
use crate::domain::group_state::GroupState;
use crate::domain::money::Amount;
use crate::domain::repository::{
    AmountRecheck, GroupGuard, MerchantRepository, TransactionRepository,
};
use crate::domain::types::{MerchantId, TransactionId};
use crate::use_cases::charge::transaction_from_outcome;
use crate::use_cases::idempotency::{fingerprint, validate_key, IdempotencyCoordinator};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundCommand {
    pub merchant_id: Uuid,
    /// El padre reembolsable (sale o capture aprobado) O la raíz del grupo.
    pub transaction_id: Uuid,
    /// Monto parcial opcional; omitido = todo el remanente del padre.
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
    pub metadata: Option<Value>,
    pub idempotency_key: String,
}

/// Caso de uso: refund (devolver fondos liquidados de un sale o capture).
///
/// Se admiten reembolsos parciales múltiples hasta agotar el remanente del
/// padre; el acumulado de reembolsos aprobados nunca excede lo liquidado.
/// La inserción re-valida el tope por padre bajo el advisory lock del
/// grupo.
#[derive(Clone)]
pub struct RefundUseCase {
    merchant_repo: Arc<dyn MerchantRepository>,
    transaction_repo: Arc<dyn TransactionRepository>,
    card_gateway: Arc<dyn CardGateway>,
    idempotency: IdempotencyCoordinator,
}

impl RefundUseCase {
    pub fn new(
        merchant_repo: Arc<dyn MerchantRepository>,
        transaction_repo: Arc<dyn TransactionRepository>,
        card_gateway: Arc<dyn CardGateway>,
        idempotency: IdempotencyCoordinator,
    ) -> Self {
        Self {
            merchant_repo,
            transaction_repo,
            card_gateway,
            idempotency,
        }
    }

    #[tracing::instrument(name = "RefundUseCase::execute", skip(self, command))]
    pub async fn execute(&self, command: RefundCommand) -> Result<Transaction, PaymentError> {
        validate_key(&command.idempotency_key)?;
        let request_fingerprint = fingerprint(&command)?;

        let merchant_id = MerchantId(command.merchant_id);
        let merchant = self
            .merchant_repo
            .find_by_id(merchant_id)
            .await?
            .ok_or(PaymentError::MerchantNotFound(merchant_id))?;
        merchant.ensure_active()?;

        let referenced_id = TransactionId(command.transaction_id);
        let referenced = self
            .transaction_repo
            .find_by_id(referenced_id)
            .await?
            .ok_or(PaymentError::TransactionNotFound(referenced_id))?;

        if referenced.merchant_id() != merchant.id() {
            return Err(PaymentError::PermissionDenied(
                "transaction belongs to another merchant".to_string(),
            ));
        }

        let group_root = self.transaction_repo.find_group_root(referenced_id).await?;
        let history = self.transaction_repo.find_tree(group_root).await?;
        let state = GroupState::compute(&history);

        // Padre explícito si el llamador apuntó a un sale/capture; modo
        // grupo (primer padre con remanente) si apuntó a la raíz.
        let explicit = if referenced_id == group_root
            && referenced.transaction_type() == TransactionType::AUTH
        {
            None
        } else {
            Some(referenced_id)
        };
        let refundable = state
            .resolve_refund_parent(explicit)
            .map_err(|reason| PaymentError::CannotRefund {
                reason: reason.to_string(),
            })?
            .clone();

        let parent_row = history
            .iter()
            .find(|t| t.id() == refundable.id)
            .cloned()
            .ok_or_else(|| {
                PaymentError::Internal("refundable parent missing from group history".to_string())
            })?;

        let amount = match command.amount {
            Some(decimal) => {
                let amount = Amount::from_decimal(decimal, parent_row.currency())?;
                if amount.is_zero() {
                    return Err(PaymentError::CannotRefund {
                        reason: "non_positive_amount".to_string(),
                    });
                }
                amount
            }
            None => {
                let remaining = refundable.remaining();
                if remaining.is_zero() {
                    return Err(PaymentError::CannotRefund {
                        reason: "exceeds_refundable".to_string(),
                    });
                }
                remaining
            }
        };

        // Tope por padre y tope global del grupo
        if refundable
            .refunded
            .checked_add(amount)
            .map(|total| total > refundable.amount)
            .unwrap_or(true)
        {
            return Err(PaymentError::CannotRefund {
                reason: "exceeds_refundable".to_string(),
            });
        }
        state
            .can_refund(amount)
            .map_err(|reason| PaymentError::CannotRefund {
                reason: reason.to_string(),
            })?;

        let parent_gateway_token = parent_row
            .gateway_token()
            .ok_or_else(|| {
                PaymentError::Internal(
                    "refundable parent is missing its gateway token".to_string(),
                )
            })?
            .to_string();

        let gateway = self.card_gateway.clone();
        let transaction_repo = self.transaction_repo.clone();
        let credentials = merchant.credentials().clone();
        let currency = parent_row.currency().clone();
        let customer_id = parent_row.customer_id().map(str::to_string);
        let parent_id = refundable.id;
        let parent_cap = refundable.amount;
        let key = command.idempotency_key.clone();

        let mut metadata = command
            .metadata
            .clone()
            .unwrap_or_else(|| serde_json::json!({}));
        if let Some(reason) = &command.reason {
            if let Value::Object(ref mut map) = metadata {
                map.insert("refund_reason".to_string(), Value::String(reason.clone()));
            }
        }

        self.idempotency
            .execute(merchant_id, &key, &request_fingerprint, || async move {
                let transaction_id = TransactionId::new();
                let outcome = gateway
                    .refund(&GatewayFollowOn {
                        credentials,
                        transaction_id: transaction_id.0,
                        amount,
                        currency: currency.clone(),
                        parent_gateway_token: parent_gateway_token.clone(),
                    })
                    .await;

                let row = transaction_from_outcome(
                    transaction_id,
                    merchant_id,
                    TransactionType::REFUND,
                    amount,
                    currency,
                    customer_id,
                    None,
                    Some((parent_id, parent_gateway_token.clone())),
                    Some(command.idempotency_key.clone()),
                    metadata,
                    outcome,
                )?;

                let guard = GroupGuard {
                    group_root,
                    recheck: if row.status() == TransactionStatus::APPROVED {
                        Some(AmountRecheck {
                            parent_id,
                            kind: TransactionType::REFUND,
                            cap: parent_cap,
                        })
                    } else {
                        None
                    },
                };

                transaction_repo.save_guarded(row, guard).await
            })
            .await
    }
}
