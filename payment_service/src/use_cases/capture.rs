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
pub struct CaptureCommand {
    pub merchant_id: Uuid,
    /// El auth aprobado contra el que se captura.
    pub parent_transaction_id: Uuid,
    /// Monto parcial opcional; omitido = todo el remanente autorizado.
    pub amount: Option<Decimal>,
    pub metadata: Option<Value>,
    pub idempotency_key: String,
}

/// Caso de uso: capture (liquidar fondos retenidos por un auth).
///
/// Lee el árbol del grupo, deriva el estado agregado y valida
/// `can_capture` ANTES de tocar el gateway; la inserción de la fila
/// re-valida el invariante de monto bajo el advisory lock del grupo, de
/// modo que dos capturas concurrentes jamás excedan el monto autorizado.
/// Se permiten capturas parciales múltiples mientras el acumulado quepa.
#[derive(Clone)]
pub struct CaptureUseCase {
    merchant_repo: Arc<dyn MerchantRepository>,
    transaction_repo: Arc<dyn TransactionRepository>,
    card_gateway: Arc<dyn CardGateway>,
    idempotency: IdempotencyCoordinator,
}

impl CaptureUseCase {
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

    #[tracing::instrument(name = "CaptureUseCase::execute", skip(self, command))]
    pub async fn execute(&self, command: CaptureCommand) -> Result<Transaction, PaymentError> {
        validate_key(&command.idempotency_key)?;
        let request_fingerprint = fingerprint(&command)?;

        let merchant_id = MerchantId(command.merchant_id);
        let merchant = self
            .merchant_repo
            .find_by_id(merchant_id)
            .await?
            .ok_or(PaymentError::MerchantNotFound(merchant_id))?;
        merchant.ensure_active()?;

        let parent_id = TransactionId(command.parent_transaction_id);
        let parent = self
            .transaction_repo
            .find_by_id(parent_id)
            .await?
            .ok_or(PaymentError::TransactionNotFound(parent_id))?;

        if parent.merchant_id() != merchant.id() {
            return Err(PaymentError::PermissionDenied(
                "transaction belongs to another merchant".to_string(),
            ));
        }
        if parent.transaction_type() != TransactionType::AUTH || !parent.is_approved() {
            return Err(PaymentError::CannotCapture {
                reason: "parent_not_approved_auth".to_string(),
            });
        }

        // Lectura del árbol y cómputo de estado FUERA de cualquier lock
        let group_root = self.transaction_repo.find_group_root(parent_id).await?;
        let history = self.transaction_repo.find_tree(group_root).await?;
        let state = GroupState::compute(&history);

        let amount = match command.amount {
            Some(decimal) => {
                let amount = Amount::from_decimal(decimal, parent.currency())?;
                if amount.is_zero() {
                    return Err(PaymentError::CannotCapture {
                        reason: "non_positive_amount".to_string(),
                    });
                }
                amount
            }
            None => {
                if state.is_auth_voided() {
                    return Err(PaymentError::CannotCapture {
                        reason: "voided".to_string(),
                    });
                }
                let remaining = state
                    .active_auth_amount()
                    .saturating_sub(state.captured_amount());
                if remaining.is_zero() {
                    return Err(PaymentError::CannotCapture {
                        reason: "exceeds_authorized".to_string(),
                    });
                }
                remaining
            }
        };

        state
            .can_capture(amount)
            .map_err(|reason| PaymentError::CannotCapture {
                reason: reason.to_string(),
            })?;

        let parent_gateway_token = parent
            .gateway_token()
            .ok_or_else(|| {
                PaymentError::Internal("approved auth is missing its gateway token".to_string())
            })?
            .to_string();

        let gateway = self.card_gateway.clone();
        let transaction_repo = self.transaction_repo.clone();
        let credentials = merchant.credentials().clone();
        let currency = parent.currency().clone();
        let customer_id = parent.customer_id().map(str::to_string);
        let auth_cap = state.active_auth_amount();
        let key = command.idempotency_key.clone();

        self.idempotency
            .execute(merchant_id, &key, &request_fingerprint, || async move {
                let transaction_id = TransactionId::new();
                let outcome = gateway
                    .capture(&GatewayFollowOn {
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
                    TransactionType::CAPTURE,
                    amount,
                    currency,
                    customer_id,
                    None,
                    Some((parent_id, parent_gateway_token.clone())),
                    Some(command.idempotency_key.clone()),
                    command.metadata.clone().unwrap_or_else(|| serde_json::json!({})),
                    outcome,
                )?;

                // Solo una fila APPROVED cuenta contra el monto autorizado;
                // las filas DECLINED/ERROR se guardan sin re-chequeo.
                let guard = GroupGuard {
                    group_root,
                    recheck: if row.status() == TransactionStatus::APPROVED {
                        Some(AmountRecheck {
                            parent_id,
                            kind: TransactionType::CAPTURE,
                            cap: auth_cap,
                        })
                    } else {
                        None
                    },
                };

                match transaction_repo.save_guarded(row, guard).await {
                    Ok(saved) => Ok(saved),
                    Err(e @ PaymentError::CannotCapture { .. }) => {
                        // El gateway ya capturó pero otra captura concurrente
                        // ganó la carrera: queda para conciliación manual.
                        tracing::error!(
                            parent_transaction_id = %parent_id,
                            gateway_token = %parent_gateway_token,
                            "approved capture lost the group race; needs reconciliation"
                        );
                        Err(e)
                    }
                    Err(e) => Err(e),
                }
            })
            .await
    }
}
