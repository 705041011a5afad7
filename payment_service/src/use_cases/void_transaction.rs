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
pub struct VoidCommand {
    pub merchant_id: Uuid,
    /// La raíz del grupo O la transacción objetivo; el objetivo anulable
    /// real se resuelve del estado del grupo.
    pub transaction_id: Uuid,
    pub metadata: Option<Value>,
    pub idempotency_key: String,
}

/// Caso de uso: void (cancelar un auth o sale no liquidado).
///
/// Resuelve el objetivo anulable del grupo: un auth aprobado sin capturas,
/// o un sale aprobado sin reembolsos. Un auth con capturas aprobadas no
/// puede anularse (debe usarse refund tras la ventana de liquidación).
/// Tras el void, el auth activo queda limpio y toda captura posterior se
/// rechaza.
#[derive(Clone)]
pub struct VoidTransactionUseCase {
    merchant_repo: Arc<dyn MerchantRepository>,
    transaction_repo: Arc<dyn TransactionRepository>,
    card_gateway: Arc<dyn CardGateway>,
    idempotency: IdempotencyCoordinator,
}

impl VoidTransactionUseCase {
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

    #[tracing::instrument(name = "VoidTransactionUseCase::execute", skip(self, command))]
    pub async fn execute(&self, command: VoidCommand) -> Result<Transaction, PaymentError> {
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

        let target_id = state
            .can_void()
            .map_err(|reason| PaymentError::CannotVoid {
                reason: reason.to_string(),
            })?;

        // El llamador puede apuntar a la raíz del grupo o al objetivo mismo
        if referenced_id != group_root && referenced_id != target_id {
            return Err(PaymentError::CannotVoid {
                reason: "not_voidable".to_string(),
            });
        }

        let target = history
            .iter()
            .find(|t| t.id() == target_id)
            .cloned()
            .ok_or_else(|| {
                PaymentError::Internal("voidable target missing from group history".to_string())
            })?;

        let parent_gateway_token = target
            .gateway_token()
            .ok_or_else(|| {
                PaymentError::Internal(
                    "voidable transaction is missing its gateway token".to_string(),
                )
            })?
            .to_string();

        let gateway = self.card_gateway.clone();
        let transaction_repo = self.transaction_repo.clone();
        let credentials = merchant.credentials().clone();
        let currency = target.currency().clone();
        let customer_id = target.customer_id().map(str::to_string);
        let amount = target.amount();
        let target_type = target.transaction_type();
        let key = command.idempotency_key.clone();

        self.idempotency
            .execute(merchant_id, &key, &request_fingerprint, || async move {
                let transaction_id = TransactionId::new();
                let outcome = gateway
                    .void(&GatewayFollowOn {
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
                    TransactionType::VOID,
                    amount,
                    currency,
                    customer_id,
                    None,
                    Some((target_id, parent_gateway_token.clone())),
                    Some(command.idempotency_key.clone()),
                    command.metadata.clone().unwrap_or_else(|| serde_json::json!({})),
                    outcome,
                )?;

                // Bajo el lock del grupo exigimos que el objetivo siga
                // intacto: sin capturas (auth) o sin reembolsos (sale)
                // aparecidos entre el chequeo de estado y esta escritura.
                let guard = GroupGuard {
                    group_root,
                    recheck: if row.status() == TransactionStatus::APPROVED {
                        Some(AmountRecheck {
                            parent_id: target_id,
                            kind: if target_type == TransactionType::AUTH {
                                TransactionType::CAPTURE
                            } else {
                                TransactionType::REFUND
                            },
                            cap: Amount::ZERO,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::{MockMerchantRepository, MockTransactionRepository};
    use crate::use_cases::test_support::{
        active_merchant, approved_response, leader_idempotency, stored_transaction, timeline,
        ScriptedGateway,
    };

    fn mocks_for(
        history: Vec<Transaction>,
        root: TransactionId,
        expect_save: bool,
    ) -> (MockMerchantRepository, MockTransactionRepository) {
        let mut merchant_repo = MockMerchantRepository::new();
        merchant_repo
            .expect_find_by_id()
            .returning(|id| Ok(Some(active_merchant(id))));

        let mut tx_repo = MockTransactionRepository::new();
        let by_id: Vec<Transaction> = history.clone();
        tx_repo.expect_find_by_id().returning(move |id| {
            Ok(by_id.iter().find(|t| t.id() == id).cloned())
        });
        tx_repo.expect_find_group_root().returning(move |_| Ok(root));
        tx_repo
            .expect_find_tree()
            .returning(move |_| Ok(history.clone()));
        if expect_save {
            tx_repo
                .expect_save_guarded()
                .times(1)
                .returning(|tx, _| Ok(tx));
        }
        (merchant_repo, tx_repo)
    }

    #[tokio::test]
    async fn test_void_of_uncaptured_auth() {
        let merchant_id = MerchantId::new();
        let auth = stored_transaction(
            merchant_id,
            TransactionType::AUTH,
            TransactionStatus::APPROVED,
            5000,
            None,
            Some("GUID-AUTH"),
            timeline(0),
        );
        let root = auth.id();
        let (merchant_repo, tx_repo) = mocks_for(vec![auth.clone()], root, true);

        let use_case = VoidTransactionUseCase::new(
            Arc::new(merchant_repo),
            Arc::new(tx_repo),
            Arc::new(ScriptedGateway::new(vec![Ok(approved_response(
                "GUID-VOID",
            ))])),
            leader_idempotency(),
        );

        let result = use_case
            .execute(VoidCommand {
                merchant_id: merchant_id.0,
                transaction_id: root.0,
                metadata: None,
                idempotency_key: "void-key-1".into(),
            })
            .await
            .unwrap();

        assert_eq!(result.transaction_type(), TransactionType::VOID);
        assert_eq!(result.parent_transaction_id(), Some(auth.id()));
        assert_eq!(result.parent_gateway_token(), Some("GUID-AUTH"));
        assert_eq!(result.amount().minor_units(), 5000);
    }

    #[tokio::test]
    async fn test_void_of_captured_auth_is_rejected() {
        let merchant_id = MerchantId::new();
        let auth = stored_transaction(
            merchant_id,
            TransactionType::AUTH,
            TransactionStatus::APPROVED,
            10000,
            None,
            Some("GUID-AUTH"),
            timeline(0),
        );
        let capture = stored_transaction(
            merchant_id,
            TransactionType::CAPTURE,
            TransactionStatus::APPROVED,
            3000,
            Some(auth.id()),
            Some("GUID-CAP"),
            timeline(10),
        );
        let root = auth.id();
        let (merchant_repo, tx_repo) = mocks_for(vec![auth, capture], root, false);

        let use_case = VoidTransactionUseCase::new(
            Arc::new(merchant_repo),
            Arc::new(tx_repo),
            Arc::new(ScriptedGateway::new(vec![])),
            leader_idempotency(),
        );

        let result = use_case
            .execute(VoidCommand {
                merchant_id: merchant_id.0,
                transaction_id: root.0,
                metadata: None,
                idempotency_key: "void-key-2".into(),
            })
            .await;

        assert!(matches!(
            result,
            Err(PaymentError::CannotVoid { ref reason }) if reason == "already_captured"
        ));
    }

    #[tokio::test]
    async fn test_double_void_is_rejected() {
        let merchant_id = MerchantId::new();
        let auth = stored_transaction(
            merchant_id,
            TransactionType::AUTH,
            TransactionStatus::APPROVED,
            5000,
            None,
            Some("GUID-AUTH"),
            timeline(0),
        );
        let void_row = stored_transaction(
            merchant_id,
            TransactionType::VOID,
            TransactionStatus::APPROVED,
            5000,
            Some(auth.id()),
            Some("GUID-VOID"),
            timeline(10),
        );
        let root = auth.id();
        let (merchant_repo, tx_repo) = mocks_for(vec![auth, void_row], root, false);

        let use_case = VoidTransactionUseCase::new(
            Arc::new(merchant_repo),
            Arc::new(tx_repo),
            Arc::new(ScriptedGateway::new(vec![])),
            leader_idempotency(),
        );

        let result = use_case
            .execute(VoidCommand {
                merchant_id: merchant_id.0,
                transaction_id: root.0,
                metadata: None,
                idempotency_key: "void-key-3".into(),
            })
            .await;

        assert!(matches!(
            result,
            Err(PaymentError::CannotVoid { ref reason }) if reason == "voided"
        ));
    }

    #[tokio::test]
    async fn test_void_of_unrefunded_sale() {
        let merchant_id = MerchantId::new();
        let sale = stored_transaction(
            merchant_id,
            TransactionType::SALE,
            TransactionStatus::APPROVED,
            9900,
            None,
            Some("GUID-SALE"),
            timeline(0),
        );
        let root = sale.id();
        let (merchant_repo, tx_repo) = mocks_for(vec![sale.clone()], root, true);

        let use_case = VoidTransactionUseCase::new(
            Arc::new(merchant_repo),
            Arc::new(tx_repo),
            Arc::new(ScriptedGateway::new(vec![Ok(approved_response(
                "GUID-VOID",
            ))])),
            leader_idempotency(),
        );

        let result = use_case
            .execute(VoidCommand {
                merchant_id: merchant_id.0,
                transaction_id: root.0,
                metadata: None,
                idempotency_key: "void-key-4".into(),
            })
            .await
            .unwrap();

        assert_eq!(result.parent_transaction_id(), Some(sale.id()));
    }
}
