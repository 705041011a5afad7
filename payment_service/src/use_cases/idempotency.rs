use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::entities::Transaction;
use crate::domain::error::PaymentError;
use crate::domain::repository::{ClaimOutcome, IdempotencyRepository};
use crate::domain::types::MerchantId;

/// Parámetros del coordinador de idempotencia.
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// Edad a partir de la cual un claim IN_PROGRESS se considera huérfano
    /// (líder muerto) y puede retomarse.
    pub stale_after: Duration,
    /// Intervalo de sondeo del follower.
    pub follower_poll: Duration,
    /// Tope de espera del follower antes de rendirse con
    /// `IdempotencyInFlight` (retryable).
    pub follower_deadline: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(120),
            follower_poll: Duration::from_millis(250),
            follower_deadline: Duration::from_secs(10),
        }
    }
}

/// Huella estable del payload de un request, para detectar la misma key
/// reutilizada con un cuerpo distinto. serde_json ordena las claves de los
/// objetos, así que la serialización es canónica.
pub fn fingerprint<T: Serialize>(payload: &T) -> Result<String, PaymentError> {
    let canonical = serde_json::to_string(payload)
        .map_err(|e| PaymentError::Internal(format!("failed to fingerprint request: {}", e)))?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Valida la forma de una idempotency key.
pub fn validate_key(key: &str) -> Result<(), PaymentError> {
    if key.is_empty() || key.len() > 255 {
        return Err(PaymentError::Validation(
            "idempotency key must be between 1 and 255 characters".to_string(),
        ));
    }
    if !key.chars().all(|c| c.is_ascii_graphic()) {
        return Err(PaymentError::Validation(
            "idempotency key must contain only visible ASCII characters".to_string(),
        ));
    }
    Ok(())
}

/// Coordinador de ejecución at-most-once por `(merchant, idempotency_key)`.
///
/// Un solo llamador concurrente obtiene el rol de líder y ejecuta la
/// operación; los followers esperan (acotados por deadline) el snapshot del
/// líder y lo devuelven verbatim. Los reintentos tardíos resuelven por el
/// fast path de lookup sin tocar el gateway.
#[derive(Clone)]
pub struct IdempotencyCoordinator {
    idempotency_repo: Arc<dyn IdempotencyRepository>,
    config: IdempotencyConfig,
}

impl IdempotencyCoordinator {
    pub fn new(
        idempotency_repo: Arc<dyn IdempotencyRepository>,
        config: IdempotencyConfig,
    ) -> Self {
        Self {
            idempotency_repo,
            config,
        }
    }

    /// Ejecuta `op` como máximo una vez para `(merchant_id, key)`.
    ///
    /// El snapshot completado se devuelve byte-idéntico en cada repetición.
    /// Si el líder falla SIN efectos secundarios (el error llega antes de
    /// persistir una fila), el claim se libera para que un reintento
    /// corregido pueda ejecutar.
    pub async fn execute<F, Fut>(
        &self,
        merchant_id: MerchantId,
        key: &str,
        request_fingerprint: &str,
        op: F,
    ) -> Result<Transaction, PaymentError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Transaction, PaymentError>>,
    {
        validate_key(key)?;

        let claim = self
            .idempotency_repo
            .claim(merchant_id, key, request_fingerprint, self.config.stale_after)
            .await?;

        match claim {
            ClaimOutcome::Completed(completed) => {
                if completed.fingerprint != request_fingerprint {
                    return Err(PaymentError::IdempotencyConflict(key.to_string()));
                }
                Self::replay(completed.response_snapshot)
            }
            ClaimOutcome::InFlight { fingerprint } => {
                if fingerprint != request_fingerprint {
                    return Err(PaymentError::IdempotencyConflict(key.to_string()));
                }
                self.await_leader(merchant_id, key).await
            }
            ClaimOutcome::Leader => match op().await {
                Ok(transaction) => {
                    let snapshot = serde_json::to_value(&transaction).map_err(|e| {
                        PaymentError::Internal(format!("failed to snapshot result: {}", e))
                    })?;
                    self.idempotency_repo
                        .complete(merchant_id, key, transaction.id(), snapshot)
                        .await?;
                    Ok(transaction)
                }
                Err(e) => {
                    // Sin fila persistida no hay resultado que repetir:
                    // liberamos el claim (best effort) y propagamos.
                    if let Err(release_err) =
                        self.idempotency_repo.release(merchant_id, key).await
                    {
                        tracing::error!(
                            merchant_id = %merchant_id,
                            error = %release_err,
                            "failed to release idempotency claim"
                        );
                    }
                    Err(e)
                }
            },
        }
    }

    async fn await_leader(
        &self,
        merchant_id: MerchantId,
        key: &str,
    ) -> Result<Transaction, PaymentError> {
        let deadline = tokio::time::Instant::now() + self.config.follower_deadline;

        loop {
            tokio::time::sleep(self.config.follower_poll).await;

            if let Some(completed) = self.idempotency_repo.lookup(merchant_id, key).await? {
                return Self::replay(completed.response_snapshot);
            }

            if tokio::time::Instant::now() >= deadline {
                // El líder puede seguir corriendo: el caller debe
                // reintentar con backoff, sin efectos secundarios aquí.
                return Err(PaymentError::IdempotencyInFlight(key.to_string()));
            }
        }
    }

    fn replay(snapshot: serde_json::Value) -> Result<Transaction, PaymentError> {
        serde_json::from_value(snapshot).map_err(|e| {
            PaymentError::Internal(format!("stored idempotency snapshot is corrupt: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{TransactionStatus, TransactionType};
    use crate::domain::money::{Amount, Currency};
    use crate::domain::repository::{CompletedIdempotency, MockIdempotencyRepository};
    use crate::domain::types::TransactionId;
    use chrono::Utc;
    use mockall::predicate::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn sample_transaction() -> Transaction {
        Transaction::builder()
            .merchant_id(MerchantId::new())
            .transaction_type(TransactionType::AUTH)
            .status(TransactionStatus::APPROVED)
            .amount(Amount::from_minor_units(10000).unwrap())
            .currency(Currency::new("USD").unwrap())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_leader_executes_and_completes() {
        let mut mock_repo = MockIdempotencyRepository::new();
        let merchant_id = MerchantId::new();
        let transaction = sample_transaction();
        let tx_id = transaction.id();

        mock_repo
            .expect_claim()
            .times(1)
            .returning(|_, _, _, _| Ok(ClaimOutcome::Leader));
        mock_repo
            .expect_complete()
            .with(always(), eq("key-1"), eq(tx_id), always())
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let coordinator =
            IdempotencyCoordinator::new(Arc::new(mock_repo), IdempotencyConfig::default());

        let result = coordinator
            .execute(merchant_id, "key-1", "fp", || async move { Ok(transaction) })
            .await;

        assert!(result.is_ok());
        assert_eq!(result.unwrap().id(), tx_id);
    }

    #[tokio::test]
    async fn test_completed_key_replays_snapshot_without_executing() {
        let mut mock_repo = MockIdempotencyRepository::new();
        let merchant_id = MerchantId::new();
        let transaction = sample_transaction();
        let snapshot = serde_json::to_value(&transaction).unwrap();
        let tx_id = transaction.id();

        mock_repo.expect_claim().times(1).returning(move |_, _, _, _| {
            Ok(ClaimOutcome::Completed(CompletedIdempotency {
                transaction_id: tx_id,
                fingerprint: "fp".to_string(),
                response_snapshot: snapshot.clone(),
                completed_at: Utc::now(),
            }))
        });

        let coordinator =
            IdempotencyCoordinator::new(Arc::new(mock_repo), IdempotencyConfig::default());

        let result = coordinator
            .execute(merchant_id, "key-1", "fp", || async {
                panic!("leader path must not run for a completed key")
            })
            .await;

        assert_eq!(result.unwrap().id(), tx_id);
    }

    #[tokio::test]
    async fn test_completed_key_with_different_payload_conflicts() {
        let mut mock_repo = MockIdempotencyRepository::new();
        let transaction = sample_transaction();
        let snapshot = serde_json::to_value(&transaction).unwrap();
        let tx_id = transaction.id();

        mock_repo.expect_claim().times(1).returning(move |_, _, _, _| {
            Ok(ClaimOutcome::Completed(CompletedIdempotency {
                transaction_id: tx_id,
                fingerprint: "other-fp".to_string(),
                response_snapshot: snapshot.clone(),
                completed_at: Utc::now(),
            }))
        });

        let coordinator =
            IdempotencyCoordinator::new(Arc::new(mock_repo), IdempotencyConfig::default());

        let result = coordinator
            .execute(MerchantId::new(), "key-1", "fp", || async {
                panic!("must not execute")
            })
            .await;

        assert!(matches!(
            result,
            Err(PaymentError::IdempotencyConflict(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_waits_and_replays_leader_result() {
        let mut mock_repo = MockIdempotencyRepository::new();
        let transaction = sample_transaction();
        let snapshot = serde_json::to_value(&transaction).unwrap();
        let tx_id = transaction.id();

        mock_repo
            .expect_claim()
            .times(1)
            .returning(|_, _, _, _| {
                Ok(ClaimOutcome::InFlight {
                    fingerprint: "fp".to_string(),
                })
            });

        let lookups = Arc::new(AtomicU32::new(0));
        let lookups_clone = lookups.clone();
        mock_repo.expect_lookup().returning(move |_, _| {
            if lookups_clone.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(None)
            } else {
                Ok(Some(CompletedIdempotency {
                    transaction_id: tx_id,
                    fingerprint: "fp".to_string(),
                    response_snapshot: snapshot.clone(),
                    completed_at: Utc::now(),
                }))
            }
        });

        let coordinator =
            IdempotencyCoordinator::new(Arc::new(mock_repo), IdempotencyConfig::default());

        let result = coordinator
            .execute(MerchantId::new(), "key-1", "fp", || async {
                panic!("follower must not execute")
            })
            .await;

        assert_eq!(result.unwrap().id(), tx_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_deadline_yields_in_flight_error() {
        let mut mock_repo = MockIdempotencyRepository::new();

        mock_repo.expect_claim().times(1).returning(|_, _, _, _| {
            Ok(ClaimOutcome::InFlight {
                fingerprint: "fp".to_string(),
            })
        });
        mock_repo.expect_lookup().returning(|_, _| Ok(None));

        let coordinator = IdempotencyCoordinator::new(
            Arc::new(mock_repo),
            IdempotencyConfig {
                follower_deadline: Duration::from_secs(2),
                follower_poll: Duration::from_millis(100),
                ..Default::default()
            },
        );

        let result = coordinator
            .execute(MerchantId::new(), "key-1", "fp", || async {
                panic!("follower must not execute")
            })
            .await;

        assert!(matches!(result, Err(PaymentError::IdempotencyInFlight(_))));
    }

    #[tokio::test]
    async fn test_leader_failure_releases_claim() {
        let mut mock_repo = MockIdempotencyRepository::new();

        mock_repo
            .expect_claim()
            .times(1)
            .returning(|_, _, _, _| Ok(ClaimOutcome::Leader));
        mock_repo
            .expect_release()
            .times(1)
            .returning(|_, _| Ok(()));

        let coordinator =
            IdempotencyCoordinator::new(Arc::new(mock_repo), IdempotencyConfig::default());

        let result = coordinator
            .execute(MerchantId::new(), "key-1", "fp", || async {
                Err(PaymentError::Validation("bad amount".into()))
            })
            .await;

        assert!(matches!(result, Err(PaymentError::Validation(_))));
    }

    #[test]
    fn test_validate_key_shape() {
        assert!(validate_key("ord-2025-0001").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key(&"k".repeat(256)).is_err());
        assert!(validate_key("clave con espacios").is_err());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = serde_json::json!({"amount": "10.00", "currency": "USD"});
        let b = serde_json::json!({"currency": "USD", "amount": "10.00"});
        // serde_json ordena las claves: el fingerprint no depende del orden
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }
}
