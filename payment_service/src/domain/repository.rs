use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

use crate::domain::entities::{
    Merchant, PaymentMethod, Transaction, TransactionStatus, TransactionType,
};
use crate::domain::error::PaymentError;
use crate::domain::money::Amount;
use crate::domain::types::{MerchantId, PaymentMethodId, TransactionId};

// Puertos de persistencia, uno por concern (merchants, métodos de pago,
// transacciones, idempotencia). El núcleo depende solo de estos traits;
// las implementaciones sqlx viven en infrastructure::persistence.

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MerchantRepository: Send + Sync {
    async fn find_by_id(&self, id: MerchantId) -> Result<Option<Merchant>, PaymentError>;
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Merchant>, PaymentError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentMethodRepository: Send + Sync {
    /// Inserta el método de pago; si llega marcado como default, la
    /// implementación debe limpiar el default anterior de ese
    /// (merchant, customer) en la misma transacción de BD.
    async fn create(&self, payment_method: PaymentMethod) -> Result<PaymentMethod, PaymentError>;

    async fn find_by_id(
        &self,
        id: PaymentMethodId,
    ) -> Result<Option<PaymentMethod>, PaymentError>;

    /// Actualiza metadata mutable (marca, expiración, bandera default).
    /// El storage token es inmutable por contrato.
    async fn update_metadata(
        &self,
        id: PaymentMethodId,
        card_brand: Option<String>,
        expiry: Option<String>,
        is_default: Option<bool>,
    ) -> Result<PaymentMethod, PaymentError>;

    async fn soft_delete(&self, id: PaymentMethodId) -> Result<(), PaymentError>;
}

/// Re-chequeo de invariante de monto que la implementación ejecuta dentro
/// de la transacción de BD, con el advisory lock del grupo tomado: la suma
/// de las filas aprobadas de `kind` con padre `parent_id` (más la fila
/// nueva, cuando es de ese mismo `kind`) no puede exceder `cap`. Un void
/// usa `cap = 0` para exigir que no exista ninguna fila aprobada de `kind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmountRecheck {
    pub parent_id: TransactionId,
    pub kind: TransactionType,
    pub cap: Amount,
}

/// Guardia de inserción para operaciones follow-on (capture/refund/void):
/// serializa las escrituras de un mismo grupo sin sostener ningún lock a
/// través de I/O externo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupGuard {
    pub group_root: TransactionId,
    pub recheck: Option<AmountRecheck>,
}

/// Filtros de listado (merchant obligatorio, resto opcional).
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub customer_id: Option<String>,
    pub group_root: Option<TransactionId>,
    pub status: Option<TransactionStatus>,
    pub transaction_type: Option<TransactionType>,
    pub limit: i64,
    pub offset: i64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Inserta una fila raíz (auth/sale) sin guardia de grupo.
    async fn save(&self, transaction: Transaction) -> Result<Transaction, PaymentError>;

    /// Inserta una fila follow-on bajo el advisory lock del grupo,
    /// re-validando el invariante de monto antes de escribir.
    async fn save_guarded(
        &self,
        transaction: Transaction,
        guard: GroupGuard,
    ) -> Result<Transaction, PaymentError>;

    async fn find_by_id(&self, id: TransactionId)
        -> Result<Option<Transaction>, PaymentError>;

    /// Raíz del grupo de una transacción (siguiendo los punteros a padre).
    async fn find_group_root(&self, id: TransactionId)
        -> Result<TransactionId, PaymentError>;

    /// Árbol completo alcanzable desde la raíz, en orden de inserción.
    async fn find_tree(&self, root: TransactionId) -> Result<Vec<Transaction>, PaymentError>;

    async fn list(
        &self,
        merchant_id: MerchantId,
        filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, PaymentError>;

    /// Búsqueda por el eco del TRAN_NBR (idempotencia del callback).
    async fn find_by_tran_nbr(
        &self,
        merchant_id: MerchantId,
        tran_nbr: &str,
    ) -> Result<Option<Transaction>, PaymentError>;

    /// Única mutación permitida sobre una fila terminal.
    async fn update_metadata(
        &self,
        id: TransactionId,
        metadata: Value,
    ) -> Result<Transaction, PaymentError>;
}

/// Resultado de un `claim` sobre el registro de idempotencia.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// Este llamador es el líder: ejecuta la operación exactamente una vez.
    Leader,
    /// Otro líder está en vuelo; se devuelve su fingerprint para detectar
    /// payloads distintos bajo la misma key.
    InFlight { fingerprint: String },
    /// La key ya se completó; el resultado almacenado se devuelve verbatim.
    Completed(CompletedIdempotency),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedIdempotency {
    pub transaction_id: TransactionId,
    pub fingerprint: String,
    pub response_snapshot: Value,
    pub completed_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    /// Reclama `(merchant, key)`: exactamente un llamador concurrente ve
    /// `Leader`. Un claim in-progress más viejo que `stale_after` (líder
    /// muerto) es retomable por el siguiente llamador.
    async fn claim(
        &self,
        merchant_id: MerchantId,
        key: &str,
        fingerprint: &str,
        stale_after: Duration,
    ) -> Result<ClaimOutcome, PaymentError>;

    /// El líder registra el snapshot del resultado.
    async fn complete(
        &self,
        merchant_id: MerchantId,
        key: &str,
        transaction_id: TransactionId,
        response_snapshot: Value,
    ) -> Result<(), PaymentError>;

    /// Fast path para reintentos tardíos.
    async fn lookup(
        &self,
        merchant_id: MerchantId,
        key: &str,
    ) -> Result<Option<CompletedIdempotency>, PaymentError>;

    /// Libera un claim cuyo líder falló sin efectos secundarios, para que
    /// un reintento corregido pueda ejecutar.
    async fn release(&self, merchant_id: MerchantId, key: &str) -> Result<(), PaymentError>;

    /// Mantenimiento: borra registros completados más viejos que
    /// `retention` y claims in-progress abandonados. Retorna filas borradas.
    async fn purge(
        &self,
        retention: Duration,
        stale_after: Duration,
    ) -> Result<u64, PaymentError>;
}
