use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::PaymentError;
use crate::domain::money::{Amount, Currency};
use crate::domain::types::{MerchantId, PaymentMethodId, TransactionId};

/// Estado terminal-por-fila de una transacción.
///
/// Una fila nace `PENDING` solo de manera transitoria (dentro del intento);
/// una vez persistida como `APPROVED`, `DECLINED` o `ERROR` es inmutable,
/// con la única excepción del campo de metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    PENDING,
    APPROVED,
    DECLINED,
    ERROR,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    AUTH,
    CAPTURE,
    SALE,
    REFUND,
    VOID,
}

impl TransactionType {
    /// Indica si este tipo de operación exige una transacción padre
    /// (capture/refund/void referencian la operación que modifican).
    pub fn requires_parent(&self) -> bool {
        matches!(
            self,
            TransactionType::CAPTURE | TransactionType::REFUND | TransactionType::VOID
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethodType {
    CARD,
    ACH,
}

/// Credenciales del comercio ante el gateway EPX.
///
/// Son los cuatro números que identifican la cuenta en cada request saliente.
/// Nunca se serializan hacia los clientes del servicio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCredentials {
    cust_nbr: String,
    merch_nbr: String,
    dba_nbr: String,
    terminal_nbr: String,
}

impl GatewayCredentials {
    pub fn new(
        cust_nbr: String,
        merch_nbr: String,
        dba_nbr: String,
        terminal_nbr: String,
    ) -> Result<Self, PaymentError> {
        if cust_nbr.trim().is_empty()
            || merch_nbr.trim().is_empty()
            || dba_nbr.trim().is_empty()
            || terminal_nbr.trim().is_empty()
        {
            return Err(PaymentError::Validation(
                "gateway credentials cannot contain empty fields".to_string(),
            ));
        }
        Ok(Self {
            cust_nbr,
            merch_nbr,
            dba_nbr,
            terminal_nbr,
        })
    }

    pub fn cust_nbr(&self) -> &str {
        &self.cust_nbr
    }

    pub fn merch_nbr(&self) -> &str {
        &self.merch_nbr
    }

    pub fn dba_nbr(&self) -> &str {
        &self.dba_nbr
    }

    pub fn terminal_nbr(&self) -> &str {
        &self.terminal_nbr
    }
}

/// Modelo de Entidad: Merchant.
///
/// Representa un comercio dueño de sus transacciones, métodos de pago y
/// credenciales ante el gateway. Un comercio inactivo no puede originar
/// transacciones nuevas; los comercios nunca se borran físicamente.
#[derive(Debug, Clone)]
pub struct Merchant {
    id: MerchantId,
    slug: String, // Unique
    display_name: String,
    credentials: GatewayCredentials,
    mac_secret_ref: String,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Merchant {
    /// Reconstruye un `Merchant` desde los datos persistidos, validando las
    /// reglas de dominio básicas.
    pub fn reconstitute(
        id: MerchantId,
        slug: String,
        display_name: String,
        credentials: GatewayCredentials,
        mac_secret_ref: String,
        active: bool,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, PaymentError> {
        if slug.trim().is_empty() {
            return Err(PaymentError::Validation(
                "merchant slug cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            id,
            slug,
            display_name,
            credentials,
            mac_secret_ref,
            active,
            created_at,
            updated_at,
        })
    }

    pub fn id(&self) -> MerchantId {
        self.id
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn credentials(&self) -> &GatewayCredentials {
        &self.credentials
    }

    pub fn mac_secret_ref(&self) -> &str {
        &self.mac_secret_ref
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Verifica que el comercio pueda originar transacciones nuevas.
    pub fn ensure_active(&self) -> Result<(), PaymentError> {
        if self.active {
            Ok(())
        } else {
            Err(PaymentError::MerchantInactive(self.id))
        }
    }
}

/// Modelo de Entidad: PaymentMethod.
///
/// Un instrumento de pago almacenado (tarjeta o cuenta ACH) representado por
/// un token opaco del gateway. El PAN nunca entra al servicio; solo viajan
/// los últimos cuatro dígitos para mostrar al usuario.
#[derive(Debug, Clone)]
pub struct PaymentMethod {
    id: PaymentMethodId,
    merchant_id: MerchantId,
    customer_id: Option<String>,
    method_type: PaymentMethodType,
    storage_token: String, // Token opaco del gateway, nunca un PAN
    last_four: String,
    card_brand: Option<String>,
    expiry: Option<String>, // MMYY, solo tarjetas
    verified: bool,
    is_default: bool,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PaymentMethod {
    /// Crea un método de pago nuevo a partir del resultado del probe de
    /// verificación/tokenización contra el gateway.
    pub fn new(
        merchant_id: MerchantId,
        customer_id: Option<String>,
        method_type: PaymentMethodType,
        storage_token: String,
        last_four: String,
        card_brand: Option<String>,
        expiry: Option<String>,
        verified: bool,
        is_default: bool,
    ) -> Result<Self, PaymentError> {
        let now = Utc::now();
        Self::reconstitute(
            PaymentMethodId::new(),
            merchant_id,
            customer_id,
            method_type,
            storage_token,
            last_four,
            card_brand,
            expiry,
            verified,
            is_default,
            None,
            now,
            now,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn reconstitute(
        id: PaymentMethodId,
        merchant_id: MerchantId,
        customer_id: Option<String>,
        method_type: PaymentMethodType,
        storage_token: String,
        last_four: String,
        card_brand: Option<String>,
        expiry: Option<String>,
        verified: bool,
        is_default: bool,
        deleted_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, PaymentError> {
        if storage_token.trim().is_empty() {
            return Err(PaymentError::Validation(
                "storage token cannot be empty".to_string(),
            ));
        }
        if last_four.len() != 4 || !last_four.chars().all(|c| c.is_ascii_digit()) {
            return Err(PaymentError::Validation(format!(
                "last_four must be 4 digits, got '{}'",
                last_four
            )));
        }
        if let Some(ref exp) = expiry {
            if exp.len() != 4 || !exp.chars().all(|c| c.is_ascii_digit()) {
                return Err(PaymentError::Validation(format!(
                    "expiry must be MMYY, got '{}'",
                    exp
                )));
            }
        }
        Ok(Self {
            id,
            merchant_id,
            customer_id,
            method_type,
            storage_token,
            last_four,
            card_brand,
            expiry,
            verified,
            is_default,
            deleted_at,
            created_at,
            updated_at,
        })
    }

    pub fn id(&self) -> PaymentMethodId {
        self.id
    }

    pub fn merchant_id(&self) -> MerchantId {
        self.merchant_id
    }

    pub fn customer_id(&self) -> Option<&str> {
        self.customer_id.as_deref()
    }

    pub fn method_type(&self) -> PaymentMethodType {
        self.method_type
    }

    pub fn storage_token(&self) -> &str {
        &self.storage_token
    }

    pub fn last_four(&self) -> &str {
        &self.last_four
    }

    pub fn card_brand(&self) -> Option<&str> {
        self.card_brand.as_deref()
    }

    pub fn expiry(&self) -> Option<&str> {
        self.expiry.as_deref()
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Modelo de Entidad: Transaction.
///
/// Cada fila es una operación contra el gateway (auth, capture, sale, refund
/// o void). Las filas forman un árbol mediante `parent_transaction_id`: el
/// conjunto que comparte una raíz es el "grupo", y el estado agregado del
/// grupo se deriva con [`crate::domain::group_state::GroupState`].
///
/// # Examples
/// ```
/// use payment_service::domain::entities::{Transaction, TransactionStatus, TransactionType};
/// use payment_service::domain::money::{Amount, Currency};
/// use payment_service::domain::types::MerchantId;
///
/// let tx = Transaction::builder()
///     .merchant_id(MerchantId::new())
///     .transaction_type(TransactionType::AUTH)
///     .amount(Amount::from_minor_units(10000).unwrap())
///     .currency(Currency::new("USD").unwrap())
///     .status(TransactionStatus::APPROVED)
///     .build()
///     .unwrap();
/// assert_eq!(tx.transaction_type(), TransactionType::AUTH);
/// assert!(tx.parent_transaction_id().is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    id: TransactionId,
    merchant_id: MerchantId,
    customer_id: Option<String>,
    payment_method_id: Option<PaymentMethodId>,
    parent_transaction_id: Option<TransactionId>,
    amount: Amount,
    currency: Currency,
    transaction_type: TransactionType,
    status: TransactionStatus,
    gateway_token: Option<String>,        // AUTH_GUID devuelto para ESTA operación
    parent_gateway_token: Option<String>, // ORIG_AUTH_GUID con el que se enlazó
    gateway_tran_nbr: Option<String>,     // Eco del TRAN_NBR de 10 dígitos
    auth_code: Option<String>,
    avs_result: Option<String>,
    cvv_result: Option<String>,
    response_text: Option<String>,
    idempotency_key: Option<String>,
    metadata: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn builder() -> TransactionBuilder {
        TransactionBuilder::default()
    }

    /// Reconstruye una transacción desde la persistencia.
    #[allow(clippy::too_many_arguments)]
    pub fn reconstitute(
        id: TransactionId,
        merchant_id: MerchantId,
        customer_id: Option<String>,
        payment_method_id: Option<PaymentMethodId>,
        parent_transaction_id: Option<TransactionId>,
        amount: Amount,
        currency: Currency,
        transaction_type: TransactionType,
        status: TransactionStatus,
        gateway_token: Option<String>,
        parent_gateway_token: Option<String>,
        gateway_tran_nbr: Option<String>,
        auth_code: Option<String>,
        avs_result: Option<String>,
        cvv_result: Option<String>,
        response_text: Option<String>,
        idempotency_key: Option<String>,
        metadata: Value,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, PaymentError> {
        if transaction_type.requires_parent() && parent_transaction_id.is_none() {
            return Err(PaymentError::Validation(format!(
                "{:?} transaction requires a parent",
                transaction_type
            )));
        }
        if !transaction_type.requires_parent() && parent_transaction_id.is_some() {
            return Err(PaymentError::Validation(format!(
                "{:?} transaction cannot have a parent",
                transaction_type
            )));
        }
        Ok(Self {
            id,
            merchant_id,
            customer_id,
            payment_method_id,
            parent_transaction_id,
            amount,
            currency,
            transaction_type,
            status,
            gateway_token,
            parent_gateway_token,
            gateway_tran_nbr,
            auth_code,
            avs_result,
            cvv_result,
            response_text,
            idempotency_key,
            metadata,
            created_at,
            updated_at,
        })
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn merchant_id(&self) -> MerchantId {
        self.merchant_id
    }

    pub fn customer_id(&self) -> Option<&str> {
        self.customer_id.as_deref()
    }

    pub fn payment_method_id(&self) -> Option<PaymentMethodId> {
        self.payment_method_id
    }

    pub fn parent_transaction_id(&self) -> Option<TransactionId> {
        self.parent_transaction_id
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn gateway_token(&self) -> Option<&str> {
        self.gateway_token.as_deref()
    }

    pub fn parent_gateway_token(&self) -> Option<&str> {
        self.parent_gateway_token.as_deref()
    }

    pub fn gateway_tran_nbr(&self) -> Option<&str> {
        self.gateway_tran_nbr.as_deref()
    }

    pub fn auth_code(&self) -> Option<&str> {
        self.auth_code.as_deref()
    }

    pub fn avs_result(&self) -> Option<&str> {
        self.avs_result.as_deref()
    }

    pub fn cvv_result(&self) -> Option<&str> {
        self.cvv_result.as_deref()
    }

    pub fn response_text(&self) -> Option<&str> {
        self.response_text.as_deref()
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_approved(&self) -> bool {
        self.status == TransactionStatus::APPROVED
    }
}

/// Builder de `Transaction` que asegura que toda instancia cumple las reglas
/// de forma: monto no-negativo, divisa válida, y arista legal padre/tipo
/// (capture/refund/void llevan padre; auth/sale no).
#[derive(Default)]
pub struct TransactionBuilder {
    id: Option<TransactionId>,
    merchant_id: Option<MerchantId>,
    customer_id: Option<String>,
    payment_method_id: Option<PaymentMethodId>,
    parent_transaction_id: Option<TransactionId>,
    amount: Option<Amount>,
    currency: Option<Currency>,
    transaction_type: Option<TransactionType>,
    status: Option<TransactionStatus>,
    gateway_token: Option<String>,
    parent_gateway_token: Option<String>,
    gateway_tran_nbr: Option<String>,
    auth_code: Option<String>,
    avs_result: Option<String>,
    cvv_result: Option<String>,
    response_text: Option<String>,
    idempotency_key: Option<String>,
    metadata: Option<Value>,
}

impl TransactionBuilder {
    pub fn id(mut self, id: TransactionId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn merchant_id(mut self, merchant_id: MerchantId) -> Self {
        self.merchant_id = Some(merchant_id);
        self
    }

    pub fn customer_id(mut self, customer_id: Option<String>) -> Self {
        self.customer_id = customer_id;
        self
    }

    pub fn payment_method_id(mut self, payment_method_id: Option<PaymentMethodId>) -> Self {
        self.payment_method_id = payment_method_id;
        self
    }

    pub fn parent_transaction_id(mut self, parent: TransactionId) -> Self {
        self.parent_transaction_id = Some(parent);
        self
    }

    pub fn amount(mut self, amount: Amount) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }

    pub fn transaction_type(mut self, transaction_type: TransactionType) -> Self {
        self.transaction_type = Some(transaction_type);
        self
    }

    pub fn status(mut self, status: TransactionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn gateway_token(mut self, token: Option<String>) -> Self {
        self.gateway_token = token;
        self
    }

    pub fn parent_gateway_token(mut self, token: Option<String>) -> Self {
        self.parent_gateway_token = token;
        self
    }

    pub fn gateway_tran_nbr(mut self, tran_nbr: Option<String>) -> Self {
        self.gateway_tran_nbr = tran_nbr;
        self
    }

    pub fn auth_code(mut self, auth_code: Option<String>) -> Self {
        self.auth_code = auth_code;
        self
    }

    pub fn avs_result(mut self, avs: Option<String>) -> Self {
        self.avs_result = avs;
        self
    }

    pub fn cvv_result(mut self, cvv: Option<String>) -> Self {
        self.cvv_result = cvv;
        self
    }

    pub fn response_text(mut self, text: Option<String>) -> Self {
        self.response_text = text;
        self
    }

    pub fn idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Construye y valida la entidad instanciada.
    pub fn build(self) -> Result<Transaction, PaymentError> {
        let merchant_id = self
            .merchant_id
            .ok_or_else(|| PaymentError::Validation("merchant_id is required".into()))?;
        let amount = self
            .amount
            .ok_or_else(|| PaymentError::Validation("amount is required".into()))?;
        let currency = self
            .currency
            .ok_or_else(|| PaymentError::Validation("currency is required".into()))?;
        let transaction_type = self
            .transaction_type
            .ok_or_else(|| PaymentError::Validation("transaction_type is required".into()))?;

        let now = Utc::now();
        Transaction::reconstitute(
            self.id.unwrap_or_else(TransactionId::new),
            merchant_id,
            self.customer_id,
            self.payment_method_id,
            self.parent_transaction_id,
            amount,
            currency,
            transaction_type,
            self.status.unwrap_or(TransactionStatus::PENDING),
            self.gateway_token,
            self.parent_gateway_token,
            self.gateway_tran_nbr,
            self.auth_code,
            self.avs_result,
            self.cvv_result,
            self.response_text,
            self.idempotency_key,
            self.metadata.unwrap_or_else(|| Value::Object(Default::default())),
            now,
            now,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    #[test]
    fn test_builder_rejects_capture_without_parent() {
        let result = Transaction::builder()
            .merchant_id(MerchantId::new())
            .transaction_type(TransactionType::CAPTURE)
            .amount(Amount::from_minor_units(100).unwrap())
            .currency(usd())
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_auth_with_parent() {
        let result = Transaction::builder()
            .merchant_id(MerchantId::new())
            .transaction_type(TransactionType::AUTH)
            .parent_transaction_id(TransactionId::new())
            .amount(Amount::from_minor_units(100).unwrap())
            .currency(usd())
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_builder_defaults_to_pending() {
        let tx = Transaction::builder()
            .merchant_id(MerchantId::new())
            .transaction_type(TransactionType::SALE)
            .amount(Amount::from_minor_units(9900).unwrap())
            .currency(usd())
            .build()
            .unwrap();

        assert_eq!(tx.status(), TransactionStatus::PENDING);
        assert!(tx.metadata().is_object());
    }

    #[test]
    fn test_payment_method_validates_last_four() {
        let result = PaymentMethod::new(
            MerchantId::new(),
            None,
            PaymentMethodType::CARD,
            "tok_abc".into(),
            "12a4".into(),
            Some("VISA".into()),
            Some("1227".into()),
            true,
            false,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_merchant_ensure_active() {
        let credentials =
            GatewayCredentials::new("9001".into(), "900300".into(), "1".into(), "1".into())
                .unwrap();
        let merchant = Merchant::reconstitute(
            MerchantId::new(),
            "acme".into(),
            "Acme Inc".into(),
            credentials,
            "epx-mac-acme".into(),
            false,
            Utc::now(),
            Utc::now(),
        )
        .unwrap();

        assert!(matches!(
            merchant.ensure_active(),
            Err(PaymentError::MerchantInactive(_))
        ));
    }
}
