use std::collections::{HashMap, HashSet};

use crate::domain::entities::{Transaction, TransactionType};
use crate::domain::money::Amount;
use crate::domain::types::TransactionId;

/// Padre reembolsable dentro de un grupo: un sale o capture aprobado, junto
/// con cuánto se le ha reembolsado ya.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundableParent {
    pub id: TransactionId,
    pub amount: Amount,
    pub refunded: Amount,
}

impl RefundableParent {
    pub fn remaining(&self) -> Amount {
        self.amount.saturating_sub(self.refunded)
    }
}

/// Estado agregado derivado de un grupo de transacciones.
///
/// Es una función pura y determinista del historial ordenado: nunca se
/// persiste, se recalcula a partir del árbol cada vez que se valida una
/// operación. El orden del historial es por fecha de creación, con el id
/// como desempate, así cualquier permutación que preserve el orden temporal
/// produce el mismo estado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupState {
    active_auth_id: Option<TransactionId>,
    active_auth_amount: Amount,
    captured_amount: Amount,
    refunded_amount: Amount,
    sale_amount: Amount,
    is_auth_voided: bool,
    refundables: Vec<RefundableParent>,
    voidable_target: Option<TransactionId>,
}

impl GroupState {
    /// Calcula el estado del grupo a partir de su historial completo.
    ///
    /// Las filas declinadas o con error se ignoran para la agregación de
    /// montos (se retienen solo como auditoría en la BD). Un void aprobado
    /// sobre el auth activo limpia `active_auth_*` y marca `is_auth_voided`;
    /// un void aprobado sobre un sale lo excluye de `sale_amount` y de los
    /// padres reembolsables.
    pub fn compute(history: &[Transaction]) -> Self {
        let mut ordered: Vec<&Transaction> = history.iter().collect();
        ordered.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(&b.id()))
        });

        // Padres anulados por un void aprobado
        let voided: HashSet<TransactionId> = ordered
            .iter()
            .filter(|t| t.transaction_type() == TransactionType::VOID && t.is_approved())
            .filter_map(|t| t.parent_transaction_id())
            .collect();

        let mut active_auth_id = None;
        let mut active_auth_amount = Amount::ZERO;
        let mut is_auth_voided = false;

        for tx in ordered
            .iter()
            .filter(|t| t.transaction_type() == TransactionType::AUTH && t.is_approved())
        {
            if voided.contains(&tx.id()) {
                is_auth_voided = true;
            } else if active_auth_id.is_none() {
                // Solo un auth aprobado puede estar activo en el grupo
                active_auth_id = Some(tx.id());
                active_auth_amount = tx.amount();
            }
        }

        let mut captured_amount = Amount::ZERO;
        let mut sale_amount = Amount::ZERO;
        let mut refundables: Vec<RefundableParent> = Vec::new();

        for tx in ordered.iter().filter(|t| t.is_approved()) {
            match tx.transaction_type() {
                TransactionType::CAPTURE => {
                    if tx.parent_transaction_id() == active_auth_id && active_auth_id.is_some() {
                        captured_amount = captured_amount
                            .checked_add(tx.amount())
                            .unwrap_or(captured_amount);
                    }
                    refundables.push(RefundableParent {
                        id: tx.id(),
                        amount: tx.amount(),
                        refunded: Amount::ZERO,
                    });
                }
                TransactionType::SALE => {
                    if !voided.contains(&tx.id()) {
                        sale_amount =
                            sale_amount.checked_add(tx.amount()).unwrap_or(sale_amount);
                        refundables.push(RefundableParent {
                            id: tx.id(),
                            amount: tx.amount(),
                            refunded: Amount::ZERO,
                        });
                    }
                }
                _ => {}
            }
        }

        // Reembolsos aprobados, acumulados por padre
        let mut refunded_by_parent: HashMap<TransactionId, i64> = HashMap::new();
        let mut refunded_amount = Amount::ZERO;
        for tx in ordered
            .iter()
            .filter(|t| t.transaction_type() == TransactionType::REFUND && t.is_approved())
        {
            if let Some(parent) = tx.parent_transaction_id() {
                if refundables.iter().any(|r| r.id == parent) {
                    *refunded_by_parent.entry(parent).or_insert(0) +=
                        tx.amount().minor_units();
                    refunded_amount = refunded_amount
                        .checked_add(tx.amount())
                        .unwrap_or(refunded_amount);
                }
            }
        }
        for refundable in refundables.iter_mut() {
            if let Some(&minor) = refunded_by_parent.get(&refundable.id) {
                refundable.refunded = Amount::from_minor_units(minor).unwrap_or(Amount::ZERO);
            }
        }

        // Objetivo anulable: un auth sin captures, o un sale sin reembolsos
        let voidable_target = if active_auth_id.is_some() && captured_amount.is_zero() {
            active_auth_id
        } else {
            ordered
                .iter()
                .find(|t| {
                    t.transaction_type() == TransactionType::SALE
                        && t.is_approved()
                        && !voided.contains(&t.id())
                        && refunded_by_parent.get(&t.id()).copied().unwrap_or(0) == 0
                })
                .map(|t| t.id())
        };

        Self {
            active_auth_id,
            active_auth_amount,
            captured_amount,
            refunded_amount,
            sale_amount,
            is_auth_voided,
            refundables,
            voidable_target,
        }
    }

    pub fn active_auth_id(&self) -> Option<TransactionId> {
        self.active_auth_id
    }

    pub fn active_auth_amount(&self) -> Amount {
        self.active_auth_amount
    }

    pub fn captured_amount(&self) -> Amount {
        self.captured_amount
    }

    pub fn refunded_amount(&self) -> Amount {
        self.refunded_amount
    }

    pub fn sale_amount(&self) -> Amount {
        self.sale_amount
    }

    pub fn is_auth_voided(&self) -> bool {
        self.is_auth_voided
    }

    pub fn refundables(&self) -> &[RefundableParent] {
        &self.refundables
    }

    pub fn voidable_target(&self) -> Option<TransactionId> {
        self.voidable_target
    }

    /// Estimación del monto liquidado: capturas + ventas − reembolsos.
    pub fn settled_amount_estimate(&self) -> i64 {
        self.captured_amount.minor_units() + self.sale_amount.minor_units()
            - self.refunded_amount.minor_units()
    }

    /// Suma de los montos de todos los padres reembolsables aprobados.
    pub fn refundable_total(&self) -> Amount {
        let total = self
            .refundables
            .iter()
            .map(|r| r.amount.minor_units())
            .sum();
        Amount::from_minor_units(total).unwrap_or(Amount::ZERO)
    }

    /// ¿Puede capturarse `amount` adicional contra el auth activo?
    pub fn can_capture(&self, amount: Amount) -> Result<(), &'static str> {
        if amount.is_zero() {
            return Err("non_positive_amount");
        }
        if self.is_auth_voided {
            return Err("voided");
        }
        if self.active_auth_id.is_none() {
            return Err("no_active_auth");
        }
        let cumulative = self
            .captured_amount
            .checked_add(amount)
            .ok_or("exceeds_authorized")?;
        if cumulative > self.active_auth_amount {
            return Err("exceeds_authorized");
        }
        Ok(())
    }

    /// ¿Existe un objetivo anulable (auth sin capturas o sale sin reembolsos)?
    pub fn can_void(&self) -> Result<TransactionId, &'static str> {
        if let Some(target) = self.voidable_target {
            return Ok(target);
        }
        if self.is_auth_voided {
            return Err("voided");
        }
        if self.active_auth_id.is_some() && !self.captured_amount.is_zero() {
            return Err("already_captured");
        }
        Err("no_voidable_target")
    }

    /// ¿Puede reembolsarse `amount` adicional contra los padres del grupo?
    pub fn can_refund(&self, amount: Amount) -> Result<(), &'static str> {
        if amount.is_zero() {
            return Err("non_positive_amount");
        }
        if self.refundables.is_empty() {
            return Err("no_refundable_parent");
        }
        let cumulative = self
            .refunded_amount
            .checked_add(amount)
            .ok_or("exceeds_refundable")?;
        if cumulative > self.refundable_total() {
            return Err("exceeds_refundable");
        }
        Ok(())
    }

    /// Resuelve el padre contra el cual aplicar un reembolso.
    ///
    /// Si el llamador indicó un padre explícito se valida que sea
    /// reembolsable; de lo contrario se elige el primero con remanente.
    pub fn resolve_refund_parent(
        &self,
        explicit: Option<TransactionId>,
    ) -> Result<&RefundableParent, &'static str> {
        match explicit {
            Some(id) => self
                .refundables
                .iter()
                .find(|r| r.id == id)
                .ok_or("no_refundable_parent"),
            None => {
                if self.refundables.is_empty() {
                    return Err("no_refundable_parent");
                }
                self.refundables
                    .iter()
                    .find(|r| !r.remaining().is_zero())
                    .ok_or("exceeds_refundable")
            }
        }
    }
}
