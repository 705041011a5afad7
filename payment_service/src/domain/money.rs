use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::error::PaymentError;

/// Código de divisa ISO-4217 (3 letras mayúsculas).
///
/// El exponente de la divisa determina cuántos decimales existen en la
/// representación "mayor" (USD = 2, JPY = 0, BHD = 3).
///
/// # Examples
/// ```
/// use payment_service::domain::money::Currency;
///
/// let usd = Currency::new("usd").unwrap();
/// assert_eq!(usd.code(), "USD");
/// assert_eq!(usd.exponent(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct Currency(String);

impl Currency {
    /// Valida y normaliza un código de divisa de 3 letras.
    pub fn new(code: &str) -> Result<Self, PaymentError> {
        let normalized = code.trim().to_uppercase();
        if normalized.len() != 3 || !normalized.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PaymentError::Validation(format!(
                "currency must be a 3-letter ISO code, got '{}'",
                code
            )));
        }
        Ok(Self(normalized))
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// Cantidad de posiciones decimales de la divisa en su unidad mayor.
    pub fn exponent(&self) -> u32 {
        match self.0.as_str() {
            "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF"
            | "UGX" | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
            "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
            _ => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monto monetario en unidades menores (centavos para USD).
///
/// Internamente el servicio SIEMPRE trabaja con enteros de 64 bits; la
/// conversión a decimal ocurre únicamente en la frontera (DTOs y el wire
/// del gateway), de forma que nunca se pierda precisión.
///
/// # Examples
/// ```
/// use payment_service::domain::money::{Amount, Currency};
///
/// let usd = Currency::new("USD").unwrap();
/// let amount = Amount::from_decimal_str("100.50", &usd).unwrap();
/// assert_eq!(amount.minor_units(), 10050);
/// assert_eq!(amount.to_decimal(&usd).to_string(), "100.50");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Construye un monto a partir de unidades menores. Rechaza negativos.
    pub fn from_minor_units(minor_units: i64) -> Result<Self, PaymentError> {
        if minor_units < 0 {
            return Err(PaymentError::Validation(format!(
                "amount cannot be negative: {}",
                minor_units
            )));
        }
        Ok(Self(minor_units))
    }

    /// Convierte un decimal (representación de frontera) a unidades menores
    /// sin pérdida de precisión.
    ///
    /// Falla si el decimal tiene más posiciones que el exponente de la divisa
    /// (ej. "1.005" en USD) o si es negativo.
    pub fn from_decimal(value: Decimal, currency: &Currency) -> Result<Self, PaymentError> {
        if value.is_sign_negative() {
            return Err(PaymentError::Validation(format!(
                "amount cannot be negative: {}",
                value
            )));
        }
        let exponent = currency.exponent();
        let scaled = value
            .checked_mul(Decimal::from(10_i64.pow(exponent)))
            .ok_or_else(|| PaymentError::Validation(format!("amount out of range: {}", value)))?;
        if scaled.normalize().scale() > 0 {
            return Err(PaymentError::Validation(format!(
                "amount {} has more precision than {} allows ({} decimal places)",
                value, currency, exponent
            )));
        }
        let minor = scaled.to_i64().ok_or_else(|| {
            PaymentError::Validation(format!("amount out of range: {}", value))
        })?;
        Self::from_minor_units(minor)
    }

    /// Parsea un monto decimal en forma de string (como llega por los DTOs).
    pub fn from_decimal_str(value: &str, currency: &Currency) -> Result<Self, PaymentError> {
        let decimal: Decimal = value.trim().parse().map_err(|_| {
            PaymentError::Validation(format!("invalid decimal amount: '{}'", value))
        })?;
        Self::from_decimal(decimal, currency)
    }

    /// Representación decimal de frontera, con la escala de la divisa.
    pub fn to_decimal(&self, currency: &Currency) -> Decimal {
        Decimal::new(self.0, currency.exponent())
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(&self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn saturating_sub(&self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0).max(0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[test]
    fn test_currency_normalizes_and_validates() {
        assert_eq!(Currency::new(" usd ").unwrap().code(), "USD");
        assert!(Currency::new("US").is_err());
        assert!(Currency::new("USDX").is_err());
        assert!(Currency::new("U5D").is_err());
    }

    #[rstest]
    #[case("USD", 2)]
    #[case("JPY", 0)]
    #[case("BHD", 3)]
    #[case("EUR", 2)]
    fn test_currency_exponent(#[case] code: &str, #[case] exponent: u32) {
        assert_eq!(Currency::new(code).unwrap().exponent(), exponent);
    }

    #[test]
    fn test_amount_from_decimal_lossless() {
        let usd = Currency::new("USD").unwrap();
        assert_eq!(
            Amount::from_decimal(dec!(100.50), &usd).unwrap().minor_units(),
            10050
        );
        assert_eq!(
            Amount::from_decimal(dec!(0.01), &usd).unwrap().minor_units(),
            1
        );

        let jpy = Currency::new("JPY").unwrap();
        assert_eq!(
            Amount::from_decimal(dec!(1000), &jpy).unwrap().minor_units(),
            1000
        );
    }

    #[test]
    fn test_amount_rejects_excess_precision() {
        let usd = Currency::new("USD").unwrap();
        assert!(Amount::from_decimal(dec!(1.005), &usd).is_err());

        let jpy = Currency::new("JPY").unwrap();
        assert!(Amount::from_decimal(dec!(10.5), &jpy).is_err());
    }

    #[test]
    fn test_amount_rejects_negative() {
        let usd = Currency::new("USD").unwrap();
        assert!(Amount::from_decimal(dec!(-1.00), &usd).is_err());
        assert!(Amount::from_minor_units(-1).is_err());
    }

    #[test]
    fn test_amount_round_trip_to_decimal() {
        let usd = Currency::new("USD").unwrap();
        let amount = Amount::from_decimal_str("99.99", &usd).unwrap();
        assert_eq!(amount.to_decimal(&usd), dec!(99.99));
        assert_eq!(amount.to_decimal(&usd).to_string(), "99.99");
    }
}
