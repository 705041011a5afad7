use std::env;

use crate::domain::error::PaymentError;
use crate::domain::secrets::SecretStore;

/// SecretStore respaldado por variables de entorno.
///
/// Una referencia `epx-mac-acme` se resuelve leyendo `EPX_MAC_ACME` (la
/// referencia en mayúsculas con `-` → `_`). Mantiene los secretos fuera de
/// la base de datos sin atarnos a un secret manager concreto.
pub struct EnvSecretStore;

impl EnvSecretStore {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EnvSecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for EnvSecretStore {
    fn resolve(&self, secret_ref: &str) -> Result<String, PaymentError> {
        let var_name = secret_ref.to_uppercase().replace('-', "_");
        env::var(&var_name).map_err(|_| {
            PaymentError::Internal(format!(
                "secret reference '{}' is not configured",
                secret_ref
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_reference_from_env() {
        env::set_var("EPX_MAC_TEST_STORE", "super-secret");
        let store = EnvSecretStore::new();

        assert_eq!(store.resolve("epx-mac-test-store").unwrap(), "super-secret");
        env::remove_var("EPX_MAC_TEST_STORE");
    }

    #[test]
    fn test_missing_reference_is_an_error() {
        let store = EnvSecretStore::new();
        assert!(store.resolve("epx-mac-missing").is_err());
    }
}
