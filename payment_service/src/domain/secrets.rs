use crate::domain::error::PaymentError;

/// Resuelve referencias de secretos a su valor.
///
/// Los merchants persisten únicamente una REFERENCIA a su MAC secret; el
/// valor real vive fuera de la base de datos (variables de entorno en la
/// implementación provista, un secret manager en producción).
pub trait SecretStore: Send + Sync {
    fn resolve(&self, secret_ref: &str) -> Result<String, PaymentError>;
}
