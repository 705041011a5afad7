use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

use crate::infrastructure::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::infrastructure::resilience::retry::RetryConfig;

/// Ambiente de despliegue: decide el default de la URL del gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Sandbox,
}

impl Environment {
    fn default_gateway_url(&self) -> &'static str {
        match self {
            Environment::Production => "https://services.epx.com",
            Environment::Sandbox => "https://services.epxuap.com",
        }
    }
}

/// Configuración del servicio, cargada desde variables de entorno.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub database_url: String,
    pub db_pool_size: u32,
    pub http_host: String,
    pub http_port: u16,
    pub grpc_port: u16,
    pub callback_port: u16,
    pub gateway_base_url: String,
    pub gateway_timeout: Duration,
    pub gateway_max_retries: u32,
    pub breaker_failure_threshold: u32,
    pub breaker_failure_window: Duration,
    pub breaker_cooldown: Duration,
    pub response_size_cap: usize,
    /// 0 deshabilita el rate limiting saliente.
    pub rate_limit_rps: u32,
    pub use_fake_gateway: bool,
    pub idempotency_retention: Duration,
    pub idempotency_stale_after: Duration,
}

fn var_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let environment = match env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "sandbox".to_string())
            .to_lowercase()
            .as_str()
        {
            "production" => Environment::Production,
            _ => Environment::Sandbox,
        };

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let gateway_base_url = env::var("EPX_BASE_URL")
            .unwrap_or_else(|_| environment.default_gateway_url().to_string());

        Ok(Self {
            environment,
            database_url,
            db_pool_size: var_or("DB_POOL_SIZE", 5)?,
            http_host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            http_port: var_or("PORT", 3000)?,
            grpc_port: var_or("GRPC_PORT", 50051)?,
            callback_port: var_or("CALLBACK_PORT", 3001)?,
            gateway_base_url,
            gateway_timeout: Duration::from_secs(var_or("EPX_TIMEOUT_SECS", 30u64)?),
            gateway_max_retries: var_or("EPX_MAX_RETRIES", 3)?,
            breaker_failure_threshold: var_or("EPX_BREAKER_FAILURES", 5)?,
            breaker_failure_window: Duration::from_secs(var_or(
                "EPX_BREAKER_WINDOW_SECS",
                60u64,
            )?),
            breaker_cooldown: Duration::from_secs(var_or("EPX_BREAKER_COOLDOWN_SECS", 30u64)?),
            response_size_cap: var_or("EPX_RESPONSE_SIZE_CAP", 10 * 1024 * 1024)?,
            rate_limit_rps: var_or("EPX_RATE_LIMIT_RPS", 100)?,
            use_fake_gateway: var_or("USE_FAKE_GATEWAY", false)?,
            idempotency_retention: Duration::from_secs(
                var_or("IDEMPOTENCY_RETENTION_HOURS", 24u64)? * 3600,
            ),
            idempotency_stale_after: Duration::from_secs(var_or(
                "IDEMPOTENCY_STALE_AFTER_SECS",
                120u64,
            )?),
        })
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.gateway_max_retries)
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            failure_window: self.breaker_failure_window,
            cooldown: self.breaker_cooldown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_is_the_default_environment() {
        // Sin ENVIRONMENT seteado el default apunta al gateway de pruebas
        let environment = Environment::Sandbox;
        assert_eq!(
            environment.default_gateway_url(),
            "https://services.epxuap.com"
        );
        assert_eq!(
            Environment::Production.default_gateway_url(),
            "https://services.epx.com"
        );
    }
}
