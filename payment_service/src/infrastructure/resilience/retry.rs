use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Configuración del loop de reintentos con backoff exponencial.
///
/// El delay del intento `n` es `min(max_delay, base_delay * multiplier^n)`,
/// y el delay observado se distribuye uniformemente en
/// `[d * (1 - jitter), d * (1 + jitter)]`. El jitter es POR INTENTO (no por
/// request) para evitar que una tormenta de reintentos quede sincronizada.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64, // fracción en [0, 1)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Delay base (sin jitter) del intento `attempt` (0-indexed).
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(exp.min(self.max_delay.as_secs_f64()))
    }

    /// Delay con jitter uniforme aplicado.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt).as_secs_f64();
        if self.jitter <= f64::EPSILON {
            return Duration::from_secs_f64(base);
        }
        let low = base * (1.0 - self.jitter);
        let high = base * (1.0 + self.jitter);
        let jittered = rand::thread_rng().gen_range(low..=high);
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Resultado de un intento dentro del loop de reintentos.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Éxito: el loop termina y devuelve el valor.
    Done(T),
    /// Fallo transitorio (red, timeout, 5xx, "try again" del gateway):
    /// se reintenta hasta agotar `max_retries`.
    Retryable(E),
    /// Fallo definitivo (validación, autenticación, decline, 4xx):
    /// el loop termina de inmediato.
    Fatal(E),
}

/// Ejecuta `op` con reintentos acotados y backoff exponencial con jitter.
///
/// El loop se detiene en éxito, en el primer error no-reintentable, o tras
/// `max_retries` reintentos (devolviendo el último error).
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fatal(err) => return Err(err),
            Attempt::Retryable(err) => {
                if attempt >= config.max_retries {
                    return Err(err);
                }
                let delay = config.delay_for(attempt);
                tracing::debug!(
                    operation = operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_grows_exponentially_and_caps() {
        let config = RetryConfig {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.0,
        };

        assert_eq!(config.base_delay_for(0), Duration::from_millis(100));
        assert_eq!(config.base_delay_for(1), Duration::from_millis(200));
        assert_eq!(config.base_delay_for(2), Duration::from_millis(400));
        // Capped at max_delay
        assert_eq!(config.base_delay_for(10), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.5,
        };

        for _ in 0..200 {
            let delay = config.delay_for(1).as_secs_f64();
            assert!(delay >= 0.1 && delay <= 0.3, "delay {} out of bounds", delay);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<u32, &str> =
            retry_with_backoff(&RetryConfig::new(5), "test", move |_| {
                let calls = calls_clone.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Attempt::Retryable("transient")
                    } else {
                        Attempt::Done(42)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_fatal_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<u32, &str> =
            retry_with_backoff(&RetryConfig::new(5), "test", move |_| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Attempt::Fatal("declined")
                }
            })
            .await;

        assert_eq!(result, Err("declined"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<u32, &str> =
            retry_with_backoff(&RetryConfig::new(3), "test", move |_| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Attempt::Retryable("timeout")
                }
            })
            .await;

        assert_eq!(result, Err("timeout"));
        // Intento inicial + 3 reintentos
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
