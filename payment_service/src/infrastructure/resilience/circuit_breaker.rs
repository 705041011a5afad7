use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, Instant};

/// Estado del circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Flujo normal.
    Closed,
    /// Fail-fast: las llamadas fallan sin tocar la red.
    Open,
    /// Un único probe permitido para sondear la recuperación.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Error devuelto cuando el circuito está abierto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitOpenError {
    pub retry_after: Duration,
}

impl fmt::Display for CircuitOpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "circuit is open, retry after {:?}", self.retry_after)
    }
}

impl std::error::Error for CircuitOpenError {}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Fallos dentro de la ventana que abren el circuito.
    pub failure_threshold: u32,
    /// Ventana rodante para contar fallos.
    pub failure_window: Duration,
    /// Cool-down antes de pasar de open a half-open.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    state_changed_at: Instant,
    failures: Vec<Instant>,
    probe_in_flight: bool,
}

/// Circuit breaker de tres estados, una instancia por gateway destino.
///
/// Transiciones: closed→open al acumular `failure_threshold` fallos dentro
/// de `failure_window`; open→half-open tras `cooldown`; half-open→closed
/// con un probe exitoso; half-open→open con un probe fallido. Mientras está
/// abierto, `check` falla de inmediato con [`CircuitOpenError`].
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                state_changed_at: Instant::now(),
                failures: Vec::new(),
                probe_in_flight: false,
            }),
        }
    }

    /// Verifica si la llamada puede proceder. En half-open solo se admite
    /// un probe en vuelo; el resto falla igual que con el circuito abierto.
    pub fn check(&self) -> Result<(), CircuitOpenError> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if inner.state == CircuitState::Open {
            let elapsed = now.duration_since(inner.state_changed_at);
            if elapsed >= self.config.cooldown {
                inner.state = CircuitState::HalfOpen;
                inner.state_changed_at = now;
                inner.probe_in_flight = false;
                tracing::info!("circuit breaker transitioned to half-open");
            } else {
                return Err(CircuitOpenError {
                    retry_after: self.config.cooldown - elapsed,
                });
            }
        }

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(CircuitOpenError {
                        retry_after: Duration::from_millis(100),
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
            CircuitState::Open => unreachable!("open state handled above"),
        }
    }

    /// Registra un éxito: cierra el circuito desde half-open y limpia los
    /// contadores de fallo en closed.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.state_changed_at = Instant::now();
                inner.failures.clear();
                inner.probe_in_flight = false;
                tracing::info!("circuit breaker closed after successful probe");
            }
            CircuitState::Closed => {
                inner.failures.clear();
            }
            CircuitState::Open => {}
        }
    }

    /// Registra un fallo: abre el circuito si la ventana rodante alcanza el
    /// umbral, o re-abre de inmediato si falló el probe de half-open.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => {
                inner.failures.push(now);
                let cutoff = now - self.config.failure_window;
                inner.failures.retain(|&t| t > cutoff);
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.state_changed_at = now;
                    tracing::warn!(
                        failures = inner.failures.len(),
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.state_changed_at = now;
                inner.probe_in_flight = false;
                tracing::warn!("circuit breaker re-opened after failed probe");
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }
}
