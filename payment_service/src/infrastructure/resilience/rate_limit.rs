use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;

/// Token bucket para acotar el throughput hacia el gateway.
///
/// Una sola instancia por gateway destino, compartida entre todos los
/// workers. `acquire` espera de forma cooperativa hasta que haya un token
/// disponible, suavizando las ráfagas sin descartar requests.
pub struct GatewayRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    rps: u32,
    burst: u32,
}

impl GatewayRateLimiter {
    pub fn new(rps: u32, burst: u32) -> Self {
        let rps_nz = NonZeroU32::new(rps.max(1)).expect("rps is clamped to >= 1");
        let burst_nz = NonZeroU32::new(burst.max(1)).expect("burst is clamped to >= 1");
        let quota = Quota::per_second(rps_nz).allow_burst(burst_nz);
        Self {
            limiter: RateLimiter::direct(quota),
            rps: rps.max(1),
            burst: burst.max(1),
        }
    }

    /// Espera hasta obtener un token del bucket.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    pub fn rps(&self) -> u32 {
        self.rps
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_burst_capacity_is_immediate() {
        let limiter = GatewayRateLimiter::new(10, 5);

        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        // Los primeros `burst` tokens no deberían esperar
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_exhausted_bucket_throttles() {
        let limiter = GatewayRateLimiter::new(10, 1);

        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        // Con 10 rps, el siguiente token tarda ~100ms
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
