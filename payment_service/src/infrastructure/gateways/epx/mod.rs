pub mod response;
pub mod wire;

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::domain::error::PaymentError;
use crate::domain::gateways::{CardGateway, GatewayCharge, GatewayFollowOn, GatewayResponse};
use crate::infrastructure::resilience::circuit_breaker::CircuitBreaker;
use crate::infrastructure::resilience::rate_limit::GatewayRateLimiter;
use crate::infrastructure::resilience::retry::{retry_with_backoff, Attempt, RetryConfig};
use response::ResponseDisposition;
use wire::{EpxOperation, EpxRequest, WireSource};

/// Configuración del adaptador EPX.
#[derive(Debug, Clone)]
pub struct EpxConfig {
    pub base_url: String,
    /// Timeout por intento; los reintentos y el breaker envuelven la
    /// llamada ya acotada.
    pub timeout: Duration,
    pub retry: RetryConfig,
    /// Tope duro de lectura del cuerpo de respuesta.
    pub response_size_cap: usize,
}

impl Default for EpxConfig {
    fn default() -> Self {
        Self {
            base_url: "https://services.epxuap.com".to_string(),
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            response_size_cap: 10 * 1024 * 1024,
        }
    }
}

/// Adaptador del gateway EPX.
///
/// Construye el formulario ordenado, lo envía por HTTPS y parsea la
/// respuesta XML `<FIELDS>`. Cada llamada saliente pasa por el rate
/// limiter (si está configurado), el circuit breaker y el loop de
/// reintentos; el breaker y el limiter son singletons por gateway destino
/// compartidos entre todos los workers.
pub struct EpxGateway {
    client: reqwest::Client,
    config: EpxConfig,
    breaker: Arc<CircuitBreaker>,
    limiter: Option<Arc<GatewayRateLimiter>>,
}

impl EpxGateway {
    pub fn new(
        config: EpxConfig,
        breaker: Arc<CircuitBreaker>,
        limiter: Option<Arc<GatewayRateLimiter>>,
    ) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| PaymentError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            breaker,
            limiter,
        })
    }

    /// Envía un request al gateway con toda la envoltura de resiliencia.
    ///
    /// Los declines confirmados regresan como `Ok` con `approved == false`;
    /// solo los fallos de transporte/parseo/circuito abierto son `Err`.
    async fn submit(&self, request: EpxRequest) -> Result<GatewayResponse, PaymentError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        // Si el gateway contesta "try again" hasta agotar los reintentos,
        // devolvemos esa última respuesta confirmada en vez de un error.
        let last_try_again: Mutex<Option<GatewayResponse>> = Mutex::new(None);

        let outcome = retry_with_backoff(&self.config.retry, "epx_submit", |_| {
            self.attempt(&request, &last_try_again)
        })
        .await;

        match outcome {
            Ok(response) => Ok(response),
            Err(PaymentError::GatewayDeclined { .. }) => {
                let response = last_try_again
                    .lock()
                    .take()
                    .ok_or_else(|| PaymentError::Internal("lost try-again response".into()))?;
                Ok(response)
            }
            Err(e) => Err(e),
        }
    }

    async fn attempt(
        &self,
        request: &EpxRequest,
        last_try_again: &Mutex<Option<GatewayResponse>>,
    ) -> Attempt<GatewayResponse, PaymentError> {
        if let Err(open) = self.breaker.check() {
            return Attempt::Fatal(PaymentError::CircuitOpen(format!(
                "retry after {:?}",
                open.retry_after
            )));
        }

        let started = Instant::now();
        let form = request.to_form(Utc::now());
        tracing::debug!(
            operation = ?request.operation,
            fields = ?request.redacted_form(Utc::now()),
            "submitting gateway request"
        );

        let result = self
            .client
            .post(&self.config.base_url)
            .form(&form)
            .send()
            .await;

        let http_response = match result {
            Ok(response) => response,
            Err(e) => {
                self.breaker.record_failure();
                tracing::warn!(
                    operation = ?request.operation,
                    latency_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "gateway transport failure"
                );
                let kind = if e.is_timeout() { "timeout" } else { "network" };
                return Attempt::Retryable(PaymentError::GatewayUnavailable(format!(
                    "{} error contacting gateway: {}",
                    kind, e
                )));
            }
        };

        let status = http_response.status();
        if !status.is_success() {
            self.breaker.record_failure();
            tracing::warn!(
                operation = ?request.operation,
                status = status.as_u16(),
                latency_ms = started.elapsed().as_millis() as u64,
                "gateway returned non-success status"
            );
            let error = PaymentError::GatewayUnavailable(format!(
                "gateway returned HTTP {}",
                status.as_u16()
            ));
            // 5xx, 408 y 429 son transitorios; el resto de 4xx no se reintenta
            if status.is_server_error() || status.as_u16() == 408 || status.as_u16() == 429 {
                return Attempt::Retryable(error);
            }
            return Attempt::Fatal(error);
        }

        let body = match self.read_capped(http_response).await {
            Ok(body) => body,
            Err(e) => {
                self.breaker.record_failure();
                return Attempt::Fatal(e);
            }
        };

        let parsed = response::parse_fields(&body)
            .and_then(|fields| response::interpret(&fields, body.clone()));

        match parsed {
            Ok((gateway_response, disposition)) => {
                // La respuesta llegó y se entendió: el transporte está sano
                self.breaker.record_success();
                tracing::info!(
                    operation = ?request.operation,
                    latency_ms = started.elapsed().as_millis() as u64,
                    response_code = %gateway_response.response_code,
                    approved = gateway_response.approved,
                    "gateway call completed"
                );
                match disposition {
                    ResponseDisposition::Approved | ResponseDisposition::Declined => {
                        Attempt::Done(gateway_response)
                    }
                    ResponseDisposition::TryAgain => {
                        let code = gateway_response.response_code.clone();
                        let text = gateway_response
                            .response_text
                            .clone()
                            .unwrap_or_default();
                        *last_try_again.lock() = Some(gateway_response);
                        Attempt::Retryable(PaymentError::GatewayDeclined { code, text })
                    }
                }
            }
            Err(e) => {
                self.breaker.record_failure();
                tracing::warn!(
                    operation = ?request.operation,
                    latency_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "gateway response could not be interpreted"
                );
                Attempt::Fatal(e)
            }
        }
    }

    /// Lee el cuerpo acumulando chunks hasta el tope configurado, para
    /// defendernos de respuestas desproporcionadas.
    async fn read_capped(&self, mut response: reqwest::Response) -> Result<String, PaymentError> {
        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            PaymentError::GatewayUnavailable(format!("error reading gateway response: {}", e))
        })? {
            if body.len() + chunk.len() > self.config.response_size_cap {
                return Err(PaymentError::GatewayUnavailable(format!(
                    "gateway response exceeded {} byte cap",
                    self.config.response_size_cap
                )));
            }
            body.extend_from_slice(&chunk);
        }
        String::from_utf8(body).map_err(|_| {
            PaymentError::GatewayUnavailable("gateway response is not valid UTF-8".to_string())
        })
    }
}

#[async_trait]
impl CardGateway for EpxGateway {
    async fn authorize(&self, charge: &GatewayCharge) -> Result<GatewayResponse, PaymentError> {
        self.submit(EpxRequest {
            credentials: charge.credentials.clone(),
            operation: EpxOperation::AuthOnly,
            transaction_id: charge.transaction_id,
            amount: charge.amount,
            currency: charge.currency.clone(),
            source: Some(WireSource::from(&charge.source)),
        })
        .await
    }

    async fn sale(&self, charge: &GatewayCharge) -> Result<GatewayResponse, PaymentError> {
        self.submit(EpxRequest {
            credentials: charge.credentials.clone(),
            operation: EpxOperation::Sale,
            transaction_id: charge.transaction_id,
            amount: charge.amount,
            currency: charge.currency.clone(),
            source: Some(WireSource::from(&charge.source)),
        })
        .await
    }

    async fn verify(&self, charge: &GatewayCharge) -> Result<GatewayResponse, PaymentError> {
        self.submit(EpxRequest {
            credentials: charge.credentials.clone(),
            operation: EpxOperation::Verify,
            transaction_id: charge.transaction_id,
            amount: charge.amount,
            currency: charge.currency.clone(),
            source: Some(WireSource::from(&charge.source)),
        })
        .await
    }

    async fn capture(&self, op: &GatewayFollowOn) -> Result<GatewayResponse, PaymentError> {
        self.submit(EpxRequest {
            credentials: op.credentials.clone(),
            operation: EpxOperation::Capture,
            transaction_id: op.transaction_id,
            amount: op.amount,
            currency: op.currency.clone(),
            source: Some(WireSource::OrigAuthGuid(op.parent_gateway_token.clone())),
        })
        .await
    }

    async fn void(&self, op: &GatewayFollowOn) -> Result<GatewayResponse, PaymentError> {
        self.submit(EpxRequest {
            credentials: op.credentials.clone(),
            operation: EpxOperation::Void,
            transaction_id: op.transaction_id,
            amount: op.amount,
            currency: op.currency.clone(),
            source: Some(WireSource::OrigAuthGuid(op.parent_gateway_token.clone())),
        })
        .await
    }

    async fn refund(&self, op: &GatewayFollowOn) -> Result<GatewayResponse, PaymentError> {
        self.submit(EpxRequest {
            credentials: op.credentials.clone(),
            operation: EpxOperation::Refund,
            transaction_id: op.transaction_id,
            amount: op.amount,
            currency: op.currency.clone(),
            source: Some(WireSource::OrigAuthGuid(op.parent_gateway_token.clone())),
        })
        .await
    }
}
