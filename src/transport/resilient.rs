//! Retrying, circuit-breaking execution path for outbound calls.

use super::error::TransportError;
use super::http::{HttpRequest, HttpResponse, HttpTransport};
use super::reqwest::ReqwestTransport;
use crate::observability::{log_request, log_response};
use crate::resilience::{
    is_retryable_status, CallPermission, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerStatus, CircuitState, RetryConfig,
};
use bytes::Bytes;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Correlation header attached to every request.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";
/// Client version header attached to every request.
pub const CLIENT_VERSION_HEADER: &str = "X-Client-Version";

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    /// Overall per-attempt timeout
    pub request_timeout: Duration,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Value sent in `X-Client-Version`
    pub client_version: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(crate::DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(crate::DEFAULT_REQUEST_TIMEOUT_SECS),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            client_version: crate::CLIENT_VERSION.to_string(),
        }
    }
}

impl TransportConfig {
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Final outcome of a resilient call. Failures are data, never errors.
#[derive(Debug, Clone)]
pub struct HttpResult {
    /// True for a 2xx final response
    pub is_successful: bool,
    /// Final HTTP status, or -1 when no response was received
    pub status_code: i32,
    pub body: Option<String>,
    pub headers: HashMap<String, String>,
    pub error_message: Option<String>,
    /// Value of the `X-Request-ID` header sent with the call
    pub request_id: String,
    /// Set when no response was received
    pub failure: Option<TransportError>,
}

impl HttpResult {
    fn from_response(request_id: String, response: HttpResponse) -> Self {
        let is_successful = response.is_success();
        let error_message = (!is_successful).then(|| {
            let reason = http::StatusCode::from_u16(response.status)
                .ok()
                .and_then(|status| status.canonical_reason())
                .unwrap_or("Unknown");
            format!("HTTP {}: {}", response.status, reason)
        });
        let body = (!response.body.is_empty())
            .then(|| String::from_utf8_lossy(&response.body).into_owned());

        Self {
            is_successful,
            status_code: i32::from(response.status),
            body,
            headers: response.headers,
            error_message,
            request_id,
            failure: None,
        }
    }

    fn from_error(request_id: String, error: TransportError) -> Self {
        Self {
            is_successful: false,
            status_code: -1,
            body: None,
            headers: HashMap::new(),
            error_message: Some(error.to_string()),
            request_id,
            failure: Some(error),
        }
    }

    /// True if the call was rejected by an open circuit without any I/O.
    pub fn is_circuit_open(&self) -> bool {
        self.failure
            .as_ref()
            .map_or(false, TransportError::is_circuit_open)
    }

    /// Body parsed as JSON, or `None` if absent or malformed.
    pub fn body_as_json<T: DeserializeOwned>(&self) -> Option<T> {
        self.body
            .as_deref()
            .and_then(|body| serde_json::from_str(body).ok())
    }
}

/// Executes calls with bounded retries, exponential backoff with jitter, and a circuit
/// breaker per endpoint.
///
/// The backoff wait is a tokio sleep, so calls must run inside a tokio runtime.
pub struct ResilientTransport {
    inner: Arc<dyn HttpTransport>,
    config: TransportConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl ResilientTransport {
    pub fn new(inner: Arc<dyn HttpTransport>, config: TransportConfig) -> Self {
        Self {
            inner,
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Transport over a pooled reqwest client built from `config`'s timeouts.
    pub fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = ReqwestTransport::new(config.request_timeout, config.connect_timeout)?;
        Ok(Self::new(Arc::new(client), config.clone()))
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Send `request`, keyed on its URL host for circuit breaking.
    pub async fn execute(&self, request: HttpRequest) -> HttpResult {
        let request_id = Uuid::new_v4().to_string();
        let request = request
            .with_header(REQUEST_ID_HEADER, request_id.clone())
            .with_header(CLIENT_VERSION_HEADER, self.config.client_version.clone());
        let endpoint = endpoint_key(&request.url);

        log_request(&request_id, &request.method.to_string(), &request.url);
        let started = Instant::now();

        let inner = Arc::clone(&self.inner);
        let outcome = self
            .run(&endpoint, &request_id, move || {
                let inner = Arc::clone(&inner);
                let request = request.clone();
                async move { inner.send(request).await }
            })
            .await;

        self.finish(request_id, outcome, started)
    }

    /// Run an arbitrary async call under the retry and breaker policy of `operation`.
    ///
    /// A non-2xx `HttpResponse` is classified by status exactly like an HTTP call.
    pub async fn execute_operation<F, Fut>(&self, operation: &str, call: F) -> HttpResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<HttpResponse, TransportError>>,
    {
        let request_id = Uuid::new_v4().to_string();
        log_request(&request_id, "CALL", operation);
        let started = Instant::now();

        let outcome = self.run(operation, &request_id, call).await;
        self.finish(request_id, outcome, started)
    }

    pub async fn get(&self, url: &str, headers: HashMap<String, String>) -> HttpResult {
        self.execute(HttpRequest::get(url).with_headers(headers)).await
    }

    pub async fn post(
        &self,
        url: &str,
        body: impl Into<Bytes>,
        content_type: &str,
        headers: HashMap<String, String>,
    ) -> HttpResult {
        let request = HttpRequest::post(url, body)
            .with_headers(headers)
            .with_header("Content-Type", content_type);
        self.execute(request).await
    }

    /// POST `form` as `application/x-www-form-urlencoded`.
    pub async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> HttpResult {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form.iter())
            .finish();
        self.post(url, body, "application/x-www-form-urlencoded", HashMap::new())
            .await
    }

    /// POST `payload` as JSON. A payload that fails to serialize is reported without I/O.
    pub async fn post_json<T: Serialize + ?Sized>(&self, url: &str, payload: &T) -> HttpResult {
        match serde_json::to_vec(payload) {
            Ok(body) => {
                self.post(url, body, "application/json", HashMap::new())
                    .await
            }
            Err(e) => HttpResult::from_error(
                Uuid::new_v4().to_string(),
                TransportError::Request(format!("Failed to serialize request body: {}", e)),
            ),
        }
    }

    /// Breaker snapshot for `endpoint`; an endpoint never called reports closed.
    pub fn circuit_breaker_status(&self, endpoint: &str) -> CircuitBreakerStatus {
        match self.breakers.read().get(endpoint) {
            Some(breaker) => breaker.status(),
            None => CircuitBreakerStatus {
                state: CircuitState::Closed,
                is_open: false,
                failure_count: 0,
                last_failure: None,
            },
        }
    }

    fn breaker_for(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(endpoint) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write();
        let breaker = breakers.entry(endpoint.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                endpoint,
                self.config.circuit_breaker.clone(),
            ))
        });
        Arc::clone(breaker)
    }

    async fn run<F, Fut>(
        &self,
        endpoint: &str,
        request_id: &str,
        mut call: F,
    ) -> Result<HttpResponse, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<HttpResponse, TransportError>>,
    {
        let breaker = self.breaker_for(endpoint);
        let permission = breaker.acquire();
        if permission == CallPermission::Rejected {
            warn!(
                endpoint = %endpoint,
                request_id = %request_id,
                "Circuit breaker is open, failing fast"
            );
            return Err(TransportError::CircuitOpen {
                endpoint: endpoint.to_string(),
            });
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let outcome = call().await;

            let (succeeded, retryable) = match &outcome {
                Ok(response) => (response.is_success(), is_retryable_status(response.status)),
                Err(error) => (false, error.is_retryable()),
            };
            if succeeded {
                breaker.record_success();
                return outcome;
            }

            // A half-open probe gets exactly one attempt.
            let may_retry = permission == CallPermission::Allowed
                && self.config.retry.has_attempts_left(attempts);

            if retryable && may_retry {
                let delay = self.config.retry.backoff(attempts);
                debug!(
                    endpoint = %endpoint,
                    request_id = %request_id,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if retryable {
                warn!(
                    endpoint = %endpoint,
                    request_id = %request_id,
                    attempts,
                    "Retries exhausted"
                );
            }
            breaker.record_failure();
            return outcome;
        }
    }

    fn finish(
        &self,
        request_id: String,
        outcome: Result<HttpResponse, TransportError>,
        started: Instant,
    ) -> HttpResult {
        let result = match outcome {
            Ok(response) => HttpResult::from_response(request_id, response),
            Err(error) => HttpResult::from_error(request_id, error),
        };
        log_response(
            &result.request_id,
            result.status_code,
            started.elapsed().as_millis() as u64,
        );
        result
    }
}

impl std::fmt::Debug for ResilientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientTransport")
            .field("config", &self.config)
            .field("breakers", &self.breakers.read().len())
            .finish_non_exhaustive()
    }
}

/// Breaker key for a URL: its host, or the raw string if it does not parse.
fn endpoint_key(raw: &str) -> String {
    url::Url::parse(raw)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockHttpTransport;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> TransportConfig {
        TransportConfig::default().with_retry(RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            jitter: 0.0,
        })
    }

    #[test]
    fn test_endpoint_key() {
        assert_eq!(endpoint_key("https://config.rcs.example:8443/a?b=c"), "config.rcs.example");
        assert_eq!(endpoint_key("not a url"), "not a url");
    }

    #[test]
    fn test_result_from_error_has_negative_status() {
        let result = HttpResult::from_error("id".into(), TransportError::Timeout);
        assert!(!result.is_successful);
        assert_eq!(result.status_code, -1);
        assert_eq!(result.error_message.as_deref(), Some("Timeout"));
        assert!(!result.is_circuit_open());
    }

    #[test]
    fn test_result_error_message_uses_reason_phrase() {
        let result = HttpResult::from_response("id".into(), HttpResponse::with_status(503));
        assert_eq!(result.error_message.as_deref(), Some("HTTP 503: Service Unavailable"));
        assert_eq!(result.body, None);
    }

    #[test]
    fn test_body_as_json() {
        let mut response = HttpResponse::with_status(200);
        response.body = Bytes::from_static(br#"{"phone":"+15550001111"}"#);
        let result = HttpResult::from_response("id".into(), response);

        let parsed: serde_json::Value = result.body_as_json().unwrap();
        assert_eq!(parsed["phone"], "+15550001111");
        assert_eq!(result.body_as_json::<Vec<u32>>(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_headers_attached() {
        let mut inner = MockHttpTransport::new();
        inner
            .expect_send()
            .withf(|request| {
                request.headers.contains_key(REQUEST_ID_HEADER)
                    && request.headers.get(CLIENT_VERSION_HEADER).map(String::as_str)
                        == Some(crate::CLIENT_VERSION)
            })
            .times(1)
            .returning(|_| Ok(HttpResponse::with_status(200)));

        let transport = ResilientTransport::new(Arc::new(inner), fast_config(3));
        let result = transport.get("https://acs.example/config", HashMap::new()).await;

        assert!(result.is_successful);
        assert_eq!(result.status_code, 200);
        assert!(Uuid::parse_str(&result.request_id).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors_then_succeeds() {
        let calls = AtomicU32::new(0);
        let transport = ResilientTransport::new(Arc::new(MockHttpTransport::new()), fast_config(3));

        let result = transport
            .execute_operation("register", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(TransportError::Timeout)
                    } else {
                        Ok(HttpResponse::with_status(200))
                    }
                }
            })
            .await;

        assert!(result.is_successful);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(transport.circuit_breaker_status("register").failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_ceiling_is_total_attempts() {
        let calls = AtomicU32::new(0);
        let transport = ResilientTransport::new(Arc::new(MockHttpTransport::new()), fast_config(3));

        let result = transport
            .execute_operation("register", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    let status = if n < 3 { 503 } else { 200 };
                    Ok(HttpResponse::with_status(status))
                }
            })
            .await;

        assert!(!result.is_successful);
        assert_eq!(result.status_code, 503);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(transport.circuit_breaker_status("register").failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let transport = ResilientTransport::new(Arc::new(MockHttpTransport::new()), fast_config(3));

        let result = transport
            .execute_operation("register", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TransportError::Connection("refused".into())) }
            })
            .await;

        assert_eq!(result.status_code, -1);
        assert_eq!(
            result.failure,
            Some(TransportError::Connection("refused".into()))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_skips_call_and_probe_is_single_attempt() {
        let calls = AtomicU32::new(0);
        let config = fast_config(3).with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout: Duration::from_secs(5),
        });
        let transport = ResilientTransport::new(Arc::new(MockHttpTransport::new()), config);
        let failing = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(HttpResponse::with_status(400)) }
        };

        transport.execute_operation("presence", failing).await;
        transport.execute_operation("presence", failing).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let rejected = transport.execute_operation("presence", failing).await;
        assert!(rejected.is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(transport.circuit_breaker_status("presence").is_open);

        tokio::time::advance(Duration::from_secs(5)).await;
        let retry_503 = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(HttpResponse::with_status(503)) }
        };
        let probe = transport.execute_operation("presence", retry_503).await;
        assert_eq!(probe.status_code, 503);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            transport.circuit_breaker_status("presence").state,
            CircuitState::Open
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_serialization_failure_reports_without_io() {
        let transport = ResilientTransport::new(Arc::new(MockHttpTransport::new()), fast_config(3));
        let mut bad = HashMap::new();
        bad.insert(vec![1u8], 1u8);

        let result = transport.post_json("https://acs.example/json", &bad).await;
        assert_eq!(result.status_code, -1);
        assert!(matches!(result.failure, Some(TransportError::Request(_))));
    }
}
