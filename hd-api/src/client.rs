//! HTTP client for the Huddle backend REST API.
//!
//! Single façade for all REST calls. Wraps reqwest::Client with request
//! deduplication, cancellation, exponential backoff retry, bearer token
//! attachment with reactive refresh, and error normalization.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use hd_core::config::AppConfig;
use hd_core::constants;
use hd_core::error::{HdError, HdResult};
use hd_core::observe::{Breadcrumb, CrashSink, NoopSink, TelemetryHook};
use hd_core::storage::KeyValueStore;

use crate::auth::{SessionController, TokenRefresher, TokenStore};
use crate::request::{RequestKey, RequestOptions, RetryPolicy};
use crate::response::ApiResponse;

/// Outcome shared across deduplicated callers of the same request key.
type SharedOutcome = Result<Value, HdError>;

/// In-flight request bookkeeping: the shared outcome channel plus the
/// cancel handle for the leader task. Both entries live and die together.
struct PendingEntry {
    tx: Arc<watch::Sender<Option<SharedOutcome>>>,
    rx: watch::Receiver<Option<SharedOutcome>>,
    abort: AbortHandle,
}

/// HTTP client for communicating with the Huddle backend.
#[derive(Clone)]
pub struct ApiClient {
    inner: reqwest::Client,
    /// Base URL for the API (origin, no path).
    base_url: String,
    /// Default request timeout.
    timeout: Duration,
    /// Default retry policy; calls may override per request.
    default_policy: RetryPolicy,
    /// Custom headers from configuration.
    custom_headers: Vec<(String, String)>,
    /// Token accessor (the single mutation path for the auth token).
    tokens: TokenStore,
    /// Mints a replacement token on 401.
    refresher: Arc<dyn TokenRefresher>,
    /// Notified when auth recovery fails for good.
    session: Arc<dyn SessionController>,
    /// Crash-reporting collaborator.
    sink: Arc<dyn CrashSink>,
    /// Analytics collaborator.
    telemetry: Arc<dyn TelemetryHook>,
    /// In-flight requests keyed by (method, path, body).
    pending: Arc<Mutex<HashMap<String, PendingEntry>>>,
}

impl ApiClient {
    /// Create a new ApiClient from configuration and injected collaborators.
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn KeyValueStore>,
        refresher: Arc<dyn TokenRefresher>,
        session: Arc<dyn SessionController>,
    ) -> HdResult<Self> {
        let base_url = AppConfig::sanitize_server_address(&config.server.address);
        if base_url.is_empty() {
            return Err(HdError::Config("server address is not configured".into()));
        }

        let timeout = Duration::from_millis(config.server.api_timeout_ms);
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(15))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| HdError::Internal(format!("failed to build HTTP client: {e}")))?;

        let custom_headers = config
            .server
            .custom_headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            inner,
            base_url,
            timeout,
            default_policy: RetryPolicy::from_config(&config.retry),
            custom_headers,
            tokens: TokenStore::new(store),
            refresher,
            session,
            sink: Arc::new(NoopSink),
            telemetry: Arc::new(NoopSink),
            pending: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Attach a crash-reporting sink.
    pub fn with_crash_sink(mut self, sink: Arc<dyn CrashSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Attach an analytics hook.
    pub fn with_telemetry(mut self, hook: Arc<dyn TelemetryHook>) -> Self {
        self.telemetry = hook;
        self
    }

    /// Override the default retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// The token accessor, shared with login/logout call sites.
    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// The backend base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}{path}", self.base_url, constants::API_VERSION)
    }

    // --- Public request methods ---

    /// Execute a request with the default retry policy.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> HdResult<T> {
        let policy = self.default_policy.clone();
        self.request_with_policy(method, path, body, options, policy)
            .await
    }

    /// Execute a request with an explicit retry policy.
    pub async fn request_with_policy<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
        policy: RetryPolicy,
    ) -> HdResult<T> {
        let value = self.dispatch(method, path.to_string(), body, options, policy).await?;
        serde_json::from_value(value)
            .map_err(|e| HdError::Serialization(format!("failed to parse response data: {e}")))
    }

    /// Convenience: GET.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> HdResult<T> {
        self.request(Method::GET, path, None, RequestOptions::default()).await
    }

    /// Convenience: POST with a JSON body.
    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> HdResult<T> {
        self.request(Method::POST, path, Some(body), RequestOptions::default()).await
    }

    /// Convenience: PUT with a JSON body.
    pub async fn put<T: DeserializeOwned>(&self, path: &str, body: Value) -> HdResult<T> {
        self.request(Method::PUT, path, Some(body), RequestOptions::default()).await
    }

    /// Convenience: DELETE.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> HdResult<T> {
        self.request(Method::DELETE, path, None, RequestOptions::default()).await
    }

    // --- Deduplication & cancellation ---

    /// Route a call through the dedup table.
    ///
    /// The first caller for a key becomes the leader and spawns the real
    /// network task; everyone else awaits the same watch channel. The entry
    /// is removed when the shared outcome settles.
    async fn dispatch(
        &self,
        method: Method,
        path: String,
        body: Option<Value>,
        options: RequestOptions,
        policy: RetryPolicy,
    ) -> SharedOutcome {
        let key = RequestKey::new(&method, &path, body.as_ref());

        let rx = {
            let mut pending = self.pending.lock().await;
            if let Some(entry) = pending.get(key.as_str()) {
                debug!("coalescing duplicate in-flight request: {} {}", method, path);
                entry.rx.clone()
            } else {
                let (tx, rx) = watch::channel(None);
                let tx = Arc::new(tx);

                let this = self.clone();
                let task_tx = Arc::clone(&tx);
                let task_key = key.as_str().to_string();
                let handle = tokio::spawn(async move {
                    let outcome = this.execute(method, &path, body, options, policy).await;
                    this.pending.lock().await.remove(&task_key);
                    let _ = task_tx.send(Some(outcome));
                });

                pending.insert(
                    key.as_str().to_string(),
                    PendingEntry {
                        tx,
                        rx: rx.clone(),
                        abort: handle.abort_handle(),
                    },
                );
                rx
            }
        };

        Self::await_outcome(rx).await
    }

    async fn await_outcome(mut rx: watch::Receiver<Option<SharedOutcome>>) -> SharedOutcome {
        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return Err(HdError::Internal("request task dropped without settling".into()));
            }
        }
    }

    /// Cancel an in-flight request by its identity.
    ///
    /// Aborts the underlying transport call and frees the dedup slot
    /// immediately. Cancelling a settled or unknown key is a no-op.
    pub async fn cancel_request(&self, method: Method, path: &str, body: Option<&Value>) {
        let key = RequestKey::new(&method, path, body);
        let entry = self.pending.lock().await.remove(key.as_str());
        if let Some(entry) = entry {
            let _ = entry.tx.send(Some(Err(HdError::Cancelled)));
            entry.abort.abort();
            debug!("cancelled request {} {}", method, path);
        }
    }

    /// Cancel every in-flight request.
    pub async fn cancel_all(&self) {
        let entries: Vec<PendingEntry> = self.pending.lock().await.drain().map(|(_, e)| e).collect();
        let count = entries.len();
        for entry in entries {
            let _ = entry.tx.send(Some(Err(HdError::Cancelled)));
            entry.abort.abort();
        }
        if count > 0 {
            info!("cancelled {count} in-flight request(s)");
        }
    }

    /// Number of in-flight requests (for tests and diagnostics).
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    // --- Execution: retry loop + auth recovery ---

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
        policy: RetryPolicy,
    ) -> SharedOutcome {
        let url = self.url(path);
        let timeout = options.timeout.unwrap_or(self.timeout);
        let mut attempt: u32 = 1;
        let mut refreshed = false;

        loop {
            self.sink.add_breadcrumb(
                Breadcrumb::new("http", format!("{method} {path}"))
                    .with_data(json!({ "attempt": attempt })),
            );

            match self.send_once(&method, &url, timeout, body.as_ref(), &options).await {
                Ok(value) => {
                    self.sink.add_breadcrumb(Breadcrumb::new("http", format!("{method} {path} ok")));
                    self.telemetry.track(
                        "api_request_success",
                        json!({ "method": method.as_str(), "path": path, "attempts": attempt }),
                    );
                    return Ok(value);
                }
                Err(err) => {
                    if err.status() == Some(401) && !options.is_refresh && !refreshed {
                        match self.handle_unauthorized().await {
                            // Token refreshed: replay the original request once
                            Ok(true) => {
                                refreshed = true;
                                continue;
                            }
                            // No token was attached; nothing to refresh
                            Ok(false) => {
                                self.report_failure(&err, &method, path);
                                return Err(err);
                            }
                            Err(auth_err) => {
                                self.report_failure(&auth_err, &method, path);
                                return Err(auth_err);
                            }
                        }
                    }

                    if attempt < policy.max_attempts && (policy.retry_on)(&err) {
                        let delay = policy.delay_for(attempt);
                        warn!(
                            "retrying {} {} (attempt {}/{}) after {:.1}s: {}",
                            method,
                            path,
                            attempt + 1,
                            policy.max_attempts,
                            delay.as_secs_f64(),
                            err
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    self.report_failure(&err, &method, path);
                    return Err(err);
                }
            }
        }
    }

    /// One network attempt: attach token, send, normalize the response.
    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        timeout: Duration,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> SharedOutcome {
        let mut builder = self.inner.request(method.clone(), url).timeout(timeout);
        if let Some(b) = body {
            builder = builder.json(b);
        }
        for (key, value) in &self.custom_headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if !options.skip_auth {
            if let Some(token) = self.tokens.get().await? {
                builder = builder.bearer_auth(token);
            }
        }

        let response = builder.send().await.map_err(classify_transport_error)?;
        let status = response.status();

        if status.is_success() {
            let envelope: ApiResponse = response
                .json()
                .await
                .map_err(|e| HdError::Serialization(format!("malformed response body: {e}")))?;
            Ok(envelope.into_data())
        } else {
            // Best-effort extraction of the server's error message
            let message = match response.json::<ApiResponse>().await {
                Ok(envelope) => envelope.error_message(),
                Err(_) => crate::response::GENERIC_ERROR_MESSAGE.to_string(),
            };
            Err(HdError::Http {
                status: status.as_u16(),
                message,
            })
        }
    }

    /// Handle a 401 on a non-refresh request.
    ///
    /// Returns `Ok(true)` when the token was refreshed and the original
    /// request should replay, `Ok(false)` when there was no token to
    /// refresh. A failed refresh clears the token and logs the session out.
    async fn handle_unauthorized(&self) -> HdResult<bool> {
        let Some(current) = self.tokens.get().await? else {
            self.tokens.clear().await.ok();
            return Ok(false);
        };

        info!("received 401, attempting token refresh");
        match self.refresher.refresh(&current).await {
            Ok(new_token) => {
                self.tokens.set(&new_token).await?;
                debug!("token refreshed, replaying original request");
                Ok(true)
            }
            Err(e) => {
                warn!("token refresh failed, logging out: {e}");
                self.tokens.clear().await.ok();
                self.session.logout().await;
                Err(HdError::Auth(format!("token refresh failed: {e}")))
            }
        }
    }

    /// Emit failure breadcrumbs/telemetry and report to the crash sink.
    /// These side effects never propagate into the request flow.
    fn report_failure(&self, err: &HdError, method: &Method, path: &str) {
        self.sink.add_breadcrumb(
            Breadcrumb::new("http", format!("{method} {path} failed"))
                .with_data(json!({ "error": err.to_string() })),
        );

        let event = match err {
            HdError::Network(_) | HdError::Timeout(_) => "api_network_error",
            _ => "api_request_error",
        };
        self.telemetry.track(
            event,
            json!({ "method": method.as_str(), "path": path, "error": err.to_string() }),
        );

        if let Some(severity) = err.report_severity() {
            self.sink.capture_exception(err, &format!("{method} {path}"), severity);
        }
    }

    // --- Health check ---

    /// Narrow reachability probe, independent of the retry/dedup machinery.
    pub async fn health_check(&self) -> bool {
        let url = self.url("/health");
        match self
            .inner
            .get(&url)
            .timeout(Duration::from_millis(constants::HEALTH_CHECK_TIMEOUT_MS))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Classify a reqwest transport error into the HdError taxonomy.
fn classify_transport_error(e: reqwest::Error) -> HdError {
    if e.is_timeout() {
        HdError::Timeout(e.to_string())
    } else if e.is_decode() {
        HdError::Serialization(e.to_string())
    } else {
        HdError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{SessionController, TokenRefresher};
    use async_trait::async_trait;
    use hd_core::storage::MemoryStore;

    struct NoRefresh;

    #[async_trait]
    impl TokenRefresher for NoRefresh {
        async fn refresh(&self, _token: &str) -> HdResult<String> {
            Err(HdError::Auth("refresh unavailable".into()))
        }
    }

    struct NoSession;

    #[async_trait]
    impl SessionController for NoSession {
        async fn logout(&self) {}
    }

    fn test_client() -> ApiClient {
        let mut config = AppConfig::default();
        config.server.address = "http://localhost:9".into();
        ApiClient::new(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(NoRefresh),
            Arc::new(NoSession),
        )
        .unwrap()
    }

    #[test]
    fn test_requires_configured_address() {
        let config = AppConfig::default();
        let result = ApiClient::new(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(NoRefresh),
            Arc::new(NoSession),
        );
        assert!(matches!(result, Err(HdError::Config(_))));
    }

    #[test]
    fn test_url_building() {
        let client = test_client();
        assert_eq!(client.url("/rooms"), "http://localhost:9/api/v1/rooms");
    }

    #[tokio::test]
    async fn test_cancel_unknown_key_is_noop() {
        let client = test_client();
        client.cancel_request(Method::GET, "/rooms", None).await;
        client.cancel_request(Method::GET, "/rooms", None).await;
        client.cancel_all().await;
        assert_eq!(client.pending_count().await, 0);
    }

    #[test]
    fn test_classify_transport_error_shapes() {
        // Constructing reqwest errors directly is not possible; the mapping
        // itself is covered by the integration tests against a live socket.
        let err = HdError::Timeout("deadline".into());
        assert!(err.is_retryable());
    }
}
