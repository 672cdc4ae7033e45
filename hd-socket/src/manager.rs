//! Realtime connection manager.
//!
//! Owns the single logical connection to the backend: token-gated connect
//! with a timeout watchdog, automatic reconnection with capped exponential
//! backoff behind a single timer handle, listener attachment across
//! reconnects, and routing of incoming events to the broadcast dispatcher.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::AbortHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use hd_core::config::SocketConfig;
use hd_core::constants::storage_keys;
use hd_core::error::{HdError, HdResult};
use hd_core::observe::{Breadcrumb, CrashSink, NoopSink, Severity, TelemetryHook};
use hd_core::storage::KeyValueStore;

use crate::events::{ConnectionState, EventDispatcher, ListenerRegistry, SocketEvent};
use crate::transport::{lifecycle, DisconnectReason, RealtimeTransport};

/// Result of a best-effort realtime emit.
///
/// When the HTTP path has already carried the action, a dead socket is a
/// degraded experience rather than a failure; the caller decides whether
/// `Degraded` matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// The event went out over the live connection.
    Sent,
    /// No live connection; the event was dropped.
    Degraded,
}

type TransportFactory = Box<dyn Fn() -> Arc<dyn RealtimeTransport> + Send + Sync>;

/// Realtime connection manager.
///
/// State machine: Disconnected -> Connecting -> Connected, with Reconnecting
/// entered on any recoverable drop and Failed after exhausting reconnect
/// attempts. A deliberate `disconnect()` always lands on Disconnected and
/// cancels any scheduled reconnect.
pub struct SocketManager {
    config: SocketConfig,
    store: Arc<dyn KeyValueStore>,
    /// Builds a fresh transport per connection attempt.
    transport_factory: TransportFactory,
    /// The transport of the current or most recent connection.
    transport: Mutex<Option<Arc<dyn RealtimeTransport>>>,
    dispatcher: EventDispatcher,
    state_tx: watch::Sender<ConnectionState>,
    registry: Mutex<ListenerRegistry>,
    /// Consecutive reconnect attempts since the last successful connect.
    reconnect_attempts: AtomicU32,
    /// The one scheduled reconnect timer. Scheduling a new one aborts the
    /// previous, so overlapping triggers can never stack timers.
    reconnect_timer: Mutex<Option<AbortHandle>>,
    /// Background task routing transport events to the dispatcher.
    pump_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    sink: Arc<dyn CrashSink>,
    telemetry: Arc<dyn TelemetryHook>,
}

impl SocketManager {
    pub fn new<F>(config: SocketConfig, store: Arc<dyn KeyValueStore>, transport_factory: F) -> Self
    where
        F: Fn() -> Arc<dyn RealtimeTransport> + Send + Sync + 'static,
    {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            store,
            transport_factory: Box::new(transport_factory),
            transport: Mutex::new(None),
            dispatcher: EventDispatcher::new(64),
            state_tx,
            registry: Mutex::new(ListenerRegistry::new()),
            reconnect_attempts: AtomicU32::new(0),
            reconnect_timer: Mutex::new(None),
            pump_task: Mutex::new(None),
            sink: Arc::new(NoopSink),
            telemetry: Arc::new(NoopSink),
        }
    }

    /// Attach a crash reporting sink.
    pub fn with_crash_sink(mut self, sink: Arc<dyn CrashSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Attach a telemetry hook for connection lifecycle events.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryHook>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// The event dispatcher (for subscribing to all events).
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    fn set_state(&self, new_state: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state != new_state {
                info!("socket state: {state} -> {new_state}");
                *state = new_state;
                true
            } else {
                false
            }
        });
    }

    async fn auth_token(&self) -> HdResult<String> {
        match self.store.get(storage_keys::AUTH_TOKEN).await? {
            Some(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(HdError::NoToken),
        }
    }

    /// Establish the realtime connection.
    ///
    /// Fails fast with `NoToken` before touching the transport when no auth
    /// token is stored. On a recoverable failure the reconnect cycle takes
    /// over; auth rejections land back on Disconnected since retrying with
    /// the same bad token cannot succeed.
    pub async fn connect(self: &Arc<Self>) -> HdResult<()> {
        match self.state() {
            ConnectionState::Connected | ConnectionState::Connecting => {
                debug!("already connected or connecting, skipping");
                return Ok(());
            }
            _ => {}
        }

        let token = self.auth_token().await?;

        if let Some(handle) = self.reconnect_timer.lock().await.take() {
            handle.abort();
        }
        self.set_state(ConnectionState::Connecting);
        self.reconnect_attempts.store(0, Ordering::SeqCst);

        match self.establish(&token).await {
            Ok(()) => Ok(()),
            Err(e) => {
                match &e {
                    HdError::Auth(_) | HdError::NoToken => {
                        warn!("socket connect rejected: {e}");
                        self.set_state(ConnectionState::Disconnected);
                    }
                    _ => {
                        self.sink.capture_exception(&e, "socket_connect", Severity::Error);
                        self.schedule_reconnect().await;
                    }
                }
                Err(e)
            }
        }
    }

    /// One connection attempt: tear down the prior transport, build a
    /// fresh one, start the event pump, resolve the handshake, then flush
    /// queued listeners.
    async fn establish(self: &Arc<Self>, token: &str) -> HdResult<()> {
        if let Some(stale) = self.transport.lock().await.take() {
            stale.disconnect().await;
        }

        let transport = (self.transport_factory)();
        let handshake_rx = transport.incoming();
        self.start_event_pump(Arc::clone(&transport)).await;
        *self.transport.lock().await = Some(Arc::clone(&transport));

        self.connect_with_timeout(&transport, handshake_rx, token).await?;

        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
        info!("socket connected");
        self.telemetry.track("socket_connected", json!({}));
        self.flush_listeners(&transport).await;
        Ok(())
    }

    /// Resolve a connect attempt within the configured window.
    ///
    /// The attempt resolves on the `connect` ack, on a `connect_error`, or
    /// by polling transport liveness (some backends never ack). Emits a
    /// warning at 75% of the window and does one final liveness check
    /// before giving up, so a slow ack never loses to the deadline by a
    /// hair.
    async fn connect_with_timeout(
        &self,
        transport: &Arc<dyn RealtimeTransport>,
        mut handshake_rx: broadcast::Receiver<crate::transport::TransportEvent>,
        token: &str,
    ) -> HdResult<()> {
        let window = Duration::from_millis(self.config.connection_timeout_ms);
        let started = tokio::time::Instant::now();
        let deadline = started + window;
        let warn_at = started + window.mul_f64(0.75);

        // The initiation call itself counts against the window: a transport
        // that blocks in connect() must not stall the attempt past it
        match tokio::time::timeout(window, transport.connect(token)).await {
            Ok(result) => result.map_err(|e| classify_connect_error(&e.to_string()))?,
            Err(_) => {
                if transport.is_connected() {
                    return Ok(());
                }
                return Err(HdError::ConnectionTimeout(format!(
                    "no handshake within {}ms",
                    self.config.connection_timeout_ms
                )));
            }
        }

        let mut warned = false;
        let mut poll = tokio::time::interval(Duration::from_millis(100));
        loop {
            tokio::select! {
                event = handshake_rx.recv() => match event {
                    Ok(e) if e.name == lifecycle::CONNECT => return Ok(()),
                    Ok(e) if e.name == lifecycle::CONNECT_ERROR => {
                        let detail = e.data.as_str().unwrap_or("connect error");
                        return Err(classify_connect_error(detail));
                    }
                    // Business events can arrive before the ack
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        sleep(Duration::from_millis(50)).await;
                    }
                },
                _ = poll.tick() => {
                    if transport.is_connected() {
                        return Ok(());
                    }
                    let now = tokio::time::Instant::now();
                    if !warned && now >= warn_at {
                        warned = true;
                        warn!(
                            "socket handshake still unresolved after {:?}",
                            now.duration_since(started)
                        );
                    }
                    if now >= deadline {
                        if transport.is_connected() {
                            return Ok(());
                        }
                        return Err(HdError::ConnectionTimeout(format!(
                            "no handshake within {}ms",
                            self.config.connection_timeout_ms
                        )));
                    }
                }
            }
        }
    }

    /// Route transport events: lifecycle drops feed the reconnect logic,
    /// everything else goes to the dispatcher. One pump per transport; a
    /// new attempt aborts the previous pump.
    async fn start_event_pump(self: &Arc<Self>, transport: Arc<dyn RealtimeTransport>) {
        let mut task = self.pump_task.lock().await;
        if let Some(handle) = task.take() {
            handle.abort();
        }

        let manager = Arc::clone(self);
        let mut rx = transport.incoming();
        *task = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match event.name.as_str() {
                        // Handshake outcomes are resolved by the connect waiter
                        lifecycle::CONNECT | lifecycle::CONNECT_ERROR => {}
                        lifecycle::DISCONNECT => {
                            let reason = event.data.as_str().unwrap_or("").to_string();
                            manager.handle_disconnect_event(&reason).await;
                        }
                        _ => manager.dispatcher.dispatch(SocketEvent {
                            name: event.name,
                            data: event.data,
                        }),
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("event pump lagged, {n} event(s) dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    /// React to the wire dropping.
    async fn handle_disconnect_event(self: &Arc<Self>, reason: &str) {
        let parsed = DisconnectReason::parse(reason);
        info!("socket dropped: {reason:?} ({parsed:?})");
        self.sink
            .add_breadcrumb(Breadcrumb::new("socket", format!("disconnect: {reason}")));

        // A deliberate teardown already set Disconnected; nothing to do
        if self.state() == ConnectionState::Disconnected {
            return;
        }

        self.registry.lock().await.reset();
        if parsed.should_reconnect() {
            self.schedule_reconnect().await;
        } else {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Schedule the next reconnect attempt, or give up if attempts are
    /// exhausted. Replaces any previously scheduled timer.
    ///
    /// Returns an explicitly boxed future: the timer task re-enters this
    /// function after a failed attempt, and the indirection keeps the
    /// recursive future sized and `Send`.
    fn schedule_reconnect<'a>(
        self: &'a Arc<Self>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let max = self.config.max_reconnect_attempts;
            if max > 0 && attempt > max {
                error!("giving up after {} reconnect attempt(s)", attempt - 1);
                self.set_state(ConnectionState::Failed);
                self.sink.capture_message(
                    &format!("socket reconnection abandoned after {} attempts", attempt - 1),
                    Severity::Error,
                );
                self.telemetry
                    .track("socket_reconnect_failed", json!({ "attempts": attempt - 1 }));
                return;
            }

            self.set_state(ConnectionState::Reconnecting);
            let delay = self.reconnect_delay(attempt);
            warn!("reconnect attempt {attempt}/{max} in {delay:?}");
            self.telemetry
                .track("socket_reconnecting", json!({ "attempt": attempt }));

            let mut timer = self.reconnect_timer.lock().await;
            if let Some(handle) = timer.take() {
                handle.abort();
            }

            let manager = Arc::clone(self);
            let handle = tokio::spawn(async move {
                sleep(delay).await;
                // A disconnect or manual connect may have raced the timer
                if manager.state() != ConnectionState::Reconnecting {
                    debug!("reconnect tick skipped: state is {}", manager.state());
                    return;
                }
                let token = match manager.auth_token().await {
                    Ok(token) => token,
                    Err(e) => {
                        warn!("reconnect abandoned: {e}");
                        manager.set_state(ConnectionState::Disconnected);
                        return;
                    }
                };
                match manager.establish(&token).await {
                    Ok(()) => info!("reconnected after {attempt} attempt(s)"),
                    Err(e) => {
                        warn!("reconnect attempt {attempt} failed: {e}");
                        manager.schedule_reconnect().await;
                    }
                }
            });
            *timer = Some(handle.abort_handle());
        })
    }

    /// Backoff delay for the given 1-based attempt: base * 2^(attempt-1),
    /// capped at the configured maximum. Deterministic so a user watching
    /// the connection banner sees a predictable cadence.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self
            .config
            .reconnect_base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.reconnect_max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Tear down the connection and cancel any scheduled reconnect.
    pub async fn disconnect(&self) {
        self.set_state(ConnectionState::Disconnected);
        if let Some(handle) = self.reconnect_timer.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.pump_task.lock().await.take() {
            handle.abort();
        }
        if let Some(transport) = self.transport.lock().await.take() {
            transport.disconnect().await;
        }
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.registry.lock().await.reset();
        info!("socket disconnected");
    }

    /// Send a named event over the live connection.
    pub async fn emit(&self, event: &str, payload: &Value) -> HdResult<()> {
        if self.state() != ConnectionState::Connected {
            return Err(HdError::Socket(format!(
                "cannot emit {event} while {}",
                self.state()
            )));
        }
        let transport = self
            .transport
            .lock()
            .await
            .clone()
            .ok_or_else(|| HdError::Socket("no active transport".into()))?;
        transport.emit(event, payload).await
    }

    /// Best-effort emit. Used when the HTTP path has already carried the
    /// action and the realtime event is an optimization. Tries to bring
    /// the connection up first from a cold start, including after a
    /// previously abandoned reconnection.
    pub async fn emit_or_degrade(self: &Arc<Self>, event: &str, payload: &Value) -> EmitOutcome {
        if matches!(
            self.state(),
            ConnectionState::Disconnected | ConnectionState::Failed
        ) {
            if let Err(e) = self.connect().await {
                debug!("emit-triggered connect failed: {e}");
            }
        }
        match self.emit(event, payload).await {
            Ok(()) => EmitOutcome::Sent,
            Err(e) => {
                warn!("realtime emit {event} degraded: {e}");
                self.sink
                    .add_breadcrumb(Breadcrumb::new("socket", format!("emit degraded: {event}")));
                EmitOutcome::Degraded
            }
        }
    }

    /// Register interest in a server event and get a receiver for all
    /// dispatched events (filter by name).
    ///
    /// While disconnected the registration is queued and flushed when the
    /// connection comes up; registering from a cold start also kicks off a
    /// best-effort connect.
    pub async fn on(self: &Arc<Self>, event: &str) -> broadcast::Receiver<SocketEvent> {
        let rx = self.dispatcher.subscribe();
        let mut registry = self.registry.lock().await;

        if self.state() == ConnectionState::Connected {
            let transport = self.transport.lock().await.clone();
            match transport {
                Some(transport) if !registry.is_attached(event) => {
                    match transport.subscribe(event).await {
                        Ok(()) => registry.mark_attached(event),
                        Err(e) => {
                            warn!("failed to attach listener {event}: {e}");
                            registry.add_pending(event);
                        }
                    }
                }
                Some(_) => {}
                None => registry.add_pending(event),
            }
        } else {
            registry.add_pending(event);
            if matches!(
                self.state(),
                ConnectionState::Disconnected | ConnectionState::Failed
            ) {
                let manager = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = manager.connect().await {
                        debug!("listener-triggered connect failed: {e}");
                    }
                });
            }
        }

        rx
    }

    /// Attach every queued listener on the given transport.
    async fn flush_listeners(&self, transport: &Arc<dyn RealtimeTransport>) {
        let mut registry = self.registry.lock().await;
        for event in registry.take_pending() {
            match transport.subscribe(&event).await {
                Ok(()) => registry.mark_attached(&event),
                Err(e) => {
                    warn!("failed to attach listener {event}: {e}");
                    registry.add_pending(&event);
                }
            }
        }
    }
}

/// Map a handshake failure message to a typed error. Auth rejections must
/// not enter the reconnect cycle; everything else is transient.
fn classify_connect_error(detail: &str) -> HdError {
    let lower = detail.to_lowercase();
    if lower.contains("auth") || lower.contains("unauthorized") || lower.contains("401") || lower.contains("forbidden") {
        HdError::Auth(detail.to_string())
    } else if lower.contains("timeout") || lower.contains("timed out") {
        HdError::ConnectionTimeout(detail.to_string())
    } else if lower.contains("refused") || lower.contains("unreachable") || lower.contains("dns") {
        HdError::Network(detail.to_string())
    } else {
        HdError::Socket(detail.to_string())
    }
}
