//! rumqttc-backed [`MqttTransport`]
//!
//! Each `connect_async` call builds a fresh `AsyncClient`/`EventLoop` pair and
//! spawns a task that polls the loop until our own DISCONNECT goes out or the
//! transport shuts it down. rumqttc reconnects on the next poll after an
//! error; the task spaces those polls out along [`ReconnectConfig`].

use bytes::Bytes;
use rumqttc::{AsyncClient, ClientError, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::{
    build_mqtt_options, resolve_client_id, to_rumqttc_qos, validate_publish_topic,
    validate_subscription_filter, ReconnectConfig,
};
use super::message_handler::{LoopControl, MessageHandler};
use crate::models::QoS;
use crate::transport::{
    ConnectCode, InboundMessage, LogLevel, MqttTransport, RequestCode, RequestReceipt,
    TransportError, TransportEvents,
};

/// Default capacity of rumqttc's outbound request channel
///
/// Requests made from inside an event callback cannot wait for the loop to
/// drain the channel, so callers that subscribe many topics on connect should
/// raise it with [`RumqttcTransport::with_request_capacity`].
pub const REQUEST_CHANNEL_CAPACITY: usize = 64;

type SharedHandler = Arc<Mutex<Option<Arc<dyn TransportEvents>>>>;

#[derive(Default)]
struct TransportState {
    credentials: Option<(String, String)>,
    keepalive: Option<u16>,
    client: Option<AsyncClient>,
    shutdown_tx: Option<watch::Sender<bool>>,
    event_loop_handle: Option<JoinHandle<()>>,
}

impl TransportState {
    /// Client for the running event loop, if any
    fn active_client(&self) -> Option<AsyncClient> {
        let running = self
            .event_loop_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        running.then(|| self.client.clone()).flatten()
    }

    fn stop_event_loop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
        self.client = None;
    }
}

/// MQTT 3.1.1 transport over rumqttc
pub struct RumqttcTransport {
    client_id: String,
    runtime: Option<Handle>,
    reconnect_config: ReconnectConfig,
    request_capacity: usize,
    handler: SharedHandler,
    /// Set by the event loop while the broker has accepted us
    link_up: Arc<AtomicBool>,
    state: Mutex<TransportState>,
}

impl RumqttcTransport {
    /// Create a transport, generating a client id when `client_id` is empty
    ///
    /// Picks up the current tokio runtime if there is one.
    pub fn new(client_id: &str) -> Self {
        Self {
            client_id: resolve_client_id(client_id),
            runtime: Handle::try_current().ok(),
            reconnect_config: ReconnectConfig::default(),
            request_capacity: REQUEST_CHANNEL_CAPACITY,
            handler: Arc::new(Mutex::new(None)),
            link_up: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(TransportState::default()),
        }
    }

    /// Run the event loop on `runtime` instead of the ambient one
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_reconnect_config(mut self, reconnect_config: ReconnectConfig) -> Self {
        self.reconnect_config = reconnect_config;
        self
    }

    /// Size the request channel; values below 1 are raised to 1
    pub fn with_request_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity.max(1);
        self
    }

    pub fn request_capacity(&self) -> usize {
        self.request_capacity
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Whether an event-loop task is currently running
    pub fn is_running(&self) -> bool {
        self.lock_state().active_client().is_some()
    }

    fn lock_state(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request_client(&self) -> Option<AsyncClient> {
        self.lock_state().active_client()
    }
}

impl MqttTransport for RumqttcTransport {
    fn set_event_handler(&self, handler: Arc<dyn TransportEvents>) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn configure(&self, username: &str, password: &str) {
        self.lock_state().credentials = Some((username.to_string(), password.to_string()));
    }

    fn set_keepalive(&self, seconds: u16) {
        self.lock_state().keepalive = Some(seconds);
    }

    fn connect_async(&self, host: &str, port: u16, keepalive: u16) -> Result<(), TransportError> {
        let runtime = self
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
            .ok_or(TransportError::NoRuntime)?;

        let mut state = self.lock_state();
        // An explicit set_keepalive wins over the per-call value
        let keepalive = state.keepalive.unwrap_or(keepalive);
        let credentials = state
            .credentials
            .as_ref()
            .map(|(user, pass)| (user.as_str(), pass.as_str()));
        let options = build_mqtt_options(&self.client_id, host, port, keepalive, credentials)?;

        state.stop_event_loop();
        self.link_up.store(false, Ordering::SeqCst);

        let (client, event_loop) = AsyncClient::new(options, self.request_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            client_id = %self.client_id,
            host,
            port,
            "Starting MQTT event loop"
        );
        let handle = runtime.spawn(run_event_loop(
            event_loop,
            Arc::clone(&self.handler),
            Arc::clone(&self.link_up),
            self.reconnect_config.clone(),
            shutdown_rx,
        ));

        state.client = Some(client);
        state.shutdown_tx = Some(shutdown_tx);
        state.event_loop_handle = Some(handle);
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<RequestReceipt, TransportError> {
        validate_subscription_filter(topic)?;
        let Some(client) = self.request_client() else {
            return Ok(RequestReceipt::failed(RequestCode::NoConnection));
        };

        request_receipt(client.try_subscribe(topic, to_rumqttc_qos(qos)))
    }

    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<RequestReceipt, TransportError> {
        validate_publish_topic(topic)?;
        let Some(client) = self.request_client() else {
            return Ok(RequestReceipt::failed(RequestCode::NoConnection));
        };

        request_receipt(client.try_publish(topic, to_rumqttc_qos(qos), retain, payload.to_vec()))
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.lock_state();
        let Some(client) = state.active_client() else {
            debug!("Disconnect requested with no running event loop");
            state.stop_event_loop();
            return Ok(());
        };
        if !self.link_up.load(Ordering::SeqCst) {
            // Nothing to say goodbye to; stop retrying
            debug!("Disconnect requested before the broker accepted us, stopping event loop");
            state.stop_event_loop();
            return Ok(());
        }

        match client.try_disconnect() {
            Ok(()) => Ok(()),
            Err(e) => {
                // The loop cannot take the request; stop it outright
                state.stop_event_loop();
                Err(TransportError::Client(e))
            }
        }
    }
}

impl Drop for RumqttcTransport {
    fn drop(&mut self) {
        // Can't await a graceful disconnect here; just stop the task
        self.lock_state().stop_event_loop();
    }
}

fn request_receipt(result: Result<(), ClientError>) -> Result<RequestReceipt, TransportError> {
    match result {
        Ok(()) => Ok(RequestReceipt::success(None)),
        Err(ClientError::TryRequest(_)) => Ok(RequestReceipt::failed(RequestCode::QueueFull)),
        Err(e) => Err(TransportError::Client(e)),
    }
}

/// Stand-in while no handler is registered; keeps link tracking going
struct Unhandled;

impl TransportEvents for Unhandled {
    fn on_connect(&self, _code: ConnectCode) {}
    fn on_disconnect(&self, _code: i32) {}
    fn on_message(&self, _message: InboundMessage) {}
    fn on_subscribe(&self, _message_id: u16, _granted_qos: &[u8]) {}
    fn on_publish(&self, _message_id: u16) {}
    fn on_log(&self, _level: LogLevel, _message: &str) {}
}

fn current_handler(handler: &SharedHandler) -> Option<Arc<dyn TransportEvents>> {
    handler
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    handler: SharedHandler,
    link_up: Arc<AtomicBool>,
    reconnect_config: ReconnectConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut failures = 0u32;

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received, stopping MQTT event loop");
                    break;
                }
            }
            polled = event_loop.poll() => {
                match polled {
                    Ok(event) => {
                        failures = 0;
                        let route = MessageHandler::route_mqtt_event(&event);
                        let control = match current_handler(&handler) {
                            Some(events) => MessageHandler::dispatch(route, &*events, &link_up),
                            None => MessageHandler::dispatch(route, &Unhandled, &link_up),
                        };
                        if control == LoopControl::Stop {
                            break;
                        }
                    }
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        let route = MessageHandler::route_error(&e);
                        match current_handler(&handler) {
                            Some(events) => {
                                MessageHandler::dispatch_error(route, &*events, &link_up)
                            }
                            None => {
                                link_up.store(false, Ordering::SeqCst);
                                warn!(error = %e, "MQTT event loop error");
                            }
                        }

                        let delay_ms = reconnect_config.calculate_backoff_delay(failures);
                        debug!(attempt = failures, delay_ms, "Backing off before next poll");
                        if !interruptible_sleep(shutdown_rx.clone(), delay_ms).await {
                            break;
                        }
                    }
                }
            }
        }
    }
    link_up.store(false, Ordering::SeqCst);
    info!("MQTT event loop stopped");
}

/// Sleep for `delay_ms`, returning false if shutdown was requested first
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }
    tokio::select! {
        changed = shutdown_rx.changed() => {
            if changed.is_err() || *shutdown_rx.borrow() {
                info!("Shutdown signal received during reconnection delay, stopping");
                return false;
            }
            true
        }
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}
