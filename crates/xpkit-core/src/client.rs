// ── WebSocket client ──
//
// Full lifecycle management for a simulator connection. A connection
// supervisor task gates on REST reachability, opens the WebSocket, and
// runs one session at a time: a read loop routing inbound frames and a
// writer task draining the outbound queue. Network failures reconnect
// with exponential backoff; explicit stop/disconnect ends supervision.
//
// All client-side session state (pending requests, entity registry,
// subscription acks) lives behind one coarse mutex -- a disconnect must
// atomically cancel pending requests and clear monitor state, and
// message rates are far too low for finer locking to matter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use xpkit_api::rest::RestClient;
use xpkit_api::transport::TransportConfig;
use xpkit_api::wire::{
    self, CommandActivation, CommandSpec, DatarefSpec, DatarefWrite, WsCommandActive,
    WsDatarefUpdate, WsMessage, WsOperation, WsRequest, WsResult,
};

use crate::config::{ClientConfig, ReconnectConfig};
use crate::dispatch::{CallbackDispatcher, ClientEvent, EventKind};
use crate::error::CoreError;
use crate::model::{
    Command, Dataref, DatarefValue, DatarefWire, MonitorState, Monitored, parse_array_element,
    parse_value, value_to_wire,
};
use crate::monitor::{self, AckBook, MonitorAck};
use crate::registry::{DatarefRoute, EntityRegistry};
use crate::request::{RequestHandle, RequestTable};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

// ── XplaneClient ─────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc`. Manages the full connection lifecycle:
/// REST-gated WebSocket connection, live monitoring subscriptions,
/// request correlation, and callback dispatch.
#[derive(Clone)]
pub struct XplaneClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    rest: RestClient,
    state_tx: watch::Sender<ConnectionState>,
    shared: Mutex<Shared>,
    dispatcher: CallbackDispatcher,
    supervisor: Mutex<Option<Supervisor>>,
}

struct Supervisor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Shared {
    session: Option<Session>,
    requests: RequestTable,
    registry: EntityRegistry,
    acks: AckBook,
}

struct Session {
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

enum SessionEnd {
    /// Explicit stop/disconnect; supervision ends.
    Stopped,
    /// Server closed the connection cleanly; reconnect immediately.
    Clean,
    /// Connect or receive failure; reconnect with backoff.
    Failed(CoreError),
}

impl XplaneClient {
    /// Create a client from configuration. Does NOT connect -- call
    /// [`connect()`](Self::connect) to start the connection supervisor.
    pub fn new(config: ClientConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            timeout: config.request_timeout,
            ..TransportConfig::default()
        };
        let rest = RestClient::new(config.endpoint.clone(), &transport)?;
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                rest,
                state_tx,
                shared: Mutex::new(Shared::default()),
                dispatcher: CallbackDispatcher::default(),
                supervisor: Mutex::new(None),
            }),
        })
    }

    /// Access the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Access the underlying REST client (capabilities, metadata,
    /// one-shot reads).
    pub fn rest(&self) -> &RestClient {
        &self.inner.rest
    }

    // ── State observation ────────────────────────────────────────────

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Block until the connection reaches `connected`, or `timeout`
    /// elapses. Returns `false` on timeout (or if the client is torn
    /// down before the transition) rather than raising.
    pub async fn wait_connection(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.state_tx.subscribe();
        let wait = rx.wait_for(|s| *s == ConnectionState::Connected);
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result.is_ok(),
            Err(_) => false,
        }
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Start the connection supervisor. Non-blocking: returns once the
    /// supervisor task is spawned; use [`wait_connection`](Self::wait_connection)
    /// to block until the socket is up.
    ///
    /// A no-op (reporting the current state) while connecting or
    /// connected -- only one connection attempt may be in flight.
    pub fn connect(&self) {
        let state = self.state();
        if matches!(state, ConnectionState::Connecting | ConnectionState::Connected) {
            debug!(%state, "connect is a no-op in this state");
            return;
        }

        let mut supervisor = self.inner.supervisor.lock().expect("supervisor lock poisoned");
        if supervisor.is_some() {
            debug!("connection supervisor still running");
            return;
        }

        self.inner.state_tx.send_replace(ConnectionState::Connecting);
        let cancel = CancellationToken::new();
        let client = self.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            supervise(client, task_cancel).await;
        });
        *supervisor = Some(Supervisor { cancel, handle });
        debug!("connection supervisor started");
    }

    /// Prime initial subscriptions and begin consuming updates.
    ///
    /// Receiving starts at connection time; this flushes monitoring
    /// state queued while disconnected and fires `AfterStart`. With
    /// `release = false` the call parks until [`stop()`](Self::stop) or
    /// [`disconnect()`](Self::disconnect) is called elsewhere.
    pub async fn start(&self, release: bool) {
        if self.state() != ConnectionState::Connected {
            warn!("not connected, cannot start");
            return;
        }

        self.prime_subscriptions();
        self.inner
            .dispatcher
            .dispatch(&ClientEvent::AfterStart { connected: true });
        info!("client started");

        if !release {
            let Some(cancel) = self.session_cancel() else {
                return;
            };
            info!("waiting for stop");
            cancel.cancelled().await;
        }
    }

    /// Signal the message loop to exit after draining in-flight sends.
    /// Safe no-op when nothing is running.
    pub fn stop(&self) {
        if self.state() == ConnectionState::Disconnecting {
            return;
        }
        let Some(cancel) = self.session_cancel() else {
            debug!("not running, stop is a no-op");
            return;
        };
        self.inner.dispatcher.dispatch(&ClientEvent::BeforeStop {
            connected: self.state() == ConnectionState::Connected,
        });
        self.inner
            .state_tx
            .send_replace(ConnectionState::Disconnecting);
        cancel.cancel();
        debug!("stop requested");
    }

    /// End supervision, close the socket, and transition to
    /// `disconnected`. Cancels every pending request with a
    /// connection-lost error and clears confirmed monitor state.
    /// Idempotent.
    pub async fn disconnect(&self) {
        let supervisor = self
            .inner
            .supervisor
            .lock()
            .expect("supervisor lock poisoned")
            .take();
        let Some(Supervisor { cancel, handle }) = supervisor else {
            if self.state() != ConnectionState::Disconnected {
                self.inner.state_tx.send_replace(ConnectionState::Disconnected);
            }
            debug!("already disconnected");
            return;
        };

        debug!("disconnecting");
        self.inner
            .state_tx
            .send_replace(ConnectionState::Disconnecting);
        cancel.cancel();
        if handle.await.is_err() {
            warn!("supervisor task panicked");
        }
        debug!("disconnected");
    }

    // ── Entities ─────────────────────────────────────────────────────

    /// Get or lazily create the dataref for `name`. At most one
    /// instance exists per identifier; repeated calls return the same
    /// `Arc`.
    pub fn dataref(&self, name: &str) -> Arc<Dataref> {
        self.inner
            .shared
            .lock()
            .expect("state lock poisoned")
            .registry
            .dataref(name)
    }

    /// Get or lazily create the command for `path`.
    pub fn command(&self, path: &str) -> Arc<Command> {
        self.inner
            .shared
            .lock()
            .expect("state lock poisoned")
            .registry
            .command(path)
    }

    // ── Callbacks ────────────────────────────────────────────────────

    /// Register a callback for an event kind. Callbacks fire in
    /// registration order; registering the same function twice makes it
    /// fire twice.
    pub fn add_callback(
        &self,
        kind: EventKind,
        callback: impl Fn(&ClientEvent) + Send + Sync + 'static,
    ) {
        self.inner.dispatcher.add(kind, callback);
    }

    // ── Monitoring ───────────────────────────────────────────────────

    /// Start monitoring a single dataref for value changes.
    ///
    /// Returns `Ok(None)` when no wire traffic was needed (already
    /// monitored, or queued while disconnected).
    pub fn monitor_dataref(
        &self,
        dataref: &Arc<Dataref>,
    ) -> Result<Option<RequestHandle>, CoreError> {
        self.monitor_datarefs(std::slice::from_ref(dataref))
    }

    /// Start monitoring a batch of datarefs with a single wire frame.
    /// Only the delta against already-subscribed state is sent.
    pub fn monitor_datarefs(
        &self,
        datarefs: &[Arc<Dataref>],
    ) -> Result<Option<RequestHandle>, CoreError> {
        let mut shared = self.inner.shared.lock().expect("state lock poisoned");
        let connected = shared.session.is_some();
        let to_send = monitor::plan_monitor(datarefs, connected);
        if to_send.is_empty() {
            return Ok(None);
        }
        self.send_dataref_subscription(&mut shared, to_send, true)
            .map(Some)
    }

    /// Stop monitoring a single dataref.
    pub fn unmonitor_dataref(
        &self,
        dataref: &Arc<Dataref>,
    ) -> Result<Option<RequestHandle>, CoreError> {
        self.unmonitor_datarefs(std::slice::from_ref(dataref))
    }

    /// Stop monitoring a batch of datarefs with a single wire frame.
    /// Entities that were never subscribed are cleared silently.
    pub fn unmonitor_datarefs(
        &self,
        datarefs: &[Arc<Dataref>],
    ) -> Result<Option<RequestHandle>, CoreError> {
        let mut shared = self.inner.shared.lock().expect("state lock poisoned");
        let to_send = monitor::plan_unmonitor(datarefs);
        if to_send.is_empty() {
            return Ok(None);
        }
        self.send_dataref_subscription(&mut shared, to_send, false)
            .map(Some)
    }

    /// Start monitoring a command's active state.
    pub fn monitor_command_active(
        &self,
        command: &Arc<Command>,
    ) -> Result<Option<RequestHandle>, CoreError> {
        self.monitor_commands_active(std::slice::from_ref(command))
    }

    /// Start monitoring a batch of commands with a single wire frame.
    pub fn monitor_commands_active(
        &self,
        commands: &[Arc<Command>],
    ) -> Result<Option<RequestHandle>, CoreError> {
        let mut shared = self.inner.shared.lock().expect("state lock poisoned");
        let connected = shared.session.is_some();
        let to_send = monitor::plan_monitor(commands, connected);
        if to_send.is_empty() {
            return Ok(None);
        }
        self.send_command_subscription(&mut shared, to_send, true)
            .map(Some)
    }

    /// Stop monitoring a command's active state.
    pub fn unmonitor_command_active(
        &self,
        command: &Arc<Command>,
    ) -> Result<Option<RequestHandle>, CoreError> {
        let mut shared = self.inner.shared.lock().expect("state lock poisoned");
        let to_send = monitor::plan_unmonitor(std::slice::from_ref(command));
        if to_send.is_empty() {
            return Ok(None);
        }
        self.send_command_subscription(&mut shared, to_send, false)
            .map(Some)
    }

    // ── Writes & command execution ───────────────────────────────────

    /// Write a dataref value to the simulator.
    ///
    /// Goes through the WebSocket (`Ok(Some(handle))`) unless the client
    /// is configured with `use_rest` (`Ok(None)`).
    pub async fn write_dataref(
        &self,
        dataref: &Arc<Dataref>,
        value: DatarefValue,
    ) -> Result<Option<RequestHandle>, CoreError> {
        let info = self
            .resolve_dataref_wire(dataref)
            .ok_or_else(|| CoreError::UnknownDataref {
                path: dataref.path().to_string(),
            })?;
        if !info.is_writable {
            return Err(CoreError::NotWritable {
                path: dataref.path().to_string(),
            });
        }
        let wire_value = value_to_wire(&value);

        if self.inner.config.use_rest {
            let meta = self
                .inner
                .rest
                .dataref_meta(dataref.path())
                .ok_or_else(|| CoreError::UnknownDataref {
                    path: dataref.path().to_string(),
                })?;
            self.inner
                .rest
                .write_dataref(&meta, &wire_value, dataref.index())
                .await?;
            return Ok(None);
        }

        let mut shared = self.inner.shared.lock().expect("state lock poisoned");
        let writes = [DatarefWrite {
            id: info.id,
            value: wire_value,
            index: dataref.index(),
        }];
        let params = wire::dataref_write_params(&writes);
        let (_, handle) =
            self.send_on_session(&mut shared, WsOperation::DatarefSetValues, params)?;
        Ok(Some(handle))
    }

    /// One-shot read of a dataref's current value through REST, updating
    /// the entity's cache. The WebSocket API has no single-read
    /// operation -- monitoring is the only streaming path.
    pub async fn read_dataref(&self, dataref: &Arc<Dataref>) -> Result<DatarefValue, CoreError> {
        let meta = self
            .inner
            .rest
            .dataref_meta(dataref.path())
            .ok_or_else(|| CoreError::UnknownDataref {
                path: dataref.path().to_string(),
            })?;
        let raw = self.inner.rest.dataref_value(&meta).await?;
        let value = parse_value(meta.value_type, &raw).map_err(CoreError::Internal)?;
        dataref.set_value(value.clone());
        Ok(value)
    }

    /// Execute a command with a duration (0.0 = momentary).
    ///
    /// Goes through the WebSocket unless the client is configured with
    /// `use_rest`.
    pub async fn execute_command(
        &self,
        command: &Arc<Command>,
        duration: f64,
    ) -> Result<Option<RequestHandle>, CoreError> {
        if self.inner.config.use_rest {
            let meta = self
                .inner
                .rest
                .command_meta(command.path())
                .ok_or_else(|| CoreError::UnknownCommand {
                    path: command.path().to_string(),
                })?;
            self.inner.rest.activate_command(&meta, duration).await?;
            return Ok(None);
        }

        let id = self
            .resolve_command_wire(command)
            .ok_or_else(|| CoreError::UnknownCommand {
                path: command.path().to_string(),
            })?;
        let mut shared = self.inner.shared.lock().expect("state lock poisoned");
        let activations = [CommandActivation {
            id,
            is_active: true,
            duration: Some(duration),
        }];
        let params = wire::command_activation_params(&activations);
        let (_, handle) =
            self.send_on_session(&mut shared, WsOperation::CommandSetIsActive, params)?;
        Ok(Some(handle))
    }

    /// Set a command's active state without a duration (for held
    /// commands the consumer releases explicitly).
    pub fn set_command_active(
        &self,
        command: &Arc<Command>,
        active: bool,
    ) -> Result<RequestHandle, CoreError> {
        let id = self
            .resolve_command_wire(command)
            .ok_or_else(|| CoreError::UnknownCommand {
                path: command.path().to_string(),
            })?;
        let mut shared = self.inner.shared.lock().expect("state lock poisoned");
        let activations = [CommandActivation {
            id,
            is_active: active,
            duration: None,
        }];
        let params = wire::command_activation_params(&activations);
        let (_, handle) =
            self.send_on_session(&mut shared, WsOperation::CommandSetIsActive, params)?;
        Ok(handle)
    }

    /// Wire identity for a dataref: the entity's cached copy, falling
    /// back to the metadata cache.
    fn resolve_dataref_wire(&self, dataref: &Arc<Dataref>) -> Option<DatarefWire> {
        dataref.wire().or_else(|| {
            self.inner.rest.dataref_meta(dataref.path()).map(|meta| {
                let info = DatarefWire {
                    id: meta.id,
                    value_type: meta.value_type,
                    is_writable: meta.is_writable,
                };
                dataref.set_wire(info);
                info
            })
        })
    }

    /// Wire id for a command: the entity's cached copy, falling back to
    /// the metadata cache.
    fn resolve_command_wire(&self, command: &Arc<Command>) -> Option<i64> {
        command.wire_id().or_else(|| {
            self.inner.rest.command_meta(command.path()).map(|meta| {
                command.set_wire_id(meta.id);
                meta.id
            })
        })
    }

    // ── Internals: sending ───────────────────────────────────────────

    /// Flush subscriptions queued while disconnected. Each queued entity
    /// is included in the outgoing batch exactly once -- the plan only
    /// returns entities not already on the wire.
    fn prime_subscriptions(&self) {
        let (queued_datarefs, queued_commands) = {
            let shared = self.inner.shared.lock().expect("state lock poisoned");
            (
                shared
                    .registry
                    .datarefs()
                    .filter(|d| d.monitor_state() == MonitorState::Queued)
                    .cloned()
                    .collect::<Vec<_>>(),
                shared
                    .registry
                    .commands()
                    .filter(|c| c.monitor_state() == MonitorState::Queued)
                    .cloned()
                    .collect::<Vec<_>>(),
            )
        };

        if !queued_datarefs.is_empty() {
            debug!(count = queued_datarefs.len(), "priming dataref subscriptions");
            if let Err(e) = self.monitor_datarefs(&queued_datarefs) {
                warn!(error = %e, "initial dataref subscription failed");
            }
        }
        if !queued_commands.is_empty() {
            debug!(count = queued_commands.len(), "priming command subscriptions");
            if let Err(e) = self.monitor_commands_active(&queued_commands) {
                warn!(error = %e, "initial command subscription failed");
            }
        }
    }

    fn send_dataref_subscription(
        &self,
        shared: &mut Shared,
        entities: Vec<Arc<Dataref>>,
        on: bool,
    ) -> Result<RequestHandle, CoreError> {
        let first_name = entities
            .first()
            .map(|e| e.name().to_string())
            .unwrap_or_default();

        // Resolve wire identity, grouping array elements by id so one
        // spec carries the full index list.
        let mut specs = Vec::new();
        let mut covered: Vec<Arc<Dataref>> = Vec::new();
        let mut element_groups: HashMap<i64, Vec<Arc<Dataref>>> = HashMap::new();

        for entity in entities {
            let Some(wire_info) = self.resolve_dataref_wire(&entity) else {
                warn!(
                    name = entity.name(),
                    "dataref not in simulator database, cannot monitor"
                );
                entity.set_monitor_state(MonitorState::Off);
                continue;
            };

            if entity.index().is_some() {
                element_groups.entry(wire_info.id).or_default().push(entity);
            } else {
                specs.push(DatarefSpec {
                    id: wire_info.id,
                    index: None,
                });
                covered.push(entity);
            }
        }
        for (id, group) in element_groups {
            let mut indices: Vec<usize> = group.iter().filter_map(|e| e.index()).collect();
            indices.sort_unstable();
            specs.push(DatarefSpec {
                id,
                index: Some(indices),
            });
            covered.extend(group);
        }

        if specs.is_empty() {
            return Err(CoreError::UnknownDataref { path: first_name });
        }

        let op = if on {
            WsOperation::DatarefSubscribeValues
        } else {
            WsOperation::DatarefUnsubscribeValues
        };
        let params = wire::dataref_params(&specs);
        let (req_id, handle) = self.send_on_session(shared, op, params)?;

        let next_state = if on {
            MonitorState::PendingOn
        } else {
            MonitorState::PendingOff
        };
        for entity in &covered {
            entity.set_monitor_state(next_state);
            if let Some(info) = entity.wire() {
                if on {
                    shared.registry.add_dataref_route(info.id, entity);
                } else {
                    shared.registry.remove_dataref_route(info.id, entity);
                }
            }
        }
        shared.acks.register(
            req_id,
            MonitorAck {
                on,
                datarefs: covered,
                commands: Vec::new(),
            },
        );
        Ok(handle)
    }

    fn send_command_subscription(
        &self,
        shared: &mut Shared,
        entities: Vec<Arc<Command>>,
        on: bool,
    ) -> Result<RequestHandle, CoreError> {
        let first_path = entities
            .first()
            .map(|e| e.path().to_string())
            .unwrap_or_default();

        let mut specs = Vec::new();
        let mut covered: Vec<Arc<Command>> = Vec::new();
        for entity in entities {
            let Some(id) = self.resolve_command_wire(&entity) else {
                warn!(
                    path = entity.path(),
                    "command not in simulator database, cannot monitor"
                );
                entity.set_monitor_state(MonitorState::Off);
                continue;
            };
            specs.push(CommandSpec { id });
            covered.push(entity);
        }

        if specs.is_empty() {
            return Err(CoreError::UnknownCommand { path: first_path });
        }

        let op = if on {
            WsOperation::CommandSubscribeIsActive
        } else {
            WsOperation::CommandUnsubscribeIsActive
        };
        let params = wire::command_params(&specs);
        let (req_id, handle) = self.send_on_session(shared, op, params)?;

        let next_state = if on {
            MonitorState::PendingOn
        } else {
            MonitorState::PendingOff
        };
        for entity in &covered {
            entity.set_monitor_state(next_state);
            if let Some(id) = entity.wire_id() {
                if on {
                    shared.registry.add_command_route(id, entity);
                } else {
                    shared.registry.remove_command_route(id);
                }
            }
        }
        shared.acks.register(
            req_id,
            MonitorAck {
                on,
                datarefs: Vec::new(),
                commands: covered,
            },
        );
        Ok(handle)
    }

    /// Allocate a request id, register the pending slot, and queue the
    /// encoded frame for the writer task.
    fn send_on_session(
        &self,
        shared: &mut Shared,
        op: WsOperation,
        params: serde_json::Value,
    ) -> Result<(u64, RequestHandle), CoreError> {
        let Some(session) = shared.session.as_ref() else {
            return Err(CoreError::NotConnected);
        };

        let (req_id, handle) = shared.requests.register(op);
        let frame = match (WsRequest { req_id, op, params }).encode() {
            Ok(frame) => frame,
            Err(e) => {
                shared.requests.abandon(req_id);
                return Err(e.into());
            }
        };

        trace!(req_id, %op, %frame, "sending");
        if session.outbound.send(frame).is_err() {
            // Writer gone: the session is tearing down underneath us.
            shared.requests.abandon(req_id);
            return Err(CoreError::ConnectionLost);
        }
        Ok((req_id, handle))
    }

    fn session_cancel(&self) -> Option<CancellationToken> {
        self.inner
            .shared
            .lock()
            .expect("state lock poisoned")
            .session
            .as_ref()
            .map(|s| s.cancel.clone())
    }

    // ── Internals: inbound routing ───────────────────────────────────

    /// Decode and route one inbound text frame. Never fatal: malformed
    /// or unknown frames are logged and skipped.
    fn route_text(&self, text: &str) {
        match wire::decode(text) {
            Ok(WsMessage::Result(result)) => self.on_result(&result),
            Ok(WsMessage::DatarefUpdate(update)) => self.on_dataref_update(&update),
            Ok(WsMessage::CommandActive(update)) => self.on_command_active(&update),
            Ok(WsMessage::Unknown) => warn!("frame with unknown message type, skipping"),
            Err(e) => warn!(error = %e, "malformed frame, skipping"),
        }
    }

    fn on_result(&self, result: &WsResult) {
        let mut shared = self.inner.shared.lock().expect("state lock poisoned");
        shared.requests.resolve(result);

        if let Some(ack) = shared.acks.take(result.req_id) {
            monitor::apply_ack(&ack, result.success);
            if !result.success && ack.on {
                // Rejected subscribe: also drop the routes installed at send time.
                for entity in &ack.datarefs {
                    if let Some(info) = entity.wire() {
                        shared.registry.remove_dataref_route(info.id, entity);
                    }
                }
                for entity in &ack.commands {
                    if let Some(id) = entity.wire_id() {
                        shared.registry.remove_command_route(id);
                    }
                }
            }
        }
    }

    fn on_dataref_update(&self, update: &WsDatarefUpdate) {
        let mut events = Vec::new();
        {
            let shared = self.inner.shared.lock().expect("state lock poisoned");
            for (id_str, raw) in &update.data {
                let Ok(id) = id_str.parse::<i64>() else {
                    warn!(id = %id_str, "non-numeric dataref id in update, skipping");
                    continue;
                };
                match shared.registry.route_dataref(id) {
                    // Routes are installed at subscribe time, so updates
                    // racing ahead of the ack still land here.
                    Some(DatarefRoute::Single(entity)) => {
                        let Some(info) = entity.wire() else { continue };
                        match parse_value(info.value_type, raw) {
                            Ok(value) => {
                                entity.set_value(value.clone());
                                events.push(ClientEvent::DatarefUpdate {
                                    name: entity.name().to_string(),
                                    value,
                                });
                            }
                            Err(reason) => {
                                warn!(name = entity.name(), %reason, "dropping update");
                            }
                        }
                    }
                    Some(DatarefRoute::Elements(elements)) => {
                        let Some(values) = raw.as_array() else {
                            warn!(id, "element update is not an array, dropping");
                            continue;
                        };
                        if values.len() != elements.len() {
                            warn!(
                                id,
                                got = values.len(),
                                expected = elements.len(),
                                "element count mismatch, dropping update"
                            );
                            continue;
                        }
                        for (entity, raw_element) in elements.iter().zip(values) {
                            let Some(info) = entity.wire() else { continue };
                            match parse_array_element(info.value_type, raw_element) {
                                Ok(value) => {
                                    entity.set_value(value.clone());
                                    events.push(ClientEvent::DatarefUpdate {
                                        name: entity.name().to_string(),
                                        value,
                                    });
                                }
                                Err(reason) => {
                                    warn!(name = entity.name(), %reason, "dropping element");
                                }
                            }
                        }
                    }
                    None => {
                        debug!(id, "update for unknown dataref id (late frame), ignoring");
                    }
                }
            }
        }
        // Dispatch outside the lock so callbacks may call back into the
        // client without deadlocking.
        for event in &events {
            self.inner.dispatcher.dispatch(event);
        }
    }

    fn on_command_active(&self, update: &WsCommandActive) {
        let mut events = Vec::new();
        {
            let shared = self.inner.shared.lock().expect("state lock poisoned");
            for (id_str, &active) in &update.data {
                let Ok(id) = id_str.parse::<i64>() else {
                    warn!(id = %id_str, "non-numeric command id in update, skipping");
                    continue;
                };
                match shared.registry.route_command(id) {
                    Some(entity) => {
                        entity.set_active(active);
                        events.push(ClientEvent::CommandActive {
                            path: entity.path().to_string(),
                            active,
                        });
                    }
                    None => debug!(id, "active update for unknown command id, ignoring"),
                }
            }
        }
        for event in &events {
            self.inner.dispatcher.dispatch(event);
        }
    }
}

// ── Connection supervisor ────────────────────────────────────────────

/// Main loop: establish → run session → on failure, backoff → retry.
/// Explicit stop/disconnect ends supervision; a clean server close
/// reconnects immediately (monitoring is NOT resubscribed -- entities
/// are marked unmonitored on every session end, reconnection policy
/// beyond the socket itself belongs to the consumer).
async fn supervise(client: XplaneClient, cancel: CancellationToken) {
    let reconnect = client.inner.config.reconnect.clone();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match run_session(&client, &cancel).await {
            SessionEnd::Stopped => {
                debug!("session stopped");
                break;
            }
            SessionEnd::Clean => {
                info!("connection closed cleanly, reconnecting");
                attempt = 0;
                client.inner.state_tx.send_replace(ConnectionState::Connecting);
            }
            SessionEnd::Failed(e) => {
                warn!(error = %e, attempt, "connection attempt failed");

                if let Some(max) = reconnect.max_retries {
                    if attempt >= max {
                        error!(max_retries = max, "reconnection limit reached, giving up");
                        break;
                    }
                }

                let delay = calculate_backoff(attempt, &reconnect);
                debug!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), attempt, "waiting before reconnect");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
                client.inner.state_tx.send_replace(ConnectionState::Connecting);
            }
        }
    }

    client
        .inner
        .state_tx
        .send_replace(ConnectionState::Disconnected);
    // Free the slot so connect() can start a fresh supervisor. A no-op
    // when disconnect() already took it to join this task.
    client
        .inner
        .supervisor
        .lock()
        .expect("supervisor lock poisoned")
        .take();
    debug!("connection supervisor exiting");
}

/// Establish one connection and run its message loop to completion.
async fn run_session(client: &XplaneClient, cancel: &CancellationToken) -> SessionEnd {
    let ws = tokio::select! {
        biased;
        _ = cancel.cancelled() => return SessionEnd::Stopped,
        result = establish(client) => match result {
            Ok(ws) => ws,
            Err(e) => return SessionEnd::Failed(e),
        },
    };

    let (sink, mut stream) = ws.split();
    let session_cancel = cancel.child_token();
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    {
        let mut shared = client.inner.shared.lock().expect("state lock poisoned");
        // Fresh connection: new id sequence, no stale routes.
        shared.requests.reset();
        shared.registry.clear_routes();
        shared.session = Some(Session {
            outbound: out_tx,
            cancel: session_cancel.clone(),
        });
    }

    let writer = tokio::spawn(write_loop(sink, out_rx));

    client.inner.state_tx.send_replace(ConnectionState::Connected);
    client.inner.dispatcher.dispatch(&ClientEvent::Open);
    client.prime_subscriptions();

    let end = read_loop(client, &mut stream, &session_cancel).await;

    teardown(client);
    let _ = writer.await;
    end
}

/// Gate on REST reachability, negotiate the API version, load metadata
/// caches, then open the WebSocket.
async fn establish(client: &XplaneClient) -> Result<WsStream, CoreError> {
    let rest = &client.inner.rest;
    if !rest.is_reachable().await {
        return Err(CoreError::ConnectionFailed {
            reason: "REST API unreachable, maybe X-Plane is not running".into(),
        });
    }

    let caps = rest.capabilities().await?;
    rest.negotiate_version(&caps)?;
    let (datarefs, commands) = rest.reload_meta().await?;
    debug!(datarefs, commands, "metadata caches loaded");

    let ws_url = rest.ws_url()?;
    info!(url = %ws_url, "connecting to WebSocket");
    let (ws, _response) = tokio_tungstenite::connect_async(ws_url.as_str())
        .await
        .map_err(|e| CoreError::ConnectionFailed {
            reason: e.to_string(),
        })?;
    info!("websocket opened");
    Ok(ws)
}

/// Drain the outbound queue into the socket. Ends when every sender is
/// dropped (session teardown), after which queued frames have been
/// flushed and a close frame is sent.
async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sink.send(Message::text(frame)).await {
            warn!(error = %e, "websocket send failed");
            break;
        }
    }
    let _ = sink.close().await;
    debug!("writer exiting");
}

/// Receive frames until the session is cancelled or the connection
/// drops. A single bad frame never terminates the loop.
async fn read_loop(
    client: &XplaneClient,
    stream: &mut SplitStream<WsStream>,
    cancel: &CancellationToken,
) -> SessionEnd {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Stopped,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => client.route_text(&text),
                Some(Ok(Message::Ping(_))) => {
                    // tungstenite answers pongs automatically
                    trace!("websocket ping");
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "close frame received");
                    return SessionEnd::Clean;
                }
                Some(Err(e)) => {
                    return SessionEnd::Failed(CoreError::ConnectionFailed {
                        reason: e.to_string(),
                    });
                }
                None => {
                    info!("websocket stream ended");
                    return SessionEnd::Clean;
                }
                _ => {
                    // Binary, Pong, raw frames -- ignore
                }
            }
        }
    }
}

/// Atomically clear all session state: cancel pending requests, forget
/// in-flight acks, drop id routes, and mark every entity unmonitored.
/// Consumers must re-subscribe after a reconnect.
fn teardown(client: &XplaneClient) {
    {
        let mut shared = client.inner.shared.lock().expect("state lock poisoned");
        // Cancelling the session token wakes anything parked on it
        // (blocking start()); dropping the sender lets the writer drain.
        if let Some(session) = shared.session.take() {
            session.cancel.cancel();
        }
        shared.requests.cancel_all();
        shared.acks.clear();
        shared.registry.clear_routes();
        for entity in shared.registry.datarefs() {
            if entity.monitor_state() != MonitorState::Off {
                entity.set_monitor_state(MonitorState::Off);
            }
        }
        for entity in shared.registry.commands() {
            if entity.monitor_state() != MonitorState::Off {
                entity.set_monitor_state(MonitorState::Off);
            }
        }
    }
    client
        .inner
        .state_tx
        .send_replace(ConnectionState::Disconnected);
    client.inner.dispatcher.dispatch(&ClientEvent::Close);
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25%, deterministically seeded from the attempt number.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use xpkit_api::DatarefType;

    use super::*;

    /// Client with a fake session: outbound frames land in the returned
    /// receiver, nothing touches the network.
    fn connected_client() -> (XplaneClient, mpsc::UnboundedReceiver<String>) {
        let client = XplaneClient::new(ClientConfig::default()).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut shared = client.inner.shared.lock().unwrap();
            shared.session = Some(Session {
                outbound: tx,
                cancel: CancellationToken::new(),
            });
        }
        client
            .inner
            .state_tx
            .send_replace(ConnectionState::Connected);
        (client, rx)
    }

    fn wired_dataref(client: &XplaneClient, name: &str, id: i64, value_type: DatarefType) -> Arc<Dataref> {
        let d = client.dataref(name);
        d.set_wire(DatarefWire {
            id,
            value_type,
            is_writable: true,
        });
        d
    }

    fn frame_json(rx: &mut mpsc::UnboundedReceiver<String>) -> serde_json::Value {
        let frame = rx.try_recv().expect("expected a frame on the wire");
        serde_json::from_str(&frame).unwrap()
    }

    fn ok_result(req_id: u64) -> WsResult {
        WsResult {
            req_id,
            success: true,
            error_code: None,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn monitor_sends_one_batch_and_is_idempotent() {
        let (client, mut rx) = connected_client();
        let d = wired_dataref(&client, "sim/cockpit/altitude", 11, DatarefType::Float);

        let handle = client.monitor_dataref(&d).unwrap().expect("first monitor sends");
        let frame = frame_json(&mut rx);
        assert_eq!(frame["type"], "dataref_subscribe_values");
        assert_eq!(frame["req_id"], 1);
        assert_eq!(frame["params"]["datarefs"], serde_json::json!([{ "id": 11 }]));
        assert_eq!(handle.request_id(), 1);

        // monitoring an already-monitored entity sends nothing
        assert!(client.monitor_dataref(&d).unwrap().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn request_ids_increase_across_operations() {
        let (client, mut rx) = connected_client();
        let a = wired_dataref(&client, "sim/a", 1, DatarefType::Float);
        let b = wired_dataref(&client, "sim/b", 2, DatarefType::Float);

        let h1 = client.monitor_dataref(&a).unwrap().unwrap();
        let h2 = client.monitor_dataref(&b).unwrap().unwrap();
        assert_eq!(h1.request_id(), 1);
        assert_eq!(h2.request_id(), 2);
        let _ = frame_json(&mut rx);
        let _ = frame_json(&mut rx);
    }

    #[tokio::test]
    async fn monitor_before_connect_queues_and_primes_once() {
        let client = XplaneClient::new(ClientConfig::default()).unwrap();
        let d = client.dataref("sim/cockpit/altitude");
        d.set_wire(DatarefWire {
            id: 11,
            value_type: DatarefType::Float,
            is_writable: false,
        });

        // disconnected: queued, nothing sent, no error
        assert!(client.monitor_dataref(&d).unwrap().is_none());
        assert_eq!(d.monitor_state(), MonitorState::Queued);

        // connection comes up
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.inner.shared.lock().unwrap().session = Some(Session {
            outbound: tx,
            cancel: CancellationToken::new(),
        });
        client
            .inner
            .state_tx
            .send_replace(ConnectionState::Connected);

        client.prime_subscriptions();
        let frame = frame_json(&mut rx);
        assert_eq!(frame["type"], "dataref_subscribe_values");
        assert_eq!(frame["params"]["datarefs"][0]["id"], 11);

        // included exactly once: a second prime sends nothing
        client.prime_subscriptions();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn update_before_ack_updates_cache_and_fires_callbacks_twice() {
        let (client, mut rx) = connected_client();
        let d = wired_dataref(&client, "sim/cockpit/altitude", 11, DatarefType::Float);
        client.monitor_dataref(&d).unwrap().unwrap();
        let _ = frame_json(&mut rx);
        assert_eq!(d.monitor_state(), MonitorState::PendingOn);

        let count = Arc::new(AtomicUsize::new(0));
        let callback = {
            let count = count.clone();
            move |event: &ClientEvent| {
                if let ClientEvent::DatarefUpdate { name, value } = event {
                    assert_eq!(name, "sim/cockpit/altitude");
                    assert_eq!(value, &DatarefValue::Float(1500.5));
                }
                count.fetch_add(1, Ordering::SeqCst);
            }
        };
        // same callback registered twice: both registrations fire
        client.add_callback(EventKind::DatarefUpdate, callback.clone());
        client.add_callback(EventKind::DatarefUpdate, callback);

        // ack has not arrived, the update must still be delivered
        client.route_text(r#"{"type":"dataref_update_values","data":{"11":1500.5}}"#);

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(d.value(), Some(DatarefValue::Float(1500.5)));
    }

    #[tokio::test]
    async fn ack_confirms_and_unmonitor_sends_delta() {
        let (client, mut rx) = connected_client();
        let d = wired_dataref(&client, "sim/cockpit/altitude", 11, DatarefType::Float);
        let handle = client.monitor_dataref(&d).unwrap().unwrap();
        let _ = frame_json(&mut rx);

        client.on_result(&ok_result(handle.request_id()));
        assert_eq!(d.monitor_state(), MonitorState::On);
        assert!(handle.result().await.is_ok());

        let handle = client.unmonitor_dataref(&d).unwrap().expect("unsubscribe frame");
        let frame = frame_json(&mut rx);
        assert_eq!(frame["type"], "dataref_unsubscribe_values");
        client.on_result(&ok_result(handle.request_id()));
        assert_eq!(d.monitor_state(), MonitorState::Off);

        // route was removed at unsubscribe-send time: updates are dropped
        client.route_text(r#"{"type":"dataref_update_values","data":{"11":9.9}}"#);
        assert_ne!(d.value(), Some(DatarefValue::Float(9.9)));

        // unmonitoring again sends nothing
        assert!(client.unmonitor_dataref(&d).unwrap().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unmonitor_never_subscribed_is_silent() {
        let client = XplaneClient::new(ClientConfig::default()).unwrap();
        let d = client.dataref("sim/cockpit/altitude");
        client.monitor_dataref(&d).unwrap(); // queued, never sent

        assert!(client.unmonitor_dataref(&d).unwrap().is_none());
        assert_eq!(d.monitor_state(), MonitorState::Off);
    }

    #[tokio::test]
    async fn element_subscription_and_update() {
        let (client, mut rx) = connected_client();
        let e1 = wired_dataref(&client, "sim/some/values[1]", 12, DatarefType::FloatArray);
        let e5 = wired_dataref(&client, "sim/some/values[5]", 12, DatarefType::FloatArray);

        client.monitor_datarefs(&[e5.clone(), e1.clone()]).unwrap().unwrap();
        let frame = frame_json(&mut rx);
        // one spec with the sorted index list
        assert_eq!(
            frame["params"]["datarefs"],
            serde_json::json!([{ "id": 12, "index": [1, 5] }])
        );

        // values arrive in index order
        client.route_text(r#"{"type":"dataref_update_values","data":{"12":[10.0,50.0]}}"#);
        assert_eq!(e1.value(), Some(DatarefValue::Float(10.0)));
        assert_eq!(e5.value(), Some(DatarefValue::Float(50.0)));

        // size mismatch is dropped without touching the cache
        client.route_text(r#"{"type":"dataref_update_values","data":{"12":[1.0]}}"#);
        assert_eq!(e1.value(), Some(DatarefValue::Float(10.0)));
    }

    #[tokio::test]
    async fn command_active_monitoring() {
        let (client, mut rx) = connected_client();
        let c = client.command("sim/operation/pause_toggle");
        c.set_wire_id(7);

        let handle = client.monitor_command_active(&c).unwrap().unwrap();
        let frame = frame_json(&mut rx);
        assert_eq!(frame["type"], "command_subscribe_is_active");
        assert_eq!(frame["params"]["commands"], serde_json::json!([{ "id": 7 }]));
        client.on_result(&ok_result(handle.request_id()));

        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = count.clone();
            client.add_callback(EventKind::CommandActive, move |event| {
                if let ClientEvent::CommandActive { path, active } = event {
                    assert_eq!(path, "sim/operation/pause_toggle");
                    assert!(*active);
                }
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        client.route_text(r#"{"type":"command_update_is_active","data":{"7":true}}"#);
        assert_eq!(c.is_active(), Some(true));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disconnect_cancels_every_pending_request() {
        let (client, rx) = connected_client();
        let a = wired_dataref(&client, "sim/a", 1, DatarefType::Float);
        let b = wired_dataref(&client, "sim/b", 2, DatarefType::Float);
        let c = wired_dataref(&client, "sim/c", 3, DatarefType::Float);

        let handles: Vec<RequestHandle> = [&a, &b, &c]
            .iter()
            .map(|d| client.monitor_dataref(d).unwrap().unwrap())
            .collect();
        assert_eq!(client.inner.shared.lock().unwrap().requests.len(), 3);

        teardown(&client);

        for handle in handles {
            assert!(matches!(
                handle.result().await,
                Err(CoreError::ConnectionLost)
            ));
        }
        let shared = client.inner.shared.lock().unwrap();
        assert_eq!(shared.requests.len(), 0);
        assert!(shared.session.is_none());
        drop(shared);

        // entities are unmonitored; re-subscription is the consumer's job
        assert_eq!(a.monitor_state(), MonitorState::Off);
        assert_eq!(b.monitor_state(), MonitorState::Off);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        drop(rx);
    }

    #[tokio::test]
    async fn unmatched_response_is_dropped_not_fatal() {
        let (client, mut rx) = connected_client();
        let d = wired_dataref(&client, "sim/a", 1, DatarefType::Float);
        client.monitor_dataref(&d).unwrap().unwrap();
        let _ = frame_json(&mut rx);

        client.route_text(r#"{"type":"result","req_id":999,"success":true}"#);
        assert_eq!(client.inner.shared.lock().unwrap().requests.len(), 1);
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_do_not_stop_routing() {
        let (client, mut rx) = connected_client();
        let d = wired_dataref(&client, "sim/a", 1, DatarefType::Float);
        client.monitor_dataref(&d).unwrap().unwrap();
        let _ = frame_json(&mut rx);

        client.route_text("not json at all");
        client.route_text(r#"{"type":"mystery_frame"}"#);

        // the loop keeps processing subsequent frames
        client.route_text(r#"{"type":"dataref_update_values","data":{"1":2.5}}"#);
        assert_eq!(d.value(), Some(DatarefValue::Float(2.5)));
    }

    #[tokio::test]
    async fn panicking_callback_does_not_stop_frame_processing() {
        let (client, mut rx) = connected_client();
        let d = wired_dataref(&client, "sim/a", 1, DatarefType::Float);
        client.monitor_dataref(&d).unwrap().unwrap();
        let _ = frame_json(&mut rx);

        let count = Arc::new(AtomicUsize::new(0));
        client.add_callback(EventKind::DatarefUpdate, |_| panic!("consumer bug"));
        {
            let count = count.clone();
            client.add_callback(EventKind::DatarefUpdate, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        client.route_text(r#"{"type":"dataref_update_values","data":{"1":1.0}}"#);
        client.route_text(r#"{"type":"dataref_update_values","data":{"1":2.0}}"#);

        // the second callback ran both times, the loop survived
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(d.value(), Some(DatarefValue::Float(2.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_connection_times_out_without_transition() {
        let client = XplaneClient::new(ClientConfig::default()).unwrap();
        assert!(!client.wait_connection(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn wait_connection_returns_after_transition() {
        let client = XplaneClient::new(ClientConfig::default()).unwrap();
        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.wait_connection(Duration::from_secs(5)).await })
        };
        client
            .inner
            .state_tx
            .send_replace(ConnectionState::Connected);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn connect_is_noop_while_connected() {
        let (client, _rx) = connected_client();
        client.connect();
        assert!(client.inner.supervisor.lock().unwrap().is_none());
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn stop_and_disconnect_are_idempotent() {
        let client = XplaneClient::new(ClientConfig::default()).unwrap();
        client.stop();
        client.stop();
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn send_while_disconnected_is_not_connected() {
        let client = XplaneClient::new(ClientConfig::default()).unwrap();
        let c = client.command("sim/operation/pause_toggle");
        c.set_wire_id(7);
        let result = client.set_command_active(&c, true);
        assert!(matches!(result, Err(CoreError::NotConnected)));
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();
        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);
        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: None,
        };
        let d10 = calculate_backoff(10, &config);
        // jitter factor tops out at 1.25
        assert!(
            d10 <= Duration::from_secs(13),
            "delay at attempt 10 ({d10:?}) should be capped near max_delay"
        );
    }
}
