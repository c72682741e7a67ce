//! STOMP over websocket transport
//!
//! Connects to the broker's native websocket endpoint, speaks STOMP 1.2,
//! keeps the connection alive with heartbeats and reconnects with a fixed
//! delay after unexpected closes.

pub mod frame;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use living_core::{ConnectionState, LivingError, LivingResult};

use self::frame::{negotiate_heartbeat, StompCommand, StompFrame, HEARTBEAT};
use super::{EventSink, MessageHandler, SubscriptionHandle, Transport, TransportEvent};

/// Reconnect delay used by the mobile client
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Max reconnect attempts before giving up until the next `connect()`
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Heartbeat requested in both directions
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(4000);

/// Time allowed for the websocket handshake and the CONNECTED frame
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for StompWebSocketClient
#[derive(Clone, Debug)]
pub struct StompConfig {
    pub url: String,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_outgoing: Duration,
    pub heartbeat_incoming: Duration,
    pub connect_timeout: Duration,
}

impl StompConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_outgoing: DEFAULT_HEARTBEAT,
            heartbeat_incoming: DEFAULT_HEARTBEAT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Commands sent to the connection task
#[derive(Debug)]
enum Command {
    Subscribe {
        generation: u64,
        id: String,
        destination: String,
    },
    Unsubscribe {
        generation: u64,
        id: String,
    },
    Send {
        generation: u64,
        destination: String,
        body: String,
    },
    /// Skip the remaining backoff delay
    ConnectNow,
    Disconnect,
}

/// How a session ended
#[derive(Debug)]
enum SessionEnd {
    /// Client asked to stop
    Stopped,
    /// Connection dropped after being established
    Closed(Option<String>),
}

struct Shared {
    config: StompConfig,
    state: RwLock<ConnectionState>,
    /// Bumped on every CONNECTED; commands from older generations are dropped
    generation: AtomicU64,
    next_subscription_id: AtomicU64,
    handlers: DashMap<String, MessageHandler>,
    command_tx: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    sink: RwLock<Option<EventSink>>,
    running: AtomicBool,
    stop_requested: AtomicBool,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    fn send_command(&self, command: Command) -> bool {
        match self.command_tx.lock().as_ref() {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }
}

/// STOMP client over a websocket
pub struct StompWebSocketClient {
    shared: Arc<Shared>,
}

impl StompWebSocketClient {
    pub fn new(config: StompConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: RwLock::new(ConnectionState::Disconnected),
                generation: AtomicU64::new(0),
                next_subscription_id: AtomicU64::new(0),
                handlers: DashMap::new(),
                command_tx: Mutex::new(None),
                sink: RwLock::new(None),
                running: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &StompConfig {
        &self.shared.config
    }

    /// Connection task: runs sessions until stopped, unless a `connect()`
    /// raced the stop.
    async fn connection_loop(shared: Arc<Shared>, mut command_rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            Self::run_sessions(&shared, &mut command_rx).await;

            // `connect()` sends under this lock, so a request either lands in
            // the channel before it closes or finds no task and spawns one
            let restart = {
                let mut command_tx = shared.command_tx.lock();
                if Self::restart_requested(&mut command_rx) {
                    true
                } else {
                    command_tx.take();
                    shared.set_state(ConnectionState::Disconnected);
                    shared.running.store(false, Ordering::SeqCst);
                    false
                }
            };

            if !restart {
                break;
            }
            info!("[STOMP] Connect requested while stopping, restarting");
        }
        debug!("[STOMP] Connection task exited");
    }

    /// Drain queued commands; true when the last lifecycle command asks to connect
    fn restart_requested(command_rx: &mut mpsc::UnboundedReceiver<Command>) -> bool {
        let mut restart = false;
        while let Ok(command) = command_rx.try_recv() {
            match command {
                Command::ConnectNow => restart = true,
                Command::Disconnect => restart = false,
                _ => {}
            }
        }
        restart
    }

    /// Session loop with reconnection logic
    async fn run_sessions(shared: &Arc<Shared>, command_rx: &mut mpsc::UnboundedReceiver<Command>) {
        let mut reconnect_attempts = 0u32;

        loop {
            if shared.stop_requested.load(Ordering::SeqCst) {
                break;
            }

            shared.set_state(ConnectionState::Connecting);
            shared.emit(TransportEvent::Connecting);
            info!("[STOMP] Connecting to {}", shared.config.url);

            let reason = match Self::run_session(shared, command_rx).await {
                Ok(SessionEnd::Stopped) => {
                    Self::mark_disconnected(shared, Some("client disconnect".to_string()));
                    if shared.stop_requested.load(Ordering::SeqCst) {
                        break;
                    }
                    // connect() arrived after the disconnect was queued
                    reconnect_attempts = 0;
                    continue;
                }
                Ok(SessionEnd::Closed(reason)) => {
                    reconnect_attempts = 0;
                    reason
                }
                Err(e) => {
                    error!("[STOMP] Connection failed: {}", e);
                    shared.emit(TransportEvent::Error {
                        message: e.to_string(),
                    });
                    Some(e.to_string())
                }
            };

            Self::mark_disconnected(shared, reason);

            if shared.stop_requested.load(Ordering::SeqCst) {
                break;
            }

            reconnect_attempts += 1;
            if reconnect_attempts > shared.config.max_reconnect_attempts {
                error!("[STOMP] Max reconnect attempts reached");
                shared.emit(TransportEvent::Error {
                    message: "Maximum reconnection attempts exceeded".to_string(),
                });
                break;
            }

            let delay = shared.config.reconnect_delay;
            info!("[STOMP] Reconnecting in {:?} (attempt {})", delay, reconnect_attempts);
            if !Self::wait_before_reconnect(delay, command_rx).await
                && shared.stop_requested.load(Ordering::SeqCst)
            {
                break;
            }
        }
    }

    /// Sleep for `delay`, draining stale commands. Returns false when the
    /// client asked to stop.
    async fn wait_before_reconnect(
        delay: Duration,
        command_rx: &mut mpsc::UnboundedReceiver<Command>,
    ) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = command_rx.recv() => match cmd {
                    Some(Command::Disconnect) | None => return false,
                    Some(Command::ConnectNow) => return true,
                    Some(stale) => debug!("[STOMP] Dropping command while disconnected: {:?}", stale),
                }
            }
        }
    }

    fn mark_disconnected(shared: &Shared, reason: Option<String>) {
        // Transport subscriptions die with the connection
        shared.handlers.clear();
        let was = std::mem::replace(&mut *shared.state.write(), ConnectionState::Disconnected);
        if was != ConnectionState::Disconnected {
            shared.emit(TransportEvent::Disconnected { reason });
        }
    }

    async fn run_session(
        shared: &Arc<Shared>,
        command_rx: &mut mpsc::UnboundedReceiver<Command>,
    ) -> LivingResult<SessionEnd> {
        let config = &shared.config;
        let host = url::Url::parse(&config.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string());

        let (ws_stream, _) = timeout(config.connect_timeout, connect_async(config.url.as_str()))
            .await
            .map_err(|_| LivingError::transport("websocket handshake timed out"))?
            .map_err(|e| LivingError::transport(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let connect = StompFrame::connect(
            &host,
            config.heartbeat_outgoing.as_millis() as u64,
            config.heartbeat_incoming.as_millis() as u64,
        );
        write
            .send(Message::Text(connect.encode().into()))
            .await
            .map_err(|e| LivingError::transport(e.to_string()))?;

        // Wait for CONNECTED
        let connected = timeout(config.connect_timeout, async {
            while let Some(msg) = read.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => return Err(LivingError::transport(e.to_string())),
                };
                match StompFrame::decode(text.as_str()) {
                    Ok(Some(frame)) if frame.command == StompCommand::Connected => return Ok(frame),
                    Ok(Some(frame)) if frame.command == StompCommand::Error => {
                        let message = frame.get("message").unwrap_or("STOMP error").to_string();
                        return Err(LivingError::transport(message));
                    }
                    Ok(_) => continue,
                    Err(e) => warn!("[STOMP] Ignoring undecodable frame: {}", e),
                }
            }
            Err(LivingError::transport("connection closed before CONNECTED"))
        })
        .await
        .map_err(|_| LivingError::transport("timed out waiting for CONNECTED"))??;

        let (heartbeat_out, heartbeat_in) = negotiate_heartbeat(
            config.heartbeat_outgoing.as_millis() as u64,
            config.heartbeat_incoming.as_millis() as u64,
            connected.get("heart-beat"),
        );

        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        shared.set_state(ConnectionState::Connected);
        info!(
            "[STOMP] Connected (version {}, heart-beat {}/{}ms)",
            connected.get("version").unwrap_or("?"),
            heartbeat_out,
            heartbeat_in
        );
        shared.emit(TransportEvent::Connected);

        let mut heartbeat_timer = interval(Duration::from_millis(heartbeat_out.max(1)));
        heartbeat_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watchdog = interval(Duration::from_millis(heartbeat_in.max(1)));
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Allow twice the negotiated interval before declaring the server dead
        let incoming_grace = Duration::from_millis(heartbeat_in * 2);
        let mut last_received = Instant::now();

        loop {
            tokio::select! {
                msg = read.next() => {
                    last_received = Instant::now();
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(end) = Self::handle_text(shared, text.as_str()) {
                                return Ok(end);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                warn!("[STOMP] Failed to send pong: {}", e);
                                return Ok(SessionEnd::Closed(Some(e.to_string())));
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("[STOMP] Connection closed by server");
                            return Ok(SessionEnd::Closed(frame.map(|f| f.reason.to_string())));
                        }
                        Some(Err(e)) => {
                            error!("[STOMP] Error: {}", e);
                            return Ok(SessionEnd::Closed(Some(e.to_string())));
                        }
                        None => {
                            info!("[STOMP] Stream ended");
                            return Ok(SessionEnd::Closed(None));
                        }
                        _ => {}
                    }
                }

                cmd = command_rx.recv() => {
                    let frame = match cmd {
                        Some(Command::Subscribe { generation: g, id, destination }) if g == generation => {
                            debug!("[STOMP] SUBSCRIBE {} -> {}", id, destination);
                            StompFrame::subscribe(&id, &destination)
                        }
                        Some(Command::Unsubscribe { generation: g, id }) if g == generation => {
                            debug!("[STOMP] UNSUBSCRIBE {}", id);
                            StompFrame::unsubscribe(&id)
                        }
                        Some(Command::Send { generation: g, destination, body }) if g == generation => {
                            debug!("[STOMP] SEND {}", destination);
                            StompFrame::send(&destination, body)
                        }
                        Some(Command::Disconnect) | None => {
                            let _ = write
                                .send(Message::Text(StompFrame::new(StompCommand::Disconnect).encode().into()))
                                .await;
                            let _ = write.close().await;
                            info!("[STOMP] Disconnected by client");
                            return Ok(SessionEnd::Stopped);
                        }
                        Some(Command::ConnectNow) => continue,
                        Some(stale) => {
                            debug!("[STOMP] Dropping command from previous connection: {:?}", stale);
                            continue;
                        }
                    };

                    if let Err(e) = write.send(Message::Text(frame.encode().into())).await {
                        warn!("[STOMP] Failed to send frame: {}", e);
                        return Ok(SessionEnd::Closed(Some(e.to_string())));
                    }
                }

                _ = heartbeat_timer.tick(), if heartbeat_out > 0 => {
                    if let Err(e) = write.send(Message::Text(HEARTBEAT.to_string().into())).await {
                        warn!("[STOMP] Failed to send heartbeat: {}", e);
                        return Ok(SessionEnd::Closed(Some(e.to_string())));
                    }
                }

                _ = watchdog.tick(), if heartbeat_in > 0 => {
                    if last_received.elapsed() > incoming_grace {
                        warn!("[STOMP] No data from server for {:?}", last_received.elapsed());
                        return Ok(SessionEnd::Closed(Some("Heartbeat timeout".to_string())));
                    }
                }
            }
        }
    }

    /// Route one inbound text message. Returns `Some` when the session must end.
    fn handle_text(shared: &Shared, text: &str) -> Option<SessionEnd> {
        let frame = match StompFrame::decode(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => return None,
            Err(e) => {
                debug!("[STOMP] Failed to decode frame: {}", e);
                return None;
            }
        };

        match frame.command {
            StompCommand::Message => {
                let Some(subscription) = frame.get("subscription") else {
                    debug!("[STOMP] MESSAGE without subscription header");
                    return None;
                };
                let handler = shared
                    .handlers
                    .get(subscription)
                    .map(|entry| Arc::clone(entry.value()));
                match handler {
                    Some(handler) => handler(&frame.body),
                    None => debug!("[STOMP] No handler for subscription {}", subscription),
                }
                None
            }
            StompCommand::Error => {
                let message = frame.get("message").unwrap_or("STOMP error").to_string();
                error!("[STOMP] Server error: {}", message);
                shared.emit(TransportEvent::Error {
                    message: message.clone(),
                });
                // The broker closes the connection after an ERROR frame
                Some(SessionEnd::Closed(Some(message)))
            }
            StompCommand::Receipt => None,
            other => {
                debug!("[STOMP] Unexpected {} frame", other);
                None
            }
        }
    }
}

impl Transport for StompWebSocketClient {
    fn connect(&self) {
        let shared = &self.shared;
        shared.stop_requested.store(false, Ordering::SeqCst);

        let mut command_tx = shared.command_tx.lock();
        if let Some(tx) = command_tx.as_ref() {
            // Task alive: cut a pending backoff short, or restart a stopping task
            if tx.send(Command::ConnectNow).is_ok() {
                return;
            }
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                drop(command_tx);
                error!("[STOMP] connect() called outside a tokio runtime: {}", e);
                shared.emit(TransportEvent::Error {
                    message: "no async runtime available".to_string(),
                });
                return;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        *command_tx = Some(tx);
        shared.running.store(true, Ordering::SeqCst);
        handle.spawn(Self::connection_loop(Arc::clone(shared), rx));
    }

    fn disconnect(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        if !self.shared.send_command(Command::Disconnect) {
            Self::mark_disconnected(&self.shared, Some("client disconnect".to_string()));
        }
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    fn publish(&self, destination: &str, body: String) {
        if !self.is_connected() {
            debug!("[STOMP] Not connected, dropping publish to {}", destination);
            return;
        }
        self.shared.send_command(Command::Send {
            generation: self.shared.generation.load(Ordering::SeqCst),
            destination: destination.to_string(),
            body,
        });
    }

    fn subscribe(&self, destination: &str, handler: MessageHandler) -> Option<SubscriptionHandle> {
        if !self.is_connected() {
            return None;
        }

        let id = format!(
            "sub-{}",
            self.shared.next_subscription_id.fetch_add(1, Ordering::SeqCst)
        );
        self.shared.handlers.insert(id.clone(), handler);

        let sent = self.shared.send_command(Command::Subscribe {
            generation: self.shared.generation.load(Ordering::SeqCst),
            id: id.clone(),
            destination: destination.to_string(),
        });
        if !sent {
            self.shared.handlers.remove(&id);
            return None;
        }

        Some(SubscriptionHandle {
            id,
            destination: destination.to_string(),
        })
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if self.shared.handlers.remove(&handle.id).is_none() {
            // Already gone with a previous connection
            return;
        }
        if self.is_connected() {
            self.shared.send_command(Command::Unsubscribe {
                generation: self.shared.generation.load(Ordering::SeqCst),
                id: handle.id.clone(),
            });
        }
    }

    fn set_event_sink(&self, sink: EventSink) {
        *self.shared.sink.write() = Some(sink);
    }
}

impl std::fmt::Debug for StompWebSocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StompWebSocketClient")
            .field("config", &self.shared.config)
            .field("state", &self.state())
            .field("subscriptions", &self.shared.handlers.len())
            .finish()
    }
}
