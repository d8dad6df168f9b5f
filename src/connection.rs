//! Persistent push connection with bounded exponential reconnect.
//!
//! `ConnectionTracker` is the pure state machine; `Connection` drives it over
//! a tokio-tungstenite socket and hands decoded events to the consumer.

use crate::config::{ClientConfig, LiveConfig};
use crate::feed::FeedLocation;
use crate::model::UserId;
use crate::protocol::{ControlMessage, FeedEvent};
use anyhow::{anyhow, Result};
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use reqwest::Url;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Retry budget exhausted; no further automatic reconnects
    Failed,
}

/// Reconnect delays: `min(base * 2^attempt, cap)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(30_000),
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(live: &LiveConfig) -> Self {
        Self {
            max_attempts: live.max_reconnect_attempts,
            base: Duration::from_millis(live.backoff_base_ms),
            cap: Duration::from_millis(live.backoff_cap_ms),
        }
    }

    /// Delay before reconnect number `attempt`.
    ///
    /// `attempt` is zero-based, so the first reconnect waits `base` (1, 2, 4,
    /// 8, 16 s with the defaults) rather than `2 * base`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// What to do after the transport closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    After(Duration),
    GiveUp,
}

/// Connection lifecycle bookkeeping, free of I/O.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    policy: ReconnectPolicy,
    state: ConnectionState,
    attempts: u32,
}

impl ConnectionTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnects scheduled since the last successful handshake
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns false once failed; a failed tracker never connects again.
    pub fn on_connecting(&mut self) -> bool {
        if self.state == ConnectionState::Failed {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    pub fn on_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.attempts = 0;
    }

    /// Transport closed (or never opened). Decide whether to retry.
    pub fn on_closed(&mut self) -> Reconnect {
        if self.state == ConnectionState::Failed {
            return Reconnect::GiveUp;
        }
        if self.attempts >= self.policy.max_attempts {
            self.state = ConnectionState::Failed;
            return Reconnect::GiveUp;
        }
        self.state = ConnectionState::Disconnected;
        let delay = self.policy.delay_for(self.attempts);
        self.attempts += 1;
        Reconnect::After(delay)
    }

    /// Deliberate disconnect by the owner
    pub fn on_shutdown(&mut self) {
        if self.state != ConnectionState::Failed {
            self.state = ConnectionState::Disconnected;
        }
    }
}

/// Something that can push control frames to the server.
pub trait EventSink: Send + Sync {
    fn send(&self, msg: ControlMessage) -> Result<()>;

    /// Resubscribe to another location without reconnecting.
    fn change_location(&self, location: &FeedLocation) -> Result<()> {
        self.send(ControlMessage::LocationChange {
            location_filter: location.as_filter().map(str::to_string),
        })
    }
}

/// What the connection reports to its consumer
#[derive(Debug, Clone, PartialEq)]
pub enum LiveUpdate {
    Status(ConnectionState),
    Event(FeedEvent),
}

#[derive(Debug)]
enum Control {
    Send(ControlMessage),
    ChangeLocation(FeedLocation),
    Disconnect,
}

enum Exit {
    Closed,
    Shutdown,
}

/// Cloneable control side of a running connection
#[derive(Clone)]
pub struct ConnectionControl {
    control_tx: mpsc::UnboundedSender<Control>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionControl {
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn disconnect(&self) {
        let _ = self.control_tx.send(Control::Disconnect);
    }
}

impl EventSink for ConnectionControl {
    fn send(&self, msg: ControlMessage) -> Result<()> {
        self.control_tx
            .send(Control::Send(msg))
            .map_err(|_| anyhow!("Connection task has stopped"))
    }

    // Routed through the task so a later reconnect uses the new location too.
    fn change_location(&self, location: &FeedLocation) -> Result<()> {
        self.control_tx
            .send(Control::ChangeLocation(location.clone()))
            .map_err(|_| anyhow!("Connection task has stopped"))
    }
}

/// Handle returned by [`Connection::spawn`]
pub struct ConnectionHandle {
    control: ConnectionControl,
    updates: mpsc::UnboundedReceiver<LiveUpdate>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    pub fn control(&self) -> ConnectionControl {
        self.control.clone()
    }

    /// Status changes and decoded events, in arrival order
    pub fn updates(&mut self) -> &mut mpsc::UnboundedReceiver<LiveUpdate> {
        &mut self.updates
    }

    pub fn state(&self) -> ConnectionState {
        self.control.state()
    }

    pub fn into_parts(self) -> (ConnectionControl, mpsc::UnboundedReceiver<LiveUpdate>) {
        (self.control, self.updates)
    }

    /// Disconnect and wait for the task to wind down.
    pub async fn shutdown(self) {
        self.control.disconnect();
        let _ = self.task.await;
    }
}

impl EventSink for ConnectionHandle {
    fn send(&self, msg: ControlMessage) -> Result<()> {
        self.control.send(msg)
    }

    fn change_location(&self, location: &FeedLocation) -> Result<()> {
        self.control.change_location(location)
    }
}

/// The connection task
pub struct Connection {
    ws_base: String,
    viewer_id: UserId,
    location: FeedLocation,
    heartbeat: Duration,
    tracker: ConnectionTracker,
    control_rx: mpsc::UnboundedReceiver<Control>,
    updates_tx: mpsc::UnboundedSender<LiveUpdate>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Connection {
    /// Start connecting on the current tokio runtime.
    ///
    /// Requires a viewer: anonymous sessions never open a push connection.
    pub fn spawn(config: &ClientConfig, viewer_id: UserId, location: FeedLocation) -> ConnectionHandle {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let connection = Connection {
            ws_base: config.ws_base().to_string(),
            viewer_id,
            location,
            heartbeat: config.live.heartbeat(),
            tracker: ConnectionTracker::new(ReconnectPolicy::from_config(&config.live)),
            control_rx,
            updates_tx,
            state_tx,
        };

        let task = tokio::spawn(connection.run());
        ConnectionHandle {
            control: ConnectionControl {
                control_tx,
                state_rx,
            },
            updates,
            task,
        }
    }

    /// `{ws_base}/ws/{viewer_id}?location_filter=...`
    pub fn url(ws_base: &str, viewer_id: UserId, location: &FeedLocation) -> Result<Url> {
        let base = format!("{}/ws/{}", ws_base.trim_end_matches('/'), viewer_id);
        let url = match location.as_filter() {
            Some(loc) => Url::parse_with_params(&base, &[("location_filter", loc)])?,
            None => Url::parse(&base)?,
        };
        Ok(url)
    }

    fn publish(&self) {
        let state = self.tracker.state();
        self.state_tx.send_replace(state);
        let _ = self.updates_tx.send(LiveUpdate::Status(state));
    }

    async fn run(mut self) {
        loop {
            if !self.tracker.on_connecting() {
                return;
            }
            self.publish();

            match self.open().await {
                Ok(ws) => {
                    self.tracker.on_connected();
                    self.publish();
                    info!(target: "streetmeat::live", viewer = self.viewer_id, location = %self.location, "Connected");

                    if let Exit::Shutdown = self.pump(ws).await {
                        self.tracker.on_shutdown();
                        self.publish();
                        return;
                    }
                    info!(target: "streetmeat::live", "Connection closed");
                }
                Err(e) => {
                    warn!(target: "streetmeat::live", "Connect failed: {:#}", e);
                }
            }

            match self.tracker.on_closed() {
                Reconnect::After(delay) => {
                    self.publish();
                    debug!(
                        target: "streetmeat::live",
                        attempt = self.tracker.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting"
                    );
                    if let Exit::Shutdown = self.wait(delay).await {
                        self.tracker.on_shutdown();
                        self.publish();
                        return;
                    }
                }
                Reconnect::GiveUp => {
                    self.publish();
                    error!(
                        target: "streetmeat::live",
                        "Failed to connect after {} attempts",
                        self.tracker.attempts()
                    );
                    return;
                }
            }
        }
    }

    async fn open(&self) -> Result<WsStream> {
        let url = Self::url(&self.ws_base, self.viewer_id, &self.location)?;
        debug!(target: "streetmeat::live", %url, "Connecting");
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| anyhow!("WebSocket connect to {} failed: {}", url, e))?;
        Ok(ws)
    }

    /// Sleep out a backoff while still honouring control requests.
    async fn wait(&mut self, delay: Duration) -> Exit {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Exit::Closed,
                cmd = self.control_rx.recv() => match cmd {
                    Some(Control::ChangeLocation(location)) => self.location = location,
                    Some(Control::Send(msg)) => {
                        debug!(target: "streetmeat::live", ?msg, "Dropping control message while offline");
                    }
                    Some(Control::Disconnect) | None => return Exit::Shutdown,
                },
            }
        }
    }

    async fn pump(&mut self, ws: WsStream) -> Exit {
        let (mut write, mut read) = ws.split();
        let start = tokio::time::Instant::now() + self.heartbeat;
        let mut heartbeat = tokio::time::interval_at(start, self.heartbeat);

        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text),
                    Some(Ok(Message::Close(_))) | None => return Exit::Closed,
                    Some(Err(e)) => {
                        warn!(target: "streetmeat::live", "WebSocket error: {}", e);
                        return Exit::Closed;
                    }
                    Some(Ok(_)) => {}
                },
                _ = heartbeat.tick() => {
                    if let Err(e) = send_control(&mut write, &ControlMessage::Ping).await {
                        debug!(target: "streetmeat::live", "Heartbeat not sent: {:#}", e);
                    }
                }
                cmd = self.control_rx.recv() => match cmd {
                    Some(Control::Send(msg)) => {
                        if let Err(e) = send_control(&mut write, &msg).await {
                            warn!(target: "streetmeat::live", "Failed to send control message: {:#}", e);
                        }
                    }
                    Some(Control::ChangeLocation(location)) => {
                        let msg = ControlMessage::LocationChange {
                            location_filter: location.as_filter().map(str::to_string),
                        };
                        self.location = location;
                        if let Err(e) = send_control(&mut write, &msg).await {
                            warn!(target: "streetmeat::live", "Failed to change location: {:#}", e);
                        }
                    }
                    Some(Control::Disconnect) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        return Exit::Shutdown;
                    }
                },
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match FeedEvent::decode(text) {
            Ok(FeedEvent::Pong) => trace!(target: "streetmeat::live", "pong"),
            Ok(event) => {
                let _ = self.updates_tx.send(LiveUpdate::Event(event));
            }
            Err(e) => warn!(target: "streetmeat::live", "Dropping push message: {:#}", e),
        }
    }
}

async fn send_control(write: &mut WsSink, msg: &ControlMessage) -> Result<()> {
    write
        .send(Message::Text(msg.to_json()?.into()))
        .await
        .map_err(|e| anyhow!("Failed to send {:?}: {}", msg, e))
}
