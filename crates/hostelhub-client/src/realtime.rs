use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use hostelhub_types::events::{RealtimeCommand, RealtimeEvent};
use hostelhub_types::models::Message;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

/// Opens connections to the realtime endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str, token: &str) -> Result<Box<dyn Connection>>;
}

/// One open connection carrying text frames.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, frame: String) -> Result<()>;
    /// `None` once the peer closed the connection.
    async fn recv(&mut self) -> Option<Result<String>>;
}

/// WebSocket transport. The token travels as a `token` query parameter.
pub struct WsTransport;

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str, token: &str) -> Result<Box<dyn Connection>> {
        let separator = if url.contains('?') { '&' } else { '?' };
        let ws_url = format!("{}{}token={}", url, separator, token);

        let (stream, _) = tokio_tungstenite::connect_async(ws_url).await?;
        Ok(Box::new(WsConnection { stream }))
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.stream.send(WsMessage::Text(frame.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text.to_string())),
                Ok(WsMessage::Close(_)) => return None,
                // Pings are answered by tungstenite itself.
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

struct Shared {
    events: broadcast::Sender<RealtimeEvent>,
    state: watch::Sender<ChannelState>,
}

impl Shared {
    fn set_state(&self, next: ChannelState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!("Realtime channel {:?} -> {:?}", current, next);
            *current = next;
            true
        });
    }
}

/// Realtime connection for one authenticated user.
///
/// Reconnects after an unexpected drop up to `reconnect_attempts` times with a
/// fixed delay, re-sending `join` each time. Messages pushed while disconnected
/// are not replayed; subscribers should refetch over REST when the state
/// returns to `Connected`. The token is fixed for the channel's lifetime; to
/// rotate it, close this channel and connect a new one.
pub struct RealtimeChannel {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<RealtimeCommand>,
    driver: JoinHandle<()>,
}

impl RealtimeChannel {
    pub fn connect(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        token: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let (state, _) = watch::channel(ChannelState::Connecting);
        let shared = Arc::new(Shared { events, state });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            shared: shared.clone(),
            transport,
            url: config.socket_url.clone(),
            token: token.into(),
            user_id: user_id.into(),
            max_attempts: config.reconnect_attempts,
            delay: config.reconnect_delay,
        };
        let driver = tokio::spawn(driver.run(outbound_rx));

        Self {
            shared,
            outbound,
            driver,
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// Receive every event pushed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.shared.events.subscribe()
    }

    /// Queue a command. Commands issued while reconnecting go out once the
    /// connection is back; after the channel gave up or was closed this fails.
    pub fn emit(&self, command: RealtimeCommand) -> Result<()> {
        if self.state() == ChannelState::Disconnected {
            return Err(ClientError::Network("realtime channel is disconnected".into()));
        }
        self.outbound
            .send(command)
            .map_err(|_| ClientError::Network("realtime channel is closed".into()))
    }

    /// Relay a server-confirmed message to its recipient.
    pub fn send_message(&self, message: &Message) -> Result<()> {
        self.emit(RealtimeCommand::SendMessage(message.clone()))
    }

    pub fn close(&self) {
        self.driver.abort();
        self.shared.set_state(ChannelState::Disconnected);
        info!("Realtime channel closed");
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

enum PumpExit {
    Dropped,
    Shutdown,
}

struct Driver {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    url: String,
    token: String,
    user_id: String,
    max_attempts: u32,
    delay: Duration,
}

impl Driver {
    async fn run(self, mut outbound: mpsc::UnboundedReceiver<RealtimeCommand>) {
        let mut failures: u32 = 0;

        loop {
            self.shared.set_state(ChannelState::Connecting);

            match self.transport.connect(&self.url, &self.token).await {
                Ok(mut conn) => {
                    failures = 0;
                    self.shared.set_state(ChannelState::Connected);
                    info!("Realtime connected as {}", self.user_id);

                    let join = RealtimeCommand::Join {
                        user_id: self.user_id.clone(),
                    };
                    match send_command(conn.as_mut(), &join).await {
                        Ok(()) => {
                            if let PumpExit::Shutdown = self.pump(conn.as_mut(), &mut outbound).await {
                                self.shared.set_state(ChannelState::Disconnected);
                                return;
                            }
                        }
                        Err(e) => warn!("Sending join failed: {}", e),
                    }
                    warn!("Realtime connection lost");
                }
                Err(e) => warn!("Realtime connect failed: {}", e),
            }

            failures += 1;
            if failures > self.max_attempts {
                warn!("Realtime giving up after {} reconnect attempts", self.max_attempts);
                self.shared.set_state(ChannelState::Disconnected);
                return;
            }

            self.shared.set_state(ChannelState::Connecting);
            debug!(
                "Reconnecting in {:?} (attempt {}/{})",
                self.delay, failures, self.max_attempts
            );
            tokio::time::sleep(self.delay).await;
        }
    }

    async fn pump(
        &self,
        conn: &mut dyn Connection,
        outbound: &mut mpsc::UnboundedReceiver<RealtimeCommand>,
    ) -> PumpExit {
        loop {
            tokio::select! {
                frame = conn.recv() => match frame {
                    Some(Ok(text)) => match serde_json::from_str::<RealtimeEvent>(&text) {
                        Ok(event) => {
                            // No subscribers is fine.
                            let _ = self.shared.events.send(event);
                        }
                        Err(e) => {
                            warn!("Bad realtime frame: {} -- raw: {}", e, preview(&text));
                        }
                    },
                    Some(Err(e)) => {
                        warn!("Realtime read failed: {}", e);
                        return PumpExit::Dropped;
                    }
                    None => return PumpExit::Dropped,
                },
                command = outbound.recv() => match command {
                    Some(command) => {
                        if let Err(e) = send_command(conn, &command).await {
                            warn!("Realtime write failed, command dropped: {}", e);
                            return PumpExit::Dropped;
                        }
                    }
                    None => return PumpExit::Shutdown,
                },
            }
        }
    }
}

/// At most the first 200 chars of a frame, cut on a char boundary.
fn preview(text: &str) -> &str {
    text.char_indices().nth(200).map_or(text, |(i, _)| &text[..i])
}

async fn send_command(conn: &mut dyn Connection, command: &RealtimeCommand) -> Result<()> {
    let frame = serde_json::to_string(command)
        .map_err(|e| ClientError::Network(format!("encoding realtime command: {}", e)))?;
    conn.send(frame).await
}
