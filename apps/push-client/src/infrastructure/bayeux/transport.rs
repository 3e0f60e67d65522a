//! Bayeux WebSocket Transport
//!
//! Owns the push socket and drives the Bayeux meta-channel state machine:
//! handshake, pipelined connect heartbeats, subscribe/unsubscribe, and
//! advice-directed recovery.
//!
//! # Lifecycle
//!
//! An outer loop establishes the socket, runs one connection to
//! completion, and restarts it through the backoff scheduler. Each
//! connection handshakes under the session's current subscription id
//! and sends the first `/meta/connect`. The first successful connect
//! response marks the connection live: every desired subscription not
//! yet confirmed under the new `clientId` is resynchronized, and from
//! then on exactly one connect stays in flight. An unsuccessful
//! connect abandons the `clientId` and starts over from the handshake
//! step.
//!
//! Server advice is honored on every meta response: `"handshake"`
//! re-handshakes on the same socket, `"none"` stops the transport, and
//! the advice `timeout` feeds the liveness monitor.
//!
//! A fatal handshake rejection (one the server does not advise
//! re-handshaking for) means the subscription id itself is bad. The
//! transport invalidates the push binding, emits
//! [`TransportEvent::HandshakeRejected`], and parks with the socket
//! closed; a fresh authentication commands a restart.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::domain::session::SessionStore;
use crate::domain::subscription::SubscriptionRegistry;

use super::backoff::BackoffScheduler;
use super::codec::{BayeuxCodec, CodecError};
use super::liveness::{LivenessConfig, LivenessEvent, LivenessMonitor, LivenessState};
use super::messages::{
    BayeuxMessage, ConnectRequest, DisconnectRequest, HandshakeRequest, MetaChannel,
    SubscriptionRequest,
};

/// Backoff action for socket establishment.
const WEBSOCKET_ACTION: &str = "websocket";
/// Backoff action for handshake attempts.
const HANDSHAKE_ACTION: &str = "handshake";

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Connection closed by the server or the stream ended.
    #[error("connection closed")]
    ConnectionClosed,

    /// No connect response within the advice timeout plus grace.
    #[error("connect liveness timeout")]
    LivenessTimeout,
}

// =============================================================================
// Events and Commands
// =============================================================================

/// Events emitted by the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Handshake succeeded; the socket is live under a fresh `clientId`.
    Connected {
        /// Server-assigned client id.
        client_id: String,
    },
    /// The current connection ended and will be retried.
    Disconnected,
    /// Restarting the socket.
    Reconnecting {
        /// Restart attempt number since the transport started.
        attempt: u32,
    },
    /// The server rejected the handshake without advising another one.
    HandshakeRejected {
        /// Server-provided error, if any.
        reason: String,
    },
    /// A subscription was acknowledged under the current `clientId`.
    Subscribed {
        /// Channel path.
        path: String,
    },
    /// A subscribe request was refused.
    SubscribeFailed {
        /// Channel path.
        path: String,
        /// Server-provided error, if any.
        reason: String,
    },
    /// A data message arrived on a subscribed channel.
    Data {
        /// Channel path the message arrived on.
        channel: String,
        /// Message payload.
        payload: serde_json::Value,
    },
}

/// Commands accepted by a running transport.
#[derive(Debug, Clone)]
pub enum TransportCommand {
    /// Send a subscribe for a path already marked desired in the registry.
    Subscribe(String),
    /// Send an unsubscribe for a path already revoked in the registry.
    Unsubscribe(String),
    /// Drop the current socket and establish a fresh one.
    Restart,
    /// Send `/meta/disconnect` and stop the transport.
    Disconnect,
}

/// How a single connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ended {
    /// Cancelled or explicitly disconnected; stop the transport.
    Cancelled,
    /// Fatal handshake rejection; stop until re-authentication.
    Fatal,
    /// Server advice `reconnect: "none"`; stop the transport.
    AdviceNone,
}

// =============================================================================
// Transport
// =============================================================================

/// Configuration for the transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket URL of the push endpoint.
    pub url: String,
    /// Liveness monitoring configuration.
    pub liveness: LivenessConfig,
}

/// Bayeux transport over a WebSocket.
pub struct BayeuxTransport {
    config: TransportConfig,
    codec: BayeuxCodec,
    session: Arc<SessionStore>,
    registry: Arc<SubscriptionRegistry>,
    backoff: Arc<BackoffScheduler>,
    event_tx: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
    /// Monotonic message id, shared across reconnects.
    next_id: AtomicU64,
    restarts: AtomicU32,
}

/// Per-connection state.
struct ConnState {
    /// `clientId` from the last successful handshake on this socket.
    client_id: Option<String>,
    /// Whether a connect has succeeded under the current `clientId`.
    connected: bool,
    /// Deadline for a throttled handshake armed on the select loop.
    handshake_at: Option<tokio::time::Instant>,
    liveness: Arc<LivenessState>,
}

/// Fires at the armed handshake deadline; pends forever without one.
async fn handshake_timer(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl BayeuxTransport {
    /// Create a transport.
    #[must_use]
    pub fn new(
        config: TransportConfig,
        session: Arc<SessionStore>,
        registry: Arc<SubscriptionRegistry>,
        backoff: Arc<BackoffScheduler>,
        event_tx: mpsc::Sender<TransportEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            codec: BayeuxCodec::new(),
            session,
            registry,
            backoff,
            event_tx,
            cancel,
            next_id: AtomicU64::new(0),
            restarts: AtomicU32::new(0),
        }
    }

    /// Number of socket restarts since the transport started.
    #[must_use]
    pub fn restart_count(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    fn next_message_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Run the transport until cancelled or disconnected.
    ///
    /// A fatal handshake rejection or `reconnect: "none"` advice parks
    /// the transport (socket closed, commands drained) until a
    /// [`TransportCommand::Restart`] arrives.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok`; the signature leaves room for
    /// unrecoverable setup failures.
    pub async fn run(
        self: Arc<Self>,
        mut command_rx: mpsc::Receiver<TransportCommand>,
    ) -> Result<(), TransportError> {
        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Transport cancelled");
                return Ok(());
            }

            let delay = self.backoff.delay_for(WEBSOCKET_ACTION);
            if !delay.is_zero() {
                tracing::debug!(delay_ms = delay.as_millis(), "Delaying socket restart");
                tokio::select! {
                    () = self.cancel.cancelled() => return Ok(()),
                    () = tokio::time::sleep(delay) => {}
                }
            }

            match self.connect_and_run(&mut command_rx).await {
                Ok(Ended::Cancelled) => {
                    tracing::info!("Transport stopped");
                    return Ok(());
                }
                Ok(Ended::Fatal) => {
                    tracing::warn!("Transport parked after fatal handshake rejection");
                    if !self.park_until_restart(&mut command_rx).await {
                        return Ok(());
                    }
                    self.backoff.clear(HANDSHAKE_ACTION);
                }
                Ok(Ended::AdviceNone) => {
                    tracing::warn!("Server forbade reconnecting, transport parked");
                    if !self.park_until_restart(&mut command_rx).await {
                        return Ok(());
                    }
                    self.backoff.clear(HANDSHAKE_ACTION);
                }
                Err(e) => {
                    let attempt = self.restarts.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::warn!(error = %e, attempt, "Transport connection error");
                    metrics::counter!("push_client_transport_restarts_total").increment(1);

                    // A fresh socket gets a fresh handshake budget.
                    self.backoff.clear(HANDSHAKE_ACTION);

                    let _ = self.event_tx.send(TransportEvent::Disconnected).await;
                    let _ = self
                        .event_tx
                        .send(TransportEvent::Reconnecting { attempt })
                        .await;
                }
            }
        }
    }

    /// Hold the socket closed until a restart is commanded.
    ///
    /// Returns `false` when the transport should stop for good.
    /// Subscribe and unsubscribe commands received while parked are
    /// dropped; the registry resync on the next connection covers them.
    async fn park_until_restart(
        &self,
        command_rx: &mut mpsc::Receiver<TransportCommand>,
    ) -> bool {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                command = command_rx.recv() => match command {
                    Some(TransportCommand::Restart) => {
                        tracing::info!("Transport resuming after restart command");
                        return true;
                    }
                    Some(TransportCommand::Disconnect) | None => return false,
                    Some(_) => {}
                }
            }
        }
    }

    /// Establish the socket and run one connection to completion.
    async fn connect_and_run(
        &self,
        command_rx: &mut mpsc::Receiver<TransportCommand>,
    ) -> Result<Ended, TransportError> {
        tracing::info!(url = %self.config.url, "Connecting to push stream");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(&self.config.url).await?;
        let (mut write, mut read) = ws_stream.split();

        let liveness_state = Arc::new(LivenessState::new(self.config.liveness.default_timeout));
        let (liveness_tx, mut liveness_rx) = mpsc::channel::<LivenessEvent>(4);
        let liveness_cancel = CancellationToken::new();
        let monitor = LivenessMonitor::new(
            self.config.liveness.clone(),
            liveness_state.clone(),
            liveness_tx,
            liveness_cancel.clone(),
        );
        let _monitor_handle = tokio::spawn(monitor.run());

        let mut state = ConnState {
            client_id: None,
            connected: false,
            handshake_at: None,
            liveness: liveness_state,
        };

        let result = self
            .connection_loop(&mut write, &mut read, command_rx, &mut liveness_rx, &mut state)
            .await;
        liveness_cancel.cancel();
        result
    }

    /// Select loop over cancellation, liveness, commands, and frames.
    async fn connection_loop<W, R>(
        &self,
        write: &mut W,
        read: &mut R,
        command_rx: &mut mpsc::Receiver<TransportCommand>,
        liveness_rx: &mut mpsc::Receiver<LivenessEvent>,
        state: &mut ConnState,
    ) -> Result<Ended, TransportError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
        R: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        self.request_handshake(write, state).await?;

        loop {
            let handshake_deadline = state.handshake_at;
            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.send_disconnect(write, state).await;
                    return Ok(Ended::Cancelled);
                }
                () = handshake_timer(handshake_deadline) => {
                    state.handshake_at = None;
                    self.send_handshake(write).await?;
                }
                liveness_event = liveness_rx.recv() => {
                    if liveness_event == Some(LivenessEvent::Stale) {
                        return Err(TransportError::LivenessTimeout);
                    }
                }
                command = command_rx.recv() => {
                    match command {
                        Some(TransportCommand::Subscribe(path)) => {
                            // Before the first connect succeeds the path
                            // rides along at the resync. The pending check
                            // keeps a command that races the resync from
                            // double-sending.
                            if state.connected
                                && let Some(client_id) = state.client_id.clone()
                                && self.registry.pending_for(&client_id).contains(&path)
                            {
                                self.send_subscribe(write, &client_id, &path).await?;
                            }
                        }
                        Some(TransportCommand::Unsubscribe(path)) => {
                            if let Some(client_id) = state.client_id.clone() {
                                let frame = SubscriptionRequest::unsubscribe(
                                    self.next_message_id(),
                                    client_id,
                                    path,
                                );
                                self.send_frame(write, &frame).await?;
                            }
                        }
                        Some(TransportCommand::Restart) => {
                            tracing::info!("Transport restart requested");
                            return Err(TransportError::ConnectionClosed);
                        }
                        Some(TransportCommand::Disconnect) | None => {
                            self.send_disconnect(write, state).await;
                            return Ok(Ended::Cancelled);
                        }
                    }
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(ended) =
                                self.handle_text_frame(&text, write, state).await?
                            {
                                return Ok(ended);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await.map_err(|e| {
                                TransportError::ConnectionFailed(format!(
                                    "failed to send pong: {e}"
                                ))
                            })?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Server sent close frame");
                            return Err(TransportError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            // Ignore other frame types.
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(TransportError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Handle one text frame (a batch of Bayeux messages).
    async fn handle_text_frame<W>(
        &self,
        text: &str,
        write: &mut W,
        state: &mut ConnState,
    ) -> Result<Option<Ended>, TransportError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        let messages = self.codec.decode(text)?;
        metrics::counter!("push_client_frames_total").increment(1);

        for message in messages {
            if let Some(ended) = self.handle_message(&message, write, state).await? {
                return Ok(Some(ended));
            }
        }
        Ok(None)
    }

    /// Dispatch one Bayeux message.
    async fn handle_message<W>(
        &self,
        message: &BayeuxMessage,
        write: &mut W,
        state: &mut ConnState,
    ) -> Result<Option<Ended>, TransportError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        if let Some(timeout_ms) = message.advice().timeout {
            state
                .liveness
                .set_advice_timeout(std::time::Duration::from_millis(timeout_ms));
        }

        match message.meta() {
            Some(MetaChannel::Handshake) => self.on_handshake(message, write, state).await,
            Some(MetaChannel::Connect) => self.on_connect(message, write, state).await,
            Some(MetaChannel::Subscribe) => {
                self.on_subscribe_ack(message, state).await;
                Ok(None)
            }
            Some(MetaChannel::Unsubscribe) => {
                tracing::debug!(
                    path = message.subscription.as_deref().unwrap_or_default(),
                    successful = message.is_successful(),
                    "Unsubscribe acknowledged"
                );
                Ok(None)
            }
            Some(MetaChannel::Disconnect) => Ok(None),
            None => {
                let payload = message.data.clone().unwrap_or(serde_json::Value::Null);
                let _ = self
                    .event_tx
                    .send(TransportEvent::Data {
                        channel: message.channel.clone(),
                        payload,
                    })
                    .await;
                Ok(None)
            }
        }
    }

    /// Handle a handshake response.
    async fn on_handshake<W>(
        &self,
        message: &BayeuxMessage,
        write: &mut W,
        state: &mut ConnState,
    ) -> Result<Option<Ended>, TransportError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        if message.is_successful() {
            let Some(client_id) = message.client_id.clone() else {
                return Err(TransportError::ConnectionFailed(
                    "handshake response missing clientId".to_string(),
                ));
            };
            tracing::info!(client_id = %client_id, "Handshake accepted");
            metrics::counter!("push_client_handshakes_total").increment(1);
            state.client_id = Some(client_id.clone());
            state.connected = false;
            state.liveness.reset();

            // Subscriptions wait for the first connect success; the
            // clientId is not considered live until then.
            self.send_connect(write, &client_id).await?;
            return Ok(None);
        }

        let advice = message.advice();
        if advice.wants_handshake() {
            tracing::warn!("Handshake refused, server advised retrying");
            self.request_handshake(write, state).await?;
            return Ok(None);
        }

        // No re-handshake advised: the subscription id itself is bad.
        let reason = message.error.clone().unwrap_or_default();
        tracing::error!(reason = %reason, "Handshake rejected");
        self.session.invalidate_push();
        let _ = self
            .event_tx
            .send(TransportEvent::HandshakeRejected { reason })
            .await;
        Ok(Some(Ended::Fatal))
    }

    /// Handle a connect response.
    async fn on_connect<W>(
        &self,
        message: &BayeuxMessage,
        write: &mut W,
        state: &mut ConnState,
    ) -> Result<Option<Ended>, TransportError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        let advice = message.advice();

        if advice.forbids_reconnect() {
            return Ok(Some(Ended::AdviceNone));
        }
        if advice.wants_handshake() {
            tracing::info!("Server advised a new handshake");
            self.request_handshake(write, state).await?;
            return Ok(None);
        }

        if !message.is_successful() {
            // An unsuccessful connect means the clientId is no good;
            // start over from the handshake step.
            tracing::warn!(
                error = message.error.as_deref().unwrap_or_default(),
                "Connect refused, restarting from handshake"
            );
            self.request_handshake(write, state).await?;
            return Ok(None);
        }

        state.liveness.record_connect();
        let Some(client_id) = state.client_id.clone() else {
            return Ok(None);
        };

        if !state.connected {
            state.connected = true;
            // First connect success under this clientId: resync every
            // desired subscription not yet sent or confirmed under it.
            for path in self.registry.pending_for(&client_id) {
                self.send_subscribe(write, &client_id, &path).await?;
            }
            let _ = self
                .event_tx
                .send(TransportEvent::Connected {
                    client_id: client_id.clone(),
                })
                .await;
        }

        // Keep exactly one connect in flight.
        self.send_connect(write, &client_id).await?;
        Ok(None)
    }

    /// Handle a subscribe acknowledgement.
    async fn on_subscribe_ack(&self, message: &BayeuxMessage, state: &ConnState) {
        let Some(path) = message.subscription.clone() else {
            tracing::warn!("Subscribe ack without subscription field");
            return;
        };
        let Some(current) = state.client_id.as_deref() else {
            return;
        };
        let ack_client_id = message.client_id.as_deref().unwrap_or(current);

        if message.is_successful() {
            if self.registry.confirm(&path, ack_client_id, current) {
                tracing::info!(path = %path, "Subscription confirmed");
                let _ = self.event_tx.send(TransportEvent::Subscribed { path }).await;
            } else {
                tracing::debug!(path = %path, "Ignoring stale subscribe ack");
            }
        } else {
            let reason = message.error.clone().unwrap_or_default();
            tracing::warn!(path = %path, reason = %reason, "Subscribe refused");
            let _ = self
                .event_tx
                .send(TransportEvent::SubscribeFailed { path, reason })
                .await;
        }
    }

    /// Start over from the handshake step.
    ///
    /// Drops the `clientId` and connected bookkeeping. A throttled
    /// handshake is armed as a deadline on the connection state rather
    /// than slept on, so the select loop keeps servicing frames,
    /// commands, and liveness while waiting.
    async fn request_handshake<W>(
        &self,
        write: &mut W,
        state: &mut ConnState,
    ) -> Result<(), TransportError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        state.client_id = None;
        state.connected = false;

        let delay = self.backoff.delay_for(HANDSHAKE_ACTION);
        if delay.is_zero() {
            state.handshake_at = None;
            self.send_handshake(write).await
        } else {
            tracing::debug!(delay_ms = delay.as_millis(), "Throttling handshake");
            state.handshake_at = Some(tokio::time::Instant::now() + delay);
            Ok(())
        }
    }

    /// Send a handshake under the session's current subscription id.
    async fn send_handshake<W>(&self, write: &mut W) -> Result<(), TransportError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        let subscription_id = self.session.subscription_id().unwrap_or_default();
        let frame = HandshakeRequest::new(self.next_message_id(), subscription_id);
        self.send_frame(write, &frame).await
    }

    async fn send_connect<W>(&self, write: &mut W, client_id: &str) -> Result<(), TransportError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        let frame = ConnectRequest::new(self.next_message_id(), client_id);
        self.send_frame(write, &frame).await
    }

    /// Send a subscribe and record it as sent for this `clientId`.
    async fn send_subscribe<W>(
        &self,
        write: &mut W,
        client_id: &str,
        path: &str,
    ) -> Result<(), TransportError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        let frame = SubscriptionRequest::subscribe(self.next_message_id(), client_id, path);
        self.send_frame(write, &frame).await?;
        self.registry.mark_sent(path, client_id);
        tracing::debug!(path = %path, "Subscribe sent");
        Ok(())
    }

    /// Best-effort `/meta/disconnect` on the way out.
    async fn send_disconnect<W>(&self, write: &mut W, state: &ConnState)
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        if let Some(client_id) = state.client_id.clone() {
            let frame = DisconnectRequest::new(self.next_message_id(), client_id);
            if let Err(e) = self.send_frame(write, &frame).await {
                tracing::debug!(error = %e, "Disconnect frame not delivered");
            }
        }
    }

    /// Encode a message as a single-element batch and send it.
    async fn send_frame<W, T>(&self, write: &mut W, frame: &T) -> Result<(), TransportError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
        T: Serialize,
    {
        let json = self.codec.encode(frame)?;
        write
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("failed to send frame: {e}")))
    }
}

impl std::fmt::Debug for BayeuxTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BayeuxTransport")
            .field("url", &self.config.url)
            .field("restarts", &self.restart_count())
            .finish()
    }
}
