//! Push Client Facade
//!
//! Wires the authenticator, the Bayeux transport, the subscription
//! registry, and the event dispatcher into one handle.
//!
//! # Lifecycle
//!
//! The transport is started lazily on the first successful
//! authentication and restarted after every renewal: a re-auth mints a
//! fresh subscription id, and the socket must re-handshake under it.
//! A fatal handshake rejection triggers an immediate re-authentication
//! with the stored credentials.
//!
//! # Usage
//!
//! ```ignore
//! let client = PushClient::new(ClientConfig::new(
//!     "https://api.example.com",
//!     "wss://push.example.com/cometd",
//! ));
//! client.authenticate(Credentials::new("user", "pass")).await?;
//!
//! let handle = client.subscribe(Channel::Quotes, &["5479".into()], Arc::new(|data| {
//!     println!("quote: {data}");
//! }))?;
//!
//! client.unsubscribe(&handle);
//! client.disconnect().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::RestPort;
use crate::domain::channel::{Channel, ChannelError};
use crate::domain::session::{Credentials, Session, SessionStore};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::auth::{AuthError, Authenticator, SessionEvent};
use crate::infrastructure::bayeux::backoff::{BackoffConfig, BackoffScheduler};
use crate::infrastructure::bayeux::liveness::LivenessConfig;
use crate::infrastructure::bayeux::transport::{
    BayeuxTransport, TransportCommand, TransportConfig, TransportEvent,
};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::dispatch::{Dispatcher, Listener, ListenerId};
use crate::infrastructure::rest::HttpRestClient;

/// Errors surfaced by the client facade.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Authentication failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Invalid channel/id combination.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Operation requires an authenticated session.
    #[error("not authenticated")]
    NotAuthenticated,
}

/// Lifecycle events surfaced to the caller.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The push socket handshook successfully.
    Connected,
    /// The push socket dropped and will be retried.
    Disconnected,
    /// The socket is restarting.
    Reconnecting {
        /// Restart attempt number.
        attempt: u32,
    },
    /// A subscription was acknowledged.
    SubscriptionConfirmed {
        /// Channel path.
        path: String,
    },
    /// A subscribe request was refused.
    SubscriptionFailed {
        /// Channel path.
        path: String,
        /// Server-provided error, if any.
        reason: String,
    },
    /// The session was (re)established.
    Authenticated,
    /// The client disconnected.
    SessionClosed,
}

/// Handle for one registered listener, used to unsubscribe exactly it.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    path: String,
    listener_id: ListenerId,
}

impl SubscriptionHandle {
    /// Channel path this handle listens on.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Client for the brokerage push feed.
pub struct PushClient {
    config: ClientConfig,
    session: Arc<SessionStore>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Arc<Dispatcher>,
    backoff: Arc<BackoffScheduler>,
    authenticator: Arc<Authenticator>,
    command_tx: mpsc::Sender<TransportCommand>,
    cancel: CancellationToken,
    client_events: Mutex<Option<mpsc::Receiver<ClientEvent>>>,
}

impl PushClient {
    /// Create a client.
    ///
    /// Must be called from within a Tokio runtime; the event pump task
    /// is spawned here.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let session = Arc::new(SessionStore::new());
        let rest: Arc<dyn RestPort> =
            Arc::new(HttpRestClient::new(config.base_url.clone(), session.clone()));
        Self::with_rest(config, rest, session)
    }

    /// Create a client over an existing REST adapter.
    ///
    /// The adapter must share `session` so the security token it attaches
    /// stays in step with authentication.
    #[must_use]
    pub fn with_rest(
        config: ClientConfig,
        rest: Arc<dyn RestPort>,
        session: Arc<SessionStore>,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new());
        let backoff = Arc::new(BackoffScheduler::new(BackoffConfig::new(
            config.backoff.max_backoff,
            config.backoff.jitter_floor,
        )));
        let cancel = CancellationToken::new();

        let (session_tx, session_rx) = mpsc::channel::<SessionEvent>(16);
        let (transport_tx, transport_rx) = mpsc::channel::<TransportEvent>(256);
        let (command_tx, command_rx) = mpsc::channel::<TransportCommand>(64);
        let (client_tx, client_rx) = mpsc::channel::<ClientEvent>(64);

        let authenticator = Arc::new(Authenticator::new(
            rest,
            session.clone(),
            config.auth.clone(),
            backoff.clone(),
            session_tx,
        ));

        let transport = Arc::new(BayeuxTransport::new(
            TransportConfig {
                url: config.push_url.clone(),
                liveness: LivenessConfig {
                    check_interval: config.liveness.check_interval,
                    grace: config.liveness.grace,
                    default_timeout: config.liveness.default_timeout,
                },
            },
            session.clone(),
            registry.clone(),
            backoff.clone(),
            transport_tx,
            cancel.clone(),
        ));

        let pump = EventPump {
            authenticator_events: session_rx,
            transport_events: transport_rx,
            transport,
            transport_command_rx: Some(command_rx),
            command_tx: command_tx.clone(),
            dispatcher: dispatcher.clone(),
            client_tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(pump.run(Arc::clone(&authenticator)));

        Self {
            config,
            session,
            registry,
            dispatcher,
            backoff,
            authenticator,
            command_tx,
            cancel,
            client_events: Mutex::new(Some(client_rx)),
        }
    }

    /// Take the lifecycle event receiver.
    ///
    /// Returns `None` after the first call.
    #[must_use]
    pub fn events(&self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.client_events.lock().take()
    }

    /// The configuration this client was built with.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether an authenticated session is live.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// Authenticate and start the push transport.
    ///
    /// # Errors
    ///
    /// See [`Authenticator::authenticate`].
    pub async fn authenticate(&self, credentials: Credentials) -> Result<Session, ClientError> {
        let session = Arc::clone(&self.authenticator)
            .authenticate(credentials)
            .await?;
        Ok(session)
    }

    /// Register a listener for a channel.
    ///
    /// The first listener on a path also subscribes it on the feed;
    /// additional listeners share the existing subscription. The listener
    /// runs on the transport's event task and must not block.
    ///
    /// # Errors
    ///
    /// Rejects synchronously when no authenticated session exists or the
    /// id list does not fit the channel.
    pub fn subscribe(
        &self,
        channel: Channel,
        ids: &[String],
        listener: Listener,
    ) -> Result<SubscriptionHandle, ClientError> {
        if !self.session.is_authenticated() {
            return Err(ClientError::NotAuthenticated);
        }

        let path = channel.path(ids)?;
        let listener_id = self.dispatcher.add(&path, listener);

        if self.registry.mark_desired(&path) {
            // Newly desired: nudge a running transport. Before the
            // transport is up the registry resync covers it.
            let _ = self.command_tx.try_send(TransportCommand::Subscribe(path.clone()));
        }

        tracing::debug!(path = %path, "Listener registered");
        Ok(SubscriptionHandle { path, listener_id })
    }

    /// Remove the listener behind `handle`.
    ///
    /// When the last listener on a path is removed, the path is revoked
    /// and unsubscribed from the feed.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if !self.dispatcher.remove(&handle.path, handle.listener_id) {
            return;
        }
        if !self.dispatcher.has_listeners(&handle.path) {
            self.registry.revoke(&handle.path);
            let _ = self
                .command_tx
                .try_send(TransportCommand::Unsubscribe(handle.path.clone()));
            tracing::debug!(path = %handle.path, "Subscription revoked");
        }
    }

    /// Disconnect: cancel renewal, drop the session, close the socket,
    /// and detach every listener.
    pub async fn disconnect(&self) {
        self.authenticator.disconnect().await;
        let _ = self.command_tx.send(TransportCommand::Disconnect).await;
        self.cancel.cancel();
        self.dispatcher.clear();
        self.registry.clear();
        self.backoff.clear("websocket");
        tracing::info!("Client disconnected");
    }
}

impl std::fmt::Debug for PushClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushClient")
            .field("authenticated", &self.is_authenticated())
            .field("subscriptions", &self.registry.len())
            .finish()
    }
}

/// Background task bridging authenticator and transport events.
struct EventPump {
    authenticator_events: mpsc::Receiver<SessionEvent>,
    transport_events: mpsc::Receiver<TransportEvent>,
    transport: Arc<BayeuxTransport>,
    /// Consumed when the transport is first started.
    transport_command_rx: Option<mpsc::Receiver<TransportCommand>>,
    command_tx: mpsc::Sender<TransportCommand>,
    dispatcher: Arc<Dispatcher>,
    client_tx: mpsc::Sender<ClientEvent>,
    cancel: CancellationToken,
}

impl EventPump {
    async fn run(mut self, authenticator: Arc<Authenticator>) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Event pump cancelled");
                    return;
                }
                session_event = self.authenticator_events.recv() => {
                    match session_event {
                        Some(SessionEvent::Authenticated) => {
                            let _ = self.client_tx.try_send(ClientEvent::Authenticated);
                            self.on_authenticated();
                        }
                        Some(SessionEvent::Disconnected) => {
                            let _ = self.client_tx.try_send(ClientEvent::SessionClosed);
                        }
                        None => return,
                    }
                }
                transport_event = self.transport_events.recv() => {
                    match transport_event {
                        Some(event) => self.on_transport_event(event, &authenticator),
                        None => return,
                    }
                }
            }
        }
    }

    /// Start the transport on first auth; restart it on every re-auth.
    fn on_authenticated(&mut self) {
        if let Some(command_rx) = self.transport_command_rx.take() {
            tracing::info!("Starting push transport");
            let transport = Arc::clone(&self.transport);
            tokio::spawn(async move {
                if let Err(e) = transport.run(command_rx).await {
                    tracing::error!(error = %e, "Transport exited with error");
                }
            });
        } else {
            let _ = self.command_tx.try_send(TransportCommand::Restart);
        }
    }

    fn on_transport_event(&self, event: TransportEvent, authenticator: &Arc<Authenticator>) {
        match event {
            TransportEvent::Data { channel, payload } => {
                let delivered = self.dispatcher.dispatch(&channel, &payload);
                if delivered == 0 {
                    tracing::trace!(channel = %channel, "Data on channel without listeners");
                }
            }
            TransportEvent::Connected { client_id } => {
                tracing::debug!(client_id = %client_id, "Push transport connected");
                let _ = self.client_tx.try_send(ClientEvent::Connected);
            }
            TransportEvent::Disconnected => {
                let _ = self.client_tx.try_send(ClientEvent::Disconnected);
            }
            TransportEvent::Reconnecting { attempt } => {
                let _ = self.client_tx.try_send(ClientEvent::Reconnecting { attempt });
            }
            TransportEvent::HandshakeRejected { reason } => {
                tracing::warn!(reason = %reason, "Re-authenticating after handshake rejection");
                // Replays the stored credentials immediately; success emits
                // SessionEvent::Authenticated, which restarts the transport.
                Arc::clone(authenticator).arm_renewal(Duration::ZERO);
            }
            TransportEvent::Subscribed { path } => {
                let _ = self
                    .client_tx
                    .try_send(ClientEvent::SubscriptionConfirmed { path });
            }
            TransportEvent::SubscribeFailed { path, reason } => {
                let _ = self
                    .client_tx
                    .try_send(ClientEvent::SubscriptionFailed { path, reason });
            }
        }
    }
}
