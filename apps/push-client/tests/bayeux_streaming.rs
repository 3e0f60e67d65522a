//! Bayeux Transport Integration Tests
//!
//! Runs the transport against an in-process WebSocket server scripted to
//! accept, refuse, or drop connections, and verifies handshake,
//! resubscription, recovery, and data delivery end to end.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use push_client::{
    BackoffConfig, BackoffScheduler, BayeuxTransport, LivenessConfig, Session, SessionStore,
    SubscriptionRegistry, TransportCommand, TransportConfig, TransportEvent,
};

// =============================================================================
// Scripted Server
// =============================================================================

/// Behavior knobs for one scripted server.
#[derive(Debug, Clone)]
struct ServerOptions {
    /// Refuse this many handshakes with `reconnect: "handshake"` advice.
    reject_handshakes: usize,
    /// Refuse every handshake with `reconnect: "none"` advice.
    fatal_rejection: bool,
    /// Close the socket after serving this many connect responses.
    drop_after_connects: Option<usize>,
    /// Push one data message on a channel right after acknowledging its
    /// subscribe.
    push_on_subscribe: bool,
    /// Hold each connect this long before responding, like a long poll.
    connect_hold: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            reject_handshakes: 0,
            fatal_rejection: false,
            drop_after_connects: None,
            push_on_subscribe: false,
            connect_hold: Duration::from_millis(50),
        }
    }
}

/// Observed server-side traffic.
#[derive(Debug, Default)]
struct ServerState {
    connections: AtomicUsize,
    handshakes: AtomicUsize,
    /// `(clientId, path)` per subscribe request.
    subscribes: std::sync::Mutex<Vec<(String, String)>>,
    /// `ext` object of the most recent handshake.
    last_handshake_ext: std::sync::Mutex<Option<serde_json::Value>>,
}

/// Bind a scripted server on a random port.
async fn spawn_server(options: ServerOptions) -> (String, Arc<ServerState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(ServerState::default());

    let accept_state = Arc::clone(&state);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            accept_state.connections.fetch_add(1, Ordering::SeqCst);
            let conn_state = Arc::clone(&accept_state);
            let conn_options = options.clone();
            tokio::spawn(handle_connection(stream, conn_state, conn_options));
        }
    });

    (format!("ws://{addr}"), state)
}

async fn handle_connection(stream: TcpStream, state: Arc<ServerState>, options: ServerOptions) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let mut connects_served = 0usize;

    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            if matches!(message, Message::Close(_)) {
                return;
            }
            continue;
        };

        let batch: Vec<serde_json::Value> = serde_json::from_str(text.as_str()).unwrap();
        for request in batch {
            let channel = request["channel"].as_str().unwrap_or_default().to_string();
            match channel.as_str() {
                "/meta/handshake" => {
                    let n = state.handshakes.fetch_add(1, Ordering::SeqCst) + 1;
                    *state.last_handshake_ext.lock().unwrap() = request.get("ext").cloned();

                    let response = if options.fatal_rejection {
                        json!([{
                            "channel": "/meta/handshake",
                            "successful": false,
                            "error": "402::unknown subscription",
                            "advice": {"reconnect": "none"},
                        }])
                    } else if n <= options.reject_handshakes {
                        json!([{
                            "channel": "/meta/handshake",
                            "successful": false,
                            "error": "407::retry",
                            "advice": {"reconnect": "handshake"},
                        }])
                    } else {
                        json!([{
                            "channel": "/meta/handshake",
                            "successful": true,
                            "clientId": format!("srv-{n}"),
                            "advice": {"reconnect": "retry", "timeout": 10_000},
                        }])
                    };
                    let _ = ws.send(Message::Text(response.to_string().into())).await;
                }
                "/meta/connect" => {
                    connects_served += 1;
                    if options
                        .drop_after_connects
                        .is_some_and(|limit| connects_served > limit)
                    {
                        let _ = ws.close(None).await;
                        return;
                    }
                    tokio::time::sleep(options.connect_hold).await;
                    let response = json!([{
                        "channel": "/meta/connect",
                        "successful": true,
                        "advice": {"reconnect": "retry", "timeout": 10_000},
                    }]);
                    let _ = ws.send(Message::Text(response.to_string().into())).await;
                }
                "/meta/subscribe" => {
                    let client_id = request["clientId"].as_str().unwrap_or_default().to_string();
                    let path = request["subscription"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string();
                    state
                        .subscribes
                        .lock()
                        .unwrap()
                        .push((client_id.clone(), path.clone()));

                    let ack = json!([{
                        "channel": "/meta/subscribe",
                        "successful": true,
                        "clientId": client_id,
                        "subscription": path,
                    }]);
                    let _ = ws.send(Message::Text(ack.to_string().into())).await;

                    if options.push_on_subscribe {
                        let data = json!([{
                            "channel": path,
                            "data": {"lastPrice": 101.25, "updated": 1},
                        }]);
                        let _ = ws.send(Message::Text(data.to_string().into())).await;
                    }
                }
                "/meta/unsubscribe" => {
                    let ack = json!([{
                        "channel": "/meta/unsubscribe",
                        "successful": true,
                        "subscription": request["subscription"],
                    }]);
                    let _ = ws.send(Message::Text(ack.to_string().into())).await;
                }
                "/meta/disconnect" => {
                    return;
                }
                _ => {}
            }
        }
    }
}

// =============================================================================
// Transport Fixture
// =============================================================================

struct Harness {
    transport: Arc<BayeuxTransport>,
    registry: Arc<SubscriptionRegistry>,
    session: Arc<SessionStore>,
    events: mpsc::Receiver<TransportEvent>,
    command_tx: mpsc::Sender<TransportCommand>,
    command_rx: Option<mpsc::Receiver<TransportCommand>>,
    cancel: CancellationToken,
}

fn harness(url: &str) -> Harness {
    let session = Arc::new(SessionStore::new());
    session.set(Session {
        security_token: "tkn".to_string(),
        subscription_id: "sub-abc".to_string(),
        customer_id: "cust".to_string(),
        authenticated: true,
        expires_at: chrono::Utc::now() + chrono::Duration::minutes(30),
    });

    let registry = Arc::new(SubscriptionRegistry::new());
    let (event_tx, events) = mpsc::channel(64);
    let (command_tx, command_rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();

    let transport = Arc::new(BayeuxTransport::new(
        TransportConfig {
            url: url.to_string(),
            liveness: LivenessConfig {
                check_interval: Duration::from_secs(1),
                grace: Duration::from_secs(5),
                default_timeout: Duration::from_secs(30),
            },
        },
        session.clone(),
        registry.clone(),
        Arc::new(BackoffScheduler::new(BackoffConfig::new(
            Duration::from_millis(200),
            Duration::from_millis(5),
        ))),
        event_tx,
        cancel.clone(),
    ));

    Harness {
        transport,
        registry,
        session,
        events,
        command_tx,
        command_rx: Some(command_rx),
        cancel,
    }
}

impl Harness {
    fn start(&mut self) -> tokio::task::JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let command_rx = self.command_rx.take().unwrap();
        tokio::spawn(async move {
            let _ = transport.run(command_rx).await;
        })
    }

    async fn next_event(&mut self) -> TransportEvent {
        timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("event expected within deadline")
            .expect("event channel closed")
    }

    async fn wait_for<F>(&mut self, mut predicate: F) -> TransportEvent
    where
        F: FnMut(&TransportEvent) -> bool,
    {
        loop {
            let event = self.next_event().await;
            if predicate(&event) {
                return event;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn handshake_carries_subscription_id_and_resyncs() {
    let (url, server) = spawn_server(ServerOptions {
        push_on_subscribe: true,
        ..ServerOptions::default()
    })
    .await;

    let mut harness = harness(&url);
    harness.registry.mark_desired("/quotes/5479");
    let run = harness.start();

    let connected = harness
        .wait_for(|e| matches!(e, TransportEvent::Connected { .. }))
        .await;
    match connected {
        TransportEvent::Connected { client_id } => assert_eq!(client_id, "srv-1"),
        _ => unreachable!(),
    }

    // The handshake extension authorized the socket with the session's
    // subscription id.
    let ext = server.last_handshake_ext.lock().unwrap().clone().unwrap();
    assert_eq!(ext["subscriptionId"], "sub-abc");

    harness
        .wait_for(|e| matches!(e, TransportEvent::Subscribed { path } if path == "/quotes/5479"))
        .await;
    assert!(harness.registry.is_confirmed("/quotes/5479", "srv-1"));

    // The pushed data message is surfaced as an event.
    let data = harness
        .wait_for(|e| matches!(e, TransportEvent::Data { .. }))
        .await;
    match data {
        TransportEvent::Data { channel, payload } => {
            assert_eq!(channel, "/quotes/5479");
            assert_eq!(payload["lastPrice"], 101.25);
        }
        _ => unreachable!(),
    }

    harness.cancel.cancel();
    let _ = run.await;
}

#[tokio::test]
async fn socket_drop_reconnects_and_resubscribes_under_new_client_id() {
    let (url, server) = spawn_server(ServerOptions {
        drop_after_connects: Some(2),
        ..ServerOptions::default()
    })
    .await;

    let mut harness = harness(&url);
    harness.registry.mark_desired("/quotes/5479");
    let run = harness.start();

    harness
        .wait_for(|e| matches!(e, TransportEvent::Connected { .. }))
        .await;
    harness
        .wait_for(|e| matches!(e, TransportEvent::Subscribed { .. }))
        .await;

    // Server drops the socket; the transport restarts, handshakes fresh,
    // and replays the subscription.
    harness
        .wait_for(|e| matches!(e, TransportEvent::Reconnecting { .. }))
        .await;
    let reconnected = harness
        .wait_for(|e| matches!(e, TransportEvent::Connected { .. }))
        .await;
    let TransportEvent::Connected { client_id } = reconnected else {
        unreachable!()
    };
    assert_ne!(client_id, "srv-1", "fresh handshake must mint a new clientId");

    harness
        .wait_for(|e| matches!(e, TransportEvent::Subscribed { .. }))
        .await;
    assert!(harness.registry.is_confirmed("/quotes/5479", &client_id));

    let subscribes = server.subscribes.lock().unwrap().clone();
    let client_ids: std::collections::HashSet<_> =
        subscribes.iter().map(|(cid, _)| cid.clone()).collect();
    assert!(client_ids.len() >= 2, "subscribe sent under each clientId");
    assert!(subscribes.iter().all(|(_, path)| path == "/quotes/5479"));

    harness.cancel.cancel();
    let _ = run.await;
}

#[tokio::test]
async fn subscription_revoked_while_offline_is_not_replayed() {
    let (url, server) = spawn_server(ServerOptions {
        drop_after_connects: Some(1),
        ..ServerOptions::default()
    })
    .await;

    let mut harness = harness(&url);
    harness.registry.mark_desired("/quotes/5479");
    harness.registry.mark_desired("/orders/123");
    let run = harness.start();

    let first = harness
        .wait_for(|e| matches!(e, TransportEvent::Connected { .. }))
        .await;
    let TransportEvent::Connected {
        client_id: first_client_id,
    } = first
    else {
        unreachable!()
    };
    harness
        .wait_for(|e| matches!(e, TransportEvent::Subscribed { path } if path == "/quotes/5479"))
        .await;
    harness
        .wait_for(|e| matches!(e, TransportEvent::Subscribed { path } if path == "/orders/123"))
        .await;

    // The server drops the socket; revoke one path while offline.
    harness
        .wait_for(|e| matches!(e, TransportEvent::Reconnecting { .. }))
        .await;
    harness.registry.revoke("/orders/123");

    harness
        .wait_for(|e| matches!(e, TransportEvent::Connected { .. }))
        .await;
    harness
        .wait_for(|e| matches!(e, TransportEvent::Subscribed { path } if path == "/quotes/5479"))
        .await;

    // Resync replays the surviving path only; the revoked one was
    // subscribed exactly once, on the first socket.
    let subscribes = server.subscribes.lock().unwrap().clone();
    let replayed_orders: Vec<_> = subscribes
        .iter()
        .filter(|(_, path)| path == "/orders/123")
        .collect();
    assert_eq!(replayed_orders.len(), 1);
    assert_eq!(replayed_orders[0].0, first_client_id);

    harness.cancel.cancel();
    let _ = run.await;
}

#[tokio::test]
async fn fatal_handshake_rejection_stops_and_invalidates_push_binding() {
    let (url, server) = spawn_server(ServerOptions {
        fatal_rejection: true,
        ..ServerOptions::default()
    })
    .await;

    let mut harness = harness(&url);
    let run = harness.start();

    let rejected = harness
        .wait_for(|e| matches!(e, TransportEvent::HandshakeRejected { .. }))
        .await;
    let TransportEvent::HandshakeRejected { reason } = rejected else {
        unreachable!()
    };
    assert!(reason.contains("unknown subscription"));

    // The transport parks rather than hammering the handshake.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.handshakes.load(Ordering::SeqCst), 1);

    // REST session survives; only the push binding is gone.
    let session = harness.session.get().unwrap();
    assert!(session.authenticated);
    assert!(session.subscription_id.is_empty());

    harness.cancel.cancel();
    timeout(Duration::from_secs(2), run)
        .await
        .expect("parked transport should exit on cancellation")
        .unwrap();
}

#[tokio::test]
async fn advised_rehandshake_recovers_on_the_same_socket() {
    let (url, server) = spawn_server(ServerOptions {
        reject_handshakes: 1,
        ..ServerOptions::default()
    })
    .await;

    let mut harness = harness(&url);
    let run = harness.start();

    harness
        .wait_for(|e| matches!(e, TransportEvent::Connected { .. }))
        .await;

    assert_eq!(server.handshakes.load(Ordering::SeqCst), 2);
    assert_eq!(
        server.connections.load(Ordering::SeqCst),
        1,
        "recovery must not reopen the socket"
    );

    harness.cancel.cancel();
    let _ = run.await;
}

#[tokio::test]
async fn subscribe_command_on_live_socket() {
    let (url, server) = spawn_server(ServerOptions::default()).await;

    let mut harness = harness(&url);
    let run = harness.start();

    harness
        .wait_for(|e| matches!(e, TransportEvent::Connected { .. }))
        .await;

    // Subscribe added after the socket is live rides on a command.
    harness.registry.mark_desired("/orders/123");
    harness
        .command_tx
        .send(TransportCommand::Subscribe("/orders/123".to_string()))
        .await
        .unwrap();

    harness
        .wait_for(|e| matches!(e, TransportEvent::Subscribed { path } if path == "/orders/123"))
        .await;
    assert!(harness.registry.is_confirmed("/orders/123", "srv-1"));

    let subscribes = server.subscribes.lock().unwrap().clone();
    assert_eq!(subscribes.len(), 1);

    harness.cancel.cancel();
    let _ = run.await;
}
