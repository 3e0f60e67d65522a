//! Bayeux Wire Message Types
//!
//! Wire format types for the push feed's Bayeux channel. Every frame on
//! the socket is a JSON array of message objects; this client always
//! sends single-element batches and iterates inbound batches message by
//! message.
//!
//! # Message Types
//!
//! ## Control channels (drive the transport state machine)
//! - `/meta/handshake`: negotiates a clientId, carries the subscription
//!   id as an authorization extension
//! - `/meta/connect`: long-poll heartbeat; one is kept in flight while
//!   connected
//! - `/meta/subscribe` / `/meta/unsubscribe`: channel membership
//! - `/meta/disconnect`: graceful teardown
//!
//! ## Application channels
//! Everything else, e.g. `/quotes/19002,5479`; payload rides in `data`.

use serde::{Deserialize, Serialize};

/// Bayeux protocol version sent in the handshake.
pub const BAYEUX_VERSION: &str = "1.0";

/// Connection types this client declares support for.
pub const SUPPORTED_CONNECTION_TYPES: &[&str] = &["websocket", "long-polling"];

// =============================================================================
// Meta Channels
// =============================================================================

/// The recognized `/meta/*` control channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaChannel {
    /// `/meta/handshake`
    Handshake,
    /// `/meta/connect`
    Connect,
    /// `/meta/subscribe`
    Subscribe,
    /// `/meta/unsubscribe`
    Unsubscribe,
    /// `/meta/disconnect`
    Disconnect,
}

impl MetaChannel {
    /// Channel path string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Handshake => "/meta/handshake",
            Self::Connect => "/meta/connect",
            Self::Subscribe => "/meta/subscribe",
            Self::Unsubscribe => "/meta/unsubscribe",
            Self::Disconnect => "/meta/disconnect",
        }
    }

    /// Parse a channel path; `None` for application channels.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            "/meta/handshake" => Some(Self::Handshake),
            "/meta/connect" => Some(Self::Connect),
            "/meta/subscribe" => Some(Self::Subscribe),
            "/meta/unsubscribe" => Some(Self::Unsubscribe),
            "/meta/disconnect" => Some(Self::Disconnect),
            _ => None,
        }
    }
}

// =============================================================================
// Server Advice
// =============================================================================

/// Server hint on how the client should proceed after a response.
///
/// # Wire Format (JSON)
/// ```json
/// {"reconnect": "handshake", "timeout": 30000, "interval": 0}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advice {
    /// Reconnect directive: "retry", "handshake", or "none".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<String>,

    /// Server-side connect timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Suggested delay before the next connect, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
}

impl Advice {
    /// Server demands a fresh handshake.
    #[must_use]
    pub fn wants_handshake(&self) -> bool {
        self.reconnect.as_deref() == Some("handshake")
    }

    /// Server forbids reconnecting at all.
    #[must_use]
    pub fn forbids_reconnect(&self) -> bool {
        self.reconnect.as_deref() == Some("none")
    }
}

// =============================================================================
// Inbound Message
// =============================================================================

/// A single inbound Bayeux message.
///
/// One permissive struct covers every channel: control responses use
/// `successful`/`advice`/`client_id`, application messages use `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BayeuxMessage {
    /// Channel path this message belongs to.
    pub channel: String,

    /// Message id echoing the client's sequence counter. Servers echo it
    /// back as a string or a number, so it stays untyped here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,

    /// Server-assigned clientId.
    #[serde(default, rename = "clientId", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Whether the control operation succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,

    /// For subscribe/unsubscribe acks: the channel path acted on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,

    /// Server advice on how to proceed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,

    /// Application payload for data channels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Error description on failed control operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BayeuxMessage {
    /// Which control channel this message belongs to, if any.
    #[must_use]
    pub fn meta(&self) -> Option<MetaChannel> {
        MetaChannel::from_path(&self.channel)
    }

    /// Whether the control operation succeeded.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.successful == Some(true)
    }

    /// Advice, defaulting to empty.
    #[must_use]
    pub fn advice(&self) -> Advice {
        self.advice.clone().unwrap_or_default()
    }
}

// =============================================================================
// Outbound Messages
// =============================================================================

/// Handshake request carrying the subscription id authorization.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "channel": "/meta/handshake",
///   "id": "1",
///   "version": "1.0",
///   "minimumVersion": "1.0",
///   "supportedConnectionTypes": ["websocket", "long-polling"],
///   "ext": {"subscriptionId": "..."}
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Always `/meta/handshake`.
    pub channel: String,
    /// Sequence counter value.
    pub id: String,
    /// Protocol version.
    pub version: String,
    /// Minimum protocol version accepted.
    #[serde(rename = "minimumVersion")]
    pub minimum_version: String,
    /// Declared transport types.
    #[serde(rename = "supportedConnectionTypes")]
    pub supported_connection_types: Vec<String>,
    /// Authorization extension.
    pub ext: HandshakeExt,
}

/// Handshake authorization extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeExt {
    /// Subscription id binding the socket to the REST session.
    #[serde(rename = "subscriptionId")]
    pub subscription_id: String,
}

impl HandshakeRequest {
    /// Build a handshake request.
    #[must_use]
    pub fn new(id: u64, subscription_id: impl Into<String>) -> Self {
        Self {
            channel: MetaChannel::Handshake.as_str().to_string(),
            id: id.to_string(),
            version: BAYEUX_VERSION.to_string(),
            minimum_version: BAYEUX_VERSION.to_string(),
            supported_connection_types: SUPPORTED_CONNECTION_TYPES
                .iter()
                .map(ToString::to_string)
                .collect(),
            ext: HandshakeExt {
                subscription_id: subscription_id.into(),
            },
        }
    }
}

/// Connect request, the long-poll heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Always `/meta/connect`.
    pub channel: String,
    /// Sequence counter value.
    pub id: String,
    /// Server-assigned clientId.
    #[serde(rename = "clientId")]
    pub client_id: String,
    /// Transport in use.
    #[serde(rename = "connectionType")]
    pub connection_type: String,
}

impl ConnectRequest {
    /// Build a connect request.
    #[must_use]
    pub fn new(id: u64, client_id: impl Into<String>) -> Self {
        Self {
            channel: MetaChannel::Connect.as_str().to_string(),
            id: id.to_string(),
            client_id: client_id.into(),
            connection_type: "websocket".to_string(),
        }
    }
}

/// Subscribe or unsubscribe control request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// `/meta/subscribe` or `/meta/unsubscribe`.
    pub channel: String,
    /// Sequence counter value.
    pub id: String,
    /// Server-assigned clientId.
    #[serde(rename = "clientId")]
    pub client_id: String,
    /// Channel path to (un)subscribe.
    pub subscription: String,
}

impl SubscriptionRequest {
    /// Build a subscribe request for a channel path.
    #[must_use]
    pub fn subscribe(id: u64, client_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            channel: MetaChannel::Subscribe.as_str().to_string(),
            id: id.to_string(),
            client_id: client_id.into(),
            subscription: path.into(),
        }
    }

    /// Build an unsubscribe request for a channel path.
    #[must_use]
    pub fn unsubscribe(id: u64, client_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            channel: MetaChannel::Unsubscribe.as_str().to_string(),
            id: id.to_string(),
            client_id: client_id.into(),
            subscription: path.into(),
        }
    }
}

/// Graceful disconnect request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectRequest {
    /// Always `/meta/disconnect`.
    pub channel: String,
    /// Sequence counter value.
    pub id: String,
    /// Server-assigned clientId.
    #[serde(rename = "clientId")]
    pub client_id: String,
}

impl DisconnectRequest {
    /// Build a disconnect request.
    #[must_use]
    pub fn new(id: u64, client_id: impl Into<String>) -> Self {
        Self {
            channel: MetaChannel::Disconnect.as_str().to_string(),
            id: id.to_string(),
            client_id: client_id.into(),
        }
    }
}
