//! Bayeux Push Transport
//!
//! Wire types, codec, backoff, liveness monitoring, and the WebSocket
//! transport state machine for the server's Bayeux push feed.

pub mod backoff;
pub mod codec;
pub mod liveness;
pub mod messages;
pub mod transport;

pub use backoff::{BackoffConfig, BackoffScheduler};
pub use codec::{BayeuxCodec, CodecError};
pub use liveness::{LivenessConfig, LivenessEvent, LivenessMonitor, LivenessState};
pub use messages::{Advice, BayeuxMessage, MetaChannel};
pub use transport::{
    BayeuxTransport, TransportCommand, TransportConfig, TransportError, TransportEvent,
};
