#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Push Client - Brokerage Streaming API Core
//!
//! Client for a brokerage's session-authenticated REST API and its
//! Bayeux push feed: login with optional TOTP second factor, automatic
//! session renewal, and resilient channel subscriptions over a
//! WebSocket that survives reconnects and re-authentication.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core session and subscription state
//!   - `channel`: Push channel kinds and path construction
//!   - `session`: Credentials, session tokens, session store
//!   - `subscription`: Desired/confirmed subscription registry
//!
//! - **Application**: Port definitions
//!   - `ports`: REST transport interface
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `auth`: Session authenticator with TOTP and renewal
//!   - `bayeux`: Wire types, codec, backoff, liveness, transport
//!   - `dispatch`: Channel-path keyed listener dispatch
//!   - `rest`: HTTP adapter attaching the security token
//!   - `config`: Configuration from code or environment
//!   - `telemetry`: Structured logging setup
//!
//! # Data Flow
//!
//! ```text
//!               ┌──────────────┐   restart on re-auth   ┌─────────────┐
//! REST API ◄───►│Authenticator │───────────────────────►│   Bayeux    │◄──► Push WS
//!               └──────┬───────┘                        │  Transport  │
//!                      │ session                        └──────┬──────┘
//!               ┌──────▼───────┐                               │ data
//!               │ SessionStore │        ┌────────────┐         │
//!               └──────────────┘        │ Dispatcher │◄────────┘
//!                                       └────────────┘──► listeners
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core session and subscription state.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Client facade wiring the pieces together.
pub mod client;

// =============================================================================
// Re-exports
// =============================================================================

// Facade
pub use client::{ClientError, ClientEvent, PushClient, SubscriptionHandle};

// Domain types
pub use domain::channel::{Channel, ChannelError};
pub use domain::session::{Credentials, SecondFactor, Session, SessionStore};
pub use domain::subscription::SubscriptionRegistry;

// Ports
pub use application::ports::{Method, RestError, RestPort};

// Infrastructure config
pub use infrastructure::config::{
    AuthSettings, BackoffSettings, ClientConfig, ConfigError, LivenessSettings,
};

// Bayeux internals (for integration tests)
pub use infrastructure::bayeux::{
    Advice, BackoffConfig, BackoffScheduler, BayeuxCodec, BayeuxMessage, BayeuxTransport,
    CodecError, LivenessConfig, MetaChannel, TransportCommand, TransportConfig, TransportError,
    TransportEvent,
};

// Auth
pub use infrastructure::auth::{AuthError, Authenticator, SessionEvent};

// Dispatch
pub use infrastructure::dispatch::{Dispatcher, Listener, ListenerId};

// Telemetry
pub use infrastructure::telemetry::init as init_telemetry;
