//! Domain Layer - Core session and subscription state.
//!
//! This layer contains the aggregates the rest of the client coordinates
//! around. All types here are pure Rust with no I/O.

/// Application channel names and path construction.
pub mod channel;

/// Session aggregate and shared session store.
pub mod session;

/// Desired-subscription tracking keyed by channel path.
pub mod subscription;
