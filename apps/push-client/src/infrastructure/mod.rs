//! Infrastructure Layer
//!
//! Adapters binding the domain to the outside world: the Bayeux push
//! transport, the session authenticator, the HTTP client, event
//! dispatch, configuration, and logging.

pub mod auth;
pub mod bayeux;
pub mod config;
pub mod dispatch;
pub mod rest;
pub mod telemetry;
