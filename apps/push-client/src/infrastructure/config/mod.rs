//! Configuration Module
//!
//! Configuration loading for the push client.

mod settings;

pub use settings::{
    AuthSettings, BackoffSettings, ClientConfig, ConfigError, LivenessSettings,
};
