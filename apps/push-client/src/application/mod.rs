//! Application Layer - Port definitions.
//!
//! Contracts between the core and its external collaborators.

/// Port interfaces for external systems (REST transport).
pub mod ports;
