//! Delivery coordinator service: configuration, wiring and lifecycle.
//!
//! The binary in `main.rs` is a thin shell over this library, so the wiring
//! can be exercised in tests with in-memory collaborators.

pub mod app;
pub mod config;

pub use app::{Collaborators, DeliveryApp, shutdown_signal};
pub use config::{Config, ConfigError};
