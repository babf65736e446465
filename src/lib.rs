//! ctr-daq application crate.
//!
//! Loads configuration, sets up logging and drives the client acquisition API
//! against a board. The driver and client live in their own crates and are
//! re-exported here.
//!
//! - [`config`] - figment-based configuration with environment overrides
//! - [`logging`] - tracing-subscriber initialization

pub mod config;
pub mod logging;

pub use ctr_client;
pub use ctr_driver;
