//! Wordclock Core - Hardware-independent lifecycle logic for the ESP32 word clock
//!
//! This crate contains the connectivity state machines (network acquisition,
//! BLE provisioning, fleet registration, heartbeat, OTA pipeline) and the
//! per-tick runtime orchestrator. Everything that touches the chip is behind a
//! trait so the logic can be tested on the host platform without hardware.

pub mod clock;
pub mod config;
pub mod heartbeat;
pub mod http;
pub mod identity;
pub mod led_events;
pub mod network;
pub mod ota;
pub mod persistence;
pub mod provisioning;
pub mod registration;
pub mod runtime;
pub mod settings;
pub mod system;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::{OtaProtocol, ProductConfig, UpdateChannel};
pub use runtime::{Board, Runtime};
