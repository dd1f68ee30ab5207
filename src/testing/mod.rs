//! Testing utilities and mock implementations
//!
//! Drive the bridge end to end without an MQTT broker.

pub mod mocks;

pub use mocks::*;
