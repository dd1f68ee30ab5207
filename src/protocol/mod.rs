//! Wire-level view of mower telemetry
//!
//! Topic layout, payload decoding and the typed telemetry model. Everything in
//! here is pure; no I/O and no shared state.

pub mod decoder;
pub mod telemetry;
pub mod topics;

pub use decoder::{DecodeError, PayloadDecoder};
pub use telemetry::*;
pub use topics::*;
