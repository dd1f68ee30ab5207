//! Reconciled per-device state
//!
//! [`DeviceRegistry`] is the only shared mutable structure in the bridge. All
//! writes go through [`reconciler`], either from an incoming message or from the
//! [`StalenessSweeper`].

pub mod device;
pub mod reconciler;
pub mod registry;
pub mod staleness;

pub use device::{
    ChangeSet, ConnectionChange, ConnectionStatus, DeviceInfo, DeviceState, FieldChange,
    MowerActivity,
};
pub use registry::DeviceRegistry;
pub use staleness::StalenessSweeper;
