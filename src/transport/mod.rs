//! Transport layer for device telemetry
//!
//! The bridge only ever receives: the transport delivers raw broker messages
//! into a channel and keeps its session alive. Publishing commands back to the
//! mowers is out of scope.

use crate::protocol::RawMessage;
use tokio::sync::mpsc;

pub mod mqtt;

pub use mqtt::ConnectionState;

/// Transport trait for receiving device telemetry
///
/// Abstracts the broker connection so the bridge can be driven by a mock in
/// tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Start the session; connection loss afterwards is retried internally
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Release subscriptions and the session
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Channel that receives every accepted message
    fn set_message_sender(&self, sender: mpsc::Sender<RawMessage>);

    fn is_connected(&self) -> bool;

    fn connection_state(&self) -> ConnectionState;
}
