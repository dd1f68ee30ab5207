//! Observability: structured logging, metrics and the status HTTP server

pub mod health;
pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use health::{DeviceView, HealthServer};
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{device_span, mqtt_span};
