//! Health check and device status HTTP server
//!
//! Provides HTTP endpoints for monitoring the bridge, plus a read-only JSON
//! view over the device registry for tooling that cannot subscribe to
//! change notifications.

use crate::observability::metrics::metrics;
use crate::state::{DeviceInfo, DeviceRegistry, DeviceState, MowerActivity};
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// Seconds without any broker traffic before ingestion is reported stale
const INGEST_STALENESS_THRESHOLD_SECONDS: u64 = 900;

/// HTTP health and device status server
pub struct HealthServer {
    port: u16,
    registry: DeviceRegistry,
    manufacturer: String,
}

impl HealthServer {
    pub fn new(port: u16, registry: DeviceRegistry, manufacturer: impl Into<String>) -> Self {
        Self {
            port,
            registry,
            manufacturer: manufacturer.into(),
        }
    }

    /// All routes, without binding a socket
    pub fn routes(
        self: &Arc<Self>,
    ) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let health_server = Arc::clone(self);
        let devices_server = Arc::clone(self);
        let device_server = Arc::clone(self);

        // GET /health - overall status with individual checks
        let health_route = warp::path!("health").and(warp::get()).and_then(move || {
            let server = Arc::clone(&health_server);
            async move {
                let status = server.get_health_status();
                let code = if status.status == "healthy" {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<Response, Infallible>(
                    warp::reply::with_status(warp::reply::json(&status), code).into_response(),
                )
            }
        });

        // GET /metrics - complete metrics export
        let metrics_route = warp::path!("metrics").and(warp::get()).and_then(|| async {
            Ok::<Response, Infallible>(warp::reply::json(&metrics().get_metrics()).into_response())
        });

        // GET /ready - broker session is up
        let ready_route = warp::path!("ready").and(warp::get()).and_then(|| async {
            let ready = metrics().is_mqtt_connected();
            let response = ReadinessResponse {
                ready,
                timestamp: current_timestamp(),
            };
            let code = if ready {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            Ok::<Response, Infallible>(
                warp::reply::with_status(warp::reply::json(&response), code).into_response(),
            )
        });

        // GET /live - process is running
        let live_route = warp::path!("live").and(warp::get()).and_then(|| async {
            let response = LivenessResponse {
                alive: true,
                timestamp: current_timestamp(),
            };
            Ok::<Response, Infallible>(warp::reply::json(&response).into_response())
        });

        // GET /devices - every known device
        let devices_route = warp::path!("devices").and(warp::get()).and_then(move || {
            let server = Arc::clone(&devices_server);
            async move {
                let devices: Vec<DeviceView> = server
                    .registry
                    .list()
                    .into_iter()
                    .map(|state| DeviceView::new(state, &server.manufacturer))
                    .collect();
                Ok::<Response, Infallible>(warp::reply::json(&devices).into_response())
            }
        });

        // GET /devices/{id} - one device
        let device_route = warp::path!("devices" / String)
            .and(warp::get())
            .and_then(move |id: String| {
                let server = Arc::clone(&device_server);
                async move {
                    let response = match server.registry.get(&id) {
                        Some(state) => {
                            warp::reply::json(&DeviceView::new(state, &server.manufacturer))
                                .into_response()
                        }
                        None => warp::reply::with_status(
                            warp::reply::json(&ErrorResponse {
                                error: format!("Unknown device: {id}"),
                                timestamp: current_timestamp(),
                            }),
                            StatusCode::NOT_FOUND,
                        )
                        .into_response(),
                    };
                    Ok::<Response, Infallible>(response)
                }
            });

        // GET / - endpoint index
        let root_route = warp::path::end().and(warp::get()).and_then(|| async {
            let endpoints: HashMap<&str, &str> = [
                ("/health", "Overall health status with detailed checks"),
                ("/metrics", "Ingestion, delivery and MQTT counters"),
                ("/ready", "Readiness check (broker session established)"),
                ("/live", "Liveness check"),
                ("/devices", "Reconciled state of every known device"),
                ("/devices/{id}", "Reconciled state of one device"),
            ]
            .into_iter()
            .collect();
            Ok::<Response, Infallible>(
                warp::reply::json(&ApiDocumentationResponse { endpoints }).into_response(),
            )
        });

        health_route
            .or(metrics_route)
            .unify()
            .or(ready_route)
            .unify()
            .or(live_route)
            .unify()
            .or(devices_route)
            .unify()
            .or(device_route)
            .unify()
            .or(root_route)
            .unify()
            .with(warp::cors().allow_any_origin())
    }

    /// Serve until `shutdown_rx` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!("Starting health server on port {}", self.port);

        let shutdown = async move {
            while shutdown_rx.changed().await.is_ok() {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        };

        match warp::serve(self.routes()).try_bind_with_graceful_shutdown(addr, shutdown) {
            Ok((_, server)) => {
                server.await;
                tracing::info!("Health server stopped");
            }
            Err(e) => tracing::error!("Failed to bind health server on {}: {}", addr, e),
        }
    }

    fn get_health_status(&self) -> HealthStatus {
        let snapshot = metrics().get_metrics();
        let now = current_timestamp();

        let mut checks = HashMap::new();
        checks.insert("mqtt".to_string(), check_mqtt_health(snapshot.mqtt.connected, now));
        checks.insert(
            "ingestion".to_string(),
            check_ingest_health(snapshot.mqtt.last_message_at, now),
        );

        let overall_healthy = checks.values().all(|check| check.status == "healthy");

        HealthStatus {
            status: if overall_healthy { "healthy" } else { "degraded" }.to_string(),
            timestamp: now,
            uptime_seconds: snapshot.lifecycle.uptime_seconds,
            devices_tracked: self.registry.device_count(),
            checks,
        }
    }
}

fn check_mqtt_health(connected: bool, now: u64) -> HealthCheck {
    if connected {
        HealthCheck {
            status: "healthy".to_string(),
            message: Some("MQTT connection established".to_string()),
            last_check: now,
        }
    } else {
        HealthCheck {
            status: "unhealthy".to_string(),
            message: Some("MQTT connection failed or disconnected".to_string()),
            last_check: now,
        }
    }
}

fn check_ingest_health(last_message_at: u64, now: u64) -> HealthCheck {
    if last_message_at == 0 {
        HealthCheck {
            status: "healthy".to_string(),
            message: Some("No messages received yet".to_string()),
            last_check: now,
        }
    } else if now.saturating_sub(last_message_at) > INGEST_STALENESS_THRESHOLD_SECONDS {
        let silent_for = now.saturating_sub(last_message_at);
        HealthCheck {
            status: "stale".to_string(),
            message: Some(format!("No broker messages for {silent_for} seconds")),
            last_check: now,
        }
    } else {
        HealthCheck {
            status: "healthy".to_string(),
            message: Some("Recent broker traffic".to_string()),
            last_check: now,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

/// JSON view of one device for the status endpoints
#[derive(Debug, Serialize)]
pub struct DeviceView {
    #[serde(flatten)]
    pub state: DeviceState,
    pub activity: Option<MowerActivity>,
    pub device_info: DeviceInfo,
}

impl DeviceView {
    pub fn new(state: DeviceState, manufacturer: &str) -> Self {
        Self {
            activity: state.activity(),
            device_info: state.device_info(manufacturer),
            state,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    uptime_seconds: u64,
    devices_tracked: usize,
    checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct ApiDocumentationResponse {
    endpoints: HashMap<&'static str, &'static str>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    timestamp: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
