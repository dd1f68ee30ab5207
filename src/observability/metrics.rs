//! Thread-safe metrics collection
//!
//! Atomic counters for the ingestion path, the MQTT session and change
//! delivery, plus a bounded window of per-message processing times.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Processing-time samples kept for percentiles
const MAX_PROCESSING_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Ingestion
    messages_received: AtomicU64,
    topic_mismatches: AtomicU64,
    decode_errors: AtomicU64,
    anomalies: AtomicU64,
    messages_reconciled: AtomicU64,
    devices_tracked: AtomicU64,

    // Change delivery
    change_sets_emitted: AtomicU64,
    change_sets_suppressed: AtomicU64,
    notifications_delivered: AtomicU64,
    notifications_dropped: AtomicU64,
    stale_transitions: AtomicU64,

    // MQTT session
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    last_message_at: AtomicU64,
    connection_start_time: AtomicU64,

    processing_times: Mutex<Vec<u64>>, // microseconds

    // Lifecycle
    bridge_state: Mutex<String>,
    uptime_start: AtomicU64,
    state_transitions: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            topic_mismatches: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            messages_reconciled: AtomicU64::new(0),
            devices_tracked: AtomicU64::new(0),
            change_sets_emitted: AtomicU64::new(0),
            change_sets_suppressed: AtomicU64::new(0),
            notifications_delivered: AtomicU64::new(0),
            notifications_dropped: AtomicU64::new(0),
            stale_transitions: AtomicU64::new(0),
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            last_message_at: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            processing_times: Mutex::new(Vec::new()),
            bridge_state: Mutex::new("initializing".to_string()),
            uptime_start: AtomicU64::new(current_timestamp()),
            state_transitions: AtomicU64::new(0),
        }
    }

    // Ingestion metrics
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.last_message_at
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn topic_mismatch(&self) {
        self.topic_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn anomalies_recorded(&self, count: u64) {
        self.anomalies.fetch_add(count, Ordering::Relaxed);
    }

    pub fn message_reconciled(&self, duration: Duration) {
        self.messages_reconciled.fetch_add(1, Ordering::Relaxed);
        self.record_processing_time(duration);
    }

    pub fn set_devices_tracked(&self, count: usize) {
        self.devices_tracked.store(count as u64, Ordering::Relaxed);
    }

    fn record_processing_time(&self, duration: Duration) {
        let mut times = self
            .processing_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        times.push(duration.as_micros() as u64);
        if times.len() > MAX_PROCESSING_SAMPLES {
            times.remove(0);
        }
    }

    // Change delivery metrics
    pub fn change_set_emitted(&self) {
        self.change_sets_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn change_set_suppressed(&self) {
        self.change_sets_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notifications_delivered(&self, count: u64) {
        self.notifications_delivered
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn notifications_dropped(&self, count: u64) {
        self.notifications_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn stale_transition(&self) {
        self.stale_transitions.fetch_add(1, Ordering::Relaxed);
    }

    // MQTT metrics
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn mqtt_connection_lost(&self) {
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn is_mqtt_connected(&self) -> bool {
        self.mqtt_connected.load(Ordering::Relaxed)
    }

    // Lifecycle metrics
    pub fn set_bridge_state(&self, state: &str) {
        let mut current = self
            .bridge_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            self.state_transitions.fetch_add(1, Ordering::Relaxed);
            *current = state.to_string();
        }
    }

    pub fn bridge_state(&self) -> String {
        self.bridge_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.messages_received,
            &self.topic_mismatches,
            &self.decode_errors,
            &self.anomalies,
            &self.messages_reconciled,
            &self.devices_tracked,
            &self.change_sets_emitted,
            &self.change_sets_suppressed,
            &self.notifications_delivered,
            &self.notifications_dropped,
            &self.stale_transitions,
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.last_message_at,
            &self.connection_start_time,
            &self.state_transitions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        self.processing_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self
            .bridge_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = "initializing".to_string();
    }

    /// Average, p50, p95 and p99 of recent processing times (pure function)
    fn processing_time_statistics(&self) -> (f64, f64, f64, f64) {
        let mut sorted_times = self
            .processing_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if sorted_times.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }
        sorted_times.sort_unstable();

        let avg = sorted_times.iter().sum::<u64>() as f64 / sorted_times.len() as f64;
        (
            avg,
            percentile(&sorted_times, 50.0),
            percentile(&sorted_times, 95.0),
            percentile(&sorted_times, 99.0),
        )
    }

    fn connection_duration(&self, now: u64) -> u64 {
        if !self.mqtt_connected.load(Ordering::Relaxed) {
            return 0;
        }
        let start_time = self.connection_start_time.load(Ordering::Relaxed);
        if start_time > 0 {
            now.saturating_sub(start_time)
        } else {
            0
        }
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_processing_time_us, p50, p95, p99) = self.processing_time_statistics();

        MetricsSnapshot {
            ingest: IngestMetrics {
                messages_received: self.messages_received.load(Ordering::Relaxed),
                topic_mismatches: self.topic_mismatches.load(Ordering::Relaxed),
                decode_errors: self.decode_errors.load(Ordering::Relaxed),
                anomalies: self.anomalies.load(Ordering::Relaxed),
                messages_reconciled: self.messages_reconciled.load(Ordering::Relaxed),
                devices_tracked: self.devices_tracked.load(Ordering::Relaxed),
                avg_processing_time_us,
                processing_time_p50_us: p50,
                processing_time_p95_us: p95,
                processing_time_p99_us: p99,
            },
            changes: ChangeMetrics {
                change_sets_emitted: self.change_sets_emitted.load(Ordering::Relaxed),
                change_sets_suppressed: self.change_sets_suppressed.load(Ordering::Relaxed),
                notifications_delivered: self.notifications_delivered.load(Ordering::Relaxed),
                notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
                stale_transitions: self.stale_transitions.load(Ordering::Relaxed),
            },
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                last_message_at: self.last_message_at.load(Ordering::Relaxed),
                connection_duration_seconds: self.connection_duration(now),
            },
            lifecycle: LifecycleMetrics {
                current_state: self.bridge_state(),
                uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub ingest: IngestMetrics,
    pub changes: ChangeMetrics,
    pub mqtt: MqttMetrics,
    pub lifecycle: LifecycleMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct IngestMetrics {
    pub messages_received: u64,
    pub topic_mismatches: u64,
    pub decode_errors: u64,
    pub anomalies: u64,
    pub messages_reconciled: u64,
    pub devices_tracked: u64,
    pub avg_processing_time_us: f64,
    pub processing_time_p50_us: f64,
    pub processing_time_p95_us: f64,
    pub processing_time_p99_us: f64,
}

#[derive(Debug, Serialize)]
pub struct ChangeMetrics {
    pub change_sets_emitted: u64,
    pub change_sets_suppressed: u64,
    pub notifications_delivered: u64,
    pub notifications_dropped: u64,
    pub stale_transitions: u64,
}

#[derive(Debug, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub last_message_at: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct LifecycleMetrics {
    pub current_state: String,
    pub uptime_seconds: u64,
    pub state_transitions: u64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_value = sorted_data[index.floor() as usize] as f64;
        let upper_value = sorted_data[index.ceil() as usize] as f64;
        lower_value + (upper_value - lower_value) * index.fract()
    }
}
