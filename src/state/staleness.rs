//! Background staleness sweep
//!
//! Runs on its own timer, independent of message arrival, and is the only
//! writer of `Offline` transitions.

use super::registry::DeviceRegistry;
use crate::notify::ChangeNotifier;
use crate::observability::metrics::metrics;
use chrono::{TimeDelta, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Periodically marks silent devices offline
pub struct StalenessSweeper {
    registry: DeviceRegistry,
    notifier: ChangeNotifier,
    threshold: Duration,
    sweep_interval: Duration,
}

impl StalenessSweeper {
    pub fn new(
        registry: DeviceRegistry,
        notifier: ChangeNotifier,
        threshold: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            registry,
            notifier,
            threshold,
            sweep_interval,
        }
    }

    /// One sweep at the current time; returns the number of devices that went offline
    pub fn sweep_once(&self) -> usize {
        let threshold = TimeDelta::from_std(self.threshold).unwrap_or(TimeDelta::MAX);
        self.registry
            .sweep_stale_with(Utc::now(), threshold, |change_set| {
                metrics().stale_transition();
                self.notifier.notify(change_set);
            })
            .len()
    }

    /// Spawn the sweep loop; it exits when `shutdown_rx` flips to true
    pub fn spawn(self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                threshold_secs = self.threshold.as_secs(),
                interval_secs = self.sweep_interval.as_secs(),
                "Staleness sweeper started"
            );

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let offline = self.sweep_once();
                        if offline > 0 {
                            debug!(offline, "Staleness sweep completed");
                        }
                    }
                }
            }

            info!("Staleness sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DecodedTelemetry, DeviceId, FieldName, FieldValue};
    use crate::state::ConnectionStatus;

    fn battery(value: i64) -> DecodedTelemetry {
        DecodedTelemetry::default().with_field(FieldName::BatteryPercent, FieldValue::Integer(value))
    }

    #[test]
    fn test_sweep_once_notifies_transitions() {
        let registry = DeviceRegistry::new();
        let notifier = ChangeNotifier::new(8);
        let mut observer = notifier.register();

        let long_ago = Utc::now() - chrono::Duration::minutes(10);
        registry.upsert_and_reconcile(&DeviceId::new("old"), &battery(30), long_ago);
        registry.upsert_and_reconcile(&DeviceId::new("fresh"), &battery(70), Utc::now());

        let sweeper = StalenessSweeper::new(
            registry.clone(),
            notifier,
            Duration::from_secs(300),
            Duration::from_secs(30),
        );
        assert_eq!(sweeper.sweep_once(), 1);
        assert_eq!(sweeper.sweep_once(), 0);

        let change_set = observer.try_recv().unwrap();
        assert_eq!(change_set.device_id.as_str(), "old");
        assert!(observer.try_recv().is_none());
        assert_eq!(
            registry.get("old").unwrap().connection_status,
            ConnectionStatus::Offline
        );
        assert_eq!(
            registry.get("fresh").unwrap().connection_status,
            ConnectionStatus::Online
        );
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = StalenessSweeper::new(
            DeviceRegistry::new(),
            ChangeNotifier::default(),
            Duration::from_secs(300),
            Duration::from_millis(10),
        );
        let handle = sweeper.spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
