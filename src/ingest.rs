//! Ingestion pipeline
//!
//! One worker drains the transport's message channel and takes each message
//! through topic matching, decoding, reconciliation, and notification. A
//! failure at any step only affects the message at hand.

use crate::device_span;
use crate::notify::{ChangeNotifier, DeliveryReport};
use crate::observability::metrics::metrics;
use crate::protocol::{DecodeError, PayloadDecoder, RawMessage, ReconciliationAnomaly, TopicMatcher};
use crate::state::{ChangeSet, DeviceRegistry};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Queue depth between the transport and the ingest worker
pub const DEFAULT_INGEST_CAPACITY: usize = 256;

/// What happened to one raw message
#[derive(Debug, PartialEq)]
pub enum IngestOutcome {
    /// Topic matched no device pattern
    Ignored,
    /// Payload could not be decoded; no state was touched
    DecodeFailed(DecodeError),
    /// Reconciled without changing anything
    Unchanged,
    /// Reconciled and published
    Reconciled {
        change_set: ChangeSet,
        anomalies: Vec<ReconciliationAnomaly>,
    },
}

/// Wires topic matcher, decoder, registry and notifier together
#[derive(Clone)]
pub struct IngestPipeline {
    matcher: TopicMatcher,
    registry: DeviceRegistry,
    notifier: ChangeNotifier,
}

impl IngestPipeline {
    pub fn new(matcher: TopicMatcher, registry: DeviceRegistry, notifier: ChangeNotifier) -> Self {
        Self {
            matcher,
            registry,
            notifier,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Process one message end to end
    pub fn process_message(&self, message: RawMessage) -> IngestOutcome {
        metrics().message_received();

        let Some(matched) = self.matcher.match_topic(&message.topic) else {
            trace!(topic = %message.topic, "Ignoring message on unrelated topic");
            metrics().topic_mismatch();
            return IngestOutcome::Ignored;
        };

        let span = device_span!(device_id = %matched.device_id, topic = %message.topic);
        let _enter = span.enter();
        let started = Instant::now();

        let decoded = match PayloadDecoder::decode(&message.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    device_id = %matched.device_id,
                    payload_len = message.payload.len(),
                    error = %e,
                    "Dropping undecodable payload"
                );
                metrics().decode_error();
                return IngestOutcome::DecodeFailed(e);
            }
        };

        for anomaly in &decoded.anomalies {
            debug!(
                field = anomaly.field.as_str(),
                vendor_key = %anomaly.vendor_key,
                raw = %anomaly.raw,
                reason = %anomaly.reason,
                "Recognized field ignored for this message"
            );
        }
        metrics().anomalies_recorded(decoded.anomalies.len() as u64);

        // Published under the device lock, in order with staleness transitions
        let mut report = DeliveryReport::default();
        let change_set = self.registry.upsert_and_reconcile_with(
            &matched.device_id,
            &decoded,
            message.received_at,
            |change_set| report = self.notifier.notify(change_set),
        );
        metrics().message_reconciled(started.elapsed());
        metrics().set_devices_tracked(self.registry.device_count());

        if change_set.is_empty() {
            return IngestOutcome::Unchanged;
        }

        debug!(
            changed_fields = change_set.changed_fields.len(),
            delivered = report.delivered,
            dropped = report.dropped,
            "Published change-set"
        );

        IngestOutcome::Reconciled {
            change_set,
            anomalies: decoded.anomalies,
        }
    }

    /// Drain `receiver` until shutdown, then finish whatever is already queued
    pub async fn run(
        self,
        mut receiver: mpsc::Receiver<RawMessage>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> usize {
        info!("Ingest pipeline running, waiting for messages");
        let mut processed = 0usize;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                message = receiver.recv() => match message {
                    Some(message) => {
                        self.process_message(message);
                        processed += 1;
                    }
                    None => {
                        info!(processed, "Message channel closed, ingest pipeline stopping");
                        return processed;
                    }
                }
            }
        }

        receiver.close();
        let mut drained = 0usize;
        while let Some(message) = receiver.recv().await {
            self.process_message(message);
            drained += 1;
        }

        info!(processed = processed + drained, drained, "Ingest pipeline stopped");
        processed + drained
    }
}
