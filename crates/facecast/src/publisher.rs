//! Per-record publishing: format, filter, send.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::connection::Transport;
use crate::detection::DetectionRecord;
use crate::error::Result;
use crate::filter::ChangeFilter;
use crate::message::EventFormatter;

/// What happens to a message the filter accepted but the transport refused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// The message is lost. The filter snapshot already holds it, so an
    /// identical message will not be sent after reconnecting either; only a
    /// changed message goes out again.
    #[default]
    FireAndForget,
    /// Keep the latest refused message and send it at the start of the first
    /// tick that finds the connection open again.
    ResendLatestOnReconnect,
}

/// Result of publishing a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the transport
    Sent,
    /// Identical to the previous message
    Suppressed,
    /// Accepted by the filter, refused by the transport
    Dropped,
}

/// Running totals for a publisher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishStats {
    pub sent: u64,
    pub suppressed: u64,
    pub dropped: u64,
    /// Held messages delivered after a reconnect
    pub resent: u64,
    /// Records that could not be serialized
    pub failed: u64,
}

/// Counts for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sent: usize,
    pub suppressed: usize,
    pub dropped: usize,
    pub failed: usize,
}

impl TickReport {
    fn record(&mut self, outcome: PublishOutcome) {
        match outcome {
            PublishOutcome::Sent => self.sent += 1,
            PublishOutcome::Suppressed => self.suppressed += 1,
            PublishOutcome::Dropped => self.dropped += 1,
        }
    }
}

/// Runs Formatter → Change Filter → Transport for each detection record.
pub struct Publisher {
    formatter: EventFormatter,
    filter: ChangeFilter,
    transport: Arc<dyn Transport>,
    policy: DeliveryPolicy,
    pending: Option<String>,
    stats: PublishStats,
}

impl Publisher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_formatter(transport, EventFormatter::new())
    }

    pub fn with_formatter(transport: Arc<dyn Transport>, formatter: EventFormatter) -> Self {
        Self {
            formatter,
            filter: ChangeFilter::new(),
            transport,
            policy: DeliveryPolicy::default(),
            pending: None,
            stats: PublishStats::default(),
        }
    }

    pub fn with_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    pub fn stats(&self) -> PublishStats {
        self.stats
    }

    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    /// Publish every record of one tick, in order.
    ///
    /// A record that fails to serialize is counted and skipped; the rest of
    /// the tick still goes out.
    pub fn publish_tick(&mut self, records: &[DetectionRecord]) -> TickReport {
        self.flush_pending();

        let mut report = TickReport::default();
        for record in records {
            match self.publish(record) {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    warn!("Failed to format detection record: {}", e);
                    self.stats.failed += 1;
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Publish a single record.
    pub fn publish(&mut self, record: &DetectionRecord) -> Result<PublishOutcome> {
        let message = self.formatter.format(record);
        let key = message.content_key()?;
        let payload = message.to_json()?;
        Ok(self.dispatch(&key, payload))
    }

    /// Filter and send a serialized message according to the delivery policy.
    ///
    /// `key` is the timestamp-free form compared by the filter. The snapshot
    /// is updated on the decision to send, before the transport is asked;
    /// delivery is never confirmed.
    fn dispatch(&mut self, key: &[u8], payload: String) -> PublishOutcome {
        if !self.filter.should_send(key) {
            trace!("Suppressing unchanged message");
            self.stats.suppressed += 1;
            return PublishOutcome::Suppressed;
        }

        let delivered = match self.policy {
            DeliveryPolicy::FireAndForget => self.transport.send(payload),
            DeliveryPolicy::ResendLatestOnReconnect => {
                if self.transport.send(payload.clone()) {
                    self.pending = None;
                    true
                } else {
                    self.pending = Some(payload);
                    false
                }
            }
        };

        if delivered {
            self.stats.sent += 1;
            PublishOutcome::Sent
        } else {
            debug!(state = %self.transport.state(), "Transport refused message");
            self.stats.dropped += 1;
            PublishOutcome::Dropped
        }
    }

    fn flush_pending(&mut self) {
        if !self.transport.state().can_send() {
            return;
        }
        if let Some(payload) = self.pending.take() {
            if self.transport.send(payload.clone()) {
                debug!("Resent message held while disconnected");
                self.stats.resent += 1;
            } else {
                self.pending = Some(payload);
            }
        }
    }
}
