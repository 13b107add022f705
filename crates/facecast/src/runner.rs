//! Fixed-period tick loop driving detection and publishing.
//!
//! Detection runs on its own task so a slow inference call never blocks the
//! ticker. The runner holds at most one detection in flight; what happens to
//! ticks that fire meanwhile is decided by [`OverlapPolicy`]. Publishing
//! happens on the runner task only, so the change filter has a single writer.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::detection::{DetectionRecord, DetectionSource};
use crate::error::{FacecastError, Result};
use crate::publisher::{PublishStats, Publisher};

/// Handling of ticks that fire while a detection is still running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Drop the tick.
    #[default]
    Skip,
    /// Remember one tick and run it as soon as the detection completes.
    Coalesce,
}

/// Counters for a runner session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunnerStats {
    /// Detection passes started
    pub ticks_run: u64,
    /// Ticks dropped because a detection was in flight
    pub ticks_skipped: u64,
    /// Deferred ticks run right after a detection completed
    pub ticks_coalesced: u64,
    /// Ticks where the source was not ready
    pub source_unavailable: u64,
    /// Ticks where the source failed
    pub source_errors: u64,
}

/// Final statistics returned by [`TickRunner::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub runner: RunnerStats,
    pub publish: PublishStats,
}

type DetectionOutput = (
    Box<dyn DetectionSource>,
    Result<Option<Vec<DetectionRecord>>>,
);

/// Drives a [`DetectionSource`] and a [`Publisher`] on a fixed period.
pub struct TickRunner {
    /// `None` while the source is lent to an in-flight detection task
    source: Option<Box<dyn DetectionSource>>,
    publisher: Publisher,
    tick_period: Duration,
    overlap: OverlapPolicy,
    stats: RunnerStats,
}

impl TickRunner {
    pub fn new(
        source: Box<dyn DetectionSource>,
        publisher: Publisher,
        tick_period: Duration,
    ) -> Self {
        Self {
            source: Some(source),
            publisher,
            tick_period,
            overlap: OverlapPolicy::default(),
            stats: RunnerStats::default(),
        }
    }

    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    /// Run until cancelled or until the source is exhausted.
    pub async fn run(mut self, cancel: CancellationToken) -> RunSummary {
        let source_name = self
            .source
            .as_ref()
            .map(|s| s.name().to_string())
            .unwrap_or_default();
        info!(
            "Starting tick runner for {} every {}ms ({:?} on overlap)",
            source_name,
            self.tick_period.as_millis(),
            self.overlap
        );

        let mut ticker = tokio::time::interval(self.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: Option<JoinHandle<DetectionOutput>> = None;
        let mut deferred = false;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Tick runner cancelled");
                    break;
                }

                joined = wait_for(&mut in_flight) => {
                    in_flight = None;
                    let (source, result) = match joined {
                        Ok(output) => output,
                        Err(e) => {
                            error!("Detection task failed: {}", e);
                            break;
                        }
                    };
                    self.source = Some(source);
                    if !self.handle_detection(result) {
                        break;
                    }
                    if deferred {
                        deferred = false;
                        self.stats.ticks_coalesced += 1;
                        in_flight = self.start_detection();
                    }
                }

                _ = ticker.tick() => {
                    if in_flight.is_some() {
                        match self.overlap {
                            OverlapPolicy::Skip => {
                                trace!("Detection still running, skipping tick");
                                self.stats.ticks_skipped += 1;
                            }
                            OverlapPolicy::Coalesce => {
                                if deferred {
                                    self.stats.ticks_skipped += 1;
                                }
                                deferred = true;
                            }
                        }
                        continue;
                    }
                    in_flight = self.start_detection();
                }
            }
        }

        if let Some(task) = in_flight {
            task.abort();
        }

        let summary = RunSummary {
            runner: self.stats,
            publish: self.publisher.stats(),
        };
        info!("Tick runner stopped: {:?}", summary);
        summary
    }

    fn start_detection(&mut self) -> Option<JoinHandle<DetectionOutput>> {
        let mut source = self.source.take()?;
        self.stats.ticks_run += 1;
        Some(tokio::spawn(async move {
            // A panicking source must still come back to the runner.
            let result = AssertUnwindSafe(source.detect())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(FacecastError::other("detection panicked")));
            (source, result)
        }))
    }

    /// Returns `false` once the source is exhausted.
    fn handle_detection(&mut self, result: Result<Option<Vec<DetectionRecord>>>) -> bool {
        match result {
            Ok(Some(records)) => {
                let report = self.publisher.publish_tick(&records);
                trace!(
                    records = records.len(),
                    sent = report.sent,
                    suppressed = report.suppressed,
                    dropped = report.dropped,
                    "Tick published"
                );
                true
            }
            Ok(None) => {
                info!("Detection source exhausted");
                false
            }
            Err(FacecastError::SourceUnavailable(reason)) => {
                debug!("Detection source not ready: {}", reason);
                self.stats.source_unavailable += 1;
                true
            }
            Err(e) => {
                warn!("Detection failed: {}", e);
                self.stats.source_errors += 1;
                true
            }
        }
    }
}

async fn wait_for(
    task: &mut Option<JoinHandle<DetectionOutput>>,
) -> std::result::Result<DetectionOutput, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
