//! The agent control loop.
//!
//! ```text
//! Idle ─poll─▶ Sampling ─▶ Idle
//! Idle ─report─▶ Reporting ─ok─▶ Idle
//!                Reporting ─retriable─▶ BackingOff ─▶ Reporting
//!                Reporting ─fatal / exhausted─▶ Idle   (batch dropped)
//! ```
//!
//! Cancellation stops both tickers and aborts any in-flight delivery or
//! backoff sleep. Pending samples are not flushed.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use tally_core::{Metric, RetrySchedule};

use crate::sampler::Sampler;
use crate::transport::{DeliveryError, Transport};

/// Counters describing what a run did; returned when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub polls: u64,
    pub batches_delivered: u64,
    pub batches_dropped: u64,
}

pub struct Agent<T> {
    sampler: Sampler,
    transport: T,
    retry: RetrySchedule,
    poll_interval: Duration,
    report_interval: Duration,
    pending: Vec<Metric>,
}

impl<T: Transport> Agent<T> {
    pub fn new(transport: T, poll_interval: Duration, report_interval: Duration) -> Self {
        Self {
            sampler: Sampler::new(),
            transport,
            retry: RetrySchedule::default(),
            poll_interval,
            report_interval,
            pending: Vec::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetrySchedule) -> Self {
        self.retry = retry;
        self
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> RunSummary {
        let mut summary = RunSummary::default();
        let start = Instant::now();
        let mut poll = interval_at(start + self.poll_interval, self.poll_interval);
        let mut report = interval_at(start + self.report_interval, self.report_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            report_ms = self.report_interval.as_millis() as u64,
            "agent loop started"
        );

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    let batch = self.sampler.sample();
                    debug!(samples = batch.len(), "polled");
                    self.pending.extend(batch);
                    summary.polls += 1;
                }
                _ = report.tick() => {
                    if self.pending.is_empty() {
                        debug!("nothing to report");
                        continue;
                    }
                    let batch = std::mem::take(&mut self.pending);
                    tokio::select! {
                        result = self.deliver(&batch) => match result {
                            Ok(()) => summary.batches_delivered += 1,
                            Err(e) => {
                                warn!(error = %e, records = batch.len(), "dropping batch");
                                summary.batches_dropped += 1;
                            }
                        },
                        _ = shutdown.changed() => {
                            info!("shutdown during delivery");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        info!(
            polls = summary.polls,
            delivered = summary.batches_delivered,
            dropped = summary.batches_dropped,
            unsent = self.pending.len(),
            "agent loop stopped"
        );
        summary
    }

    /// Deliver one batch, backing off on retriable failures.
    pub async fn deliver(&self, batch: &[Metric]) -> Result<(), DeliveryError> {
        self.retry
            .run("deliver batch", DeliveryError::is_retriable, || {
                self.transport.deliver(batch)
            })
            .await
    }
}
