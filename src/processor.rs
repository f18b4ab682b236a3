//! Queue processor and scheduler.
//!
//! The processor owns the FIFO work queue and drives one item at a time
//! through classifier → validator → publisher.
//!
//! # Scheduling
//!
//! [`Processor::run`] multiplexes three triggers on one task:
//!
//! - a processing timer (30s by default) whose every tick becomes its own
//!   [`Processor::tick`] future, so ticks keep firing while an item is mid
//!   pipeline
//! - a drain poll (1s by default) that ends the run once the queue is empty
//!   and nothing is in flight
//! - the run-wide [`Shutdown`] signal
//!
//! # Single flight
//!
//! A tick claims the busy flag with an atomic compare-and-set before it
//! touches the queue. A tick that loses is a no-op, so at most one item is
//! ever in flight and ticks never pile up. A drop guard releases the flag on
//! every exit path, panics included.

use crate::api::Classify;
use crate::config::SchedulerConfig;
use crate::models::{PublishRecord, RawItem};
use crate::publisher::{Publish, PublishOutcome};
use crate::registry::CompanyRegistry;
use crate::shutdown::Shutdown;
use crate::utils::preview;
use crate::validator::{RejectReason, validate};
use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tracing::{debug, error, info, instrument, warn};

/// Where the processor stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessorState {
    /// Items are waiting and nothing is in flight.
    Idle,
    /// One item is in flight.
    Busy,
    /// The queue is empty and nothing is in flight.
    Draining,
    /// Drain confirmed; the timers are gone.
    Done,
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Another item was in flight.
    Skipped,
    /// Nothing was queued.
    Empty,
    Processed(ItemOutcome),
}

/// How one item left the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Published { id: String, ticker: String },
    NoClassification,
    Rejected(RejectReason),
    PublishRejected { status: u16, detail: String },
    PublishFailed(String),
    /// The per-item handler panicked; the run carries on.
    HandlerPanicked(String),
}

impl ItemOutcome {
    /// Stable label for logs.
    pub fn reason(&self) -> &'static str {
        match self {
            ItemOutcome::Published { .. } => "PUBLISHED",
            ItemOutcome::NoClassification => "NO_CLASSIFICATION",
            ItemOutcome::Rejected(RejectReason::UnknownOrMissingTicker) => "UNKNOWN_OR_MISSING_TICKER",
            ItemOutcome::Rejected(RejectReason::MissingRequiredField) => "MISSING_REQUIRED_FIELD",
            ItemOutcome::PublishRejected { .. } => "PUBLISH_REJECTED",
            ItemOutcome::PublishFailed(_) => "PUBLISH_TRANSPORT_ERROR",
            ItemOutcome::HandlerPanicked(_) => "HANDLER_PANICKED",
        }
    }
}

/// Per-outcome counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub processed: usize,
    pub published: usize,
    pub no_classification: usize,
    pub rejected_unknown_ticker: usize,
    pub rejected_missing_field: usize,
    pub publish_rejected: usize,
    pub publish_failed: usize,
    pub panicked: usize,
}

impl RunStats {
    fn record(&mut self, outcome: &ItemOutcome) {
        self.processed += 1;
        match outcome {
            ItemOutcome::Published { .. } => self.published += 1,
            ItemOutcome::NoClassification => self.no_classification += 1,
            ItemOutcome::Rejected(RejectReason::UnknownOrMissingTicker) => {
                self.rejected_unknown_ticker += 1
            }
            ItemOutcome::Rejected(RejectReason::MissingRequiredField) => {
                self.rejected_missing_field += 1
            }
            ItemOutcome::PublishRejected { .. } => self.publish_rejected += 1,
            ItemOutcome::PublishFailed(_) => self.publish_failed += 1,
            ItemOutcome::HandlerPanicked(_) => self.panicked += 1,
        }
    }

    pub fn dropped(&self) -> usize {
        self.processed - self.published
    }
}

/// Result of [`Processor::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub stats: RunStats,
    /// Items still queued when the run ended. Zero unless interrupted.
    pub remaining: usize,
    /// The run was stopped by a shutdown signal rather than by draining.
    pub interrupted: bool,
    pub elapsed_ms: u64,
}

/// Clears the busy flag when dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Processor<C, P> {
    classifier: C,
    publisher: P,
    whitelist: Arc<CompanyRegistry>,
    config: SchedulerConfig,
    shutdown: Shutdown,
    queue: Mutex<VecDeque<RawItem>>,
    busy: AtomicBool,
    done: AtomicBool,
    stats: Mutex<RunStats>,
}

impl<C, P> Processor<C, P>
where
    C: Classify,
    P: Publish,
{
    /// Create an idle processor with an empty queue.
    ///
    /// # Arguments
    ///
    /// * `classifier` - Produces the raw classification for each item
    /// * `publisher` - Receives every record that passes validation
    /// * `whitelist` - Shared, read-only ticker whitelist
    /// * `config` - Tick period and drain poll interval
    /// * `shutdown` - Observed by [`Processor::run`] and triggered when it ends
    ///
    /// # Example
    ///
    /// ```ignore
    /// let processor = Processor::new(classifier, publisher, whitelist, config.scheduler.clone(), shutdown);
    /// processor.enqueue_all(items);
    /// let summary = processor.run().await;
    /// ```
    pub fn new(
        classifier: C,
        publisher: P,
        whitelist: Arc<CompanyRegistry>,
        config: SchedulerConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            classifier,
            publisher,
            whitelist,
            config,
            shutdown,
            queue: Mutex::new(VecDeque::new()),
            busy: AtomicBool::new(false),
            done: AtomicBool::new(false),
            stats: Mutex::new(RunStats::default()),
        }
    }

    /// Append one item. Safe to call while [`Processor::run`] is active.
    pub fn enqueue(&self, item: RawItem) {
        let mut queue = self.queue();
        queue.push_back(item);
        debug!(queued = queue.len(), "Item enqueued");
    }

    pub fn enqueue_all(&self, items: impl IntoIterator<Item = RawItem>) {
        let mut added = 0usize;
        for item in items {
            self.enqueue(item);
            added += 1;
        }
        info!(added, queued = self.queued(), "Queue loaded");
    }

    pub fn queued(&self) -> usize {
        self.queue().len()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ProcessorState {
        if self.done.load(Ordering::Acquire) {
            ProcessorState::Done
        } else if self.is_busy() {
            ProcessorState::Busy
        } else if self.queued() == 0 {
            ProcessorState::Draining
        } else {
            ProcessorState::Idle
        }
    }

    /// Queue empty and nothing in flight.
    pub fn is_drained(&self) -> bool {
        !self.is_busy() && self.queued() == 0
    }

    pub fn stats(&self) -> RunStats {
        self.stats_mut().clone()
    }

    /// Process the head of the queue unless another item is in flight.
    ///
    /// # Returns
    ///
    /// * [`TickOutcome::Skipped`] - another tick holds the busy flag
    /// * [`TickOutcome::Empty`] - nothing queued
    /// * [`TickOutcome::Processed`] - the item's outcome, including a caught panic
    pub async fn tick(&self) -> TickOutcome {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Tick skipped; an item is in flight");
            return TickOutcome::Skipped;
        }
        let _guard = BusyGuard(&self.busy);

        let Some(item) = self.queue().pop_front() else {
            return TickOutcome::Empty;
        };

        let title = preview(&item.title, 50);
        let outcome = match AssertUnwindSafe(self.process_item(item)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(%title, error = %message, "Processing error");
                ItemOutcome::HandlerPanicked(message)
            }
        };

        self.stats_mut().record(&outcome);
        match &outcome {
            ItemOutcome::Published { id, ticker } => {
                info!(%title, %id, %ticker, reason = outcome.reason(), "Item published")
            }
            other => warn!(%title, reason = other.reason(), ?other, "Item dropped"),
        }
        TickOutcome::Processed(outcome)
    }

    #[instrument(level = "info", skip_all, fields(title = %preview(&item.title, 50)))]
    async fn process_item(&self, item: RawItem) -> ItemOutcome {
        info!("Processing");
        let text = item.classifier_text();

        let Some(raw) = self.classifier.classify_raw(&text, &self.whitelist).await else {
            return ItemOutcome::NoClassification;
        };

        let classification = match validate(&raw, &self.whitelist) {
            Ok(classification) => classification,
            Err(reason) => {
                debug!(%reason, symbol = ?raw.symbol(), "Classification rejected");
                return ItemOutcome::Rejected(reason);
            }
        };

        let ticker = classification.ticker.clone();
        match self.publisher.publish(PublishRecord::new(classification, &item)).await {
            PublishOutcome::Accepted(id) => ItemOutcome::Published { id, ticker },
            PublishOutcome::Rejected { status, detail } => {
                ItemOutcome::PublishRejected { status, detail }
            }
            PublishOutcome::TransportFailure(e) => ItemOutcome::PublishFailed(e),
        }
    }

    /// Tick until the queue drains or shutdown is signalled, then stop the
    /// timers and signal shutdown to every collaborator.
    ///
    /// An item already in flight when shutdown arrives is allowed to finish.
    /// The returned summary counts what is left in the queue.
    #[instrument(level = "info", skip_all)]
    pub async fn run(&self) -> RunSummary {
        let t0 = Instant::now();
        let period = self.config.tick_interval().max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut drain_poll = interval(self.config.drain_poll().max(Duration::from_millis(1)));
        drain_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut in_flight = FuturesUnordered::new();
        let mut stopping = false;
        info!(
            queued = self.queued(),
            tick_interval = ?period,
            "Processor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick(), if !stopping => in_flight.push(self.tick()),
                Some(_) = in_flight.next() => {}
                _ = drain_poll.tick() => {
                    if self.is_drained() {
                        break;
                    }
                    if stopping && in_flight.is_empty() && !self.is_busy() {
                        break;
                    }
                }
                _ = self.shutdown.triggered(), if !stopping => {
                    warn!(queued = self.queued(), "Shutdown requested; finishing the item in flight");
                    stopping = true;
                }
            }
        }

        // Dropping the pending ticks and the timers stops everything.
        drop(in_flight);
        self.done.store(true, Ordering::Release);
        self.shutdown.trigger();

        let summary = RunSummary {
            stats: self.stats(),
            remaining: self.queued(),
            interrupted: stopping,
            elapsed_ms: t0.elapsed().as_millis() as u64,
        };
        info!(
            processed = summary.stats.processed,
            published = summary.stats.published,
            dropped = summary.stats.dropped(),
            remaining = summary.remaining,
            interrupted = summary.interrupted,
            "Processing completed"
        );
        summary
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<RawItem>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stats_mut(&self) -> MutexGuard<'_, RunStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
