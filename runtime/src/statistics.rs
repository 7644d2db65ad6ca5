//! Per-message dispatch statistics.
//!
//! The tracker is a [`DispatchObserver`]: the mediator feeds it and it never
//! influences dispatch. Counters live in a [`DashMap`] keyed by message type
//! name, one set of atomics per key, so concurrent dispatches of different
//! (or the same) message types never wait on a shared lock.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::environment::{Clock, SystemClock};
use switchyard_core::error::DispatchError;
use switchyard_core::message::MessageKind;
use switchyard_core::observer::{DispatchEvent, DispatchObserver};

/// Upper bounds of the latency buckets, in microseconds. A final bucket
/// collects everything slower.
pub const LATENCY_BUCKETS_MICROS: [u64; 8] = [100, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 1_000_000];

const BUCKETS: usize = LATENCY_BUCKETS_MICROS.len() + 1;

struct Counters {
    kind: MessageKind,
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    total_micros: AtomicU64,
    max_micros: AtomicU64,
    buckets: [AtomicU64; BUCKETS],
}

impl Counters {
    fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            started: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            total_micros: AtomicU64::new(0),
            max_micros: AtomicU64::new(0),
            buckets: Default::default(),
        }
    }

    fn record_duration(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
        let bucket = LATENCY_BUCKETS_MICROS
            .iter()
            .position(|bound| micros <= *bound)
            .unwrap_or(LATENCY_BUCKETS_MICROS.len());
        if let Some(counter) = self.buckets.get(bucket) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn read(&self, message: &str) -> MessageStatistics {
        let started = self.started.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let cancelled = self.cancelled.load(Ordering::Relaxed);
        let completed = succeeded + failed + cancelled;
        let total_micros = self.total_micros.load(Ordering::Relaxed);

        let latency = LATENCY_BUCKETS_MICROS
            .iter()
            .map(|bound| Some(*bound))
            .chain(std::iter::once(None))
            .zip(&self.buckets)
            .map(|(le_micros, count)| LatencyBucket {
                le_micros,
                count: count.load(Ordering::Relaxed),
            })
            .collect();

        MessageStatistics {
            message: message.to_string(),
            kind: self.kind,
            started,
            succeeded,
            failed,
            cancelled,
            in_flight: started.saturating_sub(completed),
            total_micros,
            max_micros: self.max_micros.load(Ordering::Relaxed),
            mean_micros: total_micros.checked_div(completed),
            latency,
        }
    }
}

/// One latency bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyBucket {
    /// Inclusive upper bound; `None` for the overflow bucket
    pub le_micros: Option<u64>,
    /// Dispatches that fell in this bucket
    pub count: u64,
}

/// Counters of one message type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStatistics {
    /// Message type name
    pub message: String,
    /// What kind of dispatch the message takes part in
    pub kind: MessageKind,
    /// Dispatches started
    pub started: u64,
    /// Dispatches that completed
    pub succeeded: u64,
    /// Dispatches that failed
    pub failed: u64,
    /// Dispatches that were cancelled
    pub cancelled: u64,
    /// Dispatches started but not finished when the snapshot was taken
    pub in_flight: u64,
    /// Sum of all durations
    pub total_micros: u64,
    /// Slowest dispatch
    pub max_micros: u64,
    /// Mean duration of finished dispatches
    pub mean_micros: Option<u64>,
    /// Duration histogram
    pub latency: Vec<LatencyBucket>,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
    /// One entry per message type, sorted by name
    pub messages: Vec<MessageStatistics>,
}

impl StatisticsSnapshot {
    /// The entry for a message type name.
    #[must_use]
    pub fn get(&self, message: &str) -> Option<&MessageStatistics> {
        self.messages.iter().find(|entry| entry.message == message)
    }

    /// Render as JSON.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; not expected for this type.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Lock-free per-message dispatch counters.
pub struct StatisticsTracker {
    entries: DashMap<&'static str, Arc<Counters>>,
    clock: Arc<dyn Clock>,
}

impl StatisticsTracker {
    /// A tracker stamping snapshots with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    fn counters(&self, event: &DispatchEvent) -> Arc<Counters> {
        if let Some(counters) = self.entries.get(event.message) {
            return Arc::clone(counters.value());
        }
        Arc::clone(
            self.entries
                .entry(event.message)
                .or_insert_with(|| Arc::new(Counters::new(event.kind)))
                .value(),
        )
    }

    /// Counters of one message type.
    #[must_use]
    pub fn get(&self, message: &str) -> Option<MessageStatistics> {
        self.entries.get(message).map(|entry| entry.value().read(entry.key()))
    }

    /// Copy every counter.
    #[must_use]
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let mut messages: Vec<MessageStatistics> = self
            .entries
            .iter()
            .map(|entry| entry.value().read(entry.key()))
            .collect();
        messages.sort_by(|a, b| a.message.cmp(&b.message));
        StatisticsSnapshot {
            taken_at: self.clock.now(),
            messages,
        }
    }

    /// Number of message types seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was dispatched yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every counter.
    pub fn reset(&self) {
        self.entries.clear();
    }
}

impl Default for StatisticsTracker {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for StatisticsTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticsTracker")
            .field("messages", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl DispatchObserver for StatisticsTracker {
    fn on_start(&self, event: &DispatchEvent) {
        self.counters(event).started.fetch_add(1, Ordering::Relaxed);
    }

    fn on_success(&self, event: &DispatchEvent, elapsed: Duration) {
        let counters = self.counters(event);
        counters.succeeded.fetch_add(1, Ordering::Relaxed);
        counters.record_duration(elapsed);
    }

    fn on_failure(&self, event: &DispatchEvent, error: &DispatchError, elapsed: Duration) {
        let counters = self.counters(event);
        if error.is_cancelled() {
            counters.cancelled.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        counters.record_duration(elapsed);
    }
}
