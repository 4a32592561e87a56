//! Bounded Upload Queue Between Ingestion and the Upload Worker
//!
//! ## Overview
//!
//! The ingestion path must never wait on the network. Snapshots are handed
//! to the upload worker through a bounded FIFO with a *drop-oldest* policy:
//!
//! ```text
//! Ingestion (producer)                      Upload worker (consumer)
//!      │ push: never blocks                      │ pop(timeout): blocks
//!      ▼                                         ▼
//!   ┌──────┬──────┬──────┬──────┐           ┌─────────┐
//!   │ s1   │ s2   │ s3   │ s4   │ ────────→ │ newest  │
//!   └──────┴──────┴──────┴──────┘           └─────────┘
//!      ↑ full? discard s1 first
//! ```
//!
//! ## Why Drop-Oldest?
//!
//! Snapshots are supersede-able state, not an event log. When the collector
//! is unreachable the backlog only grows stale; keeping the newest entries
//! bounds memory and keeps what eventually gets delivered meaningful.
//!
//! ## Single Consumer
//!
//! [`upload_queue`] returns a cloneable [`QueueProducer`] and exactly one
//! [`QueueConsumer`], which is not `Clone`. Once every producer is dropped
//! the consumer drains what is left and then sees the queue as closed.
//!
//! ## Statistics
//!
//! | counter     | meaning                                   |
//! |-------------|-------------------------------------------|
//! | `pushed`    | snapshots accepted                        |
//! | `popped`    | snapshots handed to the worker            |
//! | `dropped`   | snapshots discarded by the backlog bound  |
//! | `max_depth` | deepest the queue has been                |

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::observation::Snapshot;

/// A snapshot in transit to the upload worker
#[derive(Debug, Clone)]
pub struct QueueItem {
    snapshot: Snapshot,
    enqueued_at: Instant,
}

impl QueueItem {
    /// Wrap a snapshot, stamping the enqueue instant
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            enqueued_at: Instant::now(),
        }
    }

    /// The wrapped snapshot
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Unwrap into the snapshot
    pub fn into_snapshot(self) -> Snapshot {
        self.snapshot
    }

    /// Time spent waiting in the queue so far
    pub fn queued_for(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

/// Queue statistics
///
/// Track backlog health without taking the queue lock
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Total snapshots pushed
    pub pushed: AtomicU64,
    /// Total snapshots popped
    pub popped: AtomicU64,
    /// Snapshots discarded by the backlog bound
    pub dropped: AtomicU64,
    /// Maximum queue depth seen
    pub max_depth: AtomicU64,
}

impl QueueStats {
    /// Update max depth if current is higher
    fn update_max_depth(&self, current: u64) {
        let mut max = self.max_depth.load(Ordering::Relaxed);
        while current > max {
            match self.max_depth.compare_exchange_weak(
                max,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => max = actual,
            }
        }
    }
}

struct State {
    items: VecDeque<QueueItem>,
    producers: usize,
}

struct Shared {
    state: Mutex<State>,
    available: Condvar,
    /// Retained item bound, 0 for unbounded
    max_backlog: usize,
    stats: QueueStats,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // Queue state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a queue retaining at most `max_backlog` snapshots (0 = unbounded)
pub fn upload_queue(max_backlog: usize) -> (QueueProducer, QueueConsumer) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            items: VecDeque::new(),
            producers: 1,
        }),
        available: Condvar::new(),
        max_backlog,
        stats: QueueStats::default(),
    });

    (
        QueueProducer {
            shared: Arc::clone(&shared),
        },
        QueueConsumer { shared },
    )
}

/// Ingestion side of the queue
pub struct QueueProducer {
    shared: Arc<Shared>,
}

impl QueueProducer {
    /// Enqueue a snapshot, discarding the oldest entries to respect the bound
    ///
    /// Never blocks and never fails. Returns how many snapshots were dropped.
    pub fn push(&self, snapshot: Snapshot) -> usize {
        let mut state = self.shared.lock();
        let mut dropped = 0;

        if self.shared.max_backlog > 0 {
            while state.items.len() >= self.shared.max_backlog {
                state.items.pop_front();
                dropped += 1;
            }
        }
        state.items.push_back(QueueItem::new(snapshot));
        let depth = state.items.len() as u64;
        drop(state);

        self.shared.available.notify_one();

        let stats = &self.shared.stats;
        stats.pushed.fetch_add(1, Ordering::Relaxed);
        stats.update_max_depth(depth);
        if dropped > 0 {
            stats.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
            log::debug!(
                "upload backlog over {} entries, dropped {} oldest",
                self.shared.max_backlog,
                dropped
            );
        }

        dropped
    }

    /// Snapshots currently queued
    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    /// True if there is nothing here
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared queue counters
    pub fn stats(&self) -> &QueueStats {
        &self.shared.stats
    }
}

impl Clone for QueueProducer {
    fn clone(&self) -> Self {
        self.shared.lock().producers += 1;
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for QueueProducer {
    fn drop(&mut self) {
        self.shared.lock().producers -= 1;
        self.shared.available.notify_all();
    }
}

/// Upload worker side of the queue
pub struct QueueConsumer {
    shared: Arc<Shared>,
}

impl QueueConsumer {
    /// Wait up to `timeout` for the oldest snapshot
    ///
    /// Returns `None` on timeout, or immediately once the queue is empty and
    /// every producer is gone.
    pub fn pop(&self, timeout: Duration) -> Option<QueueItem> {
        let state = self.shared.lock();
        let (mut state, _) = self
            .shared
            .available
            .wait_timeout_while(state, timeout, |s| s.items.is_empty() && s.producers > 0)
            .unwrap_or_else(PoisonError::into_inner);

        let item = state.items.pop_front();
        if item.is_some() {
            self.shared.stats.popped.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Take the oldest snapshot without waiting
    pub fn try_pop(&self) -> Option<QueueItem> {
        self.pop(Duration::ZERO)
    }

    /// Coalesce `first` with everything still queued, keeping only the newest
    ///
    /// Returns the newest item and how many older ones it superseded.
    pub fn drain_latest(&self, first: QueueItem) -> (QueueItem, usize) {
        let mut state = self.shared.lock();
        let superseded = state.items.len();
        let latest = state.items.drain(..).last().unwrap_or(first);
        drop(state);

        if superseded > 0 {
            self.shared
                .stats
                .popped
                .fetch_add(superseded as u64, Ordering::Relaxed);
        }
        (latest, superseded)
    }

    /// Snapshots currently queued
    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    /// True if there is nothing here
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once every producer has been dropped
    pub fn is_closed(&self) -> bool {
        self.shared.lock().producers == 0
    }

    /// Shared queue counters
    pub fn stats(&self) -> &QueueStats {
        &self.shared.stats
    }
}
