//! Upload Worker: Rate-Limited, Retrying Delivery of Snapshots
//!
//! ## Overview
//!
//! One long-lived thread drains the upload queue. Every snapshot it picks up
//! goes through a small state machine:
//!
//! ```text
//!   PENDING ──→ SENDING ──→ SUCCEEDED
//!                  │  ▲
//!          failure │  │ retry_wait elapsed
//!                  ▼  │
//!               RETRY_WAIT ──(max_tries reached)──→ FAILED
//! ```
//!
//! ## Processing Cycle
//!
//! 1. Coalesce: everything still queued supersedes the popped snapshot;
//!    only the newest is kept.
//! 2. Rate limit: wait out the rest of `post_interval` since the previous
//!    post, then coalesce again.
//! 3. Age check: with `stale` set, a snapshot older than that is skipped.
//! 4. Convert to METRICWX and render the query string.
//! 5. Send, retrying the *same* URL after `retry_wait` on failure, up to
//!    `max_tries` attempts in total.
//!
//! With `skip_upload` steps 1-4 run as usual and the send is replaced by a
//! debug log line that always counts as success, logged like a real success
//! when `log_success` is set.
//!
//! ## Cancellation
//!
//! A [`ShutdownSignal`] is checked on every loop iteration and wakes any
//! rate-limit or retry wait immediately. An in-flight request is never
//! interrupted; it runs to its configured timeout.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use meteorelay_core::time::age;
use meteorelay_core::{
    CoreError, QueueConsumer, QueueItem, RequestFormatter, StandardConverter, SystemTime,
    TimeSource, UnitConverter, UnitSystem,
};
use thiserror::Error;

use crate::config::RelayConfig;
use crate::{Connector, ConnectorError, Delivery};

/// How long the worker blocks on an empty queue before re-checking shutdown
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Unit system the collector expects
pub const WIRE_UNITS: UnitSystem = UnitSystem::MetricWx;

/// Cooperative shutdown flag shared between the service and its worker
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every waiter
    pub fn trigger(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `timeout` unless shutdown is requested first
    ///
    /// Returns true if shutdown was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

impl fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

/// Lifecycle of a single snapshot inside the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostState {
    Pending,
    Sending,
    RetryWait,
    Succeeded,
    Failed,
}

/// Why a send attempt did not deliver
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PostError {
    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Transport(#[from] ConnectorError),
}

impl PostError {
    fn from_delivery(delivery: Delivery) -> Option<Self> {
        match delivery {
            Delivery::Delivered => None,
            Delivery::RejectedByServer(reason) => Some(PostError::Rejected(reason)),
            Delivery::TransportFailure(err) => Some(PostError::Transport(err)),
        }
    }
}

/// Attempt bookkeeping for one snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempts_made: u32,
    pub last_error: Option<PostError>,
}

/// Why a snapshot was dropped without any send attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Older than `stale` seconds when its turn came
    TooOld { age: u64 },
    /// Could not be converted to wire units
    Unconvertible(CoreError),
}

/// Terminal result for one dequeued snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    Succeeded { attempts: u32 },
    Failed { attempts: u32, last_error: PostError },
    Skipped(SkipReason),
    /// Shutdown arrived while waiting; the snapshot was abandoned
    Cancelled,
}

/// Worker counters, readable from any thread
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Snapshots acknowledged by the collector (or dry-run formatted)
    pub posted: AtomicU64,
    /// Snapshots dropped after exhausting their attempts
    pub failed: AtomicU64,
    /// Snapshots dropped as too old or unconvertible
    pub skipped: AtomicU64,
    /// Snapshots replaced by a newer one before sending
    pub superseded: AtomicU64,
    /// Individual send attempts, including retries
    pub attempts: AtomicU64,
}

impl WorkerStats {
    fn record(&self, outcome: &PostOutcome) {
        let counter = match outcome {
            PostOutcome::Succeeded { .. } => &self.posted,
            PostOutcome::Failed { .. } => &self.failed,
            PostOutcome::Skipped(_) => &self.skipped,
            PostOutcome::Cancelled => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Background loop draining the upload queue
pub struct UploadWorker<C: Connector, V: UnitConverter = StandardConverter, T: TimeSource = SystemTime> {
    consumer: QueueConsumer,
    connector: C,
    converter: V,
    formatter: RequestFormatter,
    time_source: T,
    shutdown: ShutdownSignal,
    endpoint: String,
    post_interval: Duration,
    retry_wait: Duration,
    max_tries: u32,
    stale: Option<u64>,
    skip_upload: bool,
    log_success: bool,
    log_failure: bool,
    last_post: Option<Instant>,
    stats: Arc<WorkerStats>,
}

impl<C: Connector> UploadWorker<C> {
    /// Worker using the standard converter and the wall clock
    pub fn new(config: &RelayConfig, consumer: QueueConsumer, connector: C) -> Self {
        Self {
            consumer,
            connector,
            converter: StandardConverter,
            formatter: RequestFormatter,
            time_source: SystemTime,
            shutdown: ShutdownSignal::new(),
            endpoint: config.endpoint(),
            post_interval: config.post_interval(),
            retry_wait: config.retry_wait(),
            max_tries: config.max_tries.max(1),
            stale: config.stale,
            skip_upload: config.skip_upload,
            log_success: config.log_success,
            log_failure: config.log_failure,
            last_post: None,
            stats: Arc::new(WorkerStats::default()),
        }
    }
}

impl<C: Connector, V: UnitConverter, T: TimeSource> UploadWorker<C, V, T> {
    /// Replace the unit converter
    pub fn with_converter<V2: UnitConverter>(self, converter: V2) -> UploadWorker<C, V2, T> {
        UploadWorker {
            consumer: self.consumer,
            connector: self.connector,
            converter,
            formatter: self.formatter,
            time_source: self.time_source,
            shutdown: self.shutdown,
            endpoint: self.endpoint,
            post_interval: self.post_interval,
            retry_wait: self.retry_wait,
            max_tries: self.max_tries,
            stale: self.stale,
            skip_upload: self.skip_upload,
            log_success: self.log_success,
            log_failure: self.log_failure,
            last_post: self.last_post,
            stats: self.stats,
        }
    }

    /// Replace the clock used for the `stale` age check
    pub fn with_time_source<T2: TimeSource>(self, time_source: T2) -> UploadWorker<C, V, T2> {
        UploadWorker {
            consumer: self.consumer,
            connector: self.connector,
            converter: self.converter,
            formatter: self.formatter,
            time_source,
            shutdown: self.shutdown,
            endpoint: self.endpoint,
            post_interval: self.post_interval,
            retry_wait: self.retry_wait,
            max_tries: self.max_tries,
            stale: self.stale,
            skip_upload: self.skip_upload,
            log_success: self.log_success,
            log_failure: self.log_failure,
            last_post: self.last_post,
            stats: self.stats,
        }
    }

    /// Share a shutdown signal with the owner of this worker
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Drain the queue until shutdown, or until it is closed and empty
    pub fn run(&mut self) {
        log::debug!("upload worker started for {}", self.endpoint);

        while !self.shutdown.is_triggered() {
            match self.consumer.pop(POLL_INTERVAL) {
                Some(item) => {
                    self.process(item);
                }
                None if self.consumer.is_closed() && self.consumer.is_empty() => break,
                None => {}
            }
        }

        log::debug!("upload worker stopped");
    }

    /// Handle one dequeued snapshot through to a terminal outcome
    pub fn process(&mut self, item: QueueItem) -> PostOutcome {
        let outcome = self.process_inner(item);
        self.stats.record(&outcome);
        outcome
    }

    fn process_inner(&mut self, item: QueueItem) -> PostOutcome {
        log::trace!("snapshot {:?}", PostState::Pending);
        let mut item = self.coalesce(item);
        log::debug!(
            "snapshot {} waited {:?} in queue",
            item.snapshot().timestamp(),
            item.queued_for()
        );

        if let Some(last) = self.last_post {
            let since = last.elapsed();
            if since < self.post_interval {
                if self.shutdown.wait(self.post_interval - since) {
                    return PostOutcome::Cancelled;
                }
                item = self.coalesce(item);
            }
        }

        let snapshot = item.into_snapshot();
        if let Some(max_age) = self.stale {
            let how_old = age(snapshot.timestamp(), self.time_source.now());
            if how_old > max_age {
                log::debug!("snapshot from {} is {}s old, not posting", snapshot.timestamp(), how_old);
                return PostOutcome::Skipped(SkipReason::TooOld { age: how_old });
            }
        }

        let wire = match self.converter.convert(&snapshot, WIRE_UNITS) {
            Ok(wire) => wire,
            Err(err) => {
                log::warn!("cannot convert snapshot {}: {}", snapshot.timestamp(), err);
                return PostOutcome::Skipped(SkipReason::Unconvertible(err));
            }
        };

        let url = format!("{}?{}", self.endpoint, self.formatter.render(&wire));
        log::debug!("url: {}", url);
        self.last_post = Some(Instant::now());

        if self.skip_upload {
            log::debug!("skip_upload set, not posting");
            if self.log_success {
                log::info!("Published record for {} (skip_upload)", self.endpoint);
            }
            return PostOutcome::Succeeded { attempts: 0 };
        }

        self.post(&url)
    }

    fn coalesce(&mut self, item: QueueItem) -> QueueItem {
        let (latest, superseded) = self.consumer.drain_latest(item);
        if superseded > 0 {
            self.stats.superseded.fetch_add(superseded as u64, Ordering::Relaxed);
            log::debug!("{} queued snapshot(s) superseded by newer data", superseded);
        }
        latest
    }

    /// Send `url`, retrying up to `max_tries` attempts in total
    pub fn post(&mut self, url: &str) -> PostOutcome {
        let mut retry = RetryState::default();
        let mut state = PostState::Sending;

        loop {
            match state {
                PostState::Sending => {
                    retry.attempts_made += 1;
                    self.stats.attempts.fetch_add(1, Ordering::Relaxed);

                    state = match PostError::from_delivery(self.connector.send(url)) {
                        None => PostState::Succeeded,
                        Some(err) => {
                            log::warn!(
                                "attempt {}/{} failed: {}",
                                retry.attempts_made,
                                self.max_tries,
                                err
                            );
                            retry.last_error = Some(err);
                            if retry.attempts_made < self.max_tries {
                                PostState::RetryWait
                            } else {
                                PostState::Failed
                            }
                        }
                    };
                }
                PostState::RetryWait => {
                    if self.shutdown.wait(self.retry_wait) {
                        return PostOutcome::Cancelled;
                    }
                    state = PostState::Sending;
                }
                PostState::Succeeded => {
                    if self.log_success {
                        log::info!("Published record for {}", self.endpoint);
                    }
                    return PostOutcome::Succeeded {
                        attempts: retry.attempts_made,
                    };
                }
                PostState::Failed => {
                    let last_error = retry
                        .last_error
                        .take()
                        .unwrap_or_else(|| PostError::Rejected("no attempt made".into()));
                    if self.log_failure {
                        log::error!(
                            "Failed to publish record after {} tries: {}",
                            retry.attempts_made,
                            last_error
                        );
                    }
                    return PostOutcome::Failed {
                        attempts: retry.attempts_made,
                        last_error,
                    };
                }
                PostState::Pending => state = PostState::Sending,
            }
            log::trace!("post {:?}", state);
        }
    }
}

impl<C, V, T> UploadWorker<C, V, T>
where
    C: Connector + 'static,
    V: UnitConverter + 'static,
    T: TimeSource + 'static,
{
    /// Run the worker on its own named thread
    pub fn spawn(mut self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("meteorelay-upload".into())
            .spawn(move || self.run())
    }
}
