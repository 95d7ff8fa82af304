use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Execution events emitted by the coordinator and its workers.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted { workers: usize, max_in_flight_chunks: usize },
    /// The coordinator waited for results because the in-flight window was full.
    ThrottleWaited { duration: Duration },
    ChunkDispatched { ordinal: usize, row_count: usize },
    ChunkStarted { ordinal: usize, first_row: usize, row_count: usize },
    ChunkFinished {
        ordinal: usize,
        output_rows: usize,
        row_failures: usize,
    },
    /// A chunk was handed to the sink, in ordinal order.
    ChunkEmitted { ordinal: usize, rows: usize },
    /// The run stopped before completion (failure, cancellation or timeout).
    RunAborted { reason: String, abandoned_chunks: usize },
    RunFinished {
        elapsed: Duration,
        metrics: ExecutionMetricsSnapshot,
    },
}

/// Observer hook for execution events.
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// Forwards execution events to `tracing`.
///
/// Chunk-level events are logged at `debug`/`trace`, run-level ones at `info`, aborts at `warn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ExecutionObserver for TracingObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::RunStarted {
                workers,
                max_in_flight_chunks,
            } => tracing::info!(workers, max_in_flight_chunks, "execution started"),
            ExecutionEvent::ThrottleWaited { duration } => {
                tracing::trace!(?duration, "waited for in-flight chunks")
            }
            ExecutionEvent::ChunkDispatched { ordinal, row_count } => {
                tracing::trace!(ordinal, row_count, "chunk dispatched")
            }
            ExecutionEvent::ChunkStarted {
                ordinal,
                first_row,
                row_count,
            } => tracing::trace!(ordinal, first_row, row_count, "chunk started"),
            ExecutionEvent::ChunkFinished {
                ordinal,
                output_rows,
                row_failures,
            } => {
                if *row_failures > 0 {
                    tracing::warn!(ordinal, output_rows, row_failures, "chunk finished with row failures");
                } else {
                    tracing::debug!(ordinal, output_rows, "chunk finished");
                }
            }
            ExecutionEvent::ChunkEmitted { ordinal, rows } => tracing::debug!(ordinal, rows, "chunk emitted"),
            ExecutionEvent::RunAborted {
                reason,
                abandoned_chunks,
            } => tracing::warn!(%reason, abandoned_chunks, "execution aborted"),
            ExecutionEvent::RunFinished { elapsed, metrics } => {
                tracing::info!(?elapsed, %metrics, "execution finished")
            }
        }
    }
}

/// Real-time metrics for an execution run.
///
/// The coordinator and workers update these counters during execution; callers can snapshot them
/// at any time.
#[derive(Debug)]
pub struct ExecutionMetrics {
    run_id: AtomicU64,
    elapsed_ns: AtomicU64,

    rows_processed: AtomicU64,
    row_failures: AtomicU64,
    chunks_started: AtomicU64,
    chunks_finished: AtomicU64,
    chunks_emitted: AtomicU64,
    throttle_wait_ns: AtomicU64,

    active_chunks: AtomicUsize,
    max_active_chunks: AtomicUsize,
    max_buffered_chunks: AtomicUsize,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self {
            run_id: AtomicU64::new(0),
            elapsed_ns: AtomicU64::new(0),
            rows_processed: AtomicU64::new(0),
            row_failures: AtomicU64::new(0),
            chunks_started: AtomicU64::new(0),
            chunks_finished: AtomicU64::new(0),
            chunks_emitted: AtomicU64::new(0),
            throttle_wait_ns: AtomicU64::new(0),
            active_chunks: AtomicUsize::new(0),
            max_active_chunks: AtomicUsize::new(0),
            max_buffered_chunks: AtomicUsize::new(0),
        }
    }

    pub fn begin_run(&self) {
        self.run_id.fetch_add(1, Ordering::SeqCst);
        self.elapsed_ns.store(0, Ordering::SeqCst);
        self.rows_processed.store(0, Ordering::SeqCst);
        self.row_failures.store(0, Ordering::SeqCst);
        self.chunks_started.store(0, Ordering::SeqCst);
        self.chunks_finished.store(0, Ordering::SeqCst);
        self.chunks_emitted.store(0, Ordering::SeqCst);
        self.throttle_wait_ns.store(0, Ordering::SeqCst);
        self.active_chunks.store(0, Ordering::SeqCst);
        self.max_active_chunks.store(0, Ordering::SeqCst);
        self.max_buffered_chunks.store(0, Ordering::SeqCst);
    }

    pub fn end_run(&self, elapsed: Duration) {
        self.elapsed_ns.store(saturating_nanos(elapsed), Ordering::SeqCst);
    }

    pub fn on_rows_processed(&self, rows: usize, failures: usize) {
        self.rows_processed.fetch_add(rows as u64, Ordering::SeqCst);
        self.row_failures.fetch_add(failures as u64, Ordering::SeqCst);
    }

    pub fn on_chunk_start(&self) {
        self.chunks_started.fetch_add(1, Ordering::SeqCst);
        let now = self.active_chunks.fetch_add(1, Ordering::SeqCst) + 1;
        update_max_usize(&self.max_active_chunks, now);
    }

    pub fn on_chunk_end(&self) {
        self.chunks_finished.fetch_add(1, Ordering::SeqCst);
        self.active_chunks.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn on_chunk_emitted(&self) {
        self.chunks_emitted.fetch_add(1, Ordering::SeqCst);
    }

    /// Record the current size of the reorder buffer.
    pub fn on_buffered(&self, buffered: usize) {
        update_max_usize(&self.max_buffered_chunks, buffered);
    }

    pub fn on_throttle_wait(&self, d: Duration) {
        self.throttle_wait_ns.fetch_add(saturating_nanos(d), Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ExecutionMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        ExecutionMetricsSnapshot {
            run_id: self.run_id.load(Ordering::SeqCst),
            elapsed: (elapsed_ns > 0).then(|| Duration::from_nanos(elapsed_ns)),
            rows_processed: self.rows_processed.load(Ordering::SeqCst),
            row_failures: self.row_failures.load(Ordering::SeqCst),
            chunks_started: self.chunks_started.load(Ordering::SeqCst),
            chunks_finished: self.chunks_finished.load(Ordering::SeqCst),
            chunks_emitted: self.chunks_emitted.load(Ordering::SeqCst),
            throttle_wait: Duration::from_nanos(self.throttle_wait_ns.load(Ordering::SeqCst)),
            max_active_chunks: self.max_active_chunks.load(Ordering::SeqCst),
            max_buffered_chunks: self.max_buffered_chunks.load(Ordering::SeqCst),
        }
    }
}

impl Default for ExecutionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn saturating_nanos(d: Duration) -> u64 {
    d.as_nanos().min(u128::from(u64::MAX)) as u64
}

fn update_max_usize(dst: &AtomicUsize, now: usize) {
    dst.fetch_max(now, Ordering::SeqCst);
}

/// Immutable snapshot of [`ExecutionMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionMetricsSnapshot {
    pub run_id: u64,
    pub elapsed: Option<Duration>,
    pub rows_processed: u64,
    pub row_failures: u64,
    pub chunks_started: u64,
    pub chunks_finished: u64,
    pub chunks_emitted: u64,
    pub throttle_wait: Duration,
    pub max_active_chunks: usize,
    /// Peak number of finished chunks waiting for a predecessor.
    pub max_buffered_chunks: usize,
}

impl fmt::Display for ExecutionMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, rows_processed={}, row_failures={}, chunks={}/{}/{}, max_active_chunks={}, max_buffered_chunks={}, throttle_wait={:?}, elapsed={:?}",
            self.run_id,
            self.rows_processed,
            self.row_failures,
            self.chunks_emitted,
            self.chunks_finished,
            self.chunks_started,
            self.max_active_chunks,
            self.max_buffered_chunks,
            self.throttle_wait,
            self.elapsed
        )
    }
}
