//! Chunk evaluation and ordered parallel execution.
//!
//! This module sits between [`crate::source`] and [`crate::sink`] and provides:
//!
//! - [`ChunkProcessor`]: applies a resolved rule set to one chunk, collecting per-row failures
//! - [`Coordinator`]: runs chunk tasks on a bounded rayon pool and emits results in ordinal order
//! - Cancellation, timeouts and real-time metrics with observer hooks

mod cancel;
mod coordinator;
mod observer;
mod processor;

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{JobError, JobResult};

pub use cancel::CancellationToken;
pub use coordinator::{Coordinator, CoordinatorOptions, RunSummary};
pub use observer::{ExecutionEvent, ExecutionMetrics, ExecutionMetricsSnapshot, ExecutionObserver, TracingObserver};
pub use processor::{ChunkProcessor, ProcessedChunk, RowFailure};

/// Parallelism and chunking settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Number of worker threads.
    ///
    /// If `None`, uses the platform's available parallelism.
    pub num_threads: Option<usize>,
    /// Number of rows per chunk.
    pub chunk_size: usize,
    /// Upper bound on chunks dispatched but not yet handed to the sink.
    ///
    /// This also bounds the reorder buffer.
    pub max_in_flight_chunks: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        let n = available_parallelism();
        Self {
            num_threads: Some(n),
            chunk_size: 4_096,
            max_in_flight_chunks: n.max(1),
        }
    }
}

impl ExecutionOptions {
    /// Reject zero chunk sizes, windows and thread counts.
    pub fn validate(&self) -> JobResult<()> {
        let invalid = |message: &str| {
            Err(JobError::InvalidOptions {
                message: message.to_string(),
            })
        };
        if self.chunk_size == 0 {
            return invalid("chunk_size must be > 0");
        }
        if self.max_in_flight_chunks == 0 {
            return invalid("max_in_flight_chunks must be > 0");
        }
        if self.num_threads == Some(0) {
            return invalid("num_threads must be > 0 when set");
        }
        Ok(())
    }

    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        self.num_threads.unwrap_or_else(available_parallelism).max(1)
    }

    pub(crate) fn build_pool(&self) -> JobResult<ThreadPool> {
        self.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.worker_count())
            .thread_name(|i| format!("report-worker-{i}"))
            .build()?;
        Ok(pool)
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::ExecutionOptions;
    use crate::error::JobError;

    #[test]
    fn zero_settings_are_rejected() {
        let bad = [
            ExecutionOptions {
                chunk_size: 0,
                ..ExecutionOptions::default()
            },
            ExecutionOptions {
                max_in_flight_chunks: 0,
                ..ExecutionOptions::default()
            },
            ExecutionOptions {
                num_threads: Some(0),
                ..ExecutionOptions::default()
            },
        ];
        for opts in bad {
            assert!(matches!(opts.validate(), Err(JobError::InvalidOptions { .. })));
        }
        assert!(ExecutionOptions::default().validate().is_ok());
    }

    #[test]
    fn pool_uses_configured_thread_count() {
        let opts = ExecutionOptions {
            num_threads: Some(3),
            ..ExecutionOptions::default()
        };
        assert_eq!(opts.build_pool().unwrap().current_num_threads(), 3);
        assert!(ExecutionOptions { num_threads: None, ..opts }.worker_count() >= 1);
    }
}
