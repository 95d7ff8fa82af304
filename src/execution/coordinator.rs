//! Ordered parallel execution of chunk tasks.
//!
//! The coordinator runs on the calling thread. It reads chunks from a [`TableSource`], hands them
//! to a rayon pool, and passes finished chunks to the caller strictly in ordinal order. Chunks
//! that finish early wait in a reorder buffer whose size is bounded by the in-flight window.
//!
//! A job-level failure, an external cancellation, or a timeout stops dispatch at once. Tasks that
//! have not started yet skip their work; running ones are waited for up to the grace period and
//! then abandoned.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use rayon::ThreadPool;

use crate::error::{JobError, JobResult};
use crate::source::TableSource;
use crate::types::Chunk;

use super::cancel::CancellationToken;
use super::observer::{ExecutionEvent, ExecutionMetrics, ExecutionObserver};
use super::processor::{ProcessedChunk, RowFailure};

/// Upper bound on how long the coordinator blocks before re-checking cancellation and timeout.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Run limits for one coordinated execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Bound on `dispatched - emitted`.
    pub max_in_flight_chunks: usize,
    pub timeout: Option<Duration>,
    pub cancel_grace_period: Duration,
    pub max_recorded_row_failures: usize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            max_in_flight_chunks: 1,
            timeout: None,
            cancel_grace_period: Duration::from_secs(5),
            max_recorded_row_failures: 1_000,
        }
    }
}

/// What a completed run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub chunks_emitted: usize,
    pub rows_emitted: u64,
    pub row_failure_count: u64,
    /// The first `max_recorded_row_failures` failures, in emission order.
    pub row_failures: Vec<RowFailure>,
}

impl RunSummary {
    fn record(&mut self, done: ProcessedChunk, cap: usize) {
        self.chunks_emitted += 1;
        self.rows_emitted += done.chunk.row_count() as u64;
        self.row_failure_count += done.failures.len() as u64;
        let room = cap.saturating_sub(self.row_failures.len());
        self.row_failures.extend(done.failures.into_iter().take(room));
    }
}

enum TaskOutcome {
    Done(JobResult<ProcessedChunk>),
    Panicked(String),
    Skipped,
}

type TaskMessage = (usize, TaskOutcome);

/// Dispatches chunk tasks onto a worker pool and reassembles their results in order.
pub struct Coordinator<'a> {
    pool: &'a ThreadPool,
    options: CoordinatorOptions,
    observer: Option<Arc<dyn ExecutionObserver>>,
    metrics: Arc<ExecutionMetrics>,
    timed_from: Option<Instant>,
}

impl<'a> Coordinator<'a> {
    pub fn new(pool: &'a ThreadPool, options: CoordinatorOptions, metrics: Arc<ExecutionMetrics>) -> Self {
        Self {
            pool,
            options,
            observer: None,
            metrics,
            timed_from: None,
        }
    }

    /// Measure the timeout from `started` instead of from the start of [`Coordinator::run`], so
    /// work done before the run counts against it.
    pub fn timed_from(mut self, started: Instant) -> Self {
        self.timed_from = Some(started);
        self
    }

    pub fn with_observer(mut self, observer: Option<Arc<dyn ExecutionObserver>>) -> Self {
        self.observer = observer;
        self
    }

    /// Drain `source`, run `task` on every chunk in the pool, and call `emit` with each result in
    /// ordinal order.
    ///
    /// Ordinals are assigned in read order. The first job-level error wins; `emit` is never called
    /// again after it.
    pub fn run<T, F>(
        &self,
        source: &mut dyn TableSource,
        task: Arc<T>,
        cancel: &CancellationToken,
        mut emit: F,
    ) -> JobResult<RunSummary>
    where
        T: Fn(Chunk) -> JobResult<ProcessedChunk> + Send + Sync + 'static,
        F: FnMut(&Chunk) -> JobResult<()>,
    {
        if self.options.max_in_flight_chunks == 0 {
            return Err(JobError::InvalidOptions {
                message: "max_in_flight_chunks must be > 0".to_string(),
            });
        }

        self.metrics.begin_run();
        notify(
            self.observer.as_deref(),
            &ExecutionEvent::RunStarted {
                workers: self.pool.current_num_threads(),
                max_in_flight_chunks: self.options.max_in_flight_chunks,
            },
        );

        let began = Instant::now();
        let (tx, rx) = mpsc::channel();
        let mut run = Run {
            coordinator: self,
            task,
            cancel,
            started: self.timed_from.unwrap_or(began),
            stop: Arc::new(AtomicBool::new(false)),
            tx,
            rx,
            dispatched: 0,
            emitted: 0,
            in_flight: 0,
            exhausted: false,
            prefetched: None,
            pending: BTreeMap::new(),
            summary: RunSummary::default(),
        };

        let result = run.drive(source, &mut emit);
        let elapsed = began.elapsed();
        match result {
            Ok(()) => {
                self.metrics.end_run(elapsed);
                notify(
                    self.observer.as_deref(),
                    &ExecutionEvent::RunFinished {
                        elapsed,
                        metrics: self.metrics.snapshot(),
                    },
                );
                Ok(run.summary)
            }
            Err(err) => {
                run.stop.store(true, Ordering::SeqCst);
                let abandoned = run.drain();
                self.metrics.end_run(began.elapsed());
                notify(
                    self.observer.as_deref(),
                    &ExecutionEvent::RunAborted {
                        reason: err.to_string(),
                        abandoned_chunks: abandoned,
                    },
                );
                Err(err)
            }
        }
    }
}

/// Mutable state of one [`Coordinator::run`] call.
struct Run<'r, T> {
    coordinator: &'r Coordinator<'r>,
    task: Arc<T>,
    cancel: &'r CancellationToken,
    /// Origin of the timeout clock.
    started: Instant,
    stop: Arc<AtomicBool>,
    tx: Sender<TaskMessage>,
    rx: Receiver<TaskMessage>,

    dispatched: usize,
    emitted: usize,
    /// Tasks spawned whose message has not been received yet.
    in_flight: usize,
    exhausted: bool,
    prefetched: Option<Chunk>,
    pending: BTreeMap<usize, ProcessedChunk>,
    summary: RunSummary,
}

impl<T> Run<'_, T>
where
    T: Fn(Chunk) -> JobResult<ProcessedChunk> + Send + Sync + 'static,
{
    fn drive(&mut self, source: &mut dyn TableSource, emit: &mut dyn FnMut(&Chunk) -> JobResult<()>) -> JobResult<()> {
        loop {
            self.check_limits()?;
            self.fill_window(source)?;

            if self.exhausted && self.prefetched.is_none() && self.in_flight == 0 && self.pending.is_empty() {
                return Ok(());
            }

            let window_full = self.dispatched - self.emitted >= self.coordinator.options.max_in_flight_chunks;
            let waited = Instant::now();
            match self.rx.recv_timeout(self.poll_interval()) {
                Ok((ordinal, outcome)) => {
                    self.accept(ordinal, outcome)?;
                    self.emit_ready(emit)?;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(JobError::Chunk {
                        chunk: self.emitted,
                        message: "worker result channel closed".to_string(),
                    });
                }
            }
            if window_full {
                let duration = waited.elapsed();
                self.coordinator.metrics.on_throttle_wait(duration);
                notify(
                    self.coordinator.observer.as_deref(),
                    &ExecutionEvent::ThrottleWaited { duration },
                );
            }
        }
    }

    fn check_limits(&self) -> JobResult<()> {
        if self.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        if let Some(limit) = self.coordinator.options.timeout {
            let elapsed = self.started.elapsed();
            if elapsed >= limit {
                return Err(JobError::Timeout { elapsed });
            }
        }
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        match self.coordinator.options.timeout {
            Some(limit) => POLL_INTERVAL.min(limit.saturating_sub(self.started.elapsed())),
            None => POLL_INTERVAL,
        }
    }

    /// Dispatch until the window is full, then read one chunk ahead while workers are busy.
    fn fill_window(&mut self, source: &mut dyn TableSource) -> JobResult<()> {
        while self.dispatched - self.emitted < self.coordinator.options.max_in_flight_chunks {
            let Some(chunk) = self.next_chunk(source)? else {
                break;
            };
            self.dispatch(chunk);
        }
        if !self.exhausted && self.prefetched.is_none() {
            self.prefetched = self.read(source)?;
        }
        Ok(())
    }

    fn next_chunk(&mut self, source: &mut dyn TableSource) -> JobResult<Option<Chunk>> {
        match self.prefetched.take() {
            Some(chunk) => Ok(Some(chunk)),
            None => self.read(source),
        }
    }

    fn read(&mut self, source: &mut dyn TableSource) -> JobResult<Option<Chunk>> {
        if self.exhausted {
            return Ok(None);
        }
        let chunk = source.next_chunk()?;
        if chunk.is_none() {
            self.exhausted = true;
        }
        Ok(chunk)
    }

    fn dispatch(&mut self, mut chunk: Chunk) {
        let ordinal = self.dispatched;
        chunk.ordinal = ordinal;
        self.dispatched += 1;
        self.in_flight += 1;

        let observer = self.coordinator.observer.clone();
        notify(
            observer.as_deref(),
            &ExecutionEvent::ChunkDispatched {
                ordinal,
                row_count: chunk.row_count(),
            },
        );

        let task = Arc::clone(&self.task);
        let metrics = Arc::clone(&self.coordinator.metrics);
        let stop = Arc::clone(&self.stop);
        let tx = self.tx.clone();
        self.coordinator.pool.spawn(move || {
            if stop.load(Ordering::SeqCst) {
                let _ = tx.send((ordinal, TaskOutcome::Skipped));
                return;
            }

            metrics.on_chunk_start();
            notify(
                observer.as_deref(),
                &ExecutionEvent::ChunkStarted {
                    ordinal,
                    first_row: chunk.first_row,
                    row_count: chunk.row_count(),
                },
            );
            let result = panic::catch_unwind(AssertUnwindSafe(|| (*task)(chunk)));
            metrics.on_chunk_end();

            let outcome = match result {
                Ok(Ok(done)) => {
                    metrics.on_rows_processed(done.chunk.row_count(), done.failures.len());
                    notify(
                        observer.as_deref(),
                        &ExecutionEvent::ChunkFinished {
                            ordinal,
                            output_rows: done.chunk.row_count(),
                            row_failures: done.failures.len(),
                        },
                    );
                    TaskOutcome::Done(Ok(done))
                }
                Ok(Err(err)) => TaskOutcome::Done(Err(err)),
                Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
            };
            // The receiver is gone once an aborted run stops waiting.
            let _ = tx.send((ordinal, outcome));
        });
    }

    fn accept(&mut self, ordinal: usize, outcome: TaskOutcome) -> JobResult<()> {
        self.in_flight -= 1;
        match outcome {
            TaskOutcome::Done(Ok(done)) => {
                self.pending.insert(ordinal, done);
                self.coordinator.metrics.on_buffered(self.pending.len());
                Ok(())
            }
            TaskOutcome::Done(Err(err)) => Err(err),
            TaskOutcome::Panicked(message) => Err(JobError::WorkerPanicked { chunk: ordinal, message }),
            TaskOutcome::Skipped => Err(JobError::Chunk {
                chunk: ordinal,
                message: "chunk was skipped".to_string(),
            }),
        }
    }

    fn emit_ready(&mut self, emit: &mut dyn FnMut(&Chunk) -> JobResult<()>) -> JobResult<()> {
        while let Some(done) = self.pending.remove(&self.emitted) {
            emit(&done.chunk)?;
            let rows = done.chunk.row_count();
            self.summary
                .record(done, self.coordinator.options.max_recorded_row_failures);
            self.coordinator.metrics.on_chunk_emitted();
            notify(
                self.coordinator.observer.as_deref(),
                &ExecutionEvent::ChunkEmitted {
                    ordinal: self.emitted,
                    rows,
                },
            );
            self.emitted += 1;
        }
        Ok(())
    }

    /// Wait for in-flight tasks for at most the grace period. Returns how many were abandoned.
    fn drain(&mut self) -> usize {
        let deadline = Instant::now() + self.coordinator.options.cancel_grace_period;
        while self.in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.rx.recv_timeout(remaining) {
                Ok(_) => self.in_flight -= 1,
                Err(_) => break,
            }
        }
        if self.in_flight > 0 {
            tracing::warn!(abandoned = self.in_flight, "abandoning in-flight chunks after grace period");
        }
        self.in_flight
    }
}

fn notify(observer: Option<&dyn ExecutionObserver>, event: &ExecutionEvent) {
    if let Some(o) = observer {
        o.on_event(event);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
