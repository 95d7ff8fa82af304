//! Report generation jobs: `generate` and validation-only entry points.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::ThreadPool;
use serde::Serialize;

use crate::config::GenerateOptions;
use crate::error::{JobError, JobResult, RuleErrorKind, SinkError};
use crate::execution::{
    CancellationToken, ChunkProcessor, Coordinator, ExecutionMetrics, ExecutionMetricsSnapshot, ExecutionObserver,
    RowFailure,
};
use crate::expr::Evaluator;
use crate::rules::{RuleDefinitions, RuleSet};
use crate::sink::{OutputEncoding, open_sink};
use crate::source::{JoinSpec, JoinedSource, ReferenceIndex, SourceSpec, TableSource, join_schema, load_dataset, open_source};
use crate::types::{Chunk, Schema};

/// Reference data joined onto every primary row.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceInput {
    pub source: SourceSpec,
    pub join: JoinSpec,
}

/// Where and how the report is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub path: PathBuf,
    pub encoding: OutputEncoding,
}

impl OutputSpec {
    pub fn new(path: impl Into<PathBuf>, encoding: OutputEncoding) -> Self {
        Self {
            path: path.into(),
            encoding,
        }
    }

    /// Infer the encoding from the file extension (`.csv`, `.xlsx`, `.json`).
    pub fn from_path(path: impl Into<PathBuf>) -> JobResult<Self> {
        let path = path.into();
        let encoding = OutputEncoding::from_path(&path).ok_or_else(|| {
            JobError::Sink(SinkError::UnsupportedEncoding {
                name: path
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            })
        })?;
        Ok(Self { path, encoding })
    }
}

/// Everything a report job needs besides its execution settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub primary: SourceSpec,
    pub reference: Option<ReferenceInput>,
    pub rules: RuleDefinitions,
    pub output: OutputSpec,
}

impl GenerateRequest {
    pub fn new(primary: SourceSpec, rules: RuleDefinitions, output: OutputSpec) -> Self {
        Self {
            primary,
            reference: None,
            rules,
            output,
        }
    }

    pub fn with_reference(mut self, source: SourceSpec, join: JoinSpec) -> Self {
        self.reference = Some(ReferenceInput { source, join });
        self
    }

    /// Columns visible to rules: the primary schema, extended by the join if there is one.
    pub fn input_schema(&self) -> JobResult<Schema> {
        match &self.reference {
            Some(r) => Ok(join_schema(&self.primary.schema, &r.source.schema, &r.join)?),
            None => Ok(self.primary.schema.clone()),
        }
    }
}

/// Result of a successful job.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub path: PathBuf,
    pub encoding: OutputEncoding,
    pub rows_written: u64,
    pub chunks_written: usize,
    /// Input columns in source order, then rule outputs in evaluation order.
    pub output_columns: Vec<String>,
    pub row_failure_count: u64,
    /// The first recorded row failures (see `GenerateOptions::max_recorded_row_failures`).
    pub row_failures: Vec<RowFailure>,
    pub metrics: ExecutionMetricsSnapshot,
    pub elapsed: Duration,
}

/// One problem found by [`validate_rules`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleDiagnostic {
    /// The offending rule, if the problem concerns one. For cycles, the first member.
    pub rule: Option<String>,
    pub kind: RuleErrorKind,
    pub message: String,
}

/// Resolve `rules` against `schema` without reading any rows, reporting every problem found.
///
/// An empty list means the rules would run.
pub fn validate_rules(rules: &RuleDefinitions, schema: &Schema) -> Vec<RuleDiagnostic> {
    RuleSet::validate(rules, schema)
        .into_iter()
        .map(|e| RuleDiagnostic {
            rule: e.rule().map(str::to_string),
            kind: e.kind(),
            message: e.to_string(),
        })
        .collect()
}

/// [`validate_rules`] against the columns a request's sources (and join) would produce.
pub fn validate_request(request: &GenerateRequest) -> JobResult<Vec<RuleDiagnostic>> {
    Ok(validate_rules(&request.rules, &request.input_schema()?))
}

/// Run one job with a fresh engine and no external cancellation.
pub fn generate(request: &GenerateRequest, options: GenerateOptions) -> JobResult<JobOutcome> {
    ReportEngine::new(options)?.generate(request, &CancellationToken::new())
}

/// Owns the worker pool and runs report jobs.
///
/// Jobs on one engine share its pool and metrics; run them one at a time per engine.
pub struct ReportEngine {
    pool: ThreadPool,
    options: GenerateOptions,
    observer: Option<Arc<dyn ExecutionObserver>>,
    metrics: Arc<ExecutionMetrics>,
}

impl ReportEngine {
    /// Build an engine, validating `options` and starting its worker pool.
    pub fn new(options: GenerateOptions) -> JobResult<Self> {
        let pool = options.execution.build_pool()?;
        Ok(Self {
            pool,
            options,
            observer: None,
            metrics: Arc::new(ExecutionMetrics::new()),
        })
    }

    /// Attach an observer for execution events (metrics/logging).
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn options(&self) -> &GenerateOptions {
        &self.options
    }

    /// Get a handle to real-time execution metrics.
    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Generate one report.
    ///
    /// Rules are resolved before any data is read. The destination only appears once every chunk
    /// has been written; on any failure, cancellation or timeout it is left untouched. The timeout
    /// runs from this call, so loading reference data counts against it.
    pub fn generate(&self, request: &GenerateRequest, cancel: &CancellationToken) -> JobResult<JobOutcome> {
        let started = Instant::now();
        tracing::info!(
            primary = %request.primary.path.display(),
            output = %request.output.path.display(),
            encoding = %request.output.encoding,
            rules = request.rules.len(),
            joined = request.reference.is_some(),
            "report job started"
        );

        let result = self.run(request, cancel, started);
        match &result {
            Ok(outcome) => tracing::info!(
                path = %outcome.path.display(),
                rows = outcome.rows_written,
                chunks = outcome.chunks_written,
                row_failures = outcome.row_failure_count,
                elapsed = ?outcome.elapsed,
                "report job finished"
            ),
            Err(e) => tracing::warn!(error = %e, elapsed = ?started.elapsed(), "report job failed"),
        }
        result
    }

    fn run(&self, request: &GenerateRequest, cancel: &CancellationToken, started: Instant) -> JobResult<JobOutcome> {
        let input_schema = request.input_schema()?;
        let rules = Arc::new(RuleSet::resolve(&request.rules, &input_schema)?);
        let output_schema = Arc::clone(rules.output_schema());

        let mut source = self.open_input(request)?;
        let processor = Arc::new(ChunkProcessor::new(
            rules,
            Evaluator::new(self.options.division_by_zero),
        ));

        let mut sink = open_sink(&request.output.path, request.output.encoding, &output_schema)?;
        let coordinator = Coordinator::new(&self.pool, self.options.coordinator_options(), Arc::clone(&self.metrics))
            .with_observer(self.observer.clone())
            .timed_from(started);
        let task = Arc::new(move |chunk: Chunk| processor.process(chunk));
        let summary = match coordinator.run(source.as_mut(), task, cancel, |chunk| Ok(sink.write_chunk(chunk)?)) {
            Ok(summary) => summary,
            Err(e) => {
                sink.abort();
                tracing::debug!(output = %request.output.path.display(), "discarded staged report");
                return Err(e);
            }
        };
        if cancel.is_cancelled() {
            sink.abort();
            return Err(JobError::Cancelled);
        }
        if let Err(e) = self.check_deadline(started) {
            sink.abort();
            return Err(e);
        }
        let path = sink.finish()?;

        if summary.row_failure_count > 0 {
            tracing::warn!(
                row_failures = summary.row_failure_count,
                recorded = summary.row_failures.len(),
                "rows had rule evaluation failures"
            );
        }

        Ok(JobOutcome {
            path,
            encoding: request.output.encoding,
            rows_written: summary.rows_emitted,
            chunks_written: summary.chunks_emitted,
            output_columns: output_schema.field_names().map(str::to_string).collect(),
            row_failure_count: summary.row_failure_count,
            row_failures: summary.row_failures,
            metrics: self.metrics.snapshot(),
            elapsed: started.elapsed(),
        })
    }

    fn check_deadline(&self, started: Instant) -> JobResult<()> {
        match self.options.timeout {
            Some(limit) if started.elapsed() >= limit => Err(JobError::Timeout {
                elapsed: started.elapsed(),
            }),
            _ => Ok(()),
        }
    }

    fn open_input(&self, request: &GenerateRequest) -> JobResult<Box<dyn TableSource>> {
        let primary = open_source(&request.primary, self.options.execution.chunk_size)?;
        let Some(reference) = &request.reference else {
            return Ok(primary);
        };

        let data = load_dataset(&reference.source)?;
        let index = ReferenceIndex::build(data, &reference.join)?;
        tracing::debug!(
            reference = %reference.source.path.display(),
            keys = index.len(),
            "reference data indexed"
        );
        Ok(Box::new(JoinedSource::new(primary, Arc::new(index), &reference.join)?))
    }
}
