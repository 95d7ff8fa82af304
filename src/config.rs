//! Job configuration with environment overrides.

use std::time::Duration;

use crate::execution::{CoordinatorOptions, ExecutionOptions};
use crate::expr::DivisionByZeroPolicy;

/// Settings for one `generate` call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    pub execution: ExecutionOptions,
    /// Bound on total job wall time. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// How long in-flight chunks may keep running after a job is aborted.
    pub cancel_grace_period: Duration,
    pub division_by_zero: DivisionByZeroPolicy,
    /// Row failures kept in the outcome; the total count is always reported.
    pub max_recorded_row_failures: usize,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            execution: ExecutionOptions::default(),
            timeout: None,
            cancel_grace_period: Duration::from_secs(5),
            division_by_zero: DivisionByZeroPolicy::default(),
            max_recorded_row_failures: 1_000,
        }
    }
}

impl GenerateOptions {
    /// Create options from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `REPORT_CHUNK_SIZE`: rows per chunk
    /// - `REPORT_MAX_WORKERS`: worker threads
    /// - `REPORT_MAX_IN_FLIGHT_CHUNKS`: dispatch window
    /// - `REPORT_TIMEOUT_SECS`: job timeout in seconds (`0` disables it)
    /// - `REPORT_CANCEL_GRACE_MS`: grace period for in-flight chunks after an abort
    /// - `REPORT_DIVISION_BY_ZERO`: `null` or `fail`
    ///
    /// Values that do not parse are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`GenerateOptions::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        if let Some(v) = parsed("REPORT_CHUNK_SIZE") {
            cfg.execution.chunk_size = v as usize;
        }

        if let Some(v) = parsed("REPORT_MAX_WORKERS") {
            cfg.execution.num_threads = Some(v as usize);
        }

        if let Some(v) = parsed("REPORT_MAX_IN_FLIGHT_CHUNKS") {
            cfg.execution.max_in_flight_chunks = v as usize;
        }

        if let Some(v) = parsed("REPORT_TIMEOUT_SECS") {
            cfg.timeout = (v > 0).then(|| Duration::from_secs(v));
        }

        if let Some(v) = parsed("REPORT_CANCEL_GRACE_MS") {
            cfg.cancel_grace_period = Duration::from_millis(v);
        }

        if let Some(policy) = lookup("REPORT_DIVISION_BY_ZERO").and_then(|s| s.parse().ok()) {
            cfg.division_by_zero = policy;
        }

        cfg
    }

    pub fn with_execution(mut self, execution: ExecutionOptions) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_division_by_zero(mut self, policy: DivisionByZeroPolicy) -> Self {
        self.division_by_zero = policy;
        self
    }

    pub(crate) fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            max_in_flight_chunks: self.execution.max_in_flight_chunks,
            timeout: self.timeout,
            cancel_grace_period: self.cancel_grace_period,
            max_recorded_row_failures: self.max_recorded_row_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::GenerateOptions;
    use crate::expr::DivisionByZeroPolicy;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn overrides_apply_and_garbage_is_ignored() {
        let cfg = GenerateOptions::from_lookup(lookup(&[
            ("REPORT_CHUNK_SIZE", "128"),
            ("REPORT_MAX_WORKERS", "3"),
            ("REPORT_MAX_IN_FLIGHT_CHUNKS", "lots"),
            ("REPORT_TIMEOUT_SECS", "60"),
            ("REPORT_CANCEL_GRACE_MS", "250"),
            ("REPORT_DIVISION_BY_ZERO", "fail"),
        ]));
        let defaults = GenerateOptions::default();

        assert_eq!(cfg.execution.chunk_size, 128);
        assert_eq!(cfg.execution.num_threads, Some(3));
        assert_eq!(cfg.execution.max_in_flight_chunks, defaults.execution.max_in_flight_chunks);
        assert_eq!(cfg.timeout, Some(Duration::from_secs(60)));
        assert_eq!(cfg.cancel_grace_period, Duration::from_millis(250));
        assert_eq!(cfg.division_by_zero, DivisionByZeroPolicy::Fail);
    }

    #[test]
    fn zero_timeout_disables_it() {
        let cfg = GenerateOptions::from_lookup(lookup(&[("REPORT_TIMEOUT_SECS", "0")]));
        assert_eq!(cfg.timeout, None);
        assert_eq!(GenerateOptions::from_lookup(lookup(&[])), GenerateOptions::default());
    }
}
