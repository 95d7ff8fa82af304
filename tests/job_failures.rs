use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rule_report_engine::config::GenerateOptions;
use rule_report_engine::error::{JobError, RuleError, SourceError};
use rule_report_engine::execution::{ExecutionEvent, ExecutionObserver, ExecutionOptions};
use rule_report_engine::job::{GenerateRequest, OutputSpec, ReportEngine, generate};
use rule_report_engine::rules::RuleDefinitions;
use rule_report_engine::sink::OutputEncoding;
use rule_report_engine::source::SourceSpec;
use rule_report_engine::types::{DataType, Field, Schema};
use rule_report_engine::CancellationToken;

fn schema() -> Schema {
    Schema::new(vec![
        Field::new("price", DataType::Int64),
        Field::new("qty", DataType::Int64),
    ])
}

fn write_file(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

fn many_rows(n: usize) -> String {
    let mut out = String::from("price,qty\n");
    for i in 0..n {
        out.push_str(&format!("{i},{}\n", i % 3));
    }
    out
}

fn options(workers: usize, chunk_size: usize) -> GenerateOptions {
    GenerateOptions::default().with_execution(ExecutionOptions {
        num_threads: Some(workers),
        chunk_size,
        max_in_flight_chunks: 2,
    })
}

fn total_rule() -> RuleDefinitions {
    RuleDefinitions::from_pairs([("total", "price * qty")]).unwrap()
}

fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn malformed_row_fails_the_job_and_publishes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(dir.path(), "in.csv", "price,qty\n1,2\n3,4\nabc,5\n6,7\n");
    let output = dir.path().join("report.csv");
    let request = GenerateRequest::new(
        SourceSpec::new(&input, schema()),
        total_rule(),
        OutputSpec::new(&output, OutputEncoding::Csv),
    );

    let err = generate(&request, options(2, 1)).unwrap_err();
    match err {
        JobError::Source(SourceError::MalformedRow { line, column, raw, .. }) => {
            assert_eq!(line, 4);
            assert_eq!(column, "price");
            assert_eq!(raw, "abc");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(entries(dir.path()), vec!["in.csv"]);
}

#[test]
fn failed_job_leaves_an_existing_report_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(dir.path(), "in.csv", "price,qty\n1,2\n3\n");
    let output = write_file(dir.path(), "report.csv", "previous run\n");
    let request = GenerateRequest::new(
        SourceSpec::new(&input, schema()),
        total_rule(),
        OutputSpec::new(&output, OutputEncoding::Csv),
    );

    let err = generate(&request, options(1, 10)).unwrap_err();
    assert!(matches!(
        err,
        JobError::Source(SourceError::MalformedRow { line: 3, .. })
    ));
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "previous run\n");
    assert_eq!(entries(dir.path()), vec!["in.csv", "report.csv"]);
}

#[test]
fn rule_errors_abort_before_any_output_is_staged() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(dir.path(), "in.csv", "price,qty\n1,2\n");
    let output = dir.path().join("out").join("report.csv");

    let unknown = GenerateRequest::new(
        SourceSpec::new(&input, schema()),
        RuleDefinitions::from_pairs([("total", "price * foo")]).unwrap(),
        OutputSpec::new(&output, OutputEncoding::Csv),
    );
    match generate(&unknown, options(1, 10)).unwrap_err() {
        JobError::Rules(RuleError::UnknownColumn { rule, column }) => {
            assert_eq!((rule.as_str(), column.as_str()), ("total", "foo"));
        }
        other => panic!("unexpected {other:?}"),
    }

    let cyclic = GenerateRequest::new(
        SourceSpec::new(&input, schema()),
        RuleDefinitions::from_pairs([("a", "b + 1"), ("b", "a + 1")]).unwrap(),
        OutputSpec::new(&output, OutputEncoding::Csv),
    );
    match generate(&cyclic, options(1, 10)).unwrap_err() {
        JobError::Rules(RuleError::CyclicDependency { rules }) => assert_eq!(rules, vec!["a", "b"]),
        other => panic!("unexpected {other:?}"),
    }

    let forbidden = GenerateRequest::new(
        SourceSpec::new(&input, schema()),
        RuleDefinitions::from_pairs([("x", "__import__('os')")]).unwrap(),
        OutputSpec::new(&output, OutputEncoding::Csv),
    );
    assert!(matches!(generate(&forbidden, options(1, 10)), Err(JobError::Rules(_))));

    assert!(!output.parent().unwrap().exists());
}

struct CancelAfterFirstChunk {
    token: CancellationToken,
}

impl ExecutionObserver for CancelAfterFirstChunk {
    fn on_event(&self, event: &ExecutionEvent) {
        if let ExecutionEvent::ChunkEmitted { .. } = event {
            self.token.cancel();
        }
    }
}

#[test]
fn cancelled_job_leaves_no_file_under_the_final_name() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(dir.path(), "in.csv", &many_rows(500));

    for encoding in [OutputEncoding::Csv, OutputEncoding::Json, OutputEncoding::Xlsx] {
        let token = CancellationToken::new();
        let output = dir.path().join(format!("report.{encoding}"));
        let engine = ReportEngine::new(options(2, 5))
            .unwrap()
            .with_observer(Arc::new(CancelAfterFirstChunk { token: token.clone() }));
        let request = GenerateRequest::new(
            SourceSpec::new(&input, schema()),
            total_rule(),
            OutputSpec::new(&output, encoding),
        );

        let err = engine.generate(&request, &token).unwrap_err();
        assert!(matches!(err, JobError::Cancelled), "{encoding}: {err:?}");
        assert!(!output.exists());
    }
    assert_eq!(entries(dir.path()), vec!["in.csv"]);
}

#[test]
fn timeout_aborts_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(dir.path(), "in.csv", &many_rows(2_000));
    let output = dir.path().join("report.csv");
    let request = GenerateRequest::new(
        SourceSpec::new(&input, schema()),
        total_rule(),
        OutputSpec::new(&output, OutputEncoding::Csv),
    );

    let opts = options(1, 1).with_timeout(Duration::from_nanos(1));
    let err = generate(&request, opts).unwrap_err();
    assert!(matches!(err, JobError::Timeout { .. }), "{err:?}");
    assert!(!output.exists());
}

struct SlowFinish(Duration);

impl ExecutionObserver for SlowFinish {
    fn on_event(&self, event: &ExecutionEvent) {
        if let ExecutionEvent::RunFinished { .. } = event {
            std::thread::sleep(self.0);
        }
    }
}

#[test]
fn deadline_is_checked_again_before_publishing() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(dir.path(), "in.csv", &many_rows(10));
    let output = dir.path().join("report.csv");
    let request = GenerateRequest::new(
        SourceSpec::new(&input, schema()),
        total_rule(),
        OutputSpec::new(&output, OutputEncoding::Csv),
    );

    let engine = ReportEngine::new(options(1, 100).with_timeout(Duration::from_millis(200)))
        .unwrap()
        .with_observer(Arc::new(SlowFinish(Duration::from_millis(300))));
    let err = engine.generate(&request, &CancellationToken::new()).unwrap_err();
    assert!(
        matches!(err, JobError::Timeout { elapsed } if elapsed >= Duration::from_millis(200)),
        "{err:?}"
    );
    assert_eq!(entries(dir.path()), vec!["in.csv"]);
}

#[test]
fn invalid_options_are_rejected_up_front() {
    let zero_chunks = GenerateOptions::default().with_execution(ExecutionOptions {
        chunk_size: 0,
        ..ExecutionOptions::default()
    });
    assert!(matches!(
        ReportEngine::new(zero_chunks),
        Err(JobError::InvalidOptions { .. })
    ));
}
