use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parquet::column::writer::ColumnWriter;
use parquet::data_type::ByteArray;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::parser::parse_message_type;

use rule_report_engine::config::GenerateOptions;
use rule_report_engine::execution::ExecutionOptions;
use rule_report_engine::job::{GenerateRequest, OutputSpec, generate};
use rule_report_engine::rules::RuleDefinitions;
use rule_report_engine::sink::OutputEncoding;
use rule_report_engine::source::{DuplicateKeyPolicy, JoinSpec, SourceSpec};
use rule_report_engine::types::{DataType, Field, Schema};

fn write_sales_parquet(path: &Path) {
    let schema = Arc::new(
        parse_message_type(
            r#"
            message schema {
              REQUIRED BINARY sku (UTF8);
              REQUIRED INT64 qty;
              REQUIRED DOUBLE price;
            }
            "#,
        )
        .unwrap(),
    );
    let props = Arc::new(WriterProperties::builder().build());
    let file = File::create(path).unwrap();
    let mut writer = SerializedFileWriter::new(file, schema, props).unwrap();

    let mut rg = writer.next_row_group().unwrap();
    while let Some(mut col) = rg.next_column().unwrap() {
        match col.untyped() {
            ColumnWriter::ByteArrayColumnWriter(w) => {
                let skus: Vec<ByteArray> = ["a", "b", "c", "a", "d"].into_iter().map(ByteArray::from).collect();
                w.write_batch(&skus, None, None).unwrap();
            }
            ColumnWriter::Int64ColumnWriter(w) => {
                w.write_batch(&[1_i64, 2, 3, 4, 5], None, None).unwrap();
            }
            ColumnWriter::DoubleColumnWriter(w) => {
                w.write_batch(&[0.5_f64, 1.5, 2.0, 0.25, 4.0], None, None).unwrap();
            }
            _ => panic!("unexpected column writer in test"),
        }
        col.close().unwrap();
    }
    rg.close().unwrap();
    writer.close().unwrap();
}

fn sales_schema() -> Schema {
    Schema::new(vec![
        Field::new("price", DataType::Float64),
        Field::new("sku", DataType::Utf8),
        Field::new("qty", DataType::Int64),
    ])
}

fn write_file(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

fn options(chunk_size: usize) -> GenerateOptions {
    GenerateOptions::default().with_execution(ExecutionOptions {
        num_threads: Some(2),
        chunk_size,
        max_in_flight_chunks: 2,
    })
}

#[test]
fn parquet_primary_is_streamed_in_schema_order() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sales.parquet");
    write_sales_parquet(&input);
    let output = dir.path().join("report.json");

    let request = GenerateRequest::new(
        SourceSpec::new(&input, sales_schema()),
        RuleDefinitions::from_pairs([("total", "qty * price")]).unwrap(),
        OutputSpec::new(&output, OutputEncoding::Json),
    );
    let outcome = generate(&request, options(2)).unwrap();
    assert_eq!((outcome.rows_written, outcome.chunks_written), (5, 3));

    let parsed: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    let totals: Vec<f64> = parsed
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["total"].as_f64().unwrap())
        .collect();
    assert_eq!(totals, vec![0.5, 3.0, 6.0, 1.0, 20.0]);
    assert_eq!(parsed[0]["sku"], "a");
}

#[test]
fn parquet_reference_data_can_be_joined() {
    let dir = tempfile::tempdir().unwrap();
    let reference = dir.path().join("sales.parquet");
    write_sales_parquet(&reference);
    let primary = write_file(dir.path(), "lookups.csv", "code,factor\nb,10\nd,2\nx,1\n");
    let output = dir.path().join("report.csv");

    let primary_schema = Schema::new(vec![Field::new("code", DataType::Utf8), Field::new("factor", DataType::Int64)]);
    let request = GenerateRequest::new(
        SourceSpec::new(&primary, primary_schema),
        RuleDefinitions::from_pairs([("scaled", "factor * price")]).unwrap(),
        OutputSpec::new(&output, OutputEncoding::Csv),
    )
    .with_reference(
        SourceSpec::new(&reference, Schema::new(vec![Field::new("sku", DataType::Utf8), Field::new("price", DataType::Float64)])),
        JoinSpec::new("code", "sku").with_duplicate_keys(DuplicateKeyPolicy::FirstMatch),
    );

    let outcome = generate(&request, options(1)).unwrap();
    assert_eq!(outcome.output_columns, vec!["code", "factor", "price", "scaled"]);
    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "code,factor,price,scaled\nb,10,1.5,15\nd,2,4,8\nx,1,,\n"
    );
}
