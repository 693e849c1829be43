//! Purpose: Coverage for the suspending CSV and JSON readers.
//! Exports: Integration tests only.
//! Role: Confirm the async drivers yield the same units as the blocking ones.
//! Invariants: Suspension happens only while filling; results match the blocking readers.
use chunkwise::api::{
    AsyncCsvReader, AsyncJsonReader, AsyncReadSource, CancelToken, CsvOptions, CsvReader,
    ErrorKind, ErrorPolicy, JsonObjectMaterializer, JsonOptions, ReadSource,
};
use serde::Deserialize;
use serde_json::{Value, json};

#[tokio::test]
async fn async_csv_matches_blocking_reader() {
    let input = "id,name\n1,Ann\n2,\"O\"\"Brien\"\n3,\"two\nlines\"\n";
    let blocking: Vec<Vec<String>> = CsvReader::new(ReadSource::new(input.as_bytes()), CsvOptions::new())
        .map(|record| record.expect("record").fields)
        .collect();

    let options = CsvOptions::new().with_chunk_size(3);
    let mut reader = AsyncCsvReader::new(AsyncReadSource::new(input.as_bytes()), options);
    let mut streamed = Vec::new();
    while let Some(record) = reader.next_record().await.expect("record") {
        streamed.push(record.fields);
    }
    assert_eq!(streamed, blocking);
    assert_eq!(reader.header(), Some(&["id".to_string(), "name".to_string()][..]));
    assert_eq!(reader.metrics().units_emitted, 3);
}

#[tokio::test]
async fn async_csv_typed_rows_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("scores.csv");
    std::fs::write(&path, "name,score,when\nann,10,2026-01-02\nbob,,2026-03-04T05:06:07Z\n")
        .expect("write");

    let options = CsvOptions::new().with_type_inference(10);
    let mut reader = AsyncCsvReader::open(&path, options).await.expect("open");
    let mut rows = Vec::new();
    while let Some(row) = reader.next_typed(&JsonObjectMaterializer).await.expect("row") {
        rows.push(Value::Object(row));
    }
    assert_eq!(
        rows,
        vec![
            json!({"name": "ann", "score": 10, "when": "2026-01-02T00:00:00Z"}),
            json!({"name": "bob", "score": null, "when": "2026-03-04T05:06:07Z"}),
        ]
    );
}

#[tokio::test]
async fn async_json_streams_array_elements() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        a: i64,
    }
    let input = r#"[{"a":1},{"a":2},{"a":"bad"},{"a":4}]"#;
    let options = JsonOptions::new()
        .with_require_array_root(true)
        .with_initial_buffer(4)
        .with_errors(ErrorPolicy::Skip);
    let mut reader: AsyncJsonReader<_, Row> =
        AsyncJsonReader::new(AsyncReadSource::new(input.as_bytes()), options);
    let mut rows = Vec::new();
    while let Some(row) = reader.next_value().await.expect("row") {
        rows.push(row);
    }
    assert_eq!(rows, vec![Row { a: 1 }, Row { a: 2 }, Row { a: 4 }]);
    assert_eq!(reader.metrics().errors, 1);
    assert_eq!(reader.metrics().raw_units_parsed, 4);
}

#[tokio::test]
async fn cancelled_async_json_read_fails_fast() {
    let token = CancelToken::new();
    token.cancel();
    let mut reader: AsyncJsonReader<_, Value> =
        AsyncJsonReader::new(AsyncReadSource::new(&b"[1,2,3]"[..]), JsonOptions::new())
            .with_cancel(token);
    let err = reader.next_value().await.expect_err("cancelled");
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(reader.next_value().await.expect("fused"), None);
}
