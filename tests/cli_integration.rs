// CLI integration tests for the csv and json commands.
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use serde_json::{Value, json};

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_chunkwise");
    Command::new(exe)
}

fn parse_lines(output: &[u8]) -> Vec<Value> {
    let text = String::from_utf8_lossy(output);
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("valid json line"))
        .collect()
}

/// JSON lines on stderr; log lines (if RUST_LOG is set) are ignored.
fn stderr_values(stderr: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stderr)
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

fn notices(stderr: &[u8], kind: &str) -> Vec<Value> {
    stderr_values(stderr)
        .into_iter()
        .filter_map(|value| value.get("notice").cloned())
        .filter(|notice| notice.get("kind").and_then(Value::as_str) == Some(kind))
        .collect()
}

fn write_fixture(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write fixture");
    path.to_str().expect("utf8 path").to_string()
}

#[test]
fn csv_command_streams_objects() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write_fixture(temp.path(), "people.csv", "id,name\n1,Ann\n2,\"O\"\"Brien\"\n");

    let output = cmd().args(["csv", &path]).output().expect("run csv");
    assert!(output.status.success());
    assert_eq!(
        parse_lines(&output.stdout),
        vec![json!({"id": "1", "name": "Ann"}), json!({"id": "2", "name": "O\"Brien"})]
    );

    let summary = notices(&output.stderr, "summary");
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0]["details"]["units_emitted"], 2);
    assert_eq!(summary[0]["cmd"], "csv");
}

#[test]
fn csv_skip_reports_notices_and_keeps_going() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write_fixture(temp.path(), "wide.csv", "a,b,c\n1,2,3\n1,2,3,4,5\n7,8,9\n");

    let output = cmd()
        .args(["csv", &path, "--max-columns", "3", "--errors", "skip", "--arrays"])
        .output()
        .expect("run csv");
    assert!(output.status.success());
    assert_eq!(parse_lines(&output.stdout), vec![json!(["1", "2", "3"]), json!(["7", "8", "9"])]);

    let skipped = notices(&output.stderr, "skip");
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0]["details"]["error"], "csv-limit");
    assert_eq!(skipped[0]["details"]["line"], 3);
}

#[test]
fn csv_throw_exits_with_error_json() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write_fixture(temp.path(), "broken.csv", "a\n\"open\n");

    let output = cmd().args(["csv", &path]).output().expect("run csv");
    assert_eq!(output.status.code(), Some(5));
    let errors: Vec<Value> = stderr_values(&output.stderr)
        .into_iter()
        .filter_map(|value| value.get("error").cloned())
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["kind"], "CsvQuote");
}

#[test]
fn csv_infers_types() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write_fixture(temp.path(), "typed.csv", "code,qty,ok\n007,1,true\n042,2,false\n");

    let output = cmd()
        .args(["csv", &path, "--infer-types", "--quiet"])
        .output()
        .expect("run csv");
    assert!(output.status.success());
    assert_eq!(
        parse_lines(&output.stdout),
        vec![
            json!({"code": "007", "qty": 1, "ok": true}),
            json!({"code": "042", "qty": 2, "ok": false}),
        ]
    );
    assert!(notices(&output.stderr, "summary").is_empty());
}

#[test]
fn json_command_reads_stdin() {
    let mut child = cmd()
        .args(["json", "-", "--require-array"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(br#"[{"a":1}, {"a":2}]"#)
        .expect("write stdin");
    let output = child.wait_with_output().expect("wait");
    assert!(output.status.success());
    assert_eq!(parse_lines(&output.stdout), vec![json!({"a": 1}), json!({"a": 2})]);

    let summary = notices(&output.stderr, "summary");
    assert_eq!(summary[0]["source"], "<stdin>");
}

#[test]
fn json_size_limit_maps_to_exit_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write_fixture(temp.path(), "big.json", r#"[1, [1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1], 2]"#);

    let output = cmd()
        .args(["json", &path, "--max-element-bytes", "8"])
        .output()
        .expect("run json");
    assert_eq!(output.status.code(), Some(7));
    assert_eq!(parse_lines(&output.stdout), vec![json!(1)]);

    let output = cmd()
        .args(["json", &path, "--max-element-bytes", "8", "--errors", "skip"])
        .output()
        .expect("run json");
    assert!(output.status.success());
    assert_eq!(parse_lines(&output.stdout), vec![json!(1), json!(2)]);
}

#[test]
fn missing_file_is_io_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing = temp.path().join("nope.csv");
    let output = cmd()
        .args(["csv", missing.to_str().expect("utf8 path")])
        .output()
        .expect("run csv");
    assert_eq!(output.status.code(), Some(3));
    let text = String::from_utf8_lossy(&output.stderr);
    assert!(text.contains("\"kind\":\"Io\""));
    assert!(text.contains("hint"));
}

#[test]
fn unknown_flag_is_usage_error() {
    let output = cmd().args(["csv", "x.csv", "--bogus"]).output().expect("run");
    assert_eq!(output.status.code(), Some(2));
}
