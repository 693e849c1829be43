//! Purpose: `chunkwise` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, streams decoded units as JSON Lines on stdout.
//! Invariants: stdout carries only decoded units, one JSON value per line.
//! Invariants: Skipped units, progress and the final summary are JSON notices on stderr.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod notice;

use chunkwise::api::{
    ChunkSource, CsvOptions, CsvReader, Error, ErrorAction, ErrorKind, ErrorPolicy, ErrorSink,
    JsonObjectMaterializer, JsonOptions, JsonReader, ProgressSnapshot, QuoteMode, ReadSource,
    ReaderError, ReaderMetrics, to_exit_code,
};
use notice::Notice;

const STDIN_PATH: &str = "-";

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `chunkwise --help`."));
            }
        },
    };

    let result = match cli.command {
        Command::Csv(args) => run_csv(args),
        Command::Json(args) => run_json(args),
    };
    result.map_err(add_io_hint)
}

#[derive(Parser)]
#[command(
    name = "chunkwise",
    version,
    about = "Stream large CSV and JSON files as JSON Lines in bounded memory",
    long_about = None,
    after_help = r#"EXAMPLES
  $ chunkwise csv people.csv --infer-types
  $ chunkwise csv export.txt --separator ';' --errors skip
  $ chunkwise json events.json --require-array --max-element-bytes 1048576
  $ cat big.json | chunkwise json - --progress

Skipped units and a final summary are reported as JSON notices on stderr.
Set RUST_LOG=debug for decoder lifecycle logs."#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode CSV records into one JSON object per line.
    Csv(CsvArgs),
    /// Decode the elements of a JSON array (or a single root value), one per line.
    Json(JsonArgs),
}

#[derive(Args)]
struct CommonArgs {
    #[arg(help = "Input file, or `-` for stdin", value_hint = ValueHint::FilePath)]
    path: PathBuf,
    #[arg(
        long,
        default_value = "throw",
        value_enum,
        help = "What to do with malformed units: throw|skip|stop"
    )]
    errors: ErrorPolicyCli,
    #[arg(long, help = "Emit periodic progress notices on stderr")]
    progress: bool,
    #[arg(long, help = "Suppress skip and summary notices")]
    quiet: bool,
}

#[derive(Args)]
struct CsvArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long, default_value_t = ',', help = "Field separator")]
    separator: char,
    #[arg(long, help = "Treat the first record as data; columns are named Column1..N")]
    no_header: bool,
    #[arg(long, help = "Infer column types from the first sampled records")]
    infer_types: bool,
    #[arg(long, help = "Number of records sampled for type inference")]
    sample_rows: Option<usize>,
    #[arg(long, default_value = "rfc-strict", value_enum, help = "Handling of quotes inside unquoted fields")]
    quote_mode: QuoteModeCli,
    #[arg(long, help = "Accept text after a closing quote")]
    allow_trailing_garbage: bool,
    #[arg(long, help = "Trim whitespace around unquoted fields")]
    trim: bool,
    #[arg(long, help = "Pad short records with nulls and drop extra values")]
    flexible: bool,
    #[arg(long, help = "Reject records with more fields than this")]
    max_columns: Option<usize>,
    #[arg(long, help = "Reject records whose raw text is longer than this many characters")]
    max_record_len: Option<usize>,
    #[arg(long, help = "Bytes read from the input per chunk")]
    chunk_size: Option<usize>,
    #[arg(long, help = "Emit raw field arrays instead of objects")]
    arrays: bool,
}

#[derive(Args)]
struct JsonArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long, help = "Fail unless the document root is an array")]
    require_array: bool,
    #[arg(long, help = "Maximum nesting depth, counting the root array")]
    max_depth: Option<usize>,
    #[arg(long, help = "Maximum number of elements to read")]
    max_elements: Option<u64>,
    #[arg(long, help = "Maximum encoded size of one element in bytes")]
    max_element_bytes: Option<usize>,
    #[arg(long, help = "Maximum length of any string or key, in characters")]
    max_string_len: Option<usize>,
    #[arg(long, help = "Initial window size in bytes")]
    initial_buffer: Option<usize>,
    #[arg(long, help = "Window size ceiling in bytes")]
    max_buffer: Option<usize>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ErrorPolicyCli {
    Throw,
    Skip,
    Stop,
}

impl From<ErrorPolicyCli> for ErrorPolicy {
    fn from(value: ErrorPolicyCli) -> Self {
        match value {
            ErrorPolicyCli::Throw => ErrorPolicy::Throw,
            ErrorPolicyCli::Skip => ErrorPolicy::Skip,
            ErrorPolicyCli::Stop => ErrorPolicy::Stop,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum QuoteModeCli {
    RfcStrict,
    Error,
    Lenient,
}

impl From<QuoteModeCli> for QuoteMode {
    fn from(value: QuoteModeCli) -> Self {
        match value {
            QuoteModeCli::RfcStrict => QuoteMode::RfcStrict,
            QuoteModeCli::Error => QuoteMode::ErrorOnIllegalQuote,
            QuoteModeCli::Lenient => QuoteMode::Lenient,
        }
    }
}

impl CsvArgs {
    fn options(&self) -> CsvOptions {
        let mut options = CsvOptions::new()
            .with_separator(self.separator)
            .with_header(!self.no_header)
            .with_quote_mode(self.quote_mode.into())
            .with_trailing_garbage_error(!self.allow_trailing_garbage)
            .with_trim_whitespace(self.trim)
            .with_flexible_fields(self.flexible)
            .with_errors(self.common.errors.into());
        if self.infer_types {
            let sample_rows = self.sample_rows.unwrap_or(options.sample_rows);
            options = options.with_type_inference(sample_rows);
        }
        if let Some(max) = self.max_columns {
            options = options.with_max_columns(max);
        }
        if let Some(max) = self.max_record_len {
            options = options.with_max_raw_record_len(max);
        }
        if let Some(size) = self.chunk_size {
            options = options.with_chunk_size(size);
        }
        options
    }
}

impl JsonArgs {
    fn options(&self) -> JsonOptions {
        let mut options = JsonOptions::new()
            .with_require_array_root(self.require_array)
            .with_errors(self.common.errors.into());
        if let Some(depth) = self.max_depth {
            options = options.with_max_depth(depth);
        }
        if let Some(max) = self.max_elements {
            options = options.with_max_elements(max);
        }
        if let Some(max) = self.max_element_bytes {
            options = options.with_max_element_bytes(max);
        }
        if let Some(max) = self.max_string_len {
            options = options.with_max_string_len(max);
        }
        if let Some(bytes) = self.initial_buffer {
            options = options.with_initial_buffer(bytes);
        }
        if let Some(bytes) = self.max_buffer {
            options = options.with_max_buffer(bytes);
        }
        options
    }
}

fn is_stdin(path: &Path) -> bool {
    path.as_os_str() == STDIN_PATH
}

fn run_csv(args: CsvArgs) -> Result<RunOutcome, Error> {
    let options = args.options();
    if is_stdin(&args.common.path) {
        let options = options.with_source_name("<stdin>");
        let reader = CsvReader::new(ReadSource::new(io::stdin()), options);
        return stream_csv(reader, &args);
    }
    let reader = CsvReader::open(&args.common.path, options)?;
    stream_csv(reader, &args)
}

fn stream_csv<S: ChunkSource>(reader: CsvReader<S>, args: &CsvArgs) -> Result<RunOutcome, Error> {
    let common = &args.common;
    let source = source_label(&common.path);
    let mut reader = reader.with_error_sink(NoticeSink::new("csv", common.quiet));
    if common.progress {
        reader = reader.with_progress(progress_notices("csv", source.clone()));
    }

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let metrics = if args.arrays {
        for record in reader.by_ref() {
            write_line(&mut out, &json!(record?.into_fields()))?;
        }
        reader.metrics().clone()
    } else {
        let mut typed = reader.typed(JsonObjectMaterializer);
        for row in typed.by_ref() {
            write_line(&mut out, &Value::Object(row?))?;
        }
        typed.metrics().clone()
    };
    flush(&mut out)?;

    if !common.quiet {
        emit_notice(&summary_notice("csv", &source, &metrics));
    }
    Ok(RunOutcome::ok())
}

fn run_json(args: JsonArgs) -> Result<RunOutcome, Error> {
    let options = args.options();
    if is_stdin(&args.common.path) {
        let options = options.with_source_name("<stdin>");
        let reader = JsonReader::new(ReadSource::new(io::stdin()), options);
        return stream_json(reader, &args.common);
    }
    let reader = JsonReader::open(&args.common.path, options)?;
    stream_json(reader, &args.common)
}

fn stream_json<S: ChunkSource>(
    reader: JsonReader<S, Value>,
    common: &CommonArgs,
) -> Result<RunOutcome, Error> {
    let source = source_label(&common.path);
    let mut reader = reader.with_error_sink(NoticeSink::new("json", common.quiet));
    if common.progress {
        reader = reader.with_progress(progress_notices("json", source.clone()));
    }

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for value in reader.by_ref() {
        write_line(&mut out, &value?)?;
    }
    flush(&mut out)?;

    if !common.quiet {
        emit_notice(&summary_notice("json", &source, reader.metrics()));
    }
    Ok(RunOutcome::ok())
}

fn source_label(path: &Path) -> String {
    if is_stdin(path) {
        "<stdin>".to_string()
    } else {
        path.display().to_string()
    }
}

fn write_line(out: &mut impl Write, value: &Value) -> Result<(), Error> {
    serde_json::to_writer(&mut *out, value).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to write output")
            .with_source(err)
    })?;
    out.write_all(b"\n").map_err(output_error)
}

fn flush(out: &mut impl Write) -> Result<(), Error> {
    out.flush().map_err(output_error)
}

fn output_error(err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write output")
        .with_source(err)
}

/// Turns every non-fatal reader error into a stderr notice; thrown errors
/// are left to `emit_error`.
struct NoticeSink {
    cmd: &'static str,
    quiet: bool,
}

impl NoticeSink {
    fn new(cmd: &'static str, quiet: bool) -> Self {
        Self { cmd, quiet }
    }
}

impl ErrorSink for NoticeSink {
    fn report(&mut self, error: &ReaderError) {
        if self.quiet || error.action == ErrorAction::Thrown {
            return;
        }
        emit_notice(&reader_error_notice(self.cmd, error));
    }
}

fn reader_error_notice(cmd: &str, error: &ReaderError) -> Notice {
    let mut notice = Notice::new(
        error.action.label(),
        cmd,
        error.source.clone(),
        error.message.clone(),
    )
    .at(error.timestamp)
    .detail("reader", error.reader.label())
    .detail("error", error.kind.label())
    .detail("index", error.index);
    if let Some(line) = error.line {
        notice = notice.detail("line", line);
    }
    if let Some(excerpt) = &error.excerpt {
        notice = notice.detail("excerpt", excerpt.clone());
    }
    notice
}

fn progress_notices(
    cmd: &'static str,
    source: String,
) -> impl FnMut(&ProgressSnapshot) + Send + 'static {
    move |snapshot: &ProgressSnapshot| {
        let mut notice = Notice::new(
            "progress",
            cmd,
            source.clone(),
            format!("{} units read", snapshot.units_read),
        )
        .detail("lines_read", snapshot.lines_read)
        .detail("units_read", snapshot.units_read)
        .detail("units_emitted", snapshot.units_emitted)
        .detail("errors", snapshot.errors)
        .detail("bytes_read", snapshot.bytes_read);
        if let Some(percent) = snapshot.percent_complete {
            notice = notice.detail("percent_complete", percent);
        }
        emit_notice(&notice.detail("elapsed_ms", snapshot.elapsed.as_millis() as u64));
    }
}

fn summary_notice(cmd: &str, source: &str, metrics: &ReaderMetrics) -> Notice {
    let message = format!(
        "emitted {} of {} units ({} errors)",
        metrics.units_emitted, metrics.raw_units_parsed, metrics.errors
    );
    Notice::new("summary", cmd, source, message)
        .detail("lines_read", metrics.lines_read)
        .detail("units_read", metrics.raw_units_parsed)
        .detail("units_emitted", metrics.units_emitted)
        .detail("errors", metrics.errors)
        .detail("bytes_read", metrics.bytes_read)
        .detail("elapsed_ms", metrics.elapsed().as_millis() as u64)
}

fn emit_notice(notice: &Notice) {
    if io::stderr().is_terminal() {
        eprintln!("{}", notice.to_text());
        return;
    }
    if let Ok(json) = serde_json::to_string(&notice.to_json()) {
        eprintln!("{json}");
    }
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() || err.kind() != ErrorKind::Io {
        return err;
    }
    err.with_hint("I/O error. Check the path and file permissions.")
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    err.message()
        .map(str::to_string)
        .unwrap_or_else(|| err.kind().label().to_string())
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current = StdError::source(err);
    while let Some(cause) = current {
        causes.push(cause.to_string());
        current = cause.source();
    }
    causes
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(source) = err.source_name() {
        lines.push(format!("source: {source}"));
    }
    if let Some(line) = err.line() {
        lines.push(format!("line: {line}"));
    }
    if let Some(snippet) = err.snippet() {
        lines.push(format!("near: {snippet:?}"));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(source) = err.source_name() {
        inner.insert("source".to_string(), json!(source));
    }
    if let Some(line) = err.line() {
        inner.insert("line".to_string(), json!(line));
    }
    if let Some(index) = err.index() {
        inner.insert("index".to_string(), json!(index));
    }
    if let Some(snippet) = err.snippet() {
        inner.insert("snippet".to_string(), json!(snippet));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command, error_json, error_text};
    use chunkwise::api::{Error, ErrorKind, ErrorPolicy, QuoteMode};
    use clap::Parser;

    #[test]
    fn csv_flags_map_onto_options() {
        let cli = Cli::try_parse_from([
            "chunkwise",
            "csv",
            "data.csv",
            "--separator",
            ";",
            "--no-header",
            "--infer-types",
            "--sample-rows",
            "5",
            "--quote-mode",
            "lenient",
            "--errors",
            "skip",
            "--max-columns",
            "3",
        ])
        .expect("parse");
        let Command::Csv(args) = cli.command else {
            panic!("expected csv command");
        };
        let options = args.options();
        assert_eq!(options.separator, ';');
        assert!(!options.has_header);
        assert!(options.infer_types);
        assert_eq!(options.sample_rows, 5);
        assert_eq!(options.quote_mode, QuoteMode::Lenient);
        assert_eq!(options.errors, ErrorPolicy::Skip);
        assert_eq!(options.max_columns, Some(3));
    }

    #[test]
    fn json_flags_map_onto_options() {
        let cli = Cli::try_parse_from([
            "chunkwise",
            "json",
            "-",
            "--require-array",
            "--max-element-bytes",
            "1024",
            "--errors",
            "stop",
        ])
        .expect("parse");
        let Command::Json(args) = cli.command else {
            panic!("expected json command");
        };
        let options = args.options();
        assert!(options.require_array_root);
        assert_eq!(options.max_element_bytes, Some(1024));
        assert_eq!(options.errors, ErrorPolicy::Stop);
    }

    #[test]
    fn error_json_carries_location() {
        let err = Error::new(ErrorKind::CsvQuote)
            .with_message("unterminated quoted field")
            .with_source_name("people.csv")
            .with_line(3)
            .with_index(2);
        let value = error_json(&err);
        let inner = value.get("error").expect("error object");
        assert_eq!(inner.get("kind").and_then(|v| v.as_str()), Some("CsvQuote"));
        assert_eq!(inner.get("line").and_then(|v| v.as_u64()), Some(3));
        assert_eq!(inner.get("index").and_then(|v| v.as_u64()), Some(2));
        assert_eq!(inner.get("source").and_then(|v| v.as_str()), Some("people.csv"));
    }

    #[test]
    fn error_text_lists_hint() {
        let err = Error::new(ErrorKind::Usage)
            .with_message("bad input")
            .with_hint("Try `chunkwise --help`.");
        let text = error_text(&err);
        assert!(text.starts_with("error: bad input"));
        assert!(text.contains("hint: Try `chunkwise --help`."));
    }
}
