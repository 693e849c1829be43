// Reader options with documented defaults; all limits are opt-in guard rails.
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::core::policy::ErrorPolicy;

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
pub const DEFAULT_JSON_INITIAL_BUFFER: usize = 16 * 1024;
pub const DEFAULT_JSON_MAX_BUFFER: usize = 64 * 1024 * 1024;
pub const DEFAULT_JSON_MAX_DEPTH: usize = 128;
pub const DEFAULT_MAX_SNIPPET_CHARS: usize = 128;
pub const DEFAULT_SAMPLE_ROWS: usize = 100;
pub const DEFAULT_LONG_DIGIT_THRESHOLD: usize = 15;
pub const DEFAULT_PROGRESS_UNITS: u64 = 10_000;
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
pub const CANCEL_POLL_CHARS: usize = 4096;

/// How a double quote that appears inside an unquoted field is treated.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum QuoteMode {
    /// Report the quote; keep it as literal content when the policy continues.
    #[default]
    RfcStrict,
    /// Report the quote as an error for the whole record.
    ErrorOnIllegalQuote,
    /// Treat the quote as the start of a quoted section.
    Lenient,
}

/// Line-ending normalization applied to captured raw record text.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum LineEnding {
    #[default]
    Preserve,
    Lf,
    CrLf,
}

pub type NamingHook = Arc<dyn Fn(usize, &str) -> Option<String> + Send + Sync>;
pub type RawRecordObserver = Arc<dyn Fn(u64, &str) + Send + Sync>;
pub type ValueValidator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

#[derive(Clone)]
pub struct CsvOptions {
    pub separator: char,
    pub has_header: bool,
    pub quote_mode: QuoteMode,
    pub error_on_trailing_garbage: bool,
    pub trim_whitespace: bool,
    pub line_ending: LineEnding,
    pub capture_raw: bool,
    pub raw_observer: Option<RawRecordObserver>,
    pub naming_hook: Option<NamingHook>,
    pub infer_types: bool,
    pub sample_rows: usize,
    pub long_digit_threshold: usize,
    pub flexible_fields: bool,
    pub max_columns: Option<usize>,
    pub max_raw_record_len: Option<usize>,
    pub errors: ErrorPolicy,
    pub chunk_size: usize,
    pub max_snippet_chars: usize,
    pub source_name: String,
}

impl CsvOptions {
    pub fn new() -> Self {
        Self {
            separator: ',',
            has_header: true,
            quote_mode: QuoteMode::RfcStrict,
            error_on_trailing_garbage: true,
            trim_whitespace: false,
            line_ending: LineEnding::Preserve,
            capture_raw: false,
            raw_observer: None,
            naming_hook: None,
            infer_types: false,
            sample_rows: DEFAULT_SAMPLE_ROWS,
            long_digit_threshold: DEFAULT_LONG_DIGIT_THRESHOLD,
            flexible_fields: false,
            max_columns: None,
            max_raw_record_len: None,
            errors: ErrorPolicy::Throw,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_snippet_chars: DEFAULT_MAX_SNIPPET_CHARS,
            source_name: "<stream>".to_string(),
        }
    }

    /// Options for semicolon-separated exports.
    pub fn semicolon() -> Self {
        Self::new().with_separator(';')
    }

    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn with_quote_mode(mut self, mode: QuoteMode) -> Self {
        self.quote_mode = mode;
        self
    }

    pub fn with_trailing_garbage_error(mut self, enabled: bool) -> Self {
        self.error_on_trailing_garbage = enabled;
        self
    }

    pub fn with_trim_whitespace(mut self, enabled: bool) -> Self {
        self.trim_whitespace = enabled;
        self
    }

    pub fn with_line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }

    pub fn with_raw_capture(mut self, enabled: bool) -> Self {
        self.capture_raw = enabled;
        self
    }

    pub fn with_raw_observer(mut self, observer: impl Fn(u64, &str) + Send + Sync + 'static) -> Self {
        self.raw_observer = Some(Arc::new(observer));
        self
    }

    pub fn with_naming_hook(
        mut self,
        hook: impl Fn(usize, &str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.naming_hook = Some(Arc::new(hook));
        self
    }

    pub fn with_type_inference(mut self, sample_rows: usize) -> Self {
        self.infer_types = true;
        self.sample_rows = sample_rows.max(1);
        self
    }

    pub fn with_flexible_fields(mut self, enabled: bool) -> Self {
        self.flexible_fields = enabled;
        self
    }

    pub fn with_max_columns(mut self, max: usize) -> Self {
        self.max_columns = Some(max);
        self
    }

    pub fn with_max_raw_record_len(mut self, max: usize) -> Self {
        self.max_raw_record_len = Some(max);
        self
    }

    pub fn with_errors(mut self, errors: ErrorPolicy) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    pub(crate) fn wants_raw(&self) -> bool {
        self.capture_raw || self.raw_observer.is_some()
    }
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct JsonOptions {
    pub require_array_root: bool,
    pub max_depth: usize,
    pub max_elements: Option<u64>,
    pub max_element_bytes: Option<usize>,
    pub max_string_len: Option<usize>,
    pub validator: Option<ValueValidator>,
    pub initial_buffer: usize,
    pub max_buffer: usize,
    pub errors: ErrorPolicy,
    pub max_snippet_chars: usize,
    pub source_name: String,
}

impl JsonOptions {
    pub fn new() -> Self {
        Self {
            require_array_root: false,
            max_depth: DEFAULT_JSON_MAX_DEPTH,
            max_elements: None,
            max_element_bytes: None,
            max_string_len: None,
            validator: None,
            initial_buffer: DEFAULT_JSON_INITIAL_BUFFER,
            max_buffer: DEFAULT_JSON_MAX_BUFFER,
            errors: ErrorPolicy::Throw,
            max_snippet_chars: DEFAULT_MAX_SNIPPET_CHARS,
            source_name: "<stream>".to_string(),
        }
    }

    pub fn with_require_array_root(mut self, required: bool) -> Self {
        self.require_array_root = required;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    pub fn with_max_elements(mut self, max: u64) -> Self {
        self.max_elements = Some(max);
        self
    }

    pub fn with_max_element_bytes(mut self, max: usize) -> Self {
        self.max_element_bytes = Some(max);
        self
    }

    pub fn with_max_string_len(mut self, max: usize) -> Self {
        self.max_string_len = Some(max);
        self
    }

    pub fn with_validator(
        mut self,
        validator: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn with_initial_buffer(mut self, bytes: usize) -> Self {
        self.initial_buffer = bytes.max(1);
        self
    }

    pub fn with_max_buffer(mut self, bytes: usize) -> Self {
        self.max_buffer = bytes.max(1);
        self
    }

    pub fn with_errors(mut self, errors: ErrorPolicy) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    /// Values must be mirrored and checked in isolation before deserializing.
    pub(crate) fn needs_capture(&self) -> bool {
        self.validator.is_some() || self.max_string_len.is_some()
    }
}

impl Default for JsonOptions {
    fn default() -> Self {
        Self::new()
    }
}
