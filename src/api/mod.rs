//! Purpose: Define the stable public Rust API boundary for chunkwise.
//! Exports: Readers, decoders, options, policies, metrics, schema and error types.
//! Role: Public, additive-only surface; hides the internal module layout.
//! Invariants: This module is the only public path to decoder primitives.
//! Invariants: Internal modules remain private and are not directly exposed.

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::cancel::CancelToken;
pub use crate::core::csv::reader::{AsyncCsvReader, CsvDecoder, CsvReader, TypedCsvReader};
pub use crate::core::csv::schema::{Column, ColumnType, FieldValue, Schema, SchemaResolver};
pub use crate::core::csv::tokenizer::{
    CsvTokenizer, FieldState, ParserState, RawRecord, TokenizedRecord, TokenizerConfig,
};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::json::reader::{AsyncJsonReader, JsonDecoder, JsonReader, RootShape};
pub use crate::core::materialize::{JsonObjectMaterializer, Materializer, SerdeMaterializer};
pub use crate::core::metrics::{ProgressSink, ProgressSnapshot, ProgressThrottle, ReaderMetrics};
pub use crate::core::options::{
    CsvOptions, JsonOptions, LineEnding, NamingHook, QuoteMode, RawRecordObserver, ValueValidator,
};
pub use crate::core::policy::{
    Decision, ErrorAction, ErrorPolicy, ErrorSink, Fault, GuardRail, NoopSink, ReaderError,
    ReaderTag, Recovery, TracingSink, truncate_snippet,
};
pub use crate::core::source::{AsyncReadSource, ChunkSource, ReadSource, Step, TextChunker};
