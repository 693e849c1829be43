//! Purpose: Delimited-text decoding from raw chunks to typed records.
//! Exports: `tokenizer` (resumable state machine), `schema` (inference and conversion), `reader`.
//! Role: CSV half of the core; shares policy, metrics and sources with the JSON half.
pub mod reader;
pub mod schema;
pub mod tokenizer;
