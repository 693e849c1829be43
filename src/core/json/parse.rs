//! Purpose: Decode complete JSON values and classify decode failures.
//! Exports: `from_slice`, `from_value`, `ParseFailureCategory`, `categorize_error`,
//! `categorize_message`, `hint_for_error`.
//! Role: Single seam between the streaming decoder and serde_json.
//! Invariants: Inputs are whole values; partial input is the caller's bug, not a retryable state.
//! Invariants: Category mapping is deterministic and never echoes payload bytes.
//! Notes: Error mapping to reader error kinds is done by the decoder so context stays explicit.

use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::error::Category;

pub(crate) fn from_slice<T: DeserializeOwned>(input: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(input)
}

pub(crate) fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(value)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ParseFailureCategory {
    Syntax,
    UnexpectedEof,
    Shape,
    NumericRange,
    DepthLimit,
    Utf8,
    Io,
    Unknown,
}

impl ParseFailureCategory {
    pub(crate) fn label(self) -> &'static str {
        match self {
            ParseFailureCategory::Syntax => "syntax",
            ParseFailureCategory::UnexpectedEof => "unexpected-eof",
            ParseFailureCategory::Shape => "shape",
            ParseFailureCategory::NumericRange => "numeric-range",
            ParseFailureCategory::DepthLimit => "depth-limit",
            ParseFailureCategory::Utf8 => "utf8",
            ParseFailureCategory::Io => "io",
            ParseFailureCategory::Unknown => "unknown",
        }
    }
}

pub(crate) fn categorize_error(err: &serde_json::Error) -> ParseFailureCategory {
    match err.classify() {
        Category::Io => ParseFailureCategory::Io,
        Category::Eof => ParseFailureCategory::UnexpectedEof,
        Category::Syntax => match categorize_message(&err.to_string()) {
            ParseFailureCategory::Unknown => ParseFailureCategory::Syntax,
            category => category,
        },
        Category::Data => match categorize_message(&err.to_string()) {
            ParseFailureCategory::Unknown => ParseFailureCategory::Shape,
            category => category,
        },
    }
}

pub(crate) fn categorize_message(message: &str) -> ParseFailureCategory {
    let lower = message.to_ascii_lowercase();
    if lower.contains("recursion limit") {
        ParseFailureCategory::DepthLimit
    } else if lower.contains("number out of range") {
        ParseFailureCategory::NumericRange
    } else if lower.contains("utf-8") || lower.contains("unicode code point") {
        ParseFailureCategory::Utf8
    } else if lower.contains("eof while parsing") {
        ParseFailureCategory::UnexpectedEof
    } else if ["invalid type", "invalid value", "invalid length", "missing field", "unknown field", "unknown variant"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        ParseFailureCategory::Shape
    } else if lower.contains("expected") || lower.contains("trailing") || lower.contains("key must be") {
        ParseFailureCategory::Syntax
    } else {
        ParseFailureCategory::Unknown
    }
}

pub(crate) fn hint_for_error(err: &serde_json::Error, context: &str) -> String {
    format!(
        "parse category: {}; context: {context}",
        categorize_error(err).label()
    )
}
