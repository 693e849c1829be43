// Reader error kinds and the builder-style error carried through every decode path.
use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    Internal,
    Usage,
    Io,
    Cancelled,
    CsvFormat,
    CsvQuote,
    CsvLimitExceeded,
    Schema,
    JsonFormat,
    JsonSizeLimit,
    JsonValidation,
    Materialize,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Internal => "internal",
            ErrorKind::Usage => "usage",
            ErrorKind::Io => "io",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::CsvFormat => "csv-format",
            ErrorKind::CsvQuote => "csv-quote",
            ErrorKind::CsvLimitExceeded => "csv-limit",
            ErrorKind::Schema => "schema",
            ErrorKind::JsonFormat => "json-format",
            ErrorKind::JsonSizeLimit => "json-size-limit",
            ErrorKind::JsonValidation => "json-validation",
            ErrorKind::Materialize => "materialize",
        }
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    source_name: Option<String>,
    line: Option<u64>,
    index: Option<u64>,
    snippet: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            source_name: None,
            line: None,
            index: None,
            snippet: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn line(&self) -> Option<u64> {
        self.line
    }

    pub fn index(&self) -> Option<u64> {
        self.index
    }

    pub fn snippet(&self) -> Option<&str> {
        self.snippet.as_deref()
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source_name.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }

    pub fn with_line(mut self, line: u64) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_index(mut self, index: u64) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Fill in unit position fields that the producer of the error did not know.
    pub(crate) fn locate(mut self, line: Option<u64>, index: u64) -> Self {
        if self.line.is_none() {
            self.line = line;
        }
        if self.index.is_none() {
            self.index = Some(index);
        }
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(name) = &self.source_name {
            write!(f, " (source: {name})")?;
        }
        if let Some(line) = self.line {
            write!(f, " (line: {line})")?;
        }
        if let Some(index) = self.index {
            write!(f, " (unit: {index})")?;
        }
        if let Some(snippet) = &self.snippet {
            write!(f, " near {snippet:?}")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::Io => 3,
        ErrorKind::Cancelled => 4,
        ErrorKind::CsvFormat | ErrorKind::CsvQuote | ErrorKind::CsvLimitExceeded => 5,
        ErrorKind::Schema | ErrorKind::Materialize => 6,
        ErrorKind::JsonFormat | ErrorKind::JsonSizeLimit | ErrorKind::JsonValidation => 7,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::Io, 3),
            (ErrorKind::Cancelled, 4),
            (ErrorKind::CsvQuote, 5),
            (ErrorKind::Schema, 6),
            (ErrorKind::JsonSizeLimit, 7),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn display_includes_position_and_snippet() {
        let err = Error::new(ErrorKind::CsvQuote)
            .with_message("unterminated quoted field")
            .with_source_name("people.csv")
            .with_line(3)
            .with_index(2)
            .with_snippet("2,\"O");
        let text = err.to_string();
        assert!(text.starts_with("CsvQuote: unterminated quoted field"));
        assert!(text.contains("(source: people.csv)"));
        assert!(text.contains("(line: 3)"));
        assert!(text.contains("(unit: 2)"));
        assert!(text.contains("near \"2,\\\"O\""));
    }

    #[test]
    fn locate_keeps_existing_position() {
        let err = Error::new(ErrorKind::Materialize).with_index(9).locate(Some(4), 1);
        assert_eq!(err.index(), Some(9));
        assert_eq!(err.line(), Some(4));
    }
}
