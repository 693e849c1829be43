//! Purpose: Resumable RFC 4180 state machine turning text chunks into raw records.
//! Exports: `CsvTokenizer`, `TokenizerConfig`, `ParserState`, `RawRecord`, `TokenizedRecord`.
//! Role: Pure CSV grammar layer; no I/O, no policy decisions.
//! Invariants: All cross-chunk state lives in `ParserState`; chunk boundaries never change output.
//! Invariants: CRLF counts as one physical line even when CR and LF land in different chunks.
//! Invariants: Once a record breaches a guard rail its content stops accumulating.
use std::collections::VecDeque;

use crate::core::cancel::CancelToken;
use crate::core::error::{Error, ErrorKind};
use crate::core::options::{CANCEL_POLL_CHARS, CsvOptions, LineEnding, QuoteMode};
use crate::core::policy::{Fault, Recovery};

const QUOTE: char = '"';
const EXCERPT_CHARS: usize = 160;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RawRecord {
    pub fields: Vec<String>,
    /// Physical line the record starts on (1-based).
    pub line: u64,
    /// Data record number (1-based), assigned when the reader admits the record.
    pub index: u64,
    pub raw: Option<String>,
}

impl RawRecord {
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.fields.get(idx).map(String::as_str)
    }

    pub fn into_fields(self) -> Vec<String> {
        self.fields
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TokenizedRecord {
    pub record: RawRecord,
    pub fault: Option<Fault>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FieldState {
    #[default]
    StartOfField,
    InField,
    Quoted,
    AfterClosingQuote,
}

/// Everything needed to resume tokenizing at the next chunk.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParserState {
    pub state: FieldState,
    pub field: String,
    pub field_quoted: bool,
    pub fields: Vec<String>,
    pub raw: String,
    pub raw_len: usize,
    pub lines: u64,
    pub line_has_content: bool,
    pub record_line: u64,
    pub record_started: bool,
    pub pending_cr: bool,
    pub discarding: bool,
    pub column_overflow: bool,
    pub fault: Option<Fault>,
}

#[derive(Clone, Debug)]
pub struct TokenizerConfig {
    pub separator: char,
    pub quote_mode: QuoteMode,
    pub error_on_trailing_garbage: bool,
    pub trim_whitespace: bool,
    pub capture_raw: bool,
    pub line_ending: LineEnding,
    pub max_columns: Option<usize>,
    pub max_raw_record_len: Option<usize>,
}

impl TokenizerConfig {
    pub fn from_options(options: &CsvOptions) -> Self {
        Self {
            separator: options.separator,
            quote_mode: options.quote_mode,
            error_on_trailing_garbage: options.error_on_trailing_garbage,
            trim_whitespace: options.trim_whitespace,
            capture_raw: options.wants_raw(),
            line_ending: options.line_ending,
            max_columns: options.max_columns,
            max_raw_record_len: options.max_raw_record_len,
        }
    }
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self::from_options(&CsvOptions::default())
    }
}

pub struct CsvTokenizer {
    config: TokenizerConfig,
    st: ParserState,
    since_poll: usize,
}

impl CsvTokenizer {
    pub fn new(config: TokenizerConfig) -> Self {
        Self {
            config,
            st: ParserState::default(),
            since_poll: 0,
        }
    }

    /// Resume from a state captured with `state()`.
    pub fn resume(config: TokenizerConfig, state: ParserState) -> Self {
        Self {
            config,
            st: state,
            since_poll: 0,
        }
    }

    pub fn state(&self) -> &ParserState {
        &self.st
    }

    /// Physical lines seen so far, counting a trailing unterminated line.
    pub fn lines_read(&self) -> u64 {
        self.st.lines + u64::from(self.st.line_has_content)
    }

    pub fn feed(
        &mut self,
        chunk: &str,
        out: &mut VecDeque<TokenizedRecord>,
        cancel: Option<&CancelToken>,
    ) -> Result<(), Error> {
        for ch in chunk.chars() {
            self.since_poll += 1;
            if self.since_poll >= CANCEL_POLL_CHARS {
                self.since_poll = 0;
                if cancel.is_some_and(CancelToken::is_cancelled) {
                    return Err(Error::new(ErrorKind::Cancelled).with_message("read cancelled"));
                }
            }
            self.step(ch, out);
        }
        Ok(())
    }

    /// Flush the pending record at end of input.
    pub fn finish(&mut self, out: &mut VecDeque<TokenizedRecord>) {
        self.st.pending_cr = false;
        if self.st.state == FieldState::Quoted {
            self.raise(
                ErrorKind::CsvQuote,
                "unterminated quoted field",
                Recovery::DropUnit,
            );
        }
        if self.st.record_started {
            self.commit_field();
            self.emit_record(out);
        }
    }

    fn step(&mut self, ch: char, out: &mut VecDeque<TokenizedRecord>) {
        if self.st.pending_cr {
            self.st.pending_cr = false;
            if ch == '\n' {
                if self.st.state == FieldState::Quoted {
                    self.push_field('\n');
                    if self.config.line_ending == LineEnding::Preserve {
                        self.push_raw('\n');
                    }
                }
                return;
            }
        }

        match self.st.state {
            FieldState::Quoted => match ch {
                QUOTE => {
                    self.st.state = FieldState::AfterClosingQuote;
                    self.push_raw(ch);
                }
                '\r' | '\n' => {
                    self.count_line(ch);
                    self.push_field(ch);
                    self.push_raw_newline(ch);
                }
                _ => {
                    self.push_field(ch);
                    self.push_raw(ch);
                }
            },
            FieldState::AfterClosingQuote => {
                if ch == QUOTE {
                    self.push_field(QUOTE);
                    self.push_raw(ch);
                    self.st.state = FieldState::Quoted;
                } else if ch == self.config.separator {
                    self.separator();
                } else if ch == '\r' || ch == '\n' {
                    self.terminator(ch, out);
                } else if self.config.trim_whitespace && ch.is_whitespace() {
                    self.push_raw(ch);
                } else {
                    if self.config.error_on_trailing_garbage {
                        self.raise(
                            ErrorKind::CsvFormat,
                            "unexpected character after closing quote",
                            Recovery::DropUnit,
                        );
                    }
                    self.push_field(ch);
                    self.push_raw(ch);
                    self.st.state = FieldState::InField;
                }
            }
            FieldState::StartOfField => {
                if ch == QUOTE {
                    self.begin_record();
                    self.st.field_quoted = true;
                    self.st.state = FieldState::Quoted;
                    self.push_raw(ch);
                } else if ch == self.config.separator {
                    self.separator();
                } else if ch == '\r' || ch == '\n' {
                    self.terminator(ch, out);
                } else if self.config.trim_whitespace && ch.is_whitespace() {
                    self.begin_record();
                    self.push_raw(ch);
                } else {
                    self.begin_record();
                    self.push_field(ch);
                    self.push_raw(ch);
                    self.st.state = FieldState::InField;
                }
            }
            FieldState::InField => {
                if ch == self.config.separator {
                    self.separator();
                } else if ch == '\r' || ch == '\n' {
                    self.terminator(ch, out);
                } else if ch == QUOTE {
                    self.push_raw(ch);
                    self.illegal_quote();
                } else {
                    self.push_field(ch);
                    self.push_raw(ch);
                }
            }
        }
    }

    fn illegal_quote(&mut self) {
        match self.config.quote_mode {
            QuoteMode::Lenient => {
                self.st.field_quoted = true;
                self.st.state = FieldState::Quoted;
            }
            QuoteMode::RfcStrict => {
                self.raise(
                    ErrorKind::CsvQuote,
                    "illegal quote in unquoted field",
                    Recovery::KeepUnit,
                );
                self.push_field(QUOTE);
            }
            QuoteMode::ErrorOnIllegalQuote => {
                self.raise(
                    ErrorKind::CsvQuote,
                    "illegal quote in unquoted field",
                    Recovery::DropUnit,
                );
                self.push_field(QUOTE);
            }
        }
    }

    fn begin_record(&mut self) {
        self.st.line_has_content = true;
        if !self.st.record_started {
            self.st.record_started = true;
            self.st.record_line = self.st.lines + 1;
        }
    }

    fn separator(&mut self) {
        self.begin_record();
        self.push_raw(self.config.separator);
        self.commit_field();
    }

    fn terminator(&mut self, ch: char, out: &mut VecDeque<TokenizedRecord>) {
        if self.st.record_started {
            self.commit_field();
            self.emit_record(out);
        }
        self.count_line(ch);
    }

    fn count_line(&mut self, ch: char) {
        self.st.lines += 1;
        self.st.line_has_content = false;
        if ch == '\r' {
            self.st.pending_cr = true;
        }
    }

    fn commit_field(&mut self) {
        let mut value = std::mem::take(&mut self.st.field);
        if self.config.trim_whitespace && !self.st.field_quoted {
            let trimmed = value.trim();
            if trimmed.len() != value.len() {
                value = trimmed.to_string();
            }
        }
        self.st.field_quoted = false;
        self.st.state = FieldState::StartOfField;

        if let Some(max) = self.config.max_columns {
            if self.st.fields.len() >= max {
                if !self.st.column_overflow {
                    self.st.column_overflow = true;
                    self.raise(
                        ErrorKind::CsvLimitExceeded,
                        &format!("record has more than {max} fields"),
                        Recovery::DropUnit,
                    );
                }
                return;
            }
        }
        if !self.st.discarding {
            self.st.fields.push(value);
        }
    }

    fn emit_record(&mut self, out: &mut VecDeque<TokenizedRecord>) {
        let fields = std::mem::take(&mut self.st.fields);
        let raw = std::mem::take(&mut self.st.raw);
        let record = RawRecord {
            fields,
            line: self.st.record_line,
            index: 0,
            raw: self.config.capture_raw.then_some(raw),
        };
        out.push_back(TokenizedRecord {
            record,
            fault: self.st.fault.take(),
        });
        self.st.record_started = false;
        self.st.raw_len = 0;
        self.st.discarding = false;
        self.st.column_overflow = false;
        self.st.field_quoted = false;
        self.st.state = FieldState::StartOfField;
    }

    fn push_field(&mut self, ch: char) {
        if !self.st.discarding {
            self.st.field.push(ch);
        }
    }

    fn push_raw(&mut self, ch: char) {
        self.st.raw_len += 1;
        if let Some(max) = self.config.max_raw_record_len {
            if self.st.raw_len > max && !self.st.discarding {
                self.raise(
                    ErrorKind::CsvLimitExceeded,
                    &format!("raw record exceeds {max} characters"),
                    Recovery::DropUnit,
                );
                self.st.discarding = true;
                self.st.field.clear();
                self.st.fields.clear();
                self.st.raw.clear();
            }
        }
        if self.config.capture_raw && !self.st.discarding {
            self.st.raw.push(ch);
        }
    }

    /// Mirror an embedded line break, normalized to the configured line ending.
    fn push_raw_newline(&mut self, ch: char) {
        match self.config.line_ending {
            LineEnding::Preserve => self.push_raw(ch),
            LineEnding::Lf => self.push_raw('\n'),
            LineEnding::CrLf => {
                self.push_raw('\r');
                self.push_raw('\n');
            }
        }
    }

    fn raise(&mut self, kind: ErrorKind, message: &str, recovery: Recovery) {
        let replace = match &self.st.fault {
            None => true,
            Some(existing) => {
                existing.recovery == Recovery::KeepUnit && recovery != Recovery::KeepUnit
            }
        };
        if replace {
            let fault = Fault::new(kind, message, recovery)
                .at_line(self.st.lines + 1)
                .with_excerpt(self.excerpt());
            self.st.fault = Some(fault);
        }
    }

    fn excerpt(&self) -> String {
        let sep = self.config.separator;
        let mut text = String::new();
        for (idx, field) in self.st.fields.iter().enumerate() {
            if idx > 0 {
                text.push(sep);
            }
            text.push_str(field);
            if text.len() >= EXCERPT_CHARS {
                return text;
            }
        }
        if !self.st.fields.is_empty() {
            text.push(sep);
        }
        text.push_str(&self.st.field);
        text
    }
}
