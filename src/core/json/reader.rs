//! Purpose: Stream array elements or a single root value out of a JSON byte stream.
//! Exports: `JsonDecoder`, `RootShape`, `JsonReader`, `AsyncJsonReader`.
//! Role: Sans-I/O decoder over `JsonWindow` + `ScanState`, with blocking and suspending drivers.
//! Invariants: An incomplete element resumes from its own checkpoint; no byte is skipped or replayed.
//! Invariants: Memory stays bounded by the window cap; oversized elements are discarded token by token.
//! Invariants: Cancellation is checked before any pending unit or fault is handled.
//! Notes: Values with comments or trailing commas, or with a validator or string limit configured,
//! are mirrored into an isolated buffer before deserializing.
use std::fs::File;
use std::io;
use std::marker::PhantomData;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::AsyncRead;

use crate::core::cancel::CancelToken;
use crate::core::error::{Error, ErrorKind};
use crate::core::json::parse::{self, ParseFailureCategory};
use crate::core::json::scanner::{Lexed, Scan, ScanState, TokenKind, mirror, next_token, trivia_end};
use crate::core::json::window::JsonWindow;
use crate::core::metrics::{ProgressSink, ProgressThrottle, ReaderMetrics};
use crate::core::options::JsonOptions;
use crate::core::policy::{Decision, ErrorSink, Fault, GuardRail, ReaderTag, Recovery};
use crate::core::source::{AsyncReadSource, ChunkSource, ReadSource, Step};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RootShape {
    Undetermined,
    Array,
    Single,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ArrayStage {
    Open,
    AfterElement,
    AfterComma,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum RootState {
    Undetermined,
    ArrayBody(ArrayStage),
    SingleValue,
    Trailing,
    Finished,
}

struct Element {
    start: usize,
    scan: ScanState,
    index: u64,
    discarding: bool,
}

enum Progress<T> {
    Emit(T),
    Next,
    NeedData,
}

pub struct JsonDecoder {
    options: JsonOptions,
    window: JsonWindow,
    rail: GuardRail,
    metrics: ReaderMetrics,
    progress: Option<ProgressThrottle>,
    cancel: Option<CancelToken>,
    total_len: Option<u64>,
    root: RootState,
    shape: RootShape,
    pos: usize,
    element: Option<Element>,
    dropped_newlines: u64,
    newlines: u64,
    last_was_newline: bool,
    eof: bool,
    stopped: bool,
    finished: bool,
}

impl JsonDecoder {
    pub fn new(options: JsonOptions) -> Self {
        let rail = GuardRail::new(
            options.errors,
            ReaderTag::Json,
            options.source_name.clone(),
            options.max_snippet_chars,
        );
        Self {
            window: JsonWindow::new(options.initial_buffer, options.max_buffer),
            rail,
            metrics: ReaderMetrics::default(),
            progress: None,
            cancel: None,
            total_len: None,
            root: RootState::Undetermined,
            shape: RootShape::Undetermined,
            pos: 0,
            element: None,
            dropped_newlines: 0,
            newlines: 0,
            last_was_newline: false,
            eof: false,
            stopped: false,
            finished: false,
            options,
        }
    }

    pub fn set_error_sink(&mut self, sink: Box<dyn ErrorSink>) {
        self.rail.set_sink(sink);
    }

    pub fn set_progress(&mut self, throttle: ProgressThrottle) {
        self.progress = Some(throttle);
    }

    pub fn set_cancel(&mut self, token: CancelToken) {
        self.cancel = Some(token);
    }

    pub fn set_total_len(&mut self, total_len: Option<u64>) {
        self.total_len = total_len;
    }

    pub fn options(&self) -> &JsonOptions {
        &self.options
    }

    pub fn metrics(&self) -> &ReaderMetrics {
        &self.metrics
    }

    pub fn root_shape(&self) -> RootShape {
        self.shape
    }

    /// Current window size in bytes; grows, never shrinks.
    pub fn window_capacity(&self) -> usize {
        self.window.capacity()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Free tail of the window; only valid right after `next_value` asked for data.
    pub fn spare(&mut self) -> &mut [u8] {
        self.window.spare()
    }

    /// Account for `read` bytes written into `spare`; `read == 0` marks end of input.
    pub fn commit(&mut self, read: usize) -> Result<(), Error> {
        if self.finished || self.stopped {
            return Ok(());
        }
        self.metrics.mark_started();
        if read == 0 {
            self.eof = true;
        } else {
            self.metrics.bytes_read += read as u64;
            let before = self.window.len();
            self.window.commit(read);
            let fresh = &self.window.data()[before..];
            self.newlines += count_newlines(fresh);
            self.last_was_newline = fresh.last() == Some(&b'\n');
        }
        let partial_line = self.metrics.bytes_read > 0 && !self.last_was_newline;
        self.metrics.lines_read = self.newlines + u64::from(partial_line);
        tracing::trace!(read, window = self.window.len(), "json chunk buffered");
        Ok(())
    }

    pub fn io_failed(&mut self, err: io::Error) -> Error {
        let err = Error::new(ErrorKind::Io)
            .with_message("failed to read input")
            .with_source_name(self.options.source_name.clone())
            .with_source(err);
        self.fail(err)
    }

    pub fn next_value<T: DeserializeOwned>(&mut self) -> Result<Step<T>, Error> {
        loop {
            if self.finished {
                return Ok(Step::Done);
            }
            self.check_cancel()?;
            if self.stopped {
                self.complete();
                return Ok(Step::Done);
            }
            if let Some(element) = self.element.take() {
                match self.drive::<T>(element)? {
                    Progress::Emit(value) => return Ok(Step::Unit(value)),
                    Progress::Next => continue,
                    Progress::NeedData => return Ok(Step::NeedData),
                }
            }

            let lexed = next_token(self.window.data(), self.pos, self.eof);
            let root = self.root;
            match root {
                RootState::Finished => {
                    self.complete();
                    return Ok(Step::Done);
                }
                RootState::Undetermined => match lexed {
                    Lexed::Incomplete => {
                        if self.need_data()? {
                            return Ok(Step::NeedData);
                        }
                    }
                    Lexed::End => self.root = RootState::Finished,
                    Lexed::Invalid(err) => self.syntax(err.pos, &err.message)?,
                    Lexed::Token(token) if token.kind == TokenKind::BeginArray => {
                        tracing::debug!(source = %self.options.source_name, "json root is an array");
                        self.pos = token.end;
                        self.shape = RootShape::Array;
                        self.root = RootState::ArrayBody(ArrayStage::Open);
                    }
                    Lexed::Token(token) if token.kind.starts_value() => {
                        if self.options.require_array_root {
                            let index = self.metrics.raw_units_parsed;
                            self.fault(
                                index,
                                ErrorKind::JsonFormat,
                                "document root must be an array".to_string(),
                                Recovery::EndStream,
                                token.start,
                            )?;
                        } else {
                            tracing::debug!(
                                source = %self.options.source_name,
                                "json root is a single value"
                            );
                            self.shape = RootShape::Single;
                            self.root = RootState::SingleValue;
                            self.begin_element(token.start)?;
                        }
                    }
                    Lexed::Token(token) => self.syntax(token.start, "unexpected token at document root")?,
                },
                RootState::ArrayBody(stage) => match lexed {
                    Lexed::Incomplete => {
                        if self.need_data()? {
                            return Ok(Step::NeedData);
                        }
                    }
                    Lexed::End => self.syntax(self.window.len(), "unterminated array")?,
                    Lexed::Invalid(err) => self.syntax(err.pos, &err.message)?,
                    Lexed::Token(token) => match (stage, token.kind) {
                        (_, TokenKind::EndArray) => {
                            self.pos = token.end;
                            self.root = RootState::Trailing;
                        }
                        (ArrayStage::AfterElement, TokenKind::Comma) => {
                            self.pos = token.end;
                            self.root = RootState::ArrayBody(ArrayStage::AfterComma);
                        }
                        (ArrayStage::Open | ArrayStage::AfterComma, kind) if kind.starts_value() => {
                            self.begin_element(token.start)?;
                        }
                        _ => self.syntax(token.start, "expected ',' or ']' in array")?,
                    },
                },
                RootState::SingleValue => self.root = RootState::Trailing,
                RootState::Trailing => match lexed {
                    Lexed::End => self.root = RootState::Finished,
                    Lexed::Incomplete => {
                        if self.need_data()? {
                            return Ok(Step::NeedData);
                        }
                    }
                    Lexed::Token(token) => {
                        let index = self.metrics.raw_units_parsed;
                        self.fault(
                            index,
                            ErrorKind::JsonFormat,
                            "unexpected content after root value".to_string(),
                            Recovery::EndStream,
                            token.start,
                        )?;
                    }
                    Lexed::Invalid(err) => {
                        let index = self.metrics.raw_units_parsed;
                        self.fault(
                            index,
                            ErrorKind::JsonFormat,
                            "unexpected content after root value".to_string(),
                            Recovery::EndStream,
                            err.pos,
                        )?;
                    }
                },
            }
        }
    }

    fn begin_element(&mut self, start: usize) -> Result<(), Error> {
        self.pos = start;
        self.metrics.raw_units_parsed += 1;
        let index = self.metrics.raw_units_parsed;
        self.observe_progress();
        if let Some(max) = self.options.max_elements {
            if index > max {
                self.fault(
                    index,
                    ErrorKind::JsonSizeLimit,
                    format!("document has more than {max} elements"),
                    Recovery::EndStream,
                    start,
                )?;
                return Ok(());
            }
        }
        self.element = Some(Element {
            start,
            scan: ScanState::new(start),
            index,
            discarding: false,
        });
        Ok(())
    }

    fn drive<T: DeserializeOwned>(&mut self, mut el: Element) -> Result<Progress<T>, Error> {
        let depth_limit = (!el.discarding).then(|| self.element_depth_limit());
        let scan = el
            .scan
            .advance(self.window.data(), self.eof, depth_limit, self.cancel.as_ref());
        match scan {
            Scan::Cancelled => {
                self.element = Some(el);
                self.check_cancel()?;
                Ok(Progress::Next)
            }
            Scan::Complete { end } => {
                self.pos = end;
                self.finish_element();
                if el.discarding {
                    return Ok(Progress::Next);
                }
                let len = end - el.start;
                if let Some(max) = self.options.max_element_bytes {
                    if len > max {
                        self.fault(
                            el.index,
                            ErrorKind::JsonSizeLimit,
                            format!("element of {len} bytes exceeds limit of {max}"),
                            Recovery::DropUnit,
                            el.start,
                        )?;
                        return Ok(Progress::Next);
                    }
                }
                match self.decode::<T>(el.start, end, el.scan.normalized()) {
                    Ok(value) => {
                        self.metrics.units_emitted += 1;
                        Ok(Progress::Emit(value))
                    }
                    Err(fault) => {
                        self.apply(fault, el.index)?;
                        Ok(Progress::Next)
                    }
                }
            }
            Scan::Incomplete => {
                if !el.discarding {
                    if let Some(max) = self.options.max_element_bytes {
                        if el.scan.pos() - el.start > max {
                            let message = format!("element exceeds limit of {max} bytes");
                            return self.drop_element(el, message);
                        }
                    }
                }
                let keep_from = if el.discarding { el.scan.pos() } else { el.start };
                if self.prepare_refill(keep_from, Some(&mut el)) {
                    self.element = Some(el);
                    return Ok(Progress::NeedData);
                }
                let cap = self.window.cap();
                if el.discarding {
                    if el.scan.open_oversized_string(self.window.data()) {
                        self.element = Some(el);
                        return Ok(Progress::Next);
                    }
                    let pos = el.scan.pos();
                    self.fault(
                        el.index,
                        ErrorKind::JsonSizeLimit,
                        format!("single token exceeds maximum buffer of {cap} bytes"),
                        Recovery::EndStream,
                        pos,
                    )?;
                    return Ok(Progress::Next);
                }
                self.drop_element(el, format!("element exceeds maximum buffer of {cap} bytes"))
            }
            Scan::Invalid(err) => {
                self.fault(
                    el.index,
                    ErrorKind::JsonFormat,
                    err.message,
                    Recovery::EndStream,
                    err.pos,
                )?;
                Ok(Progress::Next)
            }
            Scan::TooDeep => {
                let message = format!("nesting deeper than {} levels", self.options.max_depth);
                self.drop_element(el, message)
            }
        }
    }

    /// Report a droppable element fault; a skipped element is then consumed in discard mode.
    fn drop_element<T>(&mut self, mut el: Element, message: String) -> Result<Progress<T>, Error> {
        let start = el.start;
        let decision = self.fault(
            el.index,
            ErrorKind::JsonSizeLimit,
            message,
            Recovery::DropUnit,
            start,
        )?;
        if decision != Decision::Abort {
            tracing::debug!(index = el.index, "discarding json element");
            el.discarding = true;
            self.element = Some(el);
        }
        Ok(Progress::Next)
    }

    fn decode<T: DeserializeOwned>(&self, start: usize, end: usize, normalized: bool) -> Result<T, Fault> {
        let bytes = &self.window.data()[start..end];
        let capture = self.options.needs_capture();
        if !normalized && !capture {
            return parse::from_slice(bytes).map_err(|err| self.decode_fault(&err, start));
        }

        let mirrored = mirror(bytes).map_err(|err| {
            self.make_fault(ErrorKind::JsonFormat, err.message, Recovery::DropUnit, start + err.pos)
        })?;
        if !capture {
            return parse::from_slice(&mirrored).map_err(|err| self.decode_fault(&err, start));
        }

        let value: Value =
            parse::from_slice(&mirrored).map_err(|err| self.decode_fault(&err, start))?;
        if let Some(limit) = self.options.max_string_len {
            if let Some(found) = string_over_limit(&value, limit) {
                return Err(self.make_fault(
                    ErrorKind::JsonSizeLimit,
                    format!("string of {found} characters exceeds limit of {limit}"),
                    Recovery::DropUnit,
                    start,
                ));
            }
        }
        if let Some(validator) = &self.options.validator {
            validator(&value).map_err(|message| {
                self.make_fault(ErrorKind::JsonValidation, message, Recovery::DropUnit, start)
            })?;
        }
        parse::from_value(value).map_err(|err| self.decode_fault(&err, start))
    }

    fn decode_fault(&self, err: &serde_json::Error, pos: usize) -> Fault {
        let kind = match parse::categorize_error(err) {
            ParseFailureCategory::Shape => ErrorKind::Materialize,
            ParseFailureCategory::DepthLimit => ErrorKind::JsonSizeLimit,
            _ => ErrorKind::JsonFormat,
        };
        let message = format!("{err} ({})", parse::hint_for_error(err, "json element"));
        self.make_fault(kind, message, Recovery::DropUnit, pos)
    }

    fn make_fault(&self, kind: ErrorKind, message: String, recovery: Recovery, pos: usize) -> Fault {
        Fault::new(kind, message, recovery)
            .at_line(self.line_at(pos))
            .with_excerpt(self.excerpt_at(pos))
    }

    fn fault(
        &mut self,
        index: u64,
        kind: ErrorKind,
        message: String,
        recovery: Recovery,
        pos: usize,
    ) -> Result<Decision, Error> {
        let fault = self.make_fault(kind, message, recovery, pos);
        self.apply(fault, index)
    }

    fn syntax(&mut self, pos: usize, message: &str) -> Result<(), Error> {
        let index = self.metrics.raw_units_parsed;
        self.fault(
            index,
            ErrorKind::JsonFormat,
            message.to_string(),
            Recovery::EndStream,
            pos,
        )
        .map(|_| ())
    }

    fn apply(&mut self, fault: Fault, index: u64) -> Result<Decision, Error> {
        match self.rail.handle(fault, index, &mut self.metrics) {
            Err(err) => Err(self.fail(err)),
            Ok(Decision::Abort) => {
                self.stop();
                Ok(Decision::Abort)
            }
            Ok(decision) => Ok(decision),
        }
    }

    fn element_depth_limit(&self) -> usize {
        match self.shape {
            RootShape::Array => self.options.max_depth.saturating_sub(1),
            _ => self.options.max_depth,
        }
    }

    fn finish_element(&mut self) {
        self.root = match self.root {
            RootState::ArrayBody(_) => RootState::ArrayBody(ArrayStage::AfterElement),
            RootState::SingleValue => RootState::Trailing,
            other => other,
        };
    }

    /// Compact the window down to `keep_from` and make room for the next read.
    fn prepare_refill(&mut self, keep_from: usize, element: Option<&mut Element>) -> bool {
        let keep_from = keep_from.min(self.window.len());
        self.dropped_newlines += count_newlines(&self.window.data()[..keep_from]);
        let shift = self.window.compact(keep_from);
        self.pos = self.pos.saturating_sub(shift);
        if let Some(el) = element {
            el.start = el.start.saturating_sub(shift);
            el.scan.shift(shift);
        }
        self.window.reserve()
    }

    /// `Ok(true)` when the driver should read more; a full window at its cap is a fault.
    /// Trivia already scanned at the root is released first so it never counts
    /// against the next element's room.
    fn need_data(&mut self) -> Result<bool, Error> {
        self.pos = trivia_end(self.window.data(), self.pos);
        if self.prepare_refill(self.pos, None) {
            return Ok(true);
        }
        let index = self.metrics.raw_units_parsed;
        let cap = self.window.cap();
        self.fault(
            index,
            ErrorKind::JsonSizeLimit,
            format!("single token exceeds maximum buffer of {cap} bytes"),
            Recovery::EndStream,
            self.pos,
        )?;
        Ok(false)
    }

    fn line_at(&self, pos: usize) -> u64 {
        let data = self.window.data();
        let pos = pos.min(data.len());
        self.dropped_newlines + count_newlines(&data[..pos]) + 1
    }

    fn excerpt_at(&self, pos: usize) -> String {
        let data = self.window.data();
        let from = pos.min(data.len());
        let to = from
            .saturating_add(self.options.max_snippet_chars.saturating_mul(4))
            .min(data.len());
        String::from_utf8_lossy(&data[from..to]).into_owned()
    }

    fn check_cancel(&mut self) -> Result<(), Error> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            let err = Error::new(ErrorKind::Cancelled)
                .with_message("read cancelled")
                .with_source_name(self.options.source_name.clone());
            return Err(self.fail(err));
        }
        Ok(())
    }

    fn stop(&mut self) {
        if !self.stopped {
            tracing::debug!(source = %self.options.source_name, "json stream stopped by policy");
        }
        self.stopped = true;
        self.element = None;
    }

    fn fail(&mut self, err: Error) -> Error {
        self.finished = true;
        self.element = None;
        self.metrics.mark_completed();
        err
    }

    fn complete(&mut self) {
        self.finished = true;
        self.metrics.mark_completed();
        if let Some(progress) = self.progress.as_mut() {
            progress.finish(&self.metrics, self.total_len);
        }
        tracing::debug!(
            source = %self.options.source_name,
            parsed = self.metrics.raw_units_parsed,
            emitted = self.metrics.units_emitted,
            errors = self.metrics.errors,
            window = self.window.capacity(),
            "json stream complete"
        );
    }

    fn observe_progress(&mut self) {
        if let Some(progress) = self.progress.as_mut() {
            progress.observe(&self.metrics, self.total_len);
        }
    }
}

fn count_newlines(bytes: &[u8]) -> u64 {
    bytes.iter().filter(|byte| **byte == b'\n').count() as u64
}

/// Length in characters of the first key or string longer than `limit`.
fn string_over_limit(value: &Value, limit: usize) -> Option<usize> {
    let mut stack = vec![value];
    while let Some(current) = stack.pop() {
        match current {
            Value::String(text) => {
                let len = text.chars().count();
                if len > limit {
                    return Some(len);
                }
            }
            Value::Array(items) => stack.extend(items.iter()),
            Value::Object(map) => {
                for (key, item) in map {
                    let len = key.chars().count();
                    if len > limit {
                        return Some(len);
                    }
                    stack.push(item);
                }
            }
            _ => {}
        }
    }
    None
}

/// Blocking reader yielding deserialized units.
pub struct JsonReader<S, T = Value> {
    source: S,
    decoder: JsonDecoder,
    _target: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> JsonReader<ReadSource<File>, T> {
    /// Open `path`; the path becomes the source name unless one was set.
    pub fn open(path: impl AsRef<Path>, mut options: JsonOptions) -> Result<Self, Error> {
        let path = path.as_ref();
        if options.source_name == JsonOptions::new().source_name {
            options.source_name = path.display().to_string();
        }
        Ok(Self::new(ReadSource::open(path)?, options))
    }
}

impl<S: ChunkSource, T: DeserializeOwned> JsonReader<S, T> {
    pub fn new(source: S, options: JsonOptions) -> Self {
        let mut decoder = JsonDecoder::new(options);
        decoder.set_total_len(source.total_len());
        Self {
            source,
            decoder,
            _target: PhantomData,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.decoder.set_cancel(token);
        self
    }

    pub fn with_error_sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.decoder.set_error_sink(Box::new(sink));
        self
    }

    pub fn with_progress(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.decoder.set_progress(ProgressThrottle::new(Box::new(sink)));
        self
    }

    pub fn with_progress_throttle(mut self, throttle: ProgressThrottle) -> Self {
        self.decoder.set_progress(throttle);
        self
    }

    pub fn metrics(&self) -> &ReaderMetrics {
        self.decoder.metrics()
    }

    pub fn root_shape(&self) -> RootShape {
        self.decoder.root_shape()
    }

    pub fn window_capacity(&self) -> usize {
        self.decoder.window_capacity()
    }
}

impl<S: ChunkSource, T: DeserializeOwned> Iterator for JsonReader<S, T> {
    type Item = Result<T, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.decoder.next_value() {
                Err(err) => return Some(Err(err)),
                Ok(Step::Unit(value)) => return Some(Ok(value)),
                Ok(Step::Done) => return None,
                Ok(Step::NeedData) => {
                    let read = match self.source.fill(self.decoder.spare()) {
                        Ok(read) => read,
                        Err(err) => return Some(Err(self.decoder.io_failed(err))),
                    };
                    if let Err(err) = self.decoder.commit(read) {
                        return Some(Err(err));
                    }
                }
            }
        }
    }
}

/// Suspending reader; awaits only while filling the window.
pub struct AsyncJsonReader<R, T = Value> {
    source: AsyncReadSource<R>,
    decoder: JsonDecoder,
    _target: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> AsyncJsonReader<tokio::fs::File, T> {
    pub async fn open(path: impl AsRef<Path>, mut options: JsonOptions) -> Result<Self, Error> {
        let path = path.as_ref();
        if options.source_name == JsonOptions::new().source_name {
            options.source_name = path.display().to_string();
        }
        Ok(Self::new(AsyncReadSource::open(path).await?, options))
    }
}

impl<R: AsyncRead + Unpin, T: DeserializeOwned> AsyncJsonReader<R, T> {
    pub fn new(source: AsyncReadSource<R>, options: JsonOptions) -> Self {
        let mut decoder = JsonDecoder::new(options);
        decoder.set_total_len(source.total_len());
        Self {
            source,
            decoder,
            _target: PhantomData,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.decoder.set_cancel(token);
        self
    }

    pub fn with_error_sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.decoder.set_error_sink(Box::new(sink));
        self
    }

    pub fn with_progress(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.decoder.set_progress(ProgressThrottle::new(Box::new(sink)));
        self
    }

    pub fn metrics(&self) -> &ReaderMetrics {
        self.decoder.metrics()
    }

    pub fn root_shape(&self) -> RootShape {
        self.decoder.root_shape()
    }

    pub async fn next_value(&mut self) -> Result<Option<T>, Error> {
        loop {
            match self.decoder.next_value()? {
                Step::Unit(value) => return Ok(Some(value)),
                Step::Done => return Ok(None),
                Step::NeedData => {
                    let read = match self.source.fill(self.decoder.spare()).await {
                        Ok(read) => read,
                        Err(err) => return Err(self.decoder.io_failed(err)),
                    };
                    self.decoder.commit(read)?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{JsonReader, RootShape};
    use crate::core::error::ErrorKind;
    use crate::core::options::JsonOptions;
    use crate::core::policy::ErrorPolicy;
    use crate::core::source::ChunkSource;
    use serde::Deserialize;
    use serde_json::{Value, json};
    use std::io;

    /// Hands out at most `step` bytes per read.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Trickle {
        fn new(data: &str, step: usize) -> Self {
            Self {
                data: data.as_bytes().to_vec(),
                pos: 0,
                step,
            }
        }
    }

    impl ChunkSource for Trickle {
        fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn values(input: &str, step: usize, options: JsonOptions) -> Vec<Result<Value, ErrorKind>> {
        let reader: JsonReader<_, Value> = JsonReader::new(Trickle::new(input, step), options);
        reader.map(|item| item.map_err(|err| err.kind())).collect()
    }

    fn ok_values(input: &str, step: usize, options: JsonOptions) -> Vec<Value> {
        values(input, step, options)
            .into_iter()
            .map(|item| item.expect("value"))
            .collect()
    }

    #[test]
    fn array_elements_with_required_array_root() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Row {
            a: i64,
        }
        let options = JsonOptions::new().with_require_array_root(true);
        let mut reader: JsonReader<_, Row> =
            JsonReader::new(Trickle::new(r#"[{"a":1},{"a":2}]"#, 3), options);
        let rows: Vec<Row> = reader.by_ref().map(|row| row.expect("row")).collect();
        assert_eq!(rows, vec![Row { a: 1 }, Row { a: 2 }]);
        assert_eq!(reader.metrics().units_emitted, 2);
        assert_eq!(reader.root_shape(), RootShape::Array);
    }

    #[test]
    fn single_value_root_and_empty_input() {
        assert_eq!(ok_values(" {\"x\": [1, 2]} \n", 2, JsonOptions::new()), vec![json!({"x": [1, 2]})]);
        assert_eq!(ok_values("42", 1, JsonOptions::new()), vec![json!(42)]);
        assert!(values("", 4, JsonOptions::new()).is_empty());
        assert!(values("  \n ", 1, JsonOptions::new()).is_empty());
    }

    #[test]
    fn require_array_root_rejects_objects() {
        let options = JsonOptions::new().with_require_array_root(true);
        assert_eq!(values("{\"a\":1}", 64, options), vec![Err(ErrorKind::JsonFormat)]);
        let options = JsonOptions::new().with_require_array_root(true);
        assert_eq!(values("  7", 64, options), vec![Err(ErrorKind::JsonFormat)]);
    }

    #[test]
    fn trailing_content_after_single_root_is_an_error() {
        assert_eq!(
            values("{} {}", 64, JsonOptions::new()),
            vec![Ok(json!({})), Err(ErrorKind::JsonFormat)]
        );
    }

    #[test]
    fn values_split_byte_by_byte_grow_the_window() {
        let input = r#"[{"name":"a long enough string to overflow","n":[1,2,3]}, -1.25e2, "x", null]"#;
        let options = JsonOptions::new().with_initial_buffer(4);
        let mut reader: JsonReader<_, Value> = JsonReader::new(Trickle::new(input, 1), options);
        let got: Vec<Value> = reader.by_ref().map(|v| v.expect("value")).collect();
        assert_eq!(
            got,
            vec![
                json!({"name": "a long enough string to overflow", "n": [1, 2, 3]}),
                json!(-125.0),
                json!("x"),
                Value::Null,
            ]
        );
        assert!(reader.window_capacity() > 4);
    }

    #[test]
    fn oversized_element_is_skipped_without_buffering_it() {
        let input = "[1,[1,1,1,1,1,1,1,1,1,1,1,1],2]";
        let options = JsonOptions::new()
            .with_initial_buffer(4)
            .with_max_buffer(8)
            .with_errors(ErrorPolicy::Skip);
        let mut reader: JsonReader<_, Value> = JsonReader::new(Trickle::new(input, 3), options);
        let got: Vec<Value> = reader.by_ref().map(|v| v.expect("value")).collect();
        assert_eq!(got, vec![json!(1), json!(2)]);
        assert_eq!(reader.metrics().errors, 1);
        assert!(reader.window_capacity() <= 8);
    }

    #[test]
    fn oversized_element_throws_size_limit() {
        let options = JsonOptions::new().with_initial_buffer(4).with_max_buffer(8);
        assert_eq!(
            values("[[1,1,1,1,1,1,1,1]]", 2, options),
            vec![Err(ErrorKind::JsonSizeLimit)]
        );
    }

    #[test]
    fn comments_and_trailing_commas_are_accepted() {
        let input = "// header\n[ {\"a\": 1, /* inline */ \"b\": [2,],}, 3, ]";
        assert_eq!(
            ok_values(input, 5, JsonOptions::new()),
            vec![json!({"a": 1, "b": [2]}), json!(3)]
        );
    }

    #[test]
    fn validator_failures_follow_policy() {
        let options = JsonOptions::new()
            .with_errors(ErrorPolicy::Skip)
            .with_validator(|value| match value.get("ok") {
                Some(Value::Bool(true)) => Ok(()),
                _ => Err("ok flag missing".to_string()),
            });
        assert_eq!(
            ok_values(r#"[{"ok":true,"i":1},{"i":2},{"ok":true,"i":3}]"#, 7, options),
            vec![json!({"ok": true, "i": 1}), json!({"ok": true, "i": 3})]
        );
    }

    #[test]
    fn string_length_limit() {
        let options = JsonOptions::new().with_max_string_len(3);
        assert_eq!(
            values(r#"["abc","abcd"]"#, 64, options),
            vec![Ok(json!("abc")), Err(ErrorKind::JsonSizeLimit)]
        );
    }

    #[test]
    fn element_count_limit_stops_under_skip() {
        let options = JsonOptions::new()
            .with_max_elements(2)
            .with_errors(ErrorPolicy::Skip);
        assert_eq!(ok_values("[1,2,3,4]", 64, options), vec![json!(1), json!(2)]);
    }

    #[test]
    fn depth_limit_drops_deep_elements() {
        let options = JsonOptions::new()
            .with_max_depth(2)
            .with_errors(ErrorPolicy::Skip);
        assert_eq!(
            ok_values("[[1],[[2]],3]", 2, options),
            vec![json!([1]), json!(3)]
        );
    }

    #[test]
    fn syntax_error_ends_stream_even_when_skipping() {
        let options = JsonOptions::new().with_errors(ErrorPolicy::Skip);
        assert_eq!(ok_values("[1, 2 3, 4]", 64, options), vec![json!(1), json!(2)]);
    }

    #[test]
    fn shape_mismatch_is_a_materialize_error() {
        #[derive(Debug, Deserialize)]
        struct Row {
            #[allow(dead_code)]
            a: i64,
        }
        let reader: JsonReader<_, Row> =
            JsonReader::new(Trickle::new(r#"[{"a":"x"}]"#, 64), JsonOptions::new());
        let kinds: Vec<ErrorKind> = reader.filter_map(|item| item.err()).map(|e| e.kind()).collect();
        assert_eq!(kinds, vec![ErrorKind::Materialize]);
    }

    #[test]
    fn error_lines_count_from_document_start() {
        let reader: JsonReader<_, Value> =
            JsonReader::new(Trickle::new("[\n1,\n2,\n}", 2), JsonOptions::new());
        let err = reader
            .filter_map(|item| item.err())
            .next()
            .expect("error");
        assert_eq!(err.kind(), ErrorKind::JsonFormat);
        assert_eq!(err.line(), Some(4));
    }
}
