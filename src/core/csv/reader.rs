//! Purpose: Drive the CSV tokenizer over a chunk source and apply policy, schema, and metrics.
//! Exports: `CsvDecoder`, `CsvReader`, `TypedCsvReader`, `AsyncCsvReader`.
//! Role: `CsvDecoder` is sans-I/O; the readers are thin blocking/suspending drivers over it.
//! Invariants: Units leave in input order; a unit is never emitted after a `Stop` fault.
//! Invariants: After an error is returned the decoder only reports `Done`.
//! Invariants: Cancellation is checked before any pending unit or fault is handled.
//! Notes: Typed mode buffers up to `sample_rows` records until the schema is resolved.
use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::marker::PhantomData;
use std::path::Path;

use tokio::io::AsyncRead;

use crate::core::cancel::CancelToken;
use crate::core::csv::schema::{Schema, SchemaResolver};
use crate::core::csv::tokenizer::{CsvTokenizer, RawRecord, TokenizedRecord, TokenizerConfig};
use crate::core::error::{Error, ErrorKind};
use crate::core::materialize::Materializer;
use crate::core::metrics::{ProgressSink, ProgressThrottle, ReaderMetrics};
use crate::core::options::CsvOptions;
use crate::core::policy::{Decision, ErrorPolicy, ErrorSink, Fault, GuardRail, ReaderTag, Recovery};
use crate::core::source::{AsyncReadSource, ChunkSource, ReadSource, Step, TextChunker};

pub struct CsvDecoder {
    options: CsvOptions,
    chunker: TextChunker,
    tokenizer: CsvTokenizer,
    pending: VecDeque<TokenizedRecord>,
    rail: GuardRail,
    resolver: SchemaResolver,
    metrics: ReaderMetrics,
    progress: Option<ProgressThrottle>,
    cancel: Option<CancelToken>,
    total_len: Option<u64>,
    header: Option<Vec<String>>,
    schema: Option<Schema>,
    sample: VecDeque<RawRecord>,
    deferred: Option<Error>,
    eof: bool,
    stopped: bool,
    finished: bool,
}

impl CsvDecoder {
    pub fn new(options: CsvOptions) -> Self {
        let rail = GuardRail::new(
            options.errors,
            ReaderTag::Csv,
            options.source_name.clone(),
            options.max_snippet_chars,
        );
        Self {
            chunker: TextChunker::new(options.chunk_size),
            tokenizer: CsvTokenizer::new(TokenizerConfig::from_options(&options)),
            pending: VecDeque::new(),
            rail,
            resolver: SchemaResolver::new(&options),
            metrics: ReaderMetrics::default(),
            progress: None,
            cancel: None,
            total_len: None,
            header: None,
            schema: None,
            sample: VecDeque::new(),
            deferred: None,
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

    pub fn options(&self) -> &CsvOptions {
        &self.options
    }

    pub fn metrics(&self) -> &ReaderMetrics {
        &self.metrics
    }

    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    /// Resolved schema; typed mode only, and only once sampling finished.
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Buffer the next read should land in.
    pub fn spare(&mut self) -> &mut [u8] {
        self.chunker.spare()
    }

    /// Tokenize `read` freshly filled bytes; `read == 0` marks end of input.
    pub fn commit(&mut self, read: usize) -> Result<(), Error> {
        if self.finished || self.stopped {
            return Ok(());
        }
        self.metrics.mark_started();
        self.metrics.bytes_read += read as u64;
        let eof = read == 0;
        self.chunker.commit(read, eof);
        let fed = {
            let text = self.chunker.text();
            self.tokenizer
                .feed(&text, &mut self.pending, self.cancel.as_ref())
        };
        if let Err(err) = fed {
            return Err(self.fail(err));
        }
        self.chunker.consume();
        if eof {
            self.tokenizer.finish(&mut self.pending);
            self.eof = true;
        }
        self.metrics.lines_read = self.tokenizer.lines_read();
        tracing::trace!(read, queued = self.pending.len(), "csv chunk tokenized");
        Ok(())
    }

    /// Wrap a failed read of the underlying source.
    pub fn io_failed(&mut self, err: io::Error) -> Error {
        let err = Error::new(ErrorKind::Io)
            .with_message("failed to read input")
            .with_source_name(self.options.source_name.clone())
            .with_source(err);
        self.fail(err)
    }

    /// Next raw record, header excluded.
    pub fn next_record(&mut self) -> Result<Step<RawRecord>, Error> {
        loop {
            if self.finished {
                return Ok(Step::Done);
            }
            self.check_cancel()?;
            if let Some(tokenized) = self.pending.pop_front() {
                let admitted = match self.admit(tokenized) {
                    Ok(admitted) => admitted,
                    Err(err) => return Err(self.fail(err)),
                };
                if let Some(record) = admitted {
                    self.metrics.units_emitted += 1;
                    return Ok(Step::Unit(record));
                }
                continue;
            }
            if self.eof || self.stopped {
                self.complete();
                return Ok(Step::Done);
            }
            return Ok(Step::NeedData);
        }
    }

    /// Next record converted through the schema and handed to `materializer`.
    pub fn next_typed<T, M>(&mut self, materializer: &M) -> Result<Step<T>, Error>
    where
        M: Materializer<T> + ?Sized,
    {
        loop {
            if self.finished {
                return Ok(Step::Done);
            }
            self.check_cancel()?;
            if self.schema.is_some() {
                if let Some(record) = self.sample.pop_front() {
                    if let Some(unit) = self.emit_typed(record, materializer)? {
                        return Ok(Step::Unit(unit));
                    }
                    continue;
                }
            }
            if let Some(tokenized) = self.pending.pop_front() {
                match self.admit(tokenized) {
                    Ok(Some(record)) => {
                        self.sample.push_back(record);
                        if self.schema.is_none() && self.sample.len() >= self.sample_target() {
                            self.resolve_schema();
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        // Records sampled before the failure still go out first.
                        self.deferred = Some(err);
                        self.stop();
                    }
                }
                continue;
            }
            if self.eof || self.stopped {
                if self.schema.is_none() && (self.header.is_some() || !self.sample.is_empty()) {
                    self.resolve_schema();
                    continue;
                }
                if let Some(err) = self.deferred.take() {
                    return Err(self.fail(err));
                }
                self.complete();
                return Ok(Step::Done);
            }
            return Ok(Step::NeedData);
        }
    }

    fn sample_target(&self) -> usize {
        if self.options.infer_types || !self.options.has_header {
            self.options.sample_rows.max(1)
        } else {
            0
        }
    }

    fn resolve_schema(&mut self) {
        let schema = self.resolver.resolve(self.header.as_deref(), self.sample.make_contiguous());
        self.schema = Some(schema);
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

    /// Apply header handling, observers, and the error policy to one tokenized record.
    fn admit(&mut self, tokenized: TokenizedRecord) -> Result<Option<RawRecord>, Error> {
        let TokenizedRecord { mut record, fault } = tokenized;

        if self.options.has_header && self.header.is_none() {
            if let Some(mut fault) = fault {
                if fault.recovery != Recovery::KeepUnit {
                    fault.recovery = Recovery::EndStream;
                }
                if !self.apply(fault, 0)? {
                    return Ok(None);
                }
            }
            self.header = Some(record.fields);
            return Ok(None);
        }

        self.metrics.raw_units_parsed += 1;
        let index = self.metrics.raw_units_parsed;
        record.index = index;
        if let (Some(observer), Some(raw)) = (&self.options.raw_observer, record.raw.as_deref()) {
            observer(index, raw);
        }
        if !self.options.capture_raw {
            record.raw = None;
        }
        self.observe_progress();

        if let Some(fault) = fault {
            if !self.apply(fault, index)? {
                return Ok(None);
            }
        }
        Ok(Some(record))
    }

    /// Route `fault` through the policy; `Ok(true)` keeps the unit.
    fn apply(&mut self, fault: Fault, index: u64) -> Result<bool, Error> {
        match self.rail.handle(fault, index, &mut self.metrics)? {
            Decision::Continue => Ok(true),
            Decision::SkipUnit => Ok(false),
            Decision::Abort => {
                self.stop();
                Ok(false)
            }
        }
    }

    fn emit_typed<T, M>(&mut self, record: RawRecord, materializer: &M) -> Result<Option<T>, Error>
    where
        M: Materializer<T> + ?Sized,
    {
        let (line, index) = (record.line, record.index);
        let flexible = self.options.flexible_fields;
        let converted = match self.schema.as_mut() {
            Some(schema) => schema.convert(record, flexible),
            None => {
                let err = Error::new(ErrorKind::Internal).with_message("schema not resolved");
                return Err(self.fail(err));
            }
        };
        let values = match converted {
            Ok(values) => values,
            Err(fault) => {
                self.drop_after(fault, index)?;
                return Ok(None);
            }
        };

        let built = match self.schema.as_ref() {
            Some(schema) => materializer.materialize(schema, values),
            None => return Ok(None),
        };
        match built {
            Ok(unit) => {
                self.metrics.units_emitted += 1;
                Ok(Some(unit))
            }
            Err(err) => {
                let err = err.locate(Some(line), index);
                if self.rail.policy() == ErrorPolicy::Throw {
                    let fault = Fault::new(ErrorKind::Materialize, err.to_string(), Recovery::DropUnit)
                        .at_line(line);
                    self.rail.report(fault, index, &mut self.metrics);
                    return Err(self.fail(err));
                }
                let fault = Fault::new(err.kind(), err.to_string(), Recovery::DropUnit).at_line(line);
                self.drop_after(fault, index)?;
                Ok(None)
            }
        }
    }

    /// Handle a fault raised while draining buffered records.
    fn drop_after(&mut self, fault: Fault, index: u64) -> Result<(), Error> {
        match self.apply(fault, index) {
            Ok(_) => {
                if self.stopped {
                    self.sample.clear();
                }
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn stop(&mut self) {
        if !self.stopped {
            tracing::debug!(source = %self.options.source_name, "csv stream stopped by policy");
        }
        self.stopped = true;
        self.pending.clear();
    }

    fn fail(&mut self, err: Error) -> Error {
        self.finished = true;
        self.pending.clear();
        self.sample.clear();
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
            lines = self.metrics.lines_read,
            parsed = self.metrics.raw_units_parsed,
            emitted = self.metrics.units_emitted,
            errors = self.metrics.errors,
            "csv stream complete"
        );
    }

    fn observe_progress(&mut self) {
        if let Some(progress) = self.progress.as_mut() {
            progress.observe(&self.metrics, self.total_len);
        }
    }
}

/// Blocking reader yielding raw records.
pub struct CsvReader<S> {
    source: S,
    decoder: CsvDecoder,
}

impl CsvReader<ReadSource<File>> {
    /// Open `path`; the path becomes the source name unless one was set.
    pub fn open(path: impl AsRef<Path>, mut options: CsvOptions) -> Result<Self, Error> {
        let path = path.as_ref();
        if options.source_name == CsvOptions::new().source_name {
            options.source_name = path.display().to_string();
        }
        Ok(Self::new(ReadSource::open(path)?, options))
    }
}

impl<S: ChunkSource> CsvReader<S> {
    pub fn new(source: S, options: CsvOptions) -> Self {
        let mut decoder = CsvDecoder::new(options);
        decoder.set_total_len(source.total_len());
        Self { source, decoder }
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

    pub fn header(&self) -> Option<&[String]> {
        self.decoder.header()
    }

    /// Switch to typed records built by `materializer`.
    pub fn typed<T, M: Materializer<T>>(self, materializer: M) -> TypedCsvReader<S, T, M> {
        TypedCsvReader {
            inner: self,
            materializer,
            _target: PhantomData,
        }
    }

    fn pull<U>(
        &mut self,
        mut next: impl FnMut(&mut CsvDecoder) -> Result<Step<U>, Error>,
    ) -> Option<Result<U, Error>> {
        loop {
            match next(&mut self.decoder) {
                Err(err) => return Some(Err(err)),
                Ok(Step::Unit(unit)) => return Some(Ok(unit)),
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

impl<S: ChunkSource> Iterator for CsvReader<S> {
    type Item = Result<RawRecord, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pull(CsvDecoder::next_record)
    }
}

/// Blocking reader yielding materialized records.
pub struct TypedCsvReader<S, T, M> {
    inner: CsvReader<S>,
    materializer: M,
    _target: PhantomData<fn() -> T>,
}

impl<S: ChunkSource, T, M: Materializer<T>> TypedCsvReader<S, T, M> {
    pub fn metrics(&self) -> &ReaderMetrics {
        self.inner.metrics()
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.inner.decoder.schema()
    }
}

impl<S: ChunkSource, T, M: Materializer<T>> Iterator for TypedCsvReader<S, T, M> {
    type Item = Result<T, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let materializer = &self.materializer;
        self.inner
            .pull(|decoder| decoder.next_typed(materializer))
    }
}

/// Suspending reader; awaits only while filling the next chunk.
pub struct AsyncCsvReader<R> {
    source: AsyncReadSource<R>,
    decoder: CsvDecoder,
}

impl AsyncCsvReader<tokio::fs::File> {
    pub async fn open(path: impl AsRef<Path>, mut options: CsvOptions) -> Result<Self, Error> {
        let path = path.as_ref();
        if options.source_name == CsvOptions::new().source_name {
            options.source_name = path.display().to_string();
        }
        Ok(Self::new(AsyncReadSource::open(path).await?, options))
    }
}

impl<R: AsyncRead + Unpin> AsyncCsvReader<R> {
    pub fn new(source: AsyncReadSource<R>, options: CsvOptions) -> Self {
        let mut decoder = CsvDecoder::new(options);
        decoder.set_total_len(source.total_len());
        Self { source, decoder }
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

    pub fn header(&self) -> Option<&[String]> {
        self.decoder.header()
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.decoder.schema()
    }

    pub async fn next_record(&mut self) -> Result<Option<RawRecord>, Error> {
        loop {
            match self.decoder.next_record()? {
                Step::Unit(record) => return Ok(Some(record)),
                Step::Done => return Ok(None),
                Step::NeedData => self.fill().await?,
            }
        }
    }

    pub async fn next_typed<T, M>(&mut self, materializer: &M) -> Result<Option<T>, Error>
    where
        M: Materializer<T> + ?Sized,
    {
        loop {
            match self.decoder.next_typed(materializer)? {
                Step::Unit(unit) => return Ok(Some(unit)),
                Step::Done => return Ok(None),
                Step::NeedData => self.fill().await?,
            }
        }
    }

    async fn fill(&mut self) -> Result<(), Error> {
        let read = match self.source.fill(self.decoder.spare()).await {
            Ok(read) => read,
            Err(err) => return Err(self.decoder.io_failed(err)),
        };
        self.decoder.commit(read)
    }
}
