//! Purpose: Route every detected fault through one per-stream error policy.
//! Exports: `ErrorPolicy`, `Decision`, `Recovery`, `Fault`, `ReaderError`, `ErrorSink`,
//! `NoopSink`, `TracingSink`, `GuardRail`, `truncate_snippet`.
//! Role: Cross-cutting decision object consulted by both tokenizers at unit boundaries.
//! Invariants: The sink is invoked for every fault before the decision is acted on.
//! Invariants: Excerpts are bounded; a `ReaderError` is never retained by the engine.
use time::OffsetDateTime;

use crate::core::error::{Error, ErrorKind};
use crate::core::metrics::ReaderMetrics;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum ErrorPolicy {
    /// Surface the first error to the caller and end the stream.
    #[default]
    Throw,
    /// Drop the offending unit and continue.
    Skip,
    /// End the stream cleanly at the offending unit.
    Stop,
}

/// What the decoder does next after a fault was reported.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    Continue,
    SkipUnit,
    Abort,
}

/// How far the decoder can recover from a fault on its own.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Recovery {
    /// The unit is still usable as decoded (for example a literal quote).
    KeepUnit,
    /// The unit is unusable but the next unit boundary is known.
    DropUnit,
    /// No unit boundary can be found after this fault.
    EndStream,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorAction {
    Thrown,
    Continued,
    Skipped,
    Stopped,
}

impl ErrorAction {
    pub fn label(self) -> &'static str {
        match self {
            ErrorAction::Thrown => "throw",
            ErrorAction::Continued => "continue",
            ErrorAction::Skipped => "skip",
            ErrorAction::Stopped => "stop",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReaderTag {
    Csv,
    Json,
}

impl ReaderTag {
    pub fn label(self) -> &'static str {
        match self {
            ReaderTag::Csv => "csv",
            ReaderTag::Json => "json",
        }
    }
}

/// A fault as detected by a tokenizer, before the policy has looked at it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Fault {
    pub kind: ErrorKind,
    pub message: String,
    pub line: Option<u64>,
    pub excerpt: Option<String>,
    pub recovery: Recovery,
}

impl Fault {
    pub fn new(kind: ErrorKind, message: impl Into<String>, recovery: Recovery) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
            excerpt: None,
            recovery,
        }
    }

    pub fn at_line(mut self, line: u64) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = Some(excerpt.into());
        self
    }
}

/// The record handed to an `ErrorSink`.
#[derive(Clone, Debug)]
pub struct ReaderError {
    pub reader: ReaderTag,
    pub source: String,
    pub line: Option<u64>,
    pub index: u64,
    pub kind: ErrorKind,
    pub message: String,
    pub excerpt: Option<String>,
    pub action: ErrorAction,
    pub timestamp: OffsetDateTime,
}

impl ReaderError {
    pub fn to_error(&self) -> Error {
        let mut err = Error::new(self.kind)
            .with_message(self.message.clone())
            .with_source_name(self.source.clone())
            .with_index(self.index);
        if let Some(line) = self.line {
            err = err.with_line(line);
        }
        if let Some(excerpt) = &self.excerpt {
            err = err.with_snippet(excerpt.clone());
        }
        err
    }
}

pub trait ErrorSink: Send {
    fn report(&mut self, error: &ReaderError);
}

impl<F> ErrorSink for F
where
    F: FnMut(&ReaderError) + Send,
{
    fn report(&mut self, error: &ReaderError) {
        self(error)
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct NoopSink;

impl ErrorSink for NoopSink {
    fn report(&mut self, _error: &ReaderError) {}
}

/// Logs every reported error as a structured `warn` event.
#[derive(Copy, Clone, Debug, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&mut self, error: &ReaderError) {
        tracing::warn!(
            reader = error.reader.label(),
            source = %error.source,
            line = ?error.line,
            index = error.index,
            kind = error.kind.label(),
            action = error.action.label(),
            "{}",
            error.message
        );
    }
}

pub struct GuardRail {
    policy: ErrorPolicy,
    reader: ReaderTag,
    source: String,
    max_snippet_chars: usize,
    sink: Box<dyn ErrorSink>,
}

impl GuardRail {
    pub fn new(
        policy: ErrorPolicy,
        reader: ReaderTag,
        source: impl Into<String>,
        max_snippet_chars: usize,
    ) -> Self {
        Self {
            policy,
            reader,
            source: source.into(),
            max_snippet_chars,
            sink: Box::new(NoopSink),
        }
    }

    pub fn set_sink(&mut self, sink: Box<dyn ErrorSink>) {
        self.sink = sink;
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn decide(&self, recovery: Recovery) -> Decision {
        match (self.policy, recovery) {
            (ErrorPolicy::Stop, _) => Decision::Abort,
            (_, Recovery::EndStream) => Decision::Abort,
            (_, Recovery::KeepUnit) => Decision::Continue,
            (_, Recovery::DropUnit) => Decision::SkipUnit,
        }
    }

    /// Report `fault` for unit `index` and return what to do next; under
    /// `Throw` the fault comes back as the error to surface.
    pub fn handle(
        &mut self,
        fault: Fault,
        index: u64,
        metrics: &mut ReaderMetrics,
    ) -> Result<Decision, Error> {
        let decision = self.decide(fault.recovery);
        let report = self.record(fault, index, decision, metrics);
        match report.action {
            ErrorAction::Thrown => Err(report.to_error()),
            _ => Ok(decision),
        }
    }

    /// Notify the sink and count the fault without deciding anything; for
    /// callers that surface an error of their own.
    pub fn report(&mut self, fault: Fault, index: u64, metrics: &mut ReaderMetrics) -> ErrorAction {
        let decision = self.decide(fault.recovery);
        self.record(fault, index, decision, metrics).action
    }

    fn record(
        &mut self,
        fault: Fault,
        index: u64,
        decision: Decision,
        metrics: &mut ReaderMetrics,
    ) -> ReaderError {
        let action = match (self.policy, decision) {
            (ErrorPolicy::Throw, _) => ErrorAction::Thrown,
            (_, Decision::Continue) => ErrorAction::Continued,
            (_, Decision::SkipUnit) => ErrorAction::Skipped,
            (_, Decision::Abort) => ErrorAction::Stopped,
        };
        let report = ReaderError {
            reader: self.reader,
            source: self.source.clone(),
            line: fault.line,
            index,
            kind: fault.kind,
            message: fault.message,
            excerpt: fault
                .excerpt
                .map(|text| truncate_snippet(&text, self.max_snippet_chars)),
            action,
            timestamp: OffsetDateTime::now_utc(),
        };
        metrics.errors += 1;
        self.sink.report(&report);
        report
    }
}

/// Bound `input` to `max` characters, marking truncation with `...`.
pub fn truncate_snippet(input: &str, max: usize) -> String {
    let suffix = "...";
    if input.chars().count() <= max {
        return input.to_string();
    }
    if max <= suffix.len() {
        return suffix[..max].to_string();
    }
    let mut snippet: String = input.chars().take(max - suffix.len()).collect();
    snippet.push_str(suffix);
    snippet
}

#[cfg(test)]
mod tests {
    use super::{
        Decision, ErrorAction, ErrorPolicy, Fault, GuardRail, ReaderError, ReaderTag, Recovery,
        truncate_snippet,
    };
    use crate::core::error::ErrorKind;
    use crate::core::metrics::ReaderMetrics;
    use std::sync::{Arc, Mutex};

    fn fault(recovery: Recovery) -> Fault {
        Fault::new(ErrorKind::CsvQuote, "illegal quote", recovery)
            .at_line(2)
            .with_excerpt("a\"b")
    }

    #[test]
    fn skip_maps_recovery_to_decision() {
        let mut rail = GuardRail::new(ErrorPolicy::Skip, ReaderTag::Csv, "t.csv", 128);
        let mut metrics = ReaderMetrics::default();
        let keep = rail.handle(fault(Recovery::KeepUnit), 1, &mut metrics);
        let drop = rail.handle(fault(Recovery::DropUnit), 2, &mut metrics);
        let end = rail.handle(fault(Recovery::EndStream), 3, &mut metrics);
        assert_eq!(keep.expect("keep"), Decision::Continue);
        assert_eq!(drop.expect("drop"), Decision::SkipUnit);
        assert_eq!(end.expect("end"), Decision::Abort);
        assert_eq!(metrics.errors, 3);
    }

    #[test]
    fn stop_always_aborts() {
        let rail = GuardRail::new(ErrorPolicy::Stop, ReaderTag::Json, "t.json", 128);
        assert_eq!(rail.decide(Recovery::KeepUnit), Decision::Abort);
        assert_eq!(rail.decide(Recovery::DropUnit), Decision::Abort);
    }

    #[test]
    fn throw_reports_before_failing() {
        let seen: Arc<Mutex<Vec<ReaderError>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let mut rail = GuardRail::new(ErrorPolicy::Throw, ReaderTag::Csv, "t.csv", 128);
        rail.set_sink(Box::new(move |err: &ReaderError| {
            sink_seen.lock().unwrap().push(err.clone());
        }));
        let mut metrics = ReaderMetrics::default();
        let err = rail
            .handle(fault(Recovery::KeepUnit), 7, &mut metrics)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CsvQuote);
        assert_eq!(err.index(), Some(7));
        assert_eq!(err.line(), Some(2));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].action.label(), "throw");
        assert_eq!(seen[0].source, "t.csv");
    }

    #[test]
    fn report_notifies_without_raising() {
        let seen: Arc<Mutex<Vec<ReaderError>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let mut rail = GuardRail::new(ErrorPolicy::Throw, ReaderTag::Csv, "t.csv", 128);
        rail.set_sink(Box::new(move |err: &ReaderError| {
            sink_seen.lock().unwrap().push(err.clone());
        }));
        let mut metrics = ReaderMetrics::default();
        let action = rail.report(fault(Recovery::DropUnit), 4, &mut metrics);
        assert_eq!(action, ErrorAction::Thrown);
        assert_eq!(metrics.errors, 1);
        assert_eq!(seen.lock().unwrap()[0].index, 4);
    }

    #[test]
    fn snippet_truncates() {
        let snippet = truncate_snippet("abcdefghijklmnopqrstuvwxyz", 8);
        assert_eq!(snippet, "abcde...");
        assert_eq!(truncate_snippet("short", 8), "short");
    }

    #[test]
    fn snippet_respects_char_boundaries() {
        let snippet = truncate_snippet("ééééééééé", 5);
        assert_eq!(snippet, "éé...");
    }
}
