//! Purpose: Structured stderr notices for the `chunkwise` CLI.
//! Exports: `Notice`.
//! Role: One record shape for reported reader errors (`skip`, `continue`, `stop`),
//!   throttled `progress` snapshots and the closing `summary`.
//! Invariants: Notices go to stderr only; stdout carries decoded units alone.
//! Invariants: Field names are additive-only; `details` holds kind-specific counters.
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub kind: String,
    pub time: OffsetDateTime,
    pub cmd: String,
    pub source: String,
    pub message: String,
    pub details: Map<String, Value>,
}

impl Notice {
    pub fn new(
        kind: impl Into<String>,
        cmd: impl Into<String>,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            time: OffsetDateTime::now_utc(),
            cmd: cmd.into(),
            source: source.into(),
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn at(mut self, time: OffsetDateTime) -> Self {
        self.time = time;
        self
    }

    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// `{"notice": {...}}`; the time renders as RFC 3339 (empty if unrepresentable).
    pub fn to_json(&self) -> Value {
        json!({
            "notice": {
                "kind": self.kind,
                "time": self.time.format(&Rfc3339).unwrap_or_default(),
                "cmd": self.cmd,
                "source": self.source,
                "message": self.message,
                "details": self.details,
            }
        })
    }

    /// Single-line form for an interactive terminal.
    pub fn to_text(&self) -> String {
        format!("notice: {} ({}: {})", self.message, self.kind, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::Notice;
    use time::macros::datetime;

    #[test]
    fn skip_notice_carries_location() {
        let notice = Notice::new("skip", "csv", "people.csv", "record has 4 fields, expected 3")
            .at(datetime!(2026-02-01 0:00 UTC))
            .detail("index", 3u64)
            .detail("line", 4u64);

        let value = notice.to_json();
        let obj = value
            .get("notice")
            .and_then(|v| v.as_object())
            .expect("notice object");
        assert_eq!(obj.get("kind").and_then(|v| v.as_str()), Some("skip"));
        assert_eq!(
            obj.get("time").and_then(|v| v.as_str()),
            Some("2026-02-01T00:00:00Z")
        );
        assert_eq!(obj.get("cmd").and_then(|v| v.as_str()), Some("csv"));
        assert_eq!(obj.get("source").and_then(|v| v.as_str()), Some("people.csv"));
        assert_eq!(value["notice"]["details"]["line"], 4);
        assert_eq!(value["notice"]["details"]["index"], 3);
    }

    #[test]
    fn text_form_names_kind_and_source() {
        let notice = Notice::new("summary", "json", "<stdin>", "emitted 2 of 2 units (0 errors)");
        assert_eq!(
            notice.to_text(),
            "notice: emitted 2 of 2 units (0 errors) (summary: <stdin>)"
        );
    }
}
