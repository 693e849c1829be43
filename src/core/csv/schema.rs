//! Purpose: Resolve column names and types for CSV records and convert raw fields.
//! Exports: `Schema`, `Column`, `ColumnType`, `FieldValue`, `SchemaResolver`.
//! Role: Sits between the tokenizer and the materializer on the typed path.
//! Invariants: Column order matches field order; repeated names get a `_N` suffix.
//! Invariants: A demoted column stays `String` for the rest of the stream.
//! Notes: Inference sees only the first N sampled records; later contradictions demote.
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};
use uuid::Uuid;

use crate::core::csv::tokenizer::RawRecord;
use crate::core::error::ErrorKind;
use crate::core::options::{CsvOptions, NamingHook};
use crate::core::policy::{Fault, Recovery};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ColumnType {
    Bool,
    Int32,
    Int64,
    Decimal,
    Float64,
    DateTime,
    Guid,
    String,
}

/// Inference order; the first surviving candidate wins.
const PRECEDENCE: [ColumnType; 7] = [
    ColumnType::Bool,
    ColumnType::Int32,
    ColumnType::Int64,
    ColumnType::Decimal,
    ColumnType::Float64,
    ColumnType::DateTime,
    ColumnType::Guid,
];

/// Failures a candidate survives before it is eliminated.
const TOLERATED_FAILURES: u32 = 1;

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Bool => "bool",
            ColumnType::Int32 => "int32",
            ColumnType::Int64 => "int64",
            ColumnType::Decimal => "decimal",
            ColumnType::Float64 => "float64",
            ColumnType::DateTime => "datetime",
            ColumnType::Guid => "guid",
            ColumnType::String => "string",
        }
    }

    fn is_numeric(self) -> bool {
        matches!(
            self,
            ColumnType::Int32 | ColumnType::Int64 | ColumnType::Decimal | ColumnType::Float64
        )
    }

    /// Parse a non-empty raw value as this type.
    pub fn parse(self, raw: &str) -> Option<FieldValue> {
        let value = raw.trim();
        match self {
            ColumnType::Bool => {
                if value.eq_ignore_ascii_case("true") {
                    Some(FieldValue::Bool(true))
                } else if value.eq_ignore_ascii_case("false") {
                    Some(FieldValue::Bool(false))
                } else {
                    None
                }
            }
            ColumnType::Int32 => value.parse().ok().map(FieldValue::Int32),
            ColumnType::Int64 => value.parse().ok().map(FieldValue::Int64),
            ColumnType::Decimal => Decimal::from_str(value).ok().map(FieldValue::Decimal),
            ColumnType::Float64 => value
                .parse::<f64>()
                .ok()
                .filter(|parsed| parsed.is_finite())
                .map(FieldValue::Float64),
            ColumnType::DateTime => parse_datetime(value).map(FieldValue::DateTime),
            ColumnType::Guid => Uuid::parse_str(value).ok().map(FieldValue::Guid),
            ColumnType::String => Some(FieldValue::String(raw.to_string())),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn parse_datetime(value: &str) -> Option<OffsetDateTime> {
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(parsed);
    }
    let spaced = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    if let Ok(parsed) = PrimitiveDateTime::parse(value, spaced) {
        return Some(parsed.assume_utc());
    }
    let t_separated = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    if let Ok(parsed) = PrimitiveDateTime::parse(value, t_separated) {
        return Some(parsed.assume_utc());
    }
    let date_only = format_description!("[year]-[month]-[day]");
    Date::parse(value, date_only)
        .ok()
        .map(|date| date.midnight().assume_utc())
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Decimal(Decimal),
    Float64(f64),
    DateTime(OffsetDateTime),
    Guid(Uuid),
    String(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(value) => Value::Bool(*value),
            FieldValue::Int32(value) => Value::from(*value),
            FieldValue::Int64(value) => Value::from(*value),
            FieldValue::Decimal(value) => {
                let text = value.to_string();
                match serde_json::Number::from_str(&text) {
                    Ok(number) => Value::Number(number),
                    Err(_) => Value::String(text),
                }
            }
            FieldValue::Float64(value) => serde_json::Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::DateTime(value) => match value.format(&Rfc3339) {
                Ok(text) => Value::String(text),
                Err(_) => Value::String(value.to_string()),
            },
            FieldValue::Guid(value) => Value::String(value.hyphenated().to_string()),
            FieldValue::String(value) => Value::String(value.clone()),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    /// Set when a value contradicted the inferred type.
    pub demoted: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Schema {
    columns: Vec<Column>,
    from_header: bool,
}

impl Schema {
    pub fn new(columns: Vec<Column>, from_header: bool) -> Self {
        Self {
            columns,
            from_header,
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> Option<&Column> {
        self.columns.get(idx)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn from_header(&self) -> bool {
        self.from_header
    }

    /// Convert one record's fields into values, demoting columns whose type no
    /// longer holds.
    pub fn convert(&mut self, record: RawRecord, flexible: bool) -> Result<Vec<FieldValue>, Fault> {
        let expected = self.columns.len();
        let actual = record.fields.len();
        let short_ok = flexible || !self.from_header;
        if (actual > expected && !flexible) || (actual < expected && !short_ok) {
            return Err(Fault::new(
                ErrorKind::Schema,
                format!("record has {actual} fields, schema expects {expected}"),
                Recovery::DropUnit,
            )
            .at_line(record.line)
            .with_excerpt(record.fields.join(",")));
        }

        let mut values = Vec::with_capacity(expected);
        let mut fields = record.fields.into_iter();
        for column in &mut self.columns {
            let Some(raw) = fields.next() else {
                values.push(FieldValue::Null);
                continue;
            };
            values.push(convert_field(column, raw));
        }
        Ok(values)
    }
}

fn convert_field(column: &mut Column, raw: String) -> FieldValue {
    if column.ty == ColumnType::String {
        return FieldValue::String(raw);
    }
    if raw.trim().is_empty() {
        return FieldValue::Null;
    }
    match column.ty.parse(&raw) {
        Some(value) => value,
        None => {
            tracing::debug!(
                column = %column.name,
                from = column.ty.as_str(),
                "demoting column to string"
            );
            column.ty = ColumnType::String;
            column.demoted = true;
            FieldValue::String(raw)
        }
    }
}

#[derive(Clone, Debug)]
struct TypeCandidate {
    remaining: Vec<(ColumnType, u32, u32)>,
    non_empty: usize,
}

impl TypeCandidate {
    fn new() -> Self {
        Self {
            remaining: PRECEDENCE.iter().map(|ty| (*ty, 0, 0)).collect(),
            non_empty: 0,
        }
    }

    fn update(&mut self, value: &str, long_digit_threshold: usize) {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return;
        }
        self.non_empty += 1;

        let all_digits = trimmed.bytes().all(|b| b.is_ascii_digit());
        if all_digits
            && ((trimmed.len() > 1 && trimmed.starts_with('0'))
                || trimmed.len() > long_digit_threshold)
        {
            self.remaining.retain(|(ty, _, _)| !ty.is_numeric());
        }

        self.remaining.retain_mut(|(ty, hits, failures)| {
            if ty.parse(trimmed).is_some() {
                *hits += 1;
                true
            } else {
                *failures += 1;
                *failures <= TOLERATED_FAILURES
            }
        });
    }

    fn decide(&self) -> ColumnType {
        if self.non_empty == 0 {
            return ColumnType::String;
        }
        self.remaining
            .iter()
            .find(|(_, hits, _)| *hits > 0)
            .map(|(ty, _, _)| *ty)
            .unwrap_or(ColumnType::String)
    }
}

#[derive(Clone)]
pub struct SchemaResolver {
    infer_types: bool,
    long_digit_threshold: usize,
    naming_hook: Option<NamingHook>,
}

impl SchemaResolver {
    pub fn new(options: &CsvOptions) -> Self {
        Self {
            infer_types: options.infer_types,
            long_digit_threshold: options.long_digit_threshold,
            naming_hook: options.naming_hook.clone(),
        }
    }

    /// Build the schema from an optional header row and the sampled records.
    pub fn resolve(&self, header: Option<&[String]>, samples: &[RawRecord]) -> Schema {
        let width = match header {
            Some(cells) => cells.len(),
            None => samples.iter().map(RawRecord::len).max().unwrap_or(0),
        };

        let mut columns = Vec::with_capacity(width);
        let mut taken = HashSet::with_capacity(width);
        for idx in 0..width {
            let cell = header.and_then(|cells| cells.get(idx)).map_or("", String::as_str);
            let name = self
                .naming_hook
                .as_ref()
                .and_then(|hook| hook(idx, cell))
                .unwrap_or_else(|| default_name(idx, cell));
            let name = unique_name(name, &mut taken);
            let ty = if self.infer_types {
                self.infer_column(idx, samples)
            } else {
                ColumnType::String
            };
            columns.push(Column {
                name,
                ty,
                demoted: false,
            });
        }

        tracing::debug!(
            columns = columns.len(),
            sampled = samples.len(),
            header = header.is_some(),
            "schema resolved"
        );
        Schema::new(columns, header.is_some())
    }

    fn infer_column(&self, idx: usize, samples: &[RawRecord]) -> ColumnType {
        let mut candidate = TypeCandidate::new();
        for record in samples {
            if let Some(value) = record.get(idx) {
                candidate.update(value, self.long_digit_threshold);
            }
        }
        candidate.decide()
    }
}

fn default_name(idx: usize, cell: &str) -> String {
    if cell.is_empty() {
        format!("Column{}", idx + 1)
    } else {
        cell.to_string()
    }
}

/// `a`, `a`, `a` become `a`, `a_2`, `a_3`.
fn unique_name(name: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.clone()) {
        return name;
    }
    let mut suffix = 2usize;
    loop {
        let candidate = format!("{name}_{suffix}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        suffix += 1;
    }
}
