//! Schema-driven decoding of raw JSON payloads.
//!
//! Decoding never fails: a payload that is not a JSON object becomes a
//! record with every field absent, and a field with the wrong type is left
//! absent. Each such problem is reported alongside the record so the stage
//! can count it.

use chrono::{DateTime, NaiveDate};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::DecodeError;
use crate::model::{CustomerProfile, OrderedSetEntry, ProfileChangeEnvelope, RiskEvent};

/// Wire type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Any scalar is accepted and rendered as text; objects and arrays keep
    /// their JSON text.
    Text,
    Boolean,
    Float,
    /// `YYYY-MM-DD` or an RFC 3339 timestamp.
    Date,
    /// Array of `{element, score}` objects.
    OrderedSet,
}

impl FieldType {
    fn describe(self) -> &'static str {
        match self {
            FieldType::Text => "string",
            FieldType::Boolean => "boolean",
            FieldType::Float => "number",
            FieldType::Date => "date",
            FieldType::OrderedSet => "array of entries",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
}

const fn field(name: &'static str, ty: FieldType) -> FieldSpec {
    FieldSpec { name, ty }
}

/// The fields a decoder looks for, by exact (case-sensitive) name.
///
/// Ordered-set fields are listed in precedence order: the first one that is
/// present, non-null and an array is used and the rest are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    name: &'static str,
    fields: Vec<FieldSpec>,
}

impl RecordSchema {
    pub fn new(name: &'static str, fields: Vec<FieldSpec>) -> Self {
        Self { name, fields }
    }

    /// Change events of the key-value store feed. The connector publishes
    /// the ordered set under two spellings; `zSetEntries` wins.
    pub fn profile_change() -> Self {
        Self::new(
            "profile-change",
            vec![
                field("key", FieldType::Text),
                field("existType", FieldType::Text),
                field("ch", FieldType::Text),
                field("incr", FieldType::Boolean),
                field("zSetEntries", FieldType::OrderedSet),
                field("zsetEntries", FieldType::OrderedSet),
            ],
        )
    }

    pub fn risk_score() -> Self {
        Self::new(
            "risk-score",
            vec![
                field("customer", FieldType::Text),
                field("score", FieldType::Float),
                field("riskDate", FieldType::Date),
            ],
        )
    }

    /// The customer JSON embedded in an ordered-set element.
    pub fn customer_profile() -> Self {
        Self::new(
            "customer-profile",
            vec![
                field("customerName", FieldType::Text),
                field("email", FieldType::Text),
                field("phone", FieldType::Text),
                field("birthDay", FieldType::Text),
            ],
        )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }
}

#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Text(String),
    Boolean(bool),
    Float(f64),
    Date(NaiveDate),
    OrderedSet(Vec<OrderedSetEntry>),
}

/// Field values found in one payload, keyed by schema field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    values: HashMap<&'static str, FieldValue>,
    ordered_set: Option<Vec<OrderedSetEntry>>,
}

impl Fields {
    pub fn take_text(&mut self, name: &str) -> Option<String> {
        match self.values.remove(name)? {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn take_bool(&mut self, name: &str) -> Option<bool> {
        match self.values.remove(name)? {
            FieldValue::Boolean(b) => Some(b),
            _ => None,
        }
    }

    pub fn take_float(&mut self, name: &str) -> Option<f64> {
        match self.values.remove(name)? {
            FieldValue::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn take_date(&mut self, name: &str) -> Option<NaiveDate> {
        match self.values.remove(name)? {
            FieldValue::Date(d) => Some(d),
            _ => None,
        }
    }

    /// The ordered set chosen by precedence, if any spelling was usable.
    pub fn take_ordered_set(&mut self) -> Option<Vec<OrderedSetEntry>> {
        self.ordered_set.take()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.ordered_set.is_none()
    }
}

/// A decoded record plus the problems met while decoding it.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    pub record: T,
    pub errors: Vec<DecodeError>,
}

impl<T> Decoded<T> {
    pub fn is_degraded(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Decoded<U> {
        Decoded {
            record: f(self.record),
            errors: self.errors,
        }
    }
}

/// Decodes payloads against one [`RecordSchema`].
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    schema: RecordSchema,
}

impl RecordDecoder {
    pub fn new(schema: RecordSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Decode the schema's fields from a JSON payload.
    pub fn decode(&self, bytes: &[u8]) -> Decoded<Fields> {
        let object = match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return degraded(DecodeError::NotAnObject),
            Err(e) => return degraded(DecodeError::Malformed(e.to_string())),
        };
        self.decode_object(&object)
    }

    fn decode_object(&self, object: &Map<String, Value>) -> Decoded<Fields> {
        let mut fields = Fields::default();
        let mut errors = Vec::new();

        for spec in &self.schema.fields {
            let Some(raw) = object.get(spec.name).filter(|v| !v.is_null()) else {
                continue;
            };

            if spec.ty == FieldType::OrderedSet {
                if fields.ordered_set.is_some() {
                    continue;
                }
                match ordered_set(raw, &mut errors) {
                    Some(entries) => fields.ordered_set = Some(entries),
                    None => errors.push(mismatch(spec)),
                }
                continue;
            }

            match scalar(spec.ty, raw) {
                Some(value) => {
                    fields.values.insert(spec.name, value);
                }
                None => errors.push(mismatch(spec)),
            }
        }

        Decoded {
            record: fields,
            errors,
        }
    }

    pub fn decode_profile_change(&self, bytes: &[u8]) -> Decoded<ProfileChangeEnvelope> {
        self.decode(bytes).map(ProfileChangeEnvelope::from_fields)
    }

    pub fn decode_risk_event(&self, bytes: &[u8]) -> Decoded<RiskEvent> {
        self.decode(bytes).map(RiskEvent::from_fields)
    }

    pub fn decode_customer_profile(&self, bytes: &[u8]) -> Decoded<CustomerProfile> {
        self.decode(bytes).map(CustomerProfile::from_fields)
    }
}

fn degraded(error: DecodeError) -> Decoded<Fields> {
    Decoded {
        record: Fields::default(),
        errors: vec![error],
    }
}

fn mismatch(spec: &FieldSpec) -> DecodeError {
    DecodeError::TypeMismatch {
        field: spec.name,
        expected: spec.ty.describe(),
    }
}

fn text(raw: &Value) -> Option<String> {
    match raw {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
}

fn scalar(ty: FieldType, raw: &Value) -> Option<FieldValue> {
    match ty {
        FieldType::Text => text(raw).map(FieldValue::Text),
        FieldType::Boolean => raw.as_bool().map(FieldValue::Boolean),
        FieldType::Float => raw.as_f64().map(FieldValue::Float),
        FieldType::Date => raw.as_str().and_then(date).map(FieldValue::Date),
        FieldType::OrderedSet => None,
    }
}

fn ordered_set(raw: &Value, errors: &mut Vec<DecodeError>) -> Option<Vec<OrderedSetEntry>> {
    let items = raw.as_array()?;
    let entries = items
        .iter()
        .map(|item| match item.as_object() {
            Some(entry) => OrderedSetEntry {
                element: entry.get("element").and_then(text),
                score: entry.get("score").and_then(text),
            },
            None => {
                errors.push(DecodeError::TypeMismatch {
                    field: "element",
                    expected: "ordered set entry",
                });
                OrderedSetEntry::default()
            }
        })
        .collect();
    Some(entries)
}
