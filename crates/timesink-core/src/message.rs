//! Typed messages decoded from queue payload items.
//!
//! A batch payload is a JSON array of objects. Each item is classified by its
//! `type` field: `<name>.event` is an event message for data type `<name>`,
//! anything else is a data message for data type `type`. Construction
//! validates the fields the pipeline depends on; a failed construction is an
//! item-level error the decoder logs and skips.

use crate::datatype::DataType;
use crate::event::Event;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Item-level construction failures. These never fail a batch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("missing or invalid field '{0}'")]
    Field(&'static str),

    #[error("no identifier derivable from meta")]
    Identifier,
}

/// Classification of a payload item by its `type` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// A data message; the payload `type` is the data-type name.
    Data(String),
    /// An event message; the data-type name is `type` minus its `.event`
    /// suffix.
    Event(String),
}

impl MessageKind {
    pub fn data_type(&self) -> &str {
        match self {
            MessageKind::Data(name) | MessageKind::Event(name) => name,
        }
    }
}

/// Classify a `type` field. A bare `.event` has an empty capture and is
/// treated as a data type named `.event`, matching the anchored-capture rule.
pub fn classify(type_field: &str) -> MessageKind {
    match type_field.strip_suffix(".event") {
        Some(name) if !name.is_empty() => MessageKind::Event(name.to_string()),
        _ => MessageKind::Data(type_field.to_string()),
    }
}

/// An epoch-seconds number field; fractional seconds are truncated.
fn int_field(item: &Map<String, Value>, name: &'static str) -> Result<i64, MessageError> {
    match item.get(name) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or(MessageError::Field(name)),
        _ => Err(MessageError::Field(name)),
    }
}

fn str_field(item: &Map<String, Value>, name: &'static str) -> Result<String, MessageError> {
    match item.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(MessageError::Field(name)),
    }
}

/// One point-in-time sample set for one measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    pub data_type: String,
    pub time: i64,
    pub interval: i64,
    /// Derived from `meta` by the data type's required fields.
    pub identifier: String,
    /// Value per value type; `None` is an explicitly absent sample.
    pub values: BTreeMap<String, Option<f64>>,
    pub meta: Map<String, Value>,
}

impl DataMessage {
    /// Build a data message from a payload item.
    ///
    /// Requires numeric `time`, a positive numeric `interval`, an object
    /// `values` of numbers-or-nulls, and a `meta` from which the data type
    /// can derive an identifier.
    pub fn from_item(data_type: &DataType, item: &Map<String, Value>) -> Result<Self, MessageError> {
        let time = int_field(item, "time")?;
        let interval = int_field(item, "interval")?;
        if interval <= 0 {
            return Err(MessageError::Field("interval"));
        }

        let raw_values = item
            .get("values")
            .and_then(Value::as_object)
            .ok_or(MessageError::Field("values"))?;
        let mut values = BTreeMap::new();
        for (value_type, value) in raw_values {
            let parsed = match value {
                Value::Null => None,
                Value::Number(n) => Some(n.as_f64().ok_or(MessageError::Field("values"))?),
                _ => return Err(MessageError::Field("values")),
            };
            values.insert(value_type.clone(), parsed);
        }

        let meta = item
            .get("meta")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let identifier = data_type
            .identifier_from_meta(&meta)
            .ok_or(MessageError::Identifier)?;

        Ok(Self {
            data_type: data_type.name.clone(),
            time,
            interval,
            identifier,
            values,
            meta,
        })
    }
}

/// One event for an event bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    pub data_type: String,
    pub event_type: String,
    pub start: i64,
    pub end: i64,
    pub identifier: String,
    pub affected: Value,
    pub text: String,
}

impl EventMessage {
    /// Build an event message from a payload item. `affected` defaults to
    /// null; everything else is required.
    pub fn from_item(data_type: &str, item: &Map<String, Value>) -> Result<Self, MessageError> {
        Ok(Self {
            data_type: data_type.to_string(),
            event_type: str_field(item, "event_type")?,
            start: int_field(item, "start")?,
            end: int_field(item, "end")?,
            identifier: str_field(item, "identifier")?,
            affected: item.get("affected").cloned().unwrap_or(Value::Null),
            text: str_field(item, "text")?,
        })
    }

    /// The stored form of this event.
    pub fn to_event(&self) -> Event {
        Event {
            start: self.start,
            end: self.end,
            identifier: self.identifier.clone(),
            affected: self.affected.clone(),
            text: self.text.clone(),
            event_type: self.event_type.clone(),
        }
    }
}
