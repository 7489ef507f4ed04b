//! RAW -> CONVERTED -> FORMATTED -> WITH_UNITS resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::ItemDef;
use crate::format::format_value;
use crate::value::{Value, ValueType};

pub const TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.3f";

/// All four representations of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolved {
    pub raw: Value,
    pub converted: Value,
    pub formatted: Value,
    pub with_units: Value,
}

impl Resolved {
    pub fn get(&self, value_type: ValueType) -> &Value {
        match value_type {
            ValueType::Raw => &self.raw,
            ValueType::Converted => &self.converted,
            ValueType::Formatted => &self.formatted,
            ValueType::WithUnits => &self.with_units,
        }
    }

    pub fn set(&mut self, value_type: ValueType, value: Value) {
        match value_type {
            ValueType::Raw => self.raw = value,
            ValueType::Converted => self.converted = value,
            ValueType::Formatted => self.formatted = value,
            ValueType::WithUnits => self.with_units = value,
        }
    }

    /// Same value in every representation; used for reserved items.
    pub fn uniform(value: Value) -> Self {
        Self {
            raw: value.clone(),
            converted: value.clone(),
            formatted: value.clone(),
            with_units: value,
        }
    }
}

struct Element {
    converted: Value,
    formatted: String,
    state: bool,
}

fn resolve_element(item: &ItemDef, raw: &Value) -> Element {
    if let Some((name, _)) = item.state_for(raw) {
        return Element {
            converted: Value::String(name.to_string()),
            formatted: name.to_string(),
            state: true,
        };
    }
    let converted = match &item.read_conversion {
        Some(conversion) => conversion.apply(raw),
        None => raw.clone(),
    };
    let formatted = match &item.format_string {
        Some(fmt) => format_value(fmt, &converted),
        None => converted.to_string(),
    };
    Element {
        converted,
        formatted,
        state: false,
    }
}

fn append_units(item: &ItemDef, formatted: &str, state: bool) -> String {
    match &item.units {
        Some(units) if !state && !units.is_empty() => format!("{formatted} {units}"),
        _ => formatted.to_string(),
    }
}

/// Compute every representation of `raw` for `item`.
pub fn resolve_all(item: &ItemDef, raw: &Value) -> Resolved {
    if raw.is_null() {
        return Resolved::uniform(Value::Null);
    }
    match raw {
        Value::Array(elements) => {
            let resolved: Vec<Element> = elements.iter().map(|e| resolve_element(item, e)).collect();
            let formatted = format!(
                "[{}]",
                resolved
                    .iter()
                    .map(|e| e.formatted.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let all_states = !resolved.is_empty() && resolved.iter().all(|e| e.state);
            let with_units = append_units(item, &formatted, all_states);
            Resolved {
                raw: raw.clone(),
                converted: Value::Array(resolved.into_iter().map(|e| e.converted).collect()),
                formatted: Value::String(formatted),
                with_units: Value::String(with_units),
            }
        }
        _ => {
            let element = resolve_element(item, raw);
            let with_units = append_units(item, &element.formatted, element.state);
            Resolved {
                raw: raw.clone(),
                converted: element.converted,
                formatted: Value::String(element.formatted),
                with_units: Value::String(with_units),
            }
        }
    }
}

/// Resolve a single representation.
pub fn resolve(item: &ItemDef, raw: &Value, value_type: ValueType) -> Value {
    if value_type == ValueType::Raw {
        return raw.clone();
    }
    resolve_all(item, raw).get(value_type).clone()
}

/// Receipt metadata that reserved items are computed from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PacketTimes {
    pub packet_time: DateTime<Utc>,
    pub received_time: DateTime<Utc>,
    pub received_count: u64,
}

fn seconds(time: &DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 1000.0
}

/// Value of a reserved item, or `None` when `name` is not reserved.
pub fn resolve_reserved(name: &str, times: Option<&PacketTimes>) -> Option<Value> {
    let value = match (name, times) {
        ("RECEIVED_COUNT", None) => Value::Int(0),
        ("RECEIVED_COUNT", Some(t)) => Value::Int(t.received_count as i64),
        ("PACKET_TIMESECONDS", Some(t)) => Value::Float(seconds(&t.packet_time)),
        ("RECEIVED_TIMESECONDS", Some(t)) => Value::Float(seconds(&t.received_time)),
        ("PACKET_TIMEFORMATTED", Some(t)) => {
            Value::String(t.packet_time.format(TIME_FORMAT).to_string())
        }
        ("RECEIVED_TIMEFORMATTED", Some(t)) => {
            Value::String(t.received_time.format(TIME_FORMAT).to_string())
        }
        (
            "PACKET_TIMESECONDS"
            | "RECEIVED_TIMESECONDS"
            | "PACKET_TIMEFORMATTED"
            | "RECEIVED_TIMEFORMATTED",
            None,
        ) => Value::Null,
        _ => return None,
    };
    Some(value)
}
