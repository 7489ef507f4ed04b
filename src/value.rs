use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// A decoded telemetry or command value.
///
/// BLOCK data survives in memory as [`Value::Block`]; once serialized to JSON
/// it reads back as an array of integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Block(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Numeric equality across Int/Float, exact equality otherwise.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    /// Interpret free text the way an operator types it: integers (decimal
    /// or hex), floats, bracketed arrays, otherwise the text itself.
    pub fn from_literal(text: &str) -> Value {
        let trimmed = text.trim();
        if let Some(hex) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            if !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()) {
                if let Ok(v) = i64::from_str_radix(hex, 16) {
                    return Value::Int(v);
                }
                if let Ok(v) = u64::from_str_radix(hex, 16) {
                    return Value::Float(v as f64);
                }
            }
        }
        if looks_like_int(trimmed) {
            if let Ok(v) = trimmed.trim_start_matches('+').parse::<i64>() {
                return Value::Int(v);
            }
        }
        if looks_like_float(trimmed) {
            if let Ok(v) = trimmed.parse::<f64>() {
                return Value::Float(v);
            }
        }
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            let inner = &trimmed[1..trimmed.len() - 1];
            if inner.trim().is_empty() {
                return Value::Array(Vec::new());
            }
            if let Some(parts) = split_elements(inner) {
                let elements = parts
                    .into_iter()
                    .map(|part| {
                        let part = part.trim();
                        let unquoted = strip_quotes(part);
                        if unquoted.len() < part.len() {
                            Value::String(unquoted.to_string())
                        } else {
                            Value::from_literal(part)
                        }
                    })
                    .collect();
                return Value::Array(elements);
            }
        }
        Value::String(text.to_string())
    }
}

/// Split array contents on commas at nesting depth zero outside quotes.
/// Unbalanced brackets or quotes yield `None`.
fn split_elements(inner: &str) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '[' => depth += 1,
            ']' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                parts.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 || quote.is_some() {
        return None;
    }
    parts.push(&inner[start..]);
    Some(parts)
}

fn looks_like_int(s: &str) -> bool {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn looks_like_float(s: &str) -> bool {
    let body = s.strip_prefix(['-', '+']).unwrap_or(s);
    if body.is_empty() || !body.chars().next().is_some_and(|c| c.is_ascii_digit() || c == '.') {
        return false;
    }
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;
    let mut prev = ' ';
    for c in body.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot && !seen_exp => seen_dot = true,
            'e' | 'E' if seen_digit && !seen_exp => seen_exp = true,
            '-' | '+' if prev == 'e' || prev == 'E' => {}
            _ => return false,
        }
        prev = c;
    }
    seen_digit && (seen_dot || seen_exp) && !matches!(prev, 'e' | 'E' | '-' | '+')
}

/// Strip one matching pair of surrounding single or double quotes.
pub fn strip_quotes(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() >= 2
        && ((bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\''))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Block(bytes) => write!(f, "0x{}", hex::encode_upper(bytes)),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Block(v)
    }
}

/// The four representations of a telemetry value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    Raw,
    Converted,
    Formatted,
    WithUnits,
}

impl ValueType {
    pub const ALL: [ValueType; 4] = [
        ValueType::Raw,
        ValueType::Converted,
        ValueType::Formatted,
        ValueType::WithUnits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Raw => "RAW",
            ValueType::Converted => "CONVERTED",
            ValueType::Formatted => "FORMATTED",
            ValueType::WithUnits => "WITH_UNITS",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "RAW" => Ok(ValueType::Raw),
            "CONVERTED" => Ok(ValueType::Converted),
            "FORMATTED" => Ok(ValueType::Formatted),
            "WITH_UNITS" => Ok(ValueType::WithUnits),
            other => Err(CoreError::Validation(format!("Unknown type '{other}'"))),
        }
    }
}

/// Which representations an override or normalize applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideType {
    All,
    Raw,
    Converted,
    Formatted,
    WithUnits,
}

impl OverrideType {
    pub fn value_types(&self) -> &'static [ValueType] {
        match self {
            OverrideType::All => &ValueType::ALL,
            OverrideType::Raw => &[ValueType::Raw],
            OverrideType::Converted => &[ValueType::Converted],
            OverrideType::Formatted => &[ValueType::Formatted],
            OverrideType::WithUnits => &[ValueType::WithUnits],
        }
    }
}

impl From<ValueType> for OverrideType {
    fn from(v: ValueType) -> Self {
        match v {
            ValueType::Raw => OverrideType::Raw,
            ValueType::Converted => OverrideType::Converted,
            ValueType::Formatted => OverrideType::Formatted,
            ValueType::WithUnits => OverrideType::WithUnits,
        }
    }
}

impl FromStr for OverrideType {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        if s.eq_ignore_ascii_case("ALL") {
            return Ok(OverrideType::All);
        }
        s.parse::<ValueType>().map(OverrideType::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_parsing() {
        assert_eq!(Value::from_literal("5"), Value::Int(5));
        assert_eq!(Value::from_literal("-12"), Value::Int(-12));
        assert_eq!(Value::from_literal("0x1F"), Value::Int(31));
        assert_eq!(Value::from_literal("2.5"), Value::Float(2.5));
        assert_eq!(Value::from_literal("1e3"), Value::Float(1000.0));
        assert_eq!(Value::from_literal("NORMAL"), Value::String("NORMAL".into()));
        assert_eq!(
            Value::from_literal("[1, 2, 3]"),
            Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(Value::from_literal("1.2.3"), Value::String("1.2.3".into()));
    }

    #[test]
    fn test_nested_and_quoted_arrays() {
        assert_eq!(
            Value::from_literal("[[1, 2], [3]]"),
            Value::Array(vec![
                Value::Array(vec![Value::Int(1), Value::Int(2)]),
                Value::Array(vec![Value::Int(3)]),
            ])
        );
        assert_eq!(
            Value::from_literal(r#"["A, B", "C"]"#),
            Value::Array(vec![Value::from("A, B"), Value::from("C")])
        );
        assert_eq!(
            Value::from_literal(r#"['1', 2]"#),
            Value::Array(vec![Value::from("1"), Value::Int(2)])
        );
        assert_eq!(Value::from_literal("[]"), Value::Array(Vec::new()));
        assert_eq!(Value::from_literal("[[1, 2]"), Value::String("[[1, 2]".into()));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Float(5.0).to_string(), "5.0");
        assert_eq!(Value::Block(vec![0xde, 0xad]).to_string(), "0xDEAD");
        assert_eq!(
            Value::Array(vec![Value::Int(1), Value::Float(2.5)]).to_string(),
            "[1, 2.5]"
        );
    }

    #[test]
    fn test_override_type_parsing() {
        assert_eq!("all".parse::<OverrideType>().unwrap(), OverrideType::All);
        assert_eq!(
            "WITH_UNITS".parse::<OverrideType>().unwrap(),
            OverrideType::WithUnits
        );
        assert!("BOGUS".parse::<OverrideType>().is_err());
    }
}
