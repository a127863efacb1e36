//! Lenient numeric input handling
//!
//! Predictors accept readings from loosely typed sources. Every numeric input
//! goes through [`coerce`], which never fails: it clamps, parses numeric
//! strings, or falls back to a safe default and reports what it did.

use crate::error::ValidationError;
use serde_json::Value;

/// Raw numeric input as received from a caller or a JSON document
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Number(f64),
    Text(String),
    /// Explicit null
    Null,
    /// Key absent
    Missing,
    /// Any other JSON type
    Invalid(&'static str),
}

impl From<f64> for Reading {
    fn from(value: f64) -> Self {
        Reading::Number(value)
    }
}

impl From<u32> for Reading {
    fn from(value: u32) -> Self {
        Reading::Number(value as f64)
    }
}

impl From<&str> for Reading {
    fn from(value: &str) -> Self {
        Reading::Text(value.to_string())
    }
}

impl From<Option<f64>> for Reading {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Reading::Null, Reading::Number)
    }
}

impl From<Option<&Value>> for Reading {
    fn from(value: Option<&Value>) -> Self {
        value.map_or(Reading::Missing, Reading::from)
    }
}

impl From<&Value> for Reading {
    fn from(value: &Value) -> Self {
        match value {
            Value::Number(n) => n.as_f64().map_or(Reading::Invalid("number"), Reading::Number),
            Value::String(s) => Reading::Text(s.clone()),
            Value::Null => Reading::Null,
            Value::Bool(_) => Reading::Invalid("boolean"),
            Value::Array(_) => Reading::Invalid("array"),
            Value::Object(_) => Reading::Invalid("object"),
        }
    }
}

/// Result of [`coerce`]
#[derive(Debug, Clone, PartialEq)]
pub struct Coerced {
    pub value: f64,
    /// Set when the input was replaced or clamped
    pub error: Option<ValidationError>,
}

impl Coerced {
    fn ok(value: f64) -> Self {
        Self { value, error: None }
    }

    fn substituted(field: &str, value: f64, reason: String) -> Self {
        Self {
            value,
            error: Some(ValidationError::new(field, reason)),
        }
    }
}

/// Turn `reading` into a number within `[min, max]`
///
/// An absent key takes `default` silently. Null, non-numeric text, NaN,
/// infinities and non-numeric JSON types take `default` with an error.
/// Finite numbers outside the range are clamped with an error.
pub fn coerce(field: &str, reading: impl Into<Reading>, default: f64, min: f64, max: f64) -> Coerced {
    let number = match reading.into() {
        Reading::Number(n) => n,
        Reading::Text(text) => match text.trim().parse::<f64>() {
            Ok(n) => n,
            Err(_) => {
                return Coerced::substituted(field, default, format!("'{text}' is not a number"));
            }
        },
        Reading::Missing => return Coerced::ok(default),
        Reading::Null => return Coerced::substituted(field, default, "null".to_string()),
        Reading::Invalid(kind) => {
            return Coerced::substituted(field, default, format!("expected a number, got {kind}"));
        }
    };

    if !number.is_finite() {
        return Coerced::substituted(field, default, format!("{number} is not finite"));
    }
    if number < min || number > max {
        let clamped = number.clamp(min, max);
        return Coerced::substituted(
            field,
            clamped,
            format!("{number} outside [{min}, {max}], clamped to {clamped}"),
        );
    }
    Coerced::ok(number)
}

/// Join the messages of every error in `errors`, if any
pub(crate) fn join_errors<'a>(
    errors: impl IntoIterator<Item = &'a Option<ValidationError>>,
) -> Option<String> {
    let messages: Vec<String> = errors
        .into_iter()
        .flatten()
        .map(|e| e.to_string())
        .collect();
    if messages.is_empty() {
        None
    } else {
        Some(messages.join("; "))
    }
}
