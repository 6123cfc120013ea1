//! # Field Values
//!
//! Domain-level values exchanged with callers. Raw registers never leave the
//! transport layer; the codec turns them into one of these variants.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Decoded value of a single field.
///
/// | Variant | Produced for |
/// |---------|--------------|
/// | Bool | coils, power flags, any `boolean` field |
/// | Int | hours, minutes, modes, fan speeds, humidity, CO2, alarm codes |
/// | Float | temperatures and setpoints (0.1 precision) |
///
/// # Example
///
/// ```rust
/// use voltage_bms_gateway::FieldValue;
///
/// let setpoint = FieldValue::from(22.5);
/// assert!((setpoint.as_f64() - 22.5).abs() < f64::EPSILON);
/// assert!(FieldValue::from(3_i64).is_truthy());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl FieldValue {
    /// Numeric view, booleans map to 0/1.
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match self {
            FieldValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            FieldValue::Int(v) => *v as f64,
            FieldValue::Float(v) => *v,
        }
    }

    /// Integer view, floats are rounded.
    #[inline]
    pub fn as_i64(&self) -> i64 {
        match self {
            FieldValue::Bool(b) => i64::from(*b),
            FieldValue::Int(v) => *v,
            FieldValue::Float(v) => v.round() as i64,
        }
    }

    /// Any non-zero value counts as `true`.
    #[inline]
    pub fn is_truthy(&self) -> bool {
        match self {
            FieldValue::Bool(b) => *b,
            FieldValue::Int(v) => *v != 0,
            FieldValue::Float(v) => *v != 0.0,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{:.1}", v),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}
