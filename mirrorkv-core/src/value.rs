//! Value and delta types accepted by the cache coordinator
//!
//! Every value written through the coordinator is reduced to one canonical
//! string before it reaches the mirror. The rule is pinned per variant so two
//! implementations of the same store contract agree on what was written:
//! - Integer: plain base-10 (`42`, `-7`)
//! - Float: fixed-point, six fractional digits (`1.5` -> `1.500000`)
//! - Text: unchanged
//! - Bytes: UTF-8, invalid sequences replaced with U+FFFD

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of fractional digits used when rendering floats
pub const FLOAT_PRECISION: usize = 6;

/// A value that can be written through the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Bytes(Vec<u8>),
}

impl Value {
    /// Render the canonical string form stored in the mirror
    pub fn canonical(&self) -> String {
        match self {
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Text(s) => s.clone(),
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    /// Check if value is numeric
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    /// Get as i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

/// Increment or decrement amount for Incr/Decr style operations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Delta {
    Integer(i64),
    Float(f64),
}

impl Delta {
    /// Render the canonical string form
    pub fn canonical(&self) -> String {
        match self {
            Delta::Integer(i) => i.to_string(),
            Delta::Float(f) => format_float(*f),
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Delta::Float(_))
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<i64> for Delta {
    fn from(v: i64) -> Self {
        Delta::Integer(v)
    }
}

impl From<i32> for Delta {
    fn from(v: i32) -> Self {
        Delta::Integer(v as i64)
    }
}

impl From<u32> for Delta {
    fn from(v: u32) -> Self {
        Delta::Integer(v as i64)
    }
}

impl From<f64> for Delta {
    fn from(v: f64) -> Self {
        Delta::Float(v)
    }
}

impl From<f32> for Delta {
    fn from(v: f32) -> Self {
        Delta::Float(v as f64)
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f == f64::INFINITY {
        "inf".to_string()
    } else if f == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        format!("{:.*}", FLOAT_PRECISION, f)
    }
}
