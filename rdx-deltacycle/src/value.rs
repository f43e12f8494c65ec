//! Signal values, signal kinds and edge directions.
//!
//! Every signal carries one fixed `SignalKind` chosen when the model is
//! built. Values written to it are checked against that kind, and edge
//! matching is an explicit comparison on the tagged value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A committed or pending signal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// A single logic bit.
    Bit(bool),
    /// An unsigned bit-vector of `width` bits (1..=64).
    Bits { width: u8, bits: u64 },
    /// An index into the variants of an enumerated signal.
    Enum(u16),
}

impl Value {
    /// Builds a bit-vector value, masking `bits` to `width`.
    pub fn bits(width: u8, bits: u64) -> Self {
        Value::Bits {
            width,
            bits: bits & mask(width),
        }
    }

    /// The numeric content of the value.
    pub fn as_u64(self) -> u64 {
        match self {
            Value::Bit(b) => b as u64,
            Value::Bits { bits, .. } => bits,
            Value::Enum(i) => i as u64,
        }
    }

    /// Whether the value reads as logic high. Only meaningful for single-bit
    /// values; wider vectors report their least significant bit.
    pub fn is_high(self) -> bool {
        self.as_u64() & 1 == 1
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bit(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bit(b) => write!(f, "{}", *b as u8),
            Value::Bits { width, bits } => write!(f, "{:0w$b}", bits, w = *width as usize),
            Value::Enum(i) => write!(f, "#{}", i),
        }
    }
}

fn mask(width: u8) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// The fixed type of a signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Bit,
    Bits(u8),
    Enum(Vec<String>),
}

impl SignalKind {
    /// Whether `value` is a legal value for this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (SignalKind::Bit, Value::Bit(_)) => true,
            (SignalKind::Bits(w), Value::Bits { width, bits }) => {
                w == width && (1..=64).contains(w) && *bits & !mask(*w) == 0
            }
            (SignalKind::Enum(variants), Value::Enum(i)) => (*i as usize) < variants.len(),
            _ => false,
        }
    }

    /// Builds a value of this kind from an integer, if it fits.
    pub fn value_from_u64(&self, n: u64) -> Option<Value> {
        let value = match self {
            SignalKind::Bit if n <= 1 => Value::Bit(n == 1),
            SignalKind::Bits(w) if n & !mask(*w) == 0 => Value::Bits { width: *w, bits: n },
            SignalKind::Enum(variants) if (n as usize) < variants.len() => Value::Enum(n as u16),
            _ => return None,
        };
        Some(value)
    }

    /// Whether rising/falling edges are defined for this kind.
    pub fn is_single_bit(&self) -> bool {
        matches!(self, SignalKind::Bit | SignalKind::Bits(1))
    }

    /// The power-on value used when a model does not specify one.
    pub fn default_value(&self) -> Value {
        match self {
            SignalKind::Bit => Value::Bit(false),
            SignalKind::Bits(w) => Value::Bits { width: *w, bits: 0 },
            SignalKind::Enum(_) => Value::Enum(0),
        }
    }

    /// Renders `value` for logs, naming enumerated variants.
    pub fn render(&self, value: &Value) -> String {
        match (self, value) {
            (SignalKind::Enum(variants), Value::Enum(i)) => variants
                .get(*i as usize)
                .cloned()
                .unwrap_or_else(|| value.to_string()),
            _ => value.to_string(),
        }
    }

    pub fn label(&self) -> String {
        match self {
            SignalKind::Bit => "bit".to_string(),
            SignalKind::Bits(w) => format!("bits[{}]", w),
            SignalKind::Enum(variants) => format!("enum{{{}}}", variants.join(",")),
        }
    }
}

/// The transition an edge trigger waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Edge {
    /// Low to high on a single-bit signal.
    Rising,
    /// High to low on a single-bit signal.
    Falling,
    /// Any committed change of value.
    Any,
    /// A committed change whose new value is exactly this one.
    To(Value),
}

impl Edge {
    /// Whether a commit from `old` to `new` satisfies this edge.
    /// A commit that leaves the value unchanged is never a transition.
    pub fn matches(&self, old: &Value, new: &Value) -> bool {
        if old == new {
            return false;
        }
        match self {
            Edge::Rising => !old.is_high() && new.is_high(),
            Edge::Falling => old.is_high() && !new.is_high(),
            Edge::Any => true,
            Edge::To(target) => new == target,
        }
    }

    /// Whether this edge can be awaited on a signal of `kind`.
    pub fn valid_for(&self, kind: &SignalKind) -> bool {
        match self {
            Edge::Rising | Edge::Falling => kind.is_single_bit(),
            Edge::Any => true,
            Edge::To(v) => kind.accepts(v),
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Rising => f.write_str("rising"),
            Edge::Falling => f.write_str("falling"),
            Edge::Any => f.write_str("change"),
            Edge::To(v) => write!(f, "to {}", v),
        }
    }
}
