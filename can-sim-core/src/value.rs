//! Numeric value model shared by signals, configuration and the flood engine

use std::fmt;

/// A signal value in one of the three supported numeric representations
///
/// Two values are equal only when they hold the same representation and the
/// same number; `Integer(1) != Unsigned(1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Integer(i64),
    Unsigned(u64),
    Double(f64),
}

/// Value representation requested by the mapping configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueKind {
    #[default]
    Integer,
    Unsigned,
    Double,
}

impl ValueKind {
    /// Parse the mapping file spelling (`int`, `unsigned`, `double`)
    pub fn from_config(name: &str) -> Option<Self> {
        match name {
            "int" | "integer" => Some(ValueKind::Integer),
            "unsigned" | "uint" => Some(ValueKind::Unsigned),
            "double" | "float" => Some(ValueKind::Double),
            _ => None,
        }
    }

    /// Build a value of this kind from a floating point number.
    ///
    /// Integer kinds round half away from zero.
    pub fn make(self, v: f64) -> Value {
        match self {
            ValueKind::Integer => Value::Integer(v.round() as i64),
            ValueKind::Unsigned => Value::Unsigned(v.round() as u64),
            ValueKind::Double => Value::Double(v),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Integer => write!(f, "int"),
            ValueKind::Unsigned => write!(f, "unsigned"),
            ValueKind::Double => write!(f, "double"),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Integer(0)
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Integer(_) => ValueKind::Integer,
            Value::Unsigned(_) => ValueKind::Unsigned,
            Value::Double(_) => ValueKind::Double,
        }
    }

    pub fn to_double(&self) -> f64 {
        match *self {
            Value::Integer(v) => v as f64,
            Value::Unsigned(v) => v as f64,
            Value::Double(v) => v,
        }
    }

    /// Signed integer view, doubles are rounded
    pub fn to_int(&self) -> i64 {
        match *self {
            Value::Integer(v) => v,
            Value::Unsigned(v) => v as i64,
            Value::Double(v) => v.round() as i64,
        }
    }

    /// Unsigned integer view, doubles are rounded
    pub fn to_unsigned(&self) -> u64 {
        match *self {
            Value::Integer(v) => v as u64,
            Value::Unsigned(v) => v,
            Value::Double(v) => v.round() as u64,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Unsigned(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Unsigned(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_requires_same_kind() {
        assert_eq!(Value::Integer(1), Value::Integer(1));
        assert_ne!(Value::Integer(1), Value::Unsigned(1));
        assert_ne!(Value::Double(1.0), Value::Integer(1));
        assert_eq!(Value::default(), Value::Integer(0));
    }

    #[test]
    fn test_conversions_round() {
        assert_eq!(Value::Double(2.5).to_int(), 3);
        assert_eq!(Value::Double(-2.5).to_int(), -3);
        assert_eq!(Value::Double(7.49).to_unsigned(), 7);
        assert_eq!(Value::Unsigned(42).to_double(), 42.0);
    }

    #[test]
    fn test_kind_make() {
        assert_eq!(ValueKind::Integer.make(1.6), Value::Integer(2));
        assert_eq!(ValueKind::Unsigned.make(1.4), Value::Unsigned(1));
        assert_eq!(ValueKind::Double.make(1.25), Value::Double(1.25));
        assert_eq!(ValueKind::from_config("double"), Some(ValueKind::Double));
        assert_eq!(ValueKind::from_config("text"), None);
        assert_eq!(format!("{}", Value::Double(0.5)), "0.5");
    }
}
