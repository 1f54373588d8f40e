//! Cell values and column typing

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// VALUES
// ============================================================================

/// A single cell of an observation row.
///
/// JSON cannot represent non-finite floats: a `NAN` or infinity serializes
/// as `null` and reads back as [`Value::Missing`]. Row construction rejects
/// them via [`Value::is_finite`] so the data stream never coerces silently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Vector(Vec<f64>),
    /// Absent cell. Compatible with every column type.
    Missing,
}

impl Value {
    /// The column type this value belongs to, or `None` for `Missing`.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Bool(_) => Some(ColumnType::Bool),
            Value::Int(_) => Some(ColumnType::Int),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Text(_) => Some(ColumnType::Text),
            Value::Vector(_) => Some(ColumnType::Vector),
            Value::Missing => None,
        }
    }

    /// Whether every numeric component is finite. Non-finite floats do not
    /// survive a JSON round-trip (they serialize as `null`).
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Float(f) => f.is_finite(),
            Value::Vector(v) => v.iter().all(|f| f.is_finite()),
            _ => true,
        }
    }

    /// Whether this value can be stored in a column of the given type.
    /// Integers are accepted into float columns; `Missing` matches anything.
    pub fn is_compatible_with(&self, column_type: ColumnType) -> bool {
        match self.column_type() {
            None => true,
            Some(ColumnType::Int) if column_type == ColumnType::Float => true,
            Some(t) => t == column_type,
        }
    }
}

// ============================================================================
// COLUMN TYPING
// ============================================================================

/// Value type of a dataset column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    Text,
    Vector,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnType::Bool => "bool",
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
            ColumnType::Vector => "vector",
        };
        write!(f, "{}", s)
    }
}

/// Whether a column holds model inputs (features) or model outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnRole {
    Input,
    Output,
}

/// Permitted value range or category set for a column.
///
/// Downstream optimizers use the domain when perturbing constrained columns;
/// the data plane only carries it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ColumnDomain {
    /// No domain information.
    Empty,
    /// Numeric range; either bound may be open.
    Numeric {
        min: Option<f64>,
        max: Option<f64>,
    },
    /// Closed set of category labels.
    Categorical { categories: Vec<String> },
}

impl Default for ColumnDomain {
    fn default() -> Self {
        ColumnDomain::Empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_column_type() {
        assert_eq!(Value::Int(3).column_type(), Some(ColumnType::Int));
        assert_eq!(Value::Float(0.5).column_type(), Some(ColumnType::Float));
        assert_eq!(
            Value::Text("a".to_string()).column_type(),
            Some(ColumnType::Text)
        );
        assert_eq!(Value::Missing.column_type(), None);
    }

    #[test]
    fn test_missing_compatible_with_everything() {
        for t in [
            ColumnType::Bool,
            ColumnType::Int,
            ColumnType::Float,
            ColumnType::Text,
            ColumnType::Vector,
        ] {
            assert!(Value::Missing.is_compatible_with(t));
        }
    }

    #[test]
    fn test_int_widens_to_float() {
        assert!(Value::Int(1).is_compatible_with(ColumnType::Float));
        assert!(!Value::Float(1.0).is_compatible_with(ColumnType::Int));
    }

    #[test]
    fn test_non_finite_floats_detected() {
        assert!(!Value::Float(f64::NAN).is_finite());
        assert!(!Value::Float(f64::INFINITY).is_finite());
        assert!(!Value::Vector(vec![0.1, f64::NEG_INFINITY]).is_finite());
        assert!(Value::Float(1.5).is_finite());
        assert!(Value::Int(i64::MAX).is_finite());
        assert!(Value::Missing.is_finite());
    }

    #[test]
    fn test_value_json_roundtrip() {
        let values = vec![
            Value::Bool(true),
            Value::Int(-4),
            Value::Float(2.25),
            Value::Text("cat".to_string()),
            Value::Vector(vec![0.1, 0.2]),
        ];
        let encoded = serde_json::to_string(&values).unwrap();
        let decoded: Vec<Value> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(values, decoded);
    }

    #[test]
    fn test_domain_default_is_empty() {
        assert_eq!(ColumnDomain::default(), ColumnDomain::Empty);
    }
}
