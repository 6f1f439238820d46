use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::types::{ConstantDataType, ConstantType};

/// Literal value carried by a constant node or bound as a query parameter.
///
/// The set of representable literal kinds is closed; printers escape each
/// kind with an explicit match.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConstantValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Uuid(Uuid),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Array(Vec<ConstantValue>),
    Tuple(Vec<ConstantValue>)
}

impl ConstantValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None
        }
    }

    /// Static type of this literal.
    pub fn constant_type(&self) -> ConstantType {
        let data_type = match self {
            Self::Null => {
                return ConstantType {
                    data_type: ConstantDataType::Unknown,
                    nullable:  true
                };
            }
            Self::Bool(_) => ConstantDataType::Boolean,
            Self::Integer(_) => ConstantDataType::Integer,
            Self::Float(_) => ConstantDataType::Float,
            Self::String(_) => ConstantDataType::String,
            Self::Uuid(_) => ConstantDataType::Uuid,
            Self::Date(_) => ConstantDataType::Date,
            Self::DateTime(_) => ConstantDataType::DateTime,
            Self::Array(items) => {
                let item = items
                    .first()
                    .map(ConstantValue::constant_type)
                    .unwrap_or_else(ConstantType::unknown);
                ConstantDataType::Array(Box::new(item))
            }
            Self::Tuple(items) => {
                ConstantDataType::Tuple(items.iter().map(ConstantValue::constant_type).collect())
            }
        };
        ConstantType {
            data_type,
            nullable: false
        }
    }
}

impl From<&str> for ConstantValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ConstantValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for ConstantValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for ConstantValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for ConstantValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}
