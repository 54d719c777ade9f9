use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schema::NativeType;

/// A cell value after it has been cast to the field's primitive kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Bool(bool),
    Byte(i8),
    Int(i64),
    Float(f64),
    /// Kept as normalized text so no precision is lost.
    Decimal(String),
    Char(char),
    String(String),
}

impl Literal {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Byte(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Byte(_) => "byte",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Decimal(_) => "decimal",
            Self::Char(_) => "char",
            Self::String(_) => "string",
        }
    }

    pub fn is_compatible_with(&self, native: NativeType) -> bool {
        matches!(
            (native, self),
            (NativeType::Boolean, Self::Bool(_))
                | (NativeType::Byte, Self::Byte(_))
                | (NativeType::Short | NativeType::Int | NativeType::Long, Self::Int(_))
                | (NativeType::Float | NativeType::Double, Self::Float(_))
                | (NativeType::Decimal, Self::Decimal(_))
                | (NativeType::Char, Self::Char(_))
                | (NativeType::String, Self::String(_))
        )
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::Byte(value) => write!(f, "{}b", value),
            Self::Int(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{:?}", value),
            Self::Decimal(value) => write!(f, "{}d", value),
            Self::Char(value) => write!(f, "'{}'", value),
            Self::String(value) => write!(f, "{:?}", value),
        }
    }
}

#[cfg(test)]
mod value_tests {
    use super::*;

    #[test]
    fn literal_reports_type_and_compatibility() {
        assert_eq!(Literal::Int(5).type_name(), "integer");
        assert!(Literal::Int(5).is_compatible_with(NativeType::Long));
        assert!(!Literal::Int(5).is_compatible_with(NativeType::Decimal));
        assert!(Literal::Decimal("1.50".to_string()).is_compatible_with(NativeType::Decimal));
        assert_eq!(Literal::Byte(3).as_int(), Some(3));
        assert_eq!(Literal::String("a".to_string()).as_string(), Some("a"));
    }

    #[test]
    fn literal_display_marks_kind() {
        assert_eq!(Literal::Decimal("1.5".to_string()).to_string(), "1.5d");
        assert_eq!(Literal::Char('1').to_string(), "'1'");
        assert_eq!(Literal::String("A".to_string()).to_string(), "\"A\"");
        assert_eq!(Literal::Float(2.0).to_string(), "2.0");
    }

    #[test]
    fn literal_serializes_with_type_tag() {
        let json = serde_json::to_string(&Literal::Int(5)).expect("serialize");
        assert_eq!(json, r#"{"type":"int","value":5}"#);
    }
}
