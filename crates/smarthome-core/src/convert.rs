//! String-to-value conversion for inbound binding data

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Value;

/// Error raised when a raw string cannot be converted to a state's kind
///
/// Conversion failures are surfaced to the caller of `command`/`update`;
/// nothing is silently coerced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot convert '{input}' to {target}")]
pub struct ConversionError {
    pub input: String,
    pub target: &'static str,
}

/// Converter attached to a state, parsing raw transport strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Converter {
    Bool,
    Int,
    Float,
    Str,
}

impl Converter {
    /// Convert a raw string into the target value kind
    pub fn convert(&self, raw: &str) -> Result<Value, ConversionError> {
        let trimmed = raw.trim();
        match self {
            Converter::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "on" | "1" => Ok(Value::Bool(true)),
                "false" | "off" | "0" => Ok(Value::Bool(false)),
                _ => Err(self.error(raw)),
            },
            Converter::Int => trimmed
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| self.error(raw)),
            Converter::Float => trimmed
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| self.error(raw)),
            Converter::Str => Ok(Value::Str(raw.to_string())),
        }
    }

    /// Kind name this converter produces
    pub fn target(&self) -> &'static str {
        match self {
            Converter::Bool => "bool",
            Converter::Int => "int",
            Converter::Float => "float",
            Converter::Str => "str",
        }
    }

    fn error(&self, raw: &str) -> ConversionError {
        ConversionError {
            input: raw.to_string(),
            target: self.target(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_converter() {
        assert_eq!(Converter::Bool.convert("on").unwrap(), Value::Bool(true));
        assert_eq!(Converter::Bool.convert(" OFF ").unwrap(), Value::Bool(false));
        assert_eq!(Converter::Bool.convert("true").unwrap(), Value::Bool(true));
        assert!(Converter::Bool.convert("maybe").is_err());
    }

    #[test]
    fn test_numeric_converters() {
        assert_eq!(Converter::Int.convert("42").unwrap(), Value::Int(42));
        assert_eq!(Converter::Float.convert("21.5").unwrap(), Value::Float(21.5));
        assert!(Converter::Int.convert("21.5").is_err());
        assert!(Converter::Float.convert("warm").is_err());
    }

    #[test]
    fn test_str_converter_keeps_raw() {
        assert_eq!(
            Converter::Str.convert("  spaced  ").unwrap(),
            Value::Str("  spaced  ".into())
        );
    }

    #[test]
    fn test_error_message() {
        let err = Converter::Int.convert("x").unwrap_err();
        assert_eq!(err.to_string(), "cannot convert 'x' to int");
    }
}
