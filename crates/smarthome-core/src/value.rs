//! Runtime value type for states

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when combining incompatible values
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValueError {
    /// Arithmetic between values of incompatible kinds
    #[error("cannot apply '{op}' to {lhs} and {rhs}")]
    Arithmetic {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    /// Comparison between values of incompatible kinds
    #[error("cannot compare {lhs} with {rhs}")]
    Incomparable {
        lhs: &'static str,
        rhs: &'static str,
    },

    /// Division by zero
    #[error("division by zero")]
    DivisionByZero,
}

/// Comparison operators usable in condition expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Le,
    Lt,
    Ge,
    Gt,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Le => "<=",
            CmpOp::Lt => "<",
            CmpOp::Ge => ">=",
            CmpOp::Gt => ">",
        };
        write!(f, "{s}")
    }
}

/// The runtime value of a state
///
/// States carry one of four value kinds. Numeric kinds compare and combine
/// across `Int`/`Float`; all other cross-kind operations are errors rather
/// than silent coercions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    /// Short kind name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
        }
    }

    /// Numeric view of the value, if it has one
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Evaluate a comparison operator against another value
    ///
    /// Equality across incompatible kinds is simply `false` (two states can
    /// legitimately hold different kinds); ordering across incompatible
    /// kinds is an error.
    pub fn compare(&self, op: CmpOp, other: &Value) -> Result<bool, ValueError> {
        match op {
            CmpOp::Eq => Ok(self == other),
            CmpOp::Ne => Ok(self != other),
            _ => {
                let ord = self
                    .partial_cmp(other)
                    .ok_or_else(|| ValueError::Incomparable {
                        lhs: self.kind(),
                        rhs: other.kind(),
                    })?;
                Ok(match op {
                    CmpOp::Le => ord != Ordering::Greater,
                    CmpOp::Lt => ord == Ordering::Less,
                    CmpOp::Ge => ord != Ordering::Less,
                    CmpOp::Gt => ord == Ordering::Greater,
                    CmpOp::Eq | CmpOp::Ne => unreachable!(),
                })
            }
        }
    }

    pub fn try_add(&self, other: &Value) -> Result<Value, ValueError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            _ => self.numeric_op("+", other, |a, b| Ok(a + b)),
        }
    }

    pub fn try_sub(&self, other: &Value) -> Result<Value, ValueError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a - b)),
            _ => self.numeric_op("-", other, |a, b| Ok(a - b)),
        }
    }

    pub fn try_mul(&self, other: &Value) -> Result<Value, ValueError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a * b)),
            _ => self.numeric_op("*", other, |a, b| Ok(a * b)),
        }
    }

    /// Division always produces a float, even for two ints
    pub fn try_div(&self, other: &Value) -> Result<Value, ValueError> {
        self.numeric_op("/", other, |a, b| {
            if b == 0.0 {
                Err(ValueError::DivisionByZero)
            } else {
                Ok(a / b)
            }
        })
    }

    fn numeric_op(
        &self,
        op: &'static str,
        other: &Value,
        f: impl Fn(f64, f64) -> Result<f64, ValueError>,
    ) -> Result<Value, ValueError> {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(f(a, b)?)),
            _ => Err(ValueError::Arithmetic {
                op,
                lhs: self.kind(),
                rhs: other.kind(),
            }),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            // Int(1) == Float(1.0)
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_numeric_equality() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Int(1), Value::Bool(true));
        assert_ne!(Value::Str("1".into()), Value::Int(1));
    }

    #[test]
    fn test_compare_ordering() {
        assert!(Value::Int(2).compare(CmpOp::Gt, &Value::Float(1.5)).unwrap());
        assert!(Value::Str("a".into())
            .compare(CmpOp::Lt, &Value::Str("b".into()))
            .unwrap());
        assert!(Value::Bool(true)
            .compare(CmpOp::Gt, &Value::Int(0))
            .is_err());
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(
            Value::Int(2).try_add(&Value::Int(3)).unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            Value::Int(1).try_add(&Value::Float(0.5)).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            Value::Str("a".into()).try_add(&Value::Str("b".into())).unwrap(),
            Value::Str("ab".into())
        );
        assert_eq!(
            Value::Int(1).try_div(&Value::Int(0)),
            Err(ValueError::DivisionByZero)
        );
        assert!(Value::Bool(true).try_mul(&Value::Int(2)).is_err());
    }

    #[test]
    fn test_serde_untagged() {
        let v: Value = serde_json::from_str("true").unwrap();
        assert_eq!(v, Value::Bool(true));
        let v: Value = serde_json::from_str("21.5").unwrap();
        assert_eq!(v, Value::Float(21.5));
        assert_eq!(serde_json::to_string(&Value::Int(3)).unwrap(), "3");
    }
}
