//! Core types for the smarthome runtime
//!
//! This crate provides the fundamental value types used throughout the
//! runtime: [`Value`] (the runtime representation of a state's content),
//! [`Converter`] (string-to-value parsing for inbound binding data), and
//! [`parse_raw`] for loosely formatted raw payloads.

mod convert;
mod value;

pub use convert::{Converter, ConversionError};
pub use value::{CmpOp, Value, ValueError};

use tracing::warn;

/// Parse a raw inbound payload into a JSON value.
///
/// Tries YAML first (which accepts bare scalars and JSON alike), then
/// strict JSON. Returns `None` when neither parser accepts the input;
/// the failure is logged, not raised, since raw payloads come from
/// external transports and a bad message must not propagate.
pub fn parse_raw(raw: &str) -> Option<serde_json::Value> {
    match serde_yaml::from_str::<serde_json::Value>(raw) {
        Ok(value) => return Some(value),
        Err(err) => {
            warn!(%err, raw, "could not parse payload as YAML, trying JSON");
        }
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(%err, raw, "could not parse payload as JSON, dropping");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_raw_yaml_scalar() {
        assert_eq!(parse_raw("21.5"), Some(serde_json::json!(21.5)));
        assert_eq!(parse_raw("on"), Some(serde_json::json!("on")));
    }

    #[test]
    fn test_parse_raw_json_object() {
        let parsed = parse_raw(r#"{"is_on": true}"#).unwrap();
        assert_eq!(parsed["is_on"], serde_json::json!(true));
    }

    #[test]
    fn test_parse_raw_garbage() {
        assert!(parse_raw("{unterminated: [").is_none());
    }
}
