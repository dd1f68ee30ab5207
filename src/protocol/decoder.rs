//! Tolerant decoding of vendor status payloads
//!
//! Decoding fails only when the body is not a JSON object at all. Individual
//! recognized keys with unusable values become [`ReconciliationAnomaly`] records
//! and are left out of the decoded fields; unknown keys are preserved.

use super::telemetry::{
    DecodedTelemetry, FieldKind, FieldName, FieldValue, MowerMode, ReconciliationAnomaly,
};
use serde_json::{Map, Value};
use thiserror::Error;

/// Payload could not be decoded at all
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("Payload is empty")]
    Empty,
    #[error("Payload is not valid UTF-8")]
    InvalidEncoding,
    #[error("Payload is truncated: {0}")]
    Truncated(String),
    #[error("Malformed payload: {0}")]
    Malformed(String),
    #[error("Payload is not a JSON object (found {0})")]
    NotAnObject(&'static str),
}

/// Decodes vendor JSON payloads into [`DecodedTelemetry`]
pub struct PayloadDecoder;

impl PayloadDecoder {
    /// Decode a raw message body (pure function)
    pub fn decode(payload: &[u8]) -> Result<DecodedTelemetry, DecodeError> {
        let text = std::str::from_utf8(payload).map_err(|_| DecodeError::InvalidEncoding)?;
        if text.trim().is_empty() {
            return Err(DecodeError::Empty);
        }

        let document: Value = serde_json::from_str(text).map_err(classify_json_error)?;
        match document {
            Value::Object(object) => Ok(Self::decode_object(object)),
            other => Err(DecodeError::NotAnObject(json_type_name(&other))),
        }
    }

    /// Split a JSON object into recognized fields, anomalies and unknown keys
    ///
    /// When several vendor aliases of one field are present, the highest-ranked
    /// alias is decoded and the others stay in the unrecognized bag.
    pub fn decode_object(mut object: Map<String, Value>) -> DecodedTelemetry {
        let mut decoded = DecodedTelemetry::default();

        for field in FieldName::ALL {
            let Some(key) = field
                .vendor_keys()
                .iter()
                .find(|key| object.contains_key(**key))
            else {
                continue;
            };
            let Some((vendor_key, raw)) = object.remove_entry(*key) else {
                continue;
            };

            match coerce(field.kind(), &raw) {
                Ok(value) => {
                    decoded.fields.insert(field, value);
                }
                Err(reason) => decoded.anomalies.push(ReconciliationAnomaly {
                    field,
                    vendor_key,
                    raw,
                    reason,
                }),
            }
        }

        decoded.unrecognized.extend(object);
        decoded
    }
}

fn classify_json_error(error: serde_json::Error) -> DecodeError {
    use serde_json::error::Category;
    match error.classify() {
        Category::Eof => DecodeError::Truncated(error.to_string()),
        Category::Io | Category::Syntax | Category::Data => {
            DecodeError::Malformed(error.to_string())
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Coerce a raw JSON value to the field's kind (pure function)
fn coerce(kind: FieldKind, raw: &Value) -> Result<FieldValue, String> {
    if raw.is_null() {
        return Ok(FieldValue::Null);
    }

    match kind {
        FieldKind::Integer { min, max } => {
            let value = integer_of(raw)
                .ok_or_else(|| format!("expected integer, found {}", json_type_name(raw)))?;
            if value < min || value > max {
                return Err(format!("value {value} outside {min}..={max}"));
            }
            Ok(FieldValue::Integer(value))
        }
        FieldKind::Number => match integer_of(raw) {
            Some(value) => Ok(FieldValue::Integer(value)),
            None => number_of(raw)
                .map(FieldValue::Number)
                .ok_or_else(|| format!("expected number, found {}", json_type_name(raw))),
        },
        FieldKind::Boolean => boolean_of(raw)
            .map(FieldValue::Boolean)
            .ok_or_else(|| format!("expected boolean, found {raw}")),
        FieldKind::Text => match raw {
            Value::String(s) => Ok(FieldValue::Text(s.clone())),
            Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
            Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
            other => Err(format!("expected string, found {}", json_type_name(other))),
        },
        FieldKind::Mode => match raw {
            Value::String(s) if !s.trim().is_empty() => {
                Ok(FieldValue::Mode(MowerMode::from_label(s)))
            }
            Value::Number(_) => integer_of(raw)
                .map(|code| FieldValue::Mode(MowerMode::from_code(code)))
                .ok_or_else(|| format!("expected mode code, found {raw}")),
            other => Err(format!("expected mode, found {}", json_type_name(other))),
        },
        FieldKind::Code => match raw {
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(code) => Ok(FieldValue::Integer(code)),
                Err(_) => Ok(FieldValue::Text(s.clone())),
            },
            Value::Number(_) => integer_of(raw)
                .map(FieldValue::Integer)
                .ok_or_else(|| format!("expected integer code, found {raw}")),
            other => Err(format!("expected code, found {}", json_type_name(other))),
        },
        FieldKind::Timestamp => match raw {
            Value::Number(n) => match integer_of(raw) {
                Some(value) => Ok(FieldValue::Integer(value)),
                None => n
                    .as_f64()
                    .map(FieldValue::Number)
                    .ok_or_else(|| format!("expected timestamp, found {raw}")),
            },
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(value) => Ok(FieldValue::Integer(value)),
                Err(_) => Ok(FieldValue::Text(s.clone())),
            },
            other => Err(format!("expected timestamp, found {}", json_type_name(other))),
        },
    }
}

fn integer_of(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.parse::<i64>().ok().or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

fn number_of(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn boolean_of(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Some(true),
            "false" | "0" | "off" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_basic_status() {
        let decoded =
            PayloadDecoder::decode(br#"{"battery_percent": 77, "mode": "mowing"}"#).unwrap();
        assert_eq!(
            decoded.get(FieldName::BatteryPercent),
            Some(&FieldValue::Integer(77))
        );
        assert_eq!(
            decoded.get(FieldName::Mode),
            Some(&FieldValue::Mode(MowerMode::Mowing))
        );
        assert!(decoded.unrecognized.is_empty());
        assert!(decoded.anomalies.is_empty());
    }

    #[test]
    fn test_decode_vendor_status_response() {
        let payload = br#"{"cmd": 501, "power": 64, "mode": 1, "station": false,
            "on_area": 120.5, "cur_area": 30, "cur_min": "12", "total_min": 4410,
            "wifi_lv": 3, "model": "RMA501M20V", "version": 1.21}"#;
        let decoded = PayloadDecoder::decode(payload).unwrap();

        assert_eq!(decoded.get(FieldName::ResponseCode), Some(&FieldValue::Integer(501)));
        assert_eq!(decoded.get(FieldName::BatteryPercent), Some(&FieldValue::Integer(64)));
        assert_eq!(
            decoded.get(FieldName::Mode),
            Some(&FieldValue::Mode(MowerMode::Mowing))
        );
        assert_eq!(decoded.get(FieldName::Docked), Some(&FieldValue::Boolean(false)));
        assert_eq!(decoded.get(FieldName::AreaCovered), Some(&FieldValue::Number(120.5)));
        assert_eq!(decoded.get(FieldName::CurrentArea), Some(&FieldValue::Integer(30)));
        assert_eq!(
            decoded.get(FieldName::RuntimeCurrentMin),
            Some(&FieldValue::Integer(12))
        );
        assert_eq!(decoded.get(FieldName::WifiRssi), Some(&FieldValue::Integer(3)));
        assert_eq!(
            decoded.get(FieldName::FirmwareVersion),
            Some(&FieldValue::Text("1.21".to_string()))
        );
        assert!(decoded.anomalies.is_empty());
    }

    #[test]
    fn test_unknown_fields_preserved() {
        let decoded = PayloadDecoder::decode(br#"{"foo": "bar", "power": 50}"#).unwrap();
        assert_eq!(decoded.unrecognized_field("foo"), Some(&json!("bar")));
        assert_eq!(decoded.get(FieldName::BatteryPercent), Some(&FieldValue::Integer(50)));
    }

    #[test]
    fn test_preferred_alias_wins() {
        let decoded =
            PayloadDecoder::decode(br#"{"power": 10, "battery_percent": 90}"#).unwrap();
        assert_eq!(decoded.get(FieldName::BatteryPercent), Some(&FieldValue::Integer(90)));
        // The shadowed alias is not lost
        assert_eq!(decoded.unrecognized_field("power"), Some(&json!(10)));
    }

    #[test]
    fn test_explicit_null_is_present() {
        let decoded = PayloadDecoder::decode(br#"{"error_code": null}"#).unwrap();
        assert_eq!(decoded.get(FieldName::ErrorCode), Some(&FieldValue::Null));
        assert_eq!(decoded.get(FieldName::BatteryPercent), None);
    }

    #[test]
    fn test_numeric_string_coercion() {
        let decoded =
            PayloadDecoder::decode(br#"{"battery_percent": "42", "online": "true"}"#).unwrap();
        assert_eq!(decoded.get(FieldName::BatteryPercent), Some(&FieldValue::Integer(42)));
        assert_eq!(decoded.get(FieldName::Online), Some(&FieldValue::Boolean(true)));
    }

    #[test]
    fn test_wrong_type_becomes_anomaly() {
        let decoded =
            PayloadDecoder::decode(br#"{"battery_percent": "full", "mode": "mowing"}"#).unwrap();
        assert_eq!(decoded.get(FieldName::BatteryPercent), None);
        assert_eq!(decoded.anomalies.len(), 1);
        assert_eq!(decoded.anomalies[0].field, FieldName::BatteryPercent);
        assert_eq!(decoded.anomalies[0].raw, json!("full"));
        // Remaining fields still decode
        assert!(decoded.get(FieldName::Mode).is_some());
    }

    #[test]
    fn test_out_of_range_battery_is_anomaly() {
        let decoded = PayloadDecoder::decode(br#"{"power": 140}"#).unwrap();
        assert_eq!(decoded.get(FieldName::BatteryPercent), None);
        assert_eq!(decoded.anomalies.len(), 1);
        assert!(decoded.anomalies[0].reason.contains("outside"));
    }

    #[test]
    fn test_error_code_accepts_strings_and_numbers() {
        let decoded = PayloadDecoder::decode(br#"{"error_code": "E12"}"#).unwrap();
        assert_eq!(
            decoded.get(FieldName::ErrorCode),
            Some(&FieldValue::Text("E12".to_string()))
        );

        let decoded = PayloadDecoder::decode(br#"{"error_code": "7"}"#).unwrap();
        assert_eq!(decoded.get(FieldName::ErrorCode), Some(&FieldValue::Integer(7)));
    }

    #[test]
    fn test_fractional_device_timestamp_is_kept() {
        let decoded = PayloadDecoder::decode(br#"{"ts": 1700000000.25}"#).unwrap();
        assert_eq!(
            decoded.get(FieldName::DeviceTimestamp),
            Some(&FieldValue::Number(1_700_000_000.25))
        );
        assert!(decoded.anomalies.is_empty());

        let decoded = PayloadDecoder::decode(br#"{"timestamp": 1700000000}"#).unwrap();
        assert_eq!(
            decoded.get(FieldName::DeviceTimestamp),
            Some(&FieldValue::Integer(1_700_000_000))
        );

        let decoded = PayloadDecoder::decode(br#"{"ts": "2024-05-01T10:00:00Z"}"#).unwrap();
        assert_eq!(
            decoded.get(FieldName::DeviceTimestamp),
            Some(&FieldValue::Text("2024-05-01T10:00:00Z".to_string()))
        );

        let decoded = PayloadDecoder::decode(br#"{"ts": true}"#).unwrap();
        assert_eq!(decoded.get(FieldName::DeviceTimestamp), None);
        assert_eq!(decoded.anomalies.len(), 1);
    }

    #[test]
    fn test_malformed_payload() {
        assert!(matches!(
            PayloadDecoder::decode(b"{bad json"),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_truncated_payload() {
        assert!(matches!(
            PayloadDecoder::decode(br#"{"power": 5"#),
            Err(DecodeError::Truncated(_))
        ));
    }

    #[test]
    fn test_non_object_payloads() {
        assert_eq!(
            PayloadDecoder::decode(b"[1, 2]"),
            Err(DecodeError::NotAnObject("array"))
        );
        assert_eq!(
            PayloadDecoder::decode(b"42"),
            Err(DecodeError::NotAnObject("number"))
        );
        assert_eq!(PayloadDecoder::decode(b"   "), Err(DecodeError::Empty));
        assert_eq!(
            PayloadDecoder::decode(&[0xff, 0xfe]),
            Err(DecodeError::InvalidEncoding)
        );
    }

    #[test]
    fn test_empty_object_decodes() {
        let decoded = PayloadDecoder::decode(b"{}").unwrap();
        assert!(decoded.is_empty());
    }
}
