//! Typed telemetry model for vendor status payloads
//!
//! The vendor firmware sends loosely-typed JSON documents. Recognized keys are
//! mapped onto [`FieldName`] with a typed [`FieldValue`]; everything else is kept
//! verbatim in [`DecodedTelemetry::unrecognized`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Raw message as delivered by the broker
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
    pub retain: bool,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
            retain: false,
        }
    }

    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }
}

/// Canonical names of the recognized telemetry fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    BatteryPercent,
    Mode,
    ErrorCode,
    WifiRssi,
    FirmwareVersion,
    Model,
    Online,
    Docked,
    AreaCovered,
    CurrentArea,
    RuntimeCurrentMin,
    RuntimeTotalMin,
    MowingTimeMin,
    ResponseCode,
    DeviceTimestamp,
}

/// Expected JSON shape of a recognized field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    /// Integer with inclusive bounds
    Integer { min: i64, max: i64 },
    Number,
    Boolean,
    Text,
    Mode,
    /// Integer or string code
    Code,
    /// Device clock reading: integer, fractional seconds, or opaque string
    Timestamp,
}

impl FieldName {
    pub const ALL: [FieldName; 15] = [
        FieldName::BatteryPercent,
        FieldName::Mode,
        FieldName::ErrorCode,
        FieldName::WifiRssi,
        FieldName::FirmwareVersion,
        FieldName::Model,
        FieldName::Online,
        FieldName::Docked,
        FieldName::AreaCovered,
        FieldName::CurrentArea,
        FieldName::RuntimeCurrentMin,
        FieldName::RuntimeTotalMin,
        FieldName::MowingTimeMin,
        FieldName::ResponseCode,
        FieldName::DeviceTimestamp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::BatteryPercent => "battery_percent",
            FieldName::Mode => "mode",
            FieldName::ErrorCode => "error_code",
            FieldName::WifiRssi => "wifi_rssi",
            FieldName::FirmwareVersion => "firmware_version",
            FieldName::Model => "model",
            FieldName::Online => "online",
            FieldName::Docked => "docked",
            FieldName::AreaCovered => "area_covered",
            FieldName::CurrentArea => "current_area",
            FieldName::RuntimeCurrentMin => "runtime_current_min",
            FieldName::RuntimeTotalMin => "runtime_total_min",
            FieldName::MowingTimeMin => "mowing_time_min",
            FieldName::ResponseCode => "response_code",
            FieldName::DeviceTimestamp => "device_timestamp",
        }
    }

    /// Vendor keys carrying this field, in precedence order
    pub fn vendor_keys(&self) -> &'static [&'static str] {
        match self {
            FieldName::BatteryPercent => &["battery_percent", "power"],
            FieldName::Mode => &["mode"],
            FieldName::ErrorCode => &["error_code", "err_code", "fault"],
            FieldName::WifiRssi => &["wifi_rssi", "wifi_lv"],
            FieldName::FirmwareVersion => &["firmware_version", "version", "sw_version"],
            FieldName::Model => &["model"],
            FieldName::Online => &["online"],
            FieldName::Docked => &["station"],
            FieldName::AreaCovered => &["on_area"],
            FieldName::CurrentArea => &["cur_area"],
            FieldName::RuntimeCurrentMin => &["cur_min"],
            FieldName::RuntimeTotalMin => &["total_min"],
            FieldName::MowingTimeMin => &["on_min"],
            FieldName::ResponseCode => &["cmd"],
            FieldName::DeviceTimestamp => &["timestamp", "ts"],
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            FieldName::BatteryPercent => FieldKind::Integer { min: 0, max: 100 },
            FieldName::Mode => FieldKind::Mode,
            FieldName::ErrorCode => FieldKind::Code,
            FieldName::WifiRssi => FieldKind::Integer {
                min: -150,
                max: 100,
            },
            FieldName::FirmwareVersion | FieldName::Model => FieldKind::Text,
            FieldName::Online | FieldName::Docked => FieldKind::Boolean,
            FieldName::AreaCovered | FieldName::CurrentArea => FieldKind::Number,
            FieldName::RuntimeCurrentMin
            | FieldName::RuntimeTotalMin
            | FieldName::MowingTimeMin
            | FieldName::ResponseCode => FieldKind::Integer {
                min: 0,
                max: i64::MAX,
            },
            FieldName::DeviceTimestamp => FieldKind::Timestamp,
        }
    }

    /// Look up by canonical name
    pub fn parse(name: &str) -> Option<FieldName> {
        Self::ALL.iter().copied().find(|field| field.as_str() == name)
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating mode reported by the mower
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MowerMode {
    Paused,
    Mowing,
    Returning,
    EdgeCutting,
    /// Vendor value with no known meaning, kept as reported
    Other(String),
}

impl MowerMode {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => MowerMode::Paused,
            1 => MowerMode::Mowing,
            2 => MowerMode::Returning,
            4 => MowerMode::EdgeCutting,
            other => MowerMode::Other(other.to_string()),
        }
    }

    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_ascii_lowercase();
        if let Ok(code) = normalized.parse::<i64>() {
            return Self::from_code(code);
        }
        match normalized.as_str() {
            "paused" | "stopped" | "stop" | "idle" => MowerMode::Paused,
            "mowing" | "cutting" => MowerMode::Mowing,
            "docked" | "returning" | "return" | "charging" => MowerMode::Returning,
            "edge_cutting" | "edge" | "border" => MowerMode::EdgeCutting,
            _ => MowerMode::Other(label.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MowerMode::Paused => "paused",
            MowerMode::Mowing => "mowing",
            MowerMode::Returning => "returning",
            MowerMode::EdgeCutting => "edge_cutting",
            MowerMode::Other(raw) => raw,
        }
    }
}

/// Typed value of a recognized field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Number(f64),
    Boolean(bool),
    Mode(MowerMode),
    Text(String),
    /// Present in the payload as an explicit `null`
    Null,
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_mode(&self) -> Option<&MowerMode> {
        match self {
            FieldValue::Mode(mode) => Some(mode),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::Number(v) => write!(f, "{v}"),
            FieldValue::Boolean(v) => write!(f, "{v}"),
            FieldValue::Mode(mode) => f.write_str(mode.as_str()),
            FieldValue::Text(v) => f.write_str(v),
            FieldValue::Null => f.write_str("null"),
        }
    }
}

/// A recognized field whose value could not be used
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationAnomaly {
    pub field: FieldName,
    pub vendor_key: String,
    pub raw: serde_json::Value,
    pub reason: String,
}

/// Result of decoding one payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedTelemetry {
    /// Recognized fields present in the payload (absent fields have no entry)
    pub fields: BTreeMap<FieldName, FieldValue>,
    /// Keys the decoder does not know, kept verbatim
    pub unrecognized: BTreeMap<String, serde_json::Value>,
    /// Recognized keys that were dropped for this message
    pub anomalies: Vec<ReconciliationAnomaly>,
}

impl DecodedTelemetry {
    pub fn get(&self, field: FieldName) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn unrecognized_field(&self, key: &str) -> Option<&serde_json::Value> {
        self.unrecognized.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.unrecognized.is_empty()
    }

    /// Builder used by tests and tools
    pub fn with_field(mut self, field: FieldName, value: FieldValue) -> Self {
        self.fields.insert(field, value);
        self
    }
}
