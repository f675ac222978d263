// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

//! Per-cluster payload decoders.
//!
//! Each decoder is a pure function from a payload (plus, for model-specific
//! layouts, a [`DecodeContext`]) to an attribute map. Reactions such as the
//! keypad notification or the security init reply live in the engine.

pub mod button;
pub mod discovery;
pub mod keypad;
pub mod power;
pub mod reader;
pub mod security;
pub mod status;
pub mod switch;
pub mod tamper;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Addr64;

pub use reader::ByteReader;

/// A decoded attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Integer(i64),
    Number(f64),
    Date(DateTime<Utc>),
    Text(String),
    Map(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Self::Text(s) => f.write_str(s),
            Self::Map(m) => match serde_json::to_string(m) {
                Ok(json) => f.write_str(&json),
                Err(_) => Err(fmt::Error),
            },
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<u16> for AttributeValue {
    fn from(value: u16) -> Self {
        Self::Integer(value.into())
    }
}

impl From<u8> for AttributeValue {
    fn from(value: u8) -> Self {
        Self::Integer(value.into())
    }
}

impl From<i8> for AttributeValue {
    fn from(value: i8) -> Self {
        Self::Integer(value.into())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

/// Decoded attributes of one frame, by attribute name.
pub type Attributes = BTreeMap<&'static str, AttributeValue>;

/// Device model, as reported in the version info response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceModel {
    Button,
    ContactSensor,
    Keyfob,
    Pir,
    SmartPlug,
    Other(String),
}

impl DeviceModel {
    pub fn from_model_str(model: &str) -> Self {
        match model.trim() {
            "Button Device" => Self::Button,
            "Contact Sensor Device" => Self::ContactSensor,
            "Keyfob Device" => Self::Keyfob,
            "PIR Device" => Self::Pir,
            m if m.starts_with("SmartPlug") => Self::SmartPlug,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Per-device information some decoders need.
#[derive(Debug, Clone, Default)]
pub struct DecodeContext {
    pub remote64: Option<Addr64>,
    pub model: Option<DeviceModel>,
    /// Added to decoded temperatures.
    pub temperature_offset: Option<f64>,
}

/// Round to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Byte scaled to a 0-100 percentage, two decimals.
pub fn percent_of_byte(raw: u8) -> f64 {
    round_to(raw as f64 / 255.0 * 100.0, 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(39.0625, 2), 39.06);
        assert_eq!(round_to(21.4375 + 1.5, 3), 22.938);
        assert_eq!(percent_of_byte(0xFF), 100.0);
        assert_eq!(percent_of_byte(0x80), 50.2);
    }

    #[test]
    fn test_device_model_from_str() {
        assert_eq!(DeviceModel::from_model_str("PIR Device"), DeviceModel::Pir);
        assert_eq!(DeviceModel::from_model_str("SmartPlug2.5"), DeviceModel::SmartPlug);
        assert_eq!(
            DeviceModel::from_model_str("Lamp"),
            DeviceModel::Other("Lamp".to_string())
        );
    }

    #[test]
    fn test_attribute_value_serde() {
        let value = AttributeValue::from(21.5);
        assert_eq!(serde_json::to_string(&value).unwrap(), "21.5");
        let value: AttributeValue = serde_json::from_str("true").unwrap();
        assert_eq!(value, AttributeValue::Bool(true));
        let value: AttributeValue = serde_json::from_str("null").unwrap();
        assert_eq!(value, AttributeValue::Null);
        let value: AttributeValue = serde_json::from_str("\"2024-03-01T10:00:00Z\"").unwrap();
        assert!(matches!(value, AttributeValue::Date(_)));
    }

    #[test]
    fn test_attribute_value_display() {
        assert_eq!(AttributeValue::Integer(42).to_string(), "42");
        assert_eq!(AttributeValue::from("panic").to_string(), "panic");
        let mut map = BTreeMap::new();
        map.insert("key".to_string(), AttributeValue::from("#"));
        assert_eq!(AttributeValue::Map(map).to_string(), r##"{"key":"#"}"##);
    }
}
