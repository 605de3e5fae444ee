//! SNMP value typing
//!
//! The bridge stops at typed values; BER encoding belongs to whatever SNMP engine sits in front
//! of the resolver.

use std::fmt;
use std::str::FromStr;

use bridge_modbus::Number;
use errors::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};

/// SNMP syntax of a published variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SnmpType {
    Integer32,
    #[default]
    OctetString,
    Gauge32,
    Counter32,
    TimeTicks,
}

impl SnmpType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer32 => "Integer32",
            Self::OctetString => "OctetString",
            Self::Gauge32 => "Gauge32",
            Self::Counter32 => "Counter32",
            Self::TimeTicks => "TimeTicks",
        }
    }
}

impl FromStr for SnmpType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "integer32" | "integer" => Ok(Self::Integer32),
            "octetstring" | "string" => Ok(Self::OctetString),
            "gauge32" | "gauge" => Ok(Self::Gauge32),
            "counter32" | "counter" => Ok(Self::Counter32),
            "timeticks" => Ok(Self::TimeTicks),
            _ => Err(BridgeError::invalid(
                "snmp_data_type",
                format!(
                    "unknown SNMP type '{}' (expected Integer32, OctetString, Gauge32, Counter32 or TimeTicks)",
                    s.trim()
                ),
            )),
        }
    }
}

impl fmt::Display for SnmpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value ready for SNMP encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum SnmpValue {
    Integer32(i32),
    OctetString(String),
    Gauge32(u32),
    Counter32(u32),
    TimeTicks(u32),
}

impl SnmpValue {
    pub fn snmp_type(&self) -> SnmpType {
        match self {
            Self::Integer32(_) => SnmpType::Integer32,
            Self::OctetString(_) => SnmpType::OctetString,
            Self::Gauge32(_) => SnmpType::Gauge32,
            Self::Counter32(_) => SnmpType::Counter32,
            Self::TimeTicks(_) => SnmpType::TimeTicks,
        }
    }

    /// Convert a processed register value.
    ///
    /// Floats are multiplied by `scale_factor` before becoming an `Integer32`, `Gauge32` or
    /// `Counter32`. Integer conversions truncate toward zero and saturate at the type's range.
    pub fn from_number(value: Number, snmp_type: SnmpType, scale_factor: f64) -> Self {
        let scaled = match value {
            Number::Integer(v) => v as f64,
            Number::Float(v) => v * scale_factor,
        };
        match snmp_type {
            SnmpType::Integer32 => Self::Integer32(match value {
                Number::Integer(v) => saturate_i32(v),
                // `as` truncates toward zero and saturates; NaN becomes 0
                Number::Float(_) => scaled as i32,
            }),
            SnmpType::Gauge32 => Self::Gauge32(to_unsigned(value, scaled)),
            SnmpType::Counter32 => Self::Counter32(to_unsigned(value, scaled)),
            SnmpType::TimeTicks => Self::TimeTicks(to_unsigned(value, value.as_f64())),
            SnmpType::OctetString => Self::OctetString(match value {
                Number::Integer(v) => v.to_string(),
                Number::Float(v) => format!("{v:.2}"),
            }),
        }
    }

    /// Parse a configured constant into `snmp_type`; numeric types must fit their range
    pub fn parse_fixed(text: &str, snmp_type: SnmpType) -> BridgeResult<Self> {
        let numeric = |range: &str| {
            BridgeError::invalid(
                "value",
                format!("'{text}' is not a valid {snmp_type} ({range})"),
            )
        };
        let trimmed = text.trim();
        match snmp_type {
            SnmpType::OctetString => Ok(Self::OctetString(text.to_string())),
            SnmpType::Integer32 => trimmed
                .parse::<i32>()
                .map(Self::Integer32)
                .map_err(|_| numeric("-2147483648..=2147483647")),
            SnmpType::Gauge32 | SnmpType::Counter32 | SnmpType::TimeTicks => {
                let value = trimmed.parse::<u32>().map_err(|_| numeric("0..=4294967295"))?;
                Ok(match snmp_type {
                    SnmpType::Gauge32 => Self::Gauge32(value),
                    SnmpType::Counter32 => Self::Counter32(value),
                    _ => Self::TimeTicks(value),
                })
            },
        }
    }
}

fn saturate_i32(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
}

fn to_unsigned(value: Number, scaled: f64) -> u32 {
    match value {
        Number::Integer(v) => u32::try_from(v.max(0)).unwrap_or(u32::MAX),
        Number::Float(_) => scaled as u32,
    }
}

/// net-snmp style rendering, e.g. `INTEGER: 5` or `Timeticks: (12345) 0:02:03.45`
impl fmt::Display for SnmpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer32(v) => write!(f, "INTEGER: {v}"),
            Self::OctetString(v) => write!(f, "STRING: \"{v}\""),
            Self::Gauge32(v) => write!(f, "Gauge32: {v}"),
            Self::Counter32(v) => write!(f, "Counter32: {v}"),
            Self::TimeTicks(v) => {
                let centis = v % 100;
                let seconds = v / 100;
                let days = seconds / 86_400;
                let hours = (seconds % 86_400) / 3600;
                let minutes = (seconds % 3600) / 60;
                let secs = seconds % 60;
                if days > 0 {
                    write!(
                        f,
                        "Timeticks: ({v}) {days} day{}, {hours}:{minutes:02}:{secs:02}.{centis:02}",
                        if days == 1 { "" } else { "s" }
                    )
                } else {
                    write!(f, "Timeticks: ({v}) {hours}:{minutes:02}:{secs:02}.{centis:02}")
                }
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_type_aliases() {
        assert_eq!("Integer".parse::<SnmpType>().unwrap(), SnmpType::Integer32);
        assert_eq!("INTEGER".parse::<SnmpType>().unwrap(), SnmpType::Integer32);
        assert_eq!("gauge".parse::<SnmpType>().unwrap(), SnmpType::Gauge32);
        assert_eq!("Counter".parse::<SnmpType>().unwrap(), SnmpType::Counter32);
        assert_eq!("TimeTicks".parse::<SnmpType>().unwrap(), SnmpType::TimeTicks);
        assert!("Opaque".parse::<SnmpType>().unwrap_err().is_configuration());
    }

    #[test]
    fn test_from_number_integer32() {
        let v = SnmpValue::from_number(Number::Float(2749.5), SnmpType::Integer32, 1.0);
        assert_eq!(v, SnmpValue::Integer32(2749));
        let v = SnmpValue::from_number(Number::Float(27.35), SnmpType::Integer32, 100.0);
        assert_eq!(v, SnmpValue::Integer32(2735));
        let v = SnmpValue::from_number(Number::Float(-1.9), SnmpType::Integer32, 1.0);
        assert_eq!(v, SnmpValue::Integer32(-1));
        // Scale factor only applies to floats
        let v = SnmpValue::from_number(Number::Integer(7), SnmpType::Integer32, 100.0);
        assert_eq!(v, SnmpValue::Integer32(7));
        let v = SnmpValue::from_number(Number::Integer(4_294_967_295), SnmpType::Integer32, 1.0);
        assert_eq!(v, SnmpValue::Integer32(i32::MAX));
    }

    #[test]
    fn test_from_number_unsigned_saturates() {
        let v = SnmpValue::from_number(Number::Integer(-5), SnmpType::Gauge32, 1.0);
        assert_eq!(v, SnmpValue::Gauge32(0));
        let v = SnmpValue::from_number(Number::Float(12.7), SnmpType::Counter32, 10.0);
        assert_eq!(v, SnmpValue::Counter32(127));
        let v = SnmpValue::from_number(Number::Float(1e12), SnmpType::Gauge32, 1.0);
        assert_eq!(v, SnmpValue::Gauge32(u32::MAX));
        let v = SnmpValue::from_number(Number::Float(99.9), SnmpType::TimeTicks, 10.0);
        assert_eq!(v, SnmpValue::TimeTicks(99));
    }

    #[test]
    fn test_from_number_octet_string() {
        let v = SnmpValue::from_number(Number::Float(2749.5), SnmpType::OctetString, 1.0);
        assert_eq!(v, SnmpValue::OctetString("2749.50".into()));
        let v = SnmpValue::from_number(Number::Integer(-3), SnmpType::OctetString, 1.0);
        assert_eq!(v, SnmpValue::OctetString("-3".into()));
    }

    #[test]
    fn test_parse_fixed() {
        assert_eq!(
            SnmpValue::parse_fixed("42", SnmpType::Integer32).unwrap(),
            SnmpValue::Integer32(42)
        );
        assert_eq!(
            SnmpValue::parse_fixed("Modbus bridge", SnmpType::OctetString).unwrap(),
            SnmpValue::OctetString("Modbus bridge".into())
        );
        assert!(SnmpValue::parse_fixed("-1", SnmpType::Gauge32).is_err());
        assert!(SnmpValue::parse_fixed("abc", SnmpType::Integer32).is_err());
        assert!(SnmpValue::parse_fixed("4294967296", SnmpType::Counter32).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(SnmpValue::Integer32(-99998).to_string(), "INTEGER: -99998");
        assert_eq!(
            SnmpValue::OctetString("2749.50".into()).to_string(),
            "STRING: \"2749.50\""
        );
        assert_eq!(
            SnmpValue::TimeTicks(12_345).to_string(),
            "Timeticks: (12345) 0:02:03.45"
        );
        assert_eq!(
            SnmpValue::TimeTicks(8_640_000 + 360_000).to_string(),
            "Timeticks: (9000000) 1 day, 1:00:00.00"
        );
    }

    #[test]
    fn test_serialize_tagged() {
        let json = serde_json::to_value(SnmpValue::Gauge32(5)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "Gauge32", "value": 5}));
    }
}
