//! Register value codec
//!
//! Turns raw words into a typed number and applies the configured scaling rule. Pure functions,
//! no I/O. 32-bit values are assembled most-significant word first (big-endian words,
//! big-endian bytes, "ABCD").

use std::fmt;
use std::str::FromStr;

use errors::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Value reported by a communication-status binding
pub const COMMUNICATION_OK: i64 = 1;

/// Upper bound for `decimal_places`; beyond this an f64 carries no more precision
pub const MAX_DECIMAL_PLACES: u32 = 10;

/// Register data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
}

impl DataType {
    /// Number of 16-bit words the type occupies
    pub fn word_count(self) -> u16 {
        match self {
            Self::Int16 | Self::Uint16 => 1,
            Self::Int32 | Self::Uint32 | Self::Float32 => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int16 => "int16",
            Self::Uint16 => "uint16",
            Self::Int32 => "int32",
            Self::Uint32 => "uint32",
            Self::Float32 => "float32",
        }
    }
}

impl FromStr for DataType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int16" => Ok(Self::Int16),
            "uint16" => Ok(Self::Uint16),
            "int32" => Ok(Self::Int32),
            "uint32" => Ok(Self::Uint32),
            "float32" | "float" => Ok(Self::Float32),
            other => Err(BridgeError::invalid(
                "data_type",
                format!("unknown data type '{other}' (expected int16, uint16, int32, uint32 or float32)"),
            )),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded or processed register value
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Integer(v) => v as f64,
            Self::Float(v) => v,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Linear scaling: `round(value * coefficient + offset, decimal_places)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    pub coefficient: f64,
    pub offset: f64,
    pub decimal_places: u32,
}

/// How a decoded value becomes the published value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Processing {
    Multiply(Scaling),
    Direct,
    /// Reports link health as a constant; never reads a register
    CommunicationStatus,
}

impl Processing {
    pub fn needs_read(&self) -> bool {
        !matches!(self, Self::CommunicationStatus)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Multiply(_) => "multiply",
            Self::Direct => "direct",
            Self::CommunicationStatus => "communication_status",
        }
    }
}

/// Decode raw words into a number according to `data_type`.
///
/// Extra words are ignored; missing words are a [`BridgeError::Decode`].
pub fn decode(words: &[u16], data_type: DataType) -> BridgeResult<Number> {
    let needed = usize::from(data_type.word_count());
    if words.len() < needed {
        return Err(BridgeError::Decode(format!(
            "{data_type} needs {needed} word(s), got {}",
            words.len()
        )));
    }

    let value = match data_type {
        DataType::Int16 => Number::Integer(i64::from(words[0] as i16)),
        DataType::Uint16 => Number::Integer(i64::from(words[0])),
        DataType::Int32 => Number::Integer(i64::from(combine(words) as i32)),
        DataType::Uint32 => Number::Integer(i64::from(combine(words))),
        DataType::Float32 => {
            let value = f32::from_bits(combine(words));
            if !value.is_finite() {
                return Err(BridgeError::Decode(format!(
                    "float32 [0x{:04X}, 0x{:04X}] is not a finite number",
                    words[0], words[1]
                )));
            }
            Number::Float(f64::from(value))
        },
    };

    trace!("Decoded {}: {:04X?} -> {}", data_type, &words[..needed], value);
    Ok(value)
}

#[inline]
fn combine(words: &[u16]) -> u32 {
    (u32::from(words[0]) << 16) | u32::from(words[1])
}

/// Apply `processing` to a decoded value
pub fn process(value: Number, processing: &Processing) -> Number {
    match processing {
        Processing::Direct => value,
        Processing::CommunicationStatus => Number::Integer(COMMUNICATION_OK),
        Processing::Multiply(scaling) => {
            let scaled = value.as_f64() * scaling.coefficient + scaling.offset;
            let rounded = round_half_away_from_zero(scaled, scaling.decimal_places);
            trace!(
                "{} x {} + {} = {}",
                value,
                scaling.coefficient,
                scaling.offset,
                rounded
            );
            Number::Float(rounded)
        },
    }
}

/// Round to `places` decimals, ties away from zero
pub fn round_half_away_from_zero(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places.min(MAX_DECIMAL_PLACES) as i32);
    let shifted = value * factor;
    if !shifted.is_finite() {
        return value;
    }
    // f64::round already rounds half away from zero
    shifted.round() / factor
}
