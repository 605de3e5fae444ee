//! Bridge configuration
//!
//! Loaded with figment from a YAML, TOML or JSON file (chosen by extension), then overridden by
//! `SNMPBRIDGE_*` environment variables, e.g. `SNMPBRIDGE_MODBUS_TCP__SERVER_ADDRESS=10.0.0.5`.
//!
//! The file is deserialized into `Raw*` structs first and validated into [`BridgeConfig`]; the
//! OID lists are validated when the [`Registry`](crate::registry::Registry) is built from them.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use bridge_modbus::{LinkManager, LinkSettings, Parity, SerialSettings};
use errors::{config_error, BridgeError, BridgeResult};
use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::system::TimezoneOffset;

const ENV_PREFIX: &str = "SNMPBRIDGE_";

/// A scalar that may be written as a number or a string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

// ============================================================================
// Raw file schema
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub bridge: RawBridgeSection,
    pub modbus_tcp: Option<RawTcpProfile>,
    pub modbus_rtu: Option<RawRtuProfile>,
    #[serde(default)]
    pub system_oids: Vec<RawSystemOid>,
    #[serde(default)]
    pub oids: Vec<RawRegisterOid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBridgeSection {
    #[serde(default = "default_listen_address", alias = "listen_ip")]
    pub listen_address: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_community")]
    pub community: String,
    #[serde(default = "default_modbus_type")]
    pub modbus_type: String,
    #[serde(default)]
    pub timezone_offset: Option<Scalar>,
    #[serde(default = "default_error_value")]
    pub error_value: i64,
    #[serde(default = "default_undefined_oid_value")]
    pub undefined_oid_value: i64,
}

impl Default for RawBridgeSection {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            listen_port: default_listen_port(),
            community: default_community(),
            modbus_type: default_modbus_type(),
            timezone_offset: None,
            error_value: default_error_value(),
            undefined_oid_value: default_undefined_oid_value(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTcpProfile {
    pub server_address: String,
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(default = "default_retry_interval")]
    pub retry_interval: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRtuProfile {
    pub port: String,
    #[serde(default = "default_baud_rate", alias = "baudrate")]
    pub baud_rate: u32,
    #[serde(default = "default_byte_size", alias = "bytesize")]
    pub byte_size: u8,
    #[serde(default = "default_parity")]
    pub parity: String,
    #[serde(default = "default_stop_bits", alias = "stopbits")]
    pub stop_bits: u8,
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(default = "default_retry_interval")]
    pub retry_interval: f64,
}

/// Fixed or computed OID entry
#[derive(Debug, Clone, Deserialize)]
pub struct RawSystemOid {
    pub oid: String,
    #[serde(default)]
    pub description: String,
    /// `fixed_value`, `uptime` or `utc_time`
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Option<Scalar>,
    #[serde(default)]
    pub snmp_data_type: Option<String>,
}

/// Register-backed OID entry
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRegisterOid {
    pub oid: String,
    #[serde(default)]
    pub description: String,
    /// Integer, or a hex string with or without `0x`
    #[serde(default)]
    pub register_address: Option<Scalar>,
    #[serde(default)]
    pub unit_id: Option<i64>,
    #[serde(default)]
    pub function_code: Option<i64>,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub processing_type: Option<String>,
    #[serde(default)]
    pub coefficient: Option<f64>,
    #[serde(default)]
    pub offset: Option<f64>,
    #[serde(default)]
    pub decimal_places: Option<i64>,
    #[serde(default)]
    pub snmp_data_type: Option<String>,
    #[serde(default)]
    pub scale_factor: Option<f64>,
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    1161
}

fn default_community() -> String {
    "public".to_string()
}

fn default_modbus_type() -> String {
    "TCP".to_string()
}

fn default_error_value() -> i64 {
    -99998
}

fn default_undefined_oid_value() -> i64 {
    -99997
}

fn default_tcp_port() -> u16 {
    502
}

fn default_timeout() -> f64 {
    3.0
}

fn default_retry_interval() -> f64 {
    10.0
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_byte_size() -> u8 {
    8
}

fn default_parity() -> String {
    "N".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

// ============================================================================
// Validated configuration
// ============================================================================

/// Which link profile is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModbusType {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "RTU")]
    Rtu,
}

impl FromStr for ModbusType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TCP" => Ok(Self::Tcp),
            "RTU" => Ok(Self::Rtu),
            other => Err(BridgeError::invalid(
                "bridge.modbus_type",
                format!("'{other}' is not TCP or RTU"),
            )),
        }
    }
}

impl fmt::Display for ModbusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "TCP",
            Self::Rtu => "RTU",
        })
    }
}

/// Global bridge settings
#[derive(Debug, Clone, Serialize)]
pub struct BridgeSettings {
    pub listen_address: String,
    pub listen_port: u16,
    pub community: String,
    pub modbus_type: ModbusType,
    #[serde(serialize_with = "serialize_offset")]
    pub timezone_offset: TimezoneOffset,
    pub error_value: i32,
    pub undefined_oid_value: i32,
}

fn serialize_offset<S: serde::Serializer>(
    offset: &TimezoneOffset,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(offset)
}

/// The active Modbus link
#[derive(Debug, Clone, PartialEq)]
pub enum LinkProfile {
    Tcp {
        host: String,
        port: u16,
        settings: LinkSettings,
    },
    Rtu {
        serial: SerialSettings,
        settings: LinkSettings,
    },
}

impl LinkProfile {
    /// Create the (still unconnected) link manager
    pub fn build_link(&self) -> LinkManager {
        match self {
            Self::Tcp {
                host,
                port,
                settings,
            } => LinkManager::tcp(host.clone(), *port, *settings),
            Self::Rtu { serial, settings } => LinkManager::rtu(serial.clone(), *settings),
        }
    }
}

/// Validated configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub settings: BridgeSettings,
    pub link: LinkProfile,
    pub system_oids: Vec<RawSystemOid>,
    pub oids: Vec<RawRegisterOid>,
}

impl BridgeConfig {
    /// Load from a file plus `SNMPBRIDGE_*` environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> BridgeResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(config_error!(
                "Config file not found: {}",
                path.display()
            ));
        }

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        let figment = match extension.as_str() {
            "json" => Figment::new().merge(Json::file(path)),
            "toml" => Figment::new().merge(Toml::file(path)),
            "yaml" | "yml" => Figment::new().merge(Yaml::file(path)),
            _ => {
                return Err(config_error!(
                    "Unsupported config format: {}",
                    path.display()
                ))
            },
        };

        debug!("Loading configuration from {}", path.display());
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load from a YAML document, without environment overrides
    pub fn from_yaml_str(yaml: &str) -> BridgeResult<Self> {
        Self::from_figment(Figment::new().merge(Yaml::string(yaml)))
    }

    fn from_figment(figment: Figment) -> BridgeResult<Self> {
        let raw: RawConfig = figment
            .extract()
            .map_err(|e| config_error!("Failed to parse config: {e}"))?;
        Self::from_raw(raw)
    }

    /// Validate everything except the OID lists
    pub fn from_raw(raw: RawConfig) -> BridgeResult<Self> {
        let settings = validate_bridge(&raw.bridge)?;

        let link = match settings.modbus_type {
            ModbusType::Tcp => {
                let tcp = raw
                    .modbus_tcp
                    .as_ref()
                    .ok_or_else(|| BridgeError::missing("modbus_tcp (modbus_type is TCP)"))?;
                validate_tcp(tcp)?
            },
            ModbusType::Rtu => {
                let rtu = raw
                    .modbus_rtu
                    .as_ref()
                    .ok_or_else(|| BridgeError::missing("modbus_rtu (modbus_type is RTU)"))?;
                validate_rtu(rtu)?
            },
        };

        Ok(Self {
            settings,
            link,
            system_oids: raw.system_oids,
            oids: raw.oids,
        })
    }
}

fn validate_bridge(raw: &RawBridgeSection) -> BridgeResult<BridgeSettings> {
    if raw.listen_port == 0 {
        return Err(BridgeError::invalid("bridge.listen_port", "must be non-zero"));
    }
    if raw.community.trim().is_empty() {
        return Err(BridgeError::invalid("bridge.community", "must not be empty"));
    }

    let timezone_offset = match &raw.timezone_offset {
        None => TimezoneOffset::default(),
        Some(Scalar::Integer(hours)) => TimezoneOffset::from_hours(*hours)?,
        Some(Scalar::Text(text)) => text.parse()?,
        Some(Scalar::Float(v)) => {
            return Err(BridgeError::invalid(
                "bridge.timezone_offset",
                format!("{v} is not a whole hour offset"),
            ))
        },
    };

    let error_value = sentinel("bridge.error_value", raw.error_value)?;
    let undefined_oid_value = sentinel("bridge.undefined_oid_value", raw.undefined_oid_value)?;
    if error_value == undefined_oid_value {
        return Err(BridgeError::invalid(
            "bridge.undefined_oid_value",
            format!("must differ from error_value ({error_value})"),
        ));
    }

    Ok(BridgeSettings {
        listen_address: raw.listen_address.clone(),
        listen_port: raw.listen_port,
        community: raw.community.clone(),
        modbus_type: raw.modbus_type.parse()?,
        timezone_offset,
        error_value,
        undefined_oid_value,
    })
}

fn sentinel(field: &str, value: i64) -> BridgeResult<i32> {
    i32::try_from(value)
        .map_err(|_| BridgeError::invalid(field, format!("{value} does not fit an Integer32")))
}

fn validate_tcp(raw: &RawTcpProfile) -> BridgeResult<LinkProfile> {
    if raw.server_address.trim().is_empty() {
        return Err(BridgeError::missing("modbus_tcp.server_address"));
    }
    if raw.port == 0 {
        return Err(BridgeError::invalid("modbus_tcp.port", "must be non-zero"));
    }
    Ok(LinkProfile::Tcp {
        host: raw.server_address.trim().to_string(),
        port: raw.port,
        settings: link_settings("modbus_tcp", raw.timeout, raw.retry_interval)?,
    })
}

fn validate_rtu(raw: &RawRtuProfile) -> BridgeResult<LinkProfile> {
    if raw.port.trim().is_empty() {
        return Err(BridgeError::missing("modbus_rtu.port"));
    }
    if raw.baud_rate == 0 {
        return Err(BridgeError::invalid("modbus_rtu.baud_rate", "must be non-zero"));
    }
    if !(5..=8).contains(&raw.byte_size) {
        return Err(BridgeError::invalid(
            "modbus_rtu.byte_size",
            format!("{} is not within 5..=8", raw.byte_size),
        ));
    }
    if !(1..=2).contains(&raw.stop_bits) {
        return Err(BridgeError::invalid(
            "modbus_rtu.stop_bits",
            format!("{} is not 1 or 2", raw.stop_bits),
        ));
    }
    let parity: Parity = raw.parity.parse()?;

    Ok(LinkProfile::Rtu {
        serial: SerialSettings {
            port: raw.port.trim().to_string(),
            baud_rate: raw.baud_rate,
            data_bits: raw.byte_size,
            parity,
            stop_bits: raw.stop_bits,
        },
        settings: link_settings("modbus_rtu", raw.timeout, raw.retry_interval)?,
    })
}

fn link_settings(section: &str, timeout: f64, retry_interval: f64) -> BridgeResult<LinkSettings> {
    Ok(LinkSettings {
        timeout: seconds(&format!("{section}.timeout"), timeout)?,
        retry_interval: seconds(&format!("{section}.retry_interval"), retry_interval)?,
    })
}

fn seconds(field: &str, value: f64) -> BridgeResult<Duration> {
    if !value.is_finite() || value <= 0.0 {
        return Err(BridgeError::invalid(
            field,
            format!("{value} is not a positive number of seconds"),
        ));
    }
    Duration::try_from_secs_f64(value).map_err(|e| BridgeError::invalid(field, e.to_string()))
}
