//! OID registry
//!
//! Immutable after construction. Lookups and successor queries are plain reads on a `BTreeMap`,
//! so the registry is shared between tasks behind an `Arc` without locking.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound::{Excluded, Unbounded};

use bridge_modbus::{DataType, FunctionCode, Processing, Scaling};
use errors::{BridgeError, BridgeResult};
use tracing::info;

use crate::config::{RawRegisterOid, RawSystemOid, Scalar};
use crate::oid::Oid;
use crate::snmp::{SnmpType, SnmpValue};

/// Computed value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedKind {
    /// Hundredths of a second since start
    Uptime,
    /// Local time with offset label
    UtcTime,
}

/// Register location and width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRead {
    pub unit_id: u8,
    pub function: FunctionCode,
    pub address: u16,
    pub data_type: DataType,
}

/// A register-backed binding
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterBinding {
    /// `None` for communication-status entries, which never read
    pub read: Option<RegisterRead>,
    pub processing: Processing,
    pub snmp_type: SnmpType,
    pub scale_factor: f64,
}

/// What an OID resolves to
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Fixed(SnmpValue),
    Computed {
        kind: ComputedKind,
        snmp_type: SnmpType,
    },
    Register(RegisterBinding),
}

impl Binding {
    pub fn snmp_type(&self) -> SnmpType {
        match self {
            Self::Fixed(value) => value.snmp_type(),
            Self::Computed { snmp_type, .. } => *snmp_type,
            Self::Register(binding) => binding.snmp_type,
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(value) => write!(f, "fixed {value}"),
            Self::Computed {
                kind: ComputedKind::Uptime,
                ..
            } => f.write_str("uptime"),
            Self::Computed {
                kind: ComputedKind::UtcTime,
                ..
            } => f.write_str("utc_time"),
            Self::Register(RegisterBinding {
                read: None,
                snmp_type,
                ..
            }) => write!(f, "communication_status -> {snmp_type}"),
            Self::Register(RegisterBinding {
                read: Some(read),
                processing,
                snmp_type,
                ..
            }) => {
                write!(
                    f,
                    "{} unit={} addr=0x{:04X} {} {}",
                    read.function,
                    read.unit_id,
                    read.address,
                    read.data_type,
                    processing.name()
                )?;
                if let Processing::Multiply(scaling) = processing {
                    write!(
                        f,
                        "(x{} {:+} .{})",
                        scaling.coefficient, scaling.offset, scaling.decimal_places
                    )?;
                }
                write!(f, " -> {snmp_type}")
            },
        }
    }
}

/// One registered OID
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub oid: Oid,
    pub description: String,
    pub binding: Binding,
}

/// Ordered, immutable OID table
#[derive(Debug, Default)]
pub struct Registry {
    entries: BTreeMap<Oid, Descriptor>,
}

impl Registry {
    /// Validate configured entries and build the table
    pub fn build(system_oids: &[RawSystemOid], oids: &[RawRegisterOid]) -> BridgeResult<Self> {
        let mut descriptors = Vec::with_capacity(system_oids.len() + oids.len());
        for raw in system_oids {
            descriptors.push(system_descriptor(raw)?);
        }
        for raw in oids {
            descriptors.push(register_descriptor(raw)?);
        }
        let registry = Self::from_descriptors(descriptors)?;

        for descriptor in registry.iter() {
            info!(
                "Registered OID {} ({}): {}",
                descriptor.oid, descriptor.description, descriptor.binding
            );
        }
        info!("OID registry ready: {} entries", registry.len());
        Ok(registry)
    }

    /// Build from already validated descriptors; duplicates are rejected
    pub fn from_descriptors(descriptors: Vec<Descriptor>) -> BridgeResult<Self> {
        let mut entries = BTreeMap::new();
        for descriptor in descriptors {
            if entries.contains_key(&descriptor.oid) {
                return Err(BridgeError::DuplicateOid(descriptor.oid.to_string()));
            }
            entries.insert(descriptor.oid.clone(), descriptor);
        }
        Ok(Self { entries })
    }

    pub fn lookup(&self, oid: &Oid) -> Option<&Descriptor> {
        self.entries.get(oid)
    }

    /// First registered OID strictly after `oid`
    pub fn next_after(&self, oid: &Oid) -> Option<&Descriptor> {
        self.entries
            .range((Excluded(oid), Unbounded))
            .next()
            .map(|(_, descriptor)| descriptor)
    }

    pub fn first(&self) -> Option<&Descriptor> {
        self.entries.values().next()
    }

    /// Descriptors in walk order
    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Entry validation
// ============================================================================

fn field(oid: &str, name: &str) -> String {
    format!("{oid}: {name}")
}

fn parse_snmp_type(oid: &str, value: Option<&str>) -> BridgeResult<SnmpType> {
    match value {
        None => Ok(SnmpType::default()),
        Some(text) => text.parse().map_err(|e: BridgeError| match e {
            BridgeError::InvalidConfig { reason, .. } => {
                BridgeError::invalid(field(oid, "snmp_data_type"), reason)
            },
            other => other,
        }),
    }
}

fn system_descriptor(raw: &RawSystemOid) -> BridgeResult<Descriptor> {
    let oid: Oid = raw.oid.parse()?;
    let name = raw.oid.trim();

    let binding = match raw.kind.trim().to_ascii_lowercase().as_str() {
        "fixed_value" => {
            let snmp_type = parse_snmp_type(name, raw.snmp_data_type.as_deref())?;
            let value = raw
                .value
                .as_ref()
                .ok_or_else(|| BridgeError::missing(field(name, "value")))?;
            let value = SnmpValue::parse_fixed(&value.to_string(), snmp_type).map_err(|e| {
                BridgeError::invalid(field(name, "value"), e.to_string())
            })?;
            Binding::Fixed(value)
        },
        "uptime" => {
            let snmp_type = match raw.snmp_data_type.as_deref() {
                None => SnmpType::TimeTicks,
                Some(text) => parse_snmp_type(name, Some(text))?,
            };
            if snmp_type != SnmpType::TimeTicks {
                return Err(BridgeError::invalid(
                    field(name, "snmp_data_type"),
                    format!("uptime is published as TimeTicks, not {snmp_type}"),
                ));
            }
            Binding::Computed {
                kind: ComputedKind::Uptime,
                snmp_type,
            }
        },
        "utc_time" => {
            let snmp_type = parse_snmp_type(name, raw.snmp_data_type.as_deref())?;
            if snmp_type != SnmpType::OctetString {
                return Err(BridgeError::invalid(
                    field(name, "snmp_data_type"),
                    format!("utc_time is published as OctetString, not {snmp_type}"),
                ));
            }
            Binding::Computed {
                kind: ComputedKind::UtcTime,
                snmp_type,
            }
        },
        other => {
            return Err(BridgeError::invalid(
                field(name, "type"),
                format!("unknown system OID type '{other}' (expected fixed_value, uptime or utc_time)"),
            ))
        },
    };

    Ok(Descriptor {
        oid,
        description: raw.description.clone(),
        binding,
    })
}

fn register_descriptor(raw: &RawRegisterOid) -> BridgeResult<Descriptor> {
    let oid: Oid = raw.oid.parse()?;
    let name = raw.oid.trim();

    let processing_type = raw
        .processing_type
        .as_deref()
        .ok_or_else(|| BridgeError::missing(field(name, "processing_type")))?;

    let processing = match processing_type.trim().to_ascii_lowercase().as_str() {
        "multiply" => {
            let coefficient = raw
                .coefficient
                .ok_or_else(|| BridgeError::missing(field(name, "coefficient")))?;
            let offset = raw.offset.unwrap_or(0.0);
            if !coefficient.is_finite() || !offset.is_finite() {
                return Err(BridgeError::invalid(
                    field(name, "coefficient"),
                    "coefficient and offset must be finite",
                ));
            }
            let decimal_places = match raw.decimal_places.unwrap_or(0) {
                places @ 0..=10 => places as u32,
                places => {
                    return Err(BridgeError::invalid(
                        field(name, "decimal_places"),
                        format!("{places} is not within 0..=10"),
                    ))
                },
            };
            Processing::Multiply(Scaling {
                coefficient,
                offset,
                decimal_places,
            })
        },
        "direct" => Processing::Direct,
        "communication_status" => Processing::CommunicationStatus,
        other => {
            return Err(BridgeError::invalid(
                field(name, "processing_type"),
                format!(
                    "unknown processing type '{other}' (expected multiply, direct or communication_status)"
                ),
            ))
        },
    };

    let read = if processing.needs_read() {
        Some(register_read(name, raw)?)
    } else {
        None
    };

    let scale_factor = raw.scale_factor.unwrap_or(1.0);
    if !scale_factor.is_finite() {
        return Err(BridgeError::invalid(
            field(name, "scale_factor"),
            "must be finite",
        ));
    }

    Ok(Descriptor {
        oid,
        description: raw.description.clone(),
        binding: Binding::Register(RegisterBinding {
            read,
            processing,
            snmp_type: parse_snmp_type(name, raw.snmp_data_type.as_deref())?,
            scale_factor,
        }),
    })
}

fn register_read(name: &str, raw: &RawRegisterOid) -> BridgeResult<RegisterRead> {
    let address = match raw.register_address.as_ref() {
        None => return Err(BridgeError::missing(field(name, "register_address"))),
        Some(scalar) => parse_register_address(scalar)
            .ok_or_else(|| {
                BridgeError::invalid(
                    field(name, "register_address"),
                    format!("'{scalar}' is not an address in 0x0000..=0xFFFF"),
                )
            })?,
    };

    let unit_id = raw
        .unit_id
        .ok_or_else(|| BridgeError::missing(field(name, "unit_id")))?;
    let unit_id = u8::try_from(unit_id).map_err(|_| {
        BridgeError::invalid(field(name, "unit_id"), format!("{unit_id} is not within 0..=255"))
    })?;

    let function_code = raw
        .function_code
        .ok_or_else(|| BridgeError::missing(field(name, "function_code")))?;
    let function = u8::try_from(function_code)
        .ok()
        .and_then(|code| FunctionCode::try_from(code).ok())
        .ok_or_else(|| {
            BridgeError::invalid(
                field(name, "function_code"),
                format!("{function_code} is not 1, 2, 3 or 4"),
            )
        })?;

    let data_type: DataType = raw
        .data_type
        .as_deref()
        .ok_or_else(|| BridgeError::missing(field(name, "data_type")))?
        .parse()
        .map_err(|e: BridgeError| BridgeError::invalid(field(name, "data_type"), e.to_string()))?;

    if function.is_bit_access() && data_type.word_count() != 1 {
        return Err(BridgeError::invalid(
            field(name, "data_type"),
            format!("{function} reads single bits; {data_type} needs two words"),
        ));
    }

    let last = u32::from(address) + u32::from(data_type.word_count()) - 1;
    if last > u32::from(u16::MAX) {
        return Err(BridgeError::invalid(
            field(name, "register_address"),
            format!("{data_type} at 0x{address:04X} runs past 0xFFFF"),
        ));
    }

    Ok(RegisterRead {
        unit_id,
        function,
        address,
        data_type,
    })
}

/// Integers are taken as-is; strings are hexadecimal with an optional `0x` prefix
pub fn parse_register_address(scalar: &Scalar) -> Option<u16> {
    match scalar {
        Scalar::Integer(v) => u16::try_from(*v).ok(),
        Scalar::Float(_) => None,
        Scalar::Text(text) => {
            let trimmed = text.trim();
            let digits = trimmed
                .strip_prefix("0x")
                .or_else(|| trimmed.strip_prefix("0X"))
                .unwrap_or(trimmed);
            u16::from_str_radix(digits, 16).ok()
        },
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    const TEMPERATURE: &str = ".1.3.6.1.4.1.41475.3.2.3.10.1.1.2.0";

    fn temperature() -> RawRegisterOid {
        RawRegisterOid {
            oid: TEMPERATURE.into(),
            description: "Temperature".into(),
            register_address: Some(Scalar::Text("0x100".into())),
            unit_id: Some(1),
            function_code: Some(3),
            data_type: Some("int16".into()),
            processing_type: Some("multiply".into()),
            coefficient: Some(0.1),
            offset: Some(0.0),
            decimal_places: Some(1),
            snmp_data_type: Some("Integer32".into()),
            scale_factor: None,
        }
    }

    fn system(oid: &str, kind: &str, value: Option<Scalar>, snmp: Option<&str>) -> RawSystemOid {
        RawSystemOid {
            oid: oid.into(),
            description: String::new(),
            kind: kind.into(),
            value,
            snmp_data_type: snmp.map(Into::into),
        }
    }

    #[test]
    fn test_register_entry() {
        let registry = Registry::build(&[], &[temperature()]).unwrap();
        let descriptor = registry.lookup(&TEMPERATURE.parse().unwrap()).unwrap();
        let Binding::Register(binding) = &descriptor.binding else {
            panic!("expected register binding");
        };
        assert_eq!(
            binding.read,
            Some(RegisterRead {
                unit_id: 1,
                function: FunctionCode::ReadHoldingRegisters,
                address: 0x100,
                data_type: DataType::Int16,
            })
        );
        assert_eq!(
            binding.processing,
            Processing::Multiply(Scaling {
                coefficient: 0.1,
                offset: 0.0,
                decimal_places: 1,
            })
        );
        assert_eq!(binding.snmp_type, SnmpType::Integer32);
        assert_eq!(binding.scale_factor, 1.0);
    }

    #[test]
    fn test_duplicate_oid_is_rejected() {
        let err = Registry::build(&[], &[temperature(), temperature()]).unwrap_err();
        assert!(matches!(err, BridgeError::DuplicateOid(_)));
        assert!(err.is_configuration());

        // Same OID spelled differently is still a duplicate
        let mut other = temperature();
        other.oid = TEMPERATURE.trim_start_matches('.').into();
        assert!(Registry::build(&[], &[temperature(), other]).is_err());
    }

    #[test]
    fn test_missing_required_fields() {
        let mut raw = temperature();
        raw.coefficient = None;
        assert!(matches!(
            Registry::build(&[], &[raw]).unwrap_err(),
            BridgeError::MissingConfig(_)
        ));

        let strips: [fn(&mut RawRegisterOid); 5] = [
            |r| r.register_address = None,
            |r| r.unit_id = None,
            |r| r.function_code = None,
            |r| r.data_type = None,
            |r| r.processing_type = None,
        ];
        for strip in strips {
            let mut raw = temperature();
            strip(&mut raw);
            let err = Registry::build(&[], &[raw]).unwrap_err();
            assert!(matches!(err, BridgeError::MissingConfig(_)), "{err:?}");
        }
    }

    #[test]
    fn test_unknown_type_strings() {
        let mut raw = temperature();
        raw.data_type = Some("int64".into());
        assert!(Registry::build(&[], &[raw]).unwrap_err().is_configuration());

        let mut raw = temperature();
        raw.processing_type = Some("divide".into());
        assert!(Registry::build(&[], &[raw]).unwrap_err().is_configuration());

        let mut raw = temperature();
        raw.snmp_data_type = Some("IpAddress".into());
        assert!(Registry::build(&[], &[raw]).unwrap_err().is_configuration());

        let mut raw = temperature();
        raw.function_code = Some(6);
        assert!(Registry::build(&[], &[raw]).unwrap_err().is_configuration());

        let mut raw = temperature();
        raw.oid = "1.3.six".into();
        assert!(matches!(
            Registry::build(&[], &[raw]).unwrap_err(),
            BridgeError::InvalidOid { .. }
        ));
    }

    #[test]
    fn test_bit_reads_need_single_word_type() {
        let mut raw = temperature();
        raw.function_code = Some(1);
        raw.data_type = Some("float32".into());
        assert!(Registry::build(&[], &[raw]).is_err());

        let mut raw = temperature();
        raw.function_code = Some(2);
        raw.data_type = Some("uint16".into());
        assert!(Registry::build(&[], &[raw]).is_ok());
    }

    #[test]
    fn test_communication_status_ignores_register_fields() {
        let raw = RawRegisterOid {
            oid: ".1.3.6.1.4.1.41475.3.2.3.10.1.1.1.0".into(),
            processing_type: Some("communication_status".into()),
            snmp_data_type: Some("Integer32".into()),
            ..Default::default()
        };
        let registry = Registry::build(&[], &[raw]).unwrap();
        let descriptor = registry.first().unwrap();
        let Binding::Register(binding) = &descriptor.binding else {
            panic!("expected register binding");
        };
        assert!(binding.read.is_none());
        assert_eq!(binding.processing, Processing::CommunicationStatus);
    }

    #[test]
    fn test_register_address_forms() {
        assert_eq!(parse_register_address(&Scalar::Integer(256)), Some(256));
        assert_eq!(parse_register_address(&Scalar::Text("0x100".into())), Some(0x100));
        assert_eq!(parse_register_address(&Scalar::Text("100".into())), Some(0x100));
        assert_eq!(parse_register_address(&Scalar::Text("FFFF".into())), Some(0xFFFF));
        assert_eq!(parse_register_address(&Scalar::Integer(70_000)), None);
        assert_eq!(parse_register_address(&Scalar::Text("0x10000".into())), None);
        assert_eq!(parse_register_address(&Scalar::Float(1.5)), None);

        let mut raw = temperature();
        raw.register_address = Some(Scalar::Text("0xFFFF".into()));
        raw.data_type = Some("uint32".into());
        assert!(Registry::build(&[], &[raw]).is_err());
    }

    #[test]
    fn test_system_entries() {
        let registry = Registry::build(
            &[
                system(
                    ".1.3.6.1.2.1.1.1.0",
                    "fixed_value",
                    Some(Scalar::Text("Modbus bridge".into())),
                    None,
                ),
                system(".1.3.6.1.2.1.1.3.0", "uptime", None, None),
                system(".1.3.6.1.2.1.1.7.0", "fixed_value", Some(Scalar::Integer(72)), Some("Integer")),
                system(".1.3.6.1.4.1.41475.1.1.0", "utc_time", None, None),
            ],
            &[],
        )
        .unwrap();
        assert_eq!(registry.len(), 4);

        let services = registry.lookup(&".1.3.6.1.2.1.1.7.0".parse().unwrap()).unwrap();
        assert_eq!(services.binding, Binding::Fixed(SnmpValue::Integer32(72)));

        let descr = registry.lookup(&".1.3.6.1.2.1.1.1.0".parse().unwrap()).unwrap();
        assert_eq!(descr.binding.snmp_type(), SnmpType::OctetString);

        let uptime = registry.lookup(&".1.3.6.1.2.1.1.3.0".parse().unwrap()).unwrap();
        assert_eq!(uptime.binding.snmp_type(), SnmpType::TimeTicks);
    }

    #[test]
    fn test_system_entry_errors() {
        let bad = [
            system(".1.3.6.1.2.1.1.1.0", "fixed_value", None, None),
            system(".1.3.6.1.2.1.1.1.0", "fixed_value", Some(Scalar::Text("x".into())), Some("Gauge32")),
            system(".1.3.6.1.2.1.1.3.0", "uptime", None, Some("Integer32")),
            system(".1.3.6.1.2.1.1.3.0", "utc_time", None, Some("TimeTicks")),
            system(".1.3.6.1.2.1.1.3.0", "hostname", None, None),
        ];
        for raw in bad {
            let err = Registry::build(std::slice::from_ref(&raw), &[]).unwrap_err();
            assert!(err.is_configuration(), "{raw:?}: {err:?}");
        }
    }

    #[test]
    fn test_next_after_walks_in_arc_order() {
        let oids = [".1.3.6.1.4.1.9.1", ".1.3.6.1.4.1.10.1", ".1.3.6.1.2.1.1.1.0"];
        let raws: Vec<_> = oids
            .iter()
            .map(|oid| {
                system(oid, "fixed_value", Some(Scalar::Text("v".into())), None)
            })
            .collect();
        let registry = Registry::build(&raws, &[]).unwrap();

        let mut walked = Vec::new();
        let mut cursor = Oid::root();
        while let Some(next) = registry.next_after(&cursor) {
            walked.push(next.oid.to_string());
            cursor = next.oid.clone();
        }
        assert_eq!(
            walked,
            vec![".1.3.6.1.2.1.1.1.0", ".1.3.6.1.4.1.9.1", ".1.3.6.1.4.1.10.1"]
        );

        // A prefix that is not itself registered still finds its first child
        let prefix: Oid = ".1.3.6.1.4".parse().unwrap();
        assert_eq!(
            registry.next_after(&prefix).unwrap().oid.to_string(),
            ".1.3.6.1.4.1.9.1"
        );
        assert!(registry
            .next_after(&".1.3.6.1.4.1.10.1".parse().unwrap())
            .is_none());
    }
}
