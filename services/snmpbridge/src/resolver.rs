//! Request resolution
//!
//! OID -> registry lookup -> (link read -> decode -> process) -> typed SNMP value. Failures never
//! escape: an unknown OID and a failed Modbus transaction each map to a configured `Integer32`
//! sentinel, so the front end always has something well-typed to answer with.

use std::sync::Arc;

use bridge_modbus::{decode, process, LinkManager, Number, Processing, COMMUNICATION_OK};
use errors::BridgeResult;
use serde::Serialize;
use tracing::{debug, error, warn, Level};

use crate::oid::Oid;
use crate::registry::{Binding, ComputedKind, RegisterBinding, Registry};
use crate::snmp::SnmpValue;
use crate::system::SystemClock;

/// Values reported in place of data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sentinels {
    pub error_value: i32,
    pub undefined_oid_value: i32,
}

impl Default for Sentinels {
    fn default() -> Self {
        Self {
            error_value: -99998,
            undefined_oid_value: -99997,
        }
    }
}

/// Outcome of one resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Value(SnmpValue),
    UndefinedOid,
    CommunicationFailure { reason: String },
}

impl Resolution {
    /// The value to publish, substituting sentinels for failures
    pub fn into_value(self, sentinels: &Sentinels) -> SnmpValue {
        match self {
            Self::Value(value) => value,
            Self::UndefinedOid => SnmpValue::Integer32(sentinels.undefined_oid_value),
            Self::CommunicationFailure { .. } => SnmpValue::Integer32(sentinels.error_value),
        }
    }
}

pub struct Resolver {
    registry: Arc<Registry>,
    link: Arc<LinkManager>,
    clock: SystemClock,
    sentinels: Sentinels,
}

impl Resolver {
    pub fn new(
        registry: Arc<Registry>,
        link: Arc<LinkManager>,
        clock: SystemClock,
        sentinels: Sentinels,
    ) -> Self {
        Self {
            registry,
            link,
            clock,
            sentinels,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn link(&self) -> &LinkManager {
        &self.link
    }

    pub fn sentinels(&self) -> &Sentinels {
        &self.sentinels
    }

    /// Resolve one OID. Register-backed OIDs perform a fresh Modbus read.
    pub async fn resolve(&self, oid: &Oid) -> Resolution {
        let Some(descriptor) = self.registry.lookup(oid) else {
            debug!("Undefined OID requested: {}", oid);
            return Resolution::UndefinedOid;
        };

        match &descriptor.binding {
            Binding::Fixed(value) => Resolution::Value(value.clone()),
            Binding::Computed {
                kind: ComputedKind::Uptime,
                ..
            } => Resolution::Value(SnmpValue::TimeTicks(self.clock.uptime_ticks())),
            Binding::Computed {
                kind: ComputedKind::UtcTime,
                ..
            } => match self.clock.utc_time() {
                Ok(text) => Resolution::Value(SnmpValue::OctetString(text)),
                Err(e) => {
                    error!("Local time unavailable for {}: {}", oid, e);
                    Resolution::CommunicationFailure {
                        reason: e.to_string(),
                    }
                },
            },
            Binding::Register(binding) => match self.read_number(binding).await {
                Ok(number) => {
                    let value =
                        SnmpValue::from_number(number, binding.snmp_type, binding.scale_factor);
                    debug!("{} ({}) = {} -> {}", oid, descriptor.description, number, value);
                    Resolution::Value(value)
                },
                Err(e) => {
                    if e.log_level() == Level::ERROR {
                        error!(
                            "Read failed for {} ({}): {}",
                            oid, descriptor.description, e
                        );
                    } else {
                        warn!(
                            "Read failed for {} ({}): {}",
                            oid, descriptor.description, e
                        );
                    }
                    Resolution::CommunicationFailure {
                        reason: e.to_string(),
                    }
                },
            },
        }
    }

    /// Resolve and substitute sentinels
    pub async fn resolve_value(&self, oid: &Oid) -> SnmpValue {
        self.resolve(oid).await.into_value(&self.sentinels)
    }

    /// Read, decode and process a register binding, before SNMP typing
    pub async fn read_number(&self, binding: &RegisterBinding) -> BridgeResult<Number> {
        let Some(read) = binding.read else {
            // Communication status never touches the link
            debug_assert!(matches!(binding.processing, Processing::CommunicationStatus));
            return Ok(Number::Integer(COMMUNICATION_OK));
        };

        let words = self
            .link
            .read_registers(
                read.unit_id,
                read.function,
                read.address,
                read.data_type.word_count(),
            )
            .await?;
        let decoded = decode(&words, read.data_type)?;
        Ok(process(decoded, &binding.processing))
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("oids", &self.registry.len())
            .field("link", &self.link)
            .field("sentinels", &self.sentinels)
            .finish()
    }
}
