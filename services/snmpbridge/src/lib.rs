//! SNMP-Modbus bridge core
//!
//! Publishes values from a Modbus device as SNMP variables. Each OID is bound by configuration to
//! a fixed value, a computed system value, or a register read with a scaling rule. Nothing is
//! cached; every resolution of a register-backed OID is a fresh Modbus transaction.
//!
//! ```text
//! SNMP engine --VarBindSource--> Resolver --> Registry (immutable, ordered)
//!                                    |
//!                                    +--> LinkManager (bridge-modbus) --> decode/process
//! ```

pub mod bridge;
pub mod cli;
pub mod config;
pub mod frontend;
pub mod oid;
pub mod registry;
pub mod resolver;
pub mod snmp;
pub mod system;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use frontend::{VarBind, VarBindSource};
pub use oid::Oid;
pub use registry::{Binding, Descriptor, Registry};
pub use resolver::{Resolution, Resolver, Sentinels};
pub use snmp::{SnmpType, SnmpValue};
