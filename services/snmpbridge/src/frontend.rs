//! Seam between an SNMP engine and the resolver
//!
//! An SNMP agent answers GET with [`VarBindSource::get`] and GETNEXT with
//! [`VarBindSource::get_next`]; `None` from `get_next` is endOfMibView. BER encoding and
//! community checks stay on the engine's side.

use async_trait::async_trait;
use serde::Serialize;

use crate::oid::Oid;
use crate::resolver::Resolver;
use crate::snmp::SnmpValue;

/// A resolved variable binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VarBind {
    pub oid: Oid,
    pub value: SnmpValue,
}

#[async_trait]
pub trait VarBindSource: Send + Sync {
    /// Value for exactly `oid`; unknown OIDs yield the undefined-OID sentinel
    async fn get(&self, oid: &Oid) -> VarBind;

    /// Value for the first OID after `oid`
    async fn get_next(&self, oid: &Oid) -> Option<VarBind>;
}

#[async_trait]
impl VarBindSource for Resolver {
    async fn get(&self, oid: &Oid) -> VarBind {
        VarBind {
            oid: oid.clone(),
            value: self.resolve_value(oid).await,
        }
    }

    async fn get_next(&self, oid: &Oid) -> Option<VarBind> {
        let next = self.registry().next_after(oid)?.oid.clone();
        let value = self.resolve_value(&next).await;
        Some(VarBind { oid: next, value })
    }
}

/// GETNEXT from `from` until the end of the view
pub async fn walk(source: &dyn VarBindSource, from: &Oid) -> Vec<VarBind> {
    let mut bindings = Vec::new();
    let mut cursor = from.clone();
    while let Some(binding) = source.get_next(&cursor).await {
        cursor = binding.oid.clone();
        bindings.push(binding);
    }
    bindings
}
