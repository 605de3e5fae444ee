//! Object identifiers
//!
//! Stored as arcs so ordering is numeric per arc (`.1.3.6.1.10` sorts after `.1.3.6.1.9`), which
//! is the order GETNEXT walks in.

use std::fmt;
use std::str::FromStr;

use errors::BridgeError;
use serde::{Serialize, Serializer};

/// A dotted-decimal OID
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(Vec<u32>);

impl Oid {
    /// The empty OID. Sorts before every other OID, so it is the start of a full walk.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }
}

impl FromStr for Oid {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| BridgeError::InvalidOid {
            oid: s.to_string(),
            reason,
        };

        let trimmed = s.trim();
        let body = trimmed.strip_prefix('.').unwrap_or(trimmed);
        if body.is_empty() {
            return Err(invalid("empty".to_string()));
        }

        let arcs = body
            .split('.')
            .map(|arc| {
                if arc.is_empty() || !arc.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid(format!("'{arc}' is not a non-negative integer")));
                }
                arc.parse::<u32>()
                    .map_err(|_| invalid(format!("arc {arc} is out of range")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if arcs.len() < 2 {
            return Err(invalid("needs at least two arcs".to_string()));
        }
        Ok(Self(arcs))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str(".");
        }
        for arc in &self.0 {
            write!(f, ".{arc}")?;
        }
        Ok(())
    }
}

impl Serialize for Oid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
