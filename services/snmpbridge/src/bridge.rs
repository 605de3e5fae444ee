//! Bridge assembly: configuration -> registry + link -> resolver

use std::path::Path;
use std::sync::Arc;

use errors::BridgeResult;
use tracing::info;

use crate::config::BridgeConfig;
use crate::registry::Registry;
use crate::resolver::{Resolver, Sentinels};
use crate::system::SystemClock;

/// A fully wired bridge. The link is created disconnected and opens on the first register read.
#[derive(Debug)]
pub struct Bridge {
    config: BridgeConfig,
    resolver: Arc<Resolver>,
}

impl Bridge {
    /// Load and validate a configuration file, then build the bridge
    pub fn load<P: AsRef<Path>>(path: P) -> BridgeResult<Self> {
        Self::from_config(BridgeConfig::from_file(path)?)
    }

    pub fn from_config(config: BridgeConfig) -> BridgeResult<Self> {
        let registry = Registry::build(&config.system_oids, &config.oids)?;
        let link = config.link.build_link();
        info!(
            "Bridge ready: {} OIDs, {} link {}",
            registry.len(),
            config.settings.modbus_type,
            link.endpoint()
        );

        let resolver = Resolver::new(
            Arc::new(registry),
            Arc::new(link),
            SystemClock::new(config.settings.timezone_offset),
            Sentinels {
                error_value: config.settings.error_value,
                undefined_oid_value: config.settings.undefined_oid_value,
            },
        );

        Ok(Self {
            config,
            resolver: Arc::new(resolver),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Shared resolver handed to the SNMP front end
    pub fn resolver(&self) -> Arc<Resolver> {
        self.resolver.clone()
    }

    /// Close the Modbus link
    pub async fn shutdown(&self) {
        self.resolver.link().shutdown().await;
        info!("Bridge stopped");
    }
}
