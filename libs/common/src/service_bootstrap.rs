//! Unified service bootstrap utilities
//!
//! Startup banner and logging initialization shared by bridge binaries.

use crate::bootstrap_args::ServiceArgs;
use crate::logging;
use tracing::info;

/// Service metadata for startup
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Service name (e.g., "snmpbridge")
    pub name: String,
    /// Service version, normally the binary's `CARGO_PKG_VERSION`
    pub version: String,
    /// Service description
    pub description: String,
}

impl ServiceInfo {
    /// Create new service info
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }

    /// One-line banner text
    pub fn headline(&self) -> String {
        format!("{} v{}", self.name.to_uppercase(), self.version)
    }
}

/// Print unified startup banner for any service
pub fn print_startup_banner(service: &ServiceInfo) {
    let rule = "=".repeat(service.headline().len().max(service.description.len()) + 2);
    info!("{}", rule);
    info!(" {}", service.headline());
    info!(" {}", service.description);
    info!("{}", rule);
}

/// Initialize logging for a service from its command-line arguments
pub fn init_logging(service: &ServiceInfo, args: &ServiceArgs) -> anyhow::Result<()> {
    logging::init_with_config(args.log_config(&service.name))
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    Ok(())
}
