//! Basic library shared by bridge services
//!
//! Provides:
//! - logging bootstrap (bracketed console format, optional log file)
//! - common command-line arguments
//! - service banner

pub mod bootstrap_args;
pub mod logging;
pub mod service_bootstrap;

pub use bootstrap_args::ServiceArgs;
pub use logging::LogConfig;
pub use service_bootstrap::ServiceInfo;

// Re-export common dependencies
pub use anyhow;
pub use clap;
