//! Common command-line arguments for bridge services
//!
//! Flattened into each service's own clap parser.

use std::path::PathBuf;

use clap::Args;

use crate::logging::LogConfig;

/// Common service startup arguments
#[derive(Debug, Clone, Args)]
pub struct ServiceArgs {
    /// Log level or filter directive (trace, debug, info, warn, error); `RUST_LOG` overrides it
    #[arg(short = 'l', long, global = true, default_value = "info")]
    pub log_level: String,

    /// Also append logs to this file
    #[arg(long, global = true, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Disable colored output (useful for log files)
    #[arg(long, global = true)]
    pub no_color: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
            no_color: false,
        }
    }
}

impl ServiceArgs {
    /// Build the logger configuration for `service_name`
    pub fn log_config(&self, service_name: &str) -> LogConfig {
        LogConfig {
            service_name: service_name.to_string(),
            level: self.log_level.clone(),
            log_file: self.log_file.clone(),
            ansi: !self.no_color,
        }
    }
}
