//! Operator command line
//!
//! Every command loads and validates the full configuration first, so a bad file fails before
//! any Modbus traffic. Register reads are live; nothing is cached between invocations.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use common::ServiceArgs;
use serde_json::json;

use crate::bridge::Bridge;
use crate::frontend::{walk, VarBind, VarBindSource};
use crate::oid::Oid;
use crate::registry::Registry;

pub const DEFAULT_CONFIG: &str = "config/snmpbridge.yaml";

#[derive(Debug, Parser)]
#[command(name = "snmpbridge")]
#[command(about = "SNMP-Modbus bridge: serve live Modbus register values as SNMP variables")]
#[command(long_about = "SNMP-Modbus bridge: serve live Modbus register values as SNMP variables

Examples:
  snmpbridge validate                          # Check the configuration
  snmpbridge oids                              # List the OID tree
  snmpbridge get .1.3.6.1.4.1.41475.3.2.3.10.1.1.2.0
  snmpbridge walk --from .1.3.6.1.4.1          # Resolve a subtree in GETNEXT order")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub service: ServiceArgs,

    /// Configuration file (YAML, TOML or JSON)
    #[arg(
        short,
        long,
        global = true,
        default_value = DEFAULT_CONFIG,
        env = "SNMPBRIDGE_CONFIG"
    )]
    pub config: PathBuf,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load and validate the configuration
    Validate,

    /// List registered OIDs in walk order
    Oids,

    /// Resolve OIDs once
    Get {
        /// OIDs to resolve
        #[arg(required = true)]
        oids: Vec<String>,
    },

    /// Resolve every OID after a starting point
    Walk {
        /// Start after this OID (default: the whole tree)
        #[arg(long)]
        from: Option<String>,
    },
}

/// Run one command to completion
pub async fn run(cli: Cli) -> Result<()> {
    let bridge = Bridge::load(&cli.config)
        .with_context(|| format!("Invalid configuration: {}", cli.config.display()))?;

    let outcome = execute(&bridge, &cli).await;
    bridge.shutdown().await;

    let output = outcome?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

async fn execute(bridge: &Bridge, cli: &Cli) -> Result<String> {
    let resolver = bridge.resolver();
    match &cli.command {
        Commands::Validate => render_validation(bridge, cli.json),
        Commands::Oids => render_oids(resolver.registry(), cli.json),
        Commands::Get { oids } => {
            let oids = oids
                .iter()
                .map(|text| text.parse::<Oid>())
                .collect::<Result<Vec<_>, _>>()?;
            let mut bindings = Vec::with_capacity(oids.len());
            for oid in &oids {
                bindings.push(resolver.get(oid).await);
            }
            render_bindings(&bindings, cli.json)
        },
        Commands::Walk { from } => {
            let start = match from {
                Some(text) => text.parse::<Oid>()?,
                None => Oid::root(),
            };
            let bindings = walk(resolver.as_ref(), &start).await;
            render_bindings(&bindings, cli.json)
        },
    }
}

fn render_validation(bridge: &Bridge, as_json: bool) -> Result<String> {
    let config = bridge.config();
    let resolver = bridge.resolver();
    let endpoint = resolver.link().endpoint();
    let oid_count = resolver.registry().len();

    if as_json {
        let settings = resolver.link().settings();
        return Ok(serde_json::to_string_pretty(&json!({
            "valid": true,
            "settings": config.settings,
            "link": {
                "endpoint": endpoint,
                "timeout_secs": settings.timeout.as_secs_f64(),
                "retry_interval_secs": settings.retry_interval.as_secs_f64(),
            },
            "oids": oid_count,
        }))?);
    }

    Ok(format!(
        "{} Configuration valid: {} OIDs, {} link {}, listening on {}:{}",
        "OK".green(),
        oid_count,
        config.settings.modbus_type,
        endpoint.cyan(),
        config.settings.listen_address,
        config.settings.listen_port
    ))
}

/// OID table in walk order
pub fn render_oids(registry: &Registry, as_json: bool) -> Result<String> {
    if as_json {
        let entries: Vec<_> = registry
            .iter()
            .map(|descriptor| {
                json!({
                    "oid": descriptor.oid,
                    "description": descriptor.description,
                    "snmp_type": descriptor.binding.snmp_type(),
                    "binding": descriptor.binding.to_string(),
                })
            })
            .collect();
        return Ok(serde_json::to_string_pretty(&entries)?);
    }

    let mut lines = Vec::with_capacity(registry.len());
    for descriptor in registry.iter() {
        lines.push(format!(
            "{}  {}\n    {}",
            descriptor.oid.to_string().cyan(),
            descriptor.description.bold(),
            descriptor.binding.to_string().dimmed()
        ));
    }
    Ok(lines.join("\n"))
}

/// `OID = TYPE: value` lines, as net-snmp prints them
pub fn render_bindings(bindings: &[VarBind], as_json: bool) -> Result<String> {
    if as_json {
        return Ok(serde_json::to_string_pretty(bindings)?);
    }
    Ok(bindings
        .iter()
        .map(|binding| format!("{} = {}", binding.oid.to_string().cyan(), binding.value))
        .collect::<Vec<_>>()
        .join("\n"))
}
