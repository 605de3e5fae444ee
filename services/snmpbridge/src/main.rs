//! SNMP-Modbus bridge command line

use clap::Parser;
use common::service_bootstrap::{init_logging, print_startup_banner};
use common::ServiceInfo;
use snmpbridge::cli::{run, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.service.no_color {
        colored::control::set_override(false);
    }

    let service = ServiceInfo::new(
        "snmpbridge",
        env!("CARGO_PKG_VERSION"),
        "SNMP to Modbus bridge",
    );
    init_logging(&service, &cli.service)?;
    print_startup_banner(&service);

    // anyhow reports the error chain on exit
    run(cli).await
}
