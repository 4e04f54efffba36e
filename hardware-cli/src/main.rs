// SPDX-License-Identifier: GPL-3.0-only

//! `lsdev`: list devices, capabilities and properties, and drive
//! mount/unmount/eject from the command line.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use hardware_dbus::{Device, Filter, HardwareManager, Query, Udi};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "lsdev", version, about = "Inspect and operate hardware devices")]
struct Args {
    /// List every device with its vendor and product strings
    #[arg(long)]
    list: bool,

    /// List every device together with its capability set
    #[arg(long)]
    list_capabilities: bool,

    /// List every device together with all of its properties
    #[arg(long)]
    list_properties: bool,

    /// Print the capabilities of one device
    #[arg(long, value_name = "UDI")]
    capabilities: Option<String>,

    /// Print the properties of one device
    #[arg(long, value_name = "UDI")]
    properties: Option<String>,

    /// List devices matching a query expression,
    /// e.g. 'capability.battery == true'
    #[arg(long, value_name = "EXPR")]
    query: Option<String>,

    /// Restrict --query to children of this device
    #[arg(long, value_name = "UDI", requires = "query")]
    parent: Option<String>,

    /// Mount the device's filesystem
    #[arg(long, value_name = "UDI")]
    mount: Option<String>,

    /// Unmount the device's filesystem
    #[arg(long, value_name = "UDI")]
    unmount: Option<String>,

    /// Eject the device's medium
    #[arg(long, value_name = "UDI")]
    eject: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let outcome = async {
        let connection = zbus::Connection::system()
            .await
            .context("connecting to the system bus")?;
        let manager = HardwareManager::with_system_defaults(connection).await?;
        run(args, &manager).await
    }
    .await;

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("lsdev: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, manager: &HardwareManager) -> anyhow::Result<()> {
    if args.list {
        for device in manager.all_devices().await? {
            println!(
                "{}  {} {}",
                device.udi(),
                device.vendor().await?,
                device.product().await?
            );
        }
    }

    if args.list_capabilities {
        for device in manager.all_devices().await? {
            println!("{}  {}", device.udi(), capability_line(&device).await?);
        }
    }

    if args.list_properties {
        for device in manager.all_devices().await? {
            println!("{}", device.udi());
            print_properties(&device).await?;
        }
    }

    if let Some(udi) = &args.capabilities {
        let device = manager.device(&Udi::new(udi)).await?;
        for capability in device.capabilities().await? {
            println!("{capability}");
        }
    }

    if let Some(udi) = &args.properties {
        let device = manager.device(&Udi::new(udi)).await?;
        print_properties(&device).await?;
    }

    if let Some(expr) = &args.query {
        let query = Query::parse(expr)?;
        let mut filter = Filter::all().with_query(query);
        if let Some(parent) = &args.parent {
            filter = filter.with_parent(Udi::new(parent));
        }
        for device in manager.find_devices(&filter).await? {
            println!("{}", device.udi());
        }
    }

    if let Some(udi) = &args.mount {
        debug!(%udi, "mounting");
        let device = manager.device(&Udi::new(udi)).await?;
        device.setup().await?;
    }

    if let Some(udi) = &args.unmount {
        debug!(%udi, "unmounting");
        let device = manager.device(&Udi::new(udi)).await?;
        device.teardown().await?;
    }

    if let Some(udi) = &args.eject {
        debug!(%udi, "ejecting");
        let device = manager.device(&Udi::new(udi)).await?;
        device.eject().await?;
    }

    Ok(())
}

async fn capability_line(device: &Device) -> anyhow::Result<String> {
    let names: Vec<&str> = device
        .capabilities()
        .await?
        .into_iter()
        .map(|capability| capability.as_str())
        .collect();
    Ok(names.join(", "))
}

async fn print_properties(device: &Device) -> anyhow::Result<()> {
    let props = device.all_properties().await?;
    let mut keys: Vec<_> = props.keys().collect();
    keys.sort();
    for key in keys {
        if let Some(value) = props.get(key) {
            println!("  {key} = {value}");
        }
    }
    Ok(())
}
