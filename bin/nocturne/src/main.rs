//! The nocturne darknode binary.
//!
//! `nocturne run` starts a darknode from a TOML config. The remaining
//! subcommands administer the darknode registry through the configured
//! ledger: register, deregister, approve, refund, epoch, checkreg, pool,
//! and status.

use std::path::PathBuf;
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use clap::{Parser, Subcommand};
use eyre::{bail, WrapErr};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use nocturne_ledger::{Ledger, MemoryLedger, RegistryAdmin};
use nocturne_node::{Config, Darknode};
use nocturne_smpc::MemoryTransport;

#[derive(Debug, Parser)]
#[command(name = "nocturne", about = "A darknode for the nocturne dark pool")]
struct Cli {
    /// Path to the darknode configuration.
    #[arg(long, global = true, default_value = "nocturne.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the darknode.
    Run,

    /// Approve bond tokens for darknode registrations.
    Approve {
        darknodes: Vec<Address>,
        #[arg(long)]
        amount: u64,
    },

    /// Register darknodes in the registry.
    Register {
        darknodes: Vec<Address>,
        #[arg(long, default_value_t = 100_000)]
        bond: u64,
    },

    /// Deregister darknodes from the registry.
    Deregister { darknodes: Vec<Address> },

    /// Refund the bond of deregistered darknodes.
    Refund { darknodes: Vec<Address> },

    /// Trigger an epoch transition.
    Epoch,

    /// Check whether darknodes are registered.
    Checkreg { darknodes: Vec<Address> },

    /// Print the pod index of a darknode, or -1 if it is in no pod.
    Pool { darknode: Address },

    /// Print the ledger status of an order.
    Status { order_id: B256 },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .wrap_err_with(|| format!("failed to load config {}", cli.config.display()))?;
    let ledger = connect_ledger(&config)?;

    match cli.command {
        Command::Run => run(config, ledger).await,

        Command::Approve { darknodes, amount } => {
            for darknode in darknodes {
                ledger.approve(darknode, amount).await?;
                println!("approved {amount} for {darknode}");
            }
            Ok(())
        }

        Command::Register { darknodes, bond } => {
            for darknode in darknodes {
                ledger.register(darknode, bond, Vec::new()).await?;
                println!("registered {darknode}");
            }
            Ok(())
        }

        Command::Deregister { darknodes } => {
            for darknode in darknodes {
                ledger.deregister(darknode).await?;
                println!("deregistered {darknode}");
            }
            Ok(())
        }

        Command::Refund { darknodes } => {
            for darknode in darknodes {
                ledger.refund(darknode).await?;
                println!("refunded {darknode}");
            }
            Ok(())
        }

        Command::Epoch => {
            let epoch = ledger.trigger_epoch().await?;
            println!("epoch {} at block {}", epoch.hash, epoch.block_number);
            Ok(())
        }

        Command::Checkreg { darknodes } => {
            for darknode in darknodes {
                let registered = ledger.is_registered(darknode).await?;
                println!("{darknode}: {}", if registered { "registered" } else { "not registered" });
            }
            Ok(())
        }

        Command::Pool { darknode } => {
            let epoch = ledger.epoch().await?;
            match epoch.pod(darknode) {
                Ok(pod) => println!("{}", pod.position),
                Err(_) => println!("-1"),
            }
            Ok(())
        }

        Command::Status { order_id } => {
            let status = ledger.status(order_id).await?;
            println!("{status:?}");
            Ok(())
        }
    }
}

/// Builds the ledger named by the config. The in-process memory ledger is
/// the only endpoint this binary carries; chain endpoints are provided by
/// the deployment's binding layer.
fn connect_ledger(config: &Config) -> eyre::Result<Arc<MemoryLedger>> {
    match config.ledger.endpoint.as_str() {
        "memory" => Ok(Arc::new(MemoryLedger::new(config.ledger.pod_size))),
        endpoint => bail!("unsupported ledger endpoint {endpoint:?} (expected \"memory\")"),
    }
}

async fn run(config: Config, ledger: Arc<MemoryLedger>) -> eyre::Result<()> {
    let signer = config.load_signer().wrap_err("failed to load signing key")?;
    let transport = Arc::new(MemoryTransport::new());

    let darknode = Darknode::new(
        config,
        signer,
        Arc::clone(&ledger) as Arc<dyn Ledger>,
        Arc::clone(&transport),
    );
    let inbound = transport.register(darknode.address());
    tracing::info!(address = %darknode.address(), "starting darknode");

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
            shutdown.cancel();
        }
    });

    darknode.run(cancel, inbound).await?;
    Ok(())
}
