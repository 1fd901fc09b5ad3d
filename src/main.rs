use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::Parser;
use rand::RngCore;
use tokio::time::{self, Duration};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use xordht::{launch, Contact, NodeId, UdpNetwork};

#[derive(Clone, Debug)]
struct BootstrapPeer {
    addr: SocketAddr,
    id: NodeId,
}

impl FromStr for BootstrapPeer {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr_part, id_part) = s
            .rsplit_once('/')
            .context("bootstrap peer must include a node id (format: IP:PORT/HEXID)")?;

        let addr: SocketAddr = addr_part.parse().context("invalid socket address")?;

        let id_bytes = hex::decode(id_part).context("invalid hex node id")?;
        if id_bytes.len() != 32 {
            anyhow::bail!("node id must be 64 hex characters (32 bytes)");
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(&id_bytes);

        Ok(BootstrapPeer { addr, id })
    }
}

#[derive(Parser, Debug)]
#[command(name = "xordht")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the UDP transport to.
    #[arg(short, long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,

    /// Known peers to bootstrap from, as IP:PORT/HEXID.
    #[arg(short = 'B', long = "bootstrap", value_name = "PEER")]
    bootstrap: Vec<BootstrapPeer>,

    /// Seconds between stats log lines.
    #[arg(short, long, default_value = "300")]
    stats_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mut id = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut id);

    let (network, inbound) = UdpNetwork::bind(args.bind, id).await?;
    let me = network.contact();
    info!(addr = %me.addr, id = %hex::encode(me.id), "node starting");

    let seeds: Vec<Contact> = args
        .bootstrap
        .iter()
        .map(|peer| Contact {
            id: peer.id,
            addr: peer.addr,
        })
        .collect();

    let node = launch(me, &seeds, network, inbound)?;

    let mut ticker = time::interval(Duration::from_secs(args.stats_interval));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal, exiting");
                break;
            }
            _ = ticker.tick() => {
                let stats = node.stats().await;
                info!(
                    contacts = stats.contacts,
                    stored_items = stats.stored_items,
                    "stats"
                );
            }
        }
    }

    Ok(())
}
