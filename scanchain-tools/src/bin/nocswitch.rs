//! NoC switch daemon.
//!
//! Shares one hardware-side bridge among any number of TCP clients, each
//! of which gets its own ephemeral endpoint address.

use std::net::TcpStream;

use anyhow::Context;
use clap::Parser;
use scanchain_noc::switch::{self, NocSwitch, SwitchConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nocswitch", about = "NoC switch daemon")]
struct Args {
    /// Address to listen on for clients.
    #[arg(long, default_value = "127.0.0.1")]
    listen: String,

    /// TCP port to listen on for clients.
    #[arg(long, default_value_t = switch::DEFAULT_PORT)]
    port: u16,

    /// Bridge endpoint as HOST:PORT (a simulator or hardware relay
    /// speaking the tagged frame format).
    #[arg(long, conflicts_with = "loopback")]
    bridge: Option<String>,

    /// Use the built-in loopback bridge (frames reflect with from/to
    /// swapped) instead of a real one.
    #[arg(long)]
    loopback: bool,

    /// Per-client outbound queue depth.
    #[arg(long, default_value_t = 64)]
    queue_depth: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let bridge = match (&args.bridge, args.loopback) {
        (Some(addr), _) => {
            let stream = TcpStream::connect(addr)
                .with_context(|| format!("connecting to bridge {addr}"))?;
            tracing::info!("bridge connected to {addr}");
            switch::tcp_bridge(stream)?
        }
        (None, true) => {
            tracing::info!("using loopback bridge");
            switch::loopback_bridge()
        }
        (None, false) => {
            anyhow::bail!("either --bridge HOST:PORT or --loopback is required");
        }
    };

    let config = SwitchConfig {
        client_queue_depth: args.queue_depth,
        ..SwitchConfig::default()
    };
    let server = NocSwitch::bind((args.listen.as_str(), args.port), bridge, config)
        .context("binding nocswitch listener")?;
    tracing::info!("nocswitch listening on {}", server.local_addr()?);
    server.run()?;
    Ok(())
}
