//! Adapter-sharing daemon.
//!
//! Serves one programming adapter to any number of TCP clients speaking
//! the jtagd opcode protocol. Physical USB adapters attach through their
//! own vendor front-ends; this binary drives the built-in emulation,
//! which is enough for protocol development and CI.

use anyhow::Context;
use clap::Parser;
use scanchain::adapter::emulated::EmulatedAdapter;
use scanchain_tools::jtagd::JtagdServer;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jtagd", about = "JTAG adapter sharing daemon")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    listen: String,

    /// TCP port to listen on.
    #[arg(long, default_value_t = scanchain::adapter::protocol::DEFAULT_PORT)]
    port: u16,

    /// Adapter name reported to clients.
    #[arg(long, default_value = "emulated adapter")]
    name: String,

    /// Adapter serial number reported to clients.
    #[arg(long, default_value = "EMU-0001")]
    serial: String,

    /// Add a Spartan-6 device model (with attached SPI flash) to the
    /// emulated chain. May be repeated; IDCODE in hex.
    #[arg(long = "spartan6", value_parser = parse_hex32)]
    spartan6: Vec<u32>,

    /// Add a generic device to the emulated chain as IDCODE:IRLEN
    /// (IDCODE in hex). May be repeated.
    #[arg(long = "tap", value_parser = parse_tap)]
    taps: Vec<(u32, usize)>,

    /// Emulated flash size in bytes (power of two).
    #[arg(long, default_value_t = 2 * 1024 * 1024)]
    flash_size: usize,

    /// Number of emulated GPIO pins.
    #[arg(long, default_value_t = 0)]
    gpio: usize,
}

fn parse_hex32(s: &str) -> Result<u32, String> {
    u32::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

fn parse_tap(s: &str) -> Result<(u32, usize), String> {
    let (idcode, ir_len) = s
        .split_once(':')
        .ok_or_else(|| "expected IDCODE:IRLEN".to_string())?;
    Ok((
        parse_hex32(idcode)?,
        ir_len.parse::<usize>().map_err(|e| e.to_string())?,
    ))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut adapter = EmulatedAdapter::new(&args.name, &args.serial);
    if args.gpio > 0 {
        adapter = adapter.with_gpio(args.gpio);
    }
    for idcode in &args.spartan6 {
        adapter.push_spartan6_tap(*idcode, args.flash_size);
    }
    for (idcode, ir_len) in &args.taps {
        adapter.push_generic_tap(*idcode, *ir_len);
    }
    if args.spartan6.is_empty() && args.taps.is_empty() {
        // Default chain: one Spartan-6 LX25.
        adapter.push_spartan6_tap(0x24004093, args.flash_size);
    }

    let server = JtagdServer::bind((args.listen.as_str(), args.port), Box::new(adapter))
        .context("binding jtagd listener")?;
    tracing::info!("jtagd listening on {}", server.local_addr()?);
    server.run()?;
    Ok(())
}
