//! Command-line client for a jtagd server.
//!
//! Connects, walks the scan chain, and runs exactly one of the mode
//! operations against a device index. Exit code is 0 on success and 1 on
//! any reported error.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{ArgGroup, Parser};
use scanchain::adapter::network::NetworkedAdapter;
use scanchain::adapter::protocol;
use scanchain::chain::ScanChain;
use scanchain::device::{Debuggable, IndirectOptions, Programmable, ProgramOptions};
use scanchain::image::FirmwareImage;
use scanchain::Error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jtagclient", about = "JTAG programming client")]
#[command(group = ArgGroup::new("mode")
    .required(true)
    .args(["info", "erase", "program", "dump", "reboot"]))]
struct Args {
    /// Hostname of the jtagd server.
    #[arg(long, default_value = "localhost")]
    server: String,

    /// Port of the jtagd server.
    #[arg(long, default_value_t = protocol::DEFAULT_PORT)]
    port: u16,

    /// Display information about the device at the given index.
    #[arg(long, value_name = "INDEX")]
    info: Option<usize>,

    /// Erase the device at the given index.
    #[arg(long, value_name = "INDEX")]
    erase: Option<usize>,

    /// Program the device at the given index with the supplied image.
    #[arg(long, num_args = 2, value_names = ["INDEX", "FILE"])]
    program: Option<Vec<String>>,

    /// Read the device (or attached flash) content back into a file.
    #[arg(long, num_args = 2, value_names = ["INDEX", "FILE"])]
    dump: Option<Vec<String>>,

    /// Restart configuration of the device at the given index.
    #[arg(long, value_name = "INDEX")]
    reboot: Option<usize>,

    /// Use indirect flash programming with the given bus width.
    #[arg(long, value_name = "WIDTH")]
    indirect: Option<u8>,

    /// Bounce bitstream for indirect access.
    #[arg(long, value_name = "FILE")]
    indirect_image: Option<PathBuf>,

    /// Load the image at this flash byte address (hex).
    #[arg(long, value_name = "HEX", default_value = "0")]
    base: String,

    /// Skip the reconfiguration normally issued after indirect
    /// programming.
    #[arg(long)]
    noreboot: bool,

    /// Treat the image file as raw data instead of parsing it.
    #[arg(long)]
    raw: bool,
}

impl Args {
    fn program_options(&self) -> anyhow::Result<ProgramOptions> {
        let indirect = match self.indirect {
            None => None,
            Some(width) => Some(IndirectOptions {
                bus_width: width,
                base_address: u32::from_str_radix(self.base.trim_start_matches("0x"), 16)
                    .context("parsing --base")?,
                reboot: !self.noreboot,
                bounce_image: self.indirect_image.clone(),
            }),
        };
        Ok(ProgramOptions { indirect })
    }
}

fn print_info(chain: &mut ScanChain, index: usize) -> anyhow::Result<()> {
    let device = chain.device(index)?.clone();
    println!("{index:2}: {}", device.description());

    if let Some(driver) = device.programmable() {
        println!("    Device is programmable");
        match driver.is_programmed(chain) {
            Ok(true) => println!("    Device is configured"),
            Ok(false) => println!("    Device is blank"),
            Err(Error::Unimplemented(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    if let Some(debug) = device.debuggable() {
        println!("    Device is a debug interface");
        println!("    {} targets present", debug.target_count());
        for i in 0..debug.target_count() {
            println!("        {i}: {}", debug.target_description(i));
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let adapter = NetworkedAdapter::connect((args.server.as_str(), args.port))
        .with_context(|| format!("connecting to jtagd at {}:{}", args.server, args.port))?;
    let mut chain = ScanChain::new(Box::new(adapter));
    chain.initialize().context("initializing scan chain")?;
    println!("Found {} device(s)", chain.device_count());

    if let Some(index) = args.info {
        print_info(&mut chain, index)?;
    } else if let Some(index) = args.erase {
        let device = chain.device(index)?.clone();
        let Some(driver) = device.programmable() else {
            bail!("device {index} is not programmable");
        };
        driver.erase(&mut chain)?;
        println!("Erased device {index}");
    } else if let Some(mode) = &args.program {
        let index: usize = mode[0].parse().context("parsing device index")?;
        let path = PathBuf::from(&mode[1]);
        let image = if args.raw {
            FirmwareImage::load_raw(&path)?
        } else {
            FirmwareImage::load(&path)?
        };
        let options = args.program_options()?;
        let device = chain.device(index)?.clone();
        let Some(driver) = device.programmable() else {
            bail!("device {index} is not programmable");
        };
        driver.program(&mut chain, &image, &options)?;
        println!("Programmed device {index}");
    } else if let Some(mode) = &args.dump {
        let index: usize = mode[0].parse().context("parsing device index")?;
        let path = PathBuf::from(&mode[1]);
        let options = args.program_options()?;
        let device = chain.device(index)?.clone();
        let Some(driver) = device.programmable() else {
            bail!("device {index} is not programmable");
        };
        let data = driver.dump(&mut chain, &options)?;
        std::fs::write(&path, &data)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Dumped {} bytes from device {index}", data.len());
    } else if let Some(index) = args.reboot {
        let device = chain.device(index)?.clone();
        let Some(driver) = device.programmable() else {
            bail!("device {index} is not programmable");
        };
        driver.reboot(&mut chain)?;
        println!("Rebooted device {index}");
    }

    Ok(())
}
