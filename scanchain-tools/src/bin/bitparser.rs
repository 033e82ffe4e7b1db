//! Firmware image inspector.
//!
//! Parses a `.bit` or `.jed` file and prints its header and geometry
//! without touching any hardware.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use scanchain::image::FirmwareImage;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bitparser", about = "Firmware image inspector")]
struct Args {
    /// Image file to inspect (.bit or .jed).
    file: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let image = FirmwareImage::load(&args.file)
        .with_context(|| format!("parsing {}", args.file.display()))?;

    match image {
        FirmwareImage::Bit(bit) => {
            println!("Bitstream image");
            println!("    Design name:  {}", bit.design_name);
            println!("    Part:         {}", bit.part_name);
            println!("    Built:        {} {}", bit.date, bit.time);
            println!("    Payload:      {} bytes", bit.payload.len());
        }
        FirmwareImage::Jed(jed) => {
            println!("JED fuse image");
            if !jed.header_comment.is_empty() {
                println!("    Header:        {}", jed.header_comment);
            }
            if let Some(device) = &jed.device_name {
                println!("    Device:        {device}");
            }
            println!("    Fuses:         {}", jed.fuse_count());
            println!("    Pins:          {}", jed.pin_count);
            println!("    Fuse checksum: 0x{:04X}", jed.fuse_checksum());
            println!("    File checksum: 0x{:04X}", jed.file_checksum());
        }
        FirmwareImage::Raw(data) => {
            println!("Raw image, {} bytes", data.len());
        }
    }
    Ok(())
}
