//! Signing tool for MIPS executables.
//!
//! Verify-only by default; `--sign` patches the computed signature into
//! the file. Exit code is 0 on success and 1 on any reported error.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use elfsign::{derive_key, examine, sign_in_place, SignatureState};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "elfsign", about = "ELF image signing tool")]
struct Args {
    /// Executable to verify or sign.
    file: PathBuf,

    /// Signing password; the HMAC key is its SHA-512.
    #[arg(long)]
    password: String,

    /// Replace the signature with the computed value.
    #[arg(long)]
    sign: bool,

    /// Print the canonical data being hashed.
    #[arg(long)]
    debug: bool,
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let key = derive_key(&args.password);

    let mut data = std::fs::read(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    println!("File opened, length is {} bytes", data.len());

    let info = examine(&data, &key)?;
    if args.debug {
        println!("Signature region at file offset 0x{:x}", info.offset);
    }
    println!("Expected signature: {}", hex(&info.expected));
    println!("Actual signature:   {}", hex(&info.current));
    match info.state {
        SignatureState::Unsigned => println!("File is currently not signed"),
        SignatureState::Valid => println!("Valid signature"),
        SignatureState::Invalid => println!("Invalid signature"),
    }

    if args.sign {
        println!("Replacing signature with expected value");
        sign_in_place(&mut data, &key)?;
        std::fs::write(&args.file, &data)
            .with_context(|| format!("writing {}", args.file.display()))?;
    }

    Ok(())
}
