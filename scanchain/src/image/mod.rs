//! Firmware image containers.
//!
//! Two real formats plus a raw escape hatch: Xilinx `.bit` for FPGA
//! configuration and JEDEC-3C `.jed` for CPLD fuse maps.

use std::path::Path;

use crate::{Error, Result};

pub mod bit;
pub mod jed;

pub use bit::BitFile;
pub use jed::JedFile;

/// A parsed firmware image ready to hand to a programming driver.
#[derive(Debug, Clone, PartialEq)]
pub enum FirmwareImage {
    Bit(BitFile),
    Jed(JedFile),
    /// Unframed configuration data, shifted as-is.
    Raw(Vec<u8>),
}

impl FirmwareImage {
    /// Loads and parses an image file, picking the codec by extension.
    ///
    /// Unknown extensions load as [`FirmwareImage::Raw`].
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("bit") => Ok(FirmwareImage::Bit(BitFile::parse(&data)?)),
            Some("jed") => Ok(FirmwareImage::Jed(JedFile::parse(&data)?)),
            _ => Ok(FirmwareImage::Raw(data)),
        }
    }

    /// Loads a file without any parsing.
    pub fn load_raw(path: &Path) -> Result<Self> {
        Ok(FirmwareImage::Raw(std::fs::read(path)?))
    }

    /// The bytes a programming driver will push at the device.
    pub fn payload(&self) -> Result<&[u8]> {
        match self {
            FirmwareImage::Bit(bit) => Ok(&bit.payload),
            FirmwareImage::Raw(data) => Ok(data),
            FirmwareImage::Jed(_) => Err(Error::gigo(
                "a JED fuse image has no byte payload; it programs fuse rows",
            )),
        }
    }
}
