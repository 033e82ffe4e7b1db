//! Microchip PIC32 support.
//!
//! The MTAP (Microchip TAP) sits behind a 5-bit IR; configuration commands
//! travel as 8-bit DR scans once MTAP_COMMAND is loaded. Only
//! identification and bulk erase are wired up; flash row programming goes
//! through the ETAP and is not built.

use crate::chain::ScanChain;
use crate::device::{DeviceKind, IdCode, Programmable, ProgramOptions};
use crate::image::FirmwareImage;
use crate::{Error, Result};

pub const IR_LENGTH: usize = 5;

pub const IR_MTAP_IDCODE: u8 = 0x01;
pub const IR_MTAP_SW_MTAP: u8 = 0x04;
pub const IR_MTAP_SW_ETAP: u8 = 0x05;
pub const IR_MTAP_COMMAND: u8 = 0x07;

pub const MCHP_STATUS: u8 = 0x00;
pub const MCHP_ASSERT_RST: u8 = 0xD1;
pub const MCHP_DE_ASSERT_RST: u8 = 0xD0;
pub const MCHP_ERASE: u8 = 0xFC;

/// MCHP_STATUS flag: config is ready to read.
pub const STATUS_CFGRDY: u8 = 1 << 3;
/// MCHP_STATUS flag: flash controller busy.
pub const STATUS_FCBUSY: u8 = 1 << 2;

/// Status polls before a bulk erase is declared stuck.
const ERASE_POLL_LIMIT: usize = 500;

/// PIC32 device groups, keyed off the high part-number byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pic32Part {
    Mx1xx,
    Mx2xx,
    Unknown(u16),
}

impl std::fmt::Display for Pic32Part {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pic32Part::Mx1xx => write!(f, "PIC32MX1xx"),
            Pic32Part::Mx2xx => write!(f, "PIC32MX2xx"),
            Pic32Part::Unknown(part) => write!(f, "unknown PIC32 (part 0x{part:04x})"),
        }
    }
}

pub(crate) fn identify(idcode: IdCode) -> DeviceKind {
    let part = idcode.part_number();
    let kind = match part >> 8 {
        0x4A => Pic32Part::Mx1xx,
        0x4D => Pic32Part::Mx2xx,
        _ => Pic32Part::Unknown(part),
    };
    DeviceKind::Pic32(kind)
}

/// Programming driver for PIC32.
#[derive(Debug, Clone)]
pub struct Pic32Driver {
    part: Pic32Part,
    position: usize,
}

impl Pic32Driver {
    pub(crate) fn new(part: Pic32Part, position: usize) -> Self {
        Pic32Driver { part, position }
    }

    fn set_ir(&self, chain: &mut ScanChain, instruction: u8) -> Result<()> {
        chain.set_ir(self.position, &[instruction], IR_LENGTH)
    }

    /// Sends one 8-bit MTAP command and returns the captured response.
    fn mtap_command(&self, chain: &mut ScanChain, command: u8) -> Result<u8> {
        let mut response = [0u8; 1];
        chain.scan_dr(self.position, &[command], Some(&mut response), 8)?;
        Ok(response[0])
    }

    fn read_status(&self, chain: &mut ScanChain) -> Result<u8> {
        self.mtap_command(chain, MCHP_STATUS)
    }
}

impl Programmable for Pic32Driver {
    fn is_programmed(&self, _chain: &mut ScanChain) -> Result<bool> {
        Err(Error::Unimplemented(
            "flash content readout is not implemented for PIC32".to_string(),
        ))
    }

    fn program(
        &self,
        _chain: &mut ScanChain,
        _image: &FirmwareImage,
        _options: &ProgramOptions,
    ) -> Result<()> {
        Err(Error::Unimplemented(
            "PIC32 flash programming is not implemented".to_string(),
        ))
    }

    fn erase(&self, chain: &mut ScanChain) -> Result<()> {
        tracing::info!("bulk erasing {}", self.part);
        self.set_ir(chain, IR_MTAP_SW_MTAP)?;
        self.set_ir(chain, IR_MTAP_COMMAND)?;
        self.mtap_command(chain, MCHP_ERASE)?;

        for _ in 0..ERASE_POLL_LIMIT {
            let status = self.read_status(chain)?;
            if status & STATUS_FCBUSY == 0 && status & STATUS_CFGRDY != 0 {
                return Ok(());
            }
            chain.idle_clocks(1_000)?;
        }
        Err(Error::board_fault(
            "flash controller stayed busy through a bulk erase",
        ))
    }

    fn dump(&self, _chain: &mut ScanChain, _options: &ProgramOptions) -> Result<Vec<u8>> {
        Err(Error::Unimplemented(
            "flash readback is not implemented for PIC32".to_string(),
        ))
    }

    fn reboot(&self, chain: &mut ScanChain) -> Result<()> {
        self.set_ir(chain, IR_MTAP_SW_MTAP)?;
        self.set_ir(chain, IR_MTAP_COMMAND)?;
        self.mtap_command(chain, MCHP_ASSERT_RST)?;
        chain.idle_clocks(1_000)?;
        self.mtap_command(chain, MCHP_DE_ASSERT_RST)?;
        chain.commit()
    }
}
