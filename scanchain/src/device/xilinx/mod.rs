//! Xilinx FPGA and CPLD families.
//!
//! The FPGA families (Spartan-3A, Spartan-6, 7-series) share one
//! configuration flow and differ only in their instruction encodings and
//! timing; [`FpgaDriver`] is the common driver parameterized by a
//! per-family [`ConfigSequence`]. CoolRunner-II is fuse-based and has its
//! own driver in [`coolrunner2`].

use crate::bits;
use crate::chain::ScanChain;
use crate::device::{DeviceKind, IdCode, IndirectOptions, Programmable, ProgramOptions};
use crate::flash;
use crate::image::FirmwareImage;
use crate::{Error, Result};

pub mod coolrunner2;
pub mod series7;
pub mod spartan3a;
pub mod spartan6;

pub use coolrunner2::CoolRunner2Part;

/// Instruction encodings and timing of one FPGA family's configuration
/// logic.
#[derive(Debug)]
pub struct ConfigSequence {
    pub ir_length: usize,
    pub user1: u8,
    pub user2: u8,
    pub cfg_out: u8,
    pub cfg_in: u8,
    pub jprogram: u8,
    pub jstart: u8,
    pub isc_enable: u8,
    pub isc_disable: u8,
    pub bypass: u8,
    /// Idle clocks after JPROGRAM while the configuration memory clears.
    pub clear_clocks: usize,
    /// Idle clocks after JSTART for the startup sequence.
    pub startup_clocks: usize,
    /// Number of status-poll bursts before giving up on DONE.
    pub done_poll_bursts: usize,
    /// Idle clocks between status polls.
    pub done_poll_idle: usize,
    /// DONE flag in the status word.
    pub stat_done: u32,
}

/// A decoded Xilinx FPGA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FpgaFamily {
    Spartan3a(spartan3a::Spartan3aPart),
    Spartan6(spartan6::Spartan6Part),
    Series7(series7::Series7Part),
}

impl FpgaFamily {
    pub fn ir_length(&self) -> usize {
        self.sequence().ir_length
    }

    pub(crate) fn sequence(&self) -> &'static ConfigSequence {
        match self {
            FpgaFamily::Spartan3a(_) => &spartan3a::SEQUENCE,
            FpgaFamily::Spartan6(_) => &spartan6::SEQUENCE,
            FpgaFamily::Series7(_) => &series7::SEQUENCE,
        }
    }
}

impl std::fmt::Display for FpgaFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FpgaFamily::Spartan3a(part) => write!(f, "{part} (Spartan-3A)"),
            FpgaFamily::Spartan6(part) => write!(f, "{part} (Spartan-6)"),
            FpgaFamily::Series7(part) => write!(f, "{part} (7 series)"),
        }
    }
}

/// Dispatches a Xilinx IDCODE to its family.
pub(crate) fn identify(idcode: IdCode) -> DeviceKind {
    let part = idcode.part_number();
    if part >> 8 == 0x22 {
        DeviceKind::XilinxFpga(FpgaFamily::Spartan3a(spartan3a::Spartan3aPart::from_part(
            part,
        )))
    } else if part >> 12 == 0x3 {
        DeviceKind::XilinxFpga(FpgaFamily::Series7(series7::Series7Part::from_part(part)))
    } else if part >> 12 == 0x4 {
        DeviceKind::XilinxFpga(FpgaFamily::Spartan6(spartan6::Spartan6Part::from_part(
            part,
        )))
    } else if part >> 8 == 0x6E {
        DeviceKind::XilinxCpld(CoolRunner2Part::from_part(part))
    } else {
        tracing::warn!("Xilinx part 0x{part:04x} not recognized ({idcode})");
        DeviceKind::Generic
    }
}

/// Programming driver shared by the SRAM-based FPGA families.
#[derive(Debug, Clone)]
pub struct FpgaDriver {
    family: FpgaFamily,
    position: usize,
}

impl FpgaDriver {
    pub(crate) fn new(family: FpgaFamily, position: usize) -> Self {
        FpgaDriver { family, position }
    }

    fn seq(&self) -> &'static ConfigSequence {
        self.family.sequence()
    }

    fn set_ir(&self, chain: &mut ScanChain, instruction: u8) -> Result<()> {
        chain.set_ir(self.position, &[instruction], self.seq().ir_length)
    }

    /// Reads the configuration status register through CFG_OUT.
    pub(crate) fn read_status(&self, chain: &mut ScanChain) -> Result<u32> {
        self.set_ir(chain, self.seq().cfg_out)?;
        let mut word = [0u8; 4];
        chain.scan_dr(self.position, &[0u8; 4], Some(&mut word), 32)?;
        Ok(u32::from_le_bytes(word))
    }

    /// Downloads a raw configuration payload and starts the device up.
    pub(crate) fn configure(&self, chain: &mut ScanChain, payload: &[u8]) -> Result<()> {
        let seq = self.seq();

        tracing::debug!("clearing configuration memory");
        self.set_ir(chain, seq.jprogram)?;
        chain.idle_clocks(seq.clear_clocks)?;

        self.set_ir(chain, seq.isc_enable)?;
        chain.idle_clocks(64)?;

        // The configuration logic wants the bitstream MSB-first.
        let mut reversed = payload.to_vec();
        bits::reverse_bits(&mut reversed);

        tracing::debug!("shifting {} bitstream bytes into CFG_IN", payload.len());
        self.set_ir(chain, seq.cfg_in)?;
        chain.scan_dr_deferred(self.position, &reversed, reversed.len() * 8)?;

        self.set_ir(chain, seq.jstart)?;
        chain.idle_clocks_deferred(seq.startup_clocks)?;
        self.set_ir(chain, seq.bypass)?;
        chain.commit()?;

        self.wait_for_done(chain)
    }

    fn wait_for_done(&self, chain: &mut ScanChain) -> Result<()> {
        let seq = self.seq();
        for _ in 0..seq.done_poll_bursts {
            let status = self.read_status(chain)?;
            if status == 0xFFFF_FFFF {
                return Err(Error::board_fault(
                    "status register reads all ones, possible board fault",
                ));
            }
            if status & seq.stat_done != 0 {
                tracing::info!("DONE asserted, device is up");
                return Ok(());
            }
            chain.idle_clocks(seq.done_poll_idle)?;
        }
        Err(Error::board_fault(
            "DONE did not assert within the configured idle-clock budget",
        ))
    }

    fn payload_of<'a>(&self, image: &'a FirmwareImage) -> Result<&'a [u8]> {
        match image {
            FirmwareImage::Bit(bit) => {
                tracing::info!(
                    "design {} for {} ({} {})",
                    bit.design_name,
                    bit.part_name,
                    bit.date,
                    bit.time
                );
                Ok(&bit.payload)
            }
            FirmwareImage::Raw(data) => Ok(data),
            FirmwareImage::Jed(_) => Err(Error::gigo(
                "JED fuse images target CPLDs, not FPGA configuration",
            )),
        }
    }

    fn flash_access<'c>(
        &self,
        chain: &'c mut ScanChain,
        options: &IndirectOptions,
    ) -> Result<flash::FlashAccess<'c>> {
        match options.bus_width {
            1 | 2 | 4 => {}
            8 | 16 => {
                return Err(Error::Unimplemented(
                    "BPI flash programming is not implemented".to_string(),
                ))
            }
            other => return Err(Error::gigo(format!("invalid flash bus width {other}"))),
        }

        let bounce_path = options.bounce_image.as_ref().ok_or_else(|| {
            Error::gigo("indirect programming requires a bounce bitstream image")
        })?;
        let bounce = FirmwareImage::load(bounce_path)?;
        let payload = self.payload_of(&bounce)?.to_vec();
        self.configure(&mut *chain, &payload)?;

        Ok(flash::FlashAccess::new(
            chain,
            self.position,
            self.seq().user1,
            self.seq().user2,
            self.seq().ir_length,
        ))
    }
}

impl Programmable for FpgaDriver {
    fn is_programmed(&self, chain: &mut ScanChain) -> Result<bool> {
        let status = self.read_status(chain)?;
        Ok(status != 0xFFFF_FFFF && status & self.seq().stat_done != 0)
    }

    fn program(
        &self,
        chain: &mut ScanChain,
        image: &FirmwareImage,
        options: &ProgramOptions,
    ) -> Result<()> {
        let payload = self.payload_of(image)?.to_vec();
        match &options.indirect {
            None => self.configure(chain, &payload),
            Some(indirect) => {
                let base = indirect.base_address;
                let mut access = self.flash_access(&mut *chain, indirect)?;
                access.program_and_verify(base, &payload)?;
                drop(access);
                if indirect.reboot {
                    tracing::info!("rebooting FPGA from the freshly written flash");
                    self.reboot(chain)?;
                }
                Ok(())
            }
        }
    }

    fn erase(&self, chain: &mut ScanChain) -> Result<()> {
        let seq = self.seq();
        self.set_ir(chain, seq.jprogram)?;
        chain.idle_clocks(seq.clear_clocks)?;
        self.set_ir(chain, seq.bypass)?;
        chain.commit()?;

        let status = self.read_status(chain)?;
        if status != 0xFFFF_FFFF && status & seq.stat_done != 0 {
            return Err(Error::board_fault("device still configured after erase"));
        }
        Ok(())
    }

    fn dump(&self, chain: &mut ScanChain, options: &ProgramOptions) -> Result<Vec<u8>> {
        let Some(indirect) = &options.indirect else {
            return Err(Error::Unimplemented(
                "configuration readback is not implemented; dump requires indirect flash access"
                    .to_string(),
            ));
        };
        let base = indirect.base_address;
        let mut access = self.flash_access(chain, indirect)?;
        access.dump_from(base)
    }

    fn reboot(&self, chain: &mut ScanChain) -> Result<()> {
        let seq = self.seq();
        self.set_ir(chain, seq.jprogram)?;
        chain.idle_clocks(seq.clear_clocks)?;
        self.set_ir(chain, seq.bypass)?;
        chain.commit()
    }
}
