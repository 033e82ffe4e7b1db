//! IDCODE decoding and the device catalog.
//!
//! Discovery hands every 32-bit IDCODE to [`Device::from_idcode`], which
//! dispatches on the 11-bit JEDEC manufacturer field and then the
//! family-specific part bits. Unknown manufacturers still produce a usable
//! (opaque, shiftable) device.
//!
//! Family behavior hangs off the sum type through small capability traits:
//! [`Programmable`] for configuration/fuse download, [`Debuggable`] for
//! debug ports. A concrete device implements whichever apply.

use bitfield::bitfield;

use crate::chain::ScanChain;
use crate::image::FirmwareImage;
use crate::Result;

pub mod arm;
pub mod microchip;
pub mod xilinx;

/// JEDEC manufacturer ID of Xilinx.
pub const MANUFACTURER_XILINX: u16 = 0x049;
/// JEDEC manufacturer ID of Microchip.
pub const MANUFACTURER_MICROCHIP: u16 = 0x029;
/// JEDEC manufacturer ID of ARM.
pub const MANUFACTURER_ARM: u16 = 0x23B;

bitfield! {
    /// A JTAG IDCODE.
    /// Identifies a particular Test Access Port (TAP) on the scan chain.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct IdCode(u32);
    impl Debug;

    u8;
    /// The stepping / revision.
    pub version, set_version: 31, 28;

    u16;
    /// The part number.
    pub part_number, set_part_number: 27, 12;

    /// The JEDEC JEP-106 Manufacturer ID.
    pub manufacturer, set_manufacturer: 11, 1;

    u8;
    /// The continuation code of the JEDEC JEP-106 Manufacturer ID.
    pub manufacturer_continuation, set_manufacturer_continuation: 11, 8;

    /// The identity code of the JEDEC JEP-106 Manufacturer ID.
    pub manufacturer_identity, set_manufacturer_identity: 7, 1;

    bool;
    /// The least-significant bit. Always set on a real IDCODE.
    pub lsbit, set_lsbit: 0;
}

impl IdCode {
    /// The raw 32-bit word.
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Returns `true` iff the least significant bit is `1` and the 7-bit
    /// identity code is one of the non-reserved values in `[1, 126]`.
    pub fn valid(&self) -> bool {
        self.lsbit() && self.manufacturer() != 0 && self.manufacturer() != 127
    }

    /// The manufacturer name, if JEP-106 knows it.
    pub fn manufacturer_name(&self) -> Option<&'static str> {
        let cc = self.manufacturer_continuation();
        let id = self.manufacturer_identity();
        jep106::JEP106Code::new(cc, id).get()
    }
}

impl std::fmt::Display for IdCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(mfn) = self.manufacturer_name() {
            write!(f, "0x{:08X} ({})", self.0, mfn)
        } else {
            write!(f, "0x{:08X}", self.0)
        }
    }
}

/// Options applying to a programming job.
#[derive(Debug, Clone, Default)]
pub struct ProgramOptions {
    /// Program an attached flash through a bounce bitstream instead of the
    /// device itself.
    pub indirect: Option<IndirectOptions>,
}

/// Options for indirect (off-device flash) programming.
#[derive(Debug, Clone)]
pub struct IndirectOptions {
    /// Flash bus width: 1/2/4 for SPI, 8/16 for BPI.
    pub bus_width: u8,
    /// Byte address the image starts at.
    pub base_address: u32,
    /// Reconfigure the FPGA from the freshly written flash afterwards.
    pub reboot: bool,
    /// Bounce bitstream to load before driving the flash.
    pub bounce_image: Option<std::path::PathBuf>,
}

impl Default for IndirectOptions {
    fn default() -> Self {
        IndirectOptions {
            bus_width: 1,
            base_address: 0,
            reboot: true,
            bounce_image: None,
        }
    }
}

/// A device that can be configured, erased, or have an attached memory
/// programmed.
///
/// Drivers are cheap handles (family constants plus the chain position);
/// all state lives in the [`ScanChain`] they operate on. On failure the
/// target is left fully programmed or erased, never partially programmed.
pub trait Programmable {
    /// Whether the device currently holds a configuration.
    fn is_programmed(&self, chain: &mut ScanChain) -> Result<bool>;

    /// Downloads `image` into the device (or, with
    /// [`ProgramOptions::indirect`], into its attached flash).
    fn program(
        &self,
        chain: &mut ScanChain,
        image: &FirmwareImage,
        options: &ProgramOptions,
    ) -> Result<()>;

    /// Erases the device configuration.
    fn erase(&self, chain: &mut ScanChain) -> Result<()>;

    /// Reads the device (or attached flash) content back.
    fn dump(&self, chain: &mut ScanChain, options: &ProgramOptions) -> Result<Vec<u8>>;

    /// Restarts configuration, booting from the attached memory if any.
    fn reboot(&self, chain: &mut ScanChain) -> Result<()>;
}

/// A device exposing one or more debug targets.
pub trait Debuggable {
    /// Number of debug targets behind this port.
    fn target_count(&self) -> usize;

    /// Human-readable description of target `index`.
    fn target_description(&self, index: usize) -> String;
}

/// Family-specific identity of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceKind {
    /// A Xilinx FPGA (Spartan-3A, Spartan-6 or 7-series).
    XilinxFpga(xilinx::FpgaFamily),
    /// A Xilinx CoolRunner-II CPLD.
    XilinxCpld(xilinx::CoolRunner2Part),
    /// A Microchip PIC32.
    Pic32(microchip::Pic32Part),
    /// An ARM debug access port.
    ArmDap,
    /// Recognized chain member of an unknown family; shiftable but inert.
    Generic,
}

/// One device on a scan chain.
#[derive(Debug, Clone)]
pub struct Device {
    idcode: IdCode,
    position: usize,
    kind: DeviceKind,
}

impl Device {
    /// Builds the matching device for an IDCODE discovered at `position`.
    pub fn from_idcode(idcode: u32, position: usize) -> Device {
        let idcode = IdCode(idcode);
        let kind = match idcode.manufacturer() {
            MANUFACTURER_XILINX => xilinx::identify(idcode),
            MANUFACTURER_MICROCHIP => microchip::identify(idcode),
            MANUFACTURER_ARM => DeviceKind::ArmDap,
            other => {
                tracing::warn!(
                    "manufacturer ID 0x{other:03x} not recognized ({idcode}), treating as opaque"
                );
                DeviceKind::Generic
            }
        };
        Device {
            idcode,
            position,
            kind,
        }
    }

    /// The device's IDCODE.
    pub fn idcode(&self) -> IdCode {
        self.idcode
    }

    /// Zero-based position, counted from the TDO-nearest end.
    pub fn position(&self) -> usize {
        self.position
    }

    /// The decoded family.
    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    /// Instruction register length in bits, if the family is known.
    pub fn ir_length(&self) -> Option<usize> {
        match &self.kind {
            DeviceKind::XilinxFpga(family) => Some(family.ir_length()),
            DeviceKind::XilinxCpld(_) => Some(xilinx::coolrunner2::IR_LENGTH),
            DeviceKind::Pic32(_) => Some(microchip::IR_LENGTH),
            DeviceKind::ArmDap => Some(arm::IR_LENGTH),
            DeviceKind::Generic => None,
        }
    }

    /// Human-readable identification string.
    pub fn description(&self) -> String {
        match &self.kind {
            DeviceKind::XilinxFpga(family) => {
                format!("Xilinx {} stepping {}", family, self.idcode.version())
            }
            DeviceKind::XilinxCpld(part) => {
                format!("Xilinx {} stepping {}", part, self.idcode.version())
            }
            DeviceKind::Pic32(part) => {
                format!("Microchip {} stepping {}", part, self.idcode.version())
            }
            DeviceKind::ArmDap => format!("ARM JTAG debug access port ({})", self.idcode),
            DeviceKind::Generic => format!("Unknown device {}", self.idcode),
        }
    }

    /// The programming driver, for families that have one.
    pub fn programmable(&self) -> Option<Box<dyn Programmable>> {
        match &self.kind {
            DeviceKind::XilinxFpga(family) => Some(Box::new(xilinx::FpgaDriver::new(
                family.clone(),
                self.position,
            ))),
            DeviceKind::XilinxCpld(part) => Some(Box::new(
                xilinx::coolrunner2::CoolRunner2Driver::new(part.clone(), self.position),
            )),
            DeviceKind::Pic32(part) => Some(Box::new(microchip::Pic32Driver::new(
                part.clone(),
                self.position,
            ))),
            DeviceKind::ArmDap | DeviceKind::Generic => None,
        }
    }

    /// The debug view, for families that expose one.
    pub fn debuggable(&self) -> Option<Box<dyn Debuggable>> {
        match &self.kind {
            DeviceKind::ArmDap => Some(Box::new(arm::ArmDap::new(self.idcode))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idcode_fields() {
        let arm = IdCode(0x4BA00477);
        assert!(arm.valid());
        assert_eq!(arm.manufacturer(), MANUFACTURER_ARM);
        assert_eq!(arm.part_number(), 0xBA00);
        assert_eq!(arm.version(), 4);
        assert_eq!(format!("{arm}"), "0x4BA00477 (ARM Ltd)");
    }

    #[test]
    fn factory_dispatch() {
        let dap = Device::from_idcode(0x4BA00477, 0);
        assert_eq!(*dap.kind(), DeviceKind::ArmDap);
        assert!(dap.debuggable().is_some());
        assert!(dap.programmable().is_none());

        // Spartan-6 LX25.
        let fpga = Device::from_idcode(0x24004093, 1);
        assert!(matches!(fpga.kind(), DeviceKind::XilinxFpga(_)));
        assert_eq!(fpga.ir_length(), Some(6));
        assert!(fpga.programmable().is_some());

        // The unfamiliar manufacturer stays usable as an opaque device.
        let opaque = Device::from_idcode(0x4A0A9049, 2);
        assert_eq!(*opaque.kind(), DeviceKind::Generic);
        assert_eq!(opaque.ir_length(), None);
    }

    #[test]
    fn bypass_only_idcode_is_invalid() {
        assert!(!IdCode(0x4BA00476).valid());
        assert!(!IdCode(0x0000_0001).valid());
    }
}
