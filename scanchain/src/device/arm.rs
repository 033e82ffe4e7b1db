//! ARM debug access ports.
//!
//! Identification only: the DAP is surfaced as a debuggable chain member so
//! a chain report can name it, but driving DPACC/APACC transactions is a
//! debugger concern outside this crate.

use crate::device::{Debuggable, IdCode};

pub const IR_LENGTH: usize = 4;

pub const IR_ABORT: u8 = 0x8;
pub const IR_DPACC: u8 = 0xA;
pub const IR_APACC: u8 = 0xB;
pub const IR_IDCODE: u8 = 0xE;
pub const IR_BYPASS: u8 = 0xF;

/// A JTAG-DP.
#[derive(Debug, Clone)]
pub struct ArmDap {
    idcode: IdCode,
}

impl ArmDap {
    pub(crate) fn new(idcode: IdCode) -> Self {
        ArmDap { idcode }
    }
}

impl Debuggable for ArmDap {
    fn target_count(&self) -> usize {
        1
    }

    fn target_description(&self, _index: usize) -> String {
        format!("ARM JTAG-DP, IDCODE {}", self.idcode)
    }
}
