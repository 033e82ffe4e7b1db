//! The transport contract a programming adapter has to satisfy.
//!
//! An adapter is anything that can wiggle TCK/TMS/TDI and sample TDO: a USB
//! pod, a remote `jtagd` instance, or the in-process emulation used by the
//! test suite. The required surface is the minimum op set
//! `{shift_data, shift_tms, idle_clocks}`; everything else has defaults
//! that collapse onto it.

use std::time::Duration;

use crate::Result;

pub mod emulated;
pub mod network;
pub mod protocol;

/// Monotonic performance counters kept by every adapter.
///
/// Counters never reset during a session; deltas between two snapshots
/// describe the work performed in between.
#[derive(Debug, Default, Clone, Copy)]
pub struct AdapterStatistics {
    /// Number of shift operations issued.
    pub shift_ops: u64,
    /// Number of data (TDI/TDO) bits shifted.
    pub data_bits: u64,
    /// Number of mode (TMS) bits shifted.
    pub mode_bits: u64,
    /// Number of idle clocks sent.
    pub idle_clocks: u64,
    /// Number of errors recovered from without aborting (USB retransmits
    /// and the like).
    pub recoverable_errors: u64,
    /// Wall-clock time spent inside shift operations.
    pub shift_time: Duration,
}

/// State of one GPIO pin on an adapter's auxiliary bank.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GpioPin {
    /// Pin level (sampled for inputs, driven for outputs).
    pub value: bool,
    /// True if the pin is configured as an output.
    pub output: bool,
}

impl GpioPin {
    /// Packs the pin into the one-byte wire form: bit 0 value, bit 1
    /// direction.
    pub fn to_byte(self) -> u8 {
        u8::from(self.value) | (u8::from(self.output) << 1)
    }

    /// Inverse of [`GpioPin::to_byte`].
    pub fn from_byte(b: u8) -> Self {
        GpioPin {
            value: b & 1 != 0,
            output: b & 2 != 0,
        }
    }
}

/// Auxiliary GPIO bank, advertised by adapters that have one.
pub trait GpioAdapter {
    /// Number of pins in the bank.
    fn pin_count(&self) -> usize;

    /// Reads the state of every pin.
    fn read_state(&mut self) -> Result<Vec<GpioPin>>;

    /// Writes the state of every pin. `pins.len()` must equal
    /// [`GpioAdapter::pin_count`].
    fn write_state(&mut self, pins: &[GpioPin]) -> Result<()>;
}

/// Wire-level operations on a JTAG adapter.
///
/// Data is shifted LSB-first: bit `n` of a buffer is byte `n / 8`, bit
/// `n % 8` (see [`crate::bits`]). Receive buffers must hold
/// `bits.div_ceil(8)` bytes.
pub trait JtagAdapter: std::fmt::Debug + Send {
    /// Manufacturer-assigned adapter name.
    ///
    /// Identity queries may perform I/O on remote adapters, hence `&mut`
    /// and the fallible signatures.
    fn name(&mut self) -> Result<String>;

    /// Manufacturer-assigned serial number.
    fn serial(&mut self) -> Result<String>;

    /// User-assigned identifier (often the serial number).
    fn user_id(&mut self) -> Result<String>;

    /// TCK frequency in Hz.
    fn frequency_hz(&mut self) -> Result<u32>;

    /// Driver/API version string.
    fn api_version(&mut self) -> Result<String> {
        Ok("1.0".to_string())
    }

    /// Shifts `bits` bits through TDI/TDO.
    ///
    /// When `last_tms` is set the final bit is clocked with TMS=1, so a TAP
    /// sitting in Shift-IR/Shift-DR leaves into the matching Exit1 state.
    /// `rx`, when present, receives the TDO capture.
    fn shift_data(
        &mut self,
        last_tms: bool,
        tx: &[u8],
        rx: Option<&mut [u8]>,
        bits: usize,
    ) -> Result<()>;

    /// Clocks `count` TMS bits (LSB-first from `tms_bits`, at most 8)
    /// while holding TDI at `tdi`.
    ///
    /// Remote adapters may reject this in favor of the state-level
    /// navigation methods below.
    fn shift_tms(&mut self, tdi: bool, tms_bits: u8, count: usize) -> Result<()>;

    /// Clocks `n` beats with TMS=0 and TDI=0.
    fn idle_clocks(&mut self, n: usize) -> Result<()>;

    /// Enters Test-Logic-Reset by clocking six TMS=1 bits.
    fn test_logic_reset(&mut self) -> Result<()> {
        self.shift_tms(false, 0x3F, 6)
    }

    /// Resets the TAP and settles in Run-Test-Idle.
    fn reset_to_idle(&mut self) -> Result<()> {
        self.test_logic_reset()?;
        self.shift_tms(false, 0x00, 1)
    }

    /// Run-Test-Idle to Shift-IR (TMS 1,1,0,0).
    fn enter_shift_ir(&mut self) -> Result<()> {
        self.shift_tms(false, 0x03, 4)
    }

    /// Exit1-IR to Run-Test-Idle (TMS 1,0).
    fn leave_exit1_ir(&mut self) -> Result<()> {
        self.shift_tms(false, 0x01, 2)
    }

    /// Run-Test-Idle to Shift-DR (TMS 1,0,0).
    fn enter_shift_dr(&mut self) -> Result<()> {
        self.shift_tms(false, 0x01, 3)
    }

    /// Exit1-DR to Run-Test-Idle (TMS 1,0).
    fn leave_exit1_dr(&mut self) -> Result<()> {
        self.shift_tms(false, 0x01, 2)
    }

    /// Like [`JtagAdapter::idle_clocks`], but may be queued behind earlier
    /// deferred writes instead of executing immediately.
    fn idle_clocks_deferred(&mut self, n: usize) -> Result<()> {
        self.idle_clocks(n)
    }

    /// Commits any deferred writes. No-op for unbuffered adapters.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Whether the adapter supports split (pipelined) scanning.
    ///
    /// Split scanning lets the write halves of several scans go out in one
    /// driver-level write, with the read halves fulfilled afterwards in
    /// FIFO order, hiding per-scan round-trip latency.
    fn split_scan_supported(&mut self) -> Result<bool> {
        Ok(false)
    }

    /// Write half of a split scan.
    ///
    /// Returns `true` if the read half was deferred (fetch it later with
    /// [`JtagAdapter::shift_data_read_only`]), `false` if the scan executed
    /// in full and `rx` already holds the capture. Adapters without split
    /// support perform the whole scan here.
    fn shift_data_write_only(
        &mut self,
        last_tms: bool,
        tx: &[u8],
        rx: Option<&mut [u8]>,
        bits: usize,
    ) -> Result<bool> {
        self.shift_data(last_tms, tx, rx, bits)?;
        Ok(false)
    }

    /// Read half of a split scan, fulfilling the oldest outstanding deferred
    /// read.
    ///
    /// Returns `true` if this call produced data into `rx`, `false` if the
    /// read had already been satisfied (nothing was pending).
    fn shift_data_read_only(&mut self, _rx: Option<&mut [u8]>, _bits: usize) -> Result<bool> {
        Ok(false)
    }

    /// Snapshot of the performance counters.
    ///
    /// Remote adapters fetch most counters from the server, so this may
    /// perform I/O.
    fn statistics(&mut self) -> Result<AdapterStatistics>;

    /// The GPIO bank, for adapters that have one.
    fn as_gpio(&mut self) -> Option<&mut dyn GpioAdapter> {
        None
    }
}

/// Splits a packed driver version word into `(major, minor, build)`.
///
/// The minor and major fields collapse to a 0/1 flag rather than the byte
/// value; this matches the shipped decoder and is kept for output
/// compatibility (see the unit test).
pub fn decode_library_version(raw: u32) -> (u32, u32, u32) {
    let build = raw & 0xff;
    let minor = u32::from((raw >> 8) != 0);
    let major = u32::from((raw >> 16) != 0);
    (major, minor, build)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpio_pin_byte_roundtrip() {
        for b in 0..4u8 {
            assert_eq!(GpioPin::from_byte(b).to_byte(), b);
        }
        let pin = GpioPin {
            value: true,
            output: true,
        };
        assert_eq!(pin.to_byte(), 0x03);
    }

    #[test]
    fn library_version_fields_collapse() {
        // 3.1.21 packed as 0x00030115: the major/minor fields come out as
        // flags, not bytes.
        assert_eq!(decode_library_version(0x0003_0115), (1, 1, 0x15));
        assert_eq!(decode_library_version(0x0000_0007), (0, 0, 7));
        assert_eq!(decode_library_version(0), (0, 0, 0));
    }
}
