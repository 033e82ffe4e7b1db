//! The state-level scan engine.
//!
//! [`ScanChain`] owns the adapter and the devices discovered on it. Every
//! public operation starts and ends in Run-Test-Idle. Writes can be
//! deferred into the adapter's buffer; any read, or an explicit
//! [`ScanChain::commit`], flushes.

use bitvec::prelude::*;

use crate::adapter::JtagAdapter;
use crate::bits;
use crate::device::Device;
use crate::{Error, Result};

/// Bits shifted while probing the chain during discovery. Bounds the total
/// IR length and the device count.
const PROBE_BITS: usize = 1024;

/// Largest single frame handed to the adapter. Longer scans are chunked
/// transparently; correctness does not depend on chunk boundaries.
const MAX_SCAN_CHUNK_BYTES: usize = 4096;
const MAX_SCAN_CHUNK_BITS: usize = MAX_SCAN_CHUNK_BYTES * 8;

/// A discovered scan chain and the engine driving it.
///
/// Devices are indexed from 0 at the TDO-nearest end. The chain structure
/// is fixed after [`ScanChain::initialize`]; only per-device cached state
/// (the last written IR) changes afterwards.
pub struct ScanChain {
    adapter: Box<dyn JtagAdapter>,
    devices: Vec<Device>,
    cached_ir: Vec<Option<Vec<u8>>>,
}

impl ScanChain {
    /// Wraps an adapter. The chain is empty until
    /// [`ScanChain::initialize`] has walked it.
    pub fn new(adapter: Box<dyn JtagAdapter>) -> Self {
        ScanChain {
            adapter,
            devices: Vec::new(),
            cached_ir: Vec::new(),
        }
    }

    /// The adapter, for statistics queries and GPIO access.
    pub fn adapter_mut(&mut self) -> &mut dyn JtagAdapter {
        self.adapter.as_mut()
    }

    /// Walks the chain from Test-Logic-Reset and identifies every device.
    ///
    /// Wire faults (TDO stuck at either level) are fatal: the session is
    /// not usable afterwards. Devices that answer with a BYPASS bit instead
    /// of an IDCODE are not supported.
    pub fn initialize(&mut self) -> Result<()> {
        let ones = [0xFFu8; PROBE_BITS / 8];
        let zeros = [0x00u8; PROBE_BITS / 8];
        let mut capture = [0u8; PROBE_BITS / 8];

        self.devices.clear();
        self.cached_ir.clear();

        self.reset_to_idle()?;

        // Flush the instruction registers with zeros; a wire fault shows up
        // as TDO failing to follow.
        self.adapter.enter_shift_ir()?;
        self.adapter
            .shift_data(false, &zeros, Some(&mut capture), PROBE_BITS)?;
        if bits::peek_bit(&capture, PROBE_BITS - 1) {
            return Err(Error::board_fault(
                "TDO is still 1 after 1024 clocks of TDI=0 in SHIFT-IR state, possible board fault",
            ));
        }

        // Load BYPASS into every IR.
        self.adapter
            .shift_data(true, &ones, Some(&mut capture), PROBE_BITS)?;
        if !bits::peek_bit(&capture, PROBE_BITS - 1) {
            return Err(Error::board_fault(
                "TDO is still 0 after 1024 clocks of TDI=1 in SHIFT-IR state, possible board fault",
            ));
        }
        self.adapter.leave_exit1_ir()?;

        // Flush every (single-bit) DR with zeros.
        self.adapter.enter_shift_dr()?;
        self.adapter
            .shift_data(false, &zeros, Some(&mut capture), PROBE_BITS)?;
        if bits::peek_bit(&capture, PROBE_BITS - 1) {
            return Err(Error::board_fault(
                "TDO is still 1 after 1024 clocks in SHIFT-DR state, possible board fault",
            ));
        }

        // Shift ones in one at a time; the zero bits seen before the first
        // one comes back is the device count.
        let mut device_count = 0;
        for i in 0..PROBE_BITS {
            let mut bit = [0u8; 1];
            self.adapter.shift_data(false, &[1], Some(&mut bit), 1)?;
            if bit[0] & 1 != 0 {
                device_count = i;
                break;
            }
        }
        tracing::debug!("chain walk found {device_count} device(s)");

        // Reset selects IDCODE everywhere; shift all the codes out in one
        // scan and crack them in chain order.
        self.reset_to_idle()?;
        self.adapter.enter_shift_dr()?;
        let dr_bits = 32 * device_count;
        let mut dr = vec![0u8; bits::bytes_for(dr_bits)];
        let tx = vec![0u8; bits::bytes_for(dr_bits)];
        if device_count > 0 {
            self.shift_chunked(false, &tx, Some(&mut dr), dr_bits)?;
        }
        let mut idcodes = Vec::with_capacity(device_count);
        for word in dr.view_bits::<Lsb0>()[..dr_bits].chunks(32) {
            let idcode = word.load_le::<u32>();
            // An IDCODE always begins with a one; a zero here means the
            // device answered with its BYPASS register instead.
            if idcode & 1 == 0 {
                return Err(Error::Unimplemented(
                    "Devices without IDCODE are not supported".to_string(),
                ));
            }
            idcodes.push(idcode);
        }
        self.reset_to_idle()?;

        for (position, idcode) in idcodes.into_iter().enumerate() {
            let device = Device::from_idcode(idcode, position);
            tracing::info!("{position:2}: {}", device.description());
            self.devices.push(device);
            self.cached_ir.push(None);
        }
        Ok(())
    }

    /// Number of devices found by [`ScanChain::initialize`].
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// The device at `index`.
    pub fn device(&self, index: usize) -> Result<&Device> {
        self.devices
            .get(index)
            .ok_or_else(|| Error::gigo("Device index out of range"))
    }

    /// Iterates over the chain in position order.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    /// The 32-bit IDCODE of the device at `index`.
    pub fn idcode(&self, index: usize) -> Result<u32> {
        Ok(self.device(index)?.idcode().raw())
    }

    /// Resets the TAP and settles in Run-Test-Idle. Drops every cached IR.
    pub fn reset_to_idle(&mut self) -> Result<()> {
        self.adapter.reset_to_idle()?;
        for slot in &mut self.cached_ir {
            *slot = None;
        }
        Ok(())
    }

    fn check_single_device(&self, index: usize) -> Result<()> {
        if index >= self.devices.len() {
            return Err(Error::gigo("Device index out of range"));
        }
        // Driving one device on a longer chain needs IR-length-aware BYPASS
        // padding, which this engine does not have.
        if self.devices.len() != 1 {
            return Err(Error::Unimplemented(
                "Bypassing extra devices not yet supported!".to_string(),
            ));
        }
        Ok(())
    }

    fn ir_cache_hit(&self, index: usize, data: &[u8], bit_count: usize) -> bool {
        if bit_count > 32 {
            return false;
        }
        match &self.cached_ir[index] {
            Some(cached) => cached.as_slice() == &data[..bits::bytes_for(bit_count)],
            None => false,
        }
    }

    fn ir_cache_store(&mut self, index: usize, data: &[u8], bit_count: usize) {
        if bit_count <= 32 {
            self.cached_ir[index] = Some(data[..bits::bytes_for(bit_count)].to_vec());
        }
    }

    /// Loads the IR of the device at `index`, eliding the scan when the
    /// value is already loaded.
    pub fn set_ir(&mut self, index: usize, data: &[u8], bit_count: usize) -> Result<()> {
        self.set_ir_deferred(index, data, bit_count)?;
        self.commit()
    }

    /// Deferred variant of [`ScanChain::set_ir`].
    pub fn set_ir_deferred(&mut self, index: usize, data: &[u8], bit_count: usize) -> Result<()> {
        self.check_single_device(index)?;
        if self.ir_cache_hit(index, data, bit_count) {
            tracing::trace!("IR cache hit for device {index}");
            return Ok(());
        }
        self.adapter.enter_shift_ir()?;
        self.shift_chunked(true, data, None, bit_count)?;
        self.adapter.leave_exit1_ir()?;
        self.ir_cache_store(index, data, bit_count);
        Ok(())
    }

    /// Loads the IR and returns the IR capture value. Always scans.
    pub fn set_ir_capture(
        &mut self,
        index: usize,
        data: &[u8],
        capture: &mut [u8],
        bit_count: usize,
    ) -> Result<()> {
        self.check_single_device(index)?;
        self.adapter.enter_shift_ir()?;
        self.shift_chunked(true, data, Some(capture), bit_count)?;
        self.adapter.leave_exit1_ir()?;
        self.ir_cache_store(index, data, bit_count);
        self.commit()
    }

    /// Scans the DR of the device at `index`, optionally capturing the
    /// previous contents.
    pub fn scan_dr(
        &mut self,
        index: usize,
        tx: &[u8],
        rx: Option<&mut [u8]>,
        bit_count: usize,
    ) -> Result<()> {
        self.check_single_device(index)?;
        self.adapter.enter_shift_dr()?;
        self.shift_chunked(true, tx, rx, bit_count)?;
        self.adapter.leave_exit1_dr()?;
        self.commit()
    }

    /// Write-only DR scan that may stay in the adapter's buffer until the
    /// next read or [`ScanChain::commit`].
    pub fn scan_dr_deferred(&mut self, index: usize, tx: &[u8], bit_count: usize) -> Result<()> {
        self.check_single_device(index)?;
        self.adapter.enter_shift_dr()?;
        self.shift_chunked(true, tx, None, bit_count)?;
        self.adapter.leave_exit1_dr()?;
        Ok(())
    }

    /// Write half of a split DR scan. Pair with
    /// [`ScanChain::scan_dr_split_read`] using the same buffer and length.
    pub fn scan_dr_split_write(
        &mut self,
        index: usize,
        tx: &[u8],
        rx: Option<&mut [u8]>,
        bit_count: usize,
    ) -> Result<()> {
        self.check_single_device(index)?;
        self.adapter.enter_shift_dr()?;
        self.adapter
            .shift_data_write_only(true, tx, rx, bit_count)?;
        self.adapter.leave_exit1_dr()?;
        Ok(())
    }

    /// Read half of a split DR scan; fills `rx` if the read was deferred.
    pub fn scan_dr_split_read(
        &mut self,
        index: usize,
        rx: Option<&mut [u8]>,
        bit_count: usize,
    ) -> Result<()> {
        self.check_single_device(index)?;
        self.adapter.shift_data_read_only(rx, bit_count)?;
        Ok(())
    }

    /// Clocks `n` idle beats in Run-Test-Idle.
    pub fn idle_clocks(&mut self, n: usize) -> Result<()> {
        self.adapter.idle_clocks(n)
    }

    /// Deferred variant of [`ScanChain::idle_clocks`].
    pub fn idle_clocks_deferred(&mut self, n: usize) -> Result<()> {
        self.adapter.idle_clocks_deferred(n)
    }

    /// Blocks until the adapter's write buffer has drained.
    pub fn commit(&mut self) -> Result<()> {
        self.adapter.flush()
    }

    fn shift_chunked(
        &mut self,
        last_tms: bool,
        tx: &[u8],
        mut rx: Option<&mut [u8]>,
        bit_count: usize,
    ) -> Result<()> {
        if tx.len() < bits::bytes_for(bit_count) {
            return Err(Error::gigo("send buffer too short for scan"));
        }
        let mut done = 0;
        while bit_count - done > MAX_SCAN_CHUNK_BITS {
            let byte0 = done / 8;
            let tx_chunk = &tx[byte0..byte0 + MAX_SCAN_CHUNK_BYTES];
            let rx_chunk = rx
                .as_deref_mut()
                .map(|r| &mut r[byte0..byte0 + MAX_SCAN_CHUNK_BYTES]);
            self.adapter
                .shift_data(false, tx_chunk, rx_chunk, MAX_SCAN_CHUNK_BITS)?;
            done += MAX_SCAN_CHUNK_BITS;
        }
        let byte0 = done / 8;
        let rx_rest = rx.map(|r| &mut r[byte0..]);
        self.adapter
            .shift_data(last_tms, &tx[byte0..], rx_rest, bit_count - done)
    }
}

impl std::fmt::Debug for ScanChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanChain")
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}
