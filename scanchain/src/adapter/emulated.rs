//! In-process adapter emulation.
//!
//! Steps a full sixteen-state TAP model for every TCK edge and runs the
//! attached device models behind it: plain IDCODE/BYPASS devices, and a
//! Spartan-6 configuration model with DONE tracking and an emulated SPI
//! flash behind the USER1/USER2 bounce protocol.
//!
//! The emulation backs the test suites and the `jtagd` daemon; it
//! advertises split scanning so the pipelined paths get exercised too.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::adapter::{
    decode_library_version, AdapterStatistics, GpioAdapter, GpioPin, JtagAdapter,
};
use crate::bits;
use crate::device::xilinx::spartan6 as s6;
use crate::flash::bounce;
use crate::tap::TapState;
use crate::{Error, Result};

/// Synthetic driver version reported through [`JtagAdapter::api_version`].
const EMULATED_LIBRARY_VERSION: u32 = 0x0003_0115;

/// Idle clocks in Run-Test-Idle needed after JSTART before DONE asserts.
const STARTUP_CLOCKS: usize = 16;

/// Status polls that report busy after an emulated flash erase or program.
const FLASH_BUSY_POLLS: u32 = 2;

/// The data register currently selected between Capture and Update.
#[derive(Debug)]
enum DrReg {
    /// Fixed-length circulating register (IDCODE, BYPASS, status words).
    Fixed { reg: VecDeque<bool> },
    /// Write-only sink: TDO is zero, shifted-in bits are collected.
    Sink { data: Vec<bool> },
    /// Read/write stream: preloaded response bits out, input collected.
    Stream { out: VecDeque<bool>, data: Vec<bool> },
}

impl DrReg {
    fn fixed_from_u32(value: u32, len: usize) -> DrReg {
        let mut reg = VecDeque::with_capacity(len);
        for i in 0..len {
            reg.push_back(value >> i & 1 != 0);
        }
        DrReg::Fixed { reg }
    }

    fn front(&self) -> bool {
        match self {
            DrReg::Fixed { reg } => reg.front().copied().unwrap_or(false),
            DrReg::Sink { .. } => false,
            DrReg::Stream { out, .. } => out.front().copied().unwrap_or(false),
        }
    }

    fn shift(&mut self, input: bool) {
        match self {
            DrReg::Fixed { reg } => {
                reg.pop_front();
                reg.push_back(input);
            }
            DrReg::Sink { data } => data.push(input),
            DrReg::Stream { out, data } => {
                out.pop_front();
                data.push(input);
            }
        }
    }

    fn collected_bytes(&self) -> Vec<u8> {
        let bits = match self {
            DrReg::Sink { data } => data.as_slice(),
            DrReg::Stream { data, .. } => data.as_slice(),
            DrReg::Fixed { .. } => &[],
        };
        let mut bytes = vec![0u8; bits::bytes_for(bits.len())];
        for (n, bit) in bits.iter().enumerate() {
            bits::poke_bit(&mut bytes, n, *bit);
        }
        bytes
    }
}

/// Emulated SPI flash sitting behind the bounce protocol.
#[derive(Debug)]
struct EmulatedFlash {
    memory: Vec<u8>,
    jedec_id: [u8; 3],
    busy_polls: u32,
}

impl EmulatedFlash {
    /// `size` must be a power of two; the JEDEC capacity byte is derived
    /// from it.
    fn new(size: usize) -> Self {
        EmulatedFlash {
            memory: vec![0xFF; size],
            jedec_id: [0xEF, 0x40, size.trailing_zeros() as u8],
            busy_polls: 0,
        }
    }

    fn erase_sector(&mut self, addr: u32) {
        let start = (addr as usize & !(bounce::SECTOR_SIZE - 1)).min(self.memory.len());
        let end = (start + bounce::SECTOR_SIZE).min(self.memory.len());
        self.memory[start..end].fill(0xFF);
        self.busy_polls = FLASH_BUSY_POLLS;
    }

    fn program(&mut self, addr: u32, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            let offset = addr as usize + i;
            if offset < self.memory.len() {
                // NOR semantics: programming can only clear bits.
                self.memory[offset] &= byte;
            }
        }
        self.busy_polls = FLASH_BUSY_POLLS;
    }

    fn read(&self, addr: u32, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| {
                self.memory
                    .get(addr as usize + i)
                    .copied()
                    .unwrap_or(0xFF)
            })
            .collect()
    }

    fn status(&mut self) -> u8 {
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            bounce::STATUS_BUSY
        } else {
            0x00
        }
    }
}

/// Pending bounce command latched by a USER1 update.
#[derive(Debug, Clone, Copy)]
struct BounceCommand {
    opcode: u8,
    addr: u32,
    len: u16,
}

/// Configuration state of the Spartan-6 model.
#[derive(Debug)]
struct Spartan6Model {
    config_bits: usize,
    configured: bool,
    done: bool,
    jstart_pending: bool,
    startup_clocks: usize,
    flash: EmulatedFlash,
    command: Option<BounceCommand>,
    response: Vec<u8>,
}

impl Spartan6Model {
    fn new(flash_size: usize) -> Self {
        Spartan6Model {
            config_bits: 0,
            configured: false,
            done: false,
            jstart_pending: false,
            startup_clocks: 0,
            flash: EmulatedFlash::new(flash_size),
            command: None,
            response: Vec::new(),
        }
    }

    fn clear_config(&mut self) {
        self.config_bits = 0;
        self.configured = false;
        self.done = false;
        self.jstart_pending = false;
        self.startup_clocks = 0;
    }

    fn status_word(&self) -> u32 {
        let mut status = 0;
        if self.done {
            status |= s6::STAT_DONE;
        }
        if self.configured {
            status |= s6::STAT_INIT_B;
        }
        status
    }

    fn execute_command(&mut self, cmd: BounceCommand) {
        self.response.clear();
        match cmd.opcode {
            bounce::CMD_ERASE_SECTOR => self.flash.erase_sector(cmd.addr),
            bounce::CMD_PAGE_PROGRAM => {
                // Data arrives through the following USER2 scan.
            }
            bounce::CMD_READ => {
                self.response = self.flash.read(cmd.addr, cmd.len as usize);
            }
            bounce::CMD_QUERY_ID => {
                self.response = self.flash.jedec_id.to_vec();
            }
            bounce::CMD_READ_STATUS => {
                self.response = vec![self.flash.status()];
            }
            other => {
                tracing::warn!("emulated bounce: unknown command 0x{other:02x}");
            }
        }
        self.command = Some(cmd);
    }
}

/// Width of the generic tap's scratch data register.
const SCRATCH_BITS: usize = 64;

/// Device-specific behavior of one emulated TAP.
#[derive(Debug)]
enum TapModel {
    /// IDCODE and BYPASS, plus a retained 64-bit scratch register behind
    /// every other instruction (shifted-in data survives across scans, so
    /// the next scan clocks it back out).
    Generic { scratch: VecDeque<bool> },
    Spartan6(Spartan6Model),
}

impl TapModel {
    fn generic() -> TapModel {
        TapModel::Generic {
            scratch: VecDeque::from(vec![false; SCRATCH_BITS]),
        }
    }
}

/// One TAP on the emulated chain.
#[derive(Debug)]
struct EmulatedTap {
    idcode: u32,
    ir_len: usize,
    /// Latched instruction.
    instruction: u64,
    /// IR shift register between Capture-IR and Update-IR.
    ir_shift: VecDeque<bool>,
    /// DR shift register between Capture-DR and Update-DR.
    dr: DrReg,
    model: TapModel,
}

impl EmulatedTap {
    fn new(idcode: u32, ir_len: usize, model: TapModel) -> Self {
        let mut tap = EmulatedTap {
            idcode,
            ir_len,
            instruction: 0,
            ir_shift: VecDeque::new(),
            dr: DrReg::Fixed {
                reg: VecDeque::new(),
            },
            model,
        };
        tap.reset();
        tap
    }

    fn bypass_instruction(&self) -> u64 {
        (1u64 << self.ir_len) - 1
    }

    fn idcode_instruction(&self) -> u64 {
        match self.model {
            TapModel::Generic { .. } => 0,
            TapModel::Spartan6(_) => u64::from(s6::IR_IDCODE),
        }
    }

    fn reset(&mut self) {
        self.instruction = self.idcode_instruction();
        if let TapModel::Spartan6(ref mut model) = self.model {
            model.command = None;
        }
    }

    fn capture_ir(&mut self) {
        // IEEE 1149.1 mandates the two least significant capture bits be 01.
        self.ir_shift.clear();
        for i in 0..self.ir_len {
            self.ir_shift.push_back(i == 0);
        }
    }

    fn update_ir(&mut self) {
        let mut value = 0u64;
        for (i, bit) in self.ir_shift.iter().enumerate() {
            if *bit {
                value |= 1 << i;
            }
        }
        self.instruction = value;
    }

    fn capture_dr(&mut self) {
        let bypass = self.bypass_instruction();
        self.dr = match &mut self.model {
            TapModel::Generic { scratch } => {
                if self.instruction == 0 {
                    DrReg::fixed_from_u32(self.idcode, 32)
                } else if self.instruction == bypass {
                    DrReg::fixed_from_u32(0, 1)
                } else {
                    DrReg::Fixed {
                        reg: std::mem::take(scratch),
                    }
                }
            }
            TapModel::Spartan6(model) => match self.instruction as u32 {
                s6::IR_IDCODE => DrReg::fixed_from_u32(self.idcode, 32),
                s6::IR_CFG_IN => DrReg::Sink { data: Vec::new() },
                s6::IR_CFG_OUT => DrReg::fixed_from_u32(model.status_word(), 32),
                s6::IR_USER1 => DrReg::Sink { data: Vec::new() },
                s6::IR_USER2 => {
                    let mut out = VecDeque::new();
                    if model.configured {
                        for byte in &model.response {
                            for i in 0..8 {
                                out.push_back(byte >> i & 1 != 0);
                            }
                        }
                    }
                    DrReg::Stream {
                        out,
                        data: Vec::new(),
                    }
                }
                _ => DrReg::fixed_from_u32(0, 1),
            },
        };
    }

    fn update_dr(&mut self) {
        let collected = self.dr.collected_bytes();
        let bit_count = match &self.dr {
            DrReg::Sink { data } => data.len(),
            DrReg::Stream { data, .. } => data.len(),
            DrReg::Fixed { .. } => 0,
        };
        if let TapModel::Generic { ref mut scratch } = self.model {
            let bypass = (1u64 << self.ir_len) - 1;
            if self.instruction != 0 && self.instruction != bypass {
                if let DrReg::Fixed { reg } = &self.dr {
                    *scratch = reg.clone();
                }
            }
            return;
        }
        if let TapModel::Spartan6(ref mut model) = self.model {
            match self.instruction as u32 {
                s6::IR_CFG_IN => {
                    model.config_bits += bit_count;
                    // A real device tracks the sync word and frame CRCs;
                    // the model just wants to see a plausible payload.
                    if model.config_bits >= 512 {
                        model.configured = true;
                    }
                }
                s6::IR_USER1 => {
                    if model.configured && collected.len() >= bounce::COMMAND_BYTES {
                        let cmd = BounceCommand {
                            opcode: collected[0],
                            addr: u32::from_le_bytes([
                                collected[1],
                                collected[2],
                                collected[3],
                                collected[4],
                            ]),
                            len: u16::from_le_bytes([collected[5], collected[6]]),
                        };
                        model.execute_command(cmd);
                    }
                }
                s6::IR_USER2 => {
                    if let Some(cmd) = model.command {
                        if cmd.opcode == bounce::CMD_PAGE_PROGRAM && model.configured {
                            let len = (cmd.len as usize).min(collected.len());
                            model.flash.program(cmd.addr, &collected[..len]);
                            model.command = None;
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn update_ir_side_effects(&mut self) {
        if let TapModel::Spartan6(ref mut model) = self.model {
            match self.instruction as u32 {
                s6::IR_JPROGRAM => model.clear_config(),
                s6::IR_JSTART => {
                    if model.configured {
                        model.jstart_pending = true;
                        model.startup_clocks = 0;
                    }
                }
                _ => {}
            }
        }
    }

    fn tick_idle(&mut self) {
        if let TapModel::Spartan6(ref mut model) = self.model {
            if model.jstart_pending {
                model.startup_clocks += 1;
                if model.startup_clocks >= STARTUP_CLOCKS {
                    model.done = true;
                    model.jstart_pending = false;
                }
            }
        }
    }
}

const FAULT_NONE: u8 = 0;
const FAULT_TDO_LOW: u8 = 1;
const FAULT_TDO_HIGH: u8 = 2;

/// Injects wire faults into a running [`EmulatedAdapter`], even after it
/// has been boxed away behind a chain or daemon.
#[derive(Debug, Clone)]
pub struct FaultInjector(Arc<AtomicU8>);

impl FaultInjector {
    /// Forces TDO to a fixed level, or clears the fault with `None`.
    pub fn stick_tdo(&self, level: Option<bool>) {
        let value = match level {
            None => FAULT_NONE,
            Some(false) => FAULT_TDO_LOW,
            Some(true) => FAULT_TDO_HIGH,
        };
        self.0.store(value, Ordering::Relaxed);
    }
}

/// A software stand-in for a physical programming adapter.
///
/// TAPs are appended in chain order starting at the TDO-nearest end, so the
/// first pushed TAP is device 0.
#[derive(Debug)]
pub struct EmulatedAdapter {
    name: String,
    serial: String,
    frequency_hz: u32,
    taps: Vec<EmulatedTap>,
    state: TapState,
    fault: Arc<AtomicU8>,
    pending_reads: VecDeque<Vec<u8>>,
    gpio: Vec<GpioPin>,
    stats: AdapterStatistics,
}

impl EmulatedAdapter {
    pub fn new(name: &str, serial: &str) -> Self {
        EmulatedAdapter {
            name: name.to_string(),
            serial: serial.to_string(),
            frequency_hz: 10_000_000,
            taps: Vec::new(),
            state: TapState::TestLogicReset,
            fault: Arc::new(AtomicU8::new(FAULT_NONE)),
            pending_reads: VecDeque::new(),
            gpio: Vec::new(),
            stats: AdapterStatistics::default(),
        }
    }

    /// Appends a plain IDCODE/BYPASS device to the chain.
    pub fn push_generic_tap(&mut self, idcode: u32, ir_len: usize) {
        self.taps
            .push(EmulatedTap::new(idcode, ir_len, TapModel::generic()));
    }

    /// Appends a Spartan-6 configuration model with an attached SPI flash of
    /// `flash_size` bytes.
    pub fn push_spartan6_tap(&mut self, idcode: u32, flash_size: usize) {
        self.taps.push(EmulatedTap::new(
            idcode,
            6,
            TapModel::Spartan6(Spartan6Model::new(flash_size)),
        ));
    }

    /// Provisions `count` GPIO pins (all inputs, low).
    pub fn with_gpio(mut self, count: usize) -> Self {
        self.gpio = vec![GpioPin::default(); count];
        self
    }

    /// Forces TDO to a fixed level, emulating a wire fault.
    pub fn set_stuck_tdo(&mut self, level: Option<bool>) {
        self.fault_injector().stick_tdo(level);
    }

    /// A handle for injecting faults after the adapter has been boxed.
    pub fn fault_injector(&self) -> FaultInjector {
        FaultInjector(Arc::clone(&self.fault))
    }

    /// DONE flag of the Spartan-6 model at `position`, for assertions.
    pub fn spartan6_done(&self, position: usize) -> Option<bool> {
        match self.taps.get(position)?.model {
            TapModel::Spartan6(ref model) => Some(model.done),
            TapModel::Generic { .. } => None,
        }
    }

    /// Flash contents of the Spartan-6 model at `position`, for assertions.
    pub fn flash_contents(&self, position: usize, addr: u32, len: usize) -> Option<Vec<u8>> {
        match self.taps.get(position)?.model {
            TapModel::Spartan6(ref model) => Some(model.flash.read(addr, len)),
            TapModel::Generic { .. } => None,
        }
    }

    /// One TCK edge: returns the TDO level sampled before the edge.
    fn clock(&mut self, tms: bool, tdi: bool) -> bool {
        let mut tdo = false;

        if self.state == TapState::ShiftDr {
            let outs: Vec<bool> = self.taps.iter().map(|t| t.dr.front()).collect();
            let n = self.taps.len();
            for (k, tap) in self.taps.iter_mut().enumerate() {
                let input = if k + 1 < n { outs[k + 1] } else { tdi };
                tap.dr.shift(input);
            }
            tdo = outs.first().copied().unwrap_or(tdi);
        } else if self.state == TapState::ShiftIr {
            let outs: Vec<bool> = self
                .taps
                .iter()
                .map(|t| t.ir_shift.front().copied().unwrap_or(false))
                .collect();
            let n = self.taps.len();
            for (k, tap) in self.taps.iter_mut().enumerate() {
                let input = if k + 1 < n { outs[k + 1] } else { tdi };
                tap.ir_shift.pop_front();
                tap.ir_shift.push_back(input);
            }
            tdo = outs.first().copied().unwrap_or(tdi);
        }

        let next = self.state.step(tms);
        if next != self.state {
            match next {
                TapState::TestLogicReset => {
                    for tap in &mut self.taps {
                        tap.reset();
                    }
                }
                TapState::CaptureDr => {
                    for tap in &mut self.taps {
                        tap.capture_dr();
                    }
                }
                TapState::CaptureIr => {
                    for tap in &mut self.taps {
                        tap.capture_ir();
                    }
                }
                TapState::UpdateDr => {
                    for tap in &mut self.taps {
                        tap.update_dr();
                    }
                }
                TapState::UpdateIr => {
                    for tap in &mut self.taps {
                        tap.update_ir();
                        tap.update_ir_side_effects();
                    }
                }
                _ => {}
            }
        }
        self.state = next;

        if self.state == TapState::RunTestIdle {
            for tap in &mut self.taps {
                tap.tick_idle();
            }
        }

        match self.fault.load(Ordering::Relaxed) {
            FAULT_TDO_LOW => false,
            FAULT_TDO_HIGH => true,
            _ => tdo,
        }
    }

    fn do_shift(
        &mut self,
        last_tms: bool,
        tx: &[u8],
        mut rx: Option<&mut [u8]>,
        bits: usize,
    ) -> Result<()> {
        if tx.len() < bits::bytes_for(bits) {
            return Err(Error::gigo(format!(
                "shift of {bits} bits needs {} tx bytes, got {}",
                bits::bytes_for(bits),
                tx.len()
            )));
        }
        if let Some(ref mut rx) = rx {
            if rx.len() < bits::bytes_for(bits) {
                return Err(Error::gigo("receive buffer too short for shift"));
            }
            rx[..bits::bytes_for(bits)].fill(0);
        }
        for n in 0..bits {
            let tdi = bits::peek_bit(tx, n);
            let tms = last_tms && n == bits - 1;
            let tdo = self.clock(tms, tdi);
            if let Some(ref mut rx) = rx {
                bits::poke_bit(rx, n, tdo);
            }
        }
        Ok(())
    }
}

impl JtagAdapter for EmulatedAdapter {
    fn name(&mut self) -> Result<String> {
        Ok(self.name.clone())
    }

    fn serial(&mut self) -> Result<String> {
        Ok(self.serial.clone())
    }

    fn user_id(&mut self) -> Result<String> {
        Ok(self.serial.clone())
    }

    fn frequency_hz(&mut self) -> Result<u32> {
        Ok(self.frequency_hz)
    }

    fn api_version(&mut self) -> Result<String> {
        let (major, minor, build) = decode_library_version(EMULATED_LIBRARY_VERSION);
        Ok(format!("emulated {major}.{minor}.{build}"))
    }

    fn shift_data(
        &mut self,
        last_tms: bool,
        tx: &[u8],
        rx: Option<&mut [u8]>,
        bits: usize,
    ) -> Result<()> {
        let start = Instant::now();
        self.stats.shift_ops += 1;
        self.stats.data_bits += bits as u64;
        self.do_shift(last_tms, tx, rx, bits)?;
        self.stats.shift_time += start.elapsed();
        Ok(())
    }

    fn shift_tms(&mut self, tdi: bool, tms_bits: u8, count: usize) -> Result<()> {
        if count > 8 {
            return Err(Error::gigo("shift_tms supports at most 8 bits per call"));
        }
        self.stats.shift_ops += 1;
        self.stats.mode_bits += count as u64;
        for n in 0..count {
            let tms = tms_bits >> n & 1 != 0;
            self.clock(tms, tdi);
        }
        Ok(())
    }

    fn idle_clocks(&mut self, n: usize) -> Result<()> {
        self.stats.idle_clocks += n as u64;
        for _ in 0..n {
            self.clock(false, false);
        }
        Ok(())
    }

    fn split_scan_supported(&mut self) -> Result<bool> {
        Ok(true)
    }

    fn shift_data_write_only(
        &mut self,
        last_tms: bool,
        tx: &[u8],
        rx: Option<&mut [u8]>,
        bits: usize,
    ) -> Result<bool> {
        let start = Instant::now();
        self.stats.shift_ops += 1;
        self.stats.data_bits += bits as u64;
        let want_read = rx.is_some();
        if want_read {
            let mut capture = vec![0u8; bits::bytes_for(bits)];
            self.do_shift(last_tms, tx, Some(&mut capture), bits)?;
            self.pending_reads.push_back(capture);
        } else {
            self.do_shift(last_tms, tx, None, bits)?;
        }
        self.stats.shift_time += start.elapsed();
        Ok(want_read)
    }

    fn shift_data_read_only(&mut self, rx: Option<&mut [u8]>, bits: usize) -> Result<bool> {
        let Some(capture) = self.pending_reads.pop_front() else {
            return Ok(false);
        };
        if let Some(rx) = rx {
            let n = bits::bytes_for(bits).min(capture.len()).min(rx.len());
            rx[..n].copy_from_slice(&capture[..n]);
        }
        Ok(true)
    }

    fn statistics(&mut self) -> Result<AdapterStatistics> {
        Ok(self.stats)
    }

    fn as_gpio(&mut self) -> Option<&mut dyn GpioAdapter> {
        if self.gpio.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

impl GpioAdapter for EmulatedAdapter {
    fn pin_count(&self) -> usize {
        self.gpio.len()
    }

    fn read_state(&mut self) -> Result<Vec<GpioPin>> {
        Ok(self.gpio.clone())
    }

    fn write_state(&mut self, pins: &[GpioPin]) -> Result<()> {
        if pins.len() != self.gpio.len() {
            return Err(Error::gigo(format!(
                "expected {} pin states, got {}",
                self.gpio.len(),
                pins.len()
            )));
        }
        self.gpio.copy_from_slice(pins);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idcode_via_raw_clocks(adapter: &mut EmulatedAdapter) -> u32 {
        // TLR, then to Shift-DR, then clock out 32 bits.
        adapter.shift_tms(false, 0x3F, 6).unwrap();
        adapter.shift_tms(false, 0x00, 1).unwrap();
        adapter.shift_tms(false, 0x01, 3).unwrap();
        let mut out = [0u8; 4];
        adapter
            .shift_data(false, &[0u8; 4], Some(&mut out), 32)
            .unwrap();
        u32::from_le_bytes(out)
    }

    #[test]
    fn idcode_shifts_out_after_reset() {
        let mut adapter = EmulatedAdapter::new("emu", "0001");
        adapter.push_generic_tap(0x4BA0_0477, 4);
        assert_eq!(idcode_via_raw_clocks(&mut adapter), 0x4BA0_0477);
    }

    #[test]
    fn two_taps_concatenate_idcodes() {
        let mut adapter = EmulatedAdapter::new("emu", "0001");
        adapter.push_generic_tap(0x4BA0_0477, 4);
        adapter.push_generic_tap(0x4A0A_9049, 8);
        adapter.shift_tms(false, 0x3F, 6).unwrap();
        adapter.shift_tms(false, 0x00, 1).unwrap();
        adapter.shift_tms(false, 0x01, 3).unwrap();
        let mut out = [0u8; 8];
        adapter
            .shift_data(false, &[0u8; 8], Some(&mut out), 64)
            .unwrap();
        assert_eq!(
            u32::from_le_bytes(out[0..4].try_into().unwrap()),
            0x4BA0_0477
        );
        assert_eq!(
            u32::from_le_bytes(out[4..8].try_into().unwrap()),
            0x4A0A_9049
        );
    }

    #[test]
    fn stuck_tdo_overrides_chain() {
        let mut adapter = EmulatedAdapter::new("emu", "0001");
        adapter.push_generic_tap(0x4BA0_0477, 4);
        adapter.set_stuck_tdo(Some(true));
        assert_eq!(idcode_via_raw_clocks(&mut adapter), 0xFFFF_FFFF);
    }

    #[test]
    fn split_reads_fulfil_in_fifo_order() {
        let mut adapter = EmulatedAdapter::new("emu", "0001");
        adapter.push_generic_tap(0x4BA0_0477, 4);
        adapter.shift_tms(false, 0x3F, 6).unwrap();
        adapter.shift_tms(false, 0x00, 1).unwrap();
        adapter.shift_tms(false, 0x01, 3).unwrap();

        let mut sink = [0u8; 1];
        assert!(adapter
            .shift_data_write_only(false, &[0xAA], Some(&mut sink), 8)
            .unwrap());
        assert!(adapter
            .shift_data_write_only(false, &[0x55], Some(&mut sink), 8)
            .unwrap());

        let mut first = [0u8; 1];
        let mut second = [0u8; 1];
        assert!(adapter
            .shift_data_read_only(Some(&mut first), 8)
            .unwrap());
        assert!(adapter
            .shift_data_read_only(Some(&mut second), 8)
            .unwrap());
        // Nothing left pending.
        assert!(!adapter.shift_data_read_only(Some(&mut first), 8).unwrap());
    }

    #[test]
    fn gpio_bank_roundtrip() {
        let mut adapter = EmulatedAdapter::new("emu", "0001").with_gpio(4);
        let gpio = adapter.as_gpio().unwrap();
        assert_eq!(gpio.pin_count(), 4);
        let mut pins = gpio.read_state().unwrap();
        pins[2] = GpioPin {
            value: true,
            output: true,
        };
        gpio.write_state(&pins).unwrap();
        assert_eq!(gpio.read_state().unwrap()[2].to_byte(), 0x03);
    }

    #[test]
    fn statistics_accumulate() {
        let mut adapter = EmulatedAdapter::new("emu", "0001");
        adapter.push_generic_tap(0x4BA0_0477, 4);
        adapter.shift_tms(false, 0x3F, 6).unwrap();
        adapter.idle_clocks(100).unwrap();
        adapter.shift_data(false, &[0u8; 2], None, 16).unwrap();
        let stats = adapter.statistics().unwrap();
        assert_eq!(stats.mode_bits, 6);
        assert_eq!(stats.idle_clocks, 100);
        assert_eq!(stats.data_bits, 16);
        assert_eq!(stats.shift_ops, 2);
    }
}
