//! Indirect SPI flash programming.
//!
//! FPGAs with a configuration flash on their own SPI bus have no JTAG path
//! to it; a small bounce bitstream is loaded first, exposing the flash
//! through the USER1/USER2 instructions. USER1 carries a command record
//! (opcode, byte address, length); USER2 carries the data half of a
//! program or read. The fabric relays each record as one chip-selected
//! SPI transaction.

use crate::chain::ScanChain;
use crate::{Error, Result};

/// The bounce-bitstream command protocol.
pub mod bounce {
    /// Erase the 64 KiB sector containing the address.
    pub const CMD_ERASE_SECTOR: u8 = 0x01;
    /// Program up to one page; data follows on USER2.
    pub const CMD_PAGE_PROGRAM: u8 = 0x02;
    /// Read `len` bytes; data is collected from USER2.
    pub const CMD_READ: u8 = 0x03;
    /// Read the three JEDEC ID bytes.
    pub const CMD_QUERY_ID: u8 = 0x04;
    /// Read the one-byte status register.
    pub const CMD_READ_STATUS: u8 = 0x05;

    /// Command record size: opcode + 32-bit address + 16-bit length.
    pub const COMMAND_BYTES: usize = 7;

    /// Write-in-progress flag in the status byte.
    pub const STATUS_BUSY: u8 = 0x01;

    pub const SECTOR_SIZE: usize = 64 * 1024;
    pub const PAGE_SIZE: usize = 256;
}

/// Bytes moved per READ record while verifying or dumping.
const READ_CHUNK: usize = 4096;

/// Status polls before the flash is declared wedged.
const BUSY_POLL_LIMIT: usize = 10_000;

/// Flash operations over a loaded bounce bitstream.
pub(crate) struct FlashAccess<'c> {
    chain: &'c mut ScanChain,
    position: usize,
    user1: u8,
    user2: u8,
    ir_length: usize,
}

impl<'c> FlashAccess<'c> {
    pub(crate) fn new(
        chain: &'c mut ScanChain,
        position: usize,
        user1: u8,
        user2: u8,
        ir_length: usize,
    ) -> Self {
        FlashAccess {
            chain,
            position,
            user1,
            user2,
            ir_length,
        }
    }

    fn command(&mut self, opcode: u8, addr: u32, len: u16) -> Result<()> {
        let mut record = [0u8; bounce::COMMAND_BYTES];
        record[0] = opcode;
        record[1..5].copy_from_slice(&addr.to_le_bytes());
        record[5..7].copy_from_slice(&len.to_le_bytes());
        self.chain
            .set_ir(self.position, &[self.user1], self.ir_length)?;
        self.chain
            .scan_dr(self.position, &record, None, bounce::COMMAND_BYTES * 8)
    }

    fn data_write(&mut self, data: &[u8]) -> Result<()> {
        self.chain
            .set_ir(self.position, &[self.user2], self.ir_length)?;
        self.chain
            .scan_dr(self.position, data, None, data.len() * 8)
    }

    fn data_read(&mut self, len: usize) -> Result<Vec<u8>> {
        let zeros = vec![0u8; len];
        let mut out = vec![0u8; len];
        self.chain
            .set_ir(self.position, &[self.user2], self.ir_length)?;
        self.chain
            .scan_dr(self.position, &zeros, Some(&mut out), len * 8)?;
        Ok(out)
    }

    fn status(&mut self) -> Result<u8> {
        self.command(bounce::CMD_READ_STATUS, 0, 1)?;
        Ok(self.data_read(1)?[0])
    }

    fn wait_ready(&mut self) -> Result<()> {
        for _ in 0..BUSY_POLL_LIMIT {
            if self.status()? & bounce::STATUS_BUSY == 0 {
                return Ok(());
            }
        }
        Err(Error::board_fault("flash stuck busy"))
    }

    /// The three JEDEC ID bytes.
    pub(crate) fn query_id(&mut self) -> Result<[u8; 3]> {
        self.command(bounce::CMD_QUERY_ID, 0, 3)?;
        let id = self.data_read(3)?;
        Ok([id[0], id[1], id[2]])
    }

    /// Device capacity derived from the JEDEC capacity byte.
    pub(crate) fn capacity(&mut self) -> Result<usize> {
        let id = self.query_id()?;
        let shift = id[2] as u32;
        if !(10..=27).contains(&shift) {
            return Err(Error::board_fault(format!(
                "implausible flash capacity byte 0x{:02x} (id {:02x} {:02x} {:02x})",
                id[2], id[0], id[1], id[2]
            )));
        }
        Ok(1usize << shift)
    }

    fn erase_sector(&mut self, addr: u32) -> Result<()> {
        self.command(bounce::CMD_ERASE_SECTOR, addr, 0)?;
        self.wait_ready()
    }

    fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.command(bounce::CMD_PAGE_PROGRAM, addr, data.len() as u16)?;
        self.data_write(data)?;
        self.wait_ready()
    }

    fn read(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let mut offset = 0;
        while offset < len {
            let chunk = (len - offset).min(READ_CHUNK);
            self.command(bounce::CMD_READ, addr + offset as u32, chunk as u16)?;
            out.extend_from_slice(&self.data_read(chunk)?);
            offset += chunk;
        }
        Ok(out)
    }

    fn erase_range(&mut self, base: u32, len: usize) -> Result<()> {
        let first = base as usize & !(bounce::SECTOR_SIZE - 1);
        let end = base as usize + len;
        let mut sector = first;
        while sector < end {
            tracing::debug!("erasing sector at 0x{sector:08x}");
            self.erase_sector(sector as u32)?;
            sector += bounce::SECTOR_SIZE;
        }
        Ok(())
    }

    /// Erases, programs and verifies `payload` at `base`.
    ///
    /// A verify mismatch erases the written range again so the flash is
    /// never left partially programmed, then reports a board fault.
    pub(crate) fn program_and_verify(&mut self, base: u32, payload: &[u8]) -> Result<()> {
        let capacity = self.capacity()?;
        let end = base as usize + payload.len();
        if end > capacity {
            return Err(Error::gigo(format!(
                "image of {} bytes at 0x{base:08x} exceeds flash capacity {capacity}",
                payload.len()
            )));
        }

        tracing::info!(
            "programming {} bytes at 0x{base:08x} ({} KiB flash)",
            payload.len(),
            capacity / 1024
        );
        self.erase_range(base, payload.len())?;

        let mut addr = base;
        for page in payload.chunks(bounce::PAGE_SIZE) {
            self.page_program(addr, page)?;
            addr += page.len() as u32;
        }

        let readback = self.read(base, payload.len())?;
        if let Some(offset) = bits_differ_at(&readback, payload) {
            tracing::error!("verify mismatch at 0x{:08x}", base as usize + offset);
            self.erase_range(base, payload.len())?;
            return Err(Error::board_fault(format!(
                "flash verify mismatch at 0x{:08x}; range erased",
                base as usize + offset
            )));
        }
        tracing::info!("flash verify passed");
        Ok(())
    }

    /// Reads from `base` to the end of the device.
    pub(crate) fn dump_from(&mut self, base: u32) -> Result<Vec<u8>> {
        let capacity = self.capacity()?;
        if base as usize >= capacity {
            return Err(Error::gigo(format!(
                "dump base 0x{base:08x} is past flash capacity {capacity}"
            )));
        }
        self.read(base, capacity - base as usize)
    }
}

fn bits_differ_at(a: &[u8], b: &[u8]) -> Option<usize> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).position(|(x, y)| x != y)
}
