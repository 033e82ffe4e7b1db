//! TCP client for a remote `jtagd` instance.
//!
//! Implements [`JtagAdapter`] by translating every operation into the
//! opcode protocol of [`super::protocol`]. Requests that need no response
//! are buffered locally and pushed out in one socket write, so a long run
//! of deferred scans costs a single round-trip at the next read or commit.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::adapter::protocol as proto;
use crate::adapter::{AdapterStatistics, GpioAdapter, GpioPin, JtagAdapter};
use crate::bits;
use crate::{Error, Result};

/// Local send buffer bound; matches the preferred frame size of the
/// buffered USB backends the daemon typically fronts.
const SEND_BUFFER_LIMIT: usize = 4096;

/// A [`JtagAdapter`] backed by a `jtagd` server.
#[derive(Debug)]
pub struct NetworkedAdapter {
    socket: TcpStream,
    send_buffer: Vec<u8>,
    gpio_pins: Vec<GpioPin>,
    shift_time: Duration,
}

impl NetworkedAdapter {
    /// Connects to a `jtagd` server and loads the GPIO bank state, if the
    /// adapter behind the server has one.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let socket = TcpStream::connect(addr)?;
        socket.set_nodelay(true)?;

        let mut adapter = NetworkedAdapter {
            socket,
            send_buffer: Vec::new(),
            gpio_pins: Vec::new(),
            shift_time: Duration::ZERO,
        };

        if adapter.query_u8(proto::OP_HAS_GPIO)? != 0 {
            let count = adapter.query_u8(proto::OP_GET_GPIO_PIN_COUNT)? as usize;
            adapter.gpio_pins = vec![GpioPin::default(); count];
            adapter.refresh_gpio_state()?;
        }

        Ok(adapter)
    }

    fn buffered_send(&mut self, data: &[u8]) -> Result<()> {
        self.send_buffer.extend_from_slice(data);
        if self.send_buffer.len() >= SEND_BUFFER_LIMIT {
            self.send_flush()?;
        }
        Ok(())
    }

    fn send_flush(&mut self) -> Result<()> {
        if !self.send_buffer.is_empty() {
            self.socket.write_all(&self.send_buffer)?;
            self.send_buffer.clear();
        }
        Ok(())
    }

    fn query_u8(&mut self, op: u8) -> Result<u8> {
        self.send_flush()?;
        self.socket.write_all(&[op])?;
        let mut out = [0u8; 1];
        self.socket.read_exact(&mut out)?;
        Ok(out[0])
    }

    fn query_u32(&mut self, op: u8) -> Result<u32> {
        self.send_flush()?;
        self.socket.write_all(&[op])?;
        let mut out = [0u8; 4];
        self.socket.read_exact(&mut out)?;
        Ok(u32::from_le_bytes(out))
    }

    fn query_u64(&mut self, op: u8) -> Result<u64> {
        self.send_flush()?;
        self.socket.write_all(&[op])?;
        let mut out = [0u8; 8];
        self.socket.read_exact(&mut out)?;
        Ok(u64::from_le_bytes(out))
    }

    fn query_string(&mut self, op: u8) -> Result<String> {
        self.send_flush()?;
        self.socket.write_all(&[op])?;
        let mut len = [0u8; 2];
        self.socket.read_exact(&mut len)?;
        let mut buf = vec![0u8; u16::from_le_bytes(len) as usize];
        self.socket.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|_| Error::framing("server sent a non-UTF-8 string"))
    }

    fn refresh_gpio_state(&mut self) -> Result<()> {
        self.send_flush()?;
        self.socket.write_all(&[proto::OP_READ_GPIO_STATE])?;
        let mut buf = vec![0u8; self.gpio_pins.len()];
        self.socket.read_exact(&mut buf)?;
        for (pin, byte) in self.gpio_pins.iter_mut().zip(buf) {
            *pin = GpioPin::from_byte(byte);
        }
        Ok(())
    }
}

impl Drop for NetworkedAdapter {
    fn drop(&mut self) {
        // Best effort; the server also cleans up on disconnect.
        let _ = self.send_flush();
        let _ = self.socket.write_all(&[proto::OP_QUIT]);
    }
}

impl JtagAdapter for NetworkedAdapter {
    fn name(&mut self) -> Result<String> {
        self.query_string(proto::OP_GET_NAME)
    }

    fn serial(&mut self) -> Result<String> {
        self.query_string(proto::OP_GET_SERIAL)
    }

    fn user_id(&mut self) -> Result<String> {
        self.query_string(proto::OP_GET_USERID)
    }

    fn frequency_hz(&mut self) -> Result<u32> {
        self.query_u32(proto::OP_GET_FREQ)
    }

    fn shift_data(
        &mut self,
        last_tms: bool,
        tx: &[u8],
        rx: Option<&mut [u8]>,
        bits: usize,
    ) -> Result<()> {
        let start = Instant::now();
        let byte_len = bits::bytes_for(bits);

        let op = if rx.is_some() {
            proto::OP_SHIFT_DATA
        } else {
            proto::OP_SHIFT_DATA_WO
        };
        self.buffered_send(&[op, u8::from(last_tms)])?;
        self.buffered_send(&(bits as u32).to_le_bytes())?;
        self.buffered_send(&tx[..byte_len])?;
        self.send_flush()?;

        if let Some(rx) = rx {
            self.socket.read_exact(&mut rx[..byte_len])?;
        }

        self.shift_time += start.elapsed();
        Ok(())
    }

    fn shift_tms(&mut self, _tdi: bool, _tms_bits: u8, _count: usize) -> Result<()> {
        Err(Error::Adapter(
            "raw TMS shifts are not allowed on a networked adapter (use the state-level interface)"
                .to_string(),
        ))
    }

    fn idle_clocks(&mut self, n: usize) -> Result<()> {
        let start = Instant::now();
        self.buffered_send(&[proto::OP_DUMMY_CLOCK])?;
        self.buffered_send(&(n as u32).to_le_bytes())?;
        self.flush()?;
        self.shift_time += start.elapsed();
        Ok(())
    }

    fn idle_clocks_deferred(&mut self, n: usize) -> Result<()> {
        self.buffered_send(&[proto::OP_DUMMY_CLOCK_DEFERRED])?;
        self.buffered_send(&(n as u32).to_le_bytes())
    }

    fn test_logic_reset(&mut self) -> Result<()> {
        self.buffered_send(&[proto::OP_TLR])
    }

    fn reset_to_idle(&mut self) -> Result<()> {
        self.buffered_send(&[proto::OP_RESET_IDLE])
    }

    fn enter_shift_ir(&mut self) -> Result<()> {
        self.buffered_send(&[proto::OP_ENTER_SIR])
    }

    fn leave_exit1_ir(&mut self) -> Result<()> {
        self.buffered_send(&[proto::OP_LEAVE_E1IR])
    }

    fn enter_shift_dr(&mut self) -> Result<()> {
        self.buffered_send(&[proto::OP_ENTER_SDR])
    }

    fn leave_exit1_dr(&mut self) -> Result<()> {
        self.buffered_send(&[proto::OP_LEAVE_E1DR])
    }

    fn flush(&mut self) -> Result<()> {
        self.buffered_send(&[proto::OP_COMMIT])?;
        self.send_flush()?;
        // Wait for the single-byte commit acknowledgement.
        let mut ack = [0u8; 1];
        self.socket.read_exact(&mut ack)?;
        Ok(())
    }

    fn split_scan_supported(&mut self) -> Result<bool> {
        Ok(self.query_u8(proto::OP_SPLIT_SUPPORTED)? != 0)
    }

    fn shift_data_write_only(
        &mut self,
        last_tms: bool,
        tx: &[u8],
        rx: Option<&mut [u8]>,
        bits: usize,
    ) -> Result<bool> {
        let start = Instant::now();
        let byte_len = bits::bytes_for(bits);

        self.buffered_send(&[proto::OP_SHIFT_DATA_WRITE_ONLY, u8::from(last_tms)])?;
        self.buffered_send(&(bits as u32).to_le_bytes())?;
        self.buffered_send(&[u8::from(rx.is_some())])?;
        self.buffered_send(&tx[..byte_len])?;
        self.send_flush()?;

        let mut status = [0u8; 1];
        self.socket.read_exact(&mut status)?;
        match status[0] {
            proto::STATUS_DONE => {
                if let Some(rx) = rx {
                    self.socket.read_exact(&mut rx[..byte_len])?;
                }
                self.shift_time += start.elapsed();
                Ok(false)
            }
            proto::STATUS_DEFERRED => {
                self.shift_time += start.elapsed();
                Ok(true)
            }
            _ => Err(Error::Adapter(
                "split write failed server-side".to_string(),
            )),
        }
    }

    fn shift_data_read_only(&mut self, rx: Option<&mut [u8]>, bits: usize) -> Result<bool> {
        let Some(rx) = rx else {
            return Ok(false);
        };
        let start = Instant::now();
        let byte_len = bits::bytes_for(bits);

        self.send_flush()?;
        self.socket.write_all(&[proto::OP_SHIFT_DATA_READ_ONLY])?;
        self.socket.write_all(&(bits as u32).to_le_bytes())?;

        let mut status = [0u8; 1];
        self.socket.read_exact(&mut status)?;
        match status[0] {
            proto::STATUS_DONE => Ok(false),
            proto::STATUS_DEFERRED => {
                self.socket.read_exact(&mut rx[..byte_len])?;
                self.shift_time += start.elapsed();
                Ok(true)
            }
            _ => Err(Error::Adapter("split read failed server-side".to_string())),
        }
    }

    fn statistics(&mut self) -> Result<AdapterStatistics> {
        Ok(AdapterStatistics {
            shift_ops: self.query_u64(proto::OP_PERF_SHIFT)?,
            data_bits: self.query_u64(proto::OP_PERF_DATA)?,
            mode_bits: self.query_u64(proto::OP_PERF_MODE)?,
            idle_clocks: self.query_u64(proto::OP_PERF_DUMMY)?,
            recoverable_errors: self.query_u64(proto::OP_PERF_RECOV)?,
            shift_time: self.shift_time,
        })
    }

    fn as_gpio(&mut self) -> Option<&mut dyn GpioAdapter> {
        if self.gpio_pins.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

impl GpioAdapter for NetworkedAdapter {
    fn pin_count(&self) -> usize {
        self.gpio_pins.len()
    }

    fn read_state(&mut self) -> Result<Vec<GpioPin>> {
        self.refresh_gpio_state()?;
        Ok(self.gpio_pins.clone())
    }

    fn write_state(&mut self, pins: &[GpioPin]) -> Result<()> {
        if pins.len() != self.gpio_pins.len() {
            return Err(Error::gigo(format!(
                "expected {} pin states, got {}",
                self.gpio_pins.len(),
                pins.len()
            )));
        }
        self.gpio_pins.copy_from_slice(pins);
        self.send_flush()?;
        self.socket.write_all(&[proto::OP_WRITE_GPIO_STATE])?;
        let bytes: Vec<u8> = pins.iter().map(|p| p.to_byte()).collect();
        self.socket.write_all(&bytes)?;
        Ok(())
    }
}
