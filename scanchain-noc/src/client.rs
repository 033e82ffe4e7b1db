//! Client side of the NoC switch.
//!
//! A [`SwitchConnection`] owns one TCP connection and the ephemeral
//! endpoint address the switch granted it. Receives are class-aware:
//! waiting for an RPC frame buffers any DMA frames that arrive in the
//! meantime and vice versa, and interrupts arriving mid-call are buffered
//! rather than mistaken for replies.
//!
//! Every blocking receive takes a timeout. On expiry the caller gets
//! `Ok(None)` from the `recv_*` helpers, or a timeout error from the
//! call-level helpers; retrying is the caller's decision.

use std::collections::VecDeque;
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::frame::{DmaFrame, DmaOpcode, RpcFrame, RpcType, SwitchFrame};
use crate::switch::{read_frame, write_frame};
use crate::{NocError, Result};

/// A connection to a NoC switch, bound to one ephemeral endpoint.
pub struct SwitchConnection {
    socket: TcpStream,
    local_addr: u16,
    pending_rpc: VecDeque<RpcFrame>,
    pending_dma: VecDeque<DmaFrame>,
    pending_interrupts: VecDeque<RpcFrame>,
    pending_calls: VecDeque<RpcFrame>,
}

impl SwitchConnection {
    /// Connects and reads the endpoint-address greeting.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<SwitchConnection> {
        let socket = TcpStream::connect(addr)?;
        socket.set_nodelay(true)?;
        let mut greeting = [0u8; 2];
        {
            use std::io::Read;
            let mut s = &socket;
            s.read_exact(&mut greeting)?;
        }
        let local_addr = u16::from_be_bytes(greeting);
        tracing::debug!("switch granted endpoint 0x{local_addr:04x}");
        Ok(SwitchConnection {
            socket,
            local_addr,
            pending_rpc: VecDeque::new(),
            pending_dma: VecDeque::new(),
            pending_interrupts: VecDeque::new(),
            pending_calls: VecDeque::new(),
        })
    }

    /// The endpoint address the switch allocated for this connection.
    pub fn local_addr(&self) -> u16 {
        self.local_addr
    }

    /// Sends an RPC frame. The switch stamps `from` regardless of what the
    /// frame carries.
    pub fn send_rpc(&mut self, frame: &RpcFrame) -> Result<()> {
        write_frame(&mut self.socket, &SwitchFrame::Rpc(*frame))?;
        self.socket.flush()?;
        Ok(())
    }

    /// Sends a DMA frame.
    pub fn send_dma(&mut self, frame: &DmaFrame) -> Result<()> {
        write_frame(&mut self.socket, &SwitchFrame::Dma(frame.clone()))?;
        self.socket.flush()?;
        Ok(())
    }

    /// Pulls one frame off the socket, waiting at most `timeout`.
    fn poll_frame(&mut self, timeout: Duration) -> Result<Option<SwitchFrame>> {
        self.socket.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        match read_frame(&mut self.socket) {
            Ok(frame) => Ok(Some(frame)),
            Err(NocError::Network(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Receives the next RPC frame, buffering DMA frames seen on the way.
    pub fn recv_rpc_timeout(&mut self, timeout: Duration) -> Result<Option<RpcFrame>> {
        if let Some(frame) = self.pending_rpc.pop_front() {
            return Ok(Some(frame));
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match self.poll_frame(remaining)? {
                Some(SwitchFrame::Rpc(frame)) => return Ok(Some(frame)),
                Some(SwitchFrame::Dma(frame)) => self.pending_dma.push_back(frame),
                None => return Ok(None),
            }
        }
    }

    /// Receives the next DMA frame, buffering RPC frames seen on the way.
    pub fn recv_dma_timeout(&mut self, timeout: Duration) -> Result<Option<DmaFrame>> {
        if let Some(frame) = self.pending_dma.pop_front() {
            return Ok(Some(frame));
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match self.poll_frame(remaining)? {
                Some(SwitchFrame::Dma(frame)) => return Ok(Some(frame)),
                Some(SwitchFrame::Rpc(frame)) => self.pending_rpc.push_back(frame),
                None => return Ok(None),
            }
        }
    }

    /// Interrupts buffered while waiting for call replies.
    pub fn pending_interrupts(&self) -> impl Iterator<Item = &RpcFrame> {
        self.pending_interrupts.iter()
    }

    /// Unsolicited incoming calls buffered while waiting for replies.
    pub fn pending_calls(&self) -> impl Iterator<Item = &RpcFrame> {
        self.pending_calls.iter()
    }

    /// Performs a function call: sends CALL, waits for the matching return,
    /// honoring RETRY, failing on RETURN_FAIL and buffering interrupts.
    pub fn rpc_call(
        &mut self,
        addr: u16,
        callnum: u8,
        d0: u32,
        d1: u32,
        d2: u32,
        timeout: Duration,
    ) -> Result<RpcFrame> {
        let call = RpcFrame {
            from: self.local_addr,
            to: addr,
            callnum,
            rpc_type: RpcType::Call,
            data: [d0, d1, d2],
        };
        self.send_rpc(&call)?;

        loop {
            let Some(reply) = self.recv_rpc_timeout(timeout)? else {
                return Err(NocError::Timeout(format!(
                    "timed out waiting for response to RPC call {callnum} to 0x{addr:04x}"
                )));
            };
            match reply.rpc_type {
                RpcType::Interrupt => {
                    self.pending_interrupts.push_back(reply);
                }
                RpcType::ReturnSuccess => {
                    if reply.from == addr {
                        return Ok(reply);
                    }
                    tracing::warn!(
                        "waiting for return from 0x{addr:04x}, got success from 0x{:04x}",
                        reply.from
                    );
                }
                RpcType::ReturnFail => {
                    if reply.from == addr {
                        return Err(NocError::Firmware(format!(
                            "RPC call {callnum} to 0x{addr:04x} failed"
                        )));
                    }
                    tracing::warn!(
                        "waiting for return from 0x{addr:04x}, got failure from 0x{:04x}",
                        reply.from
                    );
                }
                RpcType::ReturnRetry => {
                    if reply.from == addr {
                        self.send_rpc(&call)?;
                    } else {
                        return Err(NocError::Firmware(
                            "got unexpected retry message".to_string(),
                        ));
                    }
                }
                RpcType::Call => {
                    self.pending_calls.push_back(reply);
                }
            }
        }
    }

    /// Blocks until an interrupt from `addr` arrives.
    pub fn wait_for_interrupt_from(&mut self, addr: u16, timeout: Duration) -> Result<RpcFrame> {
        if let Some(i) = self
            .pending_interrupts
            .iter()
            .position(|frame| frame.from == addr)
        {
            if let Some(frame) = self.pending_interrupts.remove(i) {
                return Ok(frame);
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(NocError::Timeout(format!(
                    "timed out waiting for interrupt from 0x{addr:04x}"
                )));
            }
            let Some(frame) = self.recv_rpc_timeout(remaining)? else {
                continue;
            };
            match frame.rpc_type {
                RpcType::Interrupt if frame.from == addr => return Ok(frame),
                RpcType::Interrupt => self.pending_interrupts.push_back(frame),
                RpcType::Call => self.pending_calls.push_back(frame),
                other => {
                    tracing::warn!(
                        "waiting for interrupt from 0x{addr:04x}, got {other:?} from 0x{:04x}",
                        frame.from
                    );
                }
            }
        }
    }

    /// Bulk write: sends a WRITE_REQUEST and waits for the success or
    /// failure interrupt.
    pub fn dma_write(
        &mut self,
        addr: u16,
        mem_addr: u32,
        data: &[u32],
        success_interrupt: u8,
        fail_interrupt: u8,
        timeout: Duration,
    ) -> Result<()> {
        self.send_dma(&DmaFrame {
            from: self.local_addr,
            to: addr,
            opcode: DmaOpcode::WriteRequest,
            address: mem_addr,
            data: data.to_vec(),
        })?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(NocError::Timeout(
                    "timed out waiting for response to DMA write".to_string(),
                ));
            }
            let Some(frame) = self.recv_rpc_timeout(remaining)? else {
                continue;
            };
            match frame.rpc_type {
                RpcType::Interrupt if frame.from == addr => {
                    if frame.callnum == success_interrupt {
                        return Ok(());
                    }
                    if frame.callnum == fail_interrupt {
                        return Err(NocError::Firmware("DMA write failed".to_string()));
                    }
                    self.pending_interrupts.push_back(frame);
                }
                RpcType::Interrupt => self.pending_interrupts.push_back(frame),
                RpcType::Call => self.pending_calls.push_back(frame),
                other => {
                    tracing::warn!(
                        "waiting for DMA ack from 0x{addr:04x}, got {other:?} from 0x{:04x}",
                        frame.from
                    );
                }
            }
        }
    }

    /// Bulk read: sends a READ_REQUEST and collects the READ_DATA reply.
    pub fn dma_read(
        &mut self,
        addr: u16,
        mem_addr: u32,
        len: usize,
        fail_interrupt: u8,
        timeout: Duration,
    ) -> Result<Vec<u32>> {
        self.send_dma(&DmaFrame {
            from: self.local_addr,
            to: addr,
            opcode: DmaOpcode::ReadRequest,
            address: mem_addr,
            data: vec![0; len],
        })?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(NocError::Timeout(
                    "timed out waiting for response to DMA read".to_string(),
                ));
            }

            if let Some(frame) = self.recv_dma_timeout(remaining)? {
                if frame.from != addr || frame.opcode != DmaOpcode::ReadData {
                    return Err(NocError::Firmware("got unexpected message".to_string()));
                }
                return Ok(frame.data);
            }

            // Interleaved RPC traffic may carry the failure interrupt.
            while let Some(frame) = self.pending_rpc.pop_front() {
                match frame.rpc_type {
                    RpcType::Interrupt if frame.from == addr => {
                        if frame.callnum == fail_interrupt {
                            return Err(NocError::Firmware("DMA read failed".to_string()));
                        }
                        self.pending_interrupts.push_back(frame);
                    }
                    RpcType::Interrupt => self.pending_interrupts.push_back(frame),
                    RpcType::Call => self.pending_calls.push_back(frame),
                    other => {
                        tracing::warn!(
                            "waiting for DMA data from 0x{addr:04x}, got {other:?}"
                        );
                    }
                }
            }
        }
    }
}
