//! RPC and DMA frame codecs.
//!
//! Both frame classes travel big-endian regardless of host byte order;
//! packing is explicit byte assembly, never a memory-layout cast.
//!
//! An RPC frame is 128 bits: `from` (16), `to` (16), `callnum` (8), `type`
//! (3), `d0` (21), `d1` (32), `d2` (32). A DMA frame is a 12-byte header
//! (`from`, `to`, 2-bit opcode, 10-bit word count, 32-bit address)
//! followed by up to 512 payload words.

use crate::{NocError, Result};

/// Size of a packed RPC frame.
pub const RPC_FRAME_BYTES: usize = 16;
/// Size of a DMA frame header.
pub const DMA_HEADER_BYTES: usize = 12;
/// Largest DMA payload, in 32-bit words.
pub const MAX_DMA_WORDS: usize = 512;
/// Destination address that reaches every live endpoint.
pub const BROADCAST_ADDR: u16 = 0xFFFF;

/// `d0` is 21 bits wide.
pub const MAX_D0: u32 = (1 << 21) - 1;

/// RPC message types. Values 5–7 are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RpcType {
    Call = 0,
    ReturnSuccess = 1,
    ReturnFail = 2,
    ReturnRetry = 3,
    Interrupt = 4,
}

impl TryFrom<u8> for RpcType {
    type Error = NocError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(RpcType::Call),
            1 => Ok(RpcType::ReturnSuccess),
            2 => Ok(RpcType::ReturnFail),
            3 => Ok(RpcType::ReturnRetry),
            4 => Ok(RpcType::Interrupt),
            other => Err(NocError::framing(format!(
                "reserved RPC message type {other}"
            ))),
        }
    }
}

/// One short fixed-size RPC message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcFrame {
    pub from: u16,
    pub to: u16,
    pub callnum: u8,
    pub rpc_type: RpcType,
    /// `data[0]` only carries 21 bits.
    pub data: [u32; 3],
}

impl RpcFrame {
    /// Packs into the 16-byte wire form.
    ///
    /// Fails with a framing error if `data[0]` does not fit its 21 bits.
    pub fn pack(&self) -> Result<[u8; RPC_FRAME_BYTES]> {
        if self.data[0] > MAX_D0 {
            return Err(NocError::framing(format!(
                "d0 0x{:08x} does not fit in 21 bits",
                self.data[0]
            )));
        }
        let mut out = [0u8; RPC_FRAME_BYTES];
        out[0..2].copy_from_slice(&self.from.to_be_bytes());
        out[2..4].copy_from_slice(&self.to.to_be_bytes());
        out[4] = self.callnum;
        let word = (u32::from(self.rpc_type as u8) << 21) | self.data[0];
        out[5] = (word >> 16) as u8;
        out[6] = (word >> 8) as u8;
        out[7] = word as u8;
        out[8..12].copy_from_slice(&self.data[1].to_be_bytes());
        out[12..16].copy_from_slice(&self.data[2].to_be_bytes());
        Ok(out)
    }

    /// Unpacks from the 16-byte wire form, rejecting reserved types.
    pub fn unpack(raw: &[u8; RPC_FRAME_BYTES]) -> Result<RpcFrame> {
        let rpc_type = RpcType::try_from(raw[5] >> 5)?;
        let d0 = (u32::from(raw[5] & 0x1F) << 16) | (u32::from(raw[6]) << 8) | u32::from(raw[7]);
        Ok(RpcFrame {
            from: u16::from_be_bytes([raw[0], raw[1]]),
            to: u16::from_be_bytes([raw[2], raw[3]]),
            callnum: raw[4],
            rpc_type,
            data: [
                d0,
                u32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]]),
                u32::from_be_bytes([raw[12], raw[13], raw[14], raw[15]]),
            ],
        })
    }
}

/// DMA opcodes. Value 3 is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DmaOpcode {
    WriteRequest = 0,
    ReadRequest = 1,
    ReadData = 2,
}

impl TryFrom<u8> for DmaOpcode {
    type Error = NocError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(DmaOpcode::WriteRequest),
            1 => Ok(DmaOpcode::ReadRequest),
            2 => Ok(DmaOpcode::ReadData),
            other => Err(NocError::framing(format!("reserved DMA opcode {other}"))),
        }
    }
}

/// One variable-length DMA message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmaFrame {
    pub from: u16,
    pub to: u16,
    pub opcode: DmaOpcode,
    /// Target physical address within the destination node.
    pub address: u32,
    /// Payload words; the wire length field is `data.len()`.
    pub data: Vec<u32>,
}

impl DmaFrame {
    /// Packs header and payload into wire form.
    pub fn pack(&self) -> Result<Vec<u8>> {
        if self.data.len() > MAX_DMA_WORDS {
            return Err(NocError::framing(format!(
                "DMA payload of {} words exceeds the {MAX_DMA_WORDS}-word limit",
                self.data.len()
            )));
        }
        let mut out = Vec::with_capacity(DMA_HEADER_BYTES + self.data.len() * 4);
        out.extend_from_slice(&self.from.to_be_bytes());
        out.extend_from_slice(&self.to.to_be_bytes());
        let word = (u32::from(self.opcode as u8) << 30) | self.data.len() as u32;
        out.extend_from_slice(&word.to_be_bytes());
        out.extend_from_slice(&self.address.to_be_bytes());
        for value in &self.data {
            out.extend_from_slice(&value.to_be_bytes());
        }
        Ok(out)
    }

    /// Unpacks a header, returning the frame shell and its payload word
    /// count. The caller reads that many words and appends them.
    pub fn unpack_header(raw: &[u8; DMA_HEADER_BYTES]) -> Result<(DmaFrame, usize)> {
        let word = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);
        let opcode = DmaOpcode::try_from((word >> 30) as u8)?;
        let len = (word & 0x3FF) as usize;
        if len > MAX_DMA_WORDS {
            return Err(NocError::framing(format!(
                "DMA length {len} exceeds the {MAX_DMA_WORDS}-word limit"
            )));
        }
        Ok((
            DmaFrame {
                from: u16::from_be_bytes([raw[0], raw[1]]),
                to: u16::from_be_bytes([raw[2], raw[3]]),
                opcode,
                address: u32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]]),
                data: Vec::with_capacity(len),
            },
            len,
        ))
    }
}

/// Either frame class, as moved by the switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchFrame {
    Rpc(RpcFrame),
    Dma(DmaFrame),
}

impl SwitchFrame {
    pub fn from_addr(&self) -> u16 {
        match self {
            SwitchFrame::Rpc(f) => f.from,
            SwitchFrame::Dma(f) => f.from,
        }
    }

    pub fn to_addr(&self) -> u16 {
        match self {
            SwitchFrame::Rpc(f) => f.to,
            SwitchFrame::Dma(f) => f.to,
        }
    }

    pub fn set_from(&mut self, from: u16) {
        match self {
            SwitchFrame::Rpc(f) => f.from = from,
            SwitchFrame::Dma(f) => f.from = from,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_pack_reference_vector() {
        let frame = RpcFrame {
            from: 0xABCD,
            to: 0xEF01,
            callnum: 0xCC,
            rpc_type: RpcType::ReturnFail,
            data: [0x123456, 0x42414039, 0x9090CD80],
        };
        let packed = frame.pack().unwrap();
        assert_eq!(
            packed,
            [
                0xAB, 0xCD, 0xEF, 0x01, 0xCC, 0x52, 0x34, 0x56, 0x42, 0x41, 0x40, 0x39, 0x90,
                0x90, 0xCD, 0x80
            ]
        );
        assert_eq!(RpcFrame::unpack(&packed).unwrap(), frame);
    }

    #[test]
    fn rpc_d0_must_fit_21_bits() {
        let frame = RpcFrame {
            from: 0,
            to: 0,
            callnum: 0,
            rpc_type: RpcType::Call,
            data: [1 << 21, 0, 0],
        };
        assert!(matches!(frame.pack(), Err(NocError::Framing(_))));
    }

    #[test]
    fn rpc_reserved_type_rejected() {
        let mut raw = [0u8; RPC_FRAME_BYTES];
        raw[5] = 5 << 5;
        assert!(matches!(
            RpcFrame::unpack(&raw),
            Err(NocError::Framing(_))
        ));
    }

    #[test]
    fn dma_roundtrip() {
        let frame = DmaFrame {
            from: 0x0001,
            to: 0xC000,
            opcode: DmaOpcode::ReadData,
            address: 0x4000_1000,
            data: vec![0xDEAD_BEEF, 0x1234_5678],
        };
        let packed = frame.pack().unwrap();
        assert_eq!(packed.len(), DMA_HEADER_BYTES + 8);

        let header: [u8; DMA_HEADER_BYTES] = packed[..DMA_HEADER_BYTES].try_into().unwrap();
        let (mut parsed, len) = DmaFrame::unpack_header(&header).unwrap();
        assert_eq!(len, 2);
        for word in packed[DMA_HEADER_BYTES..].chunks(4) {
            parsed
                .data
                .push(u32::from_be_bytes(word.try_into().unwrap()));
        }
        assert_eq!(parsed, frame);
    }

    #[test]
    fn dma_oversized_payload_rejected() {
        let frame = DmaFrame {
            from: 0,
            to: 0,
            opcode: DmaOpcode::WriteRequest,
            address: 0,
            data: vec![0; MAX_DMA_WORDS + 1],
        };
        assert!(matches!(frame.pack(), Err(NocError::Framing(_))));
    }

    #[test]
    fn dma_reserved_opcode_rejected() {
        let mut raw = [0u8; DMA_HEADER_BYTES];
        raw[4] = 0xC0;
        assert!(matches!(
            DmaFrame::unpack_header(&raw),
            Err(NocError::Framing(_))
        ));
    }
}
