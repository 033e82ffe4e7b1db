//! The Xilinx `.bit` container.
//!
//! A short fixed preamble followed by tag-length-value records:
//! `'a'` design name, `'b'` part name, `'c'` date, `'d'` time, `'e'` data
//! length plus the raw configuration payload. Record lengths are
//! big-endian; the `'e'` length is 32 bits, the rest 16.

use crate::{Error, Result};

/// The fixed preamble preceding the first record.
const PREAMBLE: [u8; 9] = [0x0F, 0xF0, 0x0F, 0xF0, 0x0F, 0xF0, 0x0F, 0xF0, 0x00];

/// A parsed `.bit` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitFile {
    pub design_name: String,
    pub part_name: String,
    pub date: String,
    pub time: String,
    /// The configuration payload, in file byte order (MSB-first per byte).
    pub payload: Vec<u8>,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(Error::framing("truncated .bit file"));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16_be(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32_be(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

fn record_string(bytes: &[u8]) -> String {
    // Header strings are NUL-terminated in the file.
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl BitFile {
    /// Parses a `.bit` file.
    pub fn parse(data: &[u8]) -> Result<BitFile> {
        let mut r = Reader { data, pos: 0 };

        let preamble_len = r.u16_be()? as usize;
        let preamble = r.take(preamble_len)?;
        if preamble != PREAMBLE {
            return Err(Error::framing("bad .bit preamble"));
        }
        if r.u16_be()? != 0x0001 {
            return Err(Error::framing("bad .bit field count"));
        }

        let mut design_name = String::new();
        let mut part_name = String::new();
        let mut date = String::new();
        let mut time = String::new();

        loop {
            let tag = r.u8()?;
            match tag {
                b'a' | b'b' | b'c' | b'd' => {
                    let len = r.u16_be()? as usize;
                    let value = record_string(r.take(len)?);
                    match tag {
                        b'a' => design_name = value,
                        b'b' => part_name = value,
                        b'c' => date = value,
                        _ => time = value,
                    }
                }
                b'e' => {
                    let len = r.u32_be()? as usize;
                    let payload = r.take(len)?.to_vec();
                    return Ok(BitFile {
                        design_name,
                        part_name,
                        date,
                        time,
                        payload,
                    });
                }
                other => {
                    return Err(Error::framing(format!(
                        "unknown .bit record tag 0x{other:02x}"
                    )))
                }
            }
        }
    }

    /// Serializes back to the `.bit` container format.
    pub fn emit(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 128);
        out.extend_from_slice(&(PREAMBLE.len() as u16).to_be_bytes());
        out.extend_from_slice(&PREAMBLE);
        out.extend_from_slice(&1u16.to_be_bytes());

        for (tag, value) in [
            (b'a', &self.design_name),
            (b'b', &self.part_name),
            (b'c', &self.date),
            (b'd', &self.time),
        ] {
            out.push(tag);
            out.extend_from_slice(&((value.len() + 1) as u16).to_be_bytes());
            out.extend_from_slice(value.as_bytes());
            out.push(0);
        }

        out.push(b'e');
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BitFile {
        BitFile {
            design_name: "blinky;UserID=0xFFFFFFFF".to_string(),
            part_name: "6slx25csg324".to_string(),
            date: "2012/09/14".to_string(),
            time: "21:44:13".to_string(),
            payload: vec![0xAA, 0x99, 0x55, 0x66, 0x30, 0x00, 0x80, 0x01],
        }
    }

    #[test]
    fn emit_parse_roundtrip() {
        let bit = sample();
        let parsed = BitFile::parse(&bit.emit()).unwrap();
        assert_eq!(parsed, bit);
    }

    #[test]
    fn truncated_payload_rejected() {
        let mut data = sample().emit();
        data.truncate(data.len() - 3);
        assert!(matches!(
            BitFile::parse(&data),
            Err(crate::Error::Framing(_))
        ));
    }

    #[test]
    fn bad_preamble_rejected() {
        let mut data = sample().emit();
        data[3] ^= 0xFF;
        assert!(matches!(
            BitFile::parse(&data),
            Err(crate::Error::Framing(_))
        ));
    }

    #[test]
    fn unknown_tag_rejected() {
        let bit = sample();
        let mut data = bit.emit();
        // First record tag sits right after the preamble and field count.
        let tag_pos = 2 + PREAMBLE.len() + 2;
        data[tag_pos] = b'z';
        assert!(matches!(
            BitFile::parse(&data),
            Err(crate::Error::Framing(_))
        ));
    }
}
