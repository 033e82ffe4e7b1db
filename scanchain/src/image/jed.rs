//! The JEDEC-3C `.jed` fuse map container.
//!
//! Everything before STX (0x02) is a header comment. The body is a run of
//! `*`-terminated records between STX and ETX (0x03), followed by a
//! four-hex-digit transmission checksum over the STX-through-ETX byte
//! range. Fuse values are strict: only `'0'` and `'1'` are accepted in `L`
//! records, and test vectors are rejected outright.

use crate::{Error, Result};

const STX: u8 = 0x02;
const ETX: u8 = 0x03;

/// Fuses emitted per `L` record line.
const FUSES_PER_ROW: usize = 64;

/// A parsed JED fuse map.
#[derive(Debug, Clone)]
pub struct JedFile {
    /// Header comment with newlines collapsed to `" | "`.
    pub header_comment: String,
    fuses: Vec<bool>,
    /// Declared pin count, including power/ground/JTAG.
    pub pin_count: usize,
    /// Device annotation from an `N DEVICE` record, if present.
    pub device_name: Option<String>,
    fuse_checksum: u16,
    file_checksum: u16,
}

impl PartialEq for JedFile {
    fn eq(&self, other: &Self) -> bool {
        // The transmission checksum covers layout, not meaning; two files
        // with different comment formatting can carry the same fuse map.
        self.header_comment == other.header_comment
            && self.fuses == other.fuses
            && self.pin_count == other.pin_count
            && self.device_name == other.device_name
            && self.fuse_checksum == other.fuse_checksum
    }
}

/// Sum mod 2^16 of the little-endian byte packing of a fuse vector,
/// zero-padded on the right.
pub fn fuse_checksum_of(fuses: &[bool]) -> u16 {
    let mut sum = 0u16;
    for chunk in fuses.chunks(8) {
        let mut byte = 0u8;
        for (i, fuse) in chunk.iter().enumerate() {
            if *fuse {
                byte |= 1 << i;
            }
        }
        sum = sum.wrapping_add(u16::from(byte));
    }
    sum
}

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn bump(&mut self) -> Result<u8> {
        let b = self
            .peek()
            .ok_or_else(|| Error::framing("unexpected end of JED file"))?;
        self.pos += 1;
        Ok(b)
    }

    /// Reads a decimal integer terminated by `*`, consuming the `*`.
    fn int_line(&mut self) -> Result<usize> {
        let mut value: usize = 0;
        loop {
            match self.bump()? {
                b'*' => return Ok(value),
                d @ b'0'..=b'9' => {
                    value = value
                        .checked_mul(10)
                        .and_then(|v| v.checked_add((d - b'0') as usize))
                        .ok_or_else(|| Error::framing("integer overflow in JED record"))?;
                }
                _ => return Err(Error::framing("Bad character in integer line")),
            }
        }
    }

    /// Consumes up to the next `*`, returning the skipped bytes.
    fn until_star(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        loop {
            if self.bump()? == b'*' {
                return Ok(&self.data[start..self.pos - 1]);
            }
        }
    }
}

impl JedFile {
    /// Builds a fuse map in memory, ready for [`JedFile::emit`].
    pub fn new(fuses: Vec<bool>, pin_count: usize, device_name: Option<String>) -> JedFile {
        let fuse_checksum = fuse_checksum_of(&fuses);
        JedFile {
            header_comment: String::new(),
            fuses,
            pin_count,
            device_name,
            fuse_checksum,
            file_checksum: 0,
        }
    }

    pub fn fuse_count(&self) -> usize {
        self.fuses.len()
    }

    /// Value of fuse `index`.
    pub fn fuse(&self, index: usize) -> bool {
        self.fuses[index]
    }

    pub fn fuses(&self) -> &[bool] {
        &self.fuses
    }

    /// The fuse-array checksum (`C` record).
    pub fn fuse_checksum(&self) -> u16 {
        self.fuse_checksum
    }

    /// The transmission checksum over STX..=ETX.
    pub fn file_checksum(&self) -> u16 {
        self.file_checksum
    }

    /// Parses a JED file, validating both checksums.
    pub fn parse(data: &[u8]) -> Result<JedFile> {
        // Header comment runs up to STX; newline runs collapse to " | ".
        let stx = data
            .iter()
            .position(|&b| b == STX)
            .ok_or_else(|| Error::framing("JED file has no STX"))?;
        let mut header_comment = String::new();
        let mut last_newline = false;
        for &b in &data[..stx] {
            if b == b'\r' || b == b'\n' {
                if !last_newline {
                    header_comment.push_str(" | ");
                }
                last_newline = true;
            } else {
                header_comment.push(b as char);
                last_newline = false;
            }
        }

        // Transmission checksum over STX through ETX inclusive, compared
        // against the four hex digits that follow ETX.
        let mut file_checksum = 0u16;
        let mut expected = None;
        let mut scan = stx;
        while scan < data.len() {
            file_checksum = file_checksum.wrapping_add(u16::from(data[scan]));
            if data[scan] == ETX {
                let digits = data
                    .get(scan + 1..scan + 5)
                    .ok_or_else(|| Error::framing("JED file ends before its checksum"))?;
                let text = std::str::from_utf8(digits)
                    .map_err(|_| Error::framing("non-ASCII JED checksum"))?;
                expected = Some(
                    u16::from_str_radix(text, 16)
                        .map_err(|_| Error::framing("bad JED checksum digits"))?,
                );
                break;
            }
            scan += 1;
        }
        let expected =
            expected.ok_or_else(|| Error::framing("JED file has no ETX"))?;
        if file_checksum != expected {
            return Err(Error::framing("JED file checksum mismatch, aborting"));
        }

        let mut p = Parser {
            data,
            pos: stx + 1,
        };
        let mut fuses: Option<Vec<bool>> = None;
        let mut pin_count = 0;
        let mut device_name = None;
        let mut fuse_checksum = None;

        loop {
            let Some(b) = p.peek() else {
                return Err(Error::framing("JED body ran past end of file"));
            };
            if b.is_ascii_whitespace() {
                p.pos += 1;
                continue;
            }
            if b == ETX {
                break;
            }
            p.pos += 1;
            match b {
                b'Q' => match p.bump()? {
                    b'F' => {
                        if fuses.is_some() {
                            return Err(Error::framing(
                                "Fuse count cannot be specified more than once",
                            ));
                        }
                        fuses = Some(vec![false; p.int_line()?]);
                    }
                    b'P' => pin_count = p.int_line()?,
                    b'V' => {
                        if p.int_line()? != 0 {
                            return Err(Error::Unimplemented(
                                "JEDEC test vectors not implemented".to_string(),
                            ));
                        }
                    }
                    _ => return Err(Error::framing("Unknown Q-series opcode")),
                },
                b'F' => {
                    let default_state = p.int_line()? != 0;
                    let fuses = fuses.as_mut().ok_or_else(|| {
                        Error::framing(
                            "Cannot specify default fuse state if fuse count was not yet specified",
                        )
                    })?;
                    fuses.fill(default_state);
                }
                b'X' => {
                    if p.int_line()? != 0 {
                        return Err(Error::Unimplemented(
                            "JEDEC test vectors not implemented".to_string(),
                        ));
                    }
                }
                b'J' => {
                    p.until_star()?;
                }
                b'N' => {
                    let body = p.until_star()?;
                    let text = String::from_utf8_lossy(body);
                    if let Some(rest) = text.strip_prefix(" DEVICE ") {
                        device_name = Some(rest.to_string());
                    }
                }
                b'L' => {
                    let fuses = fuses.as_mut().ok_or_else(|| {
                        Error::framing(
                            "Cannot have a fuse data line until fuse count has been specified",
                        )
                    })?;
                    let mut address = 0usize;
                    while let Some(d @ b'0'..=b'9') = p.peek() {
                        address = address * 10 + (d - b'0') as usize;
                        p.pos += 1;
                    }
                    while p.peek().is_some_and(|b| b.is_ascii_whitespace()) {
                        p.pos += 1;
                    }
                    loop {
                        match p.bump()? {
                            b'*' => break,
                            value @ (b'0' | b'1') => {
                                if address >= fuses.len() {
                                    return Err(Error::framing(
                                        "fuse address past declared fuse count",
                                    ));
                                }
                                fuses[address] = value == b'1';
                                address += 1;
                            }
                            _ => {
                                return Err(Error::framing(
                                    "Expected 1 or 0 as fuse value, found something else",
                                ))
                            }
                        }
                    }
                }
                b'C' => {
                    while p.peek().is_some_and(|b| b.is_ascii_whitespace()) {
                        p.pos += 1;
                    }
                    let mut digits = String::new();
                    while digits.len() < 4
                        && p.peek().is_some_and(|b| b.is_ascii_hexdigit())
                    {
                        digits.push(p.bump()? as char);
                    }
                    let declared = u16::from_str_radix(&digits, 16)
                        .map_err(|_| Error::framing("bad fuse checksum digits"))?;
                    let computed =
                        fuse_checksum_of(fuses.as_deref().unwrap_or(&[]));
                    if declared != computed {
                        return Err(Error::framing("Fuse array checksum mismatch, aborting"));
                    }
                    fuse_checksum = Some(declared);
                    p.until_star()?;
                }
                other => {
                    return Err(Error::framing(format!(
                        "Unknown JEDEC programming file opcode {}",
                        other as char
                    )))
                }
            }
        }

        let fuses = fuses.unwrap_or_default();
        let fuse_checksum = fuse_checksum.unwrap_or_else(|| fuse_checksum_of(&fuses));
        Ok(JedFile {
            header_comment,
            fuses,
            pin_count,
            device_name,
            fuse_checksum,
            file_checksum,
        })
    }

    /// Serializes the fuse map in the canonical section layout.
    pub fn emit(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if !self.header_comment.is_empty() {
            out.extend_from_slice(self.header_comment.as_bytes());
            out.push(b'\n');
        }

        // Everything from STX onward feeds the transmission checksum.
        let mut body: Vec<u8> = Vec::new();
        body.push(STX);
        body.push(b'\n');

        let line = |body: &mut Vec<u8>, text: String| {
            body.extend_from_slice(text.as_bytes());
            body.push(b'\n');
        };

        line(&mut body, "N Total number of fuses for this device *".to_string());
        line(&mut body, format!("QF{}*", self.fuses.len()));
        line(&mut body, "F0*".to_string());
        line(
            &mut body,
            "N Total number of pins, including power/ground/JTAG *".to_string(),
        );
        line(&mut body, format!("QP{}*", self.pin_count));
        line(&mut body, "N Test vectors not supported *".to_string());
        line(&mut body, "QV0*".to_string());
        line(&mut body, "X0*".to_string());
        line(&mut body, "J0 0*".to_string());
        if let Some(name) = &self.device_name {
            line(&mut body, format!("N DEVICE {name}*"));
        }

        for (row, chunk) in self.fuses.chunks(FUSES_PER_ROW).enumerate() {
            let mut text = format!("L{:06} ", row * FUSES_PER_ROW);
            for fuse in chunk {
                text.push(if *fuse { '1' } else { '0' });
            }
            text.push('*');
            line(&mut body, text);
        }

        line(
            &mut body,
            format!("C{:04X}*", fuse_checksum_of(&self.fuses)),
        );
        body.push(ETX);

        let checksum: u16 = body
            .iter()
            .fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)));

        out.extend_from_slice(&body);
        out.extend_from_slice(format!("{checksum:04X}").as_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Wraps a body fragment in STX/ETX framing with a valid transmission
    /// checksum.
    fn frame(body: &str) -> Vec<u8> {
        let mut out = vec![STX];
        out.extend_from_slice(body.as_bytes());
        out.push(ETX);
        let sum: u16 = out.iter().fold(0u16, |s, &b| s.wrapping_add(u16::from(b)));
        out.extend_from_slice(format!("{sum:04X}").as_bytes());
        out
    }

    #[test]
    fn parses_fuse_rows() {
        let data = frame("QF100*\nF0*\nL0 10101*\nC0015*\n");
        let jed = JedFile::parse(&data).unwrap();
        assert_eq!(jed.fuse_count(), 100);
        let head: Vec<bool> = (0..5).map(|i| jed.fuse(i)).collect();
        assert_eq!(head, [true, false, true, false, true]);
        assert!(!jed.fuse(5));
        assert_eq!(jed.fuse_checksum(), 0x0015);
    }

    #[test]
    fn fuse_checksum_mismatch_rejected() {
        let data = frame("QF100*\nF0*\nL0 10101*\nC0006*\n");
        assert!(matches!(
            JedFile::parse(&data),
            Err(crate::Error::Framing(_))
        ));
    }

    #[test]
    fn file_checksum_mismatch_rejected() {
        let mut data = frame("QF8*\nF0*\n");
        let len = data.len();
        data[len - 1] ^= 0x01;
        assert!(matches!(
            JedFile::parse(&data),
            Err(crate::Error::Framing(_))
        ));
    }

    #[test]
    fn test_vectors_rejected() {
        let data = frame("QF8*\nQV2*\n");
        assert!(matches!(
            JedFile::parse(&data),
            Err(crate::Error::Unimplemented(_))
        ));
    }

    #[test]
    fn only_binary_fuse_values_accepted() {
        let data = frame("QF8*\nF0*\nL0 10x1*\n");
        let err = JedFile::parse(&data).unwrap_err();
        assert!(matches!(err, crate::Error::Framing(_)), "{err}");
    }

    #[test]
    fn header_comment_collapses_newlines() {
        let mut data = b"line one\r\nline two\n".to_vec();
        data.extend_from_slice(&frame("QF8*\nF0*\n"));
        let jed = JedFile::parse(&data).unwrap();
        assert_eq!(jed.header_comment, "line one | line two | ");
    }

    #[test]
    fn device_annotation_captured() {
        let data = frame("QF8*\nF0*\nN DEVICE XC2C32A*\n");
        let jed = JedFile::parse(&data).unwrap();
        assert_eq!(jed.device_name.as_deref(), Some("XC2C32A"));
    }

    #[test]
    fn emit_parse_fixpoint() {
        let data = frame("QF100*\nF0*\nL0 10101*\nL96 1111*\nQP44*\nN DEVICE XC2C32A*\nC0024*\n");
        let first = JedFile::parse(&data).unwrap();
        let second = JedFile::parse(&first.emit()).unwrap();
        assert_eq!(second, first);
        // And emitting the reparse is byte-identical.
        assert_eq!(second.emit(), first.emit());
    }

    #[test]
    fn default_fill_ones() {
        let data = frame("QF16*\nF1*\nL0 0*\nC01FD*\n");
        let jed = JedFile::parse(&data).unwrap();
        assert!(!jed.fuse(0));
        assert!(jed.fuse(1));
        assert!(jed.fuse(15));
    }
}
