//! ELF post-link signing.
//!
//! The on-chip loader verifies image integrity before jumping to the entry
//! point; this crate computes and embeds the matching signature. The MAC
//! is HMAC-SHA256 over the entry-point word (in target byte order)
//! followed by the in-file contents of every `PT_LOAD` segment with a
//! non-zero virtual address, concatenated in program-header order. The key
//! is the SHA-512 of the signing password, all 64 bytes of it.
//!
//! The signature lives in a 32-byte segment of type `PT_LOPROC + 5`. A
//! file that has never been signed carries 32 `'A'` bytes there.

use goblin::elf::header::{ELFCLASS32, ELFDATA2MSB, EM_MIPS, ET_EXEC, EV_CURRENT};
use goblin::elf::program_header::{PT_LOAD, PT_LOPROC};
use goblin::elf::Elf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

/// Program-header type of the signature segment.
pub const SIGNATURE_SEGMENT_TYPE: u32 = PT_LOPROC + 5;

/// Size of the signature region.
pub const SIGNATURE_BYTES: usize = 32;

/// Placeholder found in files that were never signed.
pub const UNSIGNED_MARKER: [u8; SIGNATURE_BYTES] = *b"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

/// Errors surfaced while examining or signing an image.
#[derive(thiserror::Error, Debug)]
pub enum SignError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// The file is not a well-formed ELF.
    #[error("malformed ELF: {0}")]
    Malformed(String),

    /// The file is a valid ELF but not one the loader runs.
    #[error("unsupported ELF: {0}")]
    Unsupported(String),

    /// No `PT_LOPROC+5` segment, so there is nothing to verify or patch.
    #[error("no signature block found")]
    MissingSignatureBlock,
}

pub type Result<T> = std::result::Result<T, SignError>;

/// Signature status of an examined file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureState {
    /// The region holds the `'A'` placeholder.
    Unsigned,
    /// The region matches the computed MAC.
    Valid,
    /// The region holds something else.
    Invalid,
}

/// Everything learned from one pass over an image.
#[derive(Debug, Clone)]
pub struct SignatureInfo {
    /// File offset of the 32-byte signature region.
    pub offset: usize,
    /// MAC computed over the canonical buffer.
    pub expected: [u8; SIGNATURE_BYTES],
    /// Bytes currently in the region.
    pub current: [u8; SIGNATURE_BYTES],
    pub state: SignatureState,
}

/// Derives the 64-byte HMAC key from a password.
pub fn derive_key(password: &str) -> [u8; 64] {
    let digest = Sha512::digest(password.as_bytes());
    let mut key = [0u8; 64];
    key.copy_from_slice(&digest);
    key
}

fn slice_at<'a>(data: &'a [u8], offset: usize, len: usize, what: &str) -> Result<&'a [u8]> {
    data.get(offset..offset + len)
        .ok_or_else(|| SignError::Malformed(format!("{what} extends past end of file")))
}

/// Validates the image and computes the expected signature.
pub fn examine(data: &[u8], key: &[u8; 64]) -> Result<SignatureInfo> {
    let elf = Elf::parse(data).map_err(|e| SignError::Malformed(e.to_string()))?;

    if elf.is_64 || elf.header.e_ident[goblin::elf::header::EI_CLASS] != ELFCLASS32 {
        return Err(SignError::Unsupported("not a 32-bit ELF file".to_string()));
    }
    if elf.little_endian || elf.header.e_ident[goblin::elf::header::EI_DATA] != ELFDATA2MSB {
        return Err(SignError::Unsupported(
            "not a big-endian ELF file".to_string(),
        ));
    }
    if elf.header.e_ident[goblin::elf::header::EI_VERSION] != EV_CURRENT {
        return Err(SignError::Unsupported("invalid ELF version".to_string()));
    }
    if elf.header.e_type != ET_EXEC {
        return Err(SignError::Unsupported("not an executable".to_string()));
    }
    if elf.header.e_machine != EM_MIPS {
        return Err(SignError::Unsupported("not a MIPS executable".to_string()));
    }

    // Canonical buffer: the entry word in target (big-endian) byte order,
    // then every loadable segment mapped at a real address, in
    // program-header order.
    let mut canonical = Vec::new();
    canonical.extend_from_slice(&(elf.header.e_entry as u32).to_be_bytes());

    let mut signature_offset = None;
    for (index, ph) in elf.program_headers.iter().enumerate() {
        if ph.p_type == PT_LOAD {
            if ph.p_vaddr == 0 {
                tracing::debug!("program header {index}: loadable at NULL, ignored");
                continue;
            }
            let segment = slice_at(
                data,
                ph.p_offset as usize,
                ph.p_filesz as usize,
                "loadable segment",
            )?;
            canonical.extend_from_slice(segment);
        } else if ph.p_type == SIGNATURE_SEGMENT_TYPE {
            if ph.p_filesz as usize != SIGNATURE_BYTES {
                return Err(SignError::Unsupported(format!(
                    "signature segment is {} bytes, expected {SIGNATURE_BYTES}",
                    ph.p_filesz
                )));
            }
            slice_at(
                data,
                ph.p_offset as usize,
                SIGNATURE_BYTES,
                "signature segment",
            )?;
            signature_offset = Some(ph.p_offset as usize);
        }
    }

    let offset = signature_offset.ok_or(SignError::MissingSignatureBlock)?;

    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).map_err(|e| SignError::Malformed(e.to_string()))?;
    mac.update(&canonical);
    let mut expected = [0u8; SIGNATURE_BYTES];
    expected.copy_from_slice(&mac.finalize().into_bytes());

    let mut current = [0u8; SIGNATURE_BYTES];
    current.copy_from_slice(&data[offset..offset + SIGNATURE_BYTES]);

    let state = if current == UNSIGNED_MARKER {
        SignatureState::Unsigned
    } else if current == expected {
        SignatureState::Valid
    } else {
        SignatureState::Invalid
    };

    Ok(SignatureInfo {
        offset,
        expected,
        current,
        state,
    })
}

/// Computes the signature and patches it into the file image in place.
///
/// Signing is idempotent: re-signing an already signed file changes
/// nothing, since the signature segment is not part of the canonical
/// buffer.
pub fn sign_in_place(data: &mut [u8], key: &[u8; 64]) -> Result<SignatureInfo> {
    let mut info = examine(data, key)?;
    data[info.offset..info.offset + SIGNATURE_BYTES].copy_from_slice(&info.expected);
    info.current = info.expected;
    info.state = SignatureState::Valid;
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal big-endian 32-bit MIPS executable with one
    /// loadable segment and a signature segment.
    fn build_elf(entry: u32, payload: &[u8], signature: &[u8; 32]) -> Vec<u8> {
        const EHSIZE: usize = 52;
        const PHENTSIZE: usize = 32;
        let payload_offset = EHSIZE + 2 * PHENTSIZE;
        let signature_offset = payload_offset + payload.len();

        let mut out = Vec::new();
        // e_ident
        out.extend_from_slice(&[0x7F, b'E', b'L', b'F', 1, 2, 1]);
        out.resize(16, 0);
        out.extend_from_slice(&2u16.to_be_bytes()); // e_type = ET_EXEC
        out.extend_from_slice(&8u16.to_be_bytes()); // e_machine = EM_MIPS
        out.extend_from_slice(&1u32.to_be_bytes()); // e_version
        out.extend_from_slice(&entry.to_be_bytes());
        out.extend_from_slice(&(EHSIZE as u32).to_be_bytes()); // e_phoff
        out.extend_from_slice(&0u32.to_be_bytes()); // e_shoff
        out.extend_from_slice(&0u32.to_be_bytes()); // e_flags
        out.extend_from_slice(&(EHSIZE as u16).to_be_bytes());
        out.extend_from_slice(&(PHENTSIZE as u16).to_be_bytes());
        out.extend_from_slice(&2u16.to_be_bytes()); // e_phnum
        out.extend_from_slice(&0u16.to_be_bytes()); // e_shentsize
        out.extend_from_slice(&0u16.to_be_bytes()); // e_shnum
        out.extend_from_slice(&0u16.to_be_bytes()); // e_shstrndx
        assert_eq!(out.len(), EHSIZE);

        let phdr = |p_type: u32, offset: u32, vaddr: u32, filesz: u32| {
            let mut ph = Vec::new();
            ph.extend_from_slice(&p_type.to_be_bytes());
            ph.extend_from_slice(&offset.to_be_bytes());
            ph.extend_from_slice(&vaddr.to_be_bytes()); // p_vaddr
            ph.extend_from_slice(&vaddr.to_be_bytes()); // p_paddr
            ph.extend_from_slice(&filesz.to_be_bytes()); // p_filesz
            ph.extend_from_slice(&filesz.to_be_bytes()); // p_memsz
            ph.extend_from_slice(&5u32.to_be_bytes()); // p_flags
            ph.extend_from_slice(&4u32.to_be_bytes()); // p_align
            ph
        };
        out.extend_from_slice(&phdr(
            PT_LOAD,
            payload_offset as u32,
            entry,
            payload.len() as u32,
        ));
        out.extend_from_slice(&phdr(
            SIGNATURE_SEGMENT_TYPE,
            signature_offset as u32,
            0,
            32,
        ));
        out.extend_from_slice(payload);
        out.extend_from_slice(signature);
        out
    }

    fn reference_mac(password: &str, entry: u32, payload: &[u8]) -> [u8; 32] {
        let key = derive_key(password);
        let mut mac = Hmac::<Sha256>::new_from_slice(&key).unwrap();
        mac.update(&entry.to_be_bytes());
        mac.update(payload);
        let mut out = [0u8; 32];
        out.copy_from_slice(&mac.finalize().into_bytes());
        out
    }

    #[test]
    fn unsigned_file_detected_and_signed() {
        let key = derive_key("test");
        let mut data = build_elf(0xBFC0_0000, &[0xDE, 0xAD, 0xBE, 0xEF], &UNSIGNED_MARKER);

        let info = examine(&data, &key).unwrap();
        assert_eq!(info.state, SignatureState::Unsigned);
        assert_eq!(
            info.expected,
            reference_mac("test", 0xBFC0_0000, &[0xDE, 0xAD, 0xBE, 0xEF])
        );

        let signed = sign_in_place(&mut data, &key).unwrap();
        assert_eq!(signed.state, SignatureState::Valid);
        assert_eq!(examine(&data, &key).unwrap().state, SignatureState::Valid);
    }

    #[test]
    fn signing_is_idempotent() {
        let key = derive_key("test");
        let mut data = build_elf(0xBFC0_0000, &[0xDE, 0xAD, 0xBE, 0xEF], &UNSIGNED_MARKER);
        sign_in_place(&mut data, &key).unwrap();
        let once = data.clone();
        sign_in_place(&mut data, &key).unwrap();
        assert_eq!(data, once);
    }

    #[test]
    fn corrupted_signature_detected() {
        let key = derive_key("test");
        let mut data = build_elf(0xBFC0_0000, &[0xDE, 0xAD, 0xBE, 0xEF], &UNSIGNED_MARKER);
        sign_in_place(&mut data, &key).unwrap();

        let info = examine(&data, &key).unwrap();
        data[info.offset] ^= 0x01;
        assert_eq!(examine(&data, &key).unwrap().state, SignatureState::Invalid);
    }

    #[test]
    fn wrong_password_invalidates() {
        let mut data = build_elf(0xBFC0_0000, &[0xDE, 0xAD, 0xBE, 0xEF], &UNSIGNED_MARKER);
        sign_in_place(&mut data, &derive_key("test")).unwrap();
        assert_eq!(
            examine(&data, &derive_key("wrong")).unwrap().state,
            SignatureState::Invalid
        );
    }

    #[test]
    fn payload_change_invalidates() {
        let key = derive_key("test");
        let mut data = build_elf(0xBFC0_0000, &[0xDE, 0xAD, 0xBE, 0xEF], &UNSIGNED_MARKER);
        sign_in_place(&mut data, &key).unwrap();
        // Flip one payload byte behind the signature's back.
        let payload_offset = 52 + 64;
        data[payload_offset] ^= 0xFF;
        assert_eq!(examine(&data, &key).unwrap().state, SignatureState::Invalid);
    }

    #[test]
    fn wrong_signature_size_rejected() {
        let key = derive_key("test");
        let mut data = build_elf(0xBFC0_0000, &[0xDE, 0xAD, 0xBE, 0xEF], &UNSIGNED_MARKER);
        // Patch the signature phdr's p_filesz (second phdr, offset 16 into it).
        let filesz_at = 52 + 32 + 16;
        data[filesz_at..filesz_at + 4].copy_from_slice(&16u32.to_be_bytes());
        assert!(matches!(
            examine(&data, &key),
            Err(SignError::Unsupported(_))
        ));
    }

    #[test]
    fn missing_signature_block_reported() {
        let key = derive_key("test");
        let mut data = build_elf(0xBFC0_0000, &[0xDE, 0xAD, 0xBE, 0xEF], &UNSIGNED_MARKER);
        // Turn the signature phdr into PT_NULL.
        let type_at = 52 + 32;
        data[type_at..type_at + 4].copy_from_slice(&0u32.to_be_bytes());
        assert!(matches!(
            examine(&data, &key),
            Err(SignError::MissingSignatureBlock)
        ));
    }

    #[test]
    fn little_endian_rejected() {
        let key = derive_key("test");
        let mut data = build_elf(0xBFC0_0000, &[0xDE, 0xAD, 0xBE, 0xEF], &UNSIGNED_MARKER);
        data[5] = 1; // EI_DATA = ELFDATA2LSB
        assert!(examine(&data, &key).is_err());
    }
}
