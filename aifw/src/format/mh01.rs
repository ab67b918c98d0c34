// SPDX-FileCopyrightText: 2026 aifw contributors
// SPDX-License-Identifier: GPL-3.0-only

use bstr::ByteSlice;
use thiserror::Error;

use crate::util::NumBytes;

pub const MAGIC: [u8; 4] = *b"MH01";

pub const HEADER_SIZE: usize = 16;

/// Constant bytes at offset 12 of every header.
const TRAILER: [u8; 2] = [0x2b, 0x1a];

/// Type tags as stored on disk. The verification tag is the byte sequence
/// `00 01 00 00`, not a little-endian `0x00010000`.
const VERIFICATION_TAG: [u8; 4] = [0x00, 0x01, 0x00, 0x00];
const ENCRYPTION_TAG: [u8; 4] = [0x21, 0x00, 0x00, 0x00];

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid MH01 header magic: {:?}", .0.as_bstr())]
    InvalidMagic([u8; 4]),
    #[error("{0} input is too small to fit a {HEADER_SIZE} byte header")]
    Truncated(NumBytes<usize>),
    #[error("Payload length {0} does not fit in the {1:?} header length field")]
    LengthTooLarge(usize, HeaderType),
}

type Result<T> = std::result::Result<T, Error>;

/// The two flavors of `MH01` header. They differ only in the positions of the
/// payload length and the type tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HeaderType {
    /// Precedes a payload that is followed by a SHA-512 RSA signature.
    Verification,
    /// Precedes an AES-128-CBC encrypted payload.
    Encryption,
}

impl HeaderType {
    fn length_offset(self) -> usize {
        match self {
            Self::Verification => 4,
            Self::Encryption => 8,
        }
    }

    fn tag_offset(self) -> usize {
        match self {
            Self::Verification => 8,
            Self::Encryption => 4,
        }
    }

    fn tag(self) -> [u8; 4] {
        match self {
            Self::Verification => VERIFICATION_TAG,
            Self::Encryption => ENCRYPTION_TAG,
        }
    }
}

/// Compute the two check bytes stored at offsets 14 and 15: the wrapping byte
/// sum and the XOR of the first 14 header bytes.
pub fn check_bytes(data: &[u8; HEADER_SIZE - 2]) -> [u8; 2] {
    data.iter()
        .fold([0u8, 0u8], |[sum, xor], b| [sum.wrapping_add(*b), xor ^ b])
}

/// Build a header describing a payload of `payload_len` bytes.
pub fn build_header(header_type: HeaderType, payload_len: usize) -> Result<[u8; HEADER_SIZE]> {
    let length = u32::try_from(payload_len)
        .map_err(|_| Error::LengthTooLarge(payload_len, header_type))?;

    let mut header = [0u8; HEADER_SIZE];
    header[..4].copy_from_slice(&MAGIC);

    let length_offset = header_type.length_offset();
    header[length_offset..][..4].copy_from_slice(&length.to_le_bytes());

    let tag_offset = header_type.tag_offset();
    header[tag_offset..][..4].copy_from_slice(&header_type.tag());

    header[12..14].copy_from_slice(&TRAILER);

    let check = check_bytes(header[..14].try_into().unwrap());
    header[14..].copy_from_slice(&check);

    Ok(header)
}

pub fn build_verification_header(payload_len: usize) -> Result<[u8; HEADER_SIZE]> {
    build_header(HeaderType::Verification, payload_len)
}

pub fn build_encryption_header(payload_len: usize) -> Result<[u8; HEADER_SIZE]> {
    build_header(HeaderType::Encryption, payload_len)
}

/// Read the payload length from the header at the start of `data`.
///
/// Only the magic is validated. The type tag and the check bytes are not,
/// since the bootloader does not look at them either.
pub fn parse_header(header_type: HeaderType, data: &[u8]) -> Result<u32> {
    let Some(header) = data.get(..HEADER_SIZE) else {
        return Err(Error::Truncated(NumBytes(data.len())));
    };

    let magic: [u8; 4] = header[..4].try_into().unwrap();
    if magic != MAGIC {
        return Err(Error::InvalidMagic(magic));
    }

    let offset = header_type.length_offset();
    let length = u32::from_le_bytes(header[offset..][..4].try_into().unwrap());

    Ok(length)
}

pub fn parse_verification_header(data: &[u8]) -> Result<u32> {
    parse_header(HeaderType::Verification, data)
}

pub fn parse_encryption_header(data: &[u8]) -> Result<u32> {
    parse_header(HeaderType::Encryption, data)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn assert_check_bytes(header: &[u8; HEADER_SIZE]) {
        let sum = header[..14].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        let xor = header[..14].iter().fold(0u8, |acc, b| acc ^ b);

        assert_eq!(header[14], sum);
        assert_eq!(header[15], xor);
    }

    #[test]
    fn verification_layout() {
        let header = build_verification_header(0x0012_3456).unwrap();

        assert_eq!(&header[..4], b"MH01");
        assert_eq!(&header[4..8], &[0x56, 0x34, 0x12, 0x00]);
        assert_eq!(&header[8..12], &[0x00, 0x01, 0x00, 0x00]);
        assert_eq!(&header[12..14], &[0x2b, 0x1a]);
        assert_check_bytes(&header);
    }

    #[test]
    fn encryption_layout() {
        let header = build_encryption_header(0x910).unwrap();

        assert_eq!(&header[..4], b"MH01");
        assert_eq!(&header[4..8], &[0x21, 0x00, 0x00, 0x00]);
        assert_eq!(&header[8..12], &[0x10, 0x09, 0x00, 0x00]);
        assert_eq!(&header[12..14], &[0x2b, 0x1a]);
        assert_check_bytes(&header);
    }

    #[test]
    fn known_headers() {
        // Outer and encryption headers of a factory image wrapping a 2048 byte
        // recovery image.
        assert_eq!(
            build_verification_header(2401).unwrap(),
            [
                0x4d, 0x48, 0x30, 0x31, 0x61, 0x09, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x2b,
                0x1a, 0xa6, 0x5c,
            ],
        );
        assert_eq!(
            build_encryption_header(2352).unwrap(),
            [
                0x4d, 0x48, 0x30, 0x31, 0x21, 0x00, 0x00, 0x00, 0x30, 0x09, 0x00, 0x00, 0x2b,
                0x1a, 0x95, 0x2d,
            ],
        );
    }

    #[test]
    fn parse_returns_built_length() {
        for length in [0, 1, 0x50, 0xffff, 0x0100_0000, u32::MAX as usize] {
            let header = build_verification_header(length).unwrap();
            assert_eq!(parse_verification_header(&header).unwrap() as usize, length);
            assert_check_bytes(&header);

            let header = build_encryption_header(length).unwrap();
            assert_eq!(parse_encryption_header(&header).unwrap() as usize, length);
            assert_check_bytes(&header);
        }
    }

    #[test]
    fn parse_ignores_check_bytes() {
        let mut header = build_verification_header(1234).unwrap();
        header[14] ^= 0xff;
        header[15] ^= 0xff;

        assert_eq!(parse_verification_header(&header).unwrap(), 1234);
    }

    #[test]
    fn parse_rejects_bad_input() {
        let mut header = build_verification_header(1234).unwrap();

        assert_matches!(
            parse_verification_header(&header[..15]),
            Err(Error::Truncated(_))
        );

        header[3] = b'2';
        assert_matches!(
            parse_verification_header(&header),
            Err(Error::InvalidMagic(m)) if &m == b"MH02"
        );
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn length_must_fit_u32() {
        assert_matches!(
            build_encryption_header(u32::MAX as usize + 1),
            Err(Error::LengthTooLarge(_, HeaderType::Encryption))
        );
    }
}
