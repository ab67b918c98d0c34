// SPDX-FileCopyrightText: 2026 aifw contributors
// SPDX-License-Identifier: GPL-3.0-only

//! 16-bit word sum used by the recovery image partition headers.
//!
//! The bootloader sums little-endian 16-bit words in a 16-bit accumulator and
//! adds 1 whenever an addition wraps. The carry is folded back immediately
//! after each word, never accumulated.

/// Compute the partition checksum of `data`.
///
/// If `invert` is set, the result is `0xffff - sum`, which is how the header
/// checksum is stored so that the sum over the whole header becomes `0xffff`.
///
/// `data` is expected to have an even length. A trailing odd byte is treated
/// as the low half of a word whose high half is zero.
pub fn checksum16(data: &[u8], invert: bool) -> u16 {
    let mut chunks = data.chunks_exact(2);
    let mut sum = 0u16;

    for chunk in &mut chunks {
        sum = add_word(sum, u16::from_le_bytes([chunk[0], chunk[1]]));
    }

    if let [last] = chunks.remainder() {
        sum = add_word(sum, u16::from(*last));
    }

    if invert { 0xffff - sum } else { sum }
}

#[inline]
fn add_word(sum: u16, word: u16) -> u16 {
    let (result, overflow) = sum.overflowing_add(word);

    // Cannot wrap again: after an overflow, result < word <= 0xffff.
    if overflow { result + 1 } else { result }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeros() {
        for len in [0, 2, 80, 4096] {
            let data = vec![0u8; len];
            assert_eq!(checksum16(&data, false), 0);
            assert_eq!(checksum16(&data, true), 0xffff);
        }
    }

    #[test]
    fn little_endian_words() {
        assert_eq!(checksum16(&[0x34, 0x12], false), 0x1234);
        assert_eq!(checksum16(&[0x34, 0x12, 0x01, 0x00], false), 0x1235);
        assert_eq!(checksum16(&[0x34, 0x12], true), 0xedcb);
    }

    #[test]
    fn overflow_adds_one() {
        // 0xffff + 0x0002 wraps to 0x0001, then +1.
        assert_eq!(checksum16(&[0xff, 0xff, 0x02, 0x00], false), 0x0002);
        // 0xffff + 0xffff wraps to 0xfffe, then +1.
        assert_eq!(checksum16(&[0xff, 0xff, 0xff, 0xff], false), 0xffff);
        // 0x8000 + 0x8000 wraps to exactly zero, then +1, then +1 more.
        assert_eq!(
            checksum16(&[0x00, 0x80, 0x00, 0x80, 0x01, 0x00], false),
            0x0002,
        );
    }

    #[test]
    fn odd_length_zero_extends() {
        assert_eq!(checksum16(&[0x01, 0x02, 0x03], false), 0x0204);
    }
}
