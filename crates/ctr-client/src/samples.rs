//! Sample word decoding.
//!
//! The data surface delivers 4-byte little-endian words. They are reassembled
//! byte by byte so the result does not depend on host byte order.

use ctr_driver::SAMPLE_BYTES;

/// Assemble one sample from its little-endian bytes.
pub fn sample_from_le(bytes: [u8; SAMPLE_BYTES]) -> u32 {
    u32::from(bytes[0])
        | u32::from(bytes[1]) << 8
        | u32::from(bytes[2]) << 16
        | u32::from(bytes[3]) << 24
}

/// Decode whole words from `bytes` into `out`.
///
/// Returns the number of samples written. Trailing bytes that do not form a
/// whole word are ignored.
pub fn decode_samples(bytes: &[u8], out: &mut [u32]) -> usize {
    let mut n = 0;
    for (word, slot) in bytes.chunks_exact(SAMPLE_BYTES).zip(out.iter_mut()) {
        *slot = sample_from_le([word[0], word[1], word[2], word[3]]);
        n += 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_le_words() {
        let cases: [([u8; 4], u32); 4] = [
            ([0, 0, 0, 0], 0),
            ([1, 0, 0, 0], 1),
            ([0xff, 0xff, 0xff, 0xff], 0xffff_ffff),
            ([0x04, 0x03, 0x02, 0x01], 0x0102_0304),
        ];
        for (bytes, expected) in cases {
            assert_eq!(sample_from_le(bytes), expected);
        }
    }

    #[test]
    fn test_decode_stream() {
        let bytes = [1, 0, 0, 0, 0x04, 0x03, 0x02, 0x01, 0xaa];
        let mut out = [0u32; 4];
        assert_eq!(decode_samples(&bytes, &mut out), 2);
        assert_eq!(out[..2], [1, 0x0102_0304]);

        // Output shorter than the input
        let mut one = [0u32; 1];
        assert_eq!(decode_samples(&bytes, &mut one), 1);
        assert_eq!(one[0], 1);
    }
}
