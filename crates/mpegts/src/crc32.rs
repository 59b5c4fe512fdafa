//! CRC-32 as used by PSI sections (ISO 13818-1 Annex A).
//!
//! Big-endian variant of the 0x04C11DB7 polynomial: init 0xFFFFFFFF,
//! no reflection, no output XOR. Appending the big-endian digest to a
//! buffer makes the digest of the whole buffer zero, which is how
//! section CRCs are laid out on the wire.

const POLY: u32 = 0x04C1_1DB7;

const fn byte_remainder(byte: u8) -> u32 {
    let mut remainder = (byte as u32) << 24;
    let mut bit = 0;
    while bit < 8 {
        let carry = remainder & 0x8000_0000 != 0;
        remainder <<= 1;
        if carry {
            remainder ^= POLY;
        }
        bit += 1;
    }
    remainder
}

const REMAINDERS: [u32; 256] = {
    let mut remainders = [0u32; 256];
    let mut byte = 0usize;
    while byte < 256 {
        remainders[byte] = byte_remainder(byte as u8);
        byte += 1;
    }
    remainders
};

/// Compute the MPEG-2 CRC-32 over a byte slice.
pub fn mpeg2_crc32(data: &[u8]) -> u32 {
    data.iter().fold(0xFFFF_FFFF, |crc, &byte| {
        (crc << 8) ^ REMAINDERS[((crc >> 24) as u8 ^ byte) as usize]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        // the published check value for CRC-32/MPEG-2
        assert_eq!(mpeg2_crc32(b"123456789"), 0x0376_E6E7);
    }

    #[test]
    fn test_no_input_leaves_initializer() {
        assert_eq!(mpeg2_crc32(&[]), 0xFFFF_FFFF);
    }

    #[test]
    fn test_single_bytes_match_table() {
        // feeding one byte after the all-ones initializer must agree
        // with a bitwise computation
        for byte in [0x00u8, 0x47, 0xFF] {
            let mut bitwise = 0xFFFF_FFFFu32 ^ ((byte as u32) << 24);
            for _ in 0..8 {
                bitwise = if bitwise & 0x8000_0000 != 0 {
                    (bitwise << 1) ^ POLY
                } else {
                    bitwise << 1
                };
            }
            assert_eq!(mpeg2_crc32(&[byte]), bitwise);
        }
    }

    #[test]
    fn test_trailing_digest_zeroes_out() {
        let body = b"program association section";
        let digest = mpeg2_crc32(body);

        let mut on_wire = body.to_vec();
        on_wire.extend_from_slice(&digest.to_be_bytes());
        assert_eq!(mpeg2_crc32(&on_wire), 0);

        on_wire[5] ^= 0x20;
        assert_ne!(mpeg2_crc32(&on_wire), 0);
    }
}
