// SPDX-License-Identifier: Apache-2.0

//! Table-driven reflected CRCs used on the wire.
//!
//! SIOFS protects data chunks with CRC-16 (polynomial 0xA001, seed 0) and
//! uploads protect the whole payload with CRC-32 (polynomial 0xEDB88320,
//! seed [`CRC32_SEED`], result inverted).

/// Seed used for upload payloads.
pub const CRC32_SEED: u32 = 0xFFFF_FFFF;

const fn table16() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0usize;
    while i < 256 {
        let mut crc = i as u16;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

const fn table32() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0usize;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

const TABLE16: [u16; 256] = table16();
const TABLE32: [u32; 256] = table32();

/// CRC-16 of `bytes`, continuing from `seed`. No final inversion.
pub fn crc16(bytes: &[u8], seed: u16) -> u16 {
    bytes.iter().fold(seed, |crc, &b| {
        (crc >> 8) ^ TABLE16[((crc ^ u16::from(b)) & 0xff) as usize]
    })
}

/// CRC-32 of `bytes` starting from `seed`; the result is inverted.
pub fn crc32(bytes: &[u8], seed: u32) -> u32 {
    let crc = bytes.iter().fold(seed, |crc, &b| {
        (crc >> 8) ^ TABLE32[((crc ^ u32::from(b)) & 0xff) as usize]
    });

    crc ^ 0xFFFF_FFFF
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: &[u8] = b"123456789";

    #[test]
    fn crc32_reference() {
        assert_eq!(crc32(b"", CRC32_SEED), 0);
        assert_eq!(crc32(CHECK, CRC32_SEED), 0xCBF4_3926);
    }

    #[test]
    fn crc16_reference() {
        assert_eq!(crc16(b"", 0), 0);
        assert_eq!(crc16(CHECK, 0), 0xBB3D);
    }

    #[test]
    fn crc16_chains() {
        let (head, tail) = CHECK.split_at(4);
        assert_eq!(crc16(tail, crc16(head, 0)), crc16(CHECK, 0));
    }

    #[test]
    fn tables() {
        assert_eq!(TABLE16[1], 0xC0C1);
        assert_eq!(TABLE32[1], 0x7707_3096);
        assert_eq!(TABLE32[255], 0x2D02_EF8D);
    }
}
