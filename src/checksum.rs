/// Frame checksums for the serial line variants
///
/// RTU frames carry a CRC16 appended little-endian; ASCII frames carry an LRC
/// over the binary (pre-hex) bytes. Both encode and verify paths go through the
/// same functions so they cannot drift apart.

use crc::{Crc, CRC_16_MODBUS};

/// CRC calculator for RTU (reflected polynomial 0xA001, initial value 0xFFFF)
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Calculate the Modbus CRC16 of `data`
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Calculate LRC (Longitudinal Redundancy Check) for an ASCII frame
///
/// LRC is the two's complement of the 8-bit sum of all bytes, carries
/// discarded. For ASCII frames this covers address, function code and data.
pub fn lrc(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |sum, &b| sum.wrapping_add(b))
        .wrapping_neg()
}

/// Check `data` against a received CRC16
pub fn verify_crc16(data: &[u8], expected: u16) -> bool {
    crc16(data) == expected
}

/// Check `data` against a received LRC
pub fn verify_lrc(data: &[u8], expected: u8) -> bool {
    lrc(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_known_values() {
        // 01 03 00 00 00 02 -> C4 0B on the wire
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]), 0x0BC4);
        // 01 01 00 00 00 08 -> 3D CC on the wire
        assert_eq!(crc16(&[0x01, 0x01, 0x00, 0x00, 0x00, 0x08]), 0xCC3D);
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_crc_verify() {
        let data = [0x01, 0x04, 0x00, 0x00, 0x00, 0x02];
        let crc = crc16(&data);
        assert!(verify_crc16(&data, crc));
        assert!(!verify_crc16(&data, crc ^ 0x0001));
    }

    #[test]
    fn test_lrc_calculation() {
        let data = [0x01, 0x03, 0x00, 0x00, 0x00, 0x02];
        assert_eq!(lrc(&data), 0xFA);

        // Sum overflows one byte: 0xFF + 0x02 = 0x101 -> 0x01 -> 0xFF
        assert_eq!(lrc(&[0xFF, 0x02]), 0xFF);
        assert_eq!(lrc(&[]), 0x00);

        assert!(verify_lrc(&data, 0xFA));
        assert!(!verify_lrc(&data, 0xFB));
    }

    #[test]
    fn test_lrc_zero_sum_property() {
        let data = [0x11, 0x06, 0x00, 0x01, 0x00, 0x03];
        let sum = data.iter().fold(lrc(&data), |acc, &b| acc.wrapping_add(b));
        assert_eq!(sum, 0);
    }
}
