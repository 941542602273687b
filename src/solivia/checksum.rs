// CRC-16 as used on the Solivia serial link: reflected polynomial 0xA001,
// initial value 0, no final xor (the "ARC" flavour).

/// Checksum over `data`, processed left to right.
pub fn checksum(data: &[u8]) -> u16 {
    crc16::State::<crc16::ARC>::calculate(data)
}

/// Little-endian wire form of the checksum, ready to append to a frame.
pub fn checksum_bytes(data: &[u8]) -> [u8; 2] {
    checksum(data).to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_byte_values() {
        assert_eq!(checksum(&[0x01]), 0xC0C1);
        assert_eq!(checksum(&[0x02]), 0xC181);
        assert_eq!(checksum(&[0x80]), 0xA001);
        assert_eq!(checksum(&[0xFF]), 0x4040);
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(checksum(&[]), 0x0000);
    }
}
