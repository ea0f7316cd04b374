//! RFC 1071 Internet checksum, used for the IPv4 ICMP header. IPv6 leaves
//! checksum computation to the kernel, so this module is only exercised by
//! the v4 build/verify paths.

/// Compute the one's-complement Internet checksum over `data`, as specified
/// in RFC 1071: sum all 16-bit big-endian words as `u32`, zero-pad a trailing
/// odd byte, fold carries until the result fits in 16 bits, then complement.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);

    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }

    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

/// Verify a checksum field already embedded in `data`: the Internet checksum
/// of a correctly-checksummed datagram is always zero.
pub fn verify_checksum(data: &[u8]) -> bool {
    internet_checksum(data) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_all_zero_payload_is_nonzero_complement() {
        // 8-byte ICMP header, all zero except identifier/sequence, checksum
        // field zeroed: sum is 0 so checksum is the all-ones complement.
        let header = [0u8; 8];
        assert_eq!(internet_checksum(&header), 0xffff);
    }

    #[test]
    fn checksum_round_trips_to_zero() {
        let mut packet = vec![8, 0, 0, 0, 0x12, 0x34, 0x00, 0x01];
        let sum = internet_checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
        assert!(verify_checksum(&packet));
    }

    #[test]
    fn checksum_handles_odd_length() {
        let data = [0x01, 0x02, 0x03];
        // 0x0102 + 0x0300 = 0x0402, one's complement = 0xfbfd
        assert_eq!(internet_checksum(&data), !0x0402u16);
    }

    #[test]
    fn checksum_folds_carries() {
        let data = [0xff, 0xff, 0xff, 0xff];
        // 0xffff + 0xffff = 0x1fffe -> fold -> 0xffff -> complement -> 0x0000
        assert_eq!(internet_checksum(&data), 0x0000);
    }
}
