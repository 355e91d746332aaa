//! One's-complement Internet checksums.
//!
//! Transport checksums here deliberately skip the pseudo-header: the relay and the device-side
//! stack agree on a header+payload-only sum, which keeps per-packet cost low on tethered links.

/// Sums `data` as big-endian 16-bit words into `sum` (unfolded).
///
/// An odd trailing byte is treated as the high byte of a zero-padded last word.
pub fn sum_words(mut sum: u32, data: &[u8]) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    sum
}

/// Folds carries back into the low 16 bits until none remain.
pub fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}

/// Checksum of one contiguous region; the caller zeroes the checksum field first.
pub fn internet_checksum(data: &[u8]) -> u16 {
    !fold(sum_words(0, data))
}

/// Checksum over a header followed by a payload held in a separate slice.
pub fn checksum_parts(header: &[u8], payload: &[u8]) -> u16 {
    // Summing a split region is only equivalent to summing the concatenation when the first
    // part has an even length, which holds for every header this crate produces.
    debug_assert!(header.len() % 2 == 0);
    !fold(sum_words(sum_words(0, header), payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1071_example() {
        // Words from RFC 1071 section 3: 0x0001 0xf203 0xf4f5 0xf6f7 sum to 0xddf2 after folding.
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(fold(sum_words(0, &data)), 0xddf2);
        assert_eq!(internet_checksum(&data), !0xddf2);
    }

    #[test]
    fn odd_length_pads_high_byte() {
        assert_eq!(sum_words(0, &[0xab]), 0xab00);
        assert_eq!(internet_checksum(&[0x12, 0x34, 0x56]), !(0x1234u16 + 0x5600));
    }

    #[test]
    fn split_sum_matches_contiguous_sum() {
        let header = [0x45, 0x00, 0x00, 0x1c, 0x12, 0x34];
        let payload = [0x01, 0x02, 0x03];
        let mut joined = header.to_vec();
        joined.extend_from_slice(&payload);
        assert_eq!(checksum_parts(&header, &payload), internet_checksum(&joined));
    }

    #[test]
    fn verifying_a_checksummed_region_yields_zero() {
        let mut data = vec![0x45, 0x00, 0x00, 0x54, 0x00, 0x00, 0x40, 0x00, 0x40, 0x01, 0, 0];
        let csum = internet_checksum(&data);
        data[10..12].copy_from_slice(&csum.to_be_bytes());
        assert_eq!(internet_checksum(&data), 0);
    }
}
