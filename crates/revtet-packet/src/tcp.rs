use core::fmt;

use crate::{checksum, ensure_len, read_u16, read_u32, write_u16, write_u32, PacketError};

#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: TcpFlags = TcpFlags(0x01);
    pub const SYN: TcpFlags = TcpFlags(0x02);
    pub const RST: TcpFlags = TcpFlags(0x04);
    pub const PSH: TcpFlags = TcpFlags(0x08);
    pub const ACK: TcpFlags = TcpFlags(0x10);
    pub const URG: TcpFlags = TcpFlags(0x20);

    pub fn contains(self, other: TcpFlags) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl core::ops::BitOr for TcpFlags {
    type Output = TcpFlags;

    fn bitor(self, rhs: TcpFlags) -> Self::Output {
        TcpFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(TcpFlags, &str); 6] = [
            (TcpFlags::SYN, "SYN"),
            (TcpFlags::ACK, "ACK"),
            (TcpFlags::PSH, "PSH"),
            (TcpFlags::FIN, "FIN"),
            (TcpFlags::RST, "RST"),
            (TcpFlags::URG, "URG"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("-")?;
        }
        Ok(())
    }
}

/// View over a TCP segment (header followed by its payload).
#[derive(Debug, Clone, Copy)]
pub struct TcpHeader<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> TcpHeader<T> {
    pub const MIN_LEN: usize = 20;

    const OPTION_END: u8 = 0;
    const OPTION_NOP: u8 = 1;
    const OPTION_MSS: u8 = 2;

    pub(crate) fn new_unchecked(buffer: T) -> Self {
        Self { buffer }
    }

    pub fn new_checked(buffer: T) -> Result<Self, PacketError> {
        let data = buffer.as_ref();
        ensure_len(data, Self::MIN_LEN)?;
        let header_len = ((data[12] >> 4) as usize) * 4;
        if header_len < Self::MIN_LEN {
            return Err(PacketError::Malformed("TCP data offset < 5"));
        }
        ensure_len(data, header_len)?;
        Ok(Self { buffer })
    }

    pub fn src_port(&self) -> u16 {
        read_u16(self.buffer.as_ref(), 0)
    }

    pub fn dst_port(&self) -> u16 {
        read_u16(self.buffer.as_ref(), 2)
    }

    pub fn seq_number(&self) -> u32 {
        read_u32(self.buffer.as_ref(), 4)
    }

    pub fn ack_number(&self) -> u32 {
        read_u32(self.buffer.as_ref(), 8)
    }

    pub fn header_len(&self) -> usize {
        ((self.buffer.as_ref()[12] >> 4) as usize) * 4
    }

    pub fn flags(&self) -> TcpFlags {
        TcpFlags(self.buffer.as_ref()[13] & 0x3f)
    }

    pub fn is_syn(&self) -> bool {
        self.flags().contains(TcpFlags::SYN)
    }

    pub fn is_ack(&self) -> bool {
        self.flags().contains(TcpFlags::ACK)
    }

    pub fn is_fin(&self) -> bool {
        self.flags().contains(TcpFlags::FIN)
    }

    pub fn is_rst(&self) -> bool {
        self.flags().contains(TcpFlags::RST)
    }

    pub fn window(&self) -> u16 {
        read_u16(self.buffer.as_ref(), 14)
    }

    pub fn checksum(&self) -> u16 {
        read_u16(self.buffer.as_ref(), 16)
    }

    pub fn options(&self) -> &[u8] {
        &self.buffer.as_ref()[Self::MIN_LEN..self.header_len()]
    }

    /// Maximum segment size advertised in the options, if any.
    pub fn mss(&self) -> Option<u16> {
        let mut options = self.options();
        while let Some(&kind) = options.first() {
            match kind {
                Self::OPTION_END => return None,
                Self::OPTION_NOP => options = &options[1..],
                _ => {
                    let len = *options.get(1)? as usize;
                    if len < 2 || len > options.len() {
                        return None;
                    }
                    if kind == Self::OPTION_MSS && len == 4 {
                        return Some(read_u16(options, 2));
                    }
                    options = &options[len..];
                }
            }
        }
        None
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[self.header_len()..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_ref()
    }

    pub fn checksum_valid(&self) -> bool {
        checksum::internet_checksum(self.as_bytes()) == 0
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> TcpHeader<T> {
    pub fn set_src_port(&mut self, port: u16) {
        write_u16(self.buffer.as_mut(), 0, port);
    }

    pub fn set_dst_port(&mut self, port: u16) {
        write_u16(self.buffer.as_mut(), 2, port);
    }

    pub fn swap_src_dst(&mut self) {
        let src = self.src_port();
        let dst = self.dst_port();
        self.set_src_port(dst);
        self.set_dst_port(src);
    }

    pub fn set_seq_number(&mut self, seq: u32) {
        write_u32(self.buffer.as_mut(), 4, seq);
    }

    pub fn set_ack_number(&mut self, ack: u32) {
        write_u32(self.buffer.as_mut(), 8, ack);
    }

    /// Replaces every control bit, including CWR/ECE and NS: the relay never negotiates ECN.
    pub fn set_flags(&mut self, flags: TcpFlags) {
        let buf = self.buffer.as_mut();
        buf[13] = flags.0 & 0x3f;
        buf[12] &= 0xf0;
    }

    /// Marks the header as option-free and clears the reserved bits. The caller is responsible
    /// for the bytes that follow.
    pub fn strip_options(&mut self) {
        self.buffer.as_mut()[12] = 5 << 4;
    }

    /// Header+payload checksum; the buffer must end where the IPv4 total length says it does.
    pub fn compute_checksum(&mut self) {
        let buf = self.buffer.as_mut();
        write_u16(buf, 16, 0);
        let csum = checksum::internet_checksum(buf);
        write_u16(buf, 16, csum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syn_with_mss(mss: u16) -> Vec<u8> {
        let mut raw = vec![0u8; 28];
        raw[0..2].copy_from_slice(&40000u16.to_be_bytes());
        raw[2..4].copy_from_slice(&80u16.to_be_bytes());
        raw[4..8].copy_from_slice(&1000u32.to_be_bytes());
        raw[12] = 7 << 4;
        raw[13] = TcpFlags::SYN.0;
        raw[14..16].copy_from_slice(&65535u16.to_be_bytes());
        // NOP, NOP, MSS
        raw[20] = 1;
        raw[21] = 1;
        raw[22] = 2;
        raw[23] = 4;
        raw[24..26].copy_from_slice(&mss.to_be_bytes());
        raw[26] = 0;
        raw
    }

    #[test]
    fn parses_fields_and_mss_option() {
        let raw = syn_with_mss(1460);
        let tcp = TcpHeader::new_checked(&raw[..]).unwrap();
        assert_eq!(tcp.src_port(), 40000);
        assert_eq!(tcp.dst_port(), 80);
        assert_eq!(tcp.seq_number(), 1000);
        assert_eq!(tcp.header_len(), 28);
        assert!(tcp.is_syn());
        assert!(!tcp.is_ack());
        assert_eq!(tcp.mss(), Some(1460));
        assert!(tcp.payload().is_empty());
    }

    #[test]
    fn strip_options_shrinks_header() {
        let mut raw = syn_with_mss(1400);
        let mut tcp = TcpHeader::new_checked(&mut raw[..]).unwrap();
        tcp.strip_options();
        assert_eq!(tcp.header_len(), 20);
        assert_eq!(tcp.mss(), None);
    }

    #[test]
    fn set_flags_clears_ecn_bits() {
        let mut raw = syn_with_mss(1400);
        raw[12] |= 0x01;
        raw[13] |= 0xc0;
        let mut tcp = TcpHeader::new_checked(&mut raw[..]).unwrap();
        tcp.strip_options();
        tcp.set_flags(TcpFlags::SYN | TcpFlags::ACK);
        assert_eq!(raw[12], 0x50);
        assert_eq!(raw[13], 0x12);
    }

    #[test]
    fn rejects_short_data_offset() {
        let mut raw = syn_with_mss(1400);
        raw[12] = 4 << 4;
        assert_eq!(
            TcpHeader::new_checked(&raw[..]).unwrap_err(),
            PacketError::Malformed("TCP data offset < 5")
        );
    }

    #[test]
    fn flags_and_numbers_round_trip_in_place() {
        let mut raw = syn_with_mss(1400);
        let mut tcp = TcpHeader::new_checked(&mut raw[..]).unwrap();
        tcp.set_flags(TcpFlags::FIN | TcpFlags::ACK);
        tcp.set_seq_number(u32::MAX);
        tcp.set_ack_number(7);
        tcp.swap_src_dst();
        tcp.compute_checksum();
        assert_eq!(tcp.flags(), TcpFlags::FIN | TcpFlags::ACK);
        assert_eq!(tcp.seq_number(), u32::MAX);
        assert_eq!(tcp.ack_number(), 7);
        assert_eq!(tcp.src_port(), 80);
        assert_eq!(tcp.dst_port(), 40000);
        assert!(tcp.checksum_valid());
        assert_eq!(format!("{:?}", tcp.flags()), "ACK|FIN");
    }
}
