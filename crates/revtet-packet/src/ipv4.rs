use core::fmt;
use core::net::Ipv4Addr;

use crate::{checksum, ensure_len, read_u16, write_u16, PacketError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpProtocol {
    Icmp,
    Tcp,
    Udp,
}

impl IpProtocol {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            Self::ICMP => Some(Self::Icmp),
            Self::TCP => Some(Self::Tcp),
            Self::UDP => Some(Self::Udp),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Icmp => Self::ICMP,
            Self::Tcp => Self::TCP,
            Self::Udp => Self::UDP,
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Icmp => "ICMP",
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        })
    }
}

/// View over an IPv4 header.
///
/// The buffer may extend past the header (the rest of the datagram); accessors only touch the
/// first [`Ipv4Header::header_len`] bytes.
#[derive(Debug, Clone, Copy)]
pub struct Ipv4Header<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Ipv4Header<T> {
    pub const MIN_LEN: usize = 20;

    /// Wraps `buffer` after checking that the fixed part of the header is present.
    pub(crate) fn new_unchecked(buffer: T) -> Self {
        Self { buffer }
    }

    pub fn new_checked(buffer: T) -> Result<Self, PacketError> {
        ensure_len(buffer.as_ref(), Self::MIN_LEN)?;
        Ok(Self { buffer })
    }

    pub fn version(&self) -> u8 {
        self.buffer.as_ref()[0] >> 4
    }

    pub fn header_len(&self) -> usize {
        ((self.buffer.as_ref()[0] & 0x0f) as usize) * 4
    }

    pub fn total_len(&self) -> u16 {
        read_u16(self.buffer.as_ref(), 2)
    }

    pub fn raw_protocol(&self) -> u8 {
        self.buffer.as_ref()[9]
    }

    pub fn protocol(&self) -> Option<IpProtocol> {
        IpProtocol::from_u8(self.raw_protocol())
    }

    pub fn checksum(&self) -> u16 {
        read_u16(self.buffer.as_ref(), 10)
    }

    pub fn src(&self) -> Ipv4Addr {
        let b = self.buffer.as_ref();
        Ipv4Addr::new(b[12], b[13], b[14], b[15])
    }

    pub fn dst(&self) -> Ipv4Addr {
        let b = self.buffer.as_ref();
        Ipv4Addr::new(b[16], b[17], b[18], b[19])
    }

    /// IPv4, no options, and a transport the relay knows how to forward.
    pub fn is_supported(&self) -> bool {
        self.version() == 4 && self.header_len() == Self::MIN_LEN && self.protocol().is_some()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer.as_ref()[..self.header_len().min(self.buffer.as_ref().len())]
    }

    pub fn checksum_valid(&self) -> bool {
        checksum::internet_checksum(self.as_bytes()) == 0
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Ipv4Header<T> {
    pub fn set_total_len(&mut self, total_len: u16) {
        write_u16(self.buffer.as_mut(), 2, total_len);
    }

    pub fn swap_src_dst(&mut self) {
        let buf = self.buffer.as_mut();
        let (src, dst) = buf[12..20].split_at_mut(4);
        src.swap_with_slice(dst);
    }

    pub fn compute_checksum(&mut self) {
        let header_len = self.header_len();
        let buf = self.buffer.as_mut();
        write_u16(buf, 10, 0);
        let csum = checksum::internet_checksum(&buf[..header_len]);
        write_u16(buf, 10, csum);
    }
}

/// Reads the version nibble of the datagram starting at `buf`, if any byte is available.
pub fn peek_version(buf: &[u8]) -> Option<u8> {
    buf.first().map(|b| b >> 4)
}

/// Reads the datagram length announced by the header starting at `buf`.
///
/// Returns `None` while not enough bytes are available to read the length field. IPv6 headers
/// are delimited too (fixed header plus payload length) so that the caller can skip them.
pub fn peek_datagram_len(buf: &[u8]) -> Option<usize> {
    match peek_version(buf)? {
        6 => {
            if buf.len() < 6 {
                return None;
            }
            Some(40 + read_u16(buf, 4) as usize)
        }
        _ => {
            if buf.len() < 4 {
                return None;
            }
            Some(read_u16(buf, 2) as usize)
        }
    }
}
