//! IPv4/TCP/UDP/ICMP header codecs for the reverse-tethering relay.
//!
//! Every header type is a thin view over a byte buffer (`T: AsRef<[u8]>`, plus `AsMut<[u8]>` for
//! setters). Nothing here copies packet bytes except [`Packetizer`], which owns the single buffer
//! its response datagrams are built in.
#![forbid(unsafe_code)]

pub mod builder;
pub mod checksum;
pub mod icmp;
pub mod ipv4;
pub mod packet;
pub mod packetizer;
pub mod tcp;
pub mod transport;
pub mod udp;

pub use icmp::IcmpHeader;
pub use ipv4::{IpProtocol, Ipv4Header};
pub use packet::{Ipv4Packet, MAX_PACKET_LENGTH};
pub use packetizer::Packetizer;
pub use tcp::{TcpFlags, TcpHeader};
pub use transport::TransportHeader;
pub use udp::UdpHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("buffer truncated")]
    Truncated,
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
    #[error("unsupported packet: {0}")]
    Unsupported(&'static str),
}

pub(crate) fn ensure_len(buf: &[u8], len: usize) -> Result<(), PacketError> {
    if buf.len() < len {
        return Err(PacketError::Truncated);
    }
    Ok(())
}

#[inline]
pub(crate) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

#[inline]
pub(crate) fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

#[inline]
pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

#[inline]
pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}
