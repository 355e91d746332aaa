//! Datagram builders for the device side of the link.
//!
//! The relay itself never builds datagrams from scratch (it stamps payloads into a template, see
//! [`crate::Packetizer`]); these builders produce what a device stack would emit.

use core::net::Ipv4Addr;

use crate::{checksum, IcmpHeader, IpProtocol, TcpFlags, TcpHeader, UdpHeader};

/// Wraps `transport` (header + payload) into an option-free IPv4 header with a valid checksum.
pub fn build_ipv4(src: Ipv4Addr, dst: Ipv4Addr, protocol: IpProtocol, transport: &[u8]) -> Vec<u8> {
    let total_len = 20 + transport.len();
    assert!(total_len <= u16::MAX as usize, "IPv4 datagram too large");
    let mut out = Vec::with_capacity(total_len);
    out.push(0x45);
    out.push(0);
    out.extend_from_slice(&(total_len as u16).to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&0x4000u16.to_be_bytes());
    out.push(64);
    out.push(protocol.as_u8());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&src.octets());
    out.extend_from_slice(&dst.octets());
    let csum = checksum::internet_checksum(&out[..20]);
    out[10..12].copy_from_slice(&csum.to_be_bytes());
    out.extend_from_slice(transport);
    out
}

#[derive(Debug, Clone)]
pub struct TcpSegmentBuilder<'a> {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_number: u32,
    pub ack_number: u32,
    pub flags: TcpFlags,
    pub window: u16,
    pub mss: Option<u16>,
    pub payload: &'a [u8],
}

impl<'a> TcpSegmentBuilder<'a> {
    pub fn new(src_port: u16, dst_port: u16, seq_number: u32, ack_number: u32, flags: TcpFlags) -> Self {
        Self {
            src_port,
            dst_port,
            seq_number,
            ack_number,
            flags,
            window: u16::MAX,
            mss: None,
            payload: &[],
        }
    }

    pub fn window(mut self, window: u16) -> Self {
        self.window = window;
        self
    }

    pub fn mss(mut self, mss: u16) -> Self {
        self.mss = Some(mss);
        self
    }

    pub fn payload(mut self, payload: &'a [u8]) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let header_len = if self.mss.is_some() { 24 } else { 20 };
        let mut out = vec![0u8; header_len + self.payload.len()];
        out[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        out[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        out[4..8].copy_from_slice(&self.seq_number.to_be_bytes());
        out[8..12].copy_from_slice(&self.ack_number.to_be_bytes());
        out[12] = ((header_len / 4) as u8) << 4;
        out[13] = self.flags.0;
        out[14..16].copy_from_slice(&self.window.to_be_bytes());
        if let Some(mss) = self.mss {
            out[20] = 2;
            out[21] = 4;
            out[22..24].copy_from_slice(&mss.to_be_bytes());
        }
        out[header_len..].copy_from_slice(self.payload);
        TcpHeader::new_unchecked(&mut out[..]).compute_checksum();
        out
    }
}

#[derive(Debug, Clone)]
pub struct UdpDatagramBuilder<'a> {
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: &'a [u8],
}

impl UdpDatagramBuilder<'_> {
    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0u8; UdpHeader::<&[u8]>::LEN + self.payload.len()];
        out[UdpHeader::<&[u8]>::LEN..].copy_from_slice(self.payload);
        let mut udp = UdpHeader::new_unchecked(&mut out[..]);
        udp.set_src_port(self.src_port);
        udp.set_dst_port(self.dst_port);
        udp.set_payload_len(self.payload.len() as u16);
        udp.compute_checksum();
        out
    }
}

#[derive(Debug, Clone)]
pub struct IcmpEchoBuilder<'a> {
    pub identifier: u16,
    pub sequence: u16,
    pub payload: &'a [u8],
}

impl IcmpEchoBuilder<'_> {
    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0u8; IcmpHeader::<&[u8]>::LEN + self.payload.len()];
        out[0] = IcmpHeader::<&[u8]>::TYPE_ECHO_REQUEST;
        out[4..6].copy_from_slice(&self.identifier.to_be_bytes());
        out[6..8].copy_from_slice(&self.sequence.to_be_bytes());
        out[IcmpHeader::<&[u8]>::LEN..].copy_from_slice(self.payload);
        IcmpHeader::new_unchecked(&mut out[..]).compute_checksum();
        out
    }
}
