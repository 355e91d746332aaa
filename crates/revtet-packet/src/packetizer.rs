use std::io;

use crate::{Ipv4Packet, IpProtocol, Ipv4Header, TransportHeader, MAX_PACKET_LENGTH};

/// Room for an option-free IPv4 header plus the largest transport header a template keeps.
const TEMPLATE_CAPACITY: usize = 40;

/// Builds response datagrams for one flow.
///
/// Holds a copy of the flow's first inbound headers with source and destination swapped, and
/// stamps each outgoing payload behind them. Header-only control datagrams are built in their own
/// small buffer, so emitting an ACK does not disturb a data datagram still waiting for delivery.
/// Every returned packet borrows the packetizer, so it must be consumed before the next call.
pub struct Packetizer {
    template: [u8; TEMPLATE_CAPACITY],
    control: [u8; TEMPLATE_CAPACITY],
    data: Box<[u8]>,
    data_len: usize,
    protocol: IpProtocol,
    ip_header_len: usize,
    transport_header_len: usize,
}

impl Packetizer {
    /// Captures the headers of `packet` as the response template.
    ///
    /// TCP options are not echoed: the template TCP header is always 20 bytes.
    pub fn new<T: AsRef<[u8]>>(packet: &Ipv4Packet<T>) -> Self {
        let ipv4 = packet.ipv4_header();
        let transport = packet.transport_header();
        let ip_header_len = ipv4.header_len();
        let transport_header_len = match &transport {
            TransportHeader::Tcp(_) => 20,
            other => other.header_len(),
        };
        let headers_len = ip_header_len + transport_header_len;
        debug_assert!(headers_len <= TEMPLATE_CAPACITY);

        let mut template = [0u8; TEMPLATE_CAPACITY];
        template[..headers_len].copy_from_slice(&packet.raw()[..headers_len]);

        let mut packetizer = Self {
            template,
            control: [0u8; TEMPLATE_CAPACITY],
            data: vec![0u8; MAX_PACKET_LENGTH].into_boxed_slice(),
            data_len: 0,
            protocol: packet.protocol(),
            ip_header_len,
            transport_header_len,
        };
        packetizer.response_ipv4_header_mut().swap_src_dst();
        let mut transport = packetizer.response_transport_header_mut();
        if let Some(tcp) = transport.as_tcp_mut() {
            tcp.strip_options();
        }
        transport.swap_src_dst();
        packetizer
    }

    pub fn headers_len(&self) -> usize {
        self.ip_header_len + self.transport_header_len
    }

    /// Largest payload that still fits in the 16-bit IPv4 total length.
    pub fn max_payload_len(&self) -> usize {
        (MAX_PACKET_LENGTH - 1) - self.headers_len()
    }

    /// The template's IPv4 header. Changes apply to every datagram built afterwards.
    pub fn response_ipv4_header_mut(&mut self) -> Ipv4Header<&mut [u8]> {
        Ipv4Header::new_unchecked(&mut self.template[..self.ip_header_len])
    }

    /// The template's transport header. Changes apply to every datagram built afterwards.
    pub fn response_transport_header_mut(&mut self) -> TransportHeader<&mut [u8]> {
        let start = self.ip_header_len;
        let end = start + self.transport_header_len;
        TransportHeader::new_unchecked(self.protocol, &mut self.template[start..end])
    }

    /// A header-only datagram (ACK/SYN/FIN/RST framing).
    pub fn packetize_empty_payload(&mut self) -> Ipv4Packet<&mut [u8]> {
        let headers_len = self.headers_len();
        self.control[..headers_len].copy_from_slice(&self.template[..headers_len]);
        let (protocol, ip_header_len, transport_header_len) =
            (self.protocol, self.ip_header_len, self.transport_header_len);
        inflate(
            &mut self.control[..headers_len],
            protocol,
            ip_header_len,
            transport_header_len,
        )
    }

    /// Reads at most `max_chunk` payload bytes through `read` and wraps them.
    ///
    /// `read` gets the payload area and returns how many bytes it wrote, like a non-blocking
    /// socket read. Its errors (including `WouldBlock`) are passed through untouched.
    pub fn packetize<F>(&mut self, max_chunk: usize, read: F) -> io::Result<Ipv4Packet<&mut [u8]>>
    where
        F: FnOnce(&mut [u8]) -> io::Result<usize>,
    {
        let headers_len = self.headers_len();
        let max_chunk = max_chunk.min(self.max_payload_len());
        let payload_len = read(&mut self.data[headers_len..headers_len + max_chunk])?;
        debug_assert!(payload_len <= max_chunk);
        Ok(self.stamp(payload_len.min(max_chunk)))
    }

    /// Copies `payload` (truncated to the maximum payload length) behind the headers.
    pub fn packetize_payload(&mut self, payload: &[u8]) -> Ipv4Packet<&mut [u8]> {
        let headers_len = self.headers_len();
        let len = payload.len().min(self.max_payload_len());
        self.data[headers_len..headers_len + len].copy_from_slice(&payload[..len]);
        self.stamp(len)
    }

    /// Reopens the datagram most recently built by [`Self::packetize`] or
    /// [`Self::packetize_payload`], so its headers can be refreshed before delivery.
    pub fn last_packet_mut(&mut self) -> Ipv4Packet<&mut [u8]> {
        Ipv4Packet::from_parts(
            &mut self.data[..self.data_len],
            self.protocol,
            self.ip_header_len,
            self.transport_header_len,
        )
    }

    fn stamp(&mut self, payload_len: usize) -> Ipv4Packet<&mut [u8]> {
        let headers_len = self.headers_len();
        self.data[..headers_len].copy_from_slice(&self.template[..headers_len]);
        self.data_len = headers_len + payload_len;
        inflate(
            &mut self.data[..headers_len + payload_len],
            self.protocol,
            self.ip_header_len,
            self.transport_header_len,
        )
    }
}

/// Fixes up lengths and checksums of a datagram whose headers were just copied from a template.
fn inflate(
    buffer: &mut [u8],
    protocol: IpProtocol,
    ip_header_len: usize,
    transport_header_len: usize,
) -> Ipv4Packet<&mut [u8]> {
    let total_len = buffer.len();
    let payload_len = total_len - ip_header_len - transport_header_len;
    let mut packet = Ipv4Packet::from_parts(buffer, protocol, ip_header_len, transport_header_len);
    packet.ipv4_header_mut().set_total_len(total_len as u16);
    packet.transport_header_mut().set_payload_len(payload_len as u16);
    packet.compute_checksums();
    packet
}
