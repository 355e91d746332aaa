use crate::{IpProtocol, Ipv4Header, PacketError, TransportHeader};

/// Largest datagram the relay ever buffers; the IPv4 length field is 16 bits wide.
pub const MAX_PACKET_LENGTH: usize = 1 << 16;

/// A supported IPv4 datagram: one IPv4 header and one transport header over a single buffer.
///
/// The view never owns more than the region it overlays. When the buffer is borrowed from a
/// reusable staging area (the inbound packet buffer, a [`crate::Packetizer`]), the borrow checker
/// ends the view's life before the area can be refilled.
#[derive(Debug)]
pub struct Ipv4Packet<T> {
    buffer: T,
    protocol: IpProtocol,
    ip_header_len: usize,
    transport_header_len: usize,
    total_len: usize,
}

impl<T: AsRef<[u8]>> Ipv4Packet<T> {
    /// Parses a datagram.
    ///
    /// Anything other than IPv4 without options carrying TCP, UDP or ICMP is rejected, as is a
    /// datagram whose transport header does not fit within the IPv4 total length.
    pub fn parse(buffer: T) -> Result<Self, PacketError> {
        let data = buffer.as_ref();
        let ip = Ipv4Header::new_checked(data)?;
        if ip.version() != 4 {
            return Err(PacketError::Unsupported("not IPv4"));
        }
        if ip.header_len() != Ipv4Header::<&[u8]>::MIN_LEN {
            return Err(PacketError::Unsupported("IPv4 options"));
        }
        let protocol = ip
            .protocol()
            .ok_or(PacketError::Unsupported("transport protocol"))?;
        let ip_header_len = ip.header_len();
        let total_len = ip.total_len() as usize;
        if total_len < ip_header_len {
            return Err(PacketError::Malformed("IPv4 total length < header length"));
        }
        if total_len > data.len() {
            return Err(PacketError::Truncated);
        }
        let transport = TransportHeader::new_checked(protocol, &data[ip_header_len..total_len])?;
        let transport_header_len = transport.header_len();
        Ok(Self {
            buffer,
            protocol,
            ip_header_len,
            transport_header_len,
            total_len,
        })
    }

    /// Wraps a buffer whose layout the caller already knows (the packetizer's template).
    pub(crate) fn from_parts(
        buffer: T,
        protocol: IpProtocol,
        ip_header_len: usize,
        transport_header_len: usize,
    ) -> Self {
        let total_len = buffer.as_ref().len();
        Self {
            buffer,
            protocol,
            ip_header_len,
            transport_header_len,
            total_len,
        }
    }

    pub fn protocol(&self) -> IpProtocol {
        self.protocol
    }

    pub fn ipv4_header(&self) -> Ipv4Header<&[u8]> {
        Ipv4Header::new_unchecked(&self.buffer.as_ref()[..self.ip_header_len])
    }

    pub fn transport_header(&self) -> TransportHeader<&[u8]> {
        TransportHeader::new_unchecked(
            self.protocol,
            &self.buffer.as_ref()[self.ip_header_len..self.total_len],
        )
    }

    pub fn headers_len(&self) -> usize {
        self.ip_header_len + self.transport_header_len
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[self.headers_len()..self.total_len]
    }

    pub fn payload_len(&self) -> usize {
        self.total_len - self.headers_len()
    }

    /// The datagram's bytes, exactly as long as the IPv4 total length.
    pub fn raw(&self) -> &[u8] {
        &self.buffer.as_ref()[..self.total_len]
    }

    pub fn len(&self) -> usize {
        self.total_len
    }

    pub fn is_empty(&self) -> bool {
        self.total_len == 0
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Ipv4Packet<T> {
    pub fn ipv4_header_mut(&mut self) -> Ipv4Header<&mut [u8]> {
        Ipv4Header::new_unchecked(&mut self.buffer.as_mut()[..self.ip_header_len])
    }

    pub fn transport_header_mut(&mut self) -> TransportHeader<&mut [u8]> {
        TransportHeader::new_unchecked(
            self.protocol,
            &mut self.buffer.as_mut()[self.ip_header_len..self.total_len],
        )
    }

    pub fn swap_src_dst(&mut self) {
        self.ipv4_header_mut().swap_src_dst();
        self.transport_header_mut().swap_src_dst();
    }

    pub fn compute_checksums(&mut self) {
        self.ipv4_header_mut().compute_checksum();
        self.transport_header_mut().compute_checksum();
    }
}
