use crate::{IcmpHeader, IpProtocol, PacketError, TcpHeader, UdpHeader};

/// Transport header of a supported datagram.
#[derive(Debug, Clone, Copy)]
pub enum TransportHeader<T> {
    Tcp(TcpHeader<T>),
    Udp(UdpHeader<T>),
    Icmp(IcmpHeader<T>),
}

impl<T: AsRef<[u8]>> TransportHeader<T> {
    pub fn new_checked(protocol: IpProtocol, buffer: T) -> Result<Self, PacketError> {
        Ok(match protocol {
            IpProtocol::Tcp => Self::Tcp(TcpHeader::new_checked(buffer)?),
            IpProtocol::Udp => Self::Udp(UdpHeader::new_checked(buffer)?),
            IpProtocol::Icmp => Self::Icmp(IcmpHeader::new_checked(buffer)?),
        })
    }

    pub(crate) fn new_unchecked(protocol: IpProtocol, buffer: T) -> Self {
        match protocol {
            IpProtocol::Tcp => Self::Tcp(TcpHeader::new_unchecked(buffer)),
            IpProtocol::Udp => Self::Udp(UdpHeader::new_unchecked(buffer)),
            IpProtocol::Icmp => Self::Icmp(IcmpHeader::new_unchecked(buffer)),
        }
    }

    pub fn protocol(&self) -> IpProtocol {
        match self {
            Self::Tcp(_) => IpProtocol::Tcp,
            Self::Udp(_) => IpProtocol::Udp,
            Self::Icmp(_) => IpProtocol::Icmp,
        }
    }

    pub fn src_port(&self) -> u16 {
        match self {
            Self::Tcp(h) => h.src_port(),
            Self::Udp(h) => h.src_port(),
            Self::Icmp(h) => h.src_port(),
        }
    }

    pub fn dst_port(&self) -> u16 {
        match self {
            Self::Tcp(h) => h.dst_port(),
            Self::Udp(h) => h.dst_port(),
            Self::Icmp(h) => h.dst_port(),
        }
    }

    pub fn header_len(&self) -> usize {
        match self {
            Self::Tcp(h) => h.header_len(),
            Self::Udp(_) => UdpHeader::<T>::LEN,
            Self::Icmp(_) => IcmpHeader::<T>::LEN,
        }
    }

    pub fn as_tcp(&self) -> Option<&TcpHeader<T>> {
        match self {
            Self::Tcp(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_icmp(&self) -> Option<&IcmpHeader<T>> {
        match self {
            Self::Icmp(h) => Some(h),
            _ => None,
        }
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> TransportHeader<T> {
    pub fn set_payload_len(&mut self, payload_len: u16) {
        // TCP and ICMP carry no length field of their own.
        if let Self::Udp(h) = self {
            h.set_payload_len(payload_len);
        }
    }

    /// Swaps ports. ICMP ports are derived from the echo identifier, so there is nothing to swap.
    pub fn swap_src_dst(&mut self) {
        match self {
            Self::Tcp(h) => h.swap_src_dst(),
            Self::Udp(h) => h.swap_src_dst(),
            Self::Icmp(_) => {}
        }
    }

    pub fn compute_checksum(&mut self) {
        match self {
            Self::Tcp(h) => h.compute_checksum(),
            Self::Udp(h) => h.compute_checksum(),
            Self::Icmp(h) => h.compute_checksum(),
        }
    }

    pub fn as_tcp_mut(&mut self) -> Option<&mut TcpHeader<T>> {
        match self {
            Self::Tcp(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_icmp_mut(&mut self) -> Option<&mut IcmpHeader<T>> {
        match self {
            Self::Icmp(h) => Some(h),
            _ => None,
        }
    }
}
