use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::Ipv4Addr;
use std::sync::Arc;

use revtet_packet::{IpProtocol, Ipv4Packet};

/// Flow key: protocol plus source and destination endpoints, as seen from the device.
///
/// The display form is rendered once at construction since every connection log line uses it;
/// clones share it.
#[derive(Clone)]
pub struct ConnectionId {
    protocol: IpProtocol,
    src_ip: Ipv4Addr,
    src_port: u16,
    dst_ip: Ipv4Addr,
    dst_port: u16,
    display: Arc<str>,
}

impl ConnectionId {
    pub fn new(
        protocol: IpProtocol,
        src_ip: Ipv4Addr,
        src_port: u16,
        dst_ip: Ipv4Addr,
        dst_port: u16,
    ) -> Self {
        let display = format!("{protocol} {src_ip}:{src_port} -> {dst_ip}:{dst_port}").into();
        Self {
            protocol,
            src_ip,
            src_port,
            dst_ip,
            dst_port,
            display,
        }
    }

    pub fn from_packet<T: AsRef<[u8]>>(packet: &Ipv4Packet<T>) -> Self {
        let ip = packet.ipv4_header();
        let transport = packet.transport_header();
        Self::new(
            packet.protocol(),
            ip.src(),
            transport.src_port(),
            ip.dst(),
            transport.dst_port(),
        )
    }

    pub fn protocol(&self) -> IpProtocol {
        self.protocol
    }

    pub fn src_ip(&self) -> Ipv4Addr {
        self.src_ip
    }

    pub fn src_port(&self) -> u16 {
        self.src_port
    }

    pub fn dst_ip(&self) -> Ipv4Addr {
        self.dst_ip
    }

    pub fn dst_port(&self) -> u16 {
        self.dst_port
    }

    fn key(&self) -> (IpProtocol, Ipv4Addr, u16, Ipv4Addr, u16) {
        (
            self.protocol,
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port,
        )
    }
}

// Equality and hashing cover the 5-tuple only; the cached string is derived from it.
impl PartialEq for ConnectionId {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ConnectionId {}

impl Hash for ConnectionId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.display)
    }
}
