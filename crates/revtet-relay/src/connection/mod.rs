//! Per-flow state machines.
//!
//! A connection is created by the router on the first datagram of an unseen flow and lives until
//! it reports [`Connection::is_closed`] or expires. The session event loop asks each connection
//! which socket conditions it is waiting for ([`Connection::poll_ready`]) and dispatches the
//! conditions that fired back to it ([`Connection::on_ready`]).

pub mod icmp;
pub mod tcp;
pub mod udp;

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::task::{Context, Poll};

use revtet_packet::Ipv4Packet;
use tokio::time::Instant;

use crate::client::ClientOutput;
use crate::ConnectionId;

pub use icmp::IcmpConnection;
pub use tcp::{TcpConnection, TcpState};
pub use udp::UdpConnection;

/// Emulators reach their host through this address; it is relayed to the host's own loopback.
pub const EMULATOR_HOST_ALIAS: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 2);

bitflags::bitflags! {
    /// Socket conditions a connection waits for, and the subset that fired.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Interest: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const CONNECT = 0b100;
    }
}

/// Something holding one datagram for the device that could not be delivered yet.
///
/// `get` returns the held datagram (refreshed if needed); `next` is called once it has been
/// copied into the client's outbound buffer.
pub trait PacketSource {
    fn get(&mut self) -> Option<Ipv4Packet<&mut [u8]>>;
    fn next(&mut self);
}

pub trait Connection: Send {
    fn id(&self) -> &ConnectionId;

    /// Handles one datagram from the device addressed to this flow.
    fn send_to_network(&mut self, packet: &Ipv4Packet<&[u8]>, client: &mut ClientOutput);

    /// Releases the socket. Called once, either by the connection itself on close or by the
    /// router when evicting it.
    fn disconnect(&mut self);

    fn is_expired(&self, now: Instant) -> bool;

    /// Set once the connection has torn itself down; the router then drops it.
    fn is_closed(&self) -> bool;

    /// Polls the socket conditions the connection currently waits for.
    ///
    /// Returns the fired subset, or `Pending` with wakeups registered on `cx`.
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Interest>;

    fn on_ready(&mut self, ready: Interest, client: &mut ClientOutput);

    /// Connections that can hold a datagram for the device while the outbound buffer is full.
    fn as_packet_source(&mut self) -> Option<&mut dyn PacketSource> {
        None
    }
}

/// Destination socket address of `id`, with the emulator host alias mapped to loopback.
pub fn rewritten_destination(id: &ConnectionId) -> SocketAddr {
    let ip = if id.dst_ip() == EMULATOR_HOST_ALIAS {
        Ipv4Addr::LOCALHOST
    } else {
        id.dst_ip()
    };
    SocketAddr::V4(SocketAddrV4::new(ip, id.dst_port()))
}
