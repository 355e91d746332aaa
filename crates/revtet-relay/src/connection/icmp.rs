use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::Duration;

use revtet_packet::{IpProtocol, Ipv4Packet, Packetizer};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::{rewritten_destination, Connection, Interest};
use crate::client::ClientOutput;
use crate::{ConnectionId, RelayError};

pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP echo service; probed to decide whether the destination host is up.
const PROBE_PORT: u16 = 7;

#[derive(Debug)]
struct EchoReply {
    sequence: u16,
    payload: Vec<u8>,
}

/// Answers device pings on behalf of a destination host.
///
/// Raw ICMP sockets need privileges, so each echo request is turned into a reachability probe run
/// off the event loop. A reachable host gets an echo reply synthesized from the request.
pub struct IcmpConnection {
    id: ConnectionId,
    packetizer: Packetizer,
    probe_addr: SocketAddr,
    probe_timeout: Duration,
    probes: JoinSet<()>,
    replies_tx: mpsc::UnboundedSender<EchoReply>,
    replies_rx: mpsc::UnboundedReceiver<EchoReply>,
    ready: VecDeque<EchoReply>,
    idle_since: Instant,
}

impl IcmpConnection {
    pub fn new(
        id: ConnectionId,
        packet: &Ipv4Packet<&[u8]>,
        probe_timeout: Duration,
    ) -> Result<Self, RelayError> {
        let transport = packet.transport_header();
        match transport.as_icmp() {
            Some(icmp) if icmp.is_echo_request() => {}
            _ => return Err(RelayError::Unsupported(IpProtocol::Icmp)),
        }

        let mut packetizer = Packetizer::new(packet);
        if let Some(icmp) = packetizer.response_transport_header_mut().as_icmp_mut() {
            icmp.set_echo_reply();
        }
        let mut probe_addr = rewritten_destination(&id);
        probe_addr.set_port(PROBE_PORT);
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();

        Ok(Self {
            id,
            packetizer,
            probe_addr,
            probe_timeout,
            probes: JoinSet::new(),
            replies_tx,
            replies_rx,
            ready: VecDeque::new(),
            idle_since: Instant::now(),
        })
    }
}

async fn is_reachable(addr: SocketAddr, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        // Something answered, even if nothing listens on the echo port.
        Ok(Err(err)) if err.kind() == io::ErrorKind::ConnectionRefused => true,
        Ok(Err(err)) => {
            tracing::debug!(%addr, "probe failed: {err}");
            false
        }
        Err(_) => false,
    }
}

impl Connection for IcmpConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send_to_network(&mut self, packet: &Ipv4Packet<&[u8]>, _client: &mut ClientOutput) {
        self.idle_since = Instant::now();
        let transport = packet.transport_header();
        let Some(icmp) = transport.as_icmp().filter(|icmp| icmp.is_echo_request()) else {
            tracing::debug!(id = %self.id, "ignoring ICMP message other than echo request");
            return;
        };

        let reply = EchoReply {
            sequence: icmp.sequence(),
            payload: packet.payload().to_vec(),
        };
        let addr = self.probe_addr;
        let timeout = self.probe_timeout;
        let tx = self.replies_tx.clone();
        self.probes.spawn(async move {
            if is_reachable(addr, timeout).await {
                let _ = tx.send(reply);
            }
        });
    }

    fn disconnect(&mut self) {
        // Nothing to close; in-flight probes end with the connection.
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.idle_since + IDLE_TIMEOUT
    }

    fn is_closed(&self) -> bool {
        false
    }

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Interest> {
        while let Poll::Ready(Some(_)) = self.probes.poll_join_next(cx) {}
        while let Poll::Ready(Some(reply)) = self.replies_rx.poll_recv(cx) {
            self.ready.push_back(reply);
        }
        if self.ready.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(Interest::READ)
        }
    }

    fn on_ready(&mut self, _ready: Interest, client: &mut ClientOutput) {
        while let Some(reply) = self.ready.pop_front() {
            if let Some(icmp) = self.packetizer.response_transport_header_mut().as_icmp_mut() {
                icmp.set_sequence(reply.sequence);
            }
            let packet = self.packetizer.packetize_payload(&reply.payload);
            if !client.send_to_client(packet.raw()) {
                tracing::warn!(id = %self.id, seq = reply.sequence, "cannot send to device, dropping echo reply");
            }
        }
    }
}
