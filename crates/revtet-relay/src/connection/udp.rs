use std::io;
use std::net::Ipv4Addr;
use std::task::{Context, Poll};
use std::time::Duration;

use revtet_packet::{Ipv4Packet, Packetizer, MAX_PACKET_LENGTH};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use super::{rewritten_destination, Connection, Interest};
use crate::buffer::DatagramBuffer;
use crate::client::ClientOutput;
use crate::{ConnectionId, RelayError};

pub const IDLE_TIMEOUT: Duration = Duration::from_secs(2 * 60);

const CLIENT_TO_NETWORK_CAPACITY: usize = 4 * MAX_PACKET_LENGTH;

/// Relays one device UDP flow over a connected UDP socket.
pub struct UdpConnection {
    id: ConnectionId,
    packetizer: Packetizer,
    client_to_network: DatagramBuffer,
    socket: Option<UdpSocket>,
    interests: Interest,
    idle_since: Instant,
    closed: bool,
}

impl UdpConnection {
    pub fn new(id: ConnectionId, packet: &Ipv4Packet<&[u8]>) -> Result<Self, RelayError> {
        tracing::debug!(%id, "open");
        let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_nonblocking(true)?;
        socket.connect(rewritten_destination(&id))?;
        let socket = UdpSocket::from_std(socket)?;

        Ok(Self {
            packetizer: Packetizer::new(packet),
            client_to_network: DatagramBuffer::new(CLIENT_TO_NETWORK_CAPACITY),
            socket: Some(socket),
            interests: Interest::READ,
            idle_since: Instant::now(),
            closed: false,
            id,
        })
    }

    fn touch(&mut self) {
        self.idle_since = Instant::now();
    }

    fn process_receive(&mut self, client: &mut ClientOutput) {
        let Some(socket) = &self.socket else {
            return;
        };
        let id = &self.id;
        let max_payload = self.packetizer.max_payload_len();
        let result = self
            .packetizer
            .packetize(max_payload, |buf| socket.try_recv(buf))
            .map(|packet| {
                if client.send_to_client(packet.raw()) {
                    tracing::trace!(%id, len = packet.payload_len(), "datagram sent to device");
                } else {
                    tracing::warn!(%id, "cannot send to device, dropping datagram");
                }
            });
        match result {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => {
                tracing::error!(id = %self.id, "cannot read: {err}");
                self.close();
            }
        }
    }

    fn process_send(&mut self) {
        let Some(socket) = &self.socket else {
            return;
        };
        loop {
            match self.client_to_network.send_front(|datagram| socket.try_send(datagram)) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    tracing::error!(id = %self.id, "cannot write: {err}");
                    self.close();
                    break;
                }
            }
        }
    }

    fn close(&mut self) {
        self.disconnect();
        self.closed = true;
    }

    fn update_interests(&mut self) {
        if self.socket.is_none() {
            self.interests = Interest::empty();
            return;
        }
        let mut interests = Interest::READ;
        if !self.client_to_network.is_empty() {
            interests |= Interest::WRITE;
        }
        self.interests = interests;
    }
}

impl Connection for UdpConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send_to_network(&mut self, packet: &Ipv4Packet<&[u8]>, _client: &mut ClientOutput) {
        if !self.client_to_network.try_push(packet.payload()) {
            tracing::warn!(id = %self.id, "cannot send to network, dropping datagram");
            return;
        }
        self.update_interests();
    }

    fn disconnect(&mut self) {
        if self.socket.take().is_some() {
            tracing::debug!(id = %self.id, "close");
        }
        self.interests = Interest::empty();
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.idle_since + IDLE_TIMEOUT
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Interest> {
        let Some(socket) = &self.socket else {
            return Poll::Pending;
        };
        let mut ready = Interest::empty();
        if self.interests.contains(Interest::READ) && socket.poll_recv_ready(cx).is_ready() {
            ready |= Interest::READ;
        }
        if self.interests.contains(Interest::WRITE) && socket.poll_send_ready(cx).is_ready() {
            ready |= Interest::WRITE;
        }
        if ready.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(ready)
        }
    }

    fn on_ready(&mut self, ready: Interest, client: &mut ClientOutput) {
        self.touch();
        if ready.contains(Interest::READ) && !self.closed {
            self.process_receive(client);
        }
        if ready.contains(Interest::WRITE) && !self.closed {
            self.process_send();
        }
        self.update_interests();
    }
}
