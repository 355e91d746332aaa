use std::collections::HashMap;
use std::task::{Context, Poll};
use std::time::Duration;

use revtet_packet::{IpProtocol, Ipv4Packet};
use tokio::time::Instant;

use crate::client::ClientOutput;
use crate::connection::{Connection, IcmpConnection, Interest, TcpConnection, UdpConnection};
use crate::{ConnectionId, RelayError};

/// Flow table of one client.
pub struct Router {
    connections: HashMap<ConnectionId, Box<dyn Connection>>,
    probe_timeout: Duration,
}

impl Router {
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            connections: HashMap::new(),
            probe_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn get_mut(&mut self, id: &ConnectionId) -> Option<&mut (dyn Connection + 'static)> {
        self.connections.get_mut(id).map(|conn| conn.as_mut())
    }

    /// Dispatches one raw datagram from the device, creating its flow on first sight.
    pub fn send_to_network(&mut self, raw: &[u8], client: &mut ClientOutput) {
        let packet = match Ipv4Packet::parse(raw) {
            Ok(packet) => packet,
            Err(err) => {
                tracing::warn!(len = raw.len(), "dropping invalid packet: {err}");
                return;
            }
        };

        let id = ConnectionId::from_packet(&packet);
        if !self.connections.contains_key(&id) {
            match self.create_connection(id.clone(), &packet) {
                Ok(conn) => {
                    self.connections.insert(id.clone(), conn);
                }
                Err(err) => {
                    tracing::error!(%id, "cannot create connection, dropping packet: {err}");
                    return;
                }
            }
        }

        let closed = match self.connections.get_mut(&id) {
            Some(conn) => {
                conn.send_to_network(&packet, client);
                conn.is_closed()
            }
            None => false,
        };
        if closed {
            self.remove(&id);
        }
    }

    fn create_connection(
        &self,
        id: ConnectionId,
        packet: &Ipv4Packet<&[u8]>,
    ) -> Result<Box<dyn Connection>, RelayError> {
        let conn: Box<dyn Connection> = match id.protocol() {
            IpProtocol::Tcp => Box::new(TcpConnection::new(id, packet)),
            IpProtocol::Udp => Box::new(UdpConnection::new(id, packet)?),
            IpProtocol::Icmp => Box::new(IcmpConnection::new(id, packet, self.probe_timeout)?),
        };
        Ok(conn)
    }

    /// Drops a connection that has already released its socket.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not in the table: a connection can only be removed once.
    pub fn remove(&mut self, id: &ConnectionId) {
        if self.connections.remove(id).is_none() {
            panic!("removed a connection unknown to the router: {id}");
        }
        tracing::debug!(%id, "connection removed");
    }

    /// Collects the socket conditions that fired for every connection.
    pub fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Vec<(ConnectionId, Interest)>> {
        let events: Vec<_> = self
            .connections
            .iter_mut()
            .filter_map(|(id, conn)| match conn.poll_ready(cx) {
                Poll::Ready(ready) => Some((id.clone(), ready)),
                Poll::Pending => None,
            })
            .collect();
        if events.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(events)
        }
    }

    pub fn on_ready(&mut self, events: Vec<(ConnectionId, Interest)>, client: &mut ClientOutput) {
        for (id, ready) in events {
            let closed = match self.connections.get_mut(&id) {
                Some(conn) => {
                    conn.on_ready(ready, client);
                    conn.is_closed()
                }
                None => false,
            };
            if closed {
                self.remove(&id);
            }
        }
    }

    pub fn clean_expired_connections(&mut self, now: Instant) {
        self.connections.retain(|id, conn| {
            if !conn.is_expired(now) {
                return true;
            }
            tracing::info!(%id, "removing expired connection");
            conn.disconnect();
            false
        });
    }

    pub fn close_all(&mut self) {
        for (_, mut conn) in self.connections.drain() {
            conn.disconnect();
        }
    }
}
