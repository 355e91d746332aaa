use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use revtet_packet::{Ipv4Packet, Packetizer, TcpFlags, MAX_PACKET_LENGTH};
use tokio::net::TcpStream;
use tokio::time::Instant;

use super::{rewritten_destination, Connection, Interest, PacketSource};
use crate::buffer::StreamBuffer;
use crate::client::ClientOutput;
use crate::ConnectionId;

pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

const MTU: usize = 0x4000;
const MAX_PAYLOAD_SIZE: usize = MTU - 20 - 20;
const CLIENT_TO_NETWORK_CAPACITY: usize = 4 * MAX_PACKET_LENGTH;

type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<TcpStream>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    SynSent,
    SynReceived,
    Established,
    CloseWait,
    LastAck,
    Closing,
    FinWait1,
    FinWait2,
}

impl TcpState {
    pub fn is_connected(self) -> bool {
        !matches!(self, Self::SynSent | Self::SynReceived)
    }

    /// Closing from our side: no more reads from the network socket.
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            Self::FinWait1 | Self::FinWait2 | Self::Closing | Self::LastAck
        )
    }
}

enum Socket {
    Idle,
    Connecting(ConnectFuture),
    Connected(TcpStream),
    Closed,
}

/// Relays one device TCP flow over a real TCP stream.
///
/// The device talks TCP to us; we keep the sequence space it sees (`seq` for bytes we send it,
/// `ack` for bytes of its stream we have accepted) and forward the payload as a plain byte stream.
pub struct TcpConnection {
    id: ConnectionId,
    packetizer: Packetizer,
    client_to_network: StreamBuffer,
    socket: Socket,
    connect_result: Option<io::Result<TcpStream>>,

    state: Option<TcpState>,
    syn_seq: u32,
    seq: u32,
    ack: u32,
    their_ack: u32,
    fin_seq: Option<u32>,
    fin_received: bool,
    client_window: u16,
    mss: Option<u16>,

    /// Payload length of the data datagram held in the packetizer, waiting for outbound space.
    pending_payload: Option<usize>,
    interests: Interest,
    idle_since: Instant,
    closed: bool,
}

impl TcpConnection {
    pub fn new(id: ConnectionId, packet: &Ipv4Packet<&[u8]>) -> Self {
        tracing::debug!(%id, "open");
        Self {
            packetizer: Packetizer::new(packet),
            client_to_network: StreamBuffer::new(CLIENT_TO_NETWORK_CAPACITY),
            socket: Socket::Idle,
            connect_result: None,
            state: None,
            syn_seq: 0,
            seq: 0,
            ack: 0,
            their_ack: 0,
            fin_seq: None,
            fin_received: false,
            client_window: 0,
            mss: None,
            pending_payload: None,
            interests: Interest::empty(),
            idle_since: Instant::now(),
            closed: false,
            id,
        }
    }

    pub fn state(&self) -> Option<TcpState> {
        self.state
    }

    fn touch(&mut self) {
        self.idle_since = Instant::now();
    }

    fn set_state(&mut self, state: TcpState) {
        self.state = Some(state);
        tracing::debug!(id = %self.id, ?state, "state");
    }

    fn handle_packet(&mut self, packet: &Ipv4Packet<&[u8]>, client: &mut ClientOutput) {
        let transport = packet.transport_header();
        let Some(tcp) = transport.as_tcp() else {
            return;
        };

        if self.state.is_none() {
            self.handle_first_packet(packet, client);
            return;
        }

        if tcp.is_syn() {
            self.handle_duplicate_syn(tcp.seq_number(), client);
            return;
        }

        let packet_seq = tcp.seq_number();
        let expected = self.ack.wrapping_add(self.client_to_network.len() as u32);
        if packet_seq != expected {
            tracing::warn!(
                id = %self.id,
                seq = packet_seq,
                acking = tcp.ack_number(),
                expected,
                flags = ?tcp.flags(),
                "ignoring out-of-sequence segment"
            );
            return;
        }

        self.client_window = tcp.window();
        self.their_ack = tcp.ack_number();
        tracing::trace!(id = %self.id, seq = packet_seq, flags = ?tcp.flags(), "expected segment");

        if tcp.is_rst() {
            tracing::debug!(id = %self.id, "reset requested, closing");
            self.close();
            return;
        }

        if tcp.is_ack() {
            self.handle_ack(packet);
        }

        if tcp.is_fin() {
            self.handle_fin(client);
        }

        if let Some(fin_seq) = self.fin_seq {
            if tcp.ack_number() == fin_seq.wrapping_add(1) {
                tracing::debug!(id = %self.id, "received ACK of FIN");
                self.handle_fin_ack();
            }
        }
    }

    fn handle_first_packet(&mut self, packet: &Ipv4Packet<&[u8]>, client: &mut ClientOutput) {
        let transport = packet.transport_header();
        let Some(tcp) = transport.as_tcp() else {
            return;
        };
        if !tcp.is_syn() {
            tracing::warn!(
                id = %self.id,
                seq = tcp.seq_number(),
                acking = tcp.ack_number(),
                flags = ?tcp.flags(),
                "unexpected first segment"
            );
            self.seq = tcp.ack_number();
            self.reset_connection(client);
            return;
        }

        let their_seq = tcp.seq_number();
        self.syn_seq = their_seq;
        self.ack = their_seq.wrapping_add(1);
        self.seq = rand::random();
        self.client_window = tcp.window();
        self.mss = tcp.mss().filter(|&mss| mss > 0);
        tracing::debug!(id = %self.id, seq = self.seq, ack = self.ack, mss = ?self.mss, "initialized");

        let addr = rewritten_destination(&self.id);
        self.socket = Socket::Connecting(Box::pin(TcpStream::connect(addr)));
        self.set_state(TcpState::SynSent);
    }

    fn handle_duplicate_syn(&mut self, their_seq: u32, client: &mut ClientOutput) {
        if self.state == Some(TcpState::SynSent) {
            self.syn_seq = their_seq;
            self.ack = their_seq.wrapping_add(1);
        } else if their_seq != self.syn_seq {
            self.reset_connection(client);
        }
    }

    fn handle_ack(&mut self, packet: &Ipv4Packet<&[u8]>) {
        if self.state == Some(TcpState::SynReceived) {
            self.set_state(TcpState::Established);
            return;
        }

        let payload = packet.payload();
        if payload.is_empty() {
            return;
        }
        if !self.client_to_network.try_push(payload) {
            tracing::warn!(id = %self.id, len = payload.len(), "not enough space, dropping segment");
        }
    }

    fn handle_fin(&mut self, client: &mut ClientOutput) {
        tracing::debug!(id = %self.id, seq = self.seq, ack = self.ack, "received FIN from device");
        self.fin_received = true;
        if self.client_to_network.is_empty() {
            self.do_handle_fin(client);
        }
    }

    fn handle_fin_ack(&mut self) {
        match self.state {
            Some(TcpState::LastAck | TcpState::Closing) => self.close(),
            Some(TcpState::FinWait1) => self.set_state(TcpState::FinWait2),
            Some(TcpState::FinWait2) => {}
            state => tracing::warn!(id = %self.id, ?state, "received FIN ACK in unexpected state"),
        }
    }

    fn do_handle_fin(&mut self, client: &mut ClientOutput) {
        self.ack = self.ack.wrapping_add(1);
        match self.state {
            Some(TcpState::Established) => {
                self.send_empty_packet(TcpFlags::FIN | TcpFlags::ACK, client);
                self.fin_seq = Some(self.seq);
                self.seq = self.seq.wrapping_add(1);
                self.set_state(TcpState::LastAck);
            }
            Some(TcpState::FinWait1) => {
                self.send_empty_packet(TcpFlags::ACK, client);
                self.set_state(TcpState::Closing);
            }
            Some(TcpState::FinWait2) => {
                self.send_empty_packet(TcpFlags::ACK, client);
                self.close();
            }
            state => tracing::warn!(id = %self.id, ?state, "received FIN in unexpected state"),
        }
    }

    fn process_connect(&mut self, client: &mut ClientOutput) {
        match self.connect_result.take() {
            Some(Ok(stream)) => {
                self.socket = Socket::Connected(stream);
                self.set_state(TcpState::SynReceived);
                self.send_empty_packet(TcpFlags::SYN | TcpFlags::ACK, client);
                self.seq = self.seq.wrapping_add(1);
            }
            Some(Err(err)) => {
                tracing::error!(id = %self.id, "cannot connect: {err}");
                self.reset_connection(client);
            }
            None => {}
        }
    }

    fn process_receive(&mut self, client: &mut ClientOutput) {
        debug_assert!(self.pending_payload.is_none());
        let window = self.remaining_client_window();
        let mut max_payload = window.min(MAX_PAYLOAD_SIZE);
        if let Some(mss) = self.mss {
            max_payload = max_payload.min(usize::from(mss));
        }
        if max_payload == 0 {
            return;
        }
        self.update_headers(TcpFlags::ACK | TcpFlags::PSH);

        let Socket::Connected(stream) = &self.socket else {
            return;
        };
        let result = self
            .packetizer
            .packetize(max_payload, |buf| stream.try_read(buf))
            .map(|packet| packet.payload_len());
        match result {
            Ok(0) => self.eof(client),
            Ok(len) => {
                self.pending_payload = Some(len);
                let id = self.id.clone();
                client.consume(&id, self);
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => {
                tracing::error!(id = %self.id, "cannot read: {err}");
                self.reset_connection(client);
            }
        }
    }

    fn process_send(&mut self, client: &mut ClientOutput) {
        let Socket::Connected(stream) = &self.socket else {
            return;
        };
        match self.client_to_network.write_with(|chunk| stream.try_write(chunk)) {
            Ok(0) => {}
            Ok(written) => {
                self.ack = self.ack.wrapping_add(written as u32);
                tracing::trace!(id = %self.id, written, "bytes written to the network socket");
                if self.fin_received && self.client_to_network.is_empty() {
                    tracing::debug!(id = %self.id, "no more pending data, processing the pending FIN");
                    self.do_handle_fin(client);
                } else {
                    self.send_empty_packet(TcpFlags::ACK, client);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WriteZero => self.close(),
            Err(err) => {
                tracing::error!(id = %self.id, "cannot write: {err}");
                self.reset_connection(client);
            }
        }
    }

    fn eof(&mut self, client: &mut ClientOutput) {
        self.send_empty_packet(TcpFlags::FIN | TcpFlags::ACK, client);
        self.fin_seq = Some(self.seq);
        self.seq = self.seq.wrapping_add(1);
        if self.state == Some(TcpState::CloseWait) {
            self.set_state(TcpState::LastAck);
        } else {
            self.set_state(TcpState::FinWait1);
        }
    }

    fn reset_connection(&mut self, client: &mut ClientOutput) {
        tracing::debug!(id = %self.id, "resetting connection");
        self.state = None;
        self.send_empty_packet(TcpFlags::RST, client);
        self.close();
    }

    fn close(&mut self) {
        self.disconnect();
        self.closed = true;
    }

    fn send_empty_packet(&mut self, flags: TcpFlags, client: &mut ClientOutput) {
        self.update_headers(flags);
        let packet = self.packetizer.packetize_empty_payload();
        tracing::trace!(id = %self.id, ?flags, seq = self.seq, ack = self.ack, "control segment");
        client.send_to_client(packet.raw());
    }

    fn update_headers(&mut self, flags: TcpFlags) {
        let mut transport = self.packetizer.response_transport_header_mut();
        if let Some(tcp) = transport.as_tcp_mut() {
            tcp.set_flags(flags);
            tcp.set_seq_number(self.seq);
            tcp.set_ack_number(self.ack);
        }
    }

    fn update_interests(&mut self) {
        let mut interests = Interest::empty();
        if self.may_read() {
            interests |= Interest::READ;
        }
        if !self.client_to_network.is_empty() {
            interests |= Interest::WRITE;
        }
        if self.state == Some(TcpState::SynSent) {
            interests |= Interest::CONNECT;
        }
        self.interests = interests;
    }

    fn may_read(&self) -> bool {
        let Some(state) = self.state else {
            return false;
        };
        if !state.is_connected() || state.is_closed() {
            return false;
        }
        if self.pending_payload.is_some() {
            return false;
        }
        self.remaining_client_window() > 0
    }

    fn remaining_client_window(&self) -> usize {
        let window = u32::from(self.client_window);
        let remaining = self
            .their_ack
            .wrapping_add(window)
            .wrapping_sub(self.seq) as i32;
        if remaining < 0 || remaining as u32 > window {
            return 0;
        }
        remaining as usize
    }

    /// Established with a live socket: exempt from idle expiry.
    fn available(&self) -> bool {
        matches!(self.socket, Socket::Connected(_)) && self.state == Some(TcpState::Established)
    }
}

impl Connection for TcpConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send_to_network(&mut self, packet: &Ipv4Packet<&[u8]>, client: &mut ClientOutput) {
        self.handle_packet(packet, client);
        tracing::trace!(id = %self.id, ack = self.ack, "current ack");
        self.update_interests();
    }

    fn disconnect(&mut self) {
        if matches!(self.socket, Socket::Closed) {
            return;
        }
        tracing::info!(id = %self.id, state = ?self.state, "closing TCP connection");
        self.socket = Socket::Closed;
        self.connect_result = None;
        self.interests = Interest::empty();
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.idle_since + IDLE_TIMEOUT && !self.available()
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Interest> {
        let mut ready = Interest::empty();
        if self.interests.contains(Interest::CONNECT) && self.connect_result.is_none() {
            if let Socket::Connecting(connect) = &mut self.socket {
                if let Poll::Ready(result) = connect.as_mut().poll(cx) {
                    self.connect_result = Some(result);
                }
            }
        }
        if self.connect_result.is_some() {
            ready |= Interest::CONNECT;
        }
        if let Socket::Connected(stream) = &self.socket {
            // An error is reported as readiness; the following read or write surfaces it.
            if self.interests.contains(Interest::READ) && stream.poll_read_ready(cx).is_ready() {
                ready |= Interest::READ;
            }
            if self.interests.contains(Interest::WRITE) && stream.poll_write_ready(cx).is_ready() {
                ready |= Interest::WRITE;
            }
        }
        if ready.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(ready)
        }
    }

    fn on_ready(&mut self, ready: Interest, client: &mut ClientOutput) {
        self.touch();
        if ready.contains(Interest::CONNECT) && !self.closed {
            self.process_connect(client);
        }
        if ready.contains(Interest::READ) && !self.closed {
            self.process_receive(client);
        }
        if ready.contains(Interest::WRITE) && !self.closed {
            self.process_send(client);
        }
        self.update_interests();
    }

    fn as_packet_source(&mut self) -> Option<&mut dyn PacketSource> {
        Some(self)
    }
}

impl PacketSource for TcpConnection {
    fn get(&mut self) -> Option<Ipv4Packet<&mut [u8]>> {
        self.pending_payload?;
        let ack = self.ack;
        let mut packet = self.packetizer.last_packet_mut();
        if let Some(tcp) = packet.transport_header_mut().as_tcp_mut() {
            tcp.set_ack_number(ack);
        }
        packet.compute_checksums();
        Some(packet)
    }

    fn next(&mut self) {
        if let Some(len) = self.pending_payload.take() {
            tracing::trace!(id = %self.id, len, seq = self.seq, ack = self.ack, "segment sent to device");
            self.seq = self.seq.wrapping_add(len as u32);
        }
        self.update_interests();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::net::Ipv4Addr;
    use revtet_packet::builder::{build_ipv4, TcpSegmentBuilder};
    use revtet_packet::IpProtocol;

    const DEVICE: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn segment(builder: TcpSegmentBuilder<'_>) -> Vec<u8> {
        build_ipv4(DEVICE, Ipv4Addr::LOCALHOST, IpProtocol::Tcp, &builder.build())
    }

    fn connection(first: &[u8]) -> TcpConnection {
        let packet = Ipv4Packet::parse(first).unwrap();
        TcpConnection::new(ConnectionId::from_packet(&packet), &packet)
    }

    fn deliver(conn: &mut TcpConnection, raw: &[u8], client: &mut ClientOutput) {
        let packet = Ipv4Packet::parse(raw).unwrap();
        conn.send_to_network(&packet, client);
    }

    #[tokio::test]
    async fn non_syn_first_segment_is_reset() {
        let raw = segment(TcpSegmentBuilder::new(40000, 9, 10, 1234, TcpFlags::ACK));
        let mut conn = connection(&raw);
        let mut client = ClientOutput::new();
        deliver(&mut conn, &raw, &mut client);

        assert!(conn.is_closed());
        let out = client.take_chunk(usize::MAX);
        let rst = Ipv4Packet::parse(&out[..]).unwrap();
        let transport = rst.transport_header();
        let tcp = transport.as_tcp().unwrap();
        assert_eq!(tcp.flags(), TcpFlags::RST);
        assert_eq!(tcp.seq_number(), 1234);
        assert_eq!(tcp.src_port(), 9);
        assert_eq!(tcp.dst_port(), 40000);
    }

    #[tokio::test]
    async fn syn_starts_connecting() {
        let raw = segment(TcpSegmentBuilder::new(40000, 9, 10, 0, TcpFlags::SYN).mss(1200));
        let mut conn = connection(&raw);
        let mut client = ClientOutput::new();
        deliver(&mut conn, &raw, &mut client);

        assert_eq!(conn.state(), Some(TcpState::SynSent));
        assert_eq!(conn.ack, 11);
        assert_eq!(conn.mss, Some(1200));
        assert_eq!(conn.interests, Interest::CONNECT);
        assert!(client.is_empty());

        // A retransmitted SYN with a new sequence number is adopted while still connecting.
        let again = segment(TcpSegmentBuilder::new(40000, 9, 50, 0, TcpFlags::SYN));
        deliver(&mut conn, &again, &mut client);
        assert_eq!(conn.ack, 51);
        assert_eq!(conn.state(), Some(TcpState::SynSent));
    }

    #[test]
    fn remaining_window_wraps() {
        let raw = segment(TcpSegmentBuilder::new(40000, 9, 10, 0, TcpFlags::SYN));
        let mut conn = connection(&raw);
        conn.client_window = 1000;
        conn.their_ack = u32::MAX - 100;
        conn.seq = 200;
        assert_eq!(conn.remaining_client_window(), 1000 - 301);

        conn.seq = conn.their_ack.wrapping_add(1001);
        assert_eq!(conn.remaining_client_window(), 0);
        conn.seq = conn.their_ack.wrapping_sub(1);
        assert_eq!(conn.remaining_client_window(), 0);
    }

    #[test]
    fn states_classify() {
        assert!(!TcpState::SynSent.is_connected());
        assert!(!TcpState::SynReceived.is_connected());
        assert!(TcpState::Established.is_connected());
        assert!(TcpState::CloseWait.is_connected());
        assert!(!TcpState::CloseWait.is_closed());
        for state in [
            TcpState::FinWait1,
            TcpState::FinWait2,
            TcpState::Closing,
            TcpState::LastAck,
        ] {
            assert!(state.is_closed());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_handshake_expires() {
        let raw = segment(TcpSegmentBuilder::new(40000, 9, 10, 0, TcpFlags::SYN));
        let mut conn = connection(&raw);
        let mut client = ClientOutput::new();
        deliver(&mut conn, &raw, &mut client);

        let now = Instant::now();
        assert!(!conn.is_expired(now + Duration::from_secs(29)));
        assert!(conn.is_expired(now + IDLE_TIMEOUT));
    }
}
