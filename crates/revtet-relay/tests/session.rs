use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use revtet_packet::builder::{build_ipv4, IcmpEchoBuilder, TcpSegmentBuilder, UdpDatagramBuilder};
use revtet_packet::{IpProtocol, Ipv4Packet, TcpFlags, TransportHeader};
use revtet_relay::{RelayConfig, RelayError, Session};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;

const DEVICE: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const EMULATOR_HOST: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 2);
const TIMEOUT: Duration = Duration::from_secs(5);

/// The device end of a session's byte channel.
struct Device {
    io: DuplexStream,
}

impl Device {
    fn attach(client_id: u32) -> (Self, JoinHandle<Result<(), RelayError>>) {
        let (device, relay) = tokio::io::duplex(1 << 20);
        let session = Session::new(client_id, relay, &RelayConfig::default());
        (Self { io: device }, tokio::spawn(session.run()))
    }

    async fn read_client_id(&mut self) -> u32 {
        let mut id = [0u8; 4];
        tokio::time::timeout(TIMEOUT, self.io.read_exact(&mut id))
            .await
            .unwrap()
            .unwrap();
        u32::from_be_bytes(id)
    }

    async fn send(&mut self, raw: &[u8]) {
        self.io.write_all(raw).await.unwrap();
    }

    async fn recv(&mut self) -> Vec<u8> {
        let mut raw = vec![0u8; 4];
        tokio::time::timeout(TIMEOUT, self.io.read_exact(&mut raw))
            .await
            .expect("no datagram from relay")
            .unwrap();
        let total_len = u16::from_be_bytes([raw[2], raw[3]]) as usize;
        raw.resize(total_len, 0);
        self.io.read_exact(&mut raw[4..]).await.unwrap();
        raw
    }

    /// Next TCP segment as (flags, seq, ack, payload).
    async fn recv_tcp(&mut self) -> (TcpFlags, u32, u32, Vec<u8>) {
        let raw = self.recv().await;
        let packet = Ipv4Packet::parse(&raw[..]).unwrap();
        let transport = packet.transport_header();
        let tcp = transport.as_tcp().expect("expected a TCP segment");
        assert!(tcp.checksum_valid());
        (
            tcp.flags(),
            tcp.seq_number(),
            tcp.ack_number(),
            packet.payload().to_vec(),
        )
    }
}

fn tcp_segment(dst: Ipv4Addr, port: u16, seq: u32, ack: u32, flags: TcpFlags, payload: &[u8]) -> Vec<u8> {
    build_ipv4(
        DEVICE,
        dst,
        IpProtocol::Tcp,
        &TcpSegmentBuilder::new(40000, port, seq, ack, flags)
            .window(8192)
            .payload(payload)
            .build(),
    )
}

#[tokio::test]
async fn device_learns_its_client_id_first() {
    let (mut device, _session) = Device::attach(0x0102_0304);
    assert_eq!(device.read_client_id().await, 0x0102_0304);
}

#[tokio::test]
async fn udp_datagrams_are_echoed_in_order() {
    let echo = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let echo_port = echo.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        loop {
            let (n, peer) = echo.recv_from(&mut buf).await.unwrap();
            echo.send_to(&buf[..n], peer).await.unwrap();
        }
    });

    let (mut device, _session) = Device::attach(1);
    device.read_client_id().await;

    let payloads: Vec<Vec<u8>> = [1usize, 64, 1400, 9000, 30000]
        .iter()
        .enumerate()
        .map(|(i, &len)| (0..len).map(|b| (b + i) as u8).collect())
        .collect();

    for payload in &payloads {
        let raw = build_ipv4(
            DEVICE,
            Ipv4Addr::LOCALHOST,
            IpProtocol::Udp,
            &UdpDatagramBuilder {
                src_port: 5353,
                dst_port: echo_port,
                payload,
            }
            .build(),
        );
        device.send(&raw).await;
    }

    for payload in &payloads {
        let raw = device.recv().await;
        let packet = Ipv4Packet::parse(&raw[..]).unwrap();
        assert_eq!(packet.ipv4_header().src(), Ipv4Addr::LOCALHOST);
        assert_eq!(packet.ipv4_header().dst(), DEVICE);
        assert!(packet.ipv4_header().checksum_valid());
        match packet.transport_header() {
            TransportHeader::Udp(udp) => {
                assert_eq!(udp.src_port(), echo_port);
                assert_eq!(udp.dst_port(), 5353);
                assert_eq!(udp.length() as usize, 8 + payload.len());
                assert_eq!(udp.checksum(), 0);
            }
            other => panic!("expected UDP, got {other:?}"),
        }
        assert_eq!(packet.payload(), &payload[..]);
    }
}

#[tokio::test]
async fn tcp_echo_through_the_emulator_host_alias() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                let _ = closed_tx.send(());
                return;
            }
            stream.write_all(&buf[..n]).await.unwrap();
        }
    });

    let (mut device, _session) = Device::attach(2);
    device.read_client_id().await;

    device
        .send(&tcp_segment(EMULATOR_HOST, port, 100, 0, TcpFlags::SYN, &[]))
        .await;
    let (flags, isn, ack, _) = device.recv_tcp().await;
    assert_eq!(flags, TcpFlags::SYN | TcpFlags::ACK);
    assert_eq!(ack, 101);
    let mut server_seq = isn.wrapping_add(1);

    device
        .send(&tcp_segment(EMULATOR_HOST, port, 101, server_seq, TcpFlags::ACK, &[]))
        .await;
    device
        .send(&tcp_segment(
            EMULATOR_HOST,
            port,
            101,
            server_seq,
            TcpFlags::ACK | TcpFlags::PSH,
            b"ping",
        ))
        .await;

    // The relay acknowledges the 4 bytes and returns the echo, in either order.
    let mut echoed = Vec::new();
    let mut acked = false;
    while echoed.len() < 4 || !acked {
        let (flags, seq, ack, payload) = device.recv_tcp().await;
        assert!(flags.contains(TcpFlags::ACK));
        if ack == 105 {
            acked = true;
        }
        if !payload.is_empty() {
            assert_eq!(seq, server_seq);
            server_seq = server_seq.wrapping_add(payload.len() as u32);
            echoed.extend_from_slice(&payload);
        }
    }
    assert_eq!(echoed, b"ping");

    device
        .send(&tcp_segment(EMULATOR_HOST, port, 105, server_seq, TcpFlags::ACK, &[]))
        .await;
    device
        .send(&tcp_segment(
            EMULATOR_HOST,
            port,
            105,
            server_seq,
            TcpFlags::FIN | TcpFlags::ACK,
            &[],
        ))
        .await;
    let (flags, seq, ack, _) = device.recv_tcp().await;
    assert_eq!(flags, TcpFlags::FIN | TcpFlags::ACK);
    assert_eq!(seq, server_seq);
    assert_eq!(ack, 106);

    device
        .send(&tcp_segment(
            EMULATOR_HOST,
            port,
            106,
            server_seq.wrapping_add(1),
            TcpFlags::ACK,
            &[],
        ))
        .await;

    // The flow is gone once its socket is closed.
    tokio::time::timeout(TIMEOUT, closed_rx).await.unwrap().unwrap();
}

#[tokio::test]
async fn ping_to_a_reachable_host_is_answered() {
    let (mut device, _session) = Device::attach(3);
    device.read_client_id().await;

    let request = build_ipv4(
        DEVICE,
        Ipv4Addr::LOCALHOST,
        IpProtocol::Icmp,
        &IcmpEchoBuilder {
            identifier: 99,
            sequence: 12,
            payload: b"0123456789abcdef",
        }
        .build(),
    );
    device.send(&request).await;

    let raw = device.recv().await;
    let packet = Ipv4Packet::parse(&raw[..]).unwrap();
    assert_eq!(packet.ipv4_header().src(), Ipv4Addr::LOCALHOST);
    assert_eq!(packet.ipv4_header().dst(), DEVICE);
    assert_eq!(packet.payload(), b"0123456789abcdef");
    let transport = packet.transport_header();
    let icmp = transport.as_icmp().unwrap();
    assert_eq!(icmp.icmp_type(), 0);
    assert_eq!(icmp.identifier(), 99);
    assert_eq!(icmp.sequence(), 12);
    assert!(icmp.checksum_valid());
}

#[tokio::test]
async fn unsupported_datagrams_are_dropped_silently() {
    let echo = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let echo_addr: SocketAddr = echo.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        loop {
            let (n, peer) = echo.recv_from(&mut buf).await.unwrap();
            echo.send_to(&buf[..n], peer).await.unwrap();
        }
    });

    let (mut device, _session) = Device::attach(4);
    device.read_client_id().await;

    // An IPv6 header, then a datagram with IPv4 options; neither gets a reply.
    let mut v6 = vec![0u8; 48];
    v6[0] = 0x60;
    v6[4..6].copy_from_slice(&8u16.to_be_bytes());
    device.send(&v6).await;
    let udp = UdpDatagramBuilder {
        src_port: 7000,
        dst_port: echo_addr.port(),
        payload: b"after",
    }
    .build();
    let mut options = build_ipv4(DEVICE, Ipv4Addr::LOCALHOST, IpProtocol::Udp, &udp);
    options[0] = 0x46;
    options.splice(20..20, [1u8, 1, 1, 0]);
    let total = options.len() as u16;
    options[2..4].copy_from_slice(&total.to_be_bytes());
    device.send(&options).await;

    // The stream stays in sync: the next datagram goes through.
    device
        .send(&build_ipv4(DEVICE, Ipv4Addr::LOCALHOST, IpProtocol::Udp, &udp))
        .await;
    let raw = device.recv().await;
    let packet = Ipv4Packet::parse(&raw[..]).unwrap();
    assert_eq!(packet.payload(), b"after");
}

#[tokio::test]
async fn session_ends_when_the_device_goes_away() {
    let (mut device, session) = Device::attach(5);
    device.read_client_id().await;
    drop(device);
    let result = tokio::time::timeout(TIMEOUT, session).await.unwrap().unwrap();
    assert!(matches!(result, Ok(()) | Err(RelayError::DeviceClosed)));
}
