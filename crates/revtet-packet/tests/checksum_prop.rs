use core::net::Ipv4Addr;

use proptest::prelude::*;
use revtet_packet::builder::{build_ipv4, IcmpEchoBuilder, TcpSegmentBuilder};
use revtet_packet::checksum::internet_checksum;
use revtet_packet::{IpProtocol, Ipv4Packet, TcpFlags, TransportHeader};

/// Byte-weighted one's-complement sum reduced modulo 0xffff.
fn reference_checksum(data: &[u8]) -> u16 {
    let sum: u64 = data
        .iter()
        .enumerate()
        .map(|(i, &b)| if i % 2 == 0 { u64::from(b) << 8 } else { u64::from(b) })
        .sum();
    let folded = match sum % 0xffff {
        0 if sum != 0 => 0xffff,
        r => r as u16,
    };
    !folded
}

fn tcp_datagram(seq: u32, ack: u32, window: u16, payload: &[u8]) -> Vec<u8> {
    build_ipv4(
        Ipv4Addr::new(10, 0, 0, 2),
        Ipv4Addr::new(192, 0, 2, 1),
        IpProtocol::Tcp,
        &TcpSegmentBuilder::new(40000, 80, seq, ack, TcpFlags::ACK | TcpFlags::PSH)
            .window(window)
            .payload(payload)
            .build(),
    )
}

fn tcp_checksum_of(raw: &[u8]) -> u16 {
    let packet = Ipv4Packet::parse(raw).unwrap();
    match packet.transport_header() {
        TransportHeader::Tcp(tcp) => tcp.checksum(),
        other => panic!("expected TCP, got {other:?}"),
    }
}

proptest! {
    #[test]
    fn region_checksum_matches_reference(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
        prop_assert_eq!(internet_checksum(&data), reference_checksum(&data));
    }

    #[test]
    fn tcp_checksum_matches_reference(
        seq in any::<u32>(),
        ack in any::<u32>(),
        window in any::<u16>(),
        payload in proptest::collection::vec(any::<u8>(), 0..1500),
    ) {
        let mut raw = tcp_datagram(seq, ack, window, &payload);
        let stored = tcp_checksum_of(&raw);

        // Zero the field and recompute independently over header+payload.
        raw[20 + 16] = 0;
        raw[20 + 17] = 0;
        prop_assert_eq!(stored, reference_checksum(&raw[20..]));

        let mut packet = Ipv4Packet::parse(&mut raw[..]).unwrap();
        packet.compute_checksums();
        prop_assert_eq!(tcp_checksum_of(&raw), stored);
    }

    #[test]
    fn corrupting_a_payload_byte_changes_tcp_checksum(
        payload in proptest::collection::vec(any::<u8>(), 1..512),
        index in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let mut raw = tcp_datagram(1, 1, 1024, &payload);
        let original = tcp_checksum_of(&raw);

        let offset = 40 + index.index(payload.len());
        raw[offset] ^= flip;
        let mut packet = Ipv4Packet::parse(&mut raw[..]).unwrap();
        packet.compute_checksums();
        prop_assert_ne!(tcp_checksum_of(&raw), original);
    }

    #[test]
    fn icmp_checksum_verifies(
        identifier in any::<u16>(),
        sequence in any::<u16>(),
        payload in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let raw = build_ipv4(
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(192, 0, 2, 1),
            IpProtocol::Icmp,
            &IcmpEchoBuilder { identifier, sequence, payload: &payload }.build(),
        );
        let packet = Ipv4Packet::parse(&raw[..]).unwrap();
        let transport = packet.transport_header();
        let icmp = transport.as_icmp().unwrap();
        prop_assert!(icmp.checksum_valid());
        prop_assert_eq!(reference_checksum(&raw[20..]), 0);
    }
}
