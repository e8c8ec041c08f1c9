//! End-to-end forwarding tests over synthesized frames (no sockets).

use routelet::dataplane::{
    Disposition, ForwardingEngine, Frame, Interface, InterfaceTable, RouteEntry, RoutingTable,
};
use routelet::protocol::arp::{ArpOp, ArpPacket};
use routelet::protocol::ethernet::{EthFrame, FrameBuilder};
use routelet::protocol::icmp::{self, IcmpPacket};
use routelet::protocol::ipv4::{Ipv4Builder, Ipv4Header, PROTO_ICMP};
use routelet::protocol::{EtherType, MacAddr};
use routelet::telemetry::MetricsRegistry;
use std::net::Ipv4Addr;
use std::sync::Arc;

const ETH0_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
const ETH1_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x02]);
const HOST_A_MAC: MacAddr = MacAddr([0x0a, 0, 0, 0, 0, 0x01]);
const HOST_B_MAC: MacAddr = MacAddr([0x0a, 0, 0, 0, 0, 0x02]);

const ETH0_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
const ETH1_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 254);

/// Two interfaces, two connected networks, default route via a gateway
fn make_engine() -> ForwardingEngine {
    let interfaces = InterfaceTable::new(vec![
        Interface {
            name: "eth0".to_string(),
            mac: ETH0_MAC,
            ip: ETH0_IP,
            prefix_len: 24,
        },
        Interface {
            name: "eth1".to_string(),
            mac: ETH1_MAC,
            ip: ETH1_IP,
            prefix_len: 8,
        },
    ]);
    let routes = RoutingTable::from_entries(vec![
        RouteEntry {
            prefix: Ipv4Addr::new(192, 168, 1, 0),
            mask: Ipv4Addr::new(255, 255, 255, 0),
            next_hop: Ipv4Addr::UNSPECIFIED,
            if_id: 0,
        },
        RouteEntry {
            prefix: Ipv4Addr::new(10, 0, 0, 0),
            mask: Ipv4Addr::new(255, 0, 0, 0),
            next_hop: Ipv4Addr::UNSPECIFIED,
            if_id: 1,
        },
        RouteEntry {
            prefix: Ipv4Addr::UNSPECIFIED,
            mask: Ipv4Addr::UNSPECIFIED,
            next_hop: GATEWAY,
            if_id: 0,
        },
    ]);
    ForwardingEngine::new(interfaces, routes, Arc::new(MetricsRegistry::new()))
}

/// A transit UDP packet wrapped in an Ethernet frame
fn udp_frame(
    if_id: usize,
    src_mac: MacAddr,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    ttl: u8,
    id: u16,
) -> Frame {
    let packet = Ipv4Builder::new()
        .identification(id)
        .src_addr(src)
        .dst_addr(dst)
        .ttl(ttl)
        .protocol(17)
        .payload(&[0u8; 12])
        .build();
    let dst_mac = if if_id == 0 { ETH0_MAC } else { ETH1_MAC };
    Frame {
        if_id,
        data: FrameBuilder::new()
            .dst_mac(dst_mac)
            .src_mac(src_mac)
            .ethertype(EtherType::Ipv4)
            .payload(&packet)
            .build(),
    }
}

fn arp_reply_frame(if_id: usize, sender_mac: MacAddr, sender_ip: Ipv4Addr) -> Frame {
    let (our_mac, our_ip) = if if_id == 0 {
        (ETH0_MAC, ETH0_IP)
    } else {
        (ETH1_MAC, ETH1_IP)
    };
    let reply = ArpPacket::reply(sender_mac, sender_ip, our_mac, our_ip);
    Frame {
        if_id,
        data: FrameBuilder::new()
            .dst_mac(our_mac)
            .src_mac(sender_mac)
            .ethertype(EtherType::Arp)
            .payload(&reply.to_bytes())
            .build(),
    }
}

fn parse_ipv4(frame: &Frame) -> Ipv4Header<'_> {
    let eth = EthFrame::parse(&frame.data).unwrap();
    assert_eq!(eth.ethertype(), EtherType::Ipv4 as u16);
    Ipv4Header::parse(&frame.data[14..]).unwrap()
}

fn parse_arp(frame: &Frame) -> ArpPacket {
    let eth = EthFrame::parse(&frame.data).unwrap();
    assert_eq!(eth.ethertype(), EtherType::Arp as u16);
    ArpPacket::parse(eth.payload()).unwrap()
}

#[test]
fn unresolved_next_hop_defers_and_requests_once() {
    let mut engine = make_engine();
    let target = Ipv4Addr::new(10, 0, 0, 99);

    let (disposition, out) = engine.process(udp_frame(
        0,
        HOST_A_MAC,
        Ipv4Addr::new(192, 168, 1, 50),
        target,
        64,
        1,
    ));
    assert_eq!(disposition, Disposition::Deferred);
    assert_eq!(out.len(), 1);

    // Broadcast ARP request for the target, out the route's interface
    assert_eq!(out[0].if_id, 1);
    let eth = EthFrame::parse(&out[0].data).unwrap();
    assert_eq!(eth.dst_mac(), MacAddr::BROADCAST);
    assert_eq!(eth.src_mac(), ETH1_MAC);
    let request = parse_arp(&out[0]);
    assert_eq!(request.operation, ArpOp::Request);
    assert_eq!(request.target_ip, target);
    assert_eq!(request.sender_ip, ETH1_IP);

    // A second frame for the same unresolved target must not re-request
    let (disposition, out) = engine.process(udp_frame(
        0,
        HOST_A_MAC,
        Ipv4Addr::new(192, 168, 1, 50),
        target,
        64,
        2,
    ));
    assert_eq!(disposition, Disposition::Deferred);
    assert!(out.is_empty());
}

#[test]
fn arp_reply_drains_queue_in_order_with_one_decrement() {
    let mut engine = make_engine();
    let target = Ipv4Addr::new(10, 0, 0, 99);
    let src = Ipv4Addr::new(192, 168, 1, 50);

    engine.process(udp_frame(0, HOST_A_MAC, src, target, 64, 100));
    engine.process(udp_frame(0, HOST_A_MAC, src, target, 31, 200));

    let (disposition, out) = engine.process(arp_reply_frame(1, HOST_B_MAC, target));
    assert_eq!(disposition, Disposition::Sent);
    assert_eq!(out.len(), 2);

    // FIFO order, rewritten link headers, TTL down by exactly one with a
    // checksum that still verifies
    for (frame, (want_id, want_ttl)) in out.iter().zip([(100u16, 63u8), (200u16, 30u8)]) {
        assert_eq!(frame.if_id, 1);
        let eth = EthFrame::parse(&frame.data).unwrap();
        assert_eq!(eth.dst_mac(), HOST_B_MAC);
        assert_eq!(eth.src_mac(), ETH1_MAC);

        let ip = parse_ipv4(frame);
        assert_eq!(
            u16::from_be_bytes([frame.data[14 + 4], frame.data[14 + 5]]),
            want_id
        );
        assert_eq!(ip.ttl(), want_ttl);
        assert!(ip.validate_checksum());
        assert_eq!(ip.dst_addr(), target);
    }
}

#[test]
fn arp_reply_only_drains_its_own_target() {
    let mut engine = make_engine();
    let target_a = Ipv4Addr::new(10, 0, 0, 5);
    let target_b = Ipv4Addr::new(10, 0, 0, 6);
    let src = Ipv4Addr::new(192, 168, 1, 50);

    engine.process(udp_frame(0, HOST_A_MAC, src, target_a, 64, 1));
    engine.process(udp_frame(0, HOST_A_MAC, src, target_b, 64, 2));

    let (disposition, out) = engine.process(arp_reply_frame(1, HOST_B_MAC, target_a));
    assert_eq!(disposition, Disposition::Sent);
    assert_eq!(out.len(), 1);
    assert_eq!(parse_ipv4(&out[0]).dst_addr(), target_a);

    // The other queue is still waiting
    let (disposition, out) = engine.process(arp_reply_frame(1, HOST_B_MAC, target_b));
    assert_eq!(disposition, Disposition::Sent);
    assert_eq!(out.len(), 1);
    assert_eq!(parse_ipv4(&out[0]).dst_addr(), target_b);
}

#[test]
fn resolved_next_hop_forwards_immediately() {
    let mut engine = make_engine();
    let target = Ipv4Addr::new(10, 0, 0, 99);

    // Unsolicited reply populates the cache even with nothing queued
    let (disposition, _) = engine.process(arp_reply_frame(1, HOST_B_MAC, target));
    assert_eq!(disposition, Disposition::Dropped);

    let (disposition, out) = engine.process(udp_frame(
        0,
        HOST_A_MAC,
        Ipv4Addr::new(192, 168, 1, 50),
        target,
        64,
        7,
    ));
    assert_eq!(disposition, Disposition::Sent);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].if_id, 1);

    let ip = parse_ipv4(&out[0]);
    assert_eq!(ip.ttl(), 63);
    assert!(ip.validate_checksum());
}

#[test]
fn gateway_route_resolves_gateway_not_destination() {
    let mut engine = make_engine();

    // 8.8.8.8 matches only the default route; the ARP request must target
    // the gateway address
    let (disposition, out) = engine.process(udp_frame(
        1,
        HOST_B_MAC,
        Ipv4Addr::new(10, 0, 0, 50),
        Ipv4Addr::new(8, 8, 8, 8),
        64,
        1,
    ));
    assert_eq!(disposition, Disposition::Deferred);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].if_id, 0);
    let request = parse_arp(&out[0]);
    assert_eq!(request.target_ip, GATEWAY);
}

#[test]
fn more_specific_route_beats_default() {
    let mut engine = make_engine();

    // 10.1.2.3 matches both 0.0.0.0/0 and 10.0.0.0/8; must leave by eth1
    let (_, out) = engine.process(udp_frame(
        0,
        HOST_A_MAC,
        Ipv4Addr::new(192, 168, 1, 50),
        Ipv4Addr::new(10, 1, 2, 3),
        64,
        1,
    ));
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].if_id, 1);
    assert_eq!(parse_arp(&out[0]).target_ip, Ipv4Addr::new(10, 1, 2, 3));
}

#[test]
fn ttl_expiry_sends_time_exceeded() {
    let mut engine = make_engine();
    let src = Ipv4Addr::new(192, 168, 1, 50);

    let (disposition, out) = engine.process(udp_frame(
        0,
        HOST_A_MAC,
        src,
        Ipv4Addr::new(10, 0, 0, 99),
        1,
        1,
    ));
    assert_eq!(disposition, Disposition::Dropped);
    assert_eq!(out.len(), 1);

    // Error goes back out the ingress interface to the sender's MAC
    assert_eq!(out[0].if_id, 0);
    let eth = EthFrame::parse(&out[0].data).unwrap();
    assert_eq!(eth.dst_mac(), HOST_A_MAC);
    assert_eq!(eth.src_mac(), ETH0_MAC);

    let ip = parse_ipv4(&out[0]);
    assert_eq!(ip.src_addr(), ETH0_IP);
    assert_eq!(ip.dst_addr(), src);
    assert_eq!(ip.ttl(), 64);
    assert!(ip.validate_checksum());

    let msg = IcmpPacket::parse(ip.payload()).unwrap();
    assert_eq!(msg.icmp_type(), 11);
    assert_eq!(msg.code(), 0);
    assert!(msg.validate_checksum());

    // Quoted original header: the offending packet, TTL untouched
    let quoted = Ipv4Header::parse(msg.original_datagram()).unwrap();
    assert_eq!(quoted.ttl(), 1);
    assert_eq!(quoted.src_addr(), src);
}

#[test]
fn no_route_sends_destination_unreachable() {
    // Same interfaces but no default route
    let interfaces = InterfaceTable::new(vec![Interface {
        name: "eth0".to_string(),
        mac: ETH0_MAC,
        ip: ETH0_IP,
        prefix_len: 24,
    }]);
    let routes = RoutingTable::from_entries(vec![RouteEntry {
        prefix: Ipv4Addr::new(192, 168, 1, 0),
        mask: Ipv4Addr::new(255, 255, 255, 0),
        next_hop: Ipv4Addr::UNSPECIFIED,
        if_id: 0,
    }]);
    let mut engine =
        ForwardingEngine::new(interfaces, routes, Arc::new(MetricsRegistry::new()));

    let src = Ipv4Addr::new(192, 168, 1, 50);
    let (disposition, out) =
        engine.process(udp_frame(0, HOST_A_MAC, src, Ipv4Addr::new(8, 8, 8, 8), 64, 1));
    assert_eq!(disposition, Disposition::Dropped);
    assert_eq!(out.len(), 1);

    let ip = parse_ipv4(&out[0]);
    assert_eq!(ip.dst_addr(), src);
    let msg = IcmpPacket::parse(ip.payload()).unwrap();
    assert_eq!(msg.icmp_type(), 3);
    assert_eq!(msg.code(), 0);
    assert!(msg.validate_checksum());
}

#[test]
fn corrupt_checksum_dropped_silently() {
    let mut engine = make_engine();
    let mut frame = udp_frame(
        0,
        HOST_A_MAC,
        Ipv4Addr::new(192, 168, 1, 50),
        Ipv4Addr::new(10, 0, 0, 99),
        64,
        1,
    );
    frame.data[14 + 10] ^= 0xFF;

    let (disposition, out) = engine.process(frame);
    assert_eq!(disposition, Disposition::Dropped);
    assert!(out.is_empty());
}

#[test]
fn short_and_unknown_frames_dropped_silently() {
    let mut engine = make_engine();

    let (disposition, out) = engine.process(Frame {
        if_id: 0,
        data: vec![0u8; 5],
    });
    assert_eq!(disposition, Disposition::Dropped);
    assert!(out.is_empty());

    // IPv6 ethertype
    let mut data = FrameBuilder::new()
        .dst_mac(ETH0_MAC)
        .src_mac(HOST_A_MAC)
        .ethertype(EtherType::Ipv4)
        .payload(&[0u8; 40])
        .build();
    data[12] = 0x86;
    data[13] = 0xDD;
    let (disposition, out) = engine.process(Frame { if_id: 0, data });
    assert_eq!(disposition, Disposition::Dropped);
    assert!(out.is_empty());
}

#[test]
fn arp_request_for_router_gets_single_reply() {
    let mut engine = make_engine();
    let request = ArpPacket::request(HOST_A_MAC, Ipv4Addr::new(192, 168, 1, 50), ETH0_IP);
    let frame = Frame {
        if_id: 0,
        data: FrameBuilder::new()
            .dst_mac(MacAddr::BROADCAST)
            .src_mac(HOST_A_MAC)
            .ethertype(EtherType::Arp)
            .payload(&request.to_bytes())
            .build(),
    };

    let (disposition, out) = engine.process(frame);
    assert_eq!(disposition, Disposition::Sent);
    assert_eq!(out.len(), 1);

    let reply = parse_arp(&out[0]);
    assert_eq!(reply.operation, ArpOp::Reply);
    assert_eq!(reply.sender_mac, ETH0_MAC);
    assert_eq!(reply.sender_ip, ETH0_IP);
    assert_eq!(reply.target_mac, HOST_A_MAC);
    assert_eq!(reply.target_ip, Ipv4Addr::new(192, 168, 1, 50));
}

#[test]
fn echo_request_to_router_answered() {
    let mut engine = make_engine();
    let src = Ipv4Addr::new(10, 0, 0, 50);

    let mut echo = vec![0u8; 24];
    echo[0] = 8;
    echo[4..6].copy_from_slice(&0xBEEFu16.to_be_bytes());
    echo[6..8].copy_from_slice(&0x0007u16.to_be_bytes());
    echo[8..].copy_from_slice(b"abcdefghijklmnop");
    let sum = icmp::icmp_checksum(&echo);
    echo[2..4].copy_from_slice(&sum.to_be_bytes());

    let packet = Ipv4Builder::new()
        .src_addr(src)
        .dst_addr(ETH1_IP)
        .ttl(64)
        .protocol(PROTO_ICMP)
        .payload(&echo)
        .build();
    let frame = Frame {
        if_id: 1,
        data: FrameBuilder::new()
            .dst_mac(ETH1_MAC)
            .src_mac(HOST_B_MAC)
            .ethertype(EtherType::Ipv4)
            .payload(&packet)
            .build(),
    };

    let (disposition, out) = engine.process(frame);
    assert_eq!(disposition, Disposition::Sent);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].if_id, 1);

    let ip = parse_ipv4(&out[0]);
    assert_eq!(ip.src_addr(), ETH1_IP);
    assert_eq!(ip.dst_addr(), src);

    let reply = IcmpPacket::parse(ip.payload()).unwrap();
    assert!(reply.is_echo_reply());
    assert_eq!(reply.identifier(), 0xBEEF);
    assert_eq!(reply.sequence(), 0x0007);
    assert_eq!(reply.payload(), b"abcdefghijklmnop");
    assert!(reply.validate_checksum());
}

#[test]
fn echo_reply_excludes_link_padding() {
    let mut engine = make_engine();
    let src = Ipv4Addr::new(10, 0, 0, 50);

    let mut echo = vec![0u8; 12];
    echo[0] = 8;
    echo[4..6].copy_from_slice(&0x0042u16.to_be_bytes());
    echo[6..8].copy_from_slice(&0x0001u16.to_be_bytes());
    echo[8..].copy_from_slice(b"ping");
    let sum = icmp::icmp_checksum(&echo);
    echo[2..4].copy_from_slice(&sum.to_be_bytes());

    let packet = Ipv4Builder::new()
        .src_addr(src)
        .dst_addr(ETH1_IP)
        .ttl(64)
        .protocol(PROTO_ICMP)
        .payload(&echo)
        .build();
    let mut data = FrameBuilder::new()
        .dst_mac(ETH1_MAC)
        .src_mac(HOST_B_MAC)
        .ethertype(EtherType::Ipv4)
        .payload(&packet)
        .build();
    // Short frames arrive padded to the 60-byte Ethernet minimum
    data.resize(60, 0);

    let (disposition, out) = engine.process(Frame { if_id: 1, data });
    assert_eq!(disposition, Disposition::Sent);
    assert_eq!(out.len(), 1);

    let ip = parse_ipv4(&out[0]);
    let reply = IcmpPacket::parse(ip.payload()).unwrap();
    assert!(reply.is_echo_reply());
    assert_eq!(reply.identifier(), 0x0042);
    assert_eq!(reply.payload(), b"ping");
    assert!(reply.validate_checksum());
}

#[test]
fn echo_request_through_router_is_transit() {
    let mut engine = make_engine();
    let dst = Ipv4Addr::new(10, 0, 0, 99);

    let mut echo = vec![0u8; 8];
    echo[0] = 8;
    let sum = icmp::icmp_checksum(&echo);
    echo[2..4].copy_from_slice(&sum.to_be_bytes());

    let packet = Ipv4Builder::new()
        .src_addr(Ipv4Addr::new(192, 168, 1, 50))
        .dst_addr(dst)
        .ttl(64)
        .protocol(PROTO_ICMP)
        .payload(&echo)
        .build();
    let frame = Frame {
        if_id: 0,
        data: FrameBuilder::new()
            .dst_mac(ETH0_MAC)
            .src_mac(HOST_A_MAC)
            .ethertype(EtherType::Ipv4)
            .payload(&packet)
            .build(),
    };

    // Not addressed to the router: deferred for resolution like any transit
    let (disposition, out) = engine.process(frame);
    assert_eq!(disposition, Disposition::Deferred);
    assert_eq!(out.len(), 1);
    assert_eq!(parse_arp(&out[0]).target_ip, dst);
}

#[test]
fn deferred_frame_keeps_full_ttl_until_drain() {
    let mut engine = make_engine();
    let target = Ipv4Addr::new(10, 0, 0, 99);
    let src = Ipv4Addr::new(192, 168, 1, 50);

    // TTL 2 is queued untouched and leaves at exactly 1
    engine.process(udp_frame(0, HOST_A_MAC, src, target, 2, 1));
    let (disposition, out) = engine.process(arp_reply_frame(1, HOST_B_MAC, target));
    assert_eq!(disposition, Disposition::Sent);
    assert_eq!(out.len(), 1);
    assert_eq!(parse_ipv4(&out[0]).ttl(), 1);
    assert!(parse_ipv4(&out[0]).validate_checksum());
}
