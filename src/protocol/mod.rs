//! Network protocol implementations
//!
//! Ethernet, ARP, IPv4 and ICMP are implemented from scratch at the byte
//! level; `classify` is the dataplane's entry point into this module.

pub mod arp;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod types;

pub use types::*;

use arp::ArpPacket;
use ethernet::EthFrame;
use icmp::IcmpPacket;
use ipv4::{Ipv4Header, PROTO_ICMP};

/// Classification of a received frame.
///
/// Parsed views borrow from the frame buffer. Anything short, malformed, or
/// of an unsupported type classifies as `Unknown` rather than an error.
#[derive(Debug)]
pub enum FrameClass<'a> {
    /// Valid ARP packet
    Arp(ArpPacket),
    /// IPv4 packet carrying ICMP
    Icmp {
        ipv4: Ipv4Header<'a>,
        icmp: IcmpPacket<'a>,
    },
    /// IPv4 packet carrying any other protocol
    OtherIpv4(Ipv4Header<'a>),
    /// Not something we forward or answer
    Unknown,
}

/// Classify a raw Ethernet frame.
pub fn classify(buffer: &[u8]) -> FrameClass<'_> {
    let frame = match EthFrame::parse(buffer) {
        Ok(f) => f,
        Err(_) => return FrameClass::Unknown,
    };

    match EtherType::from_u16(frame.ethertype()) {
        Some(EtherType::Arp) => match ArpPacket::parse(frame.payload()) {
            Ok(pkt) => FrameClass::Arp(pkt),
            Err(_) => FrameClass::Unknown,
        },
        Some(EtherType::Ipv4) => {
            let ipv4 = match Ipv4Header::parse(&buffer[ethernet::HEADER_SIZE..]) {
                Ok(h) => h,
                Err(_) => return FrameClass::Unknown,
            };
            if ipv4.protocol() == PROTO_ICMP {
                // The bounded payload keeps link padding out of the ICMP view
                match IcmpPacket::parse(ipv4.payload()) {
                    Ok(icmp) => FrameClass::Icmp { ipv4, icmp },
                    Err(_) => FrameClass::Unknown,
                }
            } else {
                FrameClass::OtherIpv4(ipv4)
            }
        }
        None => FrameClass::Unknown,
    }
}
