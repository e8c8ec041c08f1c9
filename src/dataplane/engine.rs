//! Forwarding engine
//!
//! Runs the per-frame state machine: classify, validate, route lookup,
//! next-hop resolution, header rewrite. Self-addressed ARP requests and
//! ICMP echo requests are answered here as well. Failures are outcomes
//! of the state machine, not errors; a bad frame never stops the loop.

use super::arp_cache::ResolutionCache;
use super::interfaces::InterfaceTable;
use super::routing::{IfId, RoutingTable};
use crate::protocol::arp::{ArpOp, ArpPacket};
use crate::protocol::ethernet::{self, EthFrame, FrameBuilder};
use crate::protocol::icmp::{
    self, build_destination_unreachable, build_echo_reply, build_time_exceeded,
};
use crate::protocol::ipv4::{Ipv4Builder, Ipv4Header, Ipv4Packet, PROTO_ICMP};
use crate::protocol::{classify, EtherType, FrameClass, MacAddr};
use crate::telemetry::MetricsRegistry;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A raw frame tagged with the interface it arrived on (or leaves by)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub if_id: IfId,
    pub data: Vec<u8>,
}

/// Terminal state of a processed input frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The frame was forwarded, or consumed to produce an immediate reply
    Sent,
    /// The frame was consumed with nothing to transmit for it
    Dropped,
    /// The frame is queued awaiting ARP resolution of its next hop
    Deferred,
}

enum Validation {
    Ok,
    TtlExpired,
    BadChecksum,
    Malformed,
}

enum IcmpError {
    TimeExceeded,
    Unreachable,
}

/// The forwarding core. One instance per router, driven from a single
/// processing task.
pub struct ForwardingEngine {
    interfaces: InterfaceTable,
    routes: RoutingTable,
    cache: ResolutionCache,
    metrics: Arc<MetricsRegistry>,
}

impl ForwardingEngine {
    pub fn new(
        interfaces: InterfaceTable,
        routes: RoutingTable,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            interfaces,
            routes,
            cache: ResolutionCache::new(),
            metrics,
        }
    }

    /// Process one received frame to completion.
    ///
    /// Returns the input frame's disposition and the frames to transmit:
    /// forwarded packets, ARP requests/replies, ICMP messages, and any
    /// queued frames released by an ARP reply.
    pub fn process(&mut self, frame: Frame) -> (Disposition, Vec<Frame>) {
        self.metrics.frames_received.inc();
        let mut out = Vec::new();

        enum Step {
            Arp(ArpPacket),
            SelfEcho,
            Transit,
            Drop,
        }

        let step = match classify(&frame.data) {
            FrameClass::Arp(pkt) => Step::Arp(pkt),
            FrameClass::Icmp { ipv4, icmp } => {
                if self.interfaces.local(ipv4.dst_addr()).is_some() {
                    if icmp.is_echo_request() {
                        Step::SelfEcho
                    } else {
                        trace!(if_id = frame.if_id, "non-echo ICMP to self, dropping");
                        Step::Drop
                    }
                } else {
                    Step::Transit
                }
            }
            FrameClass::OtherIpv4(ipv4) => {
                if self.interfaces.local(ipv4.dst_addr()).is_some() {
                    trace!(if_id = frame.if_id, "non-ICMP traffic to self, dropping");
                    Step::Drop
                } else {
                    Step::Transit
                }
            }
            FrameClass::Unknown => {
                trace!(if_id = frame.if_id, len = frame.data.len(), "unclassifiable frame");
                Step::Drop
            }
        };

        let disposition = match step {
            Step::Arp(pkt) => self.handle_arp(&frame, &pkt, &mut out),
            Step::SelfEcho => self.handle_echo(&frame, &mut out),
            Step::Transit => self.handle_transit(frame, &mut out),
            Step::Drop => Disposition::Dropped,
        };

        if disposition == Disposition::Dropped {
            self.metrics.packets_dropped.inc();
        }
        (disposition, out)
    }

    fn handle_arp(&mut self, frame: &Frame, pkt: &ArpPacket, out: &mut Vec<Frame>) -> Disposition {
        match pkt.operation {
            ArpOp::Request => {
                let (our_mac, our_ip) = match self.interfaces.get(frame.if_id) {
                    Some(i) => (i.mac, i.ip),
                    None => return Disposition::Dropped,
                };
                if pkt.target_ip != our_ip {
                    return Disposition::Dropped;
                }

                debug!(requester = %pkt.sender_ip, if_id = frame.if_id, "answering arp request");
                let reply = ArpPacket::reply(our_mac, our_ip, pkt.sender_mac, pkt.sender_ip);
                out.push(Frame {
                    if_id: frame.if_id,
                    data: FrameBuilder::new()
                        .dst_mac(pkt.sender_mac)
                        .src_mac(our_mac)
                        .ethertype(EtherType::Arp)
                        .payload(&reply.to_bytes())
                        .build(),
                });
                self.metrics.arp_replies_sent.inc();
                Disposition::Sent
            }
            ArpOp::Reply => {
                let drained = self.cache.complete(pkt.sender_ip, pkt.sender_mac);
                if drained.is_empty() {
                    trace!(sender = %pkt.sender_ip, "arp reply with nothing pending");
                    return Disposition::Dropped;
                }

                debug!(
                    sender = %pkt.sender_ip,
                    count = drained.len(),
                    "arp resolved, releasing queued frames"
                );
                let before = out.len();
                for queued in drained {
                    self.forward_released(queued, out);
                }
                // A reply whose released frames all failed re-validation
                // put nothing on the wire
                if out.len() > before {
                    Disposition::Sent
                } else {
                    Disposition::Dropped
                }
            }
        }
    }

    // A frame coming off the pending queue goes through the same checks as
    // fresh transit: its TTL was not touched when it was deferred, and the
    // route is looked up anew rather than reusing whatever matched earlier.
    fn forward_released(&mut self, frame: Frame, out: &mut Vec<Frame>) {
        match self.validate(&frame) {
            Validation::Ok => {
                let _ = self.route_and_send(frame, out);
            }
            Validation::TtlExpired => {
                if let Some(reply) = self.icmp_error(&frame, IcmpError::TimeExceeded) {
                    out.push(reply);
                    self.metrics.icmp_time_exceeded.inc();
                }
                self.metrics.packets_dropped.inc();
            }
            Validation::BadChecksum | Validation::Malformed => {
                debug!(if_id = frame.if_id, "queued frame no longer valid, dropping");
                self.metrics.packets_dropped.inc();
            }
        }
    }

    fn handle_transit(&mut self, frame: Frame, out: &mut Vec<Frame>) -> Disposition {
        match self.validate(&frame) {
            Validation::Ok => self.route_and_send(frame, out),
            Validation::TtlExpired => {
                if let Some(reply) = self.icmp_error(&frame, IcmpError::TimeExceeded) {
                    out.push(reply);
                    self.metrics.icmp_time_exceeded.inc();
                }
                Disposition::Dropped
            }
            Validation::BadChecksum => {
                debug!(if_id = frame.if_id, "ipv4 checksum mismatch, dropping");
                Disposition::Dropped
            }
            Validation::Malformed => Disposition::Dropped,
        }
    }

    fn validate(&self, frame: &Frame) -> Validation {
        let eth = match EthFrame::parse(&frame.data) {
            Ok(f) => f,
            Err(_) => return Validation::Malformed,
        };
        let ip = match Ipv4Header::parse(eth.payload()) {
            Ok(h) => h,
            Err(_) => return Validation::Malformed,
        };
        if !ip.validate_checksum() {
            return Validation::BadChecksum;
        }
        if ip.ttl() <= 1 {
            return Validation::TtlExpired;
        }
        Validation::Ok
    }

    fn route_and_send(&mut self, frame: Frame, out: &mut Vec<Frame>) -> Disposition {
        let (src, dst) = match Ipv4Header::parse(&frame.data[ethernet::HEADER_SIZE..]) {
            Ok(ip) => (ip.src_addr(), ip.dst_addr()),
            Err(_) => return Disposition::Dropped,
        };

        let route = match self.routes.lookup(dst) {
            Some(r) => r.clone(),
            None => {
                debug!(%dst, "no route to destination");
                if let Some(reply) = self.icmp_error(&frame, IcmpError::Unreachable) {
                    out.push(reply);
                    self.metrics.icmp_unreachable.inc();
                }
                return Disposition::Dropped;
            }
        };

        let target = route.resolve_target(dst);
        let (egress_mac, egress_ip) = match self.interfaces.get(route.if_id) {
            Some(i) => (i.mac, i.ip),
            None => {
                warn!(if_id = route.if_id, "route references unknown interface");
                return Disposition::Dropped;
            }
        };

        match self.cache.resolve(target) {
            Some(next_hop_mac) => {
                let mut data = frame.data;
                decrement_ttl(&mut data);
                ethernet::rewrite_link_header(&mut data, egress_mac, next_hop_mac);
                trace!(%src, %dst, next_hop = %target, out_if = route.if_id, "forwarding");
                out.push(Frame {
                    if_id: route.if_id,
                    data,
                });
                self.metrics.packets_forwarded.inc();
                Disposition::Sent
            }
            None => {
                // Queued untouched; the TTL is decremented once, on the
                // path that actually transmits
                let first = self.cache.defer(target, frame);
                self.metrics.frames_deferred.inc();
                if first {
                    debug!(next_hop = %target, out_if = route.if_id, "broadcasting arp request");
                    let request = ArpPacket::request(egress_mac, egress_ip, target);
                    out.push(Frame {
                        if_id: route.if_id,
                        data: FrameBuilder::new()
                            .dst_mac(MacAddr::BROADCAST)
                            .src_mac(egress_mac)
                            .ethertype(EtherType::Arp)
                            .payload(&request.to_bytes())
                            .build(),
                    });
                    self.metrics.arp_requests_sent.inc();
                }
                Disposition::Deferred
            }
        }
    }

    fn handle_echo(&self, frame: &Frame, out: &mut Vec<Frame>) -> Disposition {
        let eth = match EthFrame::parse(&frame.data) {
            Ok(f) => f,
            Err(_) => return Disposition::Dropped,
        };
        let requester_mac = eth.src_mac();
        let ip = match Ipv4Header::parse(eth.payload()) {
            Ok(h) => h,
            Err(_) => return Disposition::Dropped,
        };
        if !ip.validate_checksum() {
            return Disposition::Dropped;
        }
        let our_mac = match self.interfaces.mac(frame.if_id) {
            Some(m) => m,
            None => return Disposition::Dropped,
        };

        let reply_icmp = match build_echo_reply(ip.payload()) {
            Ok(r) => r,
            Err(_) => return Disposition::Dropped,
        };
        // Reply from the address the request was sent to
        let packet = Ipv4Builder::new()
            .src_addr(ip.dst_addr())
            .dst_addr(ip.src_addr())
            .ttl(64)
            .protocol(PROTO_ICMP)
            .payload(&reply_icmp)
            .build();

        trace!(from = %ip.src_addr(), if_id = frame.if_id, "answering echo request");
        out.push(Frame {
            if_id: frame.if_id,
            data: FrameBuilder::new()
                .dst_mac(requester_mac)
                .src_mac(our_mac)
                .ethertype(EtherType::Ipv4)
                .payload(&packet)
                .build(),
        });
        self.metrics.icmp_echo_replies.inc();
        Disposition::Sent
    }

    // ICMP errors go straight back out the ingress interface to the
    // offending frame's source MAC; no ARP round-trip.
    fn icmp_error(&self, frame: &Frame, kind: IcmpError) -> Option<Frame> {
        let eth = EthFrame::parse(&frame.data).ok()?;
        let sender_mac = eth.src_mac();
        let ip = Ipv4Header::parse(eth.payload()).ok()?;
        let iface = self.interfaces.get(frame.if_id)?;

        let body = match kind {
            IcmpError::TimeExceeded => {
                build_time_exceeded(icmp::time_exceeded::TTL_EXCEEDED, ip.as_bytes(), ip.payload())
            }
            IcmpError::Unreachable => build_destination_unreachable(
                icmp::dest_unreachable::NET_UNREACHABLE,
                ip.as_bytes(),
                ip.payload(),
            ),
        };
        let packet = Ipv4Builder::new()
            .src_addr(iface.ip)
            .dst_addr(ip.src_addr())
            .ttl(64)
            .protocol(PROTO_ICMP)
            .payload(&body)
            .build();

        Some(Frame {
            if_id: frame.if_id,
            data: FrameBuilder::new()
                .dst_mac(sender_mac)
                .src_mac(iface.mac)
                .ethertype(EtherType::Ipv4)
                .payload(&packet)
                .build(),
        })
    }

    pub fn interfaces(&self) -> &InterfaceTable {
        &self.interfaces
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }
}

fn decrement_ttl(data: &mut [u8]) {
    // Caller has already rejected TTL <= 1
    if let Ok(mut pkt) = Ipv4Packet::from_bytes(&data[ethernet::HEADER_SIZE..]) {
        if pkt.decrement_ttl() {
            data[ethernet::HEADER_SIZE..].copy_from_slice(pkt.as_bytes());
        }
    }
}
