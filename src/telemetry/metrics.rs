//! Forwarding statistics.
//!
//! Thread-safe counters shared between the dataplane and the stats dump
//! on shutdown.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a value to the counter.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Metrics registry for the forwarding core.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Frames received from the wire.
    pub frames_received: Counter,
    /// Packets successfully forwarded.
    pub packets_forwarded: Counter,
    /// Packets dropped (bad checksum, no route, TTL expired, unknown type).
    pub packets_dropped: Counter,
    /// Frames queued awaiting ARP resolution.
    pub frames_deferred: Counter,
    /// ARP requests broadcast.
    pub arp_requests_sent: Counter,
    /// ARP replies answered for our own addresses.
    pub arp_replies_sent: Counter,
    /// ICMP echo replies sent.
    pub icmp_echo_replies: Counter,
    /// ICMP time exceeded messages sent.
    pub icmp_time_exceeded: Counter,
    /// ICMP destination unreachable messages sent.
    pub icmp_unreachable: Counter,
}

impl MetricsRegistry {
    /// Creates a new metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Exports all metrics as key-value pairs.
    pub fn export(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("frames_received", self.frames_received.get()),
            ("packets_forwarded", self.packets_forwarded.get()),
            ("packets_dropped", self.packets_dropped.get()),
            ("frames_deferred", self.frames_deferred.get()),
            ("arp_requests_sent", self.arp_requests_sent.get()),
            ("arp_replies_sent", self.arp_replies_sent.get()),
            ("icmp_echo_replies", self.icmp_echo_replies.get()),
            ("icmp_time_exceeded", self.icmp_time_exceeded.get()),
            ("icmp_unreachable", self.icmp_unreachable.get()),
        ]
    }
}
