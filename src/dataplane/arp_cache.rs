//! ARP resolution cache with per-target pending queues
//!
//! Maps IP addresses to resolved MACs and holds frames waiting on an
//! unanswered ARP request, keyed by the address being resolved. A reply
//! for one address never touches another address's queue.

use super::engine::Frame;
use crate::protocol::MacAddr;
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::time::Instant;

/// A resolved IP-to-MAC binding
#[derive(Debug, Clone, Copy)]
pub struct ArpEntry {
    pub mac: MacAddr,
    /// When the binding was learned; extension point for aging
    pub discovered_at: Instant,
}

/// Resolution cache: resolved bindings plus per-IP FIFO pending queues
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: HashMap<Ipv4Addr, ArpEntry>,
    pending: HashMap<Ipv4Addr, VecDeque<Frame>>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the MAC for an IP. No side effects.
    pub fn resolve(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.entries.get(&ip).map(|e| e.mac)
    }

    /// Queue a frame awaiting resolution of `ip`.
    ///
    /// Returns true when this created the queue, i.e. no ARP request is
    /// outstanding for `ip` yet and the caller should broadcast one.
    /// Subsequent defers for the same address return false so only a
    /// single request goes out per unresolved target.
    pub fn defer(&mut self, ip: Ipv4Addr, frame: Frame) -> bool {
        let mut created = false;
        let queue = self.pending.entry(ip).or_insert_with(|| {
            created = true;
            VecDeque::new()
        });
        queue.push_back(frame);
        created
    }

    /// Record a resolved binding and drain that IP's pending queue.
    ///
    /// Returns the queued frames in the order they were deferred. Queues
    /// for other addresses are left untouched.
    pub fn complete(&mut self, ip: Ipv4Addr, mac: MacAddr) -> Vec<Frame> {
        self.entries.insert(
            ip,
            ArpEntry {
                mac,
                discovered_at: Instant::now(),
            },
        );
        self.pending
            .remove(&ip)
            .map(|q| q.into_iter().collect())
            .unwrap_or_default()
    }

    /// Is a request outstanding for this IP?
    pub fn has_pending(&self, ip: Ipv4Addr) -> bool {
        self.pending.contains_key(&ip)
    }

    /// Number of resolved entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
