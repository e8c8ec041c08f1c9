//! Routing table with longest prefix match

use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::warn;

/// Interface identifier, as referenced by route entries
pub type IfId = usize;

/// Route entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    /// Destination network (host bits zero)
    pub prefix: Ipv4Addr,
    /// Network mask
    pub mask: Ipv4Addr,
    /// Next hop gateway; 0.0.0.0 means directly connected
    pub next_hop: Ipv4Addr,
    /// Outgoing interface
    pub if_id: IfId,
}

impl RouteEntry {
    /// Resolution target for a packet matched by this route: the gateway,
    /// or the packet's own destination when directly connected.
    pub fn resolve_target(&self, dst: Ipv4Addr) -> Ipv4Addr {
        if self.next_hop.is_unspecified() {
            dst
        } else {
            self.next_hop
        }
    }
}

/// Immutable routing table.
///
/// Entries are partitioned by mask; a lookup probes one hash map per
/// distinct mask in descending numeric mask order, so its cost is bounded
/// by the number of distinct masks rather than the number of routes.
#[derive(Debug, Default)]
pub struct RoutingTable {
    entries: Vec<RouteEntry>,
    /// (mask, prefix -> entry index), ordered by mask value descending
    partitions: Vec<(u32, HashMap<u32, usize>)>,
}

impl RoutingTable {
    /// Build a table from loaded entries.
    ///
    /// Prefixes with stray host bits are masked off with a warning. When two
    /// entries share the same prefix and mask, the first one wins and later
    /// duplicates are discarded.
    pub fn from_entries(entries: Vec<RouteEntry>) -> Self {
        let mut table = Self::default();
        let mut by_mask: HashMap<u32, HashMap<u32, usize>> = HashMap::new();

        for mut entry in entries {
            let mask = u32::from(entry.mask);
            let prefix = u32::from(entry.prefix);
            let masked = prefix & mask;
            if masked != prefix {
                warn!(
                    prefix = %entry.prefix,
                    mask = %entry.mask,
                    "route prefix has host bits set, masking off"
                );
                entry.prefix = Ipv4Addr::from(masked);
            }

            let partition = by_mask.entry(mask).or_default();
            if partition.contains_key(&masked) {
                warn!(
                    prefix = %entry.prefix,
                    mask = %entry.mask,
                    "duplicate route, keeping first"
                );
                continue;
            }
            partition.insert(masked, table.entries.len());
            table.entries.push(entry);
        }

        table.partitions = by_mask.into_iter().collect();
        // The numerically largest matching mask wins; masks are unique per
        // partition so this order is deterministic
        table.partitions.sort_by(|a, b| b.0.cmp(&a.0));

        table
    }

    /// Longest prefix match: among matching entries, the one with the
    /// numerically largest mask wins.
    pub fn lookup(&self, addr: Ipv4Addr) -> Option<&RouteEntry> {
        let addr = u32::from(addr);
        for (mask, partition) in &self.partitions {
            if let Some(&idx) = partition.get(&(addr & mask)) {
                return Some(&self.entries[idx]);
            }
        }
        None
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Linear reference implementation of `lookup`, for cross-checking
    #[cfg(test)]
    fn lookup_linear(&self, addr: Ipv4Addr) -> Option<&RouteEntry> {
        let addr = u32::from(addr);
        self.entries
            .iter()
            .filter(|e| addr & u32::from(e.mask) == u32::from(e.prefix))
            .max_by_key(|e| u32::from(e.mask))
    }
}
