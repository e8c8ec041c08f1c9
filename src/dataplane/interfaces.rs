//! Router interface registry

use super::routing::IfId;
use crate::protocol::MacAddr;
use std::net::Ipv4Addr;

/// A router-owned network interface
#[derive(Debug, Clone)]
pub struct Interface {
    pub name: String,
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub prefix_len: u8,
}

/// Immutable registry of the router's interfaces, indexed by `IfId`.
///
/// Built once at startup; the dataplane only reads it.
#[derive(Debug, Default)]
pub struct InterfaceTable {
    interfaces: Vec<Interface>,
}

impl InterfaceTable {
    pub fn new(interfaces: Vec<Interface>) -> Self {
        Self { interfaces }
    }

    pub fn get(&self, if_id: IfId) -> Option<&Interface> {
        self.interfaces.get(if_id)
    }

    pub fn mac(&self, if_id: IfId) -> Option<MacAddr> {
        self.interfaces.get(if_id).map(|i| i.mac)
    }

    pub fn ip(&self, if_id: IfId) -> Option<Ipv4Addr> {
        self.interfaces.get(if_id).map(|i| i.ip)
    }

    /// Is this address one of our own? Returns the owning interface.
    pub fn local(&self, ip: Ipv4Addr) -> Option<IfId> {
        self.interfaces.iter().position(|i| i.ip == ip)
    }

    pub fn iter(&self) -> impl Iterator<Item = (IfId, &Interface)> {
        self.interfaces.iter().enumerate()
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_table() -> InterfaceTable {
        InterfaceTable::new(vec![
            Interface {
                name: "eth0".to_string(),
                mac: MacAddr([0x02, 0, 0, 0, 0, 0x01]),
                ip: Ipv4Addr::new(192, 168, 1, 1),
                prefix_len: 24,
            },
            Interface {
                name: "eth1".to_string(),
                mac: MacAddr([0x02, 0, 0, 0, 0, 0x02]),
                ip: Ipv4Addr::new(10, 0, 0, 1),
                prefix_len: 8,
            },
        ])
    }

    #[test]
    fn test_lookup_by_id() {
        let table = make_table();
        assert_eq!(table.mac(0), Some(MacAddr([0x02, 0, 0, 0, 0, 0x01])));
        assert_eq!(table.ip(1), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(table.get(1).unwrap().name, "eth1");
        assert!(table.get(2).is_none());
        assert!(table.mac(2).is_none());
    }

    #[test]
    fn test_local() {
        let table = make_table();
        assert_eq!(table.local(Ipv4Addr::new(192, 168, 1, 1)), Some(0));
        assert_eq!(table.local(Ipv4Addr::new(10, 0, 0, 1)), Some(1));
        assert_eq!(table.local(Ipv4Addr::new(192, 168, 1, 2)), None);
    }
}
