//! Data plane components
//!
//! Routing table, ARP resolution cache, interface registry, and the
//! forwarding engine that ties them together.

mod arp_cache;
mod engine;
mod interfaces;
mod routing;

pub use arp_cache::{ArpEntry, ResolutionCache};
pub use engine::{Disposition, ForwardingEngine, Frame};
pub use interfaces::{Interface, InterfaceTable};
pub use routing::{IfId, RouteEntry, RoutingTable};
