//! routelet - forwarding core of a software IPv4 router
//!
//! Classifies link-layer frames, forwards unicast IPv4 with longest-prefix
//! routing and ARP next-hop resolution, and answers ARP and ICMP echo
//! requests addressed to the router itself.

pub mod capture;
pub mod config;
pub mod dataplane;
pub mod error;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};
