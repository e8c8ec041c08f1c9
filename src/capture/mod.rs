//! Raw link-layer I/O

mod af_packet;

pub use af_packet::AfPacketSocket;
