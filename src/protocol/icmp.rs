//! ICMP (Internet Control Message Protocol) - RFC 792

use crate::{Error, Result};

/// ICMP header size (minimum)
pub const ICMP_HEADER_SIZE: usize = 8;

/// ICMP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IcmpType {
    EchoReply = 0,
    DestinationUnreachable = 3,
    EchoRequest = 8,
    TimeExceeded = 11,
}

impl IcmpType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(IcmpType::EchoReply),
            3 => Some(IcmpType::DestinationUnreachable),
            8 => Some(IcmpType::EchoRequest),
            11 => Some(IcmpType::TimeExceeded),
            _ => None,
        }
    }
}

/// Destination Unreachable codes (RFC 792)
pub mod dest_unreachable {
    /// Network unreachable
    pub const NET_UNREACHABLE: u8 = 0;
    /// Host unreachable
    pub const HOST_UNREACHABLE: u8 = 1;
    /// Port unreachable
    pub const PORT_UNREACHABLE: u8 = 3;
}

/// Time Exceeded codes (RFC 792)
pub mod time_exceeded {
    /// TTL exceeded in transit
    pub const TTL_EXCEEDED: u8 = 0;
}

/// Parsed ICMP message
#[derive(Debug)]
pub struct IcmpPacket<'a> {
    buffer: &'a [u8],
}

impl<'a> IcmpPacket<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < ICMP_HEADER_SIZE {
            return Err(Error::Parse("ICMP packet too short".into()));
        }

        Ok(Self { buffer })
    }

    pub fn icmp_type(&self) -> u8 {
        self.buffer[0]
    }

    pub fn code(&self) -> u8 {
        self.buffer[1]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    /// For Echo Request/Reply: identifier
    pub fn identifier(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    /// For Echo Request/Reply: sequence number
    pub fn sequence(&self) -> u16 {
        u16::from_be_bytes([self.buffer[6], self.buffer[7]])
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[8..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer
    }

    /// Validate the ICMP checksum
    pub fn validate_checksum(&self) -> bool {
        icmp_checksum(self.buffer) == 0
    }

    /// Get the typed ICMP message type
    pub fn message_type(&self) -> Option<IcmpType> {
        IcmpType::from_u8(self.icmp_type())
    }

    /// Check if this is an Echo Request
    pub fn is_echo_request(&self) -> bool {
        self.icmp_type() == IcmpType::EchoRequest as u8
    }

    /// Check if this is an Echo Reply
    pub fn is_echo_reply(&self) -> bool {
        self.icmp_type() == IcmpType::EchoReply as u8
    }

    /// For error messages: get the original IP header + 8 bytes
    pub fn original_datagram(&self) -> &[u8] {
        // Error messages have: Type(1) + Code(1) + Checksum(2) + Unused(4) + Original data
        &self.buffer[8..]
    }
}

/// Calculate ICMP checksum
pub fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    for i in (0..data.len()).step_by(2) {
        let word = if i + 1 < data.len() {
            u16::from_be_bytes([data[i], data[i + 1]])
        } else {
            u16::from_be_bytes([data[i], 0])
        };
        sum = sum.wrapping_add(word as u32);
    }

    // Fold 32-bit sum to 16 bits
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Build an ICMP Echo Reply from an Echo Request
pub fn build_echo_reply(request: &[u8]) -> Result<Vec<u8>> {
    if request.len() < ICMP_HEADER_SIZE {
        return Err(Error::Parse("ICMP request too short".into()));
    }

    let mut reply = request.to_vec();

    // Change type from Echo Request (8) to Echo Reply (0)
    reply[0] = IcmpType::EchoReply as u8;

    // Clear checksum field and recalculate
    reply[2] = 0;
    reply[3] = 0;
    let checksum = icmp_checksum(&reply);
    reply[2..4].copy_from_slice(&checksum.to_be_bytes());

    Ok(reply)
}

/// Build a Time Exceeded message
///
/// Carries the original IP header plus the first 8 bytes of its payload.
pub fn build_time_exceeded(code: u8, original_header: &[u8], original_payload: &[u8]) -> Vec<u8> {
    build_error_message(IcmpType::TimeExceeded, code, original_header, original_payload)
}

/// Build a Destination Unreachable message
///
/// Carries the original IP header plus the first 8 bytes of its payload.
pub fn build_destination_unreachable(
    code: u8,
    original_header: &[u8],
    original_payload: &[u8],
) -> Vec<u8> {
    build_error_message(
        IcmpType::DestinationUnreachable,
        code,
        original_header,
        original_payload,
    )
}

// Error message format:
// Type (1) + Code (1) + Checksum (2) + Unused (4) + Original IP header + 8 bytes
fn build_error_message(
    icmp_type: IcmpType,
    code: u8,
    original_header: &[u8],
    original_payload: &[u8],
) -> Vec<u8> {
    let payload_len = original_payload.len().min(8);
    let total_len = ICMP_HEADER_SIZE + original_header.len() + payload_len;
    let mut packet = vec![0u8; total_len];

    packet[0] = icmp_type as u8;
    packet[1] = code;
    // Bytes 2-7: checksum and unused field (already zero)

    packet[8..8 + original_header.len()].copy_from_slice(original_header);
    packet[8 + original_header.len()..].copy_from_slice(&original_payload[..payload_len]);

    let checksum = icmp_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());

    packet
}
