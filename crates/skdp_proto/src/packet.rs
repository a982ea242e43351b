//! Packet framing.
//!
//! Every datagram is a fixed 21-byte header followed by the body:
//!
//! ```text
//! flag (1) || msglen (4, LE) || sequence (8, LE) || utctime (8, LE)
//! ```
//!
//! The serialized header doubles as the associated data for every
//! authenticated transform, so a packet owns its body and headers are
//! re-serialized from the struct rather than aliased out of a transport
//! buffer. `utctime` is stamped by the sender on the flags that enforce
//! the anti-replay window; other flags may carry zero.

use chrono::Utc;

use crate::config::{HEADER_SIZE, PACKET_TIME_THRESHOLD};
use crate::error::SkdpError;

/// Packet type. The discriminants are stable bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketFlag {
    None = 0x00,
    ConnectRequest = 0x01,
    ConnectResponse = 0x02,
    ExchangeRequest = 0x03,
    ExchangeResponse = 0x04,
    EstablishRequest = 0x05,
    EstablishResponse = 0x06,
    EncryptedMessage = 0x07,
    KeepAliveRequest = 0x08,
    KeepAliveResponse = 0x09,
    ConnectionTerminate = 0x0A,
    ErrorCondition = 0x0B,
    SessionEstablished = 0x0C,
}

impl PacketFlag {
    pub fn from_wire(value: u8) -> Result<Self, SkdpError> {
        match value {
            0x00 => Ok(Self::None),
            0x01 => Ok(Self::ConnectRequest),
            0x02 => Ok(Self::ConnectResponse),
            0x03 => Ok(Self::ExchangeRequest),
            0x04 => Ok(Self::ExchangeResponse),
            0x05 => Ok(Self::EstablishRequest),
            0x06 => Ok(Self::EstablishResponse),
            0x07 => Ok(Self::EncryptedMessage),
            0x08 => Ok(Self::KeepAliveRequest),
            0x09 => Ok(Self::KeepAliveResponse),
            0x0A => Ok(Self::ConnectionTerminate),
            0x0B => Ok(Self::ErrorCondition),
            0x0C => Ok(Self::SessionEstablished),
            _ => Err(SkdpError::InvalidInput),
        }
    }

    /// Flags whose `utctime` is checked against the validity window on
    /// receipt. Everything else may legitimately carry zero.
    pub fn time_window_enforced(self) -> bool {
        matches!(
            self,
            Self::ExchangeRequest
                | Self::ExchangeResponse
                | Self::EstablishRequest
                | Self::EncryptedMessage
        )
    }
}

/// Seconds since the Unix epoch, UTC.
pub fn now_utc_seconds() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub flag: PacketFlag,
    pub msglen: u32,
    pub sequence: u64,
    pub utctime: u64,
}

impl PacketHeader {
    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0] = self.flag as u8;
        out[1..5].copy_from_slice(&self.msglen.to_le_bytes());
        out[5..13].copy_from_slice(&self.sequence.to_le_bytes());
        out[13..21].copy_from_slice(&self.utctime.to_le_bytes());
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, SkdpError> {
        if bytes.len() < HEADER_SIZE {
            return Err(SkdpError::InvalidInput);
        }
        Ok(Self {
            flag: PacketFlag::from_wire(bytes[0])?,
            msglen: u32::from_le_bytes(bytes[1..5].try_into().expect("length checked")),
            sequence: u64::from_le_bytes(bytes[5..13].try_into().expect("length checked")),
            utctime: u64::from_le_bytes(bytes[13..21].try_into().expect("length checked")),
        })
    }
}

/// An owned SKDP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub body: Vec<u8>,
}

impl Packet {
    /// Build a packet around `body`; `msglen` follows the body length,
    /// `utctime` starts at zero until stamped.
    pub fn new(flag: PacketFlag, sequence: u64, body: Vec<u8>) -> Self {
        Self {
            header: PacketHeader {
                flag,
                msglen: body.len() as u32,
                sequence,
                utctime: 0,
            },
            body,
        }
    }

    /// Stamp the send time into the header.
    pub fn stamp_utc_time(&mut self) {
        self.header.utctime = now_utc_seconds();
    }

    /// Check the anti-replay window against the receiver clock `now`.
    /// Flags outside the enforced set are always valid.
    pub fn time_valid(&self, now: u64) -> bool {
        if !self.header.flag.time_window_enforced() {
            return true;
        }
        now.abs_diff(self.header.utctime) <= PACKET_TIME_THRESHOLD
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.body.len());
        out.extend_from_slice(&self.header.serialize());
        out.extend_from_slice(&self.body);
        out
    }

    /// Parse a full datagram; the declared `msglen` must match the bytes
    /// actually present.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SkdpError> {
        let header = PacketHeader::deserialize(bytes)?;
        let body = &bytes[HEADER_SIZE..];
        if body.len() != header.msglen as usize {
            return Err(SkdpError::InvalidInput);
        }
        Ok(Self {
            header,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SEQUENCE_TERMINATOR;

    #[test]
    fn header_roundtrip() {
        let header = PacketHeader {
            flag: PacketFlag::EncryptedMessage,
            msglen: 0x01020304,
            sequence: 0x1122334455667788,
            utctime: 1735689600,
        };
        let bytes = header.serialize();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(PacketHeader::deserialize(&bytes).unwrap(), header);
    }

    #[test]
    fn header_layout_is_little_endian() {
        let header = PacketHeader {
            flag: PacketFlag::ConnectRequest,
            msglen: 41,
            sequence: 2,
            utctime: 0x0100,
        };
        let bytes = header.serialize();
        assert_eq!(bytes[0], 0x01);
        assert_eq!(&bytes[1..5], &[41, 0, 0, 0]);
        assert_eq!(&bytes[5..13], &[2, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&bytes[13..21], &[0, 1, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn unknown_flag_rejected() {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0] = 0x7F;
        assert_eq!(
            PacketHeader::deserialize(&bytes),
            Err(SkdpError::InvalidInput)
        );
    }

    #[test]
    fn packet_roundtrip_and_length_check() {
        let mut packet = Packet::new(PacketFlag::EncryptedMessage, 5, vec![0xAB; 32]);
        packet.stamp_utc_time();
        let bytes = packet.to_bytes();
        assert_eq!(Packet::from_bytes(&bytes).unwrap(), packet);

        // truncated body no longer matches the declared msglen
        assert_eq!(
            Packet::from_bytes(&bytes[..bytes.len() - 1]),
            Err(SkdpError::InvalidInput)
        );
    }

    #[test]
    fn time_window_is_per_flag() {
        let now = now_utc_seconds();

        let mut packet = Packet::new(PacketFlag::EncryptedMessage, 1, vec![0; 17]);
        packet.header.utctime = now - PACKET_TIME_THRESHOLD;
        assert!(packet.time_valid(now));
        packet.header.utctime = now - PACKET_TIME_THRESHOLD - 1;
        assert!(!packet.time_valid(now));
        packet.header.utctime = now + PACKET_TIME_THRESHOLD + 1;
        assert!(!packet.time_valid(now));

        // connect packets may carry the zero sentinel
        let packet = Packet::new(PacketFlag::ConnectRequest, 0, vec![0; 41]);
        assert!(packet.time_valid(now));

        let terminate = Packet::new(PacketFlag::ConnectionTerminate, SEQUENCE_TERMINATOR, vec![1]);
        assert!(terminate.time_valid(now));
    }
}
