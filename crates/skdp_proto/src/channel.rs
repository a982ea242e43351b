//! Role-shared endpoint core.
//!
//! Both roles own the same thing after the exchange: two direction ciphers,
//! two monotonic counters, and the exchange stage. The tunnel operations
//! and the post-establishment dispatch live here; `DeviceSession` and
//! `ServerSession` forward to them.

use tracing::{debug, warn};
use zeroize::Zeroizing;

use skdp_crypto::cipher::DirectionCipher;

use crate::config::{ERROR_MESSAGE_SIZE, MAC_TAG_SIZE, SEQUENCE_TERMINATOR};
use crate::error::SkdpError;
use crate::keepalive::KeepAliveState;
use crate::packet::{now_utc_seconds, Packet, PacketFlag, PacketHeader};
use crate::transport::Transport;

/// Position within the key exchange. Transitions are linear and one-way;
/// a failed session returns to `None` only through disposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KexStage {
    #[default]
    None,
    ConnectRequest,
    ConnectResponse,
    ExchangeRequest,
    ExchangeResponse,
    EstablishRequest,
    Established,
}

/// What a received post-establishment packet meant.
pub enum SessionEvent {
    /// Decrypted application message.
    Message(Zeroizing<Vec<u8>>),
    /// Peer probe; the echo is ready to send.
    KeepAliveEcho(Packet),
    /// Peer answered a probe; verify it against the keep-alive state.
    KeepAlive(Packet),
    /// Peer signaled shutdown; the state has been disposed.
    Terminated(SkdpError),
}

pub(crate) struct Channel {
    pub rxcpr: Option<DirectionCipher>,
    pub txcpr: Option<DirectionCipher>,
    pub rxseq: u64,
    pub txseq: u64,
    pub stage: KexStage,
}

impl Channel {
    pub fn new() -> Self {
        Self {
            rxcpr: None,
            txcpr: None,
            rxseq: 0,
            txseq: 0,
            stage: KexStage::None,
        }
    }

    /// Tunnel send: stamp, bind the header as AAD, encrypt.
    pub fn encrypt_packet(&mut self, message: &[u8]) -> Result<Packet, SkdpError> {
        if self.stage != KexStage::Established {
            return Err(SkdpError::ChannelDown);
        }
        self.txseq += 1;
        if self.txseq >= SEQUENCE_TERMINATOR - 1 {
            // refuse to approach the terminator sentinel
            return Err(SkdpError::ChannelDown);
        }
        let header = PacketHeader {
            flag: PacketFlag::EncryptedMessage,
            msglen: (message.len() + MAC_TAG_SIZE) as u32,
            sequence: self.txseq,
            utctime: now_utc_seconds(),
        };
        let aad = header.serialize();
        let txcpr = self.txcpr.as_mut().ok_or(SkdpError::ChannelDown)?;
        let body = txcpr.encrypt(&aad, message)?;
        Ok(Packet { header, body })
    }

    /// Tunnel receive: sequence, stage, and time checks, then authenticate
    /// and decrypt with the header as AAD. The receive counter advances
    /// even when the packet is rejected; every rejection here is
    /// session-fatal, so a gap never heals.
    pub fn decrypt_packet(&mut self, packet: &Packet) -> Result<Zeroizing<Vec<u8>>, SkdpError> {
        self.rxseq += 1;
        if packet.header.sequence != self.rxseq {
            warn!(
                expected = self.rxseq,
                received = packet.header.sequence,
                "tunnel packet out of sequence"
            );
            return Err(SkdpError::Unsequenced);
        }
        if self.rxseq >= SEQUENCE_TERMINATOR - 1 {
            return Err(SkdpError::ChannelDown);
        }
        if self.stage != KexStage::Established {
            return Err(SkdpError::ChannelDown);
        }
        if !packet.time_valid(now_utc_seconds()) {
            return Err(SkdpError::PacketExpired);
        }
        let aad = packet.header.serialize();
        let rxcpr = self.rxcpr.as_mut().ok_or(SkdpError::ChannelDown)?;
        Ok(rxcpr.decrypt(&aad, &packet.body)?)
    }

    /// Route a post-establishment packet.
    pub fn receive(&mut self, packet: &Packet) -> Result<SessionEvent, SkdpError> {
        match packet.header.flag {
            PacketFlag::EncryptedMessage => Ok(SessionEvent::Message(self.decrypt_packet(packet)?)),
            PacketFlag::KeepAliveRequest => Ok(SessionEvent::KeepAliveEcho(
                KeepAliveState::response_for(packet)?,
            )),
            PacketFlag::KeepAliveResponse => Ok(SessionEvent::KeepAlive(packet.clone())),
            PacketFlag::ConnectionTerminate | PacketFlag::ErrorCondition => {
                let code = packet
                    .body
                    .first()
                    .copied()
                    .map(SkdpError::from_wire)
                    .unwrap_or(SkdpError::GeneralFailure);
                debug!(error = %code, "peer signaled shutdown");
                self.dispose();
                Ok(SessionEvent::Terminated(code))
            }
            _ => Err(SkdpError::InvalidInput),
        }
    }

    /// Overwrite cipher keys and reset counters and stage.
    pub fn dispose(&mut self) {
        if let Some(cipher) = self.rxcpr.as_mut() {
            cipher.dispose();
        }
        if let Some(cipher) = self.txcpr.as_mut() {
            cipher.dispose();
        }
        self.rxcpr = None;
        self.txcpr = None;
        self.rxseq = 0;
        self.txseq = 0;
        self.stage = KexStage::None;
    }
}

/// A peer-signaled error carried by the packet, if that is what it is.
pub(crate) fn peer_error(packet: &Packet) -> Option<SkdpError> {
    if packet.header.flag == PacketFlag::ErrorCondition {
        let code = packet.body.first().copied().unwrap_or(0);
        return Some(SkdpError::from_wire(code));
    }
    None
}

/// Best-effort error notification; send failures are ignored, the session
/// is being torn down either way.
pub fn send_error<T: Transport>(transport: &mut T, error: SkdpError) {
    if !transport.is_open() {
        return;
    }
    let mut body = vec![0u8; ERROR_MESSAGE_SIZE];
    body[0] = error.to_wire();
    let packet = Packet::new(PacketFlag::ErrorCondition, SEQUENCE_TERMINATOR, body);
    let _ = transport.send_all(&packet.to_bytes());
}

/// Graceful disconnect notification.
pub(crate) fn send_terminate<T: Transport>(transport: &mut T, error: SkdpError) {
    if !transport.is_open() {
        return;
    }
    let mut body = vec![0u8; ERROR_MESSAGE_SIZE];
    body[0] = error.to_wire();
    let packet = Packet::new(PacketFlag::ConnectionTerminate, SEQUENCE_TERMINATOR, body);
    let _ = transport.send_all(&packet.to_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use skdp_crypto::cipher::CipherRole;
    use skdp_crypto::kdf;

    fn established_pair() -> (Channel, Channel) {
        let token = [0x21u8; 32];
        let hash = [0x42u8; 64];
        let keys = kdf::derive_direction_keys(&token, &hash);

        let mut a = Channel::new();
        a.txcpr =
            Some(DirectionCipher::new(&keys.key, &keys.nonce, CipherRole::Transmit).unwrap());
        a.stage = KexStage::Established;
        a.txseq = 3;

        let mut b = Channel::new();
        b.rxcpr = Some(DirectionCipher::new(&keys.key, &keys.nonce, CipherRole::Receive).unwrap());
        b.stage = KexStage::Established;
        b.rxseq = 3;
        (a, b)
    }

    #[test]
    fn tunnel_roundtrip_once_then_replay_rejected() {
        let (mut tx, mut rx) = established_pair();
        let packet = tx.encrypt_packet(b"application bytes").unwrap();
        assert_eq!(packet.header.sequence, 4);

        let plain = rx.decrypt_packet(&packet).unwrap();
        assert_eq!(plain.as_slice(), b"application bytes");

        // same packet again: the counter has moved on
        assert!(matches!(
            rx.decrypt_packet(&packet),
            Err(SkdpError::Unsequenced)
        ));
    }

    #[test]
    fn tunnel_rejects_header_tamper() {
        let (mut tx, mut rx) = established_pair();
        let mut packet = tx.encrypt_packet(b"payload").unwrap();
        packet.header.utctime ^= 1;
        assert!(matches!(
            rx.decrypt_packet(&packet),
            Err(SkdpError::CipherAuthFailure)
        ));
    }

    #[test]
    fn tunnel_rejects_stale_time() {
        let (mut tx, mut rx) = established_pair();
        let mut packet = tx.encrypt_packet(b"payload").unwrap();
        packet.header.utctime = now_utc_seconds() - crate::config::PACKET_TIME_THRESHOLD - 1;
        assert!(matches!(
            rx.decrypt_packet(&packet),
            Err(SkdpError::PacketExpired)
        ));
    }

    #[test]
    fn channel_down_before_establishment() {
        let mut channel = Channel::new();
        assert!(matches!(
            channel.encrypt_packet(b"x"),
            Err(SkdpError::ChannelDown)
        ));
        let packet = Packet::new(PacketFlag::EncryptedMessage, 1, vec![0; 17]);
        assert!(matches!(
            channel.decrypt_packet(&packet),
            Err(SkdpError::ChannelDown)
        ));
    }

    #[test]
    fn sequence_overflow_forces_teardown() {
        let (mut tx, _) = established_pair();
        tx.txseq = SEQUENCE_TERMINATOR - 2;
        assert!(matches!(tx.encrypt_packet(b"x"), Err(SkdpError::ChannelDown)));
    }

    #[test]
    fn dispose_clears_state() {
        let (mut tx, _) = established_pair();
        tx.dispose();
        assert!(tx.txcpr.is_none() && tx.rxcpr.is_none());
        assert_eq!(tx.txseq, 0);
        assert_eq!(tx.stage, KexStage::None);
    }

    #[test]
    fn terminate_packets_dispose_and_surface_the_code() {
        let (_, mut rx) = established_pair();
        let packet = Packet::new(
            PacketFlag::ConnectionTerminate,
            SEQUENCE_TERMINATOR,
            vec![SkdpError::BadKeepAlive.to_wire()],
        );
        match rx.receive(&packet).unwrap() {
            SessionEvent::Terminated(code) => assert_eq!(code, SkdpError::BadKeepAlive),
            _ => panic!("expected termination"),
        }
        assert_eq!(rx.stage, KexStage::None);
    }
}
