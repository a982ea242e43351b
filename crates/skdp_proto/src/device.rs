//! Device role.
//!
//! The device initiates: connect, exchange, establish. It proves possession
//! of its device derivation key by encrypting a fresh session token under a
//! keystream only the key holder (or the server, which can recompute the
//! key) can regenerate, then confirms the tunnel by echoing its session
//! hash through it.
//!
//! Channel binding: the device transmit cipher is keyed from
//! `(dtok, dsh)`, its receive cipher from `(stok, ssh)`.

use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

use skdp_crypto::cipher::{CipherRole, DirectionCipher};
use skdp_crypto::kdf;
use skdp_crypto::keys::DeviceKeyRecord;
use skdp_crypto::sponge;

use crate::channel::{self, Channel, KexStage, SessionEvent};
use crate::config::{
    CONFIG_STRING, CONNECT_REQUEST_MESSAGE_SIZE, CONNECT_RESPONSE_MESSAGE_SIZE,
    CONNECT_RESPONSE_PACKET_SIZE, DERIVATION_KEY_SIZE, ESTABLISH_REQUEST_MESSAGE_SIZE,
    ESTABLISH_RESPONSE_MESSAGE_SIZE, ESTABLISH_RESPONSE_PACKET_SIZE,
    EXCHANGE_REQUEST_MESSAGE_SIZE, EXCHANGE_RESPONSE_MESSAGE_SIZE,
    EXCHANGE_RESPONSE_PACKET_SIZE, KID_SIZE, MAC_TAG_SIZE, SESSION_HASH_SIZE, STOK_SIZE,
    TOKEN_SIZE,
};
use crate::error::SkdpError;
use crate::packet::{now_utc_seconds, Packet, PacketFlag, PacketHeader};
use crate::rng::SecureRandom;
use crate::transport::Transport;

pub struct DeviceSession {
    channel: Channel,
    kid: [u8; KID_SIZE],
    ddk: Zeroizing<[u8; DERIVATION_KEY_SIZE]>,
    dsh: Zeroizing<[u8; SESSION_HASH_SIZE]>,
    ssh: Zeroizing<[u8; SESSION_HASH_SIZE]>,
    expiration: u64,
    rng: Box<dyn SecureRandom>,
}

impl DeviceSession {
    pub fn new(key: &DeviceKeyRecord, rng: Box<dyn SecureRandom>) -> Self {
        Self {
            channel: Channel::new(),
            kid: key.kid,
            ddk: Zeroizing::new(key.ddk),
            dsh: Zeroizing::new([0u8; SESSION_HASH_SIZE]),
            ssh: Zeroizing::new([0u8; SESSION_HASH_SIZE]),
            expiration: key.expiration,
            rng,
        }
    }

    /// Open the exchange: send the device identity and the configuration
    /// string, and store the session hash of the exact outbound body.
    pub fn connect_request(&mut self) -> Result<Packet, SkdpError> {
        if self.channel.stage != KexStage::None {
            return Err(SkdpError::InvalidInput);
        }
        if now_utc_seconds() >= self.expiration {
            return Err(SkdpError::KeyNotRecognized);
        }

        let mut body = Vec::with_capacity(CONNECT_REQUEST_MESSAGE_SIZE);
        body.extend_from_slice(&self.kid);
        body.extend_from_slice(CONFIG_STRING);
        *self.dsh = sponge::hash(&body);

        let mut packet = Packet::new(PacketFlag::ConnectRequest, self.channel.txseq, body);
        packet.stamp_utc_time();
        self.channel.stage = KexStage::ConnectRequest;
        self.channel.txseq += 1;
        debug!(kid = %hex::encode(self.kid), "connect request issued");
        Ok(packet)
    }

    /// Consume the connect response and produce the exchange request:
    /// a fresh device token, XOR-encrypted under the key-bound keystream
    /// and tagged over ciphertext and outbound header.
    pub fn exchange_request(&mut self, response: &Packet) -> Result<Packet, SkdpError> {
        if let Some(err) = channel::peer_error(response) {
            return Err(err);
        }
        if response.header.sequence != self.channel.rxseq {
            return Err(SkdpError::Unsequenced);
        }
        self.channel.rxseq += 1;
        if self.channel.stage != KexStage::ConnectRequest {
            return Err(SkdpError::InvalidInput);
        }
        if response.header.flag != PacketFlag::ConnectResponse {
            return Err(SkdpError::ConnectionFailure);
        }
        if response.body.len() != CONNECT_RESPONSE_MESSAGE_SIZE {
            return Err(SkdpError::InvalidInput);
        }
        *self.ssh = sponge::hash(&response.body);

        let mut dtok = Zeroizing::new([0u8; TOKEN_SIZE]);
        self.rng.fill(dtok.as_mut())?;

        // token-encryption stream and MAC key, bound to this direction
        let prnd = kdf::token_keystream(self.ddk.as_ref(), self.dsh.as_ref());
        let mut ctoken = [0u8; TOKEN_SIZE];
        for (i, byte) in ctoken.iter_mut().enumerate() {
            *byte = dtok[i] ^ prnd[i];
        }

        let header = PacketHeader {
            flag: PacketFlag::ExchangeRequest,
            msglen: EXCHANGE_REQUEST_MESSAGE_SIZE as u32,
            sequence: self.channel.txseq,
            utctime: now_utc_seconds(),
        };
        let shdr = header.serialize();
        let mut tag = [0u8; MAC_TAG_SIZE];
        sponge::mac_tag(
            &prnd[TOKEN_SIZE..],
            self.dsh.as_ref(),
            &[&ctoken, &shdr],
            &mut tag,
        );

        let mut body = Vec::with_capacity(EXCHANGE_REQUEST_MESSAGE_SIZE);
        body.extend_from_slice(&ctoken);
        body.extend_from_slice(&tag);

        // device transmit channel is keyed from (dtok, dsh)
        let keys = kdf::derive_direction_keys(dtok.as_ref(), self.dsh.as_ref());
        self.channel.txcpr = Some(DirectionCipher::new(
            &keys.key,
            &keys.nonce,
            CipherRole::Transmit,
        )?);

        self.channel.stage = KexStage::ExchangeRequest;
        self.channel.txseq += 1;
        Ok(Packet { header, body })
    }

    /// Consume the exchange response: authenticate and decrypt the server
    /// token, raise the receive channel, and confirm the tunnel by sending
    /// the device session hash through the transmit cipher.
    pub fn establish_request(&mut self, response: &Packet) -> Result<Packet, SkdpError> {
        if let Some(err) = channel::peer_error(response) {
            return Err(err);
        }
        if response.header.sequence != self.channel.rxseq {
            return Err(SkdpError::Unsequenced);
        }
        self.channel.rxseq += 1;
        if self.channel.stage != KexStage::ExchangeRequest {
            return Err(SkdpError::InvalidInput);
        }
        if response.header.flag != PacketFlag::ExchangeResponse {
            return Err(SkdpError::EstablishFailure);
        }
        if response.body.len() != EXCHANGE_RESPONSE_MESSAGE_SIZE {
            return Err(SkdpError::InvalidInput);
        }
        if !response.time_valid(now_utc_seconds()) {
            return Err(SkdpError::PacketExpired);
        }

        let prnd = kdf::token_keystream(self.ddk.as_ref(), self.ssh.as_ref());
        let shdr = response.header.serialize();
        let mut tag = [0u8; MAC_TAG_SIZE];
        sponge::mac_tag(
            &prnd[STOK_SIZE..],
            self.ssh.as_ref(),
            &[&response.body[..STOK_SIZE], &shdr],
            &mut tag,
        );
        if !sponge::ct_equal(&tag, &response.body[STOK_SIZE..]) {
            return Err(SkdpError::KexAuthFailure);
        }

        let mut stok = Zeroizing::new([0u8; STOK_SIZE]);
        for (i, byte) in stok.iter_mut().enumerate() {
            *byte = response.body[i] ^ prnd[i];
        }

        // device receive channel is keyed from (stok, ssh)
        let keys = kdf::derive_direction_keys(stok.as_ref(), self.ssh.as_ref());
        self.channel.rxcpr = Some(DirectionCipher::new(
            &keys.key,
            &keys.nonce,
            CipherRole::Receive,
        )?);

        let header = PacketHeader {
            flag: PacketFlag::EstablishRequest,
            msglen: ESTABLISH_REQUEST_MESSAGE_SIZE as u32,
            sequence: self.channel.txseq,
            utctime: now_utc_seconds(),
        };
        let aad = header.serialize();
        let txcpr = self.channel.txcpr.as_mut().ok_or(SkdpError::ChannelDown)?;
        let body = txcpr.encrypt(&aad, self.dsh.as_ref())?;

        self.channel.stage = KexStage::EstablishRequest;
        self.channel.txseq += 1;
        Ok(Packet { header, body })
    }

    /// Consume the establish response: the server echoes the hash of the
    /// verification token; a mismatch means the tunnel is not sound.
    pub fn establish_verify(&mut self, response: &Packet) -> Result<(), SkdpError> {
        if let Some(err) = channel::peer_error(response) {
            return Err(err);
        }
        if response.header.sequence != self.channel.rxseq {
            return Err(SkdpError::Unsequenced);
        }
        self.channel.rxseq += 1;
        if self.channel.stage != KexStage::EstablishRequest {
            return Err(SkdpError::InvalidInput);
        }
        if response.header.flag != PacketFlag::EstablishResponse {
            return Err(SkdpError::EstablishFailure);
        }
        if response.body.len() != ESTABLISH_RESPONSE_MESSAGE_SIZE {
            return Err(SkdpError::InvalidInput);
        }

        let aad = response.header.serialize();
        let rxcpr = self.channel.rxcpr.as_mut().ok_or(SkdpError::ChannelDown)?;
        let plain = rxcpr.decrypt(&aad, &response.body)?;

        let expected = sponge::hash(self.dsh.as_ref());
        if !sponge::ct_equal(plain.as_ref(), &expected) {
            return Err(SkdpError::CipherAuthFailure);
        }

        self.channel.stage = KexStage::Established;
        self.kex_reset();
        debug!("device session established");
        Ok(())
    }

    /// Drive the whole exchange over a blocking transport. On failure the
    /// error is reported to the peer best-effort, the transport is closed,
    /// and the state disposed.
    pub fn key_exchange<T: Transport>(&mut self, transport: &mut T) -> Result<(), SkdpError> {
        match self.run_kex(transport) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, "device key exchange failed");
                channel::send_error(transport, err);
                transport.close();
                self.dispose();
                Err(err)
            }
        }
    }

    fn run_kex<T: Transport>(&mut self, transport: &mut T) -> Result<(), SkdpError> {
        let request = self.connect_request()?;
        transport.send_all(&request.to_bytes())?;

        let mut buf = vec![0u8; CONNECT_RESPONSE_PACKET_SIZE];
        transport
            .recv_exact(&mut buf)
            .map_err(|_| SkdpError::ConnectionFailure)?;
        let response = Packet::from_bytes(&buf)?;
        let request = self.exchange_request(&response)?;
        transport.send_all(&request.to_bytes())?;

        let mut buf = vec![0u8; EXCHANGE_RESPONSE_PACKET_SIZE];
        transport.recv_exact(&mut buf)?;
        let response = Packet::from_bytes(&buf)?;
        let request = self.establish_request(&response)?;
        transport.send_all(&request.to_bytes())?;

        let mut buf = vec![0u8; ESTABLISH_RESPONSE_PACKET_SIZE];
        transport.recv_exact(&mut buf)?;
        let response = Packet::from_bytes(&buf)?;
        self.establish_verify(&response)
    }

    /// Tunnel send.
    pub fn encrypt_packet(&mut self, message: &[u8]) -> Result<Packet, SkdpError> {
        self.channel.encrypt_packet(message)
    }

    /// Tunnel receive.
    pub fn decrypt_packet(&mut self, packet: &Packet) -> Result<Zeroizing<Vec<u8>>, SkdpError> {
        self.channel.decrypt_packet(packet)
    }

    /// Route a post-establishment packet.
    pub fn receive(&mut self, packet: &Packet) -> Result<SessionEvent, SkdpError> {
        self.channel.receive(packet)
    }

    /// Graceful close: notify the peer, drop the link, zeroize the state.
    pub fn connection_close<T: Transport>(&mut self, transport: &mut T, error: SkdpError) {
        channel::send_terminate(transport, error);
        transport.close();
        self.dispose();
    }

    /// Zeroize every secret and reset the channel.
    pub fn dispose(&mut self) {
        self.kex_reset();
        self.channel.dispose();
    }

    pub fn stage(&self) -> KexStage {
        self.channel.stage
    }

    pub fn txseq(&self) -> u64 {
        self.channel.txseq
    }

    pub fn rxseq(&self) -> u64 {
        self.channel.rxseq
    }

    fn kex_reset(&mut self) {
        self.kid.zeroize();
        self.ddk.zeroize();
        self.dsh.zeroize();
        self.ssh.zeroize();
        self.expiration = 0;
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::FixedRandom;
    use rand::rngs::OsRng;
    use skdp_crypto::keys::{MasterKeyRecord, SID_SIZE};

    fn device_key() -> DeviceKeyRecord {
        let master = MasterKeyRecord::generate(&mut OsRng, [1, 2, 3, 4], u64::MAX).unwrap();
        master
            .derive_server([5u8; SID_SIZE], CONFIG_STRING)
            .derive_device([9, 9, 9, 9], CONFIG_STRING)
    }

    #[test]
    fn connect_request_hashes_the_exact_body() {
        let key = device_key();
        let mut device = DeviceSession::new(&key, Box::new(FixedRandom::new(vec![0u8; 64])));
        let packet = device.connect_request().unwrap();

        assert_eq!(packet.header.flag, PacketFlag::ConnectRequest);
        assert_eq!(packet.header.sequence, 0);
        assert_eq!(packet.body.len(), CONNECT_REQUEST_MESSAGE_SIZE);
        assert_eq!(&packet.body[..KID_SIZE], &key.kid[..]);
        assert_eq!(&packet.body[KID_SIZE..], CONFIG_STRING.as_slice());
        assert_eq!(*device.dsh, sponge::hash(&packet.body));
        assert_eq!(device.stage(), KexStage::ConnectRequest);
        assert_eq!(device.txseq(), 1);
    }

    #[test]
    fn expired_key_refuses_to_connect() {
        let mut key = device_key();
        key.expiration = 1;
        let mut device = DeviceSession::new(&key, Box::new(FixedRandom::new(vec![0u8; 64])));
        assert_eq!(
            device.connect_request().unwrap_err(),
            SkdpError::KeyNotRecognized
        );
    }

    #[test]
    fn second_connect_request_is_refused() {
        let key = device_key();
        let mut device = DeviceSession::new(&key, Box::new(FixedRandom::new(vec![0u8; 64])));
        device.connect_request().unwrap();
        assert_eq!(device.connect_request().unwrap_err(), SkdpError::InvalidInput);
    }

    #[test]
    fn peer_error_packet_surfaces_the_carried_code() {
        let key = device_key();
        let mut device = DeviceSession::new(&key, Box::new(FixedRandom::new(vec![0u8; 64])));
        device.connect_request().unwrap();

        let error = Packet::new(
            PacketFlag::ErrorCondition,
            crate::config::SEQUENCE_TERMINATOR,
            vec![SkdpError::UnknownProtocol.to_wire()],
        );
        assert_eq!(
            device.exchange_request(&error).unwrap_err(),
            SkdpError::UnknownProtocol
        );
    }

    #[test]
    fn dispose_zeroizes_the_secrets() {
        let key = device_key();
        let mut device = DeviceSession::new(&key, Box::new(FixedRandom::new(vec![0u8; 64])));
        device.connect_request().unwrap();
        device.dispose();

        assert_eq!(device.kid, [0u8; KID_SIZE]);
        assert_eq!(*device.ddk, [0u8; DERIVATION_KEY_SIZE]);
        assert_eq!(*device.dsh, [0u8; SESSION_HASH_SIZE]);
        assert_eq!(*device.ssh, [0u8; SESSION_HASH_SIZE]);
        assert_eq!(device.expiration, 0);
        assert_eq!(device.stage(), KexStage::None);
        assert_eq!(device.txseq(), 0);
    }
}
