//! Server role.
//!
//! The server answers: it checks the presented identity against its own
//! prefix, byte-compares the configuration string, recomputes the device
//! derivation key on demand from its server key and the received identity,
//! and mirrors the token exchange from the other side.
//!
//! Channel binding: the server receive cipher is keyed from `(dtok, dsh)`,
//! its transmit cipher from `(stok, ssh)`.

use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

use skdp_crypto::cipher::{CipherRole, DirectionCipher};
use skdp_crypto::kdf;
use skdp_crypto::keys::ServerKeyRecord;
use skdp_crypto::sponge;

use crate::channel::{self, Channel, KexStage, SessionEvent};
use crate::config::{
    CONFIG_STRING, CONNECT_REQUEST_MESSAGE_SIZE, CONNECT_REQUEST_PACKET_SIZE,
    CONNECT_RESPONSE_MESSAGE_SIZE, DERIVATION_KEY_SIZE, ESTABLISH_REQUEST_MESSAGE_SIZE,
    ESTABLISH_REQUEST_PACKET_SIZE, ESTABLISH_RESPONSE_MESSAGE_SIZE,
    EXCHANGE_REQUEST_MESSAGE_SIZE, EXCHANGE_REQUEST_PACKET_SIZE,
    EXCHANGE_RESPONSE_MESSAGE_SIZE, KID_SIZE, MAC_TAG_SIZE, SERVER_ID_SIZE, SESSION_HASH_SIZE,
    STOK_SIZE, TOKEN_SIZE,
};
use crate::error::SkdpError;
use crate::packet::{now_utc_seconds, Packet, PacketFlag, PacketHeader};
use crate::rng::SecureRandom;
use crate::transport::Transport;

pub struct ServerSession {
    channel: Channel,
    kid: [u8; KID_SIZE],
    did: [u8; KID_SIZE],
    dsh: Zeroizing<[u8; SESSION_HASH_SIZE]>,
    ssh: Zeroizing<[u8; SESSION_HASH_SIZE]>,
    sdk: Zeroizing<[u8; DERIVATION_KEY_SIZE]>,
    expiration: u64,
    rng: Box<dyn SecureRandom>,
}

impl ServerSession {
    pub fn new(key: &ServerKeyRecord, rng: Box<dyn SecureRandom>) -> Self {
        Self {
            channel: Channel::new(),
            kid: key.kid,
            did: [0u8; KID_SIZE],
            dsh: Zeroizing::new([0u8; SESSION_HASH_SIZE]),
            ssh: Zeroizing::new([0u8; SESSION_HASH_SIZE]),
            sdk: Zeroizing::new(key.sdk),
            expiration: key.expiration,
            rng,
        }
    }

    /// Answer a connect request: identity prefix and configuration checks,
    /// then a fresh server token so both connect bodies differ and the two
    /// session hashes diverge.
    pub fn connect_response(&mut self, request: &Packet) -> Result<Packet, SkdpError> {
        if let Some(err) = channel::peer_error(request) {
            return Err(err);
        }
        if request.header.sequence != self.channel.rxseq {
            return Err(SkdpError::Unsequenced);
        }
        self.channel.rxseq += 1;
        if self.channel.stage != KexStage::None {
            return Err(SkdpError::InvalidInput);
        }
        if request.header.flag != PacketFlag::ConnectRequest {
            return Err(SkdpError::ConnectionFailure);
        }
        if now_utc_seconds() >= self.expiration {
            return Err(SkdpError::KeyNotRecognized);
        }
        if request.body.len() != CONNECT_REQUEST_MESSAGE_SIZE {
            return Err(SkdpError::InvalidInput);
        }

        self.did.copy_from_slice(&request.body[..KID_SIZE]);

        // the device identity must carry this server's MID || SID prefix
        if self.kid[..SERVER_ID_SIZE] != self.did[..SERVER_ID_SIZE] {
            warn!(did = %hex::encode(self.did), "unknown device identity");
            return Err(SkdpError::KeyNotRecognized);
        }
        if &request.body[KID_SIZE..] != CONFIG_STRING.as_slice() {
            return Err(SkdpError::UnknownProtocol);
        }

        *self.dsh = sponge::hash(&request.body);

        let mut stok = [0u8; STOK_SIZE];
        self.rng.fill(&mut stok)?;

        let mut body = Vec::with_capacity(CONNECT_RESPONSE_MESSAGE_SIZE);
        body.extend_from_slice(&self.kid);
        body.extend_from_slice(CONFIG_STRING);
        body.extend_from_slice(&stok);
        *self.ssh = sponge::hash(&body);

        let packet = Packet::new(PacketFlag::ConnectResponse, self.channel.txseq, body);
        self.channel.stage = KexStage::ConnectResponse;
        self.channel.txseq += 1;
        debug!(did = %hex::encode(self.did), "connect accepted");
        Ok(packet)
    }

    /// Answer an exchange request: recompute the device key, authenticate
    /// and decrypt the device token, raise the receive channel, then send
    /// back a server token the same way and raise the transmit channel.
    pub fn exchange_response(&mut self, request: &Packet) -> Result<Packet, SkdpError> {
        if let Some(err) = channel::peer_error(request) {
            return Err(err);
        }
        if request.header.sequence != self.channel.rxseq {
            return Err(SkdpError::Unsequenced);
        }
        self.channel.rxseq += 1;
        if self.channel.stage != KexStage::ConnectResponse {
            return Err(SkdpError::InvalidInput);
        }
        if request.header.flag != PacketFlag::ExchangeRequest {
            return Err(SkdpError::EstablishFailure);
        }
        if request.body.len() != EXCHANGE_REQUEST_MESSAGE_SIZE {
            return Err(SkdpError::InvalidInput);
        }
        if !request.time_valid(now_utc_seconds()) {
            return Err(SkdpError::PacketExpired);
        }

        // the device key is never stored here; it is recomputed on demand
        let ddk = kdf::derive_device_key(self.sdk.as_ref(), CONFIG_STRING, &self.did);

        let prnd = kdf::token_keystream(ddk.as_ref(), self.dsh.as_ref());
        let shdr = request.header.serialize();
        let mut tag = [0u8; MAC_TAG_SIZE];
        sponge::mac_tag(
            &prnd[TOKEN_SIZE..],
            self.dsh.as_ref(),
            &[&request.body[..TOKEN_SIZE], &shdr],
            &mut tag,
        );
        if !sponge::ct_equal(&tag, &request.body[TOKEN_SIZE..]) {
            return Err(SkdpError::KexAuthFailure);
        }

        let mut dtok = Zeroizing::new([0u8; TOKEN_SIZE]);
        for (i, byte) in dtok.iter_mut().enumerate() {
            *byte = request.body[i] ^ prnd[i];
        }

        // server receive channel is keyed from (dtok, dsh)
        let keys = kdf::derive_direction_keys(dtok.as_ref(), self.dsh.as_ref());
        self.channel.rxcpr = Some(DirectionCipher::new(
            &keys.key,
            &keys.nonce,
            CipherRole::Receive,
        )?);

        let mut stok = Zeroizing::new([0u8; STOK_SIZE]);
        self.rng.fill(stok.as_mut())?;

        // server transmit channel is keyed from (stok, ssh)
        let keys = kdf::derive_direction_keys(stok.as_ref(), self.ssh.as_ref());
        self.channel.txcpr = Some(DirectionCipher::new(
            &keys.key,
            &keys.nonce,
            CipherRole::Transmit,
        )?);

        let prnd = kdf::token_keystream(ddk.as_ref(), self.ssh.as_ref());
        let mut ctoken = [0u8; STOK_SIZE];
        for (i, byte) in ctoken.iter_mut().enumerate() {
            *byte = stok[i] ^ prnd[i];
        }

        let header = PacketHeader {
            flag: PacketFlag::ExchangeResponse,
            msglen: EXCHANGE_RESPONSE_MESSAGE_SIZE as u32,
            sequence: self.channel.txseq,
            utctime: now_utc_seconds(),
        };
        let shdr = header.serialize();
        let mut tag = [0u8; MAC_TAG_SIZE];
        sponge::mac_tag(
            &prnd[STOK_SIZE..],
            self.ssh.as_ref(),
            &[&ctoken, &shdr],
            &mut tag,
        );

        let mut body = Vec::with_capacity(EXCHANGE_RESPONSE_MESSAGE_SIZE);
        body.extend_from_slice(&ctoken);
        body.extend_from_slice(&tag);

        self.channel.stage = KexStage::ExchangeResponse;
        self.channel.txseq += 1;
        Ok(Packet { header, body })
    }

    /// Answer an establish request: the receive cipher authenticates the
    /// verification token; its hash is echoed back through the transmit
    /// cipher so the device can confirm both directions.
    pub fn establish_response(&mut self, request: &Packet) -> Result<Packet, SkdpError> {
        if let Some(err) = channel::peer_error(request) {
            return Err(err);
        }
        if request.header.sequence != self.channel.rxseq {
            return Err(SkdpError::Unsequenced);
        }
        self.channel.rxseq += 1;
        if self.channel.stage != KexStage::ExchangeResponse {
            return Err(SkdpError::InvalidInput);
        }
        if request.header.flag != PacketFlag::EstablishRequest {
            return Err(SkdpError::EstablishFailure);
        }
        if request.body.len() != ESTABLISH_REQUEST_MESSAGE_SIZE {
            return Err(SkdpError::InvalidInput);
        }
        if !request.time_valid(now_utc_seconds()) {
            return Err(SkdpError::PacketExpired);
        }

        let aad = request.header.serialize();
        let rxcpr = self.channel.rxcpr.as_mut().ok_or(SkdpError::ChannelDown)?;
        let plain = rxcpr.decrypt(&aad, &request.body)?;

        // echo the hash of the verification token
        let mhash = sponge::hash(plain.as_ref());

        let header = PacketHeader {
            flag: PacketFlag::EstablishResponse,
            msglen: ESTABLISH_RESPONSE_MESSAGE_SIZE as u32,
            sequence: self.channel.txseq,
            utctime: 0,
        };
        let aad = header.serialize();
        let txcpr = self.channel.txcpr.as_mut().ok_or(SkdpError::ChannelDown)?;
        let body = txcpr.encrypt(&aad, &mhash)?;

        self.channel.stage = KexStage::Established;
        self.channel.txseq += 1;
        self.kex_reset();
        debug!("server session established");
        Ok(Packet { header, body })
    }

    /// Drive the whole exchange over a blocking transport. On failure the
    /// error is reported to the peer best-effort, the transport is closed,
    /// and the state disposed.
    pub fn key_exchange<T: Transport>(&mut self, transport: &mut T) -> Result<(), SkdpError> {
        match self.run_kex(transport) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, "server key exchange failed");
                channel::send_error(transport, err);
                transport.close();
                self.dispose();
                Err(err)
            }
        }
    }

    fn run_kex<T: Transport>(&mut self, transport: &mut T) -> Result<(), SkdpError> {
        let mut buf = vec![0u8; CONNECT_REQUEST_PACKET_SIZE];
        transport
            .recv_exact(&mut buf)
            .map_err(|_| SkdpError::ConnectionFailure)?;
        let request = Packet::from_bytes(&buf)?;
        let response = self.connect_response(&request)?;
        transport.send_all(&response.to_bytes())?;

        let mut buf = vec![0u8; EXCHANGE_REQUEST_PACKET_SIZE];
        transport.recv_exact(&mut buf)?;
        let request = Packet::from_bytes(&buf)?;
        let response = self.exchange_response(&request)?;
        transport.send_all(&response.to_bytes())?;

        let mut buf = vec![0u8; ESTABLISH_REQUEST_PACKET_SIZE];
        transport.recv_exact(&mut buf)?;
        let request = Packet::from_bytes(&buf)?;
        let response = self.establish_response(&request)?;
        transport.send_all(&response.to_bytes())?;
        Ok(())
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
        self.did.zeroize();
        self.sdk.zeroize();
        self.dsh.zeroize();
        self.ssh.zeroize();
        self.expiration = 0;
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.dispose();
    }
}
