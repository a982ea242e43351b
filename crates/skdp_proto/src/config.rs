//! Deployment-fixed protocol constants.
//!
//! Both peers must be built with the same values; the configuration string
//! names the algorithm suite and is byte-compared during the connect
//! exchange, never negotiated.

pub use skdp_crypto::cipher::{CIPHER_KEY_SIZE, CIPHER_NONCE_SIZE, MAC_TAG_SIZE};
pub use skdp_crypto::kdf::{DERIVATION_KEY_SIZE, MAC_KEY_SIZE, TOKEN_SIZE};
pub use skdp_crypto::keys::{DID_SIZE, KID_SIZE, MID_SIZE, SERVER_ID_SIZE, SID_SIZE};
pub use skdp_crypto::sponge::HASH_SIZE;

/// ASCII identifier of the fixed algorithm suite.
pub const CONFIG_STRING: &[u8; CONFIG_SIZE] = b"skdp-xchacha256-keccak256";
pub const CONFIG_SIZE: usize = 25;

/// Serialized packet header length.
pub const HEADER_SIZE: usize = 21;

/// Session hashes are full-width SHA3-512 digests.
pub const SESSION_HASH_SIZE: usize = HASH_SIZE;

/// Anti-replay window, seconds either side of the receiver's clock.
pub const PACKET_TIME_THRESHOLD: u64 = 60;

/// Seconds a keep-alive probe may remain unanswered.
pub const KEEPALIVE_TIMEOUT: u64 = 120;
pub const KEEPALIVE_MESSAGE_SIZE: usize = 8;

pub const ERROR_MESSAGE_SIZE: usize = 1;

/// Sequence number reserved for error and terminate packets.
pub const SEQUENCE_TERMINATOR: u64 = u64::MAX;

pub const STOK_SIZE: usize = TOKEN_SIZE;

// Message-body and on-wire packet sizes. Exchange packets are fixed-size;
// the receive side reads exactly these counts during the key exchange.
pub const CONNECT_REQUEST_MESSAGE_SIZE: usize = KID_SIZE + CONFIG_SIZE;
pub const CONNECT_REQUEST_PACKET_SIZE: usize = HEADER_SIZE + CONNECT_REQUEST_MESSAGE_SIZE;

pub const CONNECT_RESPONSE_MESSAGE_SIZE: usize = KID_SIZE + CONFIG_SIZE + STOK_SIZE;
pub const CONNECT_RESPONSE_PACKET_SIZE: usize = HEADER_SIZE + CONNECT_RESPONSE_MESSAGE_SIZE;

pub const EXCHANGE_REQUEST_MESSAGE_SIZE: usize = TOKEN_SIZE + MAC_TAG_SIZE;
pub const EXCHANGE_REQUEST_PACKET_SIZE: usize = HEADER_SIZE + EXCHANGE_REQUEST_MESSAGE_SIZE;

pub const EXCHANGE_RESPONSE_MESSAGE_SIZE: usize = STOK_SIZE + MAC_TAG_SIZE;
pub const EXCHANGE_RESPONSE_PACKET_SIZE: usize = HEADER_SIZE + EXCHANGE_RESPONSE_MESSAGE_SIZE;

pub const ESTABLISH_REQUEST_MESSAGE_SIZE: usize = SESSION_HASH_SIZE + MAC_TAG_SIZE;
pub const ESTABLISH_REQUEST_PACKET_SIZE: usize = HEADER_SIZE + ESTABLISH_REQUEST_MESSAGE_SIZE;

pub const ESTABLISH_RESPONSE_MESSAGE_SIZE: usize = SESSION_HASH_SIZE + MAC_TAG_SIZE;
pub const ESTABLISH_RESPONSE_PACKET_SIZE: usize = HEADER_SIZE + ESTABLISH_RESPONSE_MESSAGE_SIZE;

pub const KEEPALIVE_PACKET_SIZE: usize = HEADER_SIZE + KEEPALIVE_MESSAGE_SIZE;
pub const ERROR_PACKET_SIZE: usize = HEADER_SIZE + ERROR_MESSAGE_SIZE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_sizes_match_the_layout() {
        assert_eq!(CONFIG_STRING.len(), CONFIG_SIZE);
        assert_eq!(CONNECT_REQUEST_PACKET_SIZE, 62);
        assert_eq!(CONNECT_RESPONSE_PACKET_SIZE, 94);
        assert_eq!(EXCHANGE_REQUEST_PACKET_SIZE, 69);
        assert_eq!(EXCHANGE_RESPONSE_PACKET_SIZE, 69);
        assert_eq!(ESTABLISH_REQUEST_PACKET_SIZE, 101);
        assert_eq!(ESTABLISH_RESPONSE_PACKET_SIZE, 101);
        assert_eq!(KEEPALIVE_PACKET_SIZE, 29);
        assert_eq!(ERROR_PACKET_SIZE, 22);
    }
}
