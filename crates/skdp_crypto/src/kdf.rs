//! The SKDP key hierarchy.
//!
//! ```text
//! master → server:   SDK = cSHAKE-256(MDK, config, MID || SID)
//! server → device:   DDK = cSHAKE-256(SDK, config, KID)
//! device → session:  keystream = cSHAKE-256(DDK, "", session-hash)
//!                    direction = cSHAKE-256(token, "", session-hash)
//! ```
//!
//! The configuration string is the cSHAKE function name on the two static
//! derivations, so keys issued under different suites never collide. The
//! session-hash customization binds every session-level output to the exact
//! connect-exchange bytes of one direction.

use zeroize::{Zeroizing, ZeroizeOnDrop};

use crate::cipher::{CIPHER_KEY_SIZE, CIPHER_NONCE_SIZE};
use crate::sponge;

/// Width of the master, server, and device derivation keys.
pub const DERIVATION_KEY_SIZE: usize = 32;

/// Width of the device and server session tokens.
pub const TOKEN_SIZE: usize = 32;

/// Width of the KMAC key drawn behind the token keystream.
pub const MAC_KEY_SIZE: usize = 32;

/// Token-XOR stream plus the MAC key, squeezed in one pass.
pub const TOKEN_STREAM_SIZE: usize = TOKEN_SIZE + MAC_KEY_SIZE;

/// Derive a server derivation key from the master key.
///
/// `server_id` is the MID || SID prefix of the server's key identity.
pub fn derive_server_key(
    mdk: &[u8],
    config: &[u8],
    server_id: &[u8],
) -> Zeroizing<[u8; DERIVATION_KEY_SIZE]> {
    let mut sdk = Zeroizing::new([0u8; DERIVATION_KEY_SIZE]);
    sponge::xof_extract(mdk, config, server_id, sdk.as_mut());
    sdk
}

/// Derive a device derivation key from a server key and the device's full
/// 16-byte key identity.
pub fn derive_device_key(
    sdk: &[u8],
    config: &[u8],
    kid: &[u8],
) -> Zeroizing<[u8; DERIVATION_KEY_SIZE]> {
    let mut ddk = Zeroizing::new([0u8; DERIVATION_KEY_SIZE]);
    sponge::xof_extract(sdk, config, kid, ddk.as_mut());
    ddk
}

/// Expand the device key into the token-encryption stream and the MAC key
/// for one exchange message, bound to that direction's session hash.
pub fn token_keystream(ddk: &[u8], session_hash: &[u8]) -> Zeroizing<[u8; TOKEN_STREAM_SIZE]> {
    let mut prnd = Zeroizing::new([0u8; TOKEN_STREAM_SIZE]);
    sponge::xof_extract(ddk, b"", session_hash, prnd.as_mut());
    prnd
}

/// Cipher key and base nonce for one tunnel direction.
#[derive(ZeroizeOnDrop)]
pub struct DirectionKeys {
    pub key: [u8; CIPHER_KEY_SIZE],
    pub nonce: [u8; CIPHER_NONCE_SIZE],
}

/// Derive one direction's cipher keying material from its session token and
/// session hash. Which hash is used is what binds the direction.
pub fn derive_direction_keys(token: &[u8], session_hash: &[u8]) -> DirectionKeys {
    let mut okm = Zeroizing::new([0u8; CIPHER_KEY_SIZE + CIPHER_NONCE_SIZE]);
    sponge::xof_extract(token, b"", session_hash, okm.as_mut());
    let mut keys = DirectionKeys {
        key: [0u8; CIPHER_KEY_SIZE],
        nonce: [0u8; CIPHER_NONCE_SIZE],
    };
    keys.key.copy_from_slice(&okm[..CIPHER_KEY_SIZE]);
    keys.nonce.copy_from_slice(&okm[CIPHER_KEY_SIZE..]);
    keys
}
