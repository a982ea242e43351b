//! Per-direction authenticated stream cipher.
//!
//! Uses XChaCha20-Poly1305. Key: 32 bytes. Nonce: 24 bytes. Tag: 16 bytes,
//! appended to the ciphertext.
//!
//! Each tunnel direction is keyed exactly once from the exchange output: a
//! key and a base nonce. Every transform consumes the current nonce and then
//! advances it as a little-endian counter, so the two ends of a direction
//! stay in lockstep and a (key, nonce) pair is never reused under a key.
//! The serialized packet header rides as associated data on every call.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use zeroize::{Zeroize, Zeroizing};

use crate::error::CryptoError;

pub const CIPHER_KEY_SIZE: usize = 32;
pub const CIPHER_NONCE_SIZE: usize = 24;
pub const MAC_TAG_SIZE: usize = 16;

/// Whether the state encrypts (transmit channel) or decrypts (receive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherRole {
    Transmit,
    Receive,
}

/// One keyed direction of the tunnel.
pub struct DirectionCipher {
    key: Zeroizing<[u8; CIPHER_KEY_SIZE]>,
    nonce: [u8; CIPHER_NONCE_SIZE],
    role: CipherRole,
}

impl DirectionCipher {
    pub fn new(key: &[u8], nonce: &[u8], role: CipherRole) -> Result<Self, CryptoError> {
        if key.len() != CIPHER_KEY_SIZE || nonce.len() != CIPHER_NONCE_SIZE {
            return Err(CryptoError::InvalidKey(
                "direction key material has the wrong length".into(),
            ));
        }
        let mut k = Zeroizing::new([0u8; CIPHER_KEY_SIZE]);
        k.copy_from_slice(key);
        let mut n = [0u8; CIPHER_NONCE_SIZE];
        n.copy_from_slice(nonce);
        Ok(Self {
            key: k,
            nonce: n,
            role,
        })
    }

    /// Encrypt `plaintext`, appending the 16-byte tag. `aad` is
    /// authenticated but not encrypted. Advances the nonce counter.
    pub fn encrypt(&mut self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.role != CipherRole::Transmit {
            return Err(CryptoError::AeadEncrypt);
        }
        let cipher = XChaCha20Poly1305::new_from_slice(self.key.as_ref())
            .map_err(|_| CryptoError::AeadEncrypt)?;
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&self.nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::AeadEncrypt)?;
        self.advance();
        Ok(ciphertext)
    }

    /// Verify the tag and decrypt. The nonce advances only on success; a
    /// failed transform is session-fatal for the caller, never retried.
    pub fn decrypt(&mut self, aad: &[u8], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if self.role != CipherRole::Receive {
            return Err(CryptoError::AeadDecrypt);
        }
        if ciphertext.len() < MAC_TAG_SIZE {
            return Err(CryptoError::AeadDecrypt);
        }
        let cipher = XChaCha20Poly1305::new_from_slice(self.key.as_ref())
            .map_err(|_| CryptoError::AeadDecrypt)?;
        let plaintext = cipher
            .decrypt(
                XNonce::from_slice(&self.nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::AeadDecrypt)?;
        self.advance();
        Ok(Zeroizing::new(plaintext))
    }

    /// Overwrite the keying material in place.
    pub fn dispose(&mut self) {
        self.key.zeroize();
        self.nonce.zeroize();
    }

    fn advance(&mut self) {
        for b in self.nonce.iter_mut() {
            *b = b.wrapping_add(1);
            if *b != 0 {
                break;
            }
        }
    }
}

impl Drop for DirectionCipher {
    fn drop(&mut self) {
        self.nonce.zeroize();
    }
}
