//! Provisioning key records.
//!
//! A record binds an expiration time and a 16-byte key identity to a secret.
//! The issuing authority holds the master record; each server is provisioned
//! with one server record; each device receives its device record out of
//! band. The identity partitions as `MID(4) || SID(8) || DID(4)`; unused
//! trailing segments are zero at the higher tiers.
//!
//! Records travel as fixed-layout bytes (`expiration LE || kid || secret`)
//! for provisioning transport, and serialize with serde for tooling.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;
use crate::kdf::{self, DERIVATION_KEY_SIZE};

pub const KID_SIZE: usize = 16;
pub const MID_SIZE: usize = 4;
pub const SID_SIZE: usize = 8;
pub const DID_SIZE: usize = 4;

/// The `MID || SID` prefix naming a server within a master domain.
pub const SERVER_ID_SIZE: usize = MID_SIZE + SID_SIZE;

/// Serialized record length, identical for all three tiers.
pub const KEY_RECORD_SIZE: usize = 8 + KID_SIZE + DERIVATION_KEY_SIZE;

/// Master derivation key record, held only by the key-issuing authority.
#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct MasterKeyRecord {
    #[zeroize(skip)]
    pub expiration: u64,
    #[zeroize(skip)]
    pub kid: [u8; KID_SIZE],
    pub mdk: [u8; DERIVATION_KEY_SIZE],
}

/// Server derivation key record.
#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct ServerKeyRecord {
    #[zeroize(skip)]
    pub expiration: u64,
    #[zeroize(skip)]
    pub kid: [u8; KID_SIZE],
    pub sdk: [u8; DERIVATION_KEY_SIZE],
}

/// Device derivation key record.
#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct DeviceKeyRecord {
    #[zeroize(skip)]
    pub expiration: u64,
    #[zeroize(skip)]
    pub kid: [u8; KID_SIZE],
    pub ddk: [u8; DERIVATION_KEY_SIZE],
}

impl MasterKeyRecord {
    /// Draw a fresh master key for the domain `mid`, valid until
    /// `expiration` (seconds since the Unix epoch).
    pub fn generate<R: RngCore>(
        rng: &mut R,
        mid: [u8; MID_SIZE],
        expiration: u64,
    ) -> Result<Self, CryptoError> {
        let mut mdk = [0u8; DERIVATION_KEY_SIZE];
        rng.try_fill_bytes(&mut mdk)
            .map_err(|_| CryptoError::RandomFailure)?;
        let mut kid = [0u8; KID_SIZE];
        kid[..MID_SIZE].copy_from_slice(&mid);
        Ok(Self {
            expiration,
            kid,
            mdk,
        })
    }

    /// Issue the server record for `sid` under this master.
    pub fn derive_server(&self, sid: [u8; SID_SIZE], config: &[u8]) -> ServerKeyRecord {
        let mut kid = [0u8; KID_SIZE];
        kid[..MID_SIZE].copy_from_slice(&self.kid[..MID_SIZE]);
        kid[MID_SIZE..SERVER_ID_SIZE].copy_from_slice(&sid);
        let sdk = kdf::derive_server_key(&self.mdk, config, &kid[..SERVER_ID_SIZE]);
        ServerKeyRecord {
            expiration: self.expiration,
            kid,
            sdk: *sdk,
        }
    }

    pub fn to_bytes(&self) -> [u8; KEY_RECORD_SIZE] {
        serialize_record(self.expiration, &self.kid, &self.mdk)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let (expiration, kid, mdk) = deserialize_record(bytes)?;
        Ok(Self {
            expiration,
            kid,
            mdk,
        })
    }
}

impl ServerKeyRecord {
    /// Issue the device record for `did` under this server. The device key
    /// is bound to the full identity, so the server can recompute it later
    /// from nothing but the identity a device presents.
    pub fn derive_device(&self, did: [u8; DID_SIZE], config: &[u8]) -> DeviceKeyRecord {
        let mut kid = self.kid;
        kid[SERVER_ID_SIZE..].copy_from_slice(&did);
        let ddk = kdf::derive_device_key(&self.sdk, config, &kid);
        DeviceKeyRecord {
            expiration: self.expiration,
            kid,
            ddk: *ddk,
        }
    }

    /// The `MID || SID` prefix this server answers for.
    pub fn server_id(&self) -> &[u8] {
        &self.kid[..SERVER_ID_SIZE]
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expiration
    }

    pub fn to_bytes(&self) -> [u8; KEY_RECORD_SIZE] {
        serialize_record(self.expiration, &self.kid, &self.sdk)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let (expiration, kid, sdk) = deserialize_record(bytes)?;
        Ok(Self {
            expiration,
            kid,
            sdk,
        })
    }
}

impl DeviceKeyRecord {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expiration
    }

    pub fn to_bytes(&self) -> [u8; KEY_RECORD_SIZE] {
        serialize_record(self.expiration, &self.kid, &self.ddk)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let (expiration, kid, ddk) = deserialize_record(bytes)?;
        Ok(Self {
            expiration,
            kid,
            ddk,
        })
    }
}

fn serialize_record(
    expiration: u64,
    kid: &[u8; KID_SIZE],
    secret: &[u8; DERIVATION_KEY_SIZE],
) -> [u8; KEY_RECORD_SIZE] {
    let mut out = [0u8; KEY_RECORD_SIZE];
    out[..8].copy_from_slice(&expiration.to_le_bytes());
    out[8..8 + KID_SIZE].copy_from_slice(kid);
    out[8 + KID_SIZE..].copy_from_slice(secret);
    out
}

fn deserialize_record(
    bytes: &[u8],
) -> Result<(u64, [u8; KID_SIZE], [u8; DERIVATION_KEY_SIZE]), CryptoError> {
    if bytes.len() != KEY_RECORD_SIZE {
        return Err(CryptoError::MalformedRecord(format!(
            "expected {KEY_RECORD_SIZE} bytes, got {}",
            bytes.len()
        )));
    }
    let expiration = u64::from_le_bytes(bytes[..8].try_into().expect("length checked"));
    let mut kid = [0u8; KID_SIZE];
    kid.copy_from_slice(&bytes[8..8 + KID_SIZE]);
    let mut secret = [0u8; DERIVATION_KEY_SIZE];
    secret.copy_from_slice(&bytes[8 + KID_SIZE..]);
    Ok((expiration, kid, secret))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    const CONFIG: &[u8] = b"skdp-xchacha256-keccak256";

    #[test]
    fn issuance_is_deterministic_from_the_master() {
        let master = MasterKeyRecord::generate(&mut OsRng, [1, 2, 3, 4], 4102444800).unwrap();
        let server_a = master.derive_server([9u8; SID_SIZE], CONFIG);
        let server_b = master.derive_server([9u8; SID_SIZE], CONFIG);
        assert_eq!(server_a.sdk, server_b.sdk);
        assert_eq!(server_a.kid, server_b.kid);

        let device_a = server_a.derive_device([7, 7, 7, 7], CONFIG);
        let device_b = server_b.derive_device([7, 7, 7, 7], CONFIG);
        assert_eq!(device_a.ddk, device_b.ddk);
    }

    #[test]
    fn identities_nest() {
        let master = MasterKeyRecord::generate(&mut OsRng, [1, 2, 3, 4], u64::MAX).unwrap();
        let server = master.derive_server([5, 6, 7, 8, 9, 10, 11, 12], CONFIG);
        let device = server.derive_device([13, 14, 15, 16], CONFIG);

        assert_eq!(&server.kid[..MID_SIZE], &[1, 2, 3, 4]);
        assert_eq!(&server.kid[SERVER_ID_SIZE..], &[0, 0, 0, 0]);
        assert_eq!(&device.kid[..SERVER_ID_SIZE], server.server_id());
        assert_eq!(&device.kid[SERVER_ID_SIZE..], &[13, 14, 15, 16]);
    }

    #[test]
    fn record_bytes_roundtrip() {
        let master = MasterKeyRecord::generate(&mut OsRng, [0xA, 0xB, 0xC, 0xD], 1234).unwrap();
        let server = master.derive_server([1u8; SID_SIZE], CONFIG);
        let device = server.derive_device([2u8; DID_SIZE], CONFIG);

        let restored = ServerKeyRecord::from_bytes(&server.to_bytes()).unwrap();
        assert_eq!(restored.expiration, server.expiration);
        assert_eq!(restored.kid, server.kid);
        assert_eq!(restored.sdk, server.sdk);

        let restored = DeviceKeyRecord::from_bytes(&device.to_bytes()).unwrap();
        assert_eq!(restored.ddk, device.ddk);

        assert!(DeviceKeyRecord::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn expiry_is_inclusive() {
        let master = MasterKeyRecord::generate(&mut OsRng, [0u8; MID_SIZE], 1000).unwrap();
        let server = master.derive_server([0u8; SID_SIZE], CONFIG);
        assert!(!server.is_expired(999));
        assert!(server.is_expired(1000));
        assert!(server.is_expired(1001));
    }
}
