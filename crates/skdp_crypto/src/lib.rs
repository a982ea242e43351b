//! skdp_crypto — SKDP cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Derivations are pure functions; the only stateful object is the
//!   per-direction cipher.
//!
//! # Module layout
//! - `sponge` — cSHAKE-256 / KMAC-256 / SHA3-512 adapters over one Keccak crate
//! - `cipher` — per-direction authenticated stream state (XChaCha20-Poly1305)
//! - `kdf`    — the pre-shared key hierarchy: master → server → device → session
//! - `keys`   — provisioning records binding expiration + key identity + secret
//! - `error`  — unified error type

pub mod cipher;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod sponge;

pub use error::CryptoError;
