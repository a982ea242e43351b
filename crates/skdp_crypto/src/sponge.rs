//! Sponge-family adapters: cSHAKE-256, KMAC-256, SHA3-512.
//!
//! Every derivation, MAC, and digest in the protocol runs over the same
//! Keccak permutation; these helpers fix the variant in one place so the
//! rest of the crate never names an algorithm.

use subtle::ConstantTimeEq;
use tiny_keccak::{CShake, Hasher, Kmac, Sha3, Xof};

/// SHA3-512 digest length; session hashes use the full width.
pub const HASH_SIZE: usize = 64;

/// cSHAKE-256 extraction: absorb `key`, domain-separated by the function
/// `name` and the `custom` string, squeeze `out.len()` bytes.
///
/// With both `name` and `custom` empty this degenerates to SHAKE-256,
/// as the standard defines.
pub fn xof_extract(key: &[u8], name: &[u8], custom: &[u8], out: &mut [u8]) {
    let mut xof = CShake::v256(name, custom);
    xof.update(key);
    xof.squeeze(out);
}

/// KMAC-256 over `chunks` under `key`, customized by `custom`.
///
/// The output length is encoded into the MAC input, so a truncated tag is
/// a different function, not a prefix of a longer one.
pub fn mac_tag(key: &[u8], custom: &[u8], chunks: &[&[u8]], tag: &mut [u8]) {
    let mut kmac = Kmac::v256(key, custom);
    for chunk in chunks {
        kmac.update(chunk);
    }
    kmac.finalize(tag);
}

/// SHA3-512 digest of `msg`.
pub fn hash(msg: &[u8]) -> [u8; HASH_SIZE] {
    let mut sha3 = Sha3::v512();
    let mut out = [0u8; HASH_SIZE];
    sha3.update(msg);
    sha3.finalize(&mut out);
    out
}

/// Constant-time equality for tags and hashes.
///
/// Slices of unequal length compare unequal without inspecting contents.
pub fn ct_equal(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha3_512_empty_vector() {
        // FIPS 202 test vector for SHA3-512("").
        let expected = hex::decode(
            "a69f73cca23a9ac5c8b567dc185a756e97c982164fe25859e0d1dcc1475c80a6\
             15b2123af1f5f94c11e3e9402c3ac558f500199d95b6d3e301758586281dcd26",
        )
        .unwrap();
        assert_eq!(hash(b"").to_vec(), expected);
    }

    #[test]
    fn xof_is_deterministic() {
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        xof_extract(b"key", b"name", b"custom", &mut a);
        xof_extract(b"key", b"name", b"custom", &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn xof_domain_separation() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        let mut c = [0u8; 32];
        xof_extract(b"key", b"name", b"custom-1", &mut a);
        xof_extract(b"key", b"name", b"custom-2", &mut b);
        xof_extract(b"key", b"other", b"custom-1", &mut c);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn mac_depends_on_key_and_customization() {
        let mut t1 = [0u8; 16];
        let mut t2 = [0u8; 16];
        let mut t3 = [0u8; 16];
        mac_tag(b"key-one", b"cust", &[b"msg"], &mut t1);
        mac_tag(b"key-two", b"cust", &[b"msg"], &mut t2);
        mac_tag(b"key-one", b"diff", &[b"msg"], &mut t3);
        assert_ne!(t1, t2);
        assert_ne!(t1, t3);
    }

    #[test]
    fn mac_chunking_is_transparent() {
        let mut whole = [0u8; 16];
        let mut split = [0u8; 16];
        mac_tag(b"key", b"cust", &[b"hello world"], &mut whole);
        mac_tag(b"key", b"cust", &[b"hello", b" ", b"world"], &mut split);
        assert_eq!(whole, split);
    }

    #[test]
    fn ct_equal_rejects_length_mismatch() {
        assert!(ct_equal(b"abcd", b"abcd"));
        assert!(!ct_equal(b"abcd", b"abce"));
        assert!(!ct_equal(b"abcd", b"abc"));
    }
}
