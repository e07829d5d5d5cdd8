//! Cryptographic primitives
//!
//! SHA-256 comes from the `sha2` crate; the HMAC construction on top of it
//! is what the module-signing verifier checks tags against.

use sha2::{Digest, Sha256};

/// Size of a SHA-256 digest in bytes.
pub const DIGEST_LEN: usize = 32;

const HMAC_BLOCK_LEN: usize = 64;

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// HMAC-SHA-256 of `message` under `key` (RFC 2104 construction).
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; DIGEST_LEN] {
    let mut block_key = [0u8; HMAC_BLOCK_LEN];
    if key.len() > HMAC_BLOCK_LEN {
        block_key[..DIGEST_LEN].copy_from_slice(&sha256(key));
    } else {
        block_key[..key.len()].copy_from_slice(key);
    }

    let mut inner = [0u8; HMAC_BLOCK_LEN];
    let mut outer = [0u8; HMAC_BLOCK_LEN];
    for i in 0..HMAC_BLOCK_LEN {
        inner[i] = block_key[i] ^ 0x36;
        outer[i] = block_key[i] ^ 0x5C;
    }

    let mut hasher = Sha256::new();
    hasher.update(inner);
    hasher.update(message);
    let inner_digest: [u8; DIGEST_LEN] = hasher.finalize().into();

    let mut hasher = Sha256::new();
    hasher.update(outer);
    hasher.update(inner_digest);
    hasher.finalize().into()
}

/// Constant-time equality for digests.
pub fn digests_equal(a: &[u8; DIGEST_LEN], b: &[u8; DIGEST_LEN]) -> bool {
    let mut diff = 0u8;
    for i in 0..DIGEST_LEN {
        diff |= a[i] ^ b[i];
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // FIPS 180-2 test vector for "abc".
        let digest = sha256(b"abc");
        let expected = [
            0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea, 0x41, 0x41, 0x40, 0xde, 0x5d, 0xae,
            0x22, 0x23, 0xb0, 0x03, 0x61, 0xa3, 0x96, 0x17, 0x7a, 0x9c, 0xb4, 0x10, 0xff, 0x61,
            0xf2, 0x00, 0x15, 0xad,
        ];
        assert_eq!(digest, expected);
    }

    #[test]
    fn hmac_changes_with_key_and_message() {
        let a = hmac_sha256(b"key-one", b"module data");
        let b = hmac_sha256(b"key-two", b"module data");
        let c = hmac_sha256(b"key-one", b"other data");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, hmac_sha256(b"key-one", b"module data"));
    }

    #[test]
    fn digest_comparison() {
        let a = sha256(b"x");
        let mut b = a;
        assert!(digests_equal(&a, &b));
        b[31] ^= 1;
        assert!(!digests_equal(&a, &b));
    }
}
