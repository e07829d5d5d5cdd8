//! Kernel-module signature verification
//!
//! A bounded public-key ring, a loading policy, and the verifier. A
//! signature records the signing key id, the module hash, and an
//! HMAC-SHA-256 tag over that hash; verification recomputes both and
//! compares in constant time. Policy decides what happens to unsigned
//! modules; the strict policy additionally requires the signing key to be
//! in the trust store.

use alloc::vec::Vec;

use core::sync::atomic::{AtomicU64, Ordering};

use spin::RwLock;

use crate::crypto::{digests_equal, hmac_sha256, sha256, DIGEST_LEN};
use crate::error::{KernelResult, MacError};

use super::audit::{self, AuditKind};
use super::context::Name32;

/// Maximum keys in the ring.
pub const MAX_KEYS: usize = 16;

/// Bytes of key material per ring entry.
pub const KEY_LEN: usize = 32;

/// Module-loading signature policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningPolicy {
    /// Signatures are not consulted.
    None,
    /// Unsigned modules need CAP_SYS_MODULE; signed modules are verified.
    Optional,
    /// Every module must carry a valid signature.
    Required,
    /// Like `Required`, and the signing key must be in the trust store.
    Strict,
}

/// One ring entry.
#[derive(Debug, Clone, Copy)]
pub struct PublicKey {
    /// Key identifier carried in signatures.
    pub id: u64,
    /// Key material.
    pub key: [u8; KEY_LEN],
    /// Human-readable owner name.
    pub name: Name32,
    /// Whether the key is in the trust store (required by `Strict`).
    pub trusted: bool,
    /// Revoked keys stay in the ring but verify nothing.
    pub revoked: bool,
}

/// A detached module signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleSignature {
    /// Id of the signing key.
    pub key_id: u64,
    /// SHA-256 of the module body.
    pub module_hash: [u8; DIGEST_LEN],
    /// HMAC-SHA-256 tag over the module hash under the signing key.
    pub tag: [u8; DIGEST_LEN],
}

impl ModuleSignature {
    /// Sign `module` with `key` (build-time helper and test fixture).
    pub fn create(module: &[u8], key: &PublicKey) -> Self {
        let module_hash = sha256(module);
        Self {
            key_id: key.id,
            module_hash,
            tag: hmac_sha256(&key.key, &module_hash),
        }
    }
}

/// Bounded set of verification keys.
pub struct PublicKeyRing {
    keys: RwLock<Vec<PublicKey>>,
}

impl PublicKeyRing {
    /// An empty ring.
    pub const fn new() -> Self {
        Self {
            keys: RwLock::new(Vec::new()),
        }
    }

    /// Add a key. Fails with `TooManyRules` when the ring is full.
    pub fn add_key(&self, key: PublicKey) -> KernelResult<()> {
        let mut keys = self.keys.write();
        if keys.len() >= MAX_KEYS {
            return Err(MacError::TooManyRules.into());
        }
        keys.push(key);
        Ok(())
    }

    /// Find a key by id.
    pub fn find(&self, id: u64) -> Option<PublicKey> {
        self.keys.read().iter().find(|k| k.id == id).copied()
    }

    /// Mark a key revoked.
    pub fn revoke(&self, id: u64) -> KernelResult<()> {
        let mut keys = self.keys.write();
        match keys.iter_mut().find(|k| k.id == id) {
            Some(key) => {
                key.revoked = true;
                Ok(())
            }
            None => Err(MacError::KeyNotFound.into()),
        }
    }

    /// Number of keys in the ring.
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

impl Default for PublicKeyRing {
    fn default() -> Self {
        Self::new()
    }
}

/// The module verifier.
pub struct ModuleVerifier {
    /// Verification keys.
    pub keyring: PublicKeyRing,
    policy: RwLock<SigningPolicy>,
    verified: AtomicU64,
    failed: AtomicU64,
    unsigned: AtomicU64,
}

impl ModuleVerifier {
    /// A verifier with the given initial policy and an empty ring.
    pub const fn new(policy: SigningPolicy) -> Self {
        Self {
            keyring: PublicKeyRing::new(),
            policy: RwLock::new(policy),
            verified: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            unsigned: AtomicU64::new(0),
        }
    }

    /// Current policy.
    pub fn policy(&self) -> SigningPolicy {
        *self.policy.read()
    }

    /// Change the policy.
    pub fn set_policy(&self, policy: SigningPolicy) {
        *self.policy.write() = policy;
    }

    /// Verify `module` against its (optional) signature. `cap_sys_module`
    /// reflects the loading process's capability.
    pub fn verify_module(
        &self,
        module: &[u8],
        signature: Option<&ModuleSignature>,
        cap_sys_module: bool,
    ) -> KernelResult<()> {
        let policy = self.policy();

        let Some(sig) = signature else {
            self.unsigned.fetch_add(1, Ordering::Relaxed);
            return match policy {
                SigningPolicy::None => Ok(()),
                SigningPolicy::Optional if cap_sys_module => Ok(()),
                _ => Err(self.reject(MacError::SignatureRequired)),
            };
        };

        let Some(key) = self.keyring.find(sig.key_id) else {
            return Err(self.reject(MacError::KeyNotFound));
        };
        if key.revoked {
            return Err(self.reject(MacError::KeyMismatch));
        }
        if policy == SigningPolicy::Strict && !key.trusted {
            return Err(self.reject(MacError::KeyMismatch));
        }

        let module_hash = sha256(module);
        if !digests_equal(&module_hash, &sig.module_hash) {
            return Err(self.reject(MacError::HashMismatch));
        }

        let expected_tag = hmac_sha256(&key.key, &sig.module_hash);
        if !digests_equal(&expected_tag, &sig.tag) {
            return Err(self.reject(MacError::InvalidSignature));
        }

        self.verified.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// (verified, failed, unsigned) counters.
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.verified.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.unsigned.load(Ordering::Relaxed),
        )
    }

    fn reject(&self, error: MacError) -> crate::error::KernelError {
        self.failed.fetch_add(1, Ordering::Relaxed);
        audit::record(AuditKind::ModuleRejected, error as i64, 0);
        error.into()
    }
}
