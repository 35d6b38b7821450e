//! Identity key hierarchy: IUK → (IMK, ILK), plus stretched block keys

use std::fmt;

use ed25519_dalek::SigningKey;
use rand::{CryptoRng, RngCore};
use sqrl_core::{SqrlError, SqrlResult, KEY_SIZE};
use zeroize::Zeroize;

use crate::enhash::enhash;

/// The Identity Unlock Key: the long-term root secret. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityUnlockKey {
    bytes: [u8; KEY_SIZE],
}

impl IdentityUnlockKey {
    /// Generate a random IUK.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> SqrlResult<Self> {
        Ok(Self::from_bytes(key_array("IUK", bytes)?))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// IMK = EnHash(IUK)
    pub fn master_key(&self) -> IdentityMasterKey {
        IdentityMasterKey::from_bytes(enhash(&self.bytes))
    }

    /// ILK: the Ed25519 public key whose seed is the IUK.
    pub fn lock_key(&self) -> IdentityLockKey {
        let signing = SigningKey::from_bytes(&self.bytes);
        IdentityLockKey(signing.verifying_key().to_bytes())
    }
}

impl Drop for IdentityUnlockKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for IdentityUnlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityUnlockKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The Identity Master Key. Protects Previous and Secret blocks. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityMasterKey {
    bytes: [u8; KEY_SIZE],
}

impl IdentityMasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> SqrlResult<Self> {
        Ok(Self::from_bytes(key_array("IMK", bytes)?))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for IdentityMasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for IdentityMasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityMasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The Identity Lock Key. Public: identifies the identity to relying parties.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityLockKey(pub [u8; KEY_SIZE]);

impl IdentityLockKey {
    pub fn from_slice(bytes: &[u8]) -> SqrlResult<Self> {
        Ok(Self(key_array("ILK", bytes)?))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for IdentityLockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityLockKey({})", hex::encode(self.0))
    }
}

impl fmt::Display for IdentityLockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A block encryption key produced by EnScrypt or EnHash. Zeroized on drop.
#[derive(Clone)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

fn key_array(what: &'static str, bytes: &[u8]) -> SqrlResult<[u8; KEY_SIZE]> {
    bytes.try_into().map_err(|_| SqrlError::InvalidInputLength {
        what,
        expected: KEY_SIZE,
        actual: bytes.len(),
    })
}
