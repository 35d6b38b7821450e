//! AES-GCM nonce selection for blocks that get rewritten

use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use sqrl_core::NONCE_SIZE;

/// The fixed nonce used by blocks whose key is never reused (Rescue, Previous).
pub const ZERO_NONCE: [u8; NONCE_SIZE] = [0u8; NONCE_SIZE];

/// How a block picks the nonce for its next seal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NoncePolicy {
    /// 96 fresh random bits on every seal.
    #[default]
    Random,
    /// Derive from the block's previous nonce when it has one. Compatibility
    /// with containers written by older clients only.
    Chained,
}

impl NoncePolicy {
    pub fn from_chained_flag(chained: bool) -> Self {
        if chained {
            NoncePolicy::Chained
        } else {
            NoncePolicy::Random
        }
    }

    pub fn next_nonce<R: RngCore + CryptoRng>(
        self,
        previous: Option<&[u8; NONCE_SIZE]>,
        rng: &mut R,
    ) -> [u8; NONCE_SIZE] {
        match (self, previous) {
            (NoncePolicy::Chained, Some(prev)) => chain_nonce(prev),
            _ => {
                let mut nonce = [0u8; NONCE_SIZE];
                rng.fill_bytes(&mut nonce);
                nonce
            }
        }
    }
}

/// `H[0..12] XOR H[12..24]` with `H = SHA-256(previous)`.
pub fn chain_nonce(previous: &[u8; NONCE_SIZE]) -> [u8; NONCE_SIZE] {
    let h = Sha256::digest(previous);
    let mut nonce = [0u8; NONCE_SIZE];
    for (i, n) in nonce.iter_mut().enumerate() {
        *n = h[i] ^ h[NONCE_SIZE + i];
    }
    nonce
}
