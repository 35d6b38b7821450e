//! EnHash: 16 chained SHA-256 rounds, XOR-accumulated

use sha2::{Digest, Sha256};
use sqrl_core::{SqrlError, SqrlResult, KEY_SIZE};
use zeroize::Zeroize;

const ROUNDS: usize = 16;

/// Hash `input`, then re-hash the digest 15 more times, returning the XOR of
/// all 16 digests.
pub fn enhash(input: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    let mut round: [u8; KEY_SIZE] = Sha256::digest(input).into();
    let mut acc = round;
    for _ in 1..ROUNDS {
        round = Sha256::digest(round).into();
        for (a, r) in acc.iter_mut().zip(round.iter()) {
            *a ^= r;
        }
    }
    round.zeroize();
    acc
}

/// [`enhash`] over an unchecked slice, for callers holding wire bytes.
pub fn enhash_bytes(input: &[u8]) -> SqrlResult<[u8; KEY_SIZE]> {
    let input: &[u8; KEY_SIZE] = input
        .try_into()
        .map_err(|_| SqrlError::InvalidInputLength {
            what: "EnHash input",
            expected: KEY_SIZE,
            actual: input.len(),
        })?;
    Ok(enhash(input))
}
