//! AES-256-GCM seal/open with a detached tag
//!
//! Block format on the wire:
//! ```text
//! [associated data][ciphertext][16 bytes: GCM tag]
//! ```
//! The associated data is the block's cleartext header, so every header
//! field (length, type, nonce, EnScrypt parameters, ...) is authenticated.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use sqrl_core::{SqrlError, SqrlResult, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use zeroize::{Zeroize, Zeroizing};

/// The tag did not verify: wrong key, wrong associated data, or tampering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagMismatch;

/// Encrypt `plaintext` and authenticate it together with `aad`.
///
/// Returns `(ciphertext, tag)`; the ciphertext is the same length as the
/// plaintext.
pub fn seal(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> SqrlResult<(Vec<u8>, [u8; TAG_SIZE])> {
    let cipher = Aes256Gcm::new(key.into());
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), aad, &mut buffer)
        .map_err(|e| {
            buffer.zeroize();
            SqrlError::Encoding(format!("AES-256-GCM seal failed: {e}"))
        })?;
    Ok((buffer, tag.into()))
}

/// Verify and decrypt. Never returns partial plaintext.
pub fn open(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    aad: &[u8],
    tag: &[u8; TAG_SIZE],
) -> Result<Zeroizing<Vec<u8>>, TagMismatch> {
    let cipher = Aes256Gcm::new(key.into());
    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    cipher
        .decrypt_in_place_detached(Nonce::from_slice(nonce), aad, &mut buffer, Tag::from_slice(tag))
        .map_err(|_| TagMismatch)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_SIZE] = [0x42; KEY_SIZE];
    const NONCE: [u8; NONCE_SIZE] = [7; NONCE_SIZE];

    #[test]
    fn test_seal_open_roundtrip() {
        let (ct, tag) = seal(&KEY, &NONCE, b"hello, sealed world!", b"header").unwrap();
        let pt = open(&KEY, &NONCE, &ct, b"header", &tag).unwrap();
        assert_eq!(pt.as_slice(), b"hello, sealed world!");
    }

    #[test]
    fn test_ciphertext_is_plaintext_sized() {
        let (ct, _) = seal(&KEY, &NONCE, &[0u8; 64], b"").unwrap();
        assert_eq!(ct.len(), 64);
    }

    #[test]
    fn test_empty_plaintext() {
        let (ct, tag) = seal(&KEY, &NONCE, b"", b"ad").unwrap();
        assert!(ct.is_empty());
        assert!(open(&KEY, &NONCE, &ct, b"ad", &tag).unwrap().is_empty());
    }

    #[test]
    fn test_open_wrong_key() {
        let (ct, tag) = seal(&KEY, &NONCE, b"secret data", b"ad").unwrap();
        let result = open(&[0x43; KEY_SIZE], &NONCE, &ct, b"ad", &tag);
        assert_eq!(result.unwrap_err(), TagMismatch);
    }

    #[test]
    fn test_open_wrong_aad() {
        let (ct, tag) = seal(&KEY, &NONCE, b"secret data", b"ad-1").unwrap();
        assert!(open(&KEY, &NONCE, &ct, b"ad-2", &tag).is_err(), "AAD mismatch must fail");
    }

    #[test]
    fn test_open_wrong_nonce() {
        let (ct, tag) = seal(&KEY, &NONCE, b"secret data", b"").unwrap();
        assert!(open(&KEY, &[8; NONCE_SIZE], &ct, b"", &tag).is_err());
    }

    #[test]
    fn test_tampered_ciphertext() {
        let (mut ct, tag) = seal(&KEY, &NONCE, b"secret data", b"").unwrap();
        ct[3] ^= 0xFF;
        assert!(open(&KEY, &NONCE, &ct, b"", &tag).is_err(), "tampered ciphertext must fail");
    }

    #[test]
    fn test_tampered_tag() {
        let (ct, mut tag) = seal(&KEY, &NONCE, b"secret data", b"").unwrap();
        tag[15] ^= 1;
        assert!(open(&KEY, &NONCE, &ct, b"", &tag).is_err());
    }
}
