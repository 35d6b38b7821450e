//! Type 3: IUKs retired by earlier rekeys, sealed under the current IMK
//!
//! ```text
//! offset size field
//!      0    2 length (6 + 32n + 16)
//!      2    2 blocktype (3)
//!      4    2 edition
//!      6  32n ciphertext: IUK₁ ‖ … ‖ IUKₙ
//!  6+32n   16 tag
//! ```
//!
//! No stretching: this block is only opened once Access or Rescue has
//! already yielded the IMK. The nonce is all zeros; the edition in the
//! associated data changes whenever the key list does.

use sqrl_core::{BlockType, SqrlError, SqrlResult, KEY_SIZE, TAG_SIZE};
use sqrl_crypto::{aead, IdentityMasterKey, IdentityUnlockKey, ZERO_NONCE};
use zeroize::Zeroizing;

use super::{check_frame, read_u16, wire_len, Sealed};

#[derive(Debug, Clone)]
pub struct PreviousBlock {
    edition: u16,
    sealed: Option<Sealed>,
}

impl PreviousBlock {
    pub const BLOCKTYPE: BlockType = BlockType::PREVIOUS;
    pub const AD_LEN: usize = 6;

    /// Seal `keys` under `imk`. `edition` defaults to the number of keys.
    pub fn seal(
        imk: &IdentityMasterKey,
        keys: &[IdentityUnlockKey],
        edition: Option<u16>,
    ) -> SqrlResult<Self> {
        let block_len = wire_len(Self::AD_LEN + keys.len() * KEY_SIZE + TAG_SIZE, "previous block")?;
        let edition = match edition {
            Some(e) => e,
            None => wire_len(keys.len(), "previous key count")?,
        };

        let mut ad = Vec::with_capacity(Self::AD_LEN);
        ad.extend_from_slice(&block_len.to_le_bytes());
        ad.extend_from_slice(&Self::BLOCKTYPE.0.to_le_bytes());
        ad.extend_from_slice(&edition.to_le_bytes());

        let mut plaintext = Zeroizing::new(Vec::with_capacity(keys.len() * KEY_SIZE));
        for key in keys {
            plaintext.extend_from_slice(key.as_bytes());
        }

        let (ciphertext, tag) = aead::seal(imk.as_bytes(), &ZERO_NONCE, &plaintext, &ad)?;
        tracing::debug!(edition, keys = keys.len(), "sealed previous block");
        Ok(Self {
            edition,
            sealed: Some(Sealed { ad, ciphertext, tag }),
        })
    }

    /// Recover the retired IUKs in the order they were sealed.
    pub fn open(&self, imk: &IdentityMasterKey) -> SqrlResult<Vec<IdentityUnlockKey>> {
        let sealed = self.sealed.as_ref().ok_or(SqrlError::NotSealed {
            blocktype: Self::BLOCKTYPE,
        })?;
        let plaintext = aead::open(imk.as_bytes(), &ZERO_NONCE, &sealed.ciphertext, &sealed.ad, &sealed.tag)
            .map_err(|_| SqrlError::AuthenticationFailed {
                blocktype: Self::BLOCKTYPE,
            })?;
        plaintext
            .chunks_exact(KEY_SIZE)
            .map(IdentityUnlockKey::from_slice)
            .collect()
    }

    pub fn load(bytes: &[u8]) -> SqrlResult<Self> {
        check_frame(bytes, Self::BLOCKTYPE)?;
        let overhead = Self::AD_LEN + TAG_SIZE;
        if bytes.len() < overhead || (bytes.len() - overhead) % KEY_SIZE != 0 {
            return Err(SqrlError::corrupt(
                Self::BLOCKTYPE,
                format!("length {} is not 22 + 32n", bytes.len()),
            ));
        }
        Ok(Self {
            edition: read_u16(bytes, 4),
            sealed: Some(Sealed::split(bytes, Self::AD_LEN, Self::BLOCKTYPE)?),
        })
    }

    pub fn edition(&self) -> u16 {
        self.edition
    }

    /// Number of keys held, read from the ciphertext length.
    pub fn key_count(&self) -> usize {
        self.sealed
            .as_ref()
            .map_or(0, |s| s.ciphertext.len() / KEY_SIZE)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.is_some()
    }

    pub(crate) fn sealed(&self) -> Option<&Sealed> {
        self.sealed.as_ref()
    }

    pub fn describe(&self) -> String {
        format!("edition={} keys={}", self.edition, self.key_count())
    }
}
