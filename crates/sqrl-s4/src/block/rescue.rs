//! Type 2: rescue-code-protected IUK (singleton)
//!
//! ```text
//! offset size field
//!      0    2 length (73)
//!      2    2 blocktype (2)
//!      4   16 EnScrypt salt
//!     20    1 EnScrypt log_n
//!     21    4 EnScrypt iterations
//!     25   32 ciphertext: IUK
//!     57   16 tag
//! ```
//!
//! The nonce is all zeros: every seal draws a fresh salt, so the key is
//! never reused.

use std::ops::ControlFlow;
use std::time::Duration;

use rand::{CryptoRng, RngCore};
use sqrl_core::{BlockType, SqrlError, SqrlResult, KEY_SIZE, TAG_SIZE};
use sqrl_crypto::{aead, EnScryptParams, EnScryptPolicy, IdentityUnlockKey, ZERO_NONCE};

use super::{check_frame, Sealed};
use crate::encoding::RescueCode;

#[derive(Debug, Clone, Default)]
pub struct RescueBlock {
    params: Option<EnScryptParams>,
    sealed: Option<Sealed>,
}

impl RescueBlock {
    pub const BLOCKTYPE: BlockType = BlockType::RESCUE;
    pub const AD_LEN: usize = 4 + EnScryptParams::ENCODED_LEN;
    pub const BLOCK_LEN: usize = Self::AD_LEN + KEY_SIZE + TAG_SIZE;

    pub fn make() -> Self {
        Self::default()
    }

    pub fn params(&self) -> Option<&EnScryptParams> {
        self.params.as_ref()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.is_some()
    }

    pub(crate) fn sealed(&self) -> Option<&Sealed> {
        self.sealed.as_ref()
    }

    pub fn seal<R: RngCore + CryptoRng>(
        self,
        code: &RescueCode,
        iuk: &IdentityUnlockKey,
        policy: &EnScryptPolicy,
        rng: &mut R,
    ) -> SqrlResult<Self> {
        self.seal_with_progress(code, iuk, policy, rng, None)
    }

    /// Stretch the rescue code per `policy` and seal the IUK under it.
    pub fn seal_with_progress<R: RngCore + CryptoRng>(
        mut self,
        code: &RescueCode,
        iuk: &IdentityUnlockKey,
        policy: &EnScryptPolicy,
        rng: &mut R,
        progress: Option<&mut dyn FnMut(u32, Duration) -> ControlFlow<()>>,
    ) -> SqrlResult<Self> {
        let (params, key) =
            EnScryptParams::calibrate(code.expose_digits().as_bytes(), policy, rng, progress)?;

        let mut ad = Vec::with_capacity(Self::AD_LEN);
        ad.extend_from_slice(&(Self::BLOCK_LEN as u16).to_le_bytes());
        ad.extend_from_slice(&Self::BLOCKTYPE.0.to_le_bytes());
        params.encode_into(&mut ad);

        let (ciphertext, tag) = aead::seal(key.as_bytes(), &ZERO_NONCE, iuk.as_bytes(), &ad)?;
        self.params = Some(params);
        self.sealed = Some(Sealed { ad, ciphertext, tag });

        tracing::debug!(
            log_n = params.log_n,
            iterations = params.iterations,
            "sealed rescue block"
        );
        Ok(self)
    }

    pub fn open(&self, code: &RescueCode) -> SqrlResult<IdentityUnlockKey> {
        self.open_with_progress(code, None)
    }

    /// [`Self::open`] reporting each EnScrypt round to `progress`.
    pub fn open_with_progress(
        &self,
        code: &RescueCode,
        progress: Option<&mut dyn FnMut(u32, Duration) -> ControlFlow<()>>,
    ) -> SqrlResult<IdentityUnlockKey> {
        let (sealed, params) = match (&self.sealed, &self.params) {
            (Some(s), Some(p)) => (s, p),
            _ => {
                return Err(SqrlError::NotSealed {
                    blocktype: Self::BLOCKTYPE,
                })
            }
        };

        let key = params.derive_with_progress(code.expose_digits().as_bytes(), progress)?;
        let plaintext = aead::open(key.as_bytes(), &ZERO_NONCE, &sealed.ciphertext, &sealed.ad, &sealed.tag)
            .map_err(|_| SqrlError::AuthenticationFailed {
                blocktype: Self::BLOCKTYPE,
            })?;
        IdentityUnlockKey::from_slice(&plaintext)
    }

    pub fn load(bytes: &[u8]) -> SqrlResult<Self> {
        check_frame(bytes, Self::BLOCKTYPE)?;
        if bytes.len() != Self::BLOCK_LEN {
            return Err(SqrlError::corrupt(
                Self::BLOCKTYPE,
                format!("length {} (expected {})", bytes.len(), Self::BLOCK_LEN),
            ));
        }
        let params = EnScryptParams::decode(&bytes[4..Self::AD_LEN])
            .map_err(|reason| SqrlError::corrupt(Self::BLOCKTYPE, reason))?;
        Ok(Self {
            params: Some(params),
            sealed: Some(Sealed::split(bytes, Self::AD_LEN, Self::BLOCKTYPE)?),
        })
    }

    pub fn describe(&self) -> String {
        match &self.params {
            Some(params) => format!(
                "salt={} log_n={} iterations={}",
                hex::encode(params.salt),
                params.log_n,
                params.iterations
            ),
            None => "unsealed".to_string(),
        }
    }
}
