//! Type 1: password-protected access block (singleton)
//!
//! ```text
//! offset size field
//!      0    2 length (125)
//!      2    2 blocktype (1)
//!      4    2 ad_len (45)
//!      6   12 AES-GCM nonce
//!     18   16 EnScrypt salt
//!     34    1 EnScrypt log_n
//!     35    4 EnScrypt iterations
//!     39    2 option flags
//!     41    1 hint length
//!     42    1 password verify seconds
//!     43    2 idle timeout minutes
//!     45   64 ciphertext: IMK ‖ ILK
//!    109   16 tag
//! ```

use std::ops::ControlFlow;
use std::time::Duration;

use rand::{CryptoRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use sqrl_core::{BlockType, SqrlError, SqrlResult, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use sqrl_crypto::{
    aead, EnScryptParams, EnScryptPolicy, IdentityLockKey, IdentityMasterKey, NoncePolicy,
};
use zeroize::Zeroizing;

use super::{check_frame, read_u16, Sealed};

/// Client preferences stored in the clear (but authenticated) next to the keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessOptions {
    pub option_flags: u16,
    pub hint_length: u8,
    pub verify_seconds: u8,
    pub idle_timeout_mins: u16,
}

impl Default for AccessOptions {
    fn default() -> Self {
        Self {
            option_flags: 0x1F,
            hint_length: 6,
            verify_seconds: 1,
            idle_timeout_mins: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccessBlock {
    options: AccessOptions,
    nonce: Option<[u8; NONCE_SIZE]>,
    params: Option<EnScryptParams>,
    nonce_policy: NoncePolicy,
    sealed: Option<Sealed>,
}

impl AccessBlock {
    pub const BLOCKTYPE: BlockType = BlockType::ACCESS;
    pub const AD_LEN: usize = 45;
    pub const PLAINTEXT_LEN: usize = 2 * KEY_SIZE;
    pub const BLOCK_LEN: usize = Self::AD_LEN + Self::PLAINTEXT_LEN + TAG_SIZE;

    /// An unsealed shell carrying only options.
    pub fn make(options: AccessOptions) -> Self {
        Self {
            options,
            nonce: None,
            params: None,
            nonce_policy: NoncePolicy::default(),
            sealed: None,
        }
    }

    pub fn with_nonce_policy(mut self, policy: NoncePolicy) -> Self {
        self.nonce_policy = policy;
        self
    }

    /// An unsealed shell that replaces this block: same options, and the
    /// current nonce kept as the seed for a chained nonce.
    pub fn successor(&self, options: AccessOptions, policy: NoncePolicy) -> Self {
        Self {
            options,
            nonce: self.nonce,
            params: None,
            nonce_policy: policy,
            sealed: None,
        }
    }

    pub fn options(&self) -> &AccessOptions {
        &self.options
    }

    pub fn nonce(&self) -> Option<&[u8; NONCE_SIZE]> {
        self.nonce.as_ref()
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

    /// Stretch `password` per `policy` and seal `IMK ‖ ILK` under it.
    pub fn seal<R: RngCore + CryptoRng>(
        self,
        password: &SecretString,
        imk: &IdentityMasterKey,
        ilk: &IdentityLockKey,
        policy: &EnScryptPolicy,
        rng: &mut R,
    ) -> SqrlResult<Self> {
        self.seal_with_progress(password, imk, ilk, policy, rng, None)
    }

    pub fn seal_with_progress<R: RngCore + CryptoRng>(
        mut self,
        password: &SecretString,
        imk: &IdentityMasterKey,
        ilk: &IdentityLockKey,
        policy: &EnScryptPolicy,
        rng: &mut R,
        progress: Option<&mut dyn FnMut(u32, Duration) -> ControlFlow<()>>,
    ) -> SqrlResult<Self> {
        let password = password.expose_secret().as_bytes();
        if password.is_empty() {
            return Err(SqrlError::EmptyPassword);
        }

        let (params, key) = EnScryptParams::calibrate(password, policy, rng, progress)?;
        let nonce = self.nonce_policy.next_nonce(self.nonce.as_ref(), rng);
        // the header records the time floor this key was actually stretched to
        self.options.verify_seconds = u8::try_from(policy.min_duration.as_secs()).unwrap_or(u8::MAX);
        self.params = Some(params);
        self.nonce = Some(nonce);

        let ad = self.encode_ad(&params, &nonce);
        let mut plaintext = Zeroizing::new(Vec::with_capacity(Self::PLAINTEXT_LEN));
        plaintext.extend_from_slice(imk.as_bytes());
        plaintext.extend_from_slice(ilk.as_bytes());

        let (ciphertext, tag) = aead::seal(key.as_bytes(), &nonce, &plaintext, &ad)?;
        self.sealed = Some(Sealed { ad, ciphertext, tag });

        tracing::debug!(
            log_n = params.log_n,
            iterations = params.iterations,
            "sealed access block"
        );
        Ok(self)
    }

    /// Re-derive the key from `password` and the stored parameters, and
    /// recover `(IMK, ILK)`.
    pub fn open(&self, password: &SecretString) -> SqrlResult<(IdentityMasterKey, IdentityLockKey)> {
        self.open_with_progress(password, None)
    }

    /// [`Self::open`] reporting each EnScrypt round to `progress`.
    pub fn open_with_progress(
        &self,
        password: &SecretString,
        progress: Option<&mut dyn FnMut(u32, Duration) -> ControlFlow<()>>,
    ) -> SqrlResult<(IdentityMasterKey, IdentityLockKey)> {
        let password = password.expose_secret().as_bytes();
        if password.is_empty() {
            return Err(SqrlError::EmptyPassword);
        }
        let not_sealed = SqrlError::NotSealed {
            blocktype: Self::BLOCKTYPE,
        };
        let (sealed, params, nonce) = match (&self.sealed, &self.params, &self.nonce) {
            (Some(s), Some(p), Some(n)) => (s, p, n),
            _ => return Err(not_sealed),
        };

        let key = params.derive_with_progress(password, progress)?;
        let plaintext = aead::open(key.as_bytes(), nonce, &sealed.ciphertext, &sealed.ad, &sealed.tag)
            .map_err(|_| SqrlError::AuthenticationFailed {
                blocktype: Self::BLOCKTYPE,
            })?;

        let (imk, ilk) = plaintext.split_at(KEY_SIZE);
        Ok((IdentityMasterKey::from_slice(imk)?, IdentityLockKey::from_slice(ilk)?))
    }

    /// Parse a whole block; the key-dependent part is left sealed.
    pub fn load(bytes: &[u8]) -> SqrlResult<Self> {
        check_frame(bytes, Self::BLOCKTYPE)?;
        if bytes.len() != Self::BLOCK_LEN {
            return Err(SqrlError::corrupt(
                Self::BLOCKTYPE,
                format!("length {} (expected {})", bytes.len(), Self::BLOCK_LEN),
            ));
        }
        let ad_len = usize::from(read_u16(bytes, 4));
        if ad_len != Self::AD_LEN {
            return Err(SqrlError::corrupt(
                Self::BLOCKTYPE,
                format!("ad_len {ad_len} (expected {})", Self::AD_LEN),
            ));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[6..18]);
        let params = EnScryptParams::decode(&bytes[18..18 + EnScryptParams::ENCODED_LEN])
            .map_err(|reason| SqrlError::corrupt(Self::BLOCKTYPE, reason))?;
        let options = AccessOptions {
            option_flags: read_u16(bytes, 39),
            hint_length: bytes[41],
            verify_seconds: bytes[42],
            idle_timeout_mins: read_u16(bytes, 43),
        };

        Ok(Self {
            options,
            nonce: Some(nonce),
            params: Some(params),
            nonce_policy: NoncePolicy::default(),
            sealed: Some(Sealed::split(bytes, ad_len, Self::BLOCKTYPE)?),
        })
    }

    fn encode_ad(&self, params: &EnScryptParams, nonce: &[u8; NONCE_SIZE]) -> Vec<u8> {
        let mut ad = Vec::with_capacity(Self::AD_LEN);
        ad.extend_from_slice(&(Self::BLOCK_LEN as u16).to_le_bytes());
        ad.extend_from_slice(&Self::BLOCKTYPE.0.to_le_bytes());
        ad.extend_from_slice(&(Self::AD_LEN as u16).to_le_bytes());
        ad.extend_from_slice(nonce);
        params.encode_into(&mut ad);
        ad.extend_from_slice(&self.options.option_flags.to_le_bytes());
        ad.push(self.options.hint_length);
        ad.push(self.options.verify_seconds);
        ad.extend_from_slice(&self.options.idle_timeout_mins.to_le_bytes());
        ad
    }

    pub fn describe(&self) -> String {
        match (&self.nonce, &self.params) {
            (Some(nonce), Some(params)) => format!(
                "nonce={} salt={} log_n={} iterations={} option_flags={:#06x} hint_length={} verify_seconds={} idle_timeout_mins={}",
                hex::encode(nonce),
                hex::encode(params.salt),
                params.log_n,
                params.iterations,
                self.options.option_flags,
                self.options.hint_length,
                self.options.verify_seconds,
                self.options.idle_timeout_mins,
            ),
            _ => "unsealed".to_string(),
        }
    }
}
