//! Type 129: a site secret filed under `(path, realm, username)`
//!
//! ```text
//! offset size field
//!      0    2 length
//!      2    2 blocktype (129)
//!      4    2 ad_len
//!      6   12 AES-GCM nonce
//!     18    4 modtime (unix seconds)
//!     22    … path_len u8 ‖ path ‖ realm_len u8 ‖ realm ‖ user_len u8 ‖ user
//! ad_len    … ciphertext
//!  len-16   16 tag
//! ```
//!
//! Each `(path, realm, username)` triple gets its own key, so many secret
//! blocks can share one IMK without sharing a key.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use sqrl_core::{BlockType, SqrlError, SqrlResult, NONCE_SIZE, TAG_SIZE};
use sqrl_crypto::{aead, enhash, DerivedKey, IdentityMasterKey, NoncePolicy};
use zeroize::Zeroizing;

use super::{check_frame, read_u16, read_u32, wire_len, Sealed};

/// Longest string a one-byte length prefix can describe.
pub const MAX_FIELD_LEN: usize = u8::MAX as usize;

/// `EnHash(SHA-256(IMK ‖ len ‖ path ‖ len ‖ realm ‖ len ‖ username))`
pub fn secret_key(imk: &IdentityMasterKey, path: &[u8], realm: &[u8], username: &[u8]) -> DerivedKey {
    let mut hasher = Sha256::new();
    hasher.update(imk.as_bytes());
    for field in [path, realm, username] {
        // make() and load() both bound fields to MAX_FIELD_LEN
        hasher.update([field.len() as u8]);
        hasher.update(field);
    }
    let digest: Zeroizing<[u8; 32]> = Zeroizing::new(hasher.finalize().into());
    DerivedKey::from_bytes(enhash(&digest))
}

#[derive(Debug, Clone)]
pub struct SecretBlock {
    path: Vec<u8>,
    realm: Vec<u8>,
    username: Vec<u8>,
    nonce: Option<[u8; NONCE_SIZE]>,
    modtime: u32,
    nonce_policy: NoncePolicy,
    sealed: Option<Sealed>,
}

impl SecretBlock {
    pub const BLOCKTYPE: BlockType = BlockType::SECRET;
    /// Fixed part of the associated data, before the three strings.
    pub const FIXED_AD_LEN: usize = 22;

    /// An unsealed shell for the given lookup triple.
    pub fn make(path: &str, realm: &str, username: &str) -> SqrlResult<Self> {
        for (what, field) in [("secret path", path), ("secret realm", realm), ("secret username", username)] {
            if field.len() > MAX_FIELD_LEN {
                return Err(SqrlError::InvalidInputLength {
                    what,
                    expected: MAX_FIELD_LEN,
                    actual: field.len(),
                });
            }
        }
        Ok(Self {
            path: path.as_bytes().to_vec(),
            realm: realm.as_bytes().to_vec(),
            username: username.as_bytes().to_vec(),
            nonce: None,
            modtime: 0,
            nonce_policy: NoncePolicy::default(),
            sealed: None,
        })
    }

    pub fn with_nonce_policy(mut self, policy: NoncePolicy) -> Self {
        self.nonce_policy = policy;
        self
    }

    /// An unsealed copy of this entry's triple, keeping the nonce as the
    /// seed for a chained nonce.
    pub fn successor(&self, policy: NoncePolicy) -> Self {
        Self {
            path: self.path.clone(),
            realm: self.realm.clone(),
            username: self.username.clone(),
            nonce: self.nonce,
            modtime: self.modtime,
            nonce_policy: policy,
            sealed: None,
        }
    }

    /// Seal `secret`, stamping the current time.
    pub fn seal<R: RngCore + CryptoRng>(
        self,
        imk: &IdentityMasterKey,
        secret: &[u8],
        rng: &mut R,
    ) -> SqrlResult<Self> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
            .unwrap_or(0);
        self.seal_at(imk, secret, now, rng)
    }

    pub fn seal_at<R: RngCore + CryptoRng>(
        mut self,
        imk: &IdentityMasterKey,
        secret: &[u8],
        modtime: u32,
        rng: &mut R,
    ) -> SqrlResult<Self> {
        let ad_len = self.ad_len();
        let block_len = wire_len(ad_len + secret.len() + TAG_SIZE, "secret block")?;
        let nonce = self.nonce_policy.next_nonce(self.nonce.as_ref(), rng);

        let mut ad = Vec::with_capacity(ad_len);
        ad.extend_from_slice(&block_len.to_le_bytes());
        ad.extend_from_slice(&Self::BLOCKTYPE.0.to_le_bytes());
        ad.extend_from_slice(&(ad_len as u16).to_le_bytes());
        ad.extend_from_slice(&nonce);
        ad.extend_from_slice(&modtime.to_le_bytes());
        for field in [&self.path, &self.realm, &self.username] {
            ad.push(field.len() as u8);
            ad.extend_from_slice(field);
        }

        let key = self.key(imk);
        let (ciphertext, tag) = aead::seal(key.as_bytes(), &nonce, secret, &ad)?;
        self.nonce = Some(nonce);
        self.modtime = modtime;
        self.sealed = Some(Sealed { ad, ciphertext, tag });

        tracing::debug!(modtime, len = secret.len(), "sealed secret block");
        Ok(self)
    }

    pub fn open(&self, imk: &IdentityMasterKey) -> SqrlResult<Zeroizing<Vec<u8>>> {
        let (sealed, nonce) = match (&self.sealed, &self.nonce) {
            (Some(s), Some(n)) => (s, n),
            _ => {
                return Err(SqrlError::NotSealed {
                    blocktype: Self::BLOCKTYPE,
                })
            }
        };
        let key = self.key(imk);
        aead::open(key.as_bytes(), nonce, &sealed.ciphertext, &sealed.ad, &sealed.tag).map_err(|_| {
            SqrlError::AuthenticationFailed {
                blocktype: Self::BLOCKTYPE,
            }
        })
    }

    pub fn load(bytes: &[u8]) -> SqrlResult<Self> {
        check_frame(bytes, Self::BLOCKTYPE)?;
        if bytes.len() < Self::FIXED_AD_LEN + TAG_SIZE {
            return Err(SqrlError::corrupt(
                Self::BLOCKTYPE,
                format!("length {} is below the fixed header", bytes.len()),
            ));
        }
        let ad_len = usize::from(read_u16(bytes, 4));
        if ad_len < Self::FIXED_AD_LEN || ad_len + TAG_SIZE > bytes.len() {
            return Err(SqrlError::corrupt(
                Self::BLOCKTYPE,
                format!("ad_len {ad_len} inconsistent with length {}", bytes.len()),
            ));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[6..18]);
        let modtime = read_u32(bytes, 18);

        let mut strings = &bytes[Self::FIXED_AD_LEN..ad_len];
        let path = take_field(&mut strings)?;
        let realm = take_field(&mut strings)?;
        let username = take_field(&mut strings)?;

        Ok(Self {
            path,
            realm,
            username,
            nonce: Some(nonce),
            modtime,
            nonce_policy: NoncePolicy::default(),
            sealed: Some(Sealed::split(bytes, ad_len, Self::BLOCKTYPE)?),
        })
    }

    pub fn path(&self) -> &[u8] {
        &self.path
    }

    pub fn realm(&self) -> &[u8] {
        &self.realm
    }

    pub fn username(&self) -> &[u8] {
        &self.username
    }

    pub fn modtime(&self) -> u32 {
        self.modtime
    }

    pub fn nonce(&self) -> Option<&[u8; NONCE_SIZE]> {
        self.nonce.as_ref()
    }

    pub fn matches(&self, path: &str, realm: &str, username: &str) -> bool {
        self.path == path.as_bytes() && self.realm == realm.as_bytes() && self.username == username.as_bytes()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.is_some()
    }

    pub(crate) fn sealed(&self) -> Option<&Sealed> {
        self.sealed.as_ref()
    }

    pub fn describe(&self) -> String {
        format!(
            "path={:?} realm={:?} username={:?} modtime={} len={}",
            String::from_utf8_lossy(&self.path),
            String::from_utf8_lossy(&self.realm),
            String::from_utf8_lossy(&self.username),
            self.modtime,
            self.sealed.as_ref().map_or(0, |s| s.ciphertext.len()),
        )
    }

    fn ad_len(&self) -> usize {
        Self::FIXED_AD_LEN + 3 + self.path.len() + self.realm.len() + self.username.len()
    }

    fn key(&self, imk: &IdentityMasterKey) -> DerivedKey {
        secret_key(imk, &self.path, &self.realm, &self.username)
    }
}

/// Pop one length-prefixed string. Missing trailing strings read as empty.
fn take_field(rest: &mut &[u8]) -> SqrlResult<Vec<u8>> {
    let current: &[u8] = *rest;
    let Some((&len, tail)) = current.split_first() else {
        return Ok(Vec::new());
    };
    let len = usize::from(len);
    if len > tail.len() {
        return Err(SqrlError::corrupt(
            SecretBlock::BLOCKTYPE,
            format!("string of {len} bytes overruns associated data"),
        ));
    }
    let (field, tail) = tail.split_at(len);
    *rest = tail;
    Ok(field.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use sqrl_crypto::IdentityUnlockKey;

    fn imk(seed: u64) -> IdentityMasterKey {
        IdentityUnlockKey::generate(&mut StdRng::seed_from_u64(seed)).master_key()
    }

    fn encode(block: &SecretBlock) -> Vec<u8> {
        let mut out = Vec::new();
        Block::Secret(block.clone()).dump(&mut out).unwrap();
        out
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let mut rng = StdRng::seed_from_u64(1);
        let imk = imk(10);
        let block = SecretBlock::make("/login", "example.com", "alice")
            .unwrap()
            .seal(&imk, b"hunter2", &mut rng)
            .unwrap();

        assert_eq!(block.open(&imk).unwrap().as_slice(), b"hunter2");
        assert!(block.modtime() > 0);
    }

    #[test]
    fn test_wire_layout() {
        let mut rng = StdRng::seed_from_u64(1);
        let block = SecretBlock::make("p", "rr", "uuu")
            .unwrap()
            .seal_at(&imk(10), b"0123456789", 1_476_576_000, &mut rng)
            .unwrap();
        let bytes = encode(&block);

        let ad_len = 22 + 3 + 1 + 2 + 3;
        assert_eq!(bytes.len(), ad_len + 10 + 16);
        assert_eq!(&bytes[0..2], &(bytes.len() as u16).to_le_bytes());
        assert_eq!(&bytes[2..4], &129u16.to_le_bytes());
        assert_eq!(&bytes[4..6], &(ad_len as u16).to_le_bytes());
        assert_eq!(&bytes[18..22], &1_476_576_000u32.to_le_bytes());
        assert_eq!(&bytes[22..ad_len], b"\x01p\x02rr\x03uuu");
    }

    #[test]
    fn test_load_then_open() {
        let mut rng = StdRng::seed_from_u64(2);
        let imk = imk(11);
        let block = SecretBlock::make("/", "realm", "bob")
            .unwrap()
            .seal_at(&imk, b"s3cret", 42, &mut rng)
            .unwrap();
        let loaded = SecretBlock::load(&encode(&block)).unwrap();

        assert!(loaded.matches("/", "realm", "bob"));
        assert_eq!(loaded.modtime(), 42);
        assert_eq!(loaded.nonce(), block.nonce());
        assert_eq!(loaded.open(&imk).unwrap().as_slice(), b"s3cret");
        assert_eq!(encode(&loaded), encode(&block));
    }

    #[test]
    fn test_key_depends_on_every_field() {
        let imk = imk(12);
        let base = secret_key(&imk, b"a", b"b", b"c");
        for other in [
            secret_key(&imk, b"x", b"b", b"c"),
            secret_key(&imk, b"a", b"x", b"c"),
            secret_key(&imk, b"a", b"b", b"x"),
            secret_key(&imk, b"ab", b"", b"c"),
            secret_key(&self::imk(13), b"a", b"b", b"c"),
        ] {
            assert_ne!(other.as_bytes(), base.as_bytes());
        }
    }

    #[test]
    fn test_wrong_imk_fails() {
        let mut rng = StdRng::seed_from_u64(3);
        let block = SecretBlock::make("", "", "")
            .unwrap()
            .seal(&imk(1), b"data", &mut rng)
            .unwrap();
        assert!(block.open(&imk(2)).unwrap_err().is_auth_failure());
    }

    #[test]
    fn test_tampered_username_fails() {
        let mut rng = StdRng::seed_from_u64(3);
        let imk = imk(1);
        let block = SecretBlock::make("p", "r", "eve")
            .unwrap()
            .seal(&imk, b"data", &mut rng)
            .unwrap();
        let mut bytes = encode(&block);
        let at = 22 + 2 + 2 + 1;
        bytes[at] = b'E';

        let loaded = SecretBlock::load(&bytes).unwrap();
        assert_eq!(loaded.username(), b"Eve");
        assert!(loaded.open(&imk).unwrap_err().is_auth_failure());
    }

    #[test]
    fn test_make_rejects_long_field() {
        let long = "x".repeat(256);
        let err = SecretBlock::make(&long, "", "").unwrap_err();
        assert!(matches!(err, SqrlError::InvalidInputLength { .. }));
        assert!(SecretBlock::make(&"x".repeat(255), "", "").is_ok());
    }

    #[test]
    fn test_load_tolerates_missing_trailing_strings() {
        // ad_len covers only the path string
        let mut bytes = Vec::new();
        let ad_len: u16 = 22 + 2;
        let len: u16 = ad_len + 16;
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(&129u16.to_le_bytes());
        bytes.extend_from_slice(&ad_len.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 12]);
        bytes.extend_from_slice(&7u32.to_le_bytes());
        bytes.extend_from_slice(&[1, b'p']);
        bytes.extend_from_slice(&[0u8; 16]);

        let loaded = SecretBlock::load(&bytes).unwrap();
        assert_eq!(loaded.path(), b"p");
        assert!(loaded.realm().is_empty());
        assert!(loaded.username().is_empty());
    }

    #[test]
    fn test_load_rejects_overrunning_string() {
        let mut rng = StdRng::seed_from_u64(4);
        let block = SecretBlock::make("path", "", "")
            .unwrap()
            .seal(&imk(1), b"", &mut rng)
            .unwrap();
        let mut bytes = encode(&block);
        bytes[22] = 200;
        assert!(matches!(
            SecretBlock::load(&bytes).unwrap_err(),
            SqrlError::CorruptBlock { .. }
        ));
    }

    #[test]
    fn test_load_rejects_bad_ad_len() {
        let mut rng = StdRng::seed_from_u64(4);
        let block = SecretBlock::make("a", "b", "c")
            .unwrap()
            .seal(&imk(1), b"xyz", &mut rng)
            .unwrap();
        let good = encode(&block);

        let mut small = good.clone();
        small[4..6].copy_from_slice(&21u16.to_le_bytes());
        assert!(SecretBlock::load(&small).unwrap_err().is_format_error());

        let mut large = good;
        let too_big = (large.len() - 15) as u16;
        large[4..6].copy_from_slice(&too_big.to_le_bytes());
        assert!(SecretBlock::load(&large).unwrap_err().is_format_error());
    }

    #[test]
    fn test_chained_reseal() {
        let mut rng = StdRng::seed_from_u64(5);
        let imk = imk(1);
        let first = SecretBlock::make("p", "r", "u")
            .unwrap()
            .seal(&imk, b"one", &mut rng)
            .unwrap();
        let second = first
            .successor(NoncePolicy::Chained)
            .seal(&imk, b"two", &mut rng)
            .unwrap();

        let expected = sqrl_crypto::chain_nonce(first.nonce().unwrap());
        assert_eq!(second.nonce(), Some(&expected));
        assert_eq!(second.open(&imk).unwrap().as_slice(), b"two");
    }
}
