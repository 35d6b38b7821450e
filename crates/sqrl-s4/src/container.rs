//! `SqrlData`: an identity container and its lifecycle operations

use std::fmt;
use std::io::Write;
use std::ops::ControlFlow;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use rand::{CryptoRng, RngCore};
use secrecy::SecretString;
use sqrl_core::config::SqrlConfig;
use sqrl_core::{BlockType, SqrlError, SqrlResult};
use sqrl_crypto::{EnScryptPolicy, IdentityLockKey, IdentityMasterKey, IdentityUnlockKey, NoncePolicy};
use zeroize::Zeroizing;

use crate::block::{AccessBlock, AccessOptions, Block, PreviousBlock, RescueBlock, SecretBlock};
use crate::encoding::{encode_b64u, RescueCode};
use crate::ledger::{BlockLedger, BINARY_MAGIC, TEXT_MAGIC};
use crate::registry::BlockRegistry;

/// How many retired IUKs a Previous block keeps.
pub const MAX_PREVIOUS_KEYS: usize = 4;

/// On-disk encoding of a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContainerFormat {
    /// `sqrldata` followed by raw blocks
    #[default]
    Binary,
    /// `SQRLDATA` followed by base64url blocks
    Text,
}

impl FromStr for ContainerFormat {
    type Err = SqrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" | "bin" => Ok(ContainerFormat::Binary),
            "text" | "ascii" => Ok(ContainerFormat::Text),
            other => Err(SqrlError::Config(format!(
                "unknown container format {other:?} (expected \"binary\" or \"text\")"
            ))),
        }
    }
}

/// Parameters for blocks this container seals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentitySettings {
    pub access_options: AccessOptions,
    pub access_policy: EnScryptPolicy,
    pub rescue_policy: EnScryptPolicy,
    pub nonce_policy: NoncePolicy,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        let access_options = AccessOptions::default();
        Self {
            access_options,
            access_policy: EnScryptPolicy::interactive(access_options.verify_seconds),
            rescue_policy: EnScryptPolicy::sensitive(),
            nonce_policy: NoncePolicy::Random,
        }
    }
}

impl IdentitySettings {
    pub fn from_config(config: &SqrlConfig) -> Self {
        let access = &config.access;
        let rescue = &config.rescue;
        Self {
            access_options: AccessOptions {
                option_flags: access.option_flags,
                hint_length: access.hint_length,
                verify_seconds: access.verify_seconds,
                idle_timeout_mins: access.idle_timeout_mins,
            },
            access_policy: EnScryptPolicy {
                log_n: access.log_n,
                min_iterations: access.min_iterations,
                min_duration: Duration::from_secs(u64::from(access.verify_seconds)),
            },
            rescue_policy: EnScryptPolicy {
                log_n: rescue.log_n,
                min_iterations: rescue.min_iterations,
                min_duration: Duration::from_secs(u64::from(rescue.min_seconds)),
            },
            nonce_policy: NoncePolicy::from_chained_flag(config.nonce.chained),
        }
    }
}

/// One row of [`SqrlData::describe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSummary {
    pub index: usize,
    pub blocktype: BlockType,
    pub length: Option<usize>,
    pub deleted: bool,
    pub detail: String,
}

impl fmt::Display for BlockSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.index, self.blocktype)?;
        match self.length {
            Some(len) => write!(f, " len={len}")?,
            None => write!(f, " len=?")?,
        }
        if self.deleted {
            write!(f, " [deleted]")?;
        }
        write!(f, " {}", self.detail)
    }
}

/// A portable identity: a block ledger plus the settings used to reseal it.
#[derive(Debug, Clone, Default)]
pub struct SqrlData {
    ledger: BlockLedger,
    settings: IdentitySettings,
}

impl SqrlData {
    /// An empty container using the standard block registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(mut self, settings: IdentitySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &IdentitySettings {
        &self.settings
    }

    pub fn ledger(&self) -> &BlockLedger {
        &self.ledger
    }

    /// Append a block as-is, honouring the singleton rule.
    pub fn add_block(&mut self, block: impl Into<Block>) -> usize {
        self.ledger.add(block.into())
    }

    // --- encodings ---

    /// Parse either encoding; leading whitespace is ignored.
    ///
    /// Blocks resealed later use [`IdentitySettings::default`]. Use
    /// [`Self::load_with_settings`] to keep a configured policy.
    pub fn load(bytes: &[u8]) -> SqrlResult<Self> {
        Self::load_with_settings(bytes, IdentitySettings::default())
    }

    /// [`Self::load`], resealing with `settings` afterwards.
    pub fn load_with_settings(bytes: &[u8], settings: IdentitySettings) -> SqrlResult<Self> {
        Self::load_with_registry(bytes, BlockRegistry::standard(), settings)
    }

    pub fn load_with_registry(
        bytes: &[u8],
        registry: BlockRegistry,
        settings: IdentitySettings,
    ) -> SqrlResult<Self> {
        let start = bytes
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(bytes.len());
        Ok(Self {
            ledger: BlockLedger::load(&bytes[start..], registry)?,
            settings,
        })
    }

    pub fn from_binary(bytes: &[u8]) -> SqrlResult<Self> {
        if !bytes.starts_with(BINARY_MAGIC) {
            return Err(SqrlError::BadHeader);
        }
        Self::load(bytes)
    }

    pub fn from_text(text: &str) -> SqrlResult<Self> {
        let text = text.trim_start();
        if !text.as_bytes().starts_with(TEXT_MAGIC) {
            return Err(SqrlError::BadHeader);
        }
        Self::load(text.as_bytes())
    }

    pub fn read_from(path: &Path) -> SqrlResult<Self> {
        let bytes = std::fs::read(path)?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "reading identity");
        Self::load(&bytes)
    }

    /// Replace `path` with this container in `format`.
    pub fn write_to(&self, path: &Path, format: ContainerFormat) -> SqrlResult<()> {
        let bytes = match format {
            ContainerFormat::Binary => self.to_binary()?,
            ContainerFormat::Text => self.to_text()?.into_bytes(),
        };
        std::fs::write(path, &bytes)?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), ?format, "wrote identity");
        Ok(())
    }

    pub fn dump<W: Write>(&self, sink: &mut W) -> SqrlResult<()> {
        self.ledger.dump(sink)
    }

    pub fn to_binary(&self) -> SqrlResult<Vec<u8>> {
        self.ledger.to_binary()
    }

    /// `SQRLDATA` followed by the blocks in unpadded base64url.
    pub fn to_text(&self) -> SqrlResult<String> {
        let mut body = Vec::new();
        self.ledger.dump_blocks(&mut body)?;
        let mut text = String::from_utf8_lossy(TEXT_MAGIC).into_owned();
        text.push_str(&encode_b64u(&body));
        Ok(text)
    }

    // --- identity lifecycle ---

    /// Seal a fresh identity: an Access block under `password` and a Rescue
    /// block under `code`, both protecting `iuk`.
    pub fn create<R: RngCore + CryptoRng>(
        password: &SecretString,
        code: &RescueCode,
        iuk: &IdentityUnlockKey,
        settings: IdentitySettings,
        rng: &mut R,
    ) -> SqrlResult<Self> {
        Self::create_with_progress(password, code, iuk, settings, rng, |_, _| ControlFlow::Continue(()))
    }

    /// [`Self::create`] reporting EnScrypt rounds to `progress` (access
    /// stretch first, then rescue).
    pub fn create_with_progress<R, P>(
        password: &SecretString,
        code: &RescueCode,
        iuk: &IdentityUnlockKey,
        settings: IdentitySettings,
        rng: &mut R,
        mut progress: P,
    ) -> SqrlResult<Self>
    where
        R: RngCore + CryptoRng,
        P: FnMut(u32, Duration) -> ControlFlow<()>,
    {
        let (imk, ilk) = (iuk.master_key(), iuk.lock_key());
        let access = AccessBlock::make(settings.access_options)
            .with_nonce_policy(settings.nonce_policy)
            .seal_with_progress(password, &imk, &ilk, &settings.access_policy, rng, Some(&mut progress))?;
        let rescue = RescueBlock::make().seal_with_progress(
            code,
            iuk,
            &settings.rescue_policy,
            rng,
            Some(&mut progress),
        )?;

        let mut data = Self::new().with_settings(settings);
        data.ledger.add(access.into());
        data.ledger.add(rescue.into());
        tracing::info!(ilk = %ilk, "created identity");
        Ok(data)
    }

    pub fn access_block(&self) -> SqrlResult<&AccessBlock> {
        self.ledger
            .get(AccessBlock::BLOCKTYPE)
            .ok_or(SqrlError::MissingBlock(AccessBlock::BLOCKTYPE))?
            .as_access()
    }

    pub fn rescue_block(&self) -> SqrlResult<&RescueBlock> {
        self.ledger
            .get(RescueBlock::BLOCKTYPE)
            .ok_or(SqrlError::MissingBlock(RescueBlock::BLOCKTYPE))?
            .as_rescue()
    }

    /// The newest Previous block, if any.
    pub fn previous_block(&self) -> SqrlResult<Option<&PreviousBlock>> {
        self.ledger
            .get(PreviousBlock::BLOCKTYPE)
            .map(Block::as_previous)
            .transpose()
    }

    pub fn open_access(&self, password: &SecretString) -> SqrlResult<(IdentityMasterKey, IdentityLockKey)> {
        self.open_access_with_progress(password, |_, _| ControlFlow::Continue(()))
    }

    /// [`Self::open_access`] reporting EnScrypt rounds to `progress`. The
    /// round count is read from the container, so untrusted files should be
    /// opened this way with a way to give up.
    pub fn open_access_with_progress<P>(
        &self,
        password: &SecretString,
        mut progress: P,
    ) -> SqrlResult<(IdentityMasterKey, IdentityLockKey)>
    where
        P: FnMut(u32, Duration) -> ControlFlow<()>,
    {
        self.access_block()?.open_with_progress(password, Some(&mut progress))
    }

    pub fn open_rescue(&self, code: &RescueCode) -> SqrlResult<IdentityUnlockKey> {
        self.open_rescue_with_progress(code, |_, _| ControlFlow::Continue(()))
    }

    pub fn open_rescue_with_progress<P>(&self, code: &RescueCode, mut progress: P) -> SqrlResult<IdentityUnlockKey>
    where
        P: FnMut(u32, Duration) -> ControlFlow<()>,
    {
        self.rescue_block()?.open_with_progress(code, Some(&mut progress))
    }

    /// Retired IUKs, newest first. Empty when the identity was never rekeyed.
    pub fn open_previous(&self, imk: &IdentityMasterKey) -> SqrlResult<Vec<IdentityUnlockKey>> {
        match self.previous_block()? {
            Some(block) => block.open(imk),
            None => Ok(Vec::new()),
        }
    }

    pub fn change_password<R: RngCore + CryptoRng>(
        &mut self,
        old: &SecretString,
        new: &SecretString,
        rng: &mut R,
    ) -> SqrlResult<()> {
        self.change_password_with_progress(old, new, rng, |_, _| ControlFlow::Continue(()))
    }

    /// Reseal the Access block under `new`. Options carry over, and so
    /// does the nonce chain when chained nonces are on. `progress` sees the
    /// rounds spent opening the current block, then those spent sealing.
    pub fn change_password_with_progress<R, P>(
        &mut self,
        old: &SecretString,
        new: &SecretString,
        rng: &mut R,
        mut progress: P,
    ) -> SqrlResult<()>
    where
        R: RngCore + CryptoRng,
        P: FnMut(u32, Duration) -> ControlFlow<()>,
    {
        let current = self.access_block()?;
        let (imk, ilk) = current.open_with_progress(old, Some(&mut progress))?;
        let next = current
            .successor(*current.options(), self.settings.nonce_policy)
            .seal_with_progress(new, &imk, &ilk, &self.settings.access_policy, rng, Some(&mut progress))?;
        self.ledger.add(next.into());
        tracing::info!("access password changed");
        Ok(())
    }

    /// Regain access after a forgotten password: open the Rescue block and
    /// seal a new Access block under `new_password`.
    pub fn reset_password_with_rescue<R, P>(
        &mut self,
        code: &RescueCode,
        new_password: &SecretString,
        rng: &mut R,
        mut progress: P,
    ) -> SqrlResult<()>
    where
        R: RngCore + CryptoRng,
        P: FnMut(u32, Duration) -> ControlFlow<()>,
    {
        let iuk = self.rescue_block()?.open_with_progress(code, Some(&mut progress))?;
        let (imk, ilk) = (iuk.master_key(), iuk.lock_key());
        let next = match self.ledger.get(AccessBlock::BLOCKTYPE) {
            Some(block) => {
                let current = block.as_access()?;
                current.successor(*current.options(), self.settings.nonce_policy)
            }
            None => AccessBlock::make(self.settings.access_options).with_nonce_policy(self.settings.nonce_policy),
        };
        let next = next.seal_with_progress(
            new_password,
            &imk,
            &ilk,
            &self.settings.access_policy,
            rng,
            Some(&mut progress),
        )?;
        self.ledger.add(next.into());
        tracing::info!("access password reset from rescue code");
        Ok(())
    }

    /// Replace the identity's root key.
    ///
    /// Opens the Rescue block with `code`, generates a new IUK and rescue
    /// code, and reseals every block: Access under `new_password`, Rescue
    /// under the new code, Previous with the old IUK prepended (at most
    /// [`MAX_PREVIOUS_KEYS`]), and each Secret under the new IMK. Nothing
    /// is changed unless every step succeeds. Returns the new rescue code.
    pub fn rekey<R, P>(
        &mut self,
        code: &RescueCode,
        new_password: &SecretString,
        rng: &mut R,
        mut progress: P,
    ) -> SqrlResult<RescueCode>
    where
        R: RngCore + CryptoRng,
        P: FnMut(u32, Duration) -> ControlFlow<()>,
    {
        let old_iuk = self.rescue_block()?.open_with_progress(code, Some(&mut progress))?;
        let old_imk = old_iuk.master_key();

        let mut retired = self.open_previous(&old_imk)?;
        retired.insert(0, old_iuk);
        retired.truncate(MAX_PREVIOUS_KEYS);

        let iuk = IdentityUnlockKey::generate(rng);
        let new_code = RescueCode::generate(rng);
        let (imk, ilk) = (iuk.master_key(), iuk.lock_key());

        let mut secrets = Vec::new();
        for block in self.ledger.get_all(SecretBlock::BLOCKTYPE) {
            let secret = block.as_secret()?;
            let plaintext = secret.open(&old_imk)?;
            let resealed = secret
                .successor(self.settings.nonce_policy)
                .seal_at(&imk, &plaintext, secret.modtime(), rng)?;
            secrets.push(resealed);
        }

        let options = match self.ledger.get(AccessBlock::BLOCKTYPE) {
            Some(block) => *block.as_access()?.options(),
            None => self.settings.access_options,
        };
        let access = AccessBlock::make(options)
            .with_nonce_policy(self.settings.nonce_policy)
            .seal_with_progress(new_password, &imk, &ilk, &self.settings.access_policy, rng, Some(&mut progress))?;
        let rescue = RescueBlock::make().seal_with_progress(
            &new_code,
            &iuk,
            &self.settings.rescue_policy,
            rng,
            Some(&mut progress),
        )?;
        let previous = PreviousBlock::seal(&imk, &retired, None)?;

        self.ledger.add(access.into());
        self.ledger.add(rescue.into());
        self.ledger.remove_all(PreviousBlock::BLOCKTYPE);
        self.ledger.add(previous.into());
        self.ledger.remove_all(SecretBlock::BLOCKTYPE);
        for secret in secrets {
            self.ledger.add(secret.into());
        }

        tracing::info!(ilk = %ilk, previous_keys = retired.len(), "identity rekeyed");
        Ok(new_code)
    }

    // --- site secrets ---

    /// Store `secret` under `(path, realm, username)`, replacing any entry
    /// with the same triple.
    pub fn add_secret<R: RngCore + CryptoRng>(
        &mut self,
        imk: &IdentityMasterKey,
        path: &str,
        realm: &str,
        username: &str,
        secret: &[u8],
        rng: &mut R,
    ) -> SqrlResult<()> {
        let shell = match self.find_secret(path, realm, username) {
            Some(existing) => existing.successor(self.settings.nonce_policy),
            None => SecretBlock::make(path, realm, username)?.with_nonce_policy(self.settings.nonce_policy),
        };
        let block = shell.seal(imk, secret, rng)?;

        let replaced = self.ledger.remove_if(SecretBlock::BLOCKTYPE, |b| {
            matches!(b, Block::Secret(s) if s.matches(path, realm, username))
        });
        self.ledger.add(block.into());
        tracing::debug!(replaced, "secret stored");
        Ok(())
    }

    /// Newest live secret filed under the triple.
    pub fn find_secret(&self, path: &str, realm: &str, username: &str) -> Option<&SecretBlock> {
        self.secrets()
            .filter(|s| s.matches(path, realm, username))
            .last()
    }

    pub fn open_secret(
        &self,
        imk: &IdentityMasterKey,
        path: &str,
        realm: &str,
        username: &str,
    ) -> SqrlResult<Zeroizing<Vec<u8>>> {
        self.find_secret(path, realm, username)
            .ok_or(SqrlError::MissingBlock(SecretBlock::BLOCKTYPE))?
            .open(imk)
    }

    /// Tombstone the secret filed under the triple. Returns whether one existed.
    pub fn remove_secret(&mut self, path: &str, realm: &str, username: &str) -> bool {
        self.ledger.remove_if(SecretBlock::BLOCKTYPE, |b| {
            matches!(b, Block::Secret(s) if s.matches(path, realm, username))
        }) > 0
    }

    /// Live secret blocks in insertion order.
    pub fn secrets(&self) -> impl Iterator<Item = &SecretBlock> {
        self.ledger.blocks().filter_map(|b| match b {
            Block::Secret(s) => Some(s),
            _ => None,
        })
    }

    /// Every slot, tombstones included, without secret material.
    pub fn describe(&self) -> Vec<BlockSummary> {
        self.ledger
            .entries()
            .iter()
            .enumerate()
            .map(|(index, entry)| BlockSummary {
                index,
                blocktype: entry.block.blocktype(),
                length: entry.block.encoded_len(),
                deleted: entry.deleted,
                detail: entry.block.describe(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fast_settings() -> IdentitySettings {
        let policy = EnScryptPolicy {
            log_n: 4,
            min_iterations: 2,
            min_duration: Duration::ZERO,
        };
        IdentitySettings {
            access_policy: policy,
            rescue_policy: policy,
            ..IdentitySettings::default()
        }
    }

    fn password() -> SecretString {
        SecretString::from("monkey lipstick")
    }

    fn fixture(seed: u64) -> (SqrlData, IdentityUnlockKey, RescueCode, StdRng) {
        let mut rng = StdRng::seed_from_u64(seed);
        let iuk = IdentityUnlockKey::generate(&mut rng);
        let code = RescueCode::generate(&mut rng);
        let data = SqrlData::create(&password(), &code, &iuk, fast_settings(), &mut rng).unwrap();
        (data, iuk, code, rng)
    }

    #[test]
    fn test_settings_from_default_config() {
        let settings = IdentitySettings::from_config(&SqrlConfig::default());
        assert_eq!(settings, IdentitySettings::default());
    }

    #[test]
    fn test_settings_chained_flag() {
        let mut config = SqrlConfig::default();
        config.nonce.chained = true;
        config.rescue.min_seconds = 5;
        let settings = IdentitySettings::from_config(&config);
        assert_eq!(settings.nonce_policy, NoncePolicy::Chained);
        assert_eq!(settings.rescue_policy.min_duration, Duration::from_secs(5));
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("binary".parse::<ContainerFormat>().unwrap(), ContainerFormat::Binary);
        assert_eq!("TEXT".parse::<ContainerFormat>().unwrap(), ContainerFormat::Text);
        assert!("yaml".parse::<ContainerFormat>().is_err());
    }

    #[test]
    fn test_create_has_access_and_rescue() {
        let (data, iuk, code, _) = fixture(1);
        assert_eq!(data.ledger().live_len(), 2);

        let (imk, ilk) = data.open_access(&password()).unwrap();
        assert_eq!(imk, iuk.master_key());
        assert_eq!(ilk, iuk.lock_key());
        assert_eq!(data.open_rescue(&code).unwrap(), iuk);
        assert!(data.open_previous(&imk).unwrap().is_empty());
    }

    #[test]
    fn test_missing_blocks() {
        let data = SqrlData::new();
        assert!(matches!(
            data.open_access(&password()).unwrap_err(),
            SqrlError::MissingBlock(BlockType::ACCESS)
        ));
        let code = RescueCode::parse(&"0".repeat(24)).unwrap();
        assert!(matches!(
            data.open_rescue(&code).unwrap_err(),
            SqrlError::MissingBlock(BlockType::RESCUE)
        ));
    }

    #[test]
    fn test_change_password_tombstones_old_access() {
        let (mut data, iuk, _, mut rng) = fixture(2);
        let new = SecretString::from("correct horse");

        data.change_password(&password(), &new, &mut rng).unwrap();
        assert!(data.open_access(&password()).unwrap_err().is_auth_failure());
        assert_eq!(data.open_access(&new).unwrap().0, iuk.master_key());

        let summary = data.describe();
        assert_eq!(summary.len(), 3);
        assert!(summary[0].deleted);
        assert_eq!(summary[2].blocktype, BlockType::ACCESS);

        let reloaded = SqrlData::load(&data.to_binary().unwrap()).unwrap();
        assert_eq!(reloaded.ledger().len(), 2);
    }

    #[test]
    fn test_change_password_reports_open_then_seal() {
        let (mut data, _, _, mut rng) = fixture(2);
        let mut rounds = Vec::new();
        data.change_password_with_progress(&password(), &SecretString::from("next"), &mut rng, |i, _| {
            rounds.push(i);
            ControlFlow::Continue(())
        })
        .unwrap();
        assert_eq!(rounds, vec![1, 2, 1, 2]);
    }

    #[test]
    fn test_open_access_can_be_cancelled() {
        let (data, _, _, _) = fixture(2);
        let err = data
            .open_access_with_progress(&password(), |_, _| ControlFlow::Break(()))
            .unwrap_err();
        assert!(matches!(err, SqrlError::Cancelled));
    }

    #[test]
    fn test_load_keeps_requested_settings() {
        let (data, _, _, _) = fixture(11);
        let bytes = data.to_binary().unwrap();
        let settings = IdentitySettings {
            nonce_policy: NoncePolicy::Chained,
            ..fast_settings()
        };

        let loaded = SqrlData::load_with_settings(&bytes, settings).unwrap();
        assert_eq!(loaded.settings(), &settings);
        let raw = SqrlData::load_with_registry(&bytes, BlockRegistry::empty(), settings).unwrap();
        assert_eq!(raw.settings(), &settings);
        assert_eq!(SqrlData::load(&bytes).unwrap().settings(), &IdentitySettings::default());
    }

    #[test]
    fn test_change_password_wrong_old_leaves_container_alone() {
        let (mut data, _, _, mut rng) = fixture(3);
        let before = data.to_binary().unwrap();
        let err = data
            .change_password(&SecretString::from("nope"), &SecretString::from("x"), &mut rng)
            .unwrap_err();
        assert!(err.is_auth_failure());
        assert_eq!(data.to_binary().unwrap(), before);
    }

    #[test]
    fn test_reset_password_with_rescue() {
        let (mut data, iuk, code, mut rng) = fixture(4);
        let new = SecretString::from("forgot the old one");
        data.reset_password_with_rescue(&code, &new, &mut rng, |_, _| ControlFlow::Continue(()))
            .unwrap();
        assert_eq!(data.open_access(&new).unwrap().1, iuk.lock_key());
    }

    #[test]
    fn test_rekey_moves_old_key_to_previous() {
        let (mut data, old_iuk, code, mut rng) = fixture(5);
        let mut imk = old_iuk.master_key();
        data.add_secret(&imk, "/", "example.com", "alice", b"hunter2", &mut rng)
            .unwrap();

        let new_password = SecretString::from("rotated");
        let new_code = data
            .rekey(&code, &new_password, &mut rng, |_, _| ControlFlow::Continue(()))
            .unwrap();

        assert!(data.open_rescue(&code).unwrap_err().is_auth_failure());
        let new_iuk = data.open_rescue(&new_code).unwrap();
        assert_ne!(new_iuk, old_iuk);

        imk = data.open_access(&new_password).unwrap().0;
        assert_eq!(imk, new_iuk.master_key());
        assert_eq!(data.open_previous(&imk).unwrap(), vec![old_iuk]);
        assert_eq!(
            data.open_secret(&imk, "/", "example.com", "alice").unwrap().as_slice(),
            b"hunter2"
        );
    }

    #[test]
    fn test_rekey_caps_previous_keys() {
        let (mut data, first_iuk, code, mut rng) = fixture(6);
        let pw = password();
        let mut code = code;
        let mut history = vec![first_iuk];
        for _ in 0..5 {
            code = data
                .rekey(&code, &pw, &mut rng, |_, _| ControlFlow::Continue(()))
                .unwrap();
            history.insert(0, data.open_rescue(&code).unwrap());
        }

        let current = history.remove(0);
        let previous = data.open_previous(&current.master_key()).unwrap();
        assert_eq!(previous.len(), MAX_PREVIOUS_KEYS);
        assert_eq!(previous, history[..MAX_PREVIOUS_KEYS].to_vec());
        assert_eq!(data.ledger().get_all(BlockType::PREVIOUS).len(), 1);
    }

    #[test]
    fn test_secret_replace_and_remove() {
        let (mut data, iuk, _, mut rng) = fixture(7);
        let imk = iuk.master_key();
        data.add_secret(&imk, "p", "r", "u", b"one", &mut rng).unwrap();
        data.add_secret(&imk, "p", "r", "other", b"two", &mut rng).unwrap();
        data.add_secret(&imk, "p", "r", "u", b"three", &mut rng).unwrap();

        assert_eq!(data.secrets().count(), 2);
        assert_eq!(data.open_secret(&imk, "p", "r", "u").unwrap().as_slice(), b"three");
        assert_eq!(data.open_secret(&imk, "p", "r", "other").unwrap().as_slice(), b"two");

        assert!(data.remove_secret("p", "r", "u"));
        assert!(!data.remove_secret("p", "r", "u"));
        assert!(matches!(
            data.open_secret(&imk, "p", "r", "u").unwrap_err(),
            SqrlError::MissingBlock(BlockType::SECRET)
        ));
    }

    #[test]
    fn test_progress_can_cancel_create() {
        let mut rng = StdRng::seed_from_u64(8);
        let iuk = IdentityUnlockKey::generate(&mut rng);
        let code = RescueCode::generate(&mut rng);
        let mut seen = 0;
        let err = SqrlData::create_with_progress(&password(), &code, &iuk, fast_settings(), &mut rng, |i, _| {
            seen = i;
            ControlFlow::Break(())
        })
        .unwrap_err();
        assert!(matches!(err, SqrlError::Cancelled));
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_text_and_binary_forms_agree() {
        let (data, _, _, _) = fixture(9);
        let text = data.to_text().unwrap();
        assert!(text.starts_with("SQRLDATA"));
        assert!(!text.contains('='));

        let from_text = SqrlData::from_text(&format!("\n  {text}\n")).unwrap();
        assert_eq!(from_text.to_binary().unwrap(), data.to_binary().unwrap());
        assert!(SqrlData::from_binary(text.as_bytes()).is_err());
        assert!(SqrlData::from_text("sqrldata").is_err());
    }

    #[test]
    fn test_describe_lines() {
        let (data, _, _, _) = fixture(10);
        let lines: Vec<String> = data.describe().iter().map(ToString::to_string).collect();
        assert!(lines[0].starts_with("#0 access(1) len=125"));
        assert!(lines[1].starts_with("#1 rescue(2) len=73"));
        assert!(lines.iter().all(|l| !l.contains("monkey")));
    }
}
