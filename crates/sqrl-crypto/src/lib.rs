//! sqrl-crypto: the primitives behind an SQRL identity container
//!
//! Key hierarchy:
//! ```text
//! Identity Unlock Key (IUK, 256-bit random, long-term root secret)
//!   ├── Identity Lock Key (ILK) = Ed25519 public key for seed IUK
//!   └── Identity Master Key (IMK) = EnHash(IUK)
//!         ├── Previous block key = IMK (zero nonce, edition in AAD)
//!         └── Secret block key = EnHash(SHA-256(IMK ‖ path ‖ realm ‖ username))
//!
//! password    ──EnScrypt(salt, log_n, iterations)──▶ Access block key  (IMK ‖ ILK)
//! rescue code ──EnScrypt(salt, log_n, iterations)──▶ Rescue block key  (IUK)
//! ```
//!
//! Every seal is AES-256-GCM with a 96-bit nonce and a 128-bit tag; the
//! block's cleartext header is the associated data.

pub mod aead;
pub mod enhash;
pub mod enscrypt;
pub mod keys;
pub mod nonce;

pub use aead::{open, seal, TagMismatch};
pub use enhash::{enhash, enhash_bytes};
pub use enscrypt::{enscrypt, enscrypt_with_progress, EnScryptOutput, EnScryptParams, EnScryptPolicy};
pub use keys::{DerivedKey, IdentityLockKey, IdentityMasterKey, IdentityUnlockKey};
pub use nonce::{chain_nonce, NoncePolicy, ZERO_NONCE};

pub use sqrl_core::{KEY_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE};
