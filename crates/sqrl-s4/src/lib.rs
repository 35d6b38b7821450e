//! sqrl-s4: the S4 identity container
//!
//! A container is a magic header followed by self-describing blocks. Each
//! known block type is sealed independently with AES-256-GCM under a key
//! derived from a password, a rescue code, or the identity master key:
//!
//! | type | block    | key                          | holds         |
//! |------|----------|------------------------------|---------------|
//! | 1    | Access   | EnScrypt(password)           | IMK ‖ ILK     |
//! | 2    | Rescue   | EnScrypt(rescue code)        | IUK           |
//! | 3    | Previous | IMK                          | retired IUKs  |
//! | 129  | Secret   | EnHash(SHA-256(IMK ‖ names)) | site secret   |
//!
//! Blocks of any other type are carried through unchanged.

pub mod block;
pub mod container;
pub mod encoding;
pub mod ledger;
pub mod registry;

pub use block::{AccessBlock, AccessOptions, Block, PreviousBlock, RawBlock, RescueBlock, SecretBlock};
pub use container::{BlockSummary, ContainerFormat, IdentitySettings, SqrlData, MAX_PREVIOUS_KEYS};
pub use encoding::{decode_b64u, encode_b64u, RescueCode};
pub use ledger::{BlockLedger, LedgerEntry, BINARY_MAGIC, TEXT_MAGIC};
pub use registry::{BlockDecoder, BlockRegistry};
