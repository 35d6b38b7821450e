pub mod config;
pub mod error;
pub mod types;

pub use error::{SqrlError, SqrlResult};
pub use types::{BlockType, KEY_SIZE, MAX_LOG_N, NONCE_SIZE, SALT_SIZE, TAG_SIZE};
