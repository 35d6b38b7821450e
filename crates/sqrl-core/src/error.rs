use thiserror::Error;

use crate::types::BlockType;

pub type SqrlResult<T> = Result<T, SqrlError>;

#[derive(Debug, Error)]
pub enum SqrlError {
    #[error("bad header: expected \"sqrldata\" or \"SQRLDATA\"")]
    BadHeader,

    #[error("truncated block at offset {offset}: need {needed} bytes, {available} available")]
    TruncatedBlock {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The body of a text-form container is not valid base64url.
    #[error("corrupt text container: {0}")]
    CorruptText(String),

    #[error("corrupt {blocktype} block: {reason}")]
    CorruptBlock {
        blocktype: BlockType,
        reason: String,
    },

    /// Wrong password, wrong key, or tampered data. The caller may retry.
    #[error("authentication failed opening {blocktype} block")]
    AuthenticationFailed { blocktype: BlockType },

    #[error("invalid {what} length: expected {expected} bytes, got {actual}")]
    InvalidInputLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{blocktype} block has not been sealed")]
    NotSealed { blocktype: BlockType },

    #[error("expected a {expected} block, found {actual}")]
    WrongBlockType {
        expected: BlockType,
        actual: BlockType,
    },

    #[error("no {0} block in container")]
    MissingBlock(BlockType),

    #[error("rescue code must contain exactly 24 decimal digits")]
    InvalidRescueCode,

    #[error("password must not be empty")]
    EmptyPassword,

    #[error("invalid EnScrypt parameters: {0}")]
    InvalidParams(String),

    #[error("key stretching cancelled")]
    Cancelled,

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SqrlError {
    /// Structural problems with the container bytes. Always fatal to a load.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            SqrlError::BadHeader
                | SqrlError::TruncatedBlock { .. }
                | SqrlError::CorruptText(_)
                | SqrlError::CorruptBlock { .. }
        )
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SqrlError::AuthenticationFailed { .. })
    }

    pub fn corrupt(blocktype: BlockType, reason: impl Into<String>) -> Self {
        SqrlError::CorruptBlock {
            blocktype,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_errors_are_grouped() {
        assert!(SqrlError::BadHeader.is_format_error());
        assert!(SqrlError::TruncatedBlock {
            offset: 8,
            needed: 73,
            available: 10
        }
        .is_format_error());
        assert!(SqrlError::corrupt(BlockType::ACCESS, "bad ad_len").is_format_error());
        assert!(SqrlError::CorruptText("impossible length 5".into()).is_format_error());
        assert!(!SqrlError::Encoding("seal failed".into()).is_format_error());
        assert!(!SqrlError::AuthenticationFailed {
            blocktype: BlockType::ACCESS
        }
        .is_format_error());
    }

    #[test]
    fn auth_failure_is_distinct_from_corruption() {
        let err = SqrlError::AuthenticationFailed {
            blocktype: BlockType::RESCUE,
        };
        assert!(err.is_auth_failure());
        assert!(!SqrlError::corrupt(BlockType::RESCUE, "short").is_auth_failure());
    }

    #[test]
    fn messages_name_the_block_type() {
        let err = SqrlError::NotSealed {
            blocktype: BlockType::SECRET,
        };
        assert_eq!(err.to_string(), "secret(129) block has not been sealed");
    }
}
