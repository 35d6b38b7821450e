//! Typed S4 blocks
//!
//! Every block starts with `length:u16 LE ‖ blocktype:u16 LE`, where `length`
//! counts the whole block. Sealed blocks continue with the rest of their
//! associated data, then the ciphertext, then a 16-byte GCM tag:
//! ```text
//! [associated data (includes length + type)][ciphertext][16-byte tag]
//! ```
//! Unknown block types are carried as [`RawBlock`] and written back verbatim.

pub mod access;
pub mod previous;
pub mod raw;
pub mod rescue;
pub mod secret;

use std::io::Write;

use sqrl_core::types::BLOCK_HEADER_SIZE;
use sqrl_core::{BlockType, SqrlError, SqrlResult, TAG_SIZE};

pub use access::{AccessBlock, AccessOptions};
pub use previous::PreviousBlock;
pub use raw::RawBlock;
pub use rescue::RescueBlock;
pub use secret::{secret_key, SecretBlock};

/// Any block a container can hold.
#[derive(Debug, Clone)]
pub enum Block {
    Raw(RawBlock),
    Access(AccessBlock),
    Rescue(RescueBlock),
    Previous(PreviousBlock),
    Secret(SecretBlock),
}

impl Block {
    pub fn blocktype(&self) -> BlockType {
        match self {
            Block::Raw(b) => b.blocktype(),
            Block::Access(_) => AccessBlock::BLOCKTYPE,
            Block::Rescue(_) => RescueBlock::BLOCKTYPE,
            Block::Previous(_) => PreviousBlock::BLOCKTYPE,
            Block::Secret(_) => SecretBlock::BLOCKTYPE,
        }
    }

    pub fn is_sealed(&self) -> bool {
        match self {
            Block::Raw(_) => true,
            Block::Access(b) => b.is_sealed(),
            Block::Rescue(b) => b.is_sealed(),
            Block::Previous(b) => b.is_sealed(),
            Block::Secret(b) => b.is_sealed(),
        }
    }

    /// Encoded length, once sealed.
    pub fn encoded_len(&self) -> Option<usize> {
        match self {
            Block::Raw(b) => Some(b.as_bytes().len()),
            Block::Access(b) => b.sealed().map(Sealed::len),
            Block::Rescue(b) => b.sealed().map(Sealed::len),
            Block::Previous(b) => b.sealed().map(Sealed::len),
            Block::Secret(b) => b.sealed().map(Sealed::len),
        }
    }

    /// Write the block's wire encoding. Fails with `NotSealed` for a shell
    /// that was made but never sealed.
    pub fn dump<W: Write>(&self, sink: &mut W) -> SqrlResult<()> {
        match self {
            Block::Raw(b) => {
                sink.write_all(b.as_bytes())?;
                Ok(())
            }
            Block::Access(b) => dump_sealed(b.sealed(), self.blocktype(), sink),
            Block::Rescue(b) => dump_sealed(b.sealed(), self.blocktype(), sink),
            Block::Previous(b) => dump_sealed(b.sealed(), self.blocktype(), sink),
            Block::Secret(b) => dump_sealed(b.sealed(), self.blocktype(), sink),
        }
    }

    /// One line of non-secret detail for inspection tools.
    pub fn describe(&self) -> String {
        match self {
            Block::Raw(b) => b.describe(),
            Block::Access(b) => b.describe(),
            Block::Rescue(b) => b.describe(),
            Block::Previous(b) => b.describe(),
            Block::Secret(b) => b.describe(),
        }
    }

    pub fn as_access(&self) -> SqrlResult<&AccessBlock> {
        match self {
            Block::Access(b) => Ok(b),
            other => Err(wrong_type(AccessBlock::BLOCKTYPE, other)),
        }
    }

    pub fn as_rescue(&self) -> SqrlResult<&RescueBlock> {
        match self {
            Block::Rescue(b) => Ok(b),
            other => Err(wrong_type(RescueBlock::BLOCKTYPE, other)),
        }
    }

    pub fn as_previous(&self) -> SqrlResult<&PreviousBlock> {
        match self {
            Block::Previous(b) => Ok(b),
            other => Err(wrong_type(PreviousBlock::BLOCKTYPE, other)),
        }
    }

    pub fn as_secret(&self) -> SqrlResult<&SecretBlock> {
        match self {
            Block::Secret(b) => Ok(b),
            other => Err(wrong_type(SecretBlock::BLOCKTYPE, other)),
        }
    }
}

fn wrong_type(expected: BlockType, actual: &Block) -> SqrlError {
    SqrlError::WrongBlockType {
        expected,
        actual: actual.blocktype(),
    }
}

fn dump_sealed<W: Write>(sealed: Option<&Sealed>, blocktype: BlockType, sink: &mut W) -> SqrlResult<()> {
    let sealed = sealed.ok_or(SqrlError::NotSealed { blocktype })?;
    sink.write_all(&sealed.ad)?;
    sink.write_all(&sealed.ciphertext)?;
    sink.write_all(&sealed.tag)?;
    Ok(())
}

impl From<RawBlock> for Block {
    fn from(b: RawBlock) -> Self {
        Block::Raw(b)
    }
}

impl From<AccessBlock> for Block {
    fn from(b: AccessBlock) -> Self {
        Block::Access(b)
    }
}

impl From<RescueBlock> for Block {
    fn from(b: RescueBlock) -> Self {
        Block::Rescue(b)
    }
}

impl From<PreviousBlock> for Block {
    fn from(b: PreviousBlock) -> Self {
        Block::Previous(b)
    }
}

impl From<SecretBlock> for Block {
    fn from(b: SecretBlock) -> Self {
        Block::Secret(b)
    }
}

/// The authenticated pieces of a sealed block, exactly as they appear on the
/// wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ad: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

impl Sealed {
    pub fn len(&self) -> usize {
        self.ad.len() + self.ciphertext.len() + TAG_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cut a whole block into `ad | ciphertext | tag`.
    pub(crate) fn split(bytes: &[u8], ad_len: usize, blocktype: BlockType) -> SqrlResult<Self> {
        if ad_len + TAG_SIZE > bytes.len() {
            return Err(SqrlError::corrupt(
                blocktype,
                format!(
                    "associated data ({ad_len} bytes) and tag overrun block length {}",
                    bytes.len()
                ),
            ));
        }
        let ct_end = bytes.len() - TAG_SIZE;
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&bytes[ct_end..]);
        Ok(Self {
            ad: bytes[..ad_len].to_vec(),
            ciphertext: bytes[ad_len..ct_end].to_vec(),
            tag,
        })
    }
}

/// Read the common `length ‖ type` prefix.
pub(crate) fn read_header(bytes: &[u8]) -> Option<(u16, BlockType)> {
    if bytes.len() < BLOCK_HEADER_SIZE {
        return None;
    }
    let length = read_u16(bytes, 0);
    let blocktype = BlockType(read_u16(bytes, 2));
    Some((length, blocktype))
}

/// Check that a codec was handed a whole block of its own type.
pub(crate) fn check_frame(bytes: &[u8], expected: BlockType) -> SqrlResult<()> {
    let (length, blocktype) =
        read_header(bytes).ok_or_else(|| SqrlError::corrupt(expected, "block shorter than its header"))?;
    if blocktype != expected {
        return Err(SqrlError::WrongBlockType {
            expected,
            actual: blocktype,
        });
    }
    if usize::from(length) != bytes.len() {
        return Err(SqrlError::corrupt(
            expected,
            format!("declared length {length} but {} bytes supplied", bytes.len()),
        ));
    }
    Ok(())
}

pub(crate) fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

pub(crate) fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Convert a computed block length to its u16 wire field.
pub(crate) fn wire_len(len: usize, what: &'static str) -> SqrlResult<u16> {
    u16::try_from(len).map_err(|_| SqrlError::InvalidInputLength {
        what,
        expected: usize::from(u16::MAX),
        actual: len,
    })
}
