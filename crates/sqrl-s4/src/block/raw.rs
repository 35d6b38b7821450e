//! Opaque blocks of types this client does not understand

use sqrl_core::types::BLOCK_HEADER_SIZE;
use sqrl_core::{BlockType, SqrlError, SqrlResult};

use super::{read_header, wire_len};

/// A block kept as its exact wire bytes, header included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    blocktype: BlockType,
    data: Vec<u8>,
}

impl RawBlock {
    /// Frame `payload` with a `length ‖ type` header.
    pub fn new(blocktype: BlockType, payload: &[u8]) -> SqrlResult<Self> {
        let len = wire_len(BLOCK_HEADER_SIZE + payload.len(), "raw block")?;
        let mut data = Vec::with_capacity(usize::from(len));
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&blocktype.0.to_le_bytes());
        data.extend_from_slice(payload);
        Ok(Self { blocktype, data })
    }

    pub fn load(bytes: &[u8]) -> SqrlResult<Self> {
        let (length, blocktype) = read_header(bytes).ok_or(SqrlError::TruncatedBlock {
            offset: 0,
            needed: BLOCK_HEADER_SIZE,
            available: bytes.len(),
        })?;
        if usize::from(length) != bytes.len() {
            return Err(SqrlError::corrupt(
                blocktype,
                format!("declared length {length} but {} bytes supplied", bytes.len()),
            ));
        }
        Ok(Self {
            blocktype,
            data: bytes.to_vec(),
        })
    }

    pub fn blocktype(&self) -> BlockType {
        self.blocktype
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Everything after the 4-byte header.
    pub fn payload(&self) -> &[u8] {
        &self.data[BLOCK_HEADER_SIZE..]
    }

    pub fn describe(&self) -> String {
        format!("raw {} bytes", self.data.len())
    }
}
