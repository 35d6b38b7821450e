//! Ordered block storage with tombstones
//!
//! Blocks live in an arena in insertion order; a per-type index lists
//! their positions. Removing a block only flags it, so positions never
//! shift and iteration order survives any sequence of edits. Only live
//! blocks are written out.
//!
//! Binary form:
//! ```text
//! "sqrldata" ‖ block ‖ block ‖ …
//! ```
//! Text form replaces the magic with `"SQRLDATA"` and base64url-encodes
//! the blocks.

use std::collections::BTreeMap;
use std::io::Write;

use sqrl_core::types::BLOCK_HEADER_SIZE;
use sqrl_core::{BlockType, SqrlError, SqrlResult};

use crate::block::{read_header, Block};
use crate::encoding::decode_b64u;
use crate::registry::BlockRegistry;

pub const BINARY_MAGIC: &[u8; 8] = b"sqrldata";
pub const TEXT_MAGIC: &[u8; 8] = b"SQRLDATA";

/// One arena slot.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub block: Block,
    pub deleted: bool,
}

#[derive(Debug, Clone)]
pub struct BlockLedger {
    registry: BlockRegistry,
    entries: Vec<LedgerEntry>,
    by_type: BTreeMap<BlockType, Vec<usize>>,
}

impl Default for BlockLedger {
    fn default() -> Self {
        Self::new(BlockRegistry::standard())
    }
}

impl BlockLedger {
    pub fn new(registry: BlockRegistry) -> Self {
        Self {
            registry,
            entries: Vec::new(),
            by_type: BTreeMap::new(),
        }
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    /// Append `block`. For a singleton type, the newest live block of that
    /// type is tombstoned. Returns the new block's arena index.
    pub fn add(&mut self, block: Block) -> usize {
        let blocktype = block.blocktype();
        if self.registry.is_singleton(blocktype) {
            if let Some(&prev) = self.live_indices(blocktype).last() {
                self.entries[prev].deleted = true;
                tracing::trace!(%blocktype, index = prev, "singleton replaced");
            }
        }
        let index = self.entries.len();
        self.entries.push(LedgerEntry {
            block,
            deleted: false,
        });
        self.by_type.entry(blocktype).or_default().push(index);
        index
    }

    /// Newest live block of `blocktype`.
    pub fn get(&self, blocktype: BlockType) -> Option<&Block> {
        self.live_indices(blocktype)
            .last()
            .map(|&i| &self.entries[i].block)
    }

    /// All live blocks of `blocktype`, oldest first.
    pub fn get_all(&self, blocktype: BlockType) -> Vec<&Block> {
        self.live_indices(blocktype)
            .into_iter()
            .map(|i| &self.entries[i].block)
            .collect()
    }

    /// Tombstone the oldest live block of `blocktype`.
    pub fn remove(&mut self, blocktype: BlockType) -> bool {
        match self.live_indices(blocktype).first() {
            Some(&i) => {
                self.entries[i].deleted = true;
                true
            }
            None => false,
        }
    }

    /// Tombstone every live block of `blocktype`; returns how many.
    pub fn remove_all(&mut self, blocktype: BlockType) -> usize {
        let live = self.live_indices(blocktype);
        for &i in &live {
            self.entries[i].deleted = true;
        }
        live.len()
    }

    /// Tombstone every live block of `blocktype` that `pred` selects.
    pub fn remove_if<F>(&mut self, blocktype: BlockType, mut pred: F) -> usize
    where
        F: FnMut(&Block) -> bool,
    {
        let mut removed = 0;
        for i in self.live_indices(blocktype) {
            if pred(&self.entries[i].block) {
                self.entries[i].deleted = true;
                removed += 1;
            }
        }
        removed
    }

    /// Every slot, tombstoned ones included, in insertion order.
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Live blocks in insertion order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.entries.iter().filter(|e| !e.deleted).map(|e| &e.block)
    }

    /// Slot count, tombstones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn live_len(&self) -> usize {
        self.blocks().count()
    }

    /// Write the binary magic, then every live block.
    pub fn dump<W: Write>(&self, sink: &mut W) -> SqrlResult<()> {
        sink.write_all(BINARY_MAGIC)?;
        self.dump_blocks(sink)
    }

    pub fn to_binary(&self) -> SqrlResult<Vec<u8>> {
        let mut out = Vec::new();
        self.dump(&mut out)?;
        Ok(out)
    }

    /// Live blocks without the magic.
    pub(crate) fn dump_blocks<W: Write>(&self, sink: &mut W) -> SqrlResult<()> {
        for block in self.blocks() {
            block.dump(sink)?;
        }
        Ok(())
    }

    /// Parse a container in either binary or text form.
    pub fn load(bytes: &[u8], registry: BlockRegistry) -> SqrlResult<Self> {
        if bytes.len() < BINARY_MAGIC.len() {
            return Err(SqrlError::BadHeader);
        }
        let (magic, rest) = bytes.split_at(BINARY_MAGIC.len());
        if magic == BINARY_MAGIC {
            Self::load_blocks(rest, registry)
        } else if magic == TEXT_MAGIC {
            let decoded = decode_b64u(rest).map_err(|e| SqrlError::CorruptText(e.to_string()))?;
            Self::load_blocks(&decoded, registry)
        } else {
            Err(SqrlError::BadHeader)
        }
    }

    /// Frame and decode a block stream that follows the magic.
    fn load_blocks(mut rest: &[u8], registry: BlockRegistry) -> SqrlResult<Self> {
        let mut ledger = Self::new(registry);
        let mut offset = BINARY_MAGIC.len();

        while !rest.is_empty() {
            let (length, blocktype) = read_header(rest).ok_or(SqrlError::TruncatedBlock {
                offset,
                needed: BLOCK_HEADER_SIZE,
                available: rest.len(),
            })?;
            let length = usize::from(length);
            if length < BLOCK_HEADER_SIZE {
                return Err(SqrlError::corrupt(
                    blocktype,
                    format!("declared length {length} at offset {offset}"),
                ));
            }
            if length > rest.len() {
                return Err(SqrlError::TruncatedBlock {
                    offset,
                    needed: length,
                    available: rest.len(),
                });
            }

            let (frame, tail) = rest.split_at(length);
            let block = ledger.registry.decode(frame)?;
            ledger.add(block);
            rest = tail;
            offset += length;
        }

        tracing::debug!(blocks = ledger.len(), bytes = offset, "container loaded");
        Ok(ledger)
    }

    fn live_indices(&self, blocktype: BlockType) -> Vec<usize> {
        self.by_type
            .get(&blocktype)
            .map(|indices| {
                indices
                    .iter()
                    .copied()
                    .filter(|&i| !self.entries[i].deleted)
                    .collect()
            })
            .unwrap_or_default()
    }
}
