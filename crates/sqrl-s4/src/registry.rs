//! Block type → decoder table

use std::collections::HashMap;
use std::fmt;

use sqrl_core::{BlockType, SqrlResult};

use crate::block::{AccessBlock, Block, PreviousBlock, RawBlock, RescueBlock, SecretBlock};

/// Parses one whole block (header included).
pub type BlockDecoder = fn(&[u8]) -> SqrlResult<Block>;

#[derive(Clone, Copy)]
struct Entry {
    decoder: BlockDecoder,
    singleton: bool,
}

/// Which codec handles each block type, and which types may appear only
/// once in a container. Unregistered types decode as [`RawBlock`].
#[derive(Clone, Default)]
pub struct BlockRegistry {
    entries: HashMap<BlockType, Entry>,
}

impl fmt::Debug for BlockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<(BlockType, bool)> = self.entries.iter().map(|(t, e)| (*t, e.singleton)).collect();
        types.sort();
        f.debug_struct("BlockRegistry").field("types", &types).finish()
    }
}

impl BlockRegistry {
    /// No codecs: every block loads as raw bytes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Access and Rescue (singletons), Previous, and Secret.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(AccessBlock::BLOCKTYPE, |b| AccessBlock::load(b).map(Block::from), true);
        registry.register(RescueBlock::BLOCKTYPE, |b| RescueBlock::load(b).map(Block::from), true);
        registry.register(PreviousBlock::BLOCKTYPE, |b| PreviousBlock::load(b).map(Block::from), false);
        registry.register(SecretBlock::BLOCKTYPE, |b| SecretBlock::load(b).map(Block::from), false);
        registry
    }

    pub fn register(&mut self, blocktype: BlockType, decoder: BlockDecoder, singleton: bool) {
        self.entries.insert(blocktype, Entry { decoder, singleton });
    }

    /// Keep a type as raw bytes but still enforce the singleton rule on it.
    pub fn register_raw(&mut self, blocktype: BlockType, singleton: bool) {
        self.register(blocktype, |b| RawBlock::load(b).map(Block::from), singleton);
    }

    pub fn is_registered(&self, blocktype: BlockType) -> bool {
        self.entries.contains_key(&blocktype)
    }

    pub fn is_singleton(&self, blocktype: BlockType) -> bool {
        self.entries.get(&blocktype).is_some_and(|e| e.singleton)
    }

    pub fn decode(&self, bytes: &[u8]) -> SqrlResult<Block> {
        let blocktype = match crate::block::read_header(bytes) {
            Some((_, blocktype)) => blocktype,
            None => return RawBlock::load(bytes).map(Block::from),
        };
        match self.entries.get(&blocktype) {
            Some(entry) => (entry.decoder)(bytes),
            None => {
                tracing::trace!(%blocktype, "no codec registered; keeping raw bytes");
                RawBlock::load(bytes).map(Block::from)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_singletons() {
        let registry = BlockRegistry::standard();
        assert!(registry.is_singleton(BlockType::ACCESS));
        assert!(registry.is_singleton(BlockType::RESCUE));
        assert!(!registry.is_singleton(BlockType::PREVIOUS));
        assert!(!registry.is_singleton(BlockType::SECRET));
        assert!(!registry.is_singleton(BlockType(13)));
    }

    #[test]
    fn test_unknown_type_decodes_raw() {
        let raw = RawBlock::new(BlockType(99), b"future").unwrap();
        let block = BlockRegistry::standard().decode(raw.as_bytes()).unwrap();
        assert!(matches!(block, Block::Raw(ref r) if r == &raw));
    }

    #[test]
    fn test_empty_registry_keeps_known_types_raw() {
        let raw = RawBlock::new(BlockType::PREVIOUS, &[0u8; 22]).unwrap();
        let block = BlockRegistry::empty().decode(raw.as_bytes()).unwrap();
        assert_eq!(block.blocktype(), BlockType::PREVIOUS);
        assert!(matches!(block, Block::Raw(_)));
    }

    #[test]
    fn test_register_raw_singleton() {
        let mut registry = BlockRegistry::empty();
        registry.register_raw(BlockType(37), true);
        assert!(registry.is_registered(BlockType(37)));
        assert!(registry.is_singleton(BlockType(37)));
    }

    #[test]
    fn test_registered_codec_errors_propagate() {
        // a 10-byte "access" block is not an access block
        let raw = RawBlock::new(BlockType::ACCESS, &[0u8; 6]).unwrap();
        let err = BlockRegistry::standard().decode(raw.as_bytes()).unwrap_err();
        assert!(err.is_format_error());
    }
}
