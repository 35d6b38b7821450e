use std::fmt;

/// Size of every symmetric key and of the IUK/IMK/ILK (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of an AES-GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of an EnScrypt salt
pub const SALT_SIZE: usize = 16;

/// Size of the `length:u16 ‖ blocktype:u16` prefix carried by every block
pub const BLOCK_HEADER_SIZE: usize = 4;

/// Largest accepted EnScrypt cost exponent. With r = 256 each scrypt call
/// needs `128 * 256 * 2^log_n` bytes, so 16 is 2 GiB of working memory.
pub const MAX_LOG_N: u8 = 16;

/// The 16-bit discriminant that selects a block codec.
///
/// Kept open (a newtype rather than an enum) so that unknown types read from
/// newer containers survive a load/dump round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockType(pub u16);

impl BlockType {
    pub const ACCESS: BlockType = BlockType(1);
    pub const RESCUE: BlockType = BlockType(2);
    pub const PREVIOUS: BlockType = BlockType(3);
    pub const SECRET: BlockType = BlockType(129);

    pub fn name(self) -> Option<&'static str> {
        match self {
            BlockType::ACCESS => Some("access"),
            BlockType::RESCUE => Some("rescue"),
            BlockType::PREVIOUS => Some("previous"),
            BlockType::SECRET => Some("secret"),
            _ => None,
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({})", self.0),
            None => write!(f, "type({})", self.0),
        }
    }
}

impl From<u16> for BlockType {
    fn from(v: u16) -> Self {
        BlockType(v)
    }
}
