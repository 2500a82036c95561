/// Core data model: blocks, actions, and the durable index cursor.
///
/// Block numbers are 1-based; block 0 is the sentinel meaning "no block yet
/// processed" (see `BlockNumber::NONE`).
use std::fmt;

/// A block number. Distinct from a raw `u64` so reader/handler code can't
/// accidentally compare a height against a byte length or an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockNumber(pub u64);

impl BlockNumber {
    /// Sentinel meaning "no block yet processed".
    pub const NONE: BlockNumber = BlockNumber(0);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    pub fn next(self) -> BlockNumber {
        BlockNumber(self.0 + 1)
    }

    pub fn prev(self) -> Option<BlockNumber> {
        self.0.checked_sub(1).map(BlockNumber)
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BlockNumber {
    fn from(n: u64) -> Self {
        BlockNumber(n)
    }
}

/// An opaque block hash. Distinct from a raw byte vector so reader code
/// can't accidentally compare a hash against an unrelated byte string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BlockHash(pub Vec<u8>);

impl BlockHash {
    /// Sentinel hash used as `expected` when there is no current block yet
    /// (§4.1 step 3: `expected = current_block_data.block_hash` if any,
    /// else the sentinel "INVALID"). No real chain hash is expected to
    /// collide with this.
    pub fn invalid_sentinel() -> BlockHash {
        BlockHash(b"INVALID".to_vec())
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl From<Vec<u8>> for BlockHash {
    fn from(v: Vec<u8>) -> Self {
        BlockHash(v)
    }
}

/// Hash-linkage identity of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub block_number: BlockNumber,
    pub block_hash: BlockHash,
    pub previous_block_hash: BlockHash,
}

/// A single action carried by a block, targeted at matching updaters/effects
/// by `action_type`. `Payload` is opaque to the core (§3, §9 of the design).
#[derive(Debug, Clone)]
pub struct Action<Payload> {
    pub action_type: String,
    pub payload: Payload,
}

impl<Payload> Action<Payload> {
    pub fn new(action_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            action_type: action_type.into(),
            payload,
        }
    }
}

/// An immutable, hash-linked block carrying an ordered sequence of actions.
#[derive(Debug, Clone)]
pub struct Block<Payload> {
    pub block_info: BlockInfo,
    pub actions: Vec<Action<Payload>>,
}

impl<Payload> Block<Payload> {
    pub fn new(block_info: BlockInfo, actions: Vec<Action<Payload>>) -> Self {
        Self { block_info, actions }
    }

    pub fn block_number(&self) -> BlockNumber {
        self.block_info.block_number
    }

    pub fn block_hash(&self) -> &BlockHash {
        &self.block_info.block_hash
    }

    pub fn previous_block_hash(&self) -> &BlockHash {
        &self.block_info.previous_block_hash
    }
}

/// The durably persisted cursor identifying the last fully-applied block and
/// the handler version active at that point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexState {
    pub block_number: BlockNumber,
    pub block_hash: BlockHash,
    pub handler_version_name: String,
}

impl IndexState {
    pub fn new(block_number: BlockNumber, block_hash: BlockHash, handler_version_name: impl Into<String>) -> Self {
        Self {
            block_number,
            block_hash,
            handler_version_name: handler_version_name.into(),
        }
    }

    /// The index state before any block has ever been applied.
    pub fn genesis(handler_version_name: impl Into<String>) -> Self {
        Self::new(BlockNumber::NONE, BlockHash::default(), handler_version_name)
    }
}
