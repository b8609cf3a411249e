//! An append-only, on-disk immutable block store. Blocks live in per-epoch
//! files, indexed by a pair of fixed-width index files giving O(1) lookup
//! by slot and O(1) detection of empty slots; reopening validates the
//! on-disk state and truncates trailing corruption.

pub mod cache;
pub mod component;
pub mod db;
pub mod error;
pub mod index;
pub mod iterator;
pub mod parser;
pub mod types;
pub mod validation;

mod layout;

#[cfg(any(test, feature = "test-api"))]
pub mod testing;

pub use cache::CacheConfig;
pub use component::{
    BlockComponent, GetBlockSize, GetHash, GetHeaderSize, GetIsEbb, GetRawBlock, GetRawHeader,
    GetSlot, Map, Pure,
};
pub use db::ImmutableDb;
pub use error::{Error, IteratorBound, Result};
pub use index::{PrimaryIndex, SecondaryEntry};
pub use iterator::BlockIterator;
pub use parser::{BlockParser, ParseStop, ParsedBlock, ParsedEpoch};
pub use types::{
    BinaryInfo, BlockHash, BlockOrEbb, EpochInfo, EpochSlot, FixedEpochInfo, HistoryEpochInfo,
    RelativeSlot, Tip, TipInfo,
};
pub use validation::ValidationPolicy;

pub use chain_history::{EpochNo, EpochSize, SlotNo};
