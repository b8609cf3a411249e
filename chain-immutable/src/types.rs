//! Chain coordinates and collaborator seams of the store.

use crate::error::{Error, Result};
use chain_history::{EpochNo, EpochSize, SlotNo};
use std::fmt::Debug;

/// Position of an entry within an epoch.
///
/// Relative slot 0 is reserved for the optional epoch boundary block;
/// regular blocks occupy relative slots `1..epoch_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelativeSlot(pub u64);

/// An entry's position: epoch plus relative slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EpochSlot {
    pub epoch: EpochNo,
    pub relative: RelativeSlot,
}

impl EpochSlot {
    pub fn new(epoch: EpochNo, relative: RelativeSlot) -> Self {
        EpochSlot { epoch, relative }
    }
}

/// What an entry holds: a regular block at an absolute slot, or the epoch
/// boundary block of an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOrEbb {
    Block(SlotNo),
    Ebb(EpochNo),
}

impl BlockOrEbb {
    pub fn is_ebb(&self) -> bool {
        matches!(self, BlockOrEbb::Ebb(_))
    }
}

/// Everything identifying the most recently appended entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipInfo<H> {
    pub hash: H,
    pub block: BlockOrEbb,
    pub block_no: u64,
}

/// The tip of the database: origin while empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tip<H> {
    Origin,
    At(TipInfo<H>),
}

impl<H> Tip<H> {
    pub fn is_origin(&self) -> bool {
        matches!(self, Tip::Origin)
    }

    pub fn info(&self) -> Option<&TipInfo<H>> {
        match self {
            Tip::Origin => None,
            Tip::At(info) => Some(info),
        }
    }
}

/// Raw block bytes plus the position of the header within them.
#[derive(Debug, Clone, Copy)]
pub struct BinaryInfo<'a> {
    pub bytes: &'a [u8],
    pub header_offset: u16,
    pub header_size: u16,
}

/// Fixed-width hash codec. The store never inspects hashes beyond equality
/// and (de)serialization.
pub trait BlockHash: Clone + Eq + Debug + AsRef<[u8]> + Send + Sync + 'static {
    const SIZE: usize;

    /// Construct a hash from exactly `SIZE` bytes; None otherwise.
    fn from_slice(bytes: &[u8]) -> Option<Self>;
}

/// Epoch geometry collaborator. Implementations must be deterministic and
/// report strictly positive epoch sizes.
pub trait EpochInfo {
    fn epoch_size(&self, epoch: EpochNo) -> Result<EpochSize>;

    fn first_slot_of(&self, epoch: EpochNo) -> Result<SlotNo>;

    fn epoch_slot_of(&self, slot: SlotNo) -> Result<EpochSlot>;
}

/// Geometry of a chain whose epochs all have the same size.
#[derive(Debug, Clone, Copy)]
pub struct FixedEpochInfo(pub EpochSize);

impl EpochInfo for FixedEpochInfo {
    fn epoch_size(&self, _epoch: EpochNo) -> Result<EpochSize> {
        Ok(self.0)
    }

    fn first_slot_of(&self, epoch: EpochNo) -> Result<SlotNo> {
        Ok(SlotNo(epoch.0 * self.0 .0))
    }

    fn epoch_slot_of(&self, slot: SlotNo) -> Result<EpochSlot> {
        let size = self.0 .0;
        Ok(EpochSlot {
            epoch: EpochNo(slot.0 / size),
            relative: RelativeSlot(slot.0 % size),
        })
    }
}

/// Geometry derived from a hard-fork era summary.
#[derive(Debug)]
pub struct HistoryEpochInfo(pub chain_history::EpochInfo);

impl EpochInfo for HistoryEpochInfo {
    fn epoch_size(&self, epoch: EpochNo) -> Result<EpochSize> {
        self.0
            .epoch_size(epoch)
            .map_err(|e| Error::EpochGeometry(Box::new(e)))
    }

    fn first_slot_of(&self, epoch: EpochNo) -> Result<SlotNo> {
        self.0
            .first_slot_of(epoch)
            .map_err(|e| Error::EpochGeometry(Box::new(e)))
    }

    fn epoch_slot_of(&self, slot: SlotNo) -> Result<EpochSlot> {
        let epoch = self
            .0
            .epoch_of(slot)
            .map_err(|e| Error::EpochGeometry(Box::new(e)))?;
        let relative = self
            .0
            .slot_in_epoch(slot)
            .map_err(|e| Error::EpochGeometry(Box::new(e)))?;
        Ok(EpochSlot {
            epoch,
            relative: RelativeSlot(relative),
        })
    }
}
