//! Block components: a typed projection language over a resolved entry,
//! letting callers ask for exactly the pieces they need. Evaluation reads
//! the epoch file at most once, and only when raw bytes are requested.

use crate::error::{Error, Result};
use crate::index::SecondaryEntry;
use crate::layout;
use crate::types::{BlockHash, BlockOrEbb};
use chain_history::{EpochNo, SlotNo};
use std::fs::File;
use std::path::PathBuf;

/// A projection over one resolved entry.
///
/// Combine with tuples for sequencing, [`Map`] for post-processing and
/// [`Pure`] for constants.
pub trait BlockComponent<H: BlockHash> {
    type Output;

    fn evaluate(&self, ctx: &mut ComponentCtx<'_, H>) -> Result<Self::Output>;
}

/// The resolved entry a component is evaluated against, with lazy access
/// to the block's bytes.
pub struct ComponentCtx<'a, H> {
    entry: &'a SecondaryEntry<H>,
    /// Absolute slot of the entry (an EBB takes its epoch's first slot).
    slot: SlotNo,
    epoch: EpochNo,
    relative_slot: u64,
    epoch_file: PathBuf,
    /// Extent of the block in the epoch file, fixed before evaluation.
    block_start: u64,
    block_end: u64,
    /// The block's bytes, once read.
    block: Option<Vec<u8>>,
    handle: Option<File>,
}

impl<'a, H: BlockHash> ComponentCtx<'a, H> {
    pub(crate) fn new(
        entry: &'a SecondaryEntry<H>,
        slot: SlotNo,
        epoch: EpochNo,
        relative_slot: u64,
        epoch_file: PathBuf,
        block_end: u64,
    ) -> Self {
        ComponentCtx {
            entry,
            slot,
            epoch,
            relative_slot,
            epoch_file,
            block_start: entry.block_offset,
            block_end,
            block: None,
            handle: None,
        }
    }

    pub fn hash(&self) -> &H {
        &self.entry.hash
    }

    pub fn block_or_ebb(&self) -> BlockOrEbb {
        self.entry.block_or_ebb
    }

    pub fn slot(&self) -> SlotNo {
        self.slot
    }

    pub fn block_size(&self) -> u64 {
        self.block_end - self.block_start
    }

    pub fn header_size(&self) -> u16 {
        self.entry.header_size
    }

    fn read_range(&mut self, start: u64, len: usize) -> Result<Vec<u8>> {
        if self.handle.is_none() {
            self.handle = Some(layout::open_read(&self.epoch_file)?);
        }
        let file = self.handle.as_mut().expect("handle was just opened");
        let mut buf = vec![0u8; len];
        layout::read_exact_at(file, &self.epoch_file, &mut buf, start)?;
        Ok(buf)
    }

    /// The block's bytes, read once and verified against the entry's
    /// checksum.
    pub fn raw_block(&mut self) -> Result<&[u8]> {
        if self.block.is_none() {
            let bytes = self.read_range(self.block_start, self.block_size() as usize)?;
            let actual = crate::index::secondary::block_checksum(&bytes);
            if actual != self.entry.checksum {
                return Err(Error::ChecksumMismatch {
                    epoch: self.epoch,
                    relative_slot: self.relative_slot,
                    expected: self.entry.checksum,
                    actual,
                });
            }
            self.block = Some(bytes);
        }
        Ok(self.block.as_deref().expect("block was just read"))
    }

    /// The header's bytes. Sliced out of the block when that is already in
    /// memory, read on its own otherwise (headers are not checksummed
    /// separately).
    pub fn raw_header(&mut self) -> Result<Vec<u8>> {
        let start = self.entry.header_offset as usize;
        let len = self.entry.header_size as usize;
        if let Some(block) = &self.block {
            return block
                .get(start..start + len)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| Error::InvalidBlock {
                    epoch: self.epoch,
                    offset: self.block_start,
                    reason: "header descriptor lies outside the block".into(),
                });
        }
        self.read_range(self.block_start + start as u64, len)
    }
}

/// The entry's hash.
#[derive(Debug, Clone, Copy)]
pub struct GetHash;

impl<H: BlockHash> BlockComponent<H> for GetHash {
    type Output = H;

    fn evaluate(&self, ctx: &mut ComponentCtx<'_, H>) -> Result<H> {
        Ok(ctx.hash().clone())
    }
}

/// The entry's absolute slot. An EBB reports its epoch's first slot.
#[derive(Debug, Clone, Copy)]
pub struct GetSlot;

impl<H: BlockHash> BlockComponent<H> for GetSlot {
    type Output = SlotNo;

    fn evaluate(&self, ctx: &mut ComponentCtx<'_, H>) -> Result<SlotNo> {
        Ok(ctx.slot())
    }
}

/// Whether the entry is an epoch boundary block.
#[derive(Debug, Clone, Copy)]
pub struct GetIsEbb;

impl<H: BlockHash> BlockComponent<H> for GetIsEbb {
    type Output = bool;

    fn evaluate(&self, ctx: &mut ComponentCtx<'_, H>) -> Result<bool> {
        Ok(ctx.block_or_ebb().is_ebb())
    }
}

/// The block's size in bytes.
#[derive(Debug, Clone, Copy)]
pub struct GetBlockSize;

impl<H: BlockHash> BlockComponent<H> for GetBlockSize {
    type Output = u64;

    fn evaluate(&self, ctx: &mut ComponentCtx<'_, H>) -> Result<u64> {
        Ok(ctx.block_size())
    }
}

/// The header's size in bytes.
#[derive(Debug, Clone, Copy)]
pub struct GetHeaderSize;

impl<H: BlockHash> BlockComponent<H> for GetHeaderSize {
    type Output = u16;

    fn evaluate(&self, ctx: &mut ComponentCtx<'_, H>) -> Result<u16> {
        Ok(ctx.header_size())
    }
}

/// The block's raw bytes, checksum-verified.
#[derive(Debug, Clone, Copy)]
pub struct GetRawBlock;

impl<H: BlockHash> BlockComponent<H> for GetRawBlock {
    type Output = Vec<u8>;

    fn evaluate(&self, ctx: &mut ComponentCtx<'_, H>) -> Result<Vec<u8>> {
        ctx.raw_block().map(<[u8]>::to_vec)
    }
}

/// The header's raw bytes.
#[derive(Debug, Clone, Copy)]
pub struct GetRawHeader;

impl<H: BlockHash> BlockComponent<H> for GetRawHeader {
    type Output = Vec<u8>;

    fn evaluate(&self, ctx: &mut ComponentCtx<'_, H>) -> Result<Vec<u8>> {
        ctx.raw_header()
    }
}

/// A constant, evaluated without touching the entry.
#[derive(Debug, Clone, Copy)]
pub struct Pure<T>(pub T);

impl<H: BlockHash, T: Clone> BlockComponent<H> for Pure<T> {
    type Output = T;

    fn evaluate(&self, _ctx: &mut ComponentCtx<'_, H>) -> Result<T> {
        Ok(self.0.clone())
    }
}

/// Post-process another component's output.
#[derive(Debug, Clone, Copy)]
pub struct Map<C, F>(pub C, pub F);

impl<H, C, F, T> BlockComponent<H> for Map<C, F>
where
    H: BlockHash,
    C: BlockComponent<H>,
    F: Fn(C::Output) -> T,
{
    type Output = T;

    fn evaluate(&self, ctx: &mut ComponentCtx<'_, H>) -> Result<T> {
        self.0.evaluate(ctx).map(&self.1)
    }
}

impl<H: BlockHash, A, B> BlockComponent<H> for (A, B)
where
    A: BlockComponent<H>,
    B: BlockComponent<H>,
{
    type Output = (A::Output, B::Output);

    fn evaluate(&self, ctx: &mut ComponentCtx<'_, H>) -> Result<Self::Output> {
        Ok((self.0.evaluate(ctx)?, self.1.evaluate(ctx)?))
    }
}

impl<H: BlockHash, A, B, C> BlockComponent<H> for (A, B, C)
where
    A: BlockComponent<H>,
    B: BlockComponent<H>,
    C: BlockComponent<H>,
{
    type Output = (A::Output, B::Output, C::Output);

    fn evaluate(&self, ctx: &mut ComponentCtx<'_, H>) -> Result<Self::Output> {
        Ok((
            self.0.evaluate(ctx)?,
            self.1.evaluate(ctx)?,
            self.2.evaluate(ctx)?,
        ))
    }
}
