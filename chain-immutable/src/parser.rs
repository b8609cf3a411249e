//! The epoch-file parser seam: the store treats blocks as opaque bytes, so
//! reconstructing entries from a raw epoch file needs the block codec,
//! which the node supplies through this trait.

use crate::types::{BlockHash, BlockOrEbb};
use chain_history::EpochNo;

/// A block reconstructed from a raw epoch file.
#[derive(Debug, Clone)]
pub struct ParsedBlock<H> {
    /// Length of the block's bytes in the epoch file.
    pub size: u64,
    pub header_offset: u16,
    pub header_size: u16,
    pub hash: H,
    pub block_or_ebb: BlockOrEbb,
    pub block_no: u64,
}

/// Where and why parsing stopped before the end of the file.
#[derive(Debug, Clone)]
pub struct ParseStop {
    /// Byte offset of the first unusable data.
    pub offset: u64,
    pub reason: String,
}

/// The blocks recovered from one epoch file, in file order, plus the
/// trailing region (if any) that could not be parsed.
#[derive(Debug, Clone)]
pub struct ParsedEpoch<H> {
    pub blocks: Vec<ParsedBlock<H>>,
    pub stop: Option<ParseStop>,
}

/// Reconstructs blocks from a raw epoch file.
///
/// Implementations must be able to restart from any block boundary and
/// must report trailing bytes they cannot make sense of via
/// [`ParsedEpoch::stop`] rather than failing outright: the store truncates
/// at the reported offset on reopen.
pub trait BlockParser<H: BlockHash> {
    fn parse_epoch(&self, epoch: EpochNo, bytes: &[u8]) -> ParsedEpoch<H>;
}
