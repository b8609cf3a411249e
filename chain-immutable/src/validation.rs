//! Opening walk: reconcile what is on disk with what the indices claim,
//! newest epoch first, truncating trailing corruption until a consistent
//! prefix remains.

use crate::error::Result;
use crate::index::secondary::block_checksum;
use crate::index::{PrimaryIndex, SecondaryEntry};
use crate::layout;
use crate::parser::{BlockParser, ParsedBlock};
use crate::types::{BlockHash, BlockOrEbb, EpochInfo, RelativeSlot, Tip, TipInfo};
use chain_history::{EpochNo, EpochSize};
use std::path::Path;

/// How much of the store to re-parse when opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPolicy {
    /// Re-parse every epoch file and verify its indices byte for byte.
    ValidateAllEpochs,
    /// Parse only the newest epoch with content; trust older epochs whose
    /// index files are coherent.
    ValidateMostRecentEpoch,
}

/// The consistent prefix the walk settled on.
pub(crate) struct ValidatedState<H> {
    pub current_epoch: EpochNo,
    pub epoch_size: EpochSize,
    pub primary: PrimaryIndex,
    pub entries: Vec<SecondaryEntry<H>>,
    pub epoch_offset: u64,
    pub secondary_offset: u64,
    pub tip: Tip<H>,
}

impl<H: BlockHash> ValidatedState<H> {
    fn empty(epoch_size: EpochSize) -> Self {
        ValidatedState {
            current_epoch: EpochNo(0),
            epoch_size,
            primary: PrimaryIndex::empty(epoch_size),
            entries: Vec::new(),
            epoch_offset: 0,
            secondary_offset: 0,
            tip: Tip::Origin,
        }
    }
}

/// One epoch after reconciliation with its files.
struct RestoredEpoch<H> {
    primary: PrimaryIndex,
    entries: Vec<SecondaryEntry<H>>,
    epoch_len: u64,
    /// Block number of the last surviving entry, for the tip.
    last_block_no: Option<u64>,
}

pub(crate) fn validate<H, I, P>(
    root: &Path,
    epoch_info: &I,
    parser: &P,
    policy: ValidationPolicy,
) -> Result<ValidatedState<H>>
where
    H: BlockHash,
    I: EpochInfo,
    P: BlockParser<H>,
{
    let epochs = layout::list_epochs(root)?;
    let mut tip_state: Option<ValidatedState<H>> = None;

    for &epoch in epochs.iter().rev() {
        tracing::debug!(epoch = epoch.0, "validating epoch");

        let complete = layout::exists(&layout::epoch_file(root, epoch))
            && layout::exists(&layout::primary_file(root, epoch))
            && layout::exists(&layout::secondary_file(root, epoch));
        if !complete {
            tracing::warn!(epoch = epoch.0, "incomplete epoch file triple, removing");
            layout::remove_epoch(root, epoch)?;
            continue;
        }

        if tip_state.is_none() {
            // Still looking for the newest epoch with content; this one is
            // always fully parsed.
            let restored = restore_epoch(root, epoch, epoch_info, parser)?;
            if restored.entries.is_empty() {
                tracing::warn!(epoch = epoch.0, "trailing epoch holds no entries, removing");
                layout::remove_epoch(root, epoch)?;
                continue;
            }
            tip_state = Some(adopt(epoch, epoch_info, restored)?);
            continue;
        }

        // Below the tip epoch.
        match policy {
            ValidationPolicy::ValidateAllEpochs => {
                restore_epoch(root, epoch, epoch_info, parser)?;
            }
            ValidationPolicy::ValidateMostRecentEpoch => {
                if !indices_coherent(root, epoch, epoch_info)? {
                    tracing::warn!(epoch = epoch.0, "incoherent index files, re-parsing epoch");
                    restore_epoch(root, epoch, epoch_info, parser)?;
                }
            }
        }
    }

    match tip_state {
        Some(state) => Ok(state),
        None => {
            let epoch_size = epoch_info.epoch_size(EpochNo(0))?;
            Ok(ValidatedState::empty(epoch_size))
        }
    }
}

fn adopt<H, I>(epoch: EpochNo, epoch_info: &I, restored: RestoredEpoch<H>) -> Result<ValidatedState<H>>
where
    H: BlockHash,
    I: EpochInfo,
{
    let last = restored
        .entries
        .last()
        .expect("adopted epochs hold at least one entry");
    let tip = Tip::At(TipInfo {
        hash: last.hash.clone(),
        block: last.block_or_ebb,
        block_no: restored
            .last_block_no
            .expect("a surviving entry implies a parsed block"),
    });
    Ok(ValidatedState {
        current_epoch: epoch,
        epoch_size: epoch_info.epoch_size(epoch)?,
        secondary_offset: restored.primary.last_offset() as u64,
        epoch_offset: restored.epoch_len,
        primary: restored.primary,
        entries: restored.entries,
        tip,
    })
}

/// Cheap trust check for epochs below the tip under
/// [`ValidationPolicy::ValidateMostRecentEpoch`]: right primary version and
/// length, decodable monotone offsets, and a secondary file whose size is
/// entry-aligned and agrees with the primary's final offset.
fn indices_coherent<I: EpochInfo>(root: &Path, epoch: EpochNo, epoch_info: &I) -> Result<bool> {
    let epoch_size = epoch_info.epoch_size(epoch)?;
    let primary_path = layout::primary_file(root, epoch);
    if layout::file_size(&primary_path)? != PrimaryIndex::file_size(epoch_size) {
        return Ok(false);
    }
    let bytes = layout::read_all(&primary_path)?;
    let primary = match PrimaryIndex::decode(epoch_size, &bytes) {
        Ok(primary) => primary,
        Err(_) => return Ok(false),
    };
    let secondary_len = layout::file_size(&layout::secondary_file(root, epoch))?;
    Ok(secondary_len == primary.last_offset() as u64)
}

/// Parse one epoch's file, reconcile it with the on-disk indices and
/// truncate whatever cannot be trusted. Returns the surviving prefix.
fn restore_epoch<H, I, P>(
    root: &Path,
    epoch: EpochNo,
    epoch_info: &I,
    parser: &P,
) -> Result<RestoredEpoch<H>>
where
    H: BlockHash,
    I: EpochInfo,
    P: BlockParser<H>,
{
    let entry_size = SecondaryEntry::<H>::size();
    let epoch_size = epoch_info.epoch_size(epoch)?;
    let epoch_path = layout::epoch_file(root, epoch);
    let bytes = layout::read_all(&epoch_path)?;
    let parsed = parser.parse_epoch(epoch, &bytes);
    if let Some(stop) = &parsed.stop {
        tracing::warn!(
            epoch = epoch.0,
            offset = stop.offset,
            reason = %stop.reason,
            "unparseable trailing bytes in epoch file"
        );
    }

    let disk_secondary = layout::read_all(&layout::secondary_file(root, epoch))?;

    // Walk the parsed blocks in file order, rebuilding the expected entry
    // for each and stopping at the first one that cannot be trusted.
    let mut entries: Vec<SecondaryEntry<H>> = Vec::new();
    let mut rel_slots: Vec<RelativeSlot> = Vec::new();
    let mut offset = 0u64;
    let mut last_block_no = None;
    let mut next_relative = RelativeSlot(0);
    for (i, block) in parsed.blocks.iter().enumerate() {
        if offset + block.size > bytes.len() as u64 {
            tracing::warn!(epoch = epoch.0, offset, "parsed block extends past the file");
            break;
        }
        let relative = match entry_position(epoch, epoch_size, block, epoch_info)? {
            Some(relative) if relative >= next_relative => relative,
            _ => {
                tracing::warn!(
                    epoch = epoch.0,
                    offset,
                    "block out of place in its epoch, truncating"
                );
                break;
            }
        };

        let expected = SecondaryEntry {
            block_offset: offset,
            header_offset: block.header_offset,
            header_size: block.header_size,
            checksum: block_checksum(&bytes[offset as usize..(offset + block.size) as usize]),
            block_or_ebb: block.block_or_ebb,
            hash: block.hash.clone(),
        };

        // A stored checksum is ground truth: if the block's bytes no longer
        // match it, the block is corrupt and everything from here on goes.
        let stored = disk_secondary
            .get(i * entry_size..(i + 1) * entry_size)
            .and_then(|chunk| SecondaryEntry::<H>::decode(chunk).ok());
        if let Some(stored) = stored {
            if stored.checksum != expected.checksum {
                tracing::warn!(
                    epoch = epoch.0,
                    relative_slot = relative.0,
                    "checksum mismatch, truncating epoch"
                );
                break;
            }
        }

        offset += block.size;
        last_block_no = Some(block.block_no);
        entries.push(expected);
        rel_slots.push(relative);
        next_relative = RelativeSlot(relative.0 + 1);
    }

    let mut primary = PrimaryIndex::empty(epoch_size);
    for (entry_index, relative) in rel_slots.iter().enumerate() {
        primary.fill(*relative, ((entry_index + 1) * entry_size) as u32);
    }

    // Write back whatever differs from disk.
    let secondary_bytes = SecondaryEntry::encode_all(&entries);
    if secondary_bytes != disk_secondary {
        tracing::warn!(epoch = epoch.0, entries = entries.len(), "rebuilding secondary index");
        layout::write_all(&layout::secondary_file(root, epoch), &secondary_bytes)?;
    }
    let primary_bytes = primary.encode();
    let primary_path = layout::primary_file(root, epoch);
    if layout::read_all(&primary_path)? != primary_bytes {
        tracing::warn!(epoch = epoch.0, "rebuilding primary index");
        layout::write_all(&primary_path, &primary_bytes)?;
    }
    if offset < bytes.len() as u64 {
        tracing::warn!(
            epoch = epoch.0,
            from = offset,
            len = bytes.len() as u64,
            "truncating trailing bytes of epoch file"
        );
        layout::truncate(&epoch_path, offset)?;
    }

    Ok(RestoredEpoch {
        primary,
        entries,
        epoch_len: offset,
        last_block_no,
    })
}

/// The relative slot a parsed block must sit at, or None when it does not
/// belong to this epoch at all (wrong epoch, EBB past slot 0, block at the
/// EBB slot).
fn entry_position<H, I>(
    epoch: EpochNo,
    epoch_size: EpochSize,
    block: &ParsedBlock<H>,
    epoch_info: &I,
) -> Result<Option<RelativeSlot>>
where
    H: BlockHash,
    I: EpochInfo,
{
    match block.block_or_ebb {
        BlockOrEbb::Ebb(ebb_epoch) => {
            if ebb_epoch == epoch {
                Ok(Some(RelativeSlot(0)))
            } else {
                Ok(None)
            }
        }
        BlockOrEbb::Block(slot) => {
            let position = epoch_info.epoch_slot_of(slot)?;
            if position.epoch != epoch
                || position.relative.0 == 0
                || position.relative.0 >= epoch_size.0
            {
                return Ok(None);
            }
            Ok(Some(position.relative))
        }
    }
}
