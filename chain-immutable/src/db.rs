//! The immutable database proper: a single-writer, multi-reader store of
//! blocks in per-epoch files, with an in-memory mirror of the current
//! epoch's indices. Writers serialise on one state lock; readers copy a
//! cheap snapshot out of it and never touch the lock again.

use crate::cache::{CacheConfig, IndexCache};
use crate::component::{BlockComponent, ComponentCtx};
use crate::error::{Error, IteratorBound, Result};
use crate::index::secondary::block_checksum;
use crate::index::{PrimaryIndex, SecondaryEntry};
use crate::iterator::BlockIterator;
use crate::layout;
use crate::parser::BlockParser;
use crate::types::{
    BinaryInfo, BlockHash, BlockOrEbb, EpochInfo, EpochSlot, RelativeSlot, Tip, TipInfo,
};
use crate::validation::{self, ValidatedState, ValidationPolicy};
use chain_history::{EpochNo, EpochSize, SlotNo};
use parking_lot::RwLock;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// An open immutable database rooted at one directory.
///
/// Generic in the hash codec `H`, the epoch geometry `I` and the epoch
/// file parser `P`.
pub struct ImmutableDb<H, I, P> {
    inner: Arc<DbInner<H, I, P>>,
}

pub(crate) struct DbInner<H, I, P> {
    root: PathBuf,
    epoch_info: I,
    parser: P,
    cache: IndexCache<H>,
    state: RwLock<DbState<H>>,
    open_iterators: AtomicUsize,
}

enum DbState<H> {
    Open(OpenState<H>),
    Closed,
}

/// Mutable core of an open database: the current epoch's handles, offsets
/// and in-memory indices, plus the tip.
struct OpenState<H> {
    current_epoch: EpochNo,
    epoch_size: EpochSize,
    epoch_file: File,
    primary_file: File,
    secondary_file: File,
    /// Committed length of the current epoch file.
    epoch_offset: u64,
    /// Committed length of the current secondary file.
    secondary_offset: u64,
    primary: Arc<PrimaryIndex>,
    entries: Arc<Vec<SecondaryEntry<H>>>,
    tip: Tip<H>,
}

/// What a reader needs, copied out of the state lock in one go.
pub(crate) struct ReadSnapshot<H> {
    pub current_epoch: EpochNo,
    pub epoch_offset: u64,
    pub tip: Tip<H>,
    pub primary: Arc<PrimaryIndex>,
    pub entries: Arc<Vec<SecondaryEntry<H>>>,
}

/// An entry located on disk, ready for component evaluation.
pub(crate) struct ResolvedEntry<H> {
    entry: SecondaryEntry<H>,
    slot: SlotNo,
    position: EpochSlot,
    block_end: u64,
}

impl<H: BlockHash> OpenState<H> {
    /// Open handles onto the current epoch's triple, materialising the
    /// files of a fresh database.
    fn seed(root: &Path, validated: ValidatedState<H>) -> Result<Self> {
        let primary_path = layout::primary_file(root, validated.current_epoch);
        if layout::file_size_or_zero(&primary_path)? != PrimaryIndex::file_size(validated.epoch_size)
        {
            layout::write_all(&primary_path, &validated.primary.encode())?;
        }
        let epoch_file = layout::open_append(&layout::epoch_file(root, validated.current_epoch))?;
        let secondary_file =
            layout::open_append(&layout::secondary_file(root, validated.current_epoch))?;
        let primary_file = layout::open_read_write(&primary_path)?;
        Ok(OpenState {
            current_epoch: validated.current_epoch,
            epoch_size: validated.epoch_size,
            epoch_file,
            primary_file,
            secondary_file,
            epoch_offset: validated.epoch_offset,
            secondary_offset: validated.secondary_offset,
            primary: Arc::new(validated.primary),
            entries: Arc::new(validated.entries),
            tip: validated.tip,
        })
    }
}

impl<H, I, P> DbInner<H, I, P> {
    pub(crate) fn iterator_closed(&self) {
        self.open_iterators.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<H, I, P> DbInner<H, I, P>
where
    H: BlockHash,
    I: EpochInfo,
    P: BlockParser<H>,
{
    fn snapshot(&self) -> Result<ReadSnapshot<H>> {
        match &*self.state.read() {
            DbState::Closed => Err(Error::ClosedDb),
            DbState::Open(state) => Ok(ReadSnapshot {
                current_epoch: state.current_epoch,
                epoch_offset: state.epoch_offset,
                tip: state.tip.clone(),
                primary: Arc::clone(&state.primary),
                entries: Arc::clone(&state.entries),
            }),
        }
    }

    /// Indices of an epoch: the snapshot's own mirror for the current
    /// epoch, the cache (loading from disk on a miss) for older ones.
    pub(crate) fn epoch_data(
        &self,
        snapshot: &ReadSnapshot<H>,
        epoch: EpochNo,
    ) -> Result<(Arc<PrimaryIndex>, Arc<Vec<SecondaryEntry<H>>>)> {
        if epoch == snapshot.current_epoch {
            return Ok((
                Arc::clone(&snapshot.primary),
                Arc::clone(&snapshot.entries),
            ));
        }
        let cached = self
            .cache
            .get_or_load(epoch, || self.load_epoch_index(epoch))?;
        Ok((cached.primary, cached.entries))
    }

    fn load_epoch_index(&self, epoch: EpochNo) -> Result<(PrimaryIndex, Vec<SecondaryEntry<H>>)> {
        let primary_path = layout::primary_file(self.root.as_path(), epoch);
        if !layout::exists(&primary_path) {
            return Err(Error::MissingEpochFile { epoch });
        }
        let epoch_size = self.epoch_info.epoch_size(epoch)?;
        let bytes = layout::read_all(&primary_path)?;
        let primary = PrimaryIndex::decode(epoch_size, &bytes)
            .map_err(|reason| Error::InvalidPrimaryIndex { epoch, reason })?;
        let secondary_bytes = layout::read_all(&layout::secondary_file(self.root.as_path(), epoch))?;
        if secondary_bytes.len() != primary.last_offset() as usize {
            return Err(Error::InvalidPrimaryIndex {
                epoch,
                reason: "final offset disagrees with the secondary file size",
            });
        }
        let entries = SecondaryEntry::decode_all(&secondary_bytes)
            .map_err(|reason| Error::InvalidSecondaryIndex { epoch, reason })?;
        Ok((primary, entries))
    }

    /// Locate the entry at `position`, if any.
    fn resolve(
        &self,
        snapshot: &ReadSnapshot<H>,
        position: EpochSlot,
    ) -> Result<Option<ResolvedEntry<H>>> {
        let (primary, entries) = self.epoch_data(snapshot, position.epoch)?;
        if !primary.in_range(position.relative) || !primary.is_filled(position.relative) {
            return Ok(None);
        }
        self.resolve_in(snapshot, position, &primary, &entries)
            .map(Some)
    }

    /// Like [`Self::resolve`] for a position already known to be filled in
    /// `primary`.
    pub(crate) fn resolve_in(
        &self,
        snapshot: &ReadSnapshot<H>,
        position: EpochSlot,
        primary: &PrimaryIndex,
        entries: &[SecondaryEntry<H>],
    ) -> Result<ResolvedEntry<H>> {
        let entry_size = SecondaryEntry::<H>::size();
        let index = primary
            .entry_index(position.relative, entry_size)
            .expect("position is filled");
        let entry = entries
            .get(index)
            .cloned()
            .ok_or(Error::InvalidSecondaryIndex {
                epoch: position.epoch,
                reason: "primary offset points past the entries",
            })?;
        let block_end = if let Some(next) = entries.get(index + 1) {
            next.block_offset
        } else if position.epoch == snapshot.current_epoch {
            // Bound the last block by the snapshot, not the file: a
            // concurrent append must stay invisible to this read.
            snapshot.epoch_offset
        } else {
            layout::file_size(&layout::epoch_file(self.root.as_path(), position.epoch))?
        };
        let slot = match entry.block_or_ebb {
            BlockOrEbb::Block(slot) => slot,
            BlockOrEbb::Ebb(epoch) => self.epoch_info.first_slot_of(epoch)?,
        };
        Ok(ResolvedEntry {
            entry,
            slot,
            position,
            block_end,
        })
    }

    pub(crate) fn evaluate<C: BlockComponent<H>>(
        &self,
        resolved: &ResolvedEntry<H>,
        component: &C,
    ) -> Result<C::Output> {
        let mut ctx = ComponentCtx::new(
            &resolved.entry,
            resolved.slot,
            resolved.position.epoch,
            resolved.position.relative.0,
            layout::epoch_file(self.root.as_path(), resolved.position.epoch),
            resolved.block_end,
        );
        component.evaluate(&mut ctx)
    }

    /// The absolute slot the tip occupies (an EBB sits at its epoch's
    /// first slot), or None at origin.
    fn tip_slot(&self, tip: &Tip<H>) -> Result<Option<SlotNo>> {
        match tip {
            Tip::Origin => Ok(None),
            Tip::At(info) => match info.block {
                BlockOrEbb::Block(slot) => Ok(Some(slot)),
                BlockOrEbb::Ebb(epoch) => self.epoch_info.first_slot_of(epoch).map(Some),
            },
        }
    }

    fn tip_epoch(&self, tip: &Tip<H>) -> Result<Option<EpochNo>> {
        match tip {
            Tip::Origin => Ok(None),
            Tip::At(info) => match info.block {
                BlockOrEbb::Block(slot) => {
                    self.epoch_info.epoch_slot_of(slot).map(|p| Some(p.epoch))
                }
                BlockOrEbb::Ebb(epoch) => Ok(Some(epoch)),
            },
        }
    }

    /// Roll the open state forward until `target` is the current epoch.
    /// Skipped epochs materialise with empty files and fully backfilled
    /// primary indices.
    fn start_epochs_until(&self, state: &mut OpenState<H>, target: EpochNo) -> Result<()> {
        while state.current_epoch < target {
            let next = state.current_epoch.next();
            let epoch_size = self.epoch_info.epoch_size(next)?;
            let primary = PrimaryIndex::empty(epoch_size);
            let primary_path = layout::primary_file(self.root.as_path(), next);
            layout::write_all(&primary_path, &primary.encode())?;
            let epoch_file = layout::create_new(&layout::epoch_file(self.root.as_path(), next))?;
            let secondary_file =
                layout::create_new(&layout::secondary_file(self.root.as_path(), next))?;
            let primary_file = layout::open_read_write(&primary_path)?;

            state.current_epoch = next;
            state.epoch_size = epoch_size;
            state.epoch_file = epoch_file;
            state.secondary_file = secondary_file;
            state.primary_file = primary_file;
            state.epoch_offset = 0;
            state.secondary_offset = 0;
            state.primary = Arc::new(primary);
            state.entries = Arc::new(Vec::new());
            tracing::debug!(epoch = next.0, "started new epoch");
        }
        Ok(())
    }

    /// The write path shared by blocks and EBBs. Preconditions hold;
    /// everything here is durable before the in-memory state moves.
    fn append_entry(
        &self,
        state: &mut OpenState<H>,
        position: EpochSlot,
        block_or_ebb: BlockOrEbb,
        block_no: u64,
        hash: H,
        binary: BinaryInfo<'_>,
    ) -> Result<()> {
        self.start_epochs_until(state, position.epoch)?;
        debug_assert!(state.primary.in_range(position.relative));
        debug_assert!(!state.primary.is_filled(position.relative));

        let epoch_path = layout::epoch_file(self.root.as_path(), state.current_epoch);
        state
            .epoch_file
            .write_all(binary.bytes)
            .map_err(|err| Error::fs(&epoch_path, err))?;

        let entry = SecondaryEntry {
            block_offset: state.epoch_offset,
            header_offset: binary.header_offset,
            header_size: binary.header_size,
            checksum: block_checksum(binary.bytes),
            block_or_ebb,
            hash: hash.clone(),
        };
        let secondary_path = layout::secondary_file(self.root.as_path(), state.current_epoch);
        state
            .secondary_file
            .write_all(&entry.to_bytes())
            .map_err(|err| Error::fs(&secondary_path, err))?;

        let entry_size = SecondaryEntry::<H>::size() as u64;
        let new_end = (state.secondary_offset + entry_size) as u32;
        let primary = Arc::make_mut(&mut state.primary);
        let first_changed = primary.fill(position.relative, new_end);
        let (file_position, tail) = primary.encode_tail(first_changed);
        let primary_path = layout::primary_file(self.root.as_path(), state.current_epoch);
        state
            .primary_file
            .seek(SeekFrom::Start(file_position))
            .and_then(|_| state.primary_file.write_all(&tail))
            .map_err(|err| Error::fs(&primary_path, err))?;

        // All three writes are on disk; commit.
        state.epoch_offset += binary.bytes.len() as u64;
        state.secondary_offset += entry_size;
        Arc::make_mut(&mut state.entries).push(entry);
        state.tip = Tip::At(TipInfo {
            hash,
            block: block_or_ebb,
            block_no,
        });
        Ok(())
    }
}

impl<H, I, P> ImmutableDb<H, I, P>
where
    H: BlockHash,
    I: EpochInfo,
    P: BlockParser<H>,
{
    /// Open (or create) the database at `root`, walking the on-disk epochs
    /// per `policy` until a consistent prefix remains.
    pub fn open(
        root: impl Into<PathBuf>,
        epoch_info: I,
        parser: P,
        policy: ValidationPolicy,
        cache_config: CacheConfig,
    ) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|err| Error::fs(&root, err))?;
        let validated = validation::validate(&root, &epoch_info, &parser, policy)?;
        let state = OpenState::seed(&root, validated)?;
        tracing::info!(
            root = %root.display(),
            epoch = state.current_epoch.0,
            tip = ?state.tip.info().map(|info| info.block),
            "database opened"
        );
        Ok(ImmutableDb {
            inner: Arc::new(DbInner {
                root,
                epoch_info,
                parser,
                cache: IndexCache::new(cache_config),
                state: RwLock::new(DbState::Open(state)),
                open_iterators: AtomicUsize::new(0),
            }),
        })
    }

    pub fn is_open(&self) -> bool {
        matches!(&*self.inner.state.read(), DbState::Open(_))
    }

    /// Release the file handles. Idempotent; reads and writes fail with
    /// [`Error::ClosedDb`] afterwards until [`Self::reopen`].
    pub fn close(&self) {
        let mut guard = self.inner.state.write();
        if matches!(&*guard, DbState::Open(_)) {
            *guard = DbState::Closed;
            self.inner.cache.restart();
            tracing::info!("database closed");
        }
    }

    /// Validate and re-adopt the on-disk state after a [`Self::close`].
    pub fn reopen(&self, policy: ValidationPolicy) -> Result<()> {
        let mut guard = self.inner.state.write();
        if matches!(&*guard, DbState::Open(_)) {
            return Err(self.traced(Error::OpenDb));
        }
        let validated =
            validation::validate(&self.inner.root, &self.inner.epoch_info, &self.inner.parser, policy)?;
        let state = OpenState::seed(&self.inner.root, validated)?;
        tracing::info!(
            epoch = state.current_epoch.0,
            tip = ?state.tip.info().map(|info| info.block),
            "database reopened"
        );
        *guard = DbState::Open(state);
        Ok(())
    }

    /// The current tip: the last appended entry, or origin while empty.
    pub fn get_tip(&self) -> Result<Tip<H>> {
        self.inner.snapshot().map(|snapshot| snapshot.tip)
    }

    /// Append a regular block at `slot`. The slot must lie strictly after
    /// the tip and must not be its epoch's boundary-block slot.
    pub fn append_block(
        &self,
        slot: SlotNo,
        block_no: u64,
        hash: H,
        binary: BinaryInfo<'_>,
    ) -> Result<()> {
        let mut guard = self.inner.state.write();
        let result = match &mut *guard {
            DbState::Closed => Err(Error::ClosedDb),
            DbState::Open(state) => (|| {
                let position = self.inner.epoch_info.epoch_slot_of(slot)?;
                if position.relative.0 == 0 {
                    return Err(Error::AppendToEbbSlot { slot });
                }
                match &state.tip {
                    Tip::Origin => {}
                    Tip::At(info) => match info.block {
                        BlockOrEbb::Block(tip_slot) => {
                            if slot <= tip_slot {
                                return Err(Error::AppendToSlotInThePast {
                                    slot,
                                    tip: tip_slot,
                                });
                            }
                        }
                        BlockOrEbb::Ebb(tip_epoch) => {
                            if position.epoch < tip_epoch {
                                let tip = self.inner.epoch_info.first_slot_of(tip_epoch)?;
                                return Err(Error::AppendToSlotInThePast { slot, tip });
                            }
                        }
                    },
                }
                self.inner.append_entry(
                    state,
                    position,
                    BlockOrEbb::Block(slot),
                    block_no,
                    hash,
                    binary,
                )?;
                tracing::debug!(slot = slot.0, block_no, "appended block");
                Ok(())
            })(),
        };
        self.seal_write(guard, result)
    }

    /// Append the epoch boundary block of `epoch`. Only allowed into a
    /// future epoch, or into the current one while it has no entries yet.
    pub fn append_ebb(
        &self,
        epoch: EpochNo,
        block_no: u64,
        hash: H,
        binary: BinaryInfo<'_>,
    ) -> Result<()> {
        let mut guard = self.inner.state.write();
        let result = match &mut *guard {
            DbState::Closed => Err(Error::ClosedDb),
            DbState::Open(state) => (|| {
                let current = state.current_epoch;
                if epoch < current || (epoch == current && !state.entries.is_empty()) {
                    return Err(Error::AppendToEbbInThePast { epoch, current });
                }
                let position = EpochSlot::new(epoch, RelativeSlot(0));
                self.inner.append_entry(
                    state,
                    position,
                    BlockOrEbb::Ebb(epoch),
                    block_no,
                    hash,
                    binary,
                )?;
                tracing::debug!(epoch = epoch.0, block_no, "appended EBB");
                Ok(())
            })(),
        };
        self.seal_write(guard, result)
    }

    /// Project `component` out of the block at `slot`. None for empty
    /// slots and for boundary-block slots.
    pub fn get_block_component<C: BlockComponent<H>>(
        &self,
        slot: SlotNo,
        component: &C,
    ) -> Result<Option<C::Output>> {
        let snapshot = self.inner.snapshot()?;
        let tip_slot = self.inner.tip_slot(&snapshot.tip)?;
        if tip_slot.map_or(true, |tip| slot > tip) {
            return Err(self.traced(Error::ReadFutureSlot {
                slot,
                tip: tip_slot,
            }));
        }
        let position = self.inner.epoch_info.epoch_slot_of(slot)?;
        match self.inner.resolve(&snapshot, position)? {
            Some(resolved) if !resolved.entry.block_or_ebb.is_ebb() => self
                .inner
                .evaluate(&resolved, component)
                .map(Some),
            _ => Ok(None),
        }
    }

    /// Project `component` out of `epoch`'s boundary block, if one exists.
    pub fn get_ebb_component<C: BlockComponent<H>>(
        &self,
        epoch: EpochNo,
        component: &C,
    ) -> Result<Option<C::Output>> {
        let snapshot = self.inner.snapshot()?;
        let tip_epoch = self.inner.tip_epoch(&snapshot.tip)?;
        if tip_epoch.map_or(true, |tip| epoch > tip) {
            return Err(self.traced(Error::ReadFutureEbb {
                epoch,
                current: tip_epoch,
            }));
        }
        let position = EpochSlot::new(epoch, RelativeSlot(0));
        match self.inner.resolve(&snapshot, position)? {
            Some(resolved) if resolved.entry.block_or_ebb.is_ebb() => self
                .inner
                .evaluate(&resolved, component)
                .map(Some),
            _ => Ok(None),
        }
    }

    /// Project `component` out of whatever sits at `slot` if its hash is
    /// `hash` - block or EBB. A hash mismatch is None, not an error.
    pub fn get_block_or_ebb_component<C: BlockComponent<H>>(
        &self,
        slot: SlotNo,
        hash: &H,
        component: &C,
    ) -> Result<Option<C::Output>> {
        let snapshot = self.inner.snapshot()?;
        let tip_slot = self.inner.tip_slot(&snapshot.tip)?;
        if tip_slot.map_or(true, |tip| slot > tip) {
            return Err(self.traced(Error::ReadFutureSlot {
                slot,
                tip: tip_slot,
            }));
        }
        let position = self.inner.epoch_info.epoch_slot_of(slot)?;
        match self.inner.resolve(&snapshot, position)? {
            Some(resolved) if resolved.entry.hash == *hash => self
                .inner
                .evaluate(&resolved, component)
                .map(Some),
            _ => Ok(None),
        }
    }

    /// Stream `component` over every entry in `from..=to`. Both endpoints
    /// must hold an entry.
    pub fn stream<C: BlockComponent<H>>(
        &self,
        from: SlotNo,
        to: SlotNo,
        component: C,
    ) -> Result<BlockIterator<H, I, P, C>> {
        let snapshot = self.inner.snapshot()?;
        if from > to {
            return Err(self.traced(Error::InvalidIteratorRange { from, to }));
        }
        let tip_slot = self.inner.tip_slot(&snapshot.tip)?;
        if tip_slot.map_or(true, |tip| to > tip) {
            return Err(self.traced(Error::ReadFutureSlot {
                slot: to,
                tip: tip_slot,
            }));
        }
        let start = self.inner.epoch_info.epoch_slot_of(from)?;
        let end = self.inner.epoch_info.epoch_slot_of(to)?;
        if self.inner.resolve(&snapshot, start)?.is_none() {
            return Err(self.traced(Error::IteratorBoundMissing {
                bound: IteratorBound::Start,
                slot: from,
            }));
        }
        if self.inner.resolve(&snapshot, end)?.is_none() {
            return Err(self.traced(Error::IteratorBoundMissing {
                bound: IteratorBound::End,
                slot: to,
            }));
        }
        self.inner.open_iterators.fetch_add(1, Ordering::SeqCst);
        match BlockIterator::new(Arc::clone(&self.inner), snapshot, component, start, end) {
            Ok(iterator) => Ok(iterator),
            Err(err) => {
                self.inner.iterator_closed();
                Err(err)
            }
        }
    }

    /// Privileged recovery: drop every entry after `new_tip` (None means
    /// everything). Requires no outstanding iterators. A no-op when
    /// `new_tip` is at or past the current tip.
    pub fn delete_after(&self, new_tip: Option<BlockOrEbb>) -> Result<()> {
        let mut guard = self.inner.state.write();
        let state = match &*guard {
            DbState::Closed => return Err(self.traced(Error::ClosedDb)),
            DbState::Open(state) => state,
        };
        let iterators = self.inner.open_iterators.load(Ordering::SeqCst);
        if iterators > 0 {
            return Err(self.traced(Error::OpenIterators(iterators)));
        }

        let current = match self.tip_position(&state.tip)? {
            // Nothing on disk to delete.
            None => return Ok(()),
            Some(position) => position,
        };
        let target = match &new_tip {
            None => None,
            Some(block) => Some(self.block_position(block)?),
        };
        if let Some(target) = target {
            if target >= current {
                return Ok(());
            }
        }
        tracing::info!(target = ?new_tip, "deleting after tip");

        // Handles must go before files do.
        *guard = DbState::Closed;

        let result = (|| {
            let epochs = layout::list_epochs(&self.inner.root)?;
            match target {
                None => {
                    for epoch in epochs {
                        layout::remove_epoch(&self.inner.root, epoch)?;
                    }
                }
                Some(position) => {
                    for &epoch in epochs.iter().filter(|e| e.0 > position.epoch.0) {
                        layout::remove_epoch(&self.inner.root, epoch)?;
                    }
                    self.truncate_within_epoch(position)?;
                }
            }
            self.inner.cache.restart();
            let validated = validation::validate(
                &self.inner.root,
                &self.inner.epoch_info,
                &self.inner.parser,
                ValidationPolicy::ValidateMostRecentEpoch,
            )?;
            OpenState::seed(&self.inner.root, validated)
        })();

        match result {
            Ok(state) => {
                tracing::info!(
                    tip = ?state.tip.info().map(|info| info.block),
                    "truncated to new tip"
                );
                *guard = DbState::Open(state);
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "truncation failed, database stays closed");
                Err(err)
            }
        }
    }

    /// Cut the target epoch's three files back to the entry at `position`.
    fn truncate_within_epoch(&self, position: EpochSlot) -> Result<()> {
        let root = self.inner.root.as_path();
        let epoch = position.epoch;
        let epoch_size = self.inner.epoch_info.epoch_size(epoch)?;
        let primary_path = layout::primary_file(root, epoch);
        let bytes = layout::read_all(&primary_path)?;
        let mut primary = PrimaryIndex::decode(epoch_size, &bytes)
            .map_err(|reason| Error::InvalidPrimaryIndex { epoch, reason })?;

        let entry_size = SecondaryEntry::<H>::size();
        let secondary_path = layout::secondary_file(root, epoch);
        let old_entries = SecondaryEntry::<H>::decode_all(&layout::read_all(&secondary_path)?)
            .map_err(|reason| Error::InvalidSecondaryIndex { epoch, reason })?;

        // Everything at an offset past the target's bracket goes. An empty
        // target slot truncates to the last filled entry before it.
        let keep_end = primary.bounds(position.relative).1;
        let survivors = keep_end as usize / entry_size;
        primary.truncate_after(Some(position.relative));
        layout::write_all(&primary_path, &primary.encode())?;
        layout::truncate(&secondary_path, keep_end as u64)?;
        if survivors < old_entries.len() {
            let epoch_len = old_entries[survivors].block_offset;
            layout::truncate(&layout::epoch_file(root, epoch), epoch_len)?;
        }
        Ok(())
    }

    fn tip_position(&self, tip: &Tip<H>) -> Result<Option<EpochSlot>> {
        match tip {
            Tip::Origin => Ok(None),
            Tip::At(info) => self.block_position(&info.block).map(Some),
        }
    }

    fn block_position(&self, block: &BlockOrEbb) -> Result<EpochSlot> {
        match block {
            BlockOrEbb::Block(slot) => self.inner.epoch_info.epoch_slot_of(*slot),
            BlockOrEbb::Ebb(epoch) => Ok(EpochSlot::new(*epoch, RelativeSlot(0))),
        }
    }

    /// Trace a user error on its way out.
    fn traced(&self, err: Error) -> Error {
        if err.is_user_error() {
            tracing::warn!(error = %err, "rejected operation");
        }
        err
    }

    /// Finish a write: trace user errors, close the database on anything
    /// worse.
    fn seal_write(
        &self,
        mut guard: parking_lot::RwLockWriteGuard<'_, DbState<H>>,
        result: Result<()>,
    ) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_user_error() => {
                drop(guard);
                Err(self.traced(err))
            }
            Err(err) => {
                tracing::error!(error = %err, "write failed, closing the database");
                *guard = DbState::Closed;
                Err(err)
            }
        }
    }
}

impl<H, I, P> Clone for ImmutableDb<H, I, P> {
    fn clone(&self) -> Self {
        ImmutableDb {
            inner: Arc::clone(&self.inner),
        }
    }
}
