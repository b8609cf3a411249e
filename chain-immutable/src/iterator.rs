//! Forward cursor over a slot range. The cursor owns a snapshot of the
//! open state taken at creation: entries appended while it lives are never
//! enumerated.

use crate::component::BlockComponent;
use crate::db::{DbInner, ReadSnapshot};
use crate::error::Result;
use crate::index::{PrimaryIndex, SecondaryEntry};
use crate::parser::BlockParser;
use crate::types::{BlockHash, EpochInfo, EpochSlot, RelativeSlot};
use std::sync::Arc;

pub struct BlockIterator<H, I, P, C> {
    inner: Arc<DbInner<H, I, P>>,
    snapshot: ReadSnapshot<H>,
    component: C,
    /// Next position to look at; None once exhausted.
    position: Option<EpochSlot>,
    /// Last position to enumerate, inclusive.
    end: EpochSlot,
    /// Index of the epoch under the cursor.
    primary: Arc<PrimaryIndex>,
    entries: Arc<Vec<SecondaryEntry<H>>>,
    closed: bool,
}

impl<H, I, P, C> BlockIterator<H, I, P, C>
where
    H: BlockHash,
    I: EpochInfo,
    P: BlockParser<H>,
    C: BlockComponent<H>,
{
    pub(crate) fn new(
        inner: Arc<DbInner<H, I, P>>,
        snapshot: ReadSnapshot<H>,
        component: C,
        start: EpochSlot,
        end: EpochSlot,
    ) -> Result<Self> {
        let (primary, entries) = inner.epoch_data(&snapshot, start.epoch)?;
        Ok(BlockIterator {
            inner,
            snapshot,
            component,
            position: Some(start),
            end,
            primary,
            entries,
            closed: false,
        })
    }

    /// The next component in the range, or None once the range (or the
    /// iterator) is done. Errors close the iterator.
    pub fn next(&mut self) -> Option<Result<C::Output>> {
        if self.closed {
            return None;
        }
        loop {
            let position = match self.position {
                Some(position) if position <= self.end => position,
                _ => {
                    self.close();
                    return None;
                }
            };

            match self.primary.next_filled(position.relative) {
                Some(relative) => {
                    let found = EpochSlot::new(position.epoch, relative);
                    if found > self.end {
                        self.close();
                        return None;
                    }
                    self.position = Some(EpochSlot::new(found.epoch, RelativeSlot(relative.0 + 1)));
                    let entry = &self.entries;
                    let result = self
                        .inner
                        .resolve_in(&self.snapshot, found, &self.primary, entry)
                        .and_then(|resolved| {
                            self.inner
                                .evaluate(&resolved, &self.component)
                        });
                    if result.is_err() {
                        self.close();
                    }
                    return Some(result);
                }
                None => {
                    // Epoch exhausted; move to the next one.
                    let next_epoch = position.epoch.next();
                    if next_epoch > self.end.epoch {
                        self.close();
                        return None;
                    }
                    match self.inner.epoch_data(&self.snapshot, next_epoch) {
                        Ok((primary, entries)) => {
                            self.primary = primary;
                            self.entries = entries;
                            self.position = Some(EpochSlot::new(next_epoch, RelativeSlot(0)));
                        }
                        Err(err) => {
                            self.close();
                            return Some(Err(err));
                        }
                    }
                }
            }
        }
    }

    /// Release the cursor. Idempotent; also run by drop.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.iterator_closed();
        }
    }
}

impl<H, I, P, C> Drop for BlockIterator<H, I, P, C> {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.iterator_closed();
        }
    }
}
