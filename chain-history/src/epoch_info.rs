//! Epoch geometry oracle backed by a hard-fork [`Summary`].

use crate::query::PastHorizonError;
use crate::summary::Summary;
use crate::units::{EpochNo, EpochSize, SlotNo};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

type FetchSummary = dyn Fn() -> Summary + Send + Sync;

/// Answers epoch-size and slot-position queries against a summary.
///
/// The *snapshot* variant ([`EpochInfo::fixed`]) holds one summary and
/// surfaces any past-horizon miss immediately. The *refetching* variant
/// ([`EpochInfo::refetching`]) re-derives the summary once per miss and
/// retries, surfacing the error only if the fresh summary misses too.
pub struct EpochInfo {
    summary: Mutex<Arc<Summary>>,
    refetch: Option<Box<FetchSummary>>,
}

impl EpochInfo {
    pub fn fixed(summary: Summary) -> Self {
        EpochInfo {
            summary: Mutex::new(Arc::new(summary)),
            refetch: None,
        }
    }

    pub fn refetching<F>(initial: Summary, fetch: F) -> Self
    where
        F: Fn() -> Summary + Send + Sync + 'static,
    {
        EpochInfo {
            summary: Mutex::new(Arc::new(initial)),
            refetch: Some(Box::new(fetch)),
        }
    }

    pub fn epoch_size(&self, epoch: EpochNo) -> Result<EpochSize, PastHorizonError> {
        self.query(|summary| summary.epoch_to_slot(epoch).map(|(_, size)| size))
    }

    pub fn first_slot_of(&self, epoch: EpochNo) -> Result<SlotNo, PastHorizonError> {
        self.query(|summary| summary.epoch_to_slot(epoch).map(|(slot, _)| slot))
    }

    pub fn epoch_of(&self, slot: SlotNo) -> Result<EpochNo, PastHorizonError> {
        self.query(|summary| summary.slot_to_epoch(slot).map(|(epoch, _)| epoch))
    }

    pub fn slot_in_epoch(&self, slot: SlotNo) -> Result<u64, PastHorizonError> {
        self.query(|summary| summary.slot_to_epoch(slot).map(|(_, offset)| offset))
    }

    /// The summary currently backing this oracle.
    pub fn summary(&self) -> Arc<Summary> {
        Arc::clone(&self.summary.lock())
    }

    fn query<T>(
        &self,
        run: impl Fn(&Summary) -> Result<T, PastHorizonError>,
    ) -> Result<T, PastHorizonError> {
        let snapshot = self.summary();
        match run(&snapshot) {
            Ok(value) => Ok(value),
            Err(miss) => match &self.refetch {
                None => Err(miss),
                Some(fetch) => {
                    let fresh = Arc::new(fetch());
                    *self.summary.lock() = Arc::clone(&fresh);
                    run(&fresh)
                }
            },
        }
    }
}

impl fmt::Debug for EpochInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpochInfo")
            .field("summary", &self.summary.lock())
            .field("refetching", &self.refetch.is_some())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::era::{EraParams, SafeZone, Shape, SlotLength, Transitions};
    use crate::summary::summarize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn shape() -> Shape {
        Shape::single(EraParams {
            epoch_size: EpochSize(10),
            slot_length: SlotLength::from_secs(1),
            safe_zone: SafeZone::from_tip(5),
        })
        .unwrap()
    }

    #[test]
    fn fixed_oracle_answers_within_the_horizon() {
        let summary = summarize(Some(SlotNo(7)), &shape(), &Transitions::none());
        let info = EpochInfo::fixed(summary);

        assert_eq!(info.epoch_size(EpochNo(1)).unwrap(), EpochSize(10));
        assert_eq!(info.first_slot_of(EpochNo(1)).unwrap(), SlotNo(10));
        assert_eq!(info.epoch_of(SlotNo(15)).unwrap(), EpochNo(1));
        assert_eq!(info.slot_in_epoch(SlotNo(15)).unwrap(), 5);
        assert!(info.epoch_of(SlotNo(20)).is_err());
    }

    #[test]
    fn refetching_oracle_retries_once_with_a_fresh_summary() {
        let shape = shape();
        let initial = summarize(Some(SlotNo(0)), &shape, &Transitions::none());
        let fetches = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fetches);
        let info = EpochInfo::refetching(initial, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            // A later tip pushes the horizon out far enough for epoch 3.
            summarize(Some(SlotNo(35)), &shape, &Transitions::none())
        });

        // Within the initial horizon: no refetch.
        assert_eq!(info.epoch_of(SlotNo(3)).unwrap(), EpochNo(0));
        assert_eq!(fetches.load(Ordering::SeqCst), 0);

        // Past the initial horizon: one refetch, then success.
        assert_eq!(info.epoch_of(SlotNo(35)).unwrap(), EpochNo(3));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // Past even the fresh horizon: one more refetch, then the miss
        // surfaces.
        assert!(info.epoch_of(SlotNo(500)).is_err());
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }
}
