//! Conversions between wall-clock time, slots and epochs, valid up to the
//! summary's horizon.

use crate::era::SlotLength;
use crate::summary::{Bound, Summary};
use crate::time::RelativeTime;
use crate::units::{EpochNo, EpochSize, SlotNo};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The conversion that fell outside the summary, with its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HorizonQuery {
    WallclockToSlot(RelativeTime),
    SlotToWallclock(SlotNo),
    SlotToEpoch(SlotNo),
    EpochToSlot(EpochNo),
}

impl fmt::Display for HorizonQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HorizonQuery::WallclockToSlot(at) => {
                write!(f, "wallclock {:?} to slot", at.as_duration())
            }
            HorizonQuery::SlotToWallclock(slot) => write!(f, "slot {} to wallclock", slot),
            HorizonQuery::SlotToEpoch(slot) => write!(f, "slot {} to epoch", slot),
            HorizonQuery::EpochToSlot(epoch) => write!(f, "epoch {} to slot", epoch),
        }
    }
}

/// A conversion was asked for a point the summary cannot predict.
///
/// Carries the summary that was consulted so the caller can decide whether a
/// fresher one (derived from a newer ledger tip) might answer the query.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{query} is past the horizon (slot {}, epoch {})", horizon.slot, horizon.epoch)]
pub struct PastHorizonError {
    pub query: HorizonQuery,
    pub horizon: Bound,
    pub summary: Summary,
}

impl Summary {
    fn past_horizon(&self, query: HorizonQuery) -> PastHorizonError {
        PastHorizonError {
            query,
            horizon: self.horizon(),
            summary: self.clone(),
        }
    }

    /// Slot containing `at`, along with how far into the slot `at` falls.
    pub fn wallclock_to_slot(
        &self,
        at: RelativeTime,
    ) -> Result<(SlotNo, Duration), PastHorizonError> {
        let era = self
            .find(|era| era.contains_time(at))
            .ok_or_else(|| self.past_horizon(HorizonQuery::WallclockToSlot(at)))?;
        let since_start = at
            .elapsed_since(era.start.time)
            .expect("era contains the queried time");
        let slot_len = era.params.slot_length.to_duration();
        let slots = (since_start.as_nanos() / slot_len.as_nanos()) as u64;
        let into_slot = since_start - era.params.slot_length.times(slots);
        Ok((SlotNo(era.start.slot.0 + slots), into_slot))
    }

    /// Start time of `slot`, along with the slot length in force there.
    pub fn slot_to_wallclock(
        &self,
        slot: SlotNo,
    ) -> Result<(RelativeTime, SlotLength), PastHorizonError> {
        let era = self
            .find(|era| era.contains_slot(slot))
            .ok_or_else(|| self.past_horizon(HorizonQuery::SlotToWallclock(slot)))?;
        let slots = slot.0 - era.start.slot.0;
        let time = era.start.time + era.params.slot_length.times(slots);
        Ok((time, era.params.slot_length))
    }

    /// Epoch containing `slot`, along with the slot's position in the epoch.
    pub fn slot_to_epoch(&self, slot: SlotNo) -> Result<(EpochNo, u64), PastHorizonError> {
        let era = self
            .find(|era| era.contains_slot(slot))
            .ok_or_else(|| self.past_horizon(HorizonQuery::SlotToEpoch(slot)))?;
        let since_start = slot.0 - era.start.slot.0;
        let size = era.params.epoch_size.0;
        Ok((
            EpochNo(era.start.epoch.0 + since_start / size),
            since_start % size,
        ))
    }

    /// First slot of `epoch`, along with the epoch size in force there.
    pub fn epoch_to_slot(&self, epoch: EpochNo) -> Result<(SlotNo, EpochSize), PastHorizonError> {
        let era = self
            .find(|era| era.contains_epoch(epoch))
            .ok_or_else(|| self.past_horizon(HorizonQuery::EpochToSlot(epoch)))?;
        let epochs = epoch.0 - era.start.epoch.0;
        Ok((
            SlotNo(era.start.slot.0 + epochs * era.params.epoch_size.0),
            era.params.epoch_size,
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::era::{EraParams, SafeZone, Shape, Transitions};
    use crate::summary::summarize;
    use crate::testing::HistoryCase;
    use quickcheck::{quickcheck, TestResult};

    fn era(size: u64, secs: u64, from_tip: u64) -> EraParams {
        EraParams {
            epoch_size: crate::units::EpochSize(size),
            slot_length: SlotLength::from_secs(secs),
            safe_zone: SafeZone::from_tip(from_tip),
        }
    }

    fn two_era_summary() -> Summary {
        let shape = Shape::new(vec![era(10, 1, 5), era(20, 2, 5)]).unwrap();
        let transitions = Transitions::new(&shape, vec![EpochNo(3)]).unwrap();
        summarize(Some(SlotNo(35)), &shape, &transitions)
    }

    #[test]
    fn wallclock_to_slot_returns_the_leftover() {
        let shape = Shape::single(era(10, 1, 5)).unwrap();
        let summary = summarize(Some(SlotNo(7)), &shape, &Transitions::none());

        let at = RelativeTime::new(Duration::from_millis(3_250));
        let (slot, into_slot) = summary.wallclock_to_slot(at).unwrap();
        assert_eq!(slot, SlotNo(3));
        assert_eq!(into_slot, Duration::from_millis(250));
    }

    #[test]
    fn queries_cross_the_era_boundary() {
        let summary = two_era_summary();

        // Slot 45 is 15 slots into the second era's first epoch (size 20).
        assert_eq!(summary.slot_to_epoch(SlotNo(45)).unwrap(), (EpochNo(3), 15));

        // Second-era slots are two seconds long.
        let (time, len) = summary.slot_to_wallclock(SlotNo(31)).unwrap();
        assert_eq!(time, RelativeTime::START + Duration::from_secs(32));
        assert_eq!(len, SlotLength::from_secs(2));

        let (slot, size) = summary.epoch_to_slot(EpochNo(3)).unwrap();
        assert_eq!(slot, SlotNo(30));
        assert_eq!(size, crate::units::EpochSize(20));
    }

    #[test]
    fn the_horizon_is_exclusive() {
        let summary = two_era_summary();
        let horizon = summary.horizon();

        assert!(summary.slot_to_epoch(SlotNo(horizon.slot.0 - 1)).is_ok());
        let err = summary.slot_to_epoch(horizon.slot).unwrap_err();
        assert_eq!(err.horizon, horizon);
        assert_eq!(err.query, HorizonQuery::SlotToEpoch(horizon.slot));
        assert!(summary
            .slot_to_epoch(SlotNo(horizon.slot.0 + 1))
            .is_err());
        assert!(summary.epoch_to_slot(horizon.epoch).is_err());
        assert!(summary.wallclock_to_slot(horizon.time).is_err());
    }

    quickcheck! {
        fn slot_round_trips_through_wallclock(case: HistoryCase, slot_offset: u64) -> TestResult {
            let summary = case.summarize();
            let horizon = summary.horizon();
            let slot = SlotNo(slot_offset % horizon.slot.0);

            let (time, _) = summary.slot_to_wallclock(slot).unwrap();
            let (back, into_slot) = summary.wallclock_to_slot(time).unwrap();
            TestResult::from_bool(back == slot && into_slot == Duration::ZERO)
        }

        fn epoch_of_slot_agrees_with_first_slot_of_epoch(case: HistoryCase, slot_offset: u64) -> TestResult {
            let summary = case.summarize();
            let horizon = summary.horizon();
            let slot = SlotNo(slot_offset % horizon.slot.0);

            let (epoch, in_epoch) = summary.slot_to_epoch(slot).unwrap();
            let (first_slot, size) = summary.epoch_to_slot(epoch).unwrap();
            TestResult::from_bool(
                first_slot.0 + in_epoch == slot.0 && in_epoch < size.0,
            )
        }

        fn summaries_are_valid_and_deterministic(case: HistoryCase) -> bool {
            let summary = case.summarize();
            summary.validate().is_ok() && summary == case.summarize()
        }
    }
}
