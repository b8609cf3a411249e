//! Summaries: the concrete era boundaries derivable from the static shape,
//! the confirmed transitions and the current ledger tip.

use crate::era::{EraParams, Shape, Transitions};
use crate::time::RelativeTime;
use crate::units::{EpochNo, SlotNo};
use thiserror::Error;

/// A point jointly fixing all three chain coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bound {
    pub time: RelativeTime,
    pub slot: SlotNo,
    pub epoch: EpochNo,
}

impl Bound {
    /// The lower bound of the first era.
    pub fn genesis() -> Self {
        Bound {
            time: RelativeTime::START,
            slot: SlotNo(0),
            epoch: EpochNo(0),
        }
    }
}

/// One era's extent: `start` inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraSummary {
    pub start: Bound,
    pub end: Bound,
    pub params: EraParams,
}

impl EraSummary {
    pub(crate) fn contains_time(&self, at: RelativeTime) -> bool {
        self.start.time <= at && at < self.end.time
    }

    pub(crate) fn contains_slot(&self, slot: SlotNo) -> bool {
        self.start.slot <= slot && slot < self.end.slot
    }

    pub(crate) fn contains_epoch(&self, epoch: EpochNo) -> bool {
        self.start.epoch <= epoch && epoch < self.end.epoch
    }
}

/// Era summaries in chain order, covering genesis up to the horizon past
/// which no prediction is possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary(Vec<EraSummary>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SummaryError {
    #[error("era {index} does not start where its predecessor ends")]
    NonContiguous { index: usize },
    #[error("era {index} is empty")]
    EmptyEra { index: usize },
    #[error("era {index} slot span disagrees with its epoch span")]
    SlotMismatch { index: usize },
    #[error("era {index} time span disagrees with its slot span")]
    TimeMismatch { index: usize },
    #[error("era {index} ends before the safe zone's earliest transition epoch")]
    SafeZoneViolated { index: usize },
}

impl Summary {
    pub fn eras(&self) -> &[EraSummary] {
        &self.0
    }

    /// The end of the last summarized era: the earliest point for which no
    /// prediction can be made.
    pub fn horizon(&self) -> Bound {
        self.0.last().expect("summary is never empty").end
    }

    /// Check the structural invariants every summary must satisfy.
    pub fn validate(&self) -> Result<(), SummaryError> {
        for (index, era) in self.0.iter().enumerate() {
            if index > 0 && self.0[index - 1].end != era.start {
                return Err(SummaryError::NonContiguous { index });
            }
            if era.end.epoch <= era.start.epoch {
                return Err(SummaryError::EmptyEra { index });
            }
            let epochs = era.end.epoch.0 - era.start.epoch.0;
            if era.end.slot.0 - era.start.slot.0 != epochs * era.params.epoch_size.0 {
                return Err(SummaryError::SlotMismatch { index });
            }
            let slots = era.end.slot.0 - era.start.slot.0;
            let expected = era.start.time + era.params.slot_length.times(slots);
            if era.end.time != expected {
                return Err(SummaryError::TimeMismatch { index });
            }
            if let Some(before) = era.params.safe_zone.before_epoch {
                if era.end.epoch < before {
                    return Err(SummaryError::SafeZoneViolated { index });
                }
            }
        }
        Ok(())
    }

    pub(crate) fn find<P>(&self, contains: P) -> Option<&EraSummary>
    where
        P: Fn(&EraSummary) -> bool,
    {
        self.0.iter().find(|era| contains(era))
    }
}

/// Advance `lo` to the start of `epoch`, walking whole epochs of `params`.
fn mk_upper_bound(params: &EraParams, lo: &Bound, epoch: EpochNo) -> Bound {
    debug_assert!(epoch >= lo.epoch);
    let epochs = epoch.0 - lo.epoch.0;
    let slots = epochs * params.epoch_size.0;
    Bound {
        time: lo.time + params.slot_length.times(slots),
        slot: SlotNo(lo.slot.0 + slots),
        epoch,
    }
}

/// Compute the era boundaries implied by the confirmed transitions and, for
/// the final era, by the safe zone measured from the ledger tip.
///
/// `ledger_tip` is None on an empty chain, which anchors the safe zone at
/// the start of the era under construction.
pub fn summarize(ledger_tip: Option<SlotNo>, shape: &Shape, transitions: &Transitions) -> Summary {
    let mut eras = Vec::with_capacity(shape.len());
    let mut lo = Bound::genesis();
    let mut confirmed = transitions.epochs().iter();

    for params in shape.eras() {
        match confirmed.next() {
            Some(&transition) => {
                let end = mk_upper_bound(params, &lo, transition);
                eras.push(EraSummary {
                    start: lo,
                    end,
                    params: *params,
                });
                lo = end;
            }
            None => {
                // Unknown transition: extend to the safe-zone horizon and
                // stop summarizing.
                let tip_slot = ledger_tip.unwrap_or(SlotNo(0)).max(lo.slot);
                let horizon_slot = tip_slot.0 + params.safe_zone.from_tip;
                let size = params.epoch_size.0;
                let whole = (horizon_slot - lo.slot.0).div_ceil(size).max(1);
                let mut horizon_epoch = EpochNo(lo.epoch.0 + whole);
                if let Some(before) = params.safe_zone.before_epoch {
                    horizon_epoch = horizon_epoch.max(before);
                }
                eras.push(EraSummary {
                    start: lo,
                    end: mk_upper_bound(params, &lo, horizon_epoch),
                    params: *params,
                });
                break;
            }
        }
    }

    let summary = Summary(eras);
    debug_assert!(summary.validate().is_ok());
    summary
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::era::{SafeZone, SlotLength};
    use crate::units::EpochSize;
    use std::time::Duration;

    fn era(size: u64, secs: u64, from_tip: u64) -> EraParams {
        EraParams {
            epoch_size: EpochSize(size),
            slot_length: SlotLength::from_secs(secs),
            safe_zone: SafeZone::from_tip(from_tip),
        }
    }

    #[test]
    fn single_era_horizon_rounds_up_to_an_epoch_boundary() {
        let shape = Shape::single(era(10, 1, 5)).unwrap();
        let summary = summarize(Some(SlotNo(7)), &shape, &Transitions::none());

        assert_eq!(summary.eras().len(), 1);
        let only = summary.eras()[0];
        assert_eq!(only.start, Bound::genesis());
        assert_eq!(only.end.slot, SlotNo(20));
        assert_eq!(only.end.epoch, EpochNo(2));
        assert_eq!(
            only.end.time,
            RelativeTime::START + Duration::from_secs(20)
        );
        summary.validate().unwrap();
    }

    #[test]
    fn confirmed_transition_splits_the_summary() {
        let shape = Shape::new(vec![era(10, 1, 5), era(20, 2, 5)]).unwrap();
        let transitions = Transitions::new(&shape, vec![EpochNo(3)]).unwrap();
        let summary = summarize(Some(SlotNo(35)), &shape, &transitions);

        assert_eq!(summary.eras().len(), 2);
        let first = summary.eras()[0];
        assert_eq!(first.end.slot, SlotNo(30));
        assert_eq!(first.end.epoch, EpochNo(3));
        assert_eq!(first.end.time, RelativeTime::START + Duration::from_secs(30));

        let second = summary.eras()[1];
        assert_eq!(second.start, first.end);
        // Horizon: tip 35 + safe zone 5 = slot 40, one 20-slot epoch past 30.
        assert_eq!(second.end.slot, SlotNo(50));
        assert_eq!(second.end.epoch, EpochNo(4));
        summary.validate().unwrap();
    }

    #[test]
    fn empty_chain_measures_the_safe_zone_from_the_era_start() {
        let shape = Shape::new(vec![era(10, 1, 5), era(20, 2, 3)]).unwrap();
        let transitions = Transitions::new(&shape, vec![EpochNo(3)]).unwrap();
        let summary = summarize(None, &shape, &transitions);

        // Tip at origin is clamped up to the second era's start slot, 30.
        let second = summary.eras()[1];
        assert_eq!(second.end.epoch, EpochNo(4));
        assert_eq!(second.end.slot, SlotNo(50));
        summary.validate().unwrap();
    }

    #[test]
    fn before_epoch_raises_the_horizon() {
        let mut params = era(10, 1, 5);
        params.safe_zone.before_epoch = Some(EpochNo(7));
        let shape = Shape::single(params).unwrap();
        let summary = summarize(Some(SlotNo(3)), &shape, &Transitions::none());

        assert_eq!(summary.horizon().epoch, EpochNo(7));
        assert_eq!(summary.horizon().slot, SlotNo(70));
        summary.validate().unwrap();
    }

    #[test]
    fn degenerate_safe_zone_still_yields_a_nonempty_era() {
        let shape = Shape::single(era(10, 1, 0)).unwrap();
        let summary = summarize(None, &shape, &Transitions::none());

        assert_eq!(summary.horizon().epoch, EpochNo(1));
        summary.validate().unwrap();
    }
}
