//! Era parameters: the statically known shape of the chain and the
//! transitions that have been confirmed on it.

use crate::units::{EpochNo, EpochSize};
use std::time::Duration;
use thiserror::Error;

/// Length of every slot in an era.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotLength(Duration);

impl SlotLength {
    pub fn from_secs(secs: u64) -> Self {
        SlotLength(Duration::from_secs(secs))
    }

    pub fn from_millis(millis: u64) -> Self {
        SlotLength(Duration::from_millis(millis))
    }

    pub fn to_duration(&self) -> Duration {
        self.0
    }

    /// Total duration of `count` slots of this length.
    ///
    /// Computed in 128-bit nanoseconds so that counts far beyond `u32`
    /// do not overflow.
    pub fn times(&self, count: u64) -> Duration {
        let nanos = self.0.as_nanos() * count as u128;
        Duration::new(
            (nanos / 1_000_000_000) as u64,
            (nanos % 1_000_000_000) as u32,
        )
    }
}

/// Span past the ledger tip within which no era transition can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafeZone {
    /// Number of slots past the tip guaranteed to stay in the era.
    pub from_tip: u64,
    /// If set, no transition out of the era can happen before this epoch.
    pub before_epoch: Option<EpochNo>,
}

impl SafeZone {
    pub fn from_tip(slots: u64) -> Self {
        SafeZone {
            from_tip: slots,
            before_epoch: None,
        }
    }
}

/// Parameters of a single era.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraParams {
    pub epoch_size: EpochSize,
    pub slot_length: SlotLength,
    pub safe_zone: SafeZone,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("era shape must contain at least one era")]
    Empty,
    #[error("era {index} has a zero epoch size")]
    ZeroEpochSize { index: usize },
    #[error("era {index} has a zero slot length")]
    ZeroSlotLength { index: usize },
    #[error("{got} transition epochs given for {eras} eras")]
    TooManyTransitions { eras: usize, got: usize },
    #[error("transition epochs must be nonzero and strictly increasing")]
    NonMonotonicTransitions,
}

/// The exactly-N list of eras the chain can ever be in, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape(Vec<EraParams>);

impl Shape {
    /// Validate and adopt an era list: non-empty, with strictly positive
    /// epoch sizes and slot lengths.
    pub fn new(eras: Vec<EraParams>) -> Result<Self, ShapeError> {
        if eras.is_empty() {
            return Err(ShapeError::Empty);
        }
        for (index, era) in eras.iter().enumerate() {
            if era.epoch_size.0 == 0 {
                return Err(ShapeError::ZeroEpochSize { index });
            }
            if era.slot_length.to_duration().is_zero() {
                return Err(ShapeError::ZeroSlotLength { index });
            }
        }
        Ok(Shape(eras))
    }

    /// A single-era chain, the degenerate but common case.
    pub fn single(era: EraParams) -> Result<Self, ShapeError> {
        Shape::new(vec![era])
    }

    pub fn eras(&self) -> &[EraParams] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Confirmed transition epochs: the first entry is the epoch at which the
/// second era starts, and so on. At most `shape.len() - 1` entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transitions(Vec<EpochNo>);

impl Transitions {
    /// No transition is confirmed yet; the chain is still in its first era.
    pub fn none() -> Self {
        Transitions(Vec::new())
    }

    /// Validate confirmed transitions against a shape: at most N-1 of them,
    /// nonzero and strictly increasing so no era is empty.
    pub fn new(shape: &Shape, epochs: Vec<EpochNo>) -> Result<Self, ShapeError> {
        if epochs.len() >= shape.len() {
            return Err(ShapeError::TooManyTransitions {
                eras: shape.len(),
                got: epochs.len(),
            });
        }
        let mut previous = EpochNo(0);
        for &epoch in &epochs {
            if epoch <= previous {
                return Err(ShapeError::NonMonotonicTransitions);
            }
            previous = epoch;
        }
        Ok(Transitions(epochs))
    }

    pub fn epochs(&self) -> &[EpochNo] {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn era(size: u64, secs: u64) -> EraParams {
        EraParams {
            epoch_size: EpochSize(size),
            slot_length: SlotLength::from_secs(secs),
            safe_zone: SafeZone::from_tip(10),
        }
    }

    #[test]
    fn shape_rejects_degenerate_eras() {
        assert_eq!(Shape::new(vec![]), Err(ShapeError::Empty));
        assert_eq!(
            Shape::new(vec![era(0, 1)]),
            Err(ShapeError::ZeroEpochSize { index: 0 })
        );
        assert_eq!(
            Shape::new(vec![era(10, 1), era(20, 0)]),
            Err(ShapeError::ZeroSlotLength { index: 1 })
        );
        assert!(Shape::new(vec![era(10, 1)]).is_ok());
    }

    #[test]
    fn transitions_are_bounded_and_monotonic() {
        let shape = Shape::new(vec![era(10, 1), era(20, 2)]).unwrap();

        assert!(Transitions::new(&shape, vec![]).is_ok());
        assert!(Transitions::new(&shape, vec![EpochNo(3)]).is_ok());
        assert_eq!(
            Transitions::new(&shape, vec![EpochNo(3), EpochNo(5)]),
            Err(ShapeError::TooManyTransitions { eras: 2, got: 2 })
        );
        assert_eq!(
            Transitions::new(&shape, vec![EpochNo(0)]),
            Err(ShapeError::NonMonotonicTransitions)
        );
    }

    #[test]
    fn slot_length_scales_without_overflow() {
        let len = SlotLength::from_millis(1_500);
        assert_eq!(len.times(4), Duration::from_secs(6));
        assert_eq!(len.times(0), Duration::ZERO);

        let one_sec = SlotLength::from_secs(1);
        assert_eq!(one_sec.times(10_000_000_000), Duration::from_secs(10_000_000_000));
    }
}
