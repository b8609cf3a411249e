use crate::era::{EraParams, SafeZone, Shape, SlotLength, Transitions};
use crate::summary::{summarize, Summary};
use crate::units::{EpochNo, EpochSize, SlotNo};
use quickcheck::{Arbitrary, Gen};

impl Arbitrary for SlotNo {
    fn arbitrary(g: &mut Gen) -> Self {
        SlotNo(u64::arbitrary(g))
    }
}

impl Arbitrary for EpochNo {
    fn arbitrary(g: &mut Gen) -> Self {
        EpochNo(u64::arbitrary(g))
    }
}

impl Arbitrary for EpochSize {
    fn arbitrary(g: &mut Gen) -> Self {
        EpochSize(u64::arbitrary(g) % 100 + 1)
    }
}

impl Arbitrary for EraParams {
    fn arbitrary(g: &mut Gen) -> Self {
        EraParams {
            epoch_size: EpochSize::arbitrary(g),
            slot_length: SlotLength::from_millis(u64::arbitrary(g) % 20_000 + 250),
            safe_zone: SafeZone {
                from_tip: u64::arbitrary(g) % 1_000,
                before_epoch: None,
            },
        }
    }
}

/// A jointly consistent shape, transition list and ledger tip.
#[derive(Debug, Clone)]
pub struct HistoryCase {
    pub shape: Shape,
    pub transitions: Transitions,
    pub ledger_tip: Option<SlotNo>,
}

impl HistoryCase {
    pub fn summarize(&self) -> Summary {
        summarize(self.ledger_tip, &self.shape, &self.transitions)
    }
}

impl Arbitrary for HistoryCase {
    fn arbitrary(g: &mut Gen) -> Self {
        let eras = usize::arbitrary(g) % 4 + 1;
        let shape = Shape::new((0..eras).map(|_| EraParams::arbitrary(g)).collect())
            .expect("arbitrary eras are valid");

        // Strictly increasing transition epochs for a prefix of the eras.
        let confirmed = usize::arbitrary(g) % eras;
        let mut epochs = Vec::with_capacity(confirmed);
        let mut previous = 0u64;
        for _ in 0..confirmed {
            previous += u64::arbitrary(g) % 10 + 1;
            epochs.push(EpochNo(previous));
        }
        let transitions =
            Transitions::new(&shape, epochs).expect("arbitrary transitions are valid");

        let ledger_tip = if bool::arbitrary(g) {
            Some(SlotNo(u64::arbitrary(g) % 10_000))
        } else {
            None
        };

        HistoryCase {
            shape,
            transitions,
            ledger_tip,
        }
    }
}
