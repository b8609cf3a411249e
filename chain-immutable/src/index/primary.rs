//! The primary index: a version byte followed by `epoch_size + 2` offsets
//! into the secondary file. `P[0]` is always 0 and `P[r + 1]` is the end
//! offset of relative slot `r`'s entry; a slot is empty iff its bracketing
//! offsets are equal. Offsets past the last filled slot all equal the
//! secondary file's size, so the file keeps its full length from the moment
//! the epoch starts.

use crate::types::RelativeSlot;
use chain_history::EpochSize;

pub(crate) const VERSION: u8 = 1;

/// In-memory image of one epoch's primary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryIndex {
    epoch_size: u64,
    /// `epoch_size + 2` end offsets; `offsets[0] == 0`.
    offsets: Vec<u32>,
}

impl PrimaryIndex {
    /// The index of an epoch with no entries yet.
    pub fn empty(epoch_size: EpochSize) -> Self {
        PrimaryIndex {
            epoch_size: epoch_size.0,
            offsets: vec![0; epoch_size.0 as usize + 2],
        }
    }

    /// Encoded file length for an epoch of `epoch_size` slots.
    pub fn file_size(epoch_size: EpochSize) -> u64 {
        1 + 4 * (epoch_size.0 + 2)
    }

    /// End offset of the last entry, i.e. the secondary file's size.
    pub fn last_offset(&self) -> u32 {
        *self.offsets.last().expect("offsets are never empty")
    }

    /// Whether `relative` can be addressed by this index at all.
    pub fn in_range(&self, relative: RelativeSlot) -> bool {
        relative.0 < self.epoch_size
    }

    /// Start and end offsets of `relative`'s entry in the secondary file.
    pub fn bounds(&self, relative: RelativeSlot) -> (u32, u32) {
        let r = relative.0 as usize;
        (self.offsets[r], self.offsets[r + 1])
    }

    pub fn is_filled(&self, relative: RelativeSlot) -> bool {
        let (start, end) = self.bounds(relative);
        start != end
    }

    /// Position of `relative`'s entry in the secondary file, if filled.
    pub fn entry_index(&self, relative: RelativeSlot, entry_size: usize) -> Option<usize> {
        if !self.in_range(relative) || !self.is_filled(relative) {
            return None;
        }
        Some(self.bounds(relative).0 as usize / entry_size)
    }

    /// The first filled slot at or after `from`.
    pub fn next_filled(&self, from: RelativeSlot) -> Option<RelativeSlot> {
        (from.0..self.epoch_size)
            .map(RelativeSlot)
            .find(|r| self.is_filled(*r))
    }

    /// Record a new entry ending at `new_end` for `relative`: every offset
    /// from `relative + 1` to the bracket at the end of the file moves to
    /// `new_end`, keeping all later slots empty.
    ///
    /// Returns the first offset position that changed, for positioned file
    /// writes.
    pub fn fill(&mut self, relative: RelativeSlot, new_end: u32) -> usize {
        debug_assert!(self.in_range(relative));
        debug_assert!(!self.is_filled(relative));
        debug_assert_eq!(self.bounds(relative).0, self.last_offset());
        let first = relative.0 as usize + 1;
        for offset in &mut self.offsets[first..] {
            *offset = new_end;
        }
        first
    }

    /// Drop every entry after `relative`'s: offsets past its bracket are
    /// clamped back to it. With `None`, the whole epoch empties.
    pub fn truncate_after(&mut self, relative: Option<RelativeSlot>) {
        let (first, end) = match relative {
            None => (1, 0),
            Some(r) => (r.0 as usize + 2, self.bounds(r).1),
        };
        for offset in &mut self.offsets[first..] {
            *offset = end;
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.offsets.len() * 4);
        out.push(VERSION);
        for offset in &self.offsets {
            out.extend_from_slice(&offset.to_le_bytes());
        }
        out
    }

    /// Bytes of the offsets starting at offset position `from`, together
    /// with their position in the encoded file.
    pub fn encode_tail(&self, from: usize) -> (u64, Vec<u8>) {
        let mut out = Vec::with_capacity((self.offsets.len() - from) * 4);
        for offset in &self.offsets[from..] {
            out.extend_from_slice(&offset.to_le_bytes());
        }
        (1 + 4 * from as u64, out)
    }

    pub fn decode(epoch_size: EpochSize, bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() as u64 != Self::file_size(epoch_size) {
            return Err("file has the wrong length for its epoch size");
        }
        if bytes[0] != VERSION {
            return Err("unknown version byte");
        }
        let offsets: Vec<u32> = bytes[1..]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        if offsets[0] != 0 {
            return Err("first offset is not zero");
        }
        if offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err("offsets are not monotonic");
        }
        Ok(PrimaryIndex {
            epoch_size: epoch_size.0,
            offsets,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const E: u32 = 57;

    fn filled(slots: &[(u64, u32)]) -> PrimaryIndex {
        let mut index = PrimaryIndex::empty(EpochSize(10));
        for &(rel, end) in slots {
            index.fill(RelativeSlot(rel), end);
        }
        index
    }

    #[test]
    fn fill_extends_the_tail() {
        let index = filled(&[(1, E), (2, 2 * E), (5, 3 * E)]);

        let expected = [
            0,
            0,
            E,
            2 * E,
            2 * E,
            2 * E,
            3 * E,
            3 * E,
            3 * E,
            3 * E,
            3 * E,
            3 * E,
        ];
        let expected_bytes: Vec<u8> = expected.iter().flat_map(|o| o.to_le_bytes()).collect();
        assert_eq!(index.encode()[0], 1);
        assert_eq!(index.encode()[1..], expected_bytes);

        assert!(index.is_filled(RelativeSlot(5)));
        assert!(!index.is_filled(RelativeSlot(3)));
        assert_eq!(index.bounds(RelativeSlot(5)), (2 * E, 3 * E));
        assert_eq!(index.last_offset(), 3 * E);
        assert_eq!(index.next_filled(RelativeSlot(3)), Some(RelativeSlot(5)));
        assert_eq!(index.next_filled(RelativeSlot(6)), None);
    }

    #[test]
    fn truncate_after_clamps_later_offsets() {
        let mut index = filled(&[(1, E), (2, 2 * E), (5, 3 * E)]);
        index.truncate_after(Some(RelativeSlot(2)));

        assert!(index.is_filled(RelativeSlot(2)));
        assert!(!index.is_filled(RelativeSlot(5)));
        assert_eq!(index.last_offset(), 2 * E);
        assert_eq!(index.next_filled(RelativeSlot(3)), None);

        index.truncate_after(None);
        assert_eq!(index.last_offset(), 0);
        assert_eq!(index.next_filled(RelativeSlot(0)), None);
    }

    #[test]
    fn codec_round_trips_and_validates() {
        let index = filled(&[(1, E), (4, 2 * E)]);
        let bytes = index.encode();

        assert_eq!(bytes.len() as u64, PrimaryIndex::file_size(EpochSize(10)));
        assert_eq!(PrimaryIndex::decode(EpochSize(10), &bytes), Ok(index));

        assert!(PrimaryIndex::decode(EpochSize(9), &bytes).is_err());

        let mut wrong_version = bytes.clone();
        wrong_version[0] = 7;
        assert_eq!(
            PrimaryIndex::decode(EpochSize(10), &wrong_version),
            Err("unknown version byte")
        );

        let mut nonmonotonic = bytes;
        nonmonotonic[5..9].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(PrimaryIndex::decode(EpochSize(10), &nonmonotonic).is_err());
    }

    #[test]
    fn encode_tail_addresses_the_changed_suffix() {
        let mut index = PrimaryIndex::empty(EpochSize(10));
        let first = index.fill(RelativeSlot(5), E);

        let (position, bytes) = index.encode_tail(first);
        assert_eq!(position, 1 + 4 * 6);
        assert_eq!(bytes.len(), 4 * 6);
        assert!(bytes.chunks_exact(4).all(|c| c == E.to_le_bytes()));
    }
}
