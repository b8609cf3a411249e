//! Per-epoch indices: fixed-width secondary entries addressed by a
//! primary array of offsets, one pair of files per epoch.

pub mod primary;
pub mod secondary;

pub use primary::PrimaryIndex;
pub use secondary::SecondaryEntry;
