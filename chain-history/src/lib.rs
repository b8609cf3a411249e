//! Hard-fork history: piecewise-linear time arithmetic for a chain whose
//! slot length and epoch size change at era transitions, bounded by a safe
//! zone past which no prediction is made.

pub mod epoch_info;
pub mod era;
pub mod query;
pub mod summary;
pub mod time;
pub mod units;

#[cfg(any(test, feature = "property-test-api"))]
pub mod testing;

pub use epoch_info::EpochInfo;
pub use era::{EraParams, SafeZone, Shape, ShapeError, SlotLength, Transitions};
pub use query::{HorizonQuery, PastHorizonError};
pub use summary::{summarize, Bound, EraSummary, Summary, SummaryError};
pub use time::{RelativeTime, SystemStart};
pub use units::{EpochNo, EpochSize, SlotNo};
