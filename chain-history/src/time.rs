use std::ops::Add;
use std::time::{Duration, SystemTime};

/// Wall-clock time at which slot 0 of epoch 0 starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemStart(SystemTime);

impl SystemStart {
    pub fn new(start: SystemTime) -> Self {
        SystemStart(start)
    }

    /// Position of `at` on the chain timeline.
    ///
    /// Returns None if `at` is earlier than the system start.
    pub fn offset_of(&self, at: SystemTime) -> Option<RelativeTime> {
        match at.duration_since(self.0) {
            Ok(d) => Some(RelativeTime(d)),
            Err(_) => None,
        }
    }

    /// Wall-clock time of a point on the chain timeline.
    pub fn at(&self, offset: RelativeTime) -> SystemTime {
        self.0 + offset.0
    }
}

impl From<SystemTime> for SystemStart {
    fn from(t: SystemTime) -> Self {
        SystemStart(t)
    }
}

/// A point on the chain timeline, measured from [`SystemStart`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelativeTime(Duration);

impl RelativeTime {
    /// The start of the timeline, i.e. the system start itself.
    pub const START: Self = RelativeTime(Duration::ZERO);

    pub fn new(since_start: Duration) -> Self {
        RelativeTime(since_start)
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Time elapsed since `earlier`, or None if `earlier` is later than self.
    pub fn elapsed_since(&self, earlier: RelativeTime) -> Option<Duration> {
        self.0.checked_sub(earlier.0)
    }
}

impl Add<Duration> for RelativeTime {
    type Output = RelativeTime;

    fn add(self, d: Duration) -> RelativeTime {
        RelativeTime(self.0 + d)
    }
}

impl From<Duration> for RelativeTime {
    fn from(d: Duration) -> Self {
        RelativeTime(d)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn offsets_round_trip_through_the_start() {
        let start = SystemStart::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000));
        let at = SystemTime::UNIX_EPOCH + Duration::from_secs(1_042);

        let offset = start.offset_of(at).unwrap();
        assert_eq!(offset, RelativeTime::new(Duration::from_secs(42)));
        assert_eq!(start.at(offset), at);

        let before = SystemTime::UNIX_EPOCH + Duration::from_secs(999);
        assert_eq!(start.offset_of(before), None);
    }
}
