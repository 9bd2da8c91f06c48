use std::io;

use nix::time::{clock_gettime, ClockId};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A sample of the monotonic clock, split the way `struct timespec` is.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    /// Whole seconds since an unspecified starting point.
    pub secs: u64,
    /// Sub-second part, always below one billion for clock-produced values.
    pub nanos: u64,
}

impl Timestamp {
    pub fn new(secs: u64, nanos: u64) -> Self {
        Timestamp { secs, nanos }
    }

    /// Total nanoseconds represented, widened so no input can overflow.
    pub fn as_nanos(&self) -> i128 {
        self.secs as i128 * NANOS_PER_SEC as i128 + self.nanos as i128
    }

    /// Nanoseconds elapsed from `earlier` to `self`.
    ///
    /// Returns `None` when `earlier` lies after `self` or the difference does not
    /// fit in a `u64`, which only happens for corrupted timestamps.
    ///
    /// ```
    /// use bridge_eed::time::Timestamp;
    /// let sent = Timestamp::new(10, 999_999_000);
    /// let now = Timestamp::new(11, 500);
    /// assert_eq!(now.nanos_since(&sent), Some(1_500));
    /// assert_eq!(sent.nanos_since(&now), None);
    /// ```
    pub fn nanos_since(&self, earlier: &Timestamp) -> Option<u64> {
        let delta = self.as_nanos() - earlier.as_nanos();
        u64::try_from(delta).ok()
    }
}

/// Samples `CLOCK_MONOTONIC`.
pub fn monotonic_now() -> io::Result<Timestamp> {
    let ts = clock_gettime(ClockId::CLOCK_MONOTONIC).map_err(io::Error::from)?;

    Ok(Timestamp {
        secs: ts.tv_sec() as u64,
        nanos: ts.tv_nsec() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nanos_since_same_second() {
        let a = Timestamp::new(5, 100);
        let b = Timestamp::new(5, 350);
        assert_eq!(b.nanos_since(&a), Some(250));
    }

    #[test]
    fn test_nanos_since_across_seconds() {
        const TEST_CASES: &[((u64, u64), (u64, u64), u64)] = &[
            ((1, 999_999_999), (2, 0), 1),
            ((0, 0), (3, 0), 3_000_000_000),
            ((7, 500_000_000), (9, 250_000_000), 1_750_000_000),
        ];

        for &((s1, n1), (s2, n2), expected) in TEST_CASES {
            let earlier = Timestamp::new(s1, n1);
            let later = Timestamp::new(s2, n2);
            assert_eq!(later.nanos_since(&earlier), Some(expected));
        }
    }

    #[test]
    fn test_nanos_since_negative_is_none() {
        let a = Timestamp::new(10, 0);
        let b = Timestamp::new(9, 999_999_999);
        assert_eq!(b.nanos_since(&a), None);
    }

    #[test]
    fn test_nanos_since_corrupted_does_not_overflow() {
        let a = Timestamp::new(0, 0);
        let b = Timestamp::new(u64::MAX, u64::MAX);
        assert_eq!(b.nanos_since(&a), None);
    }

    #[test]
    fn test_monotonic_now_advances() {
        let first = monotonic_now().unwrap();
        let second = monotonic_now().unwrap();
        assert!(second >= first);
        assert!(first.nanos < NANOS_PER_SEC);
    }
}
