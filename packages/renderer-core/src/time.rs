//! Jiffies: the pipeline's universal time unit.
//!
//! `JIFFIES_PER_SECOND = lcm(384000, 352800) = 56_448_000` so that every sample
//! rate the renderer supports divides it exactly; any sample count at any
//! supported rate is therefore an integer number of jiffies (§3).

use std::time::Duration;

/// Jiffies per second. `lcm(384000, 352800)`.
pub const JIFFIES_PER_SECOND: u64 = 56_448_000;

/// Jiffies per millisecond.
pub const JIFFIES_PER_MS: u64 = JIFFIES_PER_SECOND / 1000;

/// Sample rates the renderer guarantees exact jiffy conversion for.
pub const SUPPORTED_SAMPLE_RATES: &[u32] = &[
    7350, 8000, 11025, 12000, 14700, 16000, 22050, 24000, 29400, 32000, 44100, 48000, 88200,
    96000, 176400, 192000, 352800, 384000,
];

/// Returns the number of jiffies spanned by one sample at `sample_rate`, or
/// `None` if the rate is not one of [`SUPPORTED_SAMPLE_RATES`].
///
/// Every supported rate divides [`JIFFIES_PER_SECOND`] exactly, so this is a
/// plain integer division rather than a rounding approximation.
#[must_use]
pub fn jiffies_per_sample(sample_rate: u32) -> Option<u64> {
    if JIFFIES_PER_SECOND % u64::from(sample_rate) == 0 {
        Some(JIFFIES_PER_SECOND / u64::from(sample_rate))
    } else {
        None
    }
}

/// A duration expressed in jiffies, the pipeline's native time unit.
///
/// Distinct from [`Duration`] so pipeline code that reasons in jiffies (ramp
/// math, track offsets, silence lengths) cannot accidentally mix units with
/// wall-clock code without an explicit conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Jiffies(pub u64);

impl Jiffies {
    pub const ZERO: Jiffies = Jiffies(0);

    /// Converts a sample count at `sample_rate` to jiffies.
    ///
    /// Returns `None` for an unsupported rate (see [`jiffies_per_sample`]).
    #[must_use]
    pub fn from_samples(samples: u64, sample_rate: u32) -> Option<Jiffies> {
        jiffies_per_sample(sample_rate).map(|per_sample| Jiffies(samples * per_sample))
    }

    /// Converts from milliseconds.
    #[must_use]
    pub fn from_millis(ms: u64) -> Jiffies {
        Jiffies(ms * JIFFIES_PER_MS)
    }

    /// Converts to whole samples at `sample_rate`, floor-dividing any remainder.
    #[must_use]
    pub fn to_samples(self, sample_rate: u32) -> u64 {
        match jiffies_per_sample(sample_rate) {
            Some(per_sample) if per_sample > 0 => self.0 / per_sample,
            _ => 0,
        }
    }

    /// Converts to an approximate wall-clock [`Duration`].
    #[must_use]
    pub fn to_duration(self) -> Duration {
        Duration::from_nanos(self.0 * 1_000_000_000 / JIFFIES_PER_SECOND)
    }

    #[must_use]
    pub fn checked_sub(self, rhs: Jiffies) -> Option<Jiffies> {
        self.0.checked_sub(rhs.0).map(Jiffies)
    }
}

impl std::ops::Add for Jiffies {
    type Output = Jiffies;
    fn add(self, rhs: Jiffies) -> Jiffies {
        Jiffies(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Jiffies {
    type Output = Jiffies;
    fn sub(self, rhs: Jiffies) -> Jiffies {
        Jiffies(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Jiffies {
    fn sum<I: Iterator<Item = Jiffies>>(iter: I) -> Self {
        Jiffies(iter.map(|j| j.0).sum())
    }
}
