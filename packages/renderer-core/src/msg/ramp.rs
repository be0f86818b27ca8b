//! The volume ramp attached to `AudioPcm` messages (§3, §4.5).
//!
//! A ramp is a linear-in-position attenuation envelope between `kRampMin` (silent)
//! and `kRampMax` (full volume), confirmed against the original implementation's
//! `Msg.h` (`kRampMax = 1<<30`). Every audible transition in the pipeline (stop,
//! skip, wait, mute, delay change) attaches a ramp rather than cutting audio
//! abruptly.

/// Full-volume ramp value.
pub const RAMP_MAX: u32 = 1 << 30;
/// Silent ramp value.
pub const RAMP_MIN: u32 = 0;

/// Direction a ramp is moving in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// No ramp is in effect (full volume, unramped).
    None,
    /// Ramping towards [`RAMP_MAX`].
    Up,
    /// Ramping towards [`RAMP_MIN`].
    Down,
}

/// A linear attenuation envelope spanning a run of samples.
///
/// `start`/`end` are in `[RAMP_MIN, RAMP_MAX]`. `fragment_size` is the number of
/// samples the envelope spans; `value_at` interpolates linearly between `start`
/// and `end` over that span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ramp {
    start: u32,
    end: u32,
    direction: Direction,
    fragment_size: u64,
    enabled: bool,
}

impl Default for Ramp {
    fn default() -> Self {
        Self::reset()
    }
}

impl Ramp {
    /// A disabled (no-op, full-volume) ramp.
    #[must_use]
    pub fn reset() -> Self {
        Self {
            start: RAMP_MAX,
            end: RAMP_MAX,
            direction: Direction::None,
            fragment_size: 0,
            enabled: false,
        }
    }

    /// Sets up a ramp over `fragment_size` samples of a span lasting
    /// `ramp_duration_samples` total, started `split_pos` samples into that span
    /// (nonzero when a previous message already consumed part of the ramp).
    ///
    /// Returns `false` (and leaves `self` unchanged) if the parameters describe
    /// an already-complete ramp (`split_pos >= ramp_duration_samples`), mirroring
    /// the original's refusal to apply a no-op ramp.
    #[must_use]
    pub fn set(
        &mut self,
        fragment_size: u64,
        ramp_duration_samples: u64,
        direction: Direction,
        split_pos: u64,
    ) -> bool {
        if split_pos >= ramp_duration_samples {
            return false;
        }
        let (from, to) = match direction {
            Direction::Up => (RAMP_MIN, RAMP_MAX),
            Direction::Down => (RAMP_MAX, RAMP_MIN),
            Direction::None => (RAMP_MAX, RAMP_MAX),
        };
        let start = Self::interpolate(from, to, split_pos, ramp_duration_samples);
        let end_pos = (split_pos + fragment_size).min(ramp_duration_samples);
        let end = Self::interpolate(from, to, end_pos, ramp_duration_samples);

        // composition rule: keep the lower (more attenuated) envelope at every point
        let start = self.envelope_min_at_start(start);
        let end = self.envelope_min_at_end(end);

        self.start = start;
        self.end = end;
        self.direction = direction;
        self.fragment_size = fragment_size;
        self.enabled = true;
        true
    }

    fn envelope_min_at_start(&self, candidate: u32) -> u32 {
        if self.enabled {
            candidate.min(self.start)
        } else {
            candidate
        }
    }

    fn envelope_min_at_end(&self, candidate: u32) -> u32 {
        if self.enabled {
            candidate.min(self.end)
        } else {
            candidate
        }
    }

    fn interpolate(from: u32, to: u32, pos: u64, span: u64) -> u32 {
        if span == 0 {
            return to;
        }
        let from = i64::from(from);
        let to = i64::from(to);
        let delta = to - from;
        let value = from + delta * pos as i64 / span as i64;
        value.clamp(i64::from(RAMP_MIN), i64::from(RAMP_MAX)) as u32
    }

    /// Splits this ramp at `new_size` samples into the current `fragment_size`.
    ///
    /// The receiver keeps the head of the ramp (first `new_size` samples, its
    /// `fragment_size` shrunk to `new_size`); the returned [`Ramp`] carries the
    /// tail, continuing smoothly from where the head left off.
    ///
    /// # Panics
    /// Panics if `new_size` is zero or exceeds the current fragment size — both
    /// are caller bugs (splitting at the message boundary or beyond it is a
    /// boundary error the pipeline must avoid before calling `split`, per §8).
    #[must_use]
    pub fn split(&mut self, new_size: u64) -> Ramp {
        assert!(new_size > 0, "cannot split a ramp at position 0");
        assert!(
            new_size < self.fragment_size,
            "split position must be strictly inside the fragment"
        );

        let total = self.fragment_size;
        let mid = Self::interpolate(self.start, self.end, new_size, total);

        let tail = Ramp {
            start: mid,
            end: self.end,
            direction: self.direction,
            fragment_size: total - new_size,
            enabled: self.enabled,
        };

        self.end = mid;
        self.fragment_size = new_size;
        tail
    }

    #[must_use]
    pub fn start(&self) -> u32 {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> u32 {
        self.end
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn fragment_size(&self) -> u64 {
        self.fragment_size
    }

    /// The attenuation value at `pos` samples into the fragment.
    #[must_use]
    pub fn value_at(&self, pos: u64) -> u32 {
        Self::interpolate(self.start, self.end, pos.min(self.fragment_size), self.fragment_size)
    }
}
