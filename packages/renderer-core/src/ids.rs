//! Monotonic id providers: track ids, stream ids, flush ids.
//!
//! The original pipeline mints these from small dedicated providers guarded by a
//! mutex; here each is a wrapped `AtomicU32` counter, which is enough since the
//! providers are never contended on the audio hot path, only at stream
//! boundaries (new track, new stream, stop/seek).

use std::sync::atomic::{AtomicU32, Ordering};

/// A flush id of this value never matches any pending flush expectation (§8).
pub const INVALID_FLUSH_ID: u32 = 0;

/// Mints monotonically increasing ids of a given kind.
///
/// Starts at 1 so that 0 can be reserved as a sentinel (see [`INVALID_FLUSH_ID`]).
#[derive(Debug, Default)]
pub struct IdProvider {
    next: AtomicU32,
}

impl IdProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Allocates the next id in the sequence.
    pub fn next(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Track identity provider.
#[derive(Debug, Default)]
pub struct TrackIdProvider(IdProvider);

impl TrackIdProvider {
    #[must_use]
    pub fn new() -> Self {
        Self(IdProvider::new())
    }

    pub fn next(&self) -> u32 {
        self.0.next()
    }
}

/// Stream identity provider, one per `EncodedStream`/`DecodedStream` pair.
#[derive(Debug, Default)]
pub struct StreamIdProvider(IdProvider);

impl StreamIdProvider {
    #[must_use]
    pub fn new() -> Self {
        Self(IdProvider::new())
    }

    pub fn next(&self) -> u32 {
        self.0.next()
    }
}

/// Per-protocol-instance flush id provider, minted on every `TryStop`/`TrySeek`.
#[derive(Debug, Default)]
pub struct FlushIdProvider(IdProvider);

impl FlushIdProvider {
    #[must_use]
    pub fn new() -> Self {
        Self(IdProvider::new())
    }

    /// Mints a fresh flush id; never returns [`INVALID_FLUSH_ID`].
    pub fn next(&self) -> u32 {
        self.0.next()
    }
}

/// Returns whether `id` can ever be matched by an arriving `Flush` message.
#[must_use]
pub fn is_valid_flush_id(id: u32) -> bool {
    id != INVALID_FLUSH_ID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_skip_zero() {
        let provider = FlushIdProvider::new();
        let a = provider.next();
        let b = provider.next();
        assert!(a < b);
        assert!(is_valid_flush_id(a));
        assert!(is_valid_flush_id(b));
    }

    #[test]
    fn invalid_flush_id_never_matches() {
        assert!(!is_valid_flush_id(INVALID_FLUSH_ID));
    }
}
