//! The per-stream control interface that flows *upstream*, embedded as a weak
//! back-reference inside every `EncodedStream`/`DecodedStream` message (§3, §6).
//!
//! A protocol instance implements this so that downstream pipeline stages can
//! ask it to seek, stop, or supply bytes out of band, without the downstream
//! stage needing to know which concrete protocol (HTTP, RAOP, Songcast) is
//! feeding it. The pointer is non-owning (`Weak`): it is valid only until the
//! protocol instance that emitted the stream message is itself dropped, which
//! the spec guarantees happens no earlier than the stream ending.

use async_trait::async_trait;

/// Verdict returned by [`StreamHandler::ok_to_play`] for a live (zero-length)
/// stream (§4.6, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OkToPlay {
    Yes,
    No,
    /// Not yet decided; the caller should wait and ask again.
    Later,
}

/// Upstream control surface exposed by a protocol instance for the duration of
/// one encoded stream (§6).
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// Whether a live stream may start playing yet.
    async fn ok_to_play(&self, stream_id: u32) -> OkToPlay;

    /// Requests a seek to `offset` bytes into the stream; returns the flush id
    /// the caller should await before trusting post-seek data, or `None` if the
    /// stream id is stale.
    async fn try_seek(&self, stream_id: u32, offset_bytes: u64) -> Option<u32>;

    /// Requests the stream stop; returns the flush id to await, or `None` if the
    /// stream id is stale. Idempotent: repeated calls on an already-stopping
    /// stream return the same flush id until that flush is observed (§8).
    async fn try_stop(&self, stream_id: u32) -> Option<u32>;

    /// Requests `bytes` starting at `offset` be written into `out`, bypassing
    /// the normal push path (used by codecs that need out-of-band random
    /// access, e.g. container index reads). Returns whether the read
    /// succeeded.
    async fn try_get(&self, stream_id: u32, offset: u64, bytes: u64, out: &mut Vec<u8>) -> bool;

    /// Informs the protocol that a downstream stage is starving (reservoir ran
    /// dry) for the named mode; used to decide whether to re-enter gorging.
    fn notify_starving(&self, mode: &str, stream_id: u32);
}
