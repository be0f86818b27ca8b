//! Replayable prefix buffering so the codec controller can attempt
//! recognition against several codecs without consuming the upstream
//! reservoir (§4.3).
//!
//! Two FIFOs: `current` holds messages queued for (re-)delivery, `next`
//! accumulates a cloned reference of each message pulled while buffering is
//! on. `rewind()` makes everything accumulated in `next` pullable again,
//! ahead of whatever is still left in `current`; `stop()` commits to the
//! current position by discarding `next`.

use std::collections::VecDeque;

use crate::error::CodecError;
use crate::msg::Message;
use crate::reservoir::EncodedReservoirReceiver;

pub struct Rewinder {
    upstream: EncodedReservoirReceiver,
    current: VecDeque<Message>,
    next: VecDeque<Message>,
    buffering: bool,
    capacity_bytes: usize,
    buffered_bytes: usize,
}

impl Rewinder {
    #[must_use]
    pub fn new(upstream: EncodedReservoirReceiver, capacity_bytes: usize) -> Self {
        Self {
            upstream,
            current: VecDeque::new(),
            next: VecDeque::new(),
            buffering: false,
            capacity_bytes,
            buffered_bytes: 0,
        }
    }

    /// Turns buffering on, resetting any previous accumulation. Called when a
    /// new `EncodedStream` starts codec recognition (§4.3).
    pub fn start_buffering(&mut self) {
        self.buffering = true;
        self.next.clear();
        self.buffered_bytes = 0;
    }

    /// Pulls the next message, replaying from `current` first and falling
    /// back to the upstream reservoir. While buffering, a cloned reference is
    /// appended to `next` (a cheap `Arc` clone per §3's ownership model).
    ///
    /// Returns `Err` if buffering and this pull would exceed `capacity_bytes`
    /// — recognition must be aborted (§4.3, §8).
    pub async fn pull(&mut self) -> Option<Result<Message, CodecError>> {
        let msg = match self.current.pop_front() {
            Some(m) => m,
            None => self.upstream.pull().await?,
        };

        if self.buffering {
            let bytes = msg.encoded_bytes();
            if self.buffered_bytes + bytes > self.capacity_bytes {
                return Some(Err(CodecError::RewinderCapacityExceeded));
            }
            self.buffered_bytes += bytes;
            self.next.push_back(msg.clone());
        }

        Some(Ok(msg))
    }

    /// Swaps `next` in front of `current`, making the entire buffered prefix
    /// replayable again (§4.3).
    pub fn rewind(&mut self) {
        while let Some(m) = self.current.pop_front() {
            self.next.push_back(m);
        }
        std::mem::swap(&mut self.current, &mut self.next);
        self.next.clear();
    }

    /// Commits to the current read position: buffering turns off and the
    /// accumulated replay buffer is discarded (§4.3).
    pub fn stop(&mut self) {
        self.buffering = false;
        self.next.clear();
        self.buffered_bytes = 0;
    }

    #[must_use]
    pub fn is_buffering(&self) -> bool {
        self.buffering
    }
}
