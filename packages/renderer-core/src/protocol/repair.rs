//! The shared reorder/resend state machine used by both RAOP and Songcast
//! (§4.9). Tracks which frame ids have arrived, which are missing, and when
//! to ask the sender to resend them — grounded on `ProtocolOhBase`'s
//! `Repair`/`RepairBegin`/`RepairReset`/`TimerRepairExpired` cycle: a gap
//! arms a randomised initial timeout; every subsequent retry uses a shorter
//! fixed timeout; a bounded backlog caps how many ids may be outstanding at
//! once.
//!
//! This module is deliberately synchronous (no `tokio::time` inside): it
//! decides *what* to do and *when*, the owning protocol task drives an actual
//! timer against [`Repairer::next_timeout`] and calls back into
//! [`Repairer::on_timer`].

use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use rand::Rng;

use crate::config::RepairConfig;
use crate::error::RepairerError;

/// What [`Repairer::on_frame`] tells the caller to do with a newly-arrived
/// frame id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// These frame ids are now contiguous from the last emitted one and
    /// should be released downstream in this order.
    Ready(Vec<u32>),
    /// The frame arrived out of order; it is held pending the frames that
    /// precede it, which are now being repaired.
    Buffered,
    /// The frame arrived after the repairer had already moved past its
    /// position (a slow resend response, or a duplicate); drop it.
    TooLate,
}

/// A resend request the caller should serialise into the wire-specific
/// format (RAOP's `RaopPacketResendRequest`, Songcast's OHM resend body) and
/// transmit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResendRequest {
    pub frame_ids: Vec<u32>,
}

/// Sequence-aware gap tracker plus resend timer bookkeeping, shared by the
/// RAOP and Songcast protocol implementations (§4.9).
pub struct Repairer {
    config: RepairConfig,
    next_expected: Option<u32>,
    /// Ids strictly ahead of `next_expected` that have already arrived and
    /// are waiting for the gap ahead of them to close.
    arrived_ahead: BTreeSet<u32>,
    /// Ids between the last emitted frame and the furthest arrived one that
    /// have not arrived yet.
    missing: BTreeSet<u32>,
    /// Whether a repair timer is currently logically armed (the caller owns
    /// the actual timer; this only tracks whether the next fire should use
    /// the randomised initial timeout or the fixed subsequent one).
    timer_armed: bool,
    retry_count: u32,
}

impl Repairer {
    #[must_use]
    pub fn new(config: RepairConfig) -> Self {
        Self {
            config,
            next_expected: None,
            arrived_ahead: BTreeSet::new(),
            missing: BTreeSet::new(),
            timer_armed: false,
            retry_count: 0,
        }
    }

    #[must_use]
    pub fn is_repairing(&self) -> bool {
        !self.missing.is_empty()
    }

    /// Resets all tracking, e.g. when a new session/SSRC supersedes the one
    /// being repaired (`ProtocolOhBase::RepairReset`).
    pub fn reset(&mut self) {
        self.next_expected = None;
        self.arrived_ahead.clear();
        self.missing.clear();
        self.timer_armed = false;
        self.retry_count = 0;
    }

    /// Records a frame id's arrival, returning what the caller should do with
    /// it. Ordering is plain numeric comparison on `id`, matching §4.9's
    /// "ordering numeric; wraparound is out of scope" — this repairer does
    /// not attempt modular/wraparound-aware comparison (an open question the
    /// spec explicitly leaves unresolved rather than guessed at, §9). A
    /// caller whose wire counter wraps (RAOP's 16-bit RTP sequence number)
    /// is expected to extend it to a wider monotonic counter before calling
    /// in, if it needs to survive a wrap.
    pub fn on_frame(&mut self, id: u32) -> Result<RepairOutcome, RepairerError> {
        let Some(expected) = self.next_expected else {
            self.next_expected = Some(id.wrapping_add(1));
            return Ok(RepairOutcome::Ready(vec![id]));
        };

        if id == expected {
            self.next_expected = Some(expected.wrapping_add(1));
            self.missing.remove(&id);
            let mut ready = vec![id];
            while let Some(&next) = self.arrived_ahead.iter().next() {
                let want = self.next_expected.unwrap();
                if next != want {
                    break;
                }
                self.arrived_ahead.remove(&next);
                ready.push(next);
                self.next_expected = Some(want.wrapping_add(1));
            }
            if self.missing.is_empty() {
                self.timer_armed = false;
                self.retry_count = 0;
            }
            return Ok(RepairOutcome::Ready(ready));
        }

        if id > expected {
            // id is ahead of what we expect: everything in between is missing.
            let mut cursor = expected;
            while cursor != id {
                if !self.arrived_ahead.contains(&cursor) {
                    self.missing.insert(cursor);
                }
                cursor += 1;
            }
            if self.missing.len() > self.config.max_backlog {
                return Err(RepairerError::BufferFull);
            }
            self.arrived_ahead.insert(id);
            self.timer_armed = true;
            return Ok(RepairOutcome::Buffered);
        }

        // id < expected: either a duplicate or a resend that arrived after
        // the repairer already gave up and moved past it.
        self.missing.remove(&id);
        Ok(RepairOutcome::TooLate)
    }

    /// Called when the caller's resend timer fires. Returns the next batch to
    /// request, or `None` if repair already completed (nothing to do).
    pub fn on_timer(&mut self) -> Option<ResendRequest> {
        if self.missing.is_empty() {
            self.timer_armed = false;
            return None;
        }
        self.retry_count += 1;
        let frame_ids: Vec<u32> = self
            .missing
            .iter()
            .take(self.config.max_resend_per_request)
            .copied()
            .collect();
        Some(ResendRequest { frame_ids })
    }

    /// The delay the caller should wait before the next [`Repairer::on_timer`]
    /// call, or `None` if no repair is in flight and no timer is needed.
    pub fn next_timeout(&self) -> Option<Duration> {
        if !self.timer_armed || self.missing.is_empty() {
            return None;
        }
        if self.retry_count == 0 {
            let max = self.config.initial_timeout_max_ms.max(1);
            let jittered = rand::thread_rng().gen_range(0..=max);
            Some(Duration::from_millis(u64::from(jittered)))
        } else {
            Some(Duration::from_millis(u64::from(self.config.subsequent_timeout_ms)))
        }
    }

    #[must_use]
    pub fn missing_count(&self) -> usize {
        self.missing.len()
    }
}

/// Bounded queue of frame ids still owed a resend response, used by callers
/// that want to cap how many outstanding requests they track without
/// duplicating [`Repairer`]'s own bookkeeping (e.g. RAOP's audio dedup of
/// resend responses it has already applied).
#[derive(Default)]
pub struct ResendLedger {
    outstanding: VecDeque<u32>,
    capacity: usize,
}

impl ResendLedger {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            outstanding: VecDeque::new(),
            capacity,
        }
    }

    pub fn record(&mut self, id: u32) {
        if self.outstanding.len() >= self.capacity {
            self.outstanding.pop_front();
        }
        self.outstanding.push_back(id);
    }

    #[must_use]
    pub fn is_outstanding(&self, id: u32) -> bool {
        self.outstanding.contains(&id)
    }

    pub fn clear(&mut self, id: u32) {
        self.outstanding.retain(|&x| x != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RepairConfig {
        RepairConfig::default()
    }

    #[test]
    fn first_frame_is_always_ready() {
        let mut r = Repairer::new(config());
        assert_eq!(r.on_frame(100).unwrap(), RepairOutcome::Ready(vec![100]));
    }

    #[test]
    fn in_order_frames_are_ready_immediately() {
        let mut r = Repairer::new(config());
        r.on_frame(1).unwrap();
        assert_eq!(r.on_frame(2).unwrap(), RepairOutcome::Ready(vec![2]));
        assert_eq!(r.on_frame(3).unwrap(), RepairOutcome::Ready(vec![3]));
        assert!(!r.is_repairing());
    }

    #[test]
    fn gap_buffers_and_arms_repair() {
        let mut r = Repairer::new(config());
        r.on_frame(1).unwrap();
        let outcome = r.on_frame(4).unwrap();
        assert_eq!(outcome, RepairOutcome::Buffered);
        assert!(r.is_repairing());
        assert_eq!(r.missing_count(), 2); // frames 2, 3 missing
    }

    #[test]
    fn filling_the_gap_releases_buffered_frames_in_order() {
        let mut r = Repairer::new(config());
        r.on_frame(1).unwrap();
        r.on_frame(4).unwrap();
        r.on_frame(2).unwrap();
        let outcome = r.on_frame(3).unwrap();
        assert_eq!(outcome, RepairOutcome::Ready(vec![3, 4]));
        assert!(!r.is_repairing());
    }

    #[test]
    fn backlog_overflow_is_buffer_full() {
        let mut config = config();
        config.max_backlog = 2;
        let mut r = Repairer::new(config);
        r.on_frame(1).unwrap();
        let err = r.on_frame(10).unwrap_err();
        assert!(matches!(err, RepairerError::BufferFull));
    }

    #[test]
    fn timer_requests_missing_ids_clamped_to_max_resend() {
        let mut config = config();
        config.max_resend_per_request = 1;
        let mut r = Repairer::new(config);
        r.on_frame(1).unwrap();
        r.on_frame(5).unwrap();
        let req = r.on_timer().unwrap();
        assert_eq!(req.frame_ids.len(), 1);
        assert_eq!(req.frame_ids[0], 2);
    }

    #[test]
    fn initial_timeout_is_randomised_within_bound_then_fixed() {
        let mut config = config();
        config.initial_timeout_max_ms = 80;
        config.subsequent_timeout_ms = 40;
        let mut r = Repairer::new(config);
        r.on_frame(1).unwrap();
        r.on_frame(5).unwrap();
        let first = r.next_timeout().unwrap();
        assert!(first <= Duration::from_millis(80));
        r.on_timer().unwrap();
        let second = r.next_timeout().unwrap();
        assert_eq!(second, Duration::from_millis(40));
    }

    #[test]
    fn no_repair_in_flight_has_no_timeout() {
        let mut r = Repairer::new(config());
        r.on_frame(1).unwrap();
        r.on_frame(2).unwrap();
        assert!(r.next_timeout().is_none());
    }

    #[test]
    fn reset_clears_all_state() {
        let mut r = Repairer::new(config());
        r.on_frame(1).unwrap();
        r.on_frame(5).unwrap();
        r.reset();
        assert!(!r.is_repairing());
        assert_eq!(r.on_frame(0).unwrap(), RepairOutcome::Ready(vec![0]));
    }

    #[test]
    fn resend_ledger_evicts_oldest_beyond_capacity() {
        let mut ledger = ResendLedger::new(2);
        ledger.record(1);
        ledger.record(2);
        ledger.record(3);
        assert!(!ledger.is_outstanding(1));
        assert!(ledger.is_outstanding(2));
        assert!(ledger.is_outstanding(3));
    }
}
