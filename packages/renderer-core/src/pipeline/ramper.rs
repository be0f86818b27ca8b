//! Ramper: tracks the downstream-visible absolute latency and adjusts
//! buffering to match it whenever a `Delay` message changes the target
//! (§4.5).
//!
//! Growing the delay ramps the current audio down, inserts `Silence` worth
//! the difference, then ramps back up. Shrinking it ramps down, discards that
//! much queued audio, then ramps back up. Both transitions happen at message
//! boundaries; neither touches the stream when the requested delay already
//! matches what's baked in.

use async_trait::async_trait;

use crate::msg::{Direction, Message, MsgFactory};
use crate::time::Jiffies;

use super::Stage;

/// The latency currently baked into the pipeline's buffering, as last
/// reported by a `Delay` message.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariableDelay {
    current: Jiffies,
}

impl VariableDelay {
    #[must_use]
    pub fn new() -> Self {
        Self { current: Jiffies::ZERO }
    }

    #[must_use]
    pub fn current(&self) -> Jiffies {
        self.current
    }

    fn set(&mut self, jiffies: Jiffies) {
        self.current = jiffies;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    RampingDown { elapsed: u64, grow: bool, remainder: u64 },
    /// Inserting `remainder` jiffies of silence (growing) or discarding
    /// `remainder` jiffies of queued audio (shrinking).
    Adjusting { remainder: u64, grow: bool },
    RampingUp { elapsed: u64 },
}

pub struct Ramper {
    state: State,
    ramp_duration_samples: u64,
    delay: VariableDelay,
    pending_target: Option<Jiffies>,
}

impl Ramper {
    #[must_use]
    pub fn new(ramp_duration_samples: u64) -> Self {
        Self {
            state: State::Running,
            ramp_duration_samples,
            delay: VariableDelay::new(),
            pending_target: None,
        }
    }

    #[must_use]
    pub fn current_delay(&self) -> Jiffies {
        self.delay.current()
    }

    #[must_use]
    pub fn is_adjusting(&self) -> bool {
        !matches!(self.state, State::Running)
    }
}

#[async_trait]
impl Stage for Ramper {
    async fn step(&mut self, msg: Message, factory: &MsgFactory) -> Vec<Message> {
        if let Message::Delay(data) = &msg {
            let target = data.jiffies;
            if target != self.delay.current() && matches!(self.state, State::Running) {
                let current = self.delay.current().0 as i128;
                let diff = target.0 as i128 - current;
                if diff != 0 {
                    self.pending_target = Some(target);
                    self.state = State::RampingDown {
                        elapsed: 0,
                        grow: diff > 0,
                        remainder: diff.unsigned_abs() as u64,
                    };
                }
            }
            return vec![msg];
        }

        let Message::AudioPcm(cell) = msg else {
            return vec![msg];
        };

        match self.state {
            State::Running => vec![Message::AudioPcm(cell)],
            State::RampingDown { elapsed, grow, remainder } => {
                let frames = cell.lock().audio.frame_count() as u64;
                let still_ramping = {
                    let mut guard = cell.lock();
                    guard
                        .ramp
                        .set(frames, self.ramp_duration_samples, Direction::Down, elapsed)
                };
                let next_elapsed = elapsed + frames;
                if !still_ramping || next_elapsed >= self.ramp_duration_samples {
                    self.state = State::Adjusting { remainder, grow };
                    return vec![Message::AudioPcm(cell)];
                }
                self.state = State::RampingDown { elapsed: next_elapsed, grow, remainder };
                vec![Message::AudioPcm(cell)]
            }
            State::Adjusting { remainder, grow } => {
                if grow {
                    if let Some(target) = self.pending_target.take() {
                        self.delay.set(target);
                    }
                    self.state = State::RampingUp { elapsed: 0 };
                    return vec![
                        Message::AudioPcm(cell),
                        factory.create_silence(Jiffies(remainder)).await,
                    ];
                }

                let sample_rate = cell.lock().audio.sample_rate;
                let to_discard = Jiffies(remainder).to_samples(sample_rate);
                let frames = cell.lock().audio.frame_count() as u64;
                if frames >= to_discard {
                    if let Some(target) = self.pending_target.take() {
                        self.delay.set(target);
                    }
                    self.state = State::RampingUp { elapsed: 0 };
                    Vec::new()
                } else {
                    let discarded_jiffies = Jiffies::from_samples(frames, sample_rate)
                        .unwrap_or(Jiffies(remainder.min(frames)));
                    let left = remainder.saturating_sub(discarded_jiffies.0);
                    self.state = State::Adjusting { remainder: left, grow };
                    Vec::new()
                }
            }
            State::RampingUp { elapsed } => {
                let frames = cell.lock().audio.frame_count() as u64;
                let still_ramping = {
                    let mut guard = cell.lock();
                    guard
                        .ramp
                        .set(frames, self.ramp_duration_samples, Direction::Up, elapsed)
                };
                let next_elapsed = elapsed + frames;
                if !still_ramping || next_elapsed >= self.ramp_duration_samples {
                    self.state = State::Running;
                } else {
                    self.state = State::RampingUp { elapsed: next_elapsed };
                }
                vec![Message::AudioPcm(cell)]
            }
        }
    }
}
