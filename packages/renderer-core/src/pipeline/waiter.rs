//! Waiter: holds the pipeline in a silent waiting state across a flush
//! boundary (§4.5).
//!
//! A `Wait` arriving from upstream ramps audio down, emits `Halt` then
//! forwards the `Wait` marker, and swallows everything else until a `Flush`
//! drains the stage back to running. A fresh `DecodedStream` arriving while
//! waiting also cancels the wait — the new stream has already superseded
//! whatever the wait was for.

use async_trait::async_trait;

use crate::msg::{Direction, Message, MsgFactory};

use super::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    RampingDown { elapsed: u64 },
    Waiting,
}

pub struct Waiter {
    state: State,
    ramp_duration_samples: u64,
}

impl Waiter {
    #[must_use]
    pub fn new(ramp_duration_samples: u64) -> Self {
        Self {
            state: State::Running,
            ramp_duration_samples,
        }
    }

    #[must_use]
    pub fn is_waiting(&self) -> bool {
        matches!(self.state, State::Waiting | State::RampingDown { .. })
    }
}

#[async_trait]
impl Stage for Waiter {
    async fn step(&mut self, msg: Message, _factory: &MsgFactory) -> Vec<Message> {
        match msg {
            Message::Wait(_) if matches!(self.state, State::Running) => {
                self.state = State::RampingDown { elapsed: 0 };
                vec![msg]
            }
            Message::Flush(_) if self.is_waiting() => {
                self.state = State::Running;
                vec![msg]
            }
            Message::DecodedStream(_) if self.is_waiting() => {
                self.state = State::Running;
                vec![msg]
            }
            Message::AudioPcm(cell) => {
                if let State::RampingDown { elapsed } = self.state {
                    let frames = cell.lock().audio.frame_count() as u64;
                    let still_ramping = {
                        let mut guard = cell.lock();
                        guard
                            .ramp
                            .set(frames, self.ramp_duration_samples, Direction::Down, elapsed)
                    };
                    let next_elapsed = elapsed + frames;
                    if !still_ramping || next_elapsed >= self.ramp_duration_samples {
                        self.state = State::Waiting;
                    } else {
                        self.state = State::RampingDown { elapsed: next_elapsed };
                    }
                    return vec![Message::AudioPcm(cell)];
                }
                if self.is_waiting() {
                    return Vec::new();
                }
                vec![Message::AudioPcm(cell)]
            }
            other if self.is_waiting() && !matches!(other, Message::Halt(_) | Message::Quit(_)) => {
                // swallow everything but Halt/Quit while waiting
                Vec::new()
            }
            other => vec![other],
        }
    }
}
