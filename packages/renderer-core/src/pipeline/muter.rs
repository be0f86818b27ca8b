//! Mute/unmute stage (§4.5).
//!
//! A mute requested while the pipeline is halted takes effect immediately,
//! with no ramp, replacing the next pulled audio with an equivalent span of
//! `Silence` (§8 scenario 6). A mute requested while audio is flowing ramps
//! down first. Unmute is the mirror: ramp up from silence back to full
//! volume. A mute arriving mid-ramp-up reverses direction instead of
//! finishing the ramp up and immediately ramping back down.

use async_trait::async_trait;

use crate::msg::{Direction, Message, MsgFactory};

use super::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    RampingDown { elapsed: u64 },
    Muted,
    RampingUp { elapsed: u64 },
}

pub struct Muter {
    state: State,
    ramp_duration_samples: u64,
    halted: bool,
    pending_mute: bool,
    pending_unmute: bool,
}

impl Muter {
    #[must_use]
    pub fn new(ramp_duration_samples: u64) -> Self {
        Self {
            state: State::Running,
            ramp_duration_samples,
            halted: false,
            pending_mute: false,
            pending_unmute: false,
        }
    }

    /// Requests a mute, taking effect at the next pulled `AudioPcm` (§4.5).
    pub fn request_mute(&mut self) {
        self.pending_mute = true;
        self.pending_unmute = false;
    }

    /// Requests an unmute, taking effect at the next pulled `AudioPcm`.
    pub fn request_unmute(&mut self) {
        self.pending_unmute = true;
        self.pending_mute = false;
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        matches!(self.state, State::Muted | State::RampingDown { .. })
    }
}

#[async_trait]
impl Stage for Muter {
    async fn step(&mut self, msg: Message, factory: &MsgFactory) -> Vec<Message> {
        match msg {
            Message::Halt(_) => {
                self.halted = true;
                vec![msg]
            }
            Message::AudioPcm(cell) => {
                if self.pending_mute && matches!(self.state, State::Running | State::RampingUp { .. }) {
                    if self.halted {
                        let duration = cell.lock().audio.jiffies();
                        self.pending_mute = false;
                        self.state = State::Muted;
                        return vec![factory.create_silence(duration).await];
                    }
                    self.state = State::RampingDown { elapsed: 0 };
                    self.pending_mute = false;
                }
                if self.pending_unmute && matches!(self.state, State::Muted | State::RampingDown { .. }) {
                    self.state = State::RampingUp { elapsed: 0 };
                    self.pending_unmute = false;
                }
                self.halted = false;

                match self.state {
                    State::Running => vec![Message::AudioPcm(cell)],
                    State::Muted => {
                        let duration = cell.lock().audio.jiffies();
                        vec![factory.create_silence(duration).await]
                    }
                    State::RampingDown { elapsed } => {
                        let frames = cell.lock().audio.frame_count() as u64;
                        let still_ramping = {
                            let mut guard = cell.lock();
                            guard
                                .ramp
                                .set(frames, self.ramp_duration_samples, Direction::Down, elapsed)
                        };
                        let next_elapsed = elapsed + frames;
                        if !still_ramping || next_elapsed >= self.ramp_duration_samples {
                            self.state = State::Muted;
                            return vec![Message::AudioPcm(cell), factory.create_halt(None).await];
                        }
                        self.state = State::RampingDown { elapsed: next_elapsed };
                        vec![Message::AudioPcm(cell)]
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
            other => vec![other],
        }
    }
}
