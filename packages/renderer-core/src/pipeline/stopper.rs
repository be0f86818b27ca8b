//! Stopper: transport-level stop/start (§4.5).
//!
//! Distinct from `Muter`: a stop silences the transport outright rather than
//! substituting `Silence` for the stopped span — once stopped, no message
//! reaches downstream until a start request ramps audio back up.

use async_trait::async_trait;

use crate::msg::{Direction, Message, MsgFactory};

use super::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    RampingDown { elapsed: u64 },
    Stopped,
    RampingUp { elapsed: u64 },
}

pub struct Stopper {
    state: State,
    ramp_duration_samples: u64,
    pending_stop: bool,
    pending_start: bool,
}

impl Stopper {
    #[must_use]
    pub fn new(ramp_duration_samples: u64) -> Self {
        Self {
            state: State::Running,
            ramp_duration_samples,
            pending_stop: false,
            pending_start: false,
        }
    }

    /// Requests a transport stop, taking effect at the next pulled `AudioPcm`.
    pub fn request_stop(&mut self) {
        self.pending_stop = true;
        self.pending_start = false;
    }

    /// Requests a transport start, resuming audio via a ramp up.
    pub fn request_start(&mut self) {
        self.pending_start = true;
        self.pending_stop = false;
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(self.state, State::Stopped | State::RampingDown { .. })
    }
}

#[async_trait]
impl Stage for Stopper {
    async fn step(&mut self, msg: Message, factory: &MsgFactory) -> Vec<Message> {
        let Message::AudioPcm(cell) = msg else {
            return vec![msg];
        };

        if self.pending_stop && matches!(self.state, State::Running | State::RampingUp { .. }) {
            self.state = State::RampingDown { elapsed: 0 };
            self.pending_stop = false;
        }
        if self.pending_start && matches!(self.state, State::Stopped | State::RampingDown { .. }) {
            self.state = State::RampingUp { elapsed: 0 };
            self.pending_start = false;
        }

        match self.state {
            State::Running => vec![Message::AudioPcm(cell)],
            State::Stopped => Vec::new(),
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
                    self.state = State::Stopped;
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::msg::{DecodedAudio, Endianness};
    use crate::time::Jiffies;
    use bytes::Bytes;

    fn factory() -> MsgFactory {
        MsgFactory::new(&PoolConfig::default())
    }

    async fn pcm_msg(factory: &MsgFactory, frames: usize) -> Message {
        factory
            .create_audio_pcm(
                DecodedAudio {
                    data: Bytes::from(vec![0u8; frames * 4]),
                    channels: 2,
                    sample_rate: 44_100,
                    bit_depth: 16,
                    endianness: Endianness::Big,
                },
                Jiffies::ZERO,
            )
            .await
    }

    #[tokio::test]
    async fn stop_ramps_down_then_halts_and_swallows() {
        let factory = factory();
        let mut stopper = Stopper::new(32);
        stopper.request_stop();

        let msg = pcm_msg(&factory, 32).await;
        let out = stopper.step(msg, &factory).await;
        assert!(out.iter().any(|m| matches!(m, Message::AudioPcm(_))));
        assert!(out.iter().any(|m| matches!(m, Message::Halt(_))));
        assert!(stopper.is_stopped());

        let swallowed = pcm_msg(&factory, 32).await;
        let out = stopper.step(swallowed, &factory).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn start_ramps_audio_back_up_from_stopped() {
        let factory = factory();
        let mut stopper = Stopper::new(16);
        stopper.request_stop();
        stopper.step(pcm_msg(&factory, 16).await, &factory).await;
        assert!(stopper.is_stopped());

        stopper.request_start();
        let out = stopper.step(pcm_msg(&factory, 16).await, &factory).await;
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Message::AudioPcm(_)));
        assert!(!stopper.is_stopped());
    }
}
