//! Skipper: discards the remainder of the current stream (§4.5).
//!
//! Ramps down, emits `Halt`, asks the upstream stream handler to `try_stop`,
//! then silently drops everything until the resulting `Flush(id)` arrives.

use std::sync::Weak;

use async_trait::async_trait;

use crate::msg::{Direction, Message, MsgFactory};
use crate::stream_handler::StreamHandler;

use super::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    RampingDown { elapsed: u64 },
    /// Draining until a `Flush` carrying `awaiting` arrives.
    Draining { awaiting: u32 },
}

pub struct Skipper {
    state: State,
    ramp_duration_samples: u64,
    current_stream_id: u32,
    stream_handler: Weak<dyn StreamHandler>,
}

impl Skipper {
    #[must_use]
    pub fn new(ramp_duration_samples: u64) -> Self {
        Self {
            state: State::Running,
            ramp_duration_samples,
            current_stream_id: 0,
            stream_handler: Weak::new(),
        }
    }

    /// Begins skipping the stream currently in flight.
    pub fn request_skip(&mut self) {
        if matches!(self.state, State::Running) {
            self.state = State::RampingDown { elapsed: 0 };
        }
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        matches!(self.state, State::Draining { .. })
    }

    async fn begin_drain(&mut self, factory: &MsgFactory) -> Vec<Message> {
        let mut out = vec![factory.create_halt(None).await];
        if let Some(handler) = self.stream_handler.upgrade() {
            if let Some(flush_id) = handler.try_stop(self.current_stream_id).await {
                self.state = State::Draining { awaiting: flush_id };
                return out;
            }
        }
        // no live handler or stale stream id: nothing to await, resume immediately
        self.state = State::Running;
        out.clear();
        out
    }
}

#[async_trait]
impl Stage for Skipper {
    async fn step(&mut self, msg: Message, factory: &MsgFactory) -> Vec<Message> {
        if let Message::DecodedStream(data) = &msg {
            self.current_stream_id = data.stream_id;
            self.stream_handler = data.stream_handler.clone();
        }

        if let State::Draining { awaiting } = self.state {
            if let Message::Flush(data) = &msg {
                if data.id == awaiting {
                    self.state = State::Running;
                    return vec![msg];
                }
            }
            // discard everything else while draining
            return Vec::new();
        }

        match msg {
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
                        let mut out = vec![Message::AudioPcm(cell)];
                        out.extend(self.begin_drain(factory).await);
                        return out;
                    }
                    self.state = State::RampingDown { elapsed: next_elapsed };
                    return vec![Message::AudioPcm(cell)];
                }
                vec![Message::AudioPcm(cell)]
            }
            other => vec![other],
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
    async fn skip_ramps_down_then_emits_halt() {
        let factory = factory();
        let mut skipper = Skipper::new(32);
        skipper.request_skip();

        let msg = pcm_msg(&factory, 32).await;
        let out = skipper.step(msg, &factory).await;
        assert!(out.iter().any(|m| matches!(m, Message::AudioPcm(_))));
        assert!(out.iter().any(|m| matches!(m, Message::Halt(_))));
    }

    #[tokio::test]
    async fn non_audio_messages_pass_through_untouched() {
        let factory = factory();
        let mut skipper = Skipper::new(32);
        let wait = factory.create_wait().await;
        let out = skipper.step(wait, &factory).await;
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Message::Wait(_)));
    }
}
