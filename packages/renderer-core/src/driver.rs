//! The output-facing end of the pipeline: pulls `Playable` messages and feeds
//! their samples to a [`PcmProcessor`] at real-time cadence (§6).
//!
//! A driver's job is narrowly "pace and hand off bytes" — the actual device
//! I/O (ALSA, CoreAudio, a network sink) lives behind the [`PcmProcessor`]
//! trait this crate only declares, matching the original's split between a
//! generic `PipelineAnimator`/driver loop and a host-supplied PCM sink.
//! Real-time pacing uses `tokio::time::sleep` against each block's own
//! duration, the same jiffies-to-wall-clock conversion this codebase's HTTP
//! cadence stream paces its fixed-interval metronome with.

use std::time::Duration;

use crate::msg::{DecodedAudio, Endianness, Message};
use crate::reservoir::ReservoirReceiver;

/// The sample-format-specific PCM sink a host implements to actually move
/// bytes to a device or network socket (§6).
///
/// Every `process_*` call receives big-endian-packed samples regardless of
/// the source stream's original endianness; the driver normalises to
/// big-endian before calling out, matching the original hardware
/// abstraction's documented contract.
pub trait PcmProcessor: Send {
    /// Called once before the first `process_*` call of a contiguous block.
    fn begin_block(&mut self);

    /// Hands a whole fragment of same-format samples at once. Returns `true`
    /// if the fragment was consumed, `false` if the processor would rather
    /// receive it one sample at a time via `process_sample_*` (e.g. because
    /// it needs per-sample ramp application).
    fn process_fragment_8(&mut self, bytes: &[u8], channels: u8) -> bool;
    fn process_fragment_16(&mut self, bytes: &[u8], channels: u8) -> bool;
    fn process_fragment_24(&mut self, bytes: &[u8], channels: u8) -> bool;

    /// Hands exactly one frame (one sample per channel) of the given format.
    fn process_sample_8(&mut self, bytes: &[u8], channels: u8);
    fn process_sample_16(&mut self, bytes: &[u8], channels: u8);
    fn process_sample_24(&mut self, bytes: &[u8], channels: u8);

    /// Called once after the last `process_*` call of a contiguous block.
    fn end_block(&mut self);
}

/// Converts `data` to big-endian in place if it was carried little-endian,
/// operating on whole samples of `bytes_per_sample` width.
fn normalise_to_big_endian(data: &[u8], bytes_per_sample: usize, endianness: Endianness) -> std::borrow::Cow<'_, [u8]> {
    if endianness == Endianness::Big || bytes_per_sample <= 1 {
        return std::borrow::Cow::Borrowed(data);
    }
    let mut out = data.to_vec();
    for chunk in out.chunks_exact_mut(bytes_per_sample) {
        chunk.reverse();
    }
    std::borrow::Cow::Owned(out)
}

fn feed_fragment(processor: &mut dyn PcmProcessor, bytes: &[u8], channels: u8, bit_depth: u8) {
    let consumed = match bit_depth {
        8 => processor.process_fragment_8(bytes, channels),
        16 => processor.process_fragment_16(bytes, channels),
        24 => processor.process_fragment_24(bytes, channels),
        other => {
            log::warn!("driver: unsupported bit depth {other}, dropping fragment");
            return;
        }
    };
    if consumed {
        return;
    }
    let frame_bytes = usize::from(channels) * usize::from(bit_depth / 8);
    if frame_bytes == 0 {
        return;
    }
    for frame in bytes.chunks_exact(frame_bytes) {
        match bit_depth {
            8 => processor.process_sample_8(frame, channels),
            16 => processor.process_sample_16(frame, channels),
            24 => processor.process_sample_24(frame, channels),
            _ => unreachable!("validated above"),
        }
    }
}

/// Pulls `Playable` messages at real-time rate and drives `processor` with
/// their contents, pacing itself against each block's own duration so it
/// neither races ahead of nor falls behind the audio clock (§4.5, §6).
pub struct Driver<P: PcmProcessor> {
    processor: P,
}

impl<P: PcmProcessor> Driver<P> {
    #[must_use]
    pub fn new(processor: P) -> Self {
        Self { processor }
    }

    /// Runs the driver as a standalone task body until `upstream` closes or a
    /// `Quit` message arrives.
    pub async fn run(mut self, mut upstream: ReservoirReceiver) {
        while let Some(msg) = upstream.pull().await {
            match msg {
                Message::Playable(data) => {
                    let block_duration = data.jiffies().to_duration();
                    self.play_block(&data, block_duration).await;
                }
                Message::Quit(_) => return,
                _ => {}
            }
        }
    }

    async fn play_block(&mut self, audio: &DecodedAudio, duration: Duration) {
        self.processor.begin_block();
        let bytes_per_sample = usize::from(audio.bit_depth.div_ceil(8));
        let normalised = normalise_to_big_endian(&audio.data, bytes_per_sample, audio.endianness);
        feed_fragment(&mut self.processor, &normalised, audio.channels, audio.bit_depth);
        self.processor.end_block();

        if duration > Duration::ZERO {
            tokio::time::sleep(duration).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::msg::MsgFactory;
    use crate::reservoir::reservoir;
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingProcessor {
        fragments: Arc<Mutex<Vec<Vec<u8>>>>,
        blocks: Arc<Mutex<u32>>,
    }

    impl PcmProcessor for RecordingProcessor {
        fn begin_block(&mut self) {
            *self.blocks.lock().unwrap() += 1;
        }
        fn process_fragment_8(&mut self, bytes: &[u8], _channels: u8) -> bool {
            self.fragments.lock().unwrap().push(bytes.to_vec());
            true
        }
        fn process_fragment_16(&mut self, bytes: &[u8], _channels: u8) -> bool {
            self.fragments.lock().unwrap().push(bytes.to_vec());
            true
        }
        fn process_fragment_24(&mut self, bytes: &[u8], _channels: u8) -> bool {
            self.fragments.lock().unwrap().push(bytes.to_vec());
            true
        }
        fn process_sample_8(&mut self, _bytes: &[u8], _channels: u8) {}
        fn process_sample_16(&mut self, _bytes: &[u8], _channels: u8) {}
        fn process_sample_24(&mut self, _bytes: &[u8], _channels: u8) {}
        fn end_block(&mut self) {}
    }

    fn factory() -> MsgFactory {
        MsgFactory::new(&PoolConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn playable_blocks_are_fed_to_the_processor() {
        let f = factory();
        let (tx, rx) = reservoir(4);
        let fragments = Arc::new(Mutex::new(Vec::new()));
        let blocks = Arc::new(Mutex::new(0));
        let processor = RecordingProcessor {
            fragments: Arc::clone(&fragments),
            blocks: Arc::clone(&blocks),
        };
        let driver = Driver::new(processor);
        let handle = tokio::spawn(driver.run(rx));

        let audio = DecodedAudio {
            data: Bytes::from(vec![0x12, 0x34, 0x56, 0x78]),
            channels: 2,
            sample_rate: 44_100,
            bit_depth: 16,
            endianness: Endianness::Big,
        };
        tx.push(f.create_playable(audio).await).await.unwrap();
        tx.push(f.create_quit().await).await.unwrap();

        handle.await.unwrap();
        assert_eq!(*blocks.lock().unwrap(), 1);
        assert_eq!(fragments.lock().unwrap().len(), 1);
    }

    #[test]
    fn little_endian_fragments_are_byte_swapped() {
        let data = [0x01u8, 0x02, 0x03, 0x04];
        let out = normalise_to_big_endian(&data, 2, Endianness::Little);
        assert_eq!(&out[..], &[0x02, 0x01, 0x04, 0x03]);
    }

    #[test]
    fn big_endian_fragments_pass_through_unchanged() {
        let data = [0x01u8, 0x02, 0x03, 0x04];
        let out = normalise_to_big_endian(&data, 2, Endianness::Big);
        assert_eq!(&out[..], &data[..]);
    }
}
