//! One worker per encoded stream: recognises the codec, then drives the
//! decode loop emitting `DecodedStream` + `AudioPcm` downstream (§4.4).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;

use crate::error::{CodecError, CodecResult};
use crate::msg::{DecodedAudio, DecodedStreamData, Message, MsgFactory};
use crate::reservoir::ReservoirSender;
use crate::rewinder::Rewinder;
use crate::stream_handler::StreamHandler;
use crate::time::Jiffies;

use super::reader::{CodecReader, ReadOutcome, ReaderEvent};

/// Everything a codec needs to report about the stream it just recognised
/// (§6's `OutputDecodedStream`).
#[derive(Clone)]
pub struct DecodedStreamInfo {
    pub bitrate: u32,
    pub bit_depth: u8,
    pub sample_rate: u32,
    pub channels: u8,
    pub codec_name: &'static str,
    pub total_jiffies: Option<Jiffies>,
    pub sample_start: Jiffies,
    pub lossless: bool,
}

/// The codec↔controller contract (§6). A fresh [`DecodeSession`] implements
/// this for the lifetime of one encoded stream's recognition+decode pass.
#[async_trait]
pub trait CodecControllerApi: Send {
    async fn read(&mut self, bytes: usize) -> CodecResult<bytes::Bytes>;
    /// Consumes and returns a pending seek's target sample number, if
    /// [`CodecController::start_seek`] was called for this stream since the
    /// last check. A codec polls this between reads and repositions its own
    /// decode state when it returns `Some`.
    async fn try_seek(&mut self) -> CodecResult<Option<u64>>;
    /// Rebases the track offset reported on subsequent `AudioPcm` messages to
    /// `offset`, e.g. once a codec has repositioned its decode state to the
    /// sample number returned by [`CodecControllerApi::try_seek`].
    fn seek_to(&mut self, offset: Jiffies);
    async fn output_decoded_stream(&mut self, info: DecodedStreamInfo) -> CodecResult<()>;
    /// Emits one block of decoded PCM; returns the jiffies it represents.
    async fn output_audio_pcm(&mut self, audio: DecodedAudio) -> CodecResult<Jiffies>;
    async fn output_wait(&mut self) -> CodecResult<()>;
    async fn output_halt(&mut self, id: Option<u32>) -> CodecResult<()>;
    async fn output_delay(&mut self, jiffies: Jiffies) -> CodecResult<()>;
    /// Marks a new playback session boundary (clock-puller regrouping); this
    /// crate treats it as a log point only, since session/clock-puller
    /// wiring is a UPnP-layer concern out of this core's scope (§1, DESIGN.md).
    async fn output_session(&mut self) -> CodecResult<()>;
}

/// A codec implementation, registered with the [`CodecController`] in
/// priority order (§4.4, §9: registration order is authoritative — the first
/// codec whose `recognise` succeeds wins).
#[async_trait]
pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attempts to recognise the stream from its start. May read ahead
    /// through `reader`; the rewinder replays the same prefix for the next
    /// codec regardless of outcome.
    async fn recognise(&self, reader: &mut CodecReader<'_>) -> CodecResult<bool>;

    /// Drives the decode loop once recognised: reads encoded bytes on demand
    /// via `session.read`, emits exactly one `output_decoded_stream` and then
    /// a stream of `output_audio_pcm` calls, returning when the stream ends.
    async fn decode(&self, session: &mut dyn CodecControllerApi) -> CodecResult<()>;
}

/// Seek request recorded by [`CodecController::start_seek`] and consumed by
/// the running decode loop between reads (§4.4).
#[derive(Default)]
struct PendingSeek {
    stream_id: Option<u32>,
    sample_number: Option<u64>,
}

/// Output chunking target: the original buffers PCM into roughly 5ms blocks
/// before emitting (§4.4).
const OUTPUT_CHUNK_MS: u64 = 5;

struct DecodeSession<'a> {
    reader: CodecReader<'a>,
    downstream: &'a ReservoirSender,
    factory: &'a MsgFactory,
    stream_id: u32,
    sample_rate: u32,
    track_offset: Jiffies,
    stream_handler: Weak<dyn StreamHandler>,
    pending_seek: &'a SyncMutex<PendingSeek>,
}

#[async_trait]
impl<'a> CodecControllerApi for DecodeSession<'a> {
    async fn read(&mut self, bytes: usize) -> CodecResult<bytes::Bytes> {
        match self.reader.read(bytes).await {
            Ok(b) => Ok(b),
            Err(ReadOutcome::Codec(e)) => Err(e),
            // A new `EncodedStream` or `Flush` mid-decode both mean "this codec's
            // stream is over"; the controller starts recognition afresh for
            // whatever comes next (§4.4's CodecStreamStart semantics).
            Err(ReadOutcome::Event(ReaderEvent::NewEncodedStream | ReaderEvent::Flush(_))) => {
                Err(CodecError::StreamEnded)
            }
        }
    }

    async fn try_seek(&mut self) -> CodecResult<Option<u64>> {
        let mut pending = self.pending_seek.lock();
        if pending.stream_id == Some(self.stream_id) {
            Ok(pending.sample_number.take())
        } else {
            Ok(None)
        }
    }

    fn seek_to(&mut self, offset: Jiffies) {
        self.track_offset = offset;
    }

    async fn output_decoded_stream(&mut self, info: DecodedStreamInfo) -> CodecResult<()> {
        self.sample_rate = info.sample_rate;
        self.track_offset = info.sample_start;
        let data = DecodedStreamData {
            stream_id: self.stream_id,
            bitrate: info.bitrate,
            bit_depth: info.bit_depth,
            sample_rate: info.sample_rate,
            channels: info.channels,
            codec_name: info.codec_name.to_string(),
            total_jiffies: info.total_jiffies,
            sample_start: info.sample_start,
            lossless: info.lossless,
            seekable: true,
            live: false,
            stream_handler: self.stream_handler.clone(),
        };
        let msg = self.factory.create_decoded_stream(data).await;
        self.downstream
            .push(msg)
            .await
            .map_err(|_| CodecError::StreamEnded)
    }

    async fn output_audio_pcm(&mut self, audio: DecodedAudio) -> CodecResult<Jiffies> {
        let produced = audio.jiffies();
        let msg = self
            .factory
            .create_audio_pcm(audio, self.track_offset)
            .await;
        self.track_offset = self.track_offset + produced;
        self.downstream
            .push(msg)
            .await
            .map_err(|_| CodecError::StreamEnded)?;
        Ok(produced)
    }

    async fn output_wait(&mut self) -> CodecResult<()> {
        let msg = self.factory.create_wait().await;
        self.downstream
            .push(msg)
            .await
            .map_err(|_| CodecError::StreamEnded)
    }

    async fn output_halt(&mut self, id: Option<u32>) -> CodecResult<()> {
        let msg = self.factory.create_halt(id).await;
        self.downstream
            .push(msg)
            .await
            .map_err(|_| CodecError::StreamEnded)
    }

    async fn output_delay(&mut self, jiffies: Jiffies) -> CodecResult<()> {
        let msg = self.factory.create_delay(jiffies).await;
        self.downstream
            .push(msg)
            .await
            .map_err(|_| CodecError::StreamEnded)
    }

    async fn output_session(&mut self) -> CodecResult<()> {
        tracing::debug!(stream_id = self.stream_id, "codec output session boundary");
        Ok(())
    }
}

/// The output-chunk accumulator a codec can use to buffer PCM into ~5ms
/// blocks before calling `output_audio_pcm` (§4.4). Exposed so codecs don't
/// each reinvent the same accumulation logic.
pub struct OutputChunker {
    target_frames: usize,
    channels: u8,
    sample_rate: u32,
    bit_depth: u8,
    endianness: crate::msg::Endianness,
    scratch: bytes::BytesMut,
}

impl OutputChunker {
    #[must_use]
    pub fn new(
        channels: u8,
        sample_rate: u32,
        bit_depth: u8,
        endianness: crate::msg::Endianness,
    ) -> Self {
        let target_frames = (u64::from(sample_rate) * OUTPUT_CHUNK_MS / 1000).max(1) as usize;
        Self {
            target_frames,
            channels,
            sample_rate,
            bit_depth,
            endianness,
            scratch: bytes::BytesMut::new(),
        }
    }

    #[must_use]
    pub fn bytes_per_frame(&self) -> usize {
        usize::from(self.channels) * usize::from(self.bit_depth).div_ceil(8)
    }

    /// Feeds raw decoded bytes in; returns a ready-to-emit block once the
    /// ~5ms target has been reached.
    pub fn push(&mut self, bytes: &[u8]) -> Option<DecodedAudio> {
        self.scratch.extend_from_slice(bytes);
        let target_bytes = self.target_frames * self.bytes_per_frame();
        if self.scratch.len() >= target_bytes && target_bytes > 0 {
            let chunk = self.scratch.split_to(target_bytes).freeze();
            Some(DecodedAudio {
                data: chunk,
                channels: self.channels,
                sample_rate: self.sample_rate,
                bit_depth: self.bit_depth,
                endianness: self.endianness,
            })
        } else {
            None
        }
    }

    /// Discards any partially-accumulated bytes, e.g. after a seek repositions
    /// the underlying byte stream and the previously buffered partial frame
    /// no longer follows it.
    pub fn reset(&mut self) {
        self.scratch.clear();
    }

    /// Flushes any partial remainder as a final, short block.
    pub fn flush(&mut self) -> Option<DecodedAudio> {
        if self.scratch.is_empty() {
            return None;
        }
        let chunk = self.scratch.split().freeze();
        Some(DecodedAudio {
            data: chunk,
            channels: self.channels,
            sample_rate: self.sample_rate,
            bit_depth: self.bit_depth,
            endianness: self.endianness,
        })
    }
}

/// Drives codec recognition and decode for a sequence of encoded streams
/// pulled through a [`Rewinder`] (§4.4).
pub struct CodecController {
    codecs: Vec<Arc<dyn Codec>>,
    rewinder: Rewinder,
    downstream: ReservoirSender,
    factory: Arc<MsgFactory>,
    pending_seek: SyncMutex<PendingSeek>,
    next_stream_id: AtomicU32,
}

impl CodecController {
    #[must_use]
    pub fn new(
        codecs: Vec<Arc<dyn Codec>>,
        rewinder: Rewinder,
        downstream: ReservoirSender,
        factory: Arc<MsgFactory>,
    ) -> Self {
        Self {
            codecs,
            rewinder,
            downstream,
            factory,
            pending_seek: SyncMutex::new(PendingSeek::default()),
            next_stream_id: AtomicU32::new(1),
        }
    }

    /// Records a seek request for the decode loop to observe and act on
    /// between reads (§4.4).
    pub fn start_seek(&self, stream_id: u32, sample_number: u64) {
        let mut pending = self.pending_seek.lock();
        pending.stream_id = Some(stream_id);
        pending.sample_number = Some(sample_number);
    }

    /// Runs codec recognition against the currently buffered stream prefix,
    /// returning the matching codec in registration order, or `None` if none
    /// recognised it (§4.4).
    async fn recognise(&mut self) -> Option<Arc<dyn Codec>> {
        for codec in self.codecs.clone() {
            self.rewinder.start_buffering();
            let result = {
                let mut reader = CodecReader::new(&mut self.rewinder);
                codec.recognise(&mut reader).await
            };
            self.rewinder.rewind();
            match result {
                Ok(true) => {
                    tracing::info!(codec = codec.name(), "codec recognised stream");
                    return Some(codec);
                }
                Ok(false) => continue,
                Err(e) => {
                    tracing::debug!(codec = codec.name(), error = %e, "codec recognition failed, trying next");
                    continue;
                }
            }
        }
        None
    }

    /// Runs one full recognise-then-decode pass for a single encoded stream.
    /// Returns `Ok(())` on a clean end or a handled stop/seek; propagates only
    /// errors the caller must surface upward (none today — every `CodecError`
    /// variant is handled by this loop per §4.4's failure semantics).
    pub async fn run_one_stream(&mut self, stream_handler: Weak<dyn StreamHandler>) -> CodecResult<()> {
        self.rewinder.stop();
        let Some(codec) = self.recognise().await else {
            tracing::warn!("no codec recognised the stream; requesting upstream stop");
            if let Some(handler) = stream_handler.upgrade() {
                let stream_id = self.next_stream_id.load(Ordering::Acquire);
                let _ = handler.try_stop(stream_id).await;
            }
            return Err(CodecError::NotRecognised);
        };
        self.rewinder.stop();

        let stream_id = self.next_stream_id.fetch_add(1, Ordering::AcqRel);
        let mut session = DecodeSession {
            reader: CodecReader::new(&mut self.rewinder),
            downstream: &self.downstream,
            factory: &self.factory,
            stream_id,
            sample_rate: 44_100,
            track_offset: Jiffies::ZERO,
            stream_handler,
            pending_seek: &self.pending_seek,
        };

        codec.decode(&mut session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::reservoir::{encoded_reservoir, reservoir};
    use bytes::Bytes;

    struct AlwaysFails;
    #[async_trait]
    impl Codec for AlwaysFails {
        fn name(&self) -> &'static str {
            "always-fails"
        }
        async fn recognise(&self, _reader: &mut CodecReader<'_>) -> CodecResult<bool> {
            Ok(false)
        }
        async fn decode(&self, _session: &mut dyn CodecControllerApi) -> CodecResult<()> {
            unreachable!("never recognised")
        }
    }

    struct AlwaysRecognises;
    #[async_trait]
    impl Codec for AlwaysRecognises {
        fn name(&self) -> &'static str {
            "always-recognises"
        }
        async fn recognise(&self, _reader: &mut CodecReader<'_>) -> CodecResult<bool> {
            Ok(true)
        }
        async fn decode(&self, session: &mut dyn CodecControllerApi) -> CodecResult<()> {
            session
                .output_decoded_stream(DecodedStreamInfo {
                    bitrate: 1411,
                    bit_depth: 16,
                    sample_rate: 44_100,
                    channels: 2,
                    codec_name: "test",
                    total_jiffies: None,
                    sample_start: Jiffies::ZERO,
                    lossless: true,
                })
                .await?;
            let bytes = session.read(16).await?;
            session
                .output_audio_pcm(DecodedAudio {
                    data: bytes,
                    channels: 2,
                    sample_rate: 44_100,
                    bit_depth: 16,
                    endianness: crate::msg::Endianness::Big,
                })
                .await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn first_registered_codec_that_recognises_wins() {
        let factory = Arc::new(MsgFactory::new(&PoolConfig::default()));
        let (enc_tx, enc_rx) = encoded_reservoir(4096);
        let (dec_tx, mut dec_rx) = reservoir(16);
        enc_tx
            .push(factory.create_audio_encoded(Bytes::from(vec![0x7Fu8; 32])).await)
            .await
            .unwrap();

        let rewinder = Rewinder::new(enc_rx, 4096);
        let mut controller = CodecController::new(
            vec![Arc::new(AlwaysFails), Arc::new(AlwaysRecognises)],
            rewinder,
            dec_tx,
            factory,
        );

        controller.run_one_stream(Weak::new()).await.unwrap();

        let first = dec_rx.pull().await.unwrap();
        assert!(matches!(first, Message::DecodedStream(_)));
        let second = dec_rx.pull().await.unwrap();
        assert!(matches!(second, Message::AudioPcm(_)));
    }

    #[tokio::test]
    async fn no_codec_recognises_returns_not_recognised() {
        let factory = Arc::new(MsgFactory::new(&PoolConfig::default()));
        let (enc_tx, enc_rx) = encoded_reservoir(4096);
        let (dec_tx, _dec_rx) = reservoir(16);
        enc_tx
            .push(factory.create_audio_encoded(Bytes::from(vec![0u8; 16])).await)
            .await
            .unwrap();

        let rewinder = Rewinder::new(enc_rx, 4096);
        let mut controller =
            CodecController::new(vec![Arc::new(AlwaysFails)], rewinder, dec_tx, factory);

        let result = controller.run_one_stream(Weak::new()).await;
        assert!(matches!(result, Err(CodecError::NotRecognised)));
    }
}
