//! The `Message` union and the factory that mints pooled instances of it (§3, §4.1).
//!
//! Audio-bearing kinds (`AudioEncoded`, `AudioPcm`) are drawn from dedicated
//! pools sized by [`crate::config::PoolConfig`] because they are on the hot
//! path and carry the bytes the spec wants recycled without heap churn.
//! Control kinds are cheap enough that pooling their memory buys nothing; they
//! still draw a permit from a shared control pool so the configured
//! `control_cells` budget bounds how many may be in flight at once, matching
//! the spirit of "a pool per message kind" without a combinatorial explosion
//! of near-identical pool types.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;

use super::audio::{DecodedAudio, EncodedAudio};
use super::pool::{Cell, Pool, PoolStats};
use super::ramp::Ramp;
use crate::config::PoolConfig;
use crate::ids::FlushIdProvider;
use crate::stream_handler::StreamHandler;
use crate::time::Jiffies;

/// A pooled payload shared by `Arc`, mutated in place via the inner mutex (the
/// original's `AddRef`/`RemoveRef` over a raw cell, realized with `Arc<Mutex<Cell<T>>>`
/// per §3's ownership notes).
pub type Pooled<T> = Arc<Mutex<Cell<T>>>;

/// A low-volume control payload plus the control-pool permit that bounds how
/// many such messages may be outstanding at once.
#[derive(Clone)]
pub struct Guarded<T: Clone> {
    pub data: T,
    _permit: Arc<Cell<()>>,
}

impl<T: Clone> Guarded<T> {
    fn new(data: T, permit: Arc<Cell<()>>) -> Self {
        Self {
            data,
            _permit: permit,
        }
    }
}

impl<T: Clone> std::ops::Deref for Guarded<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.data
    }
}

#[derive(Debug, Clone)]
pub struct TrackData {
    pub uri: String,
    pub metadata: Option<String>,
    pub id: u32,
}

#[derive(Debug, Clone)]
pub struct ModeData {
    pub name: String,
    pub supports_latency: bool,
    pub real_time: bool,
}

#[derive(Debug, Clone)]
pub struct DelayData {
    pub jiffies: Jiffies,
}

/// `EncodedStream` payload (§3). `stream_handler` is the non-owning upstream
/// control back-reference described in §3's ownership notes.
#[derive(Clone)]
pub struct EncodedStreamData {
    pub uri: String,
    pub metatext: Option<String>,
    pub total_bytes: Option<u64>,
    pub stream_id: u32,
    pub seekable: bool,
    pub live: bool,
    pub stream_handler: Weak<dyn StreamHandler>,
}

#[derive(Debug, Clone)]
pub struct MetaTextData {
    pub text: String,
}

/// `DecodedStream` payload (§3); precedes the first `AudioPcm` of its stream.
#[derive(Clone)]
pub struct DecodedStreamData {
    pub stream_id: u32,
    pub bitrate: u32,
    pub bit_depth: u8,
    pub sample_rate: u32,
    pub channels: u8,
    pub codec_name: String,
    pub total_jiffies: Option<Jiffies>,
    pub sample_start: Jiffies,
    pub lossless: bool,
    pub seekable: bool,
    pub live: bool,
    pub stream_handler: Weak<dyn StreamHandler>,
}

#[derive(Debug, Clone)]
pub struct SilenceData {
    pub duration: Jiffies,
}

#[derive(Debug, Clone)]
pub struct HaltData {
    pub id: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
pub struct FlushData {
    pub id: u32,
}

/// Completion callback for `Drain`, fired once every stage upstream has
/// observed it and emptied its reservoir (§3).
#[derive(Clone)]
pub struct DrainData {
    pub on_complete: Arc<dyn Fn() + Send + Sync>,
}

/// `AudioPcm` payload: decoded audio plus the track offset and optional ramp
/// that travel with it (§3).
#[derive(Default)]
pub struct AudioPcmCell {
    pub audio: DecodedAudio,
    pub track_offset: Jiffies,
    pub ramp: Ramp,
}

/// A tag identifying a [`Message`]'s concrete kind without borrowing its
/// payload, for logging and the reservoir's per-kind dispatch (§3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Mode,
    Track,
    Delay,
    EncodedStream,
    AudioEncoded,
    MetaText,
    DecodedStream,
    AudioPcm,
    Silence,
    Playable,
    Halt,
    Flush,
    Wait,
    Drain,
    Quit,
}

/// The heterogeneous message moving between pipeline elements (§3).
#[derive(Clone)]
pub enum Message {
    Mode(Guarded<ModeData>),
    Track(Guarded<TrackData>),
    Delay(Guarded<DelayData>),
    EncodedStream(Guarded<EncodedStreamData>),
    AudioEncoded(Pooled<EncodedAudio>),
    MetaText(Guarded<MetaTextData>),
    DecodedStream(Guarded<DecodedStreamData>),
    AudioPcm(Pooled<AudioPcmCell>),
    Silence(Guarded<SilenceData>),
    Playable(Guarded<DecodedAudio>),
    Halt(Guarded<HaltData>),
    Flush(Guarded<FlushData>),
    Wait(Guarded<()>),
    Drain(Guarded<DrainData>),
    Quit(Guarded<()>),
}

impl Message {
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Mode(_) => MessageKind::Mode,
            Message::Track(_) => MessageKind::Track,
            Message::Delay(_) => MessageKind::Delay,
            Message::EncodedStream(_) => MessageKind::EncodedStream,
            Message::AudioEncoded(_) => MessageKind::AudioEncoded,
            Message::MetaText(_) => MessageKind::MetaText,
            Message::DecodedStream(_) => MessageKind::DecodedStream,
            Message::AudioPcm(_) => MessageKind::AudioPcm,
            Message::Silence(_) => MessageKind::Silence,
            Message::Playable(_) => MessageKind::Playable,
            Message::Halt(_) => MessageKind::Halt,
            Message::Flush(_) => MessageKind::Flush,
            Message::Wait(_) => MessageKind::Wait,
            Message::Drain(_) => MessageKind::Drain,
            Message::Quit(_) => MessageKind::Quit,
        }
    }

    /// Jiffies of audio this message represents, for reservoir bookkeeping
    /// (§4.2). Zero for every non-audio kind.
    #[must_use]
    pub fn jiffies(&self) -> Jiffies {
        match self {
            Message::AudioPcm(cell) => cell.lock().audio.jiffies(),
            Message::Playable(data) => data.jiffies(),
            Message::Silence(data) => data.duration,
            _ => Jiffies::ZERO,
        }
    }

    /// Encoded bytes this message represents, for the encoded reservoir's byte
    /// accounting (§4.2). Zero for every non-encoded kind.
    #[must_use]
    pub fn encoded_bytes(&self) -> usize {
        match self {
            Message::AudioEncoded(cell) => cell.lock().total_bytes(),
            _ => 0,
        }
    }
}

/// Aggregated pool occupancy across every pool the factory owns (§4.1).
#[derive(Debug, Clone, Copy)]
pub struct MsgFactoryStats {
    pub audio_encoded: PoolStats,
    pub audio_pcm: PoolStats,
    pub control: PoolStats,
}

/// Mints pooled [`Message`] instances. One factory is shared (via `Arc`)
/// across every protocol and pipeline stage that needs to construct messages.
pub struct MsgFactory {
    encoded_pool: Pool<EncodedAudio>,
    pcm_pool: Pool<AudioPcmCell>,
    control_pool: Pool<()>,
    flush_ids: FlushIdProvider,
}

impl MsgFactory {
    #[must_use]
    pub fn new(pools: &PoolConfig) -> Self {
        Self {
            encoded_pool: Pool::new(pools.audio_encoded_cells),
            pcm_pool: Pool::new(pools.audio_pcm_cells),
            control_pool: Pool::new(pools.control_cells),
            flush_ids: FlushIdProvider::new(),
        }
    }

    async fn control_permit(&self) -> Arc<Cell<()>> {
        Arc::new(self.control_pool.allocate().await)
    }

    /// # Panics
    /// Panics if `bytes` is empty: a zero-byte `AudioEncoded` is rejected by
    /// construction, per §8.
    pub async fn create_audio_encoded(&self, bytes: Bytes) -> Message {
        assert!(!bytes.is_empty(), "zero-byte AudioEncoded rejected");
        let mut cell = self.encoded_pool.allocate().await;
        *cell = EncodedAudio::new(bytes);
        Message::AudioEncoded(Arc::new(Mutex::new(cell)))
    }

    pub async fn create_audio_pcm(&self, audio: DecodedAudio, track_offset: Jiffies) -> Message {
        let mut cell = self.pcm_pool.allocate().await;
        *cell = AudioPcmCell {
            audio,
            track_offset,
            ramp: Ramp::reset(),
        };
        Message::AudioPcm(Arc::new(Mutex::new(cell)))
    }

    pub async fn create_mode(&self, name: impl Into<String>, supports_latency: bool, real_time: bool) -> Message {
        let permit = self.control_permit().await;
        Message::Mode(Guarded::new(
            ModeData {
                name: name.into(),
                supports_latency,
                real_time,
            },
            permit,
        ))
    }

    pub async fn create_track(&self, uri: impl Into<String>, metadata: Option<String>, id: u32) -> Message {
        let permit = self.control_permit().await;
        Message::Track(Guarded::new(
            TrackData {
                uri: uri.into(),
                metadata,
                id,
            },
            permit,
        ))
    }

    pub async fn create_delay(&self, jiffies: Jiffies) -> Message {
        let permit = self.control_permit().await;
        Message::Delay(Guarded::new(DelayData { jiffies }, permit))
    }

    pub async fn create_encoded_stream(&self, data: EncodedStreamData) -> Message {
        let permit = self.control_permit().await;
        Message::EncodedStream(Guarded::new(data, permit))
    }

    pub async fn create_metatext(&self, text: impl Into<String>) -> Message {
        let permit = self.control_permit().await;
        Message::MetaText(Guarded::new(MetaTextData { text: text.into() }, permit))
    }

    pub async fn create_decoded_stream(&self, data: DecodedStreamData) -> Message {
        let permit = self.control_permit().await;
        Message::DecodedStream(Guarded::new(data, permit))
    }

    pub async fn create_silence(&self, duration: Jiffies) -> Message {
        let permit = self.control_permit().await;
        Message::Silence(Guarded::new(SilenceData { duration }, permit))
    }

    pub async fn create_playable(&self, data: DecodedAudio) -> Message {
        let permit = self.control_permit().await;
        Message::Playable(Guarded::new(data, permit))
    }

    pub async fn create_halt(&self, id: Option<u32>) -> Message {
        let permit = self.control_permit().await;
        Message::Halt(Guarded::new(HaltData { id }, permit))
    }

    /// Mints a fresh, monotonically assigned flush id (§4.1).
    pub async fn create_flush(&self) -> Message {
        let permit = self.control_permit().await;
        Message::Flush(Guarded::new(
            FlushData {
                id: self.flush_ids.next(),
            },
            permit,
        ))
    }

    /// Builds a `Flush` carrying a specific, already-minted id (e.g. replayed
    /// from a protocol's retained pending-flush state).
    pub async fn create_flush_with_id(&self, id: u32) -> Message {
        let permit = self.control_permit().await;
        Message::Flush(Guarded::new(FlushData { id }, permit))
    }

    pub async fn create_wait(&self) -> Message {
        let permit = self.control_permit().await;
        Message::Wait(Guarded::new((), permit))
    }

    pub async fn create_drain(&self, on_complete: Arc<dyn Fn() + Send + Sync>) -> Message {
        let permit = self.control_permit().await;
        Message::Drain(Guarded::new(DrainData { on_complete }, permit))
    }

    pub async fn create_quit(&self) -> Message {
        let permit = self.control_permit().await;
        Message::Quit(Guarded::new((), permit))
    }

    #[must_use]
    pub fn stats(&self) -> MsgFactoryStats {
        MsgFactoryStats {
            audio_encoded: self.encoded_pool.stats(),
            audio_pcm: self.pcm_pool.stats(),
            control: self.control_pool.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> MsgFactory {
        MsgFactory::new(&PoolConfig::default())
    }

    #[tokio::test]
    async fn create_and_drop_audio_encoded_returns_cell() {
        let factory = factory();
        let msg = factory.create_audio_encoded(Bytes::from_static(b"abc")).await;
        assert_eq!(msg.kind(), MessageKind::AudioEncoded);
        assert_eq!(msg.encoded_bytes(), 3);
        assert_eq!(factory.stats().audio_encoded.used, 1);
        drop(msg);
        assert_eq!(factory.stats().audio_encoded.used, 0);
    }

    #[tokio::test]
    #[should_panic(expected = "zero-byte")]
    async fn zero_byte_audio_encoded_rejected() {
        let factory = factory();
        factory.create_audio_encoded(Bytes::new()).await;
    }

    #[tokio::test]
    async fn flush_ids_are_monotonic() {
        let factory = factory();
        let a = factory.create_flush().await;
        let b = factory.create_flush().await;
        let (Message::Flush(a), Message::Flush(b)) = (a, b) else {
            panic!("expected Flush");
        };
        assert!(a.data.id < b.data.id);
    }

    #[tokio::test]
    async fn audio_pcm_jiffies_reflect_frame_count() {
        let factory = factory();
        let audio = DecodedAudio {
            data: Bytes::from(vec![0u8; 4 * 100]),
            channels: 2,
            sample_rate: 44_100,
            bit_depth: 16,
            endianness: super::super::audio::Endianness::Big,
        };
        let msg = factory.create_audio_pcm(audio, Jiffies::ZERO).await;
        assert_eq!(msg.jiffies().to_samples(44_100), 100);
    }

    #[tokio::test]
    async fn control_messages_share_the_control_pool_budget() {
        let mut pools = PoolConfig::default();
        pools.control_cells = 1;
        let factory = MsgFactory::new(&pools);
        let first = factory.create_halt(None).await;
        assert_eq!(factory.stats().control.used, 1);
        drop(first);
        assert_eq!(factory.stats().control.used, 0);
        let _second = factory.create_wait().await;
        assert_eq!(factory.stats().control.used, 1);
    }
}
