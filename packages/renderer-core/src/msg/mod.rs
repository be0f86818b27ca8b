//! Pipeline messages, their pooled allocation, and the volume ramp they carry
//! (§3, §4.1).

mod audio;
mod message;
mod pool;
mod ramp;

pub use audio::{DecodedAudio, Endianness, EncodedAudio, DECODED_AUDIO_MAX_BYTES};
pub use message::{
    AudioPcmCell, DecodedStreamData, DelayData, DrainData, EncodedStreamData, FlushData, Guarded,
    HaltData, Message, MessageKind, MetaTextData, ModeData, MsgFactory, MsgFactoryStats, Pooled,
    SilenceData, TrackData,
};
pub use pool::{Cell, Pool, PoolStats};
pub use ramp::{Direction, Ramp, RAMP_MAX, RAMP_MIN};
