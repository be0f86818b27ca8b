//! Codec recognition and decoding (§4.4, §6).
//!
//! A [`Codec`] only needs to know how to recognise its own framing and turn
//! encoded bytes into PCM; the [`CodecController`] owns the rewind-on-fail
//! recognition loop, stream id assignment, and message construction.

mod controller;
mod reader;
mod wav;

pub use controller::{Codec, CodecController, CodecControllerApi, DecodedStreamInfo, OutputChunker};
pub use reader::{CodecReader, ReadOutcome, ReaderEvent};
pub use wav::WavCodec;
