//! Minimal WAV/RIFF-LPCM codec.
//!
//! Specific codec implementations are out of this crate's scope; this one
//! exists purely so the codec controller's recognise/decode state machine has
//! a concrete, testable codec to drive (§8's WAV scenarios), grounded in the
//! teacher's `create_wav_header` framing (RIFF/WAVE/fmt/data chunk layout).

use async_trait::async_trait;
use bytes::Buf;

use crate::error::{CodecError, CodecResult};
use crate::msg::Endianness;
use crate::time::Jiffies;

use super::controller::{Codec, CodecControllerApi, DecodedStreamInfo, OutputChunker};
use super::reader::CodecReader;

const RIFF_HEADER_LEN: usize = 12;
const FMT_CHUNK_HEADER_LEN: usize = 8;

pub struct WavCodec;

#[async_trait]
impl Codec for WavCodec {
    fn name(&self) -> &'static str {
        "wav"
    }

    async fn recognise(&self, reader: &mut CodecReader<'_>) -> CodecResult<bool> {
        let header = match reader.read(RIFF_HEADER_LEN).await {
            Ok(b) => b,
            Err(_) => return Ok(false),
        };
        Ok(&header[0..4] == b"RIFF" && &header[8..12] == b"WAVE")
    }

    async fn decode(&self, session: &mut dyn CodecControllerApi) -> CodecResult<()> {
        let _riff = session.read(RIFF_HEADER_LEN).await?;

        let (channels, sample_rate, bit_depth) = read_fmt_chunk(session).await?;
        skip_to_data_chunk(session).await?;

        session
            .output_decoded_stream(DecodedStreamInfo {
                bitrate: sample_rate * u32::from(channels) * u32::from(bit_depth),
                bit_depth,
                sample_rate,
                channels,
                codec_name: "wav",
                total_jiffies: None,
                sample_start: Jiffies::ZERO,
                lossless: true,
            })
            .await?;

        let mut chunker = OutputChunker::new(channels, sample_rate, bit_depth, Endianness::Little);
        let bytes_per_frame = chunker.bytes_per_frame().max(1) as u64;
        let mut position_bytes: u64 = 0;

        loop {
            if let Some(target_sample) = session.try_seek().await? {
                let target_bytes = target_sample * bytes_per_frame;
                if target_bytes < position_bytes {
                    log::debug!("wav: ignoring seek behind the current position, stream is forward-only");
                } else {
                    let mut remaining = target_bytes - position_bytes;
                    while remaining > 0 {
                        let take = remaining.min(4096) as usize;
                        match session.read(take).await {
                            Ok(_) => {
                                position_bytes += take as u64;
                                remaining -= take as u64;
                            }
                            Err(CodecError::StreamEnded) => {
                                remaining = 0;
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    chunker.reset();
                    session.seek_to(Jiffies::from_samples(target_sample, sample_rate).unwrap_or(Jiffies::ZERO));
                }
            }

            match session.read(4096).await {
                Ok(bytes) => {
                    position_bytes += bytes.len() as u64;
                    if let Some(block) = chunker.push(&bytes) {
                        session.output_audio_pcm(block).await?;
                    }
                }
                Err(CodecError::StreamEnded) => {
                    if let Some(block) = chunker.flush() {
                        session.output_audio_pcm(block).await?;
                    }
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn read_fmt_chunk(session: &mut dyn CodecControllerApi) -> CodecResult<(u8, u32, u8)> {
    let header = session.read(FMT_CHUNK_HEADER_LEN).await?;
    if &header[0..4] != b"fmt " {
        return Err(CodecError::StreamCorrupt("missing fmt chunk".into()));
    }
    let mut chunk_size_field = &header[4..8];
    let chunk_size = chunk_size_field.get_u32_le() as usize;
    let body = session.read(chunk_size).await?;
    let mut body = &body[..];
    let _audio_format = body.get_u16_le();
    let channels = body.get_u16_le();
    let sample_rate = body.get_u32_le();
    let _byte_rate = body.get_u32_le();
    let _block_align = body.get_u16_le();
    let bits_per_sample = body.get_u16_le();

    if !matches!(channels, 1 | 2) {
        return Err(CodecError::FeatureUnsupported(format!(
            "unsupported channel count {channels}"
        )));
    }
    if !matches!(bits_per_sample, 16 | 24) {
        return Err(CodecError::FeatureUnsupported(format!(
            "unsupported bit depth {bits_per_sample}"
        )));
    }

    Ok((channels as u8, sample_rate, bits_per_sample as u8))
}

async fn skip_to_data_chunk(session: &mut dyn CodecControllerApi) -> CodecResult<()> {
    let header = session.read(FMT_CHUNK_HEADER_LEN).await?;
    if &header[0..4] != b"data" {
        return Err(CodecError::StreamCorrupt("missing data chunk".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::msg::{DecodedStreamData, Message, MsgFactory};
    use crate::reservoir::{encoded_reservoir, reservoir};
    use crate::rewinder::Rewinder;
    use bytes::{BufMut, Bytes, BytesMut};
    use std::sync::{Arc, Weak};

    fn wav_bytes(sample_rate: u32, channels: u16, bits: u16, pcm: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_slice(b"RIFF");
        buf.put_u32_le(0);
        buf.put_slice(b"WAVE");
        buf.put_slice(b"fmt ");
        buf.put_u32_le(16);
        buf.put_u16_le(1);
        buf.put_u16_le(channels);
        buf.put_u32_le(sample_rate);
        buf.put_u32_le(sample_rate * channels as u32 * (bits / 8) as u32);
        buf.put_u16_le(channels * (bits / 8));
        buf.put_u16_le(bits);
        buf.put_slice(b"data");
        buf.put_u32_le(pcm.len() as u32);
        buf.put_slice(pcm);
        buf.freeze()
    }

    #[tokio::test]
    async fn recognises_a_well_formed_wav_header() {
        let factory = MsgFactory::new(&PoolConfig::default());
        let (tx, rx) = encoded_reservoir(8192);
        tx.push(factory.create_audio_encoded(wav_bytes(44_100, 2, 16, &[0u8; 32])).await)
            .await
            .unwrap();
        let mut rewinder = Rewinder::new(rx, 8192);
        let mut reader = CodecReader::new(&mut rewinder);
        assert!(WavCodec.recognise(&mut reader).await.unwrap());
    }

    #[tokio::test]
    async fn rejects_a_non_riff_stream() {
        let factory = MsgFactory::new(&PoolConfig::default());
        let (tx, rx) = encoded_reservoir(8192);
        tx.push(factory.create_audio_encoded(Bytes::from_static(b"not a wav file at all!!")).await)
            .await
            .unwrap();
        let mut rewinder = Rewinder::new(rx, 8192);
        let mut reader = CodecReader::new(&mut rewinder);
        assert!(!WavCodec.recognise(&mut reader).await.unwrap());
    }

    #[tokio::test]
    async fn decodes_pcm_payload_and_emits_decoded_stream_then_pcm() {
        let factory = Arc::new(MsgFactory::new(&PoolConfig::default()));
        let (enc_tx, enc_rx) = encoded_reservoir(8192);
        let (dec_tx, mut dec_rx) = reservoir(16);
        let pcm = vec![0x11u8; 4 * 64]; // 64 frames, 16-bit stereo
        enc_tx
            .push(factory.create_audio_encoded(wav_bytes(44_100, 2, 16, &pcm)).await)
            .await
            .unwrap();
        drop(enc_tx);

        let rewinder = Rewinder::new(enc_rx, 8192);
        let mut session = super::super::controller::CodecController::new(
            vec![Arc::new(WavCodec)],
            rewinder,
            dec_tx,
            factory,
        );

        session.run_one_stream(Weak::new()).await.unwrap();

        let first = dec_rx.pull().await.unwrap();
        let Message::DecodedStream(data) = first else {
            panic!("expected DecodedStream, got something else");
        };
        assert_eq!(data.sample_rate, 44_100);
        assert_eq!(data.channels, 2);
        assert_eq!(data.bit_depth, 16);

        let mut total_frames = 0;
        while let Ok(Some(msg)) =
            tokio::time::timeout(std::time::Duration::from_millis(50), dec_rx.pull()).await
        {
            let Message::AudioPcm(cell) = msg else {
                panic!("expected AudioPcm");
            };
            total_frames += cell.lock().audio.frame_count();
        }
        assert_eq!(total_frames, 64);
    }

    #[tokio::test]
    async fn seek_skips_ahead_and_rebases_track_offset() {
        let factory = Arc::new(MsgFactory::new(&PoolConfig::default()));
        let (enc_tx, enc_rx) = encoded_reservoir(1 << 16);
        let (dec_tx, mut dec_rx) = reservoir(16);
        let pcm = vec![0x22u8; 4 * 100]; // 100 frames, 16-bit stereo
        enc_tx
            .push(factory.create_audio_encoded(wav_bytes(44_100, 2, 16, &pcm)).await)
            .await
            .unwrap();
        drop(enc_tx);

        let rewinder = Rewinder::new(enc_rx, 1 << 16);
        let mut session = super::super::controller::CodecController::new(
            vec![Arc::new(WavCodec)],
            rewinder,
            dec_tx,
            factory,
        );
        // run_one_stream assigns stream ids starting at 1.
        session.start_seek(1, 50);

        session.run_one_stream(Weak::new()).await.unwrap();

        let first = dec_rx.pull().await.unwrap();
        assert!(matches!(first, Message::DecodedStream(_)));

        let mut total_frames = 0;
        let mut first_offset = None;
        while let Ok(Some(msg)) =
            tokio::time::timeout(std::time::Duration::from_millis(50), dec_rx.pull()).await
        {
            let Message::AudioPcm(cell) = msg else {
                panic!("expected AudioPcm");
            };
            let guard = cell.lock();
            first_offset.get_or_insert(guard.track_offset);
            total_frames += guard.audio.frame_count();
        }

        assert_eq!(total_frames, 50);
        assert_eq!(first_offset, Jiffies::from_samples(50, 44_100));
    }
}
