//! Adapts the rewinder's message stream into the byte-oriented `Read`
//! half of the codec↔controller contract (§6).

use bytes::{Bytes, BytesMut};

use crate::error::CodecError;
use crate::msg::Message;
use crate::rewinder::Rewinder;

/// Byte-level reader a [`crate::codec::Codec`] uses during recognition and
/// decoding. Accumulates bytes out of `AudioEncoded` messages pulled through
/// the rewinder; non-audio control messages pulled along the way are
/// surfaced to the caller instead of being silently absorbed, since several
/// of them (`EncodedStream`, `Flush`) change codec state (§4.4).
pub struct CodecReader<'a> {
    rewinder: &'a mut Rewinder,
    buffer: BytesMut,
}

/// A control message observed while trying to satisfy a byte read.
#[derive(Debug, Clone)]
pub enum ReaderEvent {
    NewEncodedStream,
    Flush(u32),
}

impl<'a> CodecReader<'a> {
    #[must_use]
    pub fn new(rewinder: &'a mut Rewinder) -> Self {
        Self {
            rewinder,
            buffer: BytesMut::new(),
        }
    }

    /// Reads exactly `bytes` bytes, pulling more `AudioEncoded` messages as
    /// needed. Returns [`CodecError::StreamEnded`] if the stream ends first,
    /// or `Err` wrapping a control event that changes codec state.
    pub async fn read(&mut self, bytes: usize) -> Result<Bytes, ReadOutcome> {
        while self.buffer.len() < bytes {
            match self.rewinder.pull().await {
                Some(Ok(Message::AudioEncoded(cell))) => {
                    let chunk = cell.lock().copy_to();
                    self.buffer.extend_from_slice(&chunk);
                }
                Some(Ok(Message::EncodedStream(_))) => {
                    return Err(ReadOutcome::Event(ReaderEvent::NewEncodedStream));
                }
                Some(Ok(Message::Flush(data))) => {
                    return Err(ReadOutcome::Event(ReaderEvent::Flush(data.data.id)));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ReadOutcome::Codec(e)),
                None => return Err(ReadOutcome::Codec(CodecError::StreamEnded)),
            }
        }
        Ok(self.buffer.split_to(bytes).freeze())
    }

    /// Bytes already buffered but not yet consumed by a `read` call.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Outcome of a [`CodecReader::read`] call that did not return bytes.
#[derive(Debug)]
pub enum ReadOutcome {
    Codec(CodecError),
    Event(ReaderEvent),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::msg::MsgFactory;
    use crate::reservoir::encoded_reservoir;

    #[tokio::test]
    async fn read_accumulates_across_several_audio_encoded_messages() {
        let factory = MsgFactory::new(&PoolConfig::default());
        let (tx, rx) = encoded_reservoir(4096);
        tx.push(factory.create_audio_encoded(Bytes::from_static(b"abcd")).await)
            .await
            .unwrap();
        tx.push(factory.create_audio_encoded(Bytes::from_static(b"efgh")).await)
            .await
            .unwrap();

        let mut rewinder = Rewinder::new(rx, 4096);
        let mut reader = CodecReader::new(&mut rewinder);
        let got = reader.read(6).await.unwrap();
        assert_eq!(&got[..], b"abcdef");
        assert_eq!(reader.buffered_len(), 2);
    }

    #[tokio::test]
    async fn new_encoded_stream_surfaces_as_a_reader_event() {
        let factory = MsgFactory::new(&PoolConfig::default());
        let (tx, rx) = encoded_reservoir(4096);
        tx.push(
            factory
                .create_encoded_stream(crate::msg::EncodedStreamData {
                    uri: "x://y".into(),
                    metatext: None,
                    total_bytes: None,
                    stream_id: 1,
                    seekable: false,
                    live: false,
                    stream_handler: std::sync::Weak::new(),
                })
                .await,
        )
        .await
        .unwrap();

        let mut rewinder = Rewinder::new(rx, 4096);
        let mut reader = CodecReader::new(&mut rewinder);
        let err = reader.read(4).await.unwrap_err();
        assert!(matches!(err, ReadOutcome::Event(ReaderEvent::NewEncodedStream)));
    }

    #[tokio::test]
    async fn stream_ended_surfaces_when_upstream_closes() {
        let factory = MsgFactory::new(&PoolConfig::default());
        let (tx, rx) = encoded_reservoir(4096);
        tx.push(factory.create_audio_encoded(Bytes::from_static(b"ab")).await)
            .await
            .unwrap();
        drop(tx);

        let mut rewinder = Rewinder::new(rx, 4096);
        let mut reader = CodecReader::new(&mut rewinder);
        let err = reader.read(10).await.unwrap_err();
        assert!(matches!(err, ReadOutcome::Codec(CodecError::StreamEnded)));
    }
}
