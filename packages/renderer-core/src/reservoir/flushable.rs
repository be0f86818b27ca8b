//! The flushable reservoir variant: while a flush is pending, incoming audio
//! is discarded until the awaited flush id arrives (§4.2).

use parking_lot::Mutex;

use super::simple::{reservoir, ReservoirReceiver, ReservoirSender, ReservoirStats};
use crate::msg::Message;

/// Push half of a [`flushable_reservoir`] pair.
pub struct FlushableSender {
    inner: ReservoirSender,
    awaiting: std::sync::Arc<Mutex<Option<u32>>>,
}

/// Pull half; behaves exactly like [`ReservoirReceiver`] since flush
/// interception happens entirely on the input side (§4.2).
pub type FlushableReceiver = ReservoirReceiver;

/// Builds a flushable FIFO of capacity `capacity` messages.
#[must_use]
pub fn flushable_reservoir(capacity: usize) -> (FlushableSender, FlushableReceiver) {
    let (tx, rx) = reservoir(capacity);
    (
        FlushableSender {
            inner: tx,
            awaiting: std::sync::Arc::new(Mutex::new(None)),
        },
        rx,
    )
}

fn is_discardable_audio(msg: &Message) -> bool {
    matches!(
        msg,
        Message::AudioPcm(_) | Message::AudioEncoded(_) | Message::Playable(_) | Message::Silence(_)
    )
}

impl FlushableSender {
    /// Arms the reservoir to discard subsequent audio until `Flush(id)`
    /// arrives. Idempotent with the most recently armed id taking effect.
    pub fn begin_flush(&self, id: u32) {
        *self.awaiting.lock() = Some(id);
    }

    /// Whether a flush is currently being awaited.
    #[must_use]
    pub fn is_flushing(&self) -> bool {
        self.awaiting.lock().is_some()
    }

    /// Pushes `msg`, applying flush-discard semantics.
    ///
    /// Returns `Ok(true)` if the message was enqueued, `Ok(false)` if it was
    /// silently discarded (refs released via normal `Drop`), `Err` if the
    /// receiver has gone away.
    pub async fn push(&self, msg: Message) -> Result<bool, Message> {
        let mut awaiting = self.awaiting.lock();
        if let Some(id) = *awaiting {
            if let Message::Flush(data) = &msg {
                if data.data.id == id {
                    *awaiting = None;
                    drop(awaiting);
                    self.inner.push(msg).await?;
                    return Ok(true);
                }
            }
            if is_discardable_audio(&msg) {
                return Ok(false);
            }
        }
        drop(awaiting);
        self.inner.push(msg).await?;
        Ok(true)
    }

    #[must_use]
    pub fn stats(&self) -> ReservoirStats {
        self.inner.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::msg::MsgFactory;

    #[tokio::test]
    async fn audio_is_discarded_while_flush_pending() {
        let factory = MsgFactory::new(&PoolConfig::default());
        let (tx, mut rx) = flushable_reservoir(8);

        tx.begin_flush(5);
        let accepted = tx
            .push(factory.create_silence(crate::time::Jiffies::from_millis(1)).await)
            .await
            .unwrap();
        assert!(!accepted);

        let flush = factory.create_flush_with_id(5).await;
        let accepted = tx.push(flush).await.unwrap();
        assert!(accepted);
        assert!(!tx.is_flushing());

        let out = rx.pull().await.unwrap();
        assert!(matches!(out, Message::Flush(_)));
    }

    #[tokio::test]
    async fn non_matching_flush_is_still_forwarded_and_flushing_persists() {
        let factory = MsgFactory::new(&PoolConfig::default());
        let (tx, mut rx) = flushable_reservoir(8);
        tx.begin_flush(5);

        let other_flush = factory.create_flush_with_id(9).await;
        tx.push(other_flush).await.unwrap();
        assert!(tx.is_flushing());
        let out = rx.pull().await.unwrap();
        assert!(matches!(out, Message::Flush(_)));
    }

    #[tokio::test]
    async fn non_audio_control_messages_pass_through_during_flush() {
        let factory = MsgFactory::new(&PoolConfig::default());
        let (tx, mut rx) = flushable_reservoir(8);
        tx.begin_flush(5);

        let track = factory.create_track("uri", None, 1).await;
        let accepted = tx.push(track).await.unwrap();
        assert!(accepted);
        assert!(matches!(rx.pull().await.unwrap(), Message::Track(_)));
    }
}
