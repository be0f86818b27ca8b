//! The encoded reservoir: bounded by bytes of compressed audio rather than
//! message count, so a protocol naturally backs off the network once the
//! configured threshold is reached (§4.2).

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use crate::msg::Message;

/// Push half of an [`encoded_reservoir`] pair.
pub struct EncodedReservoirSender {
    tx: mpsc::Sender<Message>,
    semaphore: Arc<Semaphore>,
    capacity_bytes: usize,
}

/// Pull half of an [`encoded_reservoir`] pair.
pub struct EncodedReservoirReceiver {
    rx: mpsc::Receiver<Message>,
    semaphore: Arc<Semaphore>,
    capacity_bytes: usize,
}

/// Message-count bound on the underlying channel; the real limit enforced is
/// the byte semaphore below, this just keeps the channel itself finite.
const CHANNEL_SLOTS: usize = 4096;

/// Builds an encoded reservoir gated at `capacity_bytes` of buffered
/// compressed audio.
#[must_use]
pub fn encoded_reservoir(capacity_bytes: usize) -> (EncodedReservoirSender, EncodedReservoirReceiver) {
    let (tx, rx) = mpsc::channel(CHANNEL_SLOTS);
    let semaphore = Arc::new(Semaphore::new(capacity_bytes.max(1)));
    (
        EncodedReservoirSender {
            tx,
            semaphore: Arc::clone(&semaphore),
            capacity_bytes: capacity_bytes.max(1),
        },
        EncodedReservoirReceiver {
            rx,
            semaphore,
            capacity_bytes: capacity_bytes.max(1),
        },
    )
}

fn permits_for(msg: &Message, capacity_bytes: usize) -> u32 {
    msg.encoded_bytes().max(1).min(capacity_bytes) as u32
}

impl EncodedReservoirSender {
    /// Enqueues `msg`, blocking while doing so would exceed the byte
    /// threshold — the natural back-pressure point against the network
    /// (§4.2).
    pub async fn push(&self, msg: Message) -> Result<(), Message> {
        let permits = permits_for(&msg, self.capacity_bytes);
        let permit = Arc::clone(&self.semaphore)
            .acquire_many_owned(permits)
            .await
            .expect("encoded reservoir semaphore is never closed");
        permit.forget();
        self.tx.send(msg).await.map_err(|e| e.0)
    }

    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.capacity_bytes - self.semaphore.available_permits()
    }
}

impl EncodedReservoirReceiver {
    /// Dequeues the next message, blocking while empty. `None` once every
    /// sender has dropped.
    pub async fn pull(&mut self) -> Option<Message> {
        let msg = self.rx.recv().await?;
        let permits = permits_for(&msg, self.capacity_bytes);
        self.semaphore.add_permits(permits as usize);
        Some(msg)
    }

    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.capacity_bytes - self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::msg::MsgFactory;
    use bytes::Bytes;

    #[tokio::test]
    async fn push_backs_off_once_byte_threshold_reached() {
        let factory = MsgFactory::new(&PoolConfig::default());
        let (tx, mut rx) = encoded_reservoir(100);

        tx.push(factory.create_audio_encoded(Bytes::from(vec![0u8; 90])).await)
            .await
            .unwrap();
        assert!(tx.buffered_bytes() >= 90);

        let blocked = tx.push(factory.create_audio_encoded(Bytes::from(vec![0u8; 50])).await);
        tokio::pin!(blocked);
        tokio::select! {
            _ = &mut blocked => panic!("push should block: over byte capacity"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
        }

        rx.pull().await.unwrap();
        blocked.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_single_message_is_clamped_not_deadlocked() {
        let factory = MsgFactory::new(&PoolConfig::default());
        let (tx, mut rx) = encoded_reservoir(10);
        tx.push(factory.create_audio_encoded(Bytes::from(vec![0u8; 1000])).await)
            .await
            .unwrap();
        let msg = rx.pull().await.unwrap();
        assert_eq!(msg.encoded_bytes(), 1000);
    }
}
