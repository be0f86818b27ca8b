//! The plain FIFO reservoir used between a fixed producer/consumer pair of
//! stage tasks (§4.2): push blocks only on configured message-count capacity,
//! pull blocks on empty. Jiffies-of-audio and bytes-of-encoded-audio are
//! tracked alongside so stages can report reservoir occupancy without
//! draining it.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::msg::Message;
use crate::time::Jiffies;

/// Reservoir occupancy snapshot (§4.2).
#[derive(Debug, Clone, Copy, Default)]
pub struct ReservoirStats {
    pub jiffies: Jiffies,
    pub encoded_bytes: usize,
}

#[derive(Default)]
struct Shared {
    jiffies: AtomicI64,
    encoded_bytes: AtomicUsize,
}

impl Shared {
    fn stats(&self) -> ReservoirStats {
        ReservoirStats {
            jiffies: Jiffies(self.jiffies.load(Ordering::Acquire).max(0) as u64),
            encoded_bytes: self.encoded_bytes.load(Ordering::Acquire),
        }
    }
}

/// The push half of a [`reservoir`] pair.
pub struct ReservoirSender {
    tx: mpsc::Sender<Message>,
    shared: Arc<Shared>,
}

/// The pull half of a [`reservoir`] pair.
pub struct ReservoirReceiver {
    rx: mpsc::Receiver<Message>,
    shared: Arc<Shared>,
}

/// Builds a bounded FIFO of capacity `capacity` messages.
#[must_use]
pub fn reservoir(capacity: usize) -> (ReservoirSender, ReservoirReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared::default());
    (
        ReservoirSender {
            tx,
            shared: Arc::clone(&shared),
        },
        ReservoirReceiver { rx, shared },
    )
}

impl ReservoirSender {
    /// Enqueues `msg`, blocking while the reservoir is at capacity.
    ///
    /// Returns `Err` if the paired receiver has been dropped (the consuming
    /// stage has shut down).
    pub async fn push(&self, msg: Message) -> Result<(), Message> {
        self.shared
            .jiffies
            .fetch_add(msg.jiffies().0 as i64, Ordering::AcqRel);
        self.shared
            .encoded_bytes
            .fetch_add(msg.encoded_bytes(), Ordering::AcqRel);
        self.tx.send(msg).await.map_err(|e| e.0)
    }

    #[must_use]
    pub fn stats(&self) -> ReservoirStats {
        self.shared.stats()
    }
}

impl ReservoirReceiver {
    /// Dequeues the next message, blocking while the reservoir is empty.
    /// Returns `None` once every sender has been dropped.
    pub async fn pull(&mut self) -> Option<Message> {
        let msg = self.rx.recv().await?;
        self.shared
            .jiffies
            .fetch_sub(msg.jiffies().0 as i64, Ordering::AcqRel);
        self.shared
            .encoded_bytes
            .fetch_sub(msg.encoded_bytes(), Ordering::AcqRel);
        Some(msg)
    }

    #[must_use]
    pub fn stats(&self) -> ReservoirStats {
        self.shared.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::msg::MsgFactory;

    #[tokio::test]
    async fn push_then_pull_preserves_fifo_order() {
        let factory = MsgFactory::new(&PoolConfig::default());
        let (tx, mut rx) = reservoir(4);

        tx.push(factory.create_track("a", None, 1).await).await.unwrap();
        tx.push(factory.create_track("b", None, 2).await).await.unwrap();

        let crate::msg::Message::Track(first) = rx.pull().await.unwrap() else {
            panic!("expected Track");
        };
        assert_eq!(first.data.uri, "a");
    }

    #[tokio::test]
    async fn jiffies_accumulate_on_push_and_drain_on_pull() {
        let factory = MsgFactory::new(&PoolConfig::default());
        let (tx, mut rx) = reservoir(4);
        let silence = factory.create_silence(Jiffies::from_millis(10)).await;
        tx.push(silence).await.unwrap();
        assert!(tx.stats().jiffies.0 > 0);
        rx.pull().await.unwrap();
        assert_eq!(rx.stats().jiffies.0, 0);
    }

    #[tokio::test]
    async fn push_blocks_at_capacity_until_a_pull_frees_room() {
        let factory = MsgFactory::new(&PoolConfig::default());
        let (tx, mut rx) = reservoir(1);
        tx.push(factory.create_wait().await).await.unwrap();

        let tx2 = {
            let tx = &tx;
            tx.push(factory.create_wait().await)
        };
        tokio::pin!(tx2);
        tokio::select! {
            _ = &mut tx2 => panic!("push should not complete while at capacity"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
        }
        rx.pull().await.unwrap();
        tx2.await.unwrap();
    }
}
