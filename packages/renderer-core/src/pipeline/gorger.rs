//! Gorger: a decoded-PCM reservoir that buffers up to a *gorge* threshold
//! before releasing audio, for non-real-time modes only (§4.2). Real-time
//! modes (Songcast/RAOP) disable gorging entirely. Unlike the other pipeline
//! stages, gorging buffers an unbounded run of messages before flushing them
//! as a batch, so it owns its own pull/push loop rather than implementing
//! [`super::Stage`]'s one-message-in-one-batch-out contract.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::msg::Message;
use crate::reservoir::{ReservoirReceiver, ReservoirSender};
use crate::time::Jiffies;

/// Shared flag a downstream consumer ([`super::StarvationMonitor`] or the
/// driver) raises to tell the paired `Gorger` to re-enter gorging the next
/// time audio passes through (§4.2: "re-enters on Halt or starvation").
#[derive(Clone, Default)]
pub struct StarvationSignal(Arc<AtomicBool>);

impl StarvationSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raised when a downstream pull found its reservoir empty.
    pub fn notify(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

fn is_audio(msg: &Message) -> bool {
    matches!(msg, Message::AudioPcm(_) | Message::Silence(_) | Message::Playable(_))
}

/// Buffers decoded audio until `threshold` jiffies have accumulated, then
/// releases everything buffered (in order) downstream in one go.
pub struct Gorger {
    threshold: Jiffies,
    starvation: StarvationSignal,
}

impl Gorger {
    #[must_use]
    pub fn new(threshold: Jiffies, starvation: StarvationSignal) -> Self {
        Self { threshold, starvation }
    }

    /// Runs the Gorger as a standalone task body (§2, §5).
    pub async fn run(self, mut upstream: ReservoirReceiver, downstream: ReservoirSender) {
        let mut queue: VecDeque<Message> = VecDeque::new();
        let mut buffered = Jiffies::ZERO;
        let mut real_time = false;
        let mut gorging = true;

        while let Some(msg) = upstream.pull().await {
            if let Message::Mode(data) = &msg {
                real_time = data.real_time;
                if real_time {
                    gorging = false;
                }
            }
            if matches!(msg, Message::Halt(_)) && !real_time {
                gorging = true;
            }
            if self.starvation.take() && !real_time {
                gorging = true;
            }

            if is_audio(&msg) {
                buffered = buffered + msg.jiffies();
            }
            queue.push_back(msg);

            if gorging && !real_time && buffered < self.threshold {
                continue;
            }
            gorging = false;
            buffered = Jiffies::ZERO;

            while let Some(out) = queue.pop_front() {
                if downstream.push(out).await.is_err() {
                    return;
                }
            }
        }

        while let Some(out) = queue.pop_front() {
            if downstream.push(out).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::msg::{DecodedAudio, Endianness, MsgFactory};
    use crate::reservoir::reservoir;
    use bytes::Bytes;

    fn factory() -> MsgFactory {
        MsgFactory::new(&PoolConfig::default())
    }

    async fn pcm_msg(factory: &MsgFactory, frames: usize) -> Message {
        factory
            .create_audio_pcm(
                DecodedAudio {
                    data: Bytes::from(vec![0u8; frames * 4]),
                    channels: 2,
                    sample_rate: 44_100,
                    bit_depth: 16,
                    endianness: Endianness::Big,
                },
                Jiffies::ZERO,
            )
            .await
    }

    #[tokio::test]
    async fn real_time_mode_disables_gorging() {
        let factory = factory();
        let (up_tx, up_rx) = reservoir(16);
        let (down_tx, mut down_rx) = reservoir(16);

        let gorger = Gorger::new(Jiffies::from_millis(100), StarvationSignal::new());
        let handle = tokio::spawn(gorger.run(up_rx, down_tx));

        up_tx
            .push(factory.create_mode("songcast", true, true).await)
            .await
            .unwrap();
        up_tx.push(pcm_msg(&factory, 16).await).await.unwrap();

        // real-time: both messages should flow straight through, no buffering wait
        assert!(matches!(down_rx.pull().await.unwrap(), Message::Mode(_)));
        assert!(matches!(down_rx.pull().await.unwrap(), Message::AudioPcm(_)));

        drop(up_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn non_real_time_buffers_until_threshold_then_flushes_in_order() {
        let factory = factory();
        let (up_tx, up_rx) = reservoir(16);
        let (down_tx, mut down_rx) = reservoir(16);

        // threshold reached after ~441 frames at 44100Hz (10ms)
        let gorger = Gorger::new(Jiffies::from_millis(10), StarvationSignal::new());
        let handle = tokio::spawn(gorger.run(up_rx, down_tx));

        up_tx
            .push(factory.create_mode("radio", true, false).await)
            .await
            .unwrap();
        up_tx.push(pcm_msg(&factory, 200).await).await.unwrap();

        // not yet released: below threshold
        let not_yet = tokio::time::timeout(std::time::Duration::from_millis(20), down_rx.pull()).await;
        assert!(not_yet.is_err(), "should still be gorging below threshold");

        up_tx.push(pcm_msg(&factory, 400).await).await.unwrap();

        // now threshold crossed: everything flushes in original order
        assert!(matches!(down_rx.pull().await.unwrap(), Message::Mode(_)));
        assert!(matches!(down_rx.pull().await.unwrap(), Message::AudioPcm(_)));
        assert!(matches!(down_rx.pull().await.unwrap(), Message::AudioPcm(_)));

        drop(up_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn starvation_signal_reenters_gorging() {
        let factory = factory();
        let (up_tx, up_rx) = reservoir(16);
        let (down_tx, mut down_rx) = reservoir(16);
        let starvation = StarvationSignal::new();

        let gorger = Gorger::new(Jiffies::from_millis(1000), starvation.clone());
        let handle = tokio::spawn(gorger.run(up_rx, down_tx));

        up_tx
            .push(factory.create_mode("radio", true, false).await)
            .await
            .unwrap();
        down_rx.pull().await.unwrap(); // Mode passes the initial gorge (starts gorging at threshold 1s)

        starvation.notify();
        up_tx.push(pcm_msg(&factory, 16).await).await.unwrap();

        let not_yet = tokio::time::timeout(std::time::Duration::from_millis(20), down_rx.pull()).await;
        assert!(not_yet.is_err(), "starvation should re-enter gorging");

        drop(up_tx);
        handle.await.unwrap();
    }
}
