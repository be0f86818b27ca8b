//! StarvationMonitor: watches for the upstream decoded-PCM reservoir running
//! dry mid-stream and tells the owning protocol via
//! [`StreamHandler::notify_starving`] (§4.5, §6), so it can decide whether to
//! rebuffer. Also raises the paired [`super::StarvationSignal`] so the
//! upstream [`super::Gorger`] re-enters gorging on the next audio message,
//! per §4.2's "re-enters on Halt or starvation".
//!
//! Detecting "ran dry" requires watching for a pull that blocks rather than
//! just reacting to whatever message eventually arrives, so this stage (like
//! [`super::Gorger`]) owns its own pull/push loop instead of implementing
//! [`super::Stage`].

use std::sync::Weak;
use std::time::Duration;

use crate::msg::Message;
use crate::reservoir::{ReservoirReceiver, ReservoirSender};
use crate::stream_handler::StreamHandler;

use super::gorger::StarvationSignal;

pub struct StarvationMonitor {
    timeout: Duration,
    starvation: StarvationSignal,
}

impl StarvationMonitor {
    #[must_use]
    pub fn new(timeout: Duration, starvation: StarvationSignal) -> Self {
        Self { timeout, starvation }
    }

    /// Runs the monitor as a standalone task body (§2, §5).
    pub async fn run(self, mut upstream: ReservoirReceiver, downstream: ReservoirSender) {
        let mut mode = String::new();
        let mut stream_id: u32 = 0;
        let mut stream_handler: Weak<dyn StreamHandler> = Weak::new();

        loop {
            match tokio::time::timeout(self.timeout, upstream.pull()).await {
                Ok(Some(msg)) => {
                    match &msg {
                        Message::Mode(data) => mode = data.name.clone(),
                        Message::DecodedStream(data) => {
                            stream_id = data.stream_id;
                            stream_handler = data.stream_handler.clone();
                        }
                        Message::EncodedStream(data) => {
                            stream_id = data.stream_id;
                            stream_handler = data.stream_handler.clone();
                        }
                        _ => {}
                    }
                    if downstream.push(msg).await.is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(_elapsed) => {
                    log::warn!("starvation: reservoir ran dry for mode {mode:?} stream {stream_id}");
                    self.starvation.notify();
                    if let Some(handler) = stream_handler.upgrade() {
                        handler.notify_starving(&mode, stream_id);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::msg::MsgFactory;
    use crate::reservoir::reservoir;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use async_trait::async_trait;
    use crate::stream_handler::OkToPlay;

    struct RecordingHandler {
        starved: Arc<AtomicBool>,
    }

    #[async_trait]
    impl StreamHandler for RecordingHandler {
        async fn ok_to_play(&self, _stream_id: u32) -> OkToPlay {
            OkToPlay::Yes
        }
        async fn try_seek(&self, _stream_id: u32, _offset_bytes: u64) -> Option<u32> {
            None
        }
        async fn try_stop(&self, _stream_id: u32) -> Option<u32> {
            None
        }
        async fn try_get(&self, _s: u32, _o: u64, _b: u64, _out: &mut Vec<u8>) -> bool {
            false
        }
        fn notify_starving(&self, _mode: &str, _stream_id: u32) {
            self.starved.store(true, Ordering::SeqCst);
        }
    }

    fn factory() -> MsgFactory {
        MsgFactory::new(&PoolConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn idle_upstream_notifies_starving_and_signals_gorger() {
        let f = factory();
        let (up_tx, up_rx) = reservoir(4);
        let (down_tx, mut down_rx) = reservoir(4);
        let starved = Arc::new(AtomicBool::new(false));
        let handler: Arc<dyn StreamHandler> = Arc::new(RecordingHandler {
            starved: Arc::clone(&starved),
        });

        let signal = StarvationSignal::new();
        let monitor = StarvationMonitor::new(Duration::from_millis(50), signal.clone());
        let handle = tokio::spawn(monitor.run(up_rx, down_tx));

        let data = crate::msg::DecodedStreamData {
            stream_id: 42,
            bitrate: 0,
            bit_depth: 16,
            sample_rate: 44_100,
            channels: 2,
            codec_name: "test".into(),
            total_jiffies: None,
            sample_start: crate::time::Jiffies::ZERO,
            lossless: true,
            seekable: false,
            live: false,
            stream_handler: Arc::downgrade(&handler),
        };
        up_tx.push(f.create_decoded_stream(data).await).await.unwrap();
        down_rx.pull().await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(starved.load(Ordering::SeqCst));

        drop(up_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn messages_pass_through_untouched() {
        let f = factory();
        let (up_tx, up_rx) = reservoir(4);
        let (down_tx, mut down_rx) = reservoir(4);
        let monitor = StarvationMonitor::new(Duration::from_secs(10), StarvationSignal::new());
        let handle = tokio::spawn(monitor.run(up_rx, down_tx));

        up_tx.push(f.create_wait().await).await.unwrap();
        assert!(matches!(down_rx.pull().await.unwrap(), Message::Wait(_)));

        drop(up_tx);
        handle.await.unwrap();
    }
}
