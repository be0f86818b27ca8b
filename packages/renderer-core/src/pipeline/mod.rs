//! Decoded-PCM pipeline stages: each forwards most messages untouched and
//! intercepts a small set to run a tiny state machine, ramping every audible
//! transition (§4.5).

mod gorger;
mod muter;
mod ramper;
mod skipper;
mod starvation;
mod stopper;
mod waiter;

pub use gorger::{Gorger, StarvationSignal};
pub use muter::Muter;
pub use ramper::{Ramper, VariableDelay};
pub use skipper::Skipper;
pub use starvation::StarvationMonitor;
pub use stopper::Stopper;
pub use waiter::Waiter;

use std::sync::Arc;

use crate::msg::{Message, MsgFactory};
use crate::reservoir::{ReservoirReceiver, ReservoirSender};

/// A pipeline stage that transforms one incoming message into zero or more
/// outgoing ones. Implementors hold whatever state machine they need; `step`
/// is called once per message pulled from upstream (§4.5).
#[async_trait::async_trait]
pub trait Stage: Send {
    async fn step(&mut self, msg: Message, factory: &MsgFactory) -> Vec<Message>;
}

/// Runs `stage` as a standalone task body: pulls from `upstream`, feeds each
/// message through `stage.step`, pushes every resulting message downstream.
/// Exits cleanly when `upstream` closes (§5: FIFO preserved end to end).
pub async fn run_stage(
    mut stage: impl Stage,
    mut upstream: ReservoirReceiver,
    downstream: ReservoirSender,
    factory: Arc<MsgFactory>,
) {
    while let Some(msg) = upstream.pull().await {
        for out in stage.step(msg, &factory).await {
            if downstream.push(out).await.is_err() {
                return;
            }
        }
    }
}

/// Samples-per-millisecond helper shared by every ramping stage, converting a
/// configured ramp duration into a sample-count span at a given rate.
#[must_use]
pub fn ramp_duration_samples(ramp_duration_ms: u32, sample_rate: u32) -> u64 {
    (u64::from(ramp_duration_ms) * u64::from(sample_rate)).div_ceil(1000)
}
