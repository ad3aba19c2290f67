//! Periodic liveness checks for the worker pool.
//!
//! The monitor only owns the timer chain. Each tick is delivered to the
//! coordinator as a [`HealthTick`] and evaluated there against the session.
//! Bumping the generation invalidates every tick already scheduled, so at
//! most one chain is ever live.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::trace;

use crate::session::InFlight;

/// Timer message for one health-check pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HealthTick {
    pub generation: u64,
}

#[derive(Debug)]
pub(crate) struct HealthMonitor {
    generation: u64,
    period: Duration,
    stale_age: Duration,
}

impl HealthMonitor {
    pub fn new(period: Duration, stale_age: Duration) -> Self {
        Self {
            generation: 0,
            period,
            stale_age,
        }
    }

    /// Starts a new chain and returns its generation.
    pub fn kick(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Drops the current chain.
    pub fn stop(&mut self) {
        self.generation += 1;
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Posts the next tick of `generation` after one period.
    pub fn schedule<M>(&self, generation: u64, tx: &mpsc::UnboundedSender<M>)
    where
        M: From<HealthTick> + Send + 'static,
    {
        let tx = tx.clone();
        let period = self.period;
        tokio::spawn(async move {
            tokio::time::sleep(period).await;
            let _ = tx.send(M::from(HealthTick { generation }));
        });
        trace!(generation, ?period, "health check scheduled");
    }

    /// Chunks whose current attempt is older than the stale age, ascending.
    pub fn stale_chunks(&self, in_flight: &HashMap<u32, InFlight>, now: Instant) -> Vec<u32> {
        let mut stale: Vec<u32> = in_flight
            .iter()
            .filter(|(_, record)| now.saturating_duration_since(record.started) > self.stale_age)
            .map(|(chunk, _)| *chunk)
            .collect();
        stale.sort_unstable();
        stale
    }
}
