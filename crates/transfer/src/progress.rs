use std::collections::VecDeque;
use std::time::Duration;

use fus_protocol::Progress;
use fus_protocol::constants::TRANSFER_RATE_SAMPLES;

const MEBIBYTE: f64 = 1024.0 * 1024.0;

/// Percentage of blocks completed.
///
/// Resent chunks can be counted twice, so values above 100 are reported
/// as 99.
pub fn percent_complete(blocks_completed: u32, total_blocks: u32) -> f64 {
    if total_blocks == 0 {
        return 0.0;
    }
    let percent = f64::from(blocks_completed) * 100.0 / f64::from(total_blocks);
    if percent > 100.0 { 99.0 } else { percent }
}

/// Average rate since the upload started, in megabits per second.
pub fn transfer_rate_mbps(blocks_completed: u32, chunk_size: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds <= 0.0 {
        return 0.0;
    }
    let megabytes_per_sec = f64::from(blocks_completed) * chunk_size as f64 / MEBIBYTE / seconds;
    megabytes_per_sec * 8.0
}

/// Estimated seconds left for the queued chunks at `average_speed_mbps`.
///
/// Whole hours are stripped; only the sub-hour remainder is returned.
pub fn time_remaining_secs(queued_chunks: usize, chunk_size: u64, average_speed_mbps: f64) -> f64 {
    let data_remaining = queued_chunks as f64 * chunk_size as f64;
    if average_speed_mbps <= 0.0 || data_remaining <= 0.0 {
        return 0.0;
    }
    let seconds = data_remaining * 8.0 / (MEBIBYTE * average_speed_mbps);
    let hours = (seconds / 3600.0).floor();
    seconds - hours * 3600.0
}

/// Number of completed blocks between two progress reports.
pub fn progress_update_rate(total_blocks: u32) -> u32 {
    total_blocks.div_ceil(100).max(1)
}

/// Builds the host-facing progress payload.
pub fn format_progress(
    percent_completed: f64,
    rate_mbps: f64,
    average_speed_mbps: f64,
    time_remaining_secs: f64,
) -> Progress {
    Progress {
        percent_completed,
        rate: format!("{rate_mbps:.2}"),
        average_speed: format!("{average_speed_mbps:.0}"),
        time_remaining: format!("{time_remaining_secs:.0}"),
    }
}

/// Sliding window of the most recent instantaneous rates.
#[derive(Debug, Clone)]
pub struct RateSamples {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl Default for RateSamples {
    fn default() -> Self {
        Self::new(TRANSFER_RATE_SAMPLES)
    }
}

impl RateSamples {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Records a sample, evicting the oldest once the window is full.
    pub fn push(&mut self, rate: f64) {
        self.samples.push_back(rate);
        if self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Arithmetic mean of the window; 0 when empty.
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
