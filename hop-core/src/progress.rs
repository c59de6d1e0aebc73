//! Progress snapshots and human-readable sizes for the UI.

use std::time::Duration;

use crate::reassembly::ReceiveProgress;
use crate::scheduler::SchedulerProgress;

const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// Transfer progress on either side.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Progress {
    pub bytes_done: u64,
    pub total_bytes: u64,
    pub chunks_done: u32,
    pub total_chunks: u32,
    /// Bytes per second over the last sample; 0 when unknown.
    pub throughput: f64,
    pub peak_throughput: f64,
    /// Chunks allowed in flight (sender only).
    pub concurrency: usize,
}

impl Progress {
    pub fn from_sender(p: &SchedulerProgress, total_bytes: u64) -> Self {
        Self {
            bytes_done: p.bytes_sent,
            total_bytes,
            chunks_done: p.completed_chunks,
            total_chunks: p.total_chunks,
            throughput: p.throughput,
            peak_throughput: p.peak_throughput,
            concurrency: p.concurrency,
        }
    }

    pub fn from_receiver(p: &ReceiveProgress) -> Self {
        Self {
            bytes_done: p.bytes_received,
            total_bytes: p.file_size,
            chunks_done: p.received_chunks,
            total_chunks: p.total_chunks,
            ..Self::default()
        }
    }

    /// 0.0..=100.0, by chunk count.
    pub fn percent(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        self.chunks_done as f64 * 100.0 / self.total_chunks as f64
    }

    /// Time left at the current throughput.
    pub fn eta(&self) -> Option<Duration> {
        if self.throughput <= 0.0 {
            return None;
        }
        let left = self.total_bytes.saturating_sub(self.bytes_done) as f64;
        Some(Duration::from_secs_f64(left / self.throughput))
    }
}

/// `1536` -> `"1.5 KB"`, `0` -> `"0 Bytes"`. Base 1024, at most two decimals, no trailing zeros.
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let fixed = format!("{:.2}", value);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}

/// Throughput as `"<size>/s"`.
pub fn format_rate(bytes_per_sec: f64) -> String {
    format!("{}/s", format_size(bytes_per_sec.max(0.0) as u64))
}
