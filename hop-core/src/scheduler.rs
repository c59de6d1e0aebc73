//! Chunk scheduler: which chunk goes next, how many may be in flight, and how
//! that bound adapts to observed throughput. Sync and clock-free; the send
//! pipeline drives it and passes `now` in.

use std::time::{Duration, Instant};

use crate::chunk::{self, ChunkId, SizeBand};
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::offer::TransferOffer;

/// Throughput may drop this far below the previous sample before concurrency shrinks.
const SHRINK_RATIO: f64 = 0.75;

/// Per-chunk lifecycle. Each transition happens exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    Processing { since: Instant },
    Sent,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    bytes: u64,
}

/// Snapshot for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerProgress {
    pub completed_chunks: u32,
    pub total_chunks: u32,
    pub bytes_sent: u64,
    pub in_flight: usize,
    pub concurrency: usize,
    /// Bytes per second.
    pub throughput: f64,
    pub peak_throughput: f64,
}

/// Owns per-chunk state for one outgoing file.
#[derive(Debug)]
pub struct ChunkScheduler {
    chunks: Vec<ChunkId>,
    status: Vec<ChunkStatus>,
    next_pending: usize,
    in_flight: usize,
    in_flight_bytes: u64,
    completed: u32,
    bytes_sent: u64,
    band: SizeBand,
    concurrency: usize,
    max_in_flight_bytes: u64,
    stall_timeout: Duration,
    chunk_timeout: Duration,
    last_progress_at: Instant,
    sample: Sample,
    last_throughput: Option<f64>,
    peak_throughput: f64,
    saturated: bool,
    aborted: bool,
}

impl ChunkScheduler {
    pub fn new(offer: &TransferOffer, config: &TransferConfig, now: Instant) -> Self {
        let band = offer.band();
        let chunks = chunk::split_into_chunks(offer.file_size, offer.chunk_size);
        tracing::debug!(
            total = chunks.len(),
            chunk_size = offer.chunk_size,
            concurrency = band.initial_concurrency,
            "scheduler ready"
        );
        Self {
            status: vec![ChunkStatus::Pending; chunks.len()],
            chunks,
            next_pending: 0,
            in_flight: 0,
            in_flight_bytes: 0,
            completed: 0,
            bytes_sent: 0,
            band,
            concurrency: band.initial_concurrency,
            max_in_flight_bytes: config.max_in_flight_bytes,
            stall_timeout: config.stall_timeout(),
            chunk_timeout: config.chunk_timeout(),
            last_progress_at: now,
            sample: Sample { at: now, bytes: 0 },
            last_throughput: None,
            peak_throughput: 0.0,
            saturated: false,
            aborted: false,
        }
    }

    pub fn total_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn status(&self, index: u32) -> Option<ChunkStatus> {
        self.status.get(index as usize).copied()
    }

    /// Next chunk to encode and send, or `None` when the concurrency bound or the
    /// byte bound (in-flight plus `channel_buffered`) is reached. One chunk is
    /// always allowed when nothing is in flight.
    pub fn next_task(&mut self, channel_buffered: u64, now: Instant) -> Option<ChunkId> {
        if self.aborted || self.next_pending >= self.chunks.len() {
            return None;
        }
        if self.in_flight >= self.concurrency {
            self.saturated = true;
            return None;
        }
        let chunk = self.chunks[self.next_pending];
        if self.in_flight > 0
            && self.in_flight_bytes + channel_buffered + chunk.len() as u64
                > self.max_in_flight_bytes
        {
            self.saturated = true;
            return None;
        }
        self.status[self.next_pending] = ChunkStatus::Processing { since: now };
        self.next_pending += 1;
        self.in_flight += 1;
        self.in_flight_bytes += chunk.len() as u64;
        if self.in_flight >= self.concurrency {
            self.saturated = true;
        }
        Some(chunk)
    }

    /// Record that chunk `index` has been handed to the channel.
    pub fn on_chunk_sent(&mut self, index: u32, now: Instant) -> Result<()> {
        let i = index as usize;
        match self.status.get(i).copied() {
            Some(ChunkStatus::Processing { .. }) => {}
            Some(ChunkStatus::Sent) => return Err(TransferError::DuplicateSend { index }),
            Some(ChunkStatus::Pending) => {
                return Err(TransferError::TaskFailed(format!(
                    "chunk {} completed before dispatch",
                    index
                )))
            }
            None => {
                return Err(TransferError::TaskFailed(format!(
                    "chunk {} out of range",
                    index
                )))
            }
        }
        let len = self.chunks[i].len() as u64;
        self.status[i] = ChunkStatus::Sent;
        self.in_flight -= 1;
        self.in_flight_bytes -= len;
        self.completed += 1;
        self.bytes_sent += len;
        self.last_progress_at = now;
        Ok(())
    }

    /// Take a throughput sample and move concurrency by at most one step.
    /// Returns the new bound when it changed.
    pub fn adapt(&mut self, now: Instant) -> Option<usize> {
        let elapsed = now.saturating_duration_since(self.sample.at).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        let throughput = (self.bytes_sent - self.sample.bytes) as f64 / elapsed;
        self.peak_throughput = self.peak_throughput.max(throughput);
        let before = self.concurrency;
        if let Some(prev) = self.last_throughput {
            if throughput >= prev && self.saturated && self.concurrency < self.band.max_concurrency
            {
                self.concurrency += 1;
            } else if throughput < prev * SHRINK_RATIO
                && self.concurrency > self.band.min_concurrency
            {
                self.concurrency -= 1;
            }
        }
        self.last_throughput = Some(throughput);
        self.sample = Sample {
            at: now,
            bytes: self.bytes_sent,
        };
        self.saturated = self.in_flight >= self.concurrency;
        if self.concurrency != before {
            tracing::debug!(
                from = before,
                to = self.concurrency,
                throughput = throughput as u64,
                "concurrency adjusted"
            );
            Some(self.concurrency)
        } else {
            None
        }
    }

    /// `TransferStalled` when nothing completed for `stall_timeout` or one chunk
    /// has been processing longer than `chunk_timeout`. Stalled chunks are not requeued.
    pub fn check_stall(&self, now: Instant) -> Result<()> {
        if self.is_complete() || self.aborted {
            return Ok(());
        }
        let idle = now.saturating_duration_since(self.last_progress_at);
        if idle > self.stall_timeout {
            return Err(TransferError::TransferStalled(format!(
                "no chunk completed for {}s",
                idle.as_secs()
            )));
        }
        for (i, s) in self.status[..self.next_pending].iter().enumerate() {
            if let ChunkStatus::Processing { since } = s {
                let age = now.saturating_duration_since(*since);
                if age > self.chunk_timeout {
                    return Err(TransferError::TransferStalled(format!(
                        "chunk {} in flight for {}s",
                        i,
                        age.as_secs()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Stop dispatching. In-flight results arriving afterwards are ignored by the caller.
    pub fn abort(&mut self) {
        self.aborted = true;
        self.in_flight = 0;
        self.in_flight_bytes = 0;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Every chunk sent exactly once.
    pub fn is_complete(&self) -> bool {
        self.completed as usize == self.chunks.len()
    }

    pub fn progress(&self) -> SchedulerProgress {
        SchedulerProgress {
            completed_chunks: self.completed,
            total_chunks: self.total_chunks(),
            bytes_sent: self.bytes_sent,
            in_flight: self.in_flight,
            concurrency: self.concurrency,
            throughput: self.last_throughput.unwrap_or(0.0),
            peak_throughput: self.peak_throughput,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_FILE_SIZE;

    fn sched(size: u64, now: Instant) -> ChunkScheduler {
        let offer =
            TransferOffer::for_file("a.txt", size, "text/plain", DEFAULT_MAX_FILE_SIZE).unwrap();
        ChunkScheduler::new(&offer, &TransferConfig::default(), now)
    }

    #[test]
    fn dispatch_respects_concurrency() {
        let now = Instant::now();
        let mut s = sched(3_000_000, now);
        assert_eq!(s.total_chunks(), 46);
        assert_eq!(s.concurrency(), 4);
        let issued: Vec<u32> = std::iter::from_fn(|| s.next_task(0, now))
            .map(|c| c.index)
            .collect();
        assert_eq!(issued, vec![0, 1, 2, 3]);
        s.on_chunk_sent(2, now).unwrap();
        assert_eq!(s.next_task(0, now).map(|c| c.index), Some(4));
    }

    #[test]
    fn duplicate_completion_is_an_error() {
        let now = Instant::now();
        let mut s = sched(100_000, now);
        let c = s.next_task(0, now).unwrap();
        s.on_chunk_sent(c.index, now).unwrap();
        assert!(matches!(
            s.on_chunk_sent(c.index, now),
            Err(TransferError::DuplicateSend { index: 0 })
        ));
        assert_eq!(s.progress().completed_chunks, 1);
        assert!(s.on_chunk_sent(5, now).is_err());
    }

    #[test]
    fn completes_when_every_chunk_sent() {
        let now = Instant::now();
        let mut s = sched(40_000, now);
        while let Some(c) = s.next_task(0, now) {
            s.on_chunk_sent(c.index, now).unwrap();
        }
        assert!(s.is_complete());
        assert_eq!(s.progress().bytes_sent, 40_000);
    }

    #[test]
    fn byte_bound_keeps_one_in_flight() {
        let now = Instant::now();
        let mut s = sched(3_000_000, now);
        // Channel reports a full buffer: only the first chunk goes out.
        assert!(s.next_task(u64::MAX / 2, now).is_some());
        assert!(s.next_task(u64::MAX / 2, now).is_none());
        s.on_chunk_sent(0, now).unwrap();
        assert!(s.next_task(u64::MAX / 2, now).is_some());
    }

    #[test]
    fn grows_when_saturated_and_fast() {
        let t0 = Instant::now();
        let mut s = sched(3_000_000, t0);
        let step = Duration::from_millis(500);
        // Sample 1: four chunks, window saturated.
        for _ in 0..4 {
            s.next_task(0, t0);
        }
        for i in 0..4 {
            s.on_chunk_sent(i, t0).unwrap();
        }
        assert_eq!(s.adapt(t0 + step), None);
        // Sample 2: same window, more bytes.
        for _ in 0..4 {
            s.next_task(0, t0 + step);
        }
        assert!(s.next_task(0, t0 + step).is_none());
        for i in 4..8 {
            s.on_chunk_sent(i, t0 + step).unwrap();
        }
        assert_eq!(s.adapt(t0 + step * 2), Some(5));
        assert!(s.progress().peak_throughput > 0.0);
    }

    #[test]
    fn shrinks_on_throughput_drop() {
        let t0 = Instant::now();
        let mut s = sched(3_000_000, t0);
        let step = Duration::from_millis(500);
        for _ in 0..4 {
            s.next_task(0, t0);
        }
        for i in 0..4 {
            s.on_chunk_sent(i, t0).unwrap();
        }
        s.adapt(t0 + step);
        // Next window: a single chunk completes.
        s.next_task(0, t0 + step);
        s.on_chunk_sent(4, t0 + step).unwrap();
        assert_eq!(s.adapt(t0 + step * 2), Some(3));
    }

    #[test]
    fn concurrency_stays_within_band() {
        let t0 = Instant::now();
        let mut s = sched(100, t0);
        let step = Duration::from_millis(500);
        for k in 1..10 {
            s.adapt(t0 + step * k);
        }
        assert!(s.concurrency() >= 1 && s.concurrency() <= 4);
    }

    #[test]
    fn stall_detected() {
        let t0 = Instant::now();
        let mut s = sched(3_000_000, t0);
        s.next_task(0, t0).unwrap();
        assert!(s.check_stall(t0 + Duration::from_secs(10)).is_ok());
        assert!(matches!(
            s.check_stall(t0 + Duration::from_secs(16)),
            Err(TransferError::TransferStalled(_))
        ));
        s.on_chunk_sent(0, t0 + Duration::from_secs(16)).unwrap();
        assert!(s.check_stall(t0 + Duration::from_secs(40)).is_ok());
        assert!(s.check_stall(t0 + Duration::from_secs(47)).is_err());
    }

    #[test]
    fn abort_stops_dispatch() {
        let now = Instant::now();
        let mut s = sched(3_000_000, now);
        s.next_task(0, now).unwrap();
        s.abort();
        assert!(s.next_task(0, now).is_none());
        assert_eq!(s.in_flight(), 0);
        assert!(s.check_stall(now + Duration::from_secs(3600)).is_ok());
    }
}
