//! Async send pipeline. One coordinating task owns the `ChunkScheduler` and is
//! the only caller of `channel.send`; chunk encode/compress runs in a `JoinSet`
//! up to the current concurrency bound. Nothing reaches the channel once the
//! job is cancelled or `run` has returned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelAdapter, ChannelPayload};
use crate::chunk::ChunkId;
use crate::compress;
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::integrity;
use crate::offer::TransferOffer;
use crate::progress::Progress;
use crate::protocol::ControlMessage;
use crate::scheduler::ChunkScheduler;
use crate::wire::{self, ChunkFrame};

/// Everything needed to push one file through an open channel.
#[derive(Debug, Clone)]
pub struct SendJob {
    pub channel: ChannelAdapter,
    pub data: Arc<[u8]>,
    pub offer: TransferOffer,
    pub config: TransferConfig,
}

/// Outcome of a finished send.
#[derive(Debug, Clone, PartialEq)]
pub struct SendReport {
    pub chunks_sent: u32,
    pub bytes_sent: u64,
    pub peak_throughput: f64,
    pub elapsed: Duration,
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

impl SendJob {
    /// Send `file-info`, every chunk, then `transfer-complete`. Stops at the first
    /// failure or when `cancel` fires; outstanding chunk tasks are aborted either way.
    pub async fn run(
        self,
        cancel: CancellationToken,
        progress: Option<watch::Sender<Progress>>,
    ) -> Result<SendReport> {
        let SendJob {
            channel,
            data,
            offer,
            config,
        } = self;
        offer.validate(config.max_file_size)?;
        if data.len() as u64 != offer.file_size {
            return Err(TransferError::InvalidOffer(format!(
                "offer declares {} bytes, file has {}",
                offer.file_size,
                data.len()
            )));
        }

        let digest = {
            let data = data.clone();
            tokio::task::spawn_blocking(move || integrity::file_digest_hex(&data))
                .await
                .map_err(|e| TransferError::TaskFailed(e.to_string()))?
        };
        channel.send_control(&ControlMessage::FileInfo(offer.file_info(Some(digest))))?;

        let started = now();
        let mut scheduler = ChunkScheduler::new(&offer, &config, started);
        let mut tasks: JoinSet<Result<EncodedChunk>> = JoinSet::new();
        let mut tick = tokio::time::interval(config.sample_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;

        tracing::info!(
            file = %offer.file_name,
            chunks = offer.total_chunks,
            concurrency = scheduler.concurrency(),
            "sending file"
        );

        while !scheduler.is_complete() {
            while let Some(chunk) = scheduler.next_task(channel.buffered_amount(), now()) {
                tracing::debug!(index = chunk.index, "dispatching chunk");
                tasks.spawn_blocking({
                    let data = data.clone();
                    let total = offer.total_chunks;
                    let try_compress = offer.compression_requested;
                    move || encode_chunk(&data, chunk, total, try_compress)
                });
            }

            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TransferError::Cancelled),
                Some(joined) = tasks.join_next() => match joined {
                    Ok(Ok(_)) if cancel.is_cancelled() => Err(TransferError::Cancelled),
                    Ok(Ok(encoded)) => channel
                        .send(ChannelPayload::Binary(encoded.frame))
                        .and_then(|()| scheduler.on_chunk_sent(encoded.index, now())),
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(TransferError::TaskFailed(e.to_string())),
                },
                _ = tick.tick() => {
                    let t = now();
                    scheduler.adapt(t);
                    scheduler.check_stall(t)
                }
            };
            if let Err(e) = step {
                tracing::warn!(error = %e, "send aborted");
                scheduler.abort();
                tasks.abort_all();
                return Err(e);
            }
            if let Some(tx) = &progress {
                tx.send_replace(Progress::from_sender(&scheduler.progress(), offer.file_size));
            }
        }

        channel.send_control(&ControlMessage::TransferComplete {
            total_chunks: offer.total_chunks,
        })?;
        let p = scheduler.progress();
        let elapsed = now().saturating_duration_since(started);
        tracing::info!(
            file = %offer.file_name,
            bytes = p.bytes_sent,
            elapsed_ms = elapsed.as_millis() as u64,
            "file sent"
        );
        Ok(SendReport {
            chunks_sent: p.completed_chunks,
            bytes_sent: p.bytes_sent,
            peak_throughput: p.peak_throughput,
            elapsed,
        })
    }
}

/// A chunk frame ready for the channel.
struct EncodedChunk {
    index: u32,
    frame: Vec<u8>,
}

fn encode_chunk(
    data: &[u8],
    chunk: ChunkId,
    total_chunks: u32,
    try_compress: bool,
) -> Result<EncodedChunk> {
    let raw = &data[chunk.start as usize..chunk.end as usize];
    let encoded = compress::encode_chunk(raw, try_compress)?;
    let frame = wire::encode_frame(&ChunkFrame {
        index: chunk.index,
        total_chunks,
        compressed: encoded.compressed,
        payload: encoded.payload,
    })?;
    Ok(EncodedChunk {
        index: chunk.index,
        frame,
    })
}
