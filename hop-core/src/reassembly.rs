//! Receiver side: collect chunks in any order, verify completeness, rebuild the file.

use crate::chunk;
use crate::compress;
use crate::error::{Result, TransferError};
use crate::integrity;
use crate::protocol::FileInfo;
use crate::wire::ChunkFrame;

/// Decoded chunk payloads keyed by index. Duplicates overwrite and are not recounted.
#[derive(Debug)]
pub struct ReceiveBuffer {
    slots: Vec<Option<Vec<u8>>>,
    received: u32,
    bytes: u64,
}

impl ReceiveBuffer {
    pub fn new(total_chunks: u32) -> Self {
        Self {
            slots: vec![None; total_chunks as usize],
            received: 0,
            bytes: 0,
        }
    }

    /// Store `payload` at `index`. Returns true if the index was new.
    pub fn insert(&mut self, index: u32, payload: Vec<u8>) -> bool {
        let slot = &mut self.slots[index as usize];
        let len = payload.len() as u64;
        match slot.replace(payload) {
            Some(old) => {
                self.bytes = self.bytes - old.len() as u64 + len;
                false
            }
            None => {
                self.received += 1;
                self.bytes += len;
                true
            }
        }
    }

    pub fn received(&self) -> u32 {
        self.received
    }

    pub fn total(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.total()
    }

    /// Concatenate slots `0..total` in index order. `None` if any slot is empty.
    fn concat(&mut self) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(self.bytes as usize);
        for slot in self.slots.iter_mut() {
            out.extend_from_slice(&slot.take()?);
        }
        Some(out)
    }
}

/// Reconstructed file for the local-save collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ChunkReceiveResult {
    InProgress { received: u32, total: u32 },
    Complete(ReceivedFile),
}

/// Received-so-far counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceiveProgress {
    pub received_chunks: u32,
    pub total_chunks: u32,
    pub bytes_received: u64,
    pub file_size: u64,
}

#[derive(Debug)]
struct Active {
    info: FileInfo,
    buffer: ReceiveBuffer,
}

/// Drives one `ReceiveBuffer` per announced file.
#[derive(Debug)]
pub struct ReassemblyEngine {
    active: Option<Active>,
    /// `total_chunks` of the last file delivered, so a trailing `transfer-complete` checks out.
    delivered: Option<u32>,
    max_file_size: u64,
}

impl ReassemblyEngine {
    pub fn new(max_file_size: u64) -> Self {
        Self {
            active: None,
            delivered: None,
            max_file_size,
        }
    }

    /// Start a fresh buffer for `info`, discarding whatever was there.
    pub fn on_file_info(&mut self, info: FileInfo) -> Result<()> {
        if let Some(prev) = self.active.take() {
            tracing::info!(
                file = %prev.info.file_name,
                received = prev.buffer.received(),
                "new file-info; discarding partial buffer"
            );
        }
        self.delivered = None;
        self.validate(&info)?;
        tracing::info!(
            file = %info.file_name,
            size = info.file_size,
            chunks = info.total_chunks,
            "receiving file"
        );
        self.active = Some(Active {
            buffer: ReceiveBuffer::new(info.total_chunks),
            info,
        });
        Ok(())
    }

    fn validate(&self, info: &FileInfo) -> Result<()> {
        if info.file_size == 0 {
            return Err(TransferError::MalformedMessage(
                "file-info with zero size".into(),
            ));
        }
        if !chunk::chunk_size_in_bounds(info.chunk_size) {
            return Err(TransferError::MalformedMessage(format!(
                "file-info chunk size {} out of range",
                info.chunk_size
            )));
        }
        if info.file_size > self.max_file_size {
            return Err(TransferError::FileTooLarge {
                size: info.file_size,
                max: self.max_file_size,
            });
        }
        let expected = chunk::total_chunks(info.file_size, info.chunk_size);
        if expected != info.total_chunks as u64 {
            return Err(TransferError::MalformedMessage(format!(
                "file-info declares {} chunks, layout needs {}",
                info.total_chunks, expected
            )));
        }
        Ok(())
    }

    /// Accept one chunk frame. Completes the file once every index has arrived.
    pub fn on_chunk(&mut self, frame: ChunkFrame) -> Result<ChunkReceiveResult> {
        let Some(active) = self.active.as_mut() else {
            return Err(TransferError::MalformedMessage(
                "chunk without file-info".into(),
            ));
        };
        let info = &active.info;
        if frame.total_chunks != info.total_chunks {
            return Err(TransferError::MalformedMessage(format!(
                "chunk declares {} total chunks, file-info {}",
                frame.total_chunks, info.total_chunks
            )));
        }
        if frame.index >= info.total_chunks {
            return Err(TransferError::MalformedMessage(format!(
                "chunk index {} out of range 0..{}",
                frame.index, info.total_chunks
            )));
        }
        let expected_len = chunk::chunk_range(frame.index, info.file_size, info.chunk_size).len();
        let payload = if frame.compressed {
            compress::decompress(&frame.payload, expected_len).map_err(|e| {
                TransferError::ChunkIntegrityMismatch(format!("chunk {}: {}", frame.index, e))
            })?
        } else {
            frame.payload
        };
        if payload.len() != expected_len {
            return Err(TransferError::ChunkIntegrityMismatch(format!(
                "chunk {} is {} bytes, expected {}",
                frame.index,
                payload.len(),
                expected_len
            )));
        }
        if !active.buffer.insert(frame.index, payload) {
            tracing::debug!(index = frame.index, "duplicate chunk overwritten");
        }
        if !active.buffer.is_complete() {
            return Ok(ChunkReceiveResult::InProgress {
                received: active.buffer.received(),
                total: active.buffer.total(),
            });
        }
        self.finish().map(ChunkReceiveResult::Complete)
    }

    fn finish(&mut self) -> Result<ReceivedFile> {
        let Some(mut active) = self.active.take() else {
            return Err(TransferError::MalformedMessage(
                "no file being received".into(),
            ));
        };
        let info = active.info;
        let bytes = active.buffer.concat().ok_or_else(|| {
            TransferError::ChunkIntegrityMismatch("missing chunk at assembly".into())
        })?;
        if bytes.len() as u64 != info.file_size {
            return Err(TransferError::ChunkIntegrityMismatch(format!(
                "assembled {} bytes, expected {}",
                bytes.len(),
                info.file_size
            )));
        }
        if let Some(expected) = info.sha256.as_deref() {
            if !integrity::verify_file(&bytes, expected) {
                return Err(TransferError::ChunkIntegrityMismatch(
                    "sha-256 digest does not match".into(),
                ));
            }
        }
        tracing::info!(file = %info.file_name, size = bytes.len(), "file reassembled");
        self.delivered = Some(info.total_chunks);
        Ok(ReceivedFile {
            file_name: info.file_name,
            mime_type: info.mime_type,
            bytes,
        })
    }

    /// Sender says it is done. Anything short of a delivered file is a mismatch.
    pub fn on_transfer_complete(&self, total_chunks: u32) -> Result<()> {
        if self.delivered == Some(total_chunks) {
            return Ok(());
        }
        match &self.active {
            Some(a) => Err(TransferError::ChunkIntegrityMismatch(format!(
                "expected {} chunks, have {}",
                a.buffer.total(),
                a.buffer.received()
            ))),
            None => Err(TransferError::MalformedMessage(
                "transfer-complete without file-info".into(),
            )),
        }
    }

    pub fn is_receiving(&self) -> bool {
        self.active.is_some()
    }

    pub fn progress(&self) -> ReceiveProgress {
        match &self.active {
            Some(a) => ReceiveProgress {
                received_chunks: a.buffer.received(),
                total_chunks: a.buffer.total(),
                bytes_received: a.buffer.bytes(),
                file_size: a.info.file_size,
            },
            None => ReceiveProgress::default(),
        }
    }

    /// Drop all buffered chunks.
    pub fn reset(&mut self) {
        self.active = None;
        self.delivered = None;
    }
}
