//! The file offer a sender proposes before any bytes move.

use serde::{Deserialize, Serialize};

use crate::chunk::{self, SizeBand};
use crate::compress;
use crate::error::{Result, TransferError};
use crate::protocol::FileInfo;

const DEFAULT_MIME: &str = "application/octet-stream";
const MAX_NAME_LEN: usize = 255;

/// File metadata and chunk layout. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOffer {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub total_chunks: u32,
    pub chunk_size: u32,
    pub compression_requested: bool,
}

impl TransferOffer {
    /// Build an offer for a local file, picking chunk size from the size band and
    /// compression from the name/mime heuristic. Validated before returning.
    pub fn for_file(
        file_name: impl Into<String>,
        file_size: u64,
        mime_type: &str,
        max_file_size: u64,
    ) -> Result<Self> {
        let file_name = file_name.into();
        let mime_type = if mime_type.trim().is_empty() {
            DEFAULT_MIME.to_string()
        } else {
            mime_type.trim().to_string()
        };
        let chunk_size = chunk::band_for(file_size).chunk_size;
        let total = chunk::total_chunks(file_size, chunk_size);
        let total_chunks = u32::try_from(total).map_err(|_| {
            TransferError::InvalidOffer(format!("{} chunks do not fit the frame index", total))
        })?;
        let offer = TransferOffer {
            compression_requested: compress::is_compressible(&file_name, &mime_type),
            file_name,
            file_size,
            mime_type,
            total_chunks,
            chunk_size,
        };
        offer.validate(max_file_size)?;
        Ok(offer)
    }

    /// Check an offer from either side: sane name, non-empty, within the size
    /// limit, and a chunk count that matches the declared layout.
    pub fn validate(&self, max_file_size: u64) -> Result<()> {
        validate_name(&self.file_name)?;
        if self.file_size == 0 {
            return Err(TransferError::InvalidOffer("file is empty".into()));
        }
        if self.file_size > max_file_size {
            return Err(TransferError::FileTooLarge {
                size: self.file_size,
                max: max_file_size,
            });
        }
        if !chunk::chunk_size_in_bounds(self.chunk_size) {
            return Err(TransferError::InvalidOffer(format!(
                "chunk size {} outside {}..={}",
                self.chunk_size,
                chunk::MIN_CHUNK_SIZE,
                chunk::MAX_CHUNK_SIZE
            )));
        }
        let expected = chunk::total_chunks(self.file_size, self.chunk_size);
        if expected != self.total_chunks as u64 {
            return Err(TransferError::InvalidOffer(format!(
                "total_chunks {} does not match size {} / chunk {} (expected {})",
                self.total_chunks, self.file_size, self.chunk_size, expected
            )));
        }
        Ok(())
    }

    /// Concurrency bounds for this file.
    pub fn band(&self) -> SizeBand {
        chunk::band_for(self.file_size)
    }

    /// The `file-info` control message announcing this transfer on the peer channel.
    pub fn file_info(&self, sha256: Option<String>) -> FileInfo {
        FileInfo {
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            mime_type: self.mime_type.clone(),
            total_chunks: self.total_chunks,
            chunk_size: self.chunk_size,
            compressed: self.compression_requested,
            sha256,
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    let invalid = |why: &str| Err(TransferError::InvalidOffer(format!("file name {}", why)));
    if name.trim().is_empty() {
        return invalid("is empty");
    }
    if name == "." || name == ".." {
        return invalid("is a path component");
    }
    if name.contains('/') || name.contains('\\') {
        return invalid("contains a path separator");
    }
    if name.len() > MAX_NAME_LEN {
        return invalid("is too long");
    }
    if name.chars().any(char::is_control) {
        return invalid("contains control characters");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_FILE_SIZE;

    #[test]
    fn offer_for_text_file() {
        let o = TransferOffer::for_file("a.txt", 3_000_000, "text/plain", DEFAULT_MAX_FILE_SIZE)
            .unwrap();
        assert_eq!(o.chunk_size, 64 * 1024);
        assert_eq!(o.total_chunks, 46);
        assert!(o.compression_requested);
        assert_eq!(o.band().initial_concurrency, 4);
    }

    #[test]
    fn empty_mime_defaults_to_octet_stream() {
        let o = TransferOffer::for_file("blob", 10, "", DEFAULT_MAX_FILE_SIZE).unwrap();
        assert_eq!(o.mime_type, "application/octet-stream");
        assert!(!o.compression_requested);
    }

    #[test]
    fn zero_size_is_invalid() {
        let err = TransferOffer::for_file("a.txt", 0, "text/plain", DEFAULT_MAX_FILE_SIZE)
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidOffer(_)));
    }

    #[test]
    fn too_large_is_rejected() {
        let err = TransferOffer::for_file("big.iso", 11, "", 10).unwrap_err();
        assert!(matches!(
            err,
            TransferError::FileTooLarge { size: 11, max: 10 }
        ));
    }

    #[test]
    fn path_like_names_are_invalid() {
        for name in ["", "  ", ".", "..", "../etc/passwd", "dir\\file", "a\nb"] {
            let err = TransferOffer::for_file(name, 1, "", DEFAULT_MAX_FILE_SIZE).unwrap_err();
            assert!(
                matches!(err, TransferError::InvalidOffer(_)),
                "name {:?} accepted",
                name
            );
        }
    }

    #[test]
    fn mismatched_chunk_count_is_invalid() {
        let mut o =
            TransferOffer::for_file("a.txt", 100_000, "text/plain", DEFAULT_MAX_FILE_SIZE).unwrap();
        o.total_chunks += 1;
        assert!(matches!(
            o.validate(DEFAULT_MAX_FILE_SIZE),
            Err(TransferError::InvalidOffer(_))
        ));
    }

    #[test]
    fn tiny_chunk_size_is_invalid() {
        let o = TransferOffer {
            file_name: "a.bin".into(),
            file_size: u32::MAX as u64,
            mime_type: DEFAULT_MIME.into(),
            total_chunks: u32::MAX,
            chunk_size: 1,
            compression_requested: false,
        };
        assert!(matches!(
            o.validate(DEFAULT_MAX_FILE_SIZE),
            Err(TransferError::InvalidOffer(_))
        ));
        let mut h = crate::handshake::Handshake::new(DEFAULT_MAX_FILE_SIZE);
        assert!(matches!(
            h.on_offer(o),
            crate::handshake::OfferDecision::AutoRejected { .. }
        ));
        assert!(h.is_idle());
    }

    #[test]
    fn oversized_chunk_size_is_invalid() {
        let mut o =
            TransferOffer::for_file("a.bin", 100 * 1024 * 1024, "", DEFAULT_MAX_FILE_SIZE).unwrap();
        o.chunk_size = 64 * 1024 * 1024;
        o.total_chunks = 2;
        assert!(matches!(
            o.validate(DEFAULT_MAX_FILE_SIZE),
            Err(TransferError::InvalidOffer(_))
        ));
    }

    #[test]
    fn file_info_mirrors_offer() {
        let o = TransferOffer::for_file("a.json", 20, "application/json", DEFAULT_MAX_FILE_SIZE)
            .unwrap();
        let info = o.file_info(Some("ab".into()));
        assert_eq!(info.total_chunks, 1);
        assert_eq!(info.chunk_size, 16 * 1024);
        assert!(info.compressed);
        assert_eq!(info.sha256.as_deref(), Some("ab"));
    }
}
