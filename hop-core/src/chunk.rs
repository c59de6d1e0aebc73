//! Chunk layout: size bands, index ranges, chunk counts.

/// Chunk size used when a caller passes zero.
pub const DEFAULT_CHUNK_SIZE: u32 = 64 * 1024; // 64 KiB

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// One row of the size-band table: chunk size and concurrency bounds for files below `upper_bound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBand {
    /// Exclusive upper bound on file size for this band.
    pub upper_bound: u64,
    pub chunk_size: u32,
    pub initial_concurrency: usize,
    pub min_concurrency: usize,
    pub max_concurrency: usize,
}

/// Smaller files get smaller chunks and less parallelism. Tunable policy, not a wire contract.
pub const SIZE_BANDS: [SizeBand; 4] = [
    SizeBand {
        upper_bound: MIB,
        chunk_size: 16 * KIB as u32,
        initial_concurrency: 2,
        min_concurrency: 1,
        max_concurrency: 4,
    },
    SizeBand {
        upper_bound: 10 * MIB,
        chunk_size: 64 * KIB as u32,
        initial_concurrency: 4,
        min_concurrency: 2,
        max_concurrency: 8,
    },
    SizeBand {
        upper_bound: 100 * MIB,
        chunk_size: 128 * KIB as u32,
        initial_concurrency: 6,
        min_concurrency: 2,
        max_concurrency: 12,
    },
    SizeBand {
        upper_bound: u64::MAX,
        chunk_size: 256 * KIB as u32,
        initial_concurrency: 8,
        min_concurrency: 4,
        max_concurrency: 16,
    },
];

/// Smallest chunk size a peer may declare.
pub const MIN_CHUNK_SIZE: u32 = 16 * KIB as u32;
/// Largest chunk size a peer may declare. Well under the 16 MiB frame cap.
pub const MAX_CHUNK_SIZE: u32 = MIB as u32;

/// Whether a declared chunk size is within `[MIN_CHUNK_SIZE, MAX_CHUNK_SIZE]`.
/// Bounds the chunk count, and so the receive buffer, for any accepted file size.
pub fn chunk_size_in_bounds(chunk_size: u32) -> bool {
    (MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size)
}

/// Pick the band for a file of `file_size` bytes.
pub fn band_for(file_size: u64) -> SizeBand {
    SIZE_BANDS
        .iter()
        .copied()
        .find(|b| file_size < b.upper_bound)
        .unwrap_or(SIZE_BANDS[SIZE_BANDS.len() - 1])
}

fn effective_chunk_size(chunk_size: u32) -> u64 {
    if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE as u64
    } else {
        chunk_size as u64
    }
}

/// `ceil(file_size / chunk_size)`, as u64 so callers can range-check before narrowing.
pub fn total_chunks(file_size: u64, chunk_size: u32) -> u64 {
    file_size.div_ceil(effective_chunk_size(chunk_size))
}

/// Chunk identifier: index plus the byte range `[start, end)` it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId {
    pub index: u32,
    pub start: u64,
    pub end: u64,
}

impl ChunkId {
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Range of chunk `index` in a file of `file_size` bytes. The last chunk may be short.
pub fn chunk_range(index: u32, file_size: u64, chunk_size: u32) -> ChunkId {
    let size = effective_chunk_size(chunk_size);
    let start = (index as u64 * size).min(file_size);
    let end = (start + size).min(file_size);
    ChunkId { index, start, end }
}

/// Split a file into chunks by fixed size.
pub fn split_into_chunks(total_len: u64, chunk_size: u32) -> Vec<ChunkId> {
    let count = total_chunks(total_len, chunk_size);
    (0..count)
        .map(|i| chunk_range(i as u32, total_len, chunk_size))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_chunks() {
        let chunks = split_into_chunks(100, 30);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].end, 30);
        assert_eq!(chunks[3].index, 3);
        assert_eq!(chunks[3].start, 90);
        assert_eq!(chunks[3].end, 100);
    }

    #[test]
    fn split_exact_multiple() {
        let chunks = split_into_chunks(90, 30);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].end, 90);
        assert_eq!(total_chunks(90, 30), 3);
    }

    #[test]
    fn split_single_chunk() {
        let chunks = split_into_chunks(10, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].end, 10);
    }

    #[test]
    fn split_zero_length() {
        assert!(split_into_chunks(0, 30).is_empty());
        assert_eq!(total_chunks(0, 30), 0);
    }

    #[test]
    fn split_zero_chunk_size_uses_default() {
        let chunks = split_into_chunks(DEFAULT_CHUNK_SIZE as u64 * 2, 0);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn total_chunks_is_ceiling() {
        assert_eq!(total_chunks(1, 16 * 1024), 1);
        assert_eq!(total_chunks(16 * 1024, 16 * 1024), 1);
        assert_eq!(total_chunks(16 * 1024 + 1, 16 * 1024), 2);
        assert_eq!(total_chunks(3_000_000, 64 * 1024), 46);
    }

    #[test]
    fn ranges_cover_file_without_gaps() {
        let chunks = split_into_chunks(1_000_003, 4096);
        let mut expected_start = 0;
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index as usize, i);
            assert_eq!(c.start, expected_start);
            expected_start = c.end;
        }
        assert_eq!(expected_start, 1_000_003);
    }

    #[test]
    fn bands_by_size() {
        assert_eq!(band_for(1).chunk_size, 16 * 1024);
        assert_eq!(band_for(MIB - 1).chunk_size, 16 * 1024);
        assert_eq!(band_for(MIB).chunk_size, 64 * 1024);
        assert_eq!(band_for(3_000_000).chunk_size, 64 * 1024);
        assert_eq!(band_for(50 * MIB).chunk_size, 128 * 1024);
        assert_eq!(band_for(5 * 1024 * MIB).chunk_size, 256 * 1024);
    }

    #[test]
    fn chunk_size_bounds() {
        assert!(!chunk_size_in_bounds(0));
        assert!(!chunk_size_in_bounds(1));
        assert!(!chunk_size_in_bounds(MIN_CHUNK_SIZE - 1));
        assert!(chunk_size_in_bounds(MIN_CHUNK_SIZE));
        assert!(chunk_size_in_bounds(MAX_CHUNK_SIZE));
        assert!(!chunk_size_in_bounds(MAX_CHUNK_SIZE + 1));
        assert!(!chunk_size_in_bounds(u32::MAX));
    }

    #[test]
    fn band_bounds_are_consistent() {
        for b in SIZE_BANDS {
            assert!(chunk_size_in_bounds(b.chunk_size));
            assert!(b.min_concurrency >= 1);
            assert!(b.min_concurrency <= b.initial_concurrency);
            assert!(b.initial_concurrency <= b.max_concurrency);
        }
    }
}
