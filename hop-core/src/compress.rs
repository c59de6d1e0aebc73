//! Per-chunk DEFLATE compression and the "is this worth compressing" heuristic.

use std::io::{self, Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

/// Chunks shorter than this are never compressed.
pub const MIN_COMPRESS_LEN: usize = 256;

/// Extensions that are already compressed; never worth another pass.
const COMPRESSED_EXTENSIONS: &[&str] = &[
    "gz", "tgz", "zip", "bz2", "xz", "lz4", "zst", "7z", "rar", "jpg", "jpeg", "png", "gif",
    "webp", "avif", "heic", "mp3", "mp4", "m4a", "mkv", "avi", "mov", "webm", "flac", "ogg",
    "opus", "pdf", "docx", "xlsx", "pptx", "apk", "jar",
];

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "csv", "tsv", "json", "ndjson", "xml", "html", "htm", "css", "js", "mjs", "ts",
    "svg", "log", "yaml", "yml", "toml", "ini", "rs", "py", "c", "h", "cpp", "java", "go", "sql",
    "sh",
];

const TEXT_MIME_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/javascript",
    "application/x-javascript",
    "application/sql",
    "application/x-ndjson",
    "application/x-sh",
    "application/toml",
    "application/yaml",
    "image/svg+xml",
];

/// Decide from name and mime type whether chunks of this file should be offered compressed.
pub fn is_compressible(file_name: &str, mime_type: &str) -> bool {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    if COMPRESSED_EXTENSIONS.contains(&ext.as_str()) {
        return false;
    }
    let mime = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime.starts_with("text/")
        || TEXT_MIME_TYPES.contains(&mime.as_str())
        || mime.ends_with("+json")
        || mime.ends_with("+xml")
        || TEXT_EXTENSIONS.contains(&ext.as_str())
}

/// Raw DEFLATE at the fast level: chunk encoding sits on the hot send path.
pub fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), Compression::fast());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Inflate, refusing output longer than `limit` bytes.
pub fn decompress(data: &[u8], limit: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(limit.min(data.len() * 4));
    DeflateDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("decompressed chunk exceeds {} bytes", limit),
        ));
    }
    Ok(out)
}

/// A chunk as it goes on the wire. `compressed` is true only if `payload` is DEFLATE output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub payload: Vec<u8>,
    pub compressed: bool,
}

/// Encode one raw chunk. Compression is kept only when strictly smaller than the input.
pub fn encode_chunk(raw: &[u8], try_compress: bool) -> io::Result<EncodedChunk> {
    if try_compress && raw.len() >= MIN_COMPRESS_LEN {
        let packed = compress(raw)?;
        if packed.len() < raw.len() {
            return Ok(EncodedChunk {
                payload: packed,
                compressed: true,
            });
        }
    }
    Ok(EncodedChunk {
        payload: raw.to_vec(),
        compressed: false,
    })
}
