//! Integrity: whole-file SHA-256 digest carried in `file-info` and checked after reassembly.

use std::fmt::Write;

use sha2::{Digest, Sha256};

/// Hash a file's bytes. Returns 32-byte digest.
pub fn hash_file(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Lowercase hex form used on the wire.
pub fn to_hex(digest: &[u8; 32]) -> String {
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Hex digest of `bytes`, ready for `FileInfo::sha256`.
pub fn file_digest_hex(bytes: &[u8]) -> String {
    to_hex(&hash_file(bytes))
}

/// Verify reconstructed bytes against the declared hex digest. Case-insensitive.
pub fn verify_file(bytes: &[u8], expected_hex: &str) -> bool {
    file_digest_hex(bytes).eq_ignore_ascii_case(expected_hex.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verify_roundtrip() {
        let payload = b"hello file";
        let hex = file_digest_hex(payload);
        assert_eq!(hex.len(), 64);
        assert!(verify_file(payload, &hex));
        assert!(verify_file(payload, &hex.to_uppercase()));
    }

    #[test]
    fn verify_rejects_tampered() {
        let hex = file_digest_hex(b"hello file");
        assert!(!verify_file(b"hello filE", &hex));
    }

    #[test]
    fn known_digest() {
        assert_eq!(
            file_digest_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
