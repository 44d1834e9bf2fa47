//! Content fingerprints used to decide whether a file changed

use sha2::{Digest, Sha256};

/// SHA-256 of the raw file bytes, hex encoded
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of a file whose bytes could not be read
///
/// Derived from size and mtime so an unreadable file is still tracked and
/// reported as changed once its metadata moves.
pub fn fallback_hash(size: u64, mtime_secs: i64) -> String {
    format!("unreadable:{}:{}", size, mtime_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_bytes(b"hello"), hash_bytes(b"hello"));
        assert_ne!(hash_bytes(b"hello"), hash_bytes(b"hello!"));
    }

    #[test]
    fn test_hash_of_empty_input() {
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_fallback_hash_tracks_metadata() {
        assert_eq!(fallback_hash(10, 5), "unreadable:10:5");
        assert_ne!(fallback_hash(10, 5), fallback_hash(10, 6));
    }
}
