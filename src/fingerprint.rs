//! Source fingerprinting: a stable, collision-resistant key for the
//! `ingest_progress.source_hash` column (spec §3).

use sha2::{Digest, Sha256};

/// 32-byte SHA-256 digest of the source identifier string, hex-encoded.
pub fn fingerprint(source_identifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_identifier.as_bytes());
    let digest = hasher.finalize();
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic_and_32_bytes() {
        let a = fingerprint("https://example.org/archive.tar.gz");
        let b = fingerprint("https://example.org/archive.tar.gz");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64); // 32 bytes hex-encoded
    }

    #[test]
    fn differs_by_identifier() {
        assert_ne!(fingerprint("a"), fingerprint("b"));
    }
}
