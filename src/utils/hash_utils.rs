use sha2::{Digest, Sha256};

/// Number of characters shown when a hash is printed in logs.
pub const SHORT_HASH_LEN: usize = 8;

/// Lowercase hex SHA-256 digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// The leading characters of a hash, for log lines and CLI output.
pub fn short_hash(hash: &str) -> &str {
    match hash.char_indices().nth(SHORT_HASH_LEN) {
        Some((idx, _)) => &hash[..idx],
        None => hash
    }
}

/// Accepts a full 64 character SHA-256 hex digest, or a short 8-12 character prefix.
pub fn is_valid_hash(hash: &str) -> bool {
    let is_hex = hash.chars().all(|c| c.is_ascii_hexdigit());
    is_hex && (hash.len() == 64 || (8..=12).contains(&hash.len()))
}
