use sha2::{Digest, Sha256};

/// SHA-256 of the source image, used to tie a report to the exact bytes it
/// was produced from.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Lowercase hex (64 chars).
pub fn to_hex(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn image_digest(data: &[u8]) -> String {
    to_hex(&sha256_bytes(data))
}
