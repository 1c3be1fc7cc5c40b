//! Hash helpers.

use sha2::{Digest, Sha256};

/// SHA-256 convenience wrapper.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
