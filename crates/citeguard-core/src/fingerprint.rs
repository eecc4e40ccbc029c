//! Content fingerprints for correlating the two halves of one request.

use sha2::{Digest, Sha256};

/// Stable digest of `text`: lowercase hex SHA-256 of its UTF-8 bytes.
///
/// The same text always yields the same fingerprint, across processes and
/// restarts, so it can link a pre-flight call to its post-flight call.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
