//! Cache key derivation.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Deterministic cache key for an `(endpoint, args)` pair.
///
/// serde_json objects keep their keys sorted, so serializing the args gives
/// a canonical form; hashing endpoint and args together yields a stable,
/// fixed-length key.
pub fn cache_key(endpoint: &str, args: &Value) -> String {
  let mut hasher = Sha256::new();
  hasher.update(endpoint.as_bytes());
  hasher.update([0u8]);
  hasher.update(args.to_string().as_bytes());
  hex::encode(hasher.finalize())
}
