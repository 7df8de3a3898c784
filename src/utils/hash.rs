//! Content-hash keys for the cache and the request log.
//!
//! A key is the hash of the method name plus its canonicalized arguments.
//! Canonicalization goes through `serde_json::Value`, whose object maps are
//! key-sorted, so the same logical arguments always produce the same key
//! regardless of field declaration order.

use serde::Serialize;

/// Deterministic content-hash of a method call.
pub fn content_hash<A: Serialize>(method: &str, args: &A) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_value(args)?;
    let payload = serde_json::to_string(&(method, canonical))?;
    let digest = md5::compute(payload.as_bytes());
    Ok(format!("{:x}", digest))
}
