//! Cache keys and expiry timestamps shared by the cartoon, explanation and
//! speech caches.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::filter::normalize_title;

/// Key for the cartoon and explanation caches.
pub fn cartoon_key(headline: &str) -> String {
    normalize_title(headline)
}

/// Content hash of the text handed to the speech API. Paired with a voice id
/// to form the TTS cache key.
pub fn tts_key(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Fixed-width UTC timestamp. Stored timestamps are compared as strings in
/// SQL, so every writer must go through this.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// `(created_at, expires_at)` for an entry written now with the given TTL.
pub fn expiry(ttl: Duration) -> (String, String) {
    let now = Utc::now();
    (timestamp(now), timestamp(now + ttl))
}
