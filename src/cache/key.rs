//! Content-addressed cache keys

use std::fmt;

use sha2::{Digest, Sha256};

use crate::voice::VoiceIdentity;

/// Separates voice and text in the hashed input so that no (voice, text)
/// pair can produce the same byte sequence as another
const FIELD_SEPARATOR: u8 = 0x1f;

/// Opaque identifier of a cached audio entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a phrase spoken in a voice
    ///
    /// Text is used verbatim: "Salamat" and "salamat " are different phrases.
    #[must_use]
    pub fn derive(text: &str, voice: VoiceIdentity) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(voice.as_str().as_bytes());
        hasher.update([FIELD_SEPARATOR]);
        hasher.update(text.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
