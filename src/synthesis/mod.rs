//! Speech synthesis tiers
//!
//! Audio for a phrase comes from, in order: the local cache, a remote
//! high-quality provider (only when online), and an on-device engine that
//! is always available. See [`SynthesisGateway`].

mod connectivity;
mod gateway;
pub mod local;
pub mod remote;

use async_trait::async_trait;

use crate::voice::VoiceIdentity;
use crate::{Error, Result};

pub use connectivity::{Connectivity, StaticConnectivity, TcpProbe};
pub use gateway::{SpeechOutcome, SynthesisGateway, Tier};
pub use local::{CommandEngine, LocalEngine, LocalVoice, Utterance, select_voice, speech_rate};
pub use remote::{HttpSynthesizer, Provider, VoiceSettings};

/// Network text-to-speech provider
#[async_trait]
pub trait RemoteSynthesizer: Send + Sync {
    /// Synthesize `text` in `voice`, returning encoded audio bytes
    ///
    /// # Errors
    ///
    /// Returns `RemoteSynthesis` on transport failure, timeout, non-2xx
    /// status, or a body that is not playable audio
    async fn synthesize(&self, text: &str, voice: VoiceIdentity) -> Result<Vec<u8>>;

    /// Short provider name for logs
    fn name(&self) -> &str;
}

/// Reject provider output that would not play
///
/// Providers can answer 200 with a JSON error or a captive-portal page;
/// such bytes must never reach the cache.
///
/// # Errors
///
/// Returns `RemoteSynthesis` if the bytes are empty or do not decode as MP3 or WAV
pub fn ensure_playable(audio: &[u8]) -> Result<()> {
    if audio.is_empty() {
        return Err(Error::RemoteSynthesis("provider returned an empty body".to_string()));
    }
    crate::playback::device::decode(audio)
        .map(|_| ())
        .map_err(|e| Error::RemoteSynthesis(format!("malformed audio from provider: {e}")))
}
