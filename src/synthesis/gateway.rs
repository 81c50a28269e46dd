//! Tiered resolution of a phrase to audible speech

use std::sync::Arc;

use super::connectivity::Connectivity;
use super::local::{LocalEngine, Utterance, select_voice, speech_pitch, speech_rate};
use super::{RemoteSynthesizer, ensure_playable};
use crate::cache::CacheStore;
use crate::playback::{Interrupt, PlaybackDevice};
use crate::voice::{SpeakOptions, VoiceIdentity};
use crate::{Error, Result};

/// Which tier produced the speech
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Cache,
    Remote,
    Local,
}

impl Tier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Remote => "remote",
            Self::Local => "local",
        }
    }
}

/// How a speak request was served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechOutcome {
    pub tier: Tier,
}

/// Speaks phrases using cache, then remote provider, then the local engine
///
/// Does not serialize playback itself; run it through a
/// [`PlaybackCoordinator`](crate::playback::PlaybackCoordinator).
pub struct SynthesisGateway {
    cache: CacheStore,
    remote: Option<Arc<dyn RemoteSynthesizer>>,
    connectivity: Arc<dyn Connectivity>,
    local: Arc<dyn LocalEngine>,
    device: Arc<dyn PlaybackDevice>,
}

impl std::fmt::Debug for SynthesisGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisGateway")
            .field("cache", &self.cache)
            .field("remote", &self.remote.as_ref().map(|r| r.name().to_string()))
            .field("local", &self.local.name())
            .finish_non_exhaustive()
    }
}

impl SynthesisGateway {
    /// Create a gateway
    ///
    /// Without a remote synthesizer the chain is cache, then local engine.
    #[must_use]
    pub fn new(
        cache: CacheStore,
        remote: Option<Arc<dyn RemoteSynthesizer>>,
        connectivity: Arc<dyn Connectivity>,
        local: Arc<dyn LocalEngine>,
        device: Arc<dyn PlaybackDevice>,
    ) -> Self {
        Self {
            cache,
            remote,
            connectivity,
            local,
            device,
        }
    }

    #[must_use]
    pub const fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// The remote provider, if one is configured
    #[must_use]
    pub fn remote(&self) -> Option<&Arc<dyn RemoteSynthesizer>> {
        self.remote.as_ref()
    }

    #[must_use]
    pub fn local_engine(&self) -> &Arc<dyn LocalEngine> {
        &self.local
    }

    /// Speak `text`, trying each tier in turn
    ///
    /// Cache and remote failures are logged and fall through.
    ///
    /// # Errors
    ///
    /// Returns `LocalSynthesisUnsupported` or `LocalSynthesis` only when the
    /// local engine, the last tier, cannot speak either
    pub async fn speak(&self, text: &str, options: &SpeakOptions) -> Result<SpeechOutcome> {
        let voice = options.voice;

        match self.cache.get(text, voice) {
            Ok(Some(audio)) => match self.device.play(&audio, options.volume).await {
                Ok(()) => return Ok(Self::served(text, Tier::Cache)),
                Err(e) => {
                    tracing::warn!(error = %e, voice = %voice, "cached audio failed to play");
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "audio cache unavailable, skipping");
            }
        }

        match self.fetch_remote(text, voice).await {
            Ok(audio) => match self.device.play(&audio, options.volume).await {
                Ok(()) => return Ok(Self::served(text, Tier::Remote)),
                Err(e) => {
                    tracing::warn!(error = %e, "remote audio failed to play, using local engine");
                }
            },
            Err(Error::NetworkUnavailable) => {
                tracing::debug!("offline, skipping remote synthesis");
            }
            Err(e) => {
                tracing::warn!(error = %e, "remote synthesis failed, using local engine");
            }
        }

        self.speak_locally(text, options).await?;
        Ok(Self::served(text, Tier::Local))
    }

    /// Fetch audio from the remote provider and cache it if it is playable
    ///
    /// The fetch runs as its own task: if the caller stops waiting (playback
    /// interrupted), the request still completes and the cache still fills.
    async fn fetch_remote(&self, text: &str, voice: VoiceIdentity) -> Result<Vec<u8>> {
        let Some(remote) = self.remote.clone() else {
            return Err(Error::RemoteSynthesis("no remote provider configured".to_string()));
        };

        if !self.connectivity.is_online().await {
            return Err(Error::NetworkUnavailable);
        }

        let cache = self.cache.clone();
        let text = text.to_string();

        tokio::spawn(async move {
            let audio = remote.synthesize(&text, voice).await?;
            ensure_playable(&audio)?;
            tracing::debug!(
                provider = remote.name(),
                voice = %voice,
                bytes = audio.len(),
                "remote synthesis complete"
            );

            if let Err(e) = cache.put(&text, voice, &audio) {
                tracing::warn!(error = %e, "failed to cache synthesized audio");
            }

            Ok::<_, Error>(audio)
        })
        .await
        .map_err(|e| Error::RemoteSynthesis(format!("synthesis task failed: {e}")))?
    }

    async fn speak_locally(&self, text: &str, options: &SpeakOptions) -> Result<()> {
        let voices = match self.local.voices().await {
            Ok(voices) => voices,
            Err(e) => {
                tracing::debug!(error = %e, "could not list local voices");
                Vec::new()
            }
        };

        let selected = select_voice(&voices, options.language_mode, options.voice);
        // A voice that already matches the identity keeps its natural pitch
        let pitch = match selected {
            Some(v) if v.gender == Some(options.voice) => 1.0,
            _ => speech_pitch(options.voice),
        };

        let utterance = Utterance {
            text: text.to_string(),
            voice: selected.map(|v| v.id.clone()),
            language: options.language_mode,
            rate: speech_rate(options.voice),
            pitch,
            volume: options.volume,
        };

        self.local.speak(&utterance).await.map_err(|e| {
            if e.is_speech_failure() {
                e
            } else {
                Error::LocalSynthesis(e.to_string())
            }
        })
    }

    fn served(text: &str, tier: Tier) -> SpeechOutcome {
        tracing::debug!(tier = tier.as_str(), chars = text.chars().count(), "phrase spoken");
        SpeechOutcome { tier }
    }
}

impl Interrupt for SynthesisGateway {
    fn interrupt(&self) {
        self.device.stop();
        self.local.cancel();
    }
}
