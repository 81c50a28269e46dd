//! Remote text-to-speech providers

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::RemoteSynthesizer;
use crate::config::RemoteConfig;
use crate::voice::VoiceIdentity;
use crate::{Error, Result};

/// Remote TTS provider dialect
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    ElevenLabs,
    OpenAI,
}

impl Provider {
    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::ElevenLabs => "https://api.elevenlabs.io",
            Self::OpenAI => "https://api.openai.com",
        }
    }

    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::ElevenLabs => "eleven_multilingual_v2",
            Self::OpenAI => "tts-1",
        }
    }

    /// Provider voice ID used for an identity when none is configured
    #[must_use]
    pub const fn default_voice_id(self, voice: VoiceIdentity) -> &'static str {
        match (self, voice) {
            (Self::ElevenLabs, VoiceIdentity::Male) => "pNInz6obpgDQGcFmaJgB",
            (Self::ElevenLabs, VoiceIdentity::Female | VoiceIdentity::Default) => {
                "21m00Tcm4TlvDq8ikWAM"
            }
            (Self::ElevenLabs, VoiceIdentity::Child) => "jBpfuIE2acCO8z3wKNLl",
            (Self::OpenAI, VoiceIdentity::Male) => "onyx",
            (Self::OpenAI, VoiceIdentity::Female) => "nova",
            (Self::OpenAI, VoiceIdentity::Child) => "shimmer",
            (Self::OpenAI, VoiceIdentity::Default) => "alloy",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ElevenLabs => "elevenlabs",
            Self::OpenAI => "openai",
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "elevenlabs" | "eleven_labs" | "11labs" => Ok(Self::ElevenLabs),
            "openai" => Ok(Self::OpenAI),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// ElevenLabs voice tuning
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.75,
        }
    }
}

/// Synthesizes speech over HTTP
pub struct HttpSynthesizer {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    voices: HashMap<VoiceIdentity, String>,
    voice_settings: VoiceSettings,
    speed: f32,
    provider: Provider,
}

impl std::fmt::Debug for HttpSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSynthesizer")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl HttpSynthesizer {
    /// Create a synthesizer from remote provider configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or the HTTP client cannot be built
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| {
                Error::Config(format!("{} API key required for TTS", config.provider.as_str()))
            })?;

        let base = url::Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("invalid TTS base URL {}: {e}", config.base_url)))?;

        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs));
        // Self-hosted or test servers on loopback are never proxied
        if matches!(base.host_str(), Some("localhost" | "127.0.0.1" | "[::1]")) {
            builder = builder.no_proxy();
        }

        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model_id.clone(),
            voices: config.voice_ids.clone(),
            voice_settings: config.voice_settings,
            speed: config.speed,
            provider: config.provider,
        })
    }

    /// Provider voice ID for an identity
    #[must_use]
    pub fn voice_id(&self, voice: VoiceIdentity) -> &str {
        self.voices
            .get(&voice)
            .map_or_else(|| self.provider.default_voice_id(voice), String::as_str)
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str, voice: VoiceIdentity) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
            voice_settings: VoiceSettings,
        }

        let url = format!(
            "{}/v1/text-to-speech/{}",
            self.base_url,
            self.voice_id(voice)
        );

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
            voice_settings: self.voice_settings,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key.expose_secret())
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        read_audio(response, "ElevenLabs").await
    }

    /// Synthesize using `OpenAI` TTS
    async fn synthesize_openai(&self, text: &str, voice: VoiceIdentity) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: self.voice_id(voice),
            speed: self.speed,
        };

        let response = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        read_audio(response, "OpenAI").await
    }
}

#[async_trait]
impl RemoteSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, voice: VoiceIdentity) -> Result<Vec<u8>> {
        match self.provider {
            Provider::ElevenLabs => self.synthesize_elevenlabs(text, voice).await,
            Provider::OpenAI => self.synthesize_openai(text, voice).await,
        }
    }

    fn name(&self) -> &str {
        self.provider.as_str()
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::RemoteSynthesis(format!("request timed out: {e}"))
    } else {
        Error::RemoteSynthesis(e.to_string())
    }
}

async fn read_audio(response: reqwest::Response, provider: &str) -> Result<Vec<u8>> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::RemoteSynthesis(format!(
            "{provider} TTS error {status}: {body}"
        )));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_ascii_lowercase);
    if let Some(content_type) = content_type.filter(|ct| !is_audio_content_type(ct)) {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::RemoteSynthesis(format!(
            "{provider} TTS returned {content_type} instead of audio: {body}"
        )));
    }

    let audio = response.bytes().await.map_err(transport_error)?;
    super::ensure_playable(&audio)?;

    Ok(audio.to_vec())
}

/// `audio/*`, or a bare byte stream some proxies substitute
fn is_audio_content_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    essence.starts_with("audio/") || essence == "application/octet-stream"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_is_config_error() {
        let config = RemoteConfig::defaults_for(Provider::ElevenLabs);
        assert!(matches!(HttpSynthesizer::new(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_voice_id_prefers_configured() {
        let mut config = RemoteConfig::defaults_for(Provider::OpenAI);
        config.api_key = Some(SecretString::from("sk-test".to_string()));
        config
            .voice_ids
            .insert(VoiceIdentity::Female, "coral".to_string());

        let tts = HttpSynthesizer::new(&config).unwrap();
        assert_eq!(tts.voice_id(VoiceIdentity::Female), "coral");
        assert_eq!(tts.voice_id(VoiceIdentity::Male), "onyx");
    }

    #[test]
    fn test_audio_content_types() {
        assert!(is_audio_content_type("audio/mpeg"));
        assert!(is_audio_content_type("audio/wav; codecs=1"));
        assert!(is_audio_content_type("application/octet-stream"));
        assert!(!is_audio_content_type("application/json"));
        assert!(!is_audio_content_type("text/html; charset=utf-8"));
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("ElevenLabs".parse::<Provider>().unwrap(), Provider::ElevenLabs);
        assert_eq!("openai".parse::<Provider>().unwrap(), Provider::OpenAI);
        assert!("polly".parse::<Provider>().is_err());
    }
}
