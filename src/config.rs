//! Configuration management
//!
//! Values come from environment variables, then an optional TOML file,
//! then defaults. The file is a partial overlay: every field is optional.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::playback::RateLimitConfig;
use crate::synthesis::{Provider, VoiceSettings};
use crate::voice::{LanguageMode, SpeakOptions, VoiceIdentity, Volume};
use crate::{Error, Result};

/// File name of the cache database inside the data directory
pub const CACHE_DB_FILE: &str = "audio_cache.db";

const DEFAULT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1500;
const DEFAULT_PREGEN_DELAY_MS: u64 = 500;

/// Soundboard configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the cache database
    pub data_dir: PathBuf,

    /// Remote speech provider
    pub remote: RemoteConfig,

    /// Playback start throttling
    pub rate_limit: RateLimitConfig,

    /// Default playback volume
    pub volume: Volume,

    /// Default voice
    pub voice: VoiceIdentity,

    pub language_mode: LanguageMode,

    /// `host:port` probed to decide whether we are online.
    /// `None` probes the provider host on 443.
    pub probe_addr: Option<String>,

    pub probe_timeout_ms: u64,

    /// Delay between synthesis calls during pre-generation
    pub pregen_delay_ms: u64,
}

/// Remote provider settings
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub provider: Provider,

    /// Without a key there is no remote tier
    pub api_key: Option<SecretString>,

    pub base_url: String,

    pub model_id: String,

    /// Provider voice IDs overriding the built-in defaults
    pub voice_ids: HashMap<VoiceIdentity, String>,

    pub voice_settings: VoiceSettings,

    /// Speaking speed (OpenAI only)
    pub speed: f32,

    pub timeout_secs: u64,
}

impl RemoteConfig {
    /// Provider defaults with no API key
    #[must_use]
    pub fn defaults_for(provider: Provider) -> Self {
        Self {
            provider,
            api_key: None,
            base_url: provider.default_base_url().to_string(),
            model_id: provider.default_model().to_string(),
            voice_ids: HashMap::new(),
            voice_settings: VoiceSettings::default(),
            speed: 1.0,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    #[must_use]
    pub const fn has_key(&self) -> bool {
        self.api_key.is_some()
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self::defaults_for(Provider::default())
    }
}

/// TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub remote: RemoteFileConfig,
    pub rate_limit: Option<RateLimitConfig>,
    pub playback: PlaybackFileConfig,
    pub probe: ProbeFileConfig,
    pub pregen: PregenFileConfig,
}

/// `[remote]` table
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RemoteFileConfig {
    pub provider: Option<Provider>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model_id: Option<String>,
    /// Keyed by voice name (`female`, `child`, ...)
    pub voice_ids: HashMap<String, String>,
    pub voice_settings: Option<VoiceSettings>,
    pub speed: Option<f32>,
    pub timeout_secs: Option<u64>,
}

/// `[playback]` table
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PlaybackFileConfig {
    /// 0-100 or 0.0-1.0
    pub volume: Option<f32>,
    pub voice: Option<String>,
    pub language_mode: Option<String>,
}

/// `[probe]` table
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProbeFileConfig {
    pub addr: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// `[pregen]` table
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PregenFileConfig {
    pub delay_ms: Option<u64>,
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn load() -> Result<Self> {
        let file = load_config_file();
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn from_sources(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = env("SAYBOARD_DATA_DIR")
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(default_data_dir);

        let remote = Self::remote_from_sources(file.remote, &env)?;

        let mut rate_limit = file.rate_limit.unwrap_or_default();
        if let Some(enabled) = env("SAYBOARD_RATE_LIMIT") {
            rate_limit.enabled = parse_bool(&enabled);
        }
        if let Some(ms) = env("SAYBOARD_MIN_INTERVAL_MS") {
            rate_limit.min_interval_ms = parse_number("SAYBOARD_MIN_INTERVAL_MS", &ms)?;
        }

        let volume = match env("SAYBOARD_VOLUME") {
            Some(v) => Some(parse_number::<f32>("SAYBOARD_VOLUME", &v)?),
            None => file.playback.volume,
        }
        .map_or(Volume::FULL, Volume::normalize);

        let voice = env("SAYBOARD_VOICE")
            .or(file.playback.voice)
            .map_or(VoiceIdentity::Default, |v| VoiceIdentity::normalize(&v));

        let language_mode = env("SAYBOARD_LANGUAGE")
            .or(file.playback.language_mode)
            .map(|mode| mode.parse::<LanguageMode>())
            .transpose()?
            .unwrap_or_default();

        let probe_addr = env("SAYBOARD_PROBE_ADDR").or(file.probe.addr);
        let probe_timeout_ms = file.probe.timeout_ms.unwrap_or(DEFAULT_PROBE_TIMEOUT_MS);

        let pregen_delay_ms = match env("SAYBOARD_PREGEN_DELAY_MS") {
            Some(ms) => parse_number("SAYBOARD_PREGEN_DELAY_MS", &ms)?,
            None => file.pregen.delay_ms.unwrap_or(DEFAULT_PREGEN_DELAY_MS),
        };

        Ok(Self {
            data_dir,
            remote,
            rate_limit,
            volume,
            voice,
            language_mode,
            probe_addr,
            probe_timeout_ms,
            pregen_delay_ms,
        })
    }

    fn remote_from_sources(
        file: RemoteFileConfig,
        env: &impl Fn(&str) -> Option<String>,
    ) -> Result<RemoteConfig> {
        let provider = env("SAYBOARD_TTS_PROVIDER")
            .map(|p| p.parse::<Provider>())
            .transpose()?
            .or(file.provider)
            .unwrap_or_default();

        let defaults = RemoteConfig::defaults_for(provider);
        let key_var = match provider {
            Provider::ElevenLabs => "ELEVENLABS_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
        };

        let api_key = env(key_var)
            .or(file.api_key)
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);

        if api_key.is_none() {
            tracing::info!(
                provider = provider.as_str(),
                "no API key configured, remote synthesis disabled"
            );
        }

        Ok(RemoteConfig {
            provider,
            api_key,
            base_url: env("SAYBOARD_TTS_BASE_URL")
                .or(file.base_url)
                .unwrap_or(defaults.base_url),
            model_id: env("SAYBOARD_TTS_MODEL")
                .or(file.model_id)
                .unwrap_or(defaults.model_id),
            voice_ids: file
                .voice_ids
                .into_iter()
                .map(|(name, id)| (VoiceIdentity::normalize(&name), id))
                .collect(),
            voice_settings: file.voice_settings.unwrap_or(defaults.voice_settings),
            speed: file.speed.unwrap_or(defaults.speed),
            timeout_secs: file.timeout_secs.unwrap_or(defaults.timeout_secs),
        })
    }

    /// Path of the cache database
    #[must_use]
    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(CACHE_DB_FILE)
    }

    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    #[must_use]
    pub const fn pregen_delay(&self) -> Duration {
        Duration::from_millis(self.pregen_delay_ms)
    }

    /// Defaults for a speak request
    #[must_use]
    pub const fn speak_options(&self) -> SpeakOptions {
        SpeakOptions {
            volume: self.volume,
            voice: self.voice,
            language_mode: self.language_mode,
        }
    }
}

/// Platform data directory, e.g. `~/.local/share/sayboard` on Linux
fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "sayboard", "sayboard")
        .map_or_else(|| PathBuf::from(".sayboard"), |d| d.data_dir().to_path_buf())
}

/// Return the config file path: `SAYBOARD_CONFIG` or `<config dir>/sayboard.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("SAYBOARD_CONFIG") {
        return Some(PathBuf::from(path));
    }
    directories::ProjectDirs::from("org", "sayboard", "sayboard")
        .map(|d| d.config_dir().join("sayboard.toml"))
}

/// Load the TOML config file from the standard path
///
/// Returns `FileConfig::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> FileConfig {
    let Some(path) = config_file_path() else {
        return FileConfig::default();
    };

    if !path.exists() {
        return FileConfig::default();
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            FileConfig::default()
        }
    }
}

/// Read and parse a config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key} must be a number, got {value:?}")))
}
