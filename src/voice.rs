//! Voice selection types shared by the cache, synthesis, and playback layers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Logical voice selector, independent of any provider's voice ID
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceIdentity {
    Male,
    Female,
    Child,
    #[default]
    Default,
}

impl VoiceIdentity {
    /// Every identity, in a stable order
    pub const ALL: [Self; 4] = [Self::Male, Self::Female, Self::Child, Self::Default];

    /// Map a loose voice-type string onto an identity
    ///
    /// Unknown values fall back to [`VoiceIdentity::Default`].
    #[must_use]
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "male" | "man" | "boy" | "lalaki" => Self::Male,
            "female" | "woman" | "girl" | "babae" => Self::Female,
            "child" | "kid" | "bata" => Self::Child,
            _ => Self::Default,
        }
    }

    /// Canonical name, stable across releases (used in cache keys)
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Child => "child",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for VoiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoiceIdentity {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::normalize(s))
    }
}

/// Which language(s) the board is speaking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageMode {
    #[default]
    English,
    Filipino,
    Bilingual,
}

impl LanguageMode {
    /// Locales an on-device voice should match exactly, best first
    #[must_use]
    pub const fn preferred_locales(self) -> &'static [&'static str] {
        match self {
            Self::English => &["en-us", "en-ph"],
            Self::Filipino => &["fil-ph", "tl-ph", "fil", "tl"],
            // Bilingual phrases are mostly Taglish; a Filipino voice reads both
            Self::Bilingual => &["fil-ph", "tl-ph", "fil", "tl", "en-ph"],
        }
    }

    /// Language families accepted when no locale matches exactly
    #[must_use]
    pub const fn families(self) -> &'static [&'static str] {
        match self {
            Self::English => &["en"],
            Self::Filipino => &["fil", "tl"],
            Self::Bilingual => &["fil", "tl", "en"],
        }
    }

    /// Language tag handed to engines that select voices by language
    #[must_use]
    pub const fn engine_language(self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Filipino | Self::Bilingual => "tl",
        }
    }
}

impl FromStr for LanguageMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "english" | "en" => Ok(Self::English),
            "filipino" | "tagalog" | "fil" | "tl" => Ok(Self::Filipino),
            "bilingual" | "both" => Ok(Self::Bilingual),
            other => Err(crate::Error::Config(format!("unknown language mode: {other}"))),
        }
    }
}

/// Playback volume in `[0.0, 1.0]`
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Volume(f32);

impl Volume {
    pub const FULL: Self = Self(1.0);

    /// Normalize a caller-supplied level
    ///
    /// Accepts either `0.0..=1.0` or percent (`0..=100`); anything above
    /// 1.0 is read as percent. The result is clamped.
    #[must_use]
    pub fn normalize(level: f32) -> Self {
        if level.is_nan() {
            return Self::FULL;
        }
        let scaled = if level > 1.0 { level / 100.0 } else { level };
        Self(scaled.clamp(0.0, 1.0))
    }

    #[must_use]
    pub const fn get(self) -> f32 {
        self.0
    }

    /// Volume as an integer percentage
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percent(self) -> u8 {
        (self.0 * 100.0).round() as u8
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::FULL
    }
}

/// Options for a single speak request
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpeakOptions {
    pub volume: Volume,
    pub voice: VoiceIdentity,
    pub language_mode: LanguageMode,
}
