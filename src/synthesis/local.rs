//! On-device speech engine, the last synthesis tier

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tokio::sync::watch;

use crate::voice::{LanguageMode, VoiceIdentity, Volume};
use crate::{Error, Result};

/// Voice names that engines use for their better-sounding voices
static QUALITY_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(enhanced|premium|neural)\b").expect("valid regex"));

/// Base speaking rate of espeak in words per minute
const ESPEAK_BASE_WPM: f32 = 175.0;

/// A voice reported by the on-device engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVoice {
    /// Identifier passed back to the engine
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Locale tag such as `en-us` or `fil`
    pub locale: String,
    /// Gender hint, when the engine reports one
    pub gender: Option<VoiceIdentity>,
}

impl LocalVoice {
    fn locale_is(&self, wanted: &str) -> bool {
        normalize_locale(&self.locale) == wanted
    }

    fn in_family(&self, family: &str) -> bool {
        let locale = normalize_locale(&self.locale);
        locale == family || locale.starts_with(&format!("{family}-"))
    }

    fn is_high_quality(&self) -> bool {
        QUALITY_MARKER.is_match(&self.name) || QUALITY_MARKER.is_match(&self.id)
    }
}

fn normalize_locale(raw: &str) -> String {
    raw.trim().replace('_', "-").to_ascii_lowercase()
}

/// One thing to say with the local engine
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    /// Engine voice ID; `None` lets the engine pick by language
    pub voice: Option<String>,
    pub language: LanguageMode,
    /// Rate multiplier, 1.0 is the engine's normal speed
    pub rate: f32,
    /// Pitch multiplier, 1.0 is the voice's normal pitch
    pub pitch: f32,
    pub volume: Volume,
}

/// Host text-to-speech capability that needs no network
#[async_trait]
pub trait LocalEngine: Send + Sync {
    /// Enumerate installed voices
    ///
    /// # Errors
    ///
    /// Returns `LocalSynthesisUnsupported` if no engine exists
    async fn voices(&self) -> Result<Vec<LocalVoice>>;

    /// Speak an utterance, returning once it has finished or was cancelled
    ///
    /// # Errors
    ///
    /// Returns `LocalSynthesisUnsupported` if no engine exists, or
    /// `LocalSynthesis` if the engine fails
    async fn speak(&self, utterance: &Utterance) -> Result<()>;

    /// Cut off the utterance in progress, if any
    fn cancel(&self);

    /// Short engine name for logs
    fn name(&self) -> &str;
}

/// Pick the best installed voice for a language and identity
///
/// Preference order: exact locale match, then an enhanced/premium/neural
/// voice in the language family, then any voice in the family, then any
/// voice at all. Within a tier a voice whose gender matches wins.
#[must_use]
pub fn select_voice(
    voices: &[LocalVoice],
    language: LanguageMode,
    identity: VoiceIdentity,
) -> Option<&LocalVoice> {
    for locale in language.preferred_locales() {
        let exact: Vec<_> = voices.iter().filter(|v| v.locale_is(locale)).collect();
        if let Some(voice) = pick(&exact, identity) {
            return Some(voice);
        }
    }

    let in_family = |v: &&LocalVoice| language.families().iter().any(|f| v.in_family(f));

    let premium: Vec<_> = voices
        .iter()
        .filter(in_family)
        .filter(|v| v.is_high_quality())
        .collect();
    if let Some(voice) = pick(&premium, identity) {
        return Some(voice);
    }

    let family: Vec<_> = voices.iter().filter(in_family).collect();
    if let Some(voice) = pick(&family, identity) {
        return Some(voice);
    }

    let any: Vec<_> = voices.iter().collect();
    pick(&any, identity)
}

/// First candidate whose gender matches, else the first candidate
fn pick<'a>(candidates: &[&'a LocalVoice], identity: VoiceIdentity) -> Option<&'a LocalVoice> {
    candidates
        .iter()
        .find(|v| v.gender == Some(identity))
        .or_else(|| candidates.first())
        .copied()
}

/// Speaking rate for an identity
///
/// Slightly slower than normal throughout; listeners with processing
/// difficulties follow slower speech more easily.
#[must_use]
pub const fn speech_rate(identity: VoiceIdentity) -> f32 {
    match identity {
        VoiceIdentity::Child => 0.85,
        _ => 0.9,
    }
}

/// Pitch for an identity when the engine voice itself is neutral
#[must_use]
pub const fn speech_pitch(identity: VoiceIdentity) -> f32 {
    match identity {
        VoiceIdentity::Child => 1.3,
        VoiceIdentity::Female => 1.1,
        VoiceIdentity::Male => 0.9,
        VoiceIdentity::Default => 1.0,
    }
}

/// Which command-line engine is driving speech
#[derive(Debug, Clone, PartialEq, Eq)]
enum EngineProgram {
    /// `espeak-ng` or classic `espeak`
    Espeak(PathBuf),
    /// speech-dispatcher client
    SpdSay(PathBuf),
}

/// Local engine backed by `espeak-ng`, `espeak`, or `spd-say`
#[derive(Debug)]
pub struct CommandEngine {
    program: Option<EngineProgram>,
    cancel_tx: watch::Sender<u64>,
}

impl Default for CommandEngine {
    fn default() -> Self {
        Self::detect()
    }
}

impl CommandEngine {
    /// Locate an installed engine on `PATH`
    ///
    /// An environment without any engine still yields a value; its
    /// operations report `LocalSynthesisUnsupported`.
    #[must_use]
    pub fn detect() -> Self {
        let program = ["espeak-ng", "espeak"]
            .iter()
            .find_map(|bin| which::which(bin).ok())
            .map(EngineProgram::Espeak)
            .or_else(|| which::which("spd-say").ok().map(EngineProgram::SpdSay));

        match &program {
            Some(EngineProgram::Espeak(path) | EngineProgram::SpdSay(path)) => {
                tracing::debug!(path = %path.display(), "local speech engine found");
            }
            None => tracing::warn!("no local speech engine found (tried espeak-ng, espeak, spd-say)"),
        }

        Self::with_program(program)
    }

    /// Use an explicit `espeak`-compatible binary
    #[must_use]
    pub fn espeak(path: PathBuf) -> Self {
        Self::with_program(Some(EngineProgram::Espeak(path)))
    }

    /// An engine that is never available
    #[must_use]
    pub fn unsupported() -> Self {
        Self::with_program(None)
    }

    fn with_program(program: Option<EngineProgram>) -> Self {
        let (cancel_tx, _) = watch::channel(0);
        Self { program, cancel_tx }
    }

    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.program.is_some()
    }

    fn program(&self) -> Result<&EngineProgram> {
        self.program.as_ref().ok_or_else(|| {
            Error::LocalSynthesisUnsupported(
                "no local speech engine installed (espeak-ng, espeak, spd-say)".to_string(),
            )
        })
    }

    fn command_for(program: &EngineProgram, utterance: &Utterance) -> Command {
        match program {
            EngineProgram::Espeak(path) => {
                let mut cmd = Command::new(path);
                let voice = utterance
                    .voice
                    .clone()
                    .unwrap_or_else(|| utterance.language.engine_language().to_string());
                cmd.arg("-v").arg(voice);
                cmd.arg("-s").arg(espeak_wpm(utterance.rate).to_string());
                cmd.arg("-p").arg(espeak_pitch(utterance.pitch).to_string());
                cmd.arg("-a").arg(espeak_amplitude(utterance.volume).to_string());
                cmd.arg("--").arg(&utterance.text);
                cmd
            }
            EngineProgram::SpdSay(path) => {
                let mut cmd = Command::new(path);
                cmd.arg("--wait");
                cmd.arg("-l").arg(utterance.language.engine_language());
                if let Some(voice) = &utterance.voice {
                    cmd.arg("-y").arg(voice);
                }
                cmd.arg("-r").arg(spd_scale(utterance.rate).to_string());
                cmd.arg("-p").arg(spd_scale(utterance.pitch).to_string());
                cmd.arg("-i")
                    .arg(spd_scale(utterance.volume.get() * 2.0).to_string());
                cmd.arg("--").arg(&utterance.text);
                cmd
            }
        }
    }
}

#[async_trait]
impl LocalEngine for CommandEngine {
    async fn voices(&self) -> Result<Vec<LocalVoice>> {
        let program = self.program()?;

        let output = match program {
            EngineProgram::Espeak(path) => Command::new(path).arg("--voices").output().await,
            EngineProgram::SpdSay(path) => Command::new(path).arg("-L").output().await,
        }
        .map_err(|e| Error::LocalSynthesis(format!("failed to list voices: {e}")))?;

        if !output.status.success() {
            return Err(Error::LocalSynthesis(format!(
                "voice listing exited with {}",
                output.status
            )));
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        Ok(match program {
            EngineProgram::Espeak(_) => parse_espeak_voices(&listing),
            EngineProgram::SpdSay(_) => parse_spd_voices(&listing),
        })
    }

    async fn speak(&self, utterance: &Utterance) -> Result<()> {
        let program = self.program()?;
        let mut cancelled = self.cancel_tx.subscribe();

        let mut child = Self::command_for(program, utterance)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::LocalSynthesis(format!("failed to start {}: {e}", self.name())))?;

        tracing::debug!(
            engine = self.name(),
            voice = ?utterance.voice,
            rate = utterance.rate,
            "local utterance started"
        );

        tokio::select! {
            status = child.wait() => {
                let status = status
                    .map_err(|e| Error::LocalSynthesis(format!("{} failed: {e}", self.name())))?;
                if status.success() {
                    tracing::debug!(engine = self.name(), "local utterance finished");
                    Ok(())
                } else {
                    Err(Error::LocalSynthesis(format!("{} exited with {status}", self.name())))
                }
            }
            _ = cancelled.changed() => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to stop local utterance");
                }
                tracing::debug!(engine = self.name(), "local utterance cancelled");
                Ok(())
            }
        }
    }

    fn cancel(&self) {
        self.cancel_tx.send_modify(|generation| *generation += 1);
    }

    fn name(&self) -> &str {
        match self.program {
            Some(EngineProgram::Espeak(_)) => "espeak",
            Some(EngineProgram::SpdSay(_)) => "spd-say",
            None => "none",
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn espeak_wpm(rate: f32) -> u32 {
    (ESPEAK_BASE_WPM * rate.clamp(0.3, 3.0)).round() as u32
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn espeak_pitch(pitch: f32) -> u32 {
    (50.0 * pitch).round().clamp(0.0, 99.0) as u32
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn espeak_amplitude(volume: Volume) -> u32 {
    (volume.get() * 100.0).round() as u32
}

/// Map a multiplier around 1.0 onto speech-dispatcher's -100..=100 scale
#[allow(clippy::cast_possible_truncation)]
fn spd_scale(multiplier: f32) -> i32 {
    ((multiplier - 1.0) * 100.0).round().clamp(-100.0, 100.0) as i32
}

/// Parse `espeak-ng --voices` output
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  en-us           --/M      English_(America)  gmw/en-US            (en 2)
/// ```
#[must_use]
pub fn parse_espeak_voices(listing: &str) -> Vec<LocalVoice> {
    listing
        .lines()
        .filter(|line| !line.trim_start().starts_with("Pty"))
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            let [_, locale, age_gender, name, ..] = cols.as_slice() else {
                return None;
            };
            let gender = match age_gender.rsplit('/').next() {
                Some("M") => Some(VoiceIdentity::Male),
                Some("F") => Some(VoiceIdentity::Female),
                _ => None,
            };
            Some(LocalVoice {
                id: (*locale).to_string(),
                name: name.replace('_', " "),
                locale: (*locale).to_string(),
                gender,
            })
        })
        .collect()
}

/// Parse `spd-say -L` output (`NAME LANGUAGE VARIANT` columns)
#[must_use]
pub fn parse_spd_voices(listing: &str) -> Vec<LocalVoice> {
    listing
        .lines()
        .filter(|line| !line.trim_start().starts_with("NAME"))
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            let [name, locale, ..] = cols.as_slice() else {
                return None;
            };
            Some(LocalVoice {
                id: (*name).to_string(),
                name: (*name).to_string(),
                locale: (*locale).to_string(),
                gender: None,
            })
        })
        .collect()
}
