//! Sayboard - audio core for an accessibility soundboard
//!
//! Each phrase button speaks its text aloud. This library provides:
//! - A persistent cache of synthesized phrase audio
//! - Tiered synthesis: cache, then a remote TTS provider, then the
//!   on-device engine
//! - A playback coordinator that keeps at most one phrase audible and
//!   throttles rapid presses
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Soundboard                        │
//! │        speak_phrase  │  stop  │  subscribe           │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               PlaybackCoordinator                    │
//! │   admission  │  rate limit  │  observers             │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                SynthesisGateway                      │
//! │   CacheStore  →  Remote provider  →  Local engine    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod playback;
pub mod soundboard;
pub mod synthesis;
pub mod voice;

pub use cache::{CacheKey, CacheStats, CacheStore};
pub use config::Config;
pub use error::{Error, Result};
pub use playback::{Admission, PlaybackCoordinator, PlaybackState, RateLimitConfig, Rejection};
pub use soundboard::{PhraseOutcome, Soundboard};
pub use synthesis::{SpeechOutcome, SynthesisGateway, Tier};
pub use voice::{LanguageMode, SpeakOptions, VoiceIdentity, Volume};
