//! Bulk pre-generation of phrase audio
//!
//! Walks the cross-product of phrases and voices, synthesizing and caching
//! whatever is missing so the board works offline afterwards. Synthesis calls
//! are spaced out by a [`Pacer`] to stay under the provider's rate limits.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::CacheStore;
use crate::synthesis::{RemoteSynthesizer, ensure_playable};
use crate::voice::VoiceIdentity;

/// Progress channel capacity
const EVENT_BUFFER: usize = 32;

/// Ordered, de-duplicated (text, voice) pairs to pre-generate
///
/// Texts are the outer loop and voices the inner one. Blank texts are skipped.
#[derive(Debug, Clone)]
pub struct PregenPlan {
    pairs: std::vec::IntoIter<(String, VoiceIdentity)>,
}

impl PregenPlan {
    #[must_use]
    pub fn new<I, S>(texts: I, voices: &[VoiceIdentity]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen_texts = HashSet::new();
        let texts: Vec<String> = texts
            .into_iter()
            .map(Into::into)
            .filter(|t| !t.trim().is_empty())
            .filter(|t| seen_texts.insert(t.clone()))
            .collect();

        let mut seen_voices = HashSet::new();
        let voices: Vec<VoiceIdentity> = voices
            .iter()
            .copied()
            .filter(|v| seen_voices.insert(*v))
            .collect();

        let pairs: Vec<_> = texts
            .iter()
            .flat_map(|text| voices.iter().map(move |voice| (text.clone(), *voice)))
            .collect();

        Self {
            pairs: pairs.into_iter(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.len() == 0
    }
}

impl Iterator for PregenPlan {
    type Item = (String, VoiceIdentity);

    fn next(&mut self) -> Option<Self::Item> {
        self.pairs.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pairs.size_hint()
    }
}

impl ExactSizeIterator for PregenPlan {}

/// Spacing between consecutive synthesis calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pacer {
    delay: Duration,
}

impl Pacer {
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    /// No spacing at all
    #[must_use]
    pub const fn none() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Where in the plan an event happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PregenProgress {
    /// 1-based position in the plan
    pub index: usize,
    pub total: usize,
    pub text: String,
    pub voice: VoiceIdentity,
}

/// Totals for a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PregenSummary {
    pub generated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// One step of a pre-generation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PregenEvent {
    /// Already cached
    Skipped(PregenProgress),
    /// Synthesized and cached
    Generated { progress: PregenProgress, bytes: usize },
    /// Synthesis or caching failed; the run carries on
    Failed { progress: PregenProgress, error: String },
    /// Always the last event
    Finished(PregenSummary),
}

/// Pre-generate every missing pair in `plan`
///
/// Runs on a background task and reports through the returned stream.
/// Dropping the stream stops the run after the current pair.
#[must_use]
pub fn bulk_populate(
    store: CacheStore,
    plan: PregenPlan,
    synthesizer: Arc<dyn RemoteSynthesizer>,
    pacer: Pacer,
) -> ReceiverStream<PregenEvent> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    tokio::spawn(async move {
        let total = plan.len();
        let mut summary = PregenSummary::default();
        let mut synthesized_any = false;

        tracing::info!(total, provider = synthesizer.name(), "pre-generation started");

        for (i, (text, voice)) in plan.enumerate() {
            let progress = PregenProgress {
                index: i + 1,
                total,
                text,
                voice,
            };

            let cached = store.contains(&progress.text, voice).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "cache lookup failed, synthesizing anyway");
                false
            });

            let event = if cached {
                summary.skipped += 1;
                PregenEvent::Skipped(progress)
            } else {
                if synthesized_any {
                    pacer.pause().await;
                }
                synthesized_any = true;

                match generate(&store, synthesizer.as_ref(), &progress.text, voice).await {
                    Ok(bytes) => {
                        summary.generated += 1;
                        PregenEvent::Generated { progress, bytes }
                    }
                    Err(error) => {
                        tracing::warn!(
                            text = %progress.text,
                            voice = %voice,
                            error = %error,
                            "pre-generation failed for phrase"
                        );
                        summary.failed += 1;
                        PregenEvent::Failed {
                            progress,
                            error: error.to_string(),
                        }
                    }
                }
            };

            if tx.send(event).await.is_err() {
                tracing::debug!("pre-generation stream dropped, stopping");
                return;
            }
        }

        tracing::info!(
            generated = summary.generated,
            skipped = summary.skipped,
            failed = summary.failed,
            "pre-generation finished"
        );
        let _ = tx.send(PregenEvent::Finished(summary)).await;
    });

    ReceiverStream::new(rx)
}

async fn generate(
    store: &CacheStore,
    synthesizer: &dyn RemoteSynthesizer,
    text: &str,
    voice: VoiceIdentity,
) -> crate::Result<usize> {
    let audio = synthesizer.synthesize(text, voice).await?;
    ensure_playable(&audio)?;
    store.put(text, voice, &audio)?;
    Ok(audio.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_is_cross_product_in_order() {
        let plan = PregenPlan::new(
            ["Oo", "Hindi"],
            &[VoiceIdentity::Female, VoiceIdentity::Male],
        );
        assert_eq!(plan.len(), 4);

        let pairs: Vec<_> = plan.collect();
        assert_eq!(
            pairs,
            vec![
                ("Oo".to_string(), VoiceIdentity::Female),
                ("Oo".to_string(), VoiceIdentity::Male),
                ("Hindi".to_string(), VoiceIdentity::Female),
                ("Hindi".to_string(), VoiceIdentity::Male),
            ]
        );
    }

    #[test]
    fn test_plan_dedups_and_skips_blank() {
        let plan = PregenPlan::new(
            vec!["Oo", "  ", "Oo", "Tulong"],
            &[VoiceIdentity::Child, VoiceIdentity::Child],
        );
        let texts: Vec<_> = plan.map(|(t, _)| t).collect();
        assert_eq!(texts, vec!["Oo", "Tulong"]);
    }

    #[test]
    fn test_empty_plan() {
        assert!(PregenPlan::new(Vec::<String>::new(), &VoiceIdentity::ALL).is_empty());
        assert!(PregenPlan::new(["Oo"], &[]).is_empty());
    }
}
