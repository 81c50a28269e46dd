//! Soundboard wiring: phrases spoken through the coordinator

use std::sync::Arc;

use tokio_stream::wrappers::ReceiverStream;

use crate::cache::{CacheStore, Pacer, PregenEvent, PregenPlan, bulk_populate};
use crate::config::Config;
use crate::playback::{
    Admission, Clock, PlaybackCoordinator, PlaybackDevice, PlaybackState, RateLimitConfig,
    SpeakerDevice, Subscription, SystemClock, UnavailableDevice,
};
use crate::synthesis::{
    CommandEngine, Connectivity, HttpSynthesizer, RemoteSynthesizer, SynthesisGateway, TcpProbe,
    Tier,
};
use crate::voice::SpeakOptions;
use crate::{Error, Result};

/// What happened to a phrase button press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhraseOutcome {
    pub admission: Admission,
    /// Tier that produced the speech; `None` unless the phrase was fully spoken
    pub tier: Option<Tier>,
}

/// A synthesis gateway behind a playback coordinator
pub struct Soundboard {
    coordinator: PlaybackCoordinator,
    gateway: Arc<SynthesisGateway>,
}

impl std::fmt::Debug for Soundboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Soundboard")
            .field("coordinator", &self.coordinator)
            .field("gateway", &self.gateway)
            .finish()
    }
}

impl Soundboard {
    /// Put `gateway` behind a new coordinator
    ///
    /// Interrupts and stops silence the gateway's device and local engine.
    #[must_use]
    pub fn new(
        gateway: Arc<SynthesisGateway>,
        rate_limit: RateLimitConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let coordinator = PlaybackCoordinator::new(rate_limit, clock, gateway.clone());
        Self {
            coordinator,
            gateway,
        }
    }

    /// Build the production wiring from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the remote provider is misconfigured
    pub fn from_config(config: &Config) -> Result<Self> {
        let cache = CacheStore::file(config.cache_path());

        let remote: Option<Arc<dyn RemoteSynthesizer>> = if config.remote.has_key() {
            Some(Arc::new(HttpSynthesizer::new(&config.remote)?))
        } else {
            None
        };

        let connectivity: Arc<dyn Connectivity> = match &config.probe_addr {
            Some(addr) => Arc::new(TcpProbe::new(addr.clone(), config.probe_timeout())),
            None => Arc::new(TcpProbe::for_url(
                &config.remote.base_url,
                config.probe_timeout(),
            )?),
        };

        let gateway = SynthesisGateway::new(
            cache,
            remote,
            connectivity,
            Arc::new(CommandEngine::detect()),
            output_device(SpeakerDevice::new()),
        );

        tracing::info!(
            cache = %config.cache_path().display(),
            remote = config.remote.has_key(),
            provider = config.remote.provider.as_str(),
            "soundboard ready"
        );

        Ok(Self::new(
            Arc::new(gateway),
            config.rate_limit,
            Arc::new(SystemClock),
        ))
    }

    /// Speak a phrase on behalf of button `id`
    ///
    /// # Errors
    ///
    /// Returns a speech failure when the phrase was admitted but no tier
    /// could speak it
    pub async fn speak_phrase(
        &self,
        id: &str,
        text: &str,
        options: &SpeakOptions,
    ) -> Result<PhraseOutcome> {
        let mut tier = None;
        let served = &mut tier;
        let gateway = &self.gateway;

        let admission = self
            .coordinator
            .request_play(id, || async move {
                let outcome = gateway.speak(text, options).await?;
                *served = Some(outcome.tier);
                Ok(())
            })
            .await?;

        Ok(PhraseOutcome { admission, tier })
    }

    /// Stop whatever is speaking
    pub fn stop(&self) {
        self.coordinator.stop_current();
    }

    /// Remaining rate-limit cooldown, for the UI countdown
    #[must_use]
    pub fn time_until_next_admission(&self) -> std::time::Duration {
        self.coordinator.time_until_next_admission()
    }

    /// Observe playback state changes
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&PlaybackState) + Send + Sync + 'static,
    {
        self.coordinator.subscribe(observer)
    }

    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.coordinator.state()
    }

    pub fn set_rate_limit(&self, config: RateLimitConfig) {
        self.coordinator.set_rate_limit(config);
    }

    #[must_use]
    pub fn cache(&self) -> &CacheStore {
        self.gateway.cache()
    }

    #[must_use]
    pub const fn coordinator(&self) -> &PlaybackCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub fn gateway(&self) -> &Arc<SynthesisGateway> {
        &self.gateway
    }

    /// Fill the cache for `plan` using the remote provider
    ///
    /// # Errors
    ///
    /// Returns `Config` if no remote provider is configured
    pub fn pregenerate(&self, plan: PregenPlan, pacer: Pacer) -> Result<ReceiverStream<PregenEvent>> {
        let remote = self.gateway.remote().cloned().ok_or_else(|| {
            Error::Config("pre-generation needs a remote provider API key".to_string())
        })?;
        Ok(bulk_populate(self.cache().clone(), plan, remote, pacer))
    }
}

/// The speaker, or a stand-in that hands every phrase to the local engine
fn output_device(speaker: Result<SpeakerDevice>) -> Arc<dyn PlaybackDevice> {
    match speaker {
        Ok(device) => Arc::new(device),
        Err(e) => {
            tracing::warn!(error = %e, "no audio output device, speaking with the local engine only");
            Arc::new(UnavailableDevice::new(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::Volume;

    #[tokio::test]
    async fn test_missing_speaker_becomes_failing_device() {
        let device = output_device(Err(Error::Audio("no output device available".to_string())));

        let err = device.play(b"RIFF", Volume::FULL).await.unwrap_err();
        assert!(matches!(err, Error::Audio(ref m) if m.contains("no output device available")));
    }
}
