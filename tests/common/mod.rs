//! Shared test utilities: fakes for every outside dependency of the gateway

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use sayboard::playback::{ManualClock, PlaybackDevice};
use sayboard::synthesis::{
    LocalEngine, LocalVoice, RemoteSynthesizer, StaticConnectivity, SynthesisGateway, Utterance,
};
use sayboard::{CacheStore, Error, RateLimitConfig, Result, Soundboard, VoiceIdentity, Volume};

/// A short mono WAV tone
pub fn wav_audio(samples: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..samples {
            let sample: i16 = if i % 2 == 0 { 4000 } else { -4000 };
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Audio bytes the fake remote returns
pub fn remote_audio() -> Vec<u8> {
    wav_audio(160)
}

/// What a provider sends when it answers 200 with an error document
pub const JSON_ERROR_BODY: &[u8] = br#"{"detail":{"status":"quota_exceeded"}}"#;

#[derive(Clone, Copy, Default, PartialEq, Eq)]
enum Reply {
    #[default]
    Audio,
    Fail,
    Malformed,
}

/// Remote synthesizer that counts calls
#[derive(Default)]
pub struct CountingRemote {
    calls: AtomicUsize,
    requests: Mutex<Vec<(String, VoiceIdentity)>>,
    reply: Reply,
}

impl CountingRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A remote whose every call fails
    #[must_use]
    pub fn failing() -> Self {
        Self {
            reply: Reply::Fail,
            ..Self::default()
        }
    }

    /// A remote that reports success but returns a JSON error document
    #[must_use]
    pub fn malformed() -> Self {
        Self {
            reply: Reply::Malformed,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(String, VoiceIdentity)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteSynthesizer for CountingRemote {
    async fn synthesize(&self, text: &str, voice: VoiceIdentity) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push((text.to_string(), voice));

        match self.reply {
            Reply::Audio => Ok(remote_audio()),
            Reply::Fail => Err(Error::RemoteSynthesis("provider returned 503".to_string())),
            Reply::Malformed => Ok(JSON_ERROR_BODY.to_vec()),
        }
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// Local engine that records what it was asked to say
pub struct FakeLocalEngine {
    voices: Vec<LocalVoice>,
    utterances: Mutex<Vec<Utterance>>,
    cancels: AtomicUsize,
    supported: bool,
}

impl FakeLocalEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::with_voices(Vec::new())
    }

    #[must_use]
    pub fn with_voices(voices: Vec<LocalVoice>) -> Self {
        Self {
            voices,
            utterances: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
            supported: true,
        }
    }

    /// A host without any speech engine
    #[must_use]
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    pub fn utterances(&self) -> Vec<Utterance> {
        self.utterances.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.utterances.lock().unwrap().len()
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalEngine for FakeLocalEngine {
    async fn voices(&self) -> Result<Vec<LocalVoice>> {
        if !self.supported {
            return Err(Error::LocalSynthesisUnsupported("no engine".to_string()));
        }
        Ok(self.voices.clone())
    }

    async fn speak(&self, utterance: &Utterance) -> Result<()> {
        if !self.supported {
            return Err(Error::LocalSynthesisUnsupported("no engine".to_string()));
        }
        self.utterances.lock().unwrap().push(utterance.clone());
        Ok(())
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Playback device that records audio instead of playing it
#[derive(Default)]
pub struct FakeDevice {
    played: Mutex<Vec<(Vec<u8>, Volume)>>,
    stops: AtomicUsize,
    /// When set, `play` waits for a notification before returning
    gate: Option<Arc<Notify>>,
    fail: bool,
}

impl FakeDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A device whose playback only finishes when `gate` is notified
    #[must_use]
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// A device that cannot play anything
    #[must_use]
    pub fn broken() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn played(&self) -> Vec<(Vec<u8>, Volume)> {
        self.played.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaybackDevice for FakeDevice {
    async fn play(&self, audio: &[u8], volume: Volume) -> Result<()> {
        if self.fail {
            return Err(Error::Audio("device unplugged".to_string()));
        }
        self.played.lock().unwrap().push((audio.to_vec(), volume));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// A gateway wired to fakes, with handles to inspect each of them
pub struct Rig {
    pub cache: CacheStore,
    pub remote: Arc<CountingRemote>,
    pub connectivity: Arc<StaticConnectivity>,
    pub local: Arc<FakeLocalEngine>,
    pub device: Arc<FakeDevice>,
    pub gateway: Arc<SynthesisGateway>,
}

pub struct RigBuilder {
    cache: CacheStore,
    remote: Option<Arc<CountingRemote>>,
    online: bool,
    local: FakeLocalEngine,
    device: FakeDevice,
}

impl RigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: CacheStore::in_memory(),
            remote: Some(Arc::new(CountingRemote::new())),
            online: true,
            local: FakeLocalEngine::new(),
            device: FakeDevice::new(),
        }
    }

    #[must_use]
    pub fn cache(mut self, cache: CacheStore) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn remote(mut self, remote: CountingRemote) -> Self {
        self.remote = Some(Arc::new(remote));
        self
    }

    /// No remote provider configured at all
    #[must_use]
    pub fn without_remote(mut self) -> Self {
        self.remote = None;
        self
    }

    #[must_use]
    pub fn offline(mut self) -> Self {
        self.online = false;
        self
    }

    #[must_use]
    pub fn local(mut self, local: FakeLocalEngine) -> Self {
        self.local = local;
        self
    }

    #[must_use]
    pub fn device(mut self, device: FakeDevice) -> Self {
        self.device = device;
        self
    }

    #[must_use]
    pub fn build(self) -> Rig {
        let has_remote = self.remote.is_some();
        let remote = self
            .remote
            .unwrap_or_else(|| Arc::new(CountingRemote::new()));
        let connectivity = Arc::new(StaticConnectivity::new(self.online));
        let local = Arc::new(self.local);
        let device = Arc::new(self.device);

        let gateway = SynthesisGateway::new(
            self.cache.clone(),
            has_remote.then(|| Arc::clone(&remote) as Arc<dyn RemoteSynthesizer>),
            connectivity.clone(),
            local.clone(),
            device.clone(),
        );

        Rig {
            cache: self.cache,
            remote,
            connectivity,
            local,
            device,
            gateway: Arc::new(gateway),
        }
    }
}

impl Default for RigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Rig {
    /// Put the gateway behind a soundboard driven by a manual clock
    #[must_use]
    pub fn soundboard(&self, rate_limit: RateLimitConfig) -> (Soundboard, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let board = Soundboard::new(Arc::clone(&self.gateway), rate_limit, clock.clone());
        (board, clock)
    }
}

/// Build an in-memory store with entries already in it
pub fn seeded_store(entries: &[(&str, VoiceIdentity, &[u8])]) -> CacheStore {
    let store = CacheStore::in_memory();
    for (text, voice, audio) in entries {
        store.put(text, *voice, audio).expect("failed to seed cache");
    }
    store
}
